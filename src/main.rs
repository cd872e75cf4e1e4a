use anyhow::Context;
use clap::{crate_version, App, Arg};
use http2::{Client, ClientConfig, Url};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("http2")
        .version(crate_version!())
        .arg(Arg::with_name("url").required(true).index(1))
        .get_matches();
    let url = Url::parse(matches.value_of("url").expect("missing url")).context("invalid url")?;

    let client = Client::new(ClientConfig::default());
    let response = client.get(url).await.context("request failed")?;
    println!("{}", String::from_utf8_lossy(&response.body));
    Ok(())
}
