use crate::admission::Priority;
use crate::types::Headers;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

static REQUEST_ID: AtomicUsize = AtomicUsize::new(1);

/// Per RFC 7540 §8.1.2.2, hop-by-hop headers have no meaning over a single HTTP/2 connection and
/// must not be forwarded; `te` is the one exception, permitted only with the value `trailers`.
fn strip_connection_specific_headers(headers: Headers) -> Headers {
    const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "proxy-connection", "transfer-encoding", "upgrade", "host"];
    headers
        .into_iter()
        .filter(|(name, value)| {
            let name = name.to_ascii_lowercase();
            if name == "te" {
                value.eq_ignore_ascii_case("trailers")
            } else {
                !HOP_BY_HOP.contains(&name.as_str())
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Method {
    #[display(fmt = "GET")]
    Get,
    #[display(fmt = "POST")]
    Post,
    #[display(fmt = "PUT")]
    Put,
    #[display(fmt = "DELETE")]
    Delete,
    #[display(fmt = "HEAD")]
    Head,
    #[display(fmt = "PATCH")]
    Patch,
    #[display(fmt = "OPTIONS")]
    Options,
    #[display(fmt = "{}", _0)]
    Other(String),
}

impl Method {
    /// GET and HEAD send HEADERS with END_STREAM=1 and no DATA frames (§4.5).
    pub fn has_no_body(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

/// A subset of the reserved request metadata keys from §6, typed directly rather than carried
/// in a stringly-keyed map (§9: explicit types instead of reflection-based bridging). Keys this
/// crate's protocol engine does not itself act on (the `proxy.*` family, redirect following,
/// background-execution dedupe) are out of scope per §1 and not modeled here.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    /// If true, suppresses adaptive timeout scaling for this request (§4.9, §6).
    pub explicit_timeout: bool,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub id: usize,
    pub url: Url,
    pub method: Method,
    pub headers: Headers,
    pub body: Bytes,
    pub deadline: Option<Duration>,
    pub priority: Priority,
    pub metadata: RequestMetadata,
}

impl Request {
    pub fn new(method: Method, url: Url, headers: Option<Headers>, body: impl Into<Bytes>) -> Self {
        let mut full_headers = vec![
            (":method".to_owned(), method.to_string()),
            (":scheme".to_owned(), url.scheme().to_owned()),
            (":path".to_owned(), url.path().to_owned()),
            (
                ":authority".to_owned(),
                if let Some(port) = url.port() {
                    format!("{}:{}", url.host_str().expect("URL cannot be a base"), port)
                } else {
                    url.host_str().expect("URL cannot be a base").to_owned()
                },
            ),
        ];
        if let Some(headers) = headers {
            full_headers.extend(strip_connection_specific_headers(headers));
        }
        Self {
            id: REQUEST_ID.fetch_add(1, Ordering::SeqCst),
            url,
            method,
            headers: full_headers,
            body: body.into(),
            deadline: None,
            priority: Priority::Normal,
            metadata: RequestMetadata::default(),
        }
    }

    #[inline]
    pub fn get(url: Url, headers: Option<Headers>) -> Self {
        Self::new(Method::Get, url, headers, Bytes::new())
    }

    #[inline]
    pub fn post(url: Url, headers: Option<Headers>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Post, url, headers, body)
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Host as consumed by the per-host concurrency limiter (§4.10): `host[:port]`, matching
    /// what `:authority` carries.
    pub fn host_key(&self) -> String {
        if let Some(port) = self.url.port() {
            format!("{}:{}", self.url.host_str().unwrap_or(""), port)
        } else {
            self.url.host_str().unwrap_or("").to_owned()
        }
    }
}
