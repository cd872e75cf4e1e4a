use crate::types::Headers;
use bytes::Bytes;
use std::time::Duration;

/// The response object produced by the core (§6): status, headers, body, and wall-clock elapsed
/// time for the request. Failures are surfaced as `Err(RequestError)` from the call site rather
/// than an `error` field here, since Rust's `Result` already gives that variant for free.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: usize,
    pub headers: Headers,
    pub body: Bytes,
    pub elapsed: Duration,
}

impl Response {
    pub fn header(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn status(&self) -> u16 {
        self.header(":status")
            .expect("no status in response")
            .parse()
            .expect("non-number status")
    }
}
