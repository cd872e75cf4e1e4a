//! The minimal enumerated middleware sum type (§4.12, §9): virtual dispatch across the source's
//! middleware/interceptor/plugin chains becomes a closed set of variants, composed by chaining
//! function values rather than dynamic dispatch through an interface.

use crate::error::{Http2Error, RequestError};
use crate::response::Response;
use crate::timeout::AdaptiveTimeout;
use std::sync::Arc;
use std::time::Duration;

/// Selected at construction time; governs how [`Middleware::ErrorConversion`] turns an
/// engine-level failure into the caller-facing outcome (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorFailurePolicy {
    /// Surface the error as-is.
    Propagate,
    /// Synthesize a 500 Internal response with the original cause attached, rather than failing
    /// the request.
    ConvertToResponse,
    /// Suppress the failure and continue the pipeline with the pre-interceptor state.
    IgnoreAndContinue,
}

/// One of the three built-in middleware variants relevant to the protocol core. No dynamic
/// dispatch: callers match on the variant rather than invoking it through a trait object.
pub enum Middleware {
    AdaptiveTimeout(Arc<AdaptiveTimeout>),
    ErrorConversion(InterceptorFailurePolicy),
    Logging,
}

impl Middleware {
    /// Applied before a request enters the pipeline: scales the deadline if this is the
    /// adaptive-timeout variant, otherwise passes `requested` through unchanged.
    pub fn adapt_timeout(&self, requested: Duration, explicit_timeout: bool) -> Duration {
        match self {
            Middleware::AdaptiveTimeout(adaptive) => adaptive.adapt(requested, explicit_timeout),
            _ => requested,
        }
    }

    /// Applied after the pipeline completes: converts an engine-level error into the
    /// caller-facing `Result` per the configured [`InterceptorFailurePolicy`], or passes other
    /// variants through untouched.
    pub fn convert_error(
        &self,
        request_id: usize,
        result: Result<Response, Http2Error>,
    ) -> Result<Response, RequestError> {
        match self {
            Middleware::ErrorConversion(policy) => match (policy, result) {
                (_, Ok(response)) => Ok(response),
                (InterceptorFailurePolicy::Propagate, Err(err)) => Err(err.into()),
                (InterceptorFailurePolicy::ConvertToResponse, Err(err)) => Ok(Response {
                    request_id,
                    headers: vec![(":status".to_string(), "500".to_string())],
                    body: bytes::Bytes::from(err.to_string()),
                    elapsed: std::time::Duration::ZERO,
                }),
                (InterceptorFailurePolicy::IgnoreAndContinue, Err(_)) => Ok(Response {
                    request_id,
                    headers: vec![(":status".to_string(), "0".to_string())],
                    body: bytes::Bytes::new(),
                    elapsed: std::time::Duration::ZERO,
                }),
            },
            _ => result.map_err(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_to_response_synthesizes_a_500() {
        let middleware = Middleware::ErrorConversion(InterceptorFailurePolicy::ConvertToResponse);
        let response = middleware
            .convert_error(1, Err(Http2Error::StreamClosed))
            .unwrap();
        assert_eq!(response.status(), 500);
    }

    #[test]
    fn propagate_surfaces_the_error() {
        let middleware = Middleware::ErrorConversion(InterceptorFailurePolicy::Propagate);
        let err = middleware
            .convert_error(1, Err(Http2Error::StreamClosed))
            .unwrap_err();
        assert!(matches!(err, RequestError::Network(_)));
    }
}
