//! Shared HTTP plumbing for the fetch clients

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{ClientBuilder, Response, StatusCode};
use rqs_common::receipts::DomainCode;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use super::FetchError;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest body excerpt carried in error messages
const ERROR_BODY_LIMIT: usize = 512;

pub(crate) fn client_builder() -> ClientBuilder {
    reqwest::Client::builder().timeout(REQUEST_TIMEOUT)
}

/// One request per second per client
pub(crate) fn rate_limiter() -> DefaultDirectRateLimiter {
    RateLimiter::direct(Quota::per_second(NonZeroU32::MIN))
}

/// Reads the whole body and logs the exchange
pub(crate) async fn read_response(
    domain: DomainCode,
    response: Response,
) -> Result<(StatusCode, Vec<u8>), FetchError> {
    let status = response.status();
    let url = response.url().clone();
    let body = response.bytes().await?.to_vec();

    debug!(
        domain = %domain,
        status = status.as_u16(),
        url = %url,
        len = body.len(),
        "upstream response"
    );

    Ok((status, body))
}

/// Error for a non-200 reply
pub(crate) fn unexpected_status(status: StatusCode, body: &[u8]) -> FetchError {
    FetchError::UnexpectedStatus {
        status: status.as_u16(),
        body: excerpt(body),
    }
}

/// Lossy, length-limited body text for error messages
pub(crate) fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_limits_length() {
        assert_eq!(excerpt(b"short"), "short");
        let long = "я".repeat(ERROR_BODY_LIMIT + 10);
        let cut = excerpt(long.as_bytes());
        assert_eq!(cut.chars().count(), ERROR_BODY_LIMIT + 1);
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_first_request() {
        let limiter = rate_limiter();
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
