//! kz-ttc: ОФД Транстелеком receipt pages
//!
//! The operator has no JSON API; the payload is the rendered HTML receipt.

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use reqwest::StatusCode;
use rqs_common::receipts::{DomainCode, KzData, ReceiptRef};
use tracing::debug;

use super::http::{client_builder, rate_limiter, read_response, unexpected_status};
use super::{wrong_domain, CorrectnessSink, FetchClient, FetchError};

pub const DEFAULT_BASE_URL: &str = "https://ofd1.kz";

/// Marker present on every page that actually shows a receipt
const TOTAL_MARKER: &str = "ИТОГО";

pub struct KzTtcClient {
    http: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl KzTtcClient {
    pub fn new() -> reqwest::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> reqwest::Result<Self> {
        Ok(Self {
            http: client_builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: rate_limiter(),
        })
    }

    /// `<base>/t/?f=..&i=..&s=..&t=..`
    pub fn page_url(&self, data: &KzData) -> String {
        format!("{}/t/?{}", self.base_url, page_query(data))
    }
}

fn page_query(data: &KzData) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("f", &data.kkm_fns_id)
        .append_pair("i", &data.fiscal_id)
        .append_pair("s", &data.sum.to_string())
        .append_pair("t", &data.created_at.format("%Y%m%dT%H%M%S").to_string())
        .finish()
}

#[async_trait]
impl FetchClient for KzTtcClient {
    fn domain(&self) -> DomainCode {
        DomainCode::KzTtc
    }

    async fn fetch_receipt(
        &self,
        reference: &ReceiptRef,
        _sink: &dyn CorrectnessSink,
    ) -> Result<Vec<u8>, FetchError> {
        let ReceiptRef::KzTtc(r) = reference else {
            return Err(wrong_domain(self.domain(), reference));
        };

        self.limiter.until_ready().await;

        let url = self.page_url(r.data());
        let response = self.http.get(&url).send().await?;
        let (status, body) = read_response(self.domain(), response).await?;

        if status != StatusCode::OK {
            return Err(unexpected_status(status, &body));
        }

        if !String::from_utf8_lossy(&body).contains(TOTAL_MARKER) {
            return Err(FetchError::Malformed(
                "receipt appears to be missing from the page".to_string(),
            ));
        }

        debug!(html_length = body.len(), "kz-ttc receipt page");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::test_support::{kz_ref, serve, CountingSink};
    use axum::{extract::RawQuery, http::StatusCode as AxumStatus, routing::get, Router};

    #[test]
    fn test_page_url() {
        let client = KzTtcClient::new().unwrap();
        let ReceiptRef::KzTtc(r) = kz_ref(DomainCode::KzTtc) else {
            panic!("expected kz-ttc reference");
        };
        assert_eq!(
            client.page_url(r.data()),
            "https://ofd1.kz/t/?f=010101234567&i=123456789012&s=1230.00&t=20240309T123456"
        );
    }

    #[tokio::test]
    async fn test_fetch_page_with_total() {
        let router = Router::new().route(
            "/t/",
            get(|RawQuery(q): RawQuery| async move {
                assert_eq!(
                    q.as_deref(),
                    Some("f=010101234567&i=123456789012&s=1230.00&t=20240309T123456")
                );
                "<html><b>ИТОГО</b> 1230.00</html>"
            }),
        );
        let client = KzTtcClient::with_base_url(&serve(router).await).unwrap();

        let sink = CountingSink::default();
        let body = client
            .fetch_receipt(&kz_ref(DomainCode::KzTtc), &sink)
            .await
            .unwrap();
        assert!(String::from_utf8(body).unwrap().contains("ИТОГО"));
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn test_page_without_total_is_malformed() {
        let router = Router::new().route("/t/", get(|| async { "<html>Чек не найден</html>" }));
        let client = KzTtcClient::with_base_url(&serve(router).await).unwrap();

        let err = client
            .fetch_receipt(&kz_ref(DomainCode::KzTtc), &CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
        assert!(err.decreases_retry_budget());
    }

    #[tokio::test]
    async fn test_server_error() {
        let router = Router::new().route(
            "/t/",
            get(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }),
        );
        let client = KzTtcClient::with_base_url(&serve(router).await).unwrap();

        let err = client
            .fetch_receipt(&kz_ref(DomainCode::KzTtc), &CountingSink::default())
            .await
            .unwrap_err();
        match err {
            FetchError::UnexpectedStatus { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_other_domain() {
        let client = KzTtcClient::new().unwrap();
        let err = client
            .fetch_receipt(&kz_ref(DomainCode::KzJus), &CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::WrongDomain {
                expected: DomainCode::KzTtc,
                actual: DomainCode::KzJus
            }
        ));
    }
}
