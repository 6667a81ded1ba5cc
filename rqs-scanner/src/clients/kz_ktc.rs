//! kz-ktc: ОФД Казахтелеком consumer API
//!
//! The API host's chain needs the GoGetSSL RSA DV intermediate; it is
//! embedded and added to the trust roots.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use governor::DefaultDirectRateLimiter;
use reqwest::{Certificate, StatusCode};
use rqs_common::receipts::{DomainCode, KzData, ReceiptRef};
use serde_json::Value;
use tracing::warn;

use super::http::{client_builder, excerpt, rate_limiter, read_response, unexpected_status};
use super::{wrong_domain, CorrectnessSink, FetchClient, FetchError};

pub const DEFAULT_BASE_URL: &str = "https://consumer.oofd.kz";

/// GoGetSSL RSA DV CA, issued by USERTrust RSA
const GOGETSSL_RSA_DV_CA_PEM: &str = include_str!("../../certs/gogetssl_rsa_dv_ca.pem");

/// notAfter of the embedded CA: 2028-09-05T23:59:59Z
const GOGETSSL_RSA_DV_CA_NOT_AFTER: i64 = 1_851_811_199;

pub struct KzKtcClient {
    http: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl KzKtcClient {
    pub fn new() -> reqwest::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> reqwest::Result<Self> {
        let ca = Certificate::from_pem(GOGETSSL_RSA_DV_CA_PEM.as_bytes())?;
        check_ca_expiry(Utc::now());

        Ok(Self {
            http: client_builder().add_root_certificate(ca).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: rate_limiter(),
        })
    }

    /// `<base>/api/tickets/get-by-url?f=..&i=..&s=..&t=..`
    pub fn api_url(&self, data: &KzData) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("f", &data.kkm_fns_id)
            .append_pair("i", &data.fiscal_id)
            .append_pair("s", &data.sum.to_string())
            .append_pair("t", &data.created_at.format("%Y%m%dT%H%M%S").to_string())
            .finish();
        format!("{}/api/tickets/get-by-url?{}", self.base_url, query)
    }
}

pub fn ca_expires_at() -> DateTime<Utc> {
    DateTime::from_timestamp(GOGETSSL_RSA_DV_CA_NOT_AFTER, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Warns when the embedded CA expires within a year; returns the time left in that case
pub fn check_ca_expiry(now: DateTime<Utc>) -> Option<Duration> {
    let left = ca_expires_at() - now;
    if left <= Duration::days(365) {
        warn!(
            domain = %DomainCode::KzKtc,
            expires_at = %ca_expires_at(),
            days_left = left.num_days(),
            "custom CA certificate will expire in less than a year"
        );
        return Some(left);
    }
    None
}

#[async_trait]
impl FetchClient for KzKtcClient {
    fn domain(&self) -> DomainCode {
        DomainCode::KzKtc
    }

    async fn fetch_receipt(
        &self,
        reference: &ReceiptRef,
        _sink: &dyn CorrectnessSink,
    ) -> Result<Vec<u8>, FetchError> {
        let ReceiptRef::KzKtc(r) = reference else {
            return Err(wrong_domain(self.domain(), reference));
        };

        check_ca_expiry(Utc::now());
        self.limiter.until_ready().await;

        let url = self.api_url(r.data());
        let response = self.http.get(&url).send().await?;
        let (status, body) = read_response(self.domain(), response).await?;

        if status != StatusCode::OK {
            return Err(unexpected_status(status, &body));
        }

        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(_)) => Ok(body),
            _ => Err(FetchError::Malformed(excerpt(&body))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::test_support::{kz_ref, serve, CountingSink};
    use axum::{http::StatusCode as AxumStatus, routing::get, Router};
    use chrono::TimeZone;

    #[test]
    fn test_api_url() {
        let client = KzKtcClient::new().unwrap();
        let ReceiptRef::KzKtc(r) = kz_ref(DomainCode::KzKtc) else {
            panic!("expected kz-ktc reference");
        };
        assert_eq!(
            client.api_url(r.data()),
            "https://consumer.oofd.kz/api/tickets/get-by-url?f=010101234567&i=123456789012&s=1230.00&t=20240309T123456"
        );
    }

    #[test]
    fn test_embedded_ca_parses() {
        assert!(Certificate::from_pem(GOGETSSL_RSA_DV_CA_PEM.as_bytes()).is_ok());
        assert_eq!(ca_expires_at().to_rfc3339(), "2028-09-05T23:59:59+00:00");
    }

    #[test]
    fn test_ca_expiry_warning_window() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(check_ca_expiry(early).is_none());

        let late = Utc.with_ymd_and_hms(2028, 3, 1, 0, 0, 0).unwrap();
        let left = check_ca_expiry(late).unwrap();
        assert_eq!(left.num_days(), 188);
    }

    #[tokio::test]
    async fn test_fetch_json_ticket() {
        let router = Router::new().route(
            "/api/tickets/get-by-url",
            get(|| async { r#"{"ticket":{"items":[{"name":"Хлеб"}]}}"# }),
        );
        let client = KzKtcClient::with_base_url(&serve(router).await).unwrap();

        let body = client
            .fetch_receipt(&kz_ref(DomainCode::KzKtc), &CountingSink::default())
            .await
            .unwrap();
        assert!(body.starts_with(br#"{"ticket""#));
    }

    #[tokio::test]
    async fn test_non_object_body_is_malformed() {
        let router = Router::new().route("/api/tickets/get-by-url", get(|| async { "[1,2]" }));
        let client = KzKtcClient::with_base_url(&serve(router).await).unwrap();

        let err = client
            .fetch_receipt(&kz_ref(DomainCode::KzKtc), &CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_not_found_status_consumes_budget() {
        let router = Router::new().route(
            "/api/tickets/get-by-url",
            get(|| async { (AxumStatus::NOT_FOUND, "{}") }),
        );
        let client = KzKtcClient::with_base_url(&serve(router).await).unwrap();

        let err = client
            .fetch_receipt(&kz_ref(DomainCode::KzKtc), &CountingSink::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedStatus { status: 404, .. }));
        assert!(err.decreases_retry_budget());
    }
}
