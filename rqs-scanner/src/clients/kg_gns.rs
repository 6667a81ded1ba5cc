//! kg-gns: ГНС ticket API
//!
//! The reference itself is the API URL.

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use reqwest::StatusCode;
use rqs_common::receipts::{DomainCode, ReceiptRef};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::http::{client_builder, excerpt, rate_limiter, read_response, unexpected_status};
use super::{wrong_domain, CorrectnessSink, FetchClient, FetchError};

#[derive(Debug, Deserialize)]
struct TicketResponse {
    #[serde(alias = "Items")]
    items: Vec<Value>,
}

pub struct KgGnsClient {
    http: reqwest::Client,
    /// Replaces scheme, host and port of the reference URL when set
    origin_override: Option<String>,
    limiter: DefaultDirectRateLimiter,
}

impl KgGnsClient {
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self {
            http: client_builder().build()?,
            origin_override: None,
            limiter: rate_limiter(),
        })
    }

    /// Sends every request to `origin` instead of the host in the reference
    pub fn with_origin(origin: &str) -> reqwest::Result<Self> {
        Ok(Self {
            origin_override: Some(origin.trim_end_matches('/').to_string()),
            ..Self::new()?
        })
    }

    pub fn request_url(&self, ref_text: &str) -> String {
        let Some(origin) = &self.origin_override else {
            return ref_text.to_string();
        };
        match Url::parse(ref_text) {
            Ok(url) => match url.query() {
                Some(query) => format!("{}{}?{}", origin, url.path(), query),
                None => format!("{}{}", origin, url.path()),
            },
            Err(_) => ref_text.to_string(),
        }
    }
}

#[async_trait]
impl FetchClient for KgGnsClient {
    fn domain(&self) -> DomainCode {
        DomainCode::KgGns
    }

    async fn fetch_receipt(
        &self,
        reference: &ReceiptRef,
        _sink: &dyn CorrectnessSink,
    ) -> Result<Vec<u8>, FetchError> {
        let ReceiptRef::KgGns(r) = reference else {
            return Err(wrong_domain(self.domain(), reference));
        };

        self.limiter.until_ready().await;

        let url = self.request_url(r.text());
        let response = self.http.get(&url).send().await?;
        let (status, body) = read_response(self.domain(), response).await?;

        // 404: either the receipt is wrong or the register was offline
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(excerpt(&body)));
        }
        if status != StatusCode::OK {
            return Err(unexpected_status(status, &body));
        }

        let ticket: TicketResponse =
            serde_json::from_slice(&body).map_err(|_| FetchError::Malformed(excerpt(&body)))?;
        if ticket.items.is_empty() {
            return Err(FetchError::Malformed("receipt items not ready".to_string()));
        }

        Ok(body)
    }
}
