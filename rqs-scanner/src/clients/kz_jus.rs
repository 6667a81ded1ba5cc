//! kz-jus: ОФД Jusan cabinet API

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use reqwest::StatusCode;
use rqs_common::receipts::{DomainCode, KzData, ReceiptRef};
use serde::Deserialize;

use super::http::{client_builder, excerpt, rate_limiter, read_response, unexpected_status};
use super::{wrong_domain, CorrectnessSink, FetchClient, FetchError};

pub const DEFAULT_BASE_URL: &str = "https://cabinet.kofd.kz";

// Unknown register:   {"error":{"code":5,"text":"Касса не найдена"}}
// No such receipt:    {"data":{"found":0,"ticket":null,"ticketUrl":null},"error":null}
#[derive(Debug, Default, Deserialize)]
struct TicketsResponse {
    #[serde(default)]
    data: Option<TicketsData>,
}

#[derive(Debug, Default, Deserialize)]
struct TicketsData {
    #[serde(default)]
    found: i64,
}

pub struct KzJusClient {
    http: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl KzJusClient {
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

    /// `<base>/api/tickets?registrationNumber=..&ticketDate=YYYY-MM-DD&ticketNumber=..`
    pub fn api_url(&self, data: &KzData) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("registrationNumber", &data.kkm_fns_id)
            .append_pair("ticketDate", &data.created_at.format("%Y-%m-%d").to_string())
            .append_pair("ticketNumber", &data.fiscal_id)
            .finish();
        format!("{}/api/tickets?{}", self.base_url, query)
    }
}

#[async_trait]
impl FetchClient for KzJusClient {
    fn domain(&self) -> DomainCode {
        DomainCode::KzJus
    }

    async fn fetch_receipt(
        &self,
        reference: &ReceiptRef,
        _sink: &dyn CorrectnessSink,
    ) -> Result<Vec<u8>, FetchError> {
        let ReceiptRef::KzJus(r) = reference else {
            return Err(wrong_domain(self.domain(), reference));
        };

        self.limiter.until_ready().await;

        let url = self.api_url(r.data());
        let response = self.http.get(&url).send().await?;
        let (status, body) = read_response(self.domain(), response).await?;

        if status != StatusCode::OK {
            return Err(unexpected_status(status, &body));
        }

        let parsed: TicketsResponse =
            serde_json::from_slice(&body).map_err(|_| FetchError::Malformed(excerpt(&body)))?;
        let found = parsed.data.map(|d| d.found).unwrap_or(0);
        if found != 1 {
            return Err(FetchError::NotFound(format!("data.found={}", found)));
        }

        Ok(body)
    }
}
