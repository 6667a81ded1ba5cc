//! Upstream fetch clients
//!
//! One client per jurisdiction, all behind [`FetchClient`]. Each client owns
//! its transport details (trust roots, headers, response validation) and
//! reduces every outcome to a payload or a classified [`FetchError`].

pub mod kg_gns;
pub mod kz_jus;
pub mod kz_ktc;
pub mod kz_ttc;
pub mod ru_fns;
pub mod ru_fns_session;

mod http;
#[cfg(test)]
mod test_support;

use async_trait::async_trait;
use rqs_common::receipts::{DomainCode, ReceiptRef};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use kg_gns::KgGnsClient;
pub use kz_jus::KzJusClient;
pub use kz_ktc::KzKtcClient;
pub use kz_ttc::KzTtcClient;
pub use ru_fns::RuFnsClient;

/// Classified failure of one fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure (connect, TLS, timeout, body read)
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Response body does not have the expected shape
    #[error("response data malformed: {0}")]
    Malformed(String),

    #[error("receipt not found: {0}")]
    NotFound(String),

    /// Upstream says the document is not a receipt it can serve
    #[error("wrong receipt: {0}")]
    WrongReceipt(String),

    /// Upstream failed to retrieve the receipt on its side
    #[error("receipt rejected: {0}")]
    Rejected(String),

    /// Upstream knows the receipt but its data is not final yet
    #[error("receipt not ready: {0}")]
    NotReady(String),

    /// HTTP 429
    #[error("too many requests")]
    RateLimited,

    /// No usable credentials for an authenticated upstream
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("client for {expected} got a {actual} reference")]
    WrongDomain {
        expected: DomainCode,
        actual: DomainCode,
    },

    /// Correctness sink failed to persist; the scheduler stops on it
    #[error(transparent)]
    Store(#[from] rqs_common::Error),
}

impl FetchError {
    /// Whether this failure consumes one unit of the record's retry budget
    pub fn decreases_retry_budget(&self) -> bool {
        match self {
            FetchError::Network(_)
            | FetchError::UnexpectedStatus { .. }
            | FetchError::Malformed(_)
            | FetchError::NotFound(_)
            | FetchError::WrongReceipt(_)
            | FetchError::Rejected(_)
            | FetchError::WrongDomain { .. } => true,
            FetchError::NotReady(_) | FetchError::RateLimited | FetchError::SessionUnavailable(_) => {
                false
            }
            // escalated by the scheduler instead
            FetchError::Store(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// Receives the "upstream knows this receipt" signal during a fetch
#[async_trait]
pub trait CorrectnessSink: Send + Sync {
    async fn mark_likely_correct(&self) -> rqs_common::Result<()>;
}

/// Retrieval capability of one jurisdiction
#[async_trait]
pub trait FetchClient: Send + Sync {
    fn domain(&self) -> DomainCode;

    /// Fetch the receipt payload for `reference`.
    ///
    /// May call `sink` before returning when upstream confirms the receipt
    /// exists but cannot serve it yet.
    async fn fetch_receipt(
        &self,
        reference: &ReceiptRef,
        sink: &dyn CorrectnessSink,
    ) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("more than one fetch client for domain {0}")]
    DuplicateClient(DomainCode),
}

/// Immutable domain → client map
#[derive(Clone)]
pub struct ClientRegistry {
    clients: BTreeMap<DomainCode, Arc<dyn FetchClient>>,
}

impl ClientRegistry {
    pub fn new(clients: Vec<Arc<dyn FetchClient>>) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for client in clients {
            let domain = client.domain();
            if map.insert(domain, client).is_some() {
                return Err(RegistryError::DuplicateClient(domain));
            }
        }
        Ok(Self { clients: map })
    }

    pub fn get(&self, domain: DomainCode) -> Option<&Arc<dyn FetchClient>> {
        self.clients.get(&domain)
    }

    /// Domains with a client, in registry order
    pub fn domains(&self) -> Vec<DomainCode> {
        self.clients.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn wrong_domain(client: DomainCode, reference: &ReceiptRef) -> FetchError {
    FetchError::WrongDomain {
        expected: client,
        actual: reference.domain(),
    }
}
