//! Display metadata of the supported jurisdictions

use rqs_common::receipts::DomainCode;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Fiscal data operator shown next to a receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: &'static str,
    /// One-or-two letter badge
    pub short_label: &'static str,
    /// CSS colour of the badge
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainMetadata {
    pub code: DomainCode,
    pub currency_symbol: &'static str,
    pub flag_symbol: &'static str,
    /// Set where one country has several operators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderInfo>,
}

pub fn metadata(code: DomainCode) -> DomainMetadata {
    let (currency_symbol, flag_symbol) = match code {
        DomainCode::RuFns => ("₽", "🇷🇺"),
        DomainCode::KgGns => ("с", "🇰🇬"),
        DomainCode::KzKtc | DomainCode::KzJus | DomainCode::KzTtc => ("₸", "🇰🇿"),
    };
    let provider = match code {
        DomainCode::KzTtc => Some(ProviderInfo {
            name: "ОФД Транстелеком",
            short_label: "Т",
            color: "#7caf6d",
        }),
        _ => None,
    };
    DomainMetadata {
        code,
        currency_symbol,
        flag_symbol,
        provider,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainRegistryError {
    #[error("domain {0} listed twice")]
    Duplicate(DomainCode),

    #[error("no domains enabled")]
    Empty,
}

/// Enabled jurisdictions, in detection order
///
/// The order decides which parser wins when a reference text fits more than
/// one jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRegistry {
    domains: Vec<DomainCode>,
}

impl DomainRegistry {
    pub fn new(domains: Vec<DomainCode>) -> Result<Self, DomainRegistryError> {
        if domains.is_empty() {
            return Err(DomainRegistryError::Empty);
        }
        let mut seen = BTreeSet::new();
        for &d in &domains {
            if !seen.insert(d) {
                return Err(DomainRegistryError::Duplicate(d));
            }
        }
        Ok(Self { domains })
    }

    pub fn all() -> Self {
        Self {
            domains: DomainCode::ALL.to_vec(),
        }
    }

    pub fn codes(&self) -> &[DomainCode] {
        &self.domains
    }

    pub fn contains(&self, code: DomainCode) -> bool {
        self.domains.contains(&code)
    }

    pub fn metadata(&self) -> Vec<DomainMetadata> {
        self.domains.iter().map(|&d| metadata(d)).collect()
    }
}
