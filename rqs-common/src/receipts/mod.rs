//! Receipt reference model
//!
//! A reference is the decoded text of a fiscal QR code. Each jurisdiction
//! encodes it differently; [`ReceiptRef`] is the closed set of supported
//! formats, tagged by [`DomainCode`]. Parsing never performs I/O.

mod fields;
mod kg_gns;
mod kz;
mod money;
mod ru_fns;
pub mod search_key;

pub use fields::{parse_ref_time, FieldErrorKind, QueryFields, RefFieldError};
pub use kg_gns::{KgGnsData, KgGnsRef};
pub use kz::{KzData, KzRef};
pub use money::Sum;
pub use ru_fns::{RuFnsData, RuFnsRef};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Jurisdiction code: one tax authority / fiscal data operator pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainCode {
    /// Russia, ФНС mobile API
    RuFns,
    /// Kyrgyzstan, ГНС
    KgGns,
    /// Kazakhstan, ОФД Казахтелеком
    KzKtc,
    /// Kazakhstan, ОФД Jusan
    KzJus,
    /// Kazakhstan, ОФД Транстелеком
    KzTtc,
}

impl DomainCode {
    pub const ALL: [DomainCode; 5] = [
        DomainCode::RuFns,
        DomainCode::KgGns,
        DomainCode::KzKtc,
        DomainCode::KzJus,
        DomainCode::KzTtc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DomainCode::RuFns => "ru-fns",
            DomainCode::KgGns => "kg-gns",
            DomainCode::KzKtc => "kz-ktc",
            DomainCode::KzJus => "kz-jus",
            DomainCode::KzTtc => "kz-ttc",
        }
    }
}

impl fmt::Display for DomainCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainCode::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("unknown domain code '{}'", s))
    }
}

/// Why a reference text was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The text has the right shape but a mandatory field is missing or malformed
    #[error(transparent)]
    Field(#[from] RefFieldError),

    /// The text is not a reference of the requested jurisdiction at all
    #[error("unrecognized receipt reference format")]
    UnrecognizedFormat,
}

/// Parsed receipt reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptRef {
    RuFns(RuFnsRef),
    KgGns(KgGnsRef),
    KzKtc(KzRef),
    KzJus(KzRef),
    KzTtc(KzRef),
}

impl ReceiptRef {
    /// Parses `text` as a reference of the given jurisdiction
    pub fn parse(domain: DomainCode, text: &str) -> Result<ReceiptRef, ParseError> {
        Ok(match domain {
            DomainCode::RuFns => ReceiptRef::RuFns(RuFnsRef::parse(text)?),
            DomainCode::KgGns => ReceiptRef::KgGns(KgGnsRef::parse(text)?),
            DomainCode::KzKtc => ReceiptRef::KzKtc(KzRef::parse(domain, text)?),
            DomainCode::KzJus => ReceiptRef::KzJus(KzRef::parse(domain, text)?),
            DomainCode::KzTtc => ReceiptRef::KzTtc(KzRef::parse(domain, text)?),
        })
    }

    /// Tries each domain in order; the first successful parse wins.
    ///
    /// On failure, a field error from a domain that recognised the text shape
    /// is reported in preference to [`ParseError::UnrecognizedFormat`].
    pub fn detect(domains: &[DomainCode], text: &str) -> Result<ReceiptRef, ParseError> {
        let mut first_field_err = None;
        for &domain in domains {
            match ReceiptRef::parse(domain, text) {
                Ok(r) => return Ok(r),
                Err(ParseError::Field(e)) => {
                    tracing::debug!(domain = %domain, error = %e, "reference rejected");
                    first_field_err.get_or_insert(e);
                }
                Err(ParseError::UnrecognizedFormat) => {}
            }
        }
        Err(first_field_err
            .map(ParseError::Field)
            .unwrap_or(ParseError::UnrecognizedFormat))
    }

    pub fn domain(&self) -> DomainCode {
        match self {
            ReceiptRef::RuFns(_) => DomainCode::RuFns,
            ReceiptRef::KgGns(_) => DomainCode::KgGns,
            ReceiptRef::KzKtc(_) => DomainCode::KzKtc,
            ReceiptRef::KzJus(_) => DomainCode::KzJus,
            ReceiptRef::KzTtc(_) => DomainCode::KzTtc,
        }
    }

    /// Verbatim reference text
    pub fn ref_text(&self) -> &str {
        match self {
            ReceiptRef::RuFns(r) => r.text(),
            ReceiptRef::KgGns(r) => r.text(),
            ReceiptRef::KzKtc(r) | ReceiptRef::KzJus(r) | ReceiptRef::KzTtc(r) => r.text(),
        }
    }

    /// Order-independent de-duplication key, `<code>:<sorted query>`
    pub fn unique_key(&self) -> String {
        let query = match self {
            ReceiptRef::RuFns(r) => r.text(),
            _ => query_part(self.ref_text()),
        };
        format!("{}:{}", self.domain(), canonical_query(query))
    }

    /// Receipt creation time claimed by the reference (register-local, no zone)
    pub fn created_at(&self) -> NaiveDateTime {
        match self {
            ReceiptRef::RuFns(r) => r.data().created_at,
            ReceiptRef::KgGns(r) => r.data().created_at,
            ReceiptRef::KzKtc(r) | ReceiptRef::KzJus(r) | ReceiptRef::KzTtc(r) => {
                r.data().created_at
            }
        }
    }

    pub fn sum(&self) -> Sum {
        match self {
            ReceiptRef::RuFns(r) => r.data().sum,
            ReceiptRef::KgGns(r) => r.data().sum,
            ReceiptRef::KzKtc(r) | ReceiptRef::KzJus(r) | ReceiptRef::KzTtc(r) => r.data().sum,
        }
    }

    /// `_field:value` tokens describing the reference itself
    pub fn search_key_items(&self) -> Vec<String> {
        match self {
            ReceiptRef::RuFns(r) => r.search_key_items(),
            ReceiptRef::KgGns(r) => r.search_key_items(),
            ReceiptRef::KzKtc(r) | ReceiptRef::KzJus(r) | ReceiptRef::KzTtc(r) => {
                r.search_key_items()
            }
        }
    }
}

impl fmt::Display for ReceiptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref{{{}:{}}}", self.domain(), self.ref_text())
    }
}

/// Part of a URL-shaped reference after the last `?`
fn query_part(text: &str) -> &str {
    match text.rfind('?') {
        Some(i) => &text[i + 1..],
        None => text,
    }
}

fn canonical_query(query: &str) -> String {
    let mut items: Vec<&str> = query.split('&').collect();
    items.sort_unstable();
    items.join("&")
}

pub(crate) fn created_at_item(created_at: &NaiveDateTime) -> String {
    format!("_created_at:{}", created_at.format("%Y-%m-%d %H:%M"))
}
