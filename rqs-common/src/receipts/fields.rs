//! Typed access to reference query parameters

use chrono::NaiveDateTime;
use std::fmt;
use thiserror::Error;

use super::money::Sum;

/// Timestamp formats accepted in references, most precise first
const TIME_FORMATS: [&str; 2] = ["%Y%m%dT%H%M%S", "%Y%m%dT%H%M"];

/// Whether a reference field was absent or present with an unusable value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    Missing,
    Malformed,
}

/// A mandatory reference field is missing or does not parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct RefFieldError {
    /// Query parameter name as it appears in the reference (`fn`, `s`, `regNumber`...)
    pub name: String,
    /// Raw value, empty when the field is missing
    pub value: String,
    pub kind: FieldErrorKind,
}

impl RefFieldError {
    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: String::new(),
            kind: FieldErrorKind::Missing,
        }
    }

    pub fn malformed(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            kind: FieldErrorKind::Malformed,
        }
    }
}

impl fmt::Display for RefFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self.kind {
            FieldErrorKind::Missing => "missing",
            FieldErrorKind::Malformed => "wrong",
        };
        write!(f, "{} {}", word, self.name)?;
        if !self.value.is_empty() {
            write!(f, "={}", self.value)?;
        }
        Ok(())
    }
}

/// Decoded `application/x-www-form-urlencoded` query of a reference
#[derive(Debug, Clone, Default)]
pub struct QueryFields {
    pairs: Vec<(String, String)>,
}

impl QueryFields {
    pub fn parse(query: &str) -> Self {
        let pairs = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    /// First value of `name`
    pub fn string(&self, name: &str) -> Result<String, RefFieldError> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| RefFieldError::missing(name))
    }

    pub fn int(&self, name: &str) -> Result<i64, RefFieldError> {
        let raw = self.string(name)?;
        raw.parse::<i64>()
            .map_err(|_| RefFieldError::malformed(name, &raw))
    }

    /// Decimal amount such as `1600.12`
    pub fn decimal_sum(&self, name: &str) -> Result<Sum, RefFieldError> {
        let raw = self.string(name)?;
        Sum::parse_decimal(&raw).ok_or_else(|| RefFieldError::malformed(name, &raw))
    }

    /// Integer amount of minor currency units (`12300` is 123.00)
    pub fn minor_units_sum(&self, name: &str) -> Result<Sum, RefFieldError> {
        let raw = self.string(name)?;
        match raw.parse::<i64>() {
            Ok(units) if units >= 0 => Ok(Sum::from_minor_units(units)),
            _ => Err(RefFieldError::malformed(name, &raw)),
        }
    }

    pub fn time(&self, name: &str) -> Result<NaiveDateTime, RefFieldError> {
        let raw = self.string(name)?;
        parse_ref_time(&raw).ok_or_else(|| {
            tracing::debug!(name, value = %raw, "wrong time value");
            RefFieldError::malformed(name, &raw)
        })
    }
}

/// Parses `20240101T120000`, falling back to minute precision `20240101T1200`
pub fn parse_ref_time(raw: &str) -> Option<NaiveDateTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}
