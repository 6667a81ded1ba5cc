use chrono::NaiveDateTime;
use url::Url;

use super::{created_at_item, money::Sum, DomainCode, ParseError, QueryFields};

/// Kazakh fiscal reference shared by all operators,
/// `http://<operator host>[/path]?i=..&f=..&s=..&t=..`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KzRef {
    text: String,
    data: KzData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KzData {
    /// `i`: fiscal sign of the ticket, leading zeros are significant
    pub fiscal_id: String,
    /// `f`: KKM registration number, leading zeros are significant
    pub kkm_fns_id: String,
    pub sum: Sum,
    pub created_at: NaiveDateTime,
}

/// Host the operator prints into its QR codes
pub fn qr_host(domain: DomainCode) -> Option<&'static str> {
    match domain {
        DomainCode::KzKtc => Some("consumer.oofd.kz"),
        DomainCode::KzJus => Some("consumer.kofd.kz"),
        DomainCode::KzTtc => Some("ofd1.kz"),
        DomainCode::RuFns | DomainCode::KgGns => None,
    }
}

impl KzRef {
    pub fn parse(domain: DomainCode, text: &str) -> Result<Self, ParseError> {
        let expected_host = qr_host(domain).ok_or(ParseError::UnrecognizedFormat)?;
        let url = Url::parse(text).map_err(|_| ParseError::UnrecognizedFormat)?;
        if url.host_str() != Some(expected_host) {
            return Err(ParseError::UnrecognizedFormat);
        }

        let q = QueryFields::parse(url.query().unwrap_or(""));
        let data = KzData {
            fiscal_id: q.string("i")?,
            kkm_fns_id: q.string("f")?,
            sum: q.decimal_sum("s")?,
            created_at: q.time("t")?,
        };
        Ok(Self {
            text: text.to_string(),
            data,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn data(&self) -> &KzData {
        &self.data
    }

    pub fn search_key_items(&self) -> Vec<String> {
        let d = &self.data;
        vec![
            created_at_item(&d.created_at),
            format!("_fiscal_id:{}", d.fiscal_id),
            format!("_kkm_fns_id:{}", d.kkm_fns_id),
            format!("_sum:{}", d.sum),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipts::RefFieldError;

    #[test]
    fn test_keeps_leading_zeros() {
        let r = KzRef::parse(
            DomainCode::KzKtc,
            "http://consumer.oofd.kz?i=0123456789&f=010101012345&s=1600.00&t=20240309T123456",
        )
        .unwrap();

        assert_eq!(r.data().fiscal_id, "0123456789");
        assert_eq!(r.data().kkm_fns_id, "010101012345");
        assert_eq!(r.data().sum, Sum::from_minor_units(160000));
        assert_eq!(
            r.search_key_items(),
            vec![
                "_created_at:2024-03-09 12:34",
                "_fiscal_id:0123456789",
                "_kkm_fns_id:010101012345",
                "_sum:1600.00",
            ]
        );
    }

    #[test]
    fn test_host_selects_operator() {
        let ttc = "http://ofd1.kz/t/?i=123456789012&f=010101234567&s=1230.00&t=20240309T123456";
        assert!(KzRef::parse(DomainCode::KzTtc, ttc).is_ok());
        assert_eq!(
            KzRef::parse(DomainCode::KzKtc, ttc).unwrap_err(),
            ParseError::UnrecognizedFormat
        );
        assert_eq!(
            KzRef::parse(DomainCode::RuFns, ttc).unwrap_err(),
            ParseError::UnrecognizedFormat
        );
    }

    #[test]
    fn test_malformed_sum() {
        let err = KzRef::parse(
            DomainCode::KzJus,
            "http://consumer.kofd.kz?i=1&f=2&s=12,30&t=20251208T123456",
        )
        .unwrap_err();
        assert_eq!(err, ParseError::Field(RefFieldError::malformed("s", "12,30")));
    }
}
