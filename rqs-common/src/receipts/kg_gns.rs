use chrono::NaiveDateTime;
use url::Url;

use super::{created_at_item, money::Sum, ParseError, QueryFields};

/// Kyrgyz fiscal reference, a URL on a `*.kg` host:
/// `https://tax.salyk.kg/tax-web-control/client/api/v1/ticket?date=..&type=..&operation_type=..&fn_number=..&fd_number=..&fm=..&tin=..&regNumber=..&sum=..`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KgGnsRef {
    text: String,
    data: KgGnsData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KgGnsData {
    pub created_at: NaiveDateTime,
    pub kind: i64,
    pub operation_type: i64,
    pub fiscal_module_serial_number: i64,
    pub fiscal_document_number: i64,
    pub fiscal_document_sign: i64,
    pub taxpayer_id_number: i64,
    pub kkt_reg_number: i64,
    /// Converted from the integer tyiyn amount of the `sum` parameter
    pub sum: Sum,
}

impl KgGnsRef {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let url = Url::parse(text).map_err(|_| ParseError::UnrecognizedFormat)?;
        let is_kg_host = url
            .host_str()
            .map(|h| h.ends_with(".kg"))
            .unwrap_or(false);
        if !matches!(url.scheme(), "http" | "https") || !is_kg_host {
            return Err(ParseError::UnrecognizedFormat);
        }

        let q = QueryFields::parse(url.query().unwrap_or(""));
        let data = KgGnsData {
            created_at: q.time("date")?,
            kind: q.int("type")?,
            operation_type: q.int("operation_type")?,
            fiscal_module_serial_number: q.int("fn_number")?,
            fiscal_document_number: q.int("fd_number")?,
            fiscal_document_sign: q.int("fm")?,
            taxpayer_id_number: q.int("tin")?,
            kkt_reg_number: q.int("regNumber")?,
            sum: q.minor_units_sum("sum")?,
        };
        Ok(Self {
            text: text.to_string(),
            data,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn data(&self) -> &KgGnsData {
        &self.data
    }

    pub fn search_key_items(&self) -> Vec<String> {
        let d = &self.data;
        vec![
            created_at_item(&d.created_at),
            format!("_type:{}", d.kind),
            format!("_operation_type:{}", d.operation_type),
            format!("_fiscal_module_serial_number:{}", d.fiscal_module_serial_number),
            format!("_fiscal_document_number:{}", d.fiscal_document_number),
            format!("_fiscal_document_sign:{}", d.fiscal_document_sign),
            format!("_taxpayer_id_number:{}", d.taxpayer_id_number),
            format!("_kkt_reg_number:{}", d.kkt_reg_number),
            format!("_sum:{}", d.sum),
        ]
    }
}
