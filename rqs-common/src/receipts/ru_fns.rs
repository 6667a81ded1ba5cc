use chrono::NaiveDateTime;

use super::{created_at_item, money::Sum, ParseError, QueryFields};

/// Russian fiscal reference, a bare query such as
/// `t=20240101T1200&s=10.50&fn=123&i=45&fp=999&n=1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuFnsRef {
    text: String,
    data: RuFnsData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuFnsData {
    /// `fn`: fiscal drive serial number
    pub fiscal_drive_number: i64,
    /// `i`: fiscal document number, not zero-padded
    pub fiscal_document_number: i64,
    /// `fp`: fiscal document sign, not zero-padded
    pub fiscal_document_sign: i64,
    /// `n`: operation kind (1 income, 2 income refund, 3 expense, 4 expense refund)
    pub kind: i64,
    pub sum: Sum,
    pub created_at: NaiveDateTime,
}

impl RuFnsRef {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        // URL-shaped references belong to the other jurisdictions
        if text.contains("://") {
            return Err(ParseError::UnrecognizedFormat);
        }

        let q = QueryFields::parse(text);
        let data = RuFnsData {
            fiscal_drive_number: q.int("fn")?,
            fiscal_document_number: q.int("i")?,
            fiscal_document_sign: q.int("fp")?,
            kind: q.int("n")?,
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

    pub fn data(&self) -> &RuFnsData {
        &self.data
    }

    pub fn search_key_items(&self) -> Vec<String> {
        let d = &self.data;
        vec![
            created_at_item(&d.created_at),
            format!("_sum:{}", d.sum),
            format!("_fiscal_drive_number:{}", d.fiscal_drive_number),
            format!("_fiscal_document_number:{}", d.fiscal_document_number),
            format!("_fiscal_document_sign:{}", d.fiscal_document_sign),
            format!("_type:{}", d.kind),
        ]
    }
}
