//! Receipt store
//!
//! Durable state of every accepted reference: retrieval progress, retry
//! budget and the fetched payload. The scheduler reads due work from here and
//! writes every outcome back; this table is the only scheduling state.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::db::models::{PendingReceipt, ReceiptRecord, SortMode};
use crate::receipts::search_key::build_search_key;
use crate::receipts::{DomainCode, ReceiptRef};
use crate::{Error, Result};

/// Fixed listing page size
pub const PAGE_SIZE: i64 = 25;

/// Retry budget of a freshly inserted receipt
pub const INITIAL_RETRIES: i64 = 10;

/// Cooldown applied while the remaining budget is even
pub const SHORT_COOLDOWN_SECS: i64 = 30;

/// Cooldown applied while the remaining budget is odd, or when the budget is kept
pub const LONG_COOLDOWN_SECS: i64 = 20 * 3600;

const RECORD_COLUMNS: &str = "id, domain, saved_at, updated_at, created_at, unique_key, ref_text, \
     COALESCE(is_correct, 0) AS is_correct, data, search_key, retries_left, next_retry_at";

/// Returned by [`ReceiptStore::next_due_time`] when nothing is pending
pub fn no_pending_sentinel() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2200, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn in_placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// SQLite-backed receipt store
#[derive(Clone)]
pub struct ReceiptStore {
    pool: SqlitePool,
}

impl ReceiptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store a new reference, due immediately with a full retry budget.
    ///
    /// Fails with [`Error::Duplicate`] if its unique key is already stored.
    pub async fn insert(&self, reference: &ReceiptRef) -> Result<i64> {
        self.insert_at(reference, Utc::now()).await
    }

    pub async fn insert_at(&self, reference: &ReceiptRef, now: DateTime<Utc>) -> Result<i64> {
        let unique_key = reference.unique_key();
        let search_key =
            build_search_key(reference, None).map_err(|e| Error::Internal(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO receipts (domain, unique_key, ref_text, created_at, search_key,
                                  saved_at, updated_at, retries_left, next_retry_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reference.domain().as_str())
        .bind(&unique_key)
        .bind(reference.ref_text())
        .bind(reference.created_at().and_utc().timestamp())
        .bind(&search_key)
        .bind(now.timestamp())
        .bind(now.timestamp())
        .bind(INITIAL_RETRIES)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                let id = done.last_insert_rowid();
                debug!(id, unique_key = %unique_key, "receipt stored");
                Ok(id)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::Duplicate(unique_key))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Records of the given domains that still need work and are due now
    pub async fn load_due(&self, domains: &[DomainCode], limit: i64) -> Result<Vec<PendingReceipt>> {
        self.load_due_at(domains, limit, Utc::now()).await
    }

    /// Most overdue first: no payload or no correctness flag yet,
    /// `next_retry_at <= now` and budget left.
    pub async fn load_due_at(
        &self,
        domains: &[DomainCode],
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingReceipt>> {
        if domains.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT id, domain, ref_text, COALESCE(is_correct, 0) AS is_correct
            FROM receipts
            WHERE (is_correct IS NULL OR data IS NULL)
              AND next_retry_at <= ?
              AND retries_left > 0
              AND domain IN ({})
            ORDER BY next_retry_at, id
            LIMIT ?
            "#,
            in_placeholders(domains.len())
        );

        let mut query = sqlx::query(&sql).bind(now.timestamp());
        for domain in domains {
            query = query.bind(domain.as_str());
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> Result<PendingReceipt> {
                let id: i64 = row.try_get("id")?;
                let domain_str: String = row.try_get("domain")?;
                let ref_text: String = row.try_get("ref_text")?;
                let is_correct: i64 = row.try_get("is_correct")?;

                let domain: DomainCode = domain_str
                    .parse()
                    .map_err(|e: String| Error::Internal(format!("receipt {}: {}", id, e)))?;
                let reference = ReceiptRef::parse(domain, &ref_text).map_err(|e| {
                    Error::Internal(format!("receipt {}: stored reference does not parse: {}", id, e))
                })?;

                Ok(PendingReceipt {
                    id,
                    reference,
                    is_correct: is_correct != 0,
                })
            })
            .collect()
    }

    /// Set the correctness flag: the issuing authority knows this receipt
    pub async fn mark_correct(&self, unique_key: &str) -> Result<()> {
        sqlx::query("UPDATE receipts SET is_correct = 1, updated_at = ? WHERE unique_key = ?")
            .bind(Utc::now().timestamp())
            .bind(unique_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store the fetched payload and its search key; implies correctness
    pub async fn mark_fetched(&self, unique_key: &str, payload: &[u8], search_key: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE receipts
            SET is_correct = 1, data = ?, search_key = ?, updated_at = ?
            WHERE unique_key = ?
            "#,
        )
        .bind(payload)
        .bind(search_key)
        .bind(Utc::now().timestamp())
        .bind(unique_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reschedule after a failed attempt
    pub async fn mark_failed(&self, unique_key: &str, decrease_retries: bool) -> Result<()> {
        self.mark_failed_at(unique_key, decrease_retries, Utc::now()).await
    }

    /// Backoff keyed on the budget `r` before this call:
    /// even `r` waits [`SHORT_COOLDOWN_SECS`], odd `r` waits [`LONG_COOLDOWN_SECS`].
    /// Without `decrease_retries` the budget is kept and the long cooldown is always
    /// added. The budget never drops below zero.
    pub async fn mark_failed_at(
        &self,
        unique_key: &str,
        decrease_retries: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE receipts
            SET next_retry_at = ? + (1 - retries_left % 2) * ? + ((retries_left % 2) | (NOT ?)) * ?,
                retries_left = CASE WHEN ? THEN MAX(0, retries_left - 1) ELSE retries_left END,
                updated_at = ?
            WHERE unique_key = ?
            "#,
        )
        .bind(now.timestamp())
        .bind(SHORT_COOLDOWN_SECS)
        .bind(decrease_retries)
        .bind(LONG_COOLDOWN_SECS)
        .bind(decrease_retries)
        .bind(now.timestamp())
        .bind(unique_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Earliest `next_retry_at` among records of `domains` that still need work
    pub async fn next_due_time(&self, domains: &[DomainCode]) -> Result<DateTime<Utc>> {
        if domains.is_empty() {
            return Ok(no_pending_sentinel());
        }

        let sql = format!(
            r#"
            SELECT MIN(next_retry_at)
            FROM receipts
            WHERE (is_correct IS NULL OR data IS NULL)
              AND retries_left > 0
              AND domain IN ({})
            "#,
            in_placeholders(domains.len())
        );
        let mut query = sqlx::query_scalar::<_, Option<i64>>(&sql);
        for domain in domains {
            query = query.bind(domain.as_str());
        }
        let next: Option<i64> = query.fetch_one(&self.pool).await?;

        Ok(next.map(from_unix).unwrap_or_else(no_pending_sentinel))
    }

    pub async fn load_by_id(&self, id: i64) -> Result<Option<ReceiptRecord>> {
        let sql = format!("SELECT {} FROM receipts WHERE id = ?", RECORD_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// One page of receipts, newest first, optionally filtered by a
    /// case-insensitive substring of the search key
    pub async fn search_and_list(&self, sort: SortMode, search: &str) -> Result<Vec<ReceiptRecord>> {
        let mut filters: Vec<&str> = Vec::new();
        let mut cursor: Option<i64> = None;
        let order = match sort {
            SortMode::ById { before_id } => {
                if let Some(before_id) = before_id.filter(|id| *id > 0) {
                    filters.push("id < ?");
                    cursor = Some(before_id);
                }
                "id DESC"
            }
            SortMode::ByCreatedAt { before } => {
                if let Some(before) = before {
                    filters.push("created_at < ?");
                    cursor = Some(before.timestamp());
                }
                "created_at DESC, id DESC"
            }
        };

        let search = search.trim().to_lowercase();
        if !search.is_empty() {
            filters.push(r"search_key LIKE ? ESCAPE '\'");
        }

        let mut sql = format!("SELECT {} FROM receipts", RECORD_COLUMNS);
        if !filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {} LIMIT {}", order, PAGE_SIZE));

        let mut query = sqlx::query(&sql);
        if let Some(cursor) = cursor {
            query = query.bind(cursor);
        }
        if !search.is_empty() {
            query = query.bind(format!("%{}%", escape_like(&search)));
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ReceiptRecord> {
    let is_correct: i64 = row.try_get("is_correct")?;
    Ok(ReceiptRecord {
        id: row.try_get("id")?,
        domain: row.try_get("domain")?,
        saved_at: from_unix(row.try_get("saved_at")?),
        updated_at: from_unix(row.try_get("updated_at")?),
        created_at: from_unix(row.try_get("created_at")?),
        unique_key: row.try_get("unique_key")?,
        ref_text: row.try_get("ref_text")?,
        is_correct: is_correct != 0,
        data: row.try_get("data")?,
        search_key: row.try_get("search_key")?,
        retries_left: row.try_get("retries_left")?,
        next_retry_at: from_unix(row.try_get("next_retry_at")?),
    })
}
