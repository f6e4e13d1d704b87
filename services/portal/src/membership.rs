//! Membership number issuance
//!
//! Numbers are `MEM` + two-digit year + five-digit zero-padded
//! ordinal (`MEM2500001`). A per-year counter row in
//! `membership_sequence` is locked `FOR UPDATE` for the duration of
//! the issuing transaction, which serializes concurrent issuance
//! within a year: callers always observe distinct, contiguous
//! ordinals. An aborted transaction leaves the counter untouched.

use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgConnection};
use tracing::{info, warn};

use crate::error::PortalError;

/// Literal prefix of every membership number
pub const MEMBERSHIP_PREFIX: &str = "MEM";

/// Bounded retries for transient serialization/deadlock failures
const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Membership sequence generator
#[derive(Clone)]
pub struct MembershipSequence {
    pool: PgPool,
}

impl MembershipSequence {
    /// Create a new membership sequence generator
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issue the next membership number for the current year in its
    /// own transaction.
    ///
    /// Transient lock failures are retried a bounded number of times;
    /// any other failure aborts with no partial increment.
    pub async fn next_number(&self) -> Result<String, PortalError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut tx = self.pool.begin().await?;
            match Self::next_in(&mut tx).await {
                Ok(number) => match tx.commit().await {
                    Ok(()) => {
                        info!("Issued membership number {}", number);
                        return Ok(number);
                    }
                    Err(err) if is_transient(&err) && attempt < MAX_TRANSIENT_RETRIES => {
                        warn!(
                            "Transient failure committing membership sequence (attempt {}): {}",
                            attempt, err
                        );
                        continue;
                    }
                    Err(err) => return Err(PortalError::SequenceGeneration(err)),
                },
                Err(err) => {
                    let _ = tx.rollback().await;
                    if is_transient(&err) && attempt < MAX_TRANSIENT_RETRIES {
                        warn!(
                            "Transient failure in membership sequence (attempt {}): {}",
                            attempt, err
                        );
                        continue;
                    }
                    return Err(PortalError::SequenceGeneration(err));
                }
            }
        }
    }

    /// Issue the next membership number for the current year inside
    /// an existing transaction.
    ///
    /// The year row stays locked until the caller commits, so approval
    /// and number assignment become externally visible together.
    pub async fn next_in(conn: &mut PgConnection) -> Result<String, sqlx::Error> {
        let year = current_year_key();
        Self::next_in_year(conn, &year).await
    }

    async fn next_in_year(conn: &mut PgConnection, year: &str) -> Result<String, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT last_number FROM membership_sequence WHERE year = $1 FOR UPDATE
            "#,
        )
        .bind(year)
        .fetch_optional(&mut *conn)
        .await?;

        let next: i64 = match row {
            None => {
                // first number for this year
                sqlx::query(
                    r#"
                    INSERT INTO membership_sequence (year, last_number) VALUES ($1, $2)
                    "#,
                )
                .bind(year)
                .bind(1_i64)
                .execute(&mut *conn)
                .await?;
                1
            }
            Some(row) => {
                let next = row.get::<i64, _>("last_number") + 1;
                sqlx::query(
                    r#"
                    UPDATE membership_sequence SET last_number = $2 WHERE year = $1
                    "#,
                )
                .bind(year)
                .bind(next)
                .execute(&mut *conn)
                .await?;
                next
            }
        };

        Ok(format_membership_number(year, next))
    }
}

/// Two-digit year key for the current date
pub fn current_year_key() -> String {
    Utc::now().format("%y").to_string()
}

/// Format a membership number from a year key and ordinal,
/// zero-padding the ordinal to at least 5 digits
pub fn format_membership_number(year: &str, ordinal: i64) -> String {
    format!("{MEMBERSHIP_PREFIX}{year}{ordinal:05}")
}

/// Whether a database error is a transient serialization or deadlock
/// condition worth retrying (SQLSTATE 40001 / 40P01)
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

/// Retry classifier over the portal error type, for callers that wrap
/// sequence issuance in a larger transaction
pub fn is_transient_failure(err: &PortalError) -> bool {
    match err {
        PortalError::Database(db) | PortalError::SequenceGeneration(db) => is_transient(db),
        _ => false,
    }
}
