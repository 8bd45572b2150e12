//! Repository for the `cards` table.

use cardgate_core::types::{DbId, Timestamp};
use sqlx::PgExecutor;

use crate::models::card::{CardRow, CardStatsRow, CardWrite};

// ---------------------------------------------------------------------------
// Column lists and fragments
// ---------------------------------------------------------------------------

const COLUMNS: &str = "\
    id, card_key, remark, granted_minutes, max_devices, \
    is_used, first_used_at, devices, created_at";

/// SQL expression for the instant an active card runs out.
const EXPIRES_AT: &str = "first_used_at + make_interval(mins => granted_minutes)";

/// Listing filter. `$1` status (nullable), `$2` now, `$3` ILIKE pattern (nullable).
fn filter_clause() -> String {
    format!(
        "($1::TEXT IS NULL \
          OR ($1 = 'unused' AND NOT is_used) \
          OR ($1 = 'active' AND is_used AND {EXPIRES_AT} > $2) \
          OR ($1 = 'expired' AND is_used AND {EXPIRES_AT} <= $2)) \
         AND ($3::TEXT IS NULL OR card_key ILIKE $3 OR remark ILIKE $3)"
    )
}

/// Escape LIKE metacharacters and wrap for a substring match.
pub fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Provides queries for cards.
pub struct CardRepo;

impl CardRepo {
    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<CardRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM cards WHERE id = $1");
        sqlx::query_as::<_, CardRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_key<'e, E: PgExecutor<'e>>(
        executor: E,
        card_key: &str,
    ) -> Result<Option<CardRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM cards WHERE card_key = $1");
        sqlx::query_as::<_, CardRow>(&query)
            .bind(card_key)
            .fetch_optional(executor)
            .await
    }

    /// Load a card and lock its row until the surrounding transaction ends.
    pub async fn find_by_key_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        card_key: &str,
    ) -> Result<Option<CardRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM cards WHERE card_key = $1 FOR UPDATE");
        sqlx::query_as::<_, CardRow>(&query)
            .bind(card_key)
            .fetch_optional(executor)
            .await
    }

    /// Every card, newest first.
    pub async fn list_all<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<CardRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM cards ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, CardRow>(&query).fetch_all(executor).await
    }

    /// One page of cards matching the filter, newest first.
    pub async fn list_page<'e, E: PgExecutor<'e>>(
        executor: E,
        status: Option<&str>,
        search: Option<&str>,
        now: Timestamp,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CardRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM cards WHERE {} \
             ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5",
            filter_clause()
        );
        sqlx::query_as::<_, CardRow>(&query)
            .bind(status)
            .bind(now)
            .bind(search.map(like_pattern))
            .bind(limit)
            .bind(offset)
            .fetch_all(executor)
            .await
    }

    pub async fn count_matching<'e, E: PgExecutor<'e>>(
        executor: E,
        status: Option<&str>,
        search: Option<&str>,
        now: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM cards WHERE {}", filter_clause());
        sqlx::query_scalar::<_, i64>(&query)
            .bind(status)
            .bind(now)
            .bind(search.map(like_pattern))
            .fetch_one(executor)
            .await
    }

    pub async fn stats<'e, E: PgExecutor<'e>>(
        executor: E,
        now: Timestamp,
    ) -> Result<CardStatsRow, sqlx::Error> {
        let query = format!(
            "SELECT \
                COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE NOT is_used) AS unused, \
                COUNT(*) FILTER (WHERE is_used AND {EXPIRES_AT} > $1) AS active, \
                COUNT(*) FILTER (WHERE is_used AND {EXPIRES_AT} <= $1) AS expired \
             FROM cards"
        );
        sqlx::query_as::<_, CardStatsRow>(&query)
            .bind(now)
            .fetch_one(executor)
            .await
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert a card. A duplicate key fails on `uq_cards_card_key`.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        card: &CardWrite,
    ) -> Result<CardRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO cards \
                (card_key, remark, granted_minutes, max_devices, is_used, \
                 first_used_at, devices, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        bind_write(sqlx::query_as::<_, CardRow>(&query), card)
            .fetch_one(executor)
            .await
    }

    /// Insert a card unless its key exists. Returns `None` when skipped.
    pub async fn create_if_absent<'e, E: PgExecutor<'e>>(
        executor: E,
        card: &CardWrite,
    ) -> Result<Option<CardRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO cards \
                (card_key, remark, granted_minutes, max_devices, is_used, \
                 first_used_at, devices, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (card_key) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        bind_write(sqlx::query_as::<_, CardRow>(&query), card)
            .fetch_optional(executor)
            .await
    }

    /// Overwrite the mutable columns of a card. The key must match.
    ///
    /// Returns `true` if a row was updated.
    pub async fn update<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        card: &CardWrite,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE cards SET \
                remark = $2, granted_minutes = $3, max_devices = $4, is_used = $5, \
                first_used_at = $6, devices = $7, updated_at = NOW() \
             WHERE id = $1 AND card_key = $8",
        )
        .bind(id)
        .bind(&card.remark)
        .bind(card.granted_minutes)
        .bind(card.max_devices)
        .bind(card.is_used)
        .bind(card.first_used_at)
        .bind(&card.devices)
        .bind(&card.card_key)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `true` if a row was removed.
    pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cards WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn bind_write<'q>(
    query: sqlx::query::QueryAs<'q, sqlx::Postgres, CardRow, sqlx::postgres::PgArguments>,
    card: &'q CardWrite,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, CardRow, sqlx::postgres::PgArguments> {
    query
        .bind(&card.card_key)
        .bind(&card.remark)
        .bind(card.granted_minutes)
        .bind(card.max_devices)
        .bind(card.is_used)
        .bind(card.first_used_at)
        .bind(&card.devices)
        .bind(card.created_at)
}
