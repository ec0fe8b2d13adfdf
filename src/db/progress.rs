use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{ProgressCursor, Stream};

// The unique key treats a chain-wide cursor as scope = ''.
fn scope_key(scope: Option<&str>) -> &str {
    scope.unwrap_or("")
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    chain_id: i64,
    stream: String,
    scope: String,
    last_processed_block: i64,
    target_block: Option<i64>,
    status: String,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

pub async fn get_progress(
    pool: &PgPool,
    chain_id: i64,
    stream: Stream,
    scope: Option<&str>,
) -> eyre::Result<Option<ProgressCursor>> {
    let row: Option<CursorRow> = sqlx::query_as(
        "SELECT chain_id, stream, scope, last_processed_block, target_block, status, \
         error_message, started_at, updated_at \
         FROM indexer_progress WHERE chain_id = $1 AND stream = $2 AND scope = $3",
    )
    .bind(chain_id)
    .bind(stream.as_str())
    .bind(scope_key(scope))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| ProgressCursor {
        chain_id: row.chain_id,
        stream,
        scope: if row.scope.is_empty() {
            None
        } else {
            Some(row.scope)
        },
        last_processed_block: row.last_processed_block,
        target_block: row.target_block,
        status: row.status,
        error_message: row.error_message,
        started_at: row.started_at,
        updated_at: row.updated_at,
    }))
}

/// Cursor upsert. On first insert the target block mirrors the processed
/// block and `started_at` is stamped. `last_processed_block` never moves
/// backwards, so replays and races cannot regress a stream.
pub async fn update_progress(
    pool: &PgPool,
    chain_id: i64,
    stream: Stream,
    scope: Option<&str>,
    last_processed_block: i64,
    status: Option<&str>,
    error_message: Option<&str>,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO indexer_progress (chain_id, stream, scope, last_processed_block, \
         target_block, status, error_message, started_at, updated_at)
         VALUES ($1, $2, $3, $4, $4, COALESCE($5, 'running'), $6, NOW(), NOW())
         ON CONFLICT (chain_id, stream, scope) DO UPDATE SET
             last_processed_block = GREATEST(indexer_progress.last_processed_block, \
                                             EXCLUDED.last_processed_block),
             status = COALESCE($5, indexer_progress.status),
             error_message = $6,
             updated_at = NOW()",
    )
    .bind(chain_id)
    .bind(stream.as_str())
    .bind(scope_key(scope))
    .bind(last_processed_block)
    .bind(status)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_progress(
    pool: &PgPool,
    chain_id: i64,
    stream: Stream,
    scope: Option<&str>,
) -> eyre::Result<bool> {
    let result = sqlx::query(
        "DELETE FROM indexer_progress WHERE chain_id = $1 AND stream = $2 AND scope = $3",
    )
    .bind(chain_id)
    .bind(stream.as_str())
    .bind(scope_key(scope))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Operator-requested full reset of a chain's cursors (`--reset-progress`).
pub async fn reset_chain_progress(pool: &PgPool, chain_id: i64) -> eyre::Result<u64> {
    let result = sqlx::query("DELETE FROM indexer_progress WHERE chain_id = $1")
        .bind(chain_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
