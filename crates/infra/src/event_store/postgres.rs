//! Ledger store on Postgres (`postgres` feature).
//!
//! One table, `ledger_events`. The unique key on
//! `(tenant_id, aggregate_id, sequence_number)` is the last line of defence for
//! optimistic concurrency: a writer that loses the race gets SQLSTATE `23505`,
//! which maps to `Concurrency` and is retried by the dispatcher. `23514`
//! (check violation) maps to `InvalidAppend`; everything else is `Backend`.

use std::future::Future;
use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use osas_core::{AggregateId, ExpectedVersion, TenantId};
use osas_events::StreamKey;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch};

/// DDL applied by [`PostgresEventStore::ensure_schema`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_events (
    global_position BIGSERIAL PRIMARY KEY,
    event_id UUID NOT NULL UNIQUE,
    tenant_id UUID NOT NULL,
    aggregate_id UUID NOT NULL,
    aggregate_type TEXT NOT NULL,
    sequence_number BIGINT NOT NULL CHECK (sequence_number > 0),
    event_type TEXT NOT NULL,
    event_version INTEGER NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL,
    payload JSONB NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (tenant_id, aggregate_id, sequence_number)
);
CREATE INDEX IF NOT EXISTS ledger_events_tenant_idx ON ledger_events (tenant_id, global_position);
"#;

const COLUMNS: &str = "event_id, tenant_id, aggregate_id, aggregate_type, sequence_number, \
                       event_type, event_version, occurred_at, payload";

#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| sql_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, aggregate_id = %aggregate_id), err)]
    pub async fn load_stream_async(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM ledger_events \
             WHERE tenant_id = $1 AND aggregate_id = $2 ORDER BY sequence_number"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(aggregate_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| sql_error("load_stream", e))?;
        rows.iter().map(decode_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_all_async(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM ledger_events ORDER BY global_position");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| sql_error("load_all", e))?;
        rows.iter().map(decode_row).collect()
    }

    /// Head check and inserts share one transaction.
    #[instrument(skip(self, events), fields(count = events.len(), expected = ?expected_version), err)]
    pub async fn append_events(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(target) = validate_batch(&events)? else {
            return Ok(vec![]);
        };

        let mut tx = self.pool.begin().await.map_err(|e| sql_error("begin", e))?;

        let (current, existing_type) = stream_head(&mut tx, target.stream).await?;
        target.check_head(existing_type.as_deref(), expected_version, current)?;

        let mut committed = Vec::with_capacity(events.len());
        for (event, seq) in events.into_iter().zip(current + 1..) {
            insert_event(&mut tx, &event, seq).await?;
            committed.push(event.commit(seq));
        }

        tx.commit().await.map_err(|e| sql_error("commit", e))?;
        Ok(committed)
    }
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &UncommittedEvent,
    sequence_number: u64,
) -> Result<(), EventStoreError> {
    let sql = format!(
        "INSERT INTO ledger_events ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    );
    sqlx::query(&sql)
        .bind(event.event_id)
        .bind(event.tenant_id.as_uuid())
        .bind(event.aggregate_id.as_uuid())
        .bind(&event.aggregate_type)
        .bind(to_i64(sequence_number)?)
        .bind(&event.event_type)
        .bind(i32::try_from(event.event_version).unwrap_or(i32::MAX))
        .bind(event.occurred_at)
        .bind(&event.payload)
        .execute(&mut **tx)
        .await
        .map_err(|e| sql_error("insert", e))?;
    Ok(())
}

/// `(current version, aggregate type)`; `(0, None)` for a new stream.
async fn stream_head(
    tx: &mut Transaction<'_, Postgres>,
    stream: StreamKey,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        "SELECT COALESCE(MAX(sequence_number), 0) AS head, MAX(aggregate_type) AS aggregate_type \
         FROM ledger_events WHERE tenant_id = $1 AND aggregate_id = $2",
    )
    .bind(stream.tenant_id.as_uuid())
    .bind(stream.aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| sql_error("stream_head", e))?;

    let head: i64 = row.try_get("head").map_err(|e| sql_error("stream_head", e))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| sql_error("stream_head", e))?;
    Ok((u64::try_from(head).unwrap_or(0), aggregate_type))
}

fn decode_row(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
    let decode = |e| sql_error("decode", e);
    let sequence_number: i64 = row.try_get("sequence_number").map_err(decode)?;
    let event_version: i32 = row.try_get("event_version").map_err(decode)?;
    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(decode)?,
        tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id").map_err(decode)?),
        aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id").map_err(decode)?),
        aggregate_type: row.try_get("aggregate_type").map_err(decode)?,
        sequence_number: u64::try_from(sequence_number)
            .map_err(|_| EventStoreError::Backend(format!("negative sequence number {sequence_number}")))?,
        event_type: row.try_get("event_type").map_err(decode)?,
        event_version: u32::try_from(event_version).unwrap_or(0),
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
        payload: row.try_get("payload").map_err(decode)?,
    })
}

fn to_i64(sequence_number: u64) -> Result<i64, EventStoreError> {
    i64::try_from(sequence_number)
        .map_err(|_| EventStoreError::InvalidAppend(format!("sequence number {sequence_number} out of range")))
}

fn sql_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db) => {
            let msg = format!("{operation}: {}", db.message());
            match db.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        other => EventStoreError::Backend(format!("{operation}: {other}")),
    }
}

/// Bridges the synchronous `EventStore` API onto the ambient multi-threaded
/// tokio runtime.
fn block_on<F, T>(fut: F) -> Result<T, EventStoreError>
where
    F: Future<Output = Result<T, EventStoreError>>,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| EventStoreError::Backend("postgres ledger used outside a tokio runtime".to_string()))?;
    tokio::task::block_in_place(|| handle.block_on(fut))
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.append_events(events, expected_version))
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.load_stream_async(tenant_id, aggregate_id))
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        block_on(self.load_all_async())
    }
}
