//! Service wiring: ledger store, bus, engine, and the realtime feed.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use osas_core::TenantId;
use osas_events::{EventBus, EventEnvelope, InMemoryEventBus};
use osas_infra::config::EngineConfig;
use osas_infra::event_store::{EventStore, InMemoryEventStore};
use osas_infra::jobs::{FnJob, SchedulerHandle, spawn_periodic};
use osas_infra::Engine;

pub type LedgerBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type LedgerEngine = Engine<Arc<dyn EventStore>, LedgerBus>;

/// Ledger event pushed to SSE subscribers (notification consumers).
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub aggregate_type: String,
    pub sequence_number: u64,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

pub struct AppServices {
    engine: LedgerEngine,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl AppServices {
    /// Wrap an engine and start forwarding its committed events to SSE.
    pub fn new(engine: LedgerEngine) -> Self {
        let (realtime_tx, _) = broadcast::channel(1024);
        spawn_realtime_forwarder(engine.dispatcher().bus(), realtime_tx.clone());
        Self { engine, realtime_tx }
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }
}

/// Engine over the in-memory ledger store.
pub fn build_in_memory_services(config: EngineConfig) -> AppServices {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let bus: LedgerBus = Arc::new(InMemoryEventBus::new());
    AppServices::new(Engine::new(store, bus, config))
}

/// Postgres-backed ledger when `DATABASE_URL` is set (and the `postgres`
/// feature is on), in-memory otherwise. Read models are rebuilt from the
/// ledger before serving.
pub async fn build_services(config: EngineConfig) -> anyhow::Result<AppServices> {
    #[cfg(feature = "postgres")]
    if let Ok(url) = std::env::var("DATABASE_URL") {
        use anyhow::Context;
        use osas_infra::event_store::PostgresEventStore;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await
            .context("connecting to DATABASE_URL")?;
        let store = PostgresEventStore::new(pool);
        store.ensure_schema().await.context("creating ledger schema")?;

        let store: Arc<dyn EventStore> = Arc::new(store);
        let bus: LedgerBus = Arc::new(InMemoryEventBus::new());
        let services = AppServices::new(Engine::new(store, bus, config));
        let replayed = tokio::task::block_in_place(|| services.engine().rebuild_read_models())
            .context("rebuilding read models")?;
        info!(replayed, "read models rebuilt from postgres ledger");
        return Ok(services);
    }

    info!("using in-memory ledger store");
    Ok(build_in_memory_services(config))
}

/// Run the daily pass for every tenant on a background thread.
///
/// The job enters the caller's tokio runtime (if any) so a postgres-backed
/// store can drive its pool from the scheduler thread.
pub fn spawn_daily_pass(services: Arc<AppServices>, interval: Duration) -> io::Result<SchedulerHandle> {
    let runtime = tokio::runtime::Handle::try_current().ok();
    let job = FnJob::new("daily-pass", move || {
        let _guard = runtime.as_ref().map(|h| h.enter());
        let report = services.engine().run_daily_pass_all(Utc::now());
        if report.failures > 0 {
            return Err(format!("{} items failed", report.failures));
        }
        Ok(())
    });
    spawn_periodic(job, interval)
}

/// Bridge the synchronous bus into a lossy tokio broadcast.
fn spawn_realtime_forwarder(bus: &LedgerBus, tx: broadcast::Sender<RealtimeMessage>) {
    let subscription = bus.subscribe();
    let spawned = std::thread::Builder::new()
        .name("osas-realtime".to_string())
        .spawn(move || {
            // Ends when the bus (and with it every sender) is dropped.
            while let Ok(envelope) = subscription.recv() {
                // No receivers is fine.
                let _ = tx.send(RealtimeMessage {
                    tenant_id: envelope.tenant_id(),
                    topic: envelope.event_type().to_string(),
                    aggregate_type: envelope.aggregate_type().to_string(),
                    sequence_number: envelope.sequence_number(),
                    occurred_at: envelope.occurred_at(),
                    payload: envelope.payload().clone(),
                });
            }
            debug!("realtime forwarder stopped");
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "realtime forwarder not started; SSE will stay silent");
    }
}

/// Server-sent events for one tenant's ledger events.
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
