use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Prometheus metrics for indexer health and observability.
///
/// All metrics use the "indexer" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total events received from the event source.
    pub events_received: Counter,
    /// Total snapshots appended to the store.
    pub records_persisted: Counter,
    /// Total failed appends.
    pub persist_errors: Counter,
    /// Total callback timers started.
    pub callbacks_scheduled: Counter,
    /// Total callback timers that fired.
    pub callbacks_fired: Counter,
    /// Total callback timers that were cancelled.
    pub callbacks_cancelled: Counter,
    /// Total cancellation requests issued for superseded timers.
    pub supersessions: Counter,
    /// Callback timers not yet resolved.
    pub callbacks_in_flight: Gauge,
    /// Distinct entities tracked by the scheduler.
    pub tracked_entities: Gauge,
    /// Time to persist and schedule a single event.
    pub event_processing_duration: Histogram,
    /// ClickHouse connection state (1=connected, 0=disconnected).
    pub clickhouse_connected: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let events_received = Counter::with_opts(
            Opts::new(
                "events_received_total",
                "Total events received from the event source.",
            )
            .namespace("indexer"),
        )?;
        let records_persisted = Counter::with_opts(
            Opts::new(
                "records_persisted_total",
                "Total entity snapshots appended to the store.",
            )
            .namespace("indexer"),
        )?;
        let persist_errors = Counter::with_opts(
            Opts::new("persist_errors_total", "Total failed snapshot appends.")
                .namespace("indexer"),
        )?;
        let callbacks_scheduled = Counter::with_opts(
            Opts::new(
                "callbacks_scheduled_total",
                "Total callback timers started.",
            )
            .namespace("indexer"),
        )?;
        let callbacks_fired = Counter::with_opts(
            Opts::new("callbacks_fired_total", "Total callback timers that fired.")
                .namespace("indexer"),
        )?;
        let callbacks_cancelled = Counter::with_opts(
            Opts::new(
                "callbacks_cancelled_total",
                "Total callback timers cancelled before their delay elapsed.",
            )
            .namespace("indexer"),
        )?;
        let supersessions = Counter::with_opts(
            Opts::new(
                "supersessions_total",
                "Total cancellation requests issued for superseded callbacks.",
            )
            .namespace("indexer"),
        )?;
        let callbacks_in_flight = Gauge::with_opts(
            Opts::new(
                "callbacks_in_flight",
                "Callback timers not yet fired or cancelled.",
            )
            .namespace("indexer"),
        )?;
        let tracked_entities = Gauge::with_opts(
            Opts::new(
                "tracked_entities",
                "Distinct entities tracked by the scheduler.",
            )
            .namespace("indexer"),
        )?;
        let event_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "event_processing_duration_seconds",
                "Time to persist and schedule a single event.",
            )
            .namespace("indexer")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        let clickhouse_connected = Gauge::with_opts(
            Opts::new(
                "clickhouse_connected",
                "Whether ClickHouse connection is established (1=yes, 0=no).",
            )
            .namespace("indexer"),
        )?;

        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(records_persisted.clone()))?;
        registry.register(Box::new(persist_errors.clone()))?;
        registry.register(Box::new(callbacks_scheduled.clone()))?;
        registry.register(Box::new(callbacks_fired.clone()))?;
        registry.register(Box::new(callbacks_cancelled.clone()))?;
        registry.register(Box::new(supersessions.clone()))?;
        registry.register(Box::new(callbacks_in_flight.clone()))?;
        registry.register(Box::new(tracked_entities.clone()))?;
        registry.register(Box::new(event_processing_duration.clone()))?;
        registry.register(Box::new(clickhouse_connected.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            events_received,
            records_persisted,
            persist_errors,
            callbacks_scheduled,
            callbacks_fired,
            callbacks_cancelled,
            supersessions,
            callbacks_in_flight,
            tracked_entities,
            event_processing_duration,
            clickhouse_connected,
        })
    }

    /// Render all registered metrics in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode_registry(&self.registry)
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let registry = self.registry.clone();
        let app_state = Arc::new(AppState { registry });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("encoding metrics")?;

    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
