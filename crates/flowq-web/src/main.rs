//! flowq-web - query server.
//!
//! Exposes the local block database to remote flowq clients: one endpoint
//! accepting the query arguments as JSON and answering with either a JSON
//! result or an SSE stream of `finalResult`/`queryError` events with
//! keep-alive pings.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use flowq_core::dist::{EVENT_FINAL_RESULT, EVENT_QUERY_ERROR};
use flowq_core::engine::LocalRunner;
use flowq_core::query::{Args as QueryArgs, QueryError};
use flowq_core::results::QueryResult;

/// flowq query server.
#[derive(Parser)]
#[command(name = "flowq-web", about = "flowq query server", version = flowq_core::VERSION)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:7777", env = "FLOWQ_LISTEN")]
    listen: String,

    /// Path to the block database.
    #[arg(long, default_value = "/var/lib/flowq/db", env = "FLOWQ_DB")]
    db_path: PathBuf,

    /// Default keep-alive interval for streamed responses, in seconds.
    #[arg(long, default_value = "30")]
    keepalive: u64,
}

struct AppState {
    runner: LocalRunner,
    default_keepalive: Duration,
}

type SharedState = Arc<AppState>;

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowq_web=info,flowq_core=info".parse().unwrap()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(version = flowq_core::VERSION, db = %args.db_path.display(), "starting query server");

    let state: SharedState = Arc::new(AppState {
        runner: LocalRunner::new(&args.db_path),
        default_keepalive: Duration::from_secs(args.keepalive.max(1)),
    });

    let app = Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/_query", post(handle_query))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new());

    let addr: SocketAddr = args.listen.parse().expect("invalid listen address");
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    axum::serve(listener, app).await.expect("server error");
}

async fn handle_health() -> &'static str {
    "ok"
}

static ACTIVE_QUERIES: AtomicUsize = AtomicUsize::new(0);

/// Sets the cancellation flag when the client goes away mid-stream.
struct QueryGuard {
    cancel: Arc<AtomicBool>,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        let active = ACTIVE_QUERIES.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(active_queries = active, "query finished or client disconnected");
    }
}

async fn handle_query(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(args): Json<QueryArgs>,
) -> Response {
    let stmt = match args.prepare() {
        Ok(stmt) => stmt,
        Err(e) => {
            warn!(details = e.details.len(), "rejected invalid query");
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(e)).into_response();
        }
    };

    let active = ACTIVE_QUERIES.fetch_add(1, Ordering::Relaxed) + 1;
    info!(active_queries = active, "query accepted");

    let cancel = Arc::new(AtomicBool::new(false));
    let guard = QueryGuard {
        cancel: cancel.clone(),
    };

    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    let state_clone = state.clone();
    let cancel_clone = cancel.clone();
    let run = tokio::task::spawn_blocking(move || {
        state_clone.runner.run(&stmt, &cancel_clone)
    });

    if wants_stream {
        let keepalive = if args.keepalive > 0 {
            Duration::from_secs(args.keepalive)
        } else {
            state.default_keepalive
        };

        let stream = async_stream::stream! {
            let _guard = guard;
            match run.await {
                Ok(result) => yield Ok::<Event, Infallible>(result_event(&result)),
                Err(e) => {
                    error!(error = %e, "query task panicked");
                    let err = QueryError::internal("query task failed");
                    yield Ok(error_event(&err));
                }
            }
        };

        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(keepalive).text("keepalive"))
            .into_response()
    } else {
        let result = match run.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "query task panicked");
                drop(guard);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        drop(guard);
        Json(result).into_response()
    }
}

/// Execution failures stream as `queryError`, everything else as
/// `finalResult`.
fn result_event(result: &QueryResult) -> Event {
    match &result.error {
        Some(err) => error_event(err),
        None => Event::default()
            .event(EVENT_FINAL_RESULT)
            .data(serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string())),
    }
}

fn error_event(err: &QueryError) -> Event {
    Event::default()
        .event(EVENT_QUERY_ERROR)
        .data(serde_json::to_string(err).unwrap_or_else(|_| "{}".to_string()))
}
