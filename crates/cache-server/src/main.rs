mod cache_layer;
mod config;
mod maintenance;
mod prefetch;
mod proxy;
mod stats;

use axum::routing::{any, get, post};
use axum::Router;
use cache_layer::CacheLayer;
use config::Config;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use maintenance::Maintenance;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use predictive_cache::{ContextBuilder, MemorySessionStore, SystemClock};
use proxy::{proxy_handler, AppState};
use stats::{clear_handler, metrics_reporter, stats_handler, MetricsState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Queued prefetch hints before new hints are dropped.
const PREFETCH_QUEUE: usize = 32;
const CONFIG_FILE: &str = "config.toml";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config_path = PathBuf::from(CONFIG_FILE);
    let config = load_config(&config_path);

    // Install Prometheus metrics recorder
    let prom_handle = match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
        Ok(h) => Some(h),
        Err(e) => {
            tracing::error!(error = %e, "failed to install prometheus recorder");
            None
        }
    };

    // Context for strategy predictors: one process-wide session
    let context = ContextBuilder::new(Arc::new(SystemClock), Arc::new(MemorySessionStore::new()))
        .with_identity(
            concat!("cache-server/", env!("CARGO_PKG_VERSION")),
            config.server.language.clone(),
        );

    let (prefetcher, prefetch_rx) = prefetch::channel(PREFETCH_QUEUE);

    let cache = CacheLayer::new(
        config.cache.store_config(),
        config.fallback.intelligent_config(),
        context,
        Arc::new(prefetcher),
        &config.cache.strategies,
        config.cache.max_body_size_bytes,
    );

    // Build HTTP client for upstream requests
    let client = Client::builder(TokioExecutor::new()).build_http();

    let state = Arc::new(AppState {
        cache,
        client,
        upstream_url: config.upstream.url.clone(),
        upstream_timeout: Duration::from_millis(config.upstream.timeout_ms),
    });

    // Shutdown token for graceful shutdown
    let shutdown = CancellationToken::new();

    tokio::spawn(prefetch::run_prefetch_worker(
        Arc::clone(&state),
        prefetch_rx,
        shutdown.clone(),
    ));

    let maintenance = Maintenance::spawn(
        Arc::clone(&state),
        Duration::from_secs(config.cache.cleanup_interval_secs),
        Duration::from_secs(config.cache.preload_interval_secs),
        &shutdown,
    );

    let start_time = std::time::Instant::now();
    tokio::spawn(metrics_reporter(
        Arc::clone(&state),
        start_time,
        Duration::from_secs(5),
        shutdown.clone(),
    ));

    let metrics_state = MetricsState {
        app: Arc::clone(&state),
        start_time,
    };

    // Build metrics/admin router (separate port)
    let metrics_router = Router::new()
        .route("/api/stats", get(stats_handler))
        .route("/api/cache/clear", post(clear_handler))
        .route(
            "/metrics",
            get(move || {
                let h = prom_handle.clone();
                async move { h.map(|h| h.render()).unwrap_or_default() }
            }),
        )
        .with_state(metrics_state);

    // Build caching router (main port)
    let proxy_router = Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let proxy_addr = config.server.listen_addr.clone();
    let metrics_addr = config.server.metrics_addr.clone();

    tracing::info!(
        proxy = %proxy_addr,
        metrics = %metrics_addr,
        upstream = %config.upstream.url,
        budget = config.cache.max_total_size_bytes,
        strategy_overrides = config.cache.strategies.len(),
        "cache server starting"
    );

    let proxy_listener = match tokio::net::TcpListener::bind(&proxy_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %proxy_addr, "failed to bind proxy");
            return;
        }
    };

    let metrics_listener = match tokio::net::TcpListener::bind(&metrics_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr = %metrics_addr, "failed to bind metrics");
            return;
        }
    };

    // Held until shutdown; dropping it stops hot reload
    let _watcher = watch_config(config_path, config, Arc::clone(&state));

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let proxy_future = axum::serve(proxy_listener, proxy_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let metrics_future = axum::serve(metrics_listener, metrics_router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = proxy_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "proxy server error");
            }
        }
        result = metrics_future => {
            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
            }
        }
    }

    shutdown.cancel();
    maintenance.shutdown().await;
    let m = state.cache.predictive_metrics();
    tracing::info!(
        hits = m.hits,
        misses = m.misses,
        evictions = m.evictions,
        "cache server shut down"
    );
}

/// Cancel `token` on Ctrl+C, or on SIGTERM where available.
async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("ctrl-c received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
    token.cancel();
}

fn load_config(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Config::default_config();
    }
    match Config::load(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "config loaded");
            config
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "bad config file, using defaults");
            Config::default_config()
        }
    }
}

/// Watch the config file and push strategy overrides into the live cache.
///
/// Reloads that fail to parse keep the running config. Returns `None` when
/// the platform watcher cannot be started; the server then runs without
/// hot reload.
fn watch_config(
    path: PathBuf,
    initial: Config,
    state: Arc<AppState>,
) -> Option<RecommendedWatcher> {
    let current = Mutex::new(initial);
    let watched = path.clone();

    let handler = move |res: Result<Event, notify::Error>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "config watch error");
                return;
            }
        };
        let touches_config = event.paths.iter().any(|p| p.ends_with(CONFIG_FILE));
        if !touches_config || !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return;
        }
        let next = match Config::load(&watched) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(error = %e, "config reload failed, keeping previous config");
                return;
            }
        };
        let mut running = current.lock();
        if running.cache == next.cache && running.fallback == next.fallback {
            return;
        }
        config::diff_and_apply(&running, &next, &state.cache);
        *running = next;
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "config hot reload unavailable");
            return None;
        }
    };
    if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
        tracing::warn!(path = %path.display(), error = %e, "config hot reload unavailable");
        return None;
    }
    tracing::info!(path = %path.display(), "config hot reload enabled");
    Some(watcher)
}
