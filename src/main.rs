//! Metadata Cache Engine
//!
//! Read-through cache for video-platform metadata with scheduled warming
//! and threshold-based monitoring.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Cache Engine                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Warming    │───▶│   Metadata   │◀───│  Monitoring  │       │
//! │  │  Scheduler   │    │    Cache     │    │     Loop     │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             │                                   │
//! │                 ┌───────────┴───────────┐                       │
//! │                 ▼                       ▼                       │
//! │          KvBackend (Redis)       Loader (HTTP)                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use metacache::adapters::{
    HttpLoader, HttpLoaderConfig, InMemoryKvBackend, PrometheusExporter, RedisConfig,
    RedisKvBackend,
};
use metacache::domain::KvBackend;
use metacache::error::{Error, Result};
use metacache::{CacheEngine, EngineConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Metadata cache engine with warming and monitoring
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "METACACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Redis URL; the in-memory backend is used when absent
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Base URL of the source-of-truth API
    #[arg(long, env = "LOADER_URL", default_value = "http://127.0.0.1:8000/api")]
    loader_url: String,

    /// Key namespace (overrides the config file)
    #[arg(long, env = "CACHE_NAMESPACE")]
    namespace: Option<String>,

    /// Monitoring tick interval (overrides the config file)
    #[arg(long, env = "MONITOR_INTERVAL_SECONDS")]
    monitor_interval_seconds: Option<u64>,

    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Health server address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:9091")]
    health_addr: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Do not start the warming scheduler
    #[arg(long, env = "NO_WARMING")]
    no_warming: bool,

    /// Do not start the monitoring loop
    #[arg(long, env = "NO_MONITORING")]
    no_monitoring: bool,
}

impl Args {
    /// Load the config file, then apply flag overrides.
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };

        if let Some(namespace) = &self.namespace {
            config.cache.namespace = namespace.clone();
        }
        if let Some(secs) = self.monitor_interval_seconds {
            config.monitoring.interval = Duration::from_secs(secs);
        }
        if self.no_warming {
            config.warming.autostart = false;
        }
        if self.no_monitoring {
            config.monitoring.autostart = false;
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.engine_config()?;

    info!("Starting metadata cache engine");
    info!("  Namespace: {}", config.cache.namespace);
    info!("  Loader URL: {}", args.loader_url);
    info!("  Monitoring interval: {:?}", config.monitoring.interval);
    info!("  Warming strategies: {}", config.warming.strategies.len());

    let backend: Arc<dyn KvBackend> = match &args.redis_url {
        Some(url) => Arc::new(RedisKvBackend::connect(RedisConfig::with_url(url.clone())).await?),
        None => {
            info!("No Redis URL given; using the in-memory backend");
            Arc::new(InMemoryKvBackend::new())
        }
    };

    let loader = HttpLoader::new(HttpLoaderConfig {
        base_url: args.loader_url.clone(),
        ..Default::default()
    })?;

    let engine = Arc::new(CacheEngine::new(config, backend, Arc::new(loader))?);
    let exporter = Arc::new(PrometheusExporter::new()?);

    engine.start();

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_engine = engine.clone();
    let health_server = tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_engine).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_engine = engine.clone();
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_engine, exporter).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Internal(format!("Failed to listen for shutdown signal: {}", e)))?;

    info!("Shutdown signal received");
    engine.shutdown().await;
    health_server.abort();
    metrics_server.abort();

    info!("Cache engine shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "redis=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Helpers
// =============================================================================

mod http {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Response, StatusCode};

    pub type Body = Full<Bytes>;

    pub fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Body> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }

    pub fn text(status: StatusCode, body: &'static str) -> Response<Body> {
        respond(status, "text/plain; charset=utf-8", body)
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, engine: Arc<CacheEngine>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
        engine: Arc<CacheEngine>,
    ) -> std::result::Result<Response<http::Body>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" => {
                if engine.is_live() {
                    http::text(StatusCode::OK, "ok")
                } else {
                    http::text(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
                }
            }
            "/readyz" => {
                if engine.is_ready() {
                    http::text(StatusCode::OK, "ok")
                } else {
                    http::text(StatusCode::SERVICE_UNAVAILABLE, "not ready")
                }
            }
            "/health" => {
                let report = engine.health().await;
                let status = if report.status.is_operational() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                match serde_json::to_vec(&report) {
                    Ok(body) => http::respond(status, "application/json", body),
                    Err(_) => http::text(StatusCode::INTERNAL_SERVER_ERROR, "encoding error"),
                }
            }
            _ => http::text(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let engine = engine.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(req, engine.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(
    addr: &str,
    engine: Arc<CacheEngine>,
    exporter: Arc<PrometheusExporter>,
) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
        engine: Arc<CacheEngine>,
        exporter: Arc<PrometheusExporter>,
    ) -> std::result::Result<Response<http::Body>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match exporter.render(&engine) {
                Ok(body) => http::respond(StatusCode::OK, &exporter.content_type(), body),
                Err(e) => {
                    error!("Failed to render metrics: {}", e);
                    http::text(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
                }
            },
            _ => http::text(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let engine = engine.clone();
        let exporter = exporter.clone();

        tokio::spawn(async move {
            let service =
                service_fn(move |req| metrics_handler(req, engine.clone(), exporter.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
