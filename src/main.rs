//! SDS CSI Controller
//!
//! Runs the Controller Service against an OpenSDS orchestrator (or the
//! in-memory orchestrator in standalone mode), serving the REST API, a
//! health endpoint and Prometheus metrics.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sds_csi_controller::controlplane::attachment::AttachmentConfig;
use sds_csi_controller::controlplane::provisioning::ProvisioningConfig;
use sds_csi_controller::controlplane::replication::ReplicationConfig;
use sds_csi_controller::{
    ApiServer, ApiServerConfig, BackendConfig, BackendFactory, ControllerConfig,
    ControllerService, Error, OpenSdsConfig, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// SDS CSI Controller - Controller Service for OpenSDS block storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Orchestrator backend (opensds, memory)
    #[arg(long, env = "BACKEND", default_value = "opensds")]
    backend: String,

    /// OpenSDS hotpot endpoint
    #[arg(long, env = "OPENSDS_ENDPOINT", default_value = "http://127.0.0.1:50040")]
    opensds_endpoint: String,

    /// OpenSDS tenant (project) id
    #[arg(long, env = "OPENSDS_TENANT_ID", default_value = "e93b4c0934da416eb9c8d120c5d04d96")]
    opensds_tenant_id: String,

    /// OpenSDS auth token
    #[arg(long, env = "OPENSDS_AUTH_TOKEN")]
    opensds_auth_token: Option<String>,

    /// OpenSDS request timeout in seconds
    #[arg(long, env = "OPENSDS_TIMEOUT", default_value = "30")]
    opensds_timeout_secs: u64,

    /// Profile used when a request names none
    #[arg(long, env = "DEFAULT_PROFILE", default_value = "default")]
    default_profile: String,

    /// Availability zone used when a request names none
    #[arg(long, env = "DEFAULT_AVAILABILITY_ZONE", default_value = "default")]
    default_availability_zone: String,

    /// Availability zone for replication secondaries
    #[arg(long, env = "SECONDARY_AVAILABILITY_ZONE", default_value = "secondary")]
    secondary_availability_zone: String,

    /// Name prefix for replication secondaries
    #[arg(long, env = "SECONDARY_PREFIX", default_value = "secondary-")]
    secondary_prefix: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting SDS CSI Controller");
    info!("  Version: {}", sds_csi_controller::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Backend: {}", args.backend);

    let backend_config = BackendConfig {
        opensds: OpenSdsConfig {
            endpoint: args.opensds_endpoint.clone(),
            tenant_id: args.opensds_tenant_id.clone(),
            auth_token: args.opensds_auth_token.clone(),
            timeout: Duration::from_secs(args.opensds_timeout_secs),
        },
        ..Default::default()
    };
    let backend = BackendFactory::create(&args.backend, backend_config)?;

    let controller_config = ControllerConfig {
        provisioning: ProvisioningConfig {
            default_profile_name: args.default_profile.clone(),
            default_availability_zone: args.default_availability_zone.clone(),
        },
        replication: ReplicationConfig {
            secondary_availability_zone: args.secondary_availability_zone.clone(),
            secondary_name_prefix: args.secondary_prefix.clone(),
        },
        attachment: AttachmentConfig::default(),
    };
    let service = ControllerService::new(backend, controller_config)?;
    info!("Controller service initialized");

    // Start health server
    let health_addr = parse_addr(&args.health_addr, "health server")?;
    let health_service = service.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_service).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics server")?;
    let metrics_service = service.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics_service).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        rest_addr: parse_addr(&args.api_addr, "REST API")?,
    };
    let api_server = Arc::new(ApiServer::new(api_config, service));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_server.shutdown();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    info!("Starting controller API server");
    api_server.run().await?;

    info!("Controller shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, what: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address {}: {}", what, addr, e)))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "tower=warn", "axum=info"] {
        let directive: tracing_subscriber::filter::Directive = directive
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid log directive: {}", e)))?;
        filter = filter.add_directive(directive);
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

    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr, service: Arc<ControllerService>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let service = service.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" => {
                            if service.ready().await {
                                text_response(StatusCode::OK, "ok")
                            } else {
                                text_response(StatusCode::SERVICE_UNAVAILABLE, "backend unreachable")
                            }
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, service: Arc<ControllerService>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let service = service.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let service = service.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match service.metrics().encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode failed")
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
