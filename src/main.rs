use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vecivendo_ads::middleware::budget::BudgetSnapshot;
use vecivendo_ads::{api, config, connect_store, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OTLP export only when a collector endpoint is configured
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "vecivendo-ads"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "vecivendo_ads=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Costs { command }) => {
            let (state, _worker) = build_state(cfg)?;
            handle_costs_command(command, &state).await
        }
        Some(cli::Commands::Budget { ad_id }) => {
            let (state, _worker) = build_state(cfg)?;
            let snapshot = BudgetSnapshot::load(&state.spend, &ad_id)
                .await
                .with_context(|| format!("failed to load paid ad {}", ad_id))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Some(cli::Commands::Sweep) => {
            let (state, _worker) = build_state(cfg)?;
            let report = state.sweeper().run_once(chrono::Utc::now()).await?;
            println!(
                "Sweep complete:\n  Scanned:   {}\n  Exhausted: {}\n  Expired:   {}\n  Failed:    {}",
                report.scanned, report.exhausted, report.expired, report.failed
            );
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn build_state(cfg: config::Config) -> anyhow::Result<(Arc<AppState>, tokio::task::JoinHandle<()>)> {
    let store = connect_store(&cfg)?;
    let (state, worker) = AppState::new(cfg, store)?;
    Ok((Arc::new(state), worker))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let dashboard_origin = cfg.dashboard_origin.clone();
    let sweep_interval = cfg.budget_sweep_interval;

    tracing::info!("Initializing application state...");
    let (state, worker) = build_state(cfg)?;

    tracing::info!("Warming cost cache...");
    let costs = state.costs.reload().await;
    tracing::info!(view = costs.view, click = costs.click, "Loaded event costs");

    if let Some(_sweeper) = state.sweeper().spawn(sweep_interval) {
        tracing::info!(
            interval_secs = sweep_interval.as_secs(),
            "Background budget sweeper started"
        );
    }

    let app = api::router(state.clone())
        // Enforce 1 MB body size limit on all routes
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        // restrict CORS origins to the dashboard (plus localhost for dev)
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Vecivendo ads engine listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Draining side-effect queue...");
    state.tracker.queue().flush().await;
    drop(state);
    if tokio::time::timeout(std::time::Duration::from_secs(5), worker)
        .await
        .is_err()
    {
        tracing::warn!("side-effect worker did not stop within 5s");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with service logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::{header, HeaderValue};

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));

    // handlers that allow caching say so explicitly
    headers
        .entry(header::CACHE_CONTROL)
        .or_insert(HeaderValue::from_static("no-store"));

    headers.remove(header::SERVER);

    resp
}

async fn handle_costs_command(cmd: cli::CostCommands, state: &Arc<AppState>) -> anyhow::Result<()> {
    let costs = match cmd {
        cli::CostCommands::Show => state.costs.reload().await,
        cli::CostCommands::Set { view, click } => {
            if view.is_none() && click.is_none() {
                anyhow::bail!("Nothing to set. Pass --view and/or --click");
            }
            for (name, value) in [("view", view), ("click", click)] {
                if let Some(v) = value {
                    if !v.is_finite() || v < 0.0 {
                        anyhow::bail!("Invalid {} cost: {}. Must be a non-negative number", name, v);
                    }
                }
            }
            state.costs.set(view, click).await?
        }
    };
    println!("Costs:\n  View:  {}\n  Click: {}", costs.view, costs.click);
    Ok(())
}
