use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shared_config::AppConfig;
use shared_database::{reset_schema, Database};
use shared_utils::state::AppState;
use telemed_api::create_router;
use telemed_api::ticker::run_reminder_ticker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    match std::env::args().nth(1).as_deref() {
        Some("init-db") => init_db(&config),
        Some(other) => bail!("unknown command '{}'; expected 'init-db' or no argument", other),
        None => serve(config).await,
    }
}

fn init_db(config: &AppConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path))?;
    db.with_conn(|conn| reset_schema(conn))
        .context("recreating schema")?;
    info!("Database initialized at {}", config.database_path);
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    if !config.is_configured() {
        bail!("SESSION_SECRET must be set to start the server");
    }
    info!("Starting Telemedicine API server");

    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path))?;
    let bind_address = config.bind_address.clone();
    let poll_period = Duration::from_secs(config.reminder_poll_seconds.max(1));

    // Create shared state
    let state = Arc::new(AppState::new(config, db));

    tokio::spawn(run_reminder_ticker(state.clone(), poll_period));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {}", bind_address))?;
    info!("Listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("server error")?;

    Ok(())
}
