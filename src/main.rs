use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lab_gateway::api::routes;
use lab_gateway::collab::{InMemoryRoster, JwtAuthenticator};
use lab_gateway::config::Config;
use lab_gateway::hub::LabHub;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lab_gateway=info,warp=info"));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let config = Config::from_env();

    let roster = match &config.roster_path {
        Some(path) => match InMemoryRoster::load(path).await {
            Ok(roster) => roster,
            Err(e) => {
                tracing::error!(path = %path, error = %e, "Failed to load roster");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("ROSTER_PATH not set, starting with an empty roster");
            InMemoryRoster::new()
        }
    };
    let roster = Arc::new(roster);

    let hub = LabHub::new(
        config.gateway.clone(),
        Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret)),
        roster.clone(),
        roster,
    );

    if config.auth.publish_api_key.is_none() {
        tracing::info!("PUBLISH_API_KEY not set, /internal/publish is disabled");
    }
    let routes = routes::routes(hub.clone(), config.auth.publish_api_key.clone());

    let shutdown_hub = hub.clone();
    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(config.bind_address(), async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        shutdown_hub.shutdown();
    });

    tracing::info!(address = %addr, "Lab gateway listening");
    server.await;

    let deadline = config.gateway.collaborator_timeout + config.gateway.close_timeout;
    if !hub.drain(deadline).await {
        tracing::warn!(live_sessions = hub.live_sessions(), "Exiting with connections still closing");
    }
    tracing::info!("Lab gateway stopped");
}
