use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webapp_sso::{config::Config, web, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting SSO gateway");

    // Load configuration from environment
    let config = Config::load()?;
    tracing::info!(
        environment = ?config.environment,
        keycloak_realm = %config.keycloak_realm,
        legacy_webapp_path = %config.legacy_webapp_path,
        registration_id = %config.registration_id,
        upstream = ?config.upstream_url,
        "Configuration loaded"
    );

    let bind_address = config.bind_address();
    let state = Arc::new(AppState::from_config(config)?);

    // Prefetch JWKS so /readyz reports ready immediately; a failure is retried on first login
    match state.jwt_validator.prefetch_jwks().await {
        Ok(()) => tracing::info!("JWKS prefetched successfully - readiness check will pass"),
        Err(e) => tracing::warn!(error = %e, "Failed to prefetch JWKS at startup"),
    }

    let app = web::create_router(state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Gateway listening on {}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
