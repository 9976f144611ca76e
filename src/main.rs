use std::net::SocketAddr;

use axum::Router;
use tracing::info;

use booking_approvals::{
    config::Config, db::connect_and_bootstrap, handlers::router, rate_limit::RateLimiter,
    state::AppState, token::TokenCodec,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,booking_approvals=info".to_string()),
        )
        .json()
        .init();

    let config = Config::from_env();
    let db = connect_and_bootstrap(&config).await?;

    let tokens = TokenCodec::new(&config.token_secret, config.token_max_age_hours);
    let rate_limiter = RateLimiter::new(
        config.rate_limit_window_secs,
        config.rate_limit_max_requests,
    );

    let state = AppState {
        config: config.clone(),
        db,
        tokens,
        rate_limiter,
    };

    let app: Router = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(bind_addr = %config.bind_addr, "booking approvals service listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
