use sqlx::SqlitePool;

use crate::{config::Config, rate_limit::RateLimiter, token::TokenCodec};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: SqlitePool,
    pub tokens: TokenCodec,
    pub rate_limiter: RateLimiter,
}
