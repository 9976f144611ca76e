use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub token_secret: String,
    pub token_max_age_hours: i64,
    pub base_url: String,
    pub pages_base_url: String,
    pub internal_api_secret: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: u32,
    pub trust_forwarded_for: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/bookings.db".to_string()),
            token_secret: env::var("TOKEN_SECRET").unwrap_or_else(|_| "dev-change-me".to_string()),
            token_max_age_hours: env::var("TOKEN_MAX_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            base_url: env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            pages_base_url: env::var("PAGES_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/requests".to_string()),
            internal_api_secret: env::var("INTERNAL_API_SECRET")
                .unwrap_or_else(|_| "dev-internal-change-me".to_string()),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            rate_limit_max_requests: env::var("RATE_LIMIT_MAX_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            trust_forwarded_for: env::var("TRUST_FORWARDED_FOR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }
}
