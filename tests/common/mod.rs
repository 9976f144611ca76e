use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use booking_approvals::{
    config::Config,
    db::{connect_and_bootstrap, new_id},
    handlers::router,
    models::RequestStatus,
    rate_limit::RateLimiter,
    state::AppState,
    token::TokenCodec,
};
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub app: Router,
    pub config: Config,
    pub db: SqlitePool,
    pub tokens: TokenCodec,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("request should execute");
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("response body should be readable");
        let parsed = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
        (status, parsed)
    }

    pub async fn send_redirect(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("request should execute");
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (status, location)
    }
}

pub async fn build_test_app() -> TestApp {
    build_test_app_with_rate_limit(1000).await
}

pub async fn build_test_app_with_rate_limit(max_requests: u32) -> TestApp {
    let temp_dir = TempDir::new().expect("temp directory should be created");
    let db_path = temp_dir.path().join("test-bookings.db");
    let db_url = format!("sqlite://{}", db_path.display());
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic")
        .as_nanos();

    let config = Config {
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: db_url,
        token_secret: format!("secret-{unique}"),
        token_max_age_hours: 24,
        base_url: "http://localhost:8080".to_string(),
        pages_base_url: "http://localhost:3000/requests".to_string(),
        internal_api_secret: format!("internal-{unique}"),
        rate_limit_window_secs: 60,
        rate_limit_max_requests: max_requests,
        trust_forwarded_for: true,
    };

    let db = connect_and_bootstrap(&config)
        .await
        .expect("db bootstrap should succeed");
    let tokens = TokenCodec::new(&config.token_secret, config.token_max_age_hours);
    let rate_limiter = RateLimiter::new(
        config.rate_limit_window_secs,
        config.rate_limit_max_requests,
    );

    let state = AppState {
        config: config.clone(),
        db: db.clone(),
        tokens: tokens.clone(),
        rate_limiter,
    };
    let app = router(state);

    TestApp {
        app,
        config,
        db,
        tokens,
        _temp_dir: temp_dir,
    }
}

pub struct SeededRequest {
    pub id: String,
    pub business_id: String,
    pub contact_email: String,
}

pub async fn seed_request(db: &SqlitePool, status: RequestStatus) -> SeededRequest {
    let id = new_id("req");
    let business_id = new_id("biz");
    let contact_email = format!("contact-{unique}@example.com", unique = &id[4..12]);
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO booking_requests (
          id, business_id, contact_name, contact_email, event_id, requested_date,
          notes, status, rejection_reason, processed_at, processed_by,
          created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, NULL, NULL, NULL, ?5, NULL, NULL, NULL, ?6, ?6)
        "#,
    )
    .bind(id.clone())
    .bind(business_id.clone())
    .bind("Avery Example")
    .bind(contact_email.clone())
    .bind(status.as_str())
    .bind(now)
    .execute(db)
    .await
    .expect("booking request should seed");

    SeededRequest {
        id,
        business_id,
        contact_email,
    }
}

pub async fn seed_processed_request(
    db: &SqlitePool,
    status: RequestStatus,
    processed_by: &str,
) -> SeededRequest {
    let seeded = seed_request(db, status).await;

    sqlx::query(
        r#"
        UPDATE booking_requests
        SET processed_at = ?1, processed_by = ?2
        WHERE id = ?3
        "#,
    )
    .bind(Utc::now())
    .bind(processed_by)
    .bind(seeded.id.clone())
    .execute(db)
    .await
    .expect("processed fields should update");

    seeded
}

pub async fn seed_source_opportunity(db: &SqlitePool, request: &SeededRequest) -> String {
    let id = new_id("opp");
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO opportunities (
          id, business_id, title, stage, has_request, request_id, created_at, updated_at
        ) VALUES (?1, ?2, ?3, 'qualified', 1, ?4, ?5, ?5)
        "#,
    )
    .bind(id.clone())
    .bind(request.business_id.clone())
    .bind("Summer booking")
    .bind(request.id.clone())
    .bind(now)
    .execute(db)
    .await
    .expect("source opportunity should seed");

    id
}

pub async fn count_follow_ups(db: &SqlitePool, request_id: &str) -> (i64, i64) {
    let opportunities: i64 = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM opportunities
        WHERE request_id = ?1
          AND has_request = 0
        "#,
    )
    .bind(request_id)
    .fetch_one(db)
    .await
    .expect("count should run")
    .try_get("n")
    .expect("count should read");

    let tasks: i64 = sqlx::query(
        r#"
        SELECT COUNT(*) AS n
        FROM sales_tasks
        WHERE opportunity_id IN (
          SELECT id FROM opportunities WHERE request_id = ?1 AND has_request = 0
        )
        "#,
    )
    .bind(request_id)
    .fetch_one(db)
    .await
    .expect("count should run")
    .try_get("n")
    .expect("count should read");

    (opportunities, tasks)
}
