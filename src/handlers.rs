use axum::{
    Json, Router,
    extract::{Form, Path, Query, State},
    http::HeaderMap,
    response::Redirect,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::{
    config::Config,
    db::sha256_hex,
    error::AppError,
    models::{ActionLinksResponse, RequestStatus, TokenAction},
    rate_limit::rate_limit_middleware,
    requests::{self, TransitionOutcome},
    state::AppState,
    token::TokenError,
};

// Outward-facing copy. Token refusals all collapse into one message so an
// anonymous caller cannot distinguish a forged link from a stale one.
const MISSING_TOKEN_MESSAGE: &str = "This link is missing its token.";
const INVALID_LINK_MESSAGE: &str = "This link is invalid or has expired.";
const NOT_FOUND_MESSAGE: &str = "We could not find this booking request.";
const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try the link again.";

pub fn router(state: AppState) -> Router {
    let actions = Router::new()
        .route("/actions/approve", get(approve_action))
        .route("/actions/reject", get(reject_action).post(submit_rejection))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/readyz", get(readyz))
        .route("/internal/requests/:request_id/links", post(mint_action_links))
        .merge(actions)
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn readyz(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    sqlx::query("SELECT 1").execute(&state.db).await?;
    Ok(Json(json!({"ready": true})))
}

#[derive(Debug, Deserialize)]
struct ActionParams {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RejectSubmission {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

async fn approve_action(
    State(state): State<AppState>,
    Query(params): Query<ActionParams>,
) -> Redirect {
    match run_approve(&state, params.token.as_deref()).await {
        Ok(redirect) => redirect,
        Err(err) => {
            error!(error = %err, "approve action failed");
            error_redirect(&state.config, GENERIC_FAILURE_MESSAGE)
        }
    }
}

async fn run_approve(state: &AppState, token: Option<&str>) -> Result<Redirect, AppError> {
    let Some(token) = token else {
        return Ok(error_redirect(&state.config, MISSING_TOKEN_MESSAGE));
    };

    let payload = match state.tokens.verify_for_action(token, TokenAction::Approve) {
        Ok(payload) => payload,
        Err(err) => return Ok(refused_token_redirect(&state.config, "approve", &err)),
    };

    let Some(record) = requests::lookup(&state.db, &payload.record_id).await? else {
        return Ok(error_redirect(&state.config, NOT_FOUND_MESSAGE));
    };

    if record.status.is_terminal() {
        return Ok(terminal_redirect(
            &state.config,
            &record.id,
            record.status,
            record.processed_by.as_deref(),
        ));
    }

    let outcome = requests::transition(
        &state.db,
        &record.id,
        RequestStatus::Approved,
        &record.contact_email,
        None,
    )
    .await?;

    match outcome {
        TransitionOutcome::Completed { record, .. } => {
            let approved_by = record
                .processed_by
                .clone()
                .unwrap_or_else(|| record.contact_email.clone());
            Ok(pages_redirect(
                &state.config,
                "/approved",
                &[("id", record.id.as_str()), ("approvedBy", approved_by.as_str())],
            ))
        }
        TransitionOutcome::AlreadyProcessed { status, processed_by } => Ok(terminal_redirect(
            &state.config,
            &payload.record_id,
            status,
            processed_by.as_deref(),
        )),
        TransitionOutcome::NotFound => Ok(error_redirect(&state.config, NOT_FOUND_MESSAGE)),
    }
}

async fn reject_action(
    State(state): State<AppState>,
    Query(params): Query<ActionParams>,
) -> Redirect {
    match run_reject_link(&state, params.token.as_deref()).await {
        Ok(redirect) => redirect,
        Err(err) => {
            error!(error = %err, "reject action failed");
            error_redirect(&state.config, GENERIC_FAILURE_MESSAGE)
        }
    }
}

/// First click of the two-step reject flow. Rejection needs a free-text
/// reason the link cannot carry, so a pending request is bounced to the
/// reason form with the still-opaque token threaded through; the form
/// submission is what actually transitions.
async fn run_reject_link(state: &AppState, token: Option<&str>) -> Result<Redirect, AppError> {
    let Some(token) = token else {
        return Ok(error_redirect(&state.config, MISSING_TOKEN_MESSAGE));
    };

    let payload = match state.tokens.verify_for_action(token, TokenAction::Reject) {
        Ok(payload) => payload,
        Err(err) => return Ok(refused_token_redirect(&state.config, "reject", &err)),
    };

    let Some(record) = requests::lookup(&state.db, &payload.record_id).await? else {
        return Ok(error_redirect(&state.config, NOT_FOUND_MESSAGE));
    };

    if record.status.is_terminal() {
        return Ok(terminal_redirect(
            &state.config,
            &record.id,
            record.status,
            record.processed_by.as_deref(),
        ));
    }

    Ok(pages_redirect(&state.config, "/reject-reason", &[("token", token)]))
}

async fn submit_rejection(
    State(state): State<AppState>,
    Form(form): Form<RejectSubmission>,
) -> Redirect {
    match run_submit_rejection(&state, &form).await {
        Ok(redirect) => redirect,
        Err(err) => {
            error!(error = %err, "reject submission failed");
            error_redirect(&state.config, GENERIC_FAILURE_MESSAGE)
        }
    }
}

async fn run_submit_rejection(
    state: &AppState,
    form: &RejectSubmission,
) -> Result<Redirect, AppError> {
    let Some(token) = form.token.as_deref() else {
        return Ok(error_redirect(&state.config, MISSING_TOKEN_MESSAGE));
    };

    let payload = match state.tokens.verify_for_action(token, TokenAction::Reject) {
        Ok(payload) => payload,
        Err(err) => return Ok(refused_token_redirect(&state.config, "reject-submit", &err)),
    };

    let reason = form.reason.as_deref().map(str::trim).unwrap_or("");
    if reason.is_empty() {
        return Ok(pages_redirect(
            &state.config,
            "/reject-reason",
            &[("token", token), ("error", "reason-required")],
        ));
    }

    let Some(record) = requests::lookup(&state.db, &payload.record_id).await? else {
        return Ok(error_redirect(&state.config, NOT_FOUND_MESSAGE));
    };

    if record.status.is_terminal() {
        return Ok(terminal_redirect(
            &state.config,
            &record.id,
            record.status,
            record.processed_by.as_deref(),
        ));
    }

    let outcome = requests::transition(
        &state.db,
        &record.id,
        RequestStatus::Rejected,
        &record.contact_email,
        Some(reason),
    )
    .await?;

    match outcome {
        TransitionOutcome::Completed { record, .. } => Ok(pages_redirect(
            &state.config,
            "/rejected",
            &[("id", record.id.as_str())],
        )),
        TransitionOutcome::AlreadyProcessed { status, processed_by } => Ok(terminal_redirect(
            &state.config,
            &payload.record_id,
            status,
            processed_by.as_deref(),
        )),
        TransitionOutcome::NotFound => Ok(error_redirect(&state.config, NOT_FOUND_MESSAGE)),
    }
}

async fn mint_action_links(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ActionLinksResponse>, AppError> {
    require_internal_secret(&state.config, &headers)?;

    // Links may be re-sent for any status; the record just has to exist.
    if requests::current_status(&state.db, &request_id).await?.is_none() {
        return Err(AppError::NotFound("booking request not found".to_string()));
    }

    let approve_token = state.tokens.issue(&request_id, TokenAction::Approve);
    let reject_token = state.tokens.issue(&request_id, TokenAction::Reject);
    let base = state.config.base_url.trim_end_matches('/');

    Ok(Json(ActionLinksResponse {
        approve_url: format!("{base}/actions/approve?token={approve_token}"),
        reject_url: format!("{base}/actions/reject?token={reject_token}"),
        expires_in_seconds: state.config.token_max_age_hours * 3600,
        request_id,
    }))
}

fn require_internal_secret(config: &Config, headers: &HeaderMap) -> Result<(), AppError> {
    let provided = headers
        .get("x-internal-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing x-internal-secret".to_string()))?;

    if sha256_hex(provided) != sha256_hex(&config.internal_api_secret) {
        return Err(AppError::Unauthorized("invalid internal secret".to_string()));
    }

    Ok(())
}

fn refused_token_redirect(config: &Config, route: &str, err: &TokenError) -> Redirect {
    debug!(route, reason = %err, "action link token refused");
    error_redirect(config, INVALID_LINK_MESSAGE)
}

fn terminal_redirect(
    config: &Config,
    record_id: &str,
    status: RequestStatus,
    processed_by: Option<&str>,
) -> Redirect {
    match status {
        RequestStatus::Approved | RequestStatus::Booked => {
            already_processed_redirect(config, record_id, "approved", processed_by)
        }
        RequestStatus::Rejected => {
            already_processed_redirect(config, record_id, "rejected", processed_by)
        }
        RequestStatus::Cancelled => pages_redirect(config, "/cancelled", &[("id", record_id)]),
        RequestStatus::Pending => error_redirect(config, GENERIC_FAILURE_MESSAGE),
    }
}

fn already_processed_redirect(
    config: &Config,
    record_id: &str,
    status_label: &str,
    processed_by: Option<&str>,
) -> Redirect {
    let mut params = vec![("status", status_label), ("id", record_id)];
    if let Some(processed_by) = processed_by {
        params.push(("processedBy", processed_by));
    }
    pages_redirect(config, "/already-processed", &params)
}

fn error_redirect(config: &Config, message: &str) -> Redirect {
    pages_redirect(config, "/error", &[("message", message)])
}

fn pages_redirect(config: &Config, path: &str, params: &[(&str, &str)]) -> Redirect {
    let base = config.pages_base_url.trim_end_matches('/');
    let mut url = format!("{base}{path}");
    if let Ok(query) = serde_urlencoded::to_string(params) {
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
    }
    Redirect::to(&url)
}
