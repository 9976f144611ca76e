use chrono::{Duration, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction, sqlite::SqliteRow};
use tracing::info;

use crate::{
    db::new_id,
    error::AppError,
    models::{BookingRequest, RequestStatus},
};

/// Reminder tasks created on approval fall due this many days out.
const FOLLOW_UP_DUE_DAYS: i64 = 20;

const FOLLOW_UP_STAGE: &str = "new";
const FOLLOW_UP_TASK_CATEGORY: &str = "todo";

/// Result of one transition attempt. `AlreadyProcessed` is a normal,
/// expected outcome (a second click, a lost race), not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Completed {
        record: BookingRequest,
        created_opportunity_id: Option<String>,
        created_task_id: Option<String>,
    },
    AlreadyProcessed {
        status: RequestStatus,
        processed_by: Option<String>,
    },
    NotFound,
}

/// Committed-read view of a request's lifecycle state.
pub async fn current_status(
    db: &SqlitePool,
    record_id: &str,
) -> Result<Option<RequestStatus>, AppError> {
    let row = sqlx::query("SELECT status FROM booking_requests WHERE id = ?1")
        .bind(record_id)
        .fetch_optional(db)
        .await?;

    match row {
        Some(row) => Ok(Some(status_from_row(&row)?)),
        None => Ok(None),
    }
}

pub async fn lookup(db: &SqlitePool, record_id: &str) -> Result<Option<BookingRequest>, AppError> {
    let row = sqlx::query(
        r#"
        SELECT id, business_id, contact_name, contact_email, event_id, requested_date,
               notes, status, rejection_reason, processed_at, processed_by,
               created_at, updated_at
        FROM booking_requests
        WHERE id = ?1
        "#,
    )
    .bind(record_id)
    .fetch_optional(db)
    .await?;

    match row {
        Some(row) => Ok(Some(request_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Flips a pending request to `approved` or `rejected` exactly once.
///
/// One transaction: a conditional update gated on `status = 'pending'`,
/// branch on rows affected. At most one concurrent caller matches; losers
/// see zero rows and read the winner's committed status. The follow-up
/// records ride the winner's commit, so they exist iff this transition
/// instance flipped the row.
pub async fn transition(
    db: &SqlitePool,
    record_id: &str,
    target: RequestStatus,
    actor: &str,
    rejection_reason: Option<&str>,
) -> Result<TransitionOutcome, AppError> {
    if !matches!(target, RequestStatus::Approved | RequestStatus::Rejected) {
        return Err(AppError::BadRequest(format!(
            "cannot transition a booking request to {}",
            target.as_str()
        )));
    }

    let now = Utc::now();
    let mut tx = db.begin().await?;

    let changed = sqlx::query(
        r#"
        UPDATE booking_requests
        SET status = ?1,
            processed_at = ?2,
            processed_by = ?3,
            rejection_reason = ?4,
            updated_at = ?2
        WHERE id = ?5
          AND status = 'pending'
        "#,
    )
    .bind(target.as_str())
    .bind(now)
    .bind(actor)
    .bind(rejection_reason)
    .bind(record_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if changed == 0 {
        let row = sqlx::query("SELECT status, processed_by FROM booking_requests WHERE id = ?1")
            .bind(record_id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        let Some(row) = row else {
            return Ok(TransitionOutcome::NotFound);
        };

        return Ok(TransitionOutcome::AlreadyProcessed {
            status: status_from_row(&row)?,
            processed_by: row.try_get("processed_by")?,
        });
    }

    let record = fetch_request(&mut tx, record_id).await?;

    let mut created_opportunity_id = None;
    let mut created_task_id = None;

    if target == RequestStatus::Approved {
        if let Some(source) = fetch_source_opportunity(&mut tx, record_id).await? {
            let (opportunity_id, task_id) =
                create_follow_up(&mut tx, &record, &source).await?;
            created_opportunity_id = Some(opportunity_id);
            created_task_id = Some(task_id);
        }
    }

    tx.commit().await?;

    info!(
        record_id,
        status = target.as_str(),
        actor,
        follow_up = created_opportunity_id.is_some(),
        "booking request transitioned"
    );

    Ok(TransitionOutcome::Completed {
        record,
        created_opportunity_id,
        created_task_id,
    })
}

#[derive(Debug, Clone)]
struct SourceOpportunity {
    business_id: String,
    title: String,
}

async fn fetch_source_opportunity(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: &str,
) -> Result<Option<SourceOpportunity>, AppError> {
    let row = sqlx::query(
        r#"
        SELECT business_id, title
        FROM opportunities
        WHERE request_id = ?1
          AND has_request = 1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(record_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(SourceOpportunity {
        business_id: row.try_get("business_id")?,
        title: row.try_get("title")?,
    }))
}

async fn create_follow_up(
    tx: &mut Transaction<'_, Sqlite>,
    record: &BookingRequest,
    source: &SourceOpportunity,
) -> Result<(String, String), AppError> {
    let now = Utc::now();
    let opportunity_id = new_id("opp");
    let task_id = new_id("tsk");

    sqlx::query(
        r#"
        INSERT INTO opportunities (
          id,
          business_id,
          title,
          stage,
          has_request,
          request_id,
          created_at,
          updated_at
        ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)
        "#,
    )
    .bind(opportunity_id.clone())
    .bind(source.business_id.clone())
    .bind(format!("Follow-up: {}", source.title))
    .bind(FOLLOW_UP_STAGE)
    .bind(record.id.clone())
    .bind(now)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO sales_tasks (
          id,
          opportunity_id,
          category,
          note,
          due_at,
          completed_at,
          created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
        "#,
    )
    .bind(task_id.clone())
    .bind(opportunity_id.clone())
    .bind(FOLLOW_UP_TASK_CATEGORY)
    .bind(format!(
        "Follow up with {} on the approved booking request.",
        record.contact_name
    ))
    .bind(now + Duration::days(FOLLOW_UP_DUE_DAYS))
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok((opportunity_id, task_id))
}

async fn fetch_request(
    tx: &mut Transaction<'_, Sqlite>,
    record_id: &str,
) -> Result<BookingRequest, AppError> {
    let row = sqlx::query(
        r#"
        SELECT id, business_id, contact_name, contact_email, event_id, requested_date,
               notes, status, rejection_reason, processed_at, processed_by,
               created_at, updated_at
        FROM booking_requests
        WHERE id = ?1
        "#,
    )
    .bind(record_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::internal("booking request vanished mid-transaction"))?;

    request_from_row(&row)
}

fn status_from_row(row: &SqliteRow) -> Result<RequestStatus, AppError> {
    let raw: String = row.try_get("status")?;
    RequestStatus::parse(&raw)
        .ok_or_else(|| AppError::internal(format!("unknown booking request status: {raw}")))
}

fn request_from_row(row: &SqliteRow) -> Result<BookingRequest, AppError> {
    Ok(BookingRequest {
        id: row.try_get("id")?,
        business_id: row.try_get("business_id")?,
        contact_name: row.try_get("contact_name")?,
        contact_email: row.try_get("contact_email")?,
        event_id: row.try_get("event_id")?,
        requested_date: row.try_get("requested_date")?,
        notes: row.try_get("notes")?,
        status: status_from_row(row)?,
        rejection_reason: row.try_get("rejection_reason")?,
        processed_at: row.try_get("processed_at")?,
        processed_by: row.try_get("processed_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
