use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a booking request. Every state other than `Pending`
/// is terminal for the approval flow; `Booked` is written by the downstream
/// scheduling workflow, never by this service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Booked,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Booked => "booked",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "booked" => Some(RequestStatus::Booked),
            "rejected" => Some(RequestStatus::Rejected),
            "cancelled" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenAction {
    Approve,
    Reject,
}

impl TokenAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenAction::Approve => "approve",
            TokenAction::Reject => "reject",
        }
    }
}

/// Signed payload of an action link; the only client input the server
/// trusts, and only under a valid MAC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPayload {
    pub record_id: String,
    pub action: TokenAction,
    pub issued_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: String,
    pub business_id: String,
    pub contact_name: String,
    pub contact_email: String,
    pub event_id: Option<String>,
    pub requested_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLinksResponse {
    pub request_id: String,
    pub approve_url: String,
    pub reject_url: String,
    pub expires_in_seconds: i64,
}
