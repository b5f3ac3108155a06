//! Domain model for the Shopdesk dashboard.
//!
//! Orders, users, and settings are plain serde structs; the persisted
//! snapshots use the same camelCase field names the dashboard has always
//! written, so existing `app_orders` / `app_users` blobs load unchanged.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Staff role. Admins see every order and manage the roster; staff see
/// only their own assigned jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
        }
    }
}

/// Job status lifecycle. `Completed` is the only state carrying a
/// completion timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

/// How the advance was received. `Pending` doubles as "nothing received
/// yet" and is forced whenever the advance is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMode {
    Cash,
    Online,
    #[serde(rename = "UPI")]
    Upi,
    Pending,
}

impl PaymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMode::Cash => "Cash",
            PaymentMode::Online => "Online",
            PaymentMode::Upi => "UPI",
            PaymentMode::Pending => "Pending",
        }
    }

    /// Modes counted as electronically received money.
    pub fn is_online(self) -> bool {
        matches!(self, PaymentMode::Online | PaymentMode::Upi)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A staff account. The password is stored and compared in plain text by
/// design of this system; it round-trips through the remote mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub password: String,
}

/// A print-shop job order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer_name: String,
    pub service_type: String,
    pub status: OrderStatus,
    pub priority: Priority,
    pub amount: f64,
    /// Creation date, immutable after creation.
    pub date: NaiveDate,
    /// References a `User.email`; not enforced as a foreign key.
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub advance: f64,
    pub payment_mode: PaymentMode,
    /// Set if and only if `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Outstanding balance. Derived, never stored.
    pub fn balance(&self) -> f64 {
        self.amount - self.advance
    }

    /// Turnaround time in whole days: creation date to completion, or to
    /// `now` while the job is still open. Rounded up, same-day jobs
    /// report 0 only when the timestamps coincide exactly.
    pub fn turnaround_days(&self, now: DateTime<Utc>) -> i64 {
        let created = self
            .date
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();
        let end = self.completed_at.unwrap_or(now);
        let secs = (end - created).num_seconds().abs();
        // `secs` is non-negative (abs), so the stable unsigned `div_ceil`
        // yields the same value as the still-unstable signed variant.
        (secs as u64).div_ceil(86_400) as i64
    }
}

/// Process-wide shop configuration, a single persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub shop_name: String,
    pub currency_symbol: String,
    /// The spreadsheet web-app URL. Empty until the admin configures it.
    #[serde(default)]
    pub endpoint_url: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            shop_name: "Siddhivinayak Digital".to_string(),
            currency_symbol: "\u{20b9}".to_string(),
            endpoint_url: String::new(),
        }
    }
}

/// Lowercase-and-trim normalization applied to emails at every boundary
/// (login, duplicate check, delete). One rule everywhere.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ===========================================================================
// Tests
// ===========================================================================
