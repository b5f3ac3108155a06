//! Codec for the spreadsheet endpoint's wire shapes.
//!
//! The remote speaks positional-array rows, not objects: 11 columns per
//! order, 4 per user. This module is the only place that mapping exists;
//! both the push payload and the pull decoder derive from the column
//! table below. The column order is part of the remote contract and must
//! not change without a coordinated script-side migration.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{Order, OrderStatus, PaymentMode, Priority, Role, User};

// Order row columns:
// [id, date, customerName, serviceType, amount, status, assignedTo,
//  advance, paymentMode, completedAt, priority]
pub const ORDER_COLUMNS: usize = 11;
const COL_ID: usize = 0;
const COL_DATE: usize = 1;
const COL_CUSTOMER: usize = 2;
const COL_SERVICE: usize = 3;
const COL_AMOUNT: usize = 4;
const COL_STATUS: usize = 5;
const COL_ASSIGNED: usize = 6;
const COL_ADVANCE: usize = 7;
const COL_PAY_MODE: usize = 8;
const COL_COMPLETED: usize = 9;
const COL_PRIORITY: usize = 10;

// User row columns: [email, name, role, password]
pub const USER_COLUMNS: usize = 4;
const COL_EMAIL: usize = 0;
const COL_NAME: usize = 1;
const COL_ROLE: usize = 2;
const COL_PASSWORD: usize = 3;

/// Malformed remote data. Collapsed into the generic "Sync Failed" class
/// at the user boundary; the detail is for logs.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("order row {index}: {reason}")]
    OrderRow { index: usize, reason: String },
    #[error("user row {index}: {reason}")]
    UserRow { index: usize, reason: String },
}

/// What a pull returned. A side is `None` when the body simply lacked
/// that array; the caller leaves the matching local collection untouched.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    pub orders: Option<Vec<Order>>,
    pub users: Option<Vec<User>>,
}

// ---------------------------------------------------------------------------
// Push payload (local -> remote)
// ---------------------------------------------------------------------------

/// Build the `backup_all` POST body: full local state as object rows with
/// every optional field normalized to its wire default, so the script can
/// write the fixed 11/4-column layout without null checks.
pub fn push_payload(orders: &[Order], users: &[User]) -> Value {
    json!({
        "action": "backup_all",
        "orders": orders.iter().map(order_push_record).collect::<Vec<_>>(),
        "users": users.iter().map(user_push_record).collect::<Vec<_>>(),
    })
}

fn order_push_record(o: &Order) -> Value {
    json!({
        "id": o.id,
        "date": o.date.format("%Y-%m-%d").to_string(),
        "customerName": o.customer_name,
        "serviceType": o.service_type,
        "amount": o.amount,
        "status": o.status.as_str(),
        "assignedTo": o.assigned_to,
        "advance": o.advance,
        "paymentMode": o.payment_mode.as_str(),
        "completedAt": o
            .completed_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default(),
        "priority": o.priority.as_str(),
    })
}

fn user_push_record(u: &User) -> Value {
    json!({
        "email": u.email,
        "name": u.name,
        "role": u.role.as_str(),
        "password": u.password,
    })
}

/// Positional form of an order, the layout the script writes into the
/// sheet and serves back from `doGet`.
pub fn order_to_row(o: &Order) -> Vec<Value> {
    let record = order_push_record(o);
    vec![
        record["id"].clone(),
        record["date"].clone(),
        record["customerName"].clone(),
        record["serviceType"].clone(),
        record["amount"].clone(),
        record["status"].clone(),
        record["assignedTo"].clone(),
        record["advance"].clone(),
        record["paymentMode"].clone(),
        record["completedAt"].clone(),
        record["priority"].clone(),
    ]
}

pub fn user_to_row(u: &User) -> Vec<Value> {
    vec![
        json!(u.email),
        json!(u.name),
        json!(u.role.as_str()),
        json!(u.password),
    ]
}

// ---------------------------------------------------------------------------
// Pull decoding (remote -> local)
// ---------------------------------------------------------------------------

/// Decode a pull response body. Each present array fully replaces the
/// matching local collection; absent arrays are skipped.
pub fn decode_envelope(body: &Value) -> Result<RemoteSnapshot, WireError> {
    let mut snapshot = RemoteSnapshot::default();

    if let Some(rows) = body.get("orders").and_then(Value::as_array) {
        let mut orders = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            orders.push(order_from_row(index, row)?);
        }
        snapshot.orders = Some(orders);
    }

    if let Some(rows) = body.get("users").and_then(Value::as_array) {
        let mut users = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            users.push(user_from_row(index, row)?);
        }
        snapshot.users = Some(users);
    }

    Ok(snapshot)
}

fn order_from_row(index: usize, row: &Value) -> Result<Order, WireError> {
    let err = |reason: &str| WireError::OrderRow {
        index,
        reason: reason.to_string(),
    };
    let cells = row.as_array().ok_or_else(|| err("not an array"))?;

    let id = cell_str(cells, COL_ID).ok_or_else(|| err("missing id"))?;
    if id.is_empty() {
        return Err(err("empty id"));
    }
    let date = cell_str(cells, COL_DATE)
        .and_then(parse_wire_date)
        .ok_or_else(|| err("bad date"))?;
    let customer_name = cell_str(cells, COL_CUSTOMER).ok_or_else(|| err("missing customerName"))?;
    let service_type = cell_str(cells, COL_SERVICE).ok_or_else(|| err("missing serviceType"))?;
    let amount = cell_f64(cells, COL_AMOUNT).ok_or_else(|| err("bad amount"))?;
    let status: OrderStatus = cell_enum(cells, COL_STATUS).ok_or_else(|| err("bad status"))?;

    // The sheet pads short rows; everything past status decodes leniently.
    let assigned_to = cell_str(cells, COL_ASSIGNED).unwrap_or_default();
    let advance = cell_f64(cells, COL_ADVANCE).unwrap_or(0.0);
    let payment_mode: PaymentMode = cell_enum(cells, COL_PAY_MODE).unwrap_or(PaymentMode::Pending);
    let completed_at = cell_str(cells, COL_COMPLETED)
        .filter(|s| !s.is_empty())
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc));
    let priority: Priority = cell_enum(cells, COL_PRIORITY).unwrap_or(Priority::Medium);

    Ok(Order {
        id,
        customer_name,
        service_type,
        status,
        priority,
        amount,
        date,
        assigned_to,
        advance,
        payment_mode,
        completed_at,
    })
}

fn user_from_row(index: usize, row: &Value) -> Result<User, WireError> {
    let err = |reason: &str| WireError::UserRow {
        index,
        reason: reason.to_string(),
    };
    let cells = row.as_array().ok_or_else(|| err("not an array"))?;

    let email = cell_str(cells, COL_EMAIL).ok_or_else(|| err("missing email"))?;
    if email.is_empty() {
        return Err(err("empty email"));
    }
    let name = cell_str(cells, COL_NAME).ok_or_else(|| err("missing name"))?;
    let role: Role = cell_enum(cells, COL_ROLE).unwrap_or(Role::Staff);
    let password = cell_str(cells, COL_PASSWORD).unwrap_or_default();

    Ok(User {
        email,
        name,
        role,
        password,
    })
}

// ---------------------------------------------------------------------------
// Cell helpers
// ---------------------------------------------------------------------------

fn cell_str(cells: &[Value], idx: usize) -> Option<String> {
    let cell = cells.get(idx)?;
    match cell {
        Value::String(s) => Some(s.trim().to_string()),
        // Sheets hand back bare numbers for numeric-looking text cells.
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn cell_f64(cells: &[Value], idx: usize) -> Option<f64> {
    let cell = cells.get(idx)?;
    match cell {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn cell_enum<T: serde::de::DeserializeOwned>(cells: &[Value], idx: usize) -> Option<T> {
    let raw = cell_str(cells, idx).filter(|s| !s.is_empty())?;
    serde_json::from_value(Value::String(raw)).ok()
}

/// Dates normally arrive as `YYYY-MM-DD`, but the sheet sometimes
/// re-renders them as a full ISO timestamp.
fn parse_wire_date(raw: String) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|t| t.with_timezone(&Utc).date_naive())
}

// ===========================================================================
// Tests
// ===========================================================================
