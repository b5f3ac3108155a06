//! Local Store: named JSON snapshots over the key/value table.
//!
//! Each domain (orders, users, settings) persists independently under its
//! own key and is rewritten in full whenever the in-memory collection
//! changes. Loads defend against absent, malformed, or legacy "too small"
//! blobs by silently falling back to a domain default; persistence
//! problems are logged and never surfaced to the interactive user.

use chrono::{DateTime, Duration, Local, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::db::{self, DbState, StoreError};
use crate::models::{AppSettings, Order, OrderStatus, PaymentMode, Priority, Role, User};

// Persisted record keys
pub const KEY_ORDERS: &str = "app_orders";
pub const KEY_USERS: &str = "app_users";
pub const KEY_SETTINGS: &str = "app_settings";
pub const KEY_LAST_SYNC: &str = "last_backup_time";
const KEY_ORDER_COUNTER: &str = "order_counter";

/// Legacy blobs with this many orders or fewer are treated as stale seed
/// data and replaced with a fresh sample set.
const MIN_SAVED_ORDERS: usize = 3;
/// A roster needs at least an admin plus one staff row to be trusted.
const MIN_SAVED_USERS: usize = 2;

// ---------------------------------------------------------------------------
// Generic snapshot helpers
// ---------------------------------------------------------------------------

fn read_snapshot<T: DeserializeOwned>(state: &DbState, key: &str) -> Option<T> {
    let conn = match state.conn.lock() {
        Ok(c) => c,
        Err(e) => {
            warn!(key, error = %e, "store: connection lock poisoned on read");
            return None;
        }
    };
    let raw = db::get_record(&conn, key)?;
    match serde_json::from_str::<T>(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "store: malformed snapshot, using default");
            None
        }
    }
}

fn write_snapshot<T: Serialize>(state: &DbState, key: &str, value: &T) -> Result<(), StoreError> {
    let serialized = serde_json::to_string(value)
        .map_err(|e| StoreError::Poisoned(format!("serialize {key}: {e}")))?;
    let conn = state
        .conn
        .lock()
        .map_err(|e| StoreError::Poisoned(e.to_string()))?;
    db::set_record(&conn, key, &serialized)
}

// ---------------------------------------------------------------------------
// Domain snapshots
// ---------------------------------------------------------------------------

/// Load the order collection, falling back to a generated sample set when
/// the blob is absent, malformed, or holds stale seed data.
pub fn load_orders(state: &DbState) -> Vec<Order> {
    match read_snapshot::<Vec<Order>>(state, KEY_ORDERS) {
        Some(orders) if orders.len() >= MIN_SAVED_ORDERS => orders,
        Some(orders) => {
            debug!(count = orders.len(), "store: undersized order blob, regenerating samples");
            generate_sample_orders(Utc::now())
        }
        None => generate_sample_orders(Utc::now()),
    }
}

/// Load the user roster, falling back to the default staff roster.
pub fn load_users(state: &DbState) -> Vec<User> {
    match read_snapshot::<Vec<User>>(state, KEY_USERS) {
        Some(users) if users.len() >= MIN_SAVED_USERS => users,
        _ => default_users(),
    }
}

/// Load shop settings, falling back to defaults.
pub fn load_settings(state: &DbState) -> AppSettings {
    read_snapshot::<AppSettings>(state, KEY_SETTINGS).unwrap_or_default()
}

pub fn save_orders(state: &DbState, orders: &[Order]) -> Result<(), StoreError> {
    write_snapshot(state, KEY_ORDERS, &orders)
}

pub fn save_users(state: &DbState, users: &[User]) -> Result<(), StoreError> {
    write_snapshot(state, KEY_USERS, &users)
}

pub fn save_settings(state: &DbState, settings: &AppSettings) -> Result<(), StoreError> {
    write_snapshot(state, KEY_SETTINGS, settings)
}

/// Human-readable time of the last successful sync, if any.
pub fn load_last_sync(state: &DbState) -> Option<String> {
    let conn = state.conn.lock().ok()?;
    db::get_record(&conn, KEY_LAST_SYNC)
}

pub fn save_last_sync(state: &DbState, stamp: &str) -> Result<(), StoreError> {
    let conn = state
        .conn
        .lock()
        .map_err(|e| StoreError::Poisoned(e.to_string()))?;
    db::set_record(&conn, KEY_LAST_SYNC, stamp)
}

// ---------------------------------------------------------------------------
// Order number generation
// ---------------------------------------------------------------------------

/// Generate a sequential order number in format ORD-DDMMYYYY-NNNNN.
///
/// Uses the `order_counter` record as a persistent counter; the counter
/// survives remote replacements, so regenerated ids never collide with
/// rows pulled back from the mirror.
pub fn next_order_id(state: &DbState) -> Result<String, StoreError> {
    let conn = state
        .conn
        .lock()
        .map_err(|e| StoreError::Poisoned(e.to_string()))?;

    let current: i64 = db::get_record(&conn, KEY_ORDER_COUNTER)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    let next = current + 1;
    db::set_record(&conn, KEY_ORDER_COUNTER, &next.to_string())?;

    let date_display = Local::now().format("%d%m%Y");
    Ok(format!("ORD-{date_display}-{next:05}"))
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn user(email: &str, name: &str, role: Role, password: &str) -> User {
    User {
        email: email.to_string(),
        name: name.to_string(),
        role,
        password: password.to_string(),
    }
}

/// The bootstrap roster. The first entry is the fallback admin that must
/// always remain able to log in (see `auth::default_admin`).
pub fn default_users() -> Vec<User> {
    vec![
        user("admin@siddhivinayak.com", "System Admin", Role::Admin, "admin123"),
        user("rohan@siddhivinayak.com", "Rohan Verma", Role::Staff, "staff"),
        user("priya@siddhivinayak.com", "Priya Desai", Role::Staff, "staff"),
        user("amit@siddhivinayak.com", "Amit Kumar", Role::Staff, "staff"),
    ]
}

const SAMPLE_SERVICES: &[&str] = &[
    "Thesis Binding",
    "A4 Color Print",
    "Visiting Cards",
    "Poster Printing",
    "Lamination",
    "Xerox Bulk",
    "Project Design",
    "Invitation Cards",
];

/// Generate the demo order book: 20 jobs spread over the trailing week,
/// front-loaded with completed work so the overview has data to show.
pub fn generate_sample_orders(now: DateTime<Utc>) -> Vec<Order> {
    let today = now.date_naive();
    let roster = default_users();
    let mut orders = Vec::with_capacity(20);

    for i in 0..20u32 {
        let days_ago = (i * 3) % 7;
        let date = today - Duration::days(i64::from(days_ago));

        let status = if i < 8 {
            OrderStatus::Completed
        } else if i < 14 {
            OrderStatus::Processing
        } else {
            OrderStatus::Pending
        };

        let amount = f64::from(50 + (i * 397) % 2000);
        let advance = if i % 2 == 0 { (amount / 2.0).floor() } else { 0.0 };
        let payment_mode = if advance > 0.0 {
            if i % 4 == 0 {
                PaymentMode::Online
            } else {
                PaymentMode::Cash
            }
        } else {
            PaymentMode::Pending
        };

        let priority = match i % 3 {
            0 => Priority::Low,
            1 => Priority::Medium,
            _ => Priority::High,
        };

        let assignee = &roster[(i as usize) % roster.len()];

        orders.push(Order {
            id: format!("ORD-{}", 1050 + i),
            customer_name: format!("Customer {}", i + 1),
            service_type: SAMPLE_SERVICES[(i as usize) % SAMPLE_SERVICES.len()].to_string(),
            status,
            priority,
            amount,
            date,
            assigned_to: assignee.email.clone(),
            advance,
            payment_mode,
            completed_at: (status == OrderStatus::Completed).then_some(now),
        });
    }

    orders
}

/// Formats `now` the way the dashboard has always shown sync times.
pub fn sync_stamp(now: DateTime<Local>) -> String {
    now.format("%-I:%M:%S %p").to_string()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;

    fn seed_raw(state: &DbState, key: &str, raw: &str) {
        let conn = state.conn.lock().expect("db lock");
        db::set_record(&conn, key, raw).expect("seed record");
    }

    #[test]
    fn load_orders_falls_back_on_absent_and_malformed_blobs() {
        let state = test_db_state();
        assert_eq!(load_orders(&state).len(), 20, "absent blob yields samples");

        seed_raw(&state, KEY_ORDERS, "{not json");
        assert_eq!(load_orders(&state).len(), 20, "malformed blob yields samples");
    }

    #[test]
    fn load_orders_replaces_undersized_legacy_blobs() {
        let state = test_db_state();
        let two: Vec<Order> = generate_sample_orders(Utc::now()).into_iter().take(2).collect();
        save_orders(&state, &two).expect("save orders");
        assert_eq!(load_orders(&state).len(), 20);

        let three: Vec<Order> = generate_sample_orders(Utc::now()).into_iter().take(3).collect();
        save_orders(&state, &three).expect("save orders");
        assert_eq!(load_orders(&state).len(), 3, "3+ saved orders are trusted");
    }

    #[test]
    fn orders_roundtrip_through_the_store() {
        let state = test_db_state();
        let orders = generate_sample_orders(Utc::now());
        save_orders(&state, &orders).expect("save orders");
        assert_eq!(load_orders(&state), orders);
    }

    #[test]
    fn load_users_falls_back_to_default_roster() {
        let state = test_db_state();
        assert_eq!(load_users(&state), default_users());

        // A single surviving row (e.g. after a bad sync) is not trusted.
        save_users(&state, &default_users()[..1]).expect("save users");
        assert_eq!(load_users(&state), default_users());

        let mut roster = default_users();
        roster.truncate(2);
        save_users(&state, &roster).expect("save users");
        assert_eq!(load_users(&state), roster);
    }

    #[test]
    fn settings_roundtrip_and_default() {
        let state = test_db_state();
        assert_eq!(load_settings(&state), AppSettings::default());

        let settings = AppSettings {
            shop_name: "Print Hub".to_string(),
            currency_symbol: "$".to_string(),
            endpoint_url: "https://script.example/exec".to_string(),
        };
        save_settings(&state, &settings).expect("save settings");
        assert_eq!(load_settings(&state), settings);
    }

    #[test]
    fn last_sync_roundtrip() {
        let state = test_db_state();
        assert_eq!(load_last_sync(&state), None);
        save_last_sync(&state, "10:42:07 AM").expect("save stamp");
        assert_eq!(load_last_sync(&state).as_deref(), Some("10:42:07 AM"));
    }

    #[test]
    fn next_order_id_increments_and_formats() {
        let state = test_db_state();
        let first = next_order_id(&state).expect("first id");
        let second = next_order_id(&state).expect("second id");
        assert!(first.starts_with("ORD-"), "unexpected id: {first}");
        assert!(first.ends_with("-00001"), "unexpected id: {first}");
        assert!(second.ends_with("-00002"), "unexpected id: {second}");
        assert_ne!(first, second);
    }

    #[test]
    fn sample_orders_respect_domain_invariants() {
        let now = Utc::now();
        let orders = generate_sample_orders(now);
        assert_eq!(orders.len(), 20);

        for o in &orders {
            assert!(o.amount >= 0.0);
            assert!(o.advance >= 0.0 && o.advance <= o.amount, "advance within amount: {}", o.id);
            assert_eq!(
                o.completed_at.is_some(),
                o.status == OrderStatus::Completed,
                "completion stamp invariant: {}",
                o.id
            );
            assert_eq!(
                o.payment_mode == PaymentMode::Pending,
                o.advance == 0.0,
                "payment mode invariant: {}",
                o.id
            );
            assert!(o.date <= now.date_naive());
        }

        let ids: std::collections::HashSet<_> = orders.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids.len(), orders.len(), "sample ids must be unique");
    }
}
