//! Application state controller.
//!
//! One `AppState` owns the three persisted collections. Every mutation is
//! expressed as a `Mutation` and routed through `apply`, which performs
//! the domain update, writes the affected snapshots synchronously, and
//! returns the deferred effects (sync scheduling) for the embedding shell
//! to execute. Reads go through the role-filtered view helpers.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

use crate::db::{DbState, StoreError};
use crate::models::{
    normalize_email, AppSettings, Order, OrderStatus, PaymentMode, Priority, Role, User,
};
use crate::store;
use crate::wire::RemoteSnapshot;

/// Settle delay before the sync scheduled by an order creation or a
/// roster change; status/assignee edits use the longer delay. Matches the
/// pauses the dashboard has always used to let a mutation settle before
/// pushing.
pub const SYNC_SETTLE_SHORT_MS: u64 = 500;
pub const SYNC_SETTLE_LONG_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Amount cannot be negative")]
    NegativeAmount,
    #[error("Advance cannot be negative")]
    NegativeAdvance,
    #[error("Advance cannot exceed the total amount")]
    AdvanceExceedsAmount,
    #[error("Only an admin can mark a job completed")]
    CompletionRequiresAdmin,
    #[error("Completed jobs can only be updated by an admin")]
    CompletedLocked,
    #[error("Completed jobs cannot be transferred")]
    ReassignCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("User email already exists")]
    DuplicateEmail,
    #[error("You cannot delete your own account")]
    CannotDeleteSelf,
    #[error("Deletion requires confirmation")]
    NotConfirmed,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Mutations and effects
// ---------------------------------------------------------------------------

/// Caller-supplied fields for a new job order.
#[derive(Debug, Clone)]
pub struct NewOrderInput {
    pub customer_name: String,
    pub service_type: String,
    pub amount: f64,
    pub advance: f64,
    pub status: OrderStatus,
    pub priority: Priority,
    pub assigned_to: String,
    pub payment_mode: PaymentMode,
}

/// Every way the application state can change.
#[derive(Debug, Clone)]
pub enum Mutation {
    CreateOrder { input: NewOrderInput, actor: User },
    UpdateOrderStatus { id: String, status: OrderStatus, actor: User },
    ReassignOrder { id: String, assignee: String },
    AddUser { user: User },
    DeleteUser { email: String, actor: User, confirmed: bool },
    UpdateSettings { settings: AppSettings },
    /// Unconditional replacement from a pull; last pull wins.
    ReplaceFromRemote { snapshot: RemoteSnapshot },
}

/// Which snapshot a transition touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Domain {
    Orders,
    Users,
    Settings,
}

/// Deferred work a transition asks the embedding shell to run. Snapshot
/// persistence is executed inside `apply` itself (synchronously, on every
/// mutation); only the sync scheduling crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ScheduleSync { delay_ms: u64 },
}

/// Result of a transition.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    /// For order mutations, the affected order after the transition.
    /// `None` when the id did not match (a no-op by design).
    pub order: Option<Order>,
    pub effects: Vec<Effect>,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

struct AppData {
    orders: Vec<Order>,
    users: Vec<User>,
    settings: AppSettings,
}

pub struct AppState {
    db: Arc<DbState>,
    data: Mutex<AppData>,
}

impl AppState {
    /// Load persisted state (falling back to domain defaults) and write
    /// the hydrated snapshots straight back, so a fresh install persists
    /// its seed data immediately.
    pub fn hydrate(db: Arc<DbState>) -> Self {
        let data = AppData {
            orders: store::load_orders(&db),
            users: store::load_users(&db),
            settings: store::load_settings(&db),
        };
        let state = Self {
            db,
            data: Mutex::new(data),
        };
        state.persist(Domain::Orders);
        state.persist(Domain::Users);
        state.persist(Domain::Settings);
        state
    }

    // -- reads --------------------------------------------------------------

    pub fn orders(&self) -> Vec<Order> {
        self.data.lock().unwrap().orders.clone()
    }

    pub fn users(&self) -> Vec<User> {
        self.data.lock().unwrap().users.clone()
    }

    pub fn settings(&self) -> AppSettings {
        self.data.lock().unwrap().settings.clone()
    }

    /// Full snapshot for the sync push.
    pub fn snapshot(&self) -> (Vec<Order>, Vec<User>, AppSettings) {
        let data = self.data.lock().unwrap();
        (data.orders.clone(), data.users.clone(), data.settings.clone())
    }

    /// Role-filtered order view: admins see everything, staff see only
    /// their own assigned jobs.
    pub fn visible_orders(&self, user: &User) -> Vec<Order> {
        let data = self.data.lock().unwrap();
        if user.role.is_admin() {
            data.orders.clone()
        } else {
            data.orders
                .iter()
                .filter(|o| o.assigned_to == user.email)
                .cloned()
                .collect()
        }
    }

    /// Search within the visible subset: case-insensitive substring match
    /// on customer name or order id.
    pub fn filtered_orders(&self, user: &User, term: &str) -> Vec<Order> {
        let needle = term.to_lowercase();
        self.visible_orders(user)
            .into_iter()
            .filter(|o| {
                o.customer_name.to_lowercase().contains(&needle)
                    || o.id.to_lowercase().contains(&needle)
            })
            .collect()
    }

    // -- the transition -----------------------------------------------------

    /// The single state-transition function. Performs the domain update,
    /// persists the touched snapshots, and returns the deferred effects.
    pub fn apply(&self, mutation: Mutation) -> Result<Applied, AppError> {
        let mut touched: Vec<Domain> = Vec::new();
        let mut applied = Applied::default();

        {
            let mut data = self.data.lock().unwrap();
            match mutation {
                Mutation::CreateOrder { input, actor } => {
                    let order = build_order(&self.db, input, &actor)?;
                    applied.order = Some(order.clone());
                    data.orders.insert(0, order);
                    touched.push(Domain::Orders);
                    applied.effects = sync_effect(&data.settings, SYNC_SETTLE_SHORT_MS);
                }
                Mutation::UpdateOrderStatus { id, status, actor } => {
                    if let Some(order) = data.orders.iter_mut().find(|o| o.id == id) {
                        if !actor.role.is_admin() {
                            if order.status == OrderStatus::Completed {
                                return Err(OrderError::CompletedLocked.into());
                            }
                            if status == OrderStatus::Completed {
                                return Err(OrderError::CompletionRequiresAdmin.into());
                            }
                        }
                        order.status = status;
                        // Stamp on entry to Completed (keeping an existing
                        // stamp), clear on any other status.
                        order.completed_at = if status == OrderStatus::Completed {
                            order.completed_at.or_else(|| Some(Utc::now()))
                        } else {
                            None
                        };
                        applied.order = Some(order.clone());
                    }
                    touched.push(Domain::Orders);
                    applied.effects = sync_effect(&data.settings, SYNC_SETTLE_LONG_MS);
                }
                Mutation::ReassignOrder { id, assignee } => {
                    if let Some(order) = data.orders.iter_mut().find(|o| o.id == id) {
                        if order.status == OrderStatus::Completed {
                            return Err(OrderError::ReassignCompleted.into());
                        }
                        // Not checked against the roster; the reference is
                        // soft by design.
                        order.assigned_to = assignee;
                        applied.order = Some(order.clone());
                    }
                    touched.push(Domain::Orders);
                    applied.effects = sync_effect(&data.settings, SYNC_SETTLE_LONG_MS);
                }
                Mutation::AddUser { user } => {
                    let email = normalize_email(&user.email);
                    if data
                        .users
                        .iter()
                        .any(|u| normalize_email(&u.email) == email)
                    {
                        return Err(UserError::DuplicateEmail.into());
                    }
                    data.users.push(User { email, ..user });
                    touched.push(Domain::Users);
                    applied.effects = sync_effect(&data.settings, SYNC_SETTLE_SHORT_MS);
                }
                Mutation::DeleteUser {
                    email,
                    actor,
                    confirmed,
                } => {
                    if !confirmed {
                        return Err(UserError::NotConfirmed.into());
                    }
                    let email = normalize_email(&email);
                    if email == normalize_email(&actor.email) {
                        return Err(UserError::CannotDeleteSelf.into());
                    }
                    data.users.retain(|u| normalize_email(&u.email) != email);
                    touched.push(Domain::Users);
                    applied.effects = sync_effect(&data.settings, SYNC_SETTLE_SHORT_MS);
                }
                Mutation::UpdateSettings { settings } => {
                    data.settings = settings;
                    touched.push(Domain::Settings);
                }
                Mutation::ReplaceFromRemote { snapshot } => {
                    if let Some(orders) = snapshot.orders {
                        data.orders = orders;
                        touched.push(Domain::Orders);
                    }
                    if let Some(users) = snapshot.users {
                        data.users = users;
                        touched.push(Domain::Users);
                    }
                }
            }
        }

        for domain in touched {
            self.persist(domain);
        }
        Ok(applied)
    }

    // -- convenience wrappers -----------------------------------------------

    pub fn create_order(&self, input: NewOrderInput, actor: &User) -> Result<Applied, AppError> {
        self.apply(Mutation::CreateOrder {
            input,
            actor: actor.clone(),
        })
    }

    pub fn update_order_status(
        &self,
        id: &str,
        status: OrderStatus,
        actor: &User,
    ) -> Result<Applied, AppError> {
        self.apply(Mutation::UpdateOrderStatus {
            id: id.to_string(),
            status,
            actor: actor.clone(),
        })
    }

    pub fn reassign_order(&self, id: &str, assignee: &str) -> Result<Applied, AppError> {
        self.apply(Mutation::ReassignOrder {
            id: id.to_string(),
            assignee: assignee.to_string(),
        })
    }

    pub fn add_user(&self, user: User) -> Result<Applied, AppError> {
        self.apply(Mutation::AddUser { user })
    }

    pub fn delete_user(&self, email: &str, actor: &User, confirmed: bool) -> Result<Applied, AppError> {
        self.apply(Mutation::DeleteUser {
            email: email.to_string(),
            actor: actor.clone(),
            confirmed,
        })
    }

    pub fn update_settings(&self, settings: AppSettings) -> Result<Applied, AppError> {
        self.apply(Mutation::UpdateSettings { settings })
    }

    /// Replace local collections with what a pull returned. Last pull
    /// wins; there is no merge or conflict detection.
    pub fn replace_from_remote(&self, snapshot: RemoteSnapshot) -> Result<Applied, AppError> {
        self.apply(Mutation::ReplaceFromRemote { snapshot })
    }

    /// Persist the last successful sync stamp alongside the snapshots.
    pub fn record_last_sync(&self, stamp: &str) -> Result<(), StoreError> {
        store::save_last_sync(&self.db, stamp)
    }

    // -- persistence --------------------------------------------------------

    /// Write one snapshot. Store failures are logged and swallowed; the
    /// application keeps running on its in-memory state.
    fn persist(&self, domain: Domain) {
        let data = self.data.lock().unwrap();
        let result = match domain {
            Domain::Orders => store::save_orders(&self.db, &data.orders),
            Domain::Users => store::save_users(&self.db, &data.users),
            Domain::Settings => store::save_settings(&self.db, &data.settings),
        };
        if let Err(e) = result {
            warn!(?domain, error = %e, "snapshot persistence failed");
        }
    }
}

/// Validate the input and assemble the new order record.
fn build_order(db: &DbState, input: NewOrderInput, actor: &User) -> Result<Order, AppError> {
    if input.amount < 0.0 {
        return Err(OrderError::NegativeAmount.into());
    }
    if input.advance < 0.0 {
        return Err(OrderError::NegativeAdvance.into());
    }
    if input.advance > input.amount {
        return Err(OrderError::AdvanceExceedsAmount.into());
    }

    // Staff always work their own queue; only admins assign to others.
    let assigned_to = if actor.role == Role::Staff {
        actor.email.clone()
    } else {
        input.assigned_to
    };

    let now = Utc::now();
    Ok(Order {
        id: store::next_order_id(db)?,
        customer_name: input.customer_name,
        service_type: input.service_type,
        status: input.status,
        priority: input.priority,
        amount: input.amount,
        date: now.date_naive(),
        assigned_to,
        advance: input.advance,
        payment_mode: if input.advance > 0.0 {
            input.payment_mode
        } else {
            PaymentMode::Pending
        },
        completed_at: (input.status == OrderStatus::Completed).then_some(now),
    })
}

/// A mutation only schedules a sync when an endpoint is configured.
fn sync_effect(settings: &AppSettings, delay_ms: u64) -> Vec<Effect> {
    if settings.endpoint_url.is_empty() {
        Vec::new()
    } else {
        vec![Effect::ScheduleSync { delay_ms }]
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;
    use crate::store::default_users;

    fn fresh_state() -> AppState {
        let state = AppState::hydrate(Arc::new(test_db_state()));
        // Start from an empty order book; samples are seeded by hydrate.
        state
            .replace_from_remote(RemoteSnapshot {
                orders: Some(Vec::new()),
                users: None,
            })
            .expect("clear orders");
        state
    }

    fn admin() -> User {
        default_users()[0].clone()
    }

    fn staff() -> User {
        default_users()[1].clone()
    }

    fn input() -> NewOrderInput {
        NewOrderInput {
            customer_name: "Asha".to_string(),
            service_type: "Print".to_string(),
            amount: 100.0,
            advance: 50.0,
            status: OrderStatus::Pending,
            priority: Priority::Medium,
            assigned_to: "a@x.com".to_string(),
            payment_mode: PaymentMode::Cash,
        }
    }

    #[test]
    fn create_order_derives_payment_and_prepends() {
        let state = fresh_state();
        let first = state
            .create_order(input(), &admin())
            .expect("create order")
            .order
            .expect("created order");
        assert_eq!(first.payment_mode, PaymentMode::Cash);
        assert_eq!(first.completed_at, None);
        assert_eq!(first.assigned_to, "a@x.com");

        let second = state
            .create_order(input(), &admin())
            .expect("create order")
            .order
            .expect("created order");
        let orders = state.orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, second.id, "newest order sits first");
        assert_ne!(first.id, second.id, "generated ids are unique");
    }

    #[test]
    fn create_order_with_zero_advance_forces_pending_mode() {
        let state = fresh_state();
        let order = state
            .create_order(
                NewOrderInput {
                    advance: 0.0,
                    ..input()
                },
                &admin(),
            )
            .expect("create order")
            .order
            .expect("created order");
        assert_eq!(order.payment_mode, PaymentMode::Pending);
        assert_eq!(order.balance(), 100.0);
    }

    #[test]
    fn create_order_validates_amounts() {
        let state = fresh_state();
        let over = NewOrderInput {
            advance: 150.0,
            ..input()
        };
        assert!(matches!(
            state.create_order(over, &admin()),
            Err(AppError::Order(OrderError::AdvanceExceedsAmount))
        ));

        let negative = NewOrderInput {
            amount: -10.0,
            ..input()
        };
        assert!(matches!(
            state.create_order(negative, &admin()),
            Err(AppError::Order(OrderError::NegativeAmount))
        ));
        assert!(state.orders().is_empty(), "rejected input leaves state unchanged");
    }

    #[test]
    fn create_order_completed_up_front_is_stamped() {
        let state = fresh_state();
        let order = state
            .create_order(
                NewOrderInput {
                    status: OrderStatus::Completed,
                    ..input()
                },
                &admin(),
            )
            .expect("create order")
            .order
            .expect("created order");
        assert!(order.completed_at.is_some());
    }

    #[test]
    fn staff_created_orders_are_self_assigned() {
        let state = fresh_state();
        let me = staff();
        let order = state
            .create_order(input(), &me)
            .expect("create order")
            .order
            .expect("created order");
        assert_eq!(order.assigned_to, me.email, "staff cannot assign to others");
    }

    #[test]
    fn status_updates_maintain_the_completion_stamp() {
        let state = fresh_state();
        let id = state
            .create_order(
                NewOrderInput {
                    status: OrderStatus::Processing,
                    ..input()
                },
                &admin(),
            )
            .expect("create order")
            .order
            .expect("created order")
            .id;

        let done = state
            .update_order_status(&id, OrderStatus::Completed, &admin())
            .expect("complete")
            .order
            .expect("updated order");
        let stamp = done.completed_at.expect("completion stamp set");

        // Completing again keeps the original stamp.
        let again = state
            .update_order_status(&id, OrderStatus::Completed, &admin())
            .expect("re-complete")
            .order
            .expect("updated order");
        assert_eq!(again.completed_at, Some(stamp));

        // Moving away from Completed clears it.
        let reopened = state
            .update_order_status(&id, OrderStatus::Pending, &admin())
            .expect("reopen")
            .order
            .expect("updated order");
        assert_eq!(reopened.completed_at, None);
    }

    #[test]
    fn unknown_order_id_is_a_noop() {
        let state = fresh_state();
        let applied = state
            .update_order_status("ORD-MISSING", OrderStatus::Completed, &admin())
            .expect("no-op update");
        assert!(applied.order.is_none());
        assert!(state.orders().is_empty());
    }

    #[test]
    fn completion_is_admin_only() {
        let state = fresh_state();
        let id = state
            .create_order(input(), &admin())
            .expect("create order")
            .order
            .expect("created order")
            .id;

        assert!(matches!(
            state.update_order_status(&id, OrderStatus::Completed, &staff()),
            Err(AppError::Order(OrderError::CompletionRequiresAdmin))
        ));

        state
            .update_order_status(&id, OrderStatus::Completed, &admin())
            .expect("admin completes");
        assert!(matches!(
            state.update_order_status(&id, OrderStatus::Pending, &staff()),
            Err(AppError::Order(OrderError::CompletedLocked))
        ));
    }

    #[test]
    fn reassign_replaces_assignee_without_roster_check() {
        let state = fresh_state();
        let id = state
            .create_order(input(), &admin())
            .expect("create order")
            .order
            .expect("created order")
            .id;

        let order = state
            .reassign_order(&id, "ghost@nowhere.example")
            .expect("reassign")
            .order
            .expect("updated order");
        assert_eq!(order.assigned_to, "ghost@nowhere.example");

        state
            .update_order_status(&id, OrderStatus::Completed, &admin())
            .expect("complete");
        assert!(matches!(
            state.reassign_order(&id, "rohan@siddhivinayak.com"),
            Err(AppError::Order(OrderError::ReassignCompleted))
        ));
    }

    #[test]
    fn add_user_rejects_case_insensitive_duplicates() {
        let state = fresh_state();
        let dup = User {
            email: "ROHAN@siddhivinayak.com".to_string(),
            name: "Impostor".to_string(),
            role: Role::Staff,
            password: "x".to_string(),
        };
        assert!(matches!(
            state.add_user(dup),
            Err(AppError::User(UserError::DuplicateEmail))
        ));

        let fresh = User {
            email: "New.Hire@Siddhivinayak.com".to_string(),
            name: "New Hire".to_string(),
            role: Role::Staff,
            password: "pass".to_string(),
        };
        state.add_user(fresh).expect("add user");
        let users = state.users();
        assert_eq!(users.len(), 5);
        assert_eq!(
            users[4].email, "new.hire@siddhivinayak.com",
            "emails are stored lowercased"
        );
    }

    #[test]
    fn delete_user_guards() {
        let state = fresh_state();
        let me = admin();

        assert!(matches!(
            state.delete_user("rohan@siddhivinayak.com", &me, false),
            Err(AppError::User(UserError::NotConfirmed))
        ));
        assert!(matches!(
            state.delete_user(&me.email, &me, true),
            Err(AppError::User(UserError::CannotDeleteSelf))
        ));

        state
            .delete_user("Rohan@Siddhivinayak.com", &me, true)
            .expect("delete user");
        assert!(!state
            .users()
            .iter()
            .any(|u| u.email == "rohan@siddhivinayak.com"));
    }

    #[test]
    fn visibility_is_role_filtered() {
        let state = fresh_state();
        let me = staff();
        state.create_order(input(), &me).expect("staff order");
        state.create_order(input(), &admin()).expect("admin order");

        assert_eq!(state.visible_orders(&admin()).len(), 2);
        let mine = state.visible_orders(&me);
        assert_eq!(mine.len(), 1);
        assert!(mine.iter().all(|o| o.assigned_to == me.email));
    }

    #[test]
    fn search_matches_name_or_id_after_visibility() {
        let state = fresh_state();
        let order = state
            .create_order(input(), &admin())
            .expect("create order")
            .order
            .expect("created order");
        state
            .create_order(
                NewOrderInput {
                    customer_name: "Bharat".to_string(),
                    ..input()
                },
                &admin(),
            )
            .expect("create order");

        assert_eq!(state.filtered_orders(&admin(), "asha").len(), 1);
        assert_eq!(state.filtered_orders(&admin(), "ASH").len(), 1);
        let by_id = state.filtered_orders(&admin(), &order.id.to_lowercase());
        assert!(by_id.iter().any(|o| o.id == order.id));
        assert!(state.filtered_orders(&admin(), "zzz").is_empty());

        // Staff search never widens past their visible subset.
        assert!(state.filtered_orders(&staff(), "asha").is_empty());
    }

    #[test]
    fn remote_replacement_is_unconditional_and_persisted() {
        let state = fresh_state();
        state.create_order(input(), &admin()).expect("create order");

        let remote_orders = crate::store::generate_sample_orders(Utc::now());
        state
            .replace_from_remote(RemoteSnapshot {
                orders: Some(remote_orders.clone()),
                users: None,
            })
            .expect("replace");
        assert_eq!(state.orders(), remote_orders, "local edits are overwritten");
        assert_eq!(state.users(), default_users(), "absent side untouched");

        // Replacement is written through to the store.
        assert_eq!(store::load_orders(state.db.as_ref()), remote_orders);
    }

    #[test]
    fn sync_effects_follow_endpoint_configuration() {
        let state = fresh_state();
        let applied = state.create_order(input(), &admin()).expect("create order");
        assert!(applied.effects.is_empty(), "no endpoint, no sync");

        let mut settings = state.settings();
        settings.endpoint_url = "https://script.example/exec".to_string();
        state.update_settings(settings).expect("update settings");

        let applied = state.create_order(input(), &admin()).expect("create order");
        assert_eq!(
            applied.effects,
            vec![Effect::ScheduleSync {
                delay_ms: SYNC_SETTLE_SHORT_MS
            }]
        );

        let id = applied.order.expect("created order").id;
        let applied = state
            .update_order_status(&id, OrderStatus::Processing, &staff())
            .expect("status change");
        assert_eq!(
            applied.effects,
            vec![Effect::ScheduleSync {
                delay_ms: SYNC_SETTLE_LONG_MS
            }]
        );
    }
}
