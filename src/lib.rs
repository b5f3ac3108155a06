//! Shopdesk - order-management core for a single print shop.
//!
//! Staff log in against a locally persisted roster, create and track job
//! orders, and an admin manages accounts plus a best-effort cloud mirror:
//! every local mutation is persisted immediately and followed by a
//! debounce-style push-then-pull sync against a spreadsheet-backed
//! endpoint. The rendering shell on top of this crate is deliberately
//! out of scope; everything here is the state, persistence, auth, and
//! sync machinery it calls into.

use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod app;
pub mod auth;
pub mod db;
pub mod models;
pub mod reports;
pub mod store;
pub mod sync;
pub mod wire;

pub use app::{AppError, AppState, Applied, Effect, Mutation, NewOrderInput, OrderError, UserError};
pub use auth::{AuthError, SessionState};
pub use db::{DbState, StoreError};
pub use models::{AppSettings, Order, OrderStatus, PaymentMode, Priority, Role, User};
pub use reports::{DailySales, DashboardStats};
pub use sync::{SyncError, SyncPhase, SyncState, UnconfirmedWrite};

/// Initialize structured logging (console + rolling file).
///
/// Safe to call once per process; panics if a global subscriber is
/// already installed.
pub fn init_logging(log_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shopdesk=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "shopdesk");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the app - dropping it
    // flushes logs. We leak it intentionally since logging runs until
    // process exit.
    std::mem::forget(guard);

    info!("Starting Shopdesk v{}", env!("CARGO_PKG_VERSION"));
}

/// Everything a shell needs to drive the dashboard: hydrated state, the
/// login session, and the sync engine with its startup triggers fired.
pub struct AppContext {
    pub app: Arc<AppState>,
    pub session: SessionState,
    pub sync: Arc<SyncState>,
}

impl AppContext {
    /// Open the store under `data_dir`, hydrate application state from
    /// the persisted snapshots (falling back to seeded defaults), and
    /// start the sync triggers: one silent sync now if an endpoint is
    /// configured, plus the 10-minute auto-sync loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bootstrap(data_dir: &Path) -> Result<Self, StoreError> {
        let db = Arc::new(db::init(data_dir)?);
        let sync_state = Arc::new(SyncState::hydrate(&db));
        let app = Arc::new(AppState::hydrate(db));

        sync::sync_on_startup(Arc::clone(&app), Arc::clone(&sync_state));
        sync::start_periodic_sync(
            Arc::clone(&app),
            Arc::clone(&sync_state),
            sync::AUTO_SYNC_INTERVAL,
        );

        Ok(Self {
            app,
            session: SessionState::new(),
            sync: sync_state,
        })
    }

    /// Run a mutation's deferred effects (the delayed follow-up syncs).
    pub fn run_effects(&self, applied: &Applied) {
        sync::run_effects(&self.app, &self.sync, &applied.effects);
    }

    /// Interactive "sync now": errors are returned for the caller's
    /// banner instead of being swallowed.
    pub async fn sync_now(&self) -> Result<String, SyncError> {
        sync::sync_once(&self.app, &self.sync, false).await
    }

    /// Tear down the periodic loop (e.g. on shell shutdown). In-flight
    /// attempts run to completion.
    pub fn shutdown(&self) {
        sync::stop_periodic_sync(&self.sync);
        info!("Shopdesk context shut down");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
