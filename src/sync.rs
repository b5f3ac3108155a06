//! Push-then-pull sync engine for the spreadsheet mirror.
//!
//! Every attempt runs the same cycle: serialize the full local snapshot
//! and POST it to the configured endpoint (the response is discarded,
//! so the write is deliberately unconfirmed), wait a fixed settle delay,
//! then GET the endpoint and unconditionally replace local state with
//! whatever came back. Last pull wins; there is no merge, no conflict
//! detection, and no guard against overlapping attempts. A failed pull
//! leaves local state at its push-time value.

use chrono::Local;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::app::{AppState, Effect};
use crate::db::DbState;
use crate::models::AppSettings;
use crate::store;
use crate::wire::{self, WireError};

/// Timeout for both legs of the cycle.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between push and pull, giving the remote script time to persist
/// the write. Empirical, not a guaranteed barrier.
const PUSH_SETTLE_DELAY: Duration = Duration::from_millis(1_500);

/// Background auto-sync interval.
pub const AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Sync failure kinds. Connectivity failures get their own user-facing
/// message; server and parse failures share the generic "Sync Failed"
/// class, with the detail kept for logs.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid URL. Check Settings.")]
    InvalidEndpoint,
    #[error("Connection Failed. Check Internet.")]
    Connection,
    #[error("Sync Failed. Server Error.")]
    Server,
    #[error("Sync Failed. Server Error.")]
    Parse(#[from] WireError),
}

/// Marker for the fire-and-forget backup write. The transport discards
/// the HTTP response, so "sent" can never be mistaken for "persisted
/// remotely".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconfirmedWrite;

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// Where an attempt currently is in the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Pushing,
    Pulling,
}

/// Shared state for the sync engine: the periodic-loop gate, the last
/// successful sync stamp, and the observable phase.
pub struct SyncState {
    pub is_running: Arc<AtomicBool>,
    pub last_sync: Arc<Mutex<Option<String>>>,
    phase: Mutex<SyncPhase>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            is_running: Arc::new(AtomicBool::new(false)),
            last_sync: Arc::new(Mutex::new(None)),
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    /// Engine state seeded with the persisted last-sync stamp.
    pub fn hydrate(db: &DbState) -> Self {
        let state = Self::new();
        if let Some(stamp) = store::load_last_sync(db) {
            if let Ok(mut guard) = state.last_sync.lock() {
                *guard = Some(stamp);
            }
        }
        state
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.lock().map(|p| *p).unwrap_or(SyncPhase::Idle)
    }

    fn set_phase(&self, phase: SyncPhase) {
        if let Ok(mut guard) = self.phase.lock() {
            *guard = phase;
        }
    }

    pub fn last_sync(&self) -> Option<String> {
        self.last_sync.lock().ok().and_then(|guard| guard.clone())
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Endpoint validation and error classification
// ---------------------------------------------------------------------------

/// The endpoint must be configured with an http-prefixed, parseable URL.
fn validated_endpoint(settings: &AppSettings) -> Result<String, SyncError> {
    let url = settings.endpoint_url.trim();
    if !url.starts_with("http") {
        return Err(SyncError::InvalidEndpoint);
    }
    reqwest::Url::parse(url).map_err(|_| SyncError::InvalidEndpoint)?;
    Ok(url.to_string())
}

/// Collapse a transport failure into the connectivity-vs-server split the
/// banner shows.
fn classify_transport(url: &str, err: &reqwest::Error) -> SyncError {
    if err.is_connect() || err.is_timeout() {
        warn!(url, error = %err, "cannot reach sync endpoint");
        SyncError::Connection
    } else {
        warn!(url, error = %err, "sync transport error");
        SyncError::Server
    }
}

// ---------------------------------------------------------------------------
// The cycle
// ---------------------------------------------------------------------------

/// Run one full sync attempt against the configured endpoint.
///
/// `silent` marks background attempts: failures are still returned, but
/// callers log them instead of surfacing a banner. Returns the
/// human-readable stamp recorded for a successful attempt.
pub async fn sync_once(
    app: &AppState,
    state: &SyncState,
    silent: bool,
) -> Result<String, SyncError> {
    let settings = app.settings();
    let endpoint = match validated_endpoint(&settings) {
        Ok(url) => url,
        Err(e) => {
            if silent {
                debug!("sync skipped: endpoint not configured");
            } else {
                warn!("sync rejected: endpoint not configured");
            }
            return Err(e);
        }
    };

    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| {
            warn!(error = %e, "failed to create HTTP client");
            SyncError::Server
        })?;

    state.set_phase(SyncPhase::Pushing);
    let result = run_cycle(&client, &endpoint, app, state).await;
    state.set_phase(SyncPhase::Idle);

    match &result {
        Ok(stamp) => info!(%stamp, silent, "sync complete"),
        Err(e) => warn!(error = %e, silent, "sync failed"),
    }
    result
}

async fn run_cycle(
    client: &Client,
    endpoint: &str,
    app: &AppState,
    state: &SyncState,
) -> Result<String, SyncError> {
    // 1. PUSH the full local snapshot. Best effort; outcome unknown.
    let (orders, users, _) = app.snapshot();
    let payload = wire::push_payload(&orders, &users);
    let UnconfirmedWrite = push_backup(client, endpoint, &payload).await?;
    debug!(orders = orders.len(), users = users.len(), "backup pushed (unconfirmed)");

    // 2. Give the remote side time to persist the write.
    tokio::time::sleep(PUSH_SETTLE_DELAY).await;

    // 3. PULL whatever the remote now holds.
    state.set_phase(SyncPhase::Pulling);
    let body = pull_snapshot(client, endpoint).await?;

    // 4. Unconditional replacement of any collection the body carried.
    let snapshot = wire::decode_envelope(&body)?;
    if let Some(n) = snapshot.orders.as_ref().map(Vec::len) {
        info!(orders = n, "replacing local orders from remote");
    }
    if let Some(n) = snapshot.users.as_ref().map(Vec::len) {
        info!(users = n, "replacing local users from remote");
    }
    app.replace_from_remote(snapshot).map_err(|e| {
        warn!(error = %e, "failed to apply remote snapshot");
        SyncError::Server
    })?;

    // 5. Record the stamp. A store failure here is not a sync failure.
    let stamp = store::sync_stamp(Local::now());
    if let Err(e) = app.record_last_sync(&stamp) {
        warn!(error = %e, "could not persist last-sync stamp");
    }
    if let Ok(mut guard) = state.last_sync.lock() {
        *guard = Some(stamp.clone());
    }
    Ok(stamp)
}

/// POST the backup payload as plain text and discard the response. Only a
/// transport-level failure is observable; HTTP status is deliberately
/// ignored.
async fn push_backup(
    client: &Client,
    endpoint: &str,
    payload: &Value,
) -> Result<UnconfirmedWrite, SyncError> {
    client
        .post(endpoint)
        .header(CONTENT_TYPE, "text/plain")
        .body(payload.to_string())
        .send()
        .await
        .map(|_| UnconfirmedWrite)
        .map_err(|e| classify_transport(endpoint, &e))
}

/// GET the current remote state as JSON.
async fn pull_snapshot(client: &Client, endpoint: &str) -> Result<Value, SyncError> {
    let resp = client
        .get(endpoint)
        .send()
        .await
        .map_err(|e| classify_transport(endpoint, &e))?;

    let status = resp.status();
    if !status.is_success() {
        warn!(status = status.as_u16(), "pull rejected by endpoint");
        return Err(SyncError::Server);
    }

    let text = resp.text().await.map_err(|e| classify_transport(endpoint, &e))?;
    serde_json::from_str(&text).map_err(|e| {
        warn!(error = %e, "pull body is not valid JSON");
        SyncError::Server
    })
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// Silent sync at application start, skipped unless an endpoint is
/// already configured.
pub fn sync_on_startup(app: Arc<AppState>, state: Arc<SyncState>) {
    if !app.settings().endpoint_url.trim().starts_with("http") {
        return;
    }
    tokio::spawn(async move {
        let _ = sync_once(&app, &state, true).await;
    });
}

/// Start the periodic auto-sync loop. Runs until `stop_periodic_sync`
/// flips the gate; cycles where no endpoint is configured are skipped.
pub fn start_periodic_sync(app: Arc<AppState>, state: Arc<SyncState>, interval: Duration) {
    let is_running = state.is_running.clone();
    is_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "auto-sync loop started");
        loop {
            tokio::time::sleep(interval).await;
            if !is_running.load(Ordering::SeqCst) {
                info!("auto-sync loop stopped");
                break;
            }
            if app.settings().endpoint_url.is_empty() {
                continue;
            }
            debug!("auto-sync tick");
            let _ = sync_once(&app, &state, true).await;
        }
    });
}

/// Tear down the periodic loop. The current cycle, if one is in flight,
/// runs to completion; there is no cancellation of an active attempt.
pub fn stop_periodic_sync(state: &SyncState) {
    state.is_running.store(false, Ordering::SeqCst);
}

/// Execute the deferred effects of a mutation. Each `ScheduleSync`
/// spawns its own independent delayed attempt; nothing is coalesced, so
/// two rapid mutations produce two delayed syncs.
pub fn run_effects(app: &Arc<AppState>, state: &Arc<SyncState>, effects: &[Effect]) {
    for effect in effects {
        match effect {
            Effect::ScheduleSync { delay_ms } => {
                schedule_sync(
                    Arc::clone(app),
                    Arc::clone(state),
                    Duration::from_millis(*delay_ms),
                );
            }
        }
    }
}

/// Spawn one delayed silent sync.
pub fn schedule_sync(app: Arc<AppState>, state: Arc<SyncState>, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = sync_once(&app, &state, true).await;
    });
}

// ===========================================================================
// Tests
// ===========================================================================
