//! Background refresh task: reload usage, poll the usage API, publish snapshots

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::usage::cache::CacheManager;
use crate::usage::config::{budget_for, get_projects_dir, live_lookback_hours};
use crate::usage::models::{AppConfig, ExternalUsage, UsageEntry};
use crate::usage::oauth::{FailureKind, OAuthError, UsageClient};
use crate::usage::pricing::PricingCalculator;
use crate::usage::reader::ReaderError;
use crate::usage::snapshot::{SnapshotInputs, SnapshotStore, UsageSnapshot};
use crate::usage::staleness::needs_refetch;

/// Minimum spacing between usage API polls
pub const OAUTH_MIN_POLL_SECONDS: i64 = 60;
/// Weekly figures are refreshed at least this often
pub const WEEKLY_REFRESH_MINUTES: i64 = 15;
/// Back-off after a permanent usage API failure
pub const OAUTH_RETRY_MINUTES: i64 = 5;
/// Refresh interval used with the usage API when the default was left unchanged
pub const OAUTH_REFRESH_INTERVAL_SECS: u32 = 60;

const DEFAULT_REFRESH_INTERVAL_SECS: u32 = 30;

/// Usage API poll bookkeeping carried between cycles
#[derive(Debug, Default, Clone)]
pub struct PollState {
    pub cached: Option<ExternalUsage>,
    pub last_fetch: Option<DateTime<Utc>>,
    /// Last weekly figures received
    pub last_weekly_fetch: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub retry_after: Option<DateTime<Utc>>,
    /// Set once the token has expired; only a restart re-enables polling
    pub disabled: bool,
    pub last_error: Option<String>,
}

impl PollState {
    /// Whether this cycle should hit the usage API
    pub fn should_poll(&self, now: DateTime<Utc>, force: bool) -> bool {
        if self.disabled {
            return false;
        }
        if self.retry_after.is_some_and(|at| now < at) {
            return false;
        }

        let Some(last_fetch) = self.last_fetch else {
            return true;
        };
        let weekly_due = self
            .last_weekly_fetch
            .is_some_and(|at| now - at >= Duration::minutes(WEEKLY_REFRESH_MINUTES));

        force
            || now - last_fetch >= Duration::seconds(OAUTH_MIN_POLL_SECONDS)
            || needs_refetch(self.cached.as_ref(), self.last_refresh, now)
            || weekly_due
    }

    pub fn record_success(&mut self, usage: ExternalUsage, now: DateTime<Utc>) {
        self.cached = Some(usage);
        self.last_fetch = Some(now);
        self.last_weekly_fetch = Some(now);
        self.retry_after = None;
        self.last_error = None;
    }

    pub fn record_failure(&mut self, err: &OAuthError, now: DateTime<Utc>) {
        self.last_fetch = Some(now);
        self.last_error = Some(err.to_string());
        match err.kind() {
            FailureKind::TokenExpired => {
                warn!("{}; usage API polling disabled", err);
                self.disabled = true;
                self.cached = None;
            }
            FailureKind::Permanent => {
                warn!("Usage API unavailable, retrying in {} minutes: {}", OAUTH_RETRY_MINUTES, err);
                self.retry_after = Some(now + Duration::minutes(OAUTH_RETRY_MINUTES));
                self.cached = None;
            }
            FailureKind::Transient => {
                debug!("Transient usage API failure, retrying next cycle: {}", err);
            }
        }
    }
}

/// True when the gap since the previous tick exceeds twice the interval,
/// as after a suspend
pub fn is_clock_jump(previous_tick: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_secs: u32) -> bool {
    previous_tick.is_some_and(|prev| now - prev > Duration::seconds(2 * i64::from(interval_secs)))
}

/// Refresh interval for the loop: the default is stretched when the usage API is in use
pub fn effective_refresh_interval(config: &AppConfig, oauth_available: bool) -> u32 {
    if oauth_available && config.refresh_interval_seconds == DEFAULT_REFRESH_INTERVAL_SECS {
        return OAUTH_REFRESH_INTERVAL_SECS;
    }
    config.refresh_interval_seconds
}

/// State owned by the refresh loop
pub struct Refresher {
    config: AppConfig,
    projects_dir: PathBuf,
    cache: CacheManager,
    pricing: PricingCalculator,
    client: Option<UsageClient>,
    poll: PollState,
    entries: Vec<UsageEntry>,
    data_loaded_at: Option<DateTime<Utc>>,
    previous: Option<Arc<UsageSnapshot>>,
}

impl Refresher {
    pub fn new(config: AppConfig) -> Self {
        let projects_dir = get_projects_dir(config.data_path.as_deref());
        let poll = PollState {
            disabled: !config.use_oauth,
            ..Default::default()
        };
        Self {
            config,
            projects_dir,
            cache: CacheManager::new(),
            pricing: PricingCalculator::new(),
            client: None,
            poll,
            entries: Vec::new(),
            data_loaded_at: None,
            previous: None,
        }
    }

    /// Whether the usage API can be used at all
    pub fn oauth_available(&mut self) -> bool {
        !self.poll.disabled && self.ensure_client().is_some()
    }

    /// Build the client on first use; without credentials polling is disabled
    fn ensure_client(&mut self) -> Option<&UsageClient> {
        if self.client.is_none() {
            match UsageClient::from_stored_credentials(self.config.data_path.as_deref()) {
                Ok(client) => {
                    info!(
                        "Usage API enabled ({} subscription)",
                        client.subscription_type().unwrap_or("unknown")
                    );
                    self.client = Some(client);
                }
                Err(e) => {
                    warn!("Usage API disabled: {}", e);
                    self.poll.disabled = true;
                    self.poll.last_error = Some(e.to_string());
                    return None;
                }
            }
        }
        self.client.as_ref()
    }

    async fn poll_usage_api(&mut self, now: DateTime<Utc>, force: bool) {
        if !self.poll.should_poll(now, force) {
            return;
        }
        let Some(client) = self.ensure_client() else {
            return;
        };

        let result = client.fetch_usage().await;

        match result {
            Ok(usage) => {
                debug!(
                    "Usage API: five-hour {:.1}%, seven-day {:.1}%",
                    usage.five_hour.percent_used, usage.seven_day.percent_used
                );
                self.poll.record_success(usage, now);
            }
            Err(e) => self.poll.record_failure(&e, now),
        }
    }

    fn reload_entries(&mut self, now: DateTime<Utc>) -> Result<(), ReaderError> {
        let hours = live_lookback_hours(&self.config);
        self.entries = self.cache.load(&self.projects_dir, hours, now, &self.pricing)?;
        self.data_loaded_at = Some(now);
        Ok(())
    }

    /// Run one cycle at `now` and return the new snapshot.
    ///
    /// A failed reload keeps the previous entries; the snapshot's data age shows it.
    pub async fn refresh(&mut self, now: DateTime<Utc>, force_poll: bool) -> UsageSnapshot {
        if let Err(e) = self.reload_entries(now) {
            warn!("Failed to load usage data from {}: {}", self.projects_dir.display(), e);
        }

        self.poll_usage_api(now, force_poll).await;
        self.poll.last_refresh = Some(now);

        UsageSnapshot::reduce(
            self.previous.as_deref(),
            SnapshotInputs {
                entries: &self.entries,
                external: self.poll.cached.clone(),
                plan_type: &self.config.plan_type,
                budget: budget_for(&self.config),
                now,
                data_loaded_at: self.data_loaded_at.unwrap_or(now),
            },
        )
    }

    fn remember(&mut self, snapshot: Arc<UsageSnapshot>) {
        self.previous = Some(snapshot);
    }
}

/// Callback invoked with each published snapshot
pub type SnapshotListener = Box<dyn Fn(&UsageSnapshot) + Send + Sync>;

/// Start the background refresh task.
///
/// Runs one cycle immediately, then every `refresh_interval_secs`. Stops when
/// `shutdown` fires or its sender is dropped.
pub fn start_background_refresh(
    mut refresher: Refresher,
    store: Arc<SnapshotStore>,
    refresh_interval_secs: u32,
    listener: Option<SnapshotListener>,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(StdDuration::from_secs(u64::from(refresh_interval_secs.max(1))));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous_tick: Option<DateTime<Utc>> = None;

        info!("Refreshing usage every {}s", refresh_interval_secs);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    info!("Background refresh shutting down");
                    break;
                }
            }

            let now = Utc::now();
            let force_poll = is_clock_jump(previous_tick, now, refresh_interval_secs);
            if force_poll {
                info!("Clock jumped since the last refresh, forcing a usage API poll");
            }
            previous_tick = Some(now);

            let snapshot = store.publish(refresher.refresh(now, force_poll).await);
            if let Some(listener) = &listener {
                listener(&snapshot);
            }
            debug!(
                "Published snapshot: {} windows, {:.1} tokens/min",
                snapshot.windows.len(),
                snapshot.velocity.tokens_per_minute
            );
            refresher.remember(snapshot);
        }
    })
}
