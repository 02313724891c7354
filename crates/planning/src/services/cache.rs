//! Key-addressed query cache with stale-while-revalidate reads and request
//! de-duplication.
//!
//! Every remote read goes through [`QueryCache::get_or_fetch`]. Entries keep
//! the last known good value even across failed reloads, and a per-entry
//! version guards against slow responses landing on top of newer writes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use api::client::PlanningApiError;
use api::models::deadline_task::DeadlineTask;
use api::models::planning_task::PlanningTask;
use api::models::project::Project;
use api::models::quarter::Quarter;
use api::models::user::User;
use backon::{ExponentialBuilder, Retryable};
use strum_macros::Display;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::services::config::PlanningConfig;

/// Cache key: the resource kind plus the parameters that scope it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Users,
    Projects,
    PlanningTasks(Quarter),
    DeadlineTasks(Quarter),
    UserSetting(String),
    AppSetting(String),
}

impl QueryKey {
    /// Quarter-scoped task data goes stale quickly; reference data and
    /// settings are allowed to linger.
    fn is_task_data(&self) -> bool {
        matches!(self, Self::PlanningTasks(_) | Self::DeadlineTasks(_))
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Projects => "projects",
            Self::PlanningTasks(_) => "planning-tasks",
            Self::DeadlineTasks(_) => "deadline-tasks",
            Self::UserSetting(_) => "user-setting",
            Self::AppSetting(_) => "app-setting",
        }
    }
}

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum QueryStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

/// Last known good value for a key, closed over the resource kinds the
/// planning screens consume. `Setting(None)` caches "never set".
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Users(Vec<User>),
    Projects(Vec<Project>),
    PlanningTasks(Vec<PlanningTask>),
    DeadlineTasks(Vec<DeadlineTask>),
    Setting(Option<String>),
}

/// Consumer-facing view of one entry.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub data: Option<CacheValue>,
    pub status: QueryStatus,
    pub error: Option<PlanningApiError>,
}

/// Per-call load options. The default defers to the configured staleness
/// windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Staleness window the committed value gets, instead of the per-kind
    /// window from the config.
    pub staleness_override: Option<Duration>,
}

#[derive(Default)]
struct Entry {
    data: Option<CacheValue>,
    status: QueryStatus,
    error: Option<PlanningApiError>,
    /// `None` means stale.
    stale_at: Option<Instant>,
    /// Bumped by every commit, cancellation, direct write and invalidation,
    /// so a load that started under an older version cannot commit.
    version: u64,
}

fn fresh_value(entry: &Entry) -> Option<CacheValue> {
    match (&entry.data, entry.stale_at) {
        (Some(value), Some(stale_at)) if Instant::now() < stale_at => Some(value.clone()),
        _ => None,
    }
}

struct CacheInner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    /// Per-key in-flight locks. The leader of a load holds the lock for the
    /// duration of the call; concurrent readers of the same key queue here
    /// and pick up the leader's outcome instead of dialing the network.
    inflight: Mutex<HashMap<QueryKey, Arc<Mutex<()>>>>,
    config: PlanningConfig,
}

/// Shared query cache. Cloning hands out another handle to the same store.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(config: PlanningConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                config,
            }),
        }
    }

    fn window_for(&self, key: &QueryKey) -> Duration {
        if key.is_task_data() {
            self.inner.config.task_staleness
        } else {
            self.inner.config.reference_staleness
        }
    }

    /// Serve `key` from memory when fresh, otherwise load it via `loader`.
    ///
    /// A stale entry that still holds data is returned immediately while a
    /// background revalidation runs. Concurrent callers of the same key
    /// share a single load. A failed load keeps the previous data and
    /// records the error on the entry.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: QueryKey,
        loader: F,
    ) -> Result<CacheValue, PlanningApiError>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheValue, PlanningApiError>> + Send + 'static,
    {
        self.get_or_fetch_with(key, LoadOptions::default(), loader)
            .await
    }

    pub async fn get_or_fetch_with<F, Fut>(
        &self,
        key: QueryKey,
        options: LoadOptions,
        loader: F,
    ) -> Result<CacheValue, PlanningApiError>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheValue, PlanningApiError>> + Send + 'static,
    {
        enum FastPath {
            Fresh(CacheValue),
            Stale(CacheValue),
            Miss,
        }

        let fast = {
            let mut entries = self.inner.entries.lock().await;
            let entry = entries.entry(key.clone()).or_default();
            if let Some(value) = fresh_value(entry) {
                FastPath::Fresh(value)
            } else if let Some(value) = entry.data.clone() {
                FastPath::Stale(value)
            } else {
                FastPath::Miss
            }
        };

        match fast {
            FastPath::Fresh(value) => {
                debug!(key = key.label(), "cache hit");
                Ok(value)
            }
            FastPath::Stale(value) => {
                // Previous data stays visible while the reload runs. Skip
                // the spawn when a load already holds the key's gate.
                let gate = self.gate(&key).await;
                if gate.try_lock().is_ok() {
                    debug!(key = key.label(), "serving stale value, revalidating");
                    self.spawn_revalidate(key, options, loader);
                }
                Ok(value)
            }
            FastPath::Miss => self.load(key, options, loader).await,
        }
    }

    /// Force the next read of `key` to revalidate.
    pub async fn invalidate(&self, key: &QueryKey) {
        let mut entries = self.inner.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.stale_at = None;
            // A response that raced the invalidation must not land fresh.
            entry.version = entry.version.wrapping_add(1);
            debug!(key = key.label(), "invalidated");
        }
    }

    /// Drop interest in any in-flight load for `key`. The transport call is
    /// not aborted; its response is discarded at commit time instead, so it
    /// cannot overwrite values written after the cancellation.
    pub async fn cancel_inflight(&self, key: &QueryKey) {
        let mut entries = self.inner.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.version = entry.version.wrapping_add(1);
            if entry.status == QueryStatus::Loading {
                entry.status = if entry.data.is_some() {
                    QueryStatus::Success
                } else {
                    QueryStatus::Idle
                };
            }
        }
    }

    /// Direct write used by the optimistic-update path. The entry comes out
    /// successful and fresh until something invalidates it.
    pub async fn overwrite(&self, key: QueryKey, value: CacheValue) {
        let window = self.window_for(&key);
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.entry(key).or_default();
        entry.version = entry.version.wrapping_add(1);
        entry.data = Some(value);
        entry.status = QueryStatus::Success;
        entry.error = None;
        entry.stale_at = Some(Instant::now() + window);
    }

    /// Put a snapshot taken with [`QueryCache::data`] back, for rollback.
    /// The restored entry is stale so the next read revalidates.
    pub async fn restore(&self, key: QueryKey, snapshot: Option<CacheValue>) {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.entry(key).or_default();
        entry.version = entry.version.wrapping_add(1);
        entry.error = None;
        entry.stale_at = None;
        match snapshot {
            Some(value) => {
                entry.data = Some(value);
                entry.status = QueryStatus::Success;
            }
            None => {
                entry.data = None;
                entry.status = QueryStatus::Idle;
            }
        }
    }

    /// Snapshot of the current data for `key`, without touching freshness.
    pub async fn data(&self, key: &QueryKey) -> Option<CacheValue> {
        let entries = self.inner.entries.lock().await;
        entries.get(key).and_then(|entry| entry.data.clone())
    }

    /// Full polling view for `key`.
    pub async fn state(&self, key: &QueryKey) -> QueryState {
        let entries = self.inner.entries.lock().await;
        match entries.get(key) {
            Some(entry) => QueryState {
                data: entry.data.clone(),
                status: entry.status,
                error: entry.error.clone(),
            },
            None => QueryState {
                data: None,
                status: QueryStatus::Idle,
                error: None,
            },
        }
    }

    /// True when the next read of `key` would revalidate.
    pub async fn is_stale(&self, key: &QueryKey) -> bool {
        let entries = self.inner.entries.lock().await;
        entries.get(key).is_none_or(|entry| match entry.stale_at {
            Some(stale_at) => Instant::now() >= stale_at,
            None => true,
        })
    }

    async fn gate(&self, key: &QueryKey) -> Arc<Mutex<()>> {
        let mut inflight = self.inner.inflight.lock().await;
        Arc::clone(
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn spawn_revalidate<F, Fut>(&self, key: QueryKey, options: LoadOptions, loader: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheValue, PlanningApiError>> + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(error) = cache.load(key.clone(), options, loader).await {
                warn!(key = key.label(), %error, "background revalidation failed");
            }
        });
    }

    async fn load<F, Fut>(
        &self,
        key: QueryKey,
        options: LoadOptions,
        loader: F,
    ) -> Result<CacheValue, PlanningApiError>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<CacheValue, PlanningApiError>> + Send + 'static,
    {
        let gate = self.gate(&key).await;
        let version_at_enqueue = {
            let entries = self.inner.entries.lock().await;
            entries.get(&key).map(|entry| entry.version).unwrap_or(0)
        };
        let _permit = gate.lock().await;

        let lead_version = {
            let mut entries = self.inner.entries.lock().await;
            let entry = entries.entry(key.clone()).or_default();
            if let Some(value) = fresh_value(entry) {
                return Ok(value);
            }
            if entry.version != version_at_enqueue {
                // The load we queued behind completed, or the key was
                // written directly while we waited. Share that outcome
                // instead of issuing another call.
                if entry.status == QueryStatus::Error {
                    if let Some(error) = entry.error.clone() {
                        return Err(error);
                    }
                }
                if let Some(value) = entry.data.clone() {
                    return Ok(value);
                }
                // The generation we queued behind was cancelled and left
                // nothing; fall through and lead a fresh load.
            }
            if entry.data.is_none() {
                entry.status = QueryStatus::Loading;
            }
            entry.version
        };

        let retry = &self.inner.config.retry;
        let result = loader
            .retry(
                &ExponentialBuilder::default()
                    .with_min_delay(retry.min_delay)
                    .with_max_delay(retry.max_delay)
                    .with_max_times(retry.max_times)
                    .with_jitter(),
            )
            .when(|e: &PlanningApiError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "load failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await;

        let window = options
            .staleness_override
            .unwrap_or_else(|| self.window_for(&key));
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();

        if entry.version != lead_version {
            // Cancelled while in flight. Whatever was written since wins;
            // the response is only handed back to our own caller.
            debug!(key = key.label(), "dropping load result for a cancelled generation");
            return match entry.data.clone() {
                Some(value) => Ok(value),
                None => result,
            };
        }

        entry.version = entry.version.wrapping_add(1);
        match &result {
            Ok(value) => {
                entry.data = Some(value.clone());
                entry.status = QueryStatus::Success;
                entry.error = None;
                entry.stale_at = Some(Instant::now() + window);
                debug!(key = key.label(), "load committed");
            }
            Err(error) => {
                entry.status = QueryStatus::Error;
                entry.error = Some(error.clone());
                entry.stale_at = None;
                warn!(key = key.label(), %error, "load failed");
            }
        }
        result
    }
}
