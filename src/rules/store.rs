//! Cached, periodically refreshed rule snapshot
//!
//! The store owns one immutable `Arc<Vec<Ruleset>>`. Readers clone the `Arc`
//! under a short-held lock and never hold it while matching; a refresh builds
//! a complete replacement off to the side and swaps it in at the end, so a
//! reader sees either the old snapshot or the new one.
//!
//! Two modes:
//!
//! - **lazy**: no refresh loop is running, so [`RuleStore::get_all`] refreshes
//!   before answering.
//! - **scheduled**: [`RuleStore::init_cache`] started a background loop and
//!   `get_all` only returns the cached snapshot.

use crate::domain::{MatchStrategy, RuleFile, Ruleset};
use crate::rules::blob::{BlobError, BlobSource};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shared, immutable view of every loaded rule file
pub type Snapshot = Arc<Vec<Ruleset>>;

#[derive(Error, Debug)]
pub enum RuleStoreError {
    #[error("failed to read rules source: {0}")]
    Source(#[from] BlobError),

    #[error("none of the {attempted} rule files could be loaded")]
    NoValidFiles { attempted: usize },

    #[error("the refresh loop is already running")]
    AlreadyScheduled,
}

/// Outcome of one successful refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshReport {
    pub files: usize,
    pub rejected: usize,
    pub rules: usize,
}

struct Scheduler {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct RuleStore {
    source: Arc<dyn BlobSource>,
    strategy: MatchStrategy,
    snapshot: Mutex<Snapshot>,
    refreshing: tokio::sync::Mutex<()>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore")
            .field("strategy", &self.strategy)
            .field("rulesets", &self.snapshot().len())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

impl RuleStore {
    pub fn new(source: Arc<dyn BlobSource>, strategy: MatchStrategy) -> Self {
        Self {
            source,
            strategy,
            snapshot: Mutex::new(Arc::new(Vec::new())),
            refreshing: tokio::sync::Mutex::new(()),
            scheduler: Mutex::new(None),
        }
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// The cached snapshot, without touching the source
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().clone()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    /// Current rulesets.
    ///
    /// In lazy mode this refreshes first; a failed refresh is logged and the
    /// previous snapshot is returned.
    pub async fn get_all(&self) -> Snapshot {
        if !self.is_scheduled() {
            if let Err(error) = self.refresh().await {
                warn!(%error, "On-demand rule refresh failed; serving cached rules");
            }
        }
        self.snapshot()
    }

    /// Reload every rule file from the source and swap the snapshot.
    ///
    /// A file that cannot be read, parsed or compiled is excluded. When the
    /// listing fails, or every rule file fails, the old snapshot stays.
    pub async fn refresh(&self) -> Result<RefreshReport, RuleStoreError> {
        let _running = self.refreshing.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<RefreshReport, RuleStoreError> {
        let objects = self.source.list().await?;
        let rule_files: Vec<_> = objects
            .into_iter()
            .filter(|object| is_rule_file(&object.key))
            .collect();

        let mut rulesets = Vec::with_capacity(rule_files.len());
        let mut report = RefreshReport {
            files: rule_files.len(),
            ..RefreshReport::default()
        };

        for object in &rule_files {
            match self.load_file(&object.key).await {
                Ok(ruleset) => {
                    report.rules += ruleset.rules.len();
                    rulesets.push(ruleset);
                }
                Err(error) => {
                    report.rejected += 1;
                    warn!(file = %object.key, %error, "Excluding rule file");
                }
            }
        }

        if report.files > 0 && rulesets.is_empty() {
            return Err(RuleStoreError::NoValidFiles {
                attempted: report.files,
            });
        }

        *self.snapshot.lock() = Arc::new(rulesets);
        debug!(
            files = report.files,
            rejected = report.rejected,
            rules = report.rules,
            "Rule snapshot refreshed"
        );
        Ok(report)
    }

    async fn load_file(&self, key: &str) -> Result<Ruleset, String> {
        let content = self
            .source
            .read_all(key)
            .await
            .map_err(|e| e.to_string())?;
        let file = RuleFile::parse(&content).map_err(|e| e.to_string())?;
        let rules = file.into_rules(self.strategy).map_err(|e| e.to_string())?;

        Ok(Ruleset {
            source: key.to_string(),
            rules: rules.into_iter().map(Arc::new).collect(),
        })
    }

    /// Load once, then keep refreshing every `interval` until [`stop`](Self::stop).
    ///
    /// A tick that arrives while a refresh is still running is skipped.
    pub async fn init_cache(self: &Arc<Self>, interval: Duration) -> Result<(), RuleStoreError> {
        if self.is_scheduled() {
            return Err(RuleStoreError::AlreadyScheduled);
        }

        let report = self.refresh().await?;
        info!(
            files = report.files,
            rejected = report.rejected,
            rules = report.rules,
            interval_secs = interval.as_secs_f64(),
            "Rule cache initialised"
        );

        let (shutdown, stopped) = oneshot::channel();
        let handle = tokio::spawn(refresh_loop(Arc::downgrade(self), interval, stopped));

        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            // Lost a race with a concurrent init_cache; keep the first loop.
            handle.abort();
            return Err(RuleStoreError::AlreadyScheduled);
        }
        *scheduler = Some(Scheduler { shutdown, handle });
        Ok(())
    }

    /// Stop the refresh loop, wait for an in-flight refresh, then close the source
    pub async fn stop(&self) -> Result<(), RuleStoreError> {
        let scheduler = self.scheduler.lock().take();
        if let Some(Scheduler { shutdown, handle }) = scheduler {
            let _ = shutdown.send(());
            if let Err(error) = handle.await {
                warn!(%error, "Rule refresh task ended abnormally");
            }
        }
        self.source.close().await?;
        Ok(())
    }
}

async fn refresh_loop(
    store: Weak<RuleStore>,
    interval: Duration,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately and init_cache already loaded.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else { break };
                let Ok(_running) = store.refreshing.try_lock() else {
                    debug!("Previous rule refresh still running; skipping tick");
                    continue;
                };
                if let Err(error) = store.refresh_locked().await {
                    warn!(%error, "Scheduled rule refresh failed; keeping previous rules");
                }
            }
        }
    }
    debug!("Rule refresh loop stopped");
}

fn is_rule_file(key: &str) -> bool {
    key.ends_with(".yml") || key.ends_with(".yaml")
}
