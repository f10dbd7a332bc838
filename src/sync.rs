//! Sync coordination: at-most-one indexing job in flight, polled to
//! completion.
//!
//! The coordinator sits between the change tracker and a knowledge base.
//! Triggering a sync reserves the coordinator (so a second trigger fails
//! fast), drains the tracker *before* the first backend await (events
//! arriving during a slow upload belong to the next sync), and then hands
//! the filtered change set to the backend. A spawned polling task checks
//! the job on a fixed interval and emits exactly one terminal event
//! before returning the coordinator to idle and dropping its timer.
//!
//! There is no retry-with-backoff inside a sync; recovery is the periodic
//! sync tick (time-based), or a manual trigger.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::{KbError, KbResult};
use crate::kb::KnowledgeBase;
use crate::models::{SyncJob, SyncStatus};
use crate::tracker::ChangeTracker;
use crate::vault::ExclusionFilter;

/// A sync-status transition, for the UI collaborator.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub status: SyncStatus,
    pub notice: String,
    /// When the transition happened; terminal events double as the
    /// last-sync timestamp for callers that persist one.
    pub at: DateTime<Utc>,
}

/// Options accepted by the sync trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Force a full-vault sync. Currently accepted but not distinguished
    /// from an incremental sync.
    pub all_vault: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    /// Reserved: the trigger is draining and calling the backend.
    Requested,
    InProgress { sync_id: String },
}

pub struct SyncCoordinator {
    kb: Arc<dyn KnowledgeBase>,
    tracker: Arc<ChangeTracker>,
    filter: ExclusionFilter,
    poll_interval: Duration,
    state: Arc<Mutex<State>>,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl SyncCoordinator {
    /// Build a coordinator and the receiving end of its event channel.
    pub fn new(
        kb: Arc<dyn KnowledgeBase>,
        tracker: Arc<ChangeTracker>,
        filter: ExclusionFilter,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                kb,
                tracker,
                filter,
                poll_interval,
                state: Arc::new(Mutex::new(State::Idle)),
                events,
            },
            receiver,
        )
    }

    /// Trigger a sync for the currently pending changes.
    ///
    /// Fails with [`KbError::AlreadySyncing`] while a job is requested or
    /// in progress; the existing job is left untouched. On backend
    /// failure the drained change set is lost; a later (periodic or
    /// manual) resync recovers.
    pub async fn start_sync(&self, options: SyncOptions) -> KbResult<SyncJob> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != State::Idle {
                return Err(KbError::AlreadySyncing);
            }
            *state = State::Requested;
        }

        if options.all_vault {
            debug!("all-vault sync requested (treated as incremental)");
        }

        // Drain before the backend call so edits made during the upload
        // land in the next sync instead of being lost.
        let (changed, deleted) = self.tracker.drain();
        let changed: Vec<_> = changed.into_iter().filter(|f| self.filter.allows(f)).collect();
        let deleted: Vec<_> = deleted
            .into_iter()
            .filter(|p| self.filter.allows_path(p))
            .collect();

        debug!(
            changed = changed.len(),
            deleted = deleted.len(),
            "starting sync"
        );

        match self.kb.start_sync(changed, deleted).await {
            Ok(job) => {
                *self.state.lock().unwrap() = State::InProgress {
                    sync_id: job.sync_id.clone(),
                };
                self.emit(
                    SyncStatus::InProgress,
                    "Knowledge base sync started".to_string(),
                );
                self.spawn_poller(job.sync_id.clone());
                Ok(job)
            }
            Err(e) => {
                *self.state.lock().unwrap() = State::Idle;
                Err(e)
            }
        }
    }

    /// On-demand status passthrough, independent of the polling loop.
    pub async fn sync_status(&self, sync_id: &str) -> KbResult<SyncStatus> {
        self.kb.get_sync_status(sync_id).await
    }

    /// Whether a sync is currently requested or in progress.
    pub fn is_syncing(&self) -> bool {
        *self.state.lock().unwrap() != State::Idle
    }

    /// Trigger a sync every `period`, skipping ticks with nothing pending
    /// or with a sync already in flight.
    pub async fn run_periodic(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the caller's
        // startup sync (if any) is not doubled.
        interval.tick().await;

        loop {
            interval.tick().await;

            if self.tracker.is_empty() {
                debug!("periodic sync tick: no pending changes");
                continue;
            }

            match self.start_sync(SyncOptions::default()).await {
                Ok(job) => debug!(sync_id = %job.sync_id, "periodic sync started"),
                Err(KbError::AlreadySyncing) => {
                    debug!("periodic sync tick: sync already in flight")
                }
                Err(e) => warn!("periodic sync failed: {e}"),
            }
        }
    }

    fn emit(&self, status: SyncStatus, notice: String) {
        let _ = self.events.send(SyncEvent {
            status,
            notice,
            at: Utc::now(),
        });
    }

    fn spawn_poller(&self, sync_id: String) {
        let kb = Arc::clone(&self.kb);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let status = match kb.get_sync_status(&sync_id).await {
                    Ok(status) => status,
                    Err(e) => {
                        // Transient poll failures keep the loop alive;
                        // recovery is time-based.
                        warn!(sync_id = %sync_id, "sync status poll failed: {e}");
                        continue;
                    }
                };

                if !status.is_terminal() {
                    continue;
                }

                // Return to idle before announcing the transition, so an
                // observer reacting to the event can trigger the next
                // sync immediately.
                *state.lock().unwrap() = State::Idle;

                let notice = match status {
                    SyncStatus::Succeed => "Knowledge base sync succeeded",
                    _ => "Knowledge base sync failed",
                };
                let _ = events.send(SyncEvent {
                    status,
                    notice: notice.to_string(),
                    at: Utc::now(),
                });
                break;
            }

            debug!(sync_id = %sync_id, "sync polling stopped");
        });
    }
}
