//! Epoch sync coordination.
//!
//! Polls the chain head on a fixed interval and, whenever the head enters an
//! unprocessed epoch, runs one refresh cycle:
//!
//! 1. Fetch and build the next epoch's schedule
//! 2. Fetch and build the current epoch's schedule (per [`ValidationPolicy`])
//! 3. Cross-check the fresh current duties against the cached next schedule
//! 4. Publish the next epoch to the execution client, preceded by the
//!    current epoch on the first cycle after startup
//! 5. Commit: rotate the cache, advance the last processed epoch
//!
//! Nothing is committed unless every step before it succeeded, so an aborted
//! cycle is simply retried on the next tick.

use log::{debug, error, info, log_enabled, warn, Level};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::{AssignmentSource, ChainHeadSource, ConsensusInfoSink};
use crate::config::{SyncConfig, ValidationPolicy};
use crate::errors::{ErrorKind, Result, SyncError};
use crate::publisher::{ConsensusInfoPublisher, PublishOutcome};
use crate::tracker::{
    CompatibilityChecker, Epoch, EpochSchedule, EpochTracker, ScheduleBuilder, ScheduleCache,
    ScheduleSnapshot, Slot, SyncState, Transition,
};

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The head is still in an already processed epoch.
    Idle { epoch: Epoch },
    /// A refresh cycle for `epoch` committed.
    Committed {
        epoch: Epoch,
        /// `Rejected` if the sink rejected any payload of the cycle.
        publish: PublishOutcome,
    },
}

/// Drives proposer schedule synchronization.
///
/// Owns the sync state and the schedule cache; other tasks observe the cache
/// through [`SyncLoop::subscribe`].
pub struct SyncLoop<C, A, K> {
    chain: C,
    assignments: A,
    publisher: ConsensusInfoPublisher<K>,
    builder: ScheduleBuilder,
    checker: CompatibilityChecker,
    tracker: EpochTracker,
    cache: ScheduleCache,
    poll_interval: Duration,
    validation_policy: ValidationPolicy,
    snapshot_tx: watch::Sender<ScheduleSnapshot>,
}

impl<C, A, K> SyncLoop<C, A, K>
where
    C: ChainHeadSource,
    A: AssignmentSource,
    K: ConsensusInfoSink,
{
    /// Creates a sync loop from its collaborators and `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `config` does not validate.
    pub fn new(chain: C, assignments: A, sink: K, config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        let (snapshot_tx, _) = watch::channel(ScheduleSnapshot::default());

        Ok(Self {
            chain,
            assignments,
            publisher: ConsensusInfoPublisher::new(sink, config.genesis_time, config.slot_duration),
            builder: ScheduleBuilder::new(config.slots_per_epoch)?,
            checker: CompatibilityChecker::new(),
            tracker: EpochTracker::new(config.slots_per_epoch)?,
            cache: ScheduleCache::new(),
            poll_interval: config.poll_interval,
            validation_policy: config.validation_policy,
            snapshot_tx,
        })
    }

    pub fn state(&self) -> SyncState {
        self.tracker.state()
    }

    pub fn cache(&self) -> &ScheduleCache {
        &self.cache
    }

    /// Returns a receiver of cache snapshots, updated after every commit.
    pub fn subscribe(&self) -> watch::Receiver<ScheduleSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between cycles, never in the middle of one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Startup`] if the chain head cannot be read at startup.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let head = self
            .chain
            .canonical_head_slot()
            .await
            .map_err(|e| SyncError::Startup(format!("cannot read chain head: {}", e)))?;

        info!(
            "Starting epoch sync at head slot {} (poll every {:?})",
            head, self.poll_interval
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(
                        "Stopping epoch sync (last processed epoch {:?})",
                        self.tracker.last_processed_epoch()
                    );
                    return Ok(());
                }
                _ = ticker.tick() => {
                    // Errors are logged with context inside tick.
                    let _ = self.tick().await;
                }
            }
        }
    }

    /// Polls the head once and runs a refresh cycle if one is due.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let head_slot = match self.chain.canonical_head_slot().await {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Failed to get canonical head, skipping tick: {}", e);
                return Err(e);
            }
        };

        let (epoch, first_run) = match self.tracker.observe(head_slot) {
            Transition::None { epoch } => {
                debug!("Head slot {} still in processed epoch {}", head_slot, epoch);
                return Ok(TickOutcome::Idle { epoch });
            }
            Transition::Due { epoch, first_run } => (epoch, first_run),
        };

        info!(
            "Entered epoch {} at head slot {} (last processed {:?})",
            epoch,
            head_slot,
            self.tracker.last_processed_epoch()
        );

        match self.refresh(epoch, first_run).await {
            Ok(publish) => Ok(TickOutcome::Committed { epoch, publish }),
            Err(e) => {
                log_abort(epoch, head_slot, &e);
                Err(e)
            }
        }
    }

    async fn refresh(&mut self, epoch: Epoch, first_run: bool) -> Result<PublishOutcome> {
        let (next_epoch, next_assignments) = self.assignments.next_epoch_assignments().await?;
        if next_epoch != epoch + 1 {
            return Err(SyncError::HeadMoved {
                expected: epoch + 1,
                actual: next_epoch,
            });
        }
        let next = self.builder.build(next_epoch, &next_assignments)?;

        let cached_current = self.cache.staged_current(epoch);
        let revalidate = first_run
            || cached_current.is_none()
            || self.validation_policy == ValidationPolicy::Always;

        let fresh_current = if revalidate {
            let fresh = self.assignments.validator_assignments(epoch).await?;
            let schedule = self.builder.build(epoch, &fresh)?;
            if let Some(cached) = &cached_current {
                self.checker.check(cached, &fresh)?;
            }
            Some(schedule)
        } else {
            None
        };

        // Rotate a copy so nothing changes until the publish went through.
        let mut staged = self.cache.clone();
        staged.promote(next, fresh_current)?;
        let Some(staged_next) = staged.next() else {
            return Err(SyncError::Unavailable(format!("schedule for epoch {}", next_epoch)));
        };

        // After startup the execution client has not seen the current epoch
        // yet, including epoch 0 at genesis.
        let mut outcome = PublishOutcome::Accepted;
        if first_run {
            if let Some(staged_current) = staged.current() {
                outcome = self.publisher.publish(staged_current).await?;
            }
        }
        if self.publisher.publish(staged_next).await? == PublishOutcome::Rejected {
            outcome = PublishOutcome::Rejected;
        }

        self.cache = staged;
        self.tracker.commit(epoch);
        self.snapshot_tx.send_replace(self.cache.snapshot());

        if let Some(next) = self.cache.next() {
            log_schedule(next);
        }
        Ok(outcome)
    }
}

fn log_abort(epoch: Epoch, head_slot: Slot, e: &SyncError) {
    match e.kind() {
        ErrorKind::Transient | ErrorKind::Inconsistent => warn!(
            "Aborted refresh for epoch {} at head slot {} ({}): {}",
            epoch,
            head_slot,
            e.kind(),
            e
        ),
        ErrorKind::Malformed | ErrorKind::Irrecoverable => error!(
            "Aborted refresh for epoch {} at head slot {} ({}): {}",
            epoch,
            head_slot,
            e.kind(),
            e
        ),
    }
}

/// Logs the proposer of every slot in slot order.
fn log_schedule(schedule: &EpochSchedule) {
    if !log_enabled!(Level::Debug) {
        return;
    }
    debug!(
        "Epoch {}: {} proposers over {} slots",
        schedule.epoch(),
        schedule.proposer_count(),
        schedule.assigned_slots()
    );
    for (slot, validator) in schedule.proposers() {
        debug!(
            "slot {} proposer {} key {}",
            slot,
            validator,
            schedule
                .pubkey(validator)
                .map(|k| k.short())
                .unwrap_or_default()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockBeacon, MockSink};
    use crate::tracker::schedule_builder::tests::full_epoch;
    use crate::tracker::{Assignment, PublicKey};
    use std::sync::Arc;

    type TestLoop = SyncLoop<Arc<MockBeacon>, Arc<MockBeacon>, Arc<MockSink>>;

    fn config() -> SyncConfig {
        SyncConfig {
            genesis_time: 1_000,
            ..SyncConfig::default()
        }
    }

    fn setup(config: SyncConfig) -> (TestLoop, Arc<MockBeacon>, Arc<MockSink>) {
        let beacon = Arc::new(MockBeacon::new(config.slots_per_epoch));
        for epoch in 0..12 {
            beacon.set_assignments(epoch, full_epoch(epoch, config.slots_per_epoch, 0));
        }
        let sink = Arc::new(MockSink::new());
        let sync = SyncLoop::new(beacon.clone(), beacon.clone(), sink.clone(), &config).unwrap();
        (sync, beacon, sink)
    }

    #[tokio::test]
    async fn test_first_tick_builds_both_epochs() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(64);

        let outcome = sync.tick().await.unwrap();

        assert_eq!(
            outcome,
            TickOutcome::Committed {
                epoch: 2,
                publish: PublishOutcome::Accepted
            }
        );
        assert_eq!(beacon.fetched_epochs(), vec![3, 2]);
        assert_eq!(sync.cache().current_epoch(), Some(2));
        assert_eq!(sync.cache().next_epoch(), Some(3));
        assert_eq!(sync.state().last_processed_epoch, Some(2));
        assert!(!sync.state().first_run);

        // The current epoch is published once, ahead of the next one.
        let calls = sink.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].epoch, 2);
        assert_eq!(calls[0].keys.len(), 32);
        assert_eq!(calls[0].start, 1_000 + 2 * 32 * 6);
        assert_eq!(calls[1].epoch, 3);
        assert_eq!(calls[1].keys.len(), 32);
        assert_eq!(calls[1].start, 1_000 + 3 * 32 * 6);
    }

    #[tokio::test]
    async fn test_genesis_epoch_is_published_with_sentinel() {
        let (mut sync, beacon, sink) = setup(config());
        for epoch in 0..4 {
            let mut assignments = full_epoch(epoch, 32, 0);
            for i in 0..8 {
                assignments.push(Assignment::new(900 + i, PublicKey::new(vec![0xee]), vec![]));
            }
            beacon.set_assignments(epoch, assignments);
        }

        for head in [0, 5, 31, 32, 64] {
            beacon.set_head(head);
            sync.tick().await.unwrap();
        }

        let calls = sink.calls();
        let epochs: Vec<_> = calls.iter().map(|c| c.epoch).collect();
        assert_eq!(epochs, vec![0, 1, 2, 3]);

        assert_eq!(calls[0].keys.len(), 33);
        assert_eq!(calls[0].keys[0], "0x");
        assert_eq!(calls[0].start, 1_000);
        assert!(calls[1..].iter().all(|c| c.keys.len() == 32));
    }

    #[tokio::test]
    async fn test_ticks_within_processed_epoch_are_noops() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(96);
        sync.tick().await.unwrap();
        let fetched = beacon.fetched_epochs();

        beacon.set_head(100);
        assert_eq!(sync.tick().await.unwrap(), TickOutcome::Idle { epoch: 3 });
        beacon.set_head(120);
        assert_eq!(sync.tick().await.unwrap(), TickOutcome::Idle { epoch: 3 });

        assert_eq!(beacon.fetched_epochs(), fetched);
        assert_eq!(sink.calls().len(), 2);
        assert_eq!(sync.cache().current_epoch(), Some(3));
    }

    #[tokio::test]
    async fn test_transition_promotes_next_schedule() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(64);
        sync.tick().await.unwrap();

        beacon.set_head(97);
        sync.tick().await.unwrap();

        assert_eq!(beacon.fetched_epochs(), vec![3, 2, 4, 3]);
        assert_eq!(sync.cache().current_epoch(), Some(3));
        assert_eq!(sync.cache().next_epoch(), Some(4));
        assert_eq!(sync.cache().lookup(4, 130), Some(130));
        assert_eq!(sync.state().last_processed_epoch, Some(3));
        // Only the first cycle publishes the current epoch.
        let epochs: Vec<_> = sink.calls().iter().map(|c| c.epoch).collect();
        assert_eq!(epochs, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_conflict_aborts_before_publish() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(64);
        sync.tick().await.unwrap();

        // The beacon node now reports a different proposer for slot 100.
        let mut drifted = full_epoch(3, 32, 0);
        drifted[4] = Assignment::new(777, PublicKey::new(vec![0x77]), vec![100]);
        beacon.set_assignments(3, drifted);
        beacon.set_head(96);

        let err = sync.tick().await.unwrap_err();

        assert!(matches!(err, SyncError::Conflict { epoch: 3, count: 1 }));
        assert_eq!(sink.calls().len(), 2);
        assert_eq!(sync.state().last_processed_epoch, Some(2));
        assert_eq!(sync.cache().current_epoch(), Some(2));
        assert_eq!(sync.cache().lookup(3, 100), Some(100));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_untouched() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(64);
        beacon.fail_assignments(1);

        assert!(sync.tick().await.is_err());
        assert_eq!(sync.state().last_processed_epoch, None);
        assert!(sync.state().first_run);
        assert_eq!(sync.cache().current_epoch(), None);
        assert!(sink.calls().is_empty());

        // The same transition is retried on the next tick.
        assert!(sync.tick().await.is_ok());
        assert_eq!(sync.state().last_processed_epoch, Some(2));
    }

    #[tokio::test]
    async fn test_head_failure_skips_tick() {
        let (mut sync, beacon, _sink) = setup(config());
        beacon.set_head(64);
        beacon.fail_head(1);

        assert!(matches!(sync.tick().await, Err(SyncError::Unavailable(_))));
        assert!(beacon.fetched_epochs().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_retries_same_transition() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(64);
        sink.respond(Err(SyncError::Unavailable("execution node".into())));

        assert!(sync.tick().await.is_err());
        assert_eq!(sync.state().last_processed_epoch, None);
        assert_eq!(sync.cache().next_epoch(), None);

        sync.tick().await.unwrap();
        assert_eq!(sync.state().last_processed_epoch, Some(2));
        let epochs: Vec<_> = sink.calls().iter().map(|c| c.epoch).collect();
        assert_eq!(epochs, vec![2, 2, 3]);
    }

    #[tokio::test]
    async fn test_rejected_publish_still_commits() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(64);
        sink.respond(Ok(false));

        let outcome = sync.tick().await.unwrap();

        assert_eq!(
            outcome,
            TickOutcome::Committed {
                epoch: 2,
                publish: PublishOutcome::Rejected
            }
        );
        assert_eq!(sync.state().last_processed_epoch, Some(2));

        // Not retried until the next epoch.
        beacon.set_head(70);
        assert_eq!(sync.tick().await.unwrap(), TickOutcome::Idle { epoch: 2 });
        assert_eq!(sink.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missed_epochs_rebuild_current() {
        let (mut sync, beacon, _sink) = setup(config());
        beacon.set_head(64);
        sync.tick().await.unwrap();

        beacon.set_head(32 * 7 + 5);
        sync.tick().await.unwrap();

        assert_eq!(sync.cache().current_epoch(), Some(7));
        assert_eq!(sync.cache().next_epoch(), Some(8));
        assert_eq!(sync.cache().lookup(3, 96), None);
        assert_eq!(sync.state().last_processed_epoch, Some(7));
    }

    #[tokio::test]
    async fn test_head_moved_during_refresh_aborts() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(64);
        *beacon.next_epoch_override.lock().unwrap() = Some(5);

        let err = sync.tick().await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::HeadMoved {
                expected: 3,
                actual: 5
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(sink.calls().is_empty());
        assert_eq!(sync.state().last_processed_epoch, None);
    }

    #[tokio::test]
    async fn test_first_run_only_policy_skips_revalidation() {
        let (mut sync, beacon, _sink) = setup(SyncConfig {
            validation_policy: ValidationPolicy::FirstRunOnly,
            ..config()
        });
        beacon.set_head(64);
        sync.tick().await.unwrap();
        beacon.set_head(96);
        sync.tick().await.unwrap();

        assert_eq!(beacon.fetched_epochs(), vec![3, 2, 4]);
        assert_eq!(sync.cache().current_epoch(), Some(3));
    }

    #[tokio::test]
    async fn test_first_run_only_policy_does_not_detect_drift() {
        let (mut sync, beacon, _sink) = setup(SyncConfig {
            validation_policy: ValidationPolicy::FirstRunOnly,
            ..config()
        });
        beacon.set_head(64);
        sync.tick().await.unwrap();

        let mut drifted = full_epoch(3, 32, 0);
        drifted[4] = Assignment::new(777, PublicKey::new(vec![0x77]), vec![100]);
        beacon.set_assignments(3, drifted);
        beacon.set_head(96);

        assert!(sync.tick().await.is_ok());
        assert_eq!(sync.cache().lookup(3, 100), Some(100));
    }

    #[tokio::test]
    async fn test_epochs_are_monotonic_over_increasing_heads() {
        let (mut sync, beacon, _sink) = setup(config());
        let mut previous = None;

        for head in (0..10 * 32).step_by(7) {
            beacon.set_head(head);
            sync.tick().await.unwrap();
            let current = sync.cache().current_epoch();
            assert!(current >= previous);
            assert_eq!(current, Some(head / 32));
            previous = current;
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_committed_snapshot() {
        let (mut sync, beacon, _sink) = setup(config());
        let mut rx = sync.subscribe();
        beacon.set_head(64);

        sync.tick().await.unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.current().map(|s| s.epoch()), Some(2));
        assert_eq!(snapshot.lookup(3, 96), Some(96));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancellation() {
        let (mut sync, beacon, sink) = setup(config());
        beacon.set_head(64);
        let shutdown = CancellationToken::new();

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            cancel.cancel();
        });

        sync.run(shutdown).await.unwrap();

        // Startup probe plus ticks at 0s, 10s and 20s.
        assert_eq!(*beacon.head_calls.lock().unwrap(), 4);
        assert_eq!(sink.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_run_fails_without_chain_head() {
        let (mut sync, _beacon, _sink) = setup(config());

        let err = sync.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Startup(_)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let beacon = Arc::new(MockBeacon::new(32));
        let result = SyncLoop::new(
            beacon.clone(),
            beacon,
            Arc::new(MockSink::new()),
            &SyncConfig {
                slots_per_epoch: 0,
                ..config()
            },
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
