//! Save scheduling: decides when accumulated mutations reach the backend.
//!
//! Two paths feed a save. The threshold path fires synchronously once
//! `threshold` mutations have accumulated. The debounce path (re)arms a
//! timer on every mutation below the threshold. Reaching the threshold
//! always cancels a pending timer.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// What the record should do after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// Save synchronously, inside the mutating call.
    SaveNow,
    /// Spawn a timer for `delay`, tagged with `generation`.
    Debounce { delay: Duration, generation: u64 },
    /// Keep the mutation in memory only.
    Hold,
}

pub(crate) struct ChangeScheduler {
    threshold: usize,
    delay: Option<Duration>,
    change_count: usize,
    pending: Option<JoinHandle<()>>,
    /// Bumped whenever the pending timer is replaced or cancelled. A timer
    /// only saves if it still holds the current generation.
    generation: u64,
}

impl ChangeScheduler {
    pub(crate) fn new(threshold: usize, delay: Option<Duration>) -> Self {
        Self {
            threshold: threshold.max(1),
            delay,
            change_count: 0,
            pending: None,
            generation: 0,
        }
    }

    /// Count one mutation and decide how to persist it.
    pub(crate) fn record_change(&mut self) -> Trigger {
        self.change_count = self.change_count.saturating_add(1);

        if self.change_count >= self.threshold {
            if self.pending.is_some() {
                debug!("scheduler: threshold reached, cancelling debounced save");
            }
            self.cancel_pending();
            return Trigger::SaveNow;
        }

        match self.delay {
            Some(delay) => {
                self.cancel_pending();
                Trigger::Debounce {
                    delay,
                    generation: self.generation,
                }
            }
            None => Trigger::Hold,
        }
    }

    /// Attach the task spawned for a `Trigger::Debounce`.
    ///
    /// A handle for a stale generation is aborted immediately.
    pub(crate) fn arm(&mut self, generation: u64, handle: JoinHandle<()>) {
        if generation == self.generation {
            self.pending = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Called by a timer that woke up. True if it is still the live timer,
    /// in which case it is no longer pending and should save.
    pub(crate) fn claim(&mut self, generation: u64) -> bool {
        if generation == self.generation && self.pending.is_some() {
            // Dropping the handle detaches the task that is running this call.
            self.pending = None;
            return true;
        }
        false
    }

    pub(crate) fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// A save reached the backend; start counting afresh.
    pub(crate) fn mark_saved(&mut self) {
        self.change_count = 0;
    }

    pub(crate) fn change_count(&self) -> usize {
        self.change_count
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn spawn_flag_setter(after: Duration) -> (JoinHandle<()>, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&flag);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            f.store(true, Ordering::SeqCst);
        });
        (handle, flag)
    }

    // ========================================================================
    // Threshold path
    // ========================================================================

    #[test]
    fn default_threshold_saves_every_change() {
        let mut s = ChangeScheduler::new(1, None);
        assert_eq!(s.record_change(), Trigger::SaveNow);
        s.mark_saved();
        assert_eq!(s.record_change(), Trigger::SaveNow);
    }

    #[test]
    fn zero_threshold_normalized_to_one() {
        let mut s = ChangeScheduler::new(0, None);
        assert_eq!(s.record_change(), Trigger::SaveNow);
    }

    #[test]
    fn threshold_holds_until_reached() {
        let mut s = ChangeScheduler::new(3, None);
        assert_eq!(s.record_change(), Trigger::Hold);
        assert_eq!(s.record_change(), Trigger::Hold);
        assert_eq!(s.record_change(), Trigger::SaveNow);
        assert_eq!(s.change_count(), 3);

        s.mark_saved();
        assert_eq!(s.change_count(), 0);
        assert_eq!(s.record_change(), Trigger::Hold);
    }

    #[test]
    fn unsaved_threshold_retries_on_next_change() {
        let mut s = ChangeScheduler::new(2, None);
        s.record_change();
        assert_eq!(s.record_change(), Trigger::SaveNow);
        // Save was vetoed or failed: no mark_saved.
        assert_eq!(s.record_change(), Trigger::SaveNow);
    }

    // ========================================================================
    // Debounce path
    // ========================================================================

    #[test]
    fn delay_debounces_each_change_with_new_generation() {
        let mut s = ChangeScheduler::new(10, Some(Duration::from_millis(100)));
        let first = s.record_change();
        let second = s.record_change();
        match (first, second) {
            (
                Trigger::Debounce { delay: d1, generation: g1 },
                Trigger::Debounce { delay: d2, generation: g2 },
            ) => {
                assert_eq!(d1, Duration::from_millis(100));
                assert_eq!(d2, d1);
                assert_ne!(g1, g2);
            }
            other => panic!("expected two debounces, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn claim_only_succeeds_for_live_timer() {
        let mut s = ChangeScheduler::new(10, Some(Duration::from_millis(50)));
        let Trigger::Debounce { generation, .. } = s.record_change() else {
            panic!("expected debounce");
        };
        let (handle, _) = spawn_flag_setter(Duration::from_secs(3600));
        s.arm(generation, handle);
        assert!(s.has_pending());

        assert!(!s.claim(generation.wrapping_add(1)));
        assert!(s.claim(generation));
        assert!(!s.has_pending());
        assert!(!s.claim(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_aborts_previous_timer() {
        let mut s = ChangeScheduler::new(10, Some(Duration::from_millis(50)));
        let Trigger::Debounce { generation: g1, .. } = s.record_change() else {
            panic!("expected debounce");
        };
        let (h1, fired1) = spawn_flag_setter(Duration::from_millis(50));
        s.arm(g1, h1);

        let Trigger::Debounce { generation: g2, .. } = s.record_change() else {
            panic!("expected debounce");
        };
        let (h2, fired2) = spawn_flag_setter(Duration::from_millis(50));
        s.arm(g2, h2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired1.load(Ordering::SeqCst));
        assert!(fired2.load(Ordering::SeqCst));
        assert!(!s.claim(g1));
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_cancels_pending_timer() {
        let mut s = ChangeScheduler::new(2, Some(Duration::from_millis(50)));
        let Trigger::Debounce { generation, .. } = s.record_change() else {
            panic!("expected debounce");
        };
        let (handle, fired) = spawn_flag_setter(Duration::from_millis(50));
        s.arm(generation, handle);

        assert_eq!(s.record_change(), Trigger::SaveNow);
        assert!(!s.has_pending());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert!(!s.claim(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_arm_is_aborted() {
        let mut s = ChangeScheduler::new(10, Some(Duration::from_millis(50)));
        let Trigger::Debounce { generation, .. } = s.record_change() else {
            panic!("expected debounce");
        };
        s.cancel_pending();

        let (handle, fired) = spawn_flag_setter(Duration::from_millis(10));
        s.arm(generation, handle);
        assert!(!s.has_pending());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn no_delay_below_threshold_holds() {
        let mut s = ChangeScheduler::new(5, None);
        for _ in 0..4 {
            assert_eq!(s.record_change(), Trigger::Hold);
        }
        assert!(!s.has_pending());
    }
}
