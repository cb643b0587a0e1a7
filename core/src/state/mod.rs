//! Anti-replay state: boot epoch and message counter for outbound packets
//!
//! Every authenticated command carries the sender's last-known satellite boot
//! count and a message id that strictly increases across process restarts.
//! The counters live in one `AntiReplayStore`, handed to the packet codec by
//! `Arc`; all mutations go through its lock so no two packets share a value.

mod store;

pub use store::StateStore;

use crate::config::BootCountPolicy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Persisted counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayState {
    pub boot_count: u32,
    pub msg_id: u32,
}

/// Anti-replay store errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Message id space exhausted at {0}")]
    CounterExhausted(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of reconciling our boot count with one reported by the satellite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSync {
    Unchanged,
    Advanced { from: u32, to: u32 },
    /// Satellite reported a lower count and policy adopted it
    Lowered { from: u32, to: u32 },
    /// Satellite reported a lower count and policy kept ours
    RejectedLower { current: u32, observed: u32 },
}

/// Process-wide anti-replay counters with save-on-mutation persistence
pub struct AntiReplayStore {
    state: Mutex<ReplayState>,
    store: StateStore,
    lower_policy: BootCountPolicy,
}

impl AntiReplayStore {
    /// Open the store, starting from `initial` when nothing was saved yet
    pub fn open(store: StateStore, initial: ReplayState) -> Result<Self, StateError> {
        let state = match store.load()? {
            Some(saved) => {
                info!(
                    "Loaded anti-replay state: boot={}, msg_id={}",
                    saved.boot_count, saved.msg_id
                );
                saved
            }
            None => {
                info!("No saved anti-replay state, starting fresh");
                initial
            }
        };

        Ok(Self {
            state: Mutex::new(state),
            store,
            lower_policy: BootCountPolicy::default(),
        })
    }

    /// Non-persistent store (tests, dry runs)
    pub fn in_memory(initial: ReplayState) -> Self {
        Self {
            state: Mutex::new(initial),
            store: StateStore::Memory,
            lower_policy: BootCountPolicy::default(),
        }
    }

    pub fn with_lower_boot_policy(mut self, policy: BootCountPolicy) -> Self {
        self.lower_policy = policy;
        self
    }

    pub fn snapshot(&self) -> ReplayState {
        *self.state.lock()
    }

    pub fn boot_count(&self) -> u32 {
        self.state.lock().boot_count
    }

    /// Increment, persist and return the message id
    pub fn advance_msg_id(&self) -> Result<u32, StateError> {
        Ok(self.next_footer()?.1)
    }

    /// Current boot count and a freshly advanced message id, taken under one lock
    pub fn next_footer(&self) -> Result<(u32, u32), StateError> {
        let mut state = self.state.lock();
        let next = state
            .msg_id
            .checked_add(1)
            .ok_or(StateError::CounterExhausted(state.msg_id))?;

        let updated = ReplayState {
            msg_id: next,
            ..*state
        };
        // Persist before handing the id out: a crash must never reuse it
        self.store.save(&updated)?;
        *state = updated;

        Ok((updated.boot_count, updated.msg_id))
    }

    /// Reconcile with a boot count observed in satellite telemetry
    pub fn sync_boot_count(&self, observed: u32) -> Result<BootSync, StateError> {
        let mut state = self.state.lock();
        let current = state.boot_count;

        let outcome = if observed > current {
            info!("Updating boot count: {} -> {}", current, observed);
            BootSync::Advanced {
                from: current,
                to: observed,
            }
        } else if observed < current {
            match self.lower_policy {
                BootCountPolicy::AdoptLower => {
                    warn!(
                        "Satellite boot count ({}) lower than local ({}); \
                         satellite reset? adopting it",
                        observed, current
                    );
                    BootSync::Lowered {
                        from: current,
                        to: observed,
                    }
                }
                BootCountPolicy::RejectLower => {
                    warn!(
                        "Satellite boot count ({}) lower than local ({}); keeping local value",
                        observed, current
                    );
                    return Ok(BootSync::RejectedLower { current, observed });
                }
            }
        } else {
            return Ok(BootSync::Unchanged);
        };

        let updated = ReplayState {
            boot_count: observed,
            ..*state
        };
        self.store.save(&updated)?;
        *state = updated;

        Ok(outcome)
    }

    /// Operator override of the boot count (e.g. after a known satellite reset)
    pub fn set_boot_count(&self, boot_count: u32) -> Result<(), StateError> {
        let mut state = self.state.lock();
        let updated = ReplayState {
            boot_count,
            ..*state
        };
        self.store.save(&updated)?;
        *state = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_id_strictly_increases() {
        let store = AntiReplayStore::in_memory(ReplayState::default());
        let ids: Vec<u32> = (0..5).map(|_| store.advance_msg_id().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_next_footer_carries_boot_count() {
        let store = AntiReplayStore::in_memory(ReplayState {
            boot_count: 474,
            msg_id: 0,
        });
        assert_eq!(store.next_footer().unwrap(), (474, 1));
        assert_eq!(store.snapshot().msg_id, 1);
    }

    #[test]
    fn test_msg_id_exhaustion() {
        let store = AntiReplayStore::in_memory(ReplayState {
            boot_count: 0,
            msg_id: u32::MAX,
        });
        assert!(matches!(
            store.advance_msg_id(),
            Err(StateError::CounterExhausted(u32::MAX))
        ));
        assert_eq!(store.snapshot().msg_id, u32::MAX);
    }

    #[test]
    fn test_boot_count_ahead_is_adopted() {
        let store = AntiReplayStore::in_memory(ReplayState {
            boot_count: 10,
            msg_id: 3,
        });
        assert_eq!(
            store.sync_boot_count(12).unwrap(),
            BootSync::Advanced { from: 10, to: 12 }
        );
        assert_eq!(store.boot_count(), 12);
        assert_eq!(store.sync_boot_count(12).unwrap(), BootSync::Unchanged);
        // msg_id is untouched by boot sync
        assert_eq!(store.snapshot().msg_id, 3);
    }

    #[test]
    fn test_lower_boot_count_policies() {
        let adopting = AntiReplayStore::in_memory(ReplayState {
            boot_count: 10,
            msg_id: 0,
        });
        assert_eq!(
            adopting.sync_boot_count(4).unwrap(),
            BootSync::Lowered { from: 10, to: 4 }
        );
        assert_eq!(adopting.boot_count(), 4);

        let rejecting = AntiReplayStore::in_memory(ReplayState {
            boot_count: 10,
            msg_id: 0,
        })
        .with_lower_boot_policy(BootCountPolicy::RejectLower);
        assert_eq!(
            rejecting.sync_boot_count(4).unwrap(),
            BootSync::RejectedLower {
                current: 10,
                observed: 4
            }
        );
        assert_eq!(rejecting.boot_count(), 10);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        use std::sync::Arc;

        let store = Arc::new(AntiReplayStore::in_memory(ReplayState::default()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| store.advance_msg_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=200).collect::<Vec<_>>());
    }
}
