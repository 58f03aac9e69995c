//! Activation-Slot Gate (spec §4.4): a scoped semaphore bounding how many
//! units may simultaneously sit between an `ACQUIRE` phase and its paired
//! `RELEASE` phase, per job.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// One gate per running job. Permits are not returned through the
/// `tokio::sync::OwnedSemaphorePermit` RAII handle because release can be
/// triggered from two independent call sites (the `RELEASE` phase, or unit
/// termination) and must be idempotent — holding the permit in a tracked set
/// lets us forget it exactly once regardless of who calls first.
pub struct ActivationGate {
    semaphore: Arc<Semaphore>,
    held: Mutex<HashSet<String>>,
}

impl ActivationGate {
    pub fn new(max_activation_slots: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(max_activation_slots.max(1))), held: Mutex::new(HashSet::new()) }
    }

    /// Non-blocking acquire, as required by the scheduler's dispatch tick
    /// (spec §4.6 step 3: "if unavailable, leave unit idle this tick").
    /// Returns `true` if the unit now holds a slot.
    pub async fn try_acquire(&self, unit_id: &str) -> bool {
        let mut held = self.held.lock().await;
        if held.contains(unit_id) {
            return true;
        }
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                permit.forget();
                held.insert(unit_id.to_string());
                true
            }
            Err(_) => false,
        }
    }

    /// Releases the unit's slot if it holds one. Safe to call from both the
    /// `RELEASE` phase's success path and from unit-termination cleanup —
    /// the second caller is a no-op.
    pub async fn release(&self, unit_id: &str) {
        let mut held = self.held.lock().await;
        if held.remove(unit_id) {
            self.semaphore.add_permits(1);
        }
    }

    pub async fn slots_in_use(&self) -> usize {
        self.held.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounds_concurrent_holders_to_capacity() {
        let gate = ActivationGate::new(2);
        assert!(gate.try_acquire("u1").await);
        assert!(gate.try_acquire("u2").await);
        assert!(!gate.try_acquire("u3").await);
        assert_eq!(gate.slots_in_use().await, 2);
    }

    #[tokio::test]
    async fn release_is_idempotent_across_both_call_sites() {
        let gate = ActivationGate::new(1);
        assert!(gate.try_acquire("u1").await);
        gate.release("u1").await;
        gate.release("u1").await;
        assert_eq!(gate.slots_in_use().await, 0);
        assert!(gate.try_acquire("u2").await);
    }

    #[tokio::test]
    async fn reacquiring_an_already_held_slot_is_a_no_op() {
        let gate = ActivationGate::new(1);
        assert!(gate.try_acquire("u1").await);
        assert!(gate.try_acquire("u1").await);
        assert_eq!(gate.slots_in_use().await, 1);
    }
}
