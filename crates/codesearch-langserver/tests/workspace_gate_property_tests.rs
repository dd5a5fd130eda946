//! Property-based tests for workspace admission and respawn bookkeeping

use std::time::Duration;

use itertools::Itertools;
use proptest::prelude::*;

use codesearch_langserver::{LaunchError, RespawnTracker, WorkspaceGate};

fn arb_roots() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,6}", 1..24)
}

proptest! {
    /// The gate never tracks more roots than the cap allows, and a rejection
    /// always reports the configured cap.
    #[test]
    fn prop_gate_never_exceeds_cap(roots in arb_roots(), max in 1usize..6) {
        let mut gate = WorkspaceGate::new(max, false);

        for root in &roots {
            match gate.admit(root) {
                Ok(_) => prop_assert!(gate.len() <= max),
                Err(err) => {
                    let is_capacity_exceeded = matches!(
                        err,
                        LaunchError::CapacityExceeded { max_workspaces } if max_workspaces == max
                    );
                    prop_assert!(is_capacity_exceeded);
                    prop_assert_eq!(gate.len(), max);
                }
            }
        }
    }

    /// Distinct roots up to the cap are always admitted
    #[test]
    fn prop_roots_below_cap_admitted(roots in arb_roots(), max in 1usize..6) {
        let distinct: Vec<&String> = roots.iter().unique().take(max).collect();
        let mut gate = WorkspaceGate::new(max, false);

        for root in &distinct {
            prop_assert!(gate.admit(root.as_str()).is_ok());
        }
        prop_assert_eq!(gate.len(), distinct.len());
    }

    /// Re-admitting a tracked root never counts against the cap
    #[test]
    fn prop_readmission_is_free(root in "[a-z]{1,6}", repeats in 1usize..10) {
        let mut gate = WorkspaceGate::new(1, false);

        for _ in 0..repeats {
            prop_assert!(gate.admit(&root).is_ok());
        }
        prop_assert_eq!(gate.len(), 1);
    }

    /// Native workspace support lifts the cap entirely
    #[test]
    fn prop_builtin_workspace_admits_everything(roots in arb_roots()) {
        let mut gate = WorkspaceGate::new(1, true);

        for root in &roots {
            prop_assert!(gate.admit(root).is_ok());
        }
        prop_assert_eq!(gate.len(), roots.iter().unique().count());
    }

    /// Releasing a root always makes room for a new one
    #[test]
    fn prop_release_frees_capacity(max in 1usize..4) {
        let mut gate = WorkspaceGate::new(max, false);
        for i in 0..max {
            gate.admit(&format!("root-{}", i)).unwrap();
        }
        prop_assert!(gate.admit("extra").is_err());

        prop_assert!(gate.release("root-0"));
        prop_assert!(gate.admit("extra").is_ok());
        prop_assert_eq!(gate.len(), max);
    }

    /// Respawn grants are monotonic, backoff never shrinks, and the ceiling
    /// is enforced exactly.
    #[test]
    fn prop_respawn_attempts_monotonic_and_capped(max in 1u32..8) {
        let mut tracker = RespawnTracker::new(max);
        let mut last_backoff = Duration::ZERO;

        for i in 0..max {
            prop_assert!(tracker.can_respawn());
            let backoff = tracker.prepare_respawn().unwrap();
            prop_assert!(backoff >= last_backoff);
            prop_assert!(backoff <= Duration::from_millis(30_000));
            prop_assert_eq!(tracker.attempts(), i + 1);
            last_backoff = backoff;
        }

        prop_assert!(!tracker.can_respawn());
        let is_respawn_limit_exceeded = matches!(
            tracker.prepare_respawn(),
            Err(LaunchError::RespawnLimitExceeded { max_respawns }) if max_respawns == max
        );
        prop_assert!(is_respawn_limit_exceeded);
    }

    /// A reset tracker behaves like a fresh one
    #[test]
    fn prop_reset_restores_full_budget(max in 1u32..6) {
        let mut tracker = RespawnTracker::new(max);
        while tracker.can_respawn() {
            tracker.prepare_respawn().unwrap();
        }

        tracker.reset();
        prop_assert_eq!(tracker.attempts(), 0);
        for _ in 0..max {
            prop_assert!(tracker.prepare_respawn().is_ok());
        }
    }
}
