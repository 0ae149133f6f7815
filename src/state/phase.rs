use thiserror::Error;

/// Lifecycle phases of the dashboard controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    /// Establishing the first session and arming the initial watches.
    Bootstrapping,
    /// Watches armed; waiting for firings.
    Steady,
    /// The previous session expired; rebuilding every watch on a fresh session.
    Rebootstrapping,
    /// Shut down; the session is closed and nothing is re-armed.
    Terminated,
}

/// Events that drive the controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Root and player watches are armed and a first snapshot was published.
    Bootstrapped,
    /// The coordination session expired.
    SessionExpired,
    /// Shutdown was requested.
    ShutdownRequested,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: ControllerPhase,
    /// The event that cannot be applied from this phase.
    pub event: ControllerEvent,
}

/// Snapshot of the current lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSnapshot {
    /// Current phase.
    pub phase: ControllerPhase,
    /// Number of transitions applied so far.
    pub version: usize,
    /// Number of completed bootstraps, the initial one included.
    pub bootstraps: usize,
}

/// State machine for the controller lifecycle.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: ControllerPhase,
    version: usize,
    bootstraps: usize,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self {
            phase: ControllerPhase::Bootstrapping,
            version: 0,
            bootstraps: 0,
        }
    }
}

impl PhaseMachine {
    /// Create a state machine in the bootstrapping phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Create a snapshot of the current state.
    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            phase: self.phase,
            version: self.version,
            bootstraps: self.bootstraps,
        }
    }

    /// Apply `event`, returning the new phase.
    pub fn apply(&mut self, event: ControllerEvent) -> Result<ControllerPhase, InvalidTransition> {
        let next = self.compute_transition(event)?;
        if event == ControllerEvent::Bootstrapped {
            self.bootstraps += 1;
        }
        self.phase = next;
        self.version += 1;
        Ok(next)
    }

    fn compute_transition(&self, event: ControllerEvent) -> Result<ControllerPhase, InvalidTransition> {
        use ControllerEvent as E;
        use ControllerPhase as P;

        let next = match (self.phase, event) {
            (P::Bootstrapping | P::Rebootstrapping, E::Bootstrapped) => P::Steady,
            (P::Bootstrapping | P::Steady | P::Rebootstrapping, E::SessionExpired) => {
                P::Rebootstrapping
            }
            (P::Bootstrapping | P::Steady | P::Rebootstrapping, E::ShutdownRequested) => {
                P::Terminated
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut PhaseMachine, event: ControllerEvent) -> ControllerPhase {
        sm.apply(event).unwrap()
    }

    #[test]
    fn initial_state_is_bootstrapping() {
        let sm = PhaseMachine::new();
        assert_eq!(sm.phase(), ControllerPhase::Bootstrapping);
        assert_eq!(sm.snapshot().version, 0);
    }

    #[test]
    fn full_lifecycle_with_one_expiry() {
        let mut sm = PhaseMachine::new();

        assert_eq!(
            apply(&mut sm, ControllerEvent::Bootstrapped),
            ControllerPhase::Steady
        );
        assert_eq!(
            apply(&mut sm, ControllerEvent::SessionExpired),
            ControllerPhase::Rebootstrapping
        );
        assert_eq!(
            apply(&mut sm, ControllerEvent::Bootstrapped),
            ControllerPhase::Steady
        );
        assert_eq!(
            apply(&mut sm, ControllerEvent::ShutdownRequested),
            ControllerPhase::Terminated
        );

        let snapshot = sm.snapshot();
        assert_eq!(snapshot.version, 4);
        assert_eq!(snapshot.bootstraps, 2);
    }

    #[test]
    fn expiry_during_rebootstrap_stays_rebootstrapping() {
        let mut sm = PhaseMachine::new();
        apply(&mut sm, ControllerEvent::SessionExpired);
        assert_eq!(
            apply(&mut sm, ControllerEvent::SessionExpired),
            ControllerPhase::Rebootstrapping
        );
    }

    #[test]
    fn bootstrapped_twice_is_invalid() {
        let mut sm = PhaseMachine::new();
        apply(&mut sm, ControllerEvent::Bootstrapped);
        let err = sm.apply(ControllerEvent::Bootstrapped).unwrap_err();
        assert_eq!(err.from, ControllerPhase::Steady);
        assert_eq!(err.event, ControllerEvent::Bootstrapped);
    }

    #[test]
    fn terminated_is_final() {
        let mut sm = PhaseMachine::new();
        apply(&mut sm, ControllerEvent::ShutdownRequested);
        for event in [
            ControllerEvent::Bootstrapped,
            ControllerEvent::SessionExpired,
            ControllerEvent::ShutdownRequested,
        ] {
            assert!(sm.apply(event).is_err());
        }
        assert_eq!(sm.phase(), ControllerPhase::Terminated);
    }
}
