//! Session connection state.
//!
//! One [`NetworkState`] value is current at any time. It is never set
//! directly by callers; the facade derives it by folding session
//! events through the pure [`transition`] function, which also yields
//! the side effects the facade must perform. Keeping the table pure
//! lets every row be tested without a runtime.

use std::fmt;

use crate::role::SessionRole;

// ── NetworkState ─────────────────────────────────────────────────

/// Host-mode phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    Stopped,
    /// Advertising and accepting inbound links.
    Publishing,
}

/// Viewer-mode phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    Stopped,
    /// Discovering candidate endpoints.
    Browsing,
    /// Outbound link establishment in flight.
    Connecting,
    Connected,
    /// Link dropped unexpectedly; a reconnect attempt is owed.
    Lost,
}

/// Derived connection state, one variant per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Host(HostPhase),
    Viewer(ViewerPhase),
}

impl NetworkState {
    /// The resting state for a mode.
    pub fn stopped_for(mode: SessionRole) -> Self {
        match mode {
            SessionRole::Host => NetworkState::Host(HostPhase::Stopped),
            SessionRole::Viewer => NetworkState::Viewer(ViewerPhase::Stopped),
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            NetworkState::Host(HostPhase::Stopped) | NetworkState::Viewer(ViewerPhase::Stopped)
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, NetworkState::Viewer(ViewerPhase::Connected))
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Host(HostPhase::Stopped) => write!(f, "host(stopped)"),
            NetworkState::Host(HostPhase::Publishing) => write!(f, "host(publishing)"),
            NetworkState::Viewer(ViewerPhase::Stopped) => write!(f, "viewer(stopped)"),
            NetworkState::Viewer(ViewerPhase::Browsing) => write!(f, "viewer(browsing)"),
            NetworkState::Viewer(ViewerPhase::Connecting) => write!(f, "viewer(connecting)"),
            NetworkState::Viewer(ViewerPhase::Connected) => write!(f, "viewer(connected)"),
            NetworkState::Viewer(ViewerPhase::Lost) => write!(f, "viewer(lost)"),
        }
    }
}

// ── Events and effects ───────────────────────────────────────────

/// The session observations that can move [`NetworkState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    ListenerRunning,
    ListenerStopped,
    BrowserRunning,
    BrowserStopped,
    Connecting,
    ConnectionReady,
    ConnectionStopped,
}

/// Side effects the facade must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEffect {
    /// Tell the host we are ready to receive (viewer just connected).
    SendWakeUp,
    /// Cancel the outstanding orchestration task.
    CancelOrchestration,
    /// Re-run the browse path against the last-known peer.
    AttemptReconnect,
}

// ── Transition function ──────────────────────────────────────────

/// Fold one event into the current state.
///
/// Events that do not apply to the declared mode leave the state
/// untouched and yield no effects. `CancelOrchestration` is emitted
/// exactly once per run: only on the edge into a `Stopped` phase,
/// never while already stopped.
pub fn transition(
    state: NetworkState,
    mode: SessionRole,
    event: StateEvent,
) -> (NetworkState, Vec<StateEffect>) {
    match (mode, event) {
        (SessionRole::Host, StateEvent::ListenerRunning) => {
            (NetworkState::Host(HostPhase::Publishing), vec![])
        }
        (SessionRole::Viewer, StateEvent::BrowserRunning) => {
            (NetworkState::Viewer(ViewerPhase::Browsing), vec![])
        }
        (SessionRole::Viewer, StateEvent::Connecting) => {
            (NetworkState::Viewer(ViewerPhase::Connecting), vec![])
        }
        (SessionRole::Viewer, StateEvent::ConnectionReady) => {
            if state == NetworkState::Viewer(ViewerPhase::Connecting) {
                (
                    NetworkState::Viewer(ViewerPhase::Connected),
                    vec![StateEffect::SendWakeUp],
                )
            } else {
                (state, vec![])
            }
        }
        // A host stays publishing as links come and go.
        (SessionRole::Host, StateEvent::ConnectionReady)
        | (SessionRole::Host, StateEvent::ConnectionStopped) => (state, vec![]),
        (SessionRole::Viewer, StateEvent::ConnectionStopped) => {
            if state == NetworkState::Viewer(ViewerPhase::Connected) {
                (
                    NetworkState::Viewer(ViewerPhase::Lost),
                    vec![StateEffect::AttemptReconnect],
                )
            } else {
                stop(state, mode)
            }
        }
        (_, StateEvent::ListenerStopped) | (_, StateEvent::BrowserStopped) => stop(state, mode),
        // Cross-mode events: a viewer has no listener, a host no
        // browser, and hosts never dial out.
        (SessionRole::Viewer, StateEvent::ListenerRunning)
        | (SessionRole::Host, StateEvent::BrowserRunning)
        | (SessionRole::Host, StateEvent::Connecting) => (state, vec![]),
    }
}

fn stop(state: NetworkState, mode: SessionRole) -> (NetworkState, Vec<StateEffect>) {
    let next = NetworkState::stopped_for(mode);
    let effects = if state.is_stopped() {
        vec![]
    } else {
        vec![StateEffect::CancelOrchestration]
    };
    (next, effects)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: SessionRole = SessionRole::Host;
    const VIEWER: SessionRole = SessionRole::Viewer;

    #[test]
    fn host_rows() {
        let stopped = NetworkState::Host(HostPhase::Stopped);
        let publishing = NetworkState::Host(HostPhase::Publishing);

        assert_eq!(
            transition(stopped, HOST, StateEvent::ListenerRunning),
            (publishing, vec![])
        );
        // Links coming and going leave a publishing host alone.
        assert_eq!(
            transition(publishing, HOST, StateEvent::ConnectionReady),
            (publishing, vec![])
        );
        assert_eq!(
            transition(publishing, HOST, StateEvent::ConnectionStopped),
            (publishing, vec![])
        );
        assert_eq!(
            transition(publishing, HOST, StateEvent::ListenerStopped),
            (stopped, vec![StateEffect::CancelOrchestration])
        );
    }

    #[test]
    fn viewer_happy_path() {
        let mut state = NetworkState::Viewer(ViewerPhase::Stopped);

        let (next, effects) = transition(state, VIEWER, StateEvent::BrowserRunning);
        assert_eq!(next, NetworkState::Viewer(ViewerPhase::Browsing));
        assert!(effects.is_empty());
        state = next;

        let (next, effects) = transition(state, VIEWER, StateEvent::Connecting);
        assert_eq!(next, NetworkState::Viewer(ViewerPhase::Connecting));
        assert!(effects.is_empty());
        state = next;

        let (next, effects) = transition(state, VIEWER, StateEvent::ConnectionReady);
        assert_eq!(next, NetworkState::Viewer(ViewerPhase::Connected));
        assert_eq!(effects, vec![StateEffect::SendWakeUp]);
    }

    #[test]
    fn wake_up_only_fires_from_connecting() {
        for phase in [
            ViewerPhase::Stopped,
            ViewerPhase::Browsing,
            ViewerPhase::Connected,
            ViewerPhase::Lost,
        ] {
            let state = NetworkState::Viewer(phase);
            let (next, effects) = transition(state, VIEWER, StateEvent::ConnectionReady);
            assert_eq!(next, state);
            assert!(effects.is_empty(), "no wake-up from {state}");
        }
    }

    #[test]
    fn unexpected_stop_while_connected_goes_lost() {
        let connected = NetworkState::Viewer(ViewerPhase::Connected);
        let (next, effects) = transition(connected, VIEWER, StateEvent::ConnectionStopped);
        assert_eq!(next, NetworkState::Viewer(ViewerPhase::Lost));
        assert_eq!(effects, vec![StateEffect::AttemptReconnect]);
    }

    #[test]
    fn stop_before_connected_goes_stopped() {
        for phase in [ViewerPhase::Browsing, ViewerPhase::Connecting, ViewerPhase::Lost] {
            let (next, effects) =
                transition(NetworkState::Viewer(phase), VIEWER, StateEvent::ConnectionStopped);
            assert_eq!(next, NetworkState::Viewer(ViewerPhase::Stopped));
            assert_eq!(effects, vec![StateEffect::CancelOrchestration]);
        }
    }

    #[test]
    fn cancel_fires_once_per_run() {
        let stopped = NetworkState::Viewer(ViewerPhase::Stopped);
        let (next, effects) = transition(stopped, VIEWER, StateEvent::BrowserStopped);
        assert_eq!(next, stopped);
        assert!(effects.is_empty(), "already stopped, nothing to cancel");
    }

    #[test]
    fn cross_mode_events_are_inert() {
        let browsing = NetworkState::Viewer(ViewerPhase::Browsing);
        assert_eq!(
            transition(browsing, VIEWER, StateEvent::ListenerRunning),
            (browsing, vec![])
        );

        let publishing = NetworkState::Host(HostPhase::Publishing);
        assert_eq!(
            transition(publishing, HOST, StateEvent::BrowserRunning),
            (publishing, vec![])
        );
        assert_eq!(
            transition(publishing, HOST, StateEvent::Connecting),
            (publishing, vec![])
        );
    }

    // Table conformance over arbitrary event sequences: the state
    // after folding equals replaying the table row by row.
    #[test]
    fn folding_event_sequences_matches_table() {
        let sequence = [
            StateEvent::BrowserRunning,
            StateEvent::Connecting,
            StateEvent::ConnectionReady,
            StateEvent::ConnectionStopped,
            StateEvent::ConnectionStopped,
        ];
        let expected = [
            NetworkState::Viewer(ViewerPhase::Browsing),
            NetworkState::Viewer(ViewerPhase::Connecting),
            NetworkState::Viewer(ViewerPhase::Connected),
            NetworkState::Viewer(ViewerPhase::Lost),
            NetworkState::Viewer(ViewerPhase::Stopped),
        ];

        let mut state = NetworkState::stopped_for(VIEWER);
        for (event, want) in sequence.into_iter().zip(expected) {
            state = transition(state, VIEWER, event).0;
            assert_eq!(state, want);
        }
    }
}
