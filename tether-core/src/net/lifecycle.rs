//! Connection lifecycle states and the registry's reaction to them.
//!
//! Transitions are driven exclusively by the transport layer; only the
//! `Ready`, `Failed`, and `Cancelled` states produce externally
//! visible effects. The failed-implies-stop-implies-stopped chain is
//! an explicit effects function so it can be tested exhaustively.

// ── ConnectionLifecycleState ─────────────────────────────────────

/// Lifecycle of one transport link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionLifecycleState {
    /// Link object created, no I/O yet.
    #[default]
    Setup,
    /// Waiting for the remote end (accept queue / dial in progress).
    Waiting,
    /// Link is up; I/O tasks are being installed.
    Preparing,
    /// Link is fully usable.
    Ready,
    /// Link failed with a transport-supplied reason.
    Failed(String),
    /// Link was cancelled locally before or after becoming ready.
    Cancelled,
}

impl ConnectionLifecycleState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// `true` for the terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Cancelled)
    }
}

impl std::fmt::Display for ConnectionLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Waiting => write!(f, "waiting"),
            Self::Preparing => write!(f, "preparing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// ── LifecycleEffect ──────────────────────────────────────────────

/// What the registry must do in response to a lifecycle update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEffect {
    /// Cache the peer descriptor and emit the ready event.
    NotifyReady,
    /// Tear the connection down (cancel consumers, close the link).
    StopConnection,
    /// Emit the stopped event with an optional reason.
    ///
    /// Every failure is reported as a stop with a reason; a local
    /// cancel is reported as a stop without one.
    NotifyStopped { reason: Option<String> },
}

/// The registry's reaction to a lifecycle update.
pub fn lifecycle_effects(state: &ConnectionLifecycleState) -> Vec<LifecycleEffect> {
    match state {
        ConnectionLifecycleState::Setup
        | ConnectionLifecycleState::Waiting
        | ConnectionLifecycleState::Preparing => Vec::new(),
        ConnectionLifecycleState::Ready => vec![LifecycleEffect::NotifyReady],
        ConnectionLifecycleState::Failed(reason) => vec![
            LifecycleEffect::StopConnection,
            LifecycleEffect::NotifyStopped {
                reason: Some(reason.clone()),
            },
        ],
        ConnectionLifecycleState::Cancelled => vec![
            LifecycleEffect::StopConnection,
            LifecycleEffect::NotifyStopped { reason: None },
        ],
    }
}

// ── Tests ────────────────────────────────────────────────────────
