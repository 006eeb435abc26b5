//! Role negotiation with last-writer-wins conflict resolution.
//!
//! Both peers may request a role swap at any moment, including within
//! the same millisecond. Each request carries an [`LwwRegister`]; the
//! register with the greater `(timestamp_ms, actor_id)` pair wins on
//! both sides regardless of delivery order, so the peers always
//! converge on the same role assignment.

pub mod version;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ── SessionRole ──────────────────────────────────────────────────

/// The two exclusive session roles.
///
/// The host captures and streams video; the viewer receives and
/// displays it. Selected once per session and swappable via
/// [`RoleNegotiator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionRole {
    Host,
    Viewer,
}

impl SessionRole {
    /// The opposite role.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Host => Self::Viewer,
            Self::Viewer => Self::Host,
        }
    }
}

impl std::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Viewer => write!(f, "viewer"),
        }
    }
}

// ── LwwRegister ──────────────────────────────────────────────────

/// Last-writer-wins register attached to every role-change request.
///
/// Total order is `(timestamp_ms, actor_id)` lexicographic. Actor ids
/// are freshly generated UUIDs, so ties on the timestamp are always
/// broken deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwRegister {
    /// Globally unique writer id for this session.
    pub actor_id: String,
    /// Wall-clock write instant in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl LwwRegister {
    /// A fresh register stamped with the current wall clock.
    pub fn now(actor_id: &str) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            actor_id: actor_id.to_string(),
            timestamp_ms,
        }
    }

    /// `true` when this register strictly dominates `other` in the
    /// `(timestamp_ms, actor_id)` order.
    pub fn supersedes(&self, other: &Self) -> bool {
        match self.timestamp_ms.cmp(&other.timestamp_ms) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.actor_id > other.actor_id,
        }
    }
}

// ── RoleChangePayload ────────────────────────────────────────────

/// Wire payload of a role-change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChangePayload {
    /// The role the sender has just taken.
    pub my_role: SessionRole,
    /// The role the sender expects the receiver to take.
    pub counterpart_role: SessionRole,
    /// Register used to resolve concurrent requests.
    pub register: LwwRegister,
}

// ── RoleNegotiator ───────────────────────────────────────────────

/// Outcome of applying a received role-change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleDecision {
    /// The request won; the local role is now `SessionRole`.
    Applied(SessionRole),
    /// The request lost to an already-applied register and was discarded.
    Stale,
}

/// Tracks the local role and the last applied LWW register.
///
/// Registers are created only when the local user initiates a swap;
/// received registers are compared against the last applied one and
/// never mutated.
#[derive(Debug)]
pub struct RoleNegotiator {
    actor_id: String,
    role: SessionRole,
    last_applied: Option<LwwRegister>,
}

impl RoleNegotiator {
    /// Create a negotiator with a fresh random actor id.
    pub fn new(initial_role: SessionRole) -> Self {
        Self::with_actor_id(initial_role, Uuid::new_v4().to_string())
    }

    /// Create a negotiator with an explicit actor id (tests).
    pub fn with_actor_id(initial_role: SessionRole, actor_id: String) -> Self {
        Self {
            actor_id,
            role: initial_role,
            last_applied: None,
        }
    }

    /// The current local role.
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// This session's actor id.
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// The register of the last applied role change, if any.
    pub fn last_applied(&self) -> Option<&LwwRegister> {
        self.last_applied.as_ref()
    }

    /// Initiate a local role swap.
    ///
    /// Applies the swapped role immediately, records a fresh register,
    /// and returns the payload to transmit to the peer.
    pub fn request_role_swap(&mut self) -> RoleChangePayload {
        let register = LwwRegister::now(&self.actor_id);
        self.role = self.role.counterpart();
        self.last_applied = Some(register.clone());
        RoleChangePayload {
            my_role: self.role,
            counterpart_role: self.role.counterpart(),
            register,
        }
    }

    /// Apply a role-change request received from the peer.
    ///
    /// The received role is applied only when its register supersedes
    /// the last applied one; if no register has been applied yet the
    /// request always wins.
    pub fn on_role_change(&mut self, payload: &RoleChangePayload) -> RoleDecision {
        let wins = match &self.last_applied {
            None => true,
            Some(last) => payload.register.supersedes(last),
        };
        if !wins {
            return RoleDecision::Stale;
        }
        self.role = payload.counterpart_role;
        self.last_applied = Some(payload.register.clone());
        RoleDecision::Applied(self.role)
    }
}

// ── Tests ────────────────────────────────────────────────────────
