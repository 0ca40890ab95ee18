//! Crisis alert lifecycle.
//!
//! ```text
//! active ──SendOffer──► fulfilled ──AcceptOffer──► acknowledged
//!   │  └──AcceptOffer──────────────────────────────────┘  │
//!   ├── Resolve ──► resolved   (also from fulfilled / acknowledged)
//!   └── Cancel  ──► cancelled  (also from fulfilled / acknowledged)
//! ```
//!
//! The database applies transitions as guarded `UPDATE ... WHERE status IN (..)`
//! statements built from [`Transition::sources`], so the SQL guard and this
//! table cannot drift apart.

use crate::models::{AlertStatus, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    SendOffer,
    AcceptOffer,
    Resolve(Outcome),
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} an alert that is {from}")]
pub struct TransitionError {
    pub from: AlertStatus,
    pub action: &'static str,
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Transition::SendOffer => "send an offer to",
            Transition::AcceptOffer => "accept an offer on",
            Transition::Resolve(_) => "resolve",
            Transition::Cancel => "cancel",
        }
    }

    /// States from which this transition may fire.
    pub fn sources(self) -> &'static [AlertStatus] {
        use AlertStatus::*;
        match self {
            Transition::SendOffer | Transition::AcceptOffer => &[Active, Fulfilled],
            Transition::Resolve(_) | Transition::Cancel => &[Active, Fulfilled, Acknowledged],
        }
    }

    pub fn target(self) -> AlertStatus {
        match self {
            Transition::SendOffer => AlertStatus::Fulfilled,
            Transition::AcceptOffer => AlertStatus::Acknowledged,
            Transition::Resolve(_) => AlertStatus::Resolved,
            Transition::Cancel => AlertStatus::Cancelled,
        }
    }
}

impl AlertStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Cancelled)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    pub fn apply(self, transition: Transition) -> Result<AlertStatus, TransitionError> {
        if transition.sources().contains(&self) {
            Ok(transition.target())
        } else {
            Err(TransitionError {
                from: self,
                action: transition.name(),
            })
        }
    }
}
