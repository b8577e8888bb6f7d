//! The pricing decision and its settlement artifact.
//!
//! `Decision` is a sum type: exactly one variant describes the outcome of a
//! negotiation turn. `Reveal` is deliberately a tagged union rather than two
//! optional fields so that a reservation code and a payment lock can never
//! coexist on the wire.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Settlement artifact attached to an accepted offer.
///
/// Chosen once, at accept time, by the crypto-settlement toggle; immutable
/// for the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reveal {
    /// Immediate reveal: an opaque reservation code.
    ReservationCode { code: String },
    /// Deferred reveal: the code is released only after the deal is PAID.
    PaymentLock { deal_id: Uuid },
}

/// Outcome of one negotiation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    Accepted {
        final_price: f64,
        reveal: Reveal,
    },
    Countered {
        proposed_price: f64,
        reason_code: String,
        message: Option<String>,
    },
    Rejected {
        reason_code: String,
    },
    UiRequired {
        template_id: String,
        context: BTreeMap<String, String>,
    },
}

impl Decision {
    /// Status label used at the HTTP boundary.
    pub fn status_label(&self) -> &'static str {
        match self {
            Decision::Accepted { .. } => "accepted",
            Decision::Countered { .. } => "countered",
            Decision::Rejected { .. } => "rejected",
            Decision::UiRequired { .. } => "ui_required",
        }
    }
}
