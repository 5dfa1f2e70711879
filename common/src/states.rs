//! Lifecycle states and the allowed-transition table.
//!
//! This module is the single source of truth for legal lifecycle edges.
//! Every manager consults `can_transition_to` before mutating state and
//! rejects anything the table does not explicitly list. Unknown entities
//! and unknown source states fail closed.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! state_enum {
    (
        $(#[$doc:meta])* $name:ident,
        { $($variant:ident => $str:expr => [$($next:ident),*]),+ $(,)? }
    ) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// All states of this entity.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Snake-case wire name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)+
                }
            }

            /// Parse a wire name; unknown names yield `None` (fail-closed).
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($str => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// States reachable from this one.
            pub fn valid_transitions(&self) -> &'static [$name] {
                match self {
                    $($name::$variant => &[$($name::$next,)*],)+
                }
            }

            /// True iff `next` is an allowed transition target.
            pub fn can_transition_to(&self, next: $name) -> bool {
                self.valid_transitions().contains(&next)
            }

            /// True iff no further transitions exist.
            pub fn is_terminal(&self) -> bool {
                self.valid_transitions().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

state_enum! {
    /// Recharge lifecycle: funds reported by an account, then screened.
    RechargeState,
    {
        Reported => "reported" => [PendingValidation],
        PendingValidation => "pending_validation" => [Approved, Rejected],
        Approved => "approved" => [],
        Rejected => "rejected" => [],
    }
}

state_enum! {
    /// Invoice lifecycle: ingested, confirmed by an admin, then settled.
    InvoiceState,
    {
        Extracted => "extracted" => [NeedsReview, Validated],
        NeedsReview => "needs_review" => [Validated, Rejected],
        Validated => "validated" => [Paid],
        Rejected => "rejected" => [],
        Paid => "paid" => [],
    }
}

state_enum! {
    /// Payment lifecycle: an application of funds to one invoice.
    PaymentState,
    {
        Pending => "pending" => [InProgress, Cancelled],
        InProgress => "in_progress" => [Paid, Failed],
        Paid => "paid" => [],
        Failed => "failed" => [],
        Cancelled => "cancelled" => [],
    }
}

state_enum! {
    /// Obligation lifecycle: a month's invoice bundle moving to completion.
    ObligationState,
    {
        Active => "active" => [InProgress, Cancelled],
        InProgress => "in_progress" => [Completed, Cancelled],
        Completed => "completed" => [],
        Cancelled => "cancelled" => [],
    }
}

state_enum! {
    /// Review-flag lifecycle: a manual-attention marker worked by admins.
    ReviewState,
    {
        Pending => "pending" => [InProgress, Dismissed, Resolved],
        InProgress => "in_progress" => [Resolved, Dismissed],
        Resolved => "resolved" => [],
        Dismissed => "dismissed" => [],
    }
}

/// The entity kinds the engine reports on. All but `Account` are
/// governed by the transition table; accounts have no lifecycle beyond
/// the activation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Account,
    Recharge,
    Invoice,
    Payment,
    Obligation,
    ReviewFlag,
}

impl EntityKind {
    /// Snake-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Recharge => "recharge",
            EntityKind::Invoice => "invoice",
            EntityKind::Payment => "payment",
            EntityKind::Obligation => "obligation",
            EntityKind::ReviewFlag => "review_flag",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String-level transition check for callers working with wire names.
///
/// Unknown entity, unknown `from`, or unknown `to` all return `false`.
pub fn can_transition(entity: &str, from: &str, to: &str) -> bool {
    fn check<S: Copy + PartialEq + 'static>(
        parse: impl Fn(&str) -> Option<S>,
        targets: impl Fn(S) -> &'static [S],
        from: &str,
        to: &str,
    ) -> bool {
        match (parse(from), parse(to)) {
            (Some(from), Some(to)) => targets(from).contains(&to),
            _ => false,
        }
    }

    match entity {
        "recharge" => check(RechargeState::parse, |s| s.valid_transitions(), from, to),
        "invoice" => check(InvoiceState::parse, |s| s.valid_transitions(), from, to),
        "payment" => check(PaymentState::parse, |s| s.valid_transitions(), from, to),
        "obligation" => check(ObligationState::parse, |s| s.valid_transitions(), from, to),
        "review_flag" => check(ReviewState::parse, |s| s.valid_transitions(), from, to),
        _ => false,
    }
}
