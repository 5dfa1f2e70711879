//! Obligation-progress recomputation.
//!
//! The denormalized counters on an obligation are a cache over its invoice
//! set. This module recomputes them as a pure function over freshly read
//! invoices; it never applies deltas. The recount in the engine is the only
//! writer of these counters.

use casapay_common::{Invoice, InvoiceState, Obligation, ObligationState};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Recomputed counters for one obligation.
///
/// Rejected invoices are excluded throughout so a rejected bill can never
/// block completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationProgress {
    /// Count of non-rejected invoices.
    pub total_invoices: u32,
    /// Count of invoices in `paid` state.
    pub invoices_paid: u32,
    /// Sum of non-rejected invoice amounts.
    pub amount_total: Decimal,
    /// Sum of paid invoice amounts.
    pub amount_paid: Decimal,
}

impl ObligationProgress {
    /// Recompute counters from an obligation's full invoice set.
    pub fn from_invoices<'a, I>(invoices: I) -> Self
    where
        I: IntoIterator<Item = &'a Invoice>,
    {
        let mut progress = Self {
            total_invoices: 0,
            invoices_paid: 0,
            amount_total: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
        };

        for invoice in invoices {
            if invoice.state == InvoiceState::Rejected {
                continue;
            }
            progress.total_invoices += 1;
            progress.amount_total += invoice.amount;
            if invoice.state == InvoiceState::Paid {
                progress.invoices_paid += 1;
                progress.amount_paid += invoice.amount;
            }
        }

        progress
    }

    /// Every invoice paid, and at least one invoice exists.
    pub fn is_complete(&self) -> bool {
        self.total_invoices > 0 && self.invoices_paid == self.total_invoices
    }

    /// The state the obligation should hold given these counters.
    ///
    /// `None` means "leave the state as it is": nothing paid yet, or the
    /// obligation already sits in a terminal state.
    pub fn target_state(&self, current: ObligationState) -> Option<ObligationState> {
        if current.is_terminal() {
            return None;
        }
        if self.is_complete() {
            Some(ObligationState::Completed)
        } else if self.invoices_paid > 0 {
            Some(ObligationState::InProgress)
        } else {
            None
        }
    }

    /// Write the counters onto the obligation row.
    pub fn apply_to(&self, obligation: &mut Obligation) {
        obligation.total_invoices = self.total_invoices;
        obligation.invoices_paid = self.invoices_paid;
        obligation.amount_total = self.amount_total;
        obligation.amount_paid = self.amount_paid;
    }
}
