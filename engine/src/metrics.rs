//! Metrics collection for engine monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters. Cheap to bump from any thread.
#[derive(Default)]
pub struct Metrics {
    /// Invoices captured (both intake states).
    pub invoices_captured: AtomicU64,
    /// Invoices flagged for manual review at capture.
    pub invoices_flagged: AtomicU64,
    /// Invoices validated by an admin.
    pub invoices_validated: AtomicU64,
    /// Invoices rejected by an admin.
    pub invoices_rejected: AtomicU64,
    /// Recharges reported (new rows only).
    pub recharges_reported: AtomicU64,
    /// Recharge reports answered from the idempotency index.
    pub recharges_deduplicated: AtomicU64,
    /// Recharges approved.
    pub recharges_approved: AtomicU64,
    /// Recharges rejected.
    pub recharges_rejected: AtomicU64,
    /// Payments created (in flight).
    pub payments_created: AtomicU64,
    /// Payments confirmed.
    pub payments_confirmed: AtomicU64,
    /// Payments failed.
    pub payments_failed: AtomicU64,
    /// Payment creations rejected for insufficient funds.
    pub payments_rejected_funds: AtomicU64,
    /// Obligations completed by the cascade.
    pub obligations_completed: AtomicU64,
    /// Successor obligations spawned by the cascade.
    pub obligations_spawned: AtomicU64,
}

impl Metrics {
    /// Create a zeroed metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invoice_captured(&self, flagged: bool) {
        self.invoices_captured.fetch_add(1, Ordering::Relaxed);
        if flagged {
            self.invoices_flagged.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn invoice_validated(&self) {
        self.invoices_validated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invoice_rejected(&self) {
        self.invoices_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recharge_reported(&self, deduplicated: bool) {
        if deduplicated {
            self.recharges_deduplicated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.recharges_reported.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn recharge_approved(&self) {
        self.recharges_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recharge_rejected(&self) {
        self.recharges_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payment_created(&self) {
        self.payments_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payment_confirmed(&self) {
        self.payments_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payment_failed(&self) {
        self.payments_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payment_rejected_for_funds(&self) {
        self.payments_rejected_funds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn obligation_completed(&self) {
        self.obligations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn obligation_spawned(&self) {
        self.obligations_spawned.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.invoice_captured(true);
        metrics.invoice_captured(false);
        metrics.payment_created();
        metrics.payment_rejected_for_funds();

        assert_eq!(metrics.invoices_captured.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.invoices_flagged.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.payments_created.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.payments_rejected_funds.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_recharge_dedup_split() {
        let metrics = Metrics::new();
        metrics.recharge_reported(false);
        metrics.recharge_reported(true);

        assert_eq!(metrics.recharges_reported.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.recharges_deduplicated.load(Ordering::Relaxed), 1);
    }
}
