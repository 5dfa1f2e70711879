//! Payment lifecycle: funded creation, confirmation, failure.
//!
//! Creation is the engine's central correctness hazard: the balance check
//! and the payment insert must be serialized per account/period, otherwise
//! two concurrent creations can both observe sufficient funds. The funding
//! guard below closes that race; in-flight payments are part of the
//! balance subtraction for the same reason.

use std::sync::Arc;

use tracing::{info, instrument};

use casapay_common::{
    Actor, CasaPayError, EntityKind, InvoiceId, InvoiceState, NotificationKind, ObligationId,
    ObligationState, Payment, PaymentId, PaymentState, Phone, Result,
};

use crate::collaborators::{audit_entry, AccountResolver, AuditSink, Notifier};
use crate::metrics::Metrics;
use crate::obligations::ObligationManager;
use crate::store::Store;

/// What payment creation reports back to the caller.
#[derive(Debug, Clone)]
pub struct PaymentIntake {
    /// Created payment.
    pub payment_id: PaymentId,
    /// Its state (`in_progress`).
    pub state: PaymentState,
}

/// Execution metadata supplied on confirmation.
#[derive(Debug, Clone, Default)]
pub struct ConfirmPayment {
    /// Payment provider used.
    pub provider: Option<String>,
    /// Provider-side reference.
    pub reference: Option<String>,
    /// Proof-of-payment reference.
    pub proof_url: Option<String>,
}

/// Everything a confirmation changed, across the cascade.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    /// Confirmed payment.
    pub payment_id: PaymentId,
    /// Its state (`paid`).
    pub payment_state: PaymentState,
    /// The settled invoice and its state (`paid`).
    pub invoice_id: InvoiceId,
    pub invoice_state: InvoiceState,
    /// The invoice's obligation after the recount.
    pub obligation_id: ObligationId,
    pub obligation_state: ObligationState,
    /// True iff this confirmation completed the obligation.
    pub completed: bool,
    /// Successor obligation, when the cascade spawned one.
    pub successor_obligation_id: Option<ObligationId>,
}

/// Manager for the payment lifecycle.
pub struct PaymentManager {
    store: Arc<Store>,
    resolver: Arc<dyn AccountResolver>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    obligations: Arc<ObligationManager>,
    metrics: Arc<Metrics>,
}

impl PaymentManager {
    /// Create a new payment manager.
    pub fn new(
        store: Arc<Store>,
        resolver: Arc<dyn AccountResolver>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        obligations: Arc<ObligationManager>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            resolver,
            notifier,
            audit,
            obligations,
            metrics,
        }
    }

    /// Create a payment against a validated invoice.
    ///
    /// Fails with `InsufficientFunds` — creating no row — when the
    /// period's available balance does not cover the invoice amount.
    #[instrument(skip(self, actor), fields(phone = %phone, invoice_id = %invoice_id))]
    pub async fn create(
        &self,
        phone: &Phone,
        invoice_id: InvoiceId,
        actor: &Actor,
    ) -> Result<PaymentIntake> {
        let account = self
            .resolver
            .resolve_by_phone(phone)
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Account, phone))?;

        let invoice = self.store.invoice(invoice_id)?;
        if invoice.account_id != account.id {
            return Err(CasaPayError::not_found(EntityKind::Invoice, invoice_id));
        }

        // Only a validated invoice is fundable.
        if !invoice.state.can_transition_to(InvoiceState::Paid) {
            return Err(CasaPayError::InvalidTransition {
                entity: EntityKind::Invoice,
                id: invoice.id.to_string(),
                from: invoice.state.as_str(),
                to: InvoiceState::Paid.as_str(),
            });
        }

        let payment = {
            // Balance check and insert are serialized per account/period.
            // No awaits inside this block; the guard is held only across
            // store reads and one insert.
            let guard = self.store.funding_guard(account.id, invoice.period);
            let _serialized = guard.lock();

            let recharges = self.store.recharges_for_account(account.id);
            let payments = self.store.payments_with_periods(account.id);
            let balance = casapay_ledger::available(
                account.id,
                invoice.period,
                &recharges,
                payments.iter().map(|(p, period)| (p, *period)),
            );

            if !balance.covers(invoice.amount) {
                self.metrics.payment_rejected_for_funds();
                info!(
                    invoice_id = %invoice.id,
                    available = %balance.available,
                    required = %invoice.amount,
                    "Payment rejected: insufficient funds"
                );
                return Err(CasaPayError::InsufficientFunds {
                    available: balance.available,
                    required: invoice.amount,
                });
            }

            // Informational link only; the balance check above is the
            // actual funding decision.
            let recharge_link = self
                .store
                .latest_approved_recharge(account.id, invoice.period)
                .map(|r| r.id);

            self.store.insert_payment(Payment::new(
                account.id,
                invoice.id,
                recharge_link,
                invoice.amount,
            ))
        };

        self.metrics.payment_created();
        info!(payment_id = %payment.id, amount = %payment.amount_applied, "Payment created");

        self.audit.record(audit_entry(
            actor,
            "create_payment",
            EntityKind::Payment,
            payment.id,
            None::<&Payment>,
            Some(&payment),
        ));

        Ok(PaymentIntake {
            payment_id: payment.id,
            state: payment.state,
        })
    }

    /// Confirm a payment: settle the invoice and run the completion
    /// cascade on its obligation.
    #[instrument(skip(self, request, actor), fields(payment_id = %payment_id))]
    pub async fn confirm(
        &self,
        payment_id: PaymentId,
        request: ConfirmPayment,
        actor: &Actor,
    ) -> Result<PaymentOutcome> {
        let before = self.store.payment(payment_id)?;

        // Check both edges before committing either, so a bad request
        // cannot leave the payment flipped with its invoice untouched.
        if !before.state.can_transition_to(PaymentState::Paid) {
            return Err(CasaPayError::InvalidTransition {
                entity: EntityKind::Payment,
                id: payment_id.to_string(),
                from: before.state.as_str(),
                to: PaymentState::Paid.as_str(),
            });
        }
        let invoice_before = self.store.invoice(before.invoice_id)?;
        if !invoice_before.state.can_transition_to(InvoiceState::Paid) {
            return Err(CasaPayError::InvalidTransition {
                entity: EntityKind::Invoice,
                id: invoice_before.id.to_string(),
                from: invoice_before.state.as_str(),
                to: InvoiceState::Paid.as_str(),
            });
        }

        let payment = self.store.update_payment(payment_id, |payment| {
            payment.transition_to(PaymentState::Paid)?;
            payment.provider = request.provider.clone();
            payment.provider_ref = request.reference.clone();
            payment.proof_url = request.proof_url.clone();
            Ok(payment.clone())
        })?;

        let invoice = self.store.update_invoice(payment.invoice_id, |invoice| {
            invoice.transition_to(InvoiceState::Paid)?;
            Ok(invoice.clone())
        })?;

        // Must-succeed steps end here; the cascade handles its own
        // best-effort successor creation.
        let recount = self.obligations.recount(invoice.obligation_id).await?;

        self.notifier.notify(
            payment.account_id,
            NotificationKind::PaymentConfirmed,
            serde_json::json!({
                "payment_id": payment.id.to_string(),
                "invoice_id": invoice.id.to_string(),
                "service": invoice.service,
                "amount": payment.amount_applied,
                "period": invoice.period.canonical(),
            }),
        );

        self.metrics.payment_confirmed();
        info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            obligation_completed = recount.completed,
            "Payment confirmed"
        );

        self.audit.record(audit_entry(
            actor,
            "confirm_payment",
            EntityKind::Payment,
            payment_id,
            Some(&before),
            Some(&payment),
        ));

        Ok(PaymentOutcome {
            payment_id: payment.id,
            payment_state: payment.state,
            invoice_id: invoice.id,
            invoice_state: invoice.state,
            obligation_id: recount.obligation.id,
            obligation_state: recount.obligation.state,
            completed: recount.completed,
            successor_obligation_id: recount.successor.map(|s| s.id),
        })
    }

    /// Mark a payment as failed. The invoice stays `validated` and can be
    /// funded again by a fresh creation, which re-runs the balance check.
    #[instrument(skip(self, actor), fields(payment_id = %payment_id))]
    pub async fn fail(
        &self,
        payment_id: PaymentId,
        detail: &str,
        actor: &Actor,
    ) -> Result<Payment> {
        let before = self.store.payment(payment_id)?;

        let updated = self.store.update_payment(payment_id, |payment| {
            payment.transition_to(PaymentState::Failed)?;
            payment.failure_detail = Some(detail.to_string());
            Ok(payment.clone())
        })?;

        self.metrics.payment_failed();
        info!(payment_id = %updated.id, detail = %detail, "Payment failed");

        self.audit.record(audit_entry(
            actor,
            "fail_payment",
            EntityKind::Payment,
            payment_id,
            Some(&before),
            Some(&updated),
        ));

        Ok(updated)
    }

}
