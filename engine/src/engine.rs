//! The engine facade: one entry point per lifecycle operation.
//!
//! External actors (the intake bot, administrators, automation) invoke one
//! operation at a time. The facade wires the managers to a shared store
//! and collaborator set, and exposes the read-only projections.

use std::sync::Arc;

use tracing::info;

use casapay_common::{
    Account, Actor, CasaPayError, EntityKind, Invoice, InvoiceId, Obligation, ObligationId,
    Payment, PaymentId, Period, Phone, Recharge, RechargeId, Result,
};
use casapay_ledger::{AccountTotals, AvailableBalance};

use crate::collaborators::{
    AccountResolver, AuditSink, Notifier, ReviewSink, StoreAuditTrail, StoreDirectory,
    StoreNotifier, StoreReviewQueue,
};
use crate::config::EngineConfig;
use crate::invoices::{CaptureInvoice, InvoiceIntake, InvoiceManager, ValidateInvoice};
use crate::metrics::Metrics;
use crate::obligations::{ObligationManager, RecountOutcome};
use crate::payments::{ConfirmPayment, PaymentIntake, PaymentManager, PaymentOutcome};
use crate::recharges::{RechargeIntake, RechargeManager, ReportRecharge};
use crate::store::Store;

/// Per-account rollup: all-time totals plus obligation progress.
#[derive(Debug, Clone)]
pub struct AccountSummary {
    /// The account itself.
    pub account: Account,
    /// All-time recharge/payment totals.
    pub totals: AccountTotals,
    /// The account's obligations with fresh counters, oldest period first.
    pub obligations: Vec<Obligation>,
}

/// The CasaPay lifecycle engine.
pub struct Engine {
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    resolver: Arc<dyn AccountResolver>,
    invoices: InvoiceManager,
    recharges: RechargeManager,
    payments: PaymentManager,
    obligations: Arc<ObligationManager>,
}

impl Engine {
    /// Create an engine with store-backed collaborators.
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(Store::new());
        let resolver: Arc<dyn AccountResolver> = Arc::new(StoreDirectory::new(store.clone()));
        let reviews: Arc<dyn ReviewSink> = Arc::new(StoreReviewQueue::new(store.clone()));
        let notifier: Arc<dyn Notifier> = Arc::new(StoreNotifier::new(
            store.clone(),
            config.notification_channel.clone(),
        ));
        let audit: Arc<dyn AuditSink> = Arc::new(StoreAuditTrail::new(store.clone()));
        Self::with_collaborators(config, store, resolver, reviews, notifier, audit)
    }

    /// Create an engine over explicit collaborators.
    pub fn with_collaborators(
        config: EngineConfig,
        store: Arc<Store>,
        resolver: Arc<dyn AccountResolver>,
        reviews: Arc<dyn ReviewSink>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());

        let obligations = Arc::new(ObligationManager::new(
            store.clone(),
            resolver.clone(),
            notifier.clone(),
            audit.clone(),
            metrics.clone(),
            &config,
        ));
        let invoices = InvoiceManager::new(
            store.clone(),
            resolver.clone(),
            reviews.clone(),
            notifier.clone(),
            audit.clone(),
            obligations.clone(),
            metrics.clone(),
        );
        let recharges = RechargeManager::new(
            store.clone(),
            resolver.clone(),
            reviews,
            notifier.clone(),
            audit.clone(),
            metrics.clone(),
            config.recharge_channel.clone(),
        );
        let payments = PaymentManager::new(
            store.clone(),
            resolver.clone(),
            notifier,
            audit,
            obligations.clone(),
            metrics.clone(),
        );

        info!("Engine assembled");

        Self {
            store,
            metrics,
            resolver,
            invoices,
            recharges,
            payments,
            obligations,
        }
    }

    // --- Accounts ---

    /// Register (or replace) an account. Account creation belongs to the
    /// identity collaborator; this passthrough exists for bootstrap and
    /// tests.
    pub fn register_account(&self, phone: impl Into<Phone>, name: &str) -> Account {
        self.store.upsert_account(Account::new(phone, name))
    }

    // --- Invoices ---

    /// Capture an invoice into an obligation.
    pub async fn capture_invoice(
        &self,
        request: CaptureInvoice,
        actor: &Actor,
    ) -> Result<InvoiceIntake> {
        self.invoices.capture(request, actor).await
    }

    /// Confirm an invoice's amount and dates.
    pub async fn validate_invoice(
        &self,
        invoice_id: InvoiceId,
        request: ValidateInvoice,
        actor: &Actor,
    ) -> Result<Invoice> {
        self.invoices.validate(invoice_id, request, actor).await
    }

    /// Reject an invoice.
    pub async fn reject_invoice(
        &self,
        invoice_id: InvoiceId,
        reason: &str,
        actor: &Actor,
    ) -> Result<Invoice> {
        self.invoices.reject(invoice_id, reason, actor).await
    }

    /// Read-only projection of an obligation's invoices.
    pub async fn invoices_for_obligation(
        &self,
        obligation_id: ObligationId,
    ) -> Result<Vec<Invoice>> {
        self.invoices.list_by_obligation(obligation_id).await
    }

    // --- Recharges ---

    /// Report a deposit of funds (idempotent on the external reference).
    pub async fn report_recharge(
        &self,
        request: ReportRecharge,
        actor: &Actor,
    ) -> Result<RechargeIntake> {
        self.recharges.report(request, actor).await
    }

    /// Approve a recharge.
    pub async fn approve_recharge(
        &self,
        recharge_id: RechargeId,
        notes: Option<String>,
        actor: &Actor,
    ) -> Result<Recharge> {
        self.recharges.approve(recharge_id, notes, actor).await
    }

    /// Reject a recharge.
    pub async fn reject_recharge(
        &self,
        recharge_id: RechargeId,
        reason: &str,
        actor: &Actor,
    ) -> Result<Recharge> {
        self.recharges.reject(recharge_id, reason, actor).await
    }

    // --- Payments ---

    /// Create a payment against a validated invoice.
    pub async fn create_payment(
        &self,
        phone: &Phone,
        invoice_id: InvoiceId,
        actor: &Actor,
    ) -> Result<PaymentIntake> {
        self.payments.create(phone, invoice_id, actor).await
    }

    /// Confirm a payment and run the completion cascade.
    pub async fn confirm_payment(
        &self,
        payment_id: PaymentId,
        request: ConfirmPayment,
        actor: &Actor,
    ) -> Result<PaymentOutcome> {
        self.payments.confirm(payment_id, request, actor).await
    }

    /// Mark a payment as failed, leaving its invoice fundable.
    pub async fn fail_payment(
        &self,
        payment_id: PaymentId,
        detail: &str,
        actor: &Actor,
    ) -> Result<Payment> {
        self.payments.fail(payment_id, detail, actor).await
    }

    // --- Obligations ---

    /// Explicitly create an obligation.
    pub async fn create_obligation(
        &self,
        phone: &Phone,
        period: &str,
        description: &str,
        actor: &Actor,
    ) -> Result<Obligation> {
        self.obligations
            .create(phone, period, description, actor)
            .await
    }

    /// All obligations owned by an account.
    pub async fn obligations_for_account(&self, phone: &Phone) -> Result<Vec<Obligation>> {
        self.obligations.list_for_account(phone).await
    }

    /// Recompute an obligation's counters. Idempotent.
    pub async fn recount_obligation(&self, obligation_id: ObligationId) -> Result<RecountOutcome> {
        self.obligations.recount(obligation_id).await
    }

    // --- Projections ---

    /// Funds available to an account for a period.
    pub async fn available_balance(&self, phone: &Phone, period: &str) -> Result<AvailableBalance> {
        let account = self
            .resolver
            .resolve_by_phone(phone)
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Account, phone))?;
        let period = Period::parse(period)?;

        let recharges = self.store.recharges_for_account(account.id);
        let payments = self.store.payments_with_periods(account.id);
        Ok(casapay_ledger::available(
            account.id,
            period,
            &recharges,
            payments.iter().map(|(p, invoice_period)| (p, *invoice_period)),
        ))
    }

    /// Per-account rollup of totals and obligation progress.
    pub async fn account_summary(&self, phone: &Phone) -> Result<AccountSummary> {
        let account = self
            .resolver
            .resolve_by_phone(phone)
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Account, phone))?;

        let recharges = self.store.recharges_for_account(account.id);
        let payments = self.store.payments_for_account(account.id);
        let totals = casapay_ledger::account_totals(account.id, &recharges, &payments);

        Ok(AccountSummary {
            obligations: self.store.obligations_for_account(account.id),
            account,
            totals,
        })
    }

    /// The underlying store (projections, tests, delivery workers).
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Engine counters.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}
