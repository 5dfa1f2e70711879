//! In-memory data store for the lifecycle engine.
//!
//! Entities live in concurrent maps keyed by their identifiers. Reads hand
//! out clones; mutations go through closure-based updaters that hold the
//! entry's shard lock, so a single entity is never half-written. The store
//! also owns the two serialization guards required by the engine's
//! concurrency contracts: the per-(account, period) funding guard and the
//! per-obligation recount guard.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use casapay_common::{
    Account, AccountId, AuditRecord, CasaPayError, EntityKind, Invoice, InvoiceId, Notification,
    NotificationId, Obligation, ObligationId, Payment, PaymentId, Period, Phone, Recharge,
    RechargeId, Result, ReviewFlag, ReviewId,
};

/// Result of an idempotent recharge insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RechargeInsert {
    /// A new row was created.
    Created(RechargeId),
    /// A recharge with the same external reference already existed.
    Duplicate(RechargeId),
}

/// Concurrent in-memory store for all engine entities.
#[derive(Default)]
pub struct Store {
    accounts: DashMap<AccountId, Account>,
    accounts_by_phone: DashMap<Phone, AccountId>,
    obligations: DashMap<ObligationId, Obligation>,
    invoices: DashMap<InvoiceId, Invoice>,
    recharges: DashMap<RechargeId, Recharge>,
    payments: DashMap<PaymentId, Payment>,
    reviews: DashMap<ReviewId, ReviewFlag>,
    notifications: DashMap<NotificationId, Notification>,
    audit_log: Mutex<Vec<AuditRecord>>,
    /// External transaction reference to recharge id. The atomic entry
    /// API on this index is what makes recharge intake exactly-once.
    recharge_refs: DashMap<String, RechargeId>,
    /// Serializes balance check + payment insert per account/period.
    funding_guards: DashMap<(AccountId, Period), Arc<Mutex<()>>>,
    /// Serializes counter recomputation per obligation.
    recount_guards: DashMap<ObligationId, Arc<Mutex<()>>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // --- Accounts ---

    /// Insert or replace an account, indexing it by phone.
    pub fn upsert_account(&self, account: Account) -> Account {
        self.accounts_by_phone
            .insert(account.phone.clone(), account.id);
        self.accounts.insert(account.id, account.clone());
        account
    }

    /// Look up an account by its contact handle.
    pub fn account_by_phone(&self, phone: &Phone) -> Option<Account> {
        let id = *self.accounts_by_phone.get(phone)?;
        self.accounts.get(&id).map(|a| a.clone())
    }

    /// Look up an account by id.
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).map(|a| a.clone())
    }

    // --- Obligations ---

    /// Insert an obligation row.
    pub fn insert_obligation(&self, obligation: Obligation) -> Obligation {
        self.obligations.insert(obligation.id, obligation.clone());
        obligation
    }

    /// Load an obligation by id.
    pub fn obligation(&self, id: ObligationId) -> Result<Obligation> {
        self.obligations
            .get(&id)
            .map(|o| o.clone())
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Obligation, id))
    }

    /// Mutate an obligation in place under its entry lock.
    pub fn update_obligation<T>(
        &self,
        id: ObligationId,
        f: impl FnOnce(&mut Obligation) -> Result<T>,
    ) -> Result<T> {
        match self.obligations.get_mut(&id) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(CasaPayError::not_found(EntityKind::Obligation, id)),
        }
    }

    /// Find the obligation for an account/period pair, if any.
    pub fn obligation_for_period(&self, account_id: AccountId, period: Period) -> Option<Obligation> {
        self.obligations
            .iter()
            .find(|o| o.account_id == account_id && o.period == period)
            .map(|o| o.clone())
    }

    /// All obligations owned by an account.
    pub fn obligations_for_account(&self, account_id: AccountId) -> Vec<Obligation> {
        let mut rows: Vec<Obligation> = self
            .obligations
            .iter()
            .filter(|o| o.account_id == account_id)
            .map(|o| o.clone())
            .collect();
        rows.sort_by_key(|o| o.period);
        rows
    }

    // --- Invoices ---

    /// Insert an invoice row.
    pub fn insert_invoice(&self, invoice: Invoice) -> Invoice {
        self.invoices.insert(invoice.id, invoice.clone());
        invoice
    }

    /// Load an invoice by id.
    pub fn invoice(&self, id: InvoiceId) -> Result<Invoice> {
        self.invoices
            .get(&id)
            .map(|i| i.clone())
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Invoice, id))
    }

    /// Mutate an invoice in place under its entry lock.
    pub fn update_invoice<T>(
        &self,
        id: InvoiceId,
        f: impl FnOnce(&mut Invoice) -> Result<T>,
    ) -> Result<T> {
        match self.invoices.get_mut(&id) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(CasaPayError::not_found(EntityKind::Invoice, id)),
        }
    }

    /// The full invoice set of an obligation, oldest first.
    pub fn invoices_for_obligation(&self, obligation_id: ObligationId) -> Vec<Invoice> {
        let mut rows: Vec<Invoice> = self
            .invoices
            .iter()
            .filter(|i| i.obligation_id == obligation_id)
            .map(|i| i.clone())
            .collect();
        rows.sort_by_key(|i| i.created_at);
        rows
    }

    // --- Recharges ---

    /// Insert a recharge, honoring external-reference idempotency.
    ///
    /// The reference index entry is claimed atomically, so two concurrent
    /// reports with the same reference cannot both insert.
    pub fn insert_recharge(&self, recharge: Recharge) -> RechargeInsert {
        if let Some(external_ref) = recharge.external_ref.clone() {
            match self.recharge_refs.entry(external_ref) {
                Entry::Occupied(existing) => {
                    return RechargeInsert::Duplicate(*existing.get());
                }
                Entry::Vacant(slot) => {
                    slot.insert(recharge.id);
                }
            }
        }
        let id = recharge.id;
        self.recharges.insert(id, recharge);
        RechargeInsert::Created(id)
    }

    /// Load a recharge by id.
    pub fn recharge(&self, id: RechargeId) -> Result<Recharge> {
        self.recharges
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Recharge, id))
    }

    /// Mutate a recharge in place under its entry lock.
    pub fn update_recharge<T>(
        &self,
        id: RechargeId,
        f: impl FnOnce(&mut Recharge) -> Result<T>,
    ) -> Result<T> {
        match self.recharges.get_mut(&id) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(CasaPayError::not_found(EntityKind::Recharge, id)),
        }
    }

    /// All recharges owned by an account.
    pub fn recharges_for_account(&self, account_id: AccountId) -> Vec<Recharge> {
        self.recharges
            .iter()
            .filter(|r| r.account_id == account_id)
            .map(|r| r.clone())
            .collect()
    }

    /// The most recently *approved* recharge of a period. Report order
    /// and approval order can differ; the approval stamp decides.
    pub fn latest_approved_recharge(
        &self,
        account_id: AccountId,
        period: Period,
    ) -> Option<Recharge> {
        self.recharges
            .iter()
            .filter(|r| {
                r.account_id == account_id && r.period == period && r.counts_toward_balance()
            })
            .max_by_key(|r| r.reviewed_at)
            .map(|r| r.clone())
    }

    // --- Payments ---

    /// Insert a payment row.
    pub fn insert_payment(&self, payment: Payment) -> Payment {
        self.payments.insert(payment.id, payment.clone());
        payment
    }

    /// Load a payment by id.
    pub fn payment(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(&id)
            .map(|p| p.clone())
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Payment, id))
    }

    /// Mutate a payment in place under its entry lock.
    pub fn update_payment<T>(
        &self,
        id: PaymentId,
        f: impl FnOnce(&mut Payment) -> Result<T>,
    ) -> Result<T> {
        match self.payments.get_mut(&id) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(CasaPayError::not_found(EntityKind::Payment, id)),
        }
    }

    /// All payments owned by an account.
    pub fn payments_for_account(&self, account_id: AccountId) -> Vec<Payment> {
        self.payments
            .iter()
            .filter(|p| p.account_id == account_id)
            .map(|p| p.clone())
            .collect()
    }

    /// An account's payments joined with their invoice's period, the shape
    /// the balance formula consumes. Payments whose invoice has vanished
    /// are skipped.
    pub fn payments_with_periods(&self, account_id: AccountId) -> Vec<(Payment, Period)> {
        self.payments
            .iter()
            .filter(|p| p.account_id == account_id)
            .filter_map(|p| {
                let period = self.invoices.get(&p.invoice_id).map(|i| i.period)?;
                Some((p.clone(), period))
            })
            .collect()
    }

    // --- Review flags ---

    /// Insert a review flag.
    pub fn insert_review(&self, flag: ReviewFlag) -> ReviewFlag {
        self.reviews.insert(flag.id, flag.clone());
        flag
    }

    /// Open flags pointing at an invoice.
    pub fn open_reviews_for_invoice(&self, invoice_id: InvoiceId) -> Vec<ReviewFlag> {
        self.reviews
            .iter()
            .filter(|f| f.invoice_id == Some(invoice_id) && f.is_open())
            .map(|f| f.clone())
            .collect()
    }

    /// Open flags pointing at a recharge.
    pub fn open_reviews_for_recharge(&self, recharge_id: RechargeId) -> Vec<ReviewFlag> {
        self.reviews
            .iter()
            .filter(|f| f.recharge_id == Some(recharge_id) && f.is_open())
            .map(|f| f.clone())
            .collect()
    }

    /// Mutate a review flag in place under its entry lock.
    pub fn update_review<T>(
        &self,
        id: ReviewId,
        f: impl FnOnce(&mut ReviewFlag) -> Result<T>,
    ) -> Result<T> {
        match self.reviews.get_mut(&id) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(CasaPayError::not_found(EntityKind::ReviewFlag, id)),
        }
    }

    // --- Notifications and audit ---

    /// Enqueue a notification.
    pub fn insert_notification(&self, notification: Notification) {
        self.notifications.insert(notification.id, notification);
    }

    /// Notifications enqueued for an account, oldest first.
    pub fn notifications_for_account(&self, account_id: AccountId) -> Vec<Notification> {
        let mut rows: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.account_id == account_id)
            .map(|n| n.clone())
            .collect();
        rows.sort_by_key(|n| n.created_at);
        rows
    }

    /// Append an audit record.
    pub fn append_audit(&self, record: AuditRecord) {
        self.audit_log.lock().push(record);
    }

    /// Snapshot of the audit trail.
    pub fn audit_trail(&self) -> Vec<AuditRecord> {
        self.audit_log.lock().clone()
    }

    // --- Serialization guards ---

    /// The funding guard for an account/period pair.
    ///
    /// Holders must not await while the guard is locked; the critical
    /// section is a bounded sequence of store operations.
    pub fn funding_guard(&self, account_id: AccountId, period: Period) -> Arc<Mutex<()>> {
        self.funding_guards
            .entry((account_id, period))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The recount guard for an obligation.
    pub fn recount_guard(&self, obligation_id: ObligationId) -> Arc<Mutex<()>> {
        self.recount_guards
            .entry(obligation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
