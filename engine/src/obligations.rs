//! Obligation lifecycle and the completion cascade.
//!
//! `recount` is the only writer of the denormalized counters. It re-reads
//! the obligation's full invoice set under the per-obligation guard, never
//! applies deltas, and is idempotent. When a recount moves an obligation
//! into `completed`, the cascade spawns the next period's obligation and
//! clones the invoice set — best-effort: a failure there is logged and
//! never propagated to the mutation that triggered the recount.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use casapay_common::{
    Actor, CasaPayError, EntityKind, InvoiceState, NotificationKind, Obligation, ObligationId,
    ObligationState, Period, Phone, Result,
};
use casapay_ledger::ObligationProgress;

use crate::collaborators::{audit_entry, AccountResolver, AuditSink, Notifier};
use crate::config::EngineConfig;
use crate::metrics::Metrics;
use crate::store::Store;

/// Result of a recount, including what the cascade did.
#[derive(Debug, Clone)]
pub struct RecountOutcome {
    /// The obligation with fresh counters and state.
    pub obligation: Obligation,
    /// True iff this call transitioned the obligation into `completed`.
    pub completed: bool,
    /// The successor obligation, when one was spawned by this call.
    pub successor: Option<Obligation>,
}

/// Manager for obligations and their completion cascade.
pub struct ObligationManager {
    store: Arc<Store>,
    resolver: Arc<dyn AccountResolver>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
    auto_spawn_successor: bool,
}

impl ObligationManager {
    /// Create a new obligation manager.
    pub fn new(
        store: Arc<Store>,
        resolver: Arc<dyn AccountResolver>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            notifier,
            audit,
            metrics,
            auto_spawn_successor: config.auto_spawn_successor,
        }
    }

    /// Explicitly create an obligation for an account and period.
    ///
    /// One obligation per account/period: a second create for the same
    /// pair is a conflict.
    #[instrument(skip(self, actor), fields(phone = %phone))]
    pub async fn create(
        &self,
        phone: &Phone,
        period: &str,
        description: &str,
        actor: &Actor,
    ) -> Result<Obligation> {
        let account = self
            .resolver
            .resolve_by_phone(phone)
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Account, phone))?;
        let period = Period::parse(period)?;

        if let Some(existing) = self.store.obligation_for_period(account.id, period) {
            return Err(CasaPayError::Conflict(format!(
                "obligation {} already exists for period {}",
                existing.id, period
            )));
        }

        let obligation = self
            .store
            .insert_obligation(Obligation::new(account.id, period, description));

        info!(
            obligation_id = %obligation.id,
            account_id = %account.id,
            period = %period,
            "Obligation created"
        );

        self.audit.record(audit_entry(
            actor,
            "create_obligation",
            EntityKind::Obligation,
            obligation.id,
            None::<&Obligation>,
            Some(&obligation),
        ));

        Ok(obligation)
    }

    /// All obligations owned by the account behind `phone`.
    pub async fn list_for_account(&self, phone: &Phone) -> Result<Vec<Obligation>> {
        let account = self
            .resolver
            .resolve_by_phone(phone)
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Account, phone))?;
        Ok(self.store.obligations_for_account(account.id))
    }

    /// Recompute an obligation's counters from its invoice set and run
    /// the completion cascade if every invoice is now paid.
    ///
    /// Idempotent: a second call with no invoice change yields the same
    /// counters and state, and never re-triggers the cascade.
    #[instrument(skip(self), fields(obligation_id = %obligation_id))]
    pub async fn recount(&self, obligation_id: ObligationId) -> Result<RecountOutcome> {
        let guard = self.store.recount_guard(obligation_id);
        let _serialized = guard.lock();

        // Fresh full re-read; concurrent recounts each see a complete set,
        // so last-writer-wins on the counters is safe.
        let invoices = self.store.invoices_for_obligation(obligation_id);
        let progress = ObligationProgress::from_invoices(&invoices);

        let (obligation, completed) = self.store.update_obligation(obligation_id, |o| {
            progress.apply_to(o);
            let mut completed = false;
            if let Some(target) = progress.target_state(o.state) {
                if target != o.state {
                    // A one-invoice obligation can complete straight from
                    // `active`; the table requires passing through
                    // `in_progress`.
                    if target == ObligationState::Completed && o.state == ObligationState::Active {
                        o.transition_to(ObligationState::InProgress)?;
                    }
                    o.transition_to(target)?;
                    completed = target == ObligationState::Completed;
                }
            }
            Ok((o.clone(), completed))
        })?;

        debug!(
            total = obligation.total_invoices,
            paid = obligation.invoices_paid,
            state = %obligation.state,
            "Obligation recounted"
        );

        let mut successor = None;
        if completed {
            self.metrics.obligation_completed();
            info!(obligation_id = %obligation.id, period = %obligation.period, "Obligation completed");

            self.notifier.notify(
                obligation.account_id,
                NotificationKind::ObligationCompleted,
                serde_json::json!({
                    "obligation_id": obligation.id.to_string(),
                    "period": obligation.period.canonical(),
                    "total_invoices": obligation.total_invoices,
                    "amount_paid": obligation.amount_paid,
                }),
            );

            self.audit.record(audit_entry(
                &Actor::system(),
                "complete_obligation",
                EntityKind::Obligation,
                obligation.id,
                None::<&Obligation>,
                Some(&obligation),
            ));

            if self.auto_spawn_successor {
                // Best-effort: the payment confirmation that got us here
                // already succeeded and must not be rolled back.
                match self.spawn_successor(&obligation) {
                    Ok(spawned) => successor = spawned,
                    Err(e) => {
                        warn!(
                            obligation_id = %obligation.id,
                            error = %e,
                            "Successor obligation creation failed"
                        );
                    }
                }
            }
        }

        Ok(RecountOutcome {
            obligation,
            completed,
            successor,
        })
    }

    /// Create the next period's obligation and clone the completed
    /// obligation's non-rejected invoices into it.
    ///
    /// Returns `None` when a successor already exists for the account and
    /// period — repeated completion triggers must not duplicate it.
    fn spawn_successor(&self, completed: &Obligation) -> Result<Option<Obligation>> {
        let next_period = completed.period.next();

        if let Some(existing) = self
            .store
            .obligation_for_period(completed.account_id, next_period)
        {
            debug!(
                obligation_id = %completed.id,
                successor_id = %existing.id,
                "Successor already exists, reusing"
            );
            return Ok(None);
        }

        let successor = self.store.insert_obligation(Obligation::new(
            completed.account_id,
            next_period,
            completed.description.clone(),
        ));

        let mut cloned = 0u32;
        for invoice in self
            .store
            .invoices_for_obligation(completed.id)
            .iter()
            .filter(|i| i.state != InvoiceState::Rejected)
        {
            self.store
                .insert_invoice(invoice.clone_into(successor.id, next_period));
            cloned += 1;
        }

        // Counters over the fresh clones; all of them sit in `extracted`,
        // so the successor stays `active`.
        let clones = self.store.invoices_for_obligation(successor.id);
        let progress = ObligationProgress::from_invoices(&clones);
        let successor = self.store.update_obligation(successor.id, |o| {
            progress.apply_to(o);
            Ok(o.clone())
        })?;

        self.metrics.obligation_spawned();
        info!(
            obligation_id = %successor.id,
            period = %next_period,
            cloned_invoices = cloned,
            "Successor obligation created"
        );

        self.notifier.notify(
            successor.account_id,
            NotificationKind::ObligationCreated,
            serde_json::json!({
                "obligation_id": successor.id.to_string(),
                "period": next_period.canonical(),
                "cloned_invoices": cloned,
            }),
        );

        self.audit.record(audit_entry(
            &Actor::system(),
            "spawn_obligation",
            EntityKind::Obligation,
            successor.id,
            None::<&Obligation>,
            Some(&successor),
        ));

        Ok(Some(successor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{StoreAuditTrail, StoreDirectory, StoreNotifier};
    use casapay_common::{Account, ExtractionMeta, Invoice};
    use rust_decimal::Decimal;

    fn manager() -> (Arc<Store>, ObligationManager) {
        let store = Arc::new(Store::new());
        let config = EngineConfig::default();
        let manager = ObligationManager::new(
            store.clone(),
            Arc::new(StoreDirectory::new(store.clone())),
            Arc::new(StoreNotifier::new(store.clone(), "whatsapp")),
            Arc::new(StoreAuditTrail::new(store.clone())),
            Arc::new(Metrics::new()),
            &config,
        );
        (store, manager)
    }

    fn seed_invoice(
        store: &Store,
        obligation: &Obligation,
        amount: i64,
        state: InvoiceState,
    ) -> Invoice {
        let mut invoice = Invoice::new(
            obligation.account_id,
            obligation.id,
            "energia",
            obligation.period,
            Some(Decimal::from(amount)),
            InvoiceState::Extracted,
            ExtractionMeta::ok(),
        );
        invoice.state = state;
        store.insert_invoice(invoice.clone());
        invoice
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_period() {
        let (store, manager) = manager();
        store.upsert_account(Account::new("+573001112233", "Marta"));

        let phone = Phone::new("+573001112233");
        manager
            .create(&phone, "2026-02-10", "February bills", &Actor::bot())
            .await
            .unwrap();
        let err = manager
            .create(&phone, "2026-02-01", "February again", &Actor::bot())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT_DUPLICATE");
    }

    #[tokio::test]
    async fn test_recount_is_idempotent() {
        let (store, manager) = manager();
        let account = store.upsert_account(Account::new("+573001112233", "Marta"));
        let obligation = store.insert_obligation(Obligation::new(
            account.id,
            Period::new(2026, 2).unwrap(),
            "February",
        ));
        seed_invoice(&store, &obligation, 100_000, InvoiceState::Paid);
        seed_invoice(&store, &obligation, 80_000, InvoiceState::Validated);

        let first = manager.recount(obligation.id).await.unwrap();
        let second = manager.recount(obligation.id).await.unwrap();

        assert_eq!(first.obligation.total_invoices, 2);
        assert_eq!(first.obligation.invoices_paid, 1);
        assert_eq!(first.obligation.state, ObligationState::InProgress);
        assert_eq!(
            first.obligation.total_invoices,
            second.obligation.total_invoices
        );
        assert_eq!(first.obligation.state, second.obligation.state);
        assert!(!second.completed);
    }

    #[tokio::test]
    async fn test_completion_spawns_successor_with_clones() {
        let (store, manager) = manager();
        let account = store.upsert_account(Account::new("+573001112233", "Marta"));
        let obligation = store.insert_obligation(Obligation::new(
            account.id,
            Period::new(2026, 2).unwrap(),
            "February",
        ));
        seed_invoice(&store, &obligation, 100_000, InvoiceState::Paid);
        seed_invoice(&store, &obligation, 80_000, InvoiceState::Paid);
        seed_invoice(&store, &obligation, 999_000, InvoiceState::Rejected);

        let outcome = manager.recount(obligation.id).await.unwrap();

        assert!(outcome.completed);
        assert_eq!(outcome.obligation.state, ObligationState::Completed);
        assert!(outcome.obligation.completed_at.is_some());

        let successor = outcome.successor.expect("successor spawned");
        assert_eq!(successor.period.canonical(), "2026-03-01");
        assert_eq!(successor.state, ObligationState::Active);
        // Rejected invoices are not cloned.
        assert_eq!(successor.total_invoices, 2);
        assert_eq!(successor.invoices_paid, 0);

        let clones = store.invoices_for_obligation(successor.id);
        assert_eq!(clones.len(), 2);
        assert!(clones.iter().all(|i| i.state == InvoiceState::Extracted));
    }

    #[tokio::test]
    async fn test_repeated_completion_reuses_successor() {
        let (store, manager) = manager();
        let account = store.upsert_account(Account::new("+573001112233", "Marta"));
        let obligation = store.insert_obligation(Obligation::new(
            account.id,
            Period::new(2026, 2).unwrap(),
            "February",
        ));
        seed_invoice(&store, &obligation, 100_000, InvoiceState::Paid);

        let first = manager.recount(obligation.id).await.unwrap();
        assert!(first.completed);
        assert!(first.successor.is_some());

        // Second recount: already completed, cascade must not re-fire.
        let second = manager.recount(obligation.id).await.unwrap();
        assert!(!second.completed);
        assert!(second.successor.is_none());

        let march = Period::new(2026, 3).unwrap();
        let successors: Vec<_> = store
            .obligations_for_account(account.id)
            .into_iter()
            .filter(|o| o.period == march)
            .collect();
        assert_eq!(successors.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_obligation_stays_active() {
        let (store, manager) = manager();
        let account = store.upsert_account(Account::new("+573001112233", "Marta"));
        let obligation = store.insert_obligation(Obligation::new(
            account.id,
            Period::new(2026, 2).unwrap(),
            "February",
        ));

        let outcome = manager.recount(obligation.id).await.unwrap();
        assert_eq!(outcome.obligation.state, ObligationState::Active);
        assert!(!outcome.completed);
        assert_eq!(outcome.obligation.total_invoices, 0);
    }

    #[tokio::test]
    async fn test_single_invoice_completes_from_active() {
        let (store, manager) = manager();
        let account = store.upsert_account(Account::new("+573001112233", "Marta"));
        let obligation = store.insert_obligation(Obligation::new(
            account.id,
            Period::new(2026, 12).unwrap(),
            "December",
        ));
        seed_invoice(&store, &obligation, 42_000, InvoiceState::Paid);

        let outcome = manager.recount(obligation.id).await.unwrap();
        assert!(outcome.completed);
        // Successor wraps into the next year.
        assert_eq!(
            outcome.successor.unwrap().period.canonical(),
            "2027-01-01"
        );
    }
}
