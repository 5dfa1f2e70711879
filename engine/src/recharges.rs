//! Recharge lifecycle: idempotent intake, approval, rejection.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use casapay_common::{
    Actor, CasaPayError, EntityKind, NotificationKind, Period, Phone, Recharge, RechargeId,
    RechargeState, Result, ReviewFlag, ReviewPriority,
};

use crate::collaborators::{audit_entry, AccountResolver, AuditSink, Notifier, ReviewSink};
use crate::metrics::Metrics;
use crate::store::{RechargeInsert, Store};

/// Recharge report, as forwarded by the intake bot.
#[derive(Debug, Clone)]
pub struct ReportRecharge {
    /// Contact handle of the owning account.
    pub phone: Phone,
    /// Any date-like value inside the funding month.
    pub period: String,
    /// Deposited amount.
    pub amount: Decimal,
    /// Proof-of-deposit reference.
    pub proof_url: Option<String>,
    /// External transaction reference; reports sharing it are the same
    /// recharge.
    pub external_ref: Option<String>,
}

/// What intake reports back to the caller.
#[derive(Debug, Clone)]
pub struct RechargeIntake {
    /// The recharge behind this report.
    pub recharge_id: RechargeId,
    /// Its current state.
    pub state: RechargeState,
    /// True when the report matched an existing external reference.
    pub deduplicated: bool,
}

/// Manager for the recharge lifecycle.
pub struct RechargeManager {
    store: Arc<Store>,
    resolver: Arc<dyn AccountResolver>,
    reviews: Arc<dyn ReviewSink>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
    channel: String,
}

impl RechargeManager {
    /// Create a new recharge manager.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        resolver: Arc<dyn AccountResolver>,
        reviews: Arc<dyn ReviewSink>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            reviews,
            notifier,
            audit,
            metrics,
            channel: channel.into(),
        }
    }

    /// Report a deposit of funds.
    ///
    /// Intake is idempotent on the external reference: a repeated report
    /// answers with the existing recharge instead of creating a duplicate.
    /// This is defined success, not an error.
    #[instrument(skip(self, request, actor), fields(phone = %request.phone))]
    pub async fn report(&self, request: ReportRecharge, actor: &Actor) -> Result<RechargeIntake> {
        let account = self
            .resolver
            .resolve_by_phone(&request.phone)
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Account, &request.phone))?;

        let period = Period::parse(&request.period)?;

        let recharge = Recharge::new(
            account.id,
            period,
            request.amount,
            self.channel.clone(),
            request.proof_url,
            request.external_ref,
        );

        let recharge_id = match self.store.insert_recharge(recharge) {
            RechargeInsert::Duplicate(existing_id) => {
                let existing = self.store.recharge(existing_id)?;
                self.metrics.recharge_reported(true);
                info!(
                    recharge_id = %existing_id,
                    state = %existing.state,
                    "Recharge already reported with this reference"
                );
                return Ok(RechargeIntake {
                    recharge_id: existing_id,
                    state: existing.state,
                    deduplicated: true,
                });
            }
            RechargeInsert::Created(id) => id,
        };

        self.reviews.raise(ReviewFlag::for_recharge(
            account.id,
            recharge_id,
            ReviewPriority::Medium,
            "proof received: validate recharge",
        ));

        self.metrics.recharge_reported(false);
        info!(recharge_id = %recharge_id, amount = %request.amount, period = %period, "Recharge reported");

        let inserted = self.store.recharge(recharge_id)?;
        self.audit.record(audit_entry(
            actor,
            "report_recharge",
            EntityKind::Recharge,
            recharge_id,
            None::<&Recharge>,
            Some(&inserted),
        ));

        Ok(RechargeIntake {
            recharge_id,
            state: inserted.state,
            deduplicated: false,
        })
    }

    /// Approve a recharge; the only operation that grows a balance.
    #[instrument(skip(self, actor), fields(recharge_id = %recharge_id))]
    pub async fn approve(
        &self,
        recharge_id: RechargeId,
        notes: Option<String>,
        actor: &Actor,
    ) -> Result<Recharge> {
        let before = self.store.recharge(recharge_id)?;

        let updated = self.store.update_recharge(recharge_id, |recharge| {
            recharge.transition_to(RechargeState::Approved)?;
            recharge.reviewed_by = actor.id.clone();
            recharge.reviewed_at = Some(Utc::now());
            recharge.admin_notes = notes.clone();
            Ok(recharge.clone())
        })?;

        self.reviews.close_for_recharge(recharge_id, actor);

        self.notifier.notify(
            updated.account_id,
            NotificationKind::RechargeApproved,
            serde_json::json!({
                "recharge_id": updated.id.to_string(),
                "amount": updated.amount,
                "period": updated.period.canonical(),
            }),
        );

        self.metrics.recharge_approved();
        info!(recharge_id = %updated.id, amount = %updated.amount, "Recharge approved");

        self.audit.record(audit_entry(
            actor,
            "approve_recharge",
            EntityKind::Recharge,
            recharge_id,
            Some(&before),
            Some(&updated),
        ));

        Ok(updated)
    }

    /// Reject a recharge, keeping the reason. Rejected funds never count.
    #[instrument(skip(self, actor), fields(recharge_id = %recharge_id))]
    pub async fn reject(
        &self,
        recharge_id: RechargeId,
        reason: &str,
        actor: &Actor,
    ) -> Result<Recharge> {
        let before = self.store.recharge(recharge_id)?;

        let updated = self.store.update_recharge(recharge_id, |recharge| {
            recharge.transition_to(RechargeState::Rejected)?;
            recharge.reviewed_by = actor.id.clone();
            recharge.reviewed_at = Some(Utc::now());
            recharge.rejection_reason = Some(reason.to_string());
            Ok(recharge.clone())
        })?;

        self.reviews.close_for_recharge(recharge_id, actor);

        self.notifier.notify(
            updated.account_id,
            NotificationKind::RechargeRejected,
            serde_json::json!({
                "recharge_id": updated.id.to_string(),
                "amount": updated.amount,
                "reason": reason,
            }),
        );

        self.metrics.recharge_rejected();
        info!(recharge_id = %updated.id, reason = %reason, "Recharge rejected");

        self.audit.record(audit_entry(
            actor,
            "reject_recharge",
            EntityKind::Recharge,
            recharge_id,
            Some(&before),
            Some(&updated),
        ));

        Ok(updated)
    }
}
