//! Collaborator seams consumed by the lifecycle managers.
//!
//! User lookup, the manual-review queue, notification delivery and audit
//! persistence are external concerns. The engine talks to them through
//! these traits; the store-backed implementations below are what the
//! binary wires in, and what tests observe.
//!
//! Notifier and audit-sink calls are fire-and-forget: their failures are
//! logged and must never affect a lifecycle result.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use casapay_common::{
    Account, AccountId, Actor, AuditRecord, EntityKind, InvoiceId, Notification, NotificationKind,
    Phone, RechargeId, ReviewFlag, ReviewState,
};

use crate::store::Store;

/// Resolves a contact handle to an account.
pub trait AccountResolver: Send + Sync {
    /// Look up the account behind a phone number.
    fn resolve_by_phone(&self, phone: &Phone) -> Option<Account>;
}

/// The manual-review queue.
pub trait ReviewSink: Send + Sync {
    /// Raise a flag for an entity needing admin attention.
    fn raise(&self, flag: ReviewFlag);
    /// Close every open flag pointing at an invoice.
    fn close_for_invoice(&self, invoice_id: InvoiceId, admin: &Actor);
    /// Close every open flag pointing at a recharge.
    fn close_for_recharge(&self, recharge_id: RechargeId, admin: &Actor);
}

/// Outbound account notifications.
pub trait Notifier: Send + Sync {
    /// Enqueue a notification. Must not fail the calling operation.
    fn notify(&self, account_id: AccountId, kind: NotificationKind, payload: serde_json::Value);
}

/// The audit trail.
pub trait AuditSink: Send + Sync {
    /// Record a mutation. Must not fail the calling operation.
    fn record(&self, record: AuditRecord);
}

/// Store-backed account resolver.
pub struct StoreDirectory {
    store: Arc<Store>,
}

impl StoreDirectory {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl AccountResolver for StoreDirectory {
    fn resolve_by_phone(&self, phone: &Phone) -> Option<Account> {
        self.store.account_by_phone(phone)
    }
}

/// Store-backed review queue.
pub struct StoreReviewQueue {
    store: Arc<Store>,
}

impl StoreReviewQueue {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn close(&self, flags: Vec<ReviewFlag>, admin: &Actor) {
        for flag in flags {
            let result = self.store.update_review(flag.id, |f| {
                // Open flags can always resolve; the table allows it from
                // both pending and in_progress.
                if !f.state.can_transition_to(ReviewState::Resolved) {
                    return Ok(());
                }
                f.state = ReviewState::Resolved;
                f.resolved_by = admin.id.clone();
                f.resolved_at = Some(Utc::now());
                Ok(())
            });
            if let Err(e) = result {
                warn!(review_id = %flag.id, error = %e, "Failed to close review flag");
            }
        }
    }
}

impl ReviewSink for StoreReviewQueue {
    fn raise(&self, flag: ReviewFlag) {
        debug!(
            review_id = %flag.id,
            kind = ?flag.kind,
            priority = ?flag.priority,
            reason = %flag.reason,
            "Review flag raised"
        );
        self.store.insert_review(flag);
    }

    fn close_for_invoice(&self, invoice_id: InvoiceId, admin: &Actor) {
        self.close(self.store.open_reviews_for_invoice(invoice_id), admin);
    }

    fn close_for_recharge(&self, recharge_id: RechargeId, admin: &Actor) {
        self.close(self.store.open_reviews_for_recharge(recharge_id), admin);
    }
}

/// Store-backed notifier: enqueues pending notifications for a delivery
/// worker outside the engine.
pub struct StoreNotifier {
    store: Arc<Store>,
    channel: String,
}

impl StoreNotifier {
    pub fn new(store: Arc<Store>, channel: impl Into<String>) -> Self {
        Self {
            store,
            channel: channel.into(),
        }
    }
}

impl Notifier for StoreNotifier {
    fn notify(&self, account_id: AccountId, kind: NotificationKind, payload: serde_json::Value) {
        debug!(account_id = %account_id, kind = ?kind, "Notification enqueued");
        self.store.insert_notification(Notification::new(
            account_id,
            kind,
            self.channel.clone(),
            payload,
        ));
    }
}

/// Store-backed audit trail.
pub struct StoreAuditTrail {
    store: Arc<Store>,
}

impl StoreAuditTrail {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl AuditSink for StoreAuditTrail {
    fn record(&self, record: AuditRecord) {
        self.store.append_audit(record);
    }
}

/// Build an audit record from snapshots, serializing best-effort.
pub fn audit_entry<B, A>(
    actor: &Actor,
    action: &str,
    entity: EntityKind,
    entity_id: impl ToString,
    before: Option<&B>,
    after: Option<&A>,
) -> AuditRecord
where
    B: serde::Serialize,
    A: serde::Serialize,
{
    AuditRecord {
        actor: actor.kind,
        actor_id: actor.id.clone(),
        action: action.to_string(),
        entity,
        entity_id: entity_id.to_string(),
        before: before.and_then(|b| serde_json::to_value(b).ok()),
        after: after.and_then(|a| serde_json::to_value(a).ok()),
        recorded_at: Utc::now(),
    }
}
