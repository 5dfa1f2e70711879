//! Domain entities for the recharge/invoice/payment cycle.
//!
//! Monetary amounts are exact decimals. Entities own their own legal
//! transitions: `transition_to` consults the state table and stamps the
//! relevant timestamps, so an illegal edge can never be written silently.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CasaPayError;
use crate::identifiers::{
    AccountId, InvoiceId, NotificationId, ObligationId, PaymentId, Phone, RechargeId, ReviewId,
};
use crate::period::Period;
use crate::states::{
    EntityKind, InvoiceState, ObligationState, PaymentState, RechargeState, ReviewState,
};

/// A payer. Created on first contact, never deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Contact handle used for resolution.
    pub phone: Phone,
    /// Display name.
    pub name: String,
    /// Deactivated accounts keep their history but accept no new activity.
    pub active: bool,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new active account.
    pub fn new(phone: impl Into<Phone>, name: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            phone: phone.into(),
            name: name.into(),
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Deactivate the account.
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// A periodic bundle of invoices for one account and one calendar month.
///
/// The counters are denormalized caches over the invoice set. They are
/// written exclusively by the obligation recount; no other code path may
/// touch them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obligation {
    /// Unique obligation identifier.
    pub id: ObligationId,
    /// Owning account.
    pub account_id: AccountId,
    /// Month bucket.
    pub period: Period,
    /// Free-form description ("Servicios febrero", etc.).
    pub description: String,
    /// Current lifecycle state.
    pub state: ObligationState,
    /// Count of non-rejected invoices.
    pub total_invoices: u32,
    /// Count of invoices in `paid` state.
    pub invoices_paid: u32,
    /// Sum of non-rejected invoice amounts.
    pub amount_total: Decimal,
    /// Sum of paid invoice amounts.
    pub amount_paid: Decimal,
    /// Set when the obligation transitions into `completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the obligation was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Obligation {
    /// Create a new obligation with zeroed counters.
    pub fn new(account_id: AccountId, period: Period, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ObligationId::new(),
            account_id,
            period,
            description: description.into(),
            state: ObligationState::Active,
            total_invoices: 0,
            invoices_paid: 0,
            amount_total: Decimal::ZERO,
            amount_paid: Decimal::ZERO,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state, stamping the completion timestamp.
    pub fn transition_to(&mut self, next: ObligationState) -> Result<(), CasaPayError> {
        if !self.state.can_transition_to(next) {
            return Err(CasaPayError::InvalidTransition {
                entity: EntityKind::Obligation,
                id: self.id.to_string(),
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        if next == ObligationState::Completed {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Completion progress as a whole percentage.
    pub fn progress_percent(&self) -> u32 {
        if self.total_invoices == 0 {
            0
        } else {
            self.invoices_paid * 100 / self.total_invoices
        }
    }
}

/// Outcome reported by the ingestion pipeline for a captured invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionQuality {
    /// Extraction succeeded with confident values.
    Ok,
    /// Values were extracted but look unreliable.
    Doubtful,
    /// Extraction failed outright.
    Failed,
}

impl ExtractionQuality {
    /// Low-quality extractions require a manual pass.
    pub fn needs_review(&self) -> bool {
        matches!(self, ExtractionQuality::Doubtful | ExtractionQuality::Failed)
    }
}

/// Extraction metadata carried on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMeta {
    /// Pipeline verdict on the extraction.
    pub quality: ExtractionQuality,
    /// Confidence score in [0, 1], when the pipeline reports one.
    pub confidence: Option<Decimal>,
    /// Raw extraction payload for audit and re-processing.
    pub raw: Option<serde_json::Value>,
}

impl ExtractionMeta {
    /// Metadata for a fully confident extraction.
    pub fn ok() -> Self {
        Self {
            quality: ExtractionQuality::Ok,
            confidence: None,
            raw: None,
        }
    }
}

/// One utility service's bill within an obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique invoice identifier.
    pub id: InvoiceId,
    /// Owning account.
    pub account_id: AccountId,
    /// Obligation this invoice belongs to.
    pub obligation_id: ObligationId,
    /// Utility service name ("energia", "acueducto", ...).
    pub service: String,
    /// Month bucket.
    pub period: Period,
    /// Billed amount. Zero until a missing amount is supplied at validation.
    pub amount: Decimal,
    /// Payment deadline printed on the bill.
    pub due_date: Option<NaiveDate>,
    /// Bill issue date.
    pub issue_date: Option<NaiveDate>,
    /// Current lifecycle state.
    pub state: InvoiceState,
    /// Extraction metadata from the ingestion pipeline.
    pub extraction: ExtractionMeta,
    /// Channel the bill arrived through.
    pub origin: Option<String>,
    /// Source file reference.
    pub file_url: Option<String>,
    /// Notes left by the validating admin.
    pub admin_notes: Option<String>,
    /// Admin who validated or rejected the invoice.
    pub reviewed_by: Option<String>,
    /// When the validation/rejection happened.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Why the invoice was rejected.
    pub rejection_reason: Option<String>,
    /// When the invoice was captured.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Create a new invoice in the given intake state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: AccountId,
        obligation_id: ObligationId,
        service: impl Into<String>,
        period: Period,
        amount: Option<Decimal>,
        state: InvoiceState,
        extraction: ExtractionMeta,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InvoiceId::new(),
            account_id,
            obligation_id,
            service: service.into(),
            period,
            amount: amount.unwrap_or(Decimal::ZERO),
            due_date: None,
            issue_date: None,
            state,
            extraction,
            origin: None,
            file_url: None,
            admin_notes: None,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, next: InvoiceState) -> Result<(), CasaPayError> {
        if !self.state.can_transition_to(next) {
            return Err(CasaPayError::InvalidTransition {
                entity: EntityKind::Invoice,
                id: self.id.to_string(),
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Clone this invoice into a successor obligation.
    ///
    /// Same service and amount, new period, state reset to `extracted`;
    /// dates and extraction metadata do not carry over.
    pub fn clone_into(&self, obligation_id: ObligationId, period: Period) -> Invoice {
        Invoice::new(
            self.account_id,
            obligation_id,
            self.service.clone(),
            period,
            Some(self.amount),
            InvoiceState::Extracted,
            ExtractionMeta::ok(),
        )
    }
}

/// A deposit of funds by an account for a given period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recharge {
    /// Unique recharge identifier.
    pub id: RechargeId,
    /// Owning account.
    pub account_id: AccountId,
    /// Month bucket the funds belong to.
    pub period: Period,
    /// Deposited amount.
    pub amount: Decimal,
    /// Current lifecycle state.
    pub state: RechargeState,
    /// Channel the report arrived through.
    pub channel: String,
    /// Proof-of-deposit reference.
    pub proof_url: Option<String>,
    /// External transaction reference (idempotency key).
    pub external_ref: Option<String>,
    /// Admin who approved or rejected the recharge.
    pub reviewed_by: Option<String>,
    /// When the approval/rejection happened.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Notes left by the reviewing admin.
    pub admin_notes: Option<String>,
    /// Why the recharge was rejected.
    pub rejection_reason: Option<String>,
    /// When the recharge was reported.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Recharge {
    /// Create a recharge awaiting validation.
    pub fn new(
        account_id: AccountId,
        period: Period,
        amount: Decimal,
        channel: impl Into<String>,
        proof_url: Option<String>,
        external_ref: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RechargeId::new(),
            account_id,
            period,
            amount,
            state: RechargeState::PendingValidation,
            channel: channel.into(),
            proof_url,
            external_ref,
            reviewed_by: None,
            reviewed_at: None,
            admin_notes: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, next: RechargeState) -> Result<(), CasaPayError> {
        if !self.state.can_transition_to(next) {
            return Err(CasaPayError::InvalidTransition {
                entity: EntityKind::Recharge,
                id: self.id.to_string(),
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Only approved recharges count toward the available balance.
    pub fn counts_toward_balance(&self) -> bool {
        self.state == RechargeState::Approved
    }
}

/// An application of recharged funds to exactly one validated invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment identifier.
    pub id: PaymentId,
    /// Owning account.
    pub account_id: AccountId,
    /// Invoice being settled.
    pub invoice_id: InvoiceId,
    /// Most-recently approved recharge of the period at creation time.
    /// Informational link only, not a reservation.
    pub recharge_id: Option<RechargeId>,
    /// Amount applied (the invoice amount at creation time).
    pub amount_applied: Decimal,
    /// Current lifecycle state.
    pub state: PaymentState,
    /// Payment provider used for execution.
    pub provider: Option<String>,
    /// Provider-side reference.
    pub provider_ref: Option<String>,
    /// Proof-of-payment reference.
    pub proof_url: Option<String>,
    /// When the payment was executed.
    pub executed_at: Option<DateTime<Utc>>,
    /// Failure detail for failed payments.
    pub failure_detail: Option<String>,
    /// When the payment was created.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Create a payment already in flight.
    pub fn new(
        account_id: AccountId,
        invoice_id: InvoiceId,
        recharge_id: Option<RechargeId>,
        amount_applied: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            account_id,
            invoice_id,
            recharge_id,
            amount_applied,
            state: PaymentState::InProgress,
            provider: None,
            provider_ref: None,
            proof_url: None,
            executed_at: None,
            failure_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to a new state, stamping the execution timestamp.
    pub fn transition_to(&mut self, next: PaymentState) -> Result<(), CasaPayError> {
        if !self.state.can_transition_to(next) {
            return Err(CasaPayError::InvalidTransition {
                entity: EntityKind::Payment,
                id: self.id.to_string(),
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        if next == PaymentState::Paid {
            self.executed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// In-flight and settled payments both consume balance.
    pub fn consumes_balance(&self) -> bool {
        matches!(self.state, PaymentState::InProgress | PaymentState::Paid)
    }
}

/// What a review flag points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Invoice,
    Recharge,
}

/// Queue priority for manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    High,
    Medium,
    Low,
}

/// A manual-attention marker raised for low-confidence invoices or
/// pending recharges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFlag {
    /// Unique review identifier.
    pub id: ReviewId,
    /// What kind of entity is under review.
    pub kind: ReviewKind,
    /// Current lifecycle state.
    pub state: ReviewState,
    /// Account the flagged entity belongs to.
    pub account_id: AccountId,
    /// Flagged invoice, when `kind` is `Invoice`.
    pub invoice_id: Option<InvoiceId>,
    /// Flagged recharge, when `kind` is `Recharge`.
    pub recharge_id: Option<RechargeId>,
    /// Queue priority.
    pub priority: ReviewPriority,
    /// Why the flag was raised.
    pub reason: String,
    /// Admin who closed the flag.
    pub resolved_by: Option<String>,
    /// When the flag was closed.
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the flag was raised.
    pub created_at: DateTime<Utc>,
}

impl ReviewFlag {
    /// Raise a flag for an invoice.
    pub fn for_invoice(
        account_id: AccountId,
        invoice_id: InvoiceId,
        priority: ReviewPriority,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: ReviewId::new(),
            kind: ReviewKind::Invoice,
            state: ReviewState::Pending,
            account_id,
            invoice_id: Some(invoice_id),
            recharge_id: None,
            priority,
            reason: reason.into(),
            resolved_by: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    /// Raise a flag for a recharge.
    pub fn for_recharge(
        account_id: AccountId,
        recharge_id: RechargeId,
        priority: ReviewPriority,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: ReviewId::new(),
            kind: ReviewKind::Recharge,
            state: ReviewState::Pending,
            account_id,
            invoice_id: None,
            recharge_id: Some(recharge_id),
            priority,
            reason: reason.into(),
            resolved_by: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    /// True while the flag still needs admin attention.
    pub fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Notification kinds emitted by the lifecycle managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RechargeApproved,
    RechargeRejected,
    InvoiceValidated,
    InvoiceRejected,
    PaymentConfirmed,
    ObligationCompleted,
    ObligationCreated,
}

/// Delivery state of a stored notification. Delivery itself is handled
/// outside the engine; the engine only enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// A stored notification awaiting delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification identifier.
    pub id: NotificationId,
    /// Recipient account.
    pub account_id: AccountId,
    /// What happened.
    pub kind: NotificationKind,
    /// Delivery channel.
    pub channel: String,
    /// Structured message payload.
    pub payload: serde_json::Value,
    /// Delivery state.
    pub status: NotificationStatus,
    /// When the notification was enqueued.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Enqueue a new pending notification.
    pub fn new(
        account_id: AccountId,
        kind: NotificationKind,
        channel: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            account_id,
            kind,
            channel: channel.into(),
            payload,
            status: NotificationStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Who performed an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Admin,
    Bot,
    System,
}

/// The actor attribution carried through audited operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Actor kind.
    pub kind: ActorKind,
    /// Actor identifier when known (admins).
    pub id: Option<String>,
}

impl Actor {
    /// An administrator acting under their own id.
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Admin,
            id: Some(id.into()),
        }
    }

    /// The ingestion bot.
    pub fn bot() -> Self {
        Self {
            kind: ActorKind::Bot,
            id: None,
        }
    }

    /// The engine itself (cascades, automation).
    pub fn system() -> Self {
        Self {
            kind: ActorKind::System,
            id: None,
        }
    }
}

/// One audit-trail entry. Recording is fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Actor kind.
    pub actor: ActorKind,
    /// Actor identifier when known (admins).
    pub actor_id: Option<String>,
    /// Action name ("capture_invoice", "approve_recharge", ...).
    pub action: String,
    /// Entity kind acted on.
    pub entity: EntityKind,
    /// Entity identifier.
    pub entity_id: String,
    /// Snapshot before the mutation.
    pub before: Option<serde_json::Value>,
    /// Snapshot after the mutation.
    pub after: Option<serde_json::Value>,
    /// When the action happened.
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obligation_transitions() {
        let mut obligation =
            Obligation::new(AccountId::new(), Period::new(2026, 2).unwrap(), "February");

        assert_eq!(obligation.state, ObligationState::Active);
        obligation.transition_to(ObligationState::InProgress).unwrap();
        obligation.transition_to(ObligationState::Completed).unwrap();
        assert!(obligation.completed_at.is_some());

        // Terminal: no further edges.
        assert!(obligation
            .transition_to(ObligationState::Cancelled)
            .is_err());
    }

    #[test]
    fn test_obligation_cannot_skip_to_completed() {
        let mut obligation =
            Obligation::new(AccountId::new(), Period::new(2026, 2).unwrap(), "February");
        let err = obligation
            .transition_to(ObligationState::Completed)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE_TRANSITION");
    }

    #[test]
    fn test_invoice_clone_resets_state() {
        let mut invoice = Invoice::new(
            AccountId::new(),
            ObligationId::new(),
            "energia",
            Period::new(2026, 2).unwrap(),
            Some(Decimal::from(120_000)),
            InvoiceState::Validated,
            ExtractionMeta::ok(),
        );
        invoice.transition_to(InvoiceState::Paid).unwrap();

        let next_obligation = ObligationId::new();
        let next_period = invoice.period.next();
        let clone = invoice.clone_into(next_obligation, next_period);

        assert_eq!(clone.state, InvoiceState::Extracted);
        assert_eq!(clone.service, "energia");
        assert_eq!(clone.amount, Decimal::from(120_000));
        assert_eq!(clone.period, next_period);
        assert_eq!(clone.obligation_id, next_obligation);
        assert_ne!(clone.id, invoice.id);
    }

    #[test]
    fn test_payment_balance_consumption() {
        let payment = Payment::new(
            AccountId::new(),
            InvoiceId::new(),
            None,
            Decimal::from(50_000),
        );
        assert!(payment.consumes_balance());

        let mut failed = payment.clone();
        failed.transition_to(PaymentState::Failed).unwrap();
        assert!(!failed.consumes_balance());
    }

    #[test]
    fn test_payment_paid_stamps_execution() {
        let mut payment = Payment::new(
            AccountId::new(),
            InvoiceId::new(),
            None,
            Decimal::from(50_000),
        );
        payment.transition_to(PaymentState::Paid).unwrap();
        assert!(payment.executed_at.is_some());
    }

    #[test]
    fn test_extraction_quality_review_rule() {
        assert!(!ExtractionQuality::Ok.needs_review());
        assert!(ExtractionQuality::Doubtful.needs_review());
        assert!(ExtractionQuality::Failed.needs_review());
    }

    #[test]
    fn test_review_flag_open_until_terminal() {
        let mut flag = ReviewFlag::for_recharge(
            AccountId::new(),
            RechargeId::new(),
            ReviewPriority::Medium,
            "proof received",
        );
        assert!(flag.is_open());
        flag.state = ReviewState::Resolved;
        assert!(!flag.is_open());
    }

    #[test]
    fn test_progress_percent() {
        let mut obligation =
            Obligation::new(AccountId::new(), Period::new(2026, 2).unwrap(), "February");
        assert_eq!(obligation.progress_percent(), 0);
        obligation.total_invoices = 4;
        obligation.invoices_paid = 3;
        assert_eq!(obligation.progress_percent(), 75);
    }
}
