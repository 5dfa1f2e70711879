//! Invoice lifecycle: capture, validation, rejection.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use casapay_common::{
    Actor, CasaPayError, EntityKind, ExtractionMeta, ExtractionQuality, Invoice, InvoiceId,
    InvoiceState, NotificationKind, ObligationId, Period, Phone, Result, ReviewFlag,
    ReviewPriority,
};

use crate::collaborators::{audit_entry, AccountResolver, AuditSink, Notifier, ReviewSink};
use crate::metrics::Metrics;
use crate::obligations::ObligationManager;
use crate::store::Store;

/// Invoice capture request, as produced by the ingestion pipeline.
#[derive(Debug, Clone)]
pub struct CaptureInvoice {
    /// Contact handle of the owning account.
    pub phone: Phone,
    /// Target obligation.
    pub obligation_id: ObligationId,
    /// Utility service name.
    pub service: String,
    /// Any date-like value inside the billing month.
    pub period: String,
    /// Billed amount, when extraction found one.
    pub amount: Option<Decimal>,
    /// Payment deadline, when extraction found one.
    pub due_date: Option<NaiveDate>,
    /// Bill issue date.
    pub issue_date: Option<NaiveDate>,
    /// Channel the bill arrived through.
    pub origin: Option<String>,
    /// Source file reference.
    pub file_url: Option<String>,
    /// Extraction verdict.
    pub quality: ExtractionQuality,
    /// Extraction confidence in [0, 1].
    pub confidence: Option<Decimal>,
    /// Raw extraction payload.
    pub raw: Option<serde_json::Value>,
}

/// What capture reports back to the caller.
#[derive(Debug, Clone)]
pub struct InvoiceIntake {
    /// Created invoice.
    pub invoice_id: InvoiceId,
    /// Resulting intake state.
    pub state: InvoiceState,
    /// True when a review flag was raised.
    pub needs_review: bool,
}

/// Admin validation payload: the confirmed amount and dates.
#[derive(Debug, Clone)]
pub struct ValidateInvoice {
    /// Confirmed amount.
    pub amount: Decimal,
    /// Confirmed payment deadline.
    pub due_date: NaiveDate,
    /// Issue date, when the admin corrects it.
    pub issue_date: Option<NaiveDate>,
    /// Free-form observations.
    pub notes: Option<String>,
}

/// Manager for the invoice lifecycle.
pub struct InvoiceManager {
    store: Arc<Store>,
    resolver: Arc<dyn AccountResolver>,
    reviews: Arc<dyn ReviewSink>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    obligations: Arc<ObligationManager>,
    metrics: Arc<Metrics>,
}

impl InvoiceManager {
    /// Create a new invoice manager.
    pub fn new(
        store: Arc<Store>,
        resolver: Arc<dyn AccountResolver>,
        reviews: Arc<dyn ReviewSink>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        obligations: Arc<ObligationManager>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            resolver,
            reviews,
            notifier,
            audit,
            obligations,
            metrics,
        }
    }

    /// Capture an invoice into an obligation.
    ///
    /// Low-quality extractions, missing amounts and missing due dates all
    /// route the invoice to manual review. Capture carries no idempotency
    /// key: duplicate calls create duplicate invoices.
    #[instrument(skip(self, request, actor), fields(obligation_id = %request.obligation_id, service = %request.service))]
    pub async fn capture(&self, request: CaptureInvoice, actor: &Actor) -> Result<InvoiceIntake> {
        let account = self
            .resolver
            .resolve_by_phone(&request.phone)
            .ok_or_else(|| CasaPayError::not_found(EntityKind::Account, &request.phone))?;

        let period = Period::parse(&request.period)?;

        let obligation = self.store.obligation(request.obligation_id)?;
        if obligation.account_id != account.id {
            return Err(CasaPayError::not_found(
                EntityKind::Obligation,
                request.obligation_id,
            ));
        }

        let mut review_reasons = Vec::new();
        if request.quality.needs_review() {
            review_reasons.push(match request.quality {
                ExtractionQuality::Failed => "extraction failed".to_string(),
                _ => "extraction doubtful".to_string(),
            });
        }
        if request.amount.is_none() {
            review_reasons.push("amount missing".to_string());
        }
        if request.due_date.is_none() {
            review_reasons.push("due date missing".to_string());
        }
        let needs_review = !review_reasons.is_empty();

        let state = if needs_review {
            InvoiceState::NeedsReview
        } else {
            InvoiceState::Extracted
        };

        let mut invoice = Invoice::new(
            account.id,
            obligation.id,
            request.service,
            period,
            request.amount,
            state,
            ExtractionMeta {
                quality: request.quality,
                confidence: request.confidence,
                raw: request.raw,
            },
        );
        invoice.due_date = request.due_date;
        invoice.issue_date = request.issue_date;
        invoice.origin = request.origin;
        invoice.file_url = request.file_url;

        let invoice = self.store.insert_invoice(invoice);
        self.obligations.recount(obligation.id).await?;

        if needs_review {
            let priority = if request.quality == ExtractionQuality::Failed {
                ReviewPriority::High
            } else {
                ReviewPriority::Medium
            };
            self.reviews.raise(ReviewFlag::for_invoice(
                account.id,
                invoice.id,
                priority,
                review_reasons.join("; "),
            ));
        }

        self.metrics.invoice_captured(needs_review);
        info!(invoice_id = %invoice.id, state = %invoice.state, "Invoice captured");

        self.audit.record(audit_entry(
            actor,
            "capture_invoice",
            EntityKind::Invoice,
            invoice.id,
            None::<&Invoice>,
            Some(&invoice),
        ));

        Ok(InvoiceIntake {
            invoice_id: invoice.id,
            state: invoice.state,
            needs_review,
        })
    }

    /// Confirm an invoice's amount and dates.
    #[instrument(skip(self, request, actor), fields(invoice_id = %invoice_id))]
    pub async fn validate(
        &self,
        invoice_id: InvoiceId,
        request: ValidateInvoice,
        actor: &Actor,
    ) -> Result<Invoice> {
        let before = self.store.invoice(invoice_id)?;

        let updated = self.store.update_invoice(invoice_id, |invoice| {
            invoice.transition_to(InvoiceState::Validated)?;
            invoice.amount = request.amount;
            invoice.due_date = Some(request.due_date);
            if let Some(issue_date) = request.issue_date {
                invoice.issue_date = Some(issue_date);
            }
            invoice.admin_notes = request.notes.clone();
            invoice.reviewed_by = actor.id.clone();
            invoice.reviewed_at = Some(Utc::now());
            Ok(invoice.clone())
        })?;

        self.reviews.close_for_invoice(invoice_id, actor);
        self.obligations.recount(updated.obligation_id).await?;

        self.notifier.notify(
            updated.account_id,
            NotificationKind::InvoiceValidated,
            serde_json::json!({
                "invoice_id": updated.id.to_string(),
                "service": updated.service,
                "amount": updated.amount,
                "period": updated.period.canonical(),
            }),
        );

        self.metrics.invoice_validated();
        info!(invoice_id = %updated.id, amount = %updated.amount, "Invoice validated");

        self.audit.record(audit_entry(
            actor,
            "validate_invoice",
            EntityKind::Invoice,
            invoice_id,
            Some(&before),
            Some(&updated),
        ));

        Ok(updated)
    }

    /// Reject an invoice, keeping the reason.
    #[instrument(skip(self, actor), fields(invoice_id = %invoice_id))]
    pub async fn reject(
        &self,
        invoice_id: InvoiceId,
        reason: &str,
        actor: &Actor,
    ) -> Result<Invoice> {
        let before = self.store.invoice(invoice_id)?;

        let updated = self.store.update_invoice(invoice_id, |invoice| {
            invoice.transition_to(InvoiceState::Rejected)?;
            invoice.rejection_reason = Some(reason.to_string());
            invoice.reviewed_by = actor.id.clone();
            invoice.reviewed_at = Some(Utc::now());
            Ok(invoice.clone())
        })?;

        self.reviews.close_for_invoice(invoice_id, actor);
        // A rejection shrinks the countable set and can complete the
        // obligation when everything else is already paid.
        self.obligations.recount(updated.obligation_id).await?;

        self.notifier.notify(
            updated.account_id,
            NotificationKind::InvoiceRejected,
            serde_json::json!({
                "invoice_id": updated.id.to_string(),
                "service": updated.service,
                "reason": reason,
            }),
        );

        self.metrics.invoice_rejected();
        info!(invoice_id = %updated.id, reason = %reason, "Invoice rejected");

        self.audit.record(audit_entry(
            actor,
            "reject_invoice",
            EntityKind::Invoice,
            invoice_id,
            Some(&before),
            Some(&updated),
        ));

        Ok(updated)
    }

    /// Read-only projection of an obligation's invoices.
    pub async fn list_by_obligation(&self, obligation_id: ObligationId) -> Result<Vec<Invoice>> {
        // Existence check keeps a bad id from reading as "empty bundle".
        self.store.obligation(obligation_id)?;
        Ok(self.store.invoices_for_obligation(obligation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{StoreAuditTrail, StoreDirectory, StoreNotifier, StoreReviewQueue};
    use crate::config::EngineConfig;
    use casapay_common::{Account, Obligation};

    struct Fixture {
        store: Arc<Store>,
        manager: InvoiceManager,
        obligation: Obligation,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::new());
        let config = EngineConfig::default();
        let resolver: Arc<dyn AccountResolver> = Arc::new(StoreDirectory::new(store.clone()));
        let notifier: Arc<dyn Notifier> = Arc::new(StoreNotifier::new(store.clone(), "whatsapp"));
        let audit: Arc<dyn AuditSink> = Arc::new(StoreAuditTrail::new(store.clone()));
        let metrics = Arc::new(Metrics::new());
        let obligations = Arc::new(ObligationManager::new(
            store.clone(),
            resolver.clone(),
            notifier.clone(),
            audit.clone(),
            metrics.clone(),
            &config,
        ));
        let manager = InvoiceManager::new(
            store.clone(),
            resolver,
            Arc::new(StoreReviewQueue::new(store.clone())),
            notifier,
            audit,
            obligations,
            metrics,
        );

        let account = store.upsert_account(Account::new("+573001112233", "Marta"));
        let obligation = store.insert_obligation(Obligation::new(
            account.id,
            Period::new(2026, 2).unwrap(),
            "February",
        ));

        Fixture {
            store,
            manager,
            obligation,
        }
    }

    fn capture_request(fixture: &Fixture) -> CaptureInvoice {
        CaptureInvoice {
            phone: Phone::new("+573001112233"),
            obligation_id: fixture.obligation.id,
            service: "energia".to_string(),
            period: "2026-02-14".to_string(),
            amount: Some(Decimal::from(120_000)),
            due_date: Some(NaiveDate::from_ymd_opt(2026, 2, 25).unwrap()),
            issue_date: None,
            origin: Some("whatsapp".to_string()),
            file_url: None,
            quality: ExtractionQuality::Ok,
            confidence: Some(Decimal::new(97, 2)),
            raw: None,
        }
    }

    #[tokio::test]
    async fn test_confident_capture_lands_extracted() {
        let fixture = fixture();
        let intake = fixture
            .manager
            .capture(capture_request(&fixture), &Actor::bot())
            .await
            .unwrap();

        assert_eq!(intake.state, InvoiceState::Extracted);
        assert!(!intake.needs_review);

        let invoice = fixture.store.invoice(intake.invoice_id).unwrap();
        // Capture period normalizes to the month bucket.
        assert_eq!(invoice.period.canonical(), "2026-02-01");

        // Counters were recomputed.
        let obligation = fixture.store.obligation(fixture.obligation.id).unwrap();
        assert_eq!(obligation.total_invoices, 1);
        assert_eq!(obligation.amount_total, Decimal::from(120_000));
    }

    #[tokio::test]
    async fn test_failed_extraction_routes_to_review_with_high_priority() {
        let fixture = fixture();
        let mut request = capture_request(&fixture);
        request.quality = ExtractionQuality::Failed;
        request.amount = None;

        let intake = fixture
            .manager
            .capture(request, &Actor::bot())
            .await
            .unwrap();

        assert_eq!(intake.state, InvoiceState::NeedsReview);
        assert!(intake.needs_review);

        let flags = fixture.store.open_reviews_for_invoice(intake.invoice_id);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].priority, ReviewPriority::High);
        assert!(flags[0].reason.contains("extraction failed"));
        assert!(flags[0].reason.contains("amount missing"));
    }

    #[tokio::test]
    async fn test_missing_due_date_routes_to_review_medium() {
        let fixture = fixture();
        let mut request = capture_request(&fixture);
        request.due_date = None;

        let intake = fixture
            .manager
            .capture(request, &Actor::bot())
            .await
            .unwrap();

        let flags = fixture.store.open_reviews_for_invoice(intake.invoice_id);
        assert_eq!(flags[0].priority, ReviewPriority::Medium);
        assert_eq!(flags[0].reason, "due date missing");
    }

    #[tokio::test]
    async fn test_capture_rejects_foreign_obligation() {
        let fixture = fixture();
        let stranger = fixture
            .store
            .upsert_account(Account::new("+579990000000", "Other"));
        let foreign = fixture.store.insert_obligation(Obligation::new(
            stranger.id,
            Period::new(2026, 2).unwrap(),
            "Not yours",
        ));

        let mut request = capture_request(&fixture);
        request.obligation_id = foreign.id;

        let err = fixture
            .manager
            .capture(request, &Actor::bot())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_capture_invalid_period() {
        let fixture = fixture();
        let mut request = capture_request(&fixture);
        request.period = "sometime".to_string();

        let err = fixture
            .manager
            .capture(request, &Actor::bot())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PERIOD");
    }

    #[tokio::test]
    async fn test_duplicate_capture_creates_duplicate_rows() {
        let fixture = fixture();
        let first = fixture
            .manager
            .capture(capture_request(&fixture), &Actor::bot())
            .await
            .unwrap();
        let second = fixture
            .manager
            .capture(capture_request(&fixture), &Actor::bot())
            .await
            .unwrap();

        assert_ne!(first.invoice_id, second.invoice_id);
        let obligation = fixture.store.obligation(fixture.obligation.id).unwrap();
        assert_eq!(obligation.total_invoices, 2);
    }

    #[tokio::test]
    async fn test_validate_overwrites_amount_and_closes_review() {
        let fixture = fixture();
        let mut request = capture_request(&fixture);
        request.quality = ExtractionQuality::Doubtful;
        let intake = fixture
            .manager
            .capture(request, &Actor::bot())
            .await
            .unwrap();

        let validated = fixture
            .manager
            .validate(
                intake.invoice_id,
                ValidateInvoice {
                    amount: Decimal::from(135_500),
                    due_date: NaiveDate::from_ymd_opt(2026, 2, 28).unwrap(),
                    issue_date: None,
                    notes: Some("amount corrected from paper bill".to_string()),
                },
                &Actor::admin("admin-1"),
            )
            .await
            .unwrap();

        assert_eq!(validated.state, InvoiceState::Validated);
        assert_eq!(validated.amount, Decimal::from(135_500));
        assert_eq!(validated.reviewed_by.as_deref(), Some("admin-1"));
        assert!(fixture
            .store
            .open_reviews_for_invoice(intake.invoice_id)
            .is_empty());

        let obligation = fixture.store.obligation(fixture.obligation.id).unwrap();
        assert_eq!(obligation.amount_total, Decimal::from(135_500));
    }

    #[tokio::test]
    async fn test_validate_twice_is_rejected_by_table() {
        let fixture = fixture();
        let intake = fixture
            .manager
            .capture(capture_request(&fixture), &Actor::bot())
            .await
            .unwrap();
        fixture
            .manager
            .validate(
                intake.invoice_id,
                ValidateInvoice {
                    amount: Decimal::from(1),
                    due_date: NaiveDate::from_ymd_opt(2026, 2, 28).unwrap(),
                    issue_date: None,
                    notes: None,
                },
                &Actor::admin("admin-1"),
            )
            .await
            .unwrap();

        // validated -> validated is not an edge.
        let err = fixture
            .manager
            .validate(
                intake.invoice_id,
                ValidateInvoice {
                    amount: Decimal::from(2),
                    due_date: NaiveDate::from_ymd_opt(2026, 2, 28).unwrap(),
                    issue_date: None,
                    notes: None,
                },
                &Actor::admin("admin-1"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE_TRANSITION");
    }

    #[tokio::test]
    async fn test_reject_stores_reason_and_recounts() {
        let fixture = fixture();
        let mut request = capture_request(&fixture);
        request.quality = ExtractionQuality::Doubtful;
        let intake = fixture
            .manager
            .capture(request, &Actor::bot())
            .await
            .unwrap();

        let rejected = fixture
            .manager
            .reject(intake.invoice_id, "not a real bill", &Actor::admin("admin-1"))
            .await
            .unwrap();

        assert_eq!(rejected.state, InvoiceState::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("not a real bill"));

        // Rejected invoices drop out of the counters.
        let obligation = fixture.store.obligation(fixture.obligation.id).unwrap();
        assert_eq!(obligation.total_invoices, 0);
    }

    #[tokio::test]
    async fn test_list_by_obligation_checks_existence() {
        let fixture = fixture();
        let err = fixture
            .manager
            .list_by_obligation(ObligationId::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");

        let rows = fixture
            .manager
            .list_by_obligation(fixture.obligation.id)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
