//! Available-balance computation.
//!
//! `available = approved recharges - (in-flight + settled) payments`, for
//! one account and one month bucket. In-flight payments are subtracted so
//! two concurrent payment creations cannot both pass a balance check
//! against the same funds. The result is signed: a negative balance is
//! reported, not hidden.

use casapay_common::{AccountId, Payment, Period, Recharge};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Available balance for an account/period pair, with its inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableBalance {
    /// Account the balance belongs to.
    pub account_id: AccountId,
    /// Month bucket.
    pub period: Period,
    /// Sum of approved recharge amounts in the period.
    pub approved_recharges: Decimal,
    /// Sum of in-flight and settled payment amounts against invoices of
    /// the period.
    pub applied_payments: Decimal,
    /// `approved_recharges - applied_payments`; may be negative.
    pub available: Decimal,
    /// When the balance was computed.
    pub computed_at: DateTime<Utc>,
}

impl AvailableBalance {
    /// Check whether `amount` can be funded from this balance.
    pub fn covers(&self, amount: Decimal) -> bool {
        self.available >= amount
    }
}

/// Compute the available balance from fresh entity snapshots.
///
/// `payments` carries each payment together with its invoice's period,
/// since the period lives on the invoice, not the payment. Rows belonging
/// to other accounts or other periods are filtered out here, so callers
/// may pass unfiltered snapshots.
pub fn available<'a, R, P>(
    account_id: AccountId,
    period: Period,
    recharges: R,
    payments: P,
) -> AvailableBalance
where
    R: IntoIterator<Item = &'a Recharge>,
    P: IntoIterator<Item = (&'a Payment, Period)>,
{
    let approved_recharges: Decimal = recharges
        .into_iter()
        .filter(|r| r.account_id == account_id && r.period == period)
        .filter(|r| r.counts_toward_balance())
        .map(|r| r.amount)
        .sum();

    let applied_payments: Decimal = payments
        .into_iter()
        .filter(|(p, invoice_period)| {
            p.account_id == account_id && *invoice_period == period && p.consumes_balance()
        })
        .map(|(p, _)| p.amount_applied)
        .sum();

    AvailableBalance {
        account_id,
        period,
        approved_recharges,
        applied_payments,
        available: approved_recharges - applied_payments,
        computed_at: Utc::now(),
    }
}

/// All-time totals for an account, across periods. Settled payments only;
/// used by the account summary projection, not by the funding gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTotals {
    /// Sum of all approved recharge amounts.
    pub approved_recharges: Decimal,
    /// Sum of all settled payment amounts.
    pub paid_payments: Decimal,
    /// `approved_recharges - paid_payments`.
    pub balance: Decimal,
}

/// Compute all-time account totals from fresh entity snapshots.
pub fn account_totals<'a, R, P>(account_id: AccountId, recharges: R, payments: P) -> AccountTotals
where
    R: IntoIterator<Item = &'a Recharge>,
    P: IntoIterator<Item = &'a Payment>,
{
    let approved_recharges: Decimal = recharges
        .into_iter()
        .filter(|r| r.account_id == account_id && r.counts_toward_balance())
        .map(|r| r.amount)
        .sum();

    let paid_payments: Decimal = payments
        .into_iter()
        .filter(|p| p.account_id == account_id)
        .filter(|p| p.state == casapay_common::PaymentState::Paid)
        .map(|p| p.amount_applied)
        .sum();

    AccountTotals {
        approved_recharges,
        paid_payments,
        balance: approved_recharges - paid_payments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casapay_common::{InvoiceId, PaymentState, RechargeState};

    fn recharge(account_id: AccountId, period: Period, amount: i64, state: RechargeState) -> Recharge {
        let mut r = Recharge::new(account_id, period, Decimal::from(amount), "whatsapp", None, None);
        r.state = state;
        r
    }

    fn payment(account_id: AccountId, amount: i64, state: PaymentState) -> Payment {
        let mut p = Payment::new(account_id, InvoiceId::new(), None, Decimal::from(amount));
        p.state = state;
        p
    }

    #[test]
    fn test_balance_arithmetic() {
        let account_id = AccountId::new();
        let period = Period::new(2026, 2).unwrap();

        let recharges = vec![
            recharge(account_id, period, 300_000, RechargeState::Approved),
            recharge(account_id, period, 200_000, RechargeState::Approved),
            // Pending and rejected recharges never count.
            recharge(account_id, period, 900_000, RechargeState::PendingValidation),
            recharge(account_id, period, 900_000, RechargeState::Rejected),
        ];
        let payments = vec![
            payment(account_id, 100_000, PaymentState::Paid),
            payment(account_id, 50_000, PaymentState::InProgress),
            // Failed payments release their funds.
            payment(account_id, 900_000, PaymentState::Failed),
        ];

        let balance = available(
            account_id,
            period,
            &recharges,
            payments.iter().map(|p| (p, period)),
        );

        assert_eq!(balance.approved_recharges, Decimal::from(500_000));
        assert_eq!(balance.applied_payments, Decimal::from(150_000));
        assert_eq!(balance.available, Decimal::from(350_000));
    }

    #[test]
    fn test_balance_scoped_to_period() {
        let account_id = AccountId::new();
        let feb = Period::new(2026, 2).unwrap();
        let mar = Period::new(2026, 3).unwrap();

        let recharges = vec![
            recharge(account_id, feb, 100_000, RechargeState::Approved),
            recharge(account_id, mar, 999_000, RechargeState::Approved),
        ];
        let payments = vec![payment(account_id, 30_000, PaymentState::Paid)];

        let balance = available(
            account_id,
            feb,
            &recharges,
            payments.iter().map(|p| (p, mar)),
        );

        // March rows are invisible to February's balance.
        assert_eq!(balance.approved_recharges, Decimal::from(100_000));
        assert_eq!(balance.applied_payments, Decimal::ZERO);
        assert_eq!(balance.available, Decimal::from(100_000));
    }

    #[test]
    fn test_balance_scoped_to_account() {
        let account_id = AccountId::new();
        let other = AccountId::new();
        let period = Period::new(2026, 2).unwrap();

        let recharges = vec![recharge(other, period, 500_000, RechargeState::Approved)];
        let balance = available(
            account_id,
            period,
            &recharges,
            std::iter::empty::<(&Payment, Period)>(),
        );

        assert_eq!(balance.available, Decimal::ZERO);
    }

    #[test]
    fn test_negative_balance_is_reported() {
        let account_id = AccountId::new();
        let period = Period::new(2026, 2).unwrap();

        let recharges = vec![recharge(account_id, period, 100_000, RechargeState::Approved)];
        let payments = vec![payment(account_id, 150_000, PaymentState::Paid)];

        let balance = available(
            account_id,
            period,
            &recharges,
            payments.iter().map(|p| (p, period)),
        );

        assert_eq!(balance.available, Decimal::from(-50_000));
        assert!(!balance.covers(Decimal::ONE));
    }

    #[test]
    fn test_account_totals_ignore_in_flight() {
        let account_id = AccountId::new();
        let period = Period::new(2026, 2).unwrap();

        let recharges = vec![recharge(account_id, period, 500_000, RechargeState::Approved)];
        let payments = vec![
            payment(account_id, 100_000, PaymentState::Paid),
            payment(account_id, 50_000, PaymentState::InProgress),
        ];

        let totals = account_totals(account_id, &recharges, &payments);
        assert_eq!(totals.paid_payments, Decimal::from(100_000));
        assert_eq!(totals.balance, Decimal::from(400_000));
    }
}
