use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::state::Installment;
use crate::store::RecordStore;
use crate::types::{InstallmentId, ReamortizationStrategy, SaleId};

use super::amortization::{level_payment_from_monthly, snap_to_zero};

const INSTALLMENT_REDUCTION_MARKER: &str = "[Capital Paydown] Installment Reduction";
const TERM_REDUCTION_MARKER: &str = "[Capital Paydown] Term Reduction";

/// result of re-deriving the schedule after a lump-sum paydown
#[derive(Debug, Clone, PartialEq)]
pub struct ReamortizationResult {
    pub sale_id: SaleId,
    pub strategy_requested: ReamortizationStrategy,
    pub strategy_applied: ReamortizationStrategy,
    pub fell_back: bool,
    pub new_balance: Money,
    pub new_level_payment: Money,
    pub remaining_installments: u32,
    pub deleted_installments: u32,
}

/// planned rewrite of a sale's open schedule tail
struct SchedulePlan {
    rewritten: Vec<Installment>,
    deleted: Vec<InstallmentId>,
    level_payment: Money,
}

/// re-derives the schedule after a lump-sum principal paydown
///
/// The two strategies are pure planners; a decision step picks one and
/// swaps term reduction for installment reduction when the kept payment
/// cannot cover the periodic interest on the reduced balance.
pub struct CapitalReamortizer {
    store: Arc<dyn RecordStore>,
}

impl CapitalReamortizer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn apply(
        &self,
        sale_id: SaleId,
        amount: Money,
        strategy: ReamortizationStrategy,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<ReamortizationResult> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount { amount });
        }

        let sale = self
            .store
            .sale(sale_id)?
            .ok_or(LedgerError::SaleNotFound { id: sale_id })?;

        let rows = self.store.open_installments_for_sale(sale_id)?;
        if rows.is_empty() {
            return Err(LedgerError::NoUnpaidInstallments { sale_id });
        }

        let monthly_rate = sale.annual_rate.monthly_rate().as_decimal();
        let new_balance = (rows[0].opening_balance - amount).max(Money::ZERO);

        // decision step: term reduction has no finite solution when the kept
        // payment cannot cover the periodic interest on the reduced balance
        let mut applied = strategy;
        if strategy == ReamortizationStrategy::ReduceTerm {
            let scheduled = rows[0].scheduled_amount;
            let periodic_interest = Money::from_decimal(new_balance.as_decimal() * monthly_rate);

            if !monthly_rate.is_zero() && scheduled <= periodic_interest {
                warn!(
                    sale_id = %sale_id,
                    scheduled_payment = %scheduled,
                    periodic_interest = %periodic_interest,
                    "cannot reduce term: payment does not cover interest on the reduced balance, \
                     reducing installment instead"
                );
                events.emit(Event::TermReductionInfeasible {
                    sale_id,
                    scheduled_payment: scheduled,
                    periodic_interest,
                    timestamp: now,
                });
                applied = ReamortizationStrategy::ReduceInstallment;
            }
        }

        let plan = match applied {
            ReamortizationStrategy::ReduceInstallment => {
                plan_installment_reduction(new_balance, monthly_rate, &rows)
            }
            ReamortizationStrategy::ReduceTerm => {
                plan_term_reduction(new_balance, monthly_rate, &rows)
            }
        };

        let remaining = plan.rewritten.len() as u32;
        let deleted = plan.deleted.len() as u32;
        self.store
            .replace_schedule(sale_id, plan.rewritten, plan.deleted)?;

        info!(
            sale_id = %sale_id,
            amount = %amount,
            strategy = ?applied,
            new_balance = %new_balance,
            remaining_installments = remaining,
            deleted_installments = deleted,
            "capital paydown applied"
        );
        events.emit(Event::CapitalPaydownApplied {
            sale_id,
            amount,
            strategy: applied,
            new_balance,
            remaining_installments: remaining,
            timestamp: now,
        });

        Ok(ReamortizationResult {
            sale_id,
            strategy_requested: strategy,
            strategy_applied: applied,
            fell_back: applied != strategy,
            new_balance,
            new_level_payment: plan.level_payment,
            remaining_installments: remaining,
            deleted_installments: deleted,
        })
    }
}

/// keep the term, shrink the level payment
fn plan_installment_reduction(
    new_balance: Money,
    monthly_rate: Decimal,
    rows: &[Installment],
) -> SchedulePlan {
    let payment = level_payment_from_monthly(new_balance, monthly_rate, rows.len() as u32);
    let rewritten = rewrite_rows(
        rows,
        new_balance,
        monthly_rate,
        payment,
        INSTALLMENT_REDUCTION_MARKER,
    );

    SchedulePlan {
        rewritten,
        deleted: Vec::new(),
        level_payment: payment,
    }
}

/// keep the payment, shrink the term, drop the trailing rows
fn plan_term_reduction(
    new_balance: Money,
    monthly_rate: Decimal,
    rows: &[Installment],
) -> SchedulePlan {
    let payment = rows[0].scheduled_amount;
    let term = solve_term(new_balance, monthly_rate, payment).min(rows.len() as u32);
    let keep = term.max(1) as usize;

    let rewritten = rewrite_rows(
        &rows[..keep],
        new_balance,
        monthly_rate,
        payment,
        TERM_REDUCTION_MARKER,
    );
    let deleted = rows[keep..].iter().map(|r| r.id).collect();

    SchedulePlan {
        rewritten,
        deleted,
        level_payment: payment,
    }
}

/// rewrite the interest/principal breakdown of the kept rows
///
/// The final kept row closes the balance exactly, as the ledger has always
/// done when rewriting a live schedule.
fn rewrite_rows(
    rows: &[Installment],
    new_balance: Money,
    monthly_rate: Decimal,
    payment: Money,
    marker: &str,
) -> Vec<Installment> {
    let mut rewritten = Vec::with_capacity(rows.len());
    let mut balance = new_balance;
    let last = rows.len().saturating_sub(1);

    for (index, row) in rows.iter().enumerate() {
        let interest = Money::from_decimal(balance.as_decimal() * monthly_rate);
        let mut principal = payment - interest;

        if index == last || principal > balance {
            principal = balance;
        }

        let closing = snap_to_zero(balance - principal);

        let mut updated = row.clone();
        updated.scheduled_amount = principal + interest;
        updated.interest_portion = interest;
        updated.principal_portion = principal;
        updated.opening_balance = balance;
        updated.closing_balance = closing;
        updated.annotate(marker);
        rewritten.push(updated);

        balance = closing;
    }

    rewritten
}

/// shortest term that amortizes the balance at the kept payment
///
/// Iterative: feasibility (payment > periodic interest) is checked by the
/// caller, so the loop always terminates; 600 periods is a hard stop.
fn solve_term(balance: Money, monthly_rate: Decimal, payment: Money) -> u32 {
    let mut remaining = balance;
    let mut months = 0;

    while remaining > Money::ZERO && months < 600 {
        let interest = remaining.as_decimal() * monthly_rate;
        let principal = payment.as_decimal() - interest;

        if principal <= Decimal::ZERO {
            break;
        }

        remaining = Money::from_decimal((remaining.as_decimal() - principal).max(Decimal::ZERO));
        months += 1;
    }

    months
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::payments::ScheduleGenerator;
    use crate::state::Sale;
    use crate::store::MemoryStore;
    use crate::types::InstallmentStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn setup(total: i64, months: u32, rate_pct: u32) -> (Arc<MemoryStore>, Sale, DateTime<Utc>) {
        let store = Arc::new(MemoryStore::new());
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let sale = Sale::new(
            "L-03".to_string(),
            "buyer-3".to_string(),
            Money::from_major(total),
            Money::ZERO,
            months,
            Rate::from_percentage(rate_pct),
            start,
        );
        store.insert_sale(sale.clone()).unwrap();

        let mut events = EventStore::new();
        ScheduleGenerator::generate(&sale, store.as_ref(), &mut events, start).unwrap();
        (store, sale, start)
    }

    #[test]
    fn test_reduce_installment_keeps_term() {
        let (store, sale, now) = setup(10_000, 10, 0);
        let reamortizer = CapitalReamortizer::new(store.clone());
        let mut events = EventStore::new();

        let result = reamortizer
            .apply(
                sale.id,
                Money::from_major(4_000),
                ReamortizationStrategy::ReduceInstallment,
                now,
                &mut events,
            )
            .unwrap();

        assert!(!result.fell_back);
        assert_eq!(result.new_balance, Money::from_major(6_000));
        assert_eq!(result.new_level_payment, Money::from_major(600));
        assert_eq!(result.deleted_installments, 0);

        let rows = store.installments_for_sale(sale.id).unwrap();
        assert_eq!(rows.len(), 10);
        for row in &rows {
            assert_eq!(row.scheduled_amount, Money::from_major(600));
            assert!(row.notes.contains(INSTALLMENT_REDUCTION_MARKER));
        }
        assert_eq!(rows.last().unwrap().closing_balance, Money::ZERO);
    }

    #[test]
    fn test_reduce_term_keeps_payment() {
        let (store, sale, now) = setup(10_000, 10, 0);
        let reamortizer = CapitalReamortizer::new(store.clone());
        let mut events = EventStore::new();

        let result = reamortizer
            .apply(
                sale.id,
                Money::from_major(4_000),
                ReamortizationStrategy::ReduceTerm,
                now,
                &mut events,
            )
            .unwrap();

        assert!(!result.fell_back);
        assert_eq!(result.remaining_installments, 6);
        assert_eq!(result.deleted_installments, 4);

        let rows = store.installments_for_sale(sale.id).unwrap();
        assert_eq!(rows.len(), 6);
        for row in &rows {
            assert_eq!(row.scheduled_amount, Money::from_major(1_000));
            assert!(row.notes.contains(TERM_REDUCTION_MARKER));
        }
        assert_eq!(rows.last().unwrap().closing_balance, Money::ZERO);
    }

    #[test]
    fn test_reduce_term_with_interest() {
        let (store, sale, now) = setup(10_000, 10, 12);
        let reamortizer = CapitalReamortizer::new(store.clone());
        let mut events = EventStore::new();

        let result = reamortizer
            .apply(
                sale.id,
                Money::from_major(5_000),
                ReamortizationStrategy::ReduceTerm,
                now,
                &mut events,
            )
            .unwrap();

        // $5,000 left at 1%/month against the kept $1,055.82 payment
        assert_eq!(result.remaining_installments, 5);
        assert_eq!(result.deleted_installments, 5);

        let rows = store.installments_for_sale(sale.id).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].opening_balance, Money::from_major(5_000));
        assert_eq!(rows[0].interest_portion, Money::from_major(50));
        assert_eq!(rows.last().unwrap().closing_balance, Money::ZERO);
        // final row closes the balance even though it shortens the payment
        let last = rows.last().unwrap();
        assert_eq!(last.principal_portion, last.opening_balance);
    }

    #[test]
    fn test_infeasible_term_reduction_falls_back() {
        // hand-built tail whose payment cannot cover monthly interest
        let store = Arc::new(MemoryStore::new());
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let sale = Sale::new(
            "L-09".to_string(),
            "buyer-9".to_string(),
            Money::from_major(10_000),
            Money::ZERO,
            200,
            Rate::from_percentage(12),
            start,
        );
        store.insert_sale(sale.clone()).unwrap();

        let mut events = EventStore::new();
        let rows = ScheduleGenerator::build(&sale).unwrap();
        // shrink every scheduled payment below the interest line
        let crippled: Vec<_> = rows
            .into_iter()
            .map(|mut r| {
                r.scheduled_amount = Money::from_major(50);
                r
            })
            .collect();
        store.insert_installments(crippled).unwrap();

        let reamortizer = CapitalReamortizer::new(store.clone());
        let result = reamortizer
            .apply(
                sale.id,
                Money::from_major(1_000),
                ReamortizationStrategy::ReduceTerm,
                start,
                &mut events,
            )
            .unwrap();

        assert!(result.fell_back);
        assert_eq!(
            result.strategy_applied,
            ReamortizationStrategy::ReduceInstallment
        );
        // nothing deleted: the whole tail was rewritten instead
        assert_eq!(result.deleted_installments, 0);
        let rows = store.installments_for_sale(sale.id).unwrap();
        assert_eq!(rows.len(), 200);
        assert!(rows[0].notes.contains(INSTALLMENT_REDUCTION_MARKER));
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, Event::TermReductionInfeasible { .. })));
    }

    #[test]
    fn test_paid_rows_are_left_alone() {
        let (store, sale, now) = setup(10_000, 10, 0);

        let rows = store.installments_for_sale(sale.id).unwrap();
        let mut first = rows[0].clone();
        first.amount_paid = first.scheduled_amount;
        first.status = InstallmentStatus::Paid;
        first.paid_date = Some(now);
        store.update_installment(first.clone()).unwrap();

        let reamortizer = CapitalReamortizer::new(store.clone());
        let mut events = EventStore::new();
        let result = reamortizer
            .apply(
                sale.id,
                Money::from_major(3_000),
                ReamortizationStrategy::ReduceInstallment,
                now,
                &mut events,
            )
            .unwrap();

        assert_eq!(result.remaining_installments, 9);
        // the lump sum came off the first open row's balance
        assert_eq!(result.new_balance, Money::from_major(6_000));

        let untouched = store.installment(first.id).unwrap().unwrap();
        assert_eq!(untouched.scheduled_amount, Money::from_major(1_000));
        assert!(untouched.notes.is_empty());
    }

    #[test]
    fn test_rejects_empty_tail() {
        let store = Arc::new(MemoryStore::new());
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let sale = Sale::new(
            "L-11".to_string(),
            "buyer-11".to_string(),
            Money::from_major(1_000),
            Money::from_major(1_000),
            1,
            Rate::ZERO,
            start,
        );
        store.insert_sale(sale.clone()).unwrap();

        let reamortizer = CapitalReamortizer::new(store.clone());
        let mut events = EventStore::new();
        let err = reamortizer
            .apply(
                sale.id,
                Money::from_major(100),
                ReamortizationStrategy::ReduceTerm,
                start,
                &mut events,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoUnpaidInstallments { .. }));
    }

    #[test]
    fn test_solve_term_zero_interest_rounds_up() {
        let months = solve_term(Money::from_major(2_500), dec!(0), Money::from_major(1_000));
        assert_eq!(months, 3);
    }
}
