use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::state::{Installment, Sale};
use crate::store::RecordStore;
use crate::types::InstallmentStatus;

/// builds the fixed-rate amortization table for a sale's financed principal
pub struct ScheduleGenerator;

impl ScheduleGenerator {
    /// build the installment rows without touching the store
    pub fn build(sale: &Sale) -> Result<Vec<Installment>> {
        let principal = sale.financed_principal();

        if principal.is_negative() {
            return Err(LedgerError::InvalidSaleTerms {
                message: format!("financed principal is negative: {principal}"),
            });
        }
        if sale.term_months == 0 {
            return Err(LedgerError::InvalidSaleTerms {
                message: "term must be at least one month".to_string(),
            });
        }

        let monthly_rate = sale.annual_rate.monthly_rate().as_decimal();
        let payment = level_payment(principal, sale.annual_rate, sale.term_months);

        let mut rows = Vec::with_capacity(sale.term_months as usize);
        let mut balance = principal;

        for k in 1..=sale.term_months {
            let due_date = add_months(sale.start_date, k)?.date_naive();
            let interest = Money::from_decimal(balance.as_decimal() * monthly_rate);
            let principal_portion = payment - interest;
            let closing = snap_to_zero(balance - principal_portion);

            rows.push(Installment {
                id: Uuid::new_v4(),
                sale_id: sale.id,
                sequence_number: k,
                due_date,
                scheduled_amount: payment,
                interest_portion: interest,
                principal_portion,
                opening_balance: balance,
                closing_balance: closing,
                amount_paid: Money::ZERO,
                accrued_penalty: Money::ZERO,
                days_late: 0,
                status: InstallmentStatus::Pending,
                paid_date: None,
                notes: String::new(),
            });

            balance = closing;
        }

        Ok(rows)
    }

    /// build the table and bulk-insert it in one batch
    pub fn generate(
        sale: &Sale,
        store: &dyn RecordStore,
        events: &mut EventStore,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Installment>> {
        let rows = Self::build(sale)?;
        Self::persist(sale, rows, store, events, timestamp)
    }

    /// bulk-insert already-built rows, scoped to the sale
    pub fn persist(
        sale: &Sale,
        rows: Vec<Installment>,
        store: &dyn RecordStore,
        events: &mut EventStore,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Installment>> {
        let level = rows
            .first()
            .map(|r| r.scheduled_amount)
            .unwrap_or(Money::ZERO);

        store.insert_installments(rows.clone())?;

        info!(
            sale_id = %sale.id,
            installments = rows.len(),
            level_payment = %level,
            "amortization schedule generated"
        );

        events.emit(Event::ScheduleGenerated {
            sale_id: sale.id,
            installments: rows.len() as u32,
            level_payment: level,
            timestamp,
        });

        Ok(rows)
    }
}

/// level annuity payment: P * i * (1+i)^n / ((1+i)^n - 1), or P/n at 0%
pub(crate) fn level_payment(principal: Money, annual_rate: Rate, months: u32) -> Money {
    level_payment_from_monthly(principal, annual_rate.monthly_rate().as_decimal(), months)
}

pub(crate) fn level_payment_from_monthly(
    principal: Money,
    monthly_rate: Decimal,
    months: u32,
) -> Money {
    if months == 0 {
        return principal;
    }

    if monthly_rate.is_zero() {
        return principal / Decimal::from(months);
    }

    let compound = compound_factor(monthly_rate, months);
    let numerator = principal.as_decimal() * monthly_rate * compound;
    let denominator = compound - Decimal::ONE;

    Money::from_decimal(numerator / denominator)
}

/// (1 + r)^n
pub(crate) fn compound_factor(monthly_rate: Decimal, months: u32) -> Decimal {
    let base = Decimal::ONE + monthly_rate;
    let mut compound = Decimal::ONE;
    for _ in 0..months {
        compound *= base;
    }
    compound
}

/// balances below one cent collapse to zero
pub(crate) fn snap_to_zero(balance: Money) -> Money {
    if balance < Money::CENT {
        Money::ZERO
    } else {
        balance
    }
}

pub(crate) fn add_months(date: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| LedgerError::InvalidDate {
            message: format!("cannot advance {date} by {months} months"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use rust_decimal_macros::dec;

    fn sale(total: i64, down: i64, months: u32, rate_pct: u32) -> Sale {
        Sale::new(
            "L-01".to_string(),
            "buyer-1".to_string(),
            Money::from_major(total),
            Money::from_major(down),
            months,
            Rate::from_percentage(rate_pct),
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_level_payment_example() {
        // $12,000 total, $2,000 down, 10 months at 12%/year
        let payment = level_payment(Money::from_major(10_000), Rate::from_percentage(12), 10);
        assert_eq!(payment, Money::from_str_exact("1055.82").unwrap());
    }

    #[test]
    fn test_level_payment_zero_interest() {
        let payment = level_payment(Money::from_major(10_000), Rate::ZERO, 10);
        assert_eq!(payment, Money::from_major(1_000));
    }

    #[test]
    fn test_schedule_shape() {
        let rows = ScheduleGenerator::build(&sale(12_000, 2_000, 10, 12)).unwrap();

        assert_eq!(rows.len(), 10);
        let first = &rows[0];
        assert_eq!(first.sequence_number, 1);
        assert_eq!(first.opening_balance, Money::from_major(10_000));
        assert_eq!(first.interest_portion, Money::from_major(100));
        assert_eq!(first.principal_portion, Money::from_str_exact("955.82").unwrap());
        assert_eq!(first.status, InstallmentStatus::Pending);

        // this example closes exactly
        assert_eq!(rows.last().unwrap().closing_balance, Money::ZERO);
    }

    #[test]
    fn test_principal_components_sum_to_principal() {
        for (total, down, months, rate) in [
            (12_000, 2_000, 10, 12),
            (250_000, 50_000, 120, 9),
            (7_500, 0, 36, 18),
            (9_999, 999, 7, 0),
        ] {
            let s = sale(total, down, months, rate);
            let rows = ScheduleGenerator::build(&s).unwrap();
            let sum = rows
                .iter()
                .fold(Money::ZERO, |acc, r| acc + r.principal_portion);
            let tolerance = Money::from_decimal(dec!(0.01) * Decimal::from(months));
            assert!(
                (sum - s.financed_principal()).abs() <= tolerance,
                "principal sum {sum} strayed from {} for {months} months",
                s.financed_principal()
            );
        }
    }

    #[test]
    fn test_zero_interest_schedule() {
        let rows = ScheduleGenerator::build(&sale(12_000, 2_000, 10, 0)).unwrap();

        for row in &rows {
            assert_eq!(row.interest_portion, Money::ZERO);
            assert_eq!(row.principal_portion, row.scheduled_amount);
            assert_eq!(row.scheduled_amount, Money::from_major(1_000));
        }
    }

    #[test]
    fn test_due_dates_advance_by_calendar_month() {
        let rows = ScheduleGenerator::build(&sale(12_000, 2_000, 10, 12)).unwrap();

        assert_eq!(rows[0].due_date.month(), 2);
        assert_eq!(rows[0].due_date.day(), 15);
        assert_eq!(rows[8].due_date.month(), 10);
        assert_eq!(rows[9].due_date.month(), 11);
    }

    #[test]
    fn test_rejects_bad_terms() {
        assert!(ScheduleGenerator::build(&sale(12_000, 2_000, 0, 12)).is_err());
        assert!(ScheduleGenerator::build(&sale(2_000, 12_000, 10, 12)).is_err());
    }

    #[test]
    fn test_generate_persists_rows() {
        use crate::store::MemoryStore;

        let store = MemoryStore::new();
        let mut events = EventStore::new();
        let s = sale(12_000, 2_000, 10, 12);

        let rows =
            ScheduleGenerator::generate(&s, &store, &mut events, s.start_date).unwrap();
        assert_eq!(rows.len(), 10);

        let stored = store.installments_for_sale(s.id).unwrap();
        assert_eq!(stored.len(), 10);
        assert!(matches!(
            events.events()[0],
            Event::ScheduleGenerated { installments: 10, .. }
        ));
    }
}
