use chrono::{DateTime, Duration, Utc};
use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::PenaltyConfig;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::{Event, EventStore};
use crate::state::{Installment, Penalty};
use crate::store::RecordStore;
use crate::types::InstallmentStatus;

/// outcome of one accrual batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccrualSummary {
    pub scanned: usize,
    pub accrued: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// scans overdue installments and accrues late-payment penalties
///
/// Runs as a scheduled batch. Items are independent: one installment's
/// store error is logged and skipped, the batch continues.
pub struct PenaltyAccrualEngine {
    store: Arc<dyn RecordStore>,
}

impl PenaltyAccrualEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn run(
        &self,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<AccrualSummary> {
        let config = self.store.penalty_config()?.unwrap_or_default();
        let now = time_provider.now();
        let cutoff = now.date_naive() - Duration::days(config.grace_period_days as i64);

        let candidates = self.store.overdue_candidates(cutoff)?;
        info!(
            candidates = candidates.len(),
            grace_days = config.grace_period_days,
            "penalty accrual batch started"
        );

        let mut summary = AccrualSummary::default();
        for row in candidates {
            summary.scanned += 1;
            match self.accrue_one(&row, &config, now, events) {
                Ok(true) => summary.accrued += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!(
                        installment_id = %row.id,
                        sale_id = %row.sale_id,
                        error = %e,
                        "penalty accrual failed for installment"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            accrued = summary.accrued,
            skipped = summary.skipped,
            failed = summary.failed,
            "penalty accrual batch finished"
        );
        Ok(summary)
    }

    fn accrue_one(
        &self,
        row: &Installment,
        config: &PenaltyConfig,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<bool> {
        let days_overdue = (now.date_naive() - row.due_date).num_days();
        let days_late = days_overdue - config.grace_period_days as i64;
        if days_late <= 0 {
            return Ok(false);
        }
        let days_late = days_late as u32;

        let penalty_amount = Money::from_decimal(
            row.scheduled_amount.as_decimal() * config.daily_rate() * Decimal::from(days_late),
        );

        match self.store.open_penalty_for_installment(row.id)? {
            Some(mut penalty) => {
                penalty.days_late = days_late;
                penalty.amount = penalty_amount;
                penalty.computed_at = now;
                self.store.update_penalty(penalty)?;
            }
            None => {
                self.store.insert_penalty(Penalty::new(
                    row.id,
                    row.sale_id,
                    penalty_amount,
                    days_late,
                    config.monthly_rate,
                    now,
                ))?;
            }
        }

        // mirror onto the installment row
        let mut updated = row.clone();
        updated.accrued_penalty = penalty_amount;
        updated.days_late = days_late;
        if updated.status == InstallmentStatus::Pending {
            updated.transition(InstallmentStatus::Overdue)?;
            events.emit(Event::InstallmentOverdue {
                installment_id: updated.id,
                due_date: updated.due_date,
                days_late,
            });
        }
        self.store.update_installment(updated)?;

        events.emit(Event::PenaltyAccrued {
            sale_id: row.sale_id,
            installment_id: row.id,
            amount: penalty_amount,
            days_late,
            timestamp: now,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::payments::ScheduleGenerator;
    use crate::state::Sale;
    use crate::store::testing::FlakyStore;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use hourglass_rs::TimeSource;
    use std::sync::atomic::Ordering;

    fn seeded_store(start: DateTime<Utc>) -> (Arc<MemoryStore>, Sale) {
        let store = Arc::new(MemoryStore::new());
        let sale = Sale::new(
            "L-05".to_string(),
            "buyer-5".to_string(),
            Money::from_major(10_000),
            Money::ZERO,
            10,
            Rate::ZERO,
            start,
        );
        store.insert_sale(sale.clone()).unwrap();
        let mut events = EventStore::new();
        ScheduleGenerator::generate(&sale, store.as_ref(), &mut events, start).unwrap();
        (store, sale)
    }

    #[test]
    fn test_accrues_on_overdue_installment() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let (store, sale) = seeded_store(start);

        // first installment due 2024-02-15; 20 days past due, 5 grace
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(now));

        let engine = PenaltyAccrualEngine::new(store.clone());
        let mut events = EventStore::new();
        let summary = engine.run(&time, &mut events).unwrap();

        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.accrued, 1);
        assert_eq!(summary.failed, 0);

        let rows = store.installments_for_sale(sale.id).unwrap();
        // 1000 * (1.5%/30) * 15 days late = 7.50
        assert_eq!(rows[0].days_late, 15);
        assert_eq!(rows[0].accrued_penalty, Money::from_str_exact("7.50").unwrap());
        assert_eq!(rows[0].status, InstallmentStatus::Overdue);

        let penalty = store.open_penalty_for_installment(rows[0].id).unwrap().unwrap();
        assert_eq!(penalty.amount, Money::from_str_exact("7.50").unwrap());
        assert_eq!(penalty.days_late, 15);
        assert!(!penalty.applied);
    }

    #[test]
    fn test_no_penalty_inside_grace_window() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let (store, sale) = seeded_store(start);

        // due 2024-02-15, exactly grace days later: still a no-op
        let now = Utc.with_ymd_and_hms(2024, 2, 20, 0, 0, 0).unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(now));

        let engine = PenaltyAccrualEngine::new(store.clone());
        let mut events = EventStore::new();
        let summary = engine.run(&time, &mut events).unwrap();

        assert_eq!(summary.accrued, 0);
        let rows = store.installments_for_sale(sale.id).unwrap();
        assert_eq!(rows[0].accrued_penalty, Money::ZERO);
        assert_eq!(rows[0].status, InstallmentStatus::Pending);
        assert!(store.open_penalty_for_installment(rows[0].id).unwrap().is_none());
    }

    #[test]
    fn test_reruns_update_the_open_penalty_in_place() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let (store, sale) = seeded_store(start);

        let now = Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(now));
        let engine = PenaltyAccrualEngine::new(store.clone());
        let mut events = EventStore::new();

        engine.run(&time, &mut events).unwrap();
        let rows = store.installments_for_sale(sale.id).unwrap();
        let first_pass = store
            .open_penalty_for_installment(rows[0].id)
            .unwrap()
            .unwrap();

        // ten more days pass
        let control = time.test_control().unwrap();
        control.advance(Duration::days(10));
        engine.run(&time, &mut events).unwrap();

        let second_pass = store
            .open_penalty_for_installment(rows[0].id)
            .unwrap()
            .unwrap();
        assert_eq!(second_pass.id, first_pass.id, "penalty row is reused");
        assert_eq!(second_pass.days_late, 25);
        // 1000 * 0.0005 * 25
        assert_eq!(second_pass.amount, Money::from_str_exact("12.50").unwrap());
    }

    #[test]
    fn test_item_failure_does_not_abort_batch() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let (inner, sale) = seeded_store(start);

        // two installments overdue
        let now = Utc.with_ymd_and_hms(2024, 4, 6, 0, 0, 0).unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(now));

        let flaky = Arc::new(FlakyStore::new(inner.clone()));
        flaky.failing_installment_updates.store(1, Ordering::SeqCst);

        let engine = PenaltyAccrualEngine::new(flaky);
        let mut events = EventStore::new();
        let summary = engine.run(&time, &mut events).unwrap();

        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.accrued, 1);

        // the second item still landed
        let rows = inner.installments_for_sale(sale.id).unwrap();
        assert!(rows[1].accrued_penalty.is_positive());
    }
}
