use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::state::Payment;
use crate::store::RecordStore;
use crate::types::{
    AllocationBreakdown, InstallmentApplication, InstallmentStatus, PaymentKind, SaleStatus,
};

use super::reamortize::{CapitalReamortizer, ReamortizationResult};

/// rounding tolerance for the paid/partial decision
const TOLERANCE: Money = Money::CENT;

/// outcome of applying one payment
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub payment: Payment,
    pub breakdown: AllocationBreakdown,
    pub applications: Vec<InstallmentApplication>,
    pub reamortization: Option<ReamortizationResult>,
    pub sale_settled: bool,
}

/// applies an incoming payment across penalties and installments
///
/// Waterfall order: open penalties oldest-due-first, then open installments
/// by ascending sequence number. Capital-paydown payments bypass the
/// waterfall and re-amortize instead.
pub struct PaymentAllocator {
    store: Arc<dyn RecordStore>,
}

impl PaymentAllocator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// allocate a recorded payment; the payment row must already be stored
    pub fn allocate(
        &self,
        payment: Payment,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<AllocationOutcome> {
        if !payment.amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount {
                amount: payment.amount,
            });
        }

        match payment.resolved_kind() {
            PaymentKind::CapitalPaydown { strategy } => {
                let reamortizer = CapitalReamortizer::new(self.store.clone());
                let result =
                    reamortizer.apply(payment.sale_id, payment.amount, strategy, now, events)?;

                Ok(AllocationOutcome {
                    payment,
                    breakdown: AllocationBreakdown::default(),
                    applications: Vec::new(),
                    reamortization: Some(result),
                    sale_settled: false,
                })
            }
            PaymentKind::Standard => self.run_waterfall(payment, now, events),
        }
    }

    fn run_waterfall(
        &self,
        mut payment: Payment,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<AllocationOutcome> {
        let mut remaining = payment.amount;
        let mut breakdown = AllocationBreakdown::default();
        let mut applications = Vec::new();

        // 1. penalties, oldest due date first
        remaining = self.settle_penalties(&mut payment, remaining, &mut breakdown, now, events)?;

        // 2. open installments by ascending sequence
        let mut fully_paid_any = false;
        if remaining > Money::ZERO {
            let installments = self.store.open_installments_for_sale(payment.sale_id)?;

            for mut row in installments {
                if remaining.is_zero() {
                    break;
                }

                let due = row.remaining_due();
                if due.is_zero() {
                    continue;
                }

                if remaining >= due - TOLERANCE {
                    // covers the installment (within the rounding tolerance)
                    row.amount_paid = row.scheduled_amount;
                    row.transition(InstallmentStatus::Paid)?;
                    row.paid_date = Some(now);
                    remaining = (remaining - due).max(Money::ZERO);
                    breakdown.to_installments += due;
                    fully_paid_any = true;

                    applications.push(InstallmentApplication {
                        installment_id: row.id,
                        sequence_number: row.sequence_number,
                        amount: due,
                        new_status: InstallmentStatus::Paid,
                    });
                    events.emit(Event::InstallmentPaid {
                        installment_id: row.id,
                        sequence_number: row.sequence_number,
                        amount: due,
                        timestamp: now,
                    });
                } else {
                    // partial payment: accrue, no paid date
                    row.amount_paid += remaining;
                    row.transition(InstallmentStatus::Partial)?;
                    breakdown.to_installments += remaining;

                    applications.push(InstallmentApplication {
                        installment_id: row.id,
                        sequence_number: row.sequence_number,
                        amount: remaining,
                        new_status: InstallmentStatus::Partial,
                    });
                    events.emit(Event::InstallmentPartiallyPaid {
                        installment_id: row.id,
                        sequence_number: row.sequence_number,
                        amount: remaining,
                        remaining_due: row.remaining_due(),
                        timestamp: now,
                    });
                    remaining = Money::ZERO;
                }

                self.store.update_installment(row)?;
            }
        }

        breakdown.excess = remaining;
        if remaining > Money::ZERO {
            warn!(
                payment_id = %payment.id,
                excess = %remaining,
                "payment amount left over after waterfall"
            );
        }

        payment.installment_id = applications.first().map(|a| a.installment_id);
        self.store.update_payment(payment.clone())?;

        // settling the last open installment pays off the sale
        let sale_settled = fully_paid_any && self.settle_sale_if_done(&payment, now, events)?;

        info!(
            payment_id = %payment.id,
            sale_id = %payment.sale_id,
            to_penalties = %breakdown.to_penalties,
            to_installments = %breakdown.to_installments,
            excess = %breakdown.excess,
            "payment allocated"
        );
        events.emit(Event::PaymentAllocated {
            payment_id: payment.id,
            sale_id: payment.sale_id,
            to_penalties: breakdown.to_penalties,
            to_installments: breakdown.to_installments,
            excess: breakdown.excess,
            timestamp: now,
        });

        Ok(AllocationOutcome {
            payment,
            breakdown,
            applications,
            reamortization: None,
            sale_settled,
        })
    }

    fn settle_penalties(
        &self,
        payment: &mut Payment,
        mut remaining: Money,
        breakdown: &mut AllocationBreakdown,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<Money> {
        let penalties = self.store.open_penalties_for_sale(payment.sale_id)?;

        for mut penalty in penalties {
            if remaining.is_zero() {
                break;
            }

            let portion = remaining.min(penalty.amount);
            if !portion.is_positive() {
                continue;
            }

            remaining -= portion;
            breakdown.to_penalties += portion;
            payment.moratorium_amount += portion;

            let cleared = portion == penalty.amount;
            let installment = self.store.installment(penalty.installment_id)?;

            if cleared {
                penalty.applied = true;
                penalty.applied_payment = Some(payment.id);
                events.emit(Event::PenaltyCleared {
                    installment_id: penalty.installment_id,
                    payment_id: payment.id,
                    amount: portion,
                    timestamp: now,
                });
            } else {
                penalty.amount -= portion;
            }

            if let Some(mut row) = installment {
                row.accrued_penalty = if cleared {
                    Money::ZERO
                } else {
                    (row.accrued_penalty - portion).max(Money::ZERO)
                };
                self.store.update_installment(row)?;
            }

            self.store.update_penalty(penalty)?;
        }

        if payment.moratorium_amount.is_positive() {
            self.store.update_payment(payment.clone())?;
        }

        Ok(remaining)
    }

    fn settle_sale_if_done(
        &self,
        payment: &Payment,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<bool> {
        if !self.store.open_installments_for_sale(payment.sale_id)?.is_empty() {
            return Ok(false);
        }

        let Some(mut sale) = self.store.sale(payment.sale_id)? else {
            return Ok(false);
        };
        if sale.status != SaleStatus::Contract {
            return Ok(false);
        }

        sale.status = SaleStatus::PaidOff;
        self.store.update_sale(sale)?;

        info!(sale_id = %payment.sale_id, "sale fully settled");
        events.emit(Event::SaleSettled {
            sale_id: payment.sale_id,
            timestamp: now,
        });
        Ok(true)
    }
}
