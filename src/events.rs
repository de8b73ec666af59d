use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    InstallmentId, PaymentId, ReamortizationStrategy, SaleId,
};

/// all events emitted by the ledger engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // schedule events
    ScheduleGenerated {
        sale_id: SaleId,
        installments: u32,
        level_payment: Money,
        timestamp: DateTime<Utc>,
    },

    // penalty events
    PenaltyAccrued {
        sale_id: SaleId,
        installment_id: InstallmentId,
        amount: Money,
        days_late: u32,
        timestamp: DateTime<Utc>,
    },
    PenaltyCleared {
        installment_id: InstallmentId,
        payment_id: PaymentId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentRecorded {
        payment_id: PaymentId,
        sale_id: SaleId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentAllocated {
        payment_id: PaymentId,
        sale_id: SaleId,
        to_penalties: Money,
        to_installments: Money,
        excess: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentPaid {
        installment_id: InstallmentId,
        sequence_number: u32,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentPartiallyPaid {
        installment_id: InstallmentId,
        sequence_number: u32,
        amount: Money,
        remaining_due: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentConfirmed {
        payment_id: PaymentId,
        gateway_intent_id: String,
        timestamp: DateTime<Utc>,
    },

    // re-amortization events
    CapitalPaydownApplied {
        sale_id: SaleId,
        amount: Money,
        strategy: ReamortizationStrategy,
        new_balance: Money,
        remaining_installments: u32,
        timestamp: DateTime<Utc>,
    },
    TermReductionInfeasible {
        sale_id: SaleId,
        scheduled_payment: Money,
        periodic_interest: Money,
        timestamp: DateTime<Utc>,
    },

    // sale lifecycle events
    SaleSettled {
        sale_id: SaleId,
        timestamp: DateTime<Utc>,
    },
    InstallmentOverdue {
        installment_id: InstallmentId,
        due_date: NaiveDate,
        days_late: u32,
    },

    // webhook events
    WebhookProcessed {
        external_id: String,
        event_type: String,
        timestamp: DateTime<Utc>,
    },
    WebhookFailed {
        external_id: String,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
