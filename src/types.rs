use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;

/// unique identifier for a sale
pub type SaleId = Uuid;
/// unique identifier for an installment row
pub type InstallmentId = Uuid;
/// unique identifier for a payment
pub type PaymentId = Uuid;
/// unique identifier for a penalty row
pub type PenaltyId = Uuid;

/// sale lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// contract signed, installments outstanding
    Contract,
    /// every installment settled
    PaidOff,
    /// contract rescinded
    Canceled,
}

impl SaleStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SaleStatus::Contract)
    }
}

/// installment status, a closed state machine
///
/// Paid is terminal: a paid installment row is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl InstallmentStatus {
    /// valid transitions
    pub fn can_transition(self, to: InstallmentStatus) -> bool {
        use InstallmentStatus::*;
        match (self, to) {
            (Pending, Partial) | (Pending, Paid) | (Pending, Overdue) => true,
            (Partial, Paid) | (Partial, Overdue) => true,
            (Overdue, Partial) | (Overdue, Paid) => true,
            (from, to) => from == to && from != Paid,
        }
    }

    /// still payable
    pub fn is_open(&self) -> bool {
        !matches!(self, InstallmentStatus::Paid)
    }
}

/// payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// recorded, awaiting confirmation or allocation
    Pending,
    /// confirmed and settled
    Paid,
}

/// how a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
}

/// re-amortization strategy after a capital paydown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReamortizationStrategy {
    /// keep the term, shrink the periodic payment (REDUCIR_CUOTA)
    ReduceInstallment,
    /// keep the payment, shrink the term (REDUCIR_PLAZO)
    ReduceTerm,
}

/// declared intent of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentKind {
    /// regular payment, flows through the waterfall
    Standard,
    /// lump-sum principal paydown, triggers re-amortization
    CapitalPaydown {
        strategy: ReamortizationStrategy,
    },
}

impl PaymentKind {
    /// fallback parser for legacy free-text notes
    ///
    /// The typed field is authoritative; this only exists so payments
    /// captured with "CAPITAL"/"PLAZO" markers in the note keep working.
    pub fn from_note(note: &str) -> PaymentKind {
        let upper = note.to_uppercase();
        if upper.contains("CAPITAL") {
            let strategy = if upper.contains("PLAZO") {
                ReamortizationStrategy::ReduceTerm
            } else {
                ReamortizationStrategy::ReduceInstallment
            };
            PaymentKind::CapitalPaydown { strategy }
        } else {
            PaymentKind::Standard
        }
    }
}

/// webhook event processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookState {
    Pending,
    Processed,
    Failed,
}

/// how a single payment amount was consumed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AllocationBreakdown {
    pub to_penalties: Money,
    pub to_installments: Money,
    pub excess: Money,
}

impl AllocationBreakdown {
    pub fn total_applied(&self) -> Money {
        self.to_penalties + self.to_installments
    }
}

/// per-installment slice of an allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentApplication {
    pub installment_id: InstallmentId,
    pub sequence_number: u32,
    pub amount: Money,
    pub new_status: InstallmentStatus,
}
