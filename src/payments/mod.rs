pub mod amortization;
pub mod reamortize;
pub mod waterfall;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{PaymentKind, PaymentMethod, SaleId};

pub use amortization::ScheduleGenerator;
pub use reamortize::{CapitalReamortizer, ReamortizationResult};
pub use waterfall::{AllocationOutcome, PaymentAllocator};

/// request to record an incoming payment
#[derive(Debug, Clone)]
pub struct PaymentInput {
    pub sale_id: SaleId,
    pub amount: Money,
    pub note: String,
    /// typed intent; None falls back to scanning the note
    pub kind: Option<PaymentKind>,
    pub method: Option<PaymentMethod>,
}

impl PaymentInput {
    pub fn standard(sale_id: SaleId, amount: Money, note: impl Into<String>) -> Self {
        Self {
            sale_id,
            amount,
            note: note.into(),
            kind: Some(PaymentKind::Standard),
            method: None,
        }
    }

    /// reject before any mutation
    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount {
                amount: self.amount,
            });
        }
        Ok(())
    }

    /// typed field wins, note scanning is the legacy fallback
    pub fn resolved_kind(&self) -> PaymentKind {
        self.kind.unwrap_or_else(|| PaymentKind::from_note(&self.note))
    }
}
