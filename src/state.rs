use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::{
    InstallmentId, InstallmentStatus, PaymentId, PaymentKind, PaymentMethod, PaymentStatus,
    PenaltyId, SaleId, SaleStatus, WebhookState,
};

/// a financed lot sale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub lot: String,
    pub buyer_id: String,
    pub total_price: Money,
    pub down_payment: Money,
    pub term_months: u32,
    pub annual_rate: Rate,
    pub start_date: DateTime<Utc>,
    pub status: SaleStatus,
}

impl Sale {
    pub fn new(
        lot: String,
        buyer_id: String,
        total_price: Money,
        down_payment: Money,
        term_months: u32,
        annual_rate: Rate,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lot,
            buyer_id,
            total_price,
            down_payment,
            term_months,
            annual_rate,
            start_date,
            status: SaleStatus::Contract,
        }
    }

    /// amount financed over the term
    pub fn financed_principal(&self) -> Money {
        self.total_price - self.down_payment
    }
}

/// one scheduled periodic payment row of the amortization table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub sale_id: SaleId,
    pub sequence_number: u32,
    pub due_date: NaiveDate,
    pub scheduled_amount: Money,
    pub interest_portion: Money,
    pub principal_portion: Money,
    pub opening_balance: Money,
    pub closing_balance: Money,
    pub amount_paid: Money,
    pub accrued_penalty: Money,
    pub days_late: u32,
    pub status: InstallmentStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub notes: String,
}

impl Installment {
    /// unpaid remainder of the scheduled amount
    pub fn remaining_due(&self) -> Money {
        (self.scheduled_amount - self.amount_paid).max(Money::ZERO)
    }

    /// still payable
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// move to a new status, enforcing the transition table
    pub fn transition(&mut self, to: InstallmentStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(LedgerError::InvalidStatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// append an annotation line to the notes field
    pub fn annotate(&mut self, marker: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(marker);
    }
}

/// an incoming payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub sale_id: SaleId,
    pub installment_id: Option<InstallmentId>,
    pub amount: Money,
    pub received_date: DateTime<Utc>,
    pub note: String,
    /// typed intent; None falls back to note scanning at the boundary
    pub kind: Option<PaymentKind>,
    pub status: PaymentStatus,
    pub method: Option<PaymentMethod>,
    /// portion of the amount consumed by late-payment penalties
    pub moratorium_amount: Money,
    pub gateway_intent_id: Option<String>,
    pub card_last4: Option<String>,
    pub paid_date: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(sale_id: SaleId, amount: Money, received_date: DateTime<Utc>, note: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sale_id,
            installment_id: None,
            amount,
            received_date,
            note,
            kind: None,
            status: PaymentStatus::Pending,
            method: None,
            moratorium_amount: Money::ZERO,
            gateway_intent_id: None,
            card_last4: None,
            paid_date: None,
        }
    }

    /// resolved intent: the typed field wins, the note is the fallback
    pub fn resolved_kind(&self) -> PaymentKind {
        self.kind.unwrap_or_else(|| PaymentKind::from_note(&self.note))
    }

    pub fn is_paid(&self) -> bool {
        self.status == PaymentStatus::Paid
    }

    /// append a line to the free-text note
    pub fn append_note(&mut self, line: &str) {
        if !self.note.is_empty() {
            self.note.push('\n');
        }
        self.note.push_str(line);
    }
}

/// accumulated late fee against one installment
///
/// At most one open (unapplied) penalty exists per installment; the accrual
/// engine updates it in place until a payment clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Penalty {
    pub id: PenaltyId,
    pub installment_id: InstallmentId,
    pub sale_id: SaleId,
    pub amount: Money,
    pub days_late: u32,
    pub monthly_rate: Rate,
    pub applied: bool,
    pub applied_payment: Option<PaymentId>,
    pub computed_at: DateTime<Utc>,
}

impl Penalty {
    pub fn new(
        installment_id: InstallmentId,
        sale_id: SaleId,
        amount: Money,
        days_late: u32,
        monthly_rate: Rate,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            installment_id,
            sale_id,
            amount,
            days_late,
            monthly_rate,
            applied: false,
            applied_payment: None,
            computed_at,
        }
    }
}

/// idempotency log entry for a gateway event, keyed by external id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub external_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub state: WebhookState,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEventRecord {
    pub fn pending(
        external_id: String,
        event_type: String,
        payload: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            external_id,
            event_type,
            payload,
            state: WebhookState::Pending,
            error_message: None,
            attempts: 0,
            received_at,
            processed_at: None,
        }
    }
}
