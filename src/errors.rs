use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{InstallmentStatus, SaleStatus};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid sale terms: {message}")]
    InvalidSaleTerms {
        message: String,
    },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount {
        amount: Money,
    },

    #[error("payment exceeds amount due: due {due}, provided {provided}")]
    PaymentExceedsDue {
        due: Money,
        provided: Money,
    },

    #[error("sale not found: {id}")]
    SaleNotFound {
        id: Uuid,
    },

    #[error("sale not active: current status is {status:?}")]
    SaleNotActive {
        status: SaleStatus,
    },

    #[error("installment not found: {id}")]
    InstallmentNotFound {
        id: Uuid,
    },

    #[error("sale {sale_id} has no installment #{sequence_number}")]
    InstallmentSequenceNotFound {
        sale_id: Uuid,
        sequence_number: u32,
    },

    #[error("installment is paid and immutable: {id}")]
    InstallmentImmutable {
        id: Uuid,
    },

    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidStatusTransition {
        from: InstallmentStatus,
        to: InstallmentStatus,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: Uuid,
    },

    #[error("no unpaid installments for sale {sale_id}")]
    NoUnpaidInstallments {
        sale_id: Uuid,
    },

    #[error("invalid date: {message}")]
    InvalidDate {
        message: String,
    },

    #[error("store failure: {message}")]
    StoreFailure {
        message: String,
    },

    #[error("gateway failure: {message}")]
    GatewayFailure {
        message: String,
    },

    #[error("webhook signature verification failed: {message}")]
    SignatureVerification {
        message: String,
    },

    #[error("webhook event {event_id} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        event_id: String,
        attempts: u32,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
