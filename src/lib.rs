pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod payments;
pub mod penalty;
pub mod state;
pub mod store;
pub mod types;
pub mod webhook;

// re-export key types
pub use config::{PenaltyConfig, ReconcilerConfig};
pub use decimal::{Money, Rate};
pub use errors::{LedgerError, Result};
pub use events::{Event, EventStore};
pub use gateway::{ChargeIntent, ChargeMetadata, GatewayEvent, PaymentGateway};
pub use ledger::InstallmentLedger;
pub use payments::{
    AllocationOutcome, CapitalReamortizer, PaymentAllocator, PaymentInput,
    ReamortizationResult, ScheduleGenerator,
};
pub use penalty::{AccrualSummary, PenaltyAccrualEngine};
pub use state::{Installment, Payment, Penalty, Sale, WebhookEventRecord};
pub use store::{MemoryStore, RecordStore};
pub use types::{
    AllocationBreakdown, InstallmentApplication, InstallmentId, InstallmentStatus, PaymentId,
    PaymentKind, PaymentMethod, PaymentStatus, PenaltyId, ReamortizationStrategy, SaleId,
    SaleStatus, WebhookState,
};
pub use webhook::{RedriveSummary, WebhookOutcome, WebhookReconciler};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
