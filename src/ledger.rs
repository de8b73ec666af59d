use dashmap::DashMap;
use hourglass_rs::SafeTimeProvider;
use std::sync::Arc;
use tracing::info;

use crate::config::ReconcilerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::gateway::{ChargeIntent, ChargeMetadata, PaymentGateway};
use crate::payments::{
    AllocationOutcome, CapitalReamortizer, PaymentAllocator, PaymentInput, ReamortizationResult,
    ScheduleGenerator,
};
use crate::penalty::{AccrualSummary, PenaltyAccrualEngine};
use crate::state::{Installment, Payment, Sale};
use crate::store::RecordStore;
use crate::types::{PaymentMethod, PaymentStatus, ReamortizationStrategy, SaleId};
use crate::webhook::WebhookReconciler;

/// per-sale write serialization
///
/// Holding a sale's entry pins the waterfall's ordering invariants: no two
/// ledger mutations for the same sale run concurrently. Explicit component
/// rather than ambient global state; drops with the ledger.
struct SaleLocks {
    inner: DashMap<SaleId, ()>,
}

type SaleGuard<'a> = dashmap::mapref::one::RefMut<'a, SaleId, ()>;

impl SaleLocks {
    fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    fn guard(&self, sale_id: SaleId) -> SaleGuard<'_> {
        self.inner.entry(sale_id).or_default()
    }
}

/// facade over the ledger engines
///
/// Owns the store and gateway handles and serializes sale-scoped mutations.
pub struct InstallmentLedger {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn PaymentGateway>,
    reconciler_config: ReconcilerConfig,
    locks: SaleLocks,
}

impl InstallmentLedger {
    pub fn new(store: Arc<dyn RecordStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            store,
            gateway,
            reconciler_config: ReconcilerConfig::default(),
            locks: SaleLocks::new(),
        }
    }

    pub fn with_reconciler_config(mut self, config: ReconcilerConfig) -> Self {
        self.reconciler_config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// register a sale and emit its amortization schedule
    pub fn create_sale(
        &self,
        sale: Sale,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Vec<Installment>> {
        // validate terms before anything is written
        let rows = ScheduleGenerator::build(&sale)?;

        let _guard = self.locks.guard(sale.id);
        self.store.insert_sale(sale.clone())?;
        ScheduleGenerator::persist(&sale, rows, self.store.as_ref(), events, time_provider.now())
    }

    /// record an incoming payment and apply it to the ledger
    ///
    /// Manual payments settle on receipt; card payments enter through
    /// `request_card_charge` and settle via the webhook reconciler.
    pub fn record_payment(
        &self,
        input: PaymentInput,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<AllocationOutcome> {
        input.validate()?;

        let sale = self
            .store
            .sale(input.sale_id)?
            .ok_or(LedgerError::SaleNotFound { id: input.sale_id })?;
        if !sale.status.is_open() {
            return Err(LedgerError::SaleNotActive {
                status: sale.status,
            });
        }

        let _guard = self.locks.guard(sale.id);
        let now = time_provider.now();

        let mut payment = Payment::new(input.sale_id, input.amount, now, input.note.clone());
        payment.kind = input.kind;
        payment.method = input.method;
        payment.status = PaymentStatus::Paid;
        payment.paid_date = Some(now);
        self.store.insert_payment(payment.clone())?;

        info!(
            payment_id = %payment.id,
            sale_id = %sale.id,
            amount = %payment.amount,
            "payment recorded"
        );
        events.emit(Event::PaymentRecorded {
            payment_id: payment.id,
            sale_id: sale.id,
            amount: payment.amount,
            timestamp: now,
        });

        PaymentAllocator::new(self.store.clone()).allocate(payment, now, events)
    }

    /// run the penalty accrual batch
    pub fn accrue_penalties(
        &self,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<AccrualSummary> {
        PenaltyAccrualEngine::new(self.store.clone()).run(time_provider, events)
    }

    /// apply a lump-sum principal paydown outside of a payment record
    pub fn apply_capital_paydown(
        &self,
        sale_id: SaleId,
        amount: Money,
        strategy: ReamortizationStrategy,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<ReamortizationResult> {
        let _guard = self.locks.guard(sale_id);
        CapitalReamortizer::new(self.store.clone()).apply(
            sale_id,
            amount,
            strategy,
            time_provider.now(),
            events,
        )
    }

    /// open a gateway charge intent and the pending payment row behind it
    pub fn request_card_charge(
        &self,
        sale_id: SaleId,
        sequence_number: Option<u32>,
        amount: Money,
        currency: &str,
        customer: Option<String>,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<(Payment, ChargeIntent)> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount { amount });
        }

        let sale = self
            .store
            .sale(sale_id)?
            .ok_or(LedgerError::SaleNotFound { id: sale_id })?;
        if !sale.status.is_open() {
            return Err(LedgerError::SaleNotActive {
                status: sale.status,
            });
        }

        // charging a specific installment must not exceed what it still owes
        if let Some(sequence) = sequence_number {
            let rows = self.store.installments_for_sale(sale_id)?;
            let row = rows
                .iter()
                .find(|r| r.sequence_number == sequence)
                .ok_or(LedgerError::InstallmentSequenceNotFound {
                    sale_id,
                    sequence_number: sequence,
                })?;

            let due = row.remaining_due() + row.accrued_penalty;
            if amount > due {
                return Err(LedgerError::PaymentExceedsDue {
                    due,
                    provided: amount,
                });
            }
        }

        let metadata = ChargeMetadata {
            sale_id,
            sequence_number,
            customer,
        };
        let intent = self.gateway.create_intent(amount, currency, &metadata)?;

        let now = time_provider.now();
        let mut payment = Payment::new(
            sale_id,
            amount,
            now,
            format!("card charge for lot {}", sale.lot),
        );
        payment.method = Some(PaymentMethod::Card);
        payment.gateway_intent_id = Some(intent.intent_id.clone());
        self.store.insert_payment(payment.clone())?;

        info!(
            payment_id = %payment.id,
            sale_id = %sale_id,
            intent_id = %intent.intent_id,
            "card charge intent created"
        );
        events.emit(Event::PaymentRecorded {
            payment_id: payment.id,
            sale_id,
            amount,
            timestamp: now,
        });

        Ok((payment, intent))
    }

    /// webhook reconciler over the same collaborators
    pub fn reconciler(&self) -> WebhookReconciler {
        WebhookReconciler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.reconciler_config.clone(),
        )
    }
}
