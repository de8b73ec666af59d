use chrono::NaiveDate;
use dashmap::DashMap;

use crate::config::PenaltyConfig;
use crate::errors::{LedgerError, Result};
use crate::state::{Installment, Payment, Penalty, Sale, WebhookEventRecord};
use crate::types::{InstallmentId, PaymentId, PenaltyId, SaleId};

/// narrow contract the ledger needs from its record store
///
/// Implementations are expected to keep `installments_for_sale` and
/// `open_penalties_for_sale` ordered (by sequence number and by linked
/// due date respectively) and to apply `replace_schedule` atomically.
pub trait RecordStore: Send + Sync {
    // sales
    fn insert_sale(&self, sale: Sale) -> Result<()>;
    fn sale(&self, id: SaleId) -> Result<Option<Sale>>;
    fn update_sale(&self, sale: Sale) -> Result<()>;

    // installments
    fn insert_installments(&self, rows: Vec<Installment>) -> Result<()>;
    fn installment(&self, id: InstallmentId) -> Result<Option<Installment>>;
    /// every installment of a sale, ordered by sequence number
    fn installments_for_sale(&self, sale_id: SaleId) -> Result<Vec<Installment>>;
    /// not-yet-paid installments of a sale, ordered by sequence number
    fn open_installments_for_sale(&self, sale_id: SaleId) -> Result<Vec<Installment>>;
    /// not-yet-paid installments due strictly before the cutoff date
    fn overdue_candidates(&self, cutoff: NaiveDate) -> Result<Vec<Installment>>;
    fn update_installment(&self, row: Installment) -> Result<()>;
    /// atomically rewrite part of a sale's schedule and drop trailing rows
    fn replace_schedule(
        &self,
        sale_id: SaleId,
        rewritten: Vec<Installment>,
        deleted: Vec<InstallmentId>,
    ) -> Result<()>;

    // payments
    fn insert_payment(&self, payment: Payment) -> Result<()>;
    fn payment(&self, id: PaymentId) -> Result<Option<Payment>>;
    fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>>;
    fn update_payment(&self, payment: Payment) -> Result<()>;

    // penalties
    fn insert_penalty(&self, penalty: Penalty) -> Result<()>;
    fn update_penalty(&self, penalty: Penalty) -> Result<()>;
    fn open_penalty_for_installment(&self, installment_id: InstallmentId)
        -> Result<Option<Penalty>>;
    /// open penalties across a sale, oldest linked due date first
    fn open_penalties_for_sale(&self, sale_id: SaleId) -> Result<Vec<Penalty>>;

    // configuration
    fn penalty_config(&self) -> Result<Option<PenaltyConfig>>;

    // webhook idempotency log
    fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookEventRecord>>;
    fn upsert_webhook_event(&self, record: WebhookEventRecord) -> Result<()>;
    fn failed_webhook_events(&self, limit: usize) -> Result<Vec<WebhookEventRecord>>;
}

const PENALTY_CONFIG_KEY: &str = "default";

/// in-memory record store
///
/// Backs unit tests and embedding hosts that keep the ledger in process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sales: DashMap<SaleId, Sale>,
    installments: DashMap<InstallmentId, Installment>,
    payments: DashMap<PaymentId, Payment>,
    penalties: DashMap<PenaltyId, Penalty>,
    webhook_events: DashMap<String, WebhookEventRecord>,
    penalty_configs: DashMap<String, PenaltyConfig>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// install the process-wide penalty configuration row
    pub fn set_penalty_config(&self, config: PenaltyConfig) {
        self.penalty_configs
            .insert(PENALTY_CONFIG_KEY.to_string(), config);
    }

    fn sorted_by_sequence(&self, mut rows: Vec<Installment>) -> Vec<Installment> {
        rows.sort_by_key(|row| row.sequence_number);
        rows
    }
}

impl RecordStore for MemoryStore {
    fn insert_sale(&self, sale: Sale) -> Result<()> {
        self.sales.insert(sale.id, sale);
        Ok(())
    }

    fn sale(&self, id: SaleId) -> Result<Option<Sale>> {
        Ok(self.sales.get(&id).map(|r| r.clone()))
    }

    fn update_sale(&self, sale: Sale) -> Result<()> {
        if !self.sales.contains_key(&sale.id) {
            return Err(LedgerError::SaleNotFound { id: sale.id });
        }
        self.sales.insert(sale.id, sale);
        Ok(())
    }

    fn insert_installments(&self, rows: Vec<Installment>) -> Result<()> {
        for row in rows {
            self.installments.insert(row.id, row);
        }
        Ok(())
    }

    fn installment(&self, id: InstallmentId) -> Result<Option<Installment>> {
        Ok(self.installments.get(&id).map(|r| r.clone()))
    }

    fn installments_for_sale(&self, sale_id: SaleId) -> Result<Vec<Installment>> {
        let rows = self
            .installments
            .iter()
            .filter(|r| r.sale_id == sale_id)
            .map(|r| r.clone())
            .collect();
        Ok(self.sorted_by_sequence(rows))
    }

    fn open_installments_for_sale(&self, sale_id: SaleId) -> Result<Vec<Installment>> {
        let rows = self
            .installments
            .iter()
            .filter(|r| r.sale_id == sale_id && r.is_open())
            .map(|r| r.clone())
            .collect();
        Ok(self.sorted_by_sequence(rows))
    }

    fn overdue_candidates(&self, cutoff: NaiveDate) -> Result<Vec<Installment>> {
        let mut rows: Vec<Installment> = self
            .installments
            .iter()
            .filter(|r| r.is_open() && r.due_date < cutoff)
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|row| (row.due_date, row.sequence_number));
        Ok(rows)
    }

    fn update_installment(&self, row: Installment) -> Result<()> {
        let open = match self.installments.get(&row.id) {
            None => return Err(LedgerError::InstallmentNotFound { id: row.id }),
            Some(existing) => existing.is_open(),
        };
        if !open {
            return Err(LedgerError::InstallmentImmutable { id: row.id });
        }
        self.installments.insert(row.id, row);
        Ok(())
    }

    fn replace_schedule(
        &self,
        _sale_id: SaleId,
        rewritten: Vec<Installment>,
        deleted: Vec<InstallmentId>,
    ) -> Result<()> {
        for row in &rewritten {
            match self.installments.get(&row.id) {
                None => return Err(LedgerError::InstallmentNotFound { id: row.id }),
                Some(existing) if !existing.is_open() => {
                    return Err(LedgerError::InstallmentImmutable { id: row.id })
                }
                Some(_) => {}
            }
        }
        for row in rewritten {
            self.installments.insert(row.id, row);
        }
        for id in deleted {
            self.installments.remove(&id);
        }
        Ok(())
    }

    fn insert_payment(&self, payment: Payment) -> Result<()> {
        self.payments.insert(payment.id, payment);
        Ok(())
    }

    fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.payments.get(&id).map(|r| r.clone()))
    }

    fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>> {
        Ok(self
            .payments
            .iter()
            .find(|p| p.gateway_intent_id.as_deref() == Some(intent_id))
            .map(|p| p.clone()))
    }

    fn update_payment(&self, payment: Payment) -> Result<()> {
        if !self.payments.contains_key(&payment.id) {
            return Err(LedgerError::PaymentNotFound { id: payment.id });
        }
        self.payments.insert(payment.id, payment);
        Ok(())
    }

    fn insert_penalty(&self, penalty: Penalty) -> Result<()> {
        self.penalties.insert(penalty.id, penalty);
        Ok(())
    }

    fn update_penalty(&self, penalty: Penalty) -> Result<()> {
        self.penalties.insert(penalty.id, penalty);
        Ok(())
    }

    fn open_penalty_for_installment(
        &self,
        installment_id: InstallmentId,
    ) -> Result<Option<Penalty>> {
        Ok(self
            .penalties
            .iter()
            .find(|p| p.installment_id == installment_id && !p.applied)
            .map(|p| p.clone()))
    }

    fn open_penalties_for_sale(&self, sale_id: SaleId) -> Result<Vec<Penalty>> {
        let mut rows: Vec<Penalty> = self
            .penalties
            .iter()
            .filter(|p| p.sale_id == sale_id && !p.applied)
            .map(|p| p.clone())
            .collect();
        rows.sort_by_key(|p| {
            self.installments
                .get(&p.installment_id)
                .map(|i| i.due_date)
                .unwrap_or(NaiveDate::MAX)
        });
        Ok(rows)
    }

    fn penalty_config(&self) -> Result<Option<PenaltyConfig>> {
        Ok(self
            .penalty_configs
            .get(PENALTY_CONFIG_KEY)
            .map(|c| c.clone()))
    }

    fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookEventRecord>> {
        Ok(self.webhook_events.get(external_id).map(|r| r.clone()))
    }

    fn upsert_webhook_event(&self, record: WebhookEventRecord) -> Result<()> {
        self.webhook_events
            .insert(record.external_id.clone(), record);
        Ok(())
    }

    fn failed_webhook_events(&self, limit: usize) -> Result<Vec<WebhookEventRecord>> {
        let mut rows: Vec<WebhookEventRecord> = self
            .webhook_events
            .iter()
            .filter(|r| r.state == crate::types::WebhookState::Failed)
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|r| r.received_at);
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// store wrapper that injects failures for resilience tests
    pub struct FlakyStore {
        pub inner: Arc<MemoryStore>,
        /// fail this many installment updates before recovering
        pub failing_installment_updates: AtomicUsize,
        /// fail this many payment updates before recovering
        pub failing_payment_updates: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                failing_installment_updates: AtomicUsize::new(0),
                failing_payment_updates: AtomicUsize::new(0),
            }
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl RecordStore for FlakyStore {
        fn insert_sale(&self, sale: Sale) -> Result<()> {
            self.inner.insert_sale(sale)
        }

        fn sale(&self, id: SaleId) -> Result<Option<Sale>> {
            self.inner.sale(id)
        }

        fn update_sale(&self, sale: Sale) -> Result<()> {
            self.inner.update_sale(sale)
        }

        fn insert_installments(&self, rows: Vec<Installment>) -> Result<()> {
            self.inner.insert_installments(rows)
        }

        fn installment(&self, id: InstallmentId) -> Result<Option<Installment>> {
            self.inner.installment(id)
        }

        fn installments_for_sale(&self, sale_id: SaleId) -> Result<Vec<Installment>> {
            self.inner.installments_for_sale(sale_id)
        }

        fn open_installments_for_sale(&self, sale_id: SaleId) -> Result<Vec<Installment>> {
            self.inner.open_installments_for_sale(sale_id)
        }

        fn overdue_candidates(&self, cutoff: NaiveDate) -> Result<Vec<Installment>> {
            self.inner.overdue_candidates(cutoff)
        }

        fn update_installment(&self, row: Installment) -> Result<()> {
            if Self::take_failure(&self.failing_installment_updates) {
                return Err(LedgerError::StoreFailure {
                    message: "injected installment write failure".to_string(),
                });
            }
            self.inner.update_installment(row)
        }

        fn replace_schedule(
            &self,
            sale_id: SaleId,
            rewritten: Vec<Installment>,
            deleted: Vec<InstallmentId>,
        ) -> Result<()> {
            self.inner.replace_schedule(sale_id, rewritten, deleted)
        }

        fn insert_payment(&self, payment: Payment) -> Result<()> {
            self.inner.insert_payment(payment)
        }

        fn payment(&self, id: PaymentId) -> Result<Option<Payment>> {
            self.inner.payment(id)
        }

        fn payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>> {
            self.inner.payment_by_intent(intent_id)
        }

        fn update_payment(&self, payment: Payment) -> Result<()> {
            if Self::take_failure(&self.failing_payment_updates) {
                return Err(LedgerError::StoreFailure {
                    message: "injected payment write failure".to_string(),
                });
            }
            self.inner.update_payment(payment)
        }

        fn insert_penalty(&self, penalty: Penalty) -> Result<()> {
            self.inner.insert_penalty(penalty)
        }

        fn update_penalty(&self, penalty: Penalty) -> Result<()> {
            self.inner.update_penalty(penalty)
        }

        fn open_penalty_for_installment(
            &self,
            installment_id: InstallmentId,
        ) -> Result<Option<Penalty>> {
            self.inner.open_penalty_for_installment(installment_id)
        }

        fn open_penalties_for_sale(&self, sale_id: SaleId) -> Result<Vec<Penalty>> {
            self.inner.open_penalties_for_sale(sale_id)
        }

        fn penalty_config(&self) -> Result<Option<PenaltyConfig>> {
            self.inner.penalty_config()
        }

        fn webhook_event(&self, external_id: &str) -> Result<Option<WebhookEventRecord>> {
            self.inner.webhook_event(external_id)
        }

        fn upsert_webhook_event(&self, record: WebhookEventRecord) -> Result<()> {
            self.inner.upsert_webhook_event(record)
        }

        fn failed_webhook_events(&self, limit: usize) -> Result<Vec<WebhookEventRecord>> {
            self.inner.failed_webhook_events(limit)
        }
    }
}
