use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ReconcilerConfig;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::gateway::{GatewayEvent, PaymentGateway};
use crate::state::WebhookEventRecord;
use crate::store::RecordStore;
use crate::types::{PaymentMethod, PaymentStatus, WebhookState};

/// how a gateway event was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// effects applied and the log marked processed
    Processed,
    /// external id already processed; nothing re-applied
    Replayed,
    /// unrecognized event type, logged and treated as handled
    IgnoredUnknown,
}

/// outcome of one manual redrive sweep over failed records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RedriveSummary {
    pub scanned: usize,
    pub processed: usize,
    pub failed: usize,
}

/// maps verified gateway events onto the ledger, idempotently
///
/// Per external event id: unseen -> pending -> processed | failed. Replays
/// of a processed id succeed without side effects; failures are retried on
/// a background task with bounded, increasing delays and can be re-driven
/// manually afterwards.
pub struct WebhookReconciler {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: ReconcilerConfig,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// verify, log, and dispatch a raw payload once
    ///
    /// Signature rejection happens before any state mutation. A dispatch
    /// error leaves a failed log entry and propagates so the caller can
    /// signal the gateway to redeliver.
    pub fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<WebhookOutcome> {
        let event = self.gateway.verify_and_parse(payload, signature)?;
        self.process(&event, time_provider.now(), events)
    }

    /// verify once, then dispatch through the retry ladder
    ///
    /// Meant for a background task: the inbound webhook response must not
    /// wait on these sleeps.
    pub async fn handle_with_retry(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<WebhookOutcome> {
        let event = self.gateway.verify_and_parse(payload, signature)?;

        let mut last_error = match self.process(&event, time_provider.now(), events) {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };

        for (attempt, delay) in self.config.retry_delays.iter().enumerate() {
            tokio::time::sleep(*delay).await;
            warn!(
                external_id = event.event_id(),
                attempt = attempt + 2,
                "retrying webhook dispatch"
            );

            match self.process(&event, time_provider.now(), events) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => last_error = e,
            }
        }

        Err(LedgerError::RetriesExhausted {
            event_id: event.event_id().to_string(),
            attempts: self.config.max_attempts(),
            message: last_error.to_string(),
        })
    }

    /// re-run all failed log entries, in batches
    pub fn redrive_failed(
        &self,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<RedriveSummary> {
        let failed = self
            .store
            .failed_webhook_events(self.config.redrive_batch_size)?;

        let mut summary = RedriveSummary {
            scanned: failed.len(),
            ..RedriveSummary::default()
        };

        for record in failed {
            let event: GatewayEvent = match serde_json::from_value(record.payload.clone()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        external_id = %record.external_id,
                        error = %e,
                        "failed webhook record has unparseable payload, skipping"
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            match self.process(&event, time_provider.now(), events) {
                Ok(_) => summary.processed += 1,
                Err(e) => {
                    warn!(
                        external_id = %record.external_id,
                        error = %e,
                        "redrive attempt failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            scanned = summary.scanned,
            processed = summary.processed,
            failed = summary.failed,
            "webhook redrive sweep finished"
        );
        Ok(summary)
    }

    /// one attempt: idempotency check, pending log, dispatch, final state
    fn process(
        &self,
        event: &GatewayEvent,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<WebhookOutcome> {
        let external_id = event.event_id();

        // at-least-once delivery: replays of processed ids are safe no-ops
        let existing = self.store.webhook_event(external_id)?;
        if let Some(record) = &existing {
            if record.state == WebhookState::Processed {
                info!(external_id, "gateway event already processed, skipping");
                return Ok(WebhookOutcome::Replayed);
            }
        }

        // pending entry first, so a crash mid-dispatch leaves a trail
        let mut record = existing.unwrap_or_else(|| {
            WebhookEventRecord::pending(
                external_id.to_string(),
                event.event_type().to_string(),
                serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
                now,
            )
        });
        record.state = WebhookState::Pending;
        record.attempts += 1;
        self.store.upsert_webhook_event(record.clone())?;

        match self.dispatch(event, now, events) {
            Ok(outcome) => {
                record.state = WebhookState::Processed;
                record.error_message = None;
                record.processed_at = Some(now);
                self.store.upsert_webhook_event(record)?;

                events.emit(Event::WebhookProcessed {
                    external_id: external_id.to_string(),
                    event_type: event.event_type().to_string(),
                    timestamp: now,
                });
                Ok(outcome)
            }
            Err(e) => {
                record.state = WebhookState::Failed;
                record.error_message = Some(e.to_string());
                self.store.upsert_webhook_event(record.clone())?;

                events.emit(Event::WebhookFailed {
                    external_id: external_id.to_string(),
                    attempts: record.attempts,
                    error: e.to_string(),
                    timestamp: now,
                });
                Err(e)
            }
        }
    }

    fn dispatch(
        &self,
        event: &GatewayEvent,
        now: DateTime<Utc>,
        events: &mut EventStore,
    ) -> Result<WebhookOutcome> {
        match event {
            GatewayEvent::PaymentSucceeded {
                intent_id,
                card_last4,
                ..
            } => {
                let Some(mut payment) = self.store.payment_by_intent(intent_id)? else {
                    warn!(%intent_id, "charge succeeded but no local payment matches");
                    return Ok(WebhookOutcome::Processed);
                };

                // the payment's own guard against double credit
                if payment.is_paid() {
                    info!(payment_id = %payment.id, "payment already settled, skipping");
                    return Ok(WebhookOutcome::Processed);
                }

                payment.status = PaymentStatus::Paid;
                payment.paid_date = Some(now);
                payment.method = Some(PaymentMethod::Card);
                payment.card_last4 = card_last4.clone();
                let payment_id = payment.id;
                self.store.update_payment(payment)?;

                info!(payment_id = %payment_id, %intent_id, "payment confirmed by gateway");
                events.emit(Event::PaymentConfirmed {
                    payment_id,
                    gateway_intent_id: intent_id.clone(),
                    timestamp: now,
                });
                Ok(WebhookOutcome::Processed)
            }
            GatewayEvent::PaymentFailed {
                intent_id, message, ..
            } => {
                if let Some(mut payment) = self.store.payment_by_intent(intent_id)? {
                    payment.append_note(&format!("payment attempt failed: {message}"));
                    self.store.update_payment(payment)?;
                }
                Ok(WebhookOutcome::Processed)
            }
            GatewayEvent::Unknown { event_type, .. } => {
                info!(%event_type, "unhandled gateway event type");
                Ok(WebhookOutcome::IgnoredUnknown)
            }
        }
    }
}
