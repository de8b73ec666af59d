use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::Result;
use crate::types::SaleId;

/// charge intent handed back by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// metadata attached to a charge intent so the webhook can find its way back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    pub sale_id: SaleId,
    pub sequence_number: Option<u32>,
    pub customer: Option<String>,
}

/// typed gateway event, already verified and parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayEvent {
    PaymentSucceeded {
        event_id: String,
        intent_id: String,
        card_last4: Option<String>,
    },
    PaymentFailed {
        event_id: String,
        intent_id: String,
        message: String,
    },
    /// event types the ledger does not act on
    Unknown {
        event_id: String,
        event_type: String,
    },
}

impl GatewayEvent {
    pub fn event_id(&self) -> &str {
        match self {
            GatewayEvent::PaymentSucceeded { event_id, .. } => event_id,
            GatewayEvent::PaymentFailed { event_id, .. } => event_id,
            GatewayEvent::Unknown { event_id, .. } => event_id,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            GatewayEvent::PaymentSucceeded { .. } => "payment_intent.succeeded",
            GatewayEvent::PaymentFailed { .. } => "payment_intent.payment_failed",
            GatewayEvent::Unknown { event_type, .. } => event_type,
        }
    }
}

/// narrow contract the ledger needs from the card processor
///
/// The SDK, its transport, and its signature scheme live behind this trait;
/// `verify_and_parse` must reject before returning when a secret is
/// configured and the signature does not check out.
pub trait PaymentGateway: Send + Sync {
    fn create_intent(
        &self,
        amount: Money,
        currency: &str,
        metadata: &ChargeMetadata,
    ) -> Result<ChargeIntent>;

    fn verify_and_parse(&self, payload: &[u8], signature: Option<&str>) -> Result<GatewayEvent>;
}
