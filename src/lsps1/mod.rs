pub mod escrow;
pub mod fees;
pub mod fulfill;
pub mod service;
pub mod store;
pub mod validate;
pub mod wire;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// LSP policy and engine timing knobs. Read-only at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspPolicy {
    pub min_channel_capacity_sat: u64,
    pub max_channel_capacity_sat: u64,
    pub min_onchain_payment_sat: u64,
    pub min_onchain_confirmations: u32,
    pub max_channel_expiry_blocks: u32,
    pub min_channel_confirmations: u32,
    pub base_fee_sat: u64,
    pub fee_rate_ppm: u64,
    pub private_fee_rate_ppm: u64,
    pub website: String,

    /// How long a created order (quote) stays valid.
    pub order_expiry_secs: u64,
    /// Expiry of the escrow hold invoice.
    pub invoice_expiry_secs: u32,
    /// How long the engine waits for a payment to become held.
    pub hold_wait_secs: u64,
    /// Graph-feed silence after which the server loop gives up.
    pub watchdog_secs: u64,
}

impl Default for LspPolicy {
    fn default() -> Self {
        Self {
            min_channel_capacity_sat: 1_000_000,
            max_channel_capacity_sat: 10_000_000,
            min_onchain_payment_sat: 1_000_000,
            min_onchain_confirmations: 1,
            max_channel_expiry_blocks: 52_560,
            min_channel_confirmations: 1,
            base_fee_sat: 500,
            fee_rate_ppm: 1_000,
            private_fee_rate_ppm: 2_000,
            website: String::new(),
            order_expiry_secs: 3_600,
            invoice_expiry_secs: 3_600,
            hold_wait_secs: 3_600,
            watchdog_secs: 1_800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Created,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    ExpectPayment,
    HeldPayment,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub state: PaymentState,
    pub fee_total_sat: u64,
    /// BOLT11 text of the escrow hold invoice.
    pub invoice: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Funding outpoint as `txid:vout`.
    pub funding_outpoint: String,
    pub funded_at: DateTime<Utc>,
    /// Earliest datetime the LSP may close the leased channel.
    pub expires_at: DateTime<Utc>,
}

/// A single channel-purchase negotiation and its lifecycle state.
///
/// Orders are immutable values: every state change goes through
/// [`Order::apply`], and the result replaces the stored record wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub client_pubkey: String,
    pub lsp_balance_sat: u64,
    pub client_balance_sat: u64,
    pub funding_confirms_within_blocks: u32,
    pub channel_expiry_blocks: u32,
    pub announce_channel: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub order_state: OrderState,
    pub payment: PaymentInfo,
    pub channel: Option<ChannelInfo>,
}

/// Events that advance an order's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    /// The escrow payment arrived and is being held.
    PaymentHeld,
    /// The channel was opened and the escrow settled.
    Delivered(ChannelInfo),
    /// The escrow was returned to the payer.
    Refunded,
}

impl Order {
    pub fn new(
        order_id: String,
        client_pubkey: String,
        request: &validate::OrderRequest,
        fee_total_sat: u64,
        invoice: String,
        order_expiry_secs: u64,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            order_id,
            client_pubkey,
            lsp_balance_sat: request.lsp_balance_sat,
            client_balance_sat: request.client_balance_sat,
            funding_confirms_within_blocks: request.funding_confirms_within_blocks,
            channel_expiry_blocks: request.channel_expiry_blocks,
            announce_channel: request.announce_channel,
            created_at,
            expires_at: created_at + Duration::seconds(order_expiry_secs as i64),
            order_state: OrderState::Created,
            payment: PaymentInfo {
                state: PaymentState::ExpectPayment,
                fee_total_sat,
                invoice,
            },
            channel: None,
        }
    }

    pub fn capacity_sat(&self) -> u64 {
        self.lsp_balance_sat + self.client_balance_sat
    }

    pub fn is_private(&self) -> bool {
        !self.announce_channel
    }

    /// Pure state transition. `Completed` and `Failed` are terminal and
    /// absorb every further event.
    pub fn apply(self, event: OrderEvent) -> Order {
        if self.order_state != OrderState::Created {
            return self;
        }
        let mut order = self;
        match event {
            OrderEvent::PaymentHeld => {
                order.payment.state = PaymentState::HeldPayment;
            }
            OrderEvent::Delivered(channel) => {
                order.order_state = OrderState::Completed;
                order.payment.state = PaymentState::Paid;
                order.channel = Some(channel);
            }
            OrderEvent::Refunded => {
                order.order_state = OrderState::Failed;
                order.payment.state = PaymentState::Refunded;
            }
        }
        order
    }
}
