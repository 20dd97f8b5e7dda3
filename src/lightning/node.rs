use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A custom message received from a peer over the node's peer-messaging
/// transport. The payload arrives hex-encoded, as the node delivers it.
#[derive(Debug, Clone)]
pub struct PeerMessage {
    pub peer_pubkey: String,
    pub message_type: u32,
    pub payload: String,
}

/// A network-graph update. The content is irrelevant to the broker; updates
/// only feed the connectivity watchdog.
#[derive(Debug, Clone)]
pub struct GraphUpdate;

/// A hold invoice as returned by the node: settlement is deferred until
/// [`NodeClient::settle_hold_invoice`] or [`NodeClient::cancel_hold_invoice`]
/// is called.
#[derive(Debug, Clone)]
pub struct HoldInvoice {
    /// Payment hash, hex-encoded. Identifies the invoice.
    pub payment_hash: String,
    /// BOLT11 payment request text.
    pub invoice: String,
    /// Preimage, hex-encoded. Revealing it via settle captures the funds.
    pub secret: String,
}

/// State transitions emitted by an invoice subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceUpdate {
    /// Payment arrived and is locked, awaiting a settle/cancel decision.
    Held,
    Settled,
    Canceled,
}

/// A point-in-time view of an invoice, used to confirm the amount actually
/// received after settlement.
#[derive(Debug, Clone)]
pub struct InvoiceSnapshot {
    pub received_sat: u64,
    pub settled: bool,
}

#[derive(Debug, Clone)]
pub struct ChannelOpen {
    /// Funding outpoint as `txid:vout`.
    pub funding_outpoint: String,
}

/// The node runtime the broker is layered on. Implementations wrap the
/// control API of an actual Lightning node; tests substitute a fake.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn send_custom_message(
        &self,
        peer_pubkey: &str,
        message_type: u32,
        payload_hex: &str,
    ) -> Result<()>;

    async fn subscribe_peer_messages(&self) -> Result<mpsc::Receiver<PeerMessage>>;

    async fn subscribe_graph(&self) -> Result<mpsc::Receiver<GraphUpdate>>;

    async fn create_hold_invoice(
        &self,
        amount_sat: u64,
        description: String,
        expiry_secs: u32,
    ) -> Result<HoldInvoice>;

    /// Subscribes to an invoice's state transitions. Dropping the receiver
    /// tears the subscription down.
    async fn subscribe_invoice(&self, payment_hash: &str)
    -> Result<mpsc::Receiver<InvoiceUpdate>>;

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceSnapshot>;

    async fn settle_hold_invoice(&self, secret: &str) -> Result<()>;

    async fn cancel_hold_invoice(&self, payment_hash: &str) -> Result<()>;

    /// Dry-run feasibility check: would an open of this shape currently be
    /// accepted, without committing any funds.
    async fn would_accept_channel_open(
        &self,
        capacity_sat: u64,
        is_private: bool,
        partner_pubkey: &str,
    ) -> Result<bool>;

    async fn open_channel(
        &self,
        capacity_sat: u64,
        is_private: bool,
        partner_pubkey: &str,
        fee_rate_sat_per_vbyte: f64,
    ) -> Result<ChannelOpen>;

    /// Chain fee-rate estimate in sat/vbyte for the given confirmation target.
    async fn chain_fee_rate(&self, confirmation_target: u32) -> Result<f64>;

    async fn node_alias(&self, pubkey: &str) -> Result<String>;

    /// Advertises a feature bit in the node announcement. Idempotent: a bit
    /// already advertised is left as is.
    async fn advertise_feature(&self, bit: u32) -> Result<()>;
}
