use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use ln_channel_broker::lightning::node::{
    ChannelOpen, GraphUpdate, HoldInvoice, InvoiceSnapshot, InvoiceUpdate, NodeClient, PeerMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvoiceState {
    Open,
    Held,
    Settled,
    Canceled,
}

struct InvoiceEntry {
    amount_sat: u64,
    secret: String,
    state: InvoiceState,
    subscribers: Vec<mpsc::Sender<InvoiceUpdate>>,
}

struct Inner {
    peer_tx: mpsc::Sender<PeerMessage>,
    peer_rx: Option<mpsc::Receiver<PeerMessage>>,
    graph_tx: mpsc::Sender<GraphUpdate>,
    graph_rx: Option<mpsc::Receiver<GraphUpdate>>,
    sent: Vec<PeerMessage>,
    invoices: HashMap<String, InvoiceEntry>,
    next_invoice: u64,
    accept_opens: bool,
    fail_open: bool,
    chain_fee_rate: f64,
    advertised: Vec<u32>,
    /// Node-runtime calls with side effects, in invocation order.
    events: Vec<&'static str>,
}

/// An in-process stand-in for the node runtime. Tests inject inbound peer
/// messages, flip invoices to held, and script open-channel behavior.
pub struct FakeNode {
    inner: Mutex<Inner>,
}

impl FakeNode {
    pub fn new() -> Self {
        let (peer_tx, peer_rx) = mpsc::channel(64);
        let (graph_tx, graph_rx) = mpsc::channel(64);
        Self {
            inner: Mutex::new(Inner {
                peer_tx,
                peer_rx: Some(peer_rx),
                graph_tx,
                graph_rx: Some(graph_rx),
                sent: Vec::new(),
                invoices: HashMap::new(),
                next_invoice: 1,
                accept_opens: true,
                fail_open: false,
                chain_fee_rate: 10.0,
                advertised: Vec::new(),
                events: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake node mutex poisoned")
    }

    pub async fn inject_peer_message(&self, peer: &str, message_type: u32, payload: String) {
        let tx = self.lock().peer_tx.clone();
        tx.send(PeerMessage {
            peer_pubkey: peer.to_string(),
            message_type,
            payload,
        })
        .await
        .expect("peer feed closed");
    }

    pub async fn send_graph_update(&self) {
        let tx = self.lock().graph_tx.clone();
        tx.send(GraphUpdate).await.expect("graph feed closed");
    }

    pub fn sent_messages(&self) -> Vec<PeerMessage> {
        self.lock().sent.clone()
    }

    pub fn advertised_features(&self) -> Vec<u32> {
        self.lock().advertised.clone()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.lock().events.clone()
    }

    pub fn invoice_count(&self) -> usize {
        self.lock().invoices.len()
    }

    /// Payment hash and amount of the only invoice created so far.
    pub fn single_invoice(&self) -> Result<(String, u64)> {
        let inner = self.lock();
        anyhow::ensure!(inner.invoices.len() == 1, "expected exactly one invoice");
        let (hash, entry) = inner.invoices.iter().next().context("no invoice")?;
        Ok((hash.clone(), entry.amount_sat))
    }

    /// Marks an invoice's payment as arrived and held.
    pub fn hold_payment(&self, payment_hash: &str) {
        let mut inner = self.lock();
        let entry = inner
            .invoices
            .get_mut(payment_hash)
            .expect("unknown invoice");
        entry.state = InvoiceState::Held;
        for tx in &entry.subscribers {
            let _ = tx.try_send(InvoiceUpdate::Held);
        }
    }

    pub fn invoice_canceled(&self, payment_hash: &str) -> bool {
        self.lock()
            .invoices
            .get(payment_hash)
            .is_some_and(|e| e.state == InvoiceState::Canceled)
    }

    pub fn set_accept_opens(&self, accept: bool) {
        self.lock().accept_opens = accept;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn send_custom_message(
        &self,
        peer_pubkey: &str,
        message_type: u32,
        payload_hex: &str,
    ) -> Result<()> {
        self.lock().sent.push(PeerMessage {
            peer_pubkey: peer_pubkey.to_string(),
            message_type,
            payload: payload_hex.to_string(),
        });
        Ok(())
    }

    async fn subscribe_peer_messages(&self) -> Result<mpsc::Receiver<PeerMessage>> {
        self.lock()
            .peer_rx
            .take()
            .context("peer messages already subscribed")
    }

    async fn subscribe_graph(&self) -> Result<mpsc::Receiver<GraphUpdate>> {
        self.lock()
            .graph_rx
            .take()
            .context("graph already subscribed")
    }

    async fn create_hold_invoice(
        &self,
        amount_sat: u64,
        _description: String,
        _expiry_secs: u32,
    ) -> Result<HoldInvoice> {
        let mut inner = self.lock();
        let n = inner.next_invoice;
        inner.next_invoice += 1;

        let payment_hash = format!("{n:064x}");
        let secret = format!("{:064x}", n + 0xffff);
        let invoice = format!("lnbcrt{amount_sat}n1fake{n}");
        inner.invoices.insert(
            payment_hash.clone(),
            InvoiceEntry {
                amount_sat,
                secret: secret.clone(),
                state: InvoiceState::Open,
                subscribers: Vec::new(),
            },
        );
        Ok(HoldInvoice {
            payment_hash,
            invoice,
            secret,
        })
    }

    async fn subscribe_invoice(
        &self,
        payment_hash: &str,
    ) -> Result<mpsc::Receiver<InvoiceUpdate>> {
        let mut inner = self.lock();
        let entry = inner
            .invoices
            .get_mut(payment_hash)
            .context("unknown invoice")?;
        let (tx, rx) = mpsc::channel(8);
        // Late subscribers still observe an already-held payment.
        match entry.state {
            InvoiceState::Held => {
                let _ = tx.try_send(InvoiceUpdate::Held);
            }
            InvoiceState::Canceled => {
                let _ = tx.try_send(InvoiceUpdate::Canceled);
            }
            InvoiceState::Settled => {
                let _ = tx.try_send(InvoiceUpdate::Settled);
            }
            InvoiceState::Open => {}
        }
        entry.subscribers.push(tx);
        Ok(rx)
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceSnapshot> {
        let inner = self.lock();
        let entry = inner.invoices.get(payment_hash).context("unknown invoice")?;
        Ok(InvoiceSnapshot {
            received_sat: match entry.state {
                InvoiceState::Held | InvoiceState::Settled => entry.amount_sat,
                _ => 0,
            },
            settled: entry.state == InvoiceState::Settled,
        })
    }

    async fn settle_hold_invoice(&self, secret: &str) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner
            .invoices
            .values_mut()
            .find(|e| e.secret == secret)
            .context("no invoice for secret")?;
        anyhow::ensure!(
            entry.state == InvoiceState::Held,
            "settle on a non-held invoice"
        );
        entry.state = InvoiceState::Settled;
        for tx in &entry.subscribers {
            let _ = tx.try_send(InvoiceUpdate::Settled);
        }
        inner.events.push("settle");
        Ok(())
    }

    async fn cancel_hold_invoice(&self, payment_hash: &str) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner
            .invoices
            .get_mut(payment_hash)
            .context("unknown invoice")?;
        anyhow::ensure!(
            entry.state != InvoiceState::Settled,
            "cancel on a settled invoice"
        );
        entry.state = InvoiceState::Canceled;
        for tx in &entry.subscribers {
            let _ = tx.try_send(InvoiceUpdate::Canceled);
        }
        inner.events.push("cancel");
        Ok(())
    }

    async fn would_accept_channel_open(
        &self,
        _capacity_sat: u64,
        _is_private: bool,
        _partner_pubkey: &str,
    ) -> Result<bool> {
        Ok(self.lock().accept_opens)
    }

    async fn open_channel(
        &self,
        _capacity_sat: u64,
        _is_private: bool,
        _partner_pubkey: &str,
        _fee_rate_sat_per_vbyte: f64,
    ) -> Result<ChannelOpen> {
        let mut inner = self.lock();
        if inner.fail_open {
            anyhow::bail!("simulated open failure");
        }
        inner.events.push("open");
        Ok(ChannelOpen {
            funding_outpoint: format!("{}:1", "ab".repeat(32)),
        })
    }

    async fn chain_fee_rate(&self, _confirmation_target: u32) -> Result<f64> {
        Ok(self.lock().chain_fee_rate)
    }

    async fn node_alias(&self, _pubkey: &str) -> Result<String> {
        Ok("client-alias".to_string())
    }

    async fn advertise_feature(&self, bit: u32) -> Result<()> {
        let mut inner = self.lock();
        if !inner.advertised.contains(&bit) {
            inner.advertised.push(bit);
        }
        Ok(())
    }
}
