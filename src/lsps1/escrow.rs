use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};

use crate::lightning::node::{HoldInvoice, InvoiceUpdate, NodeClient};

/// Outcome of waiting for an escrow payment to be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldWait {
    /// Payment arrived and is locked, awaiting settle/cancel.
    Held,
    /// The invoice was canceled (e.g. it expired) before a payment held.
    Canceled,
    /// No hold was observed within the wait window. The subscription is torn
    /// down; the caller decides what happens to the escrow.
    TimedOut,
}

/// Creates and resolves the hold invoices that escrow order payments. The LSP
/// only reveals the preimage (settle) once the channel has been delivered.
#[derive(Clone)]
pub struct EscrowManager {
    node: Arc<dyn NodeClient>,
}

impl EscrowManager {
    pub fn new(node: Arc<dyn NodeClient>) -> Self {
        Self { node }
    }

    /// Creates the hold invoice escrowing `amount_sat` for an order.
    pub async fn open(
        &self,
        order_id: &str,
        amount_sat: u64,
        expiry_secs: u32,
    ) -> Result<HoldInvoice> {
        self.node
            .create_hold_invoice(amount_sat, format!("channel order {order_id}"), expiry_secs)
            .await
            .context("create hold invoice")
    }

    /// Watches the invoice until a payment is held, the invoice is canceled,
    /// or `timeout` elapses. Dropping out of this function tears down the
    /// invoice subscription; a later hold would need a fresh wait.
    pub async fn await_hold(&self, payment_hash: &str, timeout: Duration) -> Result<HoldWait> {
        let mut updates = self
            .node
            .subscribe_invoice(payment_hash)
            .await
            .context("subscribe to invoice")?;

        let wait = async {
            loop {
                match updates.recv().await {
                    Some(InvoiceUpdate::Held) => return HoldWait::Held,
                    Some(InvoiceUpdate::Canceled) => return HoldWait::Canceled,
                    // A settle is only ever initiated by us, after a hold.
                    Some(InvoiceUpdate::Settled) => {}
                    // Feed ended without a hold: treat as canceled.
                    None => return HoldWait::Canceled,
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => Ok(HoldWait::TimedOut),
        }
    }

    /// Captures the held funds. Terminal: the invoice cannot be held again.
    pub async fn settle(&self, secret: &str) -> Result<()> {
        self.node
            .settle_hold_invoice(secret)
            .await
            .context("settle hold invoice")
    }

    /// Returns the held funds to the payer. Terminal.
    pub async fn cancel(&self, payment_hash: &str) -> Result<()> {
        self.node
            .cancel_hold_invoice(payment_hash)
            .await
            .context("cancel hold invoice")
    }
}
