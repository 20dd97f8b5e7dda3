use std::str::FromStr as _;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bitcoin::OutPoint;
use chrono::{Duration, Utc};

use crate::lightning::node::{HoldInvoice, NodeClient};
use crate::lsps1::escrow::EscrowManager;
use crate::lsps1::store::SharedOrderStore;
use crate::lsps1::{ChannelInfo, Order, OrderEvent};

/// Average block interval used to turn a lease in blocks into a lease window.
const SECONDS_PER_BLOCK: i64 = 600;

/// Drives an order from a held payment to its terminal state.
///
/// The open attempt always precedes settlement: funds are only captured for a
/// channel that was actually delivered. A failed or infeasible open refunds
/// the escrow and marks the order failed; nothing is retried.
pub async fn fulfill_order(
    node: &Arc<dyn NodeClient>,
    escrow: &EscrowManager,
    store: &SharedOrderStore,
    order: Order,
    invoice: &HoldInvoice,
) -> Result<Order> {
    let order = order.apply(OrderEvent::PaymentHeld);
    put_order(store, &order)?;
    tracing::info!(order_id = %order.order_id, "escrow payment held");

    let open = attempt_open(node, &order).await;

    match open {
        None => {
            escrow.cancel(&invoice.payment_hash).await?;
            let order = order.apply(OrderEvent::Refunded);
            put_order(store, &order)?;
            tracing::info!(order_id = %order.order_id, "order failed, escrow refunded");
            Ok(order)
        }
        Some(open) => {
            // Parse check only: malformed outpoints from the node are a bug
            // worth failing loudly on before funds are captured.
            OutPoint::from_str(&open.funding_outpoint)
                .map_err(|e| anyhow::anyhow!("invalid funding outpoint: {e}"))?;

            let funded_at = Utc::now();
            let lease = Duration::seconds(i64::from(order.channel_expiry_blocks) * SECONDS_PER_BLOCK);
            let channel = ChannelInfo {
                funding_outpoint: open.funding_outpoint,
                funded_at,
                expires_at: funded_at + lease,
            };

            escrow.settle(&invoice.secret).await?;
            let order = order.apply(OrderEvent::Delivered(channel));
            put_order(store, &order)?;

            let snapshot = node
                .lookup_invoice(&invoice.payment_hash)
                .await
                .context("look up settled invoice")?;
            tracing::info!(
                order_id = %order.order_id,
                received_sat = snapshot.received_sat,
                "channel delivered, escrow settled"
            );
            Ok(order)
        }
    }
}

/// Feasibility dry-run followed by the actual open. Any failure along the way
/// resolves to `None`; the caller refunds.
async fn attempt_open(
    node: &Arc<dyn NodeClient>,
    order: &Order,
) -> Option<crate::lightning::node::ChannelOpen> {
    let feasible = match node
        .would_accept_channel_open(order.capacity_sat(), order.is_private(), &order.client_pubkey)
        .await
    {
        Ok(feasible) => feasible,
        Err(err) => {
            tracing::warn!(order_id = %order.order_id, error = %err, "feasibility check failed");
            false
        }
    };
    if !feasible {
        tracing::info!(order_id = %order.order_id, "channel open not currently acceptable");
        return None;
    }

    let fee_rate = match node
        .chain_fee_rate(order.funding_confirms_within_blocks)
        .await
    {
        Ok(rate) => rate,
        Err(err) => {
            tracing::warn!(order_id = %order.order_id, error = %err, "chain fee estimate failed");
            return None;
        }
    };

    match node
        .open_channel(
            order.capacity_sat(),
            order.is_private(),
            &order.client_pubkey,
            fee_rate,
        )
        .await
    {
        Ok(open) => Some(open),
        Err(err) => {
            tracing::warn!(order_id = %order.order_id, error = %err, "channel open failed");
            None
        }
    }
}

pub(crate) fn put_order(store: &SharedOrderStore, order: &Order) -> Result<()> {
    store
        .lock()
        .expect("order store mutex poisoned")
        .put(order)
        .with_context(|| format!("persist order {}", order.order_id))
}
