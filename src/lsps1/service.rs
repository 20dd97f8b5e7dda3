use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::lightning::node::{HoldInvoice, NodeClient, PeerMessage};
use crate::lsps1::escrow::{EscrowManager, HoldWait};
use crate::lsps1::fulfill::{self, put_order};
use crate::lsps1::store::{OrderStore, SharedOrderStore};
use crate::lsps1::wire::{
    self, ERR_INVALID_PARAMS, ERR_NOT_FOUND, LSP_FEATURE_BIT, LSPS_MESSAGE_TYPE,
    METHOD_CREATE_ORDER, METHOD_GET_INFO, METHOD_GET_ORDER, WireMessage,
};
use crate::lsps1::{LspPolicy, Order, OrderEvent, fees, validate};

/// The channel-sale service: routes inbound protocol messages, sells channels
/// against escrowed payments, and answers info/status queries.
pub struct LspService {
    policy: LspPolicy,
    node: Arc<dyn NodeClient>,
    store: SharedOrderStore,
    escrow: EscrowManager,
}

impl LspService {
    pub fn new(policy: LspPolicy, node: Arc<dyn NodeClient>, store: SharedOrderStore) -> Self {
        let escrow = EscrowManager::new(Arc::clone(&node));
        Self {
            policy,
            node,
            store,
            escrow,
        }
    }

    pub fn with_sqlite_store(
        policy: LspPolicy,
        node: Arc<dyn NodeClient>,
        store: crate::lsps1::store::SqliteOrderStore,
    ) -> Self {
        Self::new(policy, node, Arc::new(Mutex::new(store)))
    }

    /// Runs the dispatch loop until a subscription ends or the connectivity
    /// watchdog fires. Both subscriptions are torn down on return.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.node
            .advertise_feature(LSP_FEATURE_BIT)
            .await
            .context("advertise lsp feature bit")?;

        let mut peer_messages = self
            .node
            .subscribe_peer_messages()
            .await
            .context("subscribe to peer messages")?;
        let mut graph_updates = self
            .node
            .subscribe_graph()
            .await
            .context("subscribe to graph updates")?;

        let watchdog = Duration::from_secs(self.policy.watchdog_secs);
        let mut deadline = tokio::time::Instant::now() + watchdog;

        tracing::info!(watchdog_secs = self.policy.watchdog_secs, "channel sale service started");

        loop {
            tokio::select! {
                message = peer_messages.recv() => {
                    let Some(message) = message else {
                        anyhow::bail!("peer message feed closed");
                    };
                    // One bad message never takes the loop down.
                    if let Err(err) = self.handle_peer_message(message).await {
                        tracing::warn!(error = %err, "failed to handle peer message");
                    }
                }
                update = graph_updates.recv() => {
                    if update.is_none() {
                        anyhow::bail!("graph update feed closed");
                    }
                    deadline = tokio::time::Instant::now() + watchdog;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    anyhow::bail!(
                        "no graph updates for {}s, assuming lost network connectivity",
                        self.policy.watchdog_secs
                    );
                }
            }
        }
    }

    /// Decodes and routes one inbound peer message. Non-protocol traffic and
    /// unknown methods are dropped silently.
    pub async fn handle_peer_message(&self, message: PeerMessage) -> Result<()> {
        if message.message_type != LSPS_MESSAGE_TYPE {
            return Ok(());
        }
        let Some(decoded) = wire::decode(&message.payload) else {
            return Ok(());
        };
        let Some(method) = decoded.method.clone() else {
            return Ok(());
        };
        let id = decoded.id.clone().unwrap_or(Value::Null);

        match method.as_str() {
            METHOD_GET_INFO => self.handle_get_info(&message.peer_pubkey, id).await,
            METHOD_CREATE_ORDER => {
                self.handle_create_order(&message.peer_pubkey, id, decoded.params)
                    .await
            }
            METHOD_GET_ORDER => {
                self.handle_get_order(&message.peer_pubkey, id, decoded.params)
                    .await
            }
            _ => Ok(()),
        }
    }

    async fn handle_get_info(&self, peer: &str, id: Value) -> Result<()> {
        self.respond(peer, &WireMessage::response(id, info_result(&self.policy)))
            .await
    }

    async fn handle_create_order(&self, peer: &str, id: Value, params: Option<Value>) -> Result<()> {
        let request = match validate::create_order_request(params.as_ref(), &self.policy) {
            Ok(request) => request,
            Err(rejection) => {
                let response = WireMessage::error_response(
                    id,
                    rejection.code,
                    Some(&rejection.property),
                    rejection.message,
                );
                return self.respond(peer, &response).await;
            }
        };

        if let Ok(alias) = self.node.node_alias(peer).await {
            tracing::info!(peer = %peer, alias = %alias, capacity_sat = request.capacity_sat(), "received channel order");
        }

        let chain_fee_rate = self
            .node
            .chain_fee_rate(request.funding_confirms_within_blocks)
            .await
            .context("estimate chain fee rate")?;
        let fee_total_sat = fees::total_fee_sat(
            &self.policy,
            request.capacity_sat(),
            request.channel_expiry_blocks,
            request.is_private(),
            chain_fee_rate,
        );

        let order_id = Uuid::new_v4().to_string();
        let invoice = self
            .escrow
            .open(&order_id, fee_total_sat, self.policy.invoice_expiry_secs)
            .await?;

        let order = Order::new(
            order_id,
            peer.to_string(),
            &request,
            fee_total_sat,
            invoice.invoice.clone(),
            self.policy.order_expiry_secs,
        );
        put_order(&self.store, &order)?;

        let result = serde_json::to_value(&order).context("encode order result")?;
        self.respond(peer, &WireMessage::response(id, result))
            .await?;

        let node = Arc::clone(&self.node);
        let escrow = self.escrow.clone();
        let store = Arc::clone(&self.store);
        let hold_wait = Duration::from_secs(self.policy.hold_wait_secs);
        let order_id = order.order_id.clone();
        tokio::spawn(async move {
            if let Err(err) = watch_order(node, escrow, store, hold_wait, order, invoice).await {
                tracing::warn!(order_id = %order_id, error = %err, "order fulfillment failed");
            }
        });

        Ok(())
    }

    async fn handle_get_order(&self, peer: &str, id: Value, params: Option<Value>) -> Result<()> {
        let order_id = params
            .as_ref()
            .and_then(|p| p.get("order_id"))
            .and_then(Value::as_str);
        let Some(order_id) = order_id else {
            let response = WireMessage::error_response(
                id,
                ERR_INVALID_PARAMS,
                Some("order_id"),
                "missing or invalid order_id",
            );
            return self.respond(peer, &response).await;
        };

        let order = self
            .store
            .lock()
            .expect("order store mutex poisoned")
            .get(order_id)?;

        let response = match order {
            Some(order) => {
                let result = serde_json::to_value(&order).context("encode order result")?;
                WireMessage::response(id, result)
            }
            None => {
                WireMessage::error_response(id, ERR_NOT_FOUND, Some("order_id"), "order not found")
            }
        };
        self.respond(peer, &response).await
    }

    async fn respond(&self, peer: &str, message: &WireMessage) -> Result<()> {
        let payload = wire::encode(message)?;
        self.node
            .send_custom_message(peer, LSPS_MESSAGE_TYPE, &payload)
            .await
            .context("send protocol response")
    }
}

/// Waits for the escrow payment of a freshly created order, then fulfills or
/// unwinds it. A hold-wait timeout cancels the escrow and fails the order
/// instead of leaving the quote dangling until the invoice expires on its own.
async fn watch_order(
    node: Arc<dyn NodeClient>,
    escrow: EscrowManager,
    store: SharedOrderStore,
    hold_wait: Duration,
    order: Order,
    invoice: HoldInvoice,
) -> Result<()> {
    match escrow.await_hold(&invoice.payment_hash, hold_wait).await? {
        HoldWait::Held => {
            fulfill::fulfill_order(&node, &escrow, &store, order, &invoice).await?;
            Ok(())
        }
        HoldWait::TimedOut => {
            escrow.cancel(&invoice.payment_hash).await?;
            let order = order.apply(OrderEvent::Refunded);
            put_order(&store, &order)?;
            tracing::info!(order_id = %order.order_id, "hold wait timed out, escrow canceled");
            Ok(())
        }
        HoldWait::Canceled => {
            let order = order.apply(OrderEvent::Refunded);
            put_order(&store, &order)?;
            tracing::info!(order_id = %order.order_id, "escrow invoice canceled before payment");
            Ok(())
        }
    }
}

/// The capability/limits payload of a get_info response. Pure function of the
/// policy, so identical policies always yield identical results.
fn info_result(policy: &LspPolicy) -> Value {
    json!({
        "min_channel_balance_sat": policy.min_channel_capacity_sat,
        "max_channel_balance_sat": policy.max_channel_capacity_sat,
        "min_onchain_payment_size_sat": policy.min_onchain_payment_sat,
        "min_onchain_payment_confirmations": policy.min_onchain_confirmations,
        "min_required_channel_confirmations": policy.min_channel_confirmations,
        "max_channel_expiry_blocks": policy.max_channel_expiry_blocks,
        "website": policy.website,
    })
}
