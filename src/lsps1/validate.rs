use serde_json::Value;

use crate::lsps1::LspPolicy;
use crate::lsps1::wire::{ERR_INVALID_PARAMS, ERR_OPTION_MISMATCH};

/// A create-order request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub lsp_balance_sat: u64,
    pub client_balance_sat: u64,
    pub funding_confirms_within_blocks: u32,
    pub channel_expiry_blocks: u32,
    pub announce_channel: bool,
}

impl OrderRequest {
    pub fn capacity_sat(&self) -> u64 {
        self.lsp_balance_sat + self.client_balance_sat
    }

    pub fn is_private(&self) -> bool {
        !self.announce_channel
    }
}

/// Why a create-order request was rejected. Becomes the JSON-RPC error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRejection {
    pub code: i32,
    pub property: String,
    pub message: String,
}

impl OrderRejection {
    fn invalid_params(property: &str, message: &str) -> Self {
        Self {
            code: ERR_INVALID_PARAMS,
            property: property.to_string(),
            message: message.to_string(),
        }
    }

    fn option_mismatch(property: &str, message: String) -> Self {
        Self {
            code: ERR_OPTION_MISMATCH,
            property: property.to_string(),
            message,
        }
    }
}

fn required_u64(params: &Value, property: &str) -> Result<u64, OrderRejection> {
    params
        .get(property)
        .ok_or_else(|| OrderRejection::invalid_params(property, "missing required property"))?
        .as_u64()
        .ok_or_else(|| {
            OrderRejection::invalid_params(property, "expected a non-negative integer")
        })
}

fn required_u32(params: &Value, property: &str) -> Result<u32, OrderRejection> {
    let value = required_u64(params, property)?;
    u32::try_from(value)
        .map_err(|_| OrderRejection::invalid_params(property, "value out of range"))
}

fn required_bool(params: &Value, property: &str) -> Result<bool, OrderRejection> {
    params
        .get(property)
        .ok_or_else(|| OrderRejection::invalid_params(property, "missing required property"))?
        .as_bool()
        .ok_or_else(|| OrderRejection::invalid_params(property, "expected a boolean"))
}

/// Validates a create-order request against the policy. Checks run in a fixed
/// order and stop at the first failure.
pub fn create_order_request(
    params: Option<&Value>,
    policy: &LspPolicy,
) -> Result<OrderRequest, OrderRejection> {
    let params = params
        .ok_or_else(|| OrderRejection::invalid_params("params", "missing request parameters"))?;

    let lsp_balance_sat = required_u64(params, "lsp_balance_sat")?;
    let client_balance_sat = required_u64(params, "client_balance_sat")?;
    let funding_confirms_within_blocks = required_u32(params, "funding_confirms_within_blocks")?;
    let channel_expiry_blocks = required_u32(params, "channel_expiry_blocks")?;
    let announce_channel = required_bool(params, "announce_channel")?;

    if funding_confirms_within_blocks < policy.min_channel_confirmations {
        return Err(OrderRejection::option_mismatch(
            "funding_confirms_within_blocks",
            format!(
                "confirmation target below the minimum of {}",
                policy.min_channel_confirmations
            ),
        ));
    }

    let capacity_sat = lsp_balance_sat.saturating_add(client_balance_sat);
    if capacity_sat < policy.min_channel_capacity_sat {
        return Err(OrderRejection::option_mismatch(
            "lsp_balance_sat",
            format!(
                "requested capacity below the minimum of {} sat",
                policy.min_channel_capacity_sat
            ),
        ));
    }
    if capacity_sat > policy.max_channel_capacity_sat {
        return Err(OrderRejection::option_mismatch(
            "lsp_balance_sat",
            format!(
                "requested capacity above the maximum of {} sat",
                policy.max_channel_capacity_sat
            ),
        ));
    }

    // Push amounts are not supported: the client side must start empty.
    if client_balance_sat != 0 {
        return Err(OrderRejection::option_mismatch(
            "client_balance_sat",
            "client balance must be zero".to_string(),
        ));
    }

    if channel_expiry_blocks > policy.max_channel_expiry_blocks {
        return Err(OrderRejection::option_mismatch(
            "channel_expiry_blocks",
            format!(
                "channel expiry above the maximum of {} blocks",
                policy.max_channel_expiry_blocks
            ),
        ));
    }

    Ok(OrderRequest {
        lsp_balance_sat,
        client_balance_sat,
        funding_confirms_within_blocks,
        channel_expiry_blocks,
        announce_channel,
    })
}
