use std::time::Duration;

use alloy::primitives::{Address, B256, U256};

use crate::elements::cross_chain_message::MessageStatus;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Nonce drift between prediction and deployment.
    #[error("step {step} ({contract}): predicted address {predicted}, deployed at {actual}")]
    AddressPredictionMismatch {
        step: usize,
        contract: String,
        predicted: Address,
        actual: Address,
    },

    #[error("step {step} ({contract}) failed: {reason}")]
    DeploymentFailed {
        step: usize,
        contract: String,
        reason: String,
    },

    #[error("post-deploy check for step {step} ({contract}) failed: {reason}")]
    PostDeployCheckFailed {
        step: usize,
        contract: String,
        reason: String,
    },

    /// Reported, never retried. `applied` lists what already landed on chain.
    #[error(
        "{operation} on bridge {bridge} failed after {} applied action(s): {reason}",
        .applied.len()
    )]
    RoleOperationFailure {
        bridge: Address,
        operation: String,
        applied: Vec<String>,
        reason: String,
    },

    #[error("message from {source_tx} not settled within {timeout:?}, last status {last_status}")]
    MessageDeliveryTimeout {
        source_tx: B256,
        timeout: Duration,
        last_status: MessageStatus,
    },

    #[error("message from {source_tx} failed on the destination chain: {reason}")]
    MessageExecutionFailed { source_tx: B256, reason: String },

    #[error("retryable ticket {ticket_id} still needs a manual redeem: {reason}")]
    ManualFinalizationRequired { ticket_id: B256, reason: String },

    #[error("timelock action {action_id} expired at {expired_at}, it has to be proposed again")]
    TimelockExpired { action_id: U256, expired_at: u64 },

    #[error("timelock action {action_id} could not be executed: {reason}")]
    TimelockExecutionFailed { action_id: U256, reason: String },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
