use std::fmt;

use alloy::primitives::{Address, Bytes, U256};

/// Which way a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    L1ToL2,
    L2ToL1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolParams {
    /// Pre-funded retryable ticket.
    Ticket {
        max_submission_cost: U256,
        gas_price_bid: U256,
        max_gas: U256,
        refund_address: Address,
    },
    /// Fixed-gas messenger relay.
    Relay {
        gas_limit: u32,
        direction: MessageDirection,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainMessage {
    pub sender: Address,
    pub recipient: Address,
    pub payload: Bytes,
    pub value: U256,
    pub params: ProtocolParams,
}

/// The source-chain transaction that carries a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedMessage {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub message: CrossChainMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Pending,
    ReadyToProve,
    InChallengePeriod,
    ReadyToFinalize,
    NeedsManualFinalization,
    AutoDelivered,
    Finalized,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::AutoDelivered | MessageStatus::Finalized | MessageStatus::Failed
        )
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, MessageStatus::AutoDelivered | MessageStatus::Finalized)
    }

    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::ReadyToProve | MessageStatus::NeedsManualFinalization => 1,
            MessageStatus::InChallengePeriod => 2,
            MessageStatus::ReadyToFinalize => 3,
            MessageStatus::AutoDelivered | MessageStatus::Finalized | MessageStatus::Failed => 4,
        }
    }

    /// Moves to `observed` unless that would go backwards or leave a terminal state.
    pub fn advance(&mut self, observed: MessageStatus) -> MessageStatus {
        if self.is_terminal() || observed.rank() < self.rank() {
            if observed != *self {
                log::debug!("ignoring status {} observed after {}", observed, self);
            }
        } else if observed != *self {
            log::info!("message status {} -> {}", self, observed);
            *self = observed;
        }
        *self
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::ReadyToProve => "READY_TO_PROVE",
            MessageStatus::InChallengePeriod => "IN_CHALLENGE_PERIOD",
            MessageStatus::ReadyToFinalize => "READY_TO_FINALIZE",
            MessageStatus::NeedsManualFinalization => "NEEDS_MANUAL_FINALIZATION",
            MessageStatus::AutoDelivered => "AUTO_DELIVERED",
            MessageStatus::Finalized => "FINALIZED",
            MessageStatus::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// Result of a bounded wait. Running out of time is not an error by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Settled(MessageStatus),
    TimedOut(MessageStatus),
}

impl DeliveryOutcome {
    pub fn status(&self) -> MessageStatus {
        match self {
            DeliveryOutcome::Settled(status) | DeliveryOutcome::TimedOut(status) => *status,
        }
    }
}
