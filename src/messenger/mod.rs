//! Cross-chain message preparation and delivery tracking, one variant per
//! chain family.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use alloy::primitives::{Address, Bytes, B256};

use crate::{
    elements::{
        cross_chain_message::{DeliveryOutcome, MessageDirection, MessageStatus, PreparedMessage},
        MessagingConfig,
    },
    errors::{OrchestratorError, Result},
    utils::{
        network::ChainClient,
        poll::{suspend_until, BackoffPolicy, CancelSignal},
    },
};

pub mod relay;
pub mod ticket;

use relay::{RelayContracts, RelayMessenger};
use ticket::TicketMessenger;

pub enum CrossChainMessenger {
    Ticket(TicketMessenger),
    Relay(RelayMessenger),
}

impl CrossChainMessenger {
    /// Builds the L1 -> L2 messenger described by `config`.
    pub fn from_config(
        config: &MessagingConfig,
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self::build(config, l1, l2, backoff, MessageDirection::L1ToL2)
    }

    /// Retryable tickets only travel L1 -> L2; asking for the other direction is an error.
    pub fn for_direction(
        config: &MessagingConfig,
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        backoff: BackoffPolicy,
        direction: MessageDirection,
    ) -> Result<Self> {
        if matches!(config, MessagingConfig::Ticket { .. }) && direction == MessageDirection::L2ToL1 {
            return Err(OrchestratorError::InvalidMessage(
                "retryable ticket messaging only carries L1 -> L2 messages".to_string(),
            ));
        }
        Ok(Self::build(config, l1, l2, backoff, direction))
    }

    fn build(
        config: &MessagingConfig,
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        backoff: BackoffPolicy,
        direction: MessageDirection,
    ) -> Self {
        match config {
            MessagingConfig::Ticket {
                inbox,
                submission_fee_multiplier,
            } => CrossChainMessenger::Ticket(
                TicketMessenger::new(l1, l2, *inbox)
                    .with_submission_fee_multiplier(*submission_fee_multiplier)
                    .with_backoff(backoff),
            ),
            MessagingConfig::Relay {
                l1_messenger,
                l2_messenger,
                portal,
                output_oracle,
                gas_limit,
                requires_proof,
            } => CrossChainMessenger::Relay(
                RelayMessenger::new(
                    l1,
                    l2,
                    RelayContracts {
                        l1_messenger: *l1_messenger,
                        l2_messenger: *l2_messenger,
                        portal: *portal,
                        output_oracle: *output_oracle,
                        requires_proof: *requires_proof,
                    },
                    direction,
                )
                .with_gas_limit(*gas_limit)
                .with_backoff(backoff),
            ),
        }
    }

    pub async fn prepare_message(
        &self,
        sender: Address,
        recipient: Address,
        calldata: Bytes,
        refund_address: Option<Address>,
    ) -> Result<PreparedMessage> {
        match self {
            CrossChainMessenger::Ticket(messenger) => {
                messenger.prepare_message(sender, recipient, calldata, refund_address).await
            }
            CrossChainMessenger::Relay(messenger) => {
                messenger.prepare_message(sender, recipient, calldata, refund_address).await
            }
        }
    }

    /// Polls until the message sent by `source_tx` settles or `timeout` passes.
    pub async fn wait_for_delivery(
        &self,
        source_tx: B256,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<DeliveryOutcome> {
        match self {
            CrossChainMessenger::Ticket(messenger) => {
                messenger.wait_for_delivery(source_tx, timeout, cancel).await
            }
            CrossChainMessenger::Relay(messenger) => {
                messenger.wait_for_delivery(source_tx, timeout, cancel).await
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Feeds the current status to `observe` until it reports a terminal one.
/// Observations only ever move the status forward.
pub(crate) async fn track<F, Fut>(
    mut observe: F,
    timeout: Duration,
    backoff: BackoffPolicy,
    cancel: &CancelSignal,
) -> Result<DeliveryOutcome>
where
    F: FnMut(MessageStatus) -> Fut,
    Fut: Future<Output = Result<MessageStatus>>,
{
    let status = Mutex::new(MessageStatus::Pending);

    let settled = suspend_until(
        || {
            let current = *lock(&status);
            let observed = observe(current);
            let status = &status;
            async move {
                let observed = observed.await?;
                let next = lock(status).advance(observed);
                Ok::<_, OrchestratorError>(next.is_terminal().then_some(next))
            }
        },
        timeout,
        backoff,
        cancel,
    )
    .await?;

    let last = *lock(&status);
    Ok(match settled {
        Some(terminal) => DeliveryOutcome::Settled(terminal),
        None => DeliveryOutcome::TimedOut(last),
    })
}
