//! Retryable tickets: L1 -> L2 calls pre-funded on L1 and auto-redeemed on L2,
//! with one manual redeem when the auto-redeem does not go through.

use std::{sync::Arc, sync::Mutex, time::Duration};

use alloy::{
    primitives::{address, keccak256, Address, Bytes, Log, B256, U256},
    sol,
    sol_types::{SolCall, SolEvent},
};
use alloy_rlp::{Encodable, Header};
use log::{info, warn};

use super::{lock, track};
use crate::{
    elements::{
        cross_chain_message::{
            CrossChainMessage, DeliveryOutcome, MessageStatus, PreparedMessage, ProtocolParams,
        },
        DEFAULT_SUBMISSION_FEE_MULTIPLIER,
    },
    errors::{OrchestratorError, Result},
    utils::{
        apply_l1_to_l2_alias,
        network::{read, transact, ChainClient, TxRequest},
        poll::{BackoffPolicy, CancelSignal},
    },
};

sol! {
    contract Inbox {
        function calculateRetryableSubmissionFee(uint256 dataLength, uint256 baseFee) external view returns (uint256);
        function createRetryableTicket(
            address to,
            uint256 l2CallValue,
            uint256 maxSubmissionCost,
            address excessFeeRefundAddress,
            address callValueRefundAddress,
            uint256 gasLimit,
            uint256 maxFeePerGas,
            bytes data
        ) external payable returns (uint256);

        event InboxMessageDelivered(uint256 indexed messageNum, bytes data);
    }

    contract Bridge {
        event MessageDelivered(
            uint256 indexed messageIndex,
            bytes32 indexed beforeInboxAcc,
            address inbox,
            uint8 kind,
            address sender,
            bytes32 messageDataHash,
            uint256 baseFeeL1,
            uint64 timestamp
        );
    }

    contract ArbRetryableTx {
        function redeem(bytes32 ticketId) external returns (bytes32);

        event RedeemScheduled(
            bytes32 indexed ticketId,
            bytes32 indexed retryTxHash,
            uint64 indexed sequenceNum,
            uint64 donatedGas,
            address gasDonor,
            uint256 maxRefund,
            uint256 submissionFeeRefund
        );
    }
}

/// L2 precompile that redeems tickets.
pub const ARB_RETRYABLE_TX: Address = address!("000000000000000000000000000000000000006e");
pub const L1_MESSAGE_TYPE_SUBMIT_RETRYABLE: u8 = 9;
const SUBMIT_RETRYABLE_TX_TYPE: u8 = 0x69;
/// Fixed words ahead of the call data in an `InboxMessageDelivered` payload.
const INBOX_MESSAGE_WORDS: usize = 9;

/// Amount to attach on L1 so the ticket is fully funded.
pub fn ticket_value(max_submission_cost: U256, gas_price_bid: U256, max_gas: U256) -> U256 {
    max_submission_cost.saturating_add(gas_price_bid.saturating_mul(max_gas))
}

/// Everything that identifies a retryable on L2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableTicket {
    pub chain_id: u64,
    pub message_number: U256,
    /// Aliased L1 sender.
    pub from: Address,
    pub l1_base_fee: U256,
    pub deposit: U256,
    pub to: Address,
    pub l2_call_value: U256,
    pub call_value_refund_address: Address,
    pub max_submission_cost: U256,
    pub excess_fee_refund_address: Address,
    pub gas_limit: U256,
    pub max_fee_per_gas: U256,
    pub data: Bytes,
}

fn minimal_be(value: U256) -> Vec<u8> {
    let bytes = value.to_be_bytes::<32>();
    let start = bytes.iter().position(|byte| *byte != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

impl RetryableTicket {
    /// Decodes the packed payload of an `InboxMessageDelivered` event.
    pub fn from_inbox_message(
        chain_id: u64,
        message_number: U256,
        from: Address,
        l1_base_fee: U256,
        payload: &[u8],
    ) -> Result<Self> {
        let header = INBOX_MESSAGE_WORDS * 32;
        if payload.len() < header {
            return Err(OrchestratorError::InvalidMessage(format!(
                "retryable payload of {} bytes is shorter than its header",
                payload.len()
            )));
        }
        let word = |index: usize| U256::from_be_slice(&payload[index * 32..(index + 1) * 32]);
        let address = |index: usize| Address::from_word(B256::from_slice(&payload[index * 32..(index + 1) * 32]));

        let data_length = word(8).saturating_to::<usize>();
        if payload.len() != header + data_length {
            return Err(OrchestratorError::InvalidMessage(format!(
                "retryable payload declares {} data bytes but carries {}",
                data_length,
                payload.len() - header
            )));
        }

        Ok(Self {
            chain_id,
            message_number,
            from,
            l1_base_fee,
            to: address(0),
            l2_call_value: word(1),
            deposit: word(2),
            max_submission_cost: word(3),
            excess_fee_refund_address: address(4),
            call_value_refund_address: address(5),
            gas_limit: word(6),
            max_fee_per_gas: word(7),
            data: Bytes::copy_from_slice(&payload[header..]),
        })
    }

    /// Hash of the submit-retryable transaction, which is the ticket id on L2.
    pub fn id(&self) -> B256 {
        keccak256(self.submit_retryable_tx())
    }

    /// Typed (0x69) RLP encoding of the L2 submit-retryable transaction.
    fn submit_retryable_tx(&self) -> Vec<u8> {
        let destination = if self.to == Address::ZERO {
            vec![]
        } else {
            self.to.to_vec()
        };
        let fields: [Vec<u8>; 13] = [
            minimal_be(U256::from(self.chain_id)),
            self.message_number.to_be_bytes::<32>().to_vec(),
            self.from.to_vec(),
            minimal_be(self.l1_base_fee),
            minimal_be(self.deposit),
            minimal_be(self.max_fee_per_gas),
            minimal_be(self.gas_limit),
            destination,
            minimal_be(self.l2_call_value),
            self.call_value_refund_address.to_vec(),
            minimal_be(self.max_submission_cost),
            self.excess_fee_refund_address.to_vec(),
            self.data.to_vec(),
        ];

        let mut payload = Vec::new();
        for field in &fields {
            field.as_slice().encode(&mut payload);
        }
        let mut encoded = vec![SUBMIT_RETRYABLE_TX_TYPE];
        Header {
            list: true,
            payload_length: payload.len(),
        }
        .encode(&mut encoded);
        encoded.extend_from_slice(&payload);
        encoded
    }
}

fn redeem_scheduled(logs: &[Log], ticket_id: B256) -> Option<B256> {
    logs.iter()
        .filter(|log| log.address == ARB_RETRYABLE_TX)
        .filter(|log| log.topics().first() == Some(&ArbRetryableTx::RedeemScheduled::SIGNATURE_HASH))
        .filter_map(|log| ArbRetryableTx::RedeemScheduled::decode_log_data(&log.data, true).ok())
        .find(|event| event.ticketId == ticket_id)
        .map(|event| event.retryTxHash)
}

#[derive(Debug, Default)]
struct TicketProgress {
    ticket_id: Option<B256>,
    redeem_attempted: bool,
    manual_retry: Option<B256>,
}

pub struct TicketMessenger {
    l1: Arc<dyn ChainClient>,
    l2: Arc<dyn ChainClient>,
    inbox: Address,
    submission_fee_multiplier: u64,
    backoff: BackoffPolicy,
}

impl TicketMessenger {
    pub fn new(l1: Arc<dyn ChainClient>, l2: Arc<dyn ChainClient>, inbox: Address) -> Self {
        Self {
            l1,
            l2,
            inbox,
            submission_fee_multiplier: DEFAULT_SUBMISSION_FEE_MULTIPLIER,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_submission_fee_multiplier(mut self, multiplier: u64) -> Self {
        self.submission_fee_multiplier = multiplier.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Prices the ticket against current L1 base fee and L2 gas, and builds
    /// the `createRetryableTicket` call funding it.
    pub async fn prepare_message(
        &self,
        sender: Address,
        recipient: Address,
        calldata: Bytes,
        refund_address: Option<Address>,
    ) -> Result<PreparedMessage> {
        let refund_address = refund_address.unwrap_or(sender);
        let l2_sender = apply_l1_to_l2_alias(sender);
        let estimate = TxRequest::call(recipient, calldata.clone());

        let (l1_block, gas_price, max_gas) = tokio::try_join!(
            self.l1.latest_block(),
            self.l2.gas_price(),
            self.l2.estimate_gas(l2_sender, &estimate),
        )?;

        let submission_fee = read(
            self.l1.as_ref(),
            self.inbox,
            Inbox::calculateRetryableSubmissionFeeCall {
                dataLength: U256::from(calldata.len()),
                baseFee: U256::from(l1_block.base_fee),
            },
        )
        .await?
        ._0;

        let max_submission_cost = submission_fee.saturating_mul(U256::from(self.submission_fee_multiplier));
        let gas_price_bid = U256::from(gas_price);
        let max_gas = U256::from(max_gas);
        let value = ticket_value(max_submission_cost, gas_price_bid, max_gas);

        info!(
            "retryable to {recipient}: submission {max_submission_cost}, gas {max_gas} at {gas_price_bid}, value {value}"
        );

        let create = Inbox::createRetryableTicketCall {
            to: recipient,
            l2CallValue: U256::ZERO,
            maxSubmissionCost: max_submission_cost,
            excessFeeRefundAddress: refund_address,
            callValueRefundAddress: refund_address,
            gasLimit: max_gas,
            maxFeePerGas: gas_price_bid,
            data: calldata.clone(),
        };

        Ok(PreparedMessage {
            to: self.inbox,
            calldata: create.abi_encode().into(),
            value,
            message: CrossChainMessage {
                sender,
                recipient,
                payload: calldata,
                value: U256::ZERO,
                params: ProtocolParams::Ticket {
                    max_submission_cost,
                    gas_price_bid,
                    max_gas,
                    refund_address,
                },
            },
        })
    }

    /// Reads the ticket created by `source_tx`. `None` while the transaction is not mined.
    pub async fn find_ticket(&self, source_tx: B256) -> Result<Option<RetryableTicket>> {
        let Some(receipt) = self.l1.receipt(source_tx).await? else {
            return Ok(None);
        };
        if !receipt.success {
            return Err(OrchestratorError::InvalidMessage(format!(
                "source transaction {source_tx} reverted"
            )));
        }

        let chain_id = self.l2.chain_id().await?;
        let delivered = receipt
            .logs
            .iter()
            .filter(|log| log.topics().first() == Some(&Bridge::MessageDelivered::SIGNATURE_HASH))
            .filter_map(|log| Bridge::MessageDelivered::decode_log_data(&log.data, true).ok())
            .filter(|event| event.inbox == self.inbox && event.kind == L1_MESSAGE_TYPE_SUBMIT_RETRYABLE);
        let inbox_messages: Vec<_> = receipt
            .logs
            .iter()
            .filter(|log| log.address == self.inbox)
            .filter(|log| log.topics().first() == Some(&Inbox::InboxMessageDelivered::SIGNATURE_HASH))
            .filter_map(|log| Inbox::InboxMessageDelivered::decode_log_data(&log.data, true).ok())
            .collect();

        let mut tickets = vec![];
        for event in delivered {
            let Some(message) = inbox_messages
                .iter()
                .find(|message| message.messageNum == event.messageIndex)
            else {
                continue;
            };
            tickets.push(RetryableTicket::from_inbox_message(
                chain_id,
                event.messageIndex,
                event.sender,
                event.baseFeeL1,
                &message.data,
            )?);
        }

        if tickets.len() > 1 {
            warn!("{source_tx} created {} retryables, tracking the first", tickets.len());
        }
        tickets.into_iter().next().map(Some).ok_or_else(|| {
            OrchestratorError::InvalidMessage(format!("{source_tx} created no retryable ticket"))
        })
    }

    async fn retry_succeeded(&self, retry_tx: B256) -> Result<Option<bool>> {
        Ok(self.l2.receipt(retry_tx).await?.map(|receipt| receipt.success))
    }

    /// Status as seen from the ticket creation and its auto-redeem.
    async fn creation_status(&self, ticket_id: B256) -> Result<MessageStatus> {
        let Some(creation) = self.l2.receipt(ticket_id).await? else {
            return Ok(MessageStatus::Pending);
        };
        if !creation.success {
            warn!("retryable {ticket_id} could not be created on L2");
            return Ok(MessageStatus::Failed);
        }

        let Some(retry_tx) = redeem_scheduled(&creation.logs, ticket_id) else {
            // Funds are on L2 but the gas bid did not allow an auto-redeem.
            return Ok(MessageStatus::NeedsManualFinalization);
        };
        Ok(match self.retry_succeeded(retry_tx).await? {
            None => MessageStatus::Pending,
            Some(true) => MessageStatus::AutoDelivered,
            Some(false) => MessageStatus::NeedsManualFinalization,
        })
    }

    /// Whether any retry of the ticket went through, including retries
    /// scheduled by other accounts' redeems.
    async fn retried_successfully(&self, ticket_id: B256) -> Result<bool> {
        let from_block = self
            .l2
            .receipt(ticket_id)
            .await?
            .map(|creation| creation.block_number)
            .unwrap_or_default();
        let scheduled = self
            .l2
            .logs(ARB_RETRYABLE_TX, ArbRetryableTx::RedeemScheduled::SIGNATURE_HASH, from_block)
            .await?;

        for entry in scheduled {
            let Ok(event) = ArbRetryableTx::RedeemScheduled::decode_log_data(&entry.log.data, true) else {
                continue;
            };
            if event.ticketId == ticket_id && self.retry_succeeded(event.retryTxHash).await? == Some(true) {
                info!("retryable {ticket_id} was redeemed by {}", event.retryTxHash);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Sends the one manual redeem and returns the retry transaction it scheduled.
    async fn redeem(&self, ticket_id: B256) -> Result<B256> {
        warn!("retryable {ticket_id} was not auto-redeemed, redeeming it once");
        let outcome = transact(
            self.l2.as_ref(),
            ARB_RETRYABLE_TX,
            ArbRetryableTx::redeemCall { ticketId: ticket_id },
            U256::ZERO,
        )
        .await
        .map_err(|e| OrchestratorError::ManualFinalizationRequired {
            ticket_id,
            reason: format!("redeem could not be sent: {e:#}"),
        })?;

        if !outcome.success {
            return Err(OrchestratorError::ManualFinalizationRequired {
                ticket_id,
                reason: format!("redeem reverted in {}", outcome.tx_hash),
            });
        }
        redeem_scheduled(&outcome.logs, ticket_id).ok_or_else(|| {
            OrchestratorError::ManualFinalizationRequired {
                ticket_id,
                reason: format!("redeem {} scheduled no retry", outcome.tx_hash),
            }
        })
    }

    async fn observe(
        &self,
        source_tx: B256,
        current: MessageStatus,
        progress: &Mutex<TicketProgress>,
    ) -> Result<MessageStatus> {
        let known = lock(progress).ticket_id;
        let ticket_id = match known {
            Some(ticket_id) => ticket_id,
            None => {
                let Some(ticket) = self.find_ticket(source_tx).await? else {
                    return Ok(MessageStatus::Pending);
                };
                let ticket_id = ticket.id();
                info!("{source_tx} created retryable {ticket_id}");
                lock(progress).ticket_id = Some(ticket_id);
                ticket_id
            }
        };

        if current != MessageStatus::NeedsManualFinalization {
            return self.creation_status(ticket_id).await;
        }

        let (attempted, manual_retry) = {
            let progress = lock(progress);
            (progress.redeem_attempted, progress.manual_retry)
        };
        let retry_tx = match manual_retry {
            Some(retry_tx) => retry_tx,
            None if attempted => {
                return Err(OrchestratorError::ManualFinalizationRequired {
                    ticket_id,
                    reason: "the automatic redeem was already used".to_string(),
                })
            }
            None => {
                if self.retried_successfully(ticket_id).await? {
                    return Ok(MessageStatus::Finalized);
                }
                lock(progress).redeem_attempted = true;
                let retry_tx = self.redeem(ticket_id).await?;
                lock(progress).manual_retry = Some(retry_tx);
                retry_tx
            }
        };

        Ok(match self.retry_succeeded(retry_tx).await? {
            None => MessageStatus::NeedsManualFinalization,
            Some(true) => MessageStatus::Finalized,
            Some(false) => MessageStatus::Failed,
        })
    }

    pub async fn wait_for_delivery(
        &self,
        source_tx: B256,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<DeliveryOutcome> {
        let progress = Mutex::new(TicketProgress::default());
        track(
            |current| self.observe(source_tx, current, &progress),
            timeout,
            self.backoff,
            cancel,
        )
        .await
    }
}
