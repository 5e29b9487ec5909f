//! Fixed-gas messenger relay. Deposits are relayed on L2 without help;
//! withdrawals are proven, wait out the challenge window and are finalized on L1.

use std::{sync::Arc, sync::Mutex, time::Duration};

use alloy::{
    primitives::{address, keccak256, Address, Bytes, Log, B256, U256},
    sol,
    sol_types::{SolCall, SolEvent, SolValue},
};
use log::{info, warn};

use super::{lock, track};
use crate::{
    elements::{
        cross_chain_message::{
            CrossChainMessage, DeliveryOutcome, MessageDirection, MessageStatus, PreparedMessage,
            ProtocolParams,
        },
        DEFAULT_RELAY_GAS_LIMIT,
    },
    errors::{OrchestratorError, Result},
    utils::{
        network::{read, transact, ChainClient},
        poll::{BackoffPolicy, CancelSignal},
    },
};

sol! {
    contract CrossDomainMessenger {
        function sendMessage(address _target, bytes _message, uint32 _minGasLimit) external payable;
        function relayMessage(
            uint256 _nonce,
            address _sender,
            address _target,
            uint256 _value,
            uint256 _minGasLimit,
            bytes _message
        ) external payable;
        function successfulMessages(bytes32) external view returns (bool);
        function failedMessages(bytes32) external view returns (bool);

        event SentMessage(address indexed target, address sender, bytes message, uint256 messageNonce, uint256 gasLimit);
        event SentMessageExtension1(address indexed sender, uint256 value);
        event RelayedMessage(bytes32 indexed msgHash);
        event FailedRelayedMessage(bytes32 indexed msgHash);
    }

    contract L2ToL1MessagePasser {
        function initiateWithdrawal(address _target, uint256 _gasLimit, bytes _data) external payable;

        event MessagePassed(
            uint256 indexed nonce,
            address indexed sender,
            address indexed target,
            uint256 value,
            uint256 gasLimit,
            bytes data,
            bytes32 withdrawalHash
        );
    }

    contract OptimismPortal {
        #[derive(Debug, PartialEq)]
        struct WithdrawalTransaction {
            uint256 nonce;
            address sender;
            address target;
            uint256 value;
            uint256 gasLimit;
            bytes data;
        }

        #[derive(Debug, PartialEq)]
        struct OutputRootProof {
            bytes32 version;
            bytes32 stateRoot;
            bytes32 messagePasserStorageRoot;
            bytes32 latestBlockhash;
        }

        function proveWithdrawalTransaction(
            WithdrawalTransaction _tx,
            uint256 _l2OutputIndex,
            OutputRootProof _outputRootProof,
            bytes[] _withdrawalProof
        ) external;
        function finalizeWithdrawalTransaction(WithdrawalTransaction _tx) external;
        function provenWithdrawals(bytes32) external view returns (bytes32 outputRoot, uint128 timestamp, uint128 l2OutputIndex);
        function finalizedWithdrawals(bytes32) external view returns (bool);

        event WithdrawalProven(bytes32 indexed withdrawalHash, address indexed from, address indexed to);
        event WithdrawalFinalized(bytes32 indexed withdrawalHash, bool success);
    }

    contract L2OutputOracle {
        #[derive(Debug, PartialEq)]
        struct OutputProposal {
            bytes32 outputRoot;
            uint128 timestamp;
            uint128 l2BlockNumber;
        }

        function latestBlockNumber() external view returns (uint256);
        function getL2OutputIndexAfter(uint256 _l2BlockNumber) external view returns (uint256);
        function getL2Output(uint256 _l2OutputIndex) external view returns (OutputProposal memory);
        function FINALIZATION_PERIOD_SECONDS() external view returns (uint256);
    }
}

mod legacy {
    alloy::sol! {
        function relayMessage(address _target, address _sender, bytes _message, uint256 _messageNonce);
    }
}

pub const L2_TO_L1_MESSAGE_PASSER: Address = address!("4200000000000000000000000000000000000016");

/// Top two bytes of a messenger nonce carry the encoding version.
pub fn message_version(nonce: U256) -> u16 {
    (nonce >> 240usize).saturating_to::<u16>()
}

pub fn versioned_nonce(version: u16, nonce: u64) -> U256 {
    (U256::from(version) << 240) | U256::from(nonce)
}

/// Hash the receiving messenger records a relayed message under.
pub fn hash_cross_domain_message(
    nonce: U256,
    sender: Address,
    target: Address,
    value: U256,
    gas_limit: U256,
    message: Bytes,
) -> Result<B256> {
    match message_version(nonce) {
        0 => Ok(keccak256(
            legacy::relayMessageCall {
                _target: target,
                _sender: sender,
                _message: message,
                _messageNonce: nonce,
            }
            .abi_encode(),
        )),
        1 => Ok(keccak256(
            CrossDomainMessenger::relayMessageCall {
                _nonce: nonce,
                _sender: sender,
                _target: target,
                _value: value,
                _minGasLimit: gas_limit,
                _message: message,
            }
            .abi_encode(),
        )),
        version => Err(OrchestratorError::InvalidMessage(format!(
            "unsupported message version {version}"
        ))),
    }
}

pub fn hash_withdrawal(withdrawal: &OptimismPortal::WithdrawalTransaction) -> B256 {
    keccak256(
        (
            withdrawal.nonce,
            withdrawal.sender,
            withdrawal.target,
            withdrawal.value,
            withdrawal.gasLimit,
            withdrawal.data.clone(),
        )
            .abi_encode_params(),
    )
}

/// Slot of `sentMessages[withdrawalHash]` in the message passer.
pub fn withdrawal_storage_slot(withdrawal_hash: B256) -> B256 {
    keccak256((withdrawal_hash, U256::ZERO).abi_encode())
}

pub fn output_root(proof: &OptimismPortal::OutputRootProof) -> B256 {
    keccak256(proof.abi_encode())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayContracts {
    pub l1_messenger: Address,
    pub l2_messenger: Address,
    pub portal: Address,
    pub output_oracle: Address,
    /// Whether withdrawals are proven before the challenge window starts.
    pub requires_proof: bool,
}

#[derive(Debug, Clone)]
struct PendingWithdrawal {
    withdrawal: OptimismPortal::WithdrawalTransaction,
    hash: B256,
    l2_block: u64,
}

fn decode_first<E: SolEvent>(logs: &[Log], emitter: Address) -> Option<(usize, E)> {
    logs.iter().enumerate().find_map(|(index, log)| {
        if log.address != emitter || log.topics().first() != Some(&E::SIGNATURE_HASH) {
            return None;
        }
        E::decode_log_data(&log.data, true).ok().map(|event| (index, event))
    })
}

pub struct RelayMessenger {
    l1: Arc<dyn ChainClient>,
    l2: Arc<dyn ChainClient>,
    contracts: RelayContracts,
    direction: MessageDirection,
    gas_limit: u32,
    backoff: BackoffPolicy,
}

impl RelayMessenger {
    pub fn new(
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        contracts: RelayContracts,
        direction: MessageDirection,
    ) -> Self {
        Self {
            l1,
            l2,
            contracts,
            direction,
            gas_limit: DEFAULT_RELAY_GAS_LIMIT,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u32) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    fn source_messenger(&self) -> Address {
        match self.direction {
            MessageDirection::L1ToL2 => self.contracts.l1_messenger,
            MessageDirection::L2ToL1 => self.contracts.l2_messenger,
        }
    }

    /// Relay messages carry no value and use the configured gas limit.
    pub async fn prepare_message(
        &self,
        sender: Address,
        recipient: Address,
        calldata: Bytes,
        _refund_address: Option<Address>,
    ) -> Result<PreparedMessage> {
        let call = CrossDomainMessenger::sendMessageCall {
            _target: recipient,
            _message: calldata.clone(),
            _minGasLimit: self.gas_limit,
        };
        Ok(PreparedMessage {
            to: self.source_messenger(),
            calldata: call.abi_encode().into(),
            value: U256::ZERO,
            message: CrossChainMessage {
                sender,
                recipient,
                payload: calldata,
                value: U256::ZERO,
                params: ProtocolParams::Relay {
                    gas_limit: self.gas_limit,
                    direction: self.direction,
                },
            },
        })
    }

    pub async fn wait_for_delivery(
        &self,
        source_tx: B256,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> Result<DeliveryOutcome> {
        match self.direction {
            MessageDirection::L1ToL2 => {
                let hash = Mutex::new(None);
                track(|_| self.observe_deposit(source_tx, &hash), timeout, self.backoff, cancel).await
            }
            MessageDirection::L2ToL1 => {
                let pending = Mutex::new(None);
                track(
                    |current| self.observe_withdrawal(source_tx, current, &pending),
                    timeout,
                    self.backoff,
                    cancel,
                )
                .await
            }
        }
    }

    /// Hash of the message sent on L1 by `source_tx`, `None` while unmined.
    pub async fn deposit_message_hash(&self, source_tx: B256) -> Result<Option<B256>> {
        let Some(receipt) = self.l1.receipt(source_tx).await? else {
            return Ok(None);
        };
        if !receipt.success {
            return Err(OrchestratorError::InvalidMessage(format!(
                "source transaction {source_tx} reverted"
            )));
        }

        let messenger = self.contracts.l1_messenger;
        let (index, sent) = decode_first::<CrossDomainMessenger::SentMessage>(&receipt.logs, messenger)
            .ok_or_else(|| OrchestratorError::InvalidMessage(format!("{source_tx} sent no message")))?;
        // The extension, when present, follows its message.
        let value = decode_first::<CrossDomainMessenger::SentMessageExtension1>(&receipt.logs[index..], messenger)
            .map(|(_, extension)| extension.value)
            .unwrap_or_default();

        hash_cross_domain_message(
            sent.messageNonce,
            sent.sender,
            sent.target,
            value,
            sent.gasLimit,
            sent.message,
        )
        .map(Some)
    }

    async fn observe_deposit(&self, source_tx: B256, hash: &Mutex<Option<B256>>) -> Result<MessageStatus> {
        let known = *lock(hash);
        let message_hash = match known {
            Some(message_hash) => message_hash,
            None => {
                let Some(message_hash) = self.deposit_message_hash(source_tx).await? else {
                    return Ok(MessageStatus::Pending);
                };
                info!("{source_tx} sent message {message_hash}");
                *lock(hash) = Some(message_hash);
                message_hash
            }
        };

        let l2 = self.l2.as_ref();
        let messenger = self.contracts.l2_messenger;
        if read(l2, messenger, CrossDomainMessenger::successfulMessagesCall { _0: message_hash })
            .await?
            ._0
        {
            return Ok(MessageStatus::AutoDelivered);
        }
        if read(l2, messenger, CrossDomainMessenger::failedMessagesCall { _0: message_hash })
            .await?
            ._0
        {
            warn!("message {message_hash} reverted on L2");
            return Ok(MessageStatus::Failed);
        }
        Ok(MessageStatus::Pending)
    }

    async fn find_withdrawal(&self, source_tx: B256) -> Result<Option<PendingWithdrawal>> {
        let Some(receipt) = self.l2.receipt(source_tx).await? else {
            return Ok(None);
        };
        if !receipt.success {
            return Err(OrchestratorError::InvalidMessage(format!(
                "source transaction {source_tx} reverted"
            )));
        }

        let (_, passed) =
            decode_first::<L2ToL1MessagePasser::MessagePassed>(&receipt.logs, L2_TO_L1_MESSAGE_PASSER)
                .ok_or_else(|| OrchestratorError::InvalidMessage(format!("{source_tx} passed no withdrawal")))?;
        let withdrawal = OptimismPortal::WithdrawalTransaction {
            nonce: passed.nonce,
            sender: passed.sender,
            target: passed.target,
            value: passed.value,
            gasLimit: passed.gasLimit,
            data: passed.data,
        };
        let hash = hash_withdrawal(&withdrawal);
        if hash != passed.withdrawalHash {
            return Err(OrchestratorError::InvalidMessage(format!(
                "withdrawal hash {} does not match its fields ({hash})",
                passed.withdrawalHash
            )));
        }

        Ok(Some(PendingWithdrawal {
            withdrawal,
            hash,
            l2_block: receipt.block_number,
        }))
    }

    async fn prove(&self, source_tx: B256, pending: &PendingWithdrawal) -> Result<()> {
        let l1 = self.l1.as_ref();
        let oracle = self.contracts.output_oracle;
        let index = read(
            l1,
            oracle,
            L2OutputOracle::getL2OutputIndexAfterCall {
                _l2BlockNumber: U256::from(pending.l2_block),
            },
        )
        .await?
        ._0;
        let output = read(l1, oracle, L2OutputOracle::getL2OutputCall { _l2OutputIndex: index })
            .await?
            ._0;

        let output_block = output.l2BlockNumber as u64;
        let block = self.l2.block(output_block).await?.ok_or_else(|| {
            OrchestratorError::InvalidMessage(format!("L2 block {output_block} of output {index} not found"))
        })?;
        let storage = self
            .l2
            .storage_proof(L2_TO_L1_MESSAGE_PASSER, withdrawal_storage_slot(pending.hash), output_block)
            .await?;

        let root_proof = OptimismPortal::OutputRootProof {
            version: B256::ZERO,
            stateRoot: block.state_root,
            messagePasserStorageRoot: storage.storage_hash,
            latestBlockhash: block.hash,
        };
        if output_root(&root_proof) != output.outputRoot {
            return Err(OrchestratorError::InvalidMessage(format!(
                "L2 block {output_block} does not reproduce output root {}",
                output.outputRoot
            )));
        }

        info!("proving withdrawal {} against output {index}", pending.hash);
        let outcome = transact(
            l1,
            self.contracts.portal,
            OptimismPortal::proveWithdrawalTransactionCall {
                _tx: pending.withdrawal.clone(),
                _l2OutputIndex: index,
                _outputRootProof: root_proof,
                _withdrawalProof: storage.proof,
            },
            U256::ZERO,
        )
        .await?;
        if !outcome.success {
            return Err(OrchestratorError::MessageExecutionFailed {
                source_tx,
                reason: format!("prove transaction {} reverted", outcome.tx_hash),
            });
        }
        Ok(())
    }

    async fn finalize(&self, source_tx: B256, pending: &PendingWithdrawal) -> Result<MessageStatus> {
        info!("finalizing withdrawal {}", pending.hash);
        let outcome = transact(
            self.l1.as_ref(),
            self.contracts.portal,
            OptimismPortal::finalizeWithdrawalTransactionCall {
                _tx: pending.withdrawal.clone(),
            },
            U256::ZERO,
        )
        .await?;
        if !outcome.success {
            return Err(OrchestratorError::MessageExecutionFailed {
                source_tx,
                reason: format!("finalize transaction {} reverted", outcome.tx_hash),
            });
        }

        let finalized = decode_first::<OptimismPortal::WithdrawalFinalized>(&outcome.logs, self.contracts.portal)
            .map(|(_, event)| event)
            .filter(|event| event.withdrawalHash == pending.hash);
        match finalized {
            Some(event) => self.finalized_status(pending, Some(event.success)).await,
            None => Ok(MessageStatus::ReadyToFinalize),
        }
    }

    /// Outcome of a withdrawal finalized earlier, by this process or anyone else.
    async fn recorded_finalization(&self, pending: &PendingWithdrawal) -> Result<MessageStatus> {
        let success = self
            .l1
            .logs(self.contracts.portal, OptimismPortal::WithdrawalFinalized::SIGNATURE_HASH, 0)
            .await?
            .into_iter()
            .filter_map(|entry| OptimismPortal::WithdrawalFinalized::decode_log_data(&entry.log.data, true).ok())
            .find(|event| event.withdrawalHash == pending.hash)
            .map(|event| event.success);
        if success.is_none() {
            warn!("no WithdrawalFinalized event found for {}", pending.hash);
        }
        self.finalized_status(pending, success).await
    }

    /// `success` is the portal's verdict on the withdrawal call, when known.
    async fn finalized_status(&self, pending: &PendingWithdrawal, success: Option<bool>) -> Result<MessageStatus> {
        if success == Some(false) {
            warn!("withdrawal {} was finalized but its call reverted", pending.hash);
            return Ok(MessageStatus::Failed);
        }
        // The L1 messenger swallows reverts of the call it relays.
        if self.relay_failed_on_l1(&pending.withdrawal).await? {
            warn!("withdrawal {} was finalized but its message reverted", pending.hash);
            return Ok(MessageStatus::Failed);
        }
        Ok(MessageStatus::Finalized)
    }

    async fn relay_failed_on_l1(&self, withdrawal: &OptimismPortal::WithdrawalTransaction) -> Result<bool> {
        if withdrawal.target != self.contracts.l1_messenger {
            return Ok(false);
        }
        let Ok(relay) = CrossDomainMessenger::relayMessageCall::abi_decode(&withdrawal.data, true) else {
            return Ok(false);
        };
        let message_hash = hash_cross_domain_message(
            relay._nonce,
            relay._sender,
            relay._target,
            relay._value,
            relay._minGasLimit,
            relay._message,
        )?;
        Ok(read(
            self.l1.as_ref(),
            self.contracts.l1_messenger,
            CrossDomainMessenger::failedMessagesCall { _0: message_hash },
        )
        .await?
        ._0)
    }

    /// Start of the challenge window, `None` while the withdrawal still has to be proven.
    async fn challenge_start(&self, pending: &PendingWithdrawal) -> Result<Option<u64>> {
        let l1 = self.l1.as_ref();
        if self.contracts.requires_proof {
            let proven = read(
                l1,
                self.contracts.portal,
                OptimismPortal::provenWithdrawalsCall { _0: pending.hash },
            )
            .await?;
            return Ok((proven.timestamp != 0).then_some(proven.timestamp as u64));
        }

        let oracle = self.contracts.output_oracle;
        let index = read(
            l1,
            oracle,
            L2OutputOracle::getL2OutputIndexAfterCall {
                _l2BlockNumber: U256::from(pending.l2_block),
            },
        )
        .await?
        ._0;
        let output = read(l1, oracle, L2OutputOracle::getL2OutputCall { _l2OutputIndex: index })
            .await?
            ._0;
        Ok(Some(output.timestamp as u64))
    }

    async fn observe_withdrawal(
        &self,
        source_tx: B256,
        current: MessageStatus,
        known: &Mutex<Option<PendingWithdrawal>>,
    ) -> Result<MessageStatus> {
        let cached = lock(known).clone();
        let pending = match cached {
            Some(pending) => pending,
            None => {
                let Some(pending) = self.find_withdrawal(source_tx).await? else {
                    return Ok(MessageStatus::Pending);
                };
                info!("{source_tx} initiated withdrawal {}", pending.hash);
                *lock(known) = Some(pending.clone());
                pending
            }
        };

        let l1 = self.l1.as_ref();
        let portal = self.contracts.portal;
        if read(l1, portal, OptimismPortal::finalizedWithdrawalsCall { _0: pending.hash })
            .await?
            ._0
        {
            return self.recorded_finalization(&pending).await;
        }

        let published = read(l1, self.contracts.output_oracle, L2OutputOracle::latestBlockNumberCall {})
            .await?
            ._0;
        if published < U256::from(pending.l2_block) {
            return Ok(MessageStatus::Pending);
        }

        let Some(started) = self.challenge_start(&pending).await? else {
            if current != MessageStatus::ReadyToProve {
                return Ok(MessageStatus::ReadyToProve);
            }
            self.prove(source_tx, &pending).await?;
            return Ok(MessageStatus::InChallengePeriod);
        };

        let period = read(l1, self.contracts.output_oracle, L2OutputOracle::FINALIZATION_PERIOD_SECONDSCall {})
            .await?
            ._0
            .saturating_to::<u64>();
        let now = self.l1.latest_block().await?.timestamp;
        if now < started.saturating_add(period) {
            return Ok(MessageStatus::InChallengePeriod);
        }
        if current != MessageStatus::ReadyToFinalize {
            return Ok(MessageStatus::ReadyToFinalize);
        }
        self.finalize(source_tx, &pending).await
    }
}
