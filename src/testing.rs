//! In-memory chains and contracts, enough of each to drive deployments,
//! role setup and both messaging families end to end without a node.

use std::{
    any::Any,
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use alloy::{
    primitives::{address, keccak256, Address, Bytes, Log, B256, U256},
    sol,
    sol_types::{SolCall, SolEvent, SolValue},
};
use anyhow::anyhow;
use async_trait::async_trait;

use crate::{
    elements::{
        cross_chain_message::MessageDirection, roles::Role, timelock_action::BridgeExecutor,
        OP_L2_CROSS_DOMAIN_MESSENGER,
    },
    governor::BridgingManager,
    messenger::{
        lock,
        relay::{
            hash_cross_domain_message, hash_withdrawal, output_root, versioned_nonce, CrossDomainMessenger,
            L2OutputOracle, L2ToL1MessagePasser, OptimismPortal, RelayContracts, RelayMessenger,
            L2_TO_L1_MESSAGE_PASSER,
        },
        ticket::{
            ArbRetryableTx, Bridge, Inbox, RetryableTicket, TicketMessenger, ARB_RETRYABLE_TX,
            L1_MESSAGE_TYPE_SUBMIT_RETRYABLE,
        },
    },
    utils::{
        apply_l1_to_l2_alias, compute_selector,
        network::{BlockInfo, ChainClient, EventLog, StorageProof, TxOutcome, TxRequest},
        poll::BackoffPolicy,
    },
};

/// Same account on every mock chain, like one key used against L1 and L2.
pub const SIGNER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
pub const ARB_BRIDGE: Address = address!("8315177ab297ba92a06054ce80a67ed4dbd7ed3a");
const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME: u64 = 12;
const PLACEHOLDER_CODE: [u8; 1] = [0xfe];

sol! {
    contract Recorder {
        function record() external;
    }
}

pub const RECORD_SELECTOR: [u8; 4] = Recorder::recordCall::SELECTOR;

pub fn record_call() -> Bytes {
    Recorder::recordCall {}.abi_encode().into()
}

fn fast_polling() -> BackoffPolicy {
    BackoffPolicy::fixed(Duration::from_secs(5))
}

pub trait MockContract: Any + Send {
    fn handle(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String>;

    /// Logs emitted by the constructor.
    fn initial_logs(&self, _this: Address) -> Vec<Log> {
        vec![]
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

macro_rules! mock_any {
    () => {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    };
}

fn decode<C: SolCall>(data: &[u8]) -> Result<C, String> {
    C::abi_decode(data, true).map_err(|e| format!("bad {} calldata: {e}", C::SIGNATURE))
}

fn selector(data: &[u8]) -> Result<[u8; 4], String> {
    data.get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| "missing selector".to_string())
}

fn unknown(data: &[u8]) -> String {
    format!("unknown selector 0x{}", alloy::hex::encode(data.get(..4).unwrap_or_default()))
}

enum HeldDelivery {
    Ticket(RetryableTicket),
    Relay { sender: Address, to: Address, data: Vec<u8> },
}

struct PendingTicket {
    ticket: RetryableTicket,
    tries: u64,
}

pub struct ChainState {
    block_number: u64,
    timestamp: u64,
    block_times: HashMap<u64, u64>,
    auto_advance: u64,
    base_fee: u128,
    gas_price: u128,
    gas_estimate: u64,
    nonces: HashMap<Address, u64>,
    contracts: HashMap<Address, Box<dyn MockContract>>,
    code: HashMap<Address, Bytes>,
    receipts: HashMap<B256, TxOutcome>,
    logs: Vec<EventLog>,
    pending_logs: Vec<Log>,
    static_call: bool,
    fail_times: HashMap<[u8; 4], usize>,
    failing_targets: HashSet<Address>,
    failing_deploys: usize,
    sent: Vec<TxRequest>,
    system_txs: u64,
    hold: bool,
    held: Vec<HeldDelivery>,
    tickets: HashMap<B256, PendingTicket>,
    fail_ticket_creation: bool,
}

impl ChainState {
    fn new() -> Self {
        Self {
            block_number: 0,
            timestamp: GENESIS_TIMESTAMP,
            block_times: HashMap::from([(0, GENESIS_TIMESTAMP)]),
            auto_advance: 0,
            base_fee: 30_000_000_000,
            gas_price: 100_000_000,
            gas_estimate: 200_000,
            nonces: HashMap::new(),
            contracts: HashMap::new(),
            code: HashMap::new(),
            receipts: HashMap::new(),
            logs: vec![],
            pending_logs: vec![],
            static_call: false,
            fail_times: HashMap::new(),
            failing_targets: HashSet::new(),
            failing_deploys: 0,
            sent: vec![],
            system_txs: 0,
            hold: false,
            held: vec![],
            tickets: HashMap::new(),
            fail_ticket_creation: false,
        }
    }

    fn mine(&mut self, elapsed: u64) {
        self.block_number += 1;
        self.timestamp += elapsed;
        self.block_times.insert(self.block_number, self.timestamp);
        self.pending_logs.clear();
    }

    fn close_tx(&mut self, tx_hash: B256, success: bool, contract_address: Option<Address>) -> TxOutcome {
        let logs = std::mem::take(&mut self.pending_logs);
        let logs = if success { logs } else { vec![] };
        for log in &logs {
            let log_index = self.logs.len() as u64;
            self.logs.push(EventLog {
                block_number: self.block_number,
                log_index,
                log: log.clone(),
            });
        }
        let outcome = TxOutcome {
            tx_hash,
            block_number: self.block_number,
            success,
            contract_address,
            logs,
        };
        self.receipts.insert(tx_hash, outcome.clone());
        outcome
    }

    fn injected_failure(&mut self, to: Address, data: &[u8]) -> Option<String> {
        if self.static_call {
            return None;
        }
        if self.failing_targets.contains(&to) {
            return Some(format!("calls to {to} revert"));
        }
        let key = selector(data).ok()?;
        let left = self.fail_times.get_mut(&key)?;
        if *left == 0 {
            return None;
        }
        *left -= 1;
        Some(format!("injected failure of 0x{}", alloy::hex::encode(key)))
    }

    fn push_log(&mut self, address: Address, event: &impl SolEvent) {
        self.pending_logs.push(Log {
            address,
            data: event.encode_log_data(),
        });
    }
}

fn dispatch(state: &mut ChainState, sender: Address, to: Address, value: U256, data: &[u8]) -> Result<Vec<u8>, String> {
    if let Some(reason) = state.injected_failure(to, data) {
        return Err(reason);
    }
    let Some(mut contract) = state.contracts.remove(&to) else {
        return if data.is_empty() {
            Ok(vec![])
        } else {
            Err(format!("no contract at {to}"))
        };
    };
    let mut env = CallEnv {
        state: &mut *state,
        this: to,
        sender,
        value,
    };
    let result = contract.handle(&mut env, data);
    state.contracts.insert(to, contract);
    result
}

/// Execution context handed to a mock contract.
pub struct CallEnv<'a> {
    state: &'a mut ChainState,
    pub this: Address,
    pub sender: Address,
    pub value: U256,
}

impl CallEnv<'_> {
    /// Nested call from the current contract; its logs are dropped if it reverts.
    pub fn call(&mut self, target: Address, value: U256, data: &[u8]) -> Result<Vec<u8>, String> {
        let mark = self.state.pending_logs.len();
        let result = dispatch(self.state, self.this, target, value, data);
        if result.is_err() {
            self.state.pending_logs.truncate(mark);
        }
        result
    }

    pub fn emit(&mut self, event: &impl SolEvent) {
        self.state.push_log(self.this, event);
    }

    pub fn emit_from(&mut self, address: Address, event: &impl SolEvent) {
        self.state.push_log(address, event);
    }

    pub fn timestamp(&self) -> u64 {
        self.state.timestamp
    }

    pub fn base_fee(&self) -> U256 {
        U256::from(self.state.base_fee)
    }
}

pub struct MockChain {
    label: String,
    chain_id: u64,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(label: &str, chain_id: u64) -> Self {
        Self {
            label: label.to_string(),
            chain_id,
            state: Mutex::new(ChainState::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        lock(&self.state)
    }

    pub fn set_nonce(&self, account: Address, nonce: u64) {
        self.state().nonces.insert(account, nonce);
    }

    pub fn install<C: MockContract>(&self, address: Address, contract: C) {
        let mut state = self.state();
        let block_number = state.block_number;
        for log in contract.initial_logs(address) {
            let log_index = state.logs.len() as u64;
            state.logs.push(EventLog {
                block_number,
                log_index,
                log,
            });
        }
        state.code.insert(address, Bytes::from_static(&PLACEHOLDER_CODE));
        state.contracts.insert(address, Box::new(contract));
    }

    pub fn inspect<C: MockContract, R>(&self, address: Address, f: impl FnOnce(&C) -> R) -> R {
        let state = self.state();
        let contract = state
            .contracts
            .get(&address)
            .and_then(|contract| contract.as_any().downcast_ref::<C>())
            .expect("no mock contract of that type installed");
        f(contract)
    }

    pub fn inspect_mut<C: MockContract, R>(&self, address: Address, f: impl FnOnce(&mut C) -> R) -> R {
        let mut state = self.state();
        let contract = state
            .contracts
            .get_mut(&address)
            .and_then(|contract| contract.as_any_mut().downcast_mut::<C>())
            .expect("no mock contract of that type installed");
        f(contract)
    }

    /// Init code a deployment was sent with.
    pub fn deployed_code(&self, address: Address) -> Option<Bytes> {
        self.state().code.get(&address).cloned()
    }

    /// Transactions sent by the signer, reverted ones included.
    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }

    pub fn sent_to(&self, to: Address) -> usize {
        self.state().sent.iter().filter(|tx| tx.to == Some(to)).count()
    }

    /// The next call with this selector reverts. Calls add up.
    pub fn fail_next(&self, selector: [u8; 4]) {
        *self.state().fail_times.entry(selector).or_default() += 1;
    }

    pub fn fail_calls_to(&self, target: Address) {
        self.state().failing_targets.insert(target);
    }

    pub fn fail_next_deploy(&self) {
        self.state().failing_deploys += 1;
    }

    pub fn set_gas_price(&self, gas_price: u128) {
        self.state().gas_price = gas_price;
    }

    pub fn set_gas_estimate(&self, gas: u64) {
        self.state().gas_estimate = gas;
    }

    /// Every `latest_block` query mines an empty block this many seconds later.
    pub fn set_auto_advance(&self, seconds: u64) {
        self.state().auto_advance = seconds;
    }

    pub fn advance_time(&self, seconds: u64) {
        self.state().mine(seconds);
    }

    pub fn timestamp(&self) -> u64 {
        self.state().timestamp
    }

    pub fn block_number(&self) -> u64 {
        self.state().block_number
    }

    pub fn hold_deliveries(&self) {
        self.state().hold = true;
    }

    pub fn release_deliveries(&self) {
        let held = {
            let mut state = self.state();
            state.hold = false;
            std::mem::take(&mut state.held)
        };
        for delivery in held {
            match delivery {
                HeldDelivery::Ticket(ticket) => self.create_retryable(ticket),
                HeldDelivery::Relay { sender, to, data } => self.relay_message(sender, to, data),
            }
        }
    }

    pub fn fail_ticket_creation(&self) {
        self.state().fail_ticket_creation = true;
    }

    pub fn block_info(&self, number: u64) -> BlockInfo {
        let state = self.state();
        self.block_info_in(&state, number)
    }

    fn block_info_in(&self, state: &ChainState, number: u64) -> BlockInfo {
        BlockInfo {
            number,
            hash: keccak256(format!("{}/block/{number}", self.label)),
            state_root: keccak256(format!("{}/state/{number}", self.label)),
            timestamp: state
                .block_times
                .get(&number)
                .copied()
                .unwrap_or(GENESIS_TIMESTAMP + number * BLOCK_TIME),
            base_fee: state.base_fee,
        }
    }

    pub fn storage_hash(&self, address: Address, block: u64) -> B256 {
        keccak256(format!("{}/storage/{address}/{block}", self.label))
    }

    fn system_tx_hash(&self, state: &mut ChainState, data: &[u8]) -> B256 {
        state.system_txs += 1;
        keccak256(format!("{}/system/{}/{}", self.label, state.system_txs, alloy::hex::encode(data)))
    }

    /// L2 side of an L1 inbox submission: creates the ticket and auto-redeems
    /// it when the bid covers the current L2 gas.
    pub fn create_retryable(&self, ticket: RetryableTicket) {
        let mut state = self.state();
        if state.hold {
            state.held.push(HeldDelivery::Ticket(ticket));
            return;
        }

        let id = ticket.id();
        state.mine(BLOCK_TIME);
        if state.fail_ticket_creation {
            state.close_tx(id, false, None);
            return;
        }

        let auto_redeem = ticket.gas_limit >= U256::from(state.gas_estimate)
            && ticket.max_fee_per_gas >= U256::from(state.gas_price);
        state.tickets.insert(id, PendingTicket { ticket, tries: 0 });
        if auto_redeem {
            Self::schedule_retry(&mut state, id);
        }
        state.close_tx(id, true, None);
    }

    /// Runs one retry of the ticket as its own transaction in the current block.
    fn schedule_retry(state: &mut ChainState, id: B256) -> Option<B256> {
        let PendingTicket { ticket, tries } = state.tickets.remove(&id)?;
        let tries = tries + 1;
        let retry_tx = keccak256((id, U256::from(tries)).abi_encode());

        let outer = std::mem::take(&mut state.pending_logs);
        let result = dispatch(state, ticket.from, ticket.to, ticket.l2_call_value, &ticket.data);
        let success = result.is_ok();
        state.close_tx(retry_tx, success, None);
        state.pending_logs = outer;

        if !success {
            state.tickets.insert(id, PendingTicket { ticket, tries });
        }
        state.push_log(
            ARB_RETRYABLE_TX,
            &ArbRetryableTx::RedeemScheduled {
                ticketId: id,
                retryTxHash: retry_tx,
                sequenceNum: tries,
                donatedGas: 0,
                gasDonor: Address::ZERO,
                maxRefund: U256::ZERO,
                submissionFeeRefund: U256::ZERO,
            },
        );
        Some(retry_tx)
    }

    /// L2 side of a messenger deposit.
    pub fn relay_message(&self, sender: Address, to: Address, data: Vec<u8>) {
        let mut state = self.state();
        if state.hold {
            state.held.push(HeldDelivery::Relay { sender, to, data });
            return;
        }
        state.mine(BLOCK_TIME);
        let success = dispatch(&mut state, sender, to, U256::ZERO, &data).is_ok();
        let tx_hash = self.system_tx_hash(&mut state, &data);
        state.close_tx(tx_hash, success, None);
    }

    fn execute(&self, state: &mut ChainState, tx: &TxRequest, nonce: u64) -> (bool, Option<Address>) {
        let Some(to) = tx.to else {
            if state.failing_deploys > 0 {
                state.failing_deploys -= 1;
                return (false, None);
            }
            let address = SIGNER.create(nonce);
            state.code.insert(address, tx.data.clone());
            return (true, Some(address));
        };

        if to == ARB_RETRYABLE_TX {
            if state.injected_failure(to, &tx.data).is_some() {
                return (false, None);
            }
            let Ok(redeem) = ArbRetryableTx::redeemCall::abi_decode(&tx.data, true) else {
                return (false, None);
            };
            return (Self::schedule_retry(state, redeem.ticketId).is_some(), None);
        }

        (dispatch(state, SIGNER, to, tx.value, &tx.data).is_ok(), None)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn label(&self) -> &str {
        &self.label
    }

    fn signer_address(&self) -> Address {
        SIGNER
    }

    async fn chain_id(&self) -> anyhow::Result<u64> {
        Ok(self.chain_id)
    }

    async fn transaction_count(&self, account: Address) -> anyhow::Result<u64> {
        Ok(self.state().nonces.get(&account).copied().unwrap_or_default())
    }

    async fn send(&self, tx: TxRequest) -> anyhow::Result<TxOutcome> {
        let mut state = self.state();
        let nonce = state.nonces.get(&SIGNER).copied().unwrap_or_default();
        state.nonces.insert(SIGNER, nonce + 1);
        state.sent.push(tx.clone());
        state.mine(BLOCK_TIME);

        let tx_hash = keccak256(format!("{}/tx/{}", self.label, state.sent.len()));
        let (success, contract_address) = self.execute(&mut state, &tx, nonce);
        Ok(state.close_tx(tx_hash, success, contract_address))
    }

    async fn call(&self, to: Address, data: Bytes) -> anyhow::Result<Bytes> {
        let mut state = self.state();
        let outer = std::mem::take(&mut state.pending_logs);
        state.static_call = true;
        let result = dispatch(&mut state, SIGNER, to, U256::ZERO, &data);
        state.static_call = false;
        state.pending_logs = outer;
        result
            .map(Bytes::from)
            .map_err(|reason| anyhow!("execution reverted: {reason}"))
    }

    async fn estimate_gas(&self, _from: Address, _tx: &TxRequest) -> anyhow::Result<u64> {
        Ok(self.state().gas_estimate)
    }

    async fn gas_price(&self) -> anyhow::Result<u128> {
        Ok(self.state().gas_price)
    }

    async fn latest_block(&self) -> anyhow::Result<BlockInfo> {
        let mut state = self.state();
        if state.auto_advance > 0 {
            let elapsed = state.auto_advance;
            state.mine(elapsed);
        }
        let number = state.block_number;
        Ok(self.block_info_in(&state, number))
    }

    async fn block(&self, number: u64) -> anyhow::Result<Option<BlockInfo>> {
        let state = self.state();
        Ok((number <= state.block_number).then(|| self.block_info_in(&state, number)))
    }

    async fn receipt(&self, tx_hash: B256) -> anyhow::Result<Option<TxOutcome>> {
        Ok(self.state().receipts.get(&tx_hash).cloned())
    }

    async fn logs(&self, address: Address, topic0: B256, from_block: u64) -> anyhow::Result<Vec<EventLog>> {
        Ok(self
            .state()
            .logs
            .iter()
            .filter(|entry| entry.block_number >= from_block)
            .filter(|entry| entry.log.address == address && entry.log.topics().first() == Some(&topic0))
            .cloned()
            .collect())
    }

    async fn storage_proof(&self, address: Address, slot: B256, block: u64) -> anyhow::Result<StorageProof> {
        Ok(StorageProof {
            storage_hash: self.storage_hash(address, block),
            proof: vec![Bytes::copy_from_slice(slot.as_slice())],
        })
    }
}

#[derive(Debug, Default)]
pub struct MockRecorder {
    calls: usize,
}

impl MockRecorder {
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl MockContract for MockRecorder {
    fn handle(&mut self, _env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        decode::<Recorder::recordCall>(data)?;
        self.calls += 1;
        Ok(vec![])
    }

    mock_any!();
}

/// Role-gated bridge switches with OpenZeppelin access control.
pub struct MockBridge {
    initial_admin: Address,
    roles: HashMap<B256, BTreeSet<Address>>,
    deposits_enabled: bool,
    withdrawals_enabled: bool,
    min_admins_seen: usize,
}

impl MockBridge {
    pub fn new(admin: Address) -> Self {
        Self {
            initial_admin: admin,
            roles: HashMap::from([(Role::Admin.id(), BTreeSet::from([admin]))]),
            deposits_enabled: false,
            withdrawals_enabled: false,
            min_admins_seen: 1,
        }
    }

    /// Fewest admins the bridge ever had after its construction.
    pub fn min_admins_seen(&self) -> usize {
        self.min_admins_seen
    }

    pub fn set_withdrawals_enabled(&mut self, enabled: bool) {
        self.withdrawals_enabled = enabled;
    }

    fn has(&self, role: B256, account: Address) -> bool {
        self.roles.get(&role).is_some_and(|holders| holders.contains(&account))
    }

    fn require(&self, role: Role, account: Address) -> Result<(), String> {
        if self.has(role.id(), account) {
            Ok(())
        } else {
            Err(format!("{account} is missing role {role}"))
        }
    }

    fn remove(&mut self, env: &mut CallEnv<'_>, role: B256, account: Address) {
        let removed = self.roles.get_mut(&role).is_some_and(|holders| holders.remove(&account));
        if removed {
            env.emit(&BridgingManager::RoleRevoked {
                role,
                account,
                sender: env.sender,
            });
        }
        let admins = self.roles.get(&Role::Admin.id()).map_or(0, BTreeSet::len);
        self.min_admins_seen = self.min_admins_seen.min(admins);
    }

    fn toggle(flag: &mut bool, wanted: bool) -> Result<Vec<u8>, String> {
        if *flag == wanted {
            return Err(format!("already {}", if wanted { "enabled" } else { "disabled" }));
        }
        *flag = wanted;
        Ok(vec![])
    }
}

impl MockContract for MockBridge {
    fn handle(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let sel = selector(data)?;
        let sender = env.sender;

        if sel == BridgingManager::grantRoleCall::SELECTOR {
            let call = decode::<BridgingManager::grantRoleCall>(data)?;
            self.require(Role::Admin, sender)?;
            if self.roles.entry(call.role).or_default().insert(call.account) {
                env.emit(&BridgingManager::RoleGranted {
                    role: call.role,
                    account: call.account,
                    sender,
                });
            }
            Ok(vec![])
        } else if sel == BridgingManager::revokeRoleCall::SELECTOR {
            let call = decode::<BridgingManager::revokeRoleCall>(data)?;
            self.require(Role::Admin, sender)?;
            self.remove(env, call.role, call.account);
            Ok(vec![])
        } else if sel == BridgingManager::renounceRoleCall::SELECTOR {
            let call = decode::<BridgingManager::renounceRoleCall>(data)?;
            if call.account != sender {
                return Err("can only renounce roles for self".to_string());
            }
            self.remove(env, call.role, call.account);
            Ok(vec![])
        } else if sel == BridgingManager::hasRoleCall::SELECTOR {
            let call = decode::<BridgingManager::hasRoleCall>(data)?;
            Ok(self.has(call.role, call.account).abi_encode())
        } else if sel == BridgingManager::enableDepositsCall::SELECTOR {
            self.require(Role::DepositsEnabler, sender)?;
            Self::toggle(&mut self.deposits_enabled, true)
        } else if sel == BridgingManager::disableDepositsCall::SELECTOR {
            self.require(Role::DepositsDisabler, sender)?;
            Self::toggle(&mut self.deposits_enabled, false)
        } else if sel == BridgingManager::enableWithdrawalsCall::SELECTOR {
            self.require(Role::WithdrawalsEnabler, sender)?;
            Self::toggle(&mut self.withdrawals_enabled, true)
        } else if sel == BridgingManager::disableWithdrawalsCall::SELECTOR {
            self.require(Role::WithdrawalsDisabler, sender)?;
            Self::toggle(&mut self.withdrawals_enabled, false)
        } else if sel == BridgingManager::isDepositsEnabledCall::SELECTOR {
            Ok(self.deposits_enabled.abi_encode())
        } else if sel == BridgingManager::isWithdrawalsEnabledCall::SELECTOR {
            Ok(self.withdrawals_enabled.abi_encode())
        } else {
            Err(unknown(data))
        }
    }

    fn initial_logs(&self, this: Address) -> Vec<Log> {
        let granted = BridgingManager::RoleGranted {
            role: Role::Admin.id(),
            account: self.initial_admin,
            sender: self.initial_admin,
        };
        vec![Log {
            address: this,
            data: granted.encode_log_data(),
        }]
    }

    mock_any!();
}

/// `InboxMessageDelivered` payload of a retryable submission.
pub fn inbox_message_data(ticket: &RetryableTicket) -> Vec<u8> {
    let mut data = Vec::with_capacity(9 * 32 + ticket.data.len());
    data.extend_from_slice(ticket.to.into_word().as_slice());
    data.extend_from_slice(&ticket.l2_call_value.to_be_bytes::<32>());
    data.extend_from_slice(&ticket.deposit.to_be_bytes::<32>());
    data.extend_from_slice(&ticket.max_submission_cost.to_be_bytes::<32>());
    data.extend_from_slice(ticket.excess_fee_refund_address.into_word().as_slice());
    data.extend_from_slice(ticket.call_value_refund_address.into_word().as_slice());
    data.extend_from_slice(&ticket.gas_limit.to_be_bytes::<32>());
    data.extend_from_slice(&ticket.max_fee_per_gas.to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(ticket.data.len()).to_be_bytes::<32>());
    data.extend_from_slice(&ticket.data);
    data
}

pub struct MockInbox {
    l2: Arc<MockChain>,
    next_message: u64,
}

impl MockInbox {
    pub fn new(l2: Arc<MockChain>) -> Self {
        Self { l2, next_message: 1_000 }
    }

    fn submission_fee(data_length: U256, base_fee: U256) -> U256 {
        (U256::from(1400) + U256::from(6) * data_length) * base_fee
    }
}

impl MockContract for MockInbox {
    fn handle(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let sel = selector(data)?;
        if sel == Inbox::calculateRetryableSubmissionFeeCall::SELECTOR {
            let call = decode::<Inbox::calculateRetryableSubmissionFeeCall>(data)?;
            return Ok(Self::submission_fee(call.dataLength, call.baseFee).abi_encode());
        }
        if sel != Inbox::createRetryableTicketCall::SELECTOR {
            return Err(unknown(data));
        }

        let call = decode::<Inbox::createRetryableTicketCall>(data)?;
        let base_fee = env.base_fee();
        if call.maxSubmissionCost < Self::submission_fee(U256::from(call.data.len()), base_fee) {
            return Err("insufficient submission cost".to_string());
        }
        let required = call.l2CallValue + call.maxSubmissionCost + call.gasLimit * call.maxFeePerGas;
        if env.value < required {
            return Err(format!("insufficient value {} < {required}", env.value));
        }

        let message_number = U256::from(self.next_message);
        self.next_message += 1;
        let ticket = RetryableTicket {
            chain_id: self.l2.chain_id,
            message_number,
            from: apply_l1_to_l2_alias(env.sender),
            l1_base_fee: base_fee,
            deposit: env.value,
            to: call.to,
            l2_call_value: call.l2CallValue,
            call_value_refund_address: call.callValueRefundAddress,
            max_submission_cost: call.maxSubmissionCost,
            excess_fee_refund_address: call.excessFeeRefundAddress,
            gas_limit: call.gasLimit,
            max_fee_per_gas: call.maxFeePerGas,
            data: call.data,
        };
        let payload = inbox_message_data(&ticket);

        env.emit_from(
            ARB_BRIDGE,
            &Bridge::MessageDelivered {
                messageIndex: message_number,
                beforeInboxAcc: B256::ZERO,
                inbox: env.this,
                kind: L1_MESSAGE_TYPE_SUBMIT_RETRYABLE,
                sender: ticket.from,
                messageDataHash: keccak256(&payload),
                baseFeeL1: base_fee,
                timestamp: env.timestamp(),
            },
        );
        env.emit(&Inbox::InboxMessageDelivered {
            messageNum: message_number,
            data: payload.into(),
        });

        self.l2.create_retryable(ticket);
        Ok(message_number.abi_encode())
    }

    mock_any!();
}

/// Timelocked executor accepting queues from a single cross-chain caller.
pub struct MockExecutor {
    authorized: Address,
    delay: u64,
    grace_period: u64,
    sets: Vec<BridgeExecutor::ActionsSet>,
}

impl MockExecutor {
    pub fn new(authorized: Address, delay: u64, grace_period: u64) -> Self {
        Self {
            authorized,
            delay,
            grace_period,
            sets: vec![],
        }
    }

    pub fn cancel(&mut self, id: usize) {
        if let Some(set) = self.sets.get_mut(id) {
            set.canceled = true;
        }
    }

    fn execute(&mut self, env: &mut CallEnv<'_>, id: U256) -> Result<Vec<u8>, String> {
        let index = id.saturating_to::<usize>();
        let set = self.sets.get(index).cloned().ok_or("unknown actions set")?;
        if set.executed || set.canceled {
            return Err("actions set is not queued".to_string());
        }
        let execution_time = set.executionTime.saturating_to::<u64>();
        let now = env.timestamp();
        if now < execution_time {
            return Err("timelock not finished".to_string());
        }
        if now > execution_time + self.grace_period {
            return Err("actions set expired".to_string());
        }

        let mut returned = vec![];
        for (i, target) in set.targets.iter().enumerate() {
            let mut call = vec![];
            if !set.signatures[i].is_empty() {
                call.extend_from_slice(&compute_selector(&set.signatures[i]));
            }
            call.extend_from_slice(&set.calldatas[i]);
            returned.push(Bytes::from(env.call(*target, set.values[i], &call)?));
        }

        self.sets[index].executed = true;
        env.emit(&BridgeExecutor::ActionsSetExecuted {
            id,
            initiatorExecution: env.sender,
            returnedData: returned,
        });
        Ok(vec![])
    }
}

impl MockContract for MockExecutor {
    fn handle(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let sel = selector(data)?;
        if sel == BridgeExecutor::queueCall::SELECTOR {
            let call = decode::<BridgeExecutor::queueCall>(data)?;
            if env.sender != self.authorized {
                return Err(format!("{} may not queue", env.sender));
            }
            let id = U256::from(self.sets.len());
            let execution_time = U256::from(env.timestamp() + self.delay);
            env.emit(&BridgeExecutor::ActionsSetQueued {
                id,
                targets: call.targets.clone(),
                values: call.values.clone(),
                signatures: call.signatures.clone(),
                calldatas: call.calldatas.clone(),
                withDelegatecalls: call.withDelegatecalls.clone(),
                executionTime: execution_time,
            });
            self.sets.push(BridgeExecutor::ActionsSet {
                targets: call.targets,
                values: call.values,
                signatures: call.signatures,
                calldatas: call.calldatas,
                withDelegatecalls: call.withDelegatecalls,
                executionTime: execution_time,
                executed: false,
                canceled: false,
            });
            Ok(vec![])
        } else if sel == BridgeExecutor::executeCall::SELECTOR {
            let call = decode::<BridgeExecutor::executeCall>(data)?;
            self.execute(env, call.actionsSetId)
        } else if sel == BridgeExecutor::getActionsSetCountCall::SELECTOR {
            Ok(U256::from(self.sets.len()).abi_encode())
        } else if sel == BridgeExecutor::getActionsSetByIdCall::SELECTOR {
            let call = decode::<BridgeExecutor::getActionsSetByIdCall>(data)?;
            let set = self
                .sets
                .get(call.actionsSetId.saturating_to::<usize>())
                .ok_or("unknown actions set")?;
            Ok(set.abi_encode())
        } else if sel == BridgeExecutor::getDelayCall::SELECTOR {
            Ok(U256::from(self.delay).abi_encode())
        } else if sel == BridgeExecutor::getGracePeriodCall::SELECTOR {
            Ok(U256::from(self.grace_period).abi_encode())
        } else {
            Err(unknown(data))
        }
    }

    mock_any!();
}

fn relay_hash(call: &CrossDomainMessenger::relayMessageCall) -> Result<B256, String> {
    hash_cross_domain_message(
        call._nonce,
        call._sender,
        call._target,
        call._value,
        call._minGasLimit,
        call._message.clone(),
    )
    .map_err(|e| e.to_string())
}

/// Bookkeeping shared by both messenger ends.
#[derive(Default)]
struct MessengerLedger {
    nonce: u64,
    successful: HashSet<B256>,
    failed: HashSet<B256>,
}

impl MessengerLedger {
    /// Emits the sent events and returns the call the other side relays.
    fn send(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let call = decode::<CrossDomainMessenger::sendMessageCall>(data)?;
        let nonce = versioned_nonce(1, self.nonce);
        self.nonce += 1;
        env.emit(&CrossDomainMessenger::SentMessage {
            target: call._target,
            sender: env.sender,
            message: call._message.clone(),
            messageNonce: nonce,
            gasLimit: U256::from(call._minGasLimit),
        });
        env.emit(&CrossDomainMessenger::SentMessageExtension1 {
            sender: env.sender,
            value: env.value,
        });
        Ok(CrossDomainMessenger::relayMessageCall {
            _nonce: nonce,
            _sender: env.sender,
            _target: call._target,
            _value: env.value,
            _minGasLimit: U256::from(call._minGasLimit),
            _message: call._message,
        }
        .abi_encode())
    }

    /// Runs a relayed message, recording a revert instead of propagating it.
    fn relay(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let call = decode::<CrossDomainMessenger::relayMessageCall>(data)?;
        let hash = relay_hash(&call)?;
        if self.successful.contains(&hash) {
            return Err("message already relayed".to_string());
        }
        if env.call(call._target, call._value, &call._message).is_ok() {
            self.successful.insert(hash);
            env.emit(&CrossDomainMessenger::RelayedMessage { msgHash: hash });
        } else {
            self.failed.insert(hash);
            env.emit(&CrossDomainMessenger::FailedRelayedMessage { msgHash: hash });
        }
        Ok(vec![])
    }

    fn view(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let sel = selector(data)?;
        if sel == CrossDomainMessenger::successfulMessagesCall::SELECTOR {
            let call = decode::<CrossDomainMessenger::successfulMessagesCall>(data)?;
            Ok(self.successful.contains(&call._0).abi_encode())
        } else if sel == CrossDomainMessenger::failedMessagesCall::SELECTOR {
            let call = decode::<CrossDomainMessenger::failedMessagesCall>(data)?;
            Ok(self.failed.contains(&call._0).abi_encode())
        } else {
            Err(unknown(data))
        }
    }
}

pub struct MockL1Messenger {
    l2: Arc<MockChain>,
    l2_messenger: Address,
    portal: Address,
    ledger: MessengerLedger,
}

impl MockL1Messenger {
    pub fn new(l2: Arc<MockChain>, l2_messenger: Address, portal: Address) -> Self {
        Self {
            l2,
            l2_messenger,
            portal,
            ledger: MessengerLedger::default(),
        }
    }
}

impl MockContract for MockL1Messenger {
    fn handle(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let sel = selector(data)?;
        if sel == CrossDomainMessenger::sendMessageCall::SELECTOR {
            let relay = self.ledger.send(env, data)?;
            self.l2
                .relay_message(apply_l1_to_l2_alias(env.this), self.l2_messenger, relay);
            Ok(vec![])
        } else if sel == CrossDomainMessenger::relayMessageCall::SELECTOR {
            if env.sender != self.portal {
                return Err("only the portal relays on L1".to_string());
            }
            self.ledger.relay(env, data)
        } else {
            self.ledger.view(data)
        }
    }

    mock_any!();
}

pub struct MockL2Messenger {
    l1_messenger: Address,
    ledger: MessengerLedger,
}

impl MockL2Messenger {
    pub fn new(l1_messenger: Address) -> Self {
        Self {
            l1_messenger,
            ledger: MessengerLedger::default(),
        }
    }
}

impl MockContract for MockL2Messenger {
    fn handle(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let sel = selector(data)?;
        if sel == CrossDomainMessenger::sendMessageCall::SELECTOR {
            let gas_limit = decode::<CrossDomainMessenger::sendMessageCall>(data)?._minGasLimit;
            let relay = self.ledger.send(env, data)?;
            let withdrawal = L2ToL1MessagePasser::initiateWithdrawalCall {
                _target: self.l1_messenger,
                _gasLimit: U256::from(gas_limit),
                _data: relay.into(),
            };
            let value = env.value;
            env.call(L2_TO_L1_MESSAGE_PASSER, value, &withdrawal.abi_encode())?;
            Ok(vec![])
        } else if sel == CrossDomainMessenger::relayMessageCall::SELECTOR {
            if env.sender != apply_l1_to_l2_alias(self.l1_messenger) {
                return Err("only the aliased L1 messenger relays on L2".to_string());
            }
            self.ledger.relay(env, data)
        } else {
            self.ledger.view(data)
        }
    }

    mock_any!();
}

#[derive(Default)]
pub struct MockMessagePasser {
    nonce: u64,
}

impl MockContract for MockMessagePasser {
    fn handle(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let call = decode::<L2ToL1MessagePasser::initiateWithdrawalCall>(data)?;
        let withdrawal = OptimismPortal::WithdrawalTransaction {
            nonce: versioned_nonce(1, self.nonce),
            sender: env.sender,
            target: call._target,
            value: env.value,
            gasLimit: call._gasLimit,
            data: call._data,
        };
        self.nonce += 1;
        let withdrawal_hash = hash_withdrawal(&withdrawal);
        env.emit(&L2ToL1MessagePasser::MessagePassed {
            nonce: withdrawal.nonce,
            sender: withdrawal.sender,
            target: withdrawal.target,
            value: withdrawal.value,
            gasLimit: withdrawal.gasLimit,
            data: withdrawal.data,
            withdrawalHash: withdrawal_hash,
        });
        Ok(vec![])
    }

    mock_any!();
}

type Outputs = Arc<Mutex<Vec<L2OutputOracle::OutputProposal>>>;

pub struct MockOutputOracle {
    outputs: Outputs,
    finalization_period: u64,
}

impl MockContract for MockOutputOracle {
    fn handle(&mut self, _env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let sel = selector(data)?;
        let outputs = lock(&self.outputs);
        if sel == L2OutputOracle::latestBlockNumberCall::SELECTOR {
            let latest = outputs.last().map_or(0, |output| output.l2BlockNumber);
            Ok(U256::from(latest).abi_encode())
        } else if sel == L2OutputOracle::getL2OutputIndexAfterCall::SELECTOR {
            let call = decode::<L2OutputOracle::getL2OutputIndexAfterCall>(data)?;
            let index = outputs
                .iter()
                .position(|output| U256::from(output.l2BlockNumber) >= call._l2BlockNumber)
                .ok_or("block not yet proposed")?;
            Ok(U256::from(index).abi_encode())
        } else if sel == L2OutputOracle::getL2OutputCall::SELECTOR {
            let call = decode::<L2OutputOracle::getL2OutputCall>(data)?;
            let output = outputs
                .get(call._l2OutputIndex.saturating_to::<usize>())
                .ok_or("unknown output")?;
            Ok(output.abi_encode())
        } else if sel == L2OutputOracle::FINALIZATION_PERIOD_SECONDSCall::SELECTOR {
            Ok(U256::from(self.finalization_period).abi_encode())
        } else {
            Err(unknown(data))
        }
    }

    mock_any!();
}

pub struct MockPortal {
    outputs: Outputs,
    finalization_period: u64,
    requires_proof: bool,
    proven: HashMap<B256, (B256, u128, u128)>,
    finalized: HashSet<B256>,
}

impl MockPortal {
    fn window_start(&self, hash: B256) -> Result<u64, String> {
        if self.requires_proof {
            return self
                .proven
                .get(&hash)
                .map(|(_, timestamp, _)| *timestamp as u64)
                .ok_or_else(|| "withdrawal not proven".to_string());
        }
        lock(&self.outputs)
            .last()
            .map(|output| output.timestamp as u64)
            .ok_or_else(|| "no output proposed".to_string())
    }
}

impl MockContract for MockPortal {
    fn handle(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<Vec<u8>, String> {
        let sel = selector(data)?;
        if sel == OptimismPortal::proveWithdrawalTransactionCall::SELECTOR {
            let call = decode::<OptimismPortal::proveWithdrawalTransactionCall>(data)?;
            let index = call._l2OutputIndex.saturating_to::<usize>();
            let root = lock(&self.outputs)
                .get(index)
                .map(|output| output.outputRoot)
                .ok_or("unknown output")?;
            if output_root(&call._outputRootProof) != root {
                return Err("invalid output root proof".to_string());
            }
            if call._withdrawalProof.is_empty() {
                return Err("invalid withdrawal inclusion proof".to_string());
            }
            let hash = hash_withdrawal(&call._tx);
            self.proven
                .insert(hash, (root, env.timestamp() as u128, index as u128));
            env.emit(&OptimismPortal::WithdrawalProven {
                withdrawalHash: hash,
                from: call._tx.sender,
                to: call._tx.target,
            });
            Ok(vec![])
        } else if sel == OptimismPortal::finalizeWithdrawalTransactionCall::SELECTOR {
            let call = decode::<OptimismPortal::finalizeWithdrawalTransactionCall>(data)?;
            let hash = hash_withdrawal(&call._tx);
            if self.finalized.contains(&hash) {
                return Err("withdrawal already finalized".to_string());
            }
            if env.timestamp() < self.window_start(hash)? + self.finalization_period {
                return Err("proven withdrawal finalization period has not elapsed".to_string());
            }
            self.finalized.insert(hash);
            let success = env.call(call._tx.target, call._tx.value, &call._tx.data).is_ok();
            env.emit(&OptimismPortal::WithdrawalFinalized {
                withdrawalHash: hash,
                success,
            });
            Ok(vec![])
        } else if sel == OptimismPortal::provenWithdrawalsCall::SELECTOR {
            let call = decode::<OptimismPortal::provenWithdrawalsCall>(data)?;
            let proven = self.proven.get(&call._0).copied().unwrap_or_default();
            Ok(proven.abi_encode())
        } else if sel == OptimismPortal::finalizedWithdrawalsCall::SELECTOR {
            let call = decode::<OptimismPortal::finalizedWithdrawalsCall>(data)?;
            Ok(self.finalized.contains(&call._0).abi_encode())
        } else {
            Err(unknown(data))
        }
    }

    mock_any!();
}

pub const EXECUTOR_DELAY: u64 = 3_600;
pub const EXECUTOR_GRACE_PERIOD: u64 = 2 * 86_400;

/// L1 and an Arbitrum-style L2 with an inbox, a call recorder and a timelock executor.
pub struct TicketFixture {
    pub l1: Arc<MockChain>,
    pub l2: Arc<MockChain>,
    pub inbox: Address,
    pub recorder: Address,
    pub executor: Address,
}

impl TicketFixture {
    pub fn new() -> Self {
        let l1 = Arc::new(MockChain::new("l1", 1));
        let l2 = Arc::new(MockChain::new("l2", 42161));
        let inbox = address!("4dbd4fc535ac27206064b68ffcf827b0a60bab3f");
        let recorder = address!("00000000000000000000000000000000000ac710");
        let executor = address!("00000000000000000000000000000000000e1ec0");

        l1.install(inbox, MockInbox::new(l2.clone()));
        l2.install(recorder, MockRecorder::default());
        l2.install(
            executor,
            MockExecutor::new(apply_l1_to_l2_alias(SIGNER), EXECUTOR_DELAY, EXECUTOR_GRACE_PERIOD),
        );

        Self {
            l1,
            l2,
            inbox,
            recorder,
            executor,
        }
    }

    pub fn messenger(&self) -> TicketMessenger {
        TicketMessenger::new(self.l1.clone(), self.l2.clone(), self.inbox).with_backoff(fast_polling())
    }

    pub fn redeem_count(&self) -> usize {
        self.l2.sent_to(ARB_RETRYABLE_TX)
    }

    pub fn recorded_calls(&self) -> usize {
        self.l2.inspect(self.recorder, |recorder: &MockRecorder| recorder.calls())
    }
}

pub const FINALIZATION_PERIOD: u64 = 7 * 86_400;

/// L1 and an Optimism-style L2 wired through both messengers.
pub struct RelayFixture {
    pub l1: Arc<MockChain>,
    pub l2: Arc<MockChain>,
    pub contracts: RelayContracts,
    pub l1_recorder: Address,
    pub l2_recorder: Address,
    outputs: Outputs,
}

impl RelayFixture {
    pub fn new() -> Self {
        Self::build(true)
    }

    pub fn new_without_proofs() -> Self {
        Self::build(false)
    }

    fn build(requires_proof: bool) -> Self {
        let l1 = Arc::new(MockChain::new("l1", 1));
        let l2 = Arc::new(MockChain::new("l2", 10));
        let contracts = RelayContracts {
            l1_messenger: address!("25ace71c97b33cc4729cf772ae268934f7ab5fa1"),
            l2_messenger: OP_L2_CROSS_DOMAIN_MESSENGER,
            portal: address!("beb5fc579115071764c7423a4f12edde41f106ed"),
            output_oracle: address!("dfe97868233d1aa22e815a266982f2cf17685a27"),
            requires_proof,
        };
        let l1_recorder = address!("00000000000000000000000000000000000ac711");
        let l2_recorder = address!("00000000000000000000000000000000000ac712");
        let outputs: Outputs = Arc::default();

        l1.install(
            contracts.l1_messenger,
            MockL1Messenger::new(l2.clone(), contracts.l2_messenger, contracts.portal),
        );
        l1.install(
            contracts.output_oracle,
            MockOutputOracle {
                outputs: outputs.clone(),
                finalization_period: FINALIZATION_PERIOD,
            },
        );
        l1.install(
            contracts.portal,
            MockPortal {
                outputs: outputs.clone(),
                finalization_period: FINALIZATION_PERIOD,
                requires_proof,
                proven: HashMap::new(),
                finalized: HashSet::new(),
            },
        );
        l1.install(l1_recorder, MockRecorder::default());
        l2.install(contracts.l2_messenger, MockL2Messenger::new(contracts.l1_messenger));
        l2.install(L2_TO_L1_MESSAGE_PASSER, MockMessagePasser::default());
        l2.install(l2_recorder, MockRecorder::default());

        Self {
            l1,
            l2,
            contracts,
            l1_recorder,
            l2_recorder,
            outputs,
        }
    }

    pub fn deposits(&self) -> RelayMessenger {
        RelayMessenger::new(self.l1.clone(), self.l2.clone(), self.contracts, MessageDirection::L1ToL2)
            .with_backoff(fast_polling())
    }

    pub fn withdrawals(&self, requires_proof: bool) -> RelayMessenger {
        let contracts = RelayContracts {
            requires_proof,
            ..self.contracts
        };
        RelayMessenger::new(self.l1.clone(), self.l2.clone(), contracts, MessageDirection::L2ToL1)
            .with_backoff(fast_polling())
    }

    /// Proposes an output root for the current L2 head.
    pub fn publish_output(&self) {
        let l2_block = self.l2.block_number();
        let block = self.l2.block_info(l2_block);
        let proof = OptimismPortal::OutputRootProof {
            version: B256::ZERO,
            stateRoot: block.state_root,
            messagePasserStorageRoot: self.l2.storage_hash(L2_TO_L1_MESSAGE_PASSER, l2_block),
            latestBlockhash: block.hash,
        };
        lock(&self.outputs).push(L2OutputOracle::OutputProposal {
            outputRoot: output_root(&proof),
            timestamp: self.l1.timestamp() as u128,
            l2BlockNumber: l2_block as u128,
        });
    }

    pub fn l1_recorded_calls(&self) -> usize {
        self.l1.inspect(self.l1_recorder, |recorder: &MockRecorder| recorder.calls())
    }

    pub fn l2_recorded_calls(&self) -> usize {
        self.l2.inspect(self.l2_recorder, |recorder: &MockRecorder| recorder.calls())
    }
}
