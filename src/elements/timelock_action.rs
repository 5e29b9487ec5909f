use std::fmt;

use alloy::{
    primitives::{Address, Bytes, U256},
    sol,
    sol_types::SolCall,
};

sol! {
    contract BridgeExecutor {
        #[derive(Debug, PartialEq)]
        struct ActionsSet {
            address[] targets;
            uint256[] values;
            string[] signatures;
            bytes[] calldatas;
            bool[] withDelegatecalls;
            uint256 executionTime;
            bool executed;
            bool canceled;
        }

        function queue(
            address[] targets,
            uint256[] values,
            string[] signatures,
            bytes[] calldatas,
            bool[] withDelegatecalls
        ) external;
        function execute(uint256 actionsSetId) external payable;
        function getActionsSetCount() external view returns (uint256);
        function getActionsSetById(uint256 actionsSetId) external view returns (ActionsSet memory);
        function getDelay() external view returns (uint256);
        function getGracePeriod() external view returns (uint256);

        event ActionsSetQueued(
            uint256 indexed id,
            address[] targets,
            uint256[] values,
            string[] signatures,
            bytes[] calldatas,
            bool[] withDelegatecalls,
            uint256 executionTime
        );
        event ActionsSetExecuted(uint256 indexed id, address indexed initiatorExecution, bytes[] returnedData);
    }
}

/// A batch of calls queued on an L2 timelock executor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelockAction {
    pub targets: Vec<Address>,
    pub values: Vec<U256>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<Bytes>,
    pub with_delegatecalls: Vec<bool>,
}

impl TimelockAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a call whose calldata already starts with the selector.
    pub fn add_call(self, target: Address, value: U256, calldata: impl Into<Bytes>) -> Self {
        self.add_signed_call(target, value, "", calldata)
    }

    /// Adds a call the executor assembles as `selector(signature) ++ args`.
    pub fn add_signed_call(
        mut self,
        target: Address,
        value: U256,
        signature: &str,
        args: impl Into<Bytes>,
    ) -> Self {
        self.targets.push(target);
        self.values.push(value);
        self.signatures.push(signature.to_string());
        self.calldatas.push(args.into());
        self.with_delegatecalls.push(false);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn queue_calldata(&self) -> Bytes {
        BridgeExecutor::queueCall {
            targets: self.targets.clone(),
            values: self.values.clone(),
            signatures: self.signatures.clone(),
            calldatas: self.calldatas.clone(),
            withDelegatecalls: self.with_delegatecalls.clone(),
        }
        .abi_encode()
        .into()
    }

    /// Whether an on-chain actions set carries exactly these calls.
    pub fn matches(&self, set: &BridgeExecutor::ActionsSet) -> bool {
        self.targets == set.targets
            && self.values == set.values
            && self.signatures == set.signatures
            && self.calldatas == set.calldatas
            && self.with_delegatecalls == set.withDelegatecalls
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelockState {
    Queued { executable_at: u64 },
    Executable,
    Executed,
    Canceled,
    Expired { expired_at: u64 },
}

impl TimelockState {
    /// State of an actions set at chain time `now`.
    pub fn evaluate(set: &BridgeExecutor::ActionsSet, now: u64, grace_period: u64) -> Self {
        if set.executed {
            return TimelockState::Executed;
        }
        if set.canceled {
            return TimelockState::Canceled;
        }

        let executable_at = set.executionTime.saturating_to::<u64>();
        let expired_at = executable_at.saturating_add(grace_period);
        if now > expired_at {
            TimelockState::Expired { expired_at }
        } else if now >= executable_at {
            TimelockState::Executable
        } else {
            TimelockState::Queued { executable_at }
        }
    }
}

impl fmt::Display for TimelockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelockState::Queued { executable_at } => {
                let at = chrono::DateTime::from_timestamp(*executable_at as i64, 0)
                    .map(|time| time.to_rfc3339())
                    .unwrap_or_else(|| executable_at.to_string());
                write!(f, "QUEUED (executable at {at})")
            }
            TimelockState::Executable => write!(f, "EXECUTABLE"),
            TimelockState::Executed => write!(f, "EXECUTED"),
            TimelockState::Canceled => write!(f, "CANCELED"),
            TimelockState::Expired { expired_at } => write!(f, "EXPIRED (since {expired_at})"),
        }
    }
}
