//! Composes prediction, deployment, governance setup and cross-chain
//! messaging into the two end-to-end flows: deploying the linked bridge pair
//! and pushing a governed action from L1 to the timelocked L2 executor.

use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, B256, U256};
use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};

use crate::{
    bridge_pair::{BridgeArtifacts, DeployedPair, PairPlan, PairPredictions, L1_STEPS, L2_STEPS},
    elements::{
        bridge_config::BridgeConfig,
        cross_chain_message::{DeliveryOutcome, MessageStatus, PreparedMessage},
        timelock_action::{BridgeExecutor, TimelockAction, TimelockState},
        BridgePairConfig, OrchestratorConfig,
    },
    errors::{OrchestratorError, Result},
    governor::BridgingGovernor,
    messenger::CrossChainMessenger,
    utils::{
        address_predictor::predict_on,
        network::{read, transact, ChainClient, TxRequest},
        poll::{suspend_until, BackoffPolicy, CancelSignal},
        report::OperationReport,
    },
};

/// The collaborator that gets a prepared L1 transaction on chain, e.g. a
/// governance vote execution.
#[async_trait]
pub trait GovernanceSubmitter: Send + Sync {
    /// L1 account the message is sent from.
    fn sender(&self) -> Address;

    /// Returns the mined source transaction.
    async fn submit(&self, message: &PreparedMessage) -> Result<B256>;
}

/// Sends the L1 transaction straight from the configured signer.
pub struct DirectSubmitter {
    chain: Arc<dyn ChainClient>,
}

impl DirectSubmitter {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl GovernanceSubmitter for DirectSubmitter {
    fn sender(&self) -> Address {
        self.chain.signer_address()
    }

    async fn submit(&self, message: &PreparedMessage) -> Result<B256> {
        let tx = TxRequest::call(message.to, message.calldata.clone()).with_value(message.value);
        let outcome = self.chain.send(tx).await?;
        if !outcome.success {
            return Err(anyhow!("governance transaction {} reverted on {}", outcome.tx_hash, self.chain.label()).into());
        }
        info!("{}: message submitted in {}", self.chain.label(), outcome.tx_hash);
        Ok(outcome.tx_hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernedActionOutcome {
    pub action_id: U256,
    pub source_tx: B256,
    pub delivery: MessageStatus,
    /// `None` when someone else executed the action first.
    pub execution_tx: Option<B256>,
}

pub struct MultiChainOrchestrator {
    l1: Arc<dyn ChainClient>,
    l2: Arc<dyn ChainClient>,
    messenger: CrossChainMessenger,
    executor: Address,
    backoff: BackoffPolicy,
    delivery_timeout: Duration,
    execution_timeout: Duration,
}

impl MultiChainOrchestrator {
    pub fn new(
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        messenger: CrossChainMessenger,
        executor: Address,
    ) -> Self {
        let polling = crate::elements::PollingConfig::default();
        Self {
            l1,
            l2,
            messenger,
            executor,
            backoff: polling.backoff(),
            delivery_timeout: polling.delivery_timeout(),
            execution_timeout: polling.execution_timeout(),
        }
    }

    pub fn from_config(config: &OrchestratorConfig, l1: Arc<dyn ChainClient>, l2: Arc<dyn ChainClient>) -> Self {
        let backoff = config.polling.backoff();
        let messenger = CrossChainMessenger::from_config(&config.messaging, l1.clone(), l2.clone(), backoff);
        Self::new(l1, l2, messenger, config.governance.executor).with_polling(
            backoff,
            config.polling.delivery_timeout(),
            config.polling.execution_timeout(),
        )
    }

    pub fn with_polling(mut self, backoff: BackoffPolicy, delivery_timeout: Duration, execution_timeout: Duration) -> Self {
        self.backoff = backoff;
        self.delivery_timeout = delivery_timeout;
        self.execution_timeout = execution_timeout;
        self
    }

    /// Predicts both chains' deployment addresses concurrently.
    pub async fn predict_pair(&self) -> Result<PairPredictions> {
        let (l1, l2) = tokio::try_join!(
            predict_on(self.l1.as_ref(), self.l1.signer_address(), L1_STEPS.len()),
            predict_on(self.l2.as_ref(), self.l2.signer_address(), L2_STEPS.len()),
        )?;
        PairPredictions::new(l1, l2)
    }

    pub async fn plan_pair(&self, config: &BridgePairConfig, artifacts: &BridgeArtifacts) -> Result<PairPlan> {
        let predictions = self.predict_pair().await?;
        Ok(PairPlan::new(self.l1.clone(), self.l2.clone(), config, artifacts, &predictions))
    }

    /// Deploys both sides. The chains run concurrently, each in plan order.
    pub async fn deploy_pair(&self, config: &BridgePairConfig, artifacts: &BridgeArtifacts) -> Result<DeployedPair> {
        let mut plan = self.plan_pair(config, artifacts).await?;
        let (l1, l2) = tokio::join!(plan.l1.run(), plan.l2.run());

        match (&l1, &l2) {
            (Err(e), Ok(_)) => warn!(
                "L1 deployment failed after L2 completed: {e}; L1 contracts already deployed: {:?}",
                plan.l1.deployed()
            ),
            (Ok(_), Err(e)) => warn!(
                "L2 deployment failed after L1 completed: {e}; L2 contracts already deployed: {:?}",
                plan.l2.deployed()
            ),
            _ => {}
        }
        let (l1, l2) = (l1?, l2?);

        let pair = DeployedPair::from_deployed(&l1, &l2).ok_or_else(|| OrchestratorError::DeploymentFailed {
            step: l1.len() + l2.len(),
            contract: "bridge pair".to_string(),
            reason: "unexpected number of deployed contracts".to_string(),
        })?;
        plan.verify_deployed(&pair)?;
        Ok(pair)
    }

    /// Runs `setup` on both bridges concurrently and returns both reports.
    pub async fn setup_bridges(
        &self,
        pair: &DeployedPair,
        l1_config: &BridgeConfig,
        l2_config: &BridgeConfig,
    ) -> Result<(OperationReport, OperationReport)> {
        let l1 = BridgingGovernor::new(self.l1.clone(), pair.l1_bridge);
        let l2 = BridgingGovernor::new(self.l2.clone(), pair.l2_bridge);
        let (l1_report, l2_report) = tokio::join!(l1.setup(l1_config), l2.setup(l2_config));
        Ok((l1_report?, l2_report?))
    }

    /// Waits for a message and turns anything but a delivery into an error.
    pub async fn wait_for_delivery(&self, source_tx: B256, cancel: &CancelSignal) -> Result<MessageStatus> {
        let outcome = self
            .messenger
            .wait_for_delivery(source_tx, self.delivery_timeout, cancel)
            .await?;
        match outcome {
            DeliveryOutcome::Settled(status) if status.is_delivered() => Ok(status),
            DeliveryOutcome::Settled(status) => Err(OrchestratorError::MessageExecutionFailed {
                source_tx,
                reason: format!("message settled as {status}"),
            }),
            DeliveryOutcome::TimedOut(last_status) => Err(OrchestratorError::MessageDeliveryTimeout {
                source_tx,
                timeout: self.delivery_timeout,
                last_status,
            }),
        }
    }

    /// Queues `action` on the L2 executor through `submitter`, waits for the
    /// message, then executes the action once its delay has passed.
    pub async fn push_governed_action(
        &self,
        action: TimelockAction,
        submitter: &dyn GovernanceSubmitter,
        cancel: &CancelSignal,
    ) -> Result<GovernedActionOutcome> {
        if action.is_empty() {
            return Err(OrchestratorError::InvalidMessage(
                "timelock action has no calls".to_string(),
            ));
        }

        let count_before = self.actions_set_count().await?;
        let prepared = self
            .messenger
            .prepare_message(submitter.sender(), self.executor, action.queue_calldata(), None)
            .await?;
        let source_tx = submitter.submit(&prepared).await?;
        let delivery = self.wait_for_delivery(source_tx, cancel).await?;

        let action_id = self.find_queued(&action, count_before).await?.ok_or_else(|| {
            OrchestratorError::MessageExecutionFailed {
                source_tx,
                reason: format!("no matching actions set queued on executor {}", self.executor),
            }
        })?;
        info!("{source_tx} queued actions set {action_id}");

        let execution_tx = self.execute_when_ready(action_id, cancel).await?;
        Ok(GovernedActionOutcome {
            action_id,
            source_tx,
            delivery,
            execution_tx,
        })
    }

    async fn actions_set_count(&self) -> Result<U256> {
        Ok(read(
            self.l2.as_ref(),
            self.executor,
            BridgeExecutor::getActionsSetCountCall {},
        )
        .await?
        ._0)
    }

    async fn actions_set(&self, action_id: U256) -> Result<BridgeExecutor::ActionsSet> {
        Ok(read(
            self.l2.as_ref(),
            self.executor,
            BridgeExecutor::getActionsSetByIdCall {
                actionsSetId: action_id,
            },
        )
        .await?
        ._0)
    }

    /// First id from `from` on whose calls match `action`.
    async fn find_queued(&self, action: &TimelockAction, from: U256) -> Result<Option<U256>> {
        let count = self.actions_set_count().await?;
        let mut id = from;
        while id < count {
            if action.matches(&self.actions_set(id).await?) {
                return Ok(Some(id));
            }
            id += U256::from(1);
        }
        Ok(None)
    }

    async fn grace_period(&self) -> Result<u64> {
        Ok(read(self.l2.as_ref(), self.executor, BridgeExecutor::getGracePeriodCall {})
            .await?
            ._0
            .saturating_to())
    }

    async fn evaluate(&self, action_id: U256, grace_period: u64) -> Result<TimelockState> {
        let set = self.actions_set(action_id).await?;
        let now = self.l2.latest_block().await?.timestamp;
        Ok(TimelockState::evaluate(&set, now, grace_period))
    }

    /// State of an actions set against the current L2 time.
    pub async fn action_state(&self, action_id: U256) -> Result<TimelockState> {
        let grace_period = self.grace_period().await?;
        self.evaluate(action_id, grace_period).await
    }

    /// Polls until the action leaves its delay, then executes it.
    pub async fn execute_when_ready(&self, action_id: U256, cancel: &CancelSignal) -> Result<Option<B256>> {
        let grace_period = self.grace_period().await?;
        let settled = suspend_until(
            || async move {
                let state = self.evaluate(action_id, grace_period).await?;
                Ok::<_, OrchestratorError>((!matches!(state, TimelockState::Queued { .. })).then_some(state))
            },
            self.execution_timeout,
            self.backoff,
            cancel,
        )
        .await?;

        match settled {
            None => Err(OrchestratorError::TimelockExecutionFailed {
                action_id,
                reason: format!("still queued after {:?}", self.execution_timeout),
            }),
            Some(TimelockState::Queued { .. }) | Some(TimelockState::Executed) => {
                info!("actions set {action_id} was already executed");
                Ok(None)
            }
            Some(TimelockState::Canceled) => Err(OrchestratorError::TimelockExecutionFailed {
                action_id,
                reason: "canceled on the executor".to_string(),
            }),
            Some(TimelockState::Expired { expired_at }) => Err(OrchestratorError::TimelockExpired { action_id, expired_at }),
            Some(TimelockState::Executable) => {
                let outcome = transact(
                    self.l2.as_ref(),
                    self.executor,
                    BridgeExecutor::executeCall {
                        actionsSetId: action_id,
                    },
                    U256::ZERO,
                )
                .await?;
                if !outcome.success {
                    return Err(OrchestratorError::TimelockExecutionFailed {
                        action_id,
                        reason: format!("execute reverted in {}", outcome.tx_hash),
                    });
                }
                info!("actions set {action_id} executed in {}", outcome.tx_hash);
                Ok(Some(outcome.tx_hash))
            }
        }
    }
}
