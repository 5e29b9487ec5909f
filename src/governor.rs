//! Converges a bridging manager's roles and enabled flags to a [`BridgeConfig`].

use std::{collections::BTreeSet, sync::Arc};

use alloy::{
    primitives::{Address, B256, U256},
    sol,
    sol_types::{SolCall, SolEvent},
};
use log::{debug, info, warn};

use crate::{
    elements::{bridge_config::BridgeConfig, roles::Role},
    errors::{OrchestratorError, Result},
    utils::{
        network::{read, transact, ChainClient},
        report::OperationReport,
    },
};

sol! {
    contract BridgingManager {
        function grantRole(bytes32 role, address account) external;
        function revokeRole(bytes32 role, address account) external;
        function renounceRole(bytes32 role, address account) external;
        function hasRole(bytes32 role, address account) external view returns (bool);

        function enableDeposits() external;
        function disableDeposits() external;
        function enableWithdrawals() external;
        function disableWithdrawals() external;
        function isDepositsEnabled() external view returns (bool);
        function isWithdrawalsEnabled() external view returns (bool);

        event RoleGranted(bytes32 indexed role, address indexed account, address indexed sender);
        event RoleRevoked(bytes32 indexed role, address indexed account, address indexed sender);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeState {
    pub deposits_enabled: bool,
    pub withdrawals_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Deposits,
    Withdrawals,
}

impl Direction {
    fn enabler(&self) -> Role {
        match self {
            Direction::Deposits => Role::DepositsEnabler,
            Direction::Withdrawals => Role::WithdrawalsEnabler,
        }
    }

    fn disabler(&self) -> Role {
        match self {
            Direction::Deposits => Role::DepositsDisabler,
            Direction::Withdrawals => Role::WithdrawalsDisabler,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Direction::Deposits => "deposits",
            Direction::Withdrawals => "withdrawals",
        }
    }
}

pub struct BridgingGovernor {
    chain: Arc<dyn ChainClient>,
    bridge: Address,
}

impl BridgingGovernor {
    pub fn new(chain: Arc<dyn ChainClient>, bridge: Address) -> Self {
        Self { chain, bridge }
    }

    pub async fn has_role(&self, role: Role, account: Address) -> Result<bool> {
        let holds = read(
            self.chain.as_ref(),
            self.bridge,
            BridgingManager::hasRoleCall {
                role: role.id(),
                account,
            },
        )
        .await?;
        Ok(holds._0)
    }

    pub async fn bridge_state(&self) -> Result<BridgeState> {
        let chain = self.chain.as_ref();
        let (deposits, withdrawals) = tokio::try_join!(
            read(chain, self.bridge, BridgingManager::isDepositsEnabledCall {}),
            read(chain, self.bridge, BridgingManager::isWithdrawalsEnabledCall {}),
        )?;
        Ok(BridgeState {
            deposits_enabled: deposits._0,
            withdrawals_enabled: withdrawals._0,
        })
    }

    /// Current holders of `role`, replayed from grant and revoke events.
    pub async fn role_holders(&self, role: Role) -> Result<BTreeSet<Address>> {
        let chain = self.chain.as_ref();
        let (granted, revoked) = tokio::try_join!(
            chain.logs(self.bridge, BridgingManager::RoleGranted::SIGNATURE_HASH, 0),
            chain.logs(self.bridge, BridgingManager::RoleRevoked::SIGNATURE_HASH, 0),
        )?;

        let mut events = vec![];
        for entry in granted {
            let event = BridgingManager::RoleGranted::decode_log_data(&entry.log.data, true)
                .map_err(|e| anyhow::anyhow!("malformed RoleGranted log: {e}"))?;
            events.push((entry.block_number, entry.log_index, event.role, event.account, true));
        }
        for entry in revoked {
            let event = BridgingManager::RoleRevoked::decode_log_data(&entry.log.data, true)
                .map_err(|e| anyhow::anyhow!("malformed RoleRevoked log: {e}"))?;
            events.push((entry.block_number, entry.log_index, event.role, event.account, false));
        }
        events.sort_by_key(|(block, index, ..)| (*block, *index));

        let role_id: B256 = role.id();
        let mut holders = BTreeSet::new();
        for (block, _, event_role, account, granted) in events {
            match Role::from_id(event_role) {
                Some(known) if granted => debug!("block {block}: {known} granted to {account}"),
                Some(known) => debug!("block {block}: {known} revoked from {account}"),
                None => debug!("block {block}: unknown role {event_role} touched {account}"),
            }
            if event_role != role_id {
                continue;
            }
            if granted {
                holders.insert(account);
            } else {
                holders.remove(&account);
            }
        }
        Ok(holders)
    }

    pub async fn get_admins(&self) -> Result<BTreeSet<Address>> {
        self.role_holders(Role::Admin).await
    }

    /// Applies `config`. Safe to re-run: anything already in place is skipped,
    /// so a run that failed halfway converges when invoked again.
    pub async fn setup(&self, config: &BridgeConfig) -> Result<OperationReport> {
        let me = self.chain.signer_address();
        let mut report = OperationReport::new(format!(
            "bridge {} on {}",
            self.bridge,
            self.chain.label()
        ));

        match self.apply(config, me, &mut report).await {
            Ok(()) => Ok(report),
            Err(e) => {
                let applied = report.applied();
                warn!(
                    "{}: setup stopped with {} action(s) applied, re-run it to converge",
                    report.title,
                    applied.len()
                );
                Err(OrchestratorError::RoleOperationFailure {
                    bridge: self.bridge,
                    operation: "setup".to_string(),
                    applied,
                    reason: format!("{e:#}"),
                })
            }
        }
    }

    async fn apply(&self, config: &BridgeConfig, me: Address, report: &mut OperationReport) -> Result<()> {
        let handing_over = config.final_admin != me;

        // New admin first, so the role never has zero holders.
        if handing_over {
            self.ensure_role(Role::Admin, config.final_admin, report).await?;
        }

        for role in Role::ALL.into_iter().filter(|role| *role != Role::Admin) {
            for account in config.holders(role) {
                self.ensure_role(role, account, report).await?;
            }
        }

        let state = self.bridge_state().await?;
        self.converge(Direction::Deposits, state.deposits_enabled, config.deposits_enabled, config, me, report)
            .await?;
        self.converge(
            Direction::Withdrawals,
            state.withdrawals_enabled,
            config.withdrawals_enabled,
            config,
            me,
            report,
        )
        .await?;

        // Leftovers of an interrupted run.
        for role in Role::ALL.into_iter().filter(|role| *role != Role::Admin) {
            if !config.is_configured_holder(role, me) && self.has_role(role, me).await? {
                self.renounce(role, me, report).await?;
            }
        }

        if handing_over && self.has_role(Role::Admin, me).await? {
            if !self.has_role(Role::Admin, config.final_admin).await? {
                return Err(anyhow::anyhow!(
                    "{} does not hold ADMIN, refusing to renounce it",
                    config.final_admin
                )
                .into());
            }
            self.renounce(Role::Admin, me, report).await?;
        } else if handing_over {
            report.report_skipped(format!("renounce ADMIN of {me}"));
        } else {
            report.report_warn(format!("{me} is the final admin and keeps ADMIN"));
        }

        Ok(())
    }

    async fn converge(
        &self,
        direction: Direction,
        current: bool,
        target: bool,
        config: &BridgeConfig,
        me: Address,
        report: &mut OperationReport,
    ) -> Result<()> {
        if current == target {
            report.report_skipped(format!(
                "{} already {}",
                direction.name(),
                if target { "enabled" } else { "disabled" }
            ));
            return Ok(());
        }

        let role = if target {
            direction.enabler()
        } else {
            direction.disabler()
        };
        let transient = !config.is_configured_holder(role, me);
        if transient {
            self.ensure_role(role, me, report).await?;
        }

        let (description, outcome) = match (direction, target) {
            (Direction::Deposits, true) => (
                "enable deposits",
                transact(self.chain.as_ref(), self.bridge, BridgingManager::enableDepositsCall {}, U256::ZERO).await?,
            ),
            (Direction::Deposits, false) => (
                "disable deposits",
                transact(self.chain.as_ref(), self.bridge, BridgingManager::disableDepositsCall {}, U256::ZERO).await?,
            ),
            (Direction::Withdrawals, true) => (
                "enable withdrawals",
                transact(self.chain.as_ref(), self.bridge, BridgingManager::enableWithdrawalsCall {}, U256::ZERO)
                    .await?,
            ),
            (Direction::Withdrawals, false) => (
                "disable withdrawals",
                transact(self.chain.as_ref(), self.bridge, BridgingManager::disableWithdrawalsCall {}, U256::ZERO)
                    .await?,
            ),
        };
        if !outcome.success {
            return Err(anyhow::anyhow!("{description} reverted in {}", outcome.tx_hash).into());
        }
        report.report_applied(description);

        if transient {
            self.renounce(role, me, report).await?;
        }
        Ok(())
    }

    async fn ensure_role(&self, role: Role, account: Address, report: &mut OperationReport) -> Result<()> {
        if self.has_role(role, account).await? {
            report.report_skipped(format!("{account} already holds {role}"));
            return Ok(());
        }

        let call = BridgingManager::grantRoleCall {
            role: role.id(),
            account,
        };
        self.send(call, format!("grant {role} to {account}"), report).await
    }

    async fn renounce(&self, role: Role, me: Address, report: &mut OperationReport) -> Result<()> {
        let call = BridgingManager::renounceRoleCall {
            role: role.id(),
            account: me,
        };
        self.send(call, format!("renounce {role} of {me}"), report).await
    }

    async fn send<C: SolCall>(&self, call: C, description: String, report: &mut OperationReport) -> Result<()> {
        let outcome = transact(self.chain.as_ref(), self.bridge, call, U256::ZERO).await?;
        if !outcome.success {
            return Err(anyhow::anyhow!("{description} reverted in {}", outcome.tx_hash).into());
        }
        info!("{}: {description}", self.chain.label());
        report.report_applied(description);
        Ok(())
    }
}
