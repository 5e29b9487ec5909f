use alloy::primitives::Address;
use serde::Deserialize;

use super::roles::Role;

/// Target permission state of one bridging manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    pub final_admin: Address,
    #[serde(default)]
    pub deposits_enabled: bool,
    #[serde(default)]
    pub withdrawals_enabled: bool,
    #[serde(default)]
    pub deposits_enablers: Vec<Address>,
    #[serde(default)]
    pub deposits_disablers: Vec<Address>,
    #[serde(default)]
    pub withdrawals_enablers: Vec<Address>,
    #[serde(default)]
    pub withdrawals_disablers: Vec<Address>,
}

impl BridgeConfig {
    pub fn new(final_admin: Address) -> Self {
        Self {
            final_admin,
            deposits_enabled: false,
            withdrawals_enabled: false,
            deposits_enablers: vec![],
            deposits_disablers: vec![],
            withdrawals_enablers: vec![],
            withdrawals_disablers: vec![],
        }
    }

    /// Accounts that must hold `role` once setup completes.
    pub fn holders(&self, role: Role) -> Vec<Address> {
        match role {
            Role::Admin => vec![self.final_admin],
            Role::DepositsEnabler => self.deposits_enablers.clone(),
            Role::DepositsDisabler => self.deposits_disablers.clone(),
            Role::WithdrawalsEnabler => self.withdrawals_enablers.clone(),
            Role::WithdrawalsDisabler => self.withdrawals_disablers.clone(),
        }
    }

    pub fn is_configured_holder(&self, role: Role, account: Address) -> bool {
        self.holders(role).contains(&account)
    }
}
