use std::{fmt, str::FromStr};

use alloy::primitives::{keccak256, B256};

/// Permissions of a bridging manager contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Admin,
    DepositsEnabler,
    DepositsDisabler,
    WithdrawalsEnabler,
    WithdrawalsDisabler,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::DepositsEnabler,
        Role::DepositsDisabler,
        Role::WithdrawalsEnabler,
        Role::WithdrawalsDisabler,
    ];

    /// Name the contract hashes into the role id.
    pub fn name(&self) -> &'static str {
        match self {
            Role::Admin => "DEFAULT_ADMIN_ROLE",
            Role::DepositsEnabler => "BridgingManager.DEPOSITS_ENABLER_ROLE",
            Role::DepositsDisabler => "BridgingManager.DEPOSITS_DISABLER_ROLE",
            Role::WithdrawalsEnabler => "BridgingManager.WITHDRAWALS_ENABLER_ROLE",
            Role::WithdrawalsDisabler => "BridgingManager.WITHDRAWALS_DISABLER_ROLE",
        }
    }

    pub fn id(&self) -> B256 {
        match self {
            // AccessControl's default admin role is the zero word.
            Role::Admin => B256::ZERO,
            other => keccak256(other.name().as_bytes()),
        }
    }

    pub fn from_id(id: B256) -> Option<Role> {
        Self::ALL.into_iter().find(|role| role.id() == id)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = match self {
            Role::Admin => "ADMIN",
            Role::DepositsEnabler => "DEPOSITS_ENABLER",
            Role::DepositsDisabler => "DEPOSITS_DISABLER",
            Role::WithdrawalsEnabler => "WITHDRAWALS_ENABLER",
            Role::WithdrawalsDisabler => "WITHDRAWALS_DISABLER",
        };
        write!(f, "{short}")
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts the short display name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown role {s}"))
    }
}
