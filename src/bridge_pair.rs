//! The linked token bridge layout: an L1 bridge and an L2 bridge plus its
//! bridged token, each behind a proxy, with every cross-chain reference
//! taken from addresses predicted before anything is sent.

use std::{
    fmt::{self, Write},
    sync::Arc,
};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, U256},
    sol,
    sol_types::{SolCall, SolValue},
};
use anyhow::Context;

use crate::{
    elements::{artifact::fetch_bytecode, ArtifactPaths, BridgePairConfig},
    errors::{OrchestratorError, Result},
    sequencer::{ConstructorArg, DeploymentSequencer, DeploymentStep},
    utils::{
        address_predictor::PredictedAddressSet, address_verifier::AddressVerifier, compute_selector,
        network::ChainClient,
    },
};

sol! {
    function initialize(address admin);
}

pub const L1_BRIDGE_IMPLEMENTATION: &str = "L1ERC20TokenBridge implementation";
pub const L1_BRIDGE_PROXY: &str = "L1ERC20TokenBridge proxy";
pub const L2_TOKEN_IMPLEMENTATION: &str = "ERC20Bridged implementation";
pub const L2_TOKEN_PROXY: &str = "ERC20Bridged proxy";
pub const L2_BRIDGE_IMPLEMENTATION: &str = "L2ERC20TokenBridge implementation";
pub const L2_BRIDGE_PROXY: &str = "L2ERC20TokenBridge proxy";

/// Deployment order on each chain.
pub const L1_STEPS: [&str; 2] = [L1_BRIDGE_IMPLEMENTATION, L1_BRIDGE_PROXY];
pub const L2_STEPS: [&str; 4] = [
    L2_TOKEN_IMPLEMENTATION,
    L2_TOKEN_PROXY,
    L2_BRIDGE_IMPLEMENTATION,
    L2_BRIDGE_PROXY,
];

/// `initialize(string,string)` of the bridged token.
fn token_initialize_calldata(name: &str, symbol: &str) -> Bytes {
    let mut calldata = compute_selector("initialize(string,string)").to_vec();
    calldata.extend((name.to_string(), symbol.to_string()).abi_encode_params());
    calldata.into()
}

#[derive(Debug, Clone)]
pub struct BridgeArtifacts {
    pub l1_bridge: Bytes,
    pub l2_bridge: Bytes,
    pub l2_token: Bytes,
    pub proxy: Bytes,
}

impl BridgeArtifacts {
    pub async fn load(paths: &ArtifactPaths) -> anyhow::Result<Self> {
        async fn load(location: &str) -> anyhow::Result<Bytes> {
            fetch_bytecode(location)
                .await
                .with_context(|| format!("loading artifact {location}"))
        }
        Ok(Self {
            l1_bridge: load(&paths.l1_bridge).await?,
            l2_bridge: load(&paths.l2_bridge).await?,
            l2_token: load(&paths.l2_token).await?,
            proxy: load(&paths.proxy).await?,
        })
    }
}

/// Predicted addresses of both chains, checked to cover every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairPredictions {
    pub l1: PredictedAddressSet,
    pub l2: PredictedAddressSet,
}

impl PairPredictions {
    pub fn new(l1: PredictedAddressSet, l2: PredictedAddressSet) -> Result<Self> {
        if l1.len() < L1_STEPS.len() || l2.len() < L2_STEPS.len() {
            return Err(OrchestratorError::DeploymentFailed {
                step: 0,
                contract: L1_BRIDGE_IMPLEMENTATION.to_string(),
                reason: format!(
                    "need {} L1 and {} L2 predicted addresses, got {} and {}",
                    L1_STEPS.len(),
                    L2_STEPS.len(),
                    l1.len(),
                    l2.len()
                ),
            });
        }
        Ok(Self { l1, l2 })
    }

    fn l1_at(&self, name: &str) -> Address {
        let index = L1_STEPS.iter().position(|step| *step == name).unwrap_or_default();
        self.l1.addresses()[index]
    }

    fn l2_at(&self, name: &str) -> Address {
        let index = L2_STEPS.iter().position(|step| *step == name).unwrap_or_default();
        self.l2.addresses()[index]
    }

    pub fn l1_bridge(&self) -> Address {
        self.l1_at(L1_BRIDGE_PROXY)
    }

    pub fn l2_token(&self) -> Address {
        self.l2_at(L2_TOKEN_PROXY)
    }

    pub fn l2_bridge(&self) -> Address {
        self.l2_at(L2_BRIDGE_PROXY)
    }

    /// Every predicted address under its contract name.
    pub fn book(&self) -> AddressVerifier {
        let mut book = AddressVerifier::from_predictions(&self.l1, &L1_STEPS);
        for (address, name) in self.l2.addresses().iter().zip(L2_STEPS) {
            book.add_address(*address, name);
        }
        book
    }
}

impl fmt::Display for PairPredictions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "L1 deployer {} from nonce {}", self.l1.deployer, self.l1.starting_nonce)?;
        for (name, address) in L1_STEPS.iter().zip(self.l1.addresses()) {
            writeln!(f, "  {name}: {address}")?;
        }
        writeln!(f, "L2 deployer {} from nonce {}", self.l2.deployer, self.l2.starting_nonce)?;
        for (name, address) in L2_STEPS.iter().zip(self.l2.addresses()) {
            writeln!(f, "  {name}: {address}")?;
        }
        Ok(())
    }
}

/// Both chains' sequencers, ready to run.
pub struct PairPlan {
    pub l1: DeploymentSequencer,
    pub l2: DeploymentSequencer,
    pub book: AddressVerifier,
}

/// Pins each step to the address recorded for it.
fn pinned(book: &AddressVerifier, step: DeploymentStep) -> DeploymentStep {
    match book.address_of(&step.contract) {
        Some(address) => step.expect_address(address),
        None => step,
    }
}

impl PairPlan {
    pub fn new(
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        config: &BridgePairConfig,
        artifacts: &BridgeArtifacts,
        predictions: &PairPredictions,
    ) -> Self {
        let book = predictions.book();
        let l1_admin = l1.signer_address();
        let l2_admin = l2.signer_address();

        let l1_plan = DeploymentSequencer::new(l1)
            .add_step(pinned(
                &book,
                DeploymentStep::new(L1_BRIDGE_IMPLEMENTATION, artifacts.l1_bridge.clone())
                    .address_arg(config.l1_messenger)
                    .address_arg(predictions.l2_bridge())
                    .address_arg(config.l1_token)
                    .address_arg(predictions.l2_token()),
            ))
            .add_step(pinned(
                &book,
                DeploymentStep::new(L1_BRIDGE_PROXY, artifacts.proxy.clone())
                    .deployed_arg(0)
                    .address_arg(config.l1_proxy_admin)
                    .arg(DynSolValue::Bytes(
                        initializeCall { admin: l1_admin }.abi_encode(),
                    )),
            ))
            .expect_starting_nonce(predictions.l1.starting_nonce);

        let l2_plan = DeploymentSequencer::new(l2)
            .add_step(pinned(
                &book,
                DeploymentStep::new(L2_TOKEN_IMPLEMENTATION, artifacts.l2_token.clone())
                    .arg(DynSolValue::String(config.token_name.clone()))
                    .arg(DynSolValue::String(config.token_symbol.clone()))
                    .arg(DynSolValue::Uint(U256::from(config.token_decimals), 8))
                    .address_arg(predictions.l2_bridge()),
            ))
            .add_step(pinned(
                &book,
                DeploymentStep::new(L2_TOKEN_PROXY, artifacts.proxy.clone())
                    .deployed_arg(0)
                    .address_arg(config.l2_proxy_admin)
                    .arg(DynSolValue::Bytes(
                        token_initialize_calldata(&config.token_name, &config.token_symbol).to_vec(),
                    )),
            ))
            .add_step(pinned(
                &book,
                DeploymentStep::new(L2_BRIDGE_IMPLEMENTATION, artifacts.l2_bridge.clone())
                    .address_arg(config.l2_messenger)
                    .address_arg(predictions.l1_bridge())
                    .address_arg(config.l1_token)
                    .deployed_arg(1),
            ))
            .add_step(pinned(
                &book,
                DeploymentStep::new(L2_BRIDGE_PROXY, artifacts.proxy.clone())
                    .deployed_arg(2)
                    .address_arg(config.l2_proxy_admin)
                    .arg(DynSolValue::Bytes(
                        initializeCall { admin: l2_admin }.abi_encode(),
                    )),
            ))
            .expect_starting_nonce(predictions.l2.starting_nonce);

        Self {
            l1: l1_plan,
            l2: l2_plan,
            book,
        }
    }

    pub fn describe(&self) -> String {
        let mut out = format!("{}\n{}", self.l1.describe(), self.l2.describe());
        let _ = writeln!(out, "\nreferences to predicted addresses:");
        for sequencer in [&self.l1, &self.l2] {
            for step in &sequencer.plan().steps {
                for arg in &step.args {
                    let ConstructorArg::Value(DynSolValue::Address(address)) = arg else {
                        continue;
                    };
                    if let Some(name) = self.book.reverse_lookup(address) {
                        let _ = writeln!(out, "  {} {} -> {name}", sequencer.chain_label(), step.contract);
                    }
                }
            }
        }
        out
    }

    /// Cross-checks a finished deployment against the address book.
    pub fn verify_deployed(&self, pair: &DeployedPair) -> Result<()> {
        for (step, (name, address)) in pair.named().into_iter().enumerate() {
            self.book.expect_address(step, name, address)?;
        }
        Ok(())
    }
}

/// Addresses of a completed pair deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployedPair {
    pub l1_bridge_implementation: Address,
    pub l1_bridge: Address,
    pub l2_token_implementation: Address,
    pub l2_token: Address,
    pub l2_bridge_implementation: Address,
    pub l2_bridge: Address,
}

impl DeployedPair {
    pub fn from_deployed(l1: &[Address], l2: &[Address]) -> Option<Self> {
        match (l1, l2) {
            ([l1_bridge_implementation, l1_bridge], [l2_token_implementation, l2_token, l2_bridge_implementation, l2_bridge]) => {
                Some(Self {
                    l1_bridge_implementation: *l1_bridge_implementation,
                    l1_bridge: *l1_bridge,
                    l2_token_implementation: *l2_token_implementation,
                    l2_token: *l2_token,
                    l2_bridge_implementation: *l2_bridge_implementation,
                    l2_bridge: *l2_bridge,
                })
            }
            _ => None,
        }
    }
}

impl DeployedPair {
    /// Every address under its contract name, L1 first, in deployment order.
    pub fn named(&self) -> [(&'static str, Address); 6] {
        [
            (L1_BRIDGE_IMPLEMENTATION, self.l1_bridge_implementation),
            (L1_BRIDGE_PROXY, self.l1_bridge),
            (L2_TOKEN_IMPLEMENTATION, self.l2_token_implementation),
            (L2_TOKEN_PROXY, self.l2_token),
            (L2_BRIDGE_IMPLEMENTATION, self.l2_bridge_implementation),
            (L2_BRIDGE_PROXY, self.l2_bridge),
        ]
    }
}

impl fmt::Display for DeployedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self
            .named()
            .iter()
            .map(|(name, address)| format!("{name}: {address}"))
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}
