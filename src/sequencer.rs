//! Ordered, abort-on-first-failure contract deployment against one chain.

use std::{fmt::Write as _, sync::Arc};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
};
use colored::Colorize;
use log::info;

use crate::{
    errors::{OrchestratorError, Result},
    utils::{
        address_predictor::PredictedAddressSet,
        compute_create_address,
        network::{ChainClient, TxRequest},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorArg {
    Value(DynSolValue),
    /// Address deployed by an earlier step of the same plan.
    Deployed(usize),
}

pub type PostDeployCheck = Box<dyn Fn(Address) -> std::result::Result<(), String> + Send + Sync>;

pub struct DeploymentStep {
    pub contract: String,
    pub init_code: Bytes,
    pub args: Vec<ConstructorArg>,
    pub expected_address: Option<Address>,
    check: Option<PostDeployCheck>,
}

impl DeploymentStep {
    pub fn new(contract: &str, init_code: Bytes) -> Self {
        Self {
            contract: contract.to_string(),
            init_code,
            args: vec![],
            expected_address: None,
            check: None,
        }
    }

    pub fn arg(mut self, value: DynSolValue) -> Self {
        self.args.push(ConstructorArg::Value(value));
        self
    }

    pub fn address_arg(self, address: Address) -> Self {
        self.arg(DynSolValue::Address(address))
    }

    pub fn deployed_arg(mut self, step: usize) -> Self {
        self.args.push(ConstructorArg::Deployed(step));
        self
    }

    /// The step fails with `AddressPredictionMismatch` unless it lands at `address`.
    pub fn expect_address(mut self, address: Address) -> Self {
        self.expected_address = Some(address);
        self
    }

    pub fn with_check(
        mut self,
        check: impl Fn(Address) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(Box::new(check));
        self
    }

    /// Init code followed by the ABI-encoded constructor arguments.
    fn creation_code(&self, deployed: &[Address]) -> Bytes {
        if self.args.is_empty() {
            return self.init_code.clone();
        }
        let values = self
            .args
            .iter()
            .map(|arg| match arg {
                ConstructorArg::Value(value) => value.clone(),
                ConstructorArg::Deployed(step) => DynSolValue::Address(deployed[*step]),
            })
            .collect();

        let mut code = self.init_code.to_vec();
        code.extend(DynSolValue::Tuple(values).abi_encode_params());
        code.into()
    }
}

/// Steps bound to one chain and one deployer.
pub struct DeploymentPlan {
    pub deployer: Address,
    pub steps: Vec<DeploymentStep>,
    pub expected_starting_nonce: Option<u64>,
}

pub struct DeploymentSequencer {
    chain: Arc<dyn ChainClient>,
    plan: DeploymentPlan,
    deployed: Vec<Address>,
}

impl DeploymentSequencer {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        let deployer = chain.signer_address();
        Self {
            chain,
            plan: DeploymentPlan {
                deployer,
                steps: vec![],
                expected_starting_nonce: None,
            },
            deployed: vec![],
        }
    }

    pub fn add_step(mut self, step: DeploymentStep) -> Self {
        self.plan.steps.push(step);
        self
    }

    /// Abort before sending anything if the deployer's nonce moved since `nonce`.
    pub fn expect_starting_nonce(mut self, nonce: u64) -> Self {
        self.plan.expected_starting_nonce = Some(nonce);
        self
    }

    /// Pins every step to the matching predicted address.
    pub fn expect_predictions(mut self, predicted: &PredictedAddressSet) -> Self {
        for (index, step) in self.plan.steps.iter_mut().enumerate() {
            step.expected_address = predicted.get(index);
        }
        self.expect_starting_nonce(predicted.starting_nonce)
    }

    pub fn plan(&self) -> &DeploymentPlan {
        &self.plan
    }

    pub fn chain_label(&self) -> &str {
        self.chain.label()
    }

    pub fn get_address(&self, step: usize) -> Option<Address> {
        self.deployed.get(step).copied()
    }

    pub fn deployed(&self) -> &[Address] {
        &self.deployed
    }

    fn validate_references(&self) -> Result<()> {
        for (index, step) in self.plan.steps.iter().enumerate() {
            for arg in &step.args {
                if let ConstructorArg::Deployed(referenced) = arg {
                    if *referenced >= index {
                        return Err(OrchestratorError::DeploymentFailed {
                            step: index,
                            contract: step.contract.clone(),
                            reason: format!("argument refers to step {referenced}, which is not deployed yet"),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn check_starting_nonce(&self) -> Result<()> {
        let Some(expected) = self.plan.expected_starting_nonce else {
            return Ok(());
        };
        let Some(first) = self.plan.steps.first() else {
            return Ok(());
        };

        let nonce = self.chain.transaction_count(self.plan.deployer).await?;
        if nonce != expected {
            return Err(OrchestratorError::AddressPredictionMismatch {
                step: 0,
                contract: first.contract.clone(),
                predicted: compute_create_address(self.plan.deployer, expected),
                actual: compute_create_address(self.plan.deployer, nonce),
            });
        }
        Ok(())
    }

    /// Deploys every step in order and stops at the first failed step or check.
    pub async fn run(&mut self) -> Result<Vec<Address>> {
        self.validate_references()?;
        self.check_starting_nonce().await?;
        self.deployed.clear();

        let label = self.chain.label().to_string();
        for (index, step) in self.plan.steps.iter().enumerate() {
            info!("{label}: deploying step {index} ({})", step.contract);

            let code = step.creation_code(&self.deployed);
            let outcome = self
                .chain
                .send(TxRequest::deploy(code))
                .await
                .map_err(|e| OrchestratorError::DeploymentFailed {
                    step: index,
                    contract: step.contract.clone(),
                    reason: format!("{e:#}"),
                })?;

            if !outcome.success {
                return Err(OrchestratorError::DeploymentFailed {
                    step: index,
                    contract: step.contract.clone(),
                    reason: format!("creation reverted in {}", outcome.tx_hash),
                });
            }
            let address = outcome.contract_address.ok_or_else(|| {
                OrchestratorError::DeploymentFailed {
                    step: index,
                    contract: step.contract.clone(),
                    reason: format!("receipt of {} has no contract address", outcome.tx_hash),
                }
            })?;

            if let Some(predicted) = step.expected_address {
                if predicted != address {
                    return Err(OrchestratorError::AddressPredictionMismatch {
                        step: index,
                        contract: step.contract.clone(),
                        predicted,
                        actual: address,
                    });
                }
            }
            if let Some(check) = &step.check {
                check(address).map_err(|reason| OrchestratorError::PostDeployCheckFailed {
                    step: index,
                    contract: step.contract.clone(),
                    reason,
                })?;
            }

            info!("{label}: {} deployed at {address}", step.contract);
            self.deployed.push(address);
        }

        Ok(self.deployed.clone())
    }

    /// Dry-run rendering of the plan.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}",
            format!("{} deployment plan, deployer {}", self.chain.label(), self.plan.deployer).bold()
        );
        if let Some(nonce) = self.plan.expected_starting_nonce {
            let _ = writeln!(out, "  starting nonce {nonce}");
        }

        for (index, step) in self.plan.steps.iter().enumerate() {
            let _ = write!(out, "  [{index}] {}", step.contract.green());
            if let Some(address) = step.expected_address {
                let _ = write!(out, " -> {address}");
            }
            let _ = writeln!(out);
            for arg in &step.args {
                match arg {
                    ConstructorArg::Value(value) => {
                        let _ = writeln!(out, "        {}", describe_value(value));
                    }
                    ConstructorArg::Deployed(step) => {
                        let rendered = match self.plan.steps.get(*step) {
                            Some(referenced) if *step < index => {
                                format!("<address of step {step} ({})>", referenced.contract).cyan()
                            }
                            _ => format!("<invalid reference to step {step}>").red(),
                        };
                        let _ = writeln!(out, "        {rendered}");
                    }
                }
            }
        }
        out
    }
}

fn describe_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => address.to_string(),
        DynSolValue::Uint(value, _) => value.to_string(),
        DynSolValue::String(text) => format!("{text:?}"),
        DynSolValue::Bytes(bytes) => format!("0x{}", alloy::hex::encode(bytes)),
        other => format!("{other:?}"),
    }
}
