use std::collections::BTreeMap;

use alloy::primitives::Address;

use crate::errors::{OrchestratorError, Result};

use super::address_predictor::PredictedAddressSet;

/// Name <-> address book of the addresses a deployment is expected to produce.
#[derive(Debug, Clone, Default)]
pub struct AddressVerifier {
    pub address_to_name: BTreeMap<Address, String>,
    pub name_to_address: BTreeMap<String, Address>,
}

impl AddressVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `names[i]` for the i-th predicted address.
    pub fn from_predictions(predicted: &PredictedAddressSet, names: &[&str]) -> Self {
        let mut result = Self::new();
        for (address, name) in predicted.addresses().iter().zip(names) {
            result.add_address(*address, name);
        }
        result
    }

    pub fn add_address(&mut self, address: Address, name: &str) {
        self.name_to_address.insert(name.to_string(), address);
        self.address_to_name.insert(address, name.to_string());
    }

    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.name_to_address.get(name).copied()
    }

    pub fn reverse_lookup(&self, address: &Address) -> Option<&String> {
        self.address_to_name.get(address)
    }

    /// Fails with `AddressPredictionMismatch` when `actual` is not what was
    /// recorded under `name`.
    pub fn expect_address(&self, step: usize, name: &str, actual: Address) -> Result<()> {
        match self.address_of(name) {
            Some(predicted) if predicted == actual => Ok(()),
            Some(predicted) => Err(OrchestratorError::AddressPredictionMismatch {
                step,
                contract: name.to_string(),
                predicted,
                actual,
            }),
            None => Err(OrchestratorError::PostDeployCheckFailed {
                step,
                contract: name.to_string(),
                reason: "no predicted address recorded".to_string(),
            }),
        }
    }
}
