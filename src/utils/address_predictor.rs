use alloy::primitives::Address;

use super::{compute_create_address, network::ChainClient};

/// Addresses the next `len()` CREATE deployments of `deployer` will land at.
///
/// Only valid until the deployer sends any other transaction on that chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictedAddressSet {
    pub deployer: Address,
    pub starting_nonce: u64,
    addresses: Vec<Address>,
}

impl PredictedAddressSet {
    pub fn get(&self, index: usize) -> Option<Address> {
        self.addresses.get(index).copied()
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

pub fn predict(deployer: Address, current_nonce: u64, count: usize) -> PredictedAddressSet {
    let addresses = (0..count as u64)
        .map(|offset| compute_create_address(deployer, current_nonce + offset))
        .collect();

    PredictedAddressSet {
        deployer,
        starting_nonce: current_nonce,
        addresses,
    }
}

/// Reads the deployer's nonce on `chain` and predicts from it.
pub async fn predict_on(
    chain: &dyn ChainClient,
    deployer: Address,
    count: usize,
) -> anyhow::Result<PredictedAddressSet> {
    let nonce = chain.transaction_count(deployer).await?;
    log::debug!(
        "{}: predicting {} address(es) for {} from nonce {}",
        chain.label(),
        count,
        deployer,
        nonce
    );
    Ok(predict(deployer, nonce, count))
}
