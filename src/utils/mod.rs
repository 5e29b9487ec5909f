use alloy::primitives::{keccak256, Address, FixedBytes, U160};

pub mod address_predictor;
pub mod address_verifier;
pub mod network;
pub mod poll;
pub mod report;

/// Offset added by the L1 inbox to contract senders of L1->L2 messages.
const L1_TO_L2_ALIAS_OFFSET: &str = "1111000000000000000000000000000000001111";

fn alias_offset() -> U160 {
    // Constant, always valid hex.
    U160::from_str_radix(L1_TO_L2_ALIAS_OFFSET, 16).unwrap_or_default()
}

/// Address a contract call coming from `addr` on L1 appears to originate from on L2.
pub fn apply_l1_to_l2_alias(addr: Address) -> Address {
    let addr_as_u160 = U160::from_be_bytes(addr.0 .0);

    let result = addr_as_u160.wrapping_add(alias_offset());

    Address(FixedBytes::<20>(result.to_be_bytes()))
}

/// Address of a contract created by `deployer` with a plain CREATE at `nonce`.
pub fn compute_create_address(deployer: Address, nonce: u64) -> Address {
    deployer.create(nonce)
}

pub fn compute_selector(method_signature: &str) -> [u8; 4] {
    let hash = keccak256(method_signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}
