use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, Log, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;

/// A transaction the core wants mined. `to == None` is a contract creation.
#[derive(Debug, Clone, Default)]
pub struct TxRequest {
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
}

impl TxRequest {
    pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn deploy(init_code: impl Into<Bytes>) -> Self {
        Self {
            to: None,
            data: init_code.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    pub block_number: u64,
    pub log_index: u64,
    pub log: Log,
}

/// Mined transaction, reduced to what the orchestration core looks at.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub number: u64,
    pub hash: B256,
    pub state_root: B256,
    pub timestamp: u64,
    pub base_fee: u128,
}

#[derive(Debug, Clone)]
pub struct StorageProof {
    pub storage_hash: B256,
    pub proof: Vec<Bytes>,
}

/// Connection to one chain, bound to one signing account.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn label(&self) -> &str;

    fn signer_address(&self) -> Address;

    async fn chain_id(&self) -> Result<u64>;

    async fn transaction_count(&self, account: Address) -> Result<u64>;

    /// Signs, sends and waits for inclusion. A reverted transaction is an `Ok`
    /// outcome with `success == false`.
    async fn send(&self, tx: TxRequest) -> Result<TxOutcome>;

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    async fn estimate_gas(&self, from: Address, tx: &TxRequest) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    async fn latest_block(&self) -> Result<BlockInfo>;

    async fn block(&self, number: u64) -> Result<Option<BlockInfo>>;

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxOutcome>>;

    async fn logs(&self, address: Address, topic0: B256, from_block: u64) -> Result<Vec<EventLog>>;

    async fn storage_proof(&self, address: Address, slot: B256, block: u64) -> Result<StorageProof>;
}

/// Performs a view call and decodes its return data.
pub async fn read<C: SolCall>(chain: &dyn ChainClient, to: Address, call: C) -> Result<C::Return> {
    let output = chain
        .call(to, call.abi_encode().into())
        .await
        .with_context(|| format!("{} on {} at {}", C::SIGNATURE, chain.label(), to))?;
    C::abi_decode_returns(&output, true)
        .with_context(|| format!("decoding {} returned by {}", C::SIGNATURE, to))
}

/// Sends a contract call and returns the mined outcome, reverted or not.
pub async fn transact<C: SolCall>(
    chain: &dyn ChainClient,
    to: Address,
    call: C,
    value: U256,
) -> Result<TxOutcome> {
    debug!("{}: sending {} to {}", chain.label(), C::SIGNATURE, to);
    chain
        .send(TxRequest::call(to, call.abi_encode()).with_value(value))
        .await
        .with_context(|| format!("sending {} to {} on {}", C::SIGNATURE, to, chain.label()))
}

pub struct AlloyChain<P> {
    label: String,
    provider: P,
    signer: Address,
}

/// Builds a signing HTTP connection for one chain.
pub fn connect(
    label: &str,
    rpc_url: &str,
    private_key: &str,
) -> Result<AlloyChain<impl Provider<Http<Client>> + Clone + 'static>> {
    let signer: PrivateKeySigner = private_key
        .parse()
        .map_err(|e| anyhow!("invalid private key for {label}: {e}"))?;
    let address = signer.address();

    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(EthereumWallet::from(signer))
        .on_http(rpc_url.parse().with_context(|| format!("invalid RPC URL for {label}"))?);

    info!("{label}: connected to {rpc_url} as {address}");

    Ok(AlloyChain {
        label: label.to_string(),
        provider,
        signer: address,
    })
}

impl<P> AlloyChain<P>
where
    P: Provider<Http<Client>> + Clone + 'static,
{
    fn request(&self, tx: &TxRequest) -> TransactionRequest {
        let request = TransactionRequest::default()
            .with_from(self.signer)
            .with_value(tx.value);
        match tx.to {
            Some(to) => request.with_to(to).with_input(tx.data.clone()),
            None => request.with_deploy_code(tx.data.clone()),
        }
    }

    async fn block_by_tag(&self, tag: BlockNumberOrTag) -> Result<Option<BlockInfo>> {
        let block = self.provider.get_block_by_number(tag, false.into()).await?;
        Ok(block.map(|block| BlockInfo {
            number: block.header.number,
            hash: block.header.hash,
            state_root: block.header.state_root,
            timestamp: block.header.timestamp,
            base_fee: block.header.base_fee_per_gas.unwrap_or_default() as u128,
        }))
    }
}

fn outcome_from_receipt(receipt: &TransactionReceipt) -> TxOutcome {
    TxOutcome {
        tx_hash: receipt.transaction_hash,
        block_number: receipt.block_number.unwrap_or_default(),
        success: receipt.status(),
        contract_address: receipt.contract_address,
        logs: receipt
            .inner
            .logs()
            .iter()
            .map(|log| log.inner.clone())
            .collect(),
    }
}

#[async_trait]
impl<P> ChainClient for AlloyChain<P>
where
    P: Provider<Http<Client>> + Clone + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn signer_address(&self) -> Address {
        self.signer
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn transaction_count(&self, account: Address) -> Result<u64> {
        Ok(self.provider.get_transaction_count(account).await?)
    }

    async fn send(&self, tx: TxRequest) -> Result<TxOutcome> {
        let pending = self
            .provider
            .send_transaction(self.request(&tx))
            .await
            .context("failed to send transaction")?;
        let receipt = pending
            .get_receipt()
            .await
            .context("failed to get transaction receipt")?;
        Ok(outcome_from_receipt(&receipt))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let request = self.request(&TxRequest::call(to, data));
        Ok(self.provider.call(&request).await?)
    }

    async fn estimate_gas(&self, from: Address, tx: &TxRequest) -> Result<u64> {
        let request = self.request(tx).with_from(from);
        Ok(self.provider.estimate_gas(&request).await?)
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn latest_block(&self) -> Result<BlockInfo> {
        self.block_by_tag(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| anyhow!("{}: latest block not available", self.label))
    }

    async fn block(&self, number: u64) -> Result<Option<BlockInfo>> {
        self.block_by_tag(BlockNumberOrTag::Number(number)).await
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxOutcome>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.as_ref().map(outcome_from_receipt))
    }

    async fn logs(&self, address: Address, topic0: B256, from_block: u64) -> Result<Vec<EventLog>> {
        let filter = Filter::new()
            .address(address)
            .event_signature(topic0)
            .from_block(from_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("{}: failed to get logs of {}", self.label, address))?;

        Ok(logs
            .into_iter()
            .map(|log| EventLog {
                block_number: log.block_number.unwrap_or_default(),
                log_index: log.log_index.unwrap_or_default(),
                log: log.inner,
            })
            .collect())
    }

    async fn storage_proof(&self, address: Address, slot: B256, block: u64) -> Result<StorageProof> {
        let response = self
            .provider
            .get_proof(address, vec![slot])
            .block_id(BlockId::number(block))
            .await?;
        let proof = response
            .storage_proof
            .into_iter()
            .next()
            .map(|entry| entry.proof)
            .unwrap_or_default();
        Ok(StorageProof {
            storage_hash: response.storage_hash,
            proof,
        })
    }
}
