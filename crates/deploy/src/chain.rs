//! The deployment primitive: submitting creation transactions and awaiting their receipts.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, U256};
use alloy_signer_local::PrivateKeySigner;
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::{NetworkConfig, TransactionError, rpc, tx::CreationTransaction};

/// Headroom added on top of `eth_estimateGas`, in percent.
const GAS_LIMIT_MARGIN_PERCENT: u64 = 20;

/// Timeout of a single JSON-RPC request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle of a submitted, not yet confirmed creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDeployment {
    pub tx_hash: B256,
}

/// A chain that can create contracts.
///
/// Implementations never retry a rejected transaction: the executor reports the
/// failure and leaves retry policy to the operator.
pub trait ChainClient: Send + Sync {
    /// The chain id reported by the node.
    fn chain_id(&self) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// Sign and broadcast a creation transaction carrying `init_code`.
    fn submit_deployment(
        &self,
        signer: &PrivateKeySigner,
        init_code: Bytes,
    ) -> impl Future<Output = Result<PendingDeployment, TransactionError>> + Send;

    /// Wait until the transaction is mined and return the created contract address.
    ///
    /// The caller bounds this with its own timeout.
    fn confirm_deployment(
        &self,
        pending: PendingDeployment,
    ) -> impl Future<Output = Result<Address, TransactionError>> + Send;
}

/// Subset of a transaction receipt needed to confirm a deployment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentReceipt {
    status: Option<String>,
    contract_address: Option<Address>,
}

/// Outcome of one receipt poll.
#[derive(Debug)]
enum ReceiptPoll {
    /// Not mined yet.
    Pending,
    Failed(TransactionError),
}

/// [`ChainClient`] speaking Ethereum JSON-RPC to a single endpoint.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    client: reqwest::Client,
    url: Url,
    gas_price: Option<u128>,
    poll_interval: Duration,
    max_polls: usize,
}

impl RpcChainClient {
    pub fn new(network: &NetworkConfig) -> anyhow::Result<Self> {
        let url = Url::parse(&network.rpc_url)
            .with_context(|| format!("Invalid RPC URL for network {}", network.name))?;

        let poll_interval = network.poll_interval();
        let max_polls = (network.confirmation_timeout().as_millis()
            / poll_interval.as_millis().max(1)) as usize
            + 1;

        Ok(Self {
            client: rpc::create_client(REQUEST_TIMEOUT)?,
            url,
            gas_price: network.gas_price.map(u128::from),
            poll_interval,
            max_polls,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        rpc::json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    /// Balance of `address` at the latest block, in wei.
    pub async fn balance(&self, address: Address) -> anyhow::Result<U256> {
        let balance: String = self
            .call("eth_getBalance", vec![json!(address), json!("latest")])
            .await
            .context("Failed to query balance")?;
        U256::from_str_radix(balance.trim_start_matches("0x"), 16)
            .with_context(|| format!("Invalid balance: {balance}"))
    }

    async fn build_transaction(
        &self,
        from: Address,
        init_code: Bytes,
    ) -> anyhow::Result<CreationTransaction> {
        let chain_id = self.chain_id().await?;

        let nonce: String = self
            .call("eth_getTransactionCount", vec![json!(from), json!("pending")])
            .await
            .context("Failed to fetch nonce")?;
        let nonce = rpc::parse_quantity(&nonce)?;

        let gas_price = match self.gas_price {
            Some(price) => price,
            None => {
                let price: String = self
                    .call("eth_gasPrice", vec![])
                    .await
                    .context("Failed to fetch gas price")?;
                rpc::parse_wei(&price)?
            }
        };

        let estimate: String = self
            .call(
                "eth_estimateGas",
                vec![json!({ "from": from, "data": &init_code })],
            )
            .await
            .context("Gas estimation failed (constructor would revert?)")?;
        let estimate = rpc::parse_quantity(&estimate)?;
        let gas_limit = estimate + estimate * GAS_LIMIT_MARGIN_PERCENT / 100;

        tracing::debug!(%from, nonce, gas_price, gas_limit, "Creation transaction prepared");

        Ok(CreationTransaction {
            chain_id,
            nonce,
            gas_price,
            gas_limit,
            value: U256::ZERO,
            input: init_code,
        })
    }

    async fn poll_receipt(&self, tx_hash: B256) -> Result<Address, ReceiptPoll> {
        let receipt: Option<DeploymentReceipt> = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await
            .map_err(|e| {
                tracing::trace!(%tx_hash, error = %e, "Receipt query failed, retrying...");
                ReceiptPoll::Pending
            })?;

        classify_receipt(receipt, tx_hash)
    }
}

/// Contract address of a deployment receipt, [`ReceiptPoll::Pending`] when not mined yet.
fn classify_receipt(
    receipt: Option<DeploymentReceipt>,
    tx_hash: B256,
) -> Result<Address, ReceiptPoll> {
    let Some(receipt) = receipt else {
        tracing::trace!(%tx_hash, "Transaction not mined yet");
        return Err(ReceiptPoll::Pending);
    };

    if receipt.status.as_deref() == Some("0x0") {
        return Err(ReceiptPoll::Failed(TransactionError::Reverted { tx_hash }));
    }

    receipt
        .contract_address
        .ok_or(ReceiptPoll::Failed(TransactionError::MissingContractAddress {
            tx_hash,
        }))
}

impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        let chain_id: String = self
            .call("eth_chainId", vec![])
            .await
            .context("Failed to query chain id")?;
        rpc::parse_quantity(&chain_id)
    }

    async fn submit_deployment(
        &self,
        signer: &PrivateKeySigner,
        init_code: Bytes,
    ) -> Result<PendingDeployment, TransactionError> {
        let tx = self
            .build_transaction(signer.address(), init_code)
            .await
            .map_err(|e| TransactionError::Rejected(format!("{e:#}")))?;

        let raw = tx
            .sign(signer)
            .map_err(|e| TransactionError::Rejected(format!("signing failed: {e}")))?;

        let tx_hash: B256 = self
            .call("eth_sendRawTransaction", vec![json!(raw)])
            .await
            .map_err(|e| TransactionError::Rejected(format!("{e:#}")))?;

        Ok(PendingDeployment { tx_hash })
    }

    async fn confirm_deployment(
        &self,
        pending: PendingDeployment,
    ) -> Result<Address, TransactionError> {
        let tx_hash = pending.tx_hash;

        (|| self.poll_receipt(tx_hash))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(self.max_polls),
            )
            .when(|poll| matches!(poll, ReceiptPoll::Pending))
            .await
            .map_err(|poll| match poll {
                ReceiptPoll::Failed(err) => err,
                ReceiptPoll::Pending => {
                    TransactionError::Timeout(self.poll_interval * self.max_polls as u32)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(value: Value) -> Option<DeploymentReceipt> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_successful_receipt_yields_contract_address() {
        let tx_hash = B256::with_last_byte(1);
        let address = Address::with_last_byte(0xaa);
        let parsed = receipt(json!({ "status": "0x1", "contractAddress": address }));

        assert_eq!(classify_receipt(parsed, tx_hash).unwrap(), address);
    }

    #[test]
    fn test_reverted_receipt() {
        let tx_hash = B256::with_last_byte(2);
        let parsed = receipt(json!({
            "status": "0x0",
            "contractAddress": Address::with_last_byte(0xaa),
        }));

        assert!(matches!(
            classify_receipt(parsed, tx_hash),
            Err(ReceiptPoll::Failed(TransactionError::Reverted { tx_hash: h })) if h == tx_hash
        ));
    }

    #[test]
    fn test_missing_receipt_is_pending() {
        let parsed = receipt(Value::Null);
        assert!(parsed.is_none());
        assert!(matches!(
            classify_receipt(parsed, B256::ZERO),
            Err(ReceiptPoll::Pending)
        ));
    }

    #[test]
    fn test_receipt_without_contract_address() {
        let tx_hash = B256::with_last_byte(3);
        let parsed = receipt(json!({ "status": "0x1", "contractAddress": null }));

        assert!(matches!(
            classify_receipt(parsed, tx_hash),
            Err(ReceiptPoll::Failed(TransactionError::MissingContractAddress { .. }))
        ));
    }
}
