//! Just enough of the chain's JSON-RPC interface to confirm a payment.

use paywall_common::model::{
    address::{TxHash, WalletAddress},
    purchase::ObservedTransfer,
};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{num::NonZeroU32, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Request to the chain RPC failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Chain RPC returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Chain RPC returned a malformed {0}")]
    Malformed(&'static str),
    #[error("Transaction {0} was not confirmed in time")]
    NotConfirmed(TxHash),
    #[error("Waiting for the transaction was cancelled")]
    Cancelled,
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcReceipt {
    /// Absent before Byzantium; such receipts are treated as failed.
    status: Option<String>,
}

#[derive(Deserialize)]
struct RpcTransaction {
    from: WalletAddress,
    to: Option<WalletAddress>,
    value: String,
}

/// Parses a JSON-RPC hex quantity such as `0x2386f26fc10000`.
fn parse_quantity(quantity: &str) -> Option<u128> {
    let digits = quantity.strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u128::from_str_radix(digits, 16).ok()
}

pub struct ChainClient {
    url: Url,
    client: Client,
    poll_interval: Duration,
    max_polls: NonZeroU32,
}

impl ChainClient {
    pub fn new(
        url: Url,
        poll_interval: Duration,
        max_polls: NonZeroU32,
    ) -> Result<Self, ChainError> {
        Ok(Self {
            url,
            client: Client::builder().build()?,
            poll_interval,
            max_polls,
        })
    }

    /// Calls `method`. A `null` result is returned as `None`.
    async fn call<P, T>(&self, method: &str, params: P) -> Result<Option<T>, ChainError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response: RpcResponse<T> = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(RpcErrorObject { code, message }) = response.error {
            return Err(ChainError::Rpc { code, message });
        }
        Ok(response.result)
    }

    async fn fetch_receipt(&self, tx_hash: TxHash) -> Result<Option<RpcReceipt>, ChainError> {
        self.call("eth_getTransactionReceipt", [tx_hash]).await
    }

    async fn fetch_transaction(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<RpcTransaction>, ChainError> {
        self.call("eth_getTransactionByHash", [tx_hash]).await
    }

    /// Waits until `tx_hash` is mined and returns what it transferred.
    ///
    /// The receipt is polled up to the configured number of times. Only a
    /// missing receipt is retried; any RPC failure ends the wait.
    pub async fn wait_for_transfer(
        &self,
        tx_hash: TxHash,
        cancel: &CancellationToken,
    ) -> Result<ObservedTransfer, ChainError> {
        let max_polls = self.max_polls.get();

        for attempt in 1..=max_polls {
            let receipt = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ChainError::Cancelled),
                receipt = self.fetch_receipt(tx_hash) => receipt?,
            };

            if let Some(receipt) = receipt {
                debug!(%tx_hash, attempt, "Transaction receipt found");
                return self.observe(tx_hash, &receipt).await;
            }

            debug!(%tx_hash, attempt, max_polls, "Transaction not mined yet");
            if attempt < max_polls {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ChainError::Cancelled),
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        Err(ChainError::NotConfirmed(tx_hash))
    }

    async fn observe(
        &self,
        tx_hash: TxHash,
        receipt: &RpcReceipt,
    ) -> Result<ObservedTransfer, ChainError> {
        let transaction = self
            .fetch_transaction(tx_hash)
            .await?
            .ok_or(ChainError::Malformed("transaction"))?;

        let succeeded = match receipt.status.as_deref() {
            Some(status) => {
                parse_quantity(status).ok_or(ChainError::Malformed("receipt status"))? == 1
            }
            None => false,
        };
        let value_wei =
            parse_quantity(&transaction.value).ok_or(ChainError::Malformed("transaction value"))?;

        Ok(ObservedTransfer {
            tx_hash,
            from: transaction.from,
            to: transaction.to,
            value_wei,
            succeeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::chain::{ChainClient, ChainError, parse_quantity};
    use paywall_common::model::address::{TxHash, WalletAddress};
    use serde_json::{Value, json};
    use std::{num::NonZeroU32, sync::Mutex, time::Duration};
    use tokio_util::sync::CancellationToken;
    use url::Url;
    use wiremock::{
        Mock, MockServer, Request, Respond, ResponseTemplate,
        matchers::{body_partial_json, method},
    };

    const TX_HASH: &str = "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b";
    const BUYER: &str = "0x7e5f4552091a69125d5dfcd7b8c2659029395bdf";
    const AUTHOR: &str = "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf";

    fn rpc_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result,
        }))
    }

    fn receipt(status: &str) -> Value {
        json!({
            "transactionHash": TX_HASH,
            "status": status,
            "blockNumber": "0x10",
        })
    }

    fn transaction(value: &str) -> Value {
        json!({
            "hash": TX_HASH,
            "from": "0x7E5F4552091A69125d5DfCd7b8C2659029395Bdf",
            "to": AUTHOR,
            "value": value,
        })
    }

    async fn respond_to(server: &MockServer, rpc_method: &str, response: impl Respond + 'static) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn test_client(server: &MockServer, max_polls: u32) -> ChainClient {
        ChainClient::new(
            Url::parse(&server.uri()).unwrap(),
            Duration::from_millis(5),
            NonZeroU32::new(max_polls).unwrap(),
        )
        .unwrap()
    }

    fn tx_hash() -> TxHash {
        TX_HASH.parse().unwrap()
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x0"), Some(0));
        assert_eq!(parse_quantity("0x2386f26fc10000"), Some(10_000_000_000_000_000));
        assert_eq!(parse_quantity("0x"), None);
        assert_eq!(parse_quantity("10"), None);
    }

    #[tokio::test]
    async fn confirmed_transfer() {
        let server = MockServer::start().await;
        respond_to(&server, "eth_getTransactionReceipt", rpc_result(receipt("0x1"))).await;
        respond_to(
            &server,
            "eth_getTransactionByHash",
            rpc_result(transaction("0x2386f26fc10000")),
        )
        .await;

        let transfer = test_client(&server, 3)
            .wait_for_transfer(tx_hash(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(transfer.succeeded);
        assert_eq!(transfer.tx_hash, tx_hash());
        assert_eq!(transfer.from, BUYER.parse::<WalletAddress>().unwrap());
        assert_eq!(transfer.to, Some(AUTHOR.parse().unwrap()));
        assert_eq!(transfer.value_wei, 10_000_000_000_000_000);
    }

    #[tokio::test]
    async fn reverted_transfer() {
        let server = MockServer::start().await;
        respond_to(&server, "eth_getTransactionReceipt", rpc_result(receipt("0x0"))).await;
        respond_to(
            &server,
            "eth_getTransactionByHash",
            rpc_result(transaction("0x1")),
        )
        .await;

        let transfer = test_client(&server, 3)
            .wait_for_transfer(tx_hash(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!transfer.succeeded);
    }

    #[tokio::test]
    async fn polls_until_mined() {
        let server = MockServer::start().await;
        let polls: Mutex<u32> = Mutex::new(0);
        respond_to(&server, "eth_getTransactionReceipt", move |_: &Request| {
            let mut polls = polls.lock().unwrap();
            *polls += 1;

            if *polls < 3 {
                rpc_result(Value::Null)
            } else {
                rpc_result(receipt("0x1"))
            }
        })
        .await;
        respond_to(
            &server,
            "eth_getTransactionByHash",
            rpc_result(transaction("0x64")),
        )
        .await;

        let transfer = test_client(&server, 5)
            .wait_for_transfer(tx_hash(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transfer.value_wei, 100);
    }

    #[tokio::test]
    async fn gives_up_after_max_polls() {
        let server = MockServer::start().await;
        respond_to(&server, "eth_getTransactionReceipt", rpc_result(Value::Null)).await;

        let error = test_client(&server, 3)
            .wait_for_transfer(tx_hash(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, ChainError::NotConfirmed(hash) if hash == tx_hash()));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rpc_errors_end_the_wait() {
        let server = MockServer::start().await;
        respond_to(
            &server,
            "eth_getTransactionReceipt",
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "header not found" },
            })),
        )
        .await;

        let error = test_client(&server, 5)
            .wait_for_transfer(tx_hash(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, ChainError::Rpc { code: -32000, .. }), "{error}");
    }

    #[tokio::test]
    async fn http_errors_end_the_wait() {
        let server = MockServer::start().await;
        respond_to(&server, "eth_getTransactionReceipt", ResponseTemplate::new(503)).await;

        let error = test_client(&server, 5)
            .wait_for_transfer(tx_hash(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, ChainError::Request(_)), "{error}");
    }

    #[tokio::test]
    async fn cancelled_while_polling() {
        let cancel = CancellationToken::new();
        let server = MockServer::start().await;

        let server_cancel = cancel.clone();
        respond_to(&server, "eth_getTransactionReceipt", move |_: &Request| {
            server_cancel.cancel();
            rpc_result(Value::Null)
        })
        .await;

        let client = ChainClient::new(
            Url::parse(&server.uri()).unwrap(),
            Duration::from_secs(60),
            NonZeroU32::new(10).unwrap(),
        )
        .unwrap();
        let error = client.wait_for_transfer(tx_hash(), &cancel).await.unwrap_err();

        assert!(matches!(error, ChainError::Cancelled));
    }

    #[tokio::test]
    async fn malformed_value() {
        let server = MockServer::start().await;
        respond_to(&server, "eth_getTransactionReceipt", rpc_result(receipt("0x1"))).await;
        respond_to(
            &server,
            "eth_getTransactionByHash",
            rpc_result(transaction("lots")),
        )
        .await;

        let error = test_client(&server, 1)
            .wait_for_transfer(tx_hash(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, ChainError::Malformed("transaction value")));
    }
}
