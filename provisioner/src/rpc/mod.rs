//! [Ledger] over a node's JSON-RPC interface.

use crate::{
    account::AccountId,
    keys::PublicKey,
    ledger::{self, AccountView, FunctionCall, Ledger, Signer},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::debug;

mod borsh;
pub use borsh::{Action, Transaction};

/// Default timeout of a single request (`broadcast_tx_commit` waits for execution)
pub const RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Finality state queries are made at
const FINALITY: &str = "final";

/// Finality nonces are read at (includes executed but not yet final transactions)
const NONCE_FINALITY: &str = "optimistic";

const REQUEST_ID: &str = "provisioner";

/// Connects [Client]s to RPC endpoints.
#[derive(Clone, Debug)]
pub struct Connector {
    pub timeout: Duration,
}

impl Default for Connector {
    fn default() -> Self {
        Self {
            timeout: RPC_TIMEOUT,
        }
    }
}

impl ledger::Connector for Connector {
    type Ledger = Client;

    fn connect(&self, endpoint: &str, network: &str) -> Result<Client, ledger::Error> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|err| ledger::Error::Other(format!("invalid endpoint: {err}")))?;
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| ledger::Error::Other(err.to_string()))?;
        Ok(Client {
            http,
            endpoint,
            network: network.to_string(),
            nonces: Nonces::default(),
        })
    }
}

/// A JSON-RPC client bound to one endpoint.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    network: String,
    nonces: Nonces,
}

/// Last nonce handed out per signing key.
///
/// A key's nonce observed on chain may lag behind transactions this client already
/// submitted, so the next nonce is derived from whichever is higher.
#[derive(Clone, Debug, Default)]
struct Nonces(Arc<Mutex<BTreeMap<(AccountId, [u8; 32]), u64>>>);

impl Nonces {
    fn next(&self, account: &AccountId, key: &PublicKey, observed: u64) -> u64 {
        let mut nonces = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let last = nonces
            .entry((account.clone(), key.to_bytes()))
            .or_insert(observed);
        *last = (*last).max(observed) + 1;
        *last
    }
}

#[derive(Deserialize)]
struct Response {
    result: Option<Value>,
    error: Option<Value>,
}

/// Classify an RPC error object, preferring its structured cause.
fn classify_error(error: &Value) -> ledger::Error {
    let message = error.to_string();
    match error.pointer("/cause/name").and_then(Value::as_str) {
        Some("UNKNOWN_ACCOUNT" | "UNKNOWN_ACCESS_KEY" | "NO_CONTRACT_CODE") => {
            ledger::Error::NotFound(message)
        }
        _ if message.contains("InvalidChain") || message.contains("InvalidNonce") => {
            ledger::Error::StaleReference(message)
        }
        _ => ledger::Error::classify(message),
    }
}

/// Collect the ed25519 keys of an access key list, skipping keys of other curves.
fn parse_access_keys(account: &AccountId, result: &Value) -> Result<Vec<PublicKey>, ledger::Error> {
    let keys = result
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("access key list", result))?;
    let mut parsed = Vec::with_capacity(keys.len());
    for entry in keys {
        let text = entry
            .get("public_key")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("access key", entry))?;
        match PublicKey::parse(text) {
            Ok(key) => parsed.push(key),
            Err(err) => debug!(%account, key = text, ?err, "skipping unsupported access key"),
        }
    }
    Ok(parsed)
}

/// Decode the final outcome of a transaction.
fn decode_outcome(outcome: &Value) -> Result<Value, ledger::Error> {
    let status = outcome
        .get("status")
        .ok_or_else(|| ledger::Error::Other(format!("outcome without status: {outcome}")))?;
    if let Some(failure) = status.get("Failure") {
        return Err(ledger::Error::Rejected(failure.to_string()));
    }
    let Some(encoded) = status.get("SuccessValue").and_then(Value::as_str) else {
        return Ok(Value::Null);
    };
    if encoded.is_empty() {
        return Ok(Value::Null);
    }
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| ledger::Error::Other(format!("invalid success value: {err}")))?;
    Ok(serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
}

fn malformed(what: &str, result: &Value) -> ledger::Error {
    ledger::Error::Other(format!("malformed {what}: {result}"))
}

impl Client {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ledger::Error> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": REQUEST_ID,
            "method": method,
            "params": params,
        });
        let response: Response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| ledger::Error::Other(format!("{method} request failed: {err}")))?
            .json()
            .await
            .map_err(|err| ledger::Error::Other(format!("{method} response unreadable: {err}")))?;
        if let Some(error) = response.error {
            return Err(classify_error(&error));
        }
        response
            .result
            .ok_or_else(|| ledger::Error::Other(format!("{method} returned no result")))
    }

    async fn query(&self, params: Value) -> Result<Value, ledger::Error> {
        self.query_at(params, FINALITY).await
    }

    async fn query_at(&self, mut params: Value, finality: &str) -> Result<Value, ledger::Error> {
        params["finality"] = json!(finality);
        let result = self.request("query", params).await?;

        // Some nodes report query failures inside the result
        if let Some(error) = result.get("error").and_then(Value::as_str) {
            return Err(ledger::Error::classify(error));
        }
        Ok(result)
    }

    /// Sign `actions` addressed to `receiver` and wait for their execution.
    async fn submit(
        &self,
        signer: Signer<'_>,
        receiver: &AccountId,
        actions: Vec<Action>,
    ) -> Result<Value, ledger::Error> {
        let public_key = signer.key.public_key();
        let key = self
            .query_at(
                json!({
                    "request_type": "view_access_key",
                    "account_id": signer.account,
                    "public_key": public_key,
                }),
                NONCE_FINALITY,
            )
            .await
            .map_err(|err| match err {
                ledger::Error::NotFound(message) => ledger::Error::Rejected(message),
                other => other,
            })?;
        let observed = key
            .get("nonce")
            .and_then(Value::as_u64)
            .ok_or_else(|| malformed("access key", &key))?;
        let block_hash: [u8; 32] = key
            .get("block_hash")
            .and_then(Value::as_str)
            .and_then(|hash| bs58::decode(hash).into_vec().ok())
            .and_then(|hash| hash.try_into().ok())
            .ok_or_else(|| malformed("access key", &key))?;

        let transaction = Transaction {
            signer: signer.account.clone(),
            public_key,
            nonce: self.nonces.next(signer.account, &public_key, observed),
            receiver: receiver.clone(),
            block_hash,
            actions,
        };
        debug!(
            network = self.network.as_str(),
            signer = %signer.account,
            %receiver,
            nonce = transaction.nonce,
            "submitting transaction"
        );
        let signed = transaction.sign(signer.key);
        let outcome = self
            .request("broadcast_tx_commit", json!([STANDARD.encode(&signed)]))
            .await?;
        decode_outcome(&outcome)
    }
}

impl Ledger for Client {
    async fn view_account(&self, account: &AccountId) -> Result<AccountView, ledger::Error> {
        let result = self
            .query(json!({ "request_type": "view_account", "account_id": account }))
            .await?;
        let amount = result
            .get("amount")
            .and_then(Value::as_str)
            .and_then(|amount| amount.parse().ok())
            .ok_or_else(|| malformed("account", &result))?;
        let code_hash = result
            .get("code_hash")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("account", &result))?
            .to_string();
        Ok(AccountView { amount, code_hash })
    }

    async fn access_keys(&self, account: &AccountId) -> Result<Vec<PublicKey>, ledger::Error> {
        let result = self
            .query(json!({ "request_type": "view_access_key_list", "account_id": account }))
            .await?;
        parse_access_keys(account, &result)
    }

    async fn view(&self, contract: &AccountId, method: &str, args: &Value) -> Result<Value, ledger::Error> {
        let args = serde_json::to_vec(args).map_err(|err| ledger::Error::Other(err.to_string()))?;
        let result = self
            .query(json!({
                "request_type": "call_function",
                "account_id": contract,
                "method_name": method,
                "args_base64": STANDARD.encode(args),
            }))
            .await?;
        let bytes: Vec<u8> = result
            .get("result")
            .and_then(|bytes| serde_json::from_value(bytes.clone()).ok())
            .ok_or_else(|| malformed("view result", &result))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| ledger::Error::Other(format!("{method} returned invalid json: {err}")))
    }

    async fn create_account(
        &self,
        signer: Signer<'_>,
        account: &AccountId,
        public_key: &PublicKey,
        amount: u128,
    ) -> Result<(), ledger::Error> {
        let actions = vec![
            Action::CreateAccount,
            Action::Transfer { deposit: amount },
            Action::AddKey {
                public_key: *public_key,
            },
        ];
        self.submit(signer, account, actions).await?;
        Ok(())
    }

    async fn deploy(&self, signer: Signer<'_>, code: &[u8]) -> Result<(), ledger::Error> {
        let actions = vec![Action::DeployContract {
            code: code.to_vec(),
        }];
        self.submit(signer, signer.account, actions).await?;
        Ok(())
    }

    async fn call(&self, signer: Signer<'_>, call: &FunctionCall) -> Result<Value, ledger::Error> {
        let args = serde_json::to_vec(&call.args).map_err(|err| ledger::Error::Other(err.to_string()))?;
        let actions = vec![Action::FunctionCall {
            method: call.method.to_string(),
            args,
            gas: call.gas,
            deposit: call.deposit,
        }];
        self.submit(signer, &call.contract, actions).await
    }
}
