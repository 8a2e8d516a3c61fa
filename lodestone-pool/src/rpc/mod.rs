//! Node access: JSON-RPC envelopes, the live host pool and canned fixtures.
//!
//! Chain adapters talk to a [`Transport`]. The real variant balances over a
//! [`HostPool`]; the mock variant answers from a [`FixtureMap`] so adapters
//! can be exercised without nodes.

mod fixtures;
mod host_pool;

pub use fixtures::FixtureMap;
pub use host_pool::{HealthProbe, HostPing, HostPool};

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PoolError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl From<RpcError> for PoolError {
    fn from(err: RpcError) -> Self {
        PoolError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// The result, or the node's `error` as [`PoolError::Rpc`].
    pub fn into_result(self) -> Result<Value> {
        match (self.error, self.result) {
            (Some(err), _) => Err(err.into()),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// How a chain adapter reaches its nodes.
#[derive(Debug, Clone)]
pub enum Transport {
    Real(Arc<HostPool>),
    Mock(Arc<FixtureMap>),
}

impl Transport {
    pub fn is_mock(&self) -> bool {
        matches!(self, Transport::Mock(_))
    }

    pub async fn exec_rpc(&self, method: &str, params: Value) -> Result<Value> {
        match self {
            Transport::Real(pool) => pool.exec_rpc(method, params).await,
            Transport::Mock(fixtures) => fixtures.rpc(method, &params),
        }
    }

    /// Typed variant of [`Transport::exec_rpc`].
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.exec_rpc(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| PoolError::upstream(format!("{}: unexpected response: {}", method, e)))
    }

    /// Batch call; responses come back in request order.
    pub async fn exec_rpc_bulk(&self, requests: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>> {
        match self {
            Transport::Real(pool) => pool.exec_rpc_bulk(requests).await,
            Transport::Mock(fixtures) => Ok(requests
                .iter()
                .map(|req| match fixtures.rpc(&req.method, &req.params) {
                    Ok(result) => JsonRpcResponse {
                        id: Some(req.id),
                        result: Some(result),
                        error: None,
                    },
                    Err(PoolError::Rpc { code, message }) => JsonRpcResponse {
                        id: Some(req.id),
                        result: None,
                        error: Some(RpcError { code, message }),
                    },
                    Err(e) => JsonRpcResponse {
                        id: Some(req.id),
                        result: None,
                        error: Some(RpcError {
                            code: -1,
                            message: e.to_string(),
                        }),
                    },
                })
                .collect()),
        }
    }

    /// Route to the host reporting the greatest height.
    pub async fn exec_rpc_from_args_synced(&self, method: &str, params: Value) -> Result<Value> {
        match self {
            Transport::Real(pool) => pool.exec_rpc_from_args_synced(method, params).await,
            Transport::Mock(fixtures) => fixtures.rpc(method, &params),
        }
    }

    pub async fn exec_http(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        match self {
            Transport::Real(pool) => pool.exec_http(method, path, body).await.map(|(_, v)| v),
            Transport::Mock(fixtures) => fixtures.http(method.as_str(), path, body.as_ref()),
        }
    }

    /// Like [`Transport::exec_http`] but also reports which host answered, so
    /// follow-up calls can stick to it.
    pub async fn exec_http_with_host(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(String, Value)> {
        match self {
            Transport::Real(pool) => pool.exec_http(method, path, body).await,
            Transport::Mock(fixtures) => Ok((
                FixtureMap::HOST_ID.to_string(),
                fixtures.http(method.as_str(), path, body.as_ref())?,
            )),
        }
    }

    pub async fn exec_http_sticky(
        &self,
        host_id: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        match self {
            Transport::Real(pool) => pool.exec_http_sticky(host_id, method, path, body).await,
            Transport::Mock(fixtures) => fixtures.http(method.as_str(), path, body.as_ref()),
        }
    }

    /// GET an absolute URL outside the host pool, e.g. a public fee API.
    pub async fn fetch_url(&self, url: &str, timeout: std::time::Duration) -> Result<Value> {
        match self {
            Transport::Real(_) => {
                let client = reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| PoolError::upstream(format!("http client: {}", e)))?;
                let response = client.get(url).send().await?.error_for_status()?;
                Ok(response.json::<Value>().await?)
            }
            Transport::Mock(fixtures) => fixtures.http("GET", url, None),
        }
    }

    pub async fn ping_hosts(&self) -> Vec<HostPing> {
        match self {
            Transport::Real(pool) => pool.ping_hosts().await,
            Transport::Mock(_) => vec![HostPing {
                host_id: FixtureMap::HOST_ID.to_string(),
                height: 0,
                syncing: false,
                latency: std::time::Duration::ZERO,
                healthy: true,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_into_result() {
        let ok: JsonRpcResponse = serde_json::from_str(r#"{"id":1,"result":5,"error":null}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), json!(5));

        let err: JsonRpcResponse =
            serde_json::from_str(r#"{"id":1,"result":null,"error":{"code":-8,"message":"Block height out of range"}}"#)
                .unwrap();
        match err.into_result() {
            Err(PoolError::Rpc { code, message }) => {
                assert_eq!(code, -8);
                assert_eq!(message, "Block height out of range");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_request_envelope() {
        let req = JsonRpcRequest::new(7, "getblock", json!(["00ab", true]));
        let text = serde_json::to_value(&req).unwrap();
        assert_eq!(text["jsonrpc"], "2.0");
        assert_eq!(text["id"], 7);
        assert_eq!(text["params"][1], true);
    }

    #[tokio::test]
    async fn test_mock_transport_bulk_preserves_order_and_errors() {
        let fixtures = FixtureMap::new()
            .with_rpc("getblockhash", json!("aa"))
            .with_rpc_error("getblock", -5, "Block not found");
        let transport = Transport::Mock(Arc::new(fixtures));

        let responses = transport
            .exec_rpc_bulk(vec![
                JsonRpcRequest::new(1, "getblock", json!(["x"])),
                JsonRpcRequest::new(2, "getblockhash", json!([1])),
            ])
            .await
            .unwrap();
        assert_eq!(responses[0].error.as_ref().unwrap().code, -5);
        assert_eq!(responses[1].result, Some(json!("aa")));
        assert!(transport.is_mock());
    }

    #[tokio::test]
    async fn test_typed_call() {
        let fixtures = FixtureMap::new().with_rpc("getblockcount", json!(1874596));
        let transport = Transport::Mock(Arc::new(fixtures));
        let height: u64 = transport.call("getblockcount", json!([])).await.unwrap();
        assert_eq!(height, 1874596);
        assert!(transport.call::<String>("getblockcount", json!([])).await.is_err());
    }
}
