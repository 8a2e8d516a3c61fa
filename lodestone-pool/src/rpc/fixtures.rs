//! Canned node responses for adapters running without a live node.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::RpcError;
use crate::error::{PoolError, Result};

#[derive(Debug, Clone)]
enum Reply {
    Result(Value),
    Error(RpcError),
}

impl Reply {
    fn into_result(self) -> Result<Value> {
        match self {
            Reply::Result(value) => Ok(value),
            Reply::Error(err) => Err(err.into()),
        }
    }
}

/// Responses keyed by RPC method (optionally narrowed by params) or by
/// `"<HTTP METHOD> <path>"`. Every call is recorded for later inspection.
#[derive(Debug, Default)]
pub struct FixtureMap {
    rpc: HashMap<String, Reply>,
    http: HashMap<String, Reply>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FixtureMap {
    pub const HOST_ID: &'static str = "fixture";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rpc(mut self, method: &str, result: Value) -> Self {
        self.rpc.insert(method.to_string(), Reply::Result(result));
        self
    }

    /// Answer only when called with exactly `params`.
    pub fn with_rpc_for(mut self, method: &str, params: Value, result: Value) -> Self {
        self.rpc.insert(params_key(method, &params), Reply::Result(result));
        self
    }

    pub fn with_rpc_error(mut self, method: &str, code: i64, message: &str) -> Self {
        self.rpc.insert(
            method.to_string(),
            Reply::Error(RpcError {
                code,
                message: message.to_string(),
            }),
        );
        self
    }

    pub fn with_http(mut self, method: &str, path: &str, result: Value) -> Self {
        self.http.insert(http_key(method, path), Reply::Result(result));
        self
    }

    pub(crate) fn rpc(&self, method: &str, params: &Value) -> Result<Value> {
        self.record(method.to_string(), params.clone());
        self.rpc
            .get(&params_key(method, params))
            .or_else(|| self.rpc.get(method))
            .cloned()
            .ok_or_else(|| PoolError::upstream(format!("no fixture for rpc {}", method)))?
            .into_result()
    }

    pub(crate) fn http(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value> {
        let key = http_key(method, path);
        self.record(key.clone(), body.cloned().unwrap_or(Value::Null));
        self.http
            .get(&key)
            .cloned()
            .ok_or_else(|| PoolError::upstream(format!("no fixture for {}", key)))?
            .into_result()
    }

    fn record(&self, key: String, params: Value) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((key, params));
        }
    }

    /// Params of every recorded call to `key`, oldest first.
    pub fn calls_to(&self, key: &str) -> Vec<Value> {
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .filter(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn params_key(method: &str, params: &Value) -> String {
    format!("{}:{}", method, params)
}

fn http_key(method: &str, path: &str) -> String {
    format!("{} {}", method, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_specific_fixture_wins() {
        let fixtures = FixtureMap::new()
            .with_rpc("getblockhash", json!("default"))
            .with_rpc_for("getblockhash", json!([5]), json!("five"));
        assert_eq!(fixtures.rpc("getblockhash", &json!([5])).unwrap(), json!("five"));
        assert_eq!(fixtures.rpc("getblockhash", &json!([6])).unwrap(), json!("default"));
        assert_eq!(fixtures.calls_to("getblockhash").len(), 2);
    }

    #[test]
    fn test_missing_fixture_is_upstream_error() {
        let fixtures = FixtureMap::new();
        assert!(matches!(
            fixtures.rpc("getblockcount", &json!([])),
            Err(PoolError::Upstream(_))
        ));
        assert!(fixtures.http("GET", "/v3/status", None).is_err());
    }

    #[test]
    fn test_http_records_body() {
        let fixtures = FixtureMap::new().with_http("POST", "/v3/transactions", json!({"tx_hash": "th_1"}));
        let reply = fixtures
            .http("POST", "/v3/transactions", Some(&json!({"tx": "tx_abc"})))
            .unwrap();
        assert_eq!(reply["tx_hash"], "th_1");
        assert_eq!(fixtures.calls_to("POST /v3/transactions"), vec![json!({"tx": "tx_abc"})]);
    }
}
