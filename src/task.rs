//! The task/result data model and the Unix-domain-socket wire protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::UserComputeError;

/// A unit of work submitted to [`crate::pool::Pool::compute`].
///
/// Immutable; created by the caller and consumed once.
#[derive(Clone, Debug)]
pub struct ComputeTask {
    /// Identifies the compute module to load inside the worker.
    pub module_url: String,
    /// Arbitrary JSON-serializable parameters passed to the module's `compute` export.
    pub params: serde_json::Value,
    /// Per-task deadline enforced by the supervisor.
    pub timeout: Duration,
}

impl ComputeTask {
    /// Create a new task.
    pub fn new(module_url: impl Into<String>, params: serde_json::Value, timeout: Duration) -> Self {
        Self {
            module_url: module_url.into(),
            params,
            timeout,
        }
    }
}

/// The JSON document written by the supervisor to the worker's socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireRequest {
    pub module_url: String,
    pub params: serde_json::Value,
}

impl From<&ComputeTask> for WireRequest {
    fn from(task: &ComputeTask) -> Self {
        Self {
            module_url: task.module_url.clone(),
            params: task.params.clone(),
        }
    }
}

/// The JSON document written by the worker back to the supervisor.
///
/// Exactly one of `result` or `error` is ever present; modeled as an externally
/// tagged enum over the wire via `serde(untagged)` so that the two worker-side
/// shapes (`{"result": ...}` / `{"error": {...}}`) round-trip without a
/// discriminant field.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum WireResponse {
    Result { result: serde_json::Value },
    Error { error: WireError },
}

/// The `error` shape of a [`WireResponse`].
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireError {
    pub name: String,
    pub message: String,
    pub status: u16,
}

impl From<UserComputeError> for WireError {
    fn from(err: UserComputeError) -> Self {
        Self {
            name: err.name,
            message: err.message,
            status: err.status,
        }
    }
}

impl From<WireError> for UserComputeError {
    fn from(err: WireError) -> Self {
        UserComputeError::new(err.name, err.message, err.status)
    }
}

/// The outcome of a successful `compute()` call: the worker's `result` payload,
/// or the caller sees `Err(PoolError::UserCompute(..))` for the error shape.
pub type ComputeResult = serde_json::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_response_result_round_trips() {
        let resp = WireResponse::Result {
            result: serde_json::json!({"greeting": "Hello, World"}),
        };
        let encoded = serde_json::to_string(&resp).unwrap();
        let decoded: WireResponse = serde_json::from_str(&encoded).unwrap();
        match decoded {
            WireResponse::Result { result } => {
                assert_eq!(result, serde_json::json!({"greeting": "Hello, World"}))
            }
            WireResponse::Error { .. } => panic!("expected result variant"),
        }
    }

    #[test]
    fn wire_response_error_round_trips() {
        let resp = WireResponse::Error {
            error: WireError {
                name: "RangeError".into(),
                message: "bad index".into(),
                status: 422,
            },
        };
        let encoded = serde_json::to_string(&resp).unwrap();
        let decoded: WireResponse = serde_json::from_str(&encoded).unwrap();
        match decoded {
            WireResponse::Error { error } => {
                assert_eq!(error.name, "RangeError");
                assert_eq!(error.status, 422);
            }
            WireResponse::Result { .. } => panic!("expected error variant"),
        }
    }

    #[test]
    fn wire_request_from_task() {
        let task = ComputeTask::new("registry://echo", serde_json::json!({"name": "World"}), Duration::from_secs(1));
        let req = WireRequest::from(&task);
        assert_eq!(req.module_url, "registry://echo");
        assert_eq!(req.params, serde_json::json!({"name": "World"}));
    }
}
