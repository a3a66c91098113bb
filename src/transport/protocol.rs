// Author: Quayside contributors
// License: MIT

//! Wire types for the newline-delimited JSON protocol (spec.md §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_VERSION: u32 = 1;

/// Sent once per connection before any request is read.
#[derive(Debug, Clone, Serialize)]
pub struct Greeting {
    pub capabilities: Vec<&'static str>,
}

/// `{ "id": <any>, "method": "<dotted>", "params": <object>? }`
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// `{ "id": <echoed>, "result": <any> }` or `{ "id": <echoed>, "error": "<string>" }`
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Result { result: Value },
    Error { error: String },
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Response {
            id,
            body: ResponseBody::Result { result },
        }
    }

    pub fn err(id: Value, error: impl std::fmt::Display) -> Self {
        Response {
            id,
            body: ResponseBody::Error {
                error: error.to_string(),
            },
        }
    }

    /// The malformed-JSON response has a fixed id of `0` (spec.md §4.1).
    pub fn invalid_json() -> Self {
        Response::err(Value::from(0), "invalid json")
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"id":0,"error":"internal: failed to encode response"}"#.to_string()
        })
    }
}

/// A single `subscribe` fan-out event, framed as a `Response` whose
/// `result` is `{ service, data }`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub service: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    #[serde(rename = "apiVersion")]
    pub api_version: u32,
    pub capabilities: Vec<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_json_uses_fixed_zero_id() {
        let line = Response::invalid_json().to_line();
        assert_eq!(line, r#"{"id":0,"error":"invalid json"}"#);
    }

    #[test]
    fn ok_response_flattens_result_not_wraps_it() {
        let line = Response::ok(Value::from(7), serde_json::json!({"a": 1})).to_line();
        assert_eq!(line, r#"{"id":7,"result":{"a":1}}"#);
    }

    #[test]
    fn request_params_default_to_null_when_absent() {
        let req: Request = serde_json::from_str(r#"{"id":1,"method":"ping"}"#).unwrap();
        assert_eq!(req.params, Value::Null);
    }
}
