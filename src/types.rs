//! JSON-RPC envelope types shared by the dispatcher and transport layers.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Correlation id linking an outbound request to its eventual response.
///
/// Ids are allocated from a process-global counter and never reused across
/// sessions, so a response from a restarted server can never resolve a
/// request issued against the previous connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	/// Numeric id. The client always allocates these.
	Number(i64),
	/// String id. Only seen on server-initiated requests.
	String(String),
}

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Number(n) => write!(f, "{n}"),
			Self::String(s) => write!(f, "{s}"),
		}
	}
}

/// An untyped JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyRequest {
	/// Correlation id.
	pub id: RequestId,
	/// Method name, e.g. `textDocument/hover`.
	pub method: String,
	/// Parameters as raw JSON.
	#[serde(default)]
	pub params: JsonValue,
}

/// An untyped JSON-RPC notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyNotification {
	/// Method name, e.g. `textDocument/didChange`.
	pub method: String,
	/// Parameters as raw JSON.
	#[serde(default)]
	pub params: JsonValue,
}

/// An untyped JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyResponse {
	/// Correlation id of the request being answered.
	pub id: RequestId,
	/// Result payload on success.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	/// Error payload on failure.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

/// A JSON-RPC error object returned by the peer.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct ResponseError {
	/// Error code. See [`ErrorCode`] for well-known values.
	pub code: i64,
	/// Human-readable message.
	pub message: String,
	/// Optional structured data.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	/// Build an error with a code and message, no data.
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}
}

/// Well-known JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
	/// The method does not exist or is not available.
	MethodNotFound,
	/// Invalid method parameters.
	InvalidParams,
	/// Internal JSON-RPC error.
	InternalError,
	/// The request was cancelled before completion.
	RequestCancelled,
}

impl ErrorCode {
	/// Numeric wire value of this code.
	pub const fn code(self) -> i64 {
		match self {
			Self::MethodNotFound => -32601,
			Self::InvalidParams => -32602,
			Self::InternalError => -32603,
			Self::RequestCancelled => -32800,
		}
	}
}
