//! Content-Length framed JSON-RPC messages over arbitrary byte streams.

use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::{AnyNotification, AnyRequest, AnyResponse, RequestId};
use crate::{Error, Result};

/// A framed JSON-RPC message, classified by shape.
///
/// A payload with `id` and `method` is a request, `method` without `id` is a
/// notification, and `id` without `method` is a response.
#[derive(Debug, Clone)]
pub enum Message {
	/// A request expecting a response with the same id.
	Request(AnyRequest),
	/// A response to a previously issued request.
	Response(AnyResponse),
	/// A fire-and-forget notification.
	Notification(AnyNotification),
}

impl Message {
	/// Read one framed message. Returns `Ok(None)` on a clean EOF at a frame
	/// boundary.
	///
	/// A syntactically broken body is reported as [`Error::Protocol`] after
	/// the frame has been consumed, so the caller may keep reading.
	pub async fn read(reader: &mut (impl AsyncBufRead + Unpin + Send)) -> Result<Option<Self>> {
		let mut content_length: Option<usize> = None;
		let mut line = String::new();
		loop {
			line.clear();
			if reader.read_line(&mut line).await? == 0 {
				return if content_length.is_none() {
					Ok(None)
				} else {
					Err(Error::Io(std::sync::Arc::new(std::io::Error::new(
						std::io::ErrorKind::UnexpectedEof,
						"EOF inside message headers",
					))))
				};
			}
			let header = line.trim_end();
			if header.is_empty() {
				break;
			}
			if let Some(value) = header.strip_prefix("Content-Length: ") {
				content_length = value.trim().parse().ok();
			}
		}

		let length =
			content_length.ok_or_else(|| Error::Protocol("missing Content-Length header".into()))?;
		let mut body = vec![0u8; length];
		reader.read_exact(&mut body).await?;

		let value: JsonValue = serde_json::from_slice(&body)
			.map_err(|e| Error::Protocol(format!("undecodable message body: {e}")))?;
		Self::classify(value).map(Some)
	}

	/// Write one framed message and flush.
	pub async fn write(&self, writer: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
		let payload = match self {
			Self::Request(req) => serde_json::json!({
				"jsonrpc": "2.0",
				"id": req.id,
				"method": req.method,
				"params": req.params,
			}),
			Self::Notification(notif) => serde_json::json!({
				"jsonrpc": "2.0",
				"method": notif.method,
				"params": notif.params,
			}),
			Self::Response(resp) => match &resp.error {
				None => serde_json::json!({
					"jsonrpc": "2.0",
					"id": resp.id,
					"result": resp.result.clone().unwrap_or(JsonValue::Null),
				}),
				Some(err) => serde_json::json!({
					"jsonrpc": "2.0",
					"id": resp.id,
					"error": err,
				}),
			},
		};

		let body = serde_json::to_string(&payload)?;
		let framed = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
		writer.write_all(framed.as_bytes()).await?;
		writer.flush().await?;
		Ok(())
	}

	fn classify(value: JsonValue) -> Result<Self> {
		let has_id = value.get("id").is_some_and(|id| !id.is_null());
		let has_method = value.get("method").is_some();
		match (has_id, has_method) {
			(true, true) => {
				let id = parse_id(&value["id"])?;
				let method = method_str(&value)?;
				let params = value.get("params").cloned().unwrap_or(JsonValue::Null);
				Ok(Self::Request(AnyRequest { id, method, params }))
			}
			(false, true) => {
				let method = method_str(&value)?;
				let params = value.get("params").cloned().unwrap_or(JsonValue::Null);
				Ok(Self::Notification(AnyNotification { method, params }))
			}
			(true, false) => {
				let resp: AnyResponse = serde_json::from_value(value)
					.map_err(|e| Error::Protocol(format!("malformed response: {e}")))?;
				Ok(Self::Response(resp))
			}
			(false, false) => Err(Error::Protocol(
				"message carries neither id nor method".into(),
			)),
		}
	}
}

fn parse_id(value: &JsonValue) -> Result<RequestId> {
	match value {
		JsonValue::Number(n) => n
			.as_i64()
			.map(RequestId::Number)
			.ok_or_else(|| Error::Protocol(format!("non-integer request id: {n}"))),
		JsonValue::String(s) => Ok(RequestId::String(s.clone())),
		other => Err(Error::Protocol(format!("invalid request id: {other}"))),
	}
}

fn method_str(value: &JsonValue) -> Result<String> {
	value["method"]
		.as_str()
		.map(str::to_owned)
		.ok_or_else(|| Error::Protocol("method is not a string".into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn framed_round_trip_preserves_classification() {
		let mut buf = Vec::new();
		Message::Request(AnyRequest {
			id: RequestId::Number(7),
			method: "textDocument/hover".into(),
			params: serde_json::json!({"x": 1}),
		})
		.write(&mut buf)
		.await
		.unwrap();
		Message::Notification(AnyNotification {
			method: "initialized".into(),
			params: serde_json::json!({}),
		})
		.write(&mut buf)
		.await
		.unwrap();

		let mut reader = std::io::Cursor::new(buf);
		let first = Message::read(&mut reader).await.unwrap().unwrap();
		assert!(matches!(first, Message::Request(ref r) if r.id == RequestId::Number(7)));
		let second = Message::read(&mut reader).await.unwrap().unwrap();
		assert!(matches!(second, Message::Notification(ref n) if n.method == "initialized"));
		assert!(Message::read(&mut reader).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn broken_body_is_recoverable() {
		let garbage = b"Content-Length: 3\r\n\r\n{{{";
		let mut reader = std::io::Cursor::new(garbage.to_vec());
		let err = Message::read(&mut reader).await.unwrap_err();
		assert!(matches!(err, Error::Protocol(_)));
		// The frame was consumed; the stream is at EOF, not desynced.
		assert!(Message::read(&mut reader).await.unwrap().is_none());
	}
}
