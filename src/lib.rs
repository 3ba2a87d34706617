//! Editor-side Language Server Protocol (LSP) client runtime.
//!
//! This crate manages the lifecycle of one external language-server process
//! per (language, project root) pair, multiplexes many open documents onto
//! that single connection, and reconciles asynchronous server responses back
//! onto the correct document state.
//!
//! The pieces, leaves first:
//!
//! - [`transport`]: byte-stream connections to a server (process stdio or
//!   socket), created from an opaque [`LaunchSpec`].
//! - [`dispatcher::RequestManager`]: encodes outbound JSON-RPC traffic,
//!   correlates responses to pending futures, and enforces per-category
//!   timeouts and capability gating through the [`TimeoutLedger`].
//! - [`session::Session`]: the state machine owning one transport and one
//!   dispatcher for a server identity; performs the `initialize` handshake
//!   and owns the set of attached documents.
//! - [`document::DocumentSyncManager`]: one per attached document; buffers
//!   local edits into the negotiated sync protocol and holds the document's
//!   diagnostics snapshot.
//! - [`registry::SessionRegistry`]: deduplicates sessions per identity with
//!   a singleflight startup path.
//! - [`extension::SessionExtension`]: the pluggable-implementation seam for
//!   servers needing protocol additions beyond the base set.
//!
//! Host-editor integration happens exclusively through the
//! [`host::EditorCallbacks`] trait; the runtime never presents UI itself.
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use lsp_types;
use lsp_types::Uri;
pub use serde_json::Value as JsonValue;

pub mod capabilities;
pub mod dispatcher;
pub mod document;
pub mod extension;
pub mod host;
pub mod ledger;
pub mod message;
pub mod registry;
pub mod session;
pub mod transport;
mod types;

pub use capabilities::{NegotiatedCapabilities, SyncKind, client_capabilities};
pub use dispatcher::RequestManager;
pub use document::{DocumentSyncManager, TextChange};
pub use extension::{BaseExtension, BaseExtensionFactory, ExtensionFactory, SessionExtension};
pub use host::{EditorCallbacks, NoOpCallbacks};
pub use ledger::{CategoryStats, RequestCategory, TimeoutLedger};
pub use message::Message;
pub use registry::{ServerDefinition, ServerIdentity, SessionRegistry};
pub use session::{ServerStatus, Session};
pub use transport::{DefaultTransportFactory, IoPair, LaunchSpec, Transport, TransportFactory};
pub use types::{AnyNotification, AnyRequest, AnyResponse, ErrorCode, RequestId, ResponseError};

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
///
/// Clonable so one terminal outcome can be fanned out to every waiter
/// (singleflight startup, crash-time cancellation).
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The transport could not be created or connected. The session is
	/// crashed; no implicit retry.
	#[error("failed to start server {server}: {reason}")]
	Startup {
		/// Display name of the server being launched.
		server: String,
		/// Why the launch failed.
		reason: String,
	},
	/// A request exceeded its category's budget. Other in-flight requests
	/// and the session itself are unaffected.
	#[error("request {0} timed out")]
	Timeout(RequestCategory),
	/// The negotiated capabilities do not advertise this category. Fails
	/// before any transport write.
	#[error("server does not advertise {0}")]
	UnsupportedCapability(RequestCategory),
	/// The session stopped or crashed while the request was pending, or a
	/// request was issued against a stopped/crashed session.
	#[error("request cancelled: session stopped or crashed")]
	Cancelled,
	/// The session is connected but the initialize handshake has not
	/// completed.
	#[error("session is not initialized")]
	NotReady,
	/// The peer violated the protocol. Individual violations are logged and
	/// discarded; only repeated violations escalate to a crash.
	#[error("protocol violation: {0}")]
	Protocol(String),
	/// A multi-file rename referenced a document that could not be
	/// resolved; no partial edit was applied.
	#[error("rename aborted: cannot resolve {uri}")]
	RenameAborted {
		/// The unresolvable document.
		uri: String,
	},
	/// The server answered with an error response.
	#[error("{0}")]
	Response(#[from] ResponseError),
	/// The peer sent undecodable or invalid JSON where valid JSON was
	/// required.
	#[error("deserialization failed: {0}")]
	Deserialize(Arc<serde_json::Error>),
	/// Input/output error on the underlying channel.
	#[error("{0}")]
	Io(Arc<std::io::Error>),
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Deserialize(Arc::new(err))
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(Arc::new(err))
	}
}

/// Convert a filesystem path to a `file://` URI.
///
/// Returns `None` for non-UTF-8 or relative paths.
pub fn uri_from_path(path: &Path) -> Option<Uri> {
	if !path.is_absolute() {
		return None;
	}
	let raw = path.to_str()?;
	let mut encoded = String::with_capacity(raw.len() + 8);
	encoded.push_str("file://");
	for byte in raw.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'/' | b'-' | b'.' | b'_' | b'~' => {
				encoded.push(byte as char);
			}
			_ => {
				encoded.push('%');
				encoded.push_str(&format!("{byte:02X}"));
			}
		}
	}
	encoded.parse().ok()
}

/// Convert a `file://` URI back to a filesystem path.
pub fn path_from_uri(uri: &Uri) -> Option<PathBuf> {
	let raw = uri.as_str().strip_prefix("file://")?;
	let mut bytes = Vec::with_capacity(raw.len());
	let mut chars = raw.bytes();
	while let Some(byte) = chars.next() {
		if byte == b'%' {
			let hi = chars.next()?;
			let lo = chars.next()?;
			let hex = [hi, lo];
			let hex = std::str::from_utf8(&hex).ok()?;
			bytes.push(u8::from_str_radix(hex, 16).ok()?);
		} else {
			bytes.push(byte);
		}
	}
	Some(PathBuf::from(String::from_utf8(bytes).ok()?))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn uri_round_trip() {
		let path = Path::new("/home/user/my project/main.rs");
		let uri = uri_from_path(path).unwrap();
		assert_eq!(uri.as_str(), "file:///home/user/my%20project/main.rs");
		assert_eq!(path_from_uri(&uri).unwrap(), path);
	}

	#[test]
	fn relative_path_has_no_uri() {
		assert!(uri_from_path(Path::new("relative/main.rs")).is_none());
	}
}
