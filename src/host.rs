//! Outbound interface to the host editor.

use lsp_types::{Diagnostic, Uri, WorkspaceEdit};

use crate::capabilities::NegotiatedCapabilities;
use crate::registry::ServerIdentity;
use crate::session::ServerStatus;

/// Callbacks from the runtime to the host editor.
///
/// The runtime never renders anything itself; every user-visible effect goes
/// through this trait. All methods are invoked from background tasks and
/// must not block for long.
pub trait EditorCallbacks: Send + Sync {
	/// A document's diagnostics set was replaced. The slice is the complete
	/// new set.
	fn diagnostics_changed(&self, uri: &Uri, diagnostics: &[Diagnostic]) {
		let _ = (uri, diagnostics);
	}

	/// A session's status changed. Fired exactly once per transition.
	fn server_status_changed(&self, identity: &ServerIdentity, old: ServerStatus, new: ServerStatus) {
		let _ = (identity, old, new);
	}

	/// Capability negotiation completed for a session.
	fn capabilities_ready(&self, identity: &ServerIdentity, capabilities: &NegotiatedCapabilities) {
		let _ = (identity, capabilities);
	}

	/// Apply a workspace edit atomically. Returns whether the edit was
	/// applied. Used both for server-initiated `workspace/applyEdit` and the
	/// second phase of rename.
	fn apply_workspace_edit(&self, edit: &WorkspaceEdit) -> bool {
		let _ = edit;
		false
	}

	/// Whether the host can resolve a document the runtime has not attached.
	/// Consulted by the rename pre-check for edits touching other files.
	fn can_resolve_document(&self, uri: &Uri) -> bool {
		crate::path_from_uri(uri).is_some_and(|path| path.exists())
	}
}

/// Callback implementation that ignores every event.
pub struct NoOpCallbacks;

impl EditorCallbacks for NoOpCallbacks {}
