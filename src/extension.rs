//! Pluggable per-server behavior.
//!
//! A deployment supplies an [`ExtensionFactory`]; the registry resolves it
//! once per server identity and the resulting [`SessionExtension`] is applied
//! uniformly to every document attached under that identity. This is the one
//! deliberate dynamic-dispatch seam in the runtime.

use std::sync::Arc;

use lsp_types::CompletionResponse;
use serde_json::Value as JsonValue;

use crate::capabilities::NegotiatedCapabilities;
use crate::ledger::RequestCategory;
use crate::registry::ServerIdentity;

/// Per-server behavioral overrides.
///
/// The default implementation of every method is the base behavior; an
/// extension overrides only what its server needs.
pub trait SessionExtension: Send + Sync {
	/// Capability gate consulted by the dispatcher before every request.
	///
	/// Overriding this lets an extension admit request categories its server
	/// supports without advertising, or veto categories that misbehave.
	fn advertises(&self, category: RequestCategory, capabilities: &NegotiatedCapabilities) -> bool {
		capabilities.supports(category)
	}

	/// Post-process a completion response, e.g. to merge server-specific
	/// data into the items.
	fn refine_completions(&self, response: CompletionResponse) -> CompletionResponse {
		response
	}

	/// Intercept an inbound notification before base routing. Return `true`
	/// to consume it.
	fn handle_notification(&self, method: &str, params: &JsonValue) -> bool {
		let _ = (method, params);
		false
	}
}

/// The base extension: no overrides.
pub struct BaseExtension;

impl SessionExtension for BaseExtension {}

/// Resolves the extension for a server identity.
pub trait ExtensionFactory: Send + Sync {
	/// Create the extension applied to every session under `identity`.
	fn create(&self, identity: &ServerIdentity) -> Arc<dyn SessionExtension>;
}

/// Factory that hands out [`BaseExtension`] for every identity.
pub struct BaseExtensionFactory;

impl ExtensionFactory for BaseExtensionFactory {
	fn create(&self, _identity: &ServerIdentity) -> Arc<dyn SessionExtension> {
		Arc::new(BaseExtension)
	}
}
