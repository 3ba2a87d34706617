//! Per-category request budgets and rolling success/failure accounting.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;

/// Request categories the dispatcher gates and accounts for.
///
/// Each category maps to exactly one LSP method. The set is fixed at compile
/// time; servers opt in per category through capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCategory {
	/// The `initialize` handshake. Exempt from capability gating.
	Initialize,
	/// Graceful `shutdown` request.
	Shutdown,
	/// `textDocument/completion`.
	Completion,
	/// `textDocument/hover`.
	Hover,
	/// `textDocument/definition`.
	Definition,
	/// `textDocument/references`.
	References,
	/// `textDocument/documentSymbol`.
	DocumentSymbol,
	/// `textDocument/formatting`.
	Formatting,
	/// `textDocument/rangeFormatting`.
	RangeFormatting,
	/// `textDocument/codeAction`.
	CodeAction,
	/// `textDocument/signatureHelp`.
	SignatureHelp,
	/// `textDocument/rename`.
	Rename,
	/// `workspace/executeCommand`.
	ExecuteCommand,
}

impl RequestCategory {
	/// The LSP method name for this category.
	pub const fn method(self) -> &'static str {
		match self {
			Self::Initialize => "initialize",
			Self::Shutdown => "shutdown",
			Self::Completion => "textDocument/completion",
			Self::Hover => "textDocument/hover",
			Self::Definition => "textDocument/definition",
			Self::References => "textDocument/references",
			Self::DocumentSymbol => "textDocument/documentSymbol",
			Self::Formatting => "textDocument/formatting",
			Self::RangeFormatting => "textDocument/rangeFormatting",
			Self::CodeAction => "textDocument/codeAction",
			Self::SignatureHelp => "textDocument/signatureHelp",
			Self::Rename => "textDocument/rename",
			Self::ExecuteCommand => "workspace/executeCommand",
		}
	}
}

impl std::fmt::Display for RequestCategory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.method())
	}
}

/// Budget and rolling counters for one request category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryStats {
	/// Time budget for requests of this category. `Duration::ZERO` disables
	/// the budget entirely.
	pub timeout: Duration,
	/// Requests that resolved successfully.
	pub success: u64,
	/// Requests that timed out or were answered with an error.
	pub failure: u64,
}

/// Tracks, per request category, a configurable timeout and rolling
/// success/failure counts.
///
/// Read by the dispatcher before every request; read/written by operational
/// tooling through the session's health surface. The ledger never drives
/// retries itself.
#[derive(Debug)]
pub struct TimeoutLedger {
	entries: RwLock<HashMap<RequestCategory, CategoryStats>>,
	default_timeout: Duration,
}

impl TimeoutLedger {
	/// Create a ledger with the given default budget for unconfigured
	/// categories.
	pub fn new(default_timeout: Duration) -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
			default_timeout,
		}
	}

	/// The current budget for a category.
	pub fn timeout(&self, category: RequestCategory) -> Duration {
		self.entries
			.read()
			.get(&category)
			.map(|s| s.timeout)
			.unwrap_or(self.default_timeout)
	}

	/// Override the budget for a category. Takes effect for the next request
	/// of that category; in-flight requests keep the budget they started with.
	pub fn set_timeout(&self, category: RequestCategory, timeout: Duration) {
		self.entry(category, |stats| stats.timeout = timeout);
	}

	/// Record a successful resolution.
	pub fn record_success(&self, category: RequestCategory) {
		self.entry(category, |stats| stats.success += 1);
	}

	/// Record a timeout or error resolution.
	pub fn record_failure(&self, category: RequestCategory) {
		self.entry(category, |stats| stats.failure += 1);
	}

	/// Snapshot of every category that has a configured budget or recorded
	/// outcome.
	pub fn snapshot(&self) -> HashMap<RequestCategory, CategoryStats> {
		self.entries.read().clone()
	}

	fn entry(&self, category: RequestCategory, update: impl FnOnce(&mut CategoryStats)) {
		let mut entries = self.entries.write();
		let stats = entries.entry(category).or_insert(CategoryStats {
			timeout: self.default_timeout,
			success: 0,
			failure: 0,
		});
		update(stats);
	}
}

impl Default for TimeoutLedger {
	fn default() -> Self {
		Self::new(Duration::from_secs(30))
	}
}
