//! Capability negotiation: what the client advertises and what the server
//! answered with.

use lsp_types::{
	ClientCapabilities, CompletionClientCapabilities, CompletionItemCapability,
	GeneralClientCapabilities, HoverClientCapabilities, MarkupKind, OneOf, PositionEncodingKind,
	PublishDiagnosticsClientCapabilities, RenameClientCapabilities, ServerCapabilities,
	SignatureHelpClientCapabilities, TextDocumentClientCapabilities, TextDocumentSyncCapability,
	TextDocumentSyncKind, WindowClientCapabilities, WorkspaceClientCapabilities,
};

use crate::ledger::RequestCategory;

/// Negotiated strategy for informing the server of edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncKind {
	/// Server declines to be informed of edits.
	#[default]
	None,
	/// Every change carries the full document text.
	Full,
	/// Changes are sent as ordered range-replacement deltas.
	Incremental,
}

/// The server's negotiated capabilities, parsed once after `initialize` and
/// immutable for the session's life.
#[derive(Debug, Clone)]
pub struct NegotiatedCapabilities {
	sync_kind: SyncKind,
	raw: ServerCapabilities,
}

impl NegotiatedCapabilities {
	/// Parse the raw `initialize` result into the fixed descriptor.
	pub fn new(raw: ServerCapabilities) -> Self {
		let sync_kind = match &raw.text_document_sync {
			Some(TextDocumentSyncCapability::Kind(kind)) => kind_to_sync(*kind),
			Some(TextDocumentSyncCapability::Options(opts)) => {
				opts.change.map(kind_to_sync).unwrap_or(SyncKind::None)
			}
			None => SyncKind::None,
		};
		Self { sync_kind, raw }
	}

	/// The negotiated document synchronization strategy.
	pub fn sync_kind(&self) -> SyncKind {
		self.sync_kind
	}

	/// Whether the server advertises support for a request category.
	///
	/// `Initialize` and `Shutdown` are part of the base protocol and always
	/// supported.
	pub fn supports(&self, category: RequestCategory) -> bool {
		let caps = &self.raw;
		match category {
			RequestCategory::Initialize | RequestCategory::Shutdown => true,
			RequestCategory::Completion => caps.completion_provider.is_some(),
			RequestCategory::Hover => caps.hover_provider.is_some(),
			RequestCategory::Definition => one_of_set(&caps.definition_provider),
			RequestCategory::References => one_of_set(&caps.references_provider),
			RequestCategory::DocumentSymbol => one_of_set(&caps.document_symbol_provider),
			RequestCategory::Formatting => one_of_set(&caps.document_formatting_provider),
			RequestCategory::RangeFormatting => {
				one_of_set(&caps.document_range_formatting_provider)
			}
			RequestCategory::CodeAction => caps.code_action_provider.is_some(),
			RequestCategory::SignatureHelp => caps.signature_help_provider.is_some(),
			RequestCategory::Rename => match &caps.rename_provider {
				Some(OneOf::Left(enabled)) => *enabled,
				Some(OneOf::Right(_)) => true,
				None => false,
			},
			RequestCategory::ExecuteCommand => caps.execute_command_provider.is_some(),
		}
	}

	/// The raw server capabilities, for collaborators needing per-category
	/// options beyond the boolean gate.
	pub fn raw(&self) -> &ServerCapabilities {
		&self.raw
	}
}

fn kind_to_sync(kind: TextDocumentSyncKind) -> SyncKind {
	if kind == TextDocumentSyncKind::FULL {
		SyncKind::Full
	} else if kind == TextDocumentSyncKind::INCREMENTAL {
		SyncKind::Incremental
	} else {
		SyncKind::None
	}
}

fn one_of_set<T>(provider: &Option<OneOf<bool, T>>) -> bool {
	match provider {
		Some(OneOf::Left(enabled)) => *enabled,
		Some(OneOf::Right(_)) => true,
		None => false,
	}
}

/// Build the client capabilities advertised during `initialize`.
pub fn client_capabilities(enable_snippets: bool) -> ClientCapabilities {
	ClientCapabilities {
		workspace: Some(WorkspaceClientCapabilities {
			apply_edit: Some(true),
			workspace_folders: Some(true),
			configuration: Some(true),
			execute_command: Some(lsp_types::DynamicRegistrationClientCapabilities {
				dynamic_registration: Some(false),
			}),
			workspace_edit: Some(lsp_types::WorkspaceEditClientCapabilities {
				document_changes: Some(true),
				failure_handling: Some(lsp_types::FailureHandlingKind::Abort),
				..Default::default()
			}),
			..Default::default()
		}),
		text_document: Some(TextDocumentClientCapabilities {
			completion: Some(CompletionClientCapabilities {
				completion_item: Some(CompletionItemCapability {
					snippet_support: Some(enable_snippets),
					insert_replace_support: Some(true),
					deprecated_support: Some(true),
					..Default::default()
				}),
				..Default::default()
			}),
			hover: Some(HoverClientCapabilities {
				content_format: Some(vec![MarkupKind::Markdown]),
				..Default::default()
			}),
			signature_help: Some(SignatureHelpClientCapabilities {
				..Default::default()
			}),
			rename: Some(RenameClientCapabilities {
				dynamic_registration: Some(false),
				prepare_support: Some(true),
				..Default::default()
			}),
			formatting: Some(lsp_types::DocumentFormattingClientCapabilities {
				dynamic_registration: Some(false),
			}),
			range_formatting: Some(lsp_types::DocumentRangeFormattingClientCapabilities {
				dynamic_registration: Some(false),
			}),
			publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
				version_support: Some(true),
				..Default::default()
			}),
			..Default::default()
		}),
		window: Some(WindowClientCapabilities {
			work_done_progress: Some(true),
			..Default::default()
		}),
		general: Some(GeneralClientCapabilities {
			position_encodings: Some(vec![PositionEncodingKind::UTF16]),
			..Default::default()
		}),
		..Default::default()
	}
}
