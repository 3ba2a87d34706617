//! Per-document synchronization and language features.
//!
//! One [`DocumentSyncManager`] exists per attached document. It is the only
//! writer of that document's protocol state: the shadow text, the version
//! counter, and the diagnostics snapshot. Edits are buffered into the sync
//! flavor negotiated at initialize time and language-feature requests are
//! issued against the owning session's dispatcher.

use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use lsp_types::{
	CodeAction, CodeActionContext, CodeActionOrCommand, CodeActionParams, CompletionContext,
	CompletionParams, CompletionResponse, Diagnostic, DidChangeTextDocumentParams,
	DidCloseTextDocumentParams, DidOpenTextDocumentParams, DocumentChangeOperation,
	DocumentChanges, DocumentFormattingParams, DocumentRangeFormattingParams,
	DocumentSymbolParams, DocumentSymbolResponse,
	FormattingOptions, GotoDefinitionParams, GotoDefinitionResponse, Hover, Location, Position,
	Range, ReferenceContext, ReferenceParams, RenameParams, ResourceOp, SignatureHelp,
	SignatureHelpParams, TextDocumentContentChangeEvent, TextDocumentIdentifier,
	TextDocumentItem, TextDocumentPositionParams, TextEdit, Uri,
	VersionedTextDocumentIdentifier, WorkspaceEdit,
	notification::{DidChangeTextDocument, DidCloseTextDocument, DidOpenTextDocument},
	request::{
		CodeActionRequest, Completion, DocumentSymbolRequest, Formatting, GotoDefinition,
		HoverRequest, RangeFormatting, References, Rename, SignatureHelpRequest,
	},
};
use parking_lot::Mutex;
use ropey::Rope;

use crate::capabilities::SyncKind;
use crate::ledger::RequestCategory;
use crate::session::Session;
use crate::{Error, Result};

/// One local edit: replace `range` with `text`. A `None` range replaces the
/// whole document.
#[derive(Debug, Clone)]
pub struct TextChange {
	/// Region to replace, in UTF-16 code-unit positions.
	pub range: Option<Range>,
	/// Replacement text.
	pub text: String,
}

impl TextChange {
	/// Full-document replacement.
	pub fn full(text: impl Into<String>) -> Self {
		Self {
			range: None,
			text: text.into(),
		}
	}

	/// Ranged replacement.
	pub fn ranged(range: Range, text: impl Into<String>) -> Self {
		Self {
			range: Some(range),
			text: text.into(),
		}
	}
}

/// Protocol-side state of one attached document.
pub struct DocumentSyncManager {
	uri: Uri,
	language_id: String,
	session: Weak<Session>,
	/// Shadow copy of the document text. Held across the version bump and
	/// the outbound send so edit notifications leave in application order.
	text: Mutex<Rope>,
	version: AtomicI32,
	diagnostics: ArcSwap<Vec<Diagnostic>>,
	closed: AtomicBool,
}

impl DocumentSyncManager {
	pub(crate) fn new(
		uri: Uri,
		language_id: String,
		text: &str,
		session: Weak<Session>,
	) -> Self {
		Self {
			uri,
			language_id,
			session,
			text: Mutex::new(Rope::from_str(text)),
			version: AtomicI32::new(0),
			diagnostics: ArcSwap::from_pointee(Vec::new()),
			closed: AtomicBool::new(false),
		}
	}

	/// The document this manager synchronizes.
	pub fn uri(&self) -> &Uri {
		&self.uri
	}

	/// The version last announced to the server.
	pub fn version(&self) -> i32 {
		self.version.load(Ordering::Acquire)
	}

	/// Current shadow text.
	pub fn text(&self) -> String {
		self.text.lock().to_string()
	}

	/// Current diagnostics snapshot. Lock-free; readers that obtained a
	/// previous snapshot keep a consistent, complete set.
	pub fn diagnostics(&self) -> Arc<Vec<Diagnostic>> {
		self.diagnostics.load_full()
	}

	fn session(&self) -> Result<Arc<Session>> {
		self.session.upgrade().ok_or(Error::Cancelled)
	}

	fn check_open(&self) -> Result<()> {
		if self.closed.load(Ordering::Acquire) {
			return Err(Error::Cancelled);
		}
		Ok(())
	}

	/// Announce the document to the server. Called once by the session on
	/// attach and again on restart replay.
	pub(crate) fn announce_open(&self) -> Result<()> {
		let session = self.session()?;
		let manager = session.manager()?;
		let text = self.text.lock();
		manager.notify::<DidOpenTextDocument>(DidOpenTextDocumentParams {
			text_document: TextDocumentItem {
				uri: self.uri.clone(),
				language_id: self.language_id.clone(),
				version: self.version.load(Ordering::Acquire),
				text: text.to_string(),
			},
		})
	}

	/// Reset protocol state for a fresh connection and re-announce.
	pub(crate) fn replay_open(&self) -> Result<()> {
		self.version.store(0, Ordering::Release);
		self.announce_open()
	}

	/// Apply local edits and forward them in the negotiated sync flavor.
	///
	/// With incremental sync each change is forwarded as a ranged event;
	/// with full sync the entire updated text is sent once; with sync kind
	/// none the shadow text is updated but nothing is sent and the version
	/// does not advance.
	pub fn apply_changes(&self, changes: &[TextChange]) -> Result<()> {
		self.check_open()?;
		let session = self.session()?;
		let manager = session.manager()?;
		let sync_kind = manager
			.capabilities()
			.map(|caps| caps.sync_kind())
			.unwrap_or_default();

		let mut text = self.text.lock();
		let mut events = Vec::new();
		for change in changes {
			if sync_kind == SyncKind::Incremental {
				events.push(TextDocumentContentChangeEvent {
					range: change.range,
					range_length: None,
					text: change.text.clone(),
				});
			}
			apply_to_rope(&mut text, change);
		}

		match sync_kind {
			SyncKind::None => return Ok(()),
			SyncKind::Full => {
				events = vec![TextDocumentContentChangeEvent {
					range: None,
					range_length: None,
					text: text.to_string(),
				}];
			}
			SyncKind::Incremental => {}
		}

		let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
		manager.notify::<DidChangeTextDocument>(DidChangeTextDocumentParams {
			text_document: VersionedTextDocumentIdentifier {
				uri: self.uri.clone(),
				version,
			},
			content_changes: events,
		})
	}

	/// Announce the close, drop local diagnostic state, and render this
	/// manager inert. Idempotent.
	pub fn close(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		self.clear_diagnostics();
		let Ok(session) = self.session() else {
			return Ok(());
		};
		let Ok(manager) = session.manager() else {
			return Ok(());
		};
		manager.notify::<DidCloseTextDocument>(DidCloseTextDocumentParams {
			text_document: self.identifier(),
		})
	}

	/// Replace the diagnostics snapshot and notify the host.
	pub(crate) fn publish_diagnostics(&self, diagnostics: Vec<Diagnostic>) {
		let snapshot = Arc::new(diagnostics);
		self.diagnostics.store(snapshot.clone());
		if let Some(session) = self.session.upgrade() {
			session.callbacks().diagnostics_changed(&self.uri, &snapshot);
		}
	}

	/// Drop the diagnostics snapshot, e.g. when the session dies.
	pub(crate) fn clear_diagnostics(&self) {
		self.publish_diagnostics(Vec::new());
	}

	fn identifier(&self) -> TextDocumentIdentifier {
		TextDocumentIdentifier {
			uri: self.uri.clone(),
		}
	}

	fn position_params(&self, position: Position) -> TextDocumentPositionParams {
		TextDocumentPositionParams {
			text_document: self.identifier(),
			position,
		}
	}

	/// `textDocument/hover` at a position.
	pub async fn hover(&self, position: Position) -> Result<Option<Hover>> {
		self.check_open()?;
		self.session()?
			.manager()?
			.request::<HoverRequest>(
				RequestCategory::Hover,
				lsp_types::HoverParams {
					text_document_position_params: self.position_params(position),
					work_done_progress_params: Default::default(),
				},
			)
			.await
	}

	/// `textDocument/completion` at a position, refined by the session
	/// extension before being handed back.
	pub async fn completion(
		&self,
		position: Position,
		context: Option<CompletionContext>,
	) -> Result<Option<CompletionResponse>> {
		self.check_open()?;
		let session = self.session()?;
		let response = session
			.manager()?
			.request::<Completion>(
				RequestCategory::Completion,
				CompletionParams {
					text_document_position: self.position_params(position),
					context,
					work_done_progress_params: Default::default(),
					partial_result_params: Default::default(),
				},
			)
			.await?;
		Ok(response.map(|r| session.extension().refine_completions(r)))
	}

	/// `textDocument/definition` at a position.
	pub async fn definition(&self, position: Position) -> Result<Option<GotoDefinitionResponse>> {
		self.check_open()?;
		self.session()?
			.manager()?
			.request::<GotoDefinition>(
				RequestCategory::Definition,
				GotoDefinitionParams {
					text_document_position_params: self.position_params(position),
					work_done_progress_params: Default::default(),
					partial_result_params: Default::default(),
				},
			)
			.await
	}

	/// `textDocument/references` at a position.
	pub async fn references(
		&self,
		position: Position,
		include_declaration: bool,
	) -> Result<Option<Vec<Location>>> {
		self.check_open()?;
		self.session()?
			.manager()?
			.request::<References>(
				RequestCategory::References,
				ReferenceParams {
					text_document_position: self.position_params(position),
					context: ReferenceContext {
						include_declaration,
					},
					work_done_progress_params: Default::default(),
					partial_result_params: Default::default(),
				},
			)
			.await
	}

	/// `textDocument/documentSymbol` for the whole document.
	pub async fn document_symbols(&self) -> Result<Option<DocumentSymbolResponse>> {
		self.check_open()?;
		self.session()?
			.manager()?
			.request::<DocumentSymbolRequest>(
				RequestCategory::DocumentSymbol,
				DocumentSymbolParams {
					text_document: self.identifier(),
					work_done_progress_params: Default::default(),
					partial_result_params: Default::default(),
				},
			)
			.await
	}

	/// `textDocument/formatting` for the whole document.
	pub async fn formatting(&self, options: FormattingOptions) -> Result<Option<Vec<TextEdit>>> {
		self.check_open()?;
		self.session()?
			.manager()?
			.request::<Formatting>(
				RequestCategory::Formatting,
				DocumentFormattingParams {
					text_document: self.identifier(),
					options,
					work_done_progress_params: Default::default(),
				},
			)
			.await
	}

	/// `textDocument/rangeFormatting` for a region of the document.
	pub async fn range_formatting(
		&self,
		range: Range,
		options: FormattingOptions,
	) -> Result<Option<Vec<TextEdit>>> {
		self.check_open()?;
		self.session()?
			.manager()?
			.request::<RangeFormatting>(
				RequestCategory::RangeFormatting,
				DocumentRangeFormattingParams {
					text_document: self.identifier(),
					range,
					options,
					work_done_progress_params: Default::default(),
				},
			)
			.await
	}

	/// `textDocument/codeAction` for a range, seeded with the current
	/// diagnostics overlapping it.
	pub async fn code_actions(&self, range: Range) -> Result<Vec<CodeAction>> {
		self.check_open()?;
		let diagnostics = self
			.diagnostics
			.load()
			.iter()
			.filter(|d| ranges_overlap(d.range, range))
			.cloned()
			.collect();
		let response = self
			.session()?
			.manager()?
			.request::<CodeActionRequest>(
				RequestCategory::CodeAction,
				CodeActionParams {
					text_document: self.identifier(),
					range,
					context: CodeActionContext {
						diagnostics,
						only: None,
						trigger_kind: None,
					},
					work_done_progress_params: Default::default(),
					partial_result_params: Default::default(),
				},
			)
			.await?;
		Ok(response
			.unwrap_or_default()
			.into_iter()
			.filter_map(|entry| match entry {
				CodeActionOrCommand::CodeAction(action) => Some(action),
				CodeActionOrCommand::Command(_) => None,
			})
			.collect())
	}

	/// `textDocument/signatureHelp` at a position.
	pub async fn signature_help(&self, position: Position) -> Result<Option<SignatureHelp>> {
		self.check_open()?;
		self.session()?
			.manager()?
			.request::<SignatureHelpRequest>(
				RequestCategory::SignatureHelp,
				SignatureHelpParams {
					text_document_position_params: self.position_params(position),
					context: None,
					work_done_progress_params: Default::default(),
				},
			)
			.await
	}

	/// `textDocument/rename`, applied all-or-nothing.
	///
	/// Phase one asks the server for the workspace edit. Phase two verifies
	/// every touched document is either attached or resolvable by the host
	/// before anything is applied; if any is not, nothing is applied and
	/// [`Error::RenameAborted`] is returned. Returns whether the host
	/// accepted the edit.
	pub async fn rename(&self, position: Position, new_name: String) -> Result<bool> {
		self.check_open()?;
		let session = self.session()?;
		let Some(edit) = session
			.manager()?
			.request::<Rename>(
				RequestCategory::Rename,
				RenameParams {
					text_document_position: self.position_params(position),
					new_name,
					work_done_progress_params: Default::default(),
				},
			)
			.await?
		else {
			return Ok(false);
		};

		for uri in touched_documents(&edit) {
			let resolvable =
				session.document(&uri).is_some() || session.callbacks().can_resolve_document(&uri);
			if !resolvable {
				tracing::warn!(uri = %uri.as_str(), "rename touches unresolvable document");
				return Err(Error::RenameAborted {
					uri: uri.as_str().to_owned(),
				});
			}
		}

		Ok(session.callbacks().apply_workspace_edit(&edit))
	}
}

/// Every document a workspace edit touches, including resource operations.
fn touched_documents(edit: &WorkspaceEdit) -> Vec<Uri> {
	let mut uris = Vec::new();
	if let Some(changes) = &edit.changes {
		uris.extend(changes.keys().cloned());
	}
	match &edit.document_changes {
		Some(DocumentChanges::Edits(edits)) => {
			uris.extend(edits.iter().map(|e| e.text_document.uri.clone()));
		}
		Some(DocumentChanges::Operations(ops)) => {
			for op in ops {
				match op {
					DocumentChangeOperation::Edit(e) => uris.push(e.text_document.uri.clone()),
					DocumentChangeOperation::Op(ResourceOp::Create(c)) => {
						uris.push(c.uri.clone());
					}
					DocumentChangeOperation::Op(ResourceOp::Rename(r)) => {
						uris.push(r.old_uri.clone());
					}
					DocumentChangeOperation::Op(ResourceOp::Delete(d)) => {
						uris.push(d.uri.clone());
					}
				}
			}
		}
		None => {}
	}
	uris
}

fn ranges_overlap(a: Range, b: Range) -> bool {
	a.start <= b.end && b.start <= a.end
}

/// Char index of a UTF-16 position, clamped to the document.
fn position_to_char(rope: &Rope, position: Position) -> usize {
	let line = position.line as usize;
	if line >= rope.len_lines() {
		return rope.len_chars();
	}
	let line_start = rope.line_to_char(line);
	let slice = rope.line(line);
	let mut code_units = 0u32;
	let mut chars = 0usize;
	for ch in slice.chars() {
		if code_units >= position.character || ch == '\n' {
			break;
		}
		code_units += ch.len_utf16() as u32;
		chars += 1;
	}
	line_start + chars
}

fn apply_to_rope(rope: &mut Rope, change: &TextChange) {
	match change.range {
		None => *rope = Rope::from_str(&change.text),
		Some(range) => {
			let start = position_to_char(rope, range.start);
			let end = position_to_char(rope, range.end).max(start);
			rope.remove(start..end);
			rope.insert(start, &change.text);
		}
	}
}
