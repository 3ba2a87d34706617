//! Session lifecycle: one server connection per identity.
//!
//! A [`Session`] owns the transport, the dispatcher, and the set of attached
//! documents for one (language, root) identity. It drives the `initialize`
//! handshake, routes inbound traffic, and funnels both explicit stops and
//! transport crashes through a single teardown path so pending requests are
//! always cancelled and status observers always see exactly one transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use lsp_types::{
	ApplyWorkspaceEditParams, ApplyWorkspaceEditResponse, ClientInfo, ConfigurationParams,
	ExecuteCommandParams, InitializeParams, InitializedParams, LogMessageParams, MessageType,
	PublishDiagnosticsParams, ShowMessageParams, Uri, WorkspaceFolder,
	notification::{
		Exit, Initialized, LogMessage, Notification as _, Progress, PublishDiagnostics,
		ShowMessage,
	},
	request::{
		ApplyWorkspaceEdit, ExecuteCommand, Initialize, RegisterCapability, Request as _,
		Shutdown, UnregisterCapability, WorkDoneProgressCreate, WorkspaceConfiguration,
	},
};
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::capabilities::{NegotiatedCapabilities, client_capabilities};
use crate::dispatcher::{Outbound, RequestManager};
use crate::document::DocumentSyncManager;
use crate::extension::SessionExtension;
use crate::host::EditorCallbacks;
use crate::ledger::{CategoryStats, RequestCategory, TimeoutLedger};
use crate::message::Message;
use crate::registry::{ServerDefinition, ServerIdentity};
use crate::transport::Transport;
use crate::types::{AnyNotification, AnyRequest, AnyResponse, ErrorCode, ResponseError};
use crate::{Error, Result, uri_from_path};

#[cfg(test)]
mod tests;

/// Consecutive protocol violations tolerated on one connection before it is
/// abandoned as crashed.
const PROTOCOL_VIOLATION_LIMIT: u32 = 5;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
	/// No connection exists.
	Stopped,
	/// The transport is being established.
	Starting,
	/// Connected; the `initialize` handshake has not completed.
	Started,
	/// Handshake complete; the session serves requests.
	Initialized,
	/// A graceful shutdown is in progress.
	Stopping,
	/// The connection died or startup failed. Terminal until an explicit
	/// start or restart.
	Crashed,
}

/// State tied to one live connection. Replaced wholesale on restart.
struct Link {
	manager: Arc<RequestManager>,
	reader_task: JoinHandle<()>,
	writer_task: JoinHandle<()>,
	generation: u64,
}

/// One language server session.
///
/// All lifecycle operations (`start`, `stop`, `restart`) serialize on an
/// internal lock; feature requests go through the lock-free dispatcher slot
/// and never contend with lifecycle changes.
pub struct Session {
	identity: ServerIdentity,
	definition: ServerDefinition,
	transport: Arc<dyn Transport>,
	callbacks: Arc<dyn EditorCallbacks>,
	extension: Arc<dyn SessionExtension>,
	ledger: Arc<TimeoutLedger>,
	status_tx: watch::Sender<ServerStatus>,
	/// Dispatcher of the current connection, if any.
	current: ArcSwapOption<RequestManager>,
	link: tokio::sync::Mutex<Option<Link>>,
	documents: parking_lot::Mutex<HashMap<Uri, Arc<DocumentSyncManager>>>,
	next_generation: AtomicU64,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("identity", &self.identity)
			.field("status", &self.status())
			.finish_non_exhaustive()
	}
}

impl Session {
	/// Create a stopped session. Call [`Session::start`] to connect.
	pub fn new(
		identity: ServerIdentity,
		definition: ServerDefinition,
		transport: Arc<dyn Transport>,
		callbacks: Arc<dyn EditorCallbacks>,
		extension: Arc<dyn SessionExtension>,
	) -> Arc<Self> {
		let ledger = Arc::new(TimeoutLedger::new(definition.default_timeout));
		let (status_tx, _) = watch::channel(ServerStatus::Stopped);
		Arc::new(Self {
			identity,
			definition,
			transport,
			callbacks,
			extension,
			ledger,
			status_tx,
			current: ArcSwapOption::empty(),
			link: tokio::sync::Mutex::new(None),
			documents: parking_lot::Mutex::new(HashMap::new()),
			next_generation: AtomicU64::new(0),
		})
	}

	/// The identity this session serves.
	pub fn identity(&self) -> &ServerIdentity {
		&self.identity
	}

	/// Current lifecycle status.
	pub fn status(&self) -> ServerStatus {
		*self.status_tx.borrow()
	}

	/// Subscribe to status transitions.
	pub fn watch_status(&self) -> watch::Receiver<ServerStatus> {
		self.status_tx.subscribe()
	}

	/// Negotiated capabilities of the current connection.
	pub fn capabilities(&self) -> Option<NegotiatedCapabilities> {
		self.current
			.load_full()
			.and_then(|manager| manager.capabilities().cloned())
	}

	/// Per-category timeout and success/failure counters.
	pub fn timeout_stats(&self) -> HashMap<RequestCategory, CategoryStats> {
		self.ledger.snapshot()
	}

	/// Override a category's request budget. In-flight requests keep the
	/// budget they started with.
	pub fn set_timeout(&self, category: RequestCategory, timeout: Duration) {
		self.ledger.set_timeout(category, timeout);
	}

	/// The sync manager for an attached document.
	pub fn document(&self, uri: &Uri) -> Option<Arc<DocumentSyncManager>> {
		self.documents.lock().get(uri).cloned()
	}

	pub(crate) fn callbacks(&self) -> &Arc<dyn EditorCallbacks> {
		&self.callbacks
	}

	pub(crate) fn extension(&self) -> &Arc<dyn SessionExtension> {
		&self.extension
	}

	/// The dispatcher of the current connection.
	pub(crate) fn manager(&self) -> Result<Arc<RequestManager>> {
		self.current.load_full().ok_or_else(|| match self.status() {
			ServerStatus::Starting | ServerStatus::Started => Error::NotReady,
			_ => Error::Cancelled,
		})
	}

	/// Connect and run the `initialize` handshake. No-op when a connection
	/// already exists. On handshake failure the session is left crashed and
	/// nothing retries implicitly.
	pub async fn start(self: &Arc<Self>) -> Result<()> {
		let mut link = self.link.lock().await;
		if link.is_some() {
			return Ok(());
		}
		self.set_status(ServerStatus::Starting);

		let io = match self.transport.start().await {
			Ok(io) => io,
			Err(err) => {
				self.set_status(ServerStatus::Crashed);
				return Err(err);
			}
		};

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let manager = Arc::new(RequestManager::new(
			outbound_tx,
			self.ledger.clone(),
			self.extension.clone(),
		));
		self.current.store(Some(manager.clone()));

		let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
		let writer_task = tokio::spawn(writer_loop(io.writer, outbound_rx));
		let reader_task = tokio::spawn(reader_loop(
			self.clone(),
			manager.clone(),
			io.reader,
			generation,
		));
		self.set_status(ServerStatus::Started);

		if let Err(err) = self.initialize(&manager).await {
			reader_task.abort();
			writer_task.abort();
			manager.cancel_all();
			self.current.store(None);
			let _ = self.transport.stop().await;
			self.set_status(ServerStatus::Crashed);
			return Err(Error::Startup {
				server: self.definition.launch.display_name(),
				reason: err.to_string(),
			});
		}

		*link = Some(Link {
			manager,
			reader_task,
			writer_task,
			generation,
		});
		drop(link);
		self.set_status(ServerStatus::Initialized);

		// Restart path: re-announce every document that stayed attached.
		let documents: Vec<_> = self.documents.lock().values().cloned().collect();
		for document in documents {
			if let Err(err) = document.replay_open() {
				tracing::warn!(
					uri = %document.uri().as_str(),
					error = %err,
					"failed to replay open document"
				);
			}
		}
		Ok(())
	}

	async fn initialize(&self, manager: &RequestManager) -> Result<()> {
		let root_uri = uri_from_path(&self.identity.root);
		let folder_name = self
			.identity
			.root
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_default();
		#[allow(deprecated, reason = "root_uri is still required by some servers")]
		let params = InitializeParams {
			process_id: Some(std::process::id()),
			workspace_folders: root_uri.clone().map(|uri| {
				vec![WorkspaceFolder {
					uri,
					name: folder_name,
				}]
			}),
			root_uri,
			initialization_options: self.definition.initialization_options.clone(),
			capabilities: client_capabilities(self.definition.enable_snippets),
			client_info: Some(ClientInfo {
				name: env!("CARGO_PKG_NAME").into(),
				version: Some(env!("CARGO_PKG_VERSION").into()),
			}),
			..Default::default()
		};

		let result = manager
			.request::<Initialize>(RequestCategory::Initialize, params)
			.await?;
		let capabilities = NegotiatedCapabilities::new(result.capabilities);
		tracing::info!(
			language = %self.identity.language,
			sync_kind = ?capabilities.sync_kind(),
			"initialize handshake complete"
		);
		manager.set_capabilities(capabilities.clone());
		self.callbacks.capabilities_ready(&self.identity, &capabilities);
		manager.notify::<Initialized>(InitializedParams {})
	}

	/// Graceful shutdown: `shutdown` request, `exit` notification, then
	/// transport teardown. Idempotent; a crashed session stays crashed.
	pub async fn stop(&self) -> Result<()> {
		let mut link = self.link.lock().await;
		let Some(state) = link.take() else {
			return Ok(());
		};
		self.set_status(ServerStatus::Stopping);

		if let Err(err) = state
			.manager
			.request::<Shutdown>(RequestCategory::Shutdown, ())
			.await
		{
			tracing::debug!(error = %err, "shutdown request failed, exiting anyway");
		}
		let _ = state.manager.notify::<Exit>(());
		state.manager.cancel_all();
		state.reader_task.abort();

		// Close the outbound channel so the writer drains the exit
		// notification and terminates on its own.
		self.current.store(None);
		drop(state.manager);
		let _ = tokio::time::timeout(Duration::from_secs(1), state.writer_task).await;

		let result = self.transport.stop().await;
		drop(link);
		self.set_status(ServerStatus::Stopped);
		result
	}

	/// Stop and start again. Attached documents survive and are re-announced
	/// with fresh protocol state on the new connection.
	pub async fn restart(self: &Arc<Self>) -> Result<()> {
		self.stop().await?;
		self.start().await
	}

	/// Attach a document and announce it with `didOpen`. Attaching an
	/// already-attached document returns the existing manager.
	pub fn attach(
		self: &Arc<Self>,
		uri: Uri,
		language_id: impl Into<String>,
		text: &str,
	) -> Result<Arc<DocumentSyncManager>> {
		if self.status() != ServerStatus::Initialized {
			return Err(Error::NotReady);
		}
		let mut documents = self.documents.lock();
		if let Some(existing) = documents.get(&uri) {
			return Ok(existing.clone());
		}
		let document = Arc::new(DocumentSyncManager::new(
			uri.clone(),
			language_id.into(),
			text,
			Arc::downgrade(self),
		));
		document.announce_open()?;
		documents.insert(uri, document.clone());
		Ok(document)
	}

	/// Detach a document, announcing `didClose`. When the last document
	/// detaches and the definition does not keep idle sessions alive, the
	/// session stops.
	pub async fn detach(&self, uri: &Uri) -> Result<()> {
		let (document, now_idle) = {
			let mut documents = self.documents.lock();
			let document = documents.remove(uri);
			(document, documents.is_empty())
		};
		let Some(document) = document else {
			return Ok(());
		};
		let _ = document.close();
		if now_idle && !self.definition.keep_alive_when_idle {
			tracing::debug!(language = %self.identity.language, "last document detached, stopping");
			self.stop().await?;
		}
		Ok(())
	}

	/// `workspace/executeCommand`.
	pub async fn execute_command(
		&self,
		command: String,
		arguments: Vec<JsonValue>,
	) -> Result<Option<JsonValue>> {
		self.manager()?
			.request::<ExecuteCommand>(
				RequestCategory::ExecuteCommand,
				ExecuteCommandParams {
					command,
					arguments,
					work_done_progress_params: Default::default(),
				},
			)
			.await
	}

	fn set_status(&self, new: ServerStatus) {
		let mut previous = None;
		self.status_tx.send_if_modified(|current| {
			if *current == new {
				return false;
			}
			previous = Some(*current);
			*current = new;
			true
		});
		if let Some(old) = previous {
			tracing::debug!(
				language = %self.identity.language,
				from = ?old,
				to = ?new,
				"session status changed"
			);
			self.callbacks.server_status_changed(&self.identity, old, new);
		}
	}

	/// Teardown for a connection that died underneath us. Stale generations
	/// (a connection already replaced by stop or restart) are ignored.
	async fn connection_lost(&self, generation: u64, manager: &RequestManager) {
		// Unblock anything waiting on this connection, including a start()
		// currently holding the link lock for the handshake.
		manager.cancel_all();

		let mut link = self.link.lock().await;
		let Some(state) = link.take_if(|state| state.generation == generation) else {
			return;
		};
		// Lock held for the whole teardown: a racing restart must not see a
		// half-dead connection or have its fresh one torn down.
		state.writer_task.abort();
		self.current.store(None);
		let _ = self.transport.stop().await;
		tracing::warn!(language = %self.identity.language, "server connection lost");

		let documents: Vec<_> = self.documents.lock().values().cloned().collect();
		for document in documents {
			document.clear_diagnostics();
		}
		self.set_status(ServerStatus::Crashed);
		drop(link);
	}

	fn handle_notification(&self, notification: AnyNotification) {
		if self
			.extension
			.handle_notification(&notification.method, &notification.params)
		{
			return;
		}
		match notification.method.as_str() {
			PublishDiagnostics::METHOD => {
				match serde_json::from_value::<PublishDiagnosticsParams>(notification.params) {
					Ok(params) => {
						let document = self.documents.lock().get(&params.uri).cloned();
						match document {
							Some(document) => document.publish_diagnostics(params.diagnostics),
							None => tracing::debug!(
								uri = %params.uri.as_str(),
								"dropping diagnostics for unattached document"
							),
						}
					}
					Err(err) => tracing::warn!(error = %err, "malformed publishDiagnostics"),
				}
			}
			LogMessage::METHOD => {
				if let Ok(params) = serde_json::from_value::<LogMessageParams>(notification.params)
				{
					if params.typ == MessageType::ERROR {
						tracing::error!(target: "lsp_server", "{}", params.message);
					} else if params.typ == MessageType::WARNING {
						tracing::warn!(target: "lsp_server", "{}", params.message);
					} else {
						tracing::debug!(target: "lsp_server", "{}", params.message);
					}
				}
			}
			ShowMessage::METHOD => {
				if let Ok(params) = serde_json::from_value::<ShowMessageParams>(notification.params)
				{
					tracing::info!(target: "lsp_server", "{}", params.message);
				}
			}
			Progress::METHOD => {
				tracing::trace!("server progress update");
			}
			other if other.starts_with("$/") => {}
			other => tracing::debug!(method = other, "unhandled server notification"),
		}
	}

	fn handle_server_request(&self, manager: &RequestManager, request: AnyRequest) {
		let AnyRequest { id, method, params } = request;
		let response = match method.as_str() {
			ApplyWorkspaceEdit::METHOD => {
				match serde_json::from_value::<ApplyWorkspaceEditParams>(params) {
					Ok(params) => {
						let applied = self.callbacks.apply_workspace_edit(&params.edit);
						match serde_json::to_value(ApplyWorkspaceEditResponse {
							applied,
							failure_reason: None,
							failed_change: None,
						}) {
							Ok(result) => AnyResponse {
								id,
								result: Some(result),
								error: None,
							},
							Err(err) => error_response(id, ErrorCode::InternalError, err),
						}
					}
					Err(err) => error_response(id, ErrorCode::InvalidParams, err),
				}
			}
			RegisterCapability::METHOD
			| UnregisterCapability::METHOD
			| WorkDoneProgressCreate::METHOD => AnyResponse {
				id,
				result: Some(JsonValue::Null),
				error: None,
			},
			WorkspaceConfiguration::METHOD => {
				match serde_json::from_value::<ConfigurationParams>(params) {
					Ok(params) => AnyResponse {
						id,
						result: Some(JsonValue::Array(vec![
							JsonValue::Null;
							params.items.len()
						])),
						error: None,
					},
					Err(err) => error_response(id, ErrorCode::InvalidParams, err),
				}
			}
			other => {
				tracing::debug!(method = other, "rejecting unsupported server request");
				AnyResponse {
					id,
					result: None,
					error: Some(ResponseError::new(
						ErrorCode::MethodNotFound.code(),
						format!("method not supported: {other}"),
					)),
				}
			}
		};
		manager.reply(response);
	}
}

fn error_response(
	id: crate::types::RequestId,
	code: ErrorCode,
	err: impl std::fmt::Display,
) -> AnyResponse {
	AnyResponse {
		id,
		result: None,
		error: Some(ResponseError::new(code.code(), err.to_string())),
	}
}

async fn writer_loop(
	mut writer: Box<dyn AsyncWrite + Send + Unpin>,
	mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
	while let Some(outbound) = outbound_rx.recv().await {
		let message = match outbound {
			Outbound::Request(request) => Message::Request(request),
			Outbound::Notification(notification) => Message::Notification(notification),
			Outbound::Reply(response) => Message::Response(response),
		};
		if let Err(err) = message.write(&mut writer).await {
			tracing::warn!(error = %err, "transport write failed");
			break;
		}
	}
}

async fn reader_loop(
	session: Arc<Session>,
	manager: Arc<RequestManager>,
	mut reader: Box<dyn AsyncBufRead + Send + Unpin>,
	generation: u64,
) {
	let mut violations = 0u32;
	loop {
		match Message::read(&mut reader).await {
			Ok(Some(Message::Response(response))) => {
				if !manager.resolve(response) {
					violations += 1;
					tracing::warn!(violations, "response with no pending request");
					if violations >= PROTOCOL_VIOLATION_LIMIT {
						break;
					}
				}
			}
			Ok(Some(Message::Notification(notification))) => {
				session.handle_notification(notification);
			}
			Ok(Some(Message::Request(request))) => {
				session.handle_server_request(&manager, request);
			}
			Ok(None) => {
				tracing::debug!("server closed the connection");
				break;
			}
			Err(Error::Protocol(reason)) => {
				violations += 1;
				tracing::warn!(%reason, violations, "protocol violation");
				if violations >= PROTOCOL_VIOLATION_LIMIT {
					tracing::error!("too many protocol violations, abandoning connection");
					break;
				}
			}
			Err(err) => {
				tracing::warn!(error = %err, "transport read failed");
				break;
			}
		}
	}
	session.connection_lost(generation, &manager).await;
}
