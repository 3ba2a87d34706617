use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lsp_types::{FormattingOptions, Position, Range, Uri, WorkspaceEdit};
use parking_lot::Mutex;
use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use super::*;
use crate::document::TextChange;
use crate::extension::BaseExtension;
use crate::transport::{IoPair, LaunchSpec};
use crate::types::RequestId;

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn uri(path: &str) -> Uri {
	format!("file://{path}").parse().unwrap()
}

fn pos(line: u32, character: u32) -> Position {
	Position::new(line, character)
}

/// The server side of an in-memory connection.
struct FakeServer {
	reader: BufReader<ReadHalf<DuplexStream>>,
	writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
	fn new(stream: DuplexStream) -> Self {
		let (read, write) = tokio::io::split(stream);
		Self {
			reader: BufReader::new(read),
			writer: write,
		}
	}

	async fn recv(&mut self) -> Message {
		tokio::time::timeout(Duration::from_secs(5), Message::read(&mut self.reader))
			.await
			.expect("timed out waiting for client message")
			.expect("read failed")
			.expect("unexpected EOF from client")
	}

	async fn recv_request(&mut self) -> AnyRequest {
		match self.recv().await {
			Message::Request(request) => request,
			other => panic!("expected request, got {other:?}"),
		}
	}

	async fn recv_notification(&mut self) -> AnyNotification {
		match self.recv().await {
			Message::Notification(notification) => notification,
			other => panic!("expected notification, got {other:?}"),
		}
	}

	async fn send(&mut self, message: Message) {
		message.write(&mut self.writer).await.expect("write failed");
	}

	async fn respond(&mut self, id: RequestId, result: serde_json::Value) {
		self.send(Message::Response(AnyResponse {
			id,
			result: Some(result),
			error: None,
		}))
		.await;
	}

	async fn notify(&mut self, method: &str, params: serde_json::Value) {
		self.send(Message::Notification(AnyNotification {
			method: method.into(),
			params,
		}))
		.await;
	}

	/// Serve the initialize handshake, answering with `capabilities`.
	/// Returns the correlation id the client used.
	async fn handshake(&mut self, capabilities: serde_json::Value) -> i64 {
		let request = self.recv_request().await;
		assert_eq!(request.method, "initialize");
		let RequestId::Number(id) = request.id.clone() else {
			panic!("expected numeric initialize id");
		};
		self.respond(
			request.id,
			serde_json::json!({ "capabilities": capabilities }),
		)
		.await;
		let notification = self.recv_notification().await;
		assert_eq!(notification.method, "initialized");
		id
	}

	/// Serve the graceful shutdown sequence.
	async fn serve_shutdown(&mut self) {
		let request = self.recv_request().await;
		assert_eq!(request.method, "shutdown");
		self.respond(request.id, serde_json::Value::Null).await;
		let notification = self.recv_notification().await;
		assert_eq!(notification.method, "exit");
	}
}

/// Transport yielding a fresh in-memory pipe per start; the server halves are
/// handed to the test through a channel.
struct PipeTransport {
	server_tx: mpsc::UnboundedSender<FakeServer>,
}

#[async_trait]
impl Transport for PipeTransport {
	async fn start(&self) -> crate::Result<IoPair> {
		let (client, server) = tokio::io::duplex(64 * 1024);
		self.server_tx
			.send(FakeServer::new(server))
			.expect("test dropped server receiver");
		let (read, write) = tokio::io::split(client);
		Ok(IoPair {
			reader: Box::new(BufReader::new(read)),
			writer: Box::new(write),
		})
	}

	async fn stop(&self) -> crate::Result<()> {
		Ok(())
	}
}

/// Transport whose start always fails.
struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
	async fn start(&self) -> crate::Result<IoPair> {
		Err(Error::Startup {
			server: "broken-server".into(),
			reason: "no such executable".into(),
		})
	}

	async fn stop(&self) -> crate::Result<()> {
		Ok(())
	}
}

#[derive(Default)]
struct EventLog {
	transitions: Mutex<Vec<(ServerStatus, ServerStatus)>>,
	diagnostics: Mutex<Vec<(String, usize)>>,
	applied_edits: Mutex<Vec<WorkspaceEdit>>,
	accept_edits: AtomicBool,
}

impl EditorCallbacks for EventLog {
	fn diagnostics_changed(&self, uri: &Uri, diagnostics: &[lsp_types::Diagnostic]) {
		self.diagnostics
			.lock()
			.push((uri.as_str().to_owned(), diagnostics.len()));
	}

	fn server_status_changed(&self, _: &ServerIdentity, old: ServerStatus, new: ServerStatus) {
		self.transitions.lock().push((old, new));
	}

	fn apply_workspace_edit(&self, edit: &WorkspaceEdit) -> bool {
		self.applied_edits.lock().push(edit.clone());
		self.accept_edits.load(Ordering::SeqCst)
	}
}

struct Harness {
	session: Arc<Session>,
	servers: mpsc::UnboundedReceiver<FakeServer>,
	events: Arc<EventLog>,
	last_init_id: i64,
}

fn definition() -> ServerDefinition {
	ServerDefinition::new(LaunchSpec::command("fake-server"))
}

fn harness(definition: ServerDefinition) -> Harness {
	let (server_tx, servers) = mpsc::unbounded_channel();
	let events = Arc::new(EventLog::default());
	let session = Session::new(
		ServerIdentity {
			language: "rust".into(),
			root: PathBuf::from("/proj"),
		},
		definition,
		Arc::new(PipeTransport { server_tx }),
		events.clone(),
		Arc::new(BaseExtension),
	);
	Harness {
		session,
		servers,
		events,
		last_init_id: 0,
	}
}

impl Harness {
	/// Drive `start` to completion against a fake server advertising the
	/// given capabilities.
	async fn start_with(&mut self, capabilities: serde_json::Value) -> FakeServer {
		let session = self.session.clone();
		let start = tokio::spawn(async move { session.start().await });
		let mut server = self.servers.recv().await.expect("transport not started");
		self.last_init_id = server.handshake(capabilities).await;
		start.await.unwrap().unwrap();
		server
	}
}

async fn wait_for_status(session: &Session, expected: ServerStatus) {
	let mut rx = session.watch_status();
	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			if *rx.borrow_and_update() == expected {
				return;
			}
			rx.changed().await.expect("status channel closed");
		}
	})
	.await
	.unwrap_or_else(|_| panic!("session never reached {expected:?}"));
}

fn hover_caps() -> serde_json::Value {
	serde_json::json!({ "hoverProvider": true })
}

#[tokio::test]
async fn start_reports_each_transition_once() {
	init_tracing();
	let mut h = harness(definition());
	let _server = h.start_with(hover_caps()).await;

	assert_eq!(h.session.status(), ServerStatus::Initialized);
	assert!(format!("{:?}", h.session).contains("Initialized"));
	assert!(
		h.session
			.capabilities()
			.unwrap()
			.supports(RequestCategory::Hover)
	);
	assert_eq!(
		*h.events.transitions.lock(),
		vec![
			(ServerStatus::Stopped, ServerStatus::Starting),
			(ServerStatus::Starting, ServerStatus::Started),
			(ServerStatus::Started, ServerStatus::Initialized),
		]
	);
}

#[tokio::test]
async fn second_start_is_a_no_op() {
	let mut h = harness(definition());
	let _server = h.start_with(hover_caps()).await;

	h.session.start().await.unwrap();
	assert!(h.servers.try_recv().is_err());
	assert_eq!(h.session.status(), ServerStatus::Initialized);
}

#[tokio::test]
async fn transport_failure_marks_session_crashed() {
	let events = Arc::new(EventLog::default());
	let session = Session::new(
		ServerIdentity {
			language: "rust".into(),
			root: PathBuf::from("/proj"),
		},
		definition(),
		Arc::new(FailingTransport),
		events.clone(),
		Arc::new(BaseExtension),
	);

	let err = session.start().await.unwrap_err();
	assert!(matches!(err, Error::Startup { .. }));
	assert_eq!(session.status(), ServerStatus::Crashed);
	assert_eq!(
		events.transitions.lock().last(),
		Some(&(ServerStatus::Starting, ServerStatus::Crashed))
	);
}

#[tokio::test]
async fn initialize_error_is_a_startup_failure() {
	let mut h = harness(definition());
	let session = h.session.clone();
	let start = tokio::spawn(async move { session.start().await });

	let mut server = h.servers.recv().await.unwrap();
	let request = server.recv_request().await;
	assert_eq!(request.method, "initialize");
	server
		.send(Message::Response(AnyResponse {
			id: request.id,
			result: None,
			error: Some(ResponseError::new(-32603, "refused")),
		}))
		.await;

	let err = start.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::Startup { .. }));
	assert_eq!(h.session.status(), ServerStatus::Crashed);
}

#[tokio::test]
async fn hover_timeout_leaves_session_usable() {
	init_tracing();
	let mut h = harness(definition());
	let mut server = h
		.start_with(serde_json::json!({ "hoverProvider": true, "textDocumentSync": 1 }))
		.await;
	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "fn main() {}")
		.unwrap();
	let open = server.recv_notification().await;
	assert_eq!(open.method, "textDocument/didOpen");
	assert_eq!(open.params["textDocument"]["version"], 0);

	// First hover is swallowed by the server.
	h.session
		.set_timeout(RequestCategory::Hover, Duration::from_millis(50));
	let err = doc.hover(pos(0, 0)).await.unwrap_err();
	assert!(matches!(err, Error::Timeout(RequestCategory::Hover)));
	assert_eq!(h.session.status(), ServerStatus::Initialized);

	// A second hover on the same connection still works.
	h.session
		.set_timeout(RequestCategory::Hover, Duration::from_secs(5));
	let hover = tokio::spawn({
		let doc = doc.clone();
		async move { doc.hover(pos(0, 0)).await }
	});
	let timed_out = server.recv_request().await;
	assert_eq!(timed_out.method, "textDocument/hover");
	let live = server.recv_request().await;
	assert_eq!(live.method, "textDocument/hover");
	server.respond(live.id, serde_json::Value::Null).await;
	assert!(hover.await.unwrap().unwrap().is_none());

	let stats = h.session.timeout_stats();
	let hover_stats = &stats[&RequestCategory::Hover];
	assert_eq!((hover_stats.success, hover_stats.failure), (1, 1));
}

#[tokio::test]
async fn crash_cancels_pending_and_fires_one_transition() {
	init_tracing();
	let mut h = harness(definition());
	let mut server = h
		.start_with(serde_json::json!({ "hoverProvider": true, "textDocumentSync": 1 }))
		.await;
	let mut docs = Vec::new();
	for name in ["a", "b", "c"] {
		let doc = h
			.session
			.attach(uri(&format!("/proj/{name}.rs")), "rust", "fn main() {}")
			.unwrap();
		server.recv_notification().await;
		docs.push(doc);
	}
	let doc = docs[0].clone();

	let mut pending = Vec::new();
	for doc in docs.iter().take(2).cloned() {
		pending.push(tokio::spawn(async move { doc.hover(pos(0, 0)).await }));
		server.recv_request().await;
	}
	drop(server);

	for request in pending {
		assert!(matches!(request.await.unwrap(), Err(Error::Cancelled)));
	}
	wait_for_status(&h.session, ServerStatus::Crashed).await;

	let crashes = h
		.events
		.transitions
		.lock()
		.iter()
		.filter(|(_, new)| *new == ServerStatus::Crashed)
		.count();
	assert_eq!(crashes, 1);

	// Requests against the dead session fail immediately.
	assert!(matches!(doc.hover(pos(0, 0)).await, Err(Error::Cancelled)));
	// The document's diagnostics were cleared on the way down.
	assert!(
		h.events
			.diagnostics
			.lock()
			.contains(&("file:///proj/a.rs".to_owned(), 0))
	);
}

#[tokio::test]
async fn restart_racing_a_crash_settles_initialized() {
	init_tracing();
	let mut h = harness(definition());
	let server = h.start_with(hover_caps()).await;
	h.session
		.set_timeout(RequestCategory::Shutdown, Duration::from_millis(100));
	drop(server);

	// Restart immediately, racing the reader's crash teardown for the lock.
	let session = h.session.clone();
	let restart = tokio::spawn(async move { session.restart().await });
	let mut server2 = h.servers.recv().await.expect("no second connection");
	server2.handshake(hover_caps()).await;
	restart.await.unwrap().unwrap();

	// Give the stale connection's teardown every chance to misfire.
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(h.session.status(), ServerStatus::Initialized);

	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "fn main() {}")
		.unwrap();
	let open = server2.recv_notification().await;
	assert_eq!(open.method, "textDocument/didOpen");
	let hover = tokio::spawn({
		let doc = doc.clone();
		async move { doc.hover(pos(0, 0)).await }
	});
	let request = server2.recv_request().await;
	assert_eq!(request.method, "textDocument/hover");
	server2.respond(request.id, serde_json::Value::Null).await;
	assert!(hover.await.unwrap().unwrap().is_none());
}

#[tokio::test]
async fn restart_replays_documents_with_fresh_protocol_state() {
	init_tracing();
	let mut h = harness(definition());
	let mut server = h
		.start_with(serde_json::json!({ "textDocumentSync": 1 }))
		.await;
	let first_init_id = h.last_init_id;
	let doc = h.session.attach(uri("/proj/a.rs"), "rust", "hello").unwrap();
	let open = server.recv_notification().await;
	assert_eq!(open.method, "textDocument/didOpen");
	doc.apply_changes(&[TextChange::full("hello world")]).unwrap();
	let change = server.recv_notification().await;
	assert_eq!(change.method, "textDocument/didChange");
	assert_eq!(change.params["textDocument"]["version"], 1);
	assert_eq!(change.params["contentChanges"][0]["text"], "hello world");

	let session = h.session.clone();
	let restart = tokio::spawn(async move { session.restart().await });
	server.serve_shutdown().await;

	let mut server2 = h.servers.recv().await.expect("no second connection");
	let second_init_id = server2
		.handshake(serde_json::json!({ "textDocumentSync": 1 }))
		.await;
	restart.await.unwrap().unwrap();
	assert!(second_init_id > first_init_id);

	let open = server2.recv_notification().await;
	assert_eq!(open.method, "textDocument/didOpen");
	assert_eq!(open.params["textDocument"]["version"], 0);
	assert_eq!(open.params["textDocument"]["text"], "hello world");
	assert_eq!(h.session.status(), ServerStatus::Initialized);
}

#[tokio::test]
async fn unsupported_category_fails_before_any_write() {
	let mut h = harness(definition());
	let mut server = h.start_with(hover_caps()).await;
	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "fn main() {}")
		.unwrap();
	server.recv_notification().await;

	let err = doc
		.code_actions(Range::new(pos(0, 0), pos(0, 1)))
		.await
		.unwrap_err();
	assert!(matches!(
		err,
		Error::UnsupportedCapability(RequestCategory::CodeAction)
	));

	// The very next thing the server sees is the hover, proving nothing was
	// written for the rejected request.
	let hover = tokio::spawn({
		let doc = doc.clone();
		async move { doc.hover(pos(0, 0)).await }
	});
	let request = server.recv_request().await;
	assert_eq!(request.method, "textDocument/hover");
	server.respond(request.id, serde_json::Value::Null).await;
	hover.await.unwrap().unwrap();
}

#[tokio::test]
async fn sync_kind_none_applies_locally_without_sending() {
	let mut h = harness(definition());
	let mut server = h.start_with(hover_caps()).await;
	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "old")
		.unwrap();
	server.recv_notification().await;

	doc.apply_changes(&[TextChange::full("new")]).unwrap();
	assert_eq!(doc.text(), "new");
	assert_eq!(doc.version(), 0);

	// Next wire message is the hover, not a didChange.
	let hover = tokio::spawn({
		let doc = doc.clone();
		async move { doc.hover(pos(0, 0)).await }
	});
	let request = server.recv_request().await;
	assert_eq!(request.method, "textDocument/hover");
	server.respond(request.id, serde_json::Value::Null).await;
	hover.await.unwrap().unwrap();
}

#[tokio::test]
async fn incremental_sync_sends_ranged_deltas() {
	let mut h = harness(definition());
	let mut server = h
		.start_with(serde_json::json!({ "textDocumentSync": 2 }))
		.await;
	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "fn main() {}")
		.unwrap();
	server.recv_notification().await;

	doc.apply_changes(&[TextChange::ranged(
		Range::new(pos(0, 3), pos(0, 7)),
		"other",
	)])
	.unwrap();
	assert_eq!(doc.text(), "fn other() {}");

	let change = server.recv_notification().await;
	assert_eq!(change.method, "textDocument/didChange");
	assert_eq!(change.params["textDocument"]["version"], 1);
	let event = &change.params["contentChanges"][0];
	assert_eq!(event["text"], "other");
	assert_eq!(event["range"]["start"]["character"], 3);
	assert_eq!(event["range"]["end"]["character"], 7);
}

#[tokio::test]
async fn range_formatting_is_gated_on_its_own_provider() {
	let mut h = harness(definition());
	let mut server = h
		.start_with(serde_json::json!({
			"documentRangeFormattingProvider": true,
			"textDocumentSync": 1
		}))
		.await;
	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "fn main() {}")
		.unwrap();
	server.recv_notification().await;
	let options = FormattingOptions {
		tab_size: 4,
		insert_spaces: true,
		..Default::default()
	};

	let format = tokio::spawn({
		let doc = doc.clone();
		let options = options.clone();
		async move {
			doc.range_formatting(Range::new(pos(0, 0), pos(0, 12)), options)
				.await
		}
	});
	let request = server.recv_request().await;
	assert_eq!(request.method, "textDocument/rangeFormatting");
	assert_eq!(request.params["range"]["end"]["character"], 12);
	server.respond(request.id, serde_json::Value::Null).await;
	assert!(format.await.unwrap().unwrap().is_none());

	// Whole-document formatting stays behind its own provider flag.
	let err = doc.formatting(options).await.unwrap_err();
	assert!(matches!(
		err,
		Error::UnsupportedCapability(RequestCategory::Formatting)
	));
}

#[tokio::test]
async fn diagnostics_route_only_to_attached_documents() {
	init_tracing();
	let mut h = harness(definition());
	let mut server = h
		.start_with(serde_json::json!({ "textDocumentSync": 1 }))
		.await;
	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "fn main() {}")
		.unwrap();
	server.recv_notification().await;

	let diagnostic = serde_json::json!({
		"range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 2 } },
		"message": "unused"
	});
	server
		.notify(
			"textDocument/publishDiagnostics",
			serde_json::json!({ "uri": "file:///proj/other.rs", "diagnostics": [diagnostic] }),
		)
		.await;
	server
		.notify(
			"textDocument/publishDiagnostics",
			serde_json::json!({ "uri": "file:///proj/a.rs", "diagnostics": [diagnostic] }),
		)
		.await;

	tokio::time::timeout(Duration::from_secs(5), async {
		while doc.diagnostics().is_empty() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("diagnostics never arrived");

	assert_eq!(doc.diagnostics().len(), 1);
	let seen = h.events.diagnostics.lock().clone();
	assert_eq!(seen, vec![("file:///proj/a.rs".to_owned(), 1)]);
}

#[tokio::test]
async fn stop_is_graceful_and_idempotent() {
	let mut h = harness(definition());
	let mut server = h.start_with(hover_caps()).await;

	let session = h.session.clone();
	let stop = tokio::spawn(async move { session.stop().await });
	server.serve_shutdown().await;
	stop.await.unwrap().unwrap();

	assert_eq!(h.session.status(), ServerStatus::Stopped);
	h.session.stop().await.unwrap();

	let stops = h
		.events
		.transitions
		.lock()
		.iter()
		.filter(|(_, new)| *new == ServerStatus::Stopped)
		.count();
	assert_eq!(stops, 1);
}

#[tokio::test]
async fn last_detach_stops_an_idle_session() {
	let mut h = harness(definition().keep_alive_when_idle(false));
	let mut server = h
		.start_with(serde_json::json!({ "textDocumentSync": 1 }))
		.await;
	let doc_uri = uri("/proj/a.rs");
	h.session.attach(doc_uri.clone(), "rust", "x").unwrap();
	server.recv_notification().await;

	let session = h.session.clone();
	let detach = tokio::spawn(async move { session.detach(&doc_uri).await });
	let close = server.recv_notification().await;
	assert_eq!(close.method, "textDocument/didClose");
	server.serve_shutdown().await;
	detach.await.unwrap().unwrap();
	assert_eq!(h.session.status(), ServerStatus::Stopped);
}

#[tokio::test]
async fn server_apply_edit_request_is_routed_to_the_host() {
	let mut h = harness(definition());
	h.events.accept_edits.store(true, Ordering::SeqCst);
	let mut server = h.start_with(hover_caps()).await;

	server
		.send(Message::Request(AnyRequest {
			id: RequestId::Number(9001),
			method: "workspace/applyEdit".into(),
			params: serde_json::json!({ "edit": {} }),
		}))
		.await;

	let Message::Response(response) = server.recv().await else {
		panic!("expected applyEdit response");
	};
	assert_eq!(response.id, RequestId::Number(9001));
	assert_eq!(response.result.unwrap()["applied"], true);
	assert_eq!(h.events.applied_edits.lock().len(), 1);
}

#[tokio::test]
async fn unknown_server_request_is_rejected_not_fatal() {
	let mut h = harness(definition());
	let mut server = h.start_with(hover_caps()).await;

	server
		.send(Message::Request(AnyRequest {
			id: RequestId::Number(7),
			method: "window/showMessageRequest".into(),
			params: serde_json::json!({}),
		}))
		.await;

	let Message::Response(response) = server.recv().await else {
		panic!("expected error response");
	};
	assert_eq!(response.error.unwrap().code, -32601);
	assert_eq!(h.session.status(), ServerStatus::Initialized);
}

#[tokio::test]
async fn rename_aborts_when_a_touched_document_cannot_be_resolved() {
	init_tracing();
	let mut h = harness(definition());
	let mut server = h
		.start_with(serde_json::json!({ "renameProvider": true, "textDocumentSync": 1 }))
		.await;
	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "fn main() {}")
		.unwrap();
	server.recv_notification().await;

	let rename = tokio::spawn({
		let doc = doc.clone();
		async move { doc.rename(pos(0, 3), "other".into()).await }
	});
	let request = server.recv_request().await;
	assert_eq!(request.method, "textDocument/rename");
	server
		.respond(
			request.id,
			serde_json::json!({
				"changes": {
					"file:///proj/a.rs": [],
					"file:///proj/definitely-missing-zz9.rs": []
				}
			}),
		)
		.await;

	let err = rename.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::RenameAborted { .. }));
	assert!(h.events.applied_edits.lock().is_empty());
}

#[tokio::test]
async fn rename_applies_atomically_when_all_documents_resolve() {
	let mut h = harness(definition());
	h.events.accept_edits.store(true, Ordering::SeqCst);
	let mut server = h
		.start_with(serde_json::json!({ "renameProvider": true, "textDocumentSync": 1 }))
		.await;
	let doc = h
		.session
		.attach(uri("/proj/a.rs"), "rust", "fn main() {}")
		.unwrap();
	server.recv_notification().await;

	let rename = tokio::spawn({
		let doc = doc.clone();
		async move { doc.rename(pos(0, 3), "other".into()).await }
	});
	let request = server.recv_request().await;
	server
		.respond(
			request.id,
			serde_json::json!({ "changes": { "file:///proj/a.rs": [] } }),
		)
		.await;

	assert!(rename.await.unwrap().unwrap());
	assert_eq!(h.events.applied_edits.lock().len(), 1);
}
