//! The request/notification dispatcher.
//!
//! Every outbound protocol message passes through one [`RequestManager`] so
//! cross-cutting concerns (timeouts, failure accounting, capability gating)
//! are enforced uniformly rather than per call site. Outbound traffic is
//! funneled into a single queue consumed by the session's writer task,
//! which gives call-order writes; responses arrive in any order and are
//! matched solely by correlation id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use lsp_types::notification::Notification;
use lsp_types::request::Request;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::capabilities::NegotiatedCapabilities;
use crate::extension::SessionExtension;
use crate::ledger::{RequestCategory, TimeoutLedger};
use crate::types::{AnyNotification, AnyRequest, AnyResponse, RequestId};
use crate::{Error, Result};

/// Correlation ids are allocated process-wide so they are never reused
/// across sessions or restarts.
static NEXT_CORRELATION_ID: AtomicI64 = AtomicI64::new(1);

/// An outbound message queued for the writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
	/// A correlated request.
	Request(AnyRequest),
	/// A fire-and-forget notification.
	Notification(AnyNotification),
	/// A reply to a server-initiated request.
	Reply(AnyResponse),
}

struct PendingEntry {
	category: RequestCategory,
	issued_at: Instant,
	tx: oneshot::Sender<Result<AnyResponse>>,
}

/// Dispatches requests and notifications for one live connection.
///
/// Owned by a session; replaced wholesale on restart so responses from a
/// previous connection can never resolve requests of the current one.
pub struct RequestManager {
	outbound_tx: mpsc::UnboundedSender<Outbound>,
	pending: Mutex<HashMap<i64, PendingEntry>>,
	ledger: Arc<TimeoutLedger>,
	extension: Arc<dyn SessionExtension>,
	capabilities: OnceLock<NegotiatedCapabilities>,
}

impl RequestManager {
	pub(crate) fn new(
		outbound_tx: mpsc::UnboundedSender<Outbound>,
		ledger: Arc<TimeoutLedger>,
		extension: Arc<dyn SessionExtension>,
	) -> Self {
		Self {
			outbound_tx,
			pending: Mutex::new(HashMap::new()),
			ledger,
			extension,
			capabilities: OnceLock::new(),
		}
	}

	/// Record the negotiated capabilities. Called once by the session after
	/// the initialize handshake; immutable thereafter.
	pub(crate) fn set_capabilities(&self, capabilities: NegotiatedCapabilities) {
		let _ = self.capabilities.set(capabilities);
	}

	/// The negotiated capabilities, if initialization has completed.
	pub fn capabilities(&self) -> Option<&NegotiatedCapabilities> {
		self.capabilities.get()
	}

	/// Number of requests currently awaiting a response.
	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}

	/// Issue a typed request and await its response, the category's timeout,
	/// or cancellation, whichever comes first.
	pub async fn request<R: Request>(
		&self,
		category: RequestCategory,
		params: R::Params,
	) -> Result<R::Result> {
		if category != RequestCategory::Initialize {
			let caps = self.capabilities.get().ok_or(Error::NotReady)?;
			if !self.extension.advertises(category, caps) {
				return Err(Error::UnsupportedCapability(category));
			}
		}

		let id = NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(
			id,
			PendingEntry {
				category,
				issued_at: Instant::now(),
				tx,
			},
		);

		let request = AnyRequest {
			id: RequestId::Number(id),
			method: R::METHOD.into(),
			params: serde_json::to_value(params)?,
		};
		if self.outbound_tx.send(Outbound::Request(request)).is_err() {
			self.pending.lock().remove(&id);
			return Err(Error::Cancelled);
		}

		let budget = self.ledger.timeout(category);
		let outcome = if budget == Duration::ZERO {
			rx.await
		} else {
			match tokio::time::timeout(budget, rx).await {
				Ok(outcome) => outcome,
				Err(_) => {
					if let Some(entry) = self.pending.lock().remove(&id) {
						tracing::warn!(
							category = %category,
							elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
							"request timed out"
						);
					}
					self.ledger.record_failure(category);
					return Err(Error::Timeout(category));
				}
			}
		};

		let response = match outcome {
			Ok(result) => result?,
			// Sender dropped without a terminal outcome: connection teardown.
			Err(_) => return Err(Error::Cancelled),
		};

		match response.error {
			None => {
				self.ledger.record_success(category);
				Ok(serde_json::from_value(
					response.result.unwrap_or_default(),
				)?)
			}
			Some(err) => {
				self.ledger.record_failure(category);
				Err(Error::Response(err))
			}
		}
	}

	/// Send a typed notification. Fire-and-forget: no correlation id, no
	/// timeout tracking, never waits for a response.
	pub fn notify<N: Notification>(&self, params: N::Params) -> Result<()> {
		let notification = AnyNotification {
			method: N::METHOD.into(),
			params: serde_json::to_value(params)?,
		};
		self.outbound_tx
			.send(Outbound::Notification(notification))
			.map_err(|_| Error::Cancelled)
	}

	/// Queue a reply to a server-initiated request.
	pub(crate) fn reply(&self, response: AnyResponse) {
		let _ = self.outbound_tx.send(Outbound::Reply(response));
	}

	/// Resolve an inbound response against the pending table.
	///
	/// Returns `false` if no pending request matches the correlation id, in
	/// which case the caller treats the message as a protocol violation.
	pub(crate) fn resolve(&self, response: AnyResponse) -> bool {
		let RequestId::Number(id) = response.id else {
			return false;
		};
		let Some(entry) = self.pending.lock().remove(&id) else {
			return false;
		};
		let _ = entry.tx.send(Ok(response));
		true
	}

	/// Fail every pending request with [`Error::Cancelled`]. Used uniformly
	/// for explicit stop and transport crash.
	pub(crate) fn cancel_all(&self) {
		let drained: Vec<PendingEntry> = {
			let mut pending = self.pending.lock();
			pending.drain().map(|(_, entry)| entry).collect()
		};
		for entry in drained {
			tracing::debug!(category = %entry.category, "cancelling pending request");
			let _ = entry.tx.send(Err(Error::Cancelled));
		}
	}
}
