//! Session deduplication per server identity.
//!
//! The registry guarantees at most one session per (language, root) pair.
//! Concurrent requests for a not-yet-running identity elect one leader that
//! performs the startup while the others wait on the same outcome, so a burst
//! of opens never spawns duplicate servers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::watch;

use crate::extension::ExtensionFactory;
use crate::host::EditorCallbacks;
use crate::session::Session;
use crate::transport::{LaunchSpec, TransportFactory};
use crate::{Error, Result};

/// What a session is keyed by: one server per language per project root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
	/// Language the server handles, e.g. `rust`.
	pub language: String,
	/// Project root the server was started for.
	pub root: PathBuf,
}

impl std::fmt::Display for ServerIdentity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}@{}", self.language, self.root.display())
	}
}

/// How to run the server for one language.
#[derive(Debug, Clone)]
pub struct ServerDefinition {
	/// How to launch or connect to the server.
	pub launch: LaunchSpec,
	/// Filenames whose presence marks a project root, e.g. `Cargo.toml`.
	pub root_markers: Vec<String>,
	/// Default request budget for categories without an override.
	pub default_timeout: Duration,
	/// Server-specific options passed in the `initialize` request.
	pub initialization_options: Option<JsonValue>,
	/// Advertise snippet support in completion capabilities.
	pub enable_snippets: bool,
	/// Keep the session running after its last document detaches. Defaults
	/// to `true`: servers usually persist across the last close within a
	/// project. Disable to stop idle sessions eagerly.
	pub keep_alive_when_idle: bool,
}

impl ServerDefinition {
	/// Definition with defaults: 30s budget, no markers, no options, idle
	/// sessions kept alive.
	pub fn new(launch: LaunchSpec) -> Self {
		Self {
			launch,
			root_markers: Vec::new(),
			default_timeout: Duration::from_secs(30),
			initialization_options: None,
			enable_snippets: false,
			keep_alive_when_idle: true,
		}
	}

	/// Set the root marker filenames.
	pub fn root_markers(mut self, markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.root_markers = markers.into_iter().map(Into::into).collect();
		self
	}

	/// Set the default request budget.
	pub fn default_timeout(mut self, timeout: Duration) -> Self {
		self.default_timeout = timeout;
		self
	}

	/// Set server-specific initialization options.
	pub fn initialization_options(mut self, options: JsonValue) -> Self {
		self.initialization_options = Some(options);
		self
	}

	/// Advertise snippet support.
	pub fn enable_snippets(mut self, enabled: bool) -> Self {
		self.enable_snippets = enabled;
		self
	}

	/// Keep the session alive after its last document detaches.
	pub fn keep_alive_when_idle(mut self, keep: bool) -> Self {
		self.keep_alive_when_idle = keep;
		self
	}
}

type StartOutcome = Result<Arc<Session>>;

struct InFlightStart {
	tx: watch::Sender<Option<StartOutcome>>,
	rx: watch::Receiver<Option<StartOutcome>>,
}

/// Holds every running session and deduplicates concurrent startups.
pub struct SessionRegistry {
	definitions: parking_lot::RwLock<HashMap<String, ServerDefinition>>,
	sessions: parking_lot::Mutex<HashMap<ServerIdentity, Arc<Session>>>,
	inflight: parking_lot::Mutex<HashMap<ServerIdentity, Arc<InFlightStart>>>,
	transports: Arc<dyn TransportFactory>,
	extensions: Arc<dyn ExtensionFactory>,
	callbacks: Arc<dyn EditorCallbacks>,
}

impl SessionRegistry {
	/// Create an empty registry.
	pub fn new(
		transports: Arc<dyn TransportFactory>,
		extensions: Arc<dyn ExtensionFactory>,
		callbacks: Arc<dyn EditorCallbacks>,
	) -> Self {
		Self {
			definitions: parking_lot::RwLock::new(HashMap::new()),
			sessions: parking_lot::Mutex::new(HashMap::new()),
			inflight: parking_lot::Mutex::new(HashMap::new()),
			transports,
			extensions,
			callbacks,
		}
	}

	/// Register or replace the server definition for a language. Running
	/// sessions keep the definition they started with.
	pub fn define(&self, language: impl Into<String>, definition: ServerDefinition) {
		self.definitions.write().insert(language.into(), definition);
	}

	/// The registered definition for a language.
	pub fn definition(&self, language: &str) -> Option<ServerDefinition> {
		self.definitions.read().get(language).cloned()
	}

	/// The session for the identity a file resolves to, if one is running.
	pub fn get(&self, language: &str, file_path: &Path) -> Option<Arc<Session>> {
		let definition = self.definition(language)?;
		let identity = ServerIdentity {
			language: language.to_owned(),
			root: find_root_path(file_path, &definition.root_markers),
		};
		self.sessions.lock().get(&identity).cloned()
	}

	/// Every registered session, whatever its status.
	pub fn sessions(&self) -> Vec<Arc<Session>> {
		self.sessions.lock().values().cloned().collect()
	}

	/// Get the session serving `file_path`'s identity, starting one if none
	/// exists.
	///
	/// Concurrent callers for the same identity elect a single leader; all
	/// of them observe the leader's outcome. A session that later crashed is
	/// returned as-is: recovery is an explicit restart, never implicit.
	pub async fn get_or_start(&self, language: &str, file_path: &Path) -> Result<Arc<Session>> {
		let definition = self.definition(language).ok_or_else(|| Error::Startup {
			server: language.to_owned(),
			reason: "no server definition registered".into(),
		})?;
		let identity = ServerIdentity {
			language: language.to_owned(),
			root: find_root_path(file_path, &definition.root_markers),
		};

		loop {
			if let Some(existing) = self.sessions.lock().get(&identity).cloned() {
				return Ok(existing);
			}

			let (flight, is_leader) = {
				let mut inflight = self.inflight.lock();
				if let Some(flight) = inflight.get(&identity) {
					(flight.clone(), false)
				} else {
					let (tx, rx) = watch::channel(None);
					let flight = Arc::new(InFlightStart { tx, rx });
					inflight.insert(identity.clone(), flight.clone());
					(flight, true)
				}
			};

			if !is_leader {
				let mut rx = flight.rx.clone();
				loop {
					let outcome = rx.borrow().clone();
					if let Some(outcome) = outcome {
						return outcome;
					}
					// Every flight holder gone without an outcome: start over.
					if rx.changed().await.is_err() {
						break;
					}
				}
				continue;
			}

			let guard = StartGuard {
				registry: self,
				identity: identity.clone(),
				flight: flight.clone(),
				completed: false,
			};
			let outcome = self.start_session(&identity, &definition).await;
			if let Ok(session) = &outcome {
				self.sessions.lock().insert(identity.clone(), session.clone());
			}
			guard.finish(outcome.clone());
			return outcome;
		}
	}

	async fn start_session(
		&self,
		identity: &ServerIdentity,
		definition: &ServerDefinition,
	) -> StartOutcome {
		tracing::info!(
			identity = %identity,
			server = %definition.launch.display_name(),
			"starting language server session"
		);
		let transport = self.transports.create(&definition.launch, &identity.root);
		let extension = self.extensions.create(identity);
		let session = Session::new(
			identity.clone(),
			definition.clone(),
			transport,
			self.callbacks.clone(),
			extension,
		);
		session.start().await?;
		Ok(session)
	}

	/// Remove a session from the registry and stop it.
	pub async fn remove(&self, identity: &ServerIdentity) -> Result<()> {
		let Some(session) = self.sessions.lock().remove(identity) else {
			return Ok(());
		};
		session.stop().await
	}

	/// Stop every session and empty the registry.
	pub async fn shutdown_all(&self) {
		let sessions: Vec<_> = self.sessions.lock().drain().collect();
		for (identity, session) in sessions {
			if let Err(err) = session.stop().await {
				tracing::warn!(identity = %identity, error = %err, "failed to stop session");
			}
		}
	}
}

/// Un-wedges the inflight map when the leader finishes or is cancelled.
///
/// Waiters block on the flight's watch channel, so a leader that vanishes
/// without publishing would strand them; dropping the guard mid-start
/// publishes a startup error in its place.
struct StartGuard<'a> {
	registry: &'a SessionRegistry,
	identity: ServerIdentity,
	flight: Arc<InFlightStart>,
	completed: bool,
}

impl StartGuard<'_> {
	fn finish(mut self, outcome: StartOutcome) {
		self.registry.inflight.lock().remove(&self.identity);
		let _ = self.flight.tx.send(Some(outcome));
		self.completed = true;
	}
}

impl Drop for StartGuard<'_> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		// Cancelled mid-start: clear the entry and hand every waiter a
		// terminal outcome.
		self.registry.inflight.lock().remove(&self.identity);
		let _ = self.flight.tx.send(Some(Err(Error::Startup {
			server: self.identity.to_string(),
			reason: "startup cancelled before completion".into(),
		})));
	}
}

/// Resolve the project root for a file: the nearest ancestor directory
/// holding one of the marker files, or the file's own directory when none
/// does.
fn find_root_path(file_path: &Path, root_markers: &[String]) -> PathBuf {
	let abs_path = file_path
		.canonicalize()
		.unwrap_or_else(|_| std::env::current_dir().unwrap_or_default().join(file_path));
	let start_dir = if abs_path.is_file() {
		abs_path.parent().unwrap_or(&abs_path).to_path_buf()
	} else {
		abs_path
	};
	let marked = start_dir
		.ancestors()
		.find(|dir| root_markers.iter().any(|marker| dir.join(marker).exists()))
		.map(Path::to_path_buf);
	marked.unwrap_or(start_dir)
}
