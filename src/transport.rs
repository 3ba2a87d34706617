//! Byte-stream transports to language server processes.
//!
//! A transport owns the connection to one server instance and exposes a raw
//! read/write pair plus a stop operation. The launch descriptor is consumed
//! opaquely; the runtime never parses or validates it beyond what spawning
//! requires.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Opaque "how to start" descriptor for a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchSpec {
	/// Spawn a child process and talk over its stdio.
	Command {
		/// Executable to spawn.
		command: String,
		/// Arguments to pass.
		#[serde(default)]
		args: Vec<String>,
		/// Environment variables to set.
		#[serde(default)]
		env: HashMap<String, String>,
		/// Working directory for the child; defaults to the session root.
		#[serde(default)]
		cwd: Option<PathBuf>,
	},
	/// Connect to an already-running server over TCP.
	Socket {
		/// Host to connect to.
		host: String,
		/// Port to connect to.
		port: u16,
	},
}

impl LaunchSpec {
	/// Shorthand for a stdio command with no arguments.
	pub fn command(command: impl Into<String>) -> Self {
		Self::Command {
			command: command.into(),
			args: Vec::new(),
			env: HashMap::new(),
			cwd: None,
		}
	}

	/// Human-readable name of the server this spec launches.
	pub fn display_name(&self) -> String {
		match self {
			Self::Command { command, .. } => command.clone(),
			Self::Socket { host, port } => format!("{host}:{port}"),
		}
	}
}

/// The raw byte channels of one live connection.
pub struct IoPair {
	/// Server-to-client bytes.
	pub reader: Box<dyn AsyncBufRead + Send + Unpin>,
	/// Client-to-server bytes.
	pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

/// A connection to one server instance.
///
/// `start` may be called again after `stop` (or after the previous
/// connection died) to produce a fresh pair; the session guarantees at most
/// one live pair is in use at a time.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Establish the connection and hand back its byte channels.
	async fn start(&self) -> Result<IoPair>;

	/// Tear the connection down. Idempotent.
	async fn stop(&self) -> Result<()>;
}

/// Builds a transport for a launch descriptor.
///
/// Deployments (and tests) substitute their own factory to control how
/// connections are made without touching session logic.
pub trait TransportFactory: Send + Sync {
	/// Create a transport for the given spec rooted at `root`.
	fn create(&self, spec: &LaunchSpec, root: &std::path::Path) -> Arc<dyn Transport>;
}

/// Default factory: child processes for commands, TCP for sockets.
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
	fn create(&self, spec: &LaunchSpec, root: &std::path::Path) -> Arc<dyn Transport> {
		match spec {
			LaunchSpec::Command { .. } => {
				Arc::new(ProcessTransport::new(spec.clone(), root.to_path_buf()))
			}
			LaunchSpec::Socket { host, port } => Arc::new(SocketTransport::new(host.clone(), *port)),
		}
	}
}

/// Transport that spawns the server as a child process and talks over its
/// stdin/stdout.
pub struct ProcessTransport {
	spec: LaunchSpec,
	root: PathBuf,
	child: Mutex<Option<Child>>,
}

impl ProcessTransport {
	/// Create a process transport for a `LaunchSpec::Command` descriptor.
	pub fn new(spec: LaunchSpec, root: PathBuf) -> Self {
		Self {
			spec,
			root,
			child: Mutex::new(None),
		}
	}
}

#[async_trait]
impl Transport for ProcessTransport {
	async fn start(&self) -> Result<IoPair> {
		let LaunchSpec::Command {
			command,
			args,
			env,
			cwd,
		} = &self.spec
		else {
			return Err(Error::Startup {
				server: self.spec.display_name(),
				reason: "process transport requires a command launch spec".into(),
			});
		};

		let mut cmd = Command::new(command);
		cmd.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true)
			.current_dir(cwd.as_deref().unwrap_or(&self.root));
		for (key, value) in env {
			cmd.env(key, value);
		}

		let mut child = cmd.spawn().map_err(|e| Error::Startup {
			server: command.clone(),
			reason: e.to_string(),
		})?;
		let stdin = child.stdin.take().ok_or_else(|| Error::Startup {
			server: command.clone(),
			reason: "failed to capture stdin".into(),
		})?;
		let stdout = child.stdout.take().ok_or_else(|| Error::Startup {
			server: command.clone(),
			reason: "failed to capture stdout".into(),
		})?;

		// Replacing a live child kills the old one first.
		if let Some(mut old) = self.child.lock().await.replace(child) {
			let _ = old.start_kill();
		}

		tracing::info!(command = %command, "spawned language server process");
		Ok(IoPair {
			reader: Box::new(BufReader::new(stdout)),
			writer: Box::new(stdin),
		})
	}

	async fn stop(&self) -> Result<()> {
		let Some(mut child) = self.child.lock().await.take() else {
			return Ok(());
		};
		let _ = child.start_kill();
		let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
		Ok(())
	}
}

/// Transport that connects to a server listening on a TCP socket.
pub struct SocketTransport {
	host: String,
	port: u16,
}

impl SocketTransport {
	/// Create a socket transport.
	pub fn new(host: String, port: u16) -> Self {
		Self { host, port }
	}
}

#[async_trait]
impl Transport for SocketTransport {
	async fn start(&self) -> Result<IoPair> {
		let stream = TcpStream::connect((self.host.as_str(), self.port))
			.await
			.map_err(|e| Error::Startup {
				server: format!("{}:{}", self.host, self.port),
				reason: e.to_string(),
			})?;
		let (read_half, write_half) = stream.into_split();
		Ok(IoPair {
			reader: Box::new(BufReader::new(read_half)),
			writer: Box::new(write_half),
		})
	}

	async fn stop(&self) -> Result<()> {
		// Dropping the halves closes the stream; nothing to kill.
		Ok(())
	}
}
