//! Transport spawning the backend as a child process.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

use codemodel_proto::EditorMessage;

use super::io::run_backend_io;
use super::{BackendTransport, TransportEvent, TransportStatus};
use crate::config::BackendConfig;
use crate::{Error, Result};

/// Grace period for the backend to exit on its own after a deliberate stop.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// A live backend process with its outbound queue.
struct RunningBackend {
	child: Child,
	outbound_tx: mpsc::UnboundedSender<EditorMessage>,
}

/// Transport that spawns the backend executable and talks to it over stdio.
pub struct ProcessTransport {
	/// The live process, if any. At most one at a time.
	process: Mutex<Option<RunningBackend>>,
	/// Event sink shared with the per-process I/O task.
	event_tx: mpsc::UnboundedSender<TransportEvent>,
	/// Event stream handed out once via [`BackendTransport::events`].
	event_rx: RwLock<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl ProcessTransport {
	/// Create a transport. No process is launched until
	/// [`start`](BackendTransport::start).
	pub fn new() -> Arc<Self> {
		let (event_tx, event_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			process: Mutex::new(None),
			event_tx,
			event_rx: RwLock::new(Some(event_rx)),
		})
	}

	fn spawn_backend(&self, config: &BackendConfig) -> Result<RunningBackend> {
		let mut cmd = Command::new(&config.command);
		cmd.args(&config.args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true);

		for (key, value) in &config.env {
			cmd.env(key, value);
		}

		let mut child = cmd.spawn().map_err(|e| Error::Spawn {
			command: config.command.clone(),
			reason: e.to_string(),
		})?;

		let stdin = child.stdin.take().ok_or_else(|| Error::Spawn {
			command: config.command.clone(),
			reason: "failed to capture stdin".into(),
		})?;
		let stdout = child.stdout.take().ok_or_else(|| Error::Spawn {
			command: config.command.clone(),
			reason: "failed to capture stdout".into(),
		})?;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		tokio::spawn(run_backend_io(stdin, stdout, outbound_rx, self.event_tx.clone()));

		Ok(RunningBackend { child, outbound_tx })
	}
}

#[async_trait]
impl BackendTransport for ProcessTransport {
	fn events(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
		self.event_rx
			.write()
			.take()
			.expect("events() can only be called once")
	}

	async fn start(&self, config: &BackendConfig) -> Result<()> {
		{
			let process = self.process.lock();
			if process.is_some() {
				warn!(command = %config.command, "backend already running; ignoring start");
				return Ok(());
			}
		}

		info!(command = %config.command, "starting backend process");
		let _ = self
			.event_tx
			.send(TransportEvent::Status(TransportStatus::Starting));

		let running = self.spawn_backend(config)?;
		*self.process.lock() = Some(running);

		let _ = self
			.event_tx
			.send(TransportEvent::Status(TransportStatus::Running));
		Ok(())
	}

	fn send(&self, msg: EditorMessage) -> Result<()> {
		let process = self.process.lock();
		let running = process.as_ref().ok_or(Error::NotConnected)?;
		running
			.outbound_tx
			.send(msg)
			.map_err(|_| Error::ChannelClosed)
	}

	async fn stop(&self) {
		let running = self.process.lock().take();
		let Some(mut running) = running else {
			return; // idempotent
		};

		// Give the backend a chance to exit cleanly on the `End` message the
		// communicator sent before calling stop, then kill.
		if tokio::time::timeout(STOP_GRACE, running.child.wait())
			.await
			.is_err()
		{
			warn!("backend did not exit within grace period; killing");
			let _ = running.child.start_kill();
			let _ = running.child.wait().await;
		}
	}
}
