//! Backend process lifecycle and the raw framed channel to it.
//!
//! [`BackendTransport`] is the seam between the communicator and the process
//! mechanics: production code uses [`ProcessTransport`], which spawns the
//! backend executable and pumps length-prefixed frames over its stdio; tests
//! substitute a mock. The transport reports everything that happens on the
//! channel as [`TransportEvent`]s on a single take-once event stream.

mod io;
mod process;

use async_trait::async_trait;
use tokio::sync::mpsc;

use codemodel_proto::{BackendMessage, EditorMessage};

use crate::Result;
use crate::config::BackendConfig;

pub use process::ProcessTransport;

/// State of the channel to the backend process.
///
/// While not [`Connected`](Self::Connected) no outbound message is written:
/// registrations are replayed after reconnection, completion requests are
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	/// No backend process.
	Disconnected,
	/// Process launched, waiting for it to report alive.
	Connecting,
	/// Channel established and usable.
	Connected,
	/// The process exited unexpectedly.
	Crashed,
}

impl std::fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Self::Disconnected => "disconnected",
			Self::Connecting => "connecting",
			Self::Connected => "connected",
			Self::Crashed => "crashed",
		};
		f.write_str(s)
	}
}

/// Channel status changes reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
	/// The process is being launched.
	Starting,
	/// The process is up and the channel is pumping.
	Running,
	/// The channel reached EOF; the process exited.
	///
	/// Whether the exit was expected is known only to the communicator, which
	/// tracks whether it initiated a shutdown.
	Stopped,
	/// The channel failed (I/O or codec error); the process is unusable.
	Crashed,
}

/// Events emitted by a transport.
#[derive(Debug)]
pub enum TransportEvent {
	/// A decoded inbound message.
	Message(BackendMessage),
	/// A channel status change.
	Status(TransportStatus),
}

/// Seam between the communicator and the backend process mechanics.
#[async_trait]
pub trait BackendTransport: Send + Sync {
	/// Take the transport's event stream.
	///
	/// # Panics
	///
	/// Panics when called a second time; there is exactly one consumer.
	fn events(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

	/// Launch the backend process.
	///
	/// Launching while a process is already live is a caller error and a
	/// logged no-op. At most one backend process is alive at a time.
	async fn start(&self, config: &BackendConfig) -> Result<()>;

	/// Queue a message for transmission, preserving send order.
	fn send(&self, msg: EditorMessage) -> Result<()>;

	/// Stop the backend deliberately, giving it a short grace period to exit
	/// on its own before killing it.
	async fn stop(&self);
}
