//! Editor-side IPC client for the out-of-process code model backend.
//!
//! The backend is a separate executable that parses C/C++ translation units
//! and computes code completions. This crate manages the connection to it:
//!
//! * [`connection`]: the [`BackendTransport`] abstraction plus
//!   [`ProcessTransport`], which spawns the backend and pumps framed messages
//!   over its stdio.
//! * [`tracker`]: correlation of in-flight completion requests by
//!   [`Ticket`](codemodel_proto::Ticket), including local cancellation.
//! * [`registry`]: the editor's authoritative view of registered translation
//!   units and project parts — the replay set after a backend restart.
//! * [`session`]: assist-session handles through which completion results are
//!   delivered back to the editor.
//! * [`communicator`]: the orchestrator tying it all together — state
//!   machine, crash recovery with bounded restarts, and the public operations
//!   the editor integration calls.
//!
//! All interaction with the backend is asynchronous message passing; no
//! operation blocks waiting for a backend reply. The backend protocol has no
//! cancel message: abandoning a request only stops its result from being
//! delivered, it does not stop the backend-side computation.

#![warn(missing_docs)]

use std::time::Duration;

// Used by the integration tests only.
#[cfg(test)]
use tracing_subscriber as _;

pub mod communicator;
pub mod config;
pub mod connection;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod session;
pub mod tracker;

pub use communicator::{AnnotationsEvent, Communicator, CommunicatorState};
pub use config::BackendConfig;
pub use connection::{BackendTransport, ConnectionState, ProcessTransport, TransportEvent, TransportStatus};
pub use registry::{ProjectPartRegistry, TranslationUnitRegistry};
pub use sender::BackendSender;
pub use session::{AssistSession, CompletionResults, SessionId, SessionRef};
pub use tracker::{PendingCompletion, RequestTracker};

/// A convenient type alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The backend executable failed to spawn.
	#[error("failed to spawn backend `{command}`: {reason}")]
	Spawn {
		/// The command that was attempted.
		command: String,
		/// Why the spawn failed.
		reason: String,
	},
	/// An operation requires a Connected channel but the connection is down.
	#[error("backend connection is not established")]
	NotConnected,
	/// The internal channel to the connection's I/O task is gone.
	#[error("backend channel closed")]
	ChannelClosed,
	/// The backend did not report alive within the configured start timeout.
	#[error("backend did not report alive within {0:?}")]
	StartTimeout(Duration),
	/// The backend crashed repeatedly and automatic restarts were given up.
	#[error("backend keeps crashing; giving up after {restarts} restarts in {window:?}")]
	RestartStorm {
		/// How many unexpected exits were observed.
		restarts: u32,
		/// The sliding window the exits fell into.
		window: Duration,
	},
	/// A frame failed to encode or decode.
	#[error(transparent)]
	Codec(#[from] codemodel_proto::CodecError),
	/// Input/output errors from the underlying channel.
	#[error("{0}")]
	Io(#[from] std::io::Error),
}
