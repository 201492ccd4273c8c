//! Assist sessions: editor-side handles for one completion interaction.
//!
//! A session is scoped to one cursor position / request lifecycle in the
//! editor. Completion results are delivered on the session's channel; when
//! the editor abandons the session (widget closed, cursor moved on), dropping
//! the [`AssistSession`] closes the channel and any late result is discarded
//! at delivery time. That is the only "cancellation" the protocol supports —
//! there is no wire-level cancel message.

use tokio::sync::mpsc;
use tracing::debug;

use codemodel_proto::{CodeCompletion, Ticket};

/// Unique identifier for an assist session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "S#{}", self.0)
	}
}

/// Completion results delivered to the session that requested them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResults {
	/// Ticket of the request these results answer.
	pub ticket: Ticket,
	/// Ranked proposals from the backend.
	pub completions: Vec<CodeCompletion>,
}

/// Editor-side handle for one in-progress completion interaction.
///
/// Created by [`Communicator::create_session`](crate::Communicator::create_session).
/// Dropping the session abandons it: results still in flight are discarded on
/// arrival.
#[derive(Debug)]
pub struct AssistSession {
	id: SessionId,
	results_tx: mpsc::UnboundedSender<CompletionResults>,
	results_rx: mpsc::UnboundedReceiver<CompletionResults>,
}

impl AssistSession {
	pub(crate) fn new(id: SessionId) -> Self {
		let (results_tx, results_rx) = mpsc::unbounded_channel();
		Self {
			id,
			results_tx,
			results_rx,
		}
	}

	/// This session's identifier.
	pub fn id(&self) -> SessionId {
		self.id
	}

	/// Wait for the next delivered results.
	///
	/// Returns `None` only if the communicator side is gone entirely; stale
	/// results for superseded tickets are never delivered here.
	pub async fn next_results(&mut self) -> Option<CompletionResults> {
		self.results_rx.recv().await
	}

	/// Take results without waiting, if some have already arrived.
	pub fn try_results(&mut self) -> Option<CompletionResults> {
		self.results_rx.try_recv().ok()
	}

	pub(crate) fn session_ref(&self) -> SessionRef {
		SessionRef {
			id: self.id,
			results_tx: self.results_tx.clone(),
		}
	}
}

/// Weak reference to a session held by pending completion entries.
///
/// Holds only the delivery channel; it never keeps the session alive. If the
/// session was dropped before results arrive, delivery is a silent no-op.
#[derive(Debug, Clone)]
pub struct SessionRef {
	id: SessionId,
	results_tx: mpsc::UnboundedSender<CompletionResults>,
}

impl SessionRef {
	/// The session this reference points at.
	pub fn id(&self) -> SessionId {
		self.id
	}

	/// Deliver results to the owning session.
	///
	/// Returns `false` if the session has been abandoned in the meantime.
	pub fn deliver(&self, results: CompletionResults) -> bool {
		let ticket = results.ticket;
		match self.results_tx.send(results) {
			Ok(()) => true,
			Err(_) => {
				debug!(session = %self.id, %ticket, "session gone; dropping completion results");
				false
			}
		}
	}
}
