//! Correlation of in-flight completion requests with backend responses.
//!
//! Every outbound `CompleteCode` gets a fresh ticket and a pending entry
//! here; a session has at most one entry, so a new request from the same
//! session supersedes the previous one. When the matching `CodeCompleted`
//! arrives the entry is resolved and removed; a miss means the request was
//! cancelled or superseded and the response must be dropped silently. There
//! is no wire-level cancel: a superseded request keeps computing
//! backend-side, only its result is ignored.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use codemodel_proto::Ticket;

use crate::session::{SessionId, SessionRef};

/// One completion request awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingCompletion {
	/// Ticket correlating request and response.
	pub ticket: Ticket,
	/// The session the request was issued for.
	pub session: SessionRef,
	/// File the completion was requested in.
	pub file_path: PathBuf,
	/// 1-based cursor line at request time.
	pub line: u32,
	/// 1-based cursor column at request time.
	pub column: u32,
}

/// Ticket → pending-completion map.
///
/// Mutated only from the communicator side; lookups are O(1) in the number of
/// pending requests.
#[derive(Debug, Default)]
pub struct RequestTracker {
	pending: HashMap<Ticket, PendingCompletion>,
}

impl RequestTracker {
	/// Create an empty tracker.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a pending completion.
	///
	/// Any earlier entry for the same session is superseded and removed, so
	/// its response falls into the [`resolve`](Self::resolve)-miss path.
	/// Tickets are unique by construction of the communicator's counter; a
	/// duplicate is a caller bug and is logged and ignored.
	pub fn add_pending(&mut self, pending: PendingCompletion) {
		let ticket = pending.ticket;
		if self.pending.contains_key(&ticket) {
			warn!(%ticket, "duplicate ticket; ignoring pending completion");
			return;
		}
		let session = pending.session.id();
		self.pending.retain(|superseded, p| {
			if p.session.id() == session {
				debug!(%session, %superseded, %ticket, "new request supersedes pending completion");
				false
			} else {
				true
			}
		});
		self.pending.insert(ticket, pending);
	}

	/// Remove and return the entry for `ticket`.
	///
	/// `None` means the request was already cancelled or superseded; the
	/// caller drops the response without further action.
	pub fn resolve(&mut self, ticket: Ticket) -> Option<PendingCompletion> {
		self.pending.remove(&ticket)
	}

	/// Remove all entries belonging to a session being torn down.
	///
	/// Responses arriving later for these tickets fall into the
	/// [`resolve`](Self::resolve)-miss path. Returns how many entries were
	/// removed.
	pub fn cancel_session(&mut self, session: SessionId) -> usize {
		let before = self.pending.len();
		self.pending.retain(|_, p| p.session.id() != session);
		let removed = before - self.pending.len();
		if removed > 0 {
			debug!(%session, removed, "cancelled pending completions for session");
		}
		removed
	}

	/// Drop every pending entry, e.g. when the connection is lost.
	pub fn clear(&mut self) {
		if !self.pending.is_empty() {
			debug!(abandoned = self.pending.len(), "clearing pending completions");
			self.pending.clear();
		}
	}

	/// Whether no completion request is outstanding.
	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	/// Number of outstanding completion requests.
	pub fn len(&self) -> usize {
		self.pending.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::AssistSession;

	fn pending(ticket: u64, session: &AssistSession) -> PendingCompletion {
		PendingCompletion {
			ticket: Ticket(ticket),
			session: session.session_ref(),
			file_path: PathBuf::from("/src/a.cpp"),
			line: 10,
			column: 4,
		}
	}

	#[test]
	fn test_resolve_removes_entry() {
		let session = AssistSession::new(SessionId(1));
		let mut tracker = RequestTracker::new();
		tracker.add_pending(pending(1, &session));

		assert!(!tracker.is_empty());
		assert!(tracker.resolve(Ticket(1)).is_some());
		assert!(tracker.resolve(Ticket(1)).is_none());
		assert!(tracker.is_empty());
	}

	#[test]
	fn test_duplicate_ticket_is_ignored() {
		let session = AssistSession::new(SessionId(1));
		let mut tracker = RequestTracker::new();
		tracker.add_pending(pending(1, &session));

		let mut duplicate = pending(1, &session);
		duplicate.line = 99;
		tracker.add_pending(duplicate);

		assert_eq!(tracker.len(), 1);
		assert_eq!(tracker.resolve(Ticket(1)).unwrap().line, 10);
	}

	#[test]
	fn test_new_request_supersedes_same_session() {
		let session = AssistSession::new(SessionId(1));
		let mut tracker = RequestTracker::new();
		tracker.add_pending(pending(1, &session));
		tracker.add_pending(pending(2, &session));

		// The older ticket falls into the resolve-miss path.
		assert_eq!(tracker.len(), 1);
		assert!(tracker.resolve(Ticket(1)).is_none());
		assert!(tracker.resolve(Ticket(2)).is_some());
	}

	#[test]
	fn test_cancel_session_removes_only_its_tickets() {
		let session_a = AssistSession::new(SessionId(1));
		let session_b = AssistSession::new(SessionId(2));
		let mut tracker = RequestTracker::new();
		tracker.add_pending(pending(1, &session_a));
		tracker.add_pending(pending(2, &session_b));

		assert_eq!(tracker.cancel_session(SessionId(1)), 1);
		assert!(tracker.resolve(Ticket(1)).is_none());
		assert!(tracker.resolve(Ticket(2)).is_some());
	}

	#[test]
	fn test_clear_empties_tracker() {
		let session_a = AssistSession::new(SessionId(1));
		let session_b = AssistSession::new(SessionId(2));
		let mut tracker = RequestTracker::new();
		tracker.add_pending(pending(1, &session_a));
		tracker.add_pending(pending(2, &session_b));

		tracker.clear();
		assert!(tracker.is_empty());
		assert_eq!(tracker.len(), 0);
	}
}
