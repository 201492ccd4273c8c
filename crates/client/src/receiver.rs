//! Inbound message dispatch.
//!
//! Each message kind has an independent handler; there is no cross-message
//! state machine here. Completion results are joined with their pending
//! request through the [`RequestTracker`]; a miss means the request was
//! cancelled or superseded and the results are dropped silently. Divergence
//! diagnostics from the backend are logged and otherwise ignored.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use codemodel_proto::{Annotation, BackendMessage};

use crate::session::CompletionResults;
use crate::tracker::RequestTracker;

/// Annotations update forwarded to the editor integration.
#[derive(Debug, Clone)]
pub struct AnnotationsEvent {
	/// The annotated file.
	pub file_path: PathBuf,
	/// Full replacement set of annotations for the file.
	pub annotations: Vec<Annotation>,
}

/// Outcome of dispatching one inbound message, for the orchestrating loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatched {
	/// The backend reported alive; the connection is confirmed responsive.
	Alive,
	/// Handled internally, nothing for the loop to do.
	Handled,
}

/// Decodes nothing and blocks never: routes already-decoded inbound messages
/// to the tracker, the annotations channel or the log.
pub struct BackendReceiver {
	tracker: Arc<Mutex<RequestTracker>>,
	annotations_tx: mpsc::UnboundedSender<AnnotationsEvent>,
}

impl BackendReceiver {
	pub(crate) fn new(
		tracker: Arc<Mutex<RequestTracker>>,
		annotations_tx: mpsc::UnboundedSender<AnnotationsEvent>,
	) -> Self {
		Self {
			tracker,
			annotations_tx,
		}
	}

	/// Dispatch one inbound message.
	pub(crate) fn dispatch(&self, msg: BackendMessage) -> Dispatched {
		match msg {
			BackendMessage::Alive => Dispatched::Alive,
			BackendMessage::Echo { payload } => {
				debug!(payload = %payload, "echo from backend");
				Dispatched::Handled
			}
			BackendMessage::CodeCompleted {
				ticket,
				completions,
			} => {
				let pending = self.tracker.lock().resolve(ticket);
				match pending {
					Some(pending) => {
						trace!(%ticket, count = completions.len(), "delivering completion results");
						pending.session.deliver(CompletionResults {
							ticket,
							completions,
						});
					}
					None => {
						// Cancelled or superseded; expected race, not an error.
						debug!(%ticket, "no pending request for ticket; dropping results");
					}
				}
				Dispatched::Handled
			}
			BackendMessage::DocumentAnnotationsChanged {
				file_path,
				annotations,
			} => {
				let _ = self.annotations_tx.send(AnnotationsEvent {
					file_path,
					annotations,
				});
				Dispatched::Handled
			}
			BackendMessage::TranslationUnitDoesNotExist { file_path } => {
				warn!(file = %file_path.display(), "backend does not know translation unit; registered state diverged");
				Dispatched::Handled
			}
			BackendMessage::ProjectPartsDoNotExist { ids } => {
				warn!(?ids, "backend does not know project parts; registered state diverged");
				Dispatched::Handled
			}
		}
	}
}
