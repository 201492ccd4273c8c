//! Outbound message transmission.
//!
//! Pure encode-and-send: each method builds one [`EditorMessage`] and hands
//! it to the transport. The only failure mode of its own is sending while the
//! connection is not [`Connected`](ConnectionState::Connected); the
//! communicator decides per message type whether that means queue-for-replay
//! or drop.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use codemodel_proto::{EditorMessage, FileContainer, ProjectPartContainer, Ticket};

use crate::connection::{BackendTransport, ConnectionState};
use crate::{Error, Result};

/// Serializes and transmits each outbound message type.
#[derive(Clone)]
pub struct BackendSender {
	transport: Arc<dyn BackendTransport>,
	conn_state: watch::Receiver<ConnectionState>,
}

impl BackendSender {
	pub(crate) fn new(
		transport: Arc<dyn BackendTransport>,
		conn_state: watch::Receiver<ConnectionState>,
	) -> Self {
		Self {
			transport,
			conn_state,
		}
	}

	fn send(&self, msg: EditorMessage) -> Result<()> {
		if *self.conn_state.borrow() != ConnectionState::Connected {
			return Err(Error::NotConnected);
		}
		trace!(kind = msg.kind(), "sending");
		self.transport.send(msg)
	}

	/// Ask the backend to shut down cleanly.
	pub fn end(&self) -> Result<()> {
		self.send(EditorMessage::End)
	}

	/// Diagnostic round-trip.
	pub fn echo(&self, payload: impl Into<String>) -> Result<()> {
		self.send(EditorMessage::Echo {
			payload: payload.into(),
		})
	}

	/// Register translation units.
	pub fn register_translation_units(&self, files: Vec<FileContainer>) -> Result<()> {
		self.send(EditorMessage::RegisterTranslationUnits { files })
	}

	/// Refresh translation unit content snapshots.
	pub fn update_translation_units(&self, files: Vec<FileContainer>) -> Result<()> {
		self.send(EditorMessage::UpdateTranslationUnits { files })
	}

	/// Unregister translation units.
	pub fn unregister_translation_units(&self, files: Vec<FileContainer>) -> Result<()> {
		self.send(EditorMessage::UnregisterTranslationUnits { files })
	}

	/// Register project part configurations.
	pub fn register_project_parts(&self, parts: Vec<ProjectPartContainer>) -> Result<()> {
		self.send(EditorMessage::RegisterProjectParts { parts })
	}

	/// Unregister project part configurations.
	pub fn unregister_project_parts(&self, ids: Vec<String>) -> Result<()> {
		self.send(EditorMessage::UnregisterProjectParts { ids })
	}

	/// Register unsaved-buffer overlays.
	pub fn register_unsaved_files(&self, files: Vec<FileContainer>) -> Result<()> {
		self.send(EditorMessage::RegisterUnsavedFiles { files })
	}

	/// Unregister unsaved-buffer overlays.
	pub fn unregister_unsaved_files(&self, files: Vec<FileContainer>) -> Result<()> {
		self.send(EditorMessage::UnregisterUnsavedFiles { files })
	}

	/// Request completion at a cursor position.
	pub fn complete_code(
		&self,
		ticket: Ticket,
		file_path: PathBuf,
		line: u32,
		column: u32,
		project_file_path: PathBuf,
	) -> Result<()> {
		self.send(EditorMessage::CompleteCode {
			ticket,
			file_path,
			line,
			column,
			project_file_path,
		})
	}

	/// Request fresh annotations for a document.
	pub fn request_document_annotations(&self, file_path: PathBuf) -> Result<()> {
		self.send(EditorMessage::RequestDocumentAnnotations { file_path })
	}

	/// Tell the backend which files are foreground.
	pub fn update_visible_translation_units(
		&self,
		current_file: Option<PathBuf>,
		visible_files: Vec<PathBuf>,
	) -> Result<()> {
		self.send(EditorMessage::UpdateVisibleTranslationUnits {
			current_file,
			visible_files,
		})
	}
}
