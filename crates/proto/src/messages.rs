//! Message catalog for the backend protocol.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Correlation identifier binding an outbound completion request to its
/// eventual inbound response.
///
/// Tickets are assigned by the editor side, monotonically per connection, and
/// are never reused for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticket(pub u64);

impl std::fmt::Display for Ticket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "T#{}", self.0)
	}
}

/// The backend's view of one tracked source file.
///
/// Carries the in-memory content when the editor buffer is dirty, so the
/// backend sees *unsaved* content rather than what is on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContainer {
	/// Absolute path of the source file.
	pub file_path: PathBuf,
	/// Identifier of the project part this file belongs to.
	pub project_part_id: String,
	/// Unsaved buffer content, if the editor buffer is dirty.
	pub unsaved_content: Option<String>,
	/// Revision of the content snapshot. Incremented on each update.
	pub document_revision: u32,
}

impl FileContainer {
	/// Create a container for a file with no unsaved content.
	pub fn new(file_path: impl Into<PathBuf>, project_part_id: impl Into<String>) -> Self {
		Self {
			file_path: file_path.into(),
			project_part_id: project_part_id.into(),
			unsaved_content: None,
			document_revision: 0,
		}
	}

	/// Attach an unsaved content snapshot.
	#[must_use]
	pub fn with_unsaved_content(mut self, content: impl Into<String>, revision: u32) -> Self {
		self.unsaved_content = Some(content.into());
		self.document_revision = revision;
		self
	}

	/// Whether this container carries an unsaved content overlay.
	pub fn has_unsaved_content(&self) -> bool {
		self.unsaved_content.is_some()
	}
}

/// A named compilation configuration applicable to one or more files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPartContainer {
	/// Identifier, usually derived from the project file path.
	pub project_part_id: String,
	/// Compiler command-line arguments (flags, include paths, defines).
	pub arguments: Vec<String>,
}

impl ProjectPartContainer {
	/// Create a project part.
	pub fn new(
		project_part_id: impl Into<String>,
		arguments: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		Self {
			project_part_id: project_part_id.into(),
			arguments: arguments.into_iter().map(Into::into).collect(),
		}
	}
}

/// The kind of symbol a completion proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionKind {
	/// Free or member function.
	Function,
	/// Constructor.
	Constructor,
	/// Destructor.
	Destructor,
	/// Variable or data member.
	Variable,
	/// Class, struct or union.
	Class,
	/// Enumeration type.
	Enum,
	/// Enumerator value.
	Enumerator,
	/// Namespace.
	Namespace,
	/// Type alias or typedef.
	TypeAlias,
	/// Preprocessor macro or directive.
	PreProcessor,
	/// Keyword.
	Keyword,
	/// Code snippet / clang pattern.
	Snippet,
	/// Anything the backend could not classify further.
	Other,
}

/// Whether a completion is usable at the requested location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionAvailability {
	/// Usable as-is.
	Available,
	/// Usable but marked deprecated.
	Deprecated,
	/// Declared but not available here.
	NotAvailable,
	/// Not accessible (e.g. private member).
	NotAccessible,
}

/// One completion proposal computed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCompletion {
	/// Text to insert.
	pub text: String,
	/// Symbol kind.
	pub kind: CompletionKind,
	/// Availability at the request location.
	pub availability: CompletionAvailability,
	/// Backend-assigned ranking priority; lower sorts first.
	pub priority: u32,
	/// Whether the proposal takes parameters (affects parenthesis insertion).
	pub has_parameters: bool,
}

impl CodeCompletion {
	/// Create a completion with default availability and priority.
	pub fn new(text: impl Into<String>, kind: CompletionKind) -> Self {
		Self {
			text: text.into(),
			kind,
			availability: CompletionAvailability::Available,
			priority: 0,
			has_parameters: false,
		}
	}
}

/// Severity/kind of a document annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationKind {
	/// Compile error.
	Error,
	/// Compile warning.
	Warning,
	/// Informational note attached to another annotation.
	Note,
	/// Semantic highlighting range.
	Highlight,
}

/// One annotation (diagnostic or highlighting range) for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
	/// 1-based line.
	pub line: u32,
	/// 1-based column.
	pub column: u32,
	/// Length of the annotated range in characters.
	pub length: u32,
	/// Annotation kind.
	pub kind: AnnotationKind,
	/// Human-readable message; empty for pure highlighting ranges.
	pub message: String,
}

/// Messages sent from the editor to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditorMessage {
	/// Deliberate shutdown request; the backend exits cleanly.
	End,
	/// Diagnostic round-trip; the backend echoes the payload back.
	Echo {
		/// Opaque payload to be echoed.
		payload: String,
	},
	/// Register translation units the backend should start tracking.
	RegisterTranslationUnits {
		/// Files with their current content snapshots.
		files: Vec<FileContainer>,
	},
	/// Refresh the content snapshot of already-registered translation units.
	UpdateTranslationUnits {
		/// Files with their new content snapshots.
		files: Vec<FileContainer>,
	},
	/// Stop tracking translation units.
	UnregisterTranslationUnits {
		/// Files to drop.
		files: Vec<FileContainer>,
	},
	/// Register project compilation configurations.
	RegisterProjectParts {
		/// Project parts with their compiler arguments.
		parts: Vec<ProjectPartContainer>,
	},
	/// Remove project compilation configurations.
	UnregisterProjectParts {
		/// Identifiers of the parts to remove.
		ids: Vec<String>,
	},
	/// Register content overlays for dirty, unsaved editor buffers.
	RegisterUnsavedFiles {
		/// Overlay files; content is mandatory here.
		files: Vec<FileContainer>,
	},
	/// Remove content overlays, reverting the backend to on-disk content.
	UnregisterUnsavedFiles {
		/// Overlay files to drop.
		files: Vec<FileContainer>,
	},
	/// Request code completion at a cursor position.
	CompleteCode {
		/// Correlation ticket, echoed back in [`BackendMessage::CodeCompleted`].
		ticket: Ticket,
		/// File the cursor is in.
		file_path: PathBuf,
		/// 1-based cursor line.
		line: u32,
		/// 1-based cursor column.
		column: u32,
		/// Project file selecting the part configuration to compile under.
		project_file_path: PathBuf,
	},
	/// Request fresh annotations for a document.
	RequestDocumentAnnotations {
		/// File to annotate.
		file_path: PathBuf,
	},
	/// Scheduling hint telling the backend which files are foreground.
	UpdateVisibleTranslationUnits {
		/// File currently focused in the editor, if any.
		current_file: Option<PathBuf>,
		/// All files currently visible in some editor split.
		visible_files: Vec<PathBuf>,
	},
}

/// Messages sent from the backend to the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendMessage {
	/// The backend is up and responsive. Sent once after startup.
	Alive,
	/// Echo reply for [`EditorMessage::Echo`].
	Echo {
		/// The payload from the originating echo request.
		payload: String,
	},
	/// Completion results for an earlier [`EditorMessage::CompleteCode`].
	CodeCompleted {
		/// Ticket of the originating request.
		ticket: Ticket,
		/// Proposals, already ranked by the backend.
		completions: Vec<CodeCompletion>,
	},
	/// New annotations for a document the backend re-analyzed.
	DocumentAnnotationsChanged {
		/// Annotated file.
		file_path: PathBuf,
		/// Full replacement set of annotations.
		annotations: Vec<Annotation>,
	},
	/// The backend was asked about a translation unit it does not know.
	///
	/// Diagnostic only: the editor's view of registered state has diverged
	/// from the backend's.
	TranslationUnitDoesNotExist {
		/// The unknown file.
		file_path: PathBuf,
	},
	/// The backend was asked about project parts it does not know.
	ProjectPartsDoNotExist {
		/// The unknown part identifiers.
		ids: Vec<String>,
	},
}

impl BackendMessage {
	/// Short message-kind name for logging.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Alive => "Alive",
			Self::Echo { .. } => "Echo",
			Self::CodeCompleted { .. } => "CodeCompleted",
			Self::DocumentAnnotationsChanged { .. } => "DocumentAnnotationsChanged",
			Self::TranslationUnitDoesNotExist { .. } => "TranslationUnitDoesNotExist",
			Self::ProjectPartsDoNotExist { .. } => "ProjectPartsDoNotExist",
		}
	}
}

impl EditorMessage {
	/// Short message-kind name for logging.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::End => "End",
			Self::Echo { .. } => "Echo",
			Self::RegisterTranslationUnits { .. } => "RegisterTranslationUnits",
			Self::UpdateTranslationUnits { .. } => "UpdateTranslationUnits",
			Self::UnregisterTranslationUnits { .. } => "UnregisterTranslationUnits",
			Self::RegisterProjectParts { .. } => "RegisterProjectParts",
			Self::UnregisterProjectParts { .. } => "UnregisterProjectParts",
			Self::RegisterUnsavedFiles { .. } => "RegisterUnsavedFiles",
			Self::UnregisterUnsavedFiles { .. } => "UnregisterUnsavedFiles",
			Self::CompleteCode { .. } => "CompleteCode",
			Self::RequestDocumentAnnotations { .. } => "RequestDocumentAnnotations",
			Self::UpdateVisibleTranslationUnits { .. } => "UpdateVisibleTranslationUnits",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_file_container_builder() {
		let container = FileContainer::new("/src/a.cpp", "part-1").with_unsaved_content("int x;", 3);

		assert_eq!(container.file_path, PathBuf::from("/src/a.cpp"));
		assert_eq!(container.project_part_id, "part-1");
		assert!(container.has_unsaved_content());
		assert_eq!(container.document_revision, 3);
	}

	#[test]
	fn test_ticket_display() {
		assert_eq!(Ticket(42).to_string(), "T#42");
	}

	#[test]
	fn test_message_kind_names() {
		let msg = BackendMessage::CodeCompleted {
			ticket: Ticket(1),
			completions: Vec::new(),
		};
		assert_eq!(msg.kind(), "CodeCompleted");

		let msg = EditorMessage::RegisterTranslationUnits { files: Vec::new() };
		assert_eq!(msg.kind(), "RegisterTranslationUnits");
	}
}
