//! Editor-side registries of state the backend must know about.
//!
//! The backend process holds no durable state: after a crash the new
//! instance knows nothing about previously registered translation units or
//! project parts. These registries are the authoritative replay set — the
//! communicator snapshots them and re-sends everything whenever a fresh
//! backend instance comes up. They are constructor-injected into the
//! communicator rather than reached through any global accessor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use codemodel_proto::{FileContainer, ProjectPartContainer};

/// Tracked translation units, unsaved-buffer overlays and visibility state.
#[derive(Debug, Default)]
pub struct TranslationUnitRegistry {
	/// Registered units keyed by file path.
	units: RwLock<HashMap<PathBuf, FileContainer>>,
	/// Unsaved overlays for files that are not registered units (headers).
	unsaved: RwLock<HashMap<PathBuf, FileContainer>>,
	/// Which files are foreground in the editor right now.
	visibility: RwLock<Visibility>,
}

#[derive(Debug, Default, Clone)]
struct Visibility {
	current: Option<PathBuf>,
	visible: Vec<PathBuf>,
}

impl TranslationUnitRegistry {
	/// Create an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Register or overwrite translation units.
	pub fn register(&self, files: &[FileContainer]) {
		let mut units = self.units.write();
		for file in files {
			units.insert(file.file_path.clone(), file.clone());
		}
	}

	/// Refresh the content snapshots of registered units.
	///
	/// Unknown files are registered; an update and a register differ only on
	/// the wire, the registry view is the same either way.
	pub fn update(&self, files: &[FileContainer]) {
		self.register(files);
	}

	/// Remove translation units.
	pub fn unregister(&self, files: &[FileContainer]) {
		let mut units = self.units.write();
		for file in files {
			units.remove(&file.file_path);
		}
	}

	/// Record unsaved-buffer overlays.
	///
	/// Overlays for registered units fold into the unit's content snapshot so
	/// replay sends the latest known content; overlays for other files
	/// (typically headers) are kept separately.
	pub fn register_unsaved(&self, files: &[FileContainer]) {
		let mut units = self.units.write();
		let mut unsaved = self.unsaved.write();
		for file in files {
			if let Some(unit) = units.get_mut(&file.file_path) {
				unit.unsaved_content = file.unsaved_content.clone();
				unit.document_revision = file.document_revision;
			} else {
				unsaved.insert(file.file_path.clone(), file.clone());
			}
		}
	}

	/// Drop unsaved overlays, reverting the backend's view to disk content.
	pub fn unregister_unsaved(&self, files: &[FileContainer]) {
		let mut units = self.units.write();
		let mut unsaved = self.unsaved.write();
		for file in files {
			unsaved.remove(&file.file_path);
			if let Some(unit) = units.get_mut(&file.file_path) {
				unit.unsaved_content = None;
			}
		}
	}

	/// Record which files are foreground in the editor.
	pub fn set_visibility(&self, current: Option<PathBuf>, visible: Vec<PathBuf>) {
		*self.visibility.write() = Visibility { current, visible };
	}

	/// The current visibility state: (focused file, visible files).
	pub fn visibility(&self) -> (Option<PathBuf>, Vec<PathBuf>) {
		let vis = self.visibility.read();
		(vis.current.clone(), vis.visible.clone())
	}

	/// Snapshot of all registered units with their latest known content.
	pub fn snapshot(&self) -> Vec<FileContainer> {
		self.units.read().values().cloned().collect()
	}

	/// Snapshot of overlays that are not registered units.
	pub fn snapshot_unsaved(&self) -> Vec<FileContainer> {
		self.unsaved.read().values().cloned().collect()
	}

	/// Whether a unit is registered for `path`.
	pub fn contains(&self, path: &Path) -> bool {
		self.units.read().contains_key(path)
	}

	/// Number of registered units.
	pub fn len(&self) -> usize {
		self.units.read().len()
	}

	/// Whether no unit is registered.
	pub fn is_empty(&self) -> bool {
		self.units.read().is_empty()
	}
}

/// Registered project part configurations plus the always-present fallback.
///
/// The fallback part is used for files with no matching project part and is
/// registered with the backend before anything else.
#[derive(Debug)]
pub struct ProjectPartRegistry {
	fallback: ProjectPartContainer,
	parts: RwLock<HashMap<String, ProjectPartContainer>>,
}

impl ProjectPartRegistry {
	/// Create a registry with the given fallback configuration.
	#[must_use]
	pub fn new(fallback: ProjectPartContainer) -> Self {
		Self {
			fallback,
			parts: RwLock::new(HashMap::new()),
		}
	}

	/// The fallback configuration.
	pub fn fallback(&self) -> &ProjectPartContainer {
		&self.fallback
	}

	/// Register or overwrite project parts.
	pub fn register(&self, parts: &[ProjectPartContainer]) {
		let mut map = self.parts.write();
		for part in parts {
			map.insert(part.project_part_id.clone(), part.clone());
		}
	}

	/// Remove project parts by identifier.
	pub fn unregister(&self, ids: &[String]) {
		let mut map = self.parts.write();
		for id in ids {
			map.remove(id);
		}
	}

	/// Snapshot for replay: the fallback first, then all registered parts.
	pub fn snapshot(&self) -> Vec<ProjectPartContainer> {
		let map = self.parts.read();
		let mut parts = Vec::with_capacity(map.len() + 1);
		parts.push(self.fallback.clone());
		parts.extend(map.values().cloned());
		parts
	}

	/// Number of registered parts, excluding the fallback.
	pub fn len(&self) -> usize {
		self.parts.read().len()
	}

	/// Whether no part besides the fallback is registered.
	pub fn is_empty(&self) -> bool {
		self.parts.read().is_empty()
	}
}

impl Default for ProjectPartRegistry {
	fn default() -> Self {
		Self::new(ProjectPartContainer::new("fallback", Vec::<String>::new()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_unit_lifecycle() {
		let registry = TranslationUnitRegistry::new();
		let file = FileContainer::new("/src/a.cpp", "part");

		registry.register(std::slice::from_ref(&file));
		assert!(registry.contains(Path::new("/src/a.cpp")));
		assert_eq!(registry.len(), 1);

		registry.unregister(&[file]);
		assert!(registry.is_empty());
	}

	#[test]
	fn test_unsaved_overlay_folds_into_registered_unit() {
		let registry = TranslationUnitRegistry::new();
		registry.register(&[FileContainer::new("/src/a.cpp", "part")]);

		let overlay = FileContainer::new("/src/a.cpp", "part").with_unsaved_content("int x;", 2);
		registry.register_unsaved(std::slice::from_ref(&overlay));

		let snapshot = registry.snapshot();
		assert_eq!(snapshot.len(), 1);
		assert_eq!(snapshot[0].unsaved_content.as_deref(), Some("int x;"));
		assert_eq!(snapshot[0].document_revision, 2);
		assert!(registry.snapshot_unsaved().is_empty());

		registry.unregister_unsaved(&[overlay]);
		assert!(registry.snapshot()[0].unsaved_content.is_none());
	}

	#[test]
	fn test_unsaved_overlay_for_header_kept_separately() {
		let registry = TranslationUnitRegistry::new();
		let overlay = FileContainer::new("/src/a.h", "part").with_unsaved_content("#pragma once", 1);

		registry.register_unsaved(std::slice::from_ref(&overlay));
		assert!(registry.snapshot().is_empty());
		assert_eq!(registry.snapshot_unsaved(), vec![overlay.clone()]);

		registry.unregister_unsaved(&[overlay]);
		assert!(registry.snapshot_unsaved().is_empty());
	}

	#[test]
	fn test_part_snapshot_leads_with_fallback() {
		let registry = ProjectPartRegistry::default();
		registry.register(&[ProjectPartContainer::new("lib", ["-std=c++20"])]);

		let snapshot = registry.snapshot();
		assert_eq!(snapshot[0].project_part_id, "fallback");
		assert_eq!(snapshot.len(), 2);

		registry.unregister(&["lib".to_string()]);
		assert_eq!(registry.snapshot().len(), 1);
		assert!(registry.is_empty());
	}

	#[test]
	fn test_visibility_roundtrip() {
		let registry = TranslationUnitRegistry::new();
		registry.set_visibility(
			Some(PathBuf::from("/src/a.cpp")),
			vec![PathBuf::from("/src/a.cpp"), PathBuf::from("/src/b.cpp")],
		);

		let (current, visible) = registry.visibility();
		assert_eq!(current, Some(PathBuf::from("/src/a.cpp")));
		assert_eq!(visible.len(), 2);
	}
}
