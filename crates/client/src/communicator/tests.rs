use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use codemodel_proto::{
	BackendMessage, CodeCompletion, CompletionKind, EditorMessage, FileContainer,
	ProjectPartContainer, Ticket,
};

use super::{Communicator, CommunicatorState};
use crate::config::BackendConfig;
use crate::connection::{BackendTransport, ConnectionState, TransportEvent, TransportStatus};
use crate::registry::{ProjectPartRegistry, TranslationUnitRegistry};
use crate::{Error, Result};

/// Scripted transport: records outbound messages and lets the test inject
/// inbound messages and status changes.
struct MockTransport {
	sent: Mutex<Vec<EditorMessage>>,
	event_tx: mpsc::UnboundedSender<TransportEvent>,
	event_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
	starts: AtomicUsize,
	stops: AtomicUsize,
}

impl MockTransport {
	fn new() -> Arc<Self> {
		let (event_tx, event_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			sent: Mutex::new(Vec::new()),
			event_tx,
			event_rx: Mutex::new(Some(event_rx)),
			starts: AtomicUsize::new(0),
			stops: AtomicUsize::new(0),
		})
	}

	fn alive(&self) {
		let _ = self.event_tx.send(TransportEvent::Message(BackendMessage::Alive));
	}

	fn message(&self, msg: BackendMessage) {
		let _ = self.event_tx.send(TransportEvent::Message(msg));
	}

	fn crash(&self) {
		let _ = self
			.event_tx
			.send(TransportEvent::Status(TransportStatus::Crashed));
	}

	fn take_sent(&self) -> Vec<EditorMessage> {
		std::mem::take(&mut *self.sent.lock())
	}

	fn starts(&self) -> usize {
		self.starts.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl BackendTransport for MockTransport {
	fn events(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
		self.event_rx.lock().take().expect("events() taken twice")
	}

	async fn start(&self, _config: &BackendConfig) -> Result<()> {
		self.starts.fetch_add(1, Ordering::Relaxed);
		let _ = self
			.event_tx
			.send(TransportEvent::Status(TransportStatus::Starting));
		let _ = self
			.event_tx
			.send(TransportEvent::Status(TransportStatus::Running));
		Ok(())
	}

	fn send(&self, msg: EditorMessage) -> Result<()> {
		self.sent.lock().push(msg);
		Ok(())
	}

	async fn stop(&self) {
		self.stops.fetch_add(1, Ordering::Relaxed);
		let _ = self
			.event_tx
			.send(TransportEvent::Status(TransportStatus::Stopped));
	}
}

fn test_config() -> BackendConfig {
	BackendConfig::new("codemodelbackend-test").start_timeout(Duration::from_secs(5))
}

fn communicator(config: BackendConfig) -> (Arc<MockTransport>, Communicator) {
	let mock = MockTransport::new();
	let comm = Communicator::new(
		mock.clone(),
		config,
		Arc::new(TranslationUnitRegistry::new()),
		Arc::new(ProjectPartRegistry::default()),
	);
	(mock, comm)
}

/// Queue the alive confirmation, then start and wait for Ready.
async fn start_ready(mock: &MockTransport, comm: &Communicator) {
	mock.alive();
	comm.start().await.unwrap();
	assert_eq!(comm.state(), CommunicatorState::Ready);
	assert_eq!(comm.connection_state(), ConnectionState::Connected);
}

/// Barrier: a throwaway completion round-trip through a fresh session proves
/// every earlier injected event was dispatched, since events are handled in
/// order.
async fn settle(mock: &MockTransport, comm: &Communicator) {
	let mut session = comm.create_session();
	let ticket = comm
		.complete_code(&session, "/sync.cpp", 1, 1, "/proj")
		.unwrap();
	mock.message(BackendMessage::CodeCompleted {
		ticket,
		completions: Vec::new(),
	});
	session.next_results().await.unwrap();
}

/// Drive a crashed communicator back to Ready and wait for the replay.
async fn recover(mock: &MockTransport, comm: &Communicator, reinit_at_least: u64) {
	mock.alive();
	let mut rx = comm.subscribe_reinitialized();
	rx.wait_for(|n| *n >= reinit_at_least).await.unwrap();
}

#[tokio::test]
async fn test_start_replays_prior_registrations() {
	let (mock, comm) = communicator(test_config());

	// Registered before the backend exists; must be replayed on first start.
	comm.register_translation_units(vec![FileContainer::new("/src/a.cpp", "fallback")]);
	start_ready(&mock, &comm).await;

	let sent = mock.take_sent();
	assert!(
		matches!(&sent[0], EditorMessage::RegisterProjectParts { parts } if parts[0].project_part_id == "fallback"),
		"project parts must be registered first, got {sent:?}"
	);
	assert!(sent.iter().any(|m| matches!(
		m,
		EditorMessage::RegisterTranslationUnits { files } if files.len() == 1
	)));

	// Starting twice is a no-op.
	comm.start().await.unwrap();
	assert_eq!(mock.starts(), 1);
}

#[tokio::test]
async fn test_concurrent_start_launches_backend_once() {
	let (mock, comm) = communicator(test_config());
	mock.alive();

	let comm = Arc::new(comm);
	let first = tokio::spawn({
		let comm = comm.clone();
		async move { comm.start().await }
	});
	let second = tokio::spawn({
		let comm = comm.clone();
		async move { comm.start().await }
	});
	first.await.unwrap().unwrap();
	second.await.unwrap().unwrap();

	assert_eq!(mock.starts(), 1);
	assert_eq!(comm.state(), CommunicatorState::Ready);
}

#[tokio::test]
async fn test_duplicate_alive_does_not_replay() {
	let (mock, comm) = communicator(test_config());
	comm.register_translation_units(vec![FileContainer::new("/src/a.cpp", "fallback")]);
	start_ready(&mock, &comm).await;
	mock.take_sent();

	mock.alive();
	settle(&mock, &comm).await;

	let sent = mock.take_sent();
	assert!(
		!sent.iter().any(|m| matches!(
			m,
			EditorMessage::RegisterProjectParts { .. }
				| EditorMessage::RegisterTranslationUnits { .. }
		)),
		"already-known state must not be re-registered, got {sent:?}"
	);
	assert_eq!(*comm.subscribe_reinitialized().borrow(), 1);
	assert_eq!(comm.state(), CommunicatorState::Ready);
}

#[tokio::test]
async fn test_tickets_are_unique_and_monotonic() {
	let (mock, comm) = communicator(test_config());
	start_ready(&mock, &comm).await;

	let s1 = comm.create_session();
	let s2 = comm.create_session();
	assert_ne!(s1.id(), s2.id());

	let t1 = comm.complete_code(&s1, "/src/a.cpp", 1, 1, "/proj").unwrap();
	let t2 = comm.complete_code(&s2, "/src/a.cpp", 2, 1, "/proj").unwrap();
	let t3 = comm.complete_code(&s1, "/src/b.cpp", 3, 7, "/proj").unwrap();
	assert_eq!(t1, Ticket(1));
	assert_eq!(t2, Ticket(2));
	assert_eq!(t3, Ticket(3));

	let tickets: Vec<Ticket> = mock
		.take_sent()
		.into_iter()
		.filter_map(|m| match m {
			EditorMessage::CompleteCode { ticket, .. } => Some(ticket),
			_ => None,
		})
		.collect();
	assert_eq!(tickets, vec![t1, t2, t3]);
}

#[tokio::test]
async fn test_completion_results_delivered_to_session() {
	let (mock, comm) = communicator(test_config());
	start_ready(&mock, &comm).await;

	let mut session = comm.create_session();
	let ticket = comm.complete_code(&session, "/src/a.cpp", 4, 9, "/proj").unwrap();
	assert!(!comm.is_not_waiting_for_completion());

	mock.message(BackendMessage::CodeCompleted {
		ticket,
		completions: vec![CodeCompletion::new("memcpy", CompletionKind::Function)],
	});

	let results = session.next_results().await.unwrap();
	assert_eq!(results.ticket, ticket);
	assert_eq!(results.completions[0].text, "memcpy");
	assert!(comm.is_not_waiting_for_completion());
}

#[tokio::test]
async fn test_cancelled_session_results_are_dropped() {
	let (mock, comm) = communicator(test_config());
	start_ready(&mock, &comm).await;

	let mut session = comm.create_session();
	let t1 = comm.complete_code(&session, "/src/a.cpp", 1, 1, "/proj").unwrap();
	let t2 = comm.complete_code(&session, "/src/a.cpp", 1, 2, "/proj").unwrap();

	// t2 already superseded t1; cancelling removes the one live entry.
	assert_eq!(comm.cancel_session(session.id()), 1);
	assert!(comm.is_not_waiting_for_completion());

	// Late responses for cancelled tickets are discarded on arrival.
	mock.message(BackendMessage::CodeCompleted {
		ticket: t1,
		completions: vec![CodeCompletion::new("stale", CompletionKind::Variable)],
	});
	mock.message(BackendMessage::CodeCompleted {
		ticket: t2,
		completions: vec![CodeCompletion::new("stale", CompletionKind::Variable)],
	});
	settle(&mock, &comm).await;

	assert!(session.try_results().is_none());
}

#[tokio::test]
async fn test_same_session_rerequest_supersedes_pending() {
	let (mock, comm) = communicator(test_config());
	start_ready(&mock, &comm).await;

	// The user keeps typing within one interaction: the second request
	// replaces the first without any explicit cancellation.
	let mut session = comm.create_session();
	let t1 = comm.complete_code(&session, "/src/a.cpp", 10, 4, "/proj").unwrap();
	let t2 = comm.complete_code(&session, "/src/a.cpp", 10, 5, "/proj").unwrap();

	mock.message(BackendMessage::CodeCompleted {
		ticket: t1,
		completions: vec![CodeCompletion::new("outdated", CompletionKind::Keyword)],
	});
	mock.message(BackendMessage::CodeCompleted {
		ticket: t2,
		completions: vec![CodeCompletion::new("current", CompletionKind::Keyword)],
	});

	let results = session.next_results().await.unwrap();
	assert_eq!(results.ticket, t2);
	assert_eq!(results.completions[0].text, "current");
	assert!(session.try_results().is_none());
	assert!(comm.is_not_waiting_for_completion());
}

#[tokio::test]
async fn test_new_session_after_cancel_gets_only_its_results() {
	let (mock, comm) = communicator(test_config());
	start_ready(&mock, &comm).await;

	// The completion widget is closed and reopened: the old interaction is
	// cancelled and a fresh session requests before the old response arrives.
	let mut old = comm.create_session();
	let old_ticket = comm.complete_code(&old, "/src/a.cpp", 10, 4, "/proj").unwrap();
	comm.cancel_session(old.id());

	let mut new = comm.create_session();
	let new_ticket = comm.complete_code(&new, "/src/a.cpp", 10, 5, "/proj").unwrap();

	mock.message(BackendMessage::CodeCompleted {
		ticket: old_ticket,
		completions: vec![CodeCompletion::new("outdated", CompletionKind::Keyword)],
	});
	mock.message(BackendMessage::CodeCompleted {
		ticket: new_ticket,
		completions: vec![CodeCompletion::new("current", CompletionKind::Keyword)],
	});

	let results = new.next_results().await.unwrap();
	assert_eq!(results.ticket, new_ticket);
	assert_eq!(results.completions[0].text, "current");
	assert!(old.try_results().is_none());
}

#[tokio::test]
async fn test_crash_restarts_and_replays_full_state() {
	let (mock, comm) = communicator(test_config());
	start_ready(&mock, &comm).await;

	comm.register_project_parts(vec![ProjectPartContainer::new("lib", ["-std=c++20"])]);
	comm.register_translation_units(vec![
		FileContainer::new("/src/a.cpp", "lib"),
		FileContainer::new("/src/b.cpp", "lib"),
		FileContainer::new("/src/c.cpp", "lib"),
	]);
	comm.register_unsaved_files(vec![
		FileContainer::new("/src/util.h", "lib").with_unsaved_content("#pragma once", 1),
	]);
	comm.update_translation_unit_visibility(
		Some("/src/a.cpp".into()),
		vec!["/src/a.cpp".into(), "/src/b.cpp".into()],
	);
	let session = comm.create_session();
	comm.complete_code(&session, "/src/a.cpp", 1, 1, "/proj").unwrap();
	mock.take_sent();

	mock.crash();
	recover(&mock, &comm, 2).await;
	assert_eq!(comm.state(), CommunicatorState::Ready);
	assert_eq!(mock.starts(), 2);

	// The crash abandoned the in-flight request; no ghost pending entries.
	assert!(comm.is_not_waiting_for_completion());

	let sent = mock.take_sent();
	match &sent[0] {
		EditorMessage::RegisterProjectParts { parts } => {
			assert_eq!(parts[0].project_part_id, "fallback");
			assert!(parts.iter().any(|p| p.project_part_id == "lib"));
		}
		other => panic!("expected project parts first, got {other:?}"),
	}

	let unit_batches: Vec<&Vec<FileContainer>> = sent
		.iter()
		.filter_map(|m| match m {
			EditorMessage::RegisterTranslationUnits { files } => Some(files),
			_ => None,
		})
		.collect();
	assert_eq!(unit_batches.len(), 1, "each unit is re-registered exactly once");
	assert_eq!(unit_batches[0].len(), 3);

	assert!(sent.iter().any(|m| matches!(
		m,
		EditorMessage::RegisterUnsavedFiles { files }
			if files.len() == 1 && files[0].has_unsaved_content()
	)));
	assert!(sent.iter().any(|m| matches!(
		m,
		EditorMessage::UpdateVisibleTranslationUnits { current_file, .. }
			if current_file.as_deref() == Some(std::path::Path::new("/src/a.cpp"))
	)));
}

#[tokio::test]
async fn test_restart_storm_gives_up() {
	let (mock, comm) = communicator(test_config().restart_policy(2, Duration::from_secs(60)));
	start_ready(&mock, &comm).await;

	mock.crash();
	recover(&mock, &comm, 2).await;
	mock.crash();
	recover(&mock, &comm, 3).await;
	assert_eq!(mock.starts(), 3);

	// Third crash inside the window exceeds the budget.
	mock.crash();
	let mut state = comm.subscribe_state();
	state
		.wait_for(|s| *s == CommunicatorState::Failed)
		.await
		.unwrap();

	assert_eq!(mock.starts(), 3, "no further restart attempted");
	let session = comm.create_session();
	let err = comm
		.complete_code(&session, "/src/a.cpp", 1, 1, "/proj")
		.unwrap_err();
	assert!(matches!(err, Error::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_start_timeout_is_terminal() {
	let (mock, comm) = communicator(test_config());

	// No Alive ever arrives; the deadline fires and the failure is terminal.
	let err = comm.start().await.unwrap_err();
	assert!(matches!(err, Error::StartTimeout(_)), "got {err:?}");
	assert_eq!(comm.state(), CommunicatorState::Failed);
	assert_eq!(comm.connection_state(), ConnectionState::Disconnected);
	assert_eq!(mock.starts(), 1, "no automatic retry");

	let session = comm.create_session();
	assert!(matches!(
		comm.complete_code(&session, "/src/a.cpp", 1, 1, "/proj"),
		Err(Error::NotConnected)
	));
}

#[tokio::test]
async fn test_requests_dropped_while_not_ready() {
	let (_mock, comm) = communicator(test_config());

	let session = comm.create_session();
	assert!(matches!(
		comm.complete_code(&session, "/src/a.cpp", 1, 1, "/proj"),
		Err(Error::NotConnected)
	));
	assert!(matches!(
		comm.request_document_annotations("/src/a.cpp"),
		Err(Error::NotConnected)
	));
}

#[tokio::test]
async fn test_annotations_forwarded_to_event_stream() {
	let (mock, comm) = communicator(test_config());
	let mut annotations = comm.annotation_events();
	start_ready(&mock, &comm).await;

	mock.message(BackendMessage::DocumentAnnotationsChanged {
		file_path: "/src/a.cpp".into(),
		annotations: Vec::new(),
	});

	let event = annotations.recv().await.unwrap();
	assert_eq!(event.file_path, std::path::PathBuf::from("/src/a.cpp"));
}

#[tokio::test]
async fn test_shutdown_is_deliberate_and_idempotent() {
	let (mock, comm) = communicator(test_config());
	start_ready(&mock, &comm).await;
	mock.take_sent();

	comm.shutdown().await;
	assert_eq!(comm.state(), CommunicatorState::Terminated);
	assert_eq!(comm.connection_state(), ConnectionState::Disconnected);

	let sent = mock.take_sent();
	assert!(sent.iter().any(|m| matches!(m, EditorMessage::End)));
	assert_eq!(mock.starts(), 1, "a deliberate exit is not a crash");
	assert_eq!(mock.stops.load(Ordering::Relaxed), 1);

	comm.shutdown().await;
	assert_eq!(comm.state(), CommunicatorState::Terminated);
}
