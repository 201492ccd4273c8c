//! The orchestrator owning connection, receiver, sender and tracker.
//!
//! The communicator drives the backend lifecycle state machine:
//!
//! ```text
//! Uninitialized → Initializing → Ready → (Crashed → Initializing)* → ShuttingDown → Terminated
//! ```
//!
//! with `Failed` as the terminal state for start timeouts, spawn failures and
//! restart storms. After every (re)start it waits for the backend's `Alive`
//! message, then replays the full registered state — fallback project part
//! first, then all project parts, all translation units with their latest
//! known content, unsaved overlays and visibility — because a fresh backend
//! instance has no memory of prior registrations.
//!
//! All public operations are fire-and-forget: registrations always mutate the
//! injected registries (so the next replay picks them up) and are only sent
//! immediately while Ready; completion and annotation requests are dropped
//! with [`Error::NotConnected`] when the backend is not Ready.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use codemodel_proto::{FileContainer, ProjectPartContainer, Ticket};

use crate::config::BackendConfig;
use crate::connection::{BackendTransport, ConnectionState, TransportEvent, TransportStatus};
use crate::receiver::{BackendReceiver, Dispatched};
use crate::registry::{ProjectPartRegistry, TranslationUnitRegistry};
use crate::sender::BackendSender;
use crate::session::{AssistSession, SessionId};
use crate::tracker::{PendingCompletion, RequestTracker};
use crate::{Error, Result};

pub use crate::receiver::AnnotationsEvent;

/// Lifecycle state of the communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicatorState {
	/// Constructed, backend never started.
	Uninitialized,
	/// Backend launched, waiting for its `Alive` message.
	Initializing,
	/// Backend responsive; normal operation.
	Ready,
	/// Backend exited unexpectedly; a restart is underway.
	Crashed,
	/// Deliberate shutdown in progress.
	ShuttingDown,
	/// Deliberate shutdown finished.
	Terminated,
	/// Terminal failure: start timeout, spawn failure or restart storm.
	/// No automatic recovery is attempted.
	Failed,
}

impl std::fmt::Display for CommunicatorState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Self::Uninitialized => "uninitialized",
			Self::Initializing => "initializing",
			Self::Ready => "ready",
			Self::Crashed => "crashed",
			Self::ShuttingDown => "shutting-down",
			Self::Terminated => "terminated",
			Self::Failed => "failed",
		};
		f.write_str(s)
	}
}

/// High-level interface the editor integration talks to.
///
/// Constructed with explicit references to the translation-unit and
/// project-part registries; there is no global accessor.
pub struct Communicator {
	transport: Arc<dyn BackendTransport>,
	config: BackendConfig,
	units: Arc<TranslationUnitRegistry>,
	parts: Arc<ProjectPartRegistry>,
	tracker: Arc<Mutex<RequestTracker>>,
	sender: BackendSender,
	state_tx: watch::Sender<CommunicatorState>,
	conn_state_tx: watch::Sender<ConnectionState>,
	reinit_tx: watch::Sender<u64>,
	last_failure: Arc<Mutex<Option<Error>>>,
	next_ticket: AtomicU64,
	next_session: AtomicU64,
	annotations_rx: Mutex<Option<mpsc::UnboundedReceiver<AnnotationsEvent>>>,
	annotations_tx: mpsc::UnboundedSender<AnnotationsEvent>,
	event_task: Mutex<Option<JoinHandle<()>>>,
}

impl Communicator {
	/// Create a communicator over the given transport and registries.
	///
	/// Nothing is launched until [`start`](Self::start).
	pub fn new(
		transport: Arc<dyn BackendTransport>,
		config: BackendConfig,
		units: Arc<TranslationUnitRegistry>,
		parts: Arc<ProjectPartRegistry>,
	) -> Self {
		let (state_tx, _) = watch::channel(CommunicatorState::Uninitialized);
		let (conn_state_tx, _) = watch::channel(ConnectionState::Disconnected);
		let (reinit_tx, _) = watch::channel(0);
		let (annotations_tx, annotations_rx) = mpsc::unbounded_channel();
		let sender = BackendSender::new(transport.clone(), conn_state_tx.subscribe());

		Self {
			transport,
			config,
			units,
			parts,
			tracker: Arc::new(Mutex::new(RequestTracker::new())),
			sender,
			state_tx,
			conn_state_tx,
			reinit_tx,
			last_failure: Arc::new(Mutex::new(None)),
			next_ticket: AtomicU64::new(0),
			next_session: AtomicU64::new(0),
			annotations_rx: Mutex::new(Some(annotations_rx)),
			annotations_tx,
			event_task: Mutex::new(None),
		}
	}

	/// Launch the backend and wait until it is Ready.
	///
	/// On a start timeout the error is logged, the state settles in
	/// [`CommunicatorState::Failed`] and no automatic retry happens; the
	/// caller may construct a new communicator to try again. Calling `start`
	/// while already started is a logged no-op.
	pub async fn start(&self) -> Result<()> {
		// Claim the Uninitialized -> Initializing edge under the watch
		// channel's lock so racing start calls cannot both spawn a loop.
		let mut claimed = false;
		self.state_tx.send_if_modified(|state| {
			if *state == CommunicatorState::Uninitialized {
				*state = CommunicatorState::Initializing;
				claimed = true;
				true
			} else {
				false
			}
		});
		if !claimed {
			warn!("communicator already started; ignoring");
			return Ok(());
		}

		let event_loop = EventLoop {
			transport: self.transport.clone(),
			config: self.config.clone(),
			units: self.units.clone(),
			tracker: self.tracker.clone(),
			parts: self.parts.clone(),
			sender: self.sender.clone(),
			receiver: BackendReceiver::new(self.tracker.clone(), self.annotations_tx.clone()),
			events: self.transport.events(),
			state_tx: self.state_tx.clone(),
			conn_state_tx: self.conn_state_tx.clone(),
			reinit_tx: self.reinit_tx.clone(),
			last_failure: self.last_failure.clone(),
			alive_deadline: None,
			crashes: VecDeque::new(),
		};
		*self.event_task.lock() = Some(tokio::spawn(event_loop.run()));

		self.wait_ready().await
	}

	/// Wait for the communicator to reach Ready.
	///
	/// Keeps waiting across crash/restart cycles; returns the recorded
	/// failure once the state is terminal.
	pub async fn wait_ready(&self) -> Result<()> {
		let mut rx = self.state_tx.subscribe();
		loop {
			let state = *rx.borrow_and_update();
			match state {
				CommunicatorState::Ready => return Ok(()),
				CommunicatorState::Failed
				| CommunicatorState::ShuttingDown
				| CommunicatorState::Terminated => return Err(self.take_failure()),
				_ => {
					if rx.changed().await.is_err() {
						return Err(Error::ChannelClosed);
					}
				}
			}
		}
	}

	fn take_failure(&self) -> Error {
		self.last_failure.lock().take().unwrap_or(Error::NotConnected)
	}

	/// Current lifecycle state.
	pub fn state(&self) -> CommunicatorState {
		*self.state_tx.borrow()
	}

	/// Subscribe to lifecycle state changes.
	pub fn subscribe_state(&self) -> watch::Receiver<CommunicatorState> {
		self.state_tx.subscribe()
	}

	/// Current connection state.
	pub fn connection_state(&self) -> ConnectionState {
		*self.conn_state_tx.borrow()
	}

	/// Whether the backend is Ready for requests.
	pub fn is_ready(&self) -> bool {
		self.state() == CommunicatorState::Ready
	}

	/// Open a new assist session for one completion interaction.
	pub fn create_session(&self) -> AssistSession {
		let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed) + 1);
		AssistSession::new(id)
	}

	/// Drop all pending completions belonging to a session being torn down.
	///
	/// Responses arriving later for these tickets are discarded on arrival.
	/// Returns how many pending entries were removed.
	pub fn cancel_session(&self, session: SessionId) -> usize {
		self.tracker.lock().cancel_session(session)
	}

	/// True iff no completion request is outstanding.
	///
	/// Exposed for test synchronization and diagnostics.
	pub fn is_not_waiting_for_completion(&self) -> bool {
		self.tracker.lock().is_empty()
	}

	/// Take the annotations event stream.
	///
	/// # Panics
	///
	/// Panics when called a second time; there is exactly one consumer.
	pub fn annotation_events(&self) -> mpsc::UnboundedReceiver<AnnotationsEvent> {
		self.annotations_rx
			.lock()
			.take()
			.expect("annotation_events() can only be called once")
	}

	/// Subscribe to backend (re)initializations.
	///
	/// The value increments once per completed state replay, including the
	/// initial one.
	pub fn subscribe_reinitialized(&self) -> watch::Receiver<u64> {
		self.reinit_tx.subscribe()
	}

	/// Register translation units the backend should track.
	///
	/// Always recorded in the registry; sent immediately only while Ready,
	/// otherwise picked up by the next replay.
	pub fn register_translation_units(&self, files: Vec<FileContainer>) {
		self.units.register(&files);
		self.send_if_ready(|s| s.register_translation_units(files));
	}

	/// Refresh the content snapshots of registered translation units.
	pub fn update_translation_units(&self, files: Vec<FileContainer>) {
		self.units.update(&files);
		self.send_if_ready(|s| s.update_translation_units(files));
	}

	/// Stop tracking translation units.
	pub fn unregister_translation_units(&self, files: Vec<FileContainer>) {
		self.units.unregister(&files);
		self.send_if_ready(|s| s.unregister_translation_units(files));
	}

	/// Register project part configurations.
	pub fn register_project_parts(&self, parts: Vec<ProjectPartContainer>) {
		self.parts.register(&parts);
		self.send_if_ready(|s| s.register_project_parts(parts));
	}

	/// Remove project part configurations.
	pub fn unregister_project_parts(&self, ids: Vec<String>) {
		self.parts.unregister(&ids);
		self.send_if_ready(|s| s.unregister_project_parts(ids));
	}

	/// Register content overlays for dirty, unsaved editor buffers.
	///
	/// The backend must see unsaved content, not disk content.
	pub fn register_unsaved_files(&self, files: Vec<FileContainer>) {
		self.units.register_unsaved(&files);
		self.send_if_ready(|s| s.register_unsaved_files(files));
	}

	/// Remove unsaved-buffer overlays.
	pub fn unregister_unsaved_files(&self, files: Vec<FileContainer>) {
		self.units.unregister_unsaved(&files);
		self.send_if_ready(|s| s.unregister_unsaved_files(files));
	}

	/// Tell the backend which files are foreground vs. background.
	///
	/// A scheduling hint for the backend's re-analysis work, not a hard
	/// guarantee.
	pub fn update_translation_unit_visibility(
		&self,
		current_file: Option<PathBuf>,
		visible_files: Vec<PathBuf>,
	) {
		self.units
			.set_visibility(current_file.clone(), visible_files.clone());
		self.send_if_ready(|s| s.update_visible_translation_units(current_file, visible_files));
	}

	/// Request code completion at a cursor position.
	///
	/// Allocates a fresh ticket, records the pending completion and sends the
	/// request. Results are delivered on the session's channel. A new request
	/// from the same session supersedes any still-pending one: the older
	/// ticket's response is discarded on arrival. While not Ready the request
	/// is dropped with [`Error::NotConnected`] — completion requests are
	/// never queued.
	pub fn complete_code(
		&self,
		session: &AssistSession,
		file_path: impl Into<PathBuf>,
		line: u32,
		column: u32,
		project_file_path: impl Into<PathBuf>,
	) -> Result<Ticket> {
		if !self.is_ready() {
			debug!("backend not ready; dropping completion request");
			return Err(Error::NotConnected);
		}

		let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1);
		let file_path = file_path.into();
		self.tracker.lock().add_pending(PendingCompletion {
			ticket,
			session: session.session_ref(),
			file_path: file_path.clone(),
			line,
			column,
		});

		trace!(%ticket, session = %session.id(), file = %file_path.display(), line, column, "requesting completion");
		if let Err(e) = self
			.sender
			.complete_code(ticket, file_path, line, column, project_file_path.into())
		{
			self.tracker.lock().resolve(ticket);
			return Err(e);
		}
		Ok(ticket)
	}

	/// Request fresh annotations for a document.
	pub fn request_document_annotations(&self, file_path: impl Into<PathBuf>) -> Result<()> {
		if !self.is_ready() {
			debug!("backend not ready; dropping annotation request");
			return Err(Error::NotConnected);
		}
		self.sender.request_document_annotations(file_path.into())
	}

	/// Diagnostic round-trip; the reply is logged by the receiver.
	pub fn echo(&self, payload: impl Into<String>) -> Result<()> {
		self.sender.echo(payload)
	}

	/// Shut down deliberately.
	///
	/// In-flight completion requests are abandoned without waiting for their
	/// responses. Idempotent.
	pub async fn shutdown(&self) {
		{
			let state = *self.state_tx.borrow();
			if matches!(
				state,
				CommunicatorState::ShuttingDown | CommunicatorState::Terminated
			) {
				return;
			}
		}

		info!("shutting down backend");
		set_state(&self.state_tx, CommunicatorState::ShuttingDown);
		self.tracker.lock().clear();
		let _ = self.sender.end();
		self.transport.stop().await;

		let handle = self.event_task.lock().take();
		if let Some(handle) = handle {
			let _ = handle.await;
		}

		if *self.state_tx.borrow() != CommunicatorState::Terminated {
			set_state(&self.state_tx, CommunicatorState::Terminated);
		}
		let _ = self.conn_state_tx.send(ConnectionState::Disconnected);
	}

	/// Record in the registry and send only while Ready; otherwise the next
	/// replay covers it.
	fn send_if_ready(&self, send: impl FnOnce(&BackendSender) -> Result<()>) {
		if !self.is_ready() {
			debug!("backend not ready; registration deferred to replay");
			return;
		}
		if let Err(e) = send(&self.sender) {
			warn!(error = %e, "send failed; state will be replayed on reconnect");
		}
	}
}

impl std::fmt::Debug for Communicator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Communicator")
			.field("state", &self.state())
			.field("connection_state", &self.connection_state())
			.field("pending", &self.tracker.lock().len())
			.finish_non_exhaustive()
	}
}

fn set_state(state_tx: &watch::Sender<CommunicatorState>, next: CommunicatorState) {
	let prev = state_tx.send_replace(next);
	if prev != next {
		info!(from = %prev, to = %next, "communicator state");
	}
}

fn set_conn_state(conn_state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
	let prev = conn_state_tx.send_replace(next);
	if prev != next {
		debug!(from = %prev, to = %next, "connection state");
	}
}

/// Task driving the communicator: dispatches transport events, enforces the
/// start timeout and performs crash recovery.
struct EventLoop {
	transport: Arc<dyn BackendTransport>,
	config: BackendConfig,
	units: Arc<TranslationUnitRegistry>,
	parts: Arc<ProjectPartRegistry>,
	tracker: Arc<Mutex<RequestTracker>>,
	sender: BackendSender,
	receiver: BackendReceiver,
	events: mpsc::UnboundedReceiver<TransportEvent>,
	state_tx: watch::Sender<CommunicatorState>,
	conn_state_tx: watch::Sender<ConnectionState>,
	reinit_tx: watch::Sender<u64>,
	last_failure: Arc<Mutex<Option<Error>>>,
	/// Deadline for the backend's first `Alive` after a (re)start.
	alive_deadline: Option<Instant>,
	/// Recent unexpected-exit timestamps, pruned to the restart window.
	crashes: VecDeque<Instant>,
}

impl EventLoop {
	async fn run(mut self) {
		if let Err(e) = self.connect().await {
			error!(error = %e, "backend start failed");
			self.fail(e);
			return;
		}

		loop {
			// The dummy deadline is never polled; the branch is disabled
			// whenever alive_deadline is unset.
			let deadline = self
				.alive_deadline
				.unwrap_or_else(|| Instant::now() + self.config.start_timeout);

			tokio::select! {
				ev = self.events.recv() => match ev {
					None => {
						set_conn_state(&self.conn_state_tx, ConnectionState::Disconnected);
						set_state(&self.state_tx, CommunicatorState::Terminated);
						break;
					}
					Some(TransportEvent::Message(msg)) => {
						if self.receiver.dispatch(msg) == Dispatched::Alive {
							self.on_alive();
						}
					}
					Some(TransportEvent::Status(status)) => {
						if !self.on_status(status).await {
							break;
						}
					}
				},

				_ = tokio::time::sleep_until(deadline), if self.alive_deadline.is_some() => {
					self.alive_deadline = None;
					let err = Error::StartTimeout(self.config.start_timeout);
					error!(error = %err, "backend failed to report alive; giving up");
					self.fail(err);
					break;
				}
			}
		}
	}

	/// Launch the backend and arm the alive deadline.
	async fn connect(&mut self) -> Result<()> {
		set_state(&self.state_tx, CommunicatorState::Initializing);
		set_conn_state(&self.conn_state_tx, ConnectionState::Connecting);
		self.transport.start(&self.config).await?;
		self.alive_deadline = Some(Instant::now() + self.config.start_timeout);
		Ok(())
	}

	/// The backend confirmed it is responsive: replay state and go Ready.
	///
	/// A repeated `Alive` while already Ready carries no new information and
	/// must not re-register state the backend already holds.
	fn on_alive(&mut self) {
		self.alive_deadline = None;
		if *self.state_tx.borrow() == CommunicatorState::Ready {
			debug!("backend reported alive while already ready; nothing to replay");
			return;
		}
		set_conn_state(&self.conn_state_tx, ConnectionState::Connected);
		self.replay();
		set_state(&self.state_tx, CommunicatorState::Ready);
		self.reinit_tx.send_modify(|n| *n += 1);
		info!("backend ready");
	}

	/// Re-register everything the fresh backend instance needs to know.
	fn replay(&self) {
		let parts = self.parts.snapshot();
		let units = self.units.snapshot();
		let unsaved = self.units.snapshot_unsaved();
		let (current, visible) = self.units.visibility();
		info!(
			parts = parts.len(),
			units = units.len(),
			unsaved = unsaved.len(),
			"replaying registered state"
		);

		let result: Result<()> = (|| {
			// The fallback part leads the snapshot.
			self.sender.register_project_parts(parts)?;
			if !units.is_empty() {
				self.sender.register_translation_units(units)?;
			}
			if !unsaved.is_empty() {
				self.sender.register_unsaved_files(unsaved)?;
			}
			if current.is_some() || !visible.is_empty() {
				self.sender
					.update_visible_translation_units(current, visible)?;
			}
			Ok(())
		})();
		if let Err(e) = result {
			warn!(error = %e, "state replay failed");
		}
	}

	/// Returns `false` when the loop must terminate.
	async fn on_status(&mut self, status: TransportStatus) -> bool {
		match status {
			TransportStatus::Starting => {
				trace!("backend process starting");
				true
			}
			TransportStatus::Running => {
				debug!("backend process running");
				true
			}
			TransportStatus::Stopped | TransportStatus::Crashed => {
				if *self.state_tx.borrow() == CommunicatorState::ShuttingDown {
					info!("backend exited after shutdown request");
					set_conn_state(&self.conn_state_tx, ConnectionState::Disconnected);
					set_state(&self.state_tx, CommunicatorState::Terminated);
					false
				} else {
					self.handle_crash().await
				}
			}
		}
	}

	/// Unexpected exit: abandon pending requests, then restart and replay
	/// unless the restart budget for the window is exhausted.
	async fn handle_crash(&mut self) -> bool {
		warn!("backend exited unexpectedly");
		self.alive_deadline = None;
		set_conn_state(&self.conn_state_tx, ConnectionState::Crashed);
		set_state(&self.state_tx, CommunicatorState::Crashed);
		self.tracker.lock().clear();

		let now = Instant::now();
		self.crashes.push_back(now);
		while let Some(&oldest) = self.crashes.front() {
			if now.duration_since(oldest) > self.config.restart_window {
				self.crashes.pop_front();
			} else {
				break;
			}
		}
		if self.crashes.len() as u32 > self.config.restart_limit {
			let err = Error::RestartStorm {
				restarts: self.crashes.len() as u32,
				window: self.config.restart_window,
			};
			error!(error = %err, "backend keeps crashing; giving up");
			self.fail(err);
			return false;
		}

		info!(recent_crashes = self.crashes.len(), "restarting backend");
		match self.connect().await {
			Ok(()) => true,
			Err(e) => {
				error!(error = %e, "backend restart failed");
				self.fail(e);
				false
			}
		}
	}

	fn fail(&self, err: Error) {
		*self.last_failure.lock() = Some(err);
		set_conn_state(&self.conn_state_tx, ConnectionState::Disconnected);
		set_state(&self.state_tx, CommunicatorState::Failed);
	}
}

#[cfg(test)]
mod tests;
