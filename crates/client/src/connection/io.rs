//! Framed I/O loop for a single backend process.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{error, info, trace};

use codemodel_proto::{EditorCodec, EditorMessage};

use super::{TransportEvent, TransportStatus};

const READ_BUF_CAPACITY: usize = 8 * 1024;

/// Pumps frames both ways for one backend process until EOF, an I/O failure
/// or the outbound channel closing.
///
/// Outbound messages are written strictly in queue order; the transport is
/// stream-ordered end to end.
pub(super) async fn run_backend_io(
	mut stdin: ChildStdin,
	mut stdout: ChildStdout,
	mut outbound_rx: mpsc::UnboundedReceiver<EditorMessage>,
	event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
	let mut codec = EditorCodec::new();
	let mut read_buf = BytesMut::with_capacity(READ_BUF_CAPACITY);
	let mut write_buf = BytesMut::new();

	loop {
		tokio::select! {
			out = outbound_rx.recv() => {
				let Some(msg) = out else {
					// Transport dropped the sender; deliberate teardown.
					break;
				};

				trace!(kind = msg.kind(), "backend <- editor");
				write_buf.clear();
				if let Err(e) = codec.encode(msg, &mut write_buf) {
					error!(error = %e, "failed to encode outbound message; terminating I/O loop");
					let _ = event_tx.send(TransportEvent::Status(TransportStatus::Crashed));
					break;
				}
				if let Err(e) = write_frame(&mut stdin, &write_buf).await {
					error!(error = %e, "outbound write failed; terminating I/O loop");
					let _ = event_tx.send(TransportEvent::Status(TransportStatus::Crashed));
					break;
				}
			}

			read = stdout.read_buf(&mut read_buf) => {
				match read {
					Ok(0) => {
						info!("backend closed the channel");
						let _ = event_tx.send(TransportEvent::Status(TransportStatus::Stopped));
						break;
					}
					Ok(_) => {
						if !drain_frames(&mut codec, &mut read_buf, &event_tx) {
							break;
						}
					}
					Err(e) => {
						error!(error = %e, "error reading from backend");
						let _ = event_tx.send(TransportEvent::Status(TransportStatus::Crashed));
						break;
					}
				}
			}
		}
	}
}

async fn write_frame(stdin: &mut ChildStdin, frame: &[u8]) -> std::io::Result<()> {
	stdin.write_all(frame).await?;
	stdin.flush().await
}

/// Decodes every complete frame currently buffered. Returns `false` when the
/// loop must terminate (decode failure, reported as a crash).
fn drain_frames(
	codec: &mut EditorCodec,
	read_buf: &mut BytesMut,
	event_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> bool {
	loop {
		match codec.decode(read_buf) {
			Ok(Some(msg)) => {
				trace!(kind = msg.kind(), "backend -> editor");
				let _ = event_tx.send(TransportEvent::Message(msg));
			}
			Ok(None) => return true,
			Err(e) => {
				error!(error = %e, "undecodable frame from backend");
				let _ = event_tx.send(TransportEvent::Status(TransportStatus::Crashed));
				return false;
			}
		}
	}
}
