//! Length-prefixed frame codec for the backend channel.
//!
//! Every message travels as one frame: a big-endian `u32` payload length
//! followed by the MessagePack encoding of the message enum. The codec is
//! direction-agnostic; [`EditorCodec`] and [`BackendCodec`] fix the inbound
//! and outbound types for each end of the channel.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use crate::{BackendMessage, EditorMessage};

/// Hard upper bound on a single frame's payload, guarding against a corrupt
/// or malicious length prefix.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Length of the frame header (the `u32` payload length).
const HEADER_LEN: usize = 4;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
	/// Underlying stream error.
	#[error("{0}")]
	Io(#[from] std::io::Error),
	/// Message failed to serialize.
	#[error("failed to encode message: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	/// Frame payload failed to deserialize.
	#[error("failed to decode message: {0}")]
	Decode(#[from] rmp_serde::decode::Error),
	/// Frame length prefix exceeds [`MAX_FRAME_LEN`].
	#[error("frame of {len} bytes exceeds the {max} byte limit")]
	FrameTooLarge {
		/// Announced payload length.
		len: usize,
		/// The configured limit.
		max: usize,
	},
}

/// Codec decoding `Rx` frames and encoding `Tx` frames.
#[derive(Debug)]
pub struct MessageCodec<Rx, Tx> {
	_marker: PhantomData<fn() -> (Rx, Tx)>,
}

/// Editor-side codec: decodes [`BackendMessage`], encodes [`EditorMessage`].
pub type EditorCodec = MessageCodec<BackendMessage, EditorMessage>;

/// Backend-side codec: decodes [`EditorMessage`], encodes [`BackendMessage`].
pub type BackendCodec = MessageCodec<EditorMessage, BackendMessage>;

impl<Rx, Tx> MessageCodec<Rx, Tx> {
	/// Create a codec.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			_marker: PhantomData,
		}
	}
}

impl<Rx, Tx> Default for MessageCodec<Rx, Tx> {
	fn default() -> Self {
		Self::new()
	}
}

impl<Rx: DeserializeOwned, Tx> Decoder for MessageCodec<Rx, Tx> {
	type Item = Rx;
	type Error = CodecError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Rx>, CodecError> {
		if src.len() < HEADER_LEN {
			return Ok(None);
		}

		let mut header = [0u8; HEADER_LEN];
		header.copy_from_slice(&src[..HEADER_LEN]);
		let len = u32::from_be_bytes(header) as usize;
		if len > MAX_FRAME_LEN {
			return Err(CodecError::FrameTooLarge {
				len,
				max: MAX_FRAME_LEN,
			});
		}

		if src.len() < HEADER_LEN + len {
			src.reserve(HEADER_LEN + len - src.len());
			return Ok(None);
		}

		src.advance(HEADER_LEN);
		let payload = src.split_to(len);
		let msg = rmp_serde::from_slice(&payload)?;
		Ok(Some(msg))
	}
}

impl<Rx, Tx: Serialize> Encoder<Tx> for MessageCodec<Rx, Tx> {
	type Error = CodecError;

	fn encode(&mut self, msg: Tx, dst: &mut BytesMut) -> Result<(), CodecError> {
		let payload = rmp_serde::to_vec(&msg)?;
		if payload.len() > MAX_FRAME_LEN {
			return Err(CodecError::FrameTooLarge {
				len: payload.len(),
				max: MAX_FRAME_LEN,
			});
		}

		dst.reserve(HEADER_LEN + payload.len());
		dst.put_u32(payload.len() as u32);
		dst.put_slice(&payload);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{CodeCompletion, CompletionKind, FileContainer, Ticket};

	fn encode_backend(msg: BackendMessage) -> BytesMut {
		let mut codec = BackendCodec::new();
		let mut buf = BytesMut::new();
		codec.encode(msg, &mut buf).unwrap();
		buf
	}

	#[test]
	fn test_frame_roundtrip() {
		let msg = BackendMessage::CodeCompleted {
			ticket: Ticket(7),
			completions: vec![CodeCompletion::new("memcpy", CompletionKind::Function)],
		};
		let mut buf = encode_backend(msg.clone());

		let mut codec = EditorCodec::new();
		let decoded = codec.decode(&mut buf).unwrap().unwrap();
		assert_eq!(decoded, msg);
		assert!(buf.is_empty());
	}

	#[test]
	fn test_outbound_roundtrip() {
		let msg = EditorMessage::RegisterTranslationUnits {
			files: vec![FileContainer::new("/src/a.cpp", "part").with_unsaved_content("int x;", 1)],
		};
		let mut codec = EditorCodec::new();
		let mut buf = BytesMut::new();
		codec.encode(msg.clone(), &mut buf).unwrap();

		let mut backend = BackendCodec::new();
		assert_eq!(backend.decode(&mut buf).unwrap(), Some(msg));
	}

	#[test]
	fn test_partial_frame_yields_none() {
		let buf = encode_backend(BackendMessage::Alive);

		let mut codec = EditorCodec::new();
		// Feed all but the last byte; the codec must wait for more input.
		let mut partial = BytesMut::from(&buf[..buf.len() - 1]);
		assert!(codec.decode(&mut partial).unwrap().is_none());

		partial.put_u8(buf[buf.len() - 1]);
		assert_eq!(codec.decode(&mut partial).unwrap(), Some(BackendMessage::Alive));
	}

	#[test]
	fn test_split_header_yields_none() {
		let mut codec = EditorCodec::new();
		let mut buf = BytesMut::from(&[0u8, 0][..]);
		assert!(codec.decode(&mut buf).unwrap().is_none());
	}

	#[test]
	fn test_oversize_frame_rejected() {
		let mut buf = BytesMut::new();
		buf.put_u32((MAX_FRAME_LEN + 1) as u32);
		buf.put_slice(&[0u8; 16]);

		let mut codec = EditorCodec::new();
		let err = codec.decode(&mut buf).unwrap_err();
		assert!(matches!(err, CodecError::FrameTooLarge { .. }));
	}

	#[test]
	fn test_back_to_back_frames() {
		let mut buf = encode_backend(BackendMessage::Alive);
		buf.extend_from_slice(&encode_backend(BackendMessage::Echo {
			payload: "ping".into(),
		}));

		let mut codec = EditorCodec::new();
		assert_eq!(codec.decode(&mut buf).unwrap(), Some(BackendMessage::Alive));
		assert_eq!(
			codec.decode(&mut buf).unwrap(),
			Some(BackendMessage::Echo {
				payload: "ping".into()
			})
		);
		assert!(codec.decode(&mut buf).unwrap().is_none());
	}
}
