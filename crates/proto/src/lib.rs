//! Wire message catalog and framed codec for the code model backend protocol.
//!
//! The backend is a separate process that parses C/C++ translation units and
//! computes code completions. The editor side talks to it over a point-to-point
//! byte stream carrying length-prefixed binary frames. This crate defines:
//!
//! * The message catalog: [`EditorMessage`] (editor → backend) and
//!   [`BackendMessage`] (backend → editor), plus the payload types they carry.
//! * [`codec::MessageCodec`]: a [`tokio_util::codec`] `Encoder`/`Decoder` pair
//!   for the framed stream.
//!
//! The catalog is deliberately flat: each message kind is independent and the
//! only correlation between an outbound request and an inbound response is the
//! [`Ticket`] carried by [`EditorMessage::CompleteCode`] and
//! [`BackendMessage::CodeCompleted`].

#![warn(missing_docs)]

mod messages;

pub mod codec;

pub use codec::{BackendCodec, CodecError, EditorCodec, MessageCodec};
pub use messages::{
	Annotation, AnnotationKind, BackendMessage, CodeCompletion, CompletionAvailability,
	CompletionKind, EditorMessage, FileContainer, ProjectPartContainer, Ticket,
};
