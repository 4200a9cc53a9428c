//! Debug Adapter Protocol support for the ansibug debuggee.
//!
//! This crate provides:
//! - `Content-Length` framing over any blocking reader/writer ([`codec`]).
//! - A closed set of client messages the debuggee understands, decoded into
//!   [`ClientMessage`], plus the outbound [`Response`]/[`Event`] envelopes
//!   ([`messages`]).
//! - The DAP bodies and arguments exchanged with the client ([`types`]).

pub mod codec;
pub mod messages;
pub mod types;

pub use crate::codec::FrameError;
pub use crate::messages::{
    ClientMessage, Command, DecodeError, Event, Request, Response, ServerMessage,
};

/// Maximum allowed DAP message payload size (in bytes).
///
/// Caps the incoming `Content-Length` header so a misbehaving client cannot make
/// the debuggee allocate an arbitrarily large body buffer.
pub const MAX_DAP_MESSAGE_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

/// Maximum allowed size of a single DAP header line (in bytes).
pub const MAX_DAP_HEADER_LINE_BYTES: usize = 8 * 1024; // 8 KiB
