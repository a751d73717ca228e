//! Z-Wave serial API implementation
//!
//! This crate implements the host side of the serial protocol spoken by
//! Z-Wave USB controllers: frame encoding, link-level acknowledgement and
//! the request/response job queue.

pub mod constants;
pub mod frame;
pub mod framing;
pub mod job;
pub mod transport;
pub mod types;

pub use constants::{FunctionId, MessageType};
pub use frame::Frame;
pub use framing::{FrameReader, Inbound};
pub use job::{
    Job, JobHandle, JobId, JobOutcome, JobState, MatchFunction, ResendReason, ResponsePolicy,
    Verdict,
};
pub use transport::{Link, LinkEvent, LinkPeer, LinkTransport};
pub use types::*;
