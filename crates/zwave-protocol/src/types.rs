//! Common types used throughout the protocol

use crate::job::{JobId, ResendReason};
use thiserror::Error;

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Checksum invalid: expected {expected:#04X}, got {actual:#04X}")]
    ChecksumInvalid { expected: u8, actual: u8 },

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Job {job} cancelled after {attempts} send attempts (last failure: {reason})")]
    JobExhausted {
        job: JobId,
        attempts: u8,
        reason: ResendReason,
    },

    #[error("Job {0} cancelled by its owner")]
    JobCancelled(JobId),

    #[error("No Z-Wave controller found on any of {0:?}")]
    PortUnavailable(Vec<String>),

    #[error("Serial port error: {0}")]
    SerialError(#[from] std::io::Error),

    #[error("Transport not connected")]
    NotConnected,
}
