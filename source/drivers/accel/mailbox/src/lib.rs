// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host <-> accelerator firmware mailbox (shared-memory rings + doorbell registers)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module; tests/channel_roundtrip.rs, tests/teardown.rs,
//!   tests/diagnostics.rs, tests/config.rs
//!
//! PUBLIC API:
//!   - Mailbox: per-device register/ring apertures and the set of live channels
//!   - Channel: one x2i/i2x ring pair bound to an interrupt line
//!   - Channel::send_msg(): queue a request; the reply arrives through its notify callback
//!   - Channel::wait_async_msg(): consume device-originated events
//!   - Mailbox::info_show()/ringbuf_show(): read-only diagnostics (opt-in at construction)
//!   - MailboxConfig: TOML description of apertures and channels
//!
//! THREADING:
//!   - Interrupt handler: acks the line and schedules the channel's drain worker, nothing else.
//!   - Drain worker: one thread per channel; sole owner of the inbound head pointer.
//!   - Submitters: any thread; id allocation and the outbound tail update share one lock.
//!
//! DEPENDENCIES:
//!   - accel-hal: Bus and IrqChip seams
//!   - parking_lot: locks and condvars
//!   - log: diagnostics, prefixed `mailbox.<irq>:`
//!   - thiserror / serde / toml: errors and configuration

#![forbid(unsafe_code)]
#![deny(clippy::all)]

use core::time::Duration;

use accel_hal::IrqError;

pub mod async_queue;
pub mod channel;
pub mod config;
pub mod diag;
pub mod mailbox;
pub mod msgid;
pub mod ring;
pub mod wire;

#[cfg(any(test, feature = "backend-host"))]
pub mod host;

pub use async_queue::AsyncMsg;
pub use channel::{Channel, MailboxMsg, NotifyFn, Response};
pub use config::{ChannelConfig, MailboxConfig};
pub use mailbox::{Mailbox, MailboxOptions};
pub use msgid::MsgId;
pub use ring::{ChannelRes, MailboxRes};

/// Result type returned by mailbox operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Why a payload was refused before touching hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeError {
    /// Not a multiple of 4 bytes.
    Unaligned(usize),
    /// Header plus payload does not fit the outbound ring.
    TooLarge { pkg_size: usize, ring_size: u32 },
    /// First payload word equals the ring tombstone.
    Tombstone,
}

/// Errors produced by the mailbox.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The outbound ring cannot take the message right now.
    #[error("no space in ring buffer")]
    NoSpace,
    #[error("invalid message size: {0:?}")]
    InvalidSize(SizeError),
    /// All 256 ids of the channel are in flight.
    #[error("message ids exhausted")]
    IdExhausted,
    /// Inbound size word disagrees with ring occupancy.
    #[error("invalid message size {size}, tail {tail}, head {head}")]
    Malformed { size: u32, head: u32, tail: u32 },
    #[error("out of memory")]
    NoMemory,
    #[error("ring buffer size {0:#x} must be a power of 2")]
    RingSize(u32),
    #[error("interrupt setup failed: {0}")]
    Irq(IrqError),
    #[error("failed to start drain worker: {0}")]
    Spawn(#[source] std::io::Error),
    /// Non-blocking poll found nothing.
    #[error("no async message pending")]
    NoEvent,
    #[error("wait timed out")]
    Timeout,
    /// Blocking wait interrupted or channel torn down.
    #[error("wait cancelled")]
    Cancelled,
    #[error("diagnostics not enabled for this mailbox")]
    DiagnosticsDisabled,
    #[error("failed to format diagnostics")]
    Format(#[from] core::fmt::Error),
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl From<IrqError> for Error {
    fn from(err: IrqError) -> Self {
        Self::Irq(err)
    }
}

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

impl From<bool> for Wait {
    /// `true` means blocking.
    fn from(blocking: bool) -> Self {
        if blocking {
            Self::Blocking
        } else {
            Self::NonBlocking
        }
    }
}
