// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared-memory ring geometry and the producer/consumer steps over it
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 10 unit tests
//!
//! The same two steps drive both directions: the host produces into the x2i ring and consumes
//! the i2x ring, while the firmware (see `host::FirmwareModel`) does the opposite. Callers decide
//! where head/tail come from (hardware register vs. locally tracked copy) and publish the result.
//!
//! INVARIANTS:
//!   - Ring sizes are powers of two.
//!   - Every offset handed to the bus is 4-byte aligned; messages are word multiples.
//!   - A message never straddles the ring end; the writer leaves TOMBSTONE and restarts at 0.

use std::collections::TryReserveError;

use accel_hal::{Bus, WORD};
use serde::Deserialize;

use crate::wire::{MsgHeader, HEADER_SIZE, TOMBSTONE};
use crate::{Error, Result};

/// Device-wide apertures. Register offsets in [`ChannelRes`] are relative to `mbox_base`,
/// ring start offsets to `ringbuf_base`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MailboxRes {
    pub ringbuf_base: usize,
    #[serde(default)]
    pub ringbuf_size: usize,
    pub mbox_base: usize,
    #[serde(default)]
    pub mbox_size: usize,
}

/// Geometry of one direction of one channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ChannelRes {
    pub rb_start_addr: u32,
    pub rb_size: u32,
    pub mb_head_ptr_reg: u32,
    pub mb_tail_ptr_reg: u32,
}

impl ChannelRes {
    /// Rejects rings that are not a power of two or cannot hold a header plus one word.
    pub fn validate(&self) -> Result<()> {
        if !self.rb_size.is_power_of_two() || (self.rb_size as usize) <= HEADER_SIZE {
            return Err(Error::RingSize(self.rb_size));
        }
        Ok(())
    }
}

/// Outcome of one consumer step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RxStep {
    /// `head == tail` modulo the ring size.
    Empty,
    /// TOMBSTONE found; the consumer continues at offset 0.
    Wrapped,
    /// A complete message. Payload starts at `payload_addr`; `next_head` is past it.
    Message { header: MsgHeader, payload_addr: usize, next_head: u32 },
}

/// Bus view of one ring. Borrowed for the duration of a single step.
pub(crate) struct Ring<'a, B: Bus + ?Sized> {
    bus: &'a B,
    res: &'a ChannelRes,
    ring_addr: usize,
    mbox_base: usize,
}

impl<'a, B: Bus + ?Sized> Ring<'a, B> {
    pub(crate) fn new(bus: &'a B, mb: &MailboxRes, res: &'a ChannelRes) -> Self {
        Self {
            bus,
            res,
            ring_addr: mb.ringbuf_base + res.rb_start_addr as usize,
            mbox_base: mb.mbox_base,
        }
    }

    pub(crate) fn size(&self) -> u32 {
        self.res.rb_size
    }

    pub(crate) fn head_reg(&self) -> u32 {
        self.bus.read(self.mbox_base + self.res.mb_head_ptr_reg as usize)
    }

    pub(crate) fn tail_reg(&self) -> u32 {
        self.bus.read(self.mbox_base + self.res.mb_tail_ptr_reg as usize)
    }

    pub(crate) fn set_head_reg(&self, value: u32) {
        self.bus.write(self.mbox_base + self.res.mb_head_ptr_reg as usize, value);
    }

    pub(crate) fn set_tail_reg(&self, value: u32) {
        self.bus.write(self.mbox_base + self.res.mb_tail_ptr_reg as usize, value);
    }

    /// Writes `pkg` (header + payload) given the consumer's `head` and the producer's `tail`.
    ///
    /// Returns the new tail; publishing it is up to the caller.
    pub(crate) fn produce(&self, head: u32, tail: u32, pkg: &[u8]) -> Result<u32> {
        let ring_size = self.size();
        let pkg_size = pkg.len() as u32;
        let tmp_tail = tail + pkg_size;
        let limit = ring_size - WORD as u32;

        // Both checks are needed as written: the second only fires when wrapping to offset 0
        // would land on top of the unread region.
        if tail < head && tmp_tail >= head {
            return Err(Error::NoSpace);
        }
        if tail >= head && tmp_tail > limit && pkg_size >= head {
            return Err(Error::NoSpace);
        }

        let mut start = tail;
        if tail >= head && tmp_tail > limit {
            self.bus.write(self.ring_addr + tail as usize, TOMBSTONE);
            start = 0;
        }

        self.bus.write_block(self.ring_addr + start as usize, pkg);
        Ok(start + pkg_size)
    }

    /// Looks at the entry at `head` given the producer's `tail`. Never moves any pointer.
    pub(crate) fn consume(&self, head: u32, tail: u32) -> Result<RxStep> {
        let ring_size = self.size();
        let mask = ring_size - 1;
        if head & mask == tail & mask {
            return Ok(RxStep::Empty);
        }

        // Head may legitimately sit exactly at the ring end after the previous message.
        let head = if head == ring_size { 0 } else { head };

        let addr = self.ring_addr + head as usize;
        let first = self.bus.read(addr);
        if first == TOMBSTONE {
            return Ok(RxStep::Wrapped);
        }

        let mut raw = [0u8; HEADER_SIZE];
        self.bus.read_block(addr, &mut raw);
        let header = MsgHeader::from_bytes(&raw);

        let malformed = Error::Malformed { size: first, head, tail };
        let msg_size = u64::from(first);
        if msg_size + HEADER_SIZE as u64 > u64::from(tail.wrapping_sub(head)) {
            return Err(malformed);
        }
        // Messages never cross the ring end, whatever the occupancy says after a wrap.
        let next_head = match (head + HEADER_SIZE as u32).checked_add(first) {
            Some(end) if end <= ring_size => end,
            _ => return Err(malformed),
        };

        Ok(RxStep::Message { header, payload_addr: addr + HEADER_SIZE, next_head })
    }

    /// Copies `len` payload bytes out of the ring.
    pub(crate) fn read_payload(
        &self,
        payload_addr: usize,
        len: usize,
    ) -> core::result::Result<Vec<u8>, TryReserveError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);
        self.bus.read_block(payload_addr, &mut buf);
        Ok(buf)
    }
}
