// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process device emulation for host-based testing
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 4 unit tests; used by every integration test
//!
//! PUBLIC API:
//!   - HostBus: sparse 32-bit word memory standing in for both the ring and register apertures
//!   - HostIrqChip: interrupt lines raised by hand with `raise(irq)`
//!   - FirmwareModel: device side of one channel (pops x2i requests, posts i2x replies/events)
//!
//! NOTES:
//!   - `HostIrqChip` runs handlers under a read lock and `free` takes the write lock, so `free`
//!     waits for a handler that is running on another thread.
//!   - The firmware model owns the x2i head and the i2x tail register, mirroring the host.

use std::collections::HashMap;

use accel_hal::{Bus, IrqChip, IrqError, IrqHandler};
use parking_lot::{Mutex, RwLock};

use crate::ring::{ChannelRes, MailboxRes, Ring, RxStep};
use crate::wire::{MsgHeader, HEADER_SIZE};
use crate::{Error, Result};

/// Word-addressed memory. Unwritten words read as zero.
#[derive(Default)]
pub struct HostBus {
    words: Mutex<HashMap<usize, u32>>,
}

impl HostBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bus for HostBus {
    fn read(&self, addr: usize) -> u32 {
        self.words.lock().get(&addr).copied().unwrap_or(0)
    }

    fn write(&self, addr: usize, value: u32) {
        self.words.lock().insert(addr, value);
    }
}

#[derive(Default)]
pub struct HostIrqChip {
    lines: RwLock<HashMap<u32, IrqHandler>>,
}

impl HostIrqChip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `irq` on the calling thread. Returns `false` if no handler is installed.
    pub fn raise(&self, irq: u32) -> bool {
        let lines = self.lines.read();
        match lines.get(&irq) {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    pub fn is_requested(&self, irq: u32) -> bool {
        self.lines.read().contains_key(&irq)
    }
}

impl IrqChip for HostIrqChip {
    fn request(&self, irq: u32, handler: IrqHandler) -> core::result::Result<(), IrqError> {
        let mut lines = self.lines.write();
        if lines.contains_key(&irq) {
            return Err(IrqError::Busy(irq));
        }
        lines.insert(irq, handler);
        Ok(())
    }

    fn free(&self, irq: u32) -> core::result::Result<(), IrqError> {
        self.lines.write().remove(&irq).map(drop).ok_or(IrqError::NotRequested(irq))
    }
}

/// A request as the firmware sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FwRequest {
    pub header: MsgHeader,
    pub payload: Vec<u8>,
}

/// Device end of one channel.
pub struct FirmwareModel<B: Bus> {
    bus: B,
    res: MailboxRes,
    x2i: ChannelRes,
    i2x: ChannelRes,
}

impl<B: Bus> FirmwareModel<B> {
    pub fn new(bus: B, res: MailboxRes, x2i: ChannelRes, i2x: ChannelRes) -> Self {
        Self { bus, res, x2i, i2x }
    }

    fn x2i(&self) -> Ring<'_, B> {
        Ring::new(&self.bus, &self.res, &self.x2i)
    }

    fn i2x(&self) -> Ring<'_, B> {
        Ring::new(&self.bus, &self.res, &self.i2x)
    }

    /// Consumes the next host request, following tombstones. `None` when the ring is empty.
    pub fn pop_request(&self) -> Result<Option<FwRequest>> {
        let ring = self.x2i();
        loop {
            match ring.consume(ring.head_reg(), ring.tail_reg())? {
                RxStep::Empty => return Ok(None),
                RxStep::Wrapped => ring.set_head_reg(0),
                RxStep::Message { header, payload_addr, next_head } => {
                    let payload = ring
                        .read_payload(payload_addr, header.payload_len())
                        .map_err(|_| Error::NoMemory)?;
                    ring.set_head_reg(next_head);
                    return Ok(Some(FwRequest { header, payload }));
                }
            }
        }
    }

    /// Every request currently queued, oldest first.
    pub fn pop_all(&self) -> Result<Vec<FwRequest>> {
        let mut out = Vec::new();
        while let Some(req) = self.pop_request()? {
            out.push(req);
        }
        Ok(out)
    }

    /// Posts a response carrying the request's id and opcode.
    pub fn reply(&self, req: &MsgHeader, payload: &[u8]) -> Result<()> {
        self.post(MsgHeader::new(req.opcode, req.id, payload.len() as u32), payload)
    }

    /// Posts a device-originated message; `id` should be at or above `ASYNC_MSG_START_ID`.
    pub fn post_event(&self, opcode: u32, id: u32, payload: &[u8]) -> Result<()> {
        self.post(MsgHeader::new(opcode, id, payload.len() as u32), payload)
    }

    /// Writes `header` + `payload` into the i2x ring and publishes the new tail.
    pub fn post(&self, header: MsgHeader, payload: &[u8]) -> Result<()> {
        let ring = self.i2x();
        let pkg = package(&header, payload);
        let tail = ring.produce(ring.head_reg(), ring.tail_reg(), &pkg)?;
        ring.set_tail_reg(tail);
        Ok(())
    }

    /// Like [`FirmwareModel::post`] but publishes only `published` bytes of the package, so the
    /// header's size disagrees with what the tail register shows. Returns the tail a complete
    /// publish would have written.
    pub fn post_truncated(&self, header: MsgHeader, payload: &[u8], published: u32) -> Result<u32> {
        let ring = self.i2x();
        let pkg = package(&header, payload);
        let full = ring.produce(ring.head_reg(), ring.tail_reg(), &pkg)?;
        ring.set_tail_reg(full - pkg.len() as u32 + published);
        Ok(full)
    }

    /// Head register of the i2x ring, i.e. how far the host has consumed.
    pub fn i2x_head(&self) -> u32 {
        self.i2x().head_reg()
    }

    pub fn i2x_tail(&self) -> u32 {
        self.i2x().tail_reg()
    }

    pub fn set_i2x_tail(&self, tail: u32) {
        self.i2x().set_tail_reg(tail);
    }

    /// True once the host has consumed everything posted so far.
    pub fn i2x_drained(&self) -> bool {
        let ring = self.i2x();
        let mask = ring.size() - 1;
        ring.head_reg() & mask == ring.tail_reg() & mask
    }
}

fn package(header: &MsgHeader, payload: &[u8]) -> Vec<u8> {
    let mut pkg = Vec::with_capacity(HEADER_SIZE + payload.len());
    pkg.extend_from_slice(&header.to_bytes());
    pkg.extend_from_slice(payload);
    pkg
}
