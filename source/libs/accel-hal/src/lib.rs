// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]

//! CONTEXT: Hardware access seams shared by accelerator drivers
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 4 unit tests, tests/bus.rs
//!
//! PUBLIC API:
//!   - Bus: 32-bit MMIO register/aperture access
//!   - IrqChip: interrupt line claim/release
//!   - IrqHandler, IrqError
//!
//! NOTE:
//!   - Every access is a 32-bit aligned read or write; block copies are built from word accesses
//!     only, so devices that reject byte/halfword cycles are safe to drive through `Bus`.

extern crate alloc;

use alloc::sync::Arc;
use core::fmt;

/// Width of one bus access in bytes.
pub const WORD: usize = core::mem::size_of::<u32>();

/// Basic bus access trait shared by user drivers.
///
/// `addr` is an absolute bus address; callers add their aperture base themselves.
pub trait Bus: Send + Sync {
    fn read(&self, addr: usize) -> u32;
    fn write(&self, addr: usize, value: u32);

    /// Copies `out.len()` bytes starting at `addr` using 32-bit reads.
    ///
    /// `addr` and `out.len()` must be multiples of [`WORD`]; any trailing partial word is ignored.
    fn read_block(&self, addr: usize, out: &mut [u8]) {
        for (i, chunk) in out.chunks_exact_mut(WORD).enumerate() {
            let word = self.read(addr + i * WORD);
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    /// Copies `data` to `addr` using 32-bit writes. Same alignment rules as [`Bus::read_block`].
    fn write_block(&self, addr: usize, data: &[u8]) {
        for (i, chunk) in data.chunks_exact(WORD).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.write(addr + i * WORD, word);
        }
    }
}

impl<B: Bus + ?Sized> Bus for &B {
    fn read(&self, addr: usize) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: usize, value: u32) {
        (**self).write(addr, value)
    }

    fn read_block(&self, addr: usize, out: &mut [u8]) {
        (**self).read_block(addr, out)
    }

    fn write_block(&self, addr: usize, data: &[u8]) {
        (**self).write_block(addr, data)
    }
}

impl<B: Bus + ?Sized> Bus for Arc<B> {
    fn read(&self, addr: usize) -> u32 {
        (**self).read(addr)
    }

    fn write(&self, addr: usize, value: u32) {
        (**self).write(addr, value)
    }

    fn read_block(&self, addr: usize, out: &mut [u8]) {
        (**self).read_block(addr, out)
    }

    fn write_block(&self, addr: usize, data: &[u8]) {
        (**self).write_block(addr, data)
    }
}

/// Interrupt top-half. Runs in a restricted context: it must not block or sleep.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Errors reported by an interrupt controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqError {
    /// Another handler already owns the line.
    Busy(u32),
    /// No handler is registered on the line.
    NotRequested(u32),
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy(irq) => write!(f, "irq {irq} already requested"),
            Self::NotRequested(irq) => write!(f, "irq {irq} not requested"),
        }
    }
}

/// Interrupt controller seam.
pub trait IrqChip: Send + Sync {
    /// Installs `handler` on `irq`. The handler may fire as soon as this returns.
    fn request(&self, irq: u32, handler: IrqHandler) -> Result<(), IrqError>;

    /// Removes the handler from `irq`.
    ///
    /// Must not return while the handler is executing on another CPU/thread; once `free`
    /// returns, the handler will never run again.
    fn free(&self, irq: u32) -> Result<(), IrqError>;
}

impl<C: IrqChip + ?Sized> IrqChip for Arc<C> {
    fn request(&self, irq: u32, handler: IrqHandler) -> Result<(), IrqError> {
        (**self).request(irq, handler)
    }

    fn free(&self, irq: u32) -> Result<(), IrqError> {
        (**self).free(irq)
    }
}
