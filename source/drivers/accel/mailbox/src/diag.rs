// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Read-only mailbox diagnostics (ring table + ring hex dump)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 unit tests; tests/diagnostics.rs
//!
//! Only available when the mailbox was built with `MailboxOptions { diagnostics: true }`.
//! Geometry is recorded per interrupt line on first channel creation and outlives the channel,
//! so a destroyed channel still shows up (with `alive` = 0).

use core::fmt::Write;

use accel_hal::{Bus, IrqChip};

use crate::mailbox::Mailbox;
use crate::ring::ChannelRes;
use crate::{Error, Result};

/// Bytes dumped per ring by [`Mailbox::ringbuf_show`], capped at the ring size.
pub const RINGBUF_DUMP_SIZE: usize = 0x1000;

const ROW: usize = 16;

/// Ring geometry remembered for one interrupt line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ResRecord {
    pub(crate) irq: u32,
    pub(crate) x2i: ChannelRes,
    pub(crate) i2x: ChannelRes,
}

impl ResRecord {
    fn dirs(&self) -> [(&'static str, &ChannelRes); 2] {
        [("x2i", &self.x2i), ("i2x", &self.i2x)]
    }
}

impl<B: Bus + 'static, C: IrqChip + 'static> Mailbox<B, C> {
    /// Writes one row per recorded ring with its geometry and live head/tail register values.
    pub fn info_show(&self, out: &mut impl Write) -> Result<()> {
        let state = self.inner.state.lock();
        let records = state.records.as_ref().ok_or(Error::DiagnosticsDisabled)?;
        let mbox_base = self.inner.res.mbox_base;
        let bus = &*self.inner.bus;

        out.write_str("mbox  dir  alive  ring addr   size    ")?;
        out.write_str("head ptr    tail ptr    head val  tail val\n")?;
        for record in records {
            let alive = u8::from(state.live.contains(&record.irq));
            for (dir, res) in record.dirs() {
                let head_val = bus.read(mbox_base + res.mb_head_ptr_reg as usize);
                let tail_val = bus.read(mbox_base + res.mb_tail_ptr_reg as usize);
                write!(
                    out,
                    "{:4}  {:>3}  {:5}  0x{:08x}  0x{:04x}  ",
                    record.irq, dir, alive, res.rb_start_addr, res.rb_size
                )?;
                writeln!(
                    out,
                    "0x{:08x}  0x{:08x}  0x{:04x}    0x{:04x}",
                    res.mb_head_ptr_reg, res.mb_tail_ptr_reg, head_val, tail_val
                )?;
            }
        }
        Ok(())
    }

    /// Hex-dumps the start of every recorded ring, 16 bytes per row in 32-bit groups.
    pub fn ringbuf_show(&self, out: &mut impl Write) -> Result<()> {
        let state = self.inner.state.lock();
        let records = state.records.as_ref().ok_or(Error::DiagnosticsDisabled)?;
        let base = self.inner.res.ringbuf_base;

        let mut buf = Vec::new();
        buf.try_reserve_exact(RINGBUF_DUMP_SIZE).map_err(|_| Error::NoMemory)?;
        for record in records {
            for (dir, res) in record.dirs() {
                let len = RINGBUF_DUMP_SIZE.min(res.rb_size as usize);
                buf.clear();
                buf.resize(len, 0);
                self.inner.bus.read_block(base + res.rb_start_addr as usize, &mut buf);
                hex_dump(out, &format!("{dir} {}: ", record.irq), &buf)?;
            }
        }
        Ok(())
    }
}

fn hex_dump(out: &mut impl Write, prefix: &str, data: &[u8]) -> core::fmt::Result {
    for (row, line) in data.chunks(ROW).enumerate() {
        write!(out, "{prefix}{:08x}:", row * ROW)?;
        for word in line.chunks(4) {
            let mut le = [0u8; 4];
            le[..word.len()].copy_from_slice(word);
            write!(out, " {:08x}", u32::from_le_bytes(le))?;
        }
        out.write_str("  ")?;
        for &b in line {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            out.write_char(c)?;
        }
        out.write_char('\n')?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_rows_have_offset_words_and_ascii() {
        let mut data = Vec::new();
        data.extend_from_slice(&0xDEAD_FACEu32.to_le_bytes());
        data.extend_from_slice(b"ABCD");
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&1u32.to_le_bytes());
        let mut out = String::new();
        hex_dump(&mut out, "x2i 3: ", &data).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "x2i 3: 00000000: deadface 44434241 00000000 00000000  ....ABCD........"
        );
        assert_eq!(lines[1], "x2i 3: 00000010: 00000001  ....");
    }

    #[test]
    fn empty_dump_writes_nothing() {
        let mut out = String::new();
        hex_dump(&mut out, "i2x 0: ", &[]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn record_lists_x2i_first() {
        let res = ChannelRes { rb_start_addr: 0, rb_size: 64, mb_head_ptr_reg: 0, mb_tail_ptr_reg: 4 };
        let record = ResRecord { irq: 1, x2i: res, i2x: ChannelRes { rb_start_addr: 64, ..res } };
        let dirs = record.dirs();
        assert_eq!(dirs[0].0, "x2i");
        assert_eq!(dirs[1].1.rb_start_addr, 64);
    }
}
