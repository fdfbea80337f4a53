// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-device mailbox: apertures, live channel set, optional geometry history
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 unit tests; tests/diagnostics.rs

use std::sync::Arc;

use accel_hal::{Bus, IrqChip};
use parking_lot::Mutex;

use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::diag::ResRecord;
use crate::ring::{ChannelRes, MailboxRes};
use crate::Result;

/// Construction-time switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxOptions {
    /// Keep ring geometry of every channel ever created and enable `info_show`/`ringbuf_show`.
    pub diagnostics: bool,
}

#[derive(Default)]
pub(crate) struct MailboxState {
    /// Interrupt lines of live channels, most recent first.
    pub(crate) live: Vec<u32>,
    /// `Some` only when diagnostics were enabled at construction.
    pub(crate) records: Option<Vec<ResRecord>>,
}

pub(crate) struct MailboxInner<B: Bus, C: IrqChip> {
    pub(crate) bus: Arc<B>,
    pub(crate) irqs: C,
    pub(crate) res: MailboxRes,
    pub(crate) state: Mutex<MailboxState>,
}

impl<B: Bus, C: IrqChip> MailboxInner<B, C> {
    /// Remembers the geometry for `irq` the first time a channel is created on it.
    pub(crate) fn record_res(&self, irq: u32, x2i: &ChannelRes, i2x: &ChannelRes) {
        let mut state = self.state.lock();
        let Some(records) = state.records.as_mut() else {
            return;
        };
        if records.iter().any(|r| r.irq == irq) {
            return;
        }
        records.push(ResRecord { irq, x2i: *x2i, i2x: *i2x });
    }

    pub(crate) fn add_live(&self, irq: u32) {
        self.state.lock().live.insert(0, irq);
    }

    pub(crate) fn remove_live(&self, irq: u32) {
        let mut state = self.state.lock();
        if let Some(pos) = state.live.iter().position(|&l| l == irq) {
            state.live.remove(pos);
        }
    }
}

/// Mailbox of one device instance. Channels keep the underlying state alive, so the handle may
/// be dropped first; doing so while channels are live is logged.
pub struct Mailbox<B: Bus + 'static, C: IrqChip + 'static> {
    pub(crate) inner: Arc<MailboxInner<B, C>>,
}

impl<B: Bus + 'static, C: IrqChip + 'static> Mailbox<B, C> {
    pub fn new(bus: B, irqs: C, res: MailboxRes, options: MailboxOptions) -> Self {
        let state = MailboxState {
            live: Vec::new(),
            records: options.diagnostics.then(Vec::new),
        };
        Self {
            inner: Arc::new(MailboxInner { bus: Arc::new(bus), irqs, res, state: Mutex::new(state) }),
        }
    }

    pub fn res(&self) -> &MailboxRes {
        &self.inner.res
    }

    /// Creates a channel over the `x2i` (host to device) and `i2x` (device to host) rings,
    /// driven by interrupt `irq` and acknowledged through `iohub_int_addr`.
    pub fn create_channel(
        &self,
        x2i: &ChannelRes,
        i2x: &ChannelRes,
        iohub_int_addr: u32,
        irq: u32,
    ) -> Result<Channel<B, C>> {
        Channel::create(Arc::clone(&self.inner), x2i, i2x, iohub_int_addr, irq)
    }

    pub fn create_channel_from(&self, cfg: &ChannelConfig) -> Result<Channel<B, C>> {
        log::debug!("mailbox.{}: creating channel {:?}", cfg.irq, cfg.name);
        self.create_channel(&cfg.x2i, &cfg.i2x, cfg.iohub_int_addr, cfg.irq)
    }

    /// Interrupt lines of the channels currently alive.
    pub fn live_channels(&self) -> Vec<u32> {
        self.inner.state.lock().live.clone()
    }
}

impl<B: Bus + 'static, C: IrqChip + 'static> Drop for Mailbox<B, C> {
    fn drop(&mut self) {
        let live = self.inner.state.lock().live.len();
        if live != 0 {
            log::warn!("mailbox: {live} channel(s) not destroyed");
        }
    }
}
