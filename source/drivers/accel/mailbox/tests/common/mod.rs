// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared fixture for mailbox integration tests
//! OWNERS: @runtime

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

use accel_mailbox::host::{FirmwareModel, HostBus, HostIrqChip};
use accel_mailbox::{Channel, ChannelRes, MailboxMsg, MailboxOptions, MailboxRes, Mailbox, Response};
use accel_hal::Bus;

pub type TestMailbox = Mailbox<Arc<HostBus>, Arc<HostIrqChip>>;
pub type TestChannel = Channel<Arc<HostBus>, Arc<HostIrqChip>>;

pub const RES: MailboxRes =
    MailboxRes { ringbuf_base: 0x10_0000, ringbuf_size: 0x10_0000, mbox_base: 0x1000, mbox_size: 0x1000 };
pub const IOHUB_INT_ADDR: u32 = 0x800;
pub const WAIT: Duration = Duration::from_secs(5);
pub const TX_TIMEOUT: Duration = Duration::from_millis(100);

/// x2i at offset 0, i2x right after it; registers 0x0..0x10.
pub fn rings(size: u32) -> (ChannelRes, ChannelRes) {
    let x2i = ChannelRes { rb_start_addr: 0, rb_size: size, mb_head_ptr_reg: 0x0, mb_tail_ptr_reg: 0x4 };
    let i2x = ChannelRes { rb_start_addr: size, rb_size: size, mb_head_ptr_reg: 0x8, mb_tail_ptr_reg: 0xc };
    (x2i, i2x)
}

pub struct Rig {
    pub bus: Arc<HostBus>,
    pub chip: Arc<HostIrqChip>,
    pub mailbox: TestMailbox,
    pub fw: FirmwareModel<Arc<HostBus>>,
    pub x2i: ChannelRes,
    pub i2x: ChannelRes,
    pub irq: u32,
}

impl Rig {
    pub fn new(ring_size: u32, irq: u32) -> Self {
        Self::with_options(ring_size, irq, MailboxOptions::default())
    }

    pub fn with_options(ring_size: u32, irq: u32, options: MailboxOptions) -> Self {
        let bus = Arc::new(HostBus::new());
        let chip = Arc::new(HostIrqChip::new());
        let mailbox = Mailbox::new(Arc::clone(&bus), Arc::clone(&chip), RES, options);
        let (x2i, i2x) = rings(ring_size);
        let fw = FirmwareModel::new(Arc::clone(&bus), RES, x2i, i2x);
        Self { bus, chip, mailbox, fw, x2i, i2x, irq }
    }

    pub fn channel(&self) -> TestChannel {
        self.mailbox
            .create_channel(&self.x2i, &self.i2x, IOHUB_INT_ADDR, self.irq)
            .expect("create channel")
    }

    pub fn raise(&self) {
        assert!(self.chip.raise(self.irq), "irq {} not requested", self.irq);
    }

    /// Raises the interrupt and waits until the host has consumed the whole i2x ring.
    pub fn raise_and_drain(&self) {
        self.raise();
        wait_until(|| self.fw.i2x_drained());
    }

    pub fn reg(&self, off: u32) -> u32 {
        self.bus.read(RES.mbox_base + off as usize)
    }
}

pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in {WAIT:?}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Completion as observed by a notify callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Done {
    Reply(u64, Vec<u8>),
    Cancelled(u64),
}

/// Builds requests whose completions land on one receiver.
pub fn completions() -> (mpsc::Sender<Done>, Receiver<Done>) {
    mpsc::channel()
}

pub fn request<'a>(
    opcode: u32,
    payload: &'a [u8],
    handle: u64,
    tx: &mpsc::Sender<Done>,
) -> MailboxMsg<'a> {
    let tx = tx.clone();
    MailboxMsg {
        opcode,
        payload,
        handle,
        notify: Some(Box::new(move |handle, response| {
            let done = match response {
                Response::Payload(data) => Done::Reply(handle, data.to_vec()),
                Response::Cancelled => Done::Cancelled(handle),
            };
            let _ = tx.send(done);
        })),
    }
}

pub fn words(word: u32, count: usize) -> Vec<u8> {
    word.to_le_bytes().iter().copied().cycle().take(count * 4).collect()
}
