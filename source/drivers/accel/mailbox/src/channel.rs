// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Mailbox channel: request submission, interrupt-driven drain, teardown
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 unit tests; tests/channel_roundtrip.rs, tests/teardown.rs
//!
//! LIFECYCLE:
//!   create:  record geometry -> validate rings -> read x2i tail -> start drain worker
//!            -> request irq (worker stopped again on failure) -> join live set
//!   active:  send_msg() from any thread, drains triggered by the interrupt
//!   destroy: free irq -> stop worker (pending drain runs first) -> cancel in-flight requests
//!            -> close async queue -> leave live set
//!
//! SINGLE WRITER PER REGISTER:
//!   - x2i tail: only `send_msg`, under the tx lock
//!   - i2x head: only the drain worker; the value lives on the worker's stack

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use accel_hal::{Bus, IrqChip, IrqHandler, WORD};
use parking_lot::{Condvar, Mutex};

use crate::async_queue::{AsyncMsg, AsyncQueue};
use crate::mailbox::MailboxInner;
use crate::msgid::{MsgId, MsgIdTable};
use crate::ring::{ChannelRes, MailboxRes, Ring, RxStep};
use crate::wire::{first_word, MsgHeader, HEADER_SIZE, TOMBSTONE};
use crate::{Error, Result, SizeError, Wait};

/// What a request's notify callback receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Response<'a> {
    /// Reply payload; its length is the size the firmware reported.
    Payload(&'a [u8]),
    /// The channel was torn down before a reply arrived.
    Cancelled,
}

/// Completion callback, called once with the caller's handle. Runs on the channel's drain
/// worker (or the thread destroying the channel) and must not block on the same channel.
pub type NotifyFn = Box<dyn FnOnce(u64, Response<'_>) + Send>;

/// One outbound request.
pub struct MailboxMsg<'a> {
    pub opcode: u32,
    /// Must be a multiple of 4 bytes and must not start with the tombstone word.
    pub payload: &'a [u8],
    /// Opaque caller value handed back to `notify`.
    pub handle: u64,
    pub notify: Option<NotifyFn>,
}

impl fmt::Debug for MailboxMsg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxMsg")
            .field("opcode", &self.opcode)
            .field("len", &self.payload.len())
            .field("handle", &self.handle)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

struct InFlight {
    header: MsgHeader,
    handle: u64,
    notify: Option<NotifyFn>,
}

impl InFlight {
    fn complete(self, response: Response<'_>) {
        if let Some(notify) = self.notify {
            notify(self.handle, response);
        }
    }
}

struct TxState {
    ids: MsgIdTable<InFlight>,
    tail: u32,
}

struct ChannelShared<B: Bus> {
    irq: u32,
    iohub_int_addr: u32,
    x2i: ChannelRes,
    i2x: ChannelRes,
    res: MailboxRes,
    bus: Arc<B>,
    tx: Mutex<TxState>,
    async_msgs: AsyncQueue,
    desync_reported: AtomicBool,
}

impl<B: Bus + 'static> ChannelShared<B> {
    fn rx_ring(&self) -> Ring<'_, B> {
        Ring::new(&*self.bus, &self.res, &self.i2x)
    }

    fn tx_ring(&self) -> Ring<'_, B> {
        Ring::new(&*self.bus, &self.res, &self.x2i)
    }

    fn irq_handler(&self, trigger: &Arc<DrainTrigger>) -> IrqHandler {
        let irq = self.irq;
        let trigger = Arc::clone(trigger);
        let bus = Arc::clone(&self.bus);
        let ack = self.res.mbox_base + self.iohub_int_addr as usize;
        Arc::new(move || {
            log::trace!("mailbox.{irq}: irq");
            trigger.schedule();
            bus.write(ack, 0);
        })
    }

    /// Consumes inbound messages until the ring is empty or a malformed entry stops the cycle.
    fn rx_drain(&self, head: &mut u32) {
        loop {
            match self.rx_one(head) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => {
                    // Left for the next interrupt; retrying here would spin on the same bytes.
                    log::error!("mailbox.{}: {err}", self.irq);
                    break;
                }
            }
        }
    }

    fn rx_one(&self, head: &mut u32) -> Result<bool> {
        let ring = self.rx_ring();
        let tail = ring.tail_reg();
        match ring.consume(*head, tail)? {
            RxStep::Empty => Ok(false),
            RxStep::Wrapped => {
                ring.set_head_reg(0);
                *head = 0;
                Ok(true)
            }
            RxStep::Message { header, payload_addr, next_head } => {
                if header.is_async() {
                    self.rx_async(&ring, &header, payload_addr);
                } else {
                    self.rx_resp(&ring, &header, payload_addr);
                }
                // May equal the ring size; the next consume step folds it back to 0.
                ring.set_head_reg(next_head);
                *head = next_head;
                log::trace!(
                    "mailbox.{}: set head {next_head:#x} opcode {:#x} id {:#x}",
                    self.irq,
                    header.opcode,
                    header.id
                );
                Ok(true)
            }
        }
    }

    fn rx_resp(&self, ring: &Ring<'_, B>, header: &MsgHeader, payload_addr: usize) {
        let Some(id) = MsgId::validate(header.id) else {
            log::debug!("mailbox.{}: Bad message ID {:#x}", self.irq, header.id);
            return;
        };

        let record = self.tx.lock().ids.take(id);
        let Some(record) = record else {
            self.report_unknown(id);
            return;
        };

        match ring.read_payload(payload_addr, header.payload_len()) {
            Ok(data) => record.complete(Response::Payload(&data)),
            Err(_) => {
                log::error!("mailbox.{}: no memory for reply {id}", self.irq);
                record.complete(Response::Cancelled);
            }
        }
    }

    fn rx_async(&self, ring: &Ring<'_, B>, header: &MsgHeader, payload_addr: usize) {
        match ring.read_payload(payload_addr, header.payload_len()) {
            Ok(payload) => {
                log::debug!(
                    "mailbox.{}: async msg opcode {:#x} size {}",
                    self.irq,
                    header.opcode,
                    payload.len()
                );
                self.async_msgs.push(AsyncMsg { opcode: header.opcode, payload });
            }
            Err(_) => log::warn!(
                "mailbox.{}: dropping async msg opcode {:#x}, no memory",
                self.irq,
                header.opcode
            ),
        }
    }

    fn report_unknown(&self, id: MsgId) {
        if !self.desync_reported.swap(true, Ordering::Relaxed) {
            log::error!("mailbox.{}: Cannot find msg {id}, ring may be out of sync", self.irq);
        } else {
            log::warn!("mailbox.{}: Cannot find msg {id}", self.irq);
        }
    }
}

#[derive(Default)]
struct TriggerState {
    pending: bool,
    shutdown: bool,
}

/// Coalescing wake-up for the drain worker: scheduling while a run is pending is a no-op.
#[derive(Default)]
struct DrainTrigger {
    state: Mutex<TriggerState>,
    kick: Condvar,
}

impl DrainTrigger {
    fn schedule(&self) -> bool {
        let mut state = self.state.lock();
        if state.pending || state.shutdown {
            return false;
        }
        state.pending = true;
        drop(state);
        self.kick.notify_one();
        true
    }

    /// Blocks until there is work. `false` means shut down with nothing pending.
    fn next(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.pending {
                state.pending = false;
                return true;
            }
            if state.shutdown {
                return false;
            }
            self.kick.wait(&mut state);
        }
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.kick.notify_all();
    }
}

struct DrainWorker {
    trigger: Arc<DrainTrigger>,
    thread: Option<JoinHandle<()>>,
}

impl DrainWorker {
    fn spawn<B: Bus + 'static>(shared: Arc<ChannelShared<B>>) -> Result<Self> {
        let trigger = Arc::new(DrainTrigger::default());
        let wake = Arc::clone(&trigger);
        let thread = thread::Builder::new()
            .name(format!("mailbox.{}", shared.irq))
            .spawn(move || {
                let mut head = 0u32;
                while wake.next() {
                    shared.rx_drain(&mut head);
                }
            })
            .map_err(Error::Spawn)?;
        Ok(Self { trigger, thread: Some(thread) })
    }

    /// Runs any pending drain, then joins the thread.
    fn stop(&mut self, irq: u32) {
        self.trigger.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("mailbox.{irq}: drain worker panicked");
            }
        }
    }
}

/// One bidirectional mailbox channel. Dropping it tears it down like [`Channel::destroy`].
pub struct Channel<B: Bus + 'static, C: IrqChip + 'static> {
    shared: Arc<ChannelShared<B>>,
    mailbox: Arc<MailboxInner<B, C>>,
    worker: DrainWorker,
    destroyed: bool,
}

impl<B: Bus + 'static, C: IrqChip + 'static> Channel<B, C> {
    pub(crate) fn create(
        mailbox: Arc<MailboxInner<B, C>>,
        x2i: &ChannelRes,
        i2x: &ChannelRes,
        iohub_int_addr: u32,
        irq: u32,
    ) -> Result<Self> {
        mailbox.record_res(irq, x2i, i2x);

        if let Err(err) = x2i.validate().and_then(|()| i2x.validate()) {
            log::error!("mailbox.{irq}: {err}");
            return Err(err);
        }

        let tail = Ring::new(&*mailbox.bus, &mailbox.res, x2i).tail_reg();
        let shared = Arc::new(ChannelShared {
            irq,
            iohub_int_addr,
            x2i: *x2i,
            i2x: *i2x,
            res: mailbox.res,
            bus: Arc::clone(&mailbox.bus),
            tx: Mutex::new(TxState { ids: MsgIdTable::new(), tail }),
            async_msgs: AsyncQueue::new(),
            desync_reported: AtomicBool::new(false),
        });

        let mut worker = DrainWorker::spawn(Arc::clone(&shared)).map_err(|err| {
            log::error!("mailbox.{irq}: Create drain worker failed: {err}");
            err
        })?;

        if let Err(err) = mailbox.irqs.request(irq, shared.irq_handler(&worker.trigger)) {
            log::error!("mailbox.{irq}: Failed to request irq {irq}: {err}");
            worker.stop(irq);
            return Err(err.into());
        }

        mailbox.add_live(irq);
        log::debug!("mailbox.{irq}: Mailbox channel created (irq: {irq})");
        Ok(Self { shared, mailbox, worker, destroyed: false })
    }

    pub fn irq(&self) -> u32 {
        self.shared.irq
    }

    /// Requests waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.shared.tx.lock().ids.len()
    }

    /// Async messages queued and not yet consumed.
    pub fn async_pending(&self) -> usize {
        self.shared.async_msgs.len()
    }

    /// Writes `msg` into the outbound ring and rings the doorbell (tail register).
    ///
    /// The reply, if any, is delivered through `msg.notify` on the drain worker. On error the
    /// callback is dropped without being called. `tx_timeout` is accepted for callers that track
    /// deadlines themselves; nothing in the mailbox enforces it.
    pub fn send_msg(&self, msg: MailboxMsg<'_>, tx_timeout: Duration) -> Result<MsgId> {
        let irq = self.shared.irq;
        let pkg_size = HEADER_SIZE + msg.payload.len();
        let ring_size = self.shared.x2i.rb_size;

        if pkg_size > ring_size as usize {
            log::error!("mailbox.{irq}: Message size larger than ringbuf size");
            return Err(Error::InvalidSize(SizeError::TooLarge { pkg_size, ring_size }));
        }
        if msg.payload.len() % WORD != 0 {
            log::error!("mailbox.{irq}: Message must be 4 bytes align");
            return Err(Error::InvalidSize(SizeError::Unaligned(msg.payload.len())));
        }
        if first_word(msg.payload) == Some(TOMBSTONE) {
            log::error!("mailbox.{irq}: Tomb stone in data");
            return Err(Error::InvalidSize(SizeError::Tombstone));
        }

        let mut pkg = Vec::new();
        pkg.try_reserve_exact(pkg_size).map_err(|_| Error::NoMemory)?;
        let mut header = MsgHeader::new(msg.opcode, 0, msg.payload.len() as u32);

        let mut guard = self.shared.tx.lock();
        let tx = &mut *guard;
        let id = tx
            .ids
            .allocate_with(|id| {
                header.id = id.raw();
                InFlight { header, handle: msg.handle, notify: msg.notify }
            })
            .map_err(|err| {
                log::error!("mailbox.{irq}: acquire msg id failed");
                err
            })?;
        pkg.extend_from_slice(&header.to_bytes());
        pkg.extend_from_slice(msg.payload);

        log::debug!(
            "mailbox.{irq}: opcode {:#x} size {} id {id} timeout {tx_timeout:?}",
            header.opcode,
            header.total_size
        );

        let ring = self.shared.tx_ring();
        let head = ring.head_reg();
        match ring.produce(head, tx.tail, &pkg) {
            Ok(new_tail) => {
                ring.set_tail_reg(new_tail);
                tx.tail = new_tail;
                log::trace!(
                    "mailbox.{irq}: set tail {new_tail:#x} opcode {:#x} id {id}",
                    header.opcode
                );
                Ok(id)
            }
            Err(err) => {
                log::debug!("mailbox.{irq}: Error in mailbox send msg: {err}");
                tx.ids.release(id);
                Err(err)
            }
        }
    }

    /// Pops the oldest device-originated message.
    pub fn wait_async_msg(&self, wait: impl Into<Wait>) -> Result<AsyncMsg> {
        self.shared.async_msgs.pop(wait.into())
    }

    /// Wakes every thread blocked in [`Channel::wait_async_msg`] with [`Error::Cancelled`].
    ///
    /// Only waiters already inside the call are affected. The interrupt is not latched: a
    /// thread that enters `wait_async_msg` afterwards blocks as usual, so a caller racing a
    /// waiter that has not parked yet must repeat the interrupt or use [`Wait::Timeout`].
    pub fn interrupt_async_waiters(&self) {
        self.shared.async_msgs.interrupt();
    }

    /// Tears the channel down. Every request still in flight gets [`Response::Cancelled`].
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let irq = self.shared.irq;

        // The interrupt goes first so nothing can schedule the worker while it is stopping.
        if let Err(err) = self.mailbox.irqs.free(irq) {
            log::warn!("mailbox.{irq}: free irq failed: {err}");
        }
        self.worker.stop(irq);

        let records = self.shared.tx.lock().ids.drain();
        for (id, record) in records {
            log::debug!("mailbox.{irq}: msg_id {id} msg opcode {:#x}", record.header.opcode);
            record.complete(Response::Cancelled);
        }
        let dropped = self.shared.async_msgs.close();

        self.mailbox.remove_live(irq);
        log::debug!(
            "mailbox.{irq}: Mailbox channel destroyed, irq: {irq}, {} async msgs dropped",
            dropped.len()
        );
    }
}

impl<B: Bus + 'static, C: IrqChip + 'static> Drop for Channel<B, C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn trigger_coalesces() {
        let trigger = DrainTrigger::default();
        assert!(trigger.schedule());
        assert!(!trigger.schedule());
        assert!(trigger.next());
        assert!(trigger.schedule());
    }

    #[test]
    fn trigger_runs_pending_before_shutdown() {
        let trigger = DrainTrigger::default();
        trigger.schedule();
        trigger.shutdown();
        assert!(!trigger.schedule());
        assert!(trigger.next());
        assert!(!trigger.next());
    }

    #[test]
    fn complete_hands_back_handle() {
        let seen = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&seen);
        let record = InFlight {
            header: MsgHeader::new(1, 0, 0),
            handle: 42,
            notify: Some(Box::new(move |handle, response| {
                assert_eq!(response, Response::Cancelled);
                probe.store(handle as usize, Ordering::SeqCst);
            })),
        };
        record.complete(Response::Cancelled);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }
}
