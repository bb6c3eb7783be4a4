//! Request pool and per-request state machine.
//!
//! The pool is a fixed slab of slots indexed by request id, preallocated at
//! mount. Unused ids sit on a free list guarded by its own mutex; acquiring
//! blocks on the free-list condvar until an id comes back.
//!
//! ```text
//! UNUSED -> ALLOCATED -> SUBMITTED -> { COMPLETED | ERROR | ABANDONED }
//!    ^                                            |
//!    +--------------- recycle --------------------+
//! ```
//!
//! Transitions out of SUBMITTED are made under the mount's submission mutex.
//! Exactly one party recycles a slot: the handle owner for COMPLETED and
//! ERROR, the completion or the unmount sweep for ABANDONED.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use hgfs_utils::{Mutex, MutexGuard};
use parking_lot::Condvar;

use crate::error::{HgfsError, HgfsResult};
use crate::interrupt::Interrupt;
use crate::proto::{
    self, HgfsOp, HgfsStatus, MAX_PACKET, REPLY_HEADER_LEN, REQUEST_HEADER_LEN, ReplyHeader,
    RequestHeader,
};
use crate::transport::Outcome;

/// Lifecycle state of a request slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Unused = 0,
    Allocated = 1,
    Submitted = 2,
    Completed = 3,
    Error = 4,
    Abandoned = 5,
}

impl RequestState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Unused,
            1 => Self::Allocated,
            2 => Self::Submitted,
            3 => Self::Completed,
            4 => Self::Error,
            _ => Self::Abandoned,
        }
    }

    /// States from which a slot may return to the free list.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Abandoned)
    }
}

/// Packet buffer of one request. Holds the outgoing request until the
/// transport replies, then the reply.
pub struct Packet {
    buf: Box<[u8]>,
    len: usize,
    fault: Option<HgfsError>,
}

impl Packet {
    fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_PACKET].into_boxed_slice(),
            len: 0,
            fault: None,
        }
    }

    fn zero(&mut self) {
        self.buf.fill(0);
        self.len = 0;
        self.fault = None;
    }

    /// Write the request header and `payload`.
    pub fn prepare(&mut self, id: u32, op: HgfsOp, payload: &[u8]) -> HgfsResult<()> {
        let total = REQUEST_HEADER_LEN + payload.len();
        if total > MAX_PACKET {
            log::warn!(
                "hgfs: {:?} payload of {} bytes does not fit a packet",
                op,
                payload.len()
            );
            return Err(HgfsError::InvalidArgument);
        }
        RequestHeader::new(id, op).encode_into(&mut self.buf)?;
        self.buf[REQUEST_HEADER_LEN..total].copy_from_slice(payload);
        self.len = total;
        Ok(())
    }

    /// Replace the contents with a reply received from the host.
    pub(crate) fn fill(&mut self, reply: &[u8]) -> HgfsResult<()> {
        let dst = self.buf.get_mut(..reply.len()).ok_or(HgfsError::Protocol)?;
        dst.copy_from_slice(reply);
        self.len = reply.len();
        Ok(())
    }

    /// Valid bytes: the request before completion, the reply after.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Failure recorded when the request went to ERROR.
    pub fn fault(&self) -> Option<HgfsError> {
        self.fault
    }
}

pub(crate) struct Slot {
    state: AtomicU8,
    generation: AtomicU64,
    packet: Mutex<Packet>,
    /// Waited on with the mount's submission mutex only.
    pub(crate) cv: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(RequestState::Unused as u8),
            generation: AtomicU64::new(0),
            packet: Mutex::new(Packet::new()),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> RequestState {
        RequestState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RequestState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Compare-and-transition. Returns whether the slot was in `from`.
    pub(crate) fn transition(&self, from: RequestState, to: RequestState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Start a new submission; returns its generation.
    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn packet(&self) -> MutexGuard<'_, Packet> {
        self.packet.lock()
    }

    pub(crate) fn fault(&self) -> Option<HgfsError> {
        self.packet.lock().fault
    }

    /// Move SUBMITTED to ERROR with `fault`. No-op in any other state.
    pub(crate) fn fail(&self, fault: HgfsError) -> bool {
        if !self.transition(RequestState::Submitted, RequestState::Error) {
            return false;
        }
        self.packet.lock().fault = Some(fault);
        true
    }

    /// Apply a transport outcome to a SUBMITTED request.
    ///
    /// Must be called with the submission mutex held. A reply that is too
    /// large, lacks a header or answers a different id turns the request into
    /// a protocol error.
    pub(crate) fn finish(&self, id: u32, outcome: Outcome<'_>) -> bool {
        if self.state() != RequestState::Submitted {
            return false;
        }
        let reply = match outcome {
            Outcome::Reply(reply) => reply,
            Outcome::Failed(fault) => return self.fail(fault),
        };
        if reply.len() > MAX_PACKET {
            log::warn!(
                "hgfs: request {} reply of {} bytes exceeds packet maximum",
                id,
                reply.len()
            );
            return self.fail(HgfsError::Protocol);
        }
        let header = {
            let mut packet = self.packet.lock();
            packet.fill(reply).and_then(|()| ReplyHeader::decode(packet.bytes()))
        };
        match header {
            Ok(header) if header.id == id => {
                proto::dump("reply", id, reply);
                self.transition(RequestState::Submitted, RequestState::Completed)
            }
            Ok(header) => {
                log::warn!("hgfs: reply id {} for request {}", header.id, id);
                self.fail(HgfsError::Protocol)
            }
            Err(err) => {
                log::warn!("hgfs: unusable reply for request {}: {}", id, err);
                self.fail(err)
            }
        }
    }
}

pub(crate) struct PoolInner {
    slots: Box<[Slot]>,
    free: parking_lot::Mutex<Vec<u32>>,
    free_cv: Condvar,
}

impl PoolInner {
    pub(crate) fn slot(&self, id: u32) -> Option<&Slot> {
        self.slots.get(id as usize)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Return a terminal slot to the free list and wake one acquirer.
    pub(crate) fn recycle(&self, id: u32) {
        let Some(slot) = self.slot(id) else {
            log::error!("hgfs: recycle of unknown request {}", id);
            return;
        };
        let state = slot.state();
        assert!(
            state.is_terminal(),
            "hgfs: request {id} recycled in state {state:?}"
        );
        slot.set_state(RequestState::Unused);
        slot.packet.lock().zero();
        self.free.lock().push(id);
        self.free_cv.notify_one();
        log::trace!("hgfs: request {} back on free list", id);
    }
}

/// Fixed set of reusable requests.
#[derive(Clone)]
pub struct RequestPool {
    inner: Arc<PoolInner>,
}

impl RequestPool {
    pub fn new(size: usize) -> Self {
        let slots: Box<[Slot]> = (0..size).map(|_| Slot::new()).collect();
        // Reverse so the first acquire hands out id 0.
        let free = (0..size as u32).rev().collect();
        Self {
            inner: Arc::new(PoolInner {
                slots,
                free: parking_lot::Mutex::new(free),
                free_cv: Condvar::new(),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<PoolInner> {
        &self.inner
    }

    pub fn capacity(&self) -> usize {
        self.inner.len()
    }

    /// Requests not on the free list.
    pub fn outstanding(&self) -> usize {
        self.inner.len() - self.inner.free.lock().len()
    }

    /// State of request `id`, if it exists.
    pub fn state(&self, id: u32) -> Option<RequestState> {
        self.inner.slot(id).map(Slot::state)
    }

    /// Take a request off the free list, blocking until one is available.
    ///
    /// Returns [`HgfsError::Interrupted`] if `intr` is raised while waiting.
    pub fn acquire(&self, intr: &Interrupt) -> HgfsResult<Request> {
        let mut free = self.inner.free.lock();
        loop {
            if let Some(id) = free.pop() {
                drop(free);
                return Ok(self.allocate(id));
            }
            if intr.is_raised() {
                return Err(HgfsError::Interrupted);
            }
            let pool = Arc::downgrade(&self.inner);
            let _parked = intr.park(Box::new(move || {
                if let Some(pool) = pool.upgrade() {
                    let _free = pool.free.lock();
                    pool.free_cv.notify_all();
                }
            }));
            if intr.is_raised() {
                return Err(HgfsError::Interrupted);
            }
            log::trace!("hgfs: request pool exhausted, waiting");
            self.inner.free_cv.wait(&mut free);
            if intr.is_raised() && !free.is_empty() {
                // The notify may have been meant for us; hand it on.
                self.inner.free_cv.notify_one();
            }
        }
    }

    fn allocate(&self, id: u32) -> Request {
        if let Some(slot) = self.inner.slot(id) {
            let claimed = slot.transition(RequestState::Unused, RequestState::Allocated);
            assert!(claimed, "hgfs: free list held busy request {id}");
            slot.packet.lock().zero();
        }
        log::trace!("hgfs: request {} allocated", id);
        Request {
            pool: Arc::clone(&self.inner),
            id,
            attached: true,
        }
    }

    /// Give a request back. Equivalent to dropping it.
    pub fn release(&self, request: Request) {
        debug_assert!(Arc::ptr_eq(&self.inner, &request.pool));
        drop(request);
    }
}

/// Exclusive handle to one allocated request.
///
/// Dropping the handle releases the request. After an interrupted wait the
/// handle is detached: the slot belongs to whoever finishes it and the handle
/// no longer gives access to it.
pub struct Request {
    pool: Arc<PoolInner>,
    id: u32,
    attached: bool,
}

impl core::fmt::Debug for Request {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("attached", &self.attached)
            .finish()
    }
}

impl Request {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.slot().map_or(RequestState::Unused, Slot::state)
    }

    pub fn is_detached(&self) -> bool {
        !self.attached
    }

    pub(crate) fn pool(&self) -> &Arc<PoolInner> {
        &self.pool
    }

    pub(crate) fn detach(&mut self) {
        self.attached = false;
    }

    fn slot(&self) -> Option<&Slot> {
        self.pool.slot(self.id)
    }

    fn attached_slot(&self) -> HgfsResult<&Slot> {
        if !self.attached {
            return Err(HgfsError::InvalidArgument);
        }
        self.slot().ok_or(HgfsError::InvalidArgument)
    }

    /// Populate the request with `op` and its payload.
    pub fn prepare(&mut self, op: HgfsOp, payload: &[u8]) -> HgfsResult<()> {
        let slot = self.attached_slot()?;
        if slot.state() != RequestState::Allocated {
            return Err(HgfsError::InvalidArgument);
        }
        slot.packet().prepare(self.id, op, payload)
    }

    /// Lock the packet buffer.
    pub fn packet(&self) -> HgfsResult<MutexGuard<'_, Packet>> {
        Ok(self.attached_slot()?.packet())
    }

    fn completed_packet(&self) -> HgfsResult<MutexGuard<'_, Packet>> {
        let slot = self.attached_slot()?;
        match slot.state() {
            RequestState::Completed => Ok(slot.packet()),
            RequestState::Error => Err(slot.fault().unwrap_or(HgfsError::Io)),
            _ => Err(HgfsError::InvalidArgument),
        }
    }

    /// Host status of a completed request.
    pub fn reply_status(&self) -> HgfsResult<HgfsStatus> {
        let packet = self.completed_packet()?;
        Ok(ReplyHeader::decode(packet.bytes())?.status)
    }

    /// Validate the reply and copy out the bytes following its header.
    ///
    /// `min_size` includes the reply header.
    pub fn reply(&self, min_size: usize) -> HgfsResult<Vec<u8>> {
        let packet = self.completed_packet()?;
        proto::validate_reply(packet.bytes(), self.id, min_size)?;
        Ok(packet.bytes()[REPLY_HEADER_LEN..].to_vec())
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        let Some(slot) = self.slot() else {
            return;
        };
        match slot.state() {
            RequestState::Allocated => {
                slot.set_state(RequestState::Error);
                self.pool.recycle(self.id);
            }
            RequestState::Completed | RequestState::Error => self.pool.recycle(self.id),
            state => {
                log::error!("hgfs: request {} dropped in state {:?}", self.id, state);
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
