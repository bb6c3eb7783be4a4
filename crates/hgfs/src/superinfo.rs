//! Per-mount state and the submit/wait/wake coordinator.
//!
//! [`SuperInfo`] is created by [`SuperInfo::mount`] and lives until unmount.
//! It owns the request pool, the file table with its root entry, and the
//! transport. The transport sits inside the submission mutex: every
//! transport call, every transition out of SUBMITTED and every wake happens
//! with that mutex held, which orders a completion before the wake that
//! follows it and keeps a waiter from missing either.
//!
//! Lock order: submission mutex, then free-list mutex. The free-list mutex is
//! never held while waiting on a request.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::config::MountOptions;
use crate::error::{HgfsError, HgfsResult};
use crate::files::{FileHandle, FileTable, FileType};
use crate::interrupt::Interrupt;
use crate::proto::{self, HgfsOp};
use crate::request::{Request, RequestPool, RequestState};
use crate::transport::{Completions, Outcome, RequestRef, Ticket, Transport};

/// Path of the root entry held for the lifetime of the mount.
pub const ROOT_PATH: &str = "/";

pub(crate) struct Submission {
    unmounted: bool,
    transport: Box<dyn Transport>,
}

/// State shared with transports through [`Completions`].
pub(crate) struct Shared {
    submission: Mutex<Submission>,
    pool: RequestPool,
}

impl Shared {
    pub(crate) fn complete(&self, ticket: Ticket, outcome: Outcome<'_>) -> bool {
        let _submission = self.submission.lock();
        let pool = self.pool.inner();
        let Some(slot) = pool.slot(ticket.id) else {
            log::warn!("hgfs: completion for unknown request {}", ticket.id);
            return false;
        };
        if slot.generation() != ticket.generation {
            log::warn!(
                "hgfs: stale completion for request {} (generation {} != {})",
                ticket.id,
                ticket.generation,
                slot.generation()
            );
            return false;
        }
        match slot.state() {
            RequestState::Submitted => {
                slot.finish(ticket.id, outcome);
                slot.cv.notify_all();
                true
            }
            RequestState::Abandoned => {
                log::debug!(
                    "hgfs: request {} completed after its waiter left",
                    ticket.id
                );
                pool.recycle(ticket.id);
                true
            }
            state => {
                log::warn!(
                    "hgfs: completion for request {} in state {:?} ignored",
                    ticket.id,
                    state
                );
                false
            }
        }
    }

    /// Wake the thread waiting on request `id`.
    pub(crate) fn wake_waiter(&self, id: u32) {
        let _submission = self.submission.lock();
        if let Some(slot) = self.pool.inner().slot(id) {
            slot.cv.notify_all();
        }
    }

    /// Force every outstanding submission to a terminal state.
    ///
    /// SUBMITTED requests go through the transport's cancel hook and end in
    /// ERROR at the latest here, waking their waiters. ABANDONED requests
    /// have no waiter and are recycled.
    fn cancel_all(&self, submission: &mut MutexGuard<'_, Submission>) {
        let pool = self.pool.inner();
        for id in 0..pool.len() as u32 {
            let Some(slot) = pool.slot(id) else {
                continue;
            };
            match slot.state() {
                RequestState::Submitted => {
                    log::warn!("hgfs: cancelling in-flight request {}", id);
                    submission.transport.cancel(RequestRef::new(slot, id));
                    slot.fail(HgfsError::NoDevice);
                    slot.cv.notify_all();
                }
                RequestState::Abandoned => {
                    submission.transport.cancel(RequestRef::new(slot, id));
                    pool.recycle(id);
                }
                _ => {}
            }
        }
    }
}

/// One mounted HGFS file system.
pub struct SuperInfo {
    shared: Arc<Shared>,
    files: FileTable,
    root: FileHandle,
}

impl SuperInfo {
    /// Mount over `transport`.
    pub fn mount<T: Transport + 'static>(transport: T, options: MountOptions) -> HgfsResult<Self> {
        options.validate()?;
        let name = transport.name();
        let shared = Arc::new(Shared {
            submission: Mutex::new(Submission {
                unmounted: false,
                transport: Box::new(transport),
            }),
            pool: RequestPool::new(options.pool_size),
        });
        {
            let mut submission = shared.submission.lock();
            if !submission.transport.init(Completions::new(&shared)) {
                log::error!("hgfs: {} transport failed to initialize", name);
                return Err(HgfsError::Io);
            }
        }
        let files = FileTable::new();
        let root = files.get_or_create(ROOT_PATH, FileType::Directory);
        log::info!(
            "hgfs: mounted over {} transport, {} request slot(s)",
            name,
            options.pool_size
        );
        Ok(Self {
            shared,
            files,
            root,
        })
    }

    pub fn pool(&self) -> &RequestPool {
        &self.shared.pool
    }

    pub fn files(&self) -> &FileTable {
        &self.files
    }

    pub fn root(&self) -> &FileHandle {
        &self.root
    }

    pub fn is_mounted(&self) -> bool {
        !self.shared.submission.lock().unmounted
    }

    /// Submit `request` and block until it is finished.
    ///
    /// On success the reply is in the request's packet. On
    /// [`HgfsError::Interrupted`] the request is left to whoever finishes it
    /// and the handle is detached; dropping it is still required and does
    /// nothing further.
    pub fn submit_and_wait(&self, request: &mut Request, intr: &Interrupt) -> HgfsResult<()> {
        if request.is_detached() || !Arc::ptr_eq(request.pool(), self.shared.pool.inner()) {
            return Err(HgfsError::InvalidArgument);
        }
        let id = request.id();
        let Some(slot) = self.shared.pool.inner().slot(id) else {
            return Err(HgfsError::InvalidArgument);
        };

        let mut submission = self.shared.submission.lock();
        if submission.unmounted {
            return Err(HgfsError::NoDevice);
        }
        if !slot.transition(RequestState::Allocated, RequestState::Submitted) {
            log::error!(
                "hgfs: request {} submitted in state {:?}",
                id,
                slot.state()
            );
            return Err(HgfsError::InvalidArgument);
        }
        let generation = slot.bump_generation();
        {
            let packet = slot.packet();
            log::trace!(
                "hgfs: submit request {} gen {} ({} bytes)",
                id,
                generation,
                packet.len()
            );
            proto::dump("request", id, packet.bytes());
        }

        if let Err(err) = submission.transport.send(RequestRef::new(slot, id)) {
            slot.fail(err);
        }

        loop {
            match slot.state() {
                RequestState::Completed => return Ok(()),
                RequestState::Error => return Err(slot.fault().unwrap_or(HgfsError::Io)),
                RequestState::Submitted => {}
                state => {
                    log::error!("hgfs: request {} in state {:?} while waiting", id, state);
                    return Err(HgfsError::Io);
                }
            }
            if intr.is_raised() {
                slot.transition(RequestState::Submitted, RequestState::Abandoned);
                request.detach();
                log::debug!("hgfs: request {} abandoned by interrupt", id);
                return Err(HgfsError::Interrupted);
            }
            let shared = Arc::downgrade(&self.shared);
            let _parked = intr.park(Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.wake_waiter(id);
                }
            }));
            if intr.is_raised() {
                continue;
            }
            slot.cv.wait(&mut submission);
        }
    }

    /// Acquire, populate, submit and release in one call.
    ///
    /// Returns the reply payload following the reply header. `min_reply`
    /// includes the header.
    pub fn transact(
        &self,
        op: HgfsOp,
        payload: &[u8],
        min_reply: usize,
        intr: &Interrupt,
    ) -> HgfsResult<Vec<u8>> {
        let mut request = self.pool().acquire(intr)?;
        request.prepare(op, payload)?;
        self.submit_and_wait(&mut request, intr)?;
        request.reply(min_reply)
    }

    /// Tear the mount down.
    ///
    /// Fails with [`HgfsError::Busy`] while any file other than the root is
    /// referenced. Otherwise new submissions are refused, every in-flight
    /// request is cancelled and the transport is cleaned up.
    pub fn unmount(&self) -> HgfsResult<()> {
        if !self.files.is_empty(&self.root) {
            log::warn!("hgfs: unmount refused, files still open");
            self.files.dump();
            return Err(HgfsError::Busy);
        }
        self.teardown()
    }

    fn teardown(&self) -> HgfsResult<()> {
        let mut submission = self.shared.submission.lock();
        if submission.unmounted {
            return Err(HgfsError::NoDevice);
        }
        submission.unmounted = true;
        self.shared.cancel_all(&mut submission);
        submission.transport.cleanup();
        log::info!(
            "hgfs: unmounted {} transport",
            submission.transport.name()
        );
        Ok(())
    }
}

impl Drop for SuperInfo {
    fn drop(&mut self) {
        if self.is_mounted() {
            log::warn!("hgfs: super info dropped while mounted, tearing down");
            let _ = self.teardown();
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{ReplyHeader, HgfsStatus, REPLY_HEADER_LEN};

    /// Answers every request inline with an empty success reply.
    struct EchoTransport {
        fail_init: bool,
    }

    impl Transport for EchoTransport {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn init(&mut self, _completions: Completions) -> bool {
            !self.fail_init
        }

        fn cleanup(&mut self) {}

        fn send(&mut self, request: RequestRef<'_>) -> HgfsResult<()> {
            let mut reply = [0u8; REPLY_HEADER_LEN];
            ReplyHeader::new(request.id(), HgfsStatus::Success).encode_into(&mut reply)?;
            request.complete(Outcome::Reply(&reply));
            Ok(())
        }

        fn cancel(&mut self, _request: RequestRef<'_>) {}
    }

    fn mount() -> SuperInfo {
        SuperInfo::mount(EchoTransport { fail_init: false }, MountOptions::default()).unwrap()
    }

    #[test]
    fn mount_holds_root() {
        let sip = mount();
        assert!(sip.is_mounted());
        assert_eq!(sip.root().path(), ROOT_PATH);
        assert_eq!(sip.root().refcount(), 1);
        assert_eq!(sip.pool().capacity(), 4);
    }

    #[test]
    fn failed_transport_init_fails_mount() {
        let result = SuperInfo::mount(EchoTransport { fail_init: true }, MountOptions::default());
        assert_eq!(result.err(), Some(HgfsError::Io));
    }

    #[test]
    fn invalid_options_fail_mount() {
        let result = SuperInfo::mount(
            EchoTransport { fail_init: false },
            MountOptions::default().with_pool_size(0),
        );
        assert_eq!(result.err(), Some(HgfsError::InvalidArgument));
    }

    #[test]
    fn inline_completion_round_trip() {
        let sip = mount();
        let reply = sip
            .transact(HgfsOp::QueryVolumeInfo, &[], REPLY_HEADER_LEN, &Interrupt::new())
            .unwrap();
        assert!(reply.is_empty());
        assert_eq!(sip.pool().outstanding(), 0);
    }

    #[test]
    fn resubmitting_a_finished_request_is_rejected() {
        let sip = mount();
        let intr = Interrupt::new();
        let mut req = sip.pool().acquire(&intr).unwrap();
        req.prepare(HgfsOp::GetAttr, b"/").unwrap();
        sip.submit_and_wait(&mut req, &intr).unwrap();
        assert_eq!(
            sip.submit_and_wait(&mut req, &intr),
            Err(HgfsError::InvalidArgument)
        );
    }

    #[test]
    fn request_from_another_mount_is_rejected() {
        let a = mount();
        let b = mount();
        let intr = Interrupt::new();
        let mut req = a.pool().acquire(&intr).unwrap();
        assert_eq!(
            b.submit_and_wait(&mut req, &intr),
            Err(HgfsError::InvalidArgument)
        );
    }

    #[test]
    fn unmount_refused_while_files_open() {
        let sip = mount();
        let file = sip.files().get_or_create("/open.txt", FileType::Regular);
        assert_eq!(sip.unmount(), Err(HgfsError::Busy));
        assert!(sip.is_mounted());
        drop(file);
        sip.unmount().unwrap();
        assert!(!sip.is_mounted());
        assert_eq!(sip.unmount(), Err(HgfsError::NoDevice));
    }

    #[test]
    fn submit_after_unmount_is_no_device() {
        let sip = mount();
        let intr = Interrupt::new();
        let mut req = sip.pool().acquire(&intr).unwrap();
        req.prepare(HgfsOp::GetAttr, b"/").unwrap();
        sip.unmount().unwrap();
        assert_eq!(
            sip.submit_and_wait(&mut req, &intr),
            Err(HgfsError::NoDevice)
        );
        drop(req);
        assert_eq!(sip.pool().outstanding(), 0);
    }
}
