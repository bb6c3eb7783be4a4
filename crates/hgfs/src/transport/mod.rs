//! Channel abstraction between the coordinator and the host.
//!
//! A mount owns exactly one transport. The coordinator calls every
//! [`Transport`] method with the submission mutex held, so implementations
//! see a serialized stream of `send`, `cancel` and `cleanup` calls and may
//! finish requests inline through the [`RequestRef`] they are handed.
//! Transports that answer later, from another thread, keep the
//! [`Completions`] handle passed to [`Transport::init`] and finish requests
//! by [`Ticket`].

mod backdoor;
mod device;

use std::sync::{Arc, Weak};

pub use backdoor::{BackdoorTransport, COMMAND_PREFIX, RpcChannel};
pub use device::{DeviceEnd, DeviceTransport};

use crate::error::HgfsError;
use crate::request::{RequestState, Slot};
use crate::superinfo::Shared;

/// How a transport finished a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome<'a> {
    /// Raw reply bytes, header included.
    Reply(&'a [u8]),
    /// The exchange failed before a reply arrived.
    Failed(HgfsError),
}

/// Names one submission of one request.
///
/// The generation changes on every submit, so a reply that outlives its
/// submission cannot complete the slot's next user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub id: u32,
    pub generation: u64,
}

/// A submitted request as seen by a transport during `send` or `cancel`.
pub struct RequestRef<'a> {
    slot: &'a Slot,
    id: u32,
}

impl<'a> RequestRef<'a> {
    pub(crate) fn new(slot: &'a Slot, id: u32) -> Self {
        Self { slot, id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn ticket(&self) -> Ticket {
        Ticket {
            id: self.id,
            generation: self.slot.generation(),
        }
    }

    pub fn state(&self) -> RequestState {
        self.slot.state()
    }

    /// Run `f` over the outgoing packet bytes.
    pub fn with_packet<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.slot.packet().bytes())
    }

    /// Finish the request inline. Returns false if it was no longer
    /// SUBMITTED.
    pub fn complete(&self, outcome: Outcome<'_>) -> bool {
        let finished = self.slot.finish(self.id, outcome);
        if finished {
            self.slot.cv.notify_all();
        }
        finished
    }
}

/// Channel to the host used by one mount.
pub trait Transport: Send {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    /// Prepare the transport. Returning false fails the mount.
    fn init(&mut self, completions: Completions) -> bool;

    /// Release transport resources after the last request is swept.
    fn cleanup(&mut self);

    /// Start the exchange for a request that was just moved to SUBMITTED.
    ///
    /// On failure the request must be left in ERROR (or still SUBMITTED, in
    /// which case the coordinator fails it with the returned error).
    fn send(&mut self, request: RequestRef<'_>) -> Result<(), HgfsError>;

    /// Abort an exchange at teardown. Should move a SUBMITTED request to a
    /// terminal state; the coordinator forces ERROR if it does not.
    fn cancel(&mut self, request: RequestRef<'_>);
}

/// Handle for finishing requests from outside the coordinator.
///
/// Holds the mount weakly; completions that arrive after the mount is gone
/// are dropped.
#[derive(Clone)]
pub struct Completions {
    shared: Weak<Shared>,
}

impl core::fmt::Debug for Completions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completions")
            .field("mounted", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl Completions {
    pub(crate) fn new(shared: &Arc<Shared>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
        }
    }

    /// Finish the submission named by `ticket`.
    ///
    /// A SUBMITTED request takes the outcome and its waiter is woken. An
    /// ABANDONED request is recycled, since its waiter has gone. Anything
    /// else is a stale completion and is dropped. Returns whether the
    /// completion was consumed.
    pub fn complete(&self, ticket: Ticket, outcome: Outcome<'_>) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            log::warn!("hgfs: completion for request {} after unmount", ticket.id);
            return false;
        };
        shared.complete(ticket, outcome)
    }
}
