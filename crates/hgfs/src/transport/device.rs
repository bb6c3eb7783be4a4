//! Device transport served by a user-level daemon.
//!
//! `send` queues a copy of the request packet and returns at once. The
//! daemon pulls packets through [`DeviceEnd::read_request`] and pushes
//! answers through [`DeviceEnd::write_reply`], which completes the request
//! from the daemon's thread. Replies are matched by request id and the
//! submission generation recorded when the daemon read the packet.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use hgfs_utils::HashMap;
use parking_lot::{Condvar, Mutex};

use super::{Completions, Outcome, RequestRef, Ticket, Transport};
use crate::error::{HgfsError, HgfsResult};
use crate::interrupt::Interrupt;
use crate::proto::MAX_PACKET;

struct Queued {
    ticket: Ticket,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct DeviceState {
    open: bool,
    shut_down: bool,
    queue: VecDeque<Queued>,
    /// Read by the daemon, awaiting a reply. Keyed by request id.
    in_flight: HashMap<u32, u64>,
    completions: Option<Completions>,
}

impl DeviceState {
    /// Remove every queued and in-flight submission.
    fn drain(&mut self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self.queue.drain(..).map(|q| q.ticket).collect();
        tickets.extend(
            self.in_flight
                .drain()
                .map(|(id, generation)| Ticket { id, generation }),
        );
        tickets
    }
}

#[derive(Default)]
struct DeviceShared {
    state: Mutex<DeviceState>,
    readable: Condvar,
}

/// Mount side of the device.
pub struct DeviceTransport {
    shared: Arc<DeviceShared>,
}

/// Daemon side of the device.
#[derive(Clone)]
pub struct DeviceEnd {
    shared: Arc<DeviceShared>,
}

impl DeviceTransport {
    /// Create a connected transport and daemon endpoint pair.
    pub fn new() -> (Self, DeviceEnd) {
        let shared = Arc::new(DeviceShared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            DeviceEnd { shared },
        )
    }
}

impl Transport for DeviceTransport {
    fn name(&self) -> &'static str {
        "device"
    }

    fn init(&mut self, completions: Completions) -> bool {
        let mut state = self.shared.state.lock();
        state.shut_down = false;
        state.completions = Some(completions);
        true
    }

    fn cleanup(&mut self) {
        let mut state = self.shared.state.lock();
        state.shut_down = true;
        state.completions = None;
        let dropped = state.drain();
        if !dropped.is_empty() {
            log::warn!(
                "hgfs: device cleanup dropped {} pending packet(s)",
                dropped.len()
            );
        }
        self.shared.readable.notify_all();
    }

    fn send(&mut self, request: RequestRef<'_>) -> Result<(), HgfsError> {
        let mut state = self.shared.state.lock();
        if !state.open {
            log::error!(
                "hgfs: no daemon attached, failing request {}",
                request.id()
            );
            drop(state);
            request.complete(Outcome::Failed(HgfsError::Io));
            return Err(HgfsError::Io);
        }
        let bytes = request.with_packet(<[u8]>::to_vec);
        state.queue.push_back(Queued {
            ticket: request.ticket(),
            bytes,
        });
        self.shared.readable.notify_all();
        Ok(())
    }

    fn cancel(&mut self, request: RequestRef<'_>) {
        let id = request.id();
        {
            let mut state = self.shared.state.lock();
            state.queue.retain(|q| q.ticket.id != id);
            state.in_flight.remove(&id);
        }
        request.complete(Outcome::Failed(HgfsError::NoDevice));
    }
}

impl DeviceEnd {
    /// Attach the daemon. Only one daemon may be attached at a time.
    pub fn open(&self) -> HgfsResult<()> {
        let mut state = self.shared.state.lock();
        if state.shut_down {
            return Err(HgfsError::NoDevice);
        }
        if state.open {
            return Err(HgfsError::Busy);
        }
        state.open = true;
        log::info!("hgfs: daemon attached to device");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Block until a request packet is queued and take it.
    pub fn read_request(&self, intr: &Interrupt) -> HgfsResult<Vec<u8>> {
        let mut state = self.shared.state.lock();
        loop {
            if !state.open || state.shut_down {
                return Err(HgfsError::NoDevice);
            }
            if let Some(queued) = state.queue.pop_front() {
                state
                    .in_flight
                    .insert(queued.ticket.id, queued.ticket.generation);
                return Ok(queued.bytes);
            }
            if intr.is_raised() {
                return Err(HgfsError::Interrupted);
            }
            let shared: Weak<DeviceShared> = Arc::downgrade(&self.shared);
            let _parked = intr.park(Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    let _state = shared.state.lock();
                    shared.readable.notify_all();
                }
            }));
            if intr.is_raised() {
                return Err(HgfsError::Interrupted);
            }
            self.shared.readable.wait(&mut state);
        }
    }

    /// Hand a reply packet to the request it answers.
    ///
    /// Replies for requests that are no longer in flight are dropped.
    pub fn write_reply(&self, reply: &[u8]) -> HgfsResult<()> {
        if reply.len() > MAX_PACKET {
            return Err(HgfsError::InvalidArgument);
        }
        let Some(id) = reply_id(reply) else {
            return Err(HgfsError::InvalidArgument);
        };
        let (ticket, completions) = {
            let mut state = self.shared.state.lock();
            if !state.open {
                return Err(HgfsError::NoDevice);
            }
            let Some(generation) = state.in_flight.remove(&id) else {
                log::warn!("hgfs: dropping reply for request {} not in flight", id);
                return Ok(());
            };
            (Ticket { id, generation }, state.completions.clone())
        };
        // Completing takes the submission mutex; the device lock is released
        // first to keep submission -> device ordering.
        match completions {
            Some(completions) => {
                if !completions.complete(ticket, Outcome::Reply(reply)) {
                    log::warn!("hgfs: stale reply for request {} dropped", id);
                }
            }
            None => log::warn!("hgfs: reply for request {} after cleanup", id),
        }
        Ok(())
    }

    /// Detach the daemon. Every queued and in-flight request fails with
    /// [`HgfsError::NoDevice`].
    pub fn close(&self) {
        let (tickets, completions) = {
            let mut state = self.shared.state.lock();
            if !state.open {
                return;
            }
            state.open = false;
            (state.drain(), state.completions.clone())
        };
        self.shared.readable.notify_all();
        log::info!(
            "hgfs: daemon detached, failing {} request(s)",
            tickets.len()
        );
        if let Some(completions) = completions {
            for ticket in tickets {
                completions.complete(ticket, Outcome::Failed(HgfsError::NoDevice));
            }
        }
    }
}

fn reply_id(reply: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = reply.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}
