//! Test transports and helpers shared by the scenario tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hgfs::proto::{REPLY_HEADER_LEN, REQUEST_HEADER_LEN};
use hgfs::{
    COMMAND_PREFIX, Completions, HgfsError, HgfsStatus, Interrupt, Outcome, ReplyHeader,
    RequestHeader, RequestRef, RpcChannel, Ticket, Transport,
};

/// Build the success reply the host would send for `request`: same id,
/// payload echoed back.
pub fn echo(request: &[u8]) -> Vec<u8> {
    reply_for(request, HgfsStatus::Success)
}

pub fn reply_for(request: &[u8], status: HgfsStatus) -> Vec<u8> {
    let header = RequestHeader::decode(request).unwrap();
    let payload = &request[REQUEST_HEADER_LEN..];
    let mut reply = vec![0u8; REPLY_HEADER_LEN + payload.len()];
    ReplyHeader::new(header.id, status)
        .encode_into(&mut reply)
        .unwrap();
    reply[REPLY_HEADER_LEN..].copy_from_slice(payload);
    reply
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// Backdoor channel double
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostReply {
    Echo,
    Status(HgfsStatus),
    WrongId,
    Oversized,
}

#[derive(Clone)]
pub struct ChannelLog {
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub dispatches: Arc<AtomicUsize>,
    pub fail_opens: Arc<AtomicUsize>,
    pub fail_dispatches: Arc<AtomicUsize>,
    pub reply: Arc<Mutex<HostReply>>,
}

impl Default for ChannelLog {
    fn default() -> Self {
        Self {
            opens: Arc::default(),
            closes: Arc::default(),
            dispatches: Arc::default(),
            fail_opens: Arc::default(),
            fail_dispatches: Arc::default(),
            reply: Arc::new(Mutex::new(HostReply::Echo)),
        }
    }
}

impl ChannelLog {
    pub fn set_reply(&self, reply: HostReply) {
        *self.reply.lock().unwrap() = reply;
    }
}

/// In-process stand-in for the host's RPC endpoint.
pub struct FakeHost {
    log: ChannelLog,
}

impl FakeHost {
    pub fn new() -> (Self, ChannelLog) {
        let log = ChannelLog::default();
        (Self { log: log.clone() }, log)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl RpcChannel for FakeHost {
    fn open(&mut self) -> Result<(), HgfsError> {
        if take_one(&self.log.fail_opens) {
            return Err(HgfsError::Io);
        }
        self.log.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dispatch(&mut self, request: &[u8], reply: &mut Vec<u8>) -> Result<(), HgfsError> {
        self.log.dispatches.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.log.fail_dispatches) {
            return Err(HgfsError::Io);
        }
        let packet = request.strip_prefix(COMMAND_PREFIX).unwrap();
        let mode = *self.log.reply.lock().unwrap();
        match mode {
            HostReply::Echo => reply.extend_from_slice(&echo(packet)),
            HostReply::Status(status) => reply.extend_from_slice(&reply_for(packet, status)),
            HostReply::WrongId => {
                let mut bytes = echo(packet);
                bytes[0] = bytes[0].wrapping_add(1);
                reply.extend_from_slice(&bytes);
            }
            HostReply::Oversized => reply.resize(hgfs::MAX_PACKET + 1, 0),
        }
        Ok(())
    }

    fn close(&mut self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Asynchronous transports
// ============================================================================

/// Completes every request from a fresh thread after `delay`, optionally
/// raising an interrupt once the completion is in.
pub struct Threaded {
    completions: Option<Completions>,
    delay: Duration,
    raise_after: Option<Interrupt>,
}

impl Threaded {
    pub fn new(delay: Duration) -> Self {
        Self {
            completions: None,
            delay,
            raise_after: None,
        }
    }

    pub fn raising(mut self, intr: Interrupt) -> Self {
        self.raise_after = Some(intr);
        self
    }
}

impl Transport for Threaded {
    fn name(&self) -> &'static str {
        "threaded"
    }

    fn init(&mut self, completions: Completions) -> bool {
        self.completions = Some(completions);
        true
    }

    fn cleanup(&mut self) {
        self.completions = None;
    }

    fn send(&mut self, request: RequestRef<'_>) -> Result<(), HgfsError> {
        let completions = self.completions.clone().ok_or(HgfsError::Io)?;
        let ticket = request.ticket();
        let packet = request.with_packet(<[u8]>::to_vec);
        let delay = self.delay;
        let raise = self.raise_after.clone();
        thread::spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            completions.complete(ticket, Outcome::Reply(&echo(&packet)));
            if let Some(intr) = raise {
                intr.raise();
            }
        });
        Ok(())
    }

    fn cancel(&mut self, _request: RequestRef<'_>) {}
}

#[derive(Default)]
pub struct ManualState {
    completions: Mutex<Option<Completions>>,
    sent: Mutex<Vec<(Ticket, Vec<u8>)>>,
    pub cancelled: AtomicUsize,
    pub cleaned_up: AtomicBool,
}

/// Queues every request and completes only when the test says so.
#[derive(Clone, Default)]
pub struct Manual {
    pub state: Arc<ManualState>,
}

impl Manual {
    pub fn sent(&self) -> usize {
        self.state.sent.lock().unwrap().len()
    }

    pub fn ticket(&self, index: usize) -> Ticket {
        self.state.sent.lock().unwrap()[index].0
    }

    /// Answer the `index`th submission with an echo reply.
    pub fn answer(&self, index: usize) -> bool {
        let (ticket, packet) = self.state.sent.lock().unwrap()[index].clone();
        let completions = self.state.completions.lock().unwrap().clone().unwrap();
        completions.complete(ticket, Outcome::Reply(&echo(&packet)))
    }
}

impl Transport for Manual {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn init(&mut self, completions: Completions) -> bool {
        *self.state.completions.lock().unwrap() = Some(completions);
        true
    }

    fn cleanup(&mut self) {
        self.state.cleaned_up.store(true, Ordering::SeqCst);
    }

    fn send(&mut self, request: RequestRef<'_>) -> Result<(), HgfsError> {
        let packet = request.with_packet(<[u8]>::to_vec);
        self.state
            .sent
            .lock()
            .unwrap()
            .push((request.ticket(), packet));
        Ok(())
    }

    fn cancel(&mut self, _request: RequestRef<'_>) {
        self.state.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}
