//! Synchronous backdoor transport.
//!
//! Each request is copied behind the command prefix into a channel buffer,
//! dispatched as one RPC and answered before `send` returns, so the request
//! is already terminal when the coordinator starts waiting. The channel is
//! opened lazily and torn down after a failed dispatch so that the next
//! request retries the open.

use super::{Completions, Outcome, RequestRef, Transport};
use crate::error::HgfsError;
use crate::proto::MAX_PACKET;

/// Prefix that routes an RPC to the file server on the host.
pub const COMMAND_PREFIX: &[u8] = b"f ";

/// Raw RPC channel to the host.
pub trait RpcChannel: Send {
    fn open(&mut self) -> Result<(), HgfsError>;

    /// Send `request` and store the host's answer in `reply`.
    fn dispatch(&mut self, request: &[u8], reply: &mut Vec<u8>) -> Result<(), HgfsError>;

    fn close(&mut self);
}

pub struct BackdoorTransport<C: RpcChannel> {
    channel: C,
    is_open: bool,
    out: Vec<u8>,
    reply: Vec<u8>,
}

impl<C: RpcChannel> BackdoorTransport<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            is_open: false,
            out: Vec::with_capacity(COMMAND_PREFIX.len() + MAX_PACKET),
            reply: Vec::with_capacity(MAX_PACKET),
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn ensure_open(&mut self) -> Result<(), HgfsError> {
        if !self.is_open {
            self.channel.open()?;
            self.is_open = true;
            log::debug!("hgfs: backdoor channel opened");
        }
        Ok(())
    }

    fn close_channel(&mut self) {
        if self.is_open {
            self.channel.close();
            self.is_open = false;
        }
    }
}

impl<C: RpcChannel> Transport for BackdoorTransport<C> {
    fn name(&self) -> &'static str {
        "backdoor"
    }

    fn init(&mut self, _completions: Completions) -> bool {
        true
    }

    fn cleanup(&mut self) {
        self.close_channel();
    }

    fn send(&mut self, request: RequestRef<'_>) -> Result<(), HgfsError> {
        if let Err(err) = self.ensure_open() {
            log::error!("hgfs: cannot open backdoor channel: {}", err);
            request.complete(Outcome::Failed(HgfsError::Io));
            return Err(HgfsError::Io);
        }

        self.out.clear();
        self.out.extend_from_slice(COMMAND_PREFIX);
        request.with_packet(|bytes| self.out.extend_from_slice(bytes));
        self.reply.clear();

        if let Err(err) = self.channel.dispatch(&self.out, &mut self.reply) {
            log::error!(
                "hgfs: backdoor dispatch for request {} failed: {}",
                request.id(),
                err
            );
            self.close_channel();
            request.complete(Outcome::Failed(HgfsError::Io));
            return Err(HgfsError::Io);
        }

        // Oversized replies are rejected by the completion itself; the
        // channel stays usable.
        request.complete(Outcome::Reply(&self.reply));
        Ok(())
    }

    fn cancel(&mut self, _request: RequestRef<'_>) {}
}
