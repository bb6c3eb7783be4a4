//! Backdoor and device transport behaviour seen through a mount.

mod common;

use std::sync::atomic::Ordering;
use std::thread;

use common::{FakeHost, HostReply, echo};
use hgfs::proto::REPLY_HEADER_LEN;
use hgfs::{
    BackdoorTransport, DeviceTransport, Errno, HgfsError, HgfsOp, HgfsStatus, Interrupt,
    MountOptions, RequestHeader, SuperInfo,
};

fn transact(sip: &SuperInfo, payload: &[u8]) -> hgfs::HgfsResult<Vec<u8>> {
    sip.transact(HgfsOp::Read, payload, REPLY_HEADER_LEN, &Interrupt::new())
}

// ============================================================================
// Backdoor
// ============================================================================

#[test]
fn backdoor_opens_channel_lazily_and_closes_at_unmount() {
    let (host, log) = FakeHost::new();
    let sip = SuperInfo::mount(BackdoorTransport::new(host), MountOptions::default()).unwrap();
    assert_eq!(log.opens.load(Ordering::SeqCst), 0);

    assert_eq!(transact(&sip, b"abc").unwrap(), b"abc");
    assert_eq!(transact(&sip, b"def").unwrap(), b"def");
    assert_eq!(log.opens.load(Ordering::SeqCst), 1);
    assert_eq!(log.dispatches.load(Ordering::SeqCst), 2);

    sip.unmount().unwrap();
    assert_eq!(log.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn backdoor_open_failure_is_io_and_retried() {
    let (host, log) = FakeHost::new();
    log.fail_opens.store(1, Ordering::SeqCst);
    let sip = SuperInfo::mount(BackdoorTransport::new(host), MountOptions::default()).unwrap();

    assert_eq!(transact(&sip, b"x"), Err(HgfsError::Io));
    assert_eq!(log.dispatches.load(Ordering::SeqCst), 0);
    assert_eq!(sip.pool().outstanding(), 0);

    assert_eq!(transact(&sip, b"x").unwrap(), b"x");
    assert_eq!(log.opens.load(Ordering::SeqCst), 1);
}

#[test]
fn backdoor_dispatch_failure_tears_channel_down() {
    let (host, log) = FakeHost::new();
    let sip = SuperInfo::mount(BackdoorTransport::new(host), MountOptions::default()).unwrap();
    assert!(transact(&sip, b"warm").is_ok());

    log.fail_dispatches.store(1, Ordering::SeqCst);
    let err = transact(&sip, b"lost").unwrap_err();
    assert_eq!(err, HgfsError::Io);
    assert_eq!(err.errno(), 5);
    assert_eq!(log.closes.load(Ordering::SeqCst), 1);

    assert_eq!(transact(&sip, b"again").unwrap(), b"again");
    assert_eq!(log.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn backdoor_protocol_violations() {
    let (host, log) = FakeHost::new();
    let sip = SuperInfo::mount(BackdoorTransport::new(host), MountOptions::default()).unwrap();

    log.set_reply(HostReply::Oversized);
    assert_eq!(transact(&sip, b"big"), Err(HgfsError::Protocol));
    // An oversized reply does not cost the channel.
    assert_eq!(log.closes.load(Ordering::SeqCst), 0);

    log.set_reply(HostReply::WrongId);
    let err = transact(&sip, b"who").unwrap_err();
    assert_eq!(err, HgfsError::Protocol);
    assert_eq!(err.errno(), 71);

    log.set_reply(HostReply::Echo);
    let short = sip.transact(HgfsOp::Read, b"ab", REPLY_HEADER_LEN + 16, &Interrupt::new());
    assert_eq!(short, Err(HgfsError::Protocol));
    assert_eq!(sip.pool().outstanding(), 0);
}

#[test]
fn backdoor_host_status_maps_to_errno() {
    let (host, log) = FakeHost::new();
    let sip = SuperInfo::mount(BackdoorTransport::new(host), MountOptions::default()).unwrap();

    log.set_reply(HostReply::Status(HgfsStatus::NoSuchFileOrDir));
    let err = transact(&sip, b"/missing").unwrap_err();
    assert_eq!(err, HgfsError::Host(HgfsStatus::NoSuchFileOrDir));
    assert_eq!(err.errno(), 2);

    log.set_reply(HostReply::Status(HgfsStatus::AccessDenied));
    let intr = Interrupt::new();
    let mut req = sip.pool().acquire(&intr).unwrap();
    req.prepare(HgfsOp::Open, b"/secret").unwrap();
    sip.submit_and_wait(&mut req, &intr).unwrap();
    assert_eq!(req.reply_status(), Ok(HgfsStatus::AccessDenied));
}

// ============================================================================
// Device
// ============================================================================

#[test]
fn device_daemon_serves_requests() {
    let (transport, end) = DeviceTransport::new();
    end.open().unwrap();
    let sip = SuperInfo::mount(transport, MountOptions::default()).unwrap();

    let daemon = thread::spawn(move || {
        let intr = Interrupt::new();
        let mut served = 0;
        while let Ok(packet) = end.read_request(&intr) {
            assert!(RequestHeader::decode(&packet).is_ok());
            end.write_reply(&echo(&packet)).unwrap();
            served += 1;
        }
        served
    });

    for i in 0..10u8 {
        assert_eq!(transact(&sip, &[i, i]).unwrap(), [i, i]);
    }
    sip.unmount().unwrap();
    assert_eq!(daemon.join().unwrap(), 10);
}

#[test]
fn device_without_daemon_fails_with_io() {
    let (transport, _end) = DeviceTransport::new();
    let sip = SuperInfo::mount(transport, MountOptions::default()).unwrap();
    assert_eq!(transact(&sip, b"nobody"), Err(HgfsError::Io));
    assert_eq!(sip.pool().outstanding(), 0);
}

#[test]
fn device_close_fails_in_flight_requests() {
    let (transport, end) = DeviceTransport::new();
    end.open().unwrap();
    let sip = std::sync::Arc::new(SuperInfo::mount(transport, MountOptions::default()).unwrap());

    let waiter = {
        let sip = std::sync::Arc::clone(&sip);
        thread::spawn(move || transact(&sip, b"pending"))
    };

    let packet = end.read_request(&Interrupt::new()).unwrap();
    assert_eq!(&packet[8..], b"pending");
    end.close();
    assert_eq!(waiter.join().unwrap(), Err(HgfsError::NoDevice));
    assert_eq!(sip.pool().outstanding(), 0);
}

#[test]
fn device_late_reply_recycles_interrupted_request() {
    let (transport, end) = DeviceTransport::new();
    end.open().unwrap();
    let sip = std::sync::Arc::new(SuperInfo::mount(transport, MountOptions::default()).unwrap());
    let intr = Interrupt::new();

    let waiter = {
        let sip = std::sync::Arc::clone(&sip);
        let intr = intr.clone();
        thread::spawn(move || sip.transact(HgfsOp::Read, b"slow", REPLY_HEADER_LEN, &intr))
    };

    let packet = end.read_request(&Interrupt::new()).unwrap();
    intr.raise();
    assert_eq!(waiter.join().unwrap(), Err(HgfsError::Interrupted));
    assert_eq!(sip.pool().outstanding(), 1);

    end.write_reply(&echo(&packet)).unwrap();
    assert_eq!(sip.pool().outstanding(), 0);

    // Answering twice is dropped quietly.
    end.write_reply(&echo(&packet)).unwrap();
    assert_eq!(sip.pool().outstanding(), 0);
}
