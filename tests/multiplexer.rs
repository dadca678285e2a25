//! MioMultiplexer against real sockets.

use apns_dispatch::MioMultiplexer;
use apns_dispatch::Multiplexer;
use apns_dispatch::engine::{Interest, Readiness};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

const WAIT: Duration = Duration::from_millis(200);
const SHORT: Duration = Duration::from_millis(20);

fn wait(mux: &mut MioMultiplexer, timeout: Duration) -> Vec<Readiness> {
    let mut ready = Vec::new();
    mux.wait(timeout, &mut ready).expect("wait failed");
    ready
}

#[test]
fn reports_readable_descriptor() {
    let mut mux = MioMultiplexer::new().unwrap();
    let (a, mut b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    mux.watch(fd, Interest::Readable).unwrap();
    b.write_all(b"ping").unwrap();

    let ready = wait(&mut mux, WAIT);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].fd, fd);
    assert!(ready[0].readable);
}

#[test]
fn reports_writable_descriptor() {
    let mut mux = MioMultiplexer::new().unwrap();
    let (a, _b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    mux.watch(fd, Interest::Writable).unwrap();

    let ready = wait(&mut mux, WAIT);
    assert!(ready.iter().any(|r| r.fd == fd && r.writable));
}

#[test]
fn times_out_with_nothing_ready() {
    let mut mux = MioMultiplexer::new().unwrap();
    let (a, _b) = UnixStream::pair().unwrap();

    mux.watch(a.as_raw_fd(), Interest::Readable).unwrap();

    assert!(wait(&mut mux, SHORT).is_empty());
}

#[test]
fn unwatched_descriptor_is_not_reported() {
    let mut mux = MioMultiplexer::new().unwrap();
    let (a, mut b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    mux.watch(fd, Interest::Readable).unwrap();
    mux.unwatch(fd).unwrap();
    assert!(!mux.is_watched(fd));

    b.write_all(b"ping").unwrap();
    assert!(wait(&mut mux, SHORT).is_empty());
}

#[test]
fn rewatch_reports_pending_data_again() {
    let mut mux = MioMultiplexer::new().unwrap();
    let (a, mut b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    mux.watch(fd, Interest::Readable).unwrap();
    b.write_all(b"ping").unwrap();
    assert_eq!(wait(&mut mux, WAIT).len(), 1);

    // data is left unread; without re-arming the edge is not reported again
    assert!(wait(&mut mux, SHORT).is_empty());

    mux.watch(fd, Interest::Readable).unwrap();
    let ready = wait(&mut mux, WAIT);
    assert_eq!(ready.len(), 1);
    assert!(ready[0].readable);
}

#[test]
fn watch_replaces_interest() {
    let mut mux = MioMultiplexer::new().unwrap();
    let (a, _b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    mux.watch(fd, Interest::Readable).unwrap();
    assert!(wait(&mut mux, SHORT).is_empty());

    mux.watch(fd, Interest::Both).unwrap();
    assert_eq!(mux.watch_count(), 1);

    let ready = wait(&mut mux, WAIT);
    assert!(ready.iter().any(|r| r.fd == fd && r.writable));
}

#[test]
fn unwatch_after_close_is_harmless() {
    let mut mux = MioMultiplexer::new().unwrap();
    let (a, _b) = UnixStream::pair().unwrap();
    let fd = a.as_raw_fd();

    mux.watch(fd, Interest::Readable).unwrap();
    drop(a);

    mux.unwatch(fd).unwrap();
    assert_eq!(mux.watch_count(), 0);
}

#[test]
fn many_descriptors() {
    let mut mux = MioMultiplexer::with_capacity(4).unwrap();
    let pairs: Vec<_> = (0..16).map(|_| UnixStream::pair().unwrap()).collect();

    for (a, _) in &pairs {
        mux.watch(a.as_raw_fd(), Interest::Readable).unwrap();
    }
    for (_, b) in &pairs {
        (&*b).write_all(b"x").unwrap();
    }

    // capacity bounds a single wait, the rest are picked up by later ones
    let mut seen = std::collections::HashSet::new();
    for _ in 0..16 {
        let ready = wait(&mut mux, WAIT);
        assert!(ready.len() <= 4);
        seen.extend(ready.iter().map(|r| r.fd));
        if seen.len() == pairs.len() {
            break;
        }
    }
    assert_eq!(seen.len(), pairs.len());
}
