//! Readiness multiplexer using epoll/kqueue through mio.
//!
//! mio registrations are edge-triggered. libcurl expects level-triggered
//! readiness, so a descriptor that is still wanted after it has been
//! serviced is re-armed with [`Multiplexer::watch`]. Re-registering makes
//! the kernel re-check readiness and report the descriptor again if data is
//! still pending.

use crate::engine::{Descriptor, Interest, Readiness};
use mio::unix::SourceFd;
use mio::{Events, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// Default number of readiness events fetched per wait.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Watch set plus a bounded blocking wait.
pub trait Multiplexer {
    /// Watch a descriptor, replacing any previous interest. Watching a
    /// descriptor again with the same interest re-arms it.
    fn watch(&mut self, fd: Descriptor, interest: Interest) -> io::Result<()>;

    /// Stop watching a descriptor.
    fn unwatch(&mut self, fd: Descriptor) -> io::Result<()>;

    /// Block until at least one descriptor is ready or `timeout` elapses.
    ///
    /// `ready` is cleared first; on timeout it is left empty.
    fn wait(&mut self, timeout: Duration, ready: &mut Vec<Readiness>) -> io::Result<()>;
}

/// mio-backed multiplexer.
pub struct MioMultiplexer {
    poll: Poll,
    events: Events,
    watched: HashMap<Descriptor, Interest>,
}

impl MioMultiplexer {
    /// Create a multiplexer with the default event capacity.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a multiplexer fetching at most `capacity` events per wait.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
            watched: HashMap::new(),
        })
    }

    /// Number of descriptors currently watched.
    pub fn watch_count(&self) -> usize {
        self.watched.len()
    }

    pub fn is_watched(&self, fd: Descriptor) -> bool {
        self.watched.contains_key(&fd)
    }
}

fn to_mio(interest: Interest) -> mio::Interest {
    match interest {
        Interest::Readable => mio::Interest::READABLE,
        Interest::Writable => mio::Interest::WRITABLE,
        Interest::Both => mio::Interest::READABLE | mio::Interest::WRITABLE,
    }
}

impl Multiplexer for MioMultiplexer {
    fn watch(&mut self, fd: Descriptor, interest: Interest) -> io::Result<()> {
        let registry = self.poll.registry();
        let token = Token(fd as usize);
        let mio_interest = to_mio(interest);

        // The descriptor may have been closed and its number reused without
        // an unwatch in between, so fall back to the other operation when
        // the kernel disagrees with our bookkeeping.
        let result = if self.watched.contains_key(&fd) {
            match registry.reregister(&mut SourceFd(&fd), token, mio_interest) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    registry.register(&mut SourceFd(&fd), token, mio_interest)
                }
                other => other,
            }
        } else {
            match registry.register(&mut SourceFd(&fd), token, mio_interest) {
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    registry.reregister(&mut SourceFd(&fd), token, mio_interest)
                }
                other => other,
            }
        };

        match result {
            Ok(()) => {
                self.watched.insert(fd, interest);
                Ok(())
            }
            Err(e) => {
                self.watched.remove(&fd);
                Err(e)
            }
        }
    }

    fn unwatch(&mut self, fd: Descriptor) -> io::Result<()> {
        if self.watched.remove(&fd).is_none() {
            return Ok(());
        }
        match self.poll.registry().deregister(&mut SourceFd(&fd)) {
            // closing a descriptor removes it from the poll set
            Err(e)
                if e.kind() == io::ErrorKind::NotFound
                    || e.raw_os_error() == Some(libc::EBADF) =>
            {
                Ok(())
            }
            other => other,
        }
    }

    fn wait(&mut self, timeout: Duration, ready: &mut Vec<Readiness>) -> io::Result<()> {
        ready.clear();
        self.poll.poll(&mut self.events, Some(timeout))?;

        for event in self.events.iter() {
            let fd = event.token().0 as Descriptor;
            if !self.watched.contains_key(&fd) {
                continue;
            }
            ready.push(Readiness {
                fd,
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable() || event.is_write_closed(),
                error: event.is_error(),
            });
        }
        Ok(())
    }
}
