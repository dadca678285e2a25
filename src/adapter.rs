//! Glue between the transfer engine's signals and the multiplexer.
//!
//! The engine reports two things: which descriptors it wants watched and how
//! long until it next needs a tick. [`Adapter::sync`] pulls both out of the
//! engine and applies them right away. The dispatcher calls it after every
//! `submit` pass and every `drive`, so signals emitted while the engine was
//! being driven take effect before the next wait.
//!
//! Invariants:
//! - the multiplexer watch set equals the descriptors in the interest set
//! - the wait timeout always lies within `[floor, ceiling]`

use crate::engine::{Descriptor, Interest, InterestChange, TransferEngine};
use crate::multiplexer::Multiplexer;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{trace, warn};

/// Clamped wait deadline.
#[derive(Debug, Clone)]
pub struct Deadline {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
    tick_now: bool,
}

impl Deadline {
    /// A `floor` above `ceiling` is lowered to it.
    pub fn new(floor: Duration, ceiling: Duration, initial: Duration) -> Self {
        let floor = floor.min(ceiling);
        Self {
            floor,
            ceiling,
            current: initial.clamp(floor, ceiling),
            tick_now: false,
        }
    }

    /// Replace the deadline with a freshly reported engine value.
    ///
    /// `None` means the engine has no timer pending and maps to the ceiling.
    /// Zero asks for an immediate tick; the wait that follows it still uses
    /// the floor. A later value supersedes a pending tick request.
    pub fn apply(&mut self, raw: Option<Duration>) {
        self.tick_now = matches!(raw, Some(d) if d.is_zero());
        self.current = match raw {
            None => self.ceiling,
            Some(d) => d.clamp(self.floor, self.ceiling),
        };
    }

    /// Timeout for the next wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Whether the engine asked for an immediate tick, clearing the request.
    pub fn take_tick_now(&mut self) -> bool {
        std::mem::take(&mut self.tick_now)
    }
}

/// Engine adapter owning the interest set and the deadline.
#[derive(Debug)]
pub struct Adapter {
    interest: HashMap<Descriptor, Interest>,
    deadline: Deadline,
    scratch: Vec<InterestChange>,
}

impl Adapter {
    pub fn new(deadline: Deadline) -> Self {
        Self {
            interest: HashMap::new(),
            deadline,
            scratch: Vec::new(),
        }
    }

    /// Apply every interest change and the latest deadline the engine has
    /// emitted since the previous sync.
    pub fn sync<E, M>(&mut self, engine: &mut E, multiplexer: &mut M)
    where
        E: TransferEngine,
        M: Multiplexer,
    {
        let mut changes = std::mem::take(&mut self.scratch);
        engine.take_interest_changes(&mut changes);
        for change in changes.drain(..) {
            self.apply_interest(change, multiplexer);
        }
        self.scratch = changes;

        // only the most recent value matters, earlier ones are superseded
        if let Some(raw) = engine.take_deadline() {
            self.apply_deadline(raw);
        }
    }

    /// Apply one interest change to the interest set and the multiplexer.
    pub fn apply_interest<M: Multiplexer>(
        &mut self,
        change: InterestChange,
        multiplexer: &mut M,
    ) {
        trace!(?change, "interest change");
        match change {
            InterestChange::Watch(fd, interest) => match multiplexer.watch(fd, interest) {
                Ok(()) => {
                    self.interest.insert(fd, interest);
                }
                Err(e) => {
                    warn!(fd, error = %e, "failed to watch descriptor");
                    self.interest.remove(&fd);
                }
            },
            InterestChange::Unwatch(fd) => {
                if self.interest.remove(&fd).is_none() {
                    trace!(fd, "unwatch for a descriptor that is not watched");
                }
                if let Err(e) = multiplexer.unwatch(fd) {
                    warn!(fd, error = %e, "failed to unwatch descriptor");
                }
            }
        }
    }

    pub fn apply_deadline(&mut self, raw: Option<Duration>) {
        self.deadline.apply(raw);
        trace!(?raw, clamped = ?self.deadline.current(), "deadline change");
    }

    /// Re-arm a descriptor after it has been serviced, if it is still wanted.
    pub fn rearm<M: Multiplexer>(&mut self, fd: Descriptor, multiplexer: &mut M) {
        if let Some(&interest) = self.interest.get(&fd) {
            self.apply_interest(InterestChange::Watch(fd, interest), multiplexer);
        }
    }

    /// Unwatch everything. Used when the dispatcher is torn down.
    pub fn clear<M: Multiplexer>(&mut self, multiplexer: &mut M) {
        for (fd, _) in self.interest.drain() {
            let _ = multiplexer.unwatch(fd);
        }
    }

    /// Timeout for the next wait.
    pub fn timeout(&self) -> Duration {
        self.deadline.current()
    }

    pub fn take_immediate_tick(&mut self) -> bool {
        self.deadline.take_tick_now()
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub fn interest(&self, fd: Descriptor) -> Option<Interest> {
        self.interest.get(&fd).copied()
    }

    /// Descriptors the engine currently wants watched.
    pub fn watched(&self) -> impl Iterator<Item = (Descriptor, Interest)> + '_ {
        self.interest.iter().map(|(fd, interest)| (*fd, *interest))
    }
}
