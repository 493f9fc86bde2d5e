//! Readiness-driven event source for descriptor-based protocol connections.
//!
//! Each loop iteration runs three phases:
//! - `prepare`: flush requests and pick up events already decoded locally.
//!   If any are queued the loop must not wait.
//! - `ready` + `check`: wait for the descriptor, then drain every event that
//!   can be decoded without blocking.
//! - `dispatch`: hand queued events to the callback in arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::{debug, error, trace};

use super::{EventConnection, EventSourceError};

/// Result of the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Events are queued; dispatch without waiting.
    Ready,
    /// Nothing queued; wait on the descriptor.
    Pending,
}

/// Continuation flag returned by the callback and by `dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// Abort this dispatch cycle and drop the remaining queued events.
    Stop,
}

/// How the descriptor is registered with the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Level-style watch for input, hangup and error conditions.
    UnixFd,
    /// Plain input watch; hangups still surface as readability.
    PollFd,
}

impl Registration {
    fn interest(self) -> Interest {
        match self {
            Self::UnixFd => Interest::READABLE | Interest::ERROR,
            Self::PollFd => Interest::READABLE,
        }
    }
}

/// Descriptor borrowed from the connection, which keeps ownership.
#[derive(Debug, Clone, Copy)]
struct Descriptor(RawFd);

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

fn register(descriptor: Descriptor, registration: Registration) -> io::Result<AsyncFd<Descriptor>> {
    AsyncFd::with_interest(descriptor, registration.interest())
}

type Callback<C, Ctx> = Box<dyn FnMut(&mut Ctx, &C, <C as EventConnection>::Event) -> Dispatch>;

/// Event source over a connection `C`, dispatching into a context `Ctx`.
pub struct EventSource<C: EventConnection, Ctx> {
    // Declared before `connection` so the reactor registration is dropped
    // before the descriptor is closed.
    fd: AsyncFd<Descriptor>,
    registration: Registration,
    queue: VecDeque<C::Event>,
    callback: Option<Callback<C, Ctx>>,
    connection: C,
}

impl<C: EventConnection, Ctx> EventSource<C, Ctx> {
    /// Register the connection's descriptor with the current tokio reactor,
    /// preferring the error-condition watch.
    pub fn new(connection: C) -> Result<Self, EventSourceError> {
        let descriptor = Descriptor(connection.descriptor());

        let (fd, registration) = match register(descriptor, Registration::UnixFd) {
            Ok(fd) => (fd, Registration::UnixFd),
            Err(e) => {
                debug!("Error-condition watch unavailable ({}), using plain poll", e);
                let fd = register(descriptor, Registration::PollFd)
                    .map_err(EventSourceError::Register)?;
                (fd, Registration::PollFd)
            }
        };

        Ok(Self::from_parts(fd, registration, connection))
    }

    /// Register the descriptor with one specific registration style.
    pub fn with_registration(
        connection: C,
        registration: Registration,
    ) -> Result<Self, EventSourceError> {
        let fd = register(Descriptor(connection.descriptor()), registration)
            .map_err(EventSourceError::Register)?;
        Ok(Self::from_parts(fd, registration, connection))
    }

    fn from_parts(fd: AsyncFd<Descriptor>, registration: Registration, connection: C) -> Self {
        debug!(
            "Watching descriptor {} ({:?})",
            fd.get_ref().0,
            registration
        );

        Self {
            fd,
            registration,
            queue: VecDeque::new(),
            callback: None,
            connection,
        }
    }

    /// Install the callback invoked once per event during dispatch.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Ctx, &C, C::Event) -> Dispatch + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn registration(&self) -> Registration {
        self.registration
    }

    /// Number of decoded events awaiting dispatch.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pre-poll phase.
    pub fn prepare(&mut self) -> Result<Readiness, EventSourceError> {
        self.connection.flush_output()?;
        while let Some(event) = self.connection.poll_queued_event()? {
            self.queue.push_back(event);
        }

        if self.queue.is_empty() {
            Ok(Readiness::Pending)
        } else {
            Ok(Readiness::Ready)
        }
    }

    /// Wait until the descriptor reports input, hangup or error.
    ///
    /// Cancel safe: nothing is consumed until `check` runs.
    pub async fn ready(&self) -> Result<(), EventSourceError> {
        let mut guard = self
            .fd
            .ready(self.registration.interest())
            .await
            .map_err(EventSourceError::Wait)?;
        trace!("Descriptor ready: {:?}", guard.ready());

        // `check` drains everything decodable, so any later data raises a
        // fresh readiness event.
        guard.clear_ready();
        Ok(())
    }

    /// Post-poll phase. Returns true if there is something to dispatch.
    pub fn check(&mut self) -> Result<bool, EventSourceError> {
        while let Some(event) = self.connection.poll_event()? {
            self.queue.push_back(event);
        }
        Ok(!self.queue.is_empty())
    }

    /// Dispatch phase: run the callback for every queued event in FIFO order.
    pub fn dispatch(&mut self, ctx: &mut Ctx) -> Result<Dispatch, EventSourceError> {
        let Some(callback) = self.callback.as_mut() else {
            error!("Event source dispatched without a callback");
            return Err(EventSourceError::NoCallback);
        };

        while let Some(event) = self.queue.pop_front() {
            if callback(ctx, &self.connection, event) == Dispatch::Stop {
                if !self.queue.is_empty() {
                    debug!("Dropping {} queued events", self.queue.len());
                    self.queue.clear();
                }
                return Ok(Dispatch::Stop);
            }
        }
        Ok(Dispatch::Continue)
    }
}

impl<C: EventConnection, Ctx> fmt::Debug for EventSource<C, Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("fd", &self.fd.get_ref().0)
            .field("registration", &self.registration)
            .field("queued", &self.queue.len())
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}
