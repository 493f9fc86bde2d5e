//! Socket-pair connection for exercising the event source without X.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use super::{EventConnection, EventSourceError, SaverControl, ScreenSaverError};

/// One byte on the wire is one event.
pub struct FakeConnection {
    stream: UnixStream,
    pub queued: RefCell<VecDeque<u8>>,
    pub flushes: Cell<usize>,
    pub resets: Cell<usize>,
    pub activations: Cell<usize>,
}

impl FakeConnection {
    /// Connection plus the peer end standing in for the server.
    pub fn pair() -> (Self, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let conn = Self {
            stream: ours,
            queued: RefCell::new(VecDeque::new()),
            flushes: Cell::new(0),
            resets: Cell::new(0),
            activations: Cell::new(0),
        };
        (conn, theirs)
    }
}

impl EventConnection for FakeConnection {
    type Event = u8;

    fn descriptor(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn flush_output(&self) -> Result<(), EventSourceError> {
        self.flushes.set(self.flushes.get() + 1);
        Ok(())
    }

    fn poll_queued_event(&self) -> Result<Option<u8>, EventSourceError> {
        Ok(self.queued.borrow_mut().pop_front())
    }

    fn poll_event(&self) -> Result<Option<u8>, EventSourceError> {
        if let Some(event) = self.poll_queued_event()? {
            return Ok(Some(event));
        }
        let mut byte = [0u8; 1];
        match (&self.stream).read(&mut byte) {
            Ok(0) => Err(EventSourceError::ConnectionLost("EOF".to_string())),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(EventSourceError::ConnectionLost(e.to_string())),
        }
    }
}

impl SaverControl for FakeConnection {
    fn force_active(&self) -> Result<(), ScreenSaverError> {
        self.activations.set(self.activations.get() + 1);
        Ok(())
    }

    fn reset(&self) -> Result<(), ScreenSaverError> {
        self.resets.set(self.resets.get() + 1);
        Ok(())
    }
}
