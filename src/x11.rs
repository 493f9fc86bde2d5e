//! X11 connection plumbing.
//!
//! This module bridges an `x11rb` connection into the tokio event loop
//! ([`EventSource`]) and claims the MIT-SCREEN-SAVER idle role
//! ([`screensaver`]).

mod event_source;
#[cfg(test)]
pub(crate) mod fake;
pub mod screensaver;

use std::env;
use std::os::fd::{AsRawFd, RawFd};

pub use event_source::{Dispatch, EventSource, Readiness, Registration};
use thiserror::Error;
use tracing::info;
use x11rb::connection::Connection;
use x11rb::errors::ConnectionError;
use x11rb::protocol::xproto::{ConnectionExt as _, ScreenSaver};
use x11rb::rust_connection::RustConnection;

/// A protocol connection whose events can be multiplexed on its descriptor.
///
/// Neither poll method may block.
pub trait EventConnection {
    type Event;

    /// Descriptor the reactor watches for input. The connection keeps
    /// ownership and must outlive every registration.
    fn descriptor(&self) -> RawFd;

    /// Write out any buffered requests.
    fn flush_output(&self) -> Result<(), EventSourceError>;

    /// Take an event the descriptor may no longer signal, such as one the
    /// connection buffered while waiting for a reply. Connections that
    /// never buffer keep the default.
    fn poll_queued_event(&self) -> Result<Option<Self::Event>, EventSourceError> {
        Ok(None)
    }

    /// Read and decode the next fully available event without blocking.
    fn poll_event(&self) -> Result<Option<Self::Event>, EventSourceError>;
}

impl EventConnection for RustConnection {
    type Event = x11rb::protocol::Event;

    fn descriptor(&self) -> RawFd {
        self.stream().as_raw_fd()
    }

    fn flush_output(&self) -> Result<(), EventSourceError> {
        Connection::flush(self).map_err(lost)
    }

    // x11rb has no queue-only poll; `poll_for_event` returns its queued
    // events first and then tries one non-blocking read.
    fn poll_queued_event(&self) -> Result<Option<Self::Event>, EventSourceError> {
        Connection::poll_for_event(self).map_err(lost)
    }

    fn poll_event(&self) -> Result<Option<Self::Event>, EventSourceError> {
        Connection::poll_for_event(self).map_err(lost)
    }
}

fn lost(e: ConnectionError) -> EventSourceError {
    EventSourceError::ConnectionLost(e.to_string())
}

/// Errors from the event source.
#[derive(Error, Debug)]
pub enum EventSourceError {
    #[error("Failed to register connection descriptor: {0}")]
    Register(std::io::Error),

    #[error("Waiting on connection descriptor failed: {0}")]
    Wait(std::io::Error),

    #[error("X connection lost: {0}")]
    ConnectionLost(String),

    #[error("Event source dispatched without a callback")]
    NoCallback,
}

/// Errors from opening the X connection.
#[derive(Error, Debug)]
pub enum X11Error {
    #[error("Connecting to X server failed: {0}")]
    ConnectionFailed(String),

    #[error("Screen {0} not found")]
    ScreenNotFound(usize),
}

/// Errors from controlling the built-in screen saver.
#[derive(Error, Debug)]
pub enum ScreenSaverError {
    #[error("ForceScreenSaver request failed: {0}")]
    Request(#[from] ConnectionError),
}

/// Root window of the screen we manage.
#[derive(Debug, Clone, Copy)]
pub struct RootWindow {
    pub window: u32,
    pub depth: u8,
}

/// Open the X connection named by `$DISPLAY`.
pub fn connect() -> Result<(RustConnection, RootWindow), X11Error> {
    let (conn, screen_num) =
        x11rb::connect(None).map_err(|e| X11Error::ConnectionFailed(e.to_string()))?;

    let screen = conn
        .setup()
        .roots
        .get(screen_num)
        .ok_or(X11Error::ScreenNotFound(screen_num))?;
    let root = RootWindow {
        window: screen.root,
        depth: screen.root_depth,
    };

    info!("Connected to X server, screen {}", screen_num);
    Ok((conn, root))
}

/// Get diagnostic information about the X environment.
pub fn diagnostics() -> Vec<String> {
    let mut diags = Vec::new();

    match env::var("DISPLAY") {
        Ok(v) => diags.push(format!("DISPLAY={v}")),
        Err(_) => diags.push("DISPLAY: NOT SET".to_string()),
    }

    match env::var("XAUTHORITY") {
        Ok(v) => diags.push(format!("XAUTHORITY={v}")),
        Err(_) => diags.push("XAUTHORITY: NOT SET".to_string()),
    }

    diags
}

/// Control over the X server's built-in screen saver.
pub trait SaverControl {
    /// Activate the saver as if the idle timeout had expired.
    fn force_active(&self) -> Result<(), ScreenSaverError>;

    /// Restart the idle timer as if the user had been active.
    fn reset(&self) -> Result<(), ScreenSaverError>;
}

impl SaverControl for RustConnection {
    fn force_active(&self) -> Result<(), ScreenSaverError> {
        self.force_screen_saver(ScreenSaver::ACTIVE)?;
        Connection::flush(self)?;
        Ok(())
    }

    fn reset(&self) -> Result<(), ScreenSaverError> {
        self.force_screen_saver(ScreenSaver::RESET)?;
        Connection::flush(self)?;
        Ok(())
    }
}
