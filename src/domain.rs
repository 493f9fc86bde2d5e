//! Domain types shared by the X11, logind and child-process layers.

use std::fmt;

/// The two external programs xss-lock supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Warns the user that the screen is about to lock (e.g. dims the screen).
    Notifier,
    /// The actual screen locker.
    Locker,
}

impl Role {
    /// Get the role name as used in log messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notifier => "notifier",
            Self::Locker => "locker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported by a screen saver notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaverState {
    /// The idle timeout expired (or activation was forced).
    Started,
    /// User activity ended the idle period.
    Ended,
    /// The saver cycle interval elapsed while still idle.
    Cycling,
}

/// Who is expected to draw the screen saver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaverKind {
    /// The X server's built-in saver.
    Internal,
    /// An external client (us).
    External,
}

/// A decoded idle-state notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleEvent {
    pub state: SaverState,
    pub kind: SaverKind,

    /// True when activation was requested explicitly (`xset s activate`).
    pub forced: bool,
}

impl IdleEvent {
    /// Create a new idle event.
    pub fn new(state: SaverState, kind: SaverKind, forced: bool) -> Self {
        Self {
            state,
            kind,
            forced,
        }
    }
}

impl fmt::Display for IdleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ({:?}{})",
            self.state,
            self.kind,
            if self.forced { ", forced" } else { "" }
        )
    }
}
