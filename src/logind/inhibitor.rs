//! Delay-type sleep inhibitor lock.
//!
//! Holding the lock makes logind wait (up to `InhibitDelayMaxSec`) before
//! suspending, which gives the locker time to come up.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use tracing::{debug, info, warn};

use super::SessionManager;

/// Coordinator state.
#[derive(Debug, Default)]
pub enum InhibitorState {
    #[default]
    NotHeld,
    Acquiring,
    Held(OwnedFd),
}

/// Owner of the sleep inhibitor descriptor.
#[derive(Debug, Default)]
pub struct SleepInhibitor {
    state: InhibitorState,
}

impl SleepInhibitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &InhibitorState {
        &self.state
    }

    pub fn is_held(&self) -> bool {
        matches!(self.state, InhibitorState::Held(_))
    }

    /// Descriptor number of the held lock.
    pub fn raw_fd(&self) -> Option<RawFd> {
        match &self.state {
            InhibitorState::Held(fd) => Some(fd.as_raw_fd()),
            _ => None,
        }
    }

    /// Request the lock unless it is held or already requested.
    pub fn acquire<M: SessionManager + ?Sized>(&mut self, manager: &M) {
        match self.state {
            InhibitorState::NotHeld => {
                if manager.request_sleep_lock() {
                    debug!("Requested sleep inhibitor lock");
                    self.state = InhibitorState::Acquiring;
                } else {
                    debug!("Login manager unavailable, not taking sleep lock");
                }
            }
            InhibitorState::Acquiring => debug!("Sleep inhibitor lock already requested"),
            InhibitorState::Held(_) => debug!("Sleep inhibitor lock already held"),
        }
    }

    /// Completion of a request issued by `acquire`.
    pub fn on_acquired(&mut self, result: anyhow::Result<OwnedFd>) {
        if !matches!(self.state, InhibitorState::Acquiring) {
            // Dropping closes a lock nobody asked for anymore.
            debug!("Discarding unexpected sleep inhibitor reply");
            return;
        }

        match result {
            Ok(fd) => {
                info!("Took sleep inhibitor lock (fd {})", fd.as_raw_fd());
                self.state = InhibitorState::Held(fd);
            }
            Err(e) => {
                warn!("Error taking sleep inhibitor lock: {:#}", e);
                self.state = InhibitorState::NotHeld;
            }
        }
    }

    /// Close the lock, letting a pending suspend proceed.
    pub fn release(&mut self) {
        if !self.is_held() {
            return;
        }
        if let InhibitorState::Held(fd) = std::mem::take(&mut self.state) {
            debug!("Releasing sleep inhibitor lock (fd {})", fd.as_raw_fd());
        }
    }
}
