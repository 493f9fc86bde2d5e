//! Screen saver state machine.
//!
//! Maps idle notifications to supervisor and logind actions:
//!
//! | Event                               | Actions                             |
//! |-------------------------------------|-------------------------------------|
//! | Started, internal                   | force the built-in saver active     |
//! | Started, external, forced           | start locker, idle hint on          |
//! | Started, external, no notifier      | start locker, idle hint on          |
//! | Started, external, locker running   | idle hint on                        |
//! | Started, external                   | start notifier                      |
//! | Ended                               | stop notifier, idle hint off        |
//! | Cycling, locker not running         | idle hint on, start locker          |
//!
//! An `Ended` event never stops the locker; only logind's `Unlock` does.

use crate::domain::{IdleEvent, Role, SaverKind, SaverState};
use crate::x11::SaverControl;

/// Receives decoded idle events from the X event source.
pub trait IdleEventSink {
    fn on_idle_event(&mut self, saver: &dyn SaverControl, event: IdleEvent);
}

/// Something the state machine asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Hand control to the server's built-in saver.
    ForceSaverActive,
    Start(Role),
    Stop(Role),
    SetIdleHint(bool),
}

/// What the state machine needs to know about the supervised children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildStatus {
    pub locker_running: bool,
    pub notifier_configured: bool,
}

/// Compute the actions for an idle event, in the order they must run.
pub fn transition(event: IdleEvent, status: ChildStatus) -> &'static [IdleAction] {
    use IdleAction::{ForceSaverActive, SetIdleHint, Start, Stop};

    match event.state {
        SaverState::Started => {
            if event.kind == SaverKind::Internal {
                &[ForceSaverActive]
            } else if event.forced || !status.notifier_configured {
                &[Start(Role::Locker), SetIdleHint(true)]
            } else if status.locker_running {
                &[SetIdleHint(true)]
            } else {
                &[Start(Role::Notifier)]
            }
        }
        SaverState::Ended => &[Stop(Role::Notifier), SetIdleHint(false)],
        SaverState::Cycling => {
            if status.locker_running {
                &[]
            } else {
                &[SetIdleHint(true), Start(Role::Locker)]
            }
        }
    }
}
