//! MIT-SCREEN-SAVER idle role.
//!
//! Claims the external screen saver role on the root window and turns
//! `ScreenSaverNotify` events into [`IdleEvent`]s.

use thiserror::Error;
use tracing::{debug, info, trace, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::Event;
use x11rb::protocol::screensaver::{
    self, ConnectionExt as _, Kind, NotifyEvent, SetAttributesAux, State,
};
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _, PropMode, WindowClass};
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use super::{Dispatch, EventSource, RootWindow, SaverControl};
use crate::domain::{IdleEvent, SaverKind, SaverState};
use crate::idle::IdleEventSink;

/// Root window property other savers check to detect a running instance.
pub const MARKER_PROPERTY: &str = "_MIT_SCREEN_SAVER_ID";

/// Errors from claiming the idle role.
#[derive(Error, Debug)]
pub enum RegistrarError {
    #[error("Screensaver extension unavailable")]
    ExtensionUnavailable,

    #[error("Error setting screensaver attributes; is another one running?")]
    AlreadyRegistered,

    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("X id allocation failed: {0}")]
    Id(#[from] ReplyOrIdError),
}

/// A successful claim of the idle role.
#[derive(Debug)]
pub struct Claim {
    root: u32,
    marker: u32,
    property: u32,
}

impl Claim {
    /// Pixmap id stored in the marker property.
    pub fn marker(&self) -> u32 {
        self.marker
    }

    /// Give the role back. Errors are logged; this only runs on the way out.
    pub fn unregister(self, conn: &RustConnection) {
        match self.release(conn) {
            Ok(()) => info!("Released screen saver role"),
            Err(e) => warn!("Error releasing screen saver role: {}", e),
        }
    }

    fn release(&self, conn: &RustConnection) -> Result<(), ConnectionError> {
        conn.screensaver_unset_attributes(self.root)?;
        conn.delete_property(self.root, self.property)?;
        conn.free_pixmap(self.marker)?;
        conn.flush()
    }
}

/// Claim the idle role and route its events into `source`'s context.
pub fn register<Ctx>(
    source: &mut EventSource<RustConnection, Ctx>,
    root: RootWindow,
) -> Result<Claim, RegistrarError>
where
    Ctx: IdleEventSink + 'static,
{
    let claim = claim(source.connection(), root)?;

    source.set_callback(|ctx: &mut Ctx, conn: &RustConnection, event: Event| {
        handle_event(ctx, conn, &event);
        Dispatch::Continue
    });

    Ok(claim)
}

/// Claim the idle role without installing an event callback.
///
/// Nothing stays registered on the server if this fails.
pub fn claim(conn: &RustConnection, root: RootWindow) -> Result<Claim, RegistrarError> {
    let extension = conn
        .extension_information(screensaver::X11_EXTENSION_NAME)?
        .ok_or(RegistrarError::ExtensionUnavailable)?;

    let version = conn.screensaver_query_version(1, 0)?.reply()?;
    debug!(
        "MIT-SCREEN-SAVER {}.{}, first event {}",
        version.server_major_version, version.server_minor_version, extension.first_event
    );

    let marker = conn.generate_id()?;
    if let Err(e) = conn.create_pixmap(root.depth, marker, root.window, 1, 1) {
        abandon(conn, root, marker, false);
        return Err(e.into());
    }
    let atom_cookie = match conn.intern_atom(false, MARKER_PROPERTY.as_bytes()) {
        Ok(cookie) => cookie,
        Err(e) => {
            abandon(conn, root, marker, false);
            return Err(e.into());
        }
    };

    let attributes = conn
        .screensaver_set_attributes(
            root.window,
            -1,
            -1,
            1,
            1,
            0,
            WindowClass::COPY_FROM_PARENT,
            0,
            0,
            &SetAttributesAux::new(),
        )
        .map_err(ReplyError::from)
        .and_then(|cookie| cookie.check());
    if let Err(e) = attributes {
        abandon(conn, root, marker, false);
        return Err(match e {
            ReplyError::X11Error(x11) => {
                debug!("ScreenSaverSetAttributes refused: {:?}", x11.error_kind);
                RegistrarError::AlreadyRegistered
            }
            other => other.into(),
        });
    }

    let property = match subscribe(conn, root, marker, atom_cookie.reply()) {
        Ok(property) => property,
        Err(e) => {
            abandon(conn, root, marker, true);
            return Err(e);
        }
    };

    info!("Registered as external screen saver");
    Ok(Claim {
        root: root.window,
        marker,
        property,
    })
}

fn subscribe(
    conn: &RustConnection,
    root: RootWindow,
    marker: u32,
    atom: Result<x11rb::protocol::xproto::InternAtomReply, ReplyError>,
) -> Result<u32, RegistrarError> {
    conn.screensaver_select_input(
        root.window,
        screensaver::Event::NOTIFY_MASK | screensaver::Event::CYCLE_MASK,
    )?;

    let property = atom?.atom;
    conn.change_property32(
        PropMode::REPLACE,
        root.window,
        property,
        AtomEnum::PIXMAP,
        &[marker],
    )?;
    conn.flush()?;
    Ok(property)
}

/// Undo a partial claim.
fn abandon(conn: &RustConnection, root: RootWindow, marker: u32, attributes_set: bool) {
    let result = (|| -> Result<(), ConnectionError> {
        if attributes_set {
            conn.screensaver_unset_attributes(root.window)?;
        }
        conn.free_pixmap(marker)?;
        conn.flush()
    })();
    if let Err(e) = result {
        debug!("Cleanup after failed registration: {}", e);
    }
}

fn handle_event<Ctx: IdleEventSink>(ctx: &mut Ctx, saver: &dyn SaverControl, event: &Event) {
    match event {
        Event::ScreensaverNotify(notify) => match decode(notify) {
            Some(idle) => {
                debug!("Screen saver event: {}", idle);
                ctx.on_idle_event(saver, idle);
            }
            None => debug!("Ignoring screen saver state {:?}", notify.state),
        },
        Event::Error(e) => warn!("X error: {:?} (request {})", e.error_kind, e.major_opcode),
        other => trace!("Ignoring X event {:?}", other),
    }
}

/// Decode a notify event. Returns `None` for the `Disabled` state.
pub fn decode(notify: &NotifyEvent) -> Option<IdleEvent> {
    let state = if notify.state == State::ON {
        SaverState::Started
    } else if notify.state == State::OFF {
        SaverState::Ended
    } else if notify.state == State::CYCLE {
        SaverState::Cycling
    } else {
        return None;
    };

    let kind = if notify.kind == Kind::INTERNAL {
        SaverKind::Internal
    } else {
        SaverKind::External
    };

    Some(IdleEvent::new(state, kind, notify.forced))
}
