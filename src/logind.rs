//! systemd-logind integration via `DBus`.
//!
//! Every call runs in a spawned task. Results come back to the main loop as
//! [`LoginEvent`]s, so no state changes until the loop handles the reply.

pub mod inhibitor;

use std::os::fd::OwnedFd;
use std::pin::pin;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};
use zbus::Connection;
use zbus::zvariant::OwnedObjectPath;

pub use inhibitor::{InhibitorState, SleepInhibitor};

/// `DBus` service and path for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";

/// Name reported to logind as the inhibitor owner.
const APP_NAME: &str = "xss-lock";

/// The parts of logind the state machines talk to.
pub trait SessionManager {
    /// Ask for a delay sleep inhibitor. The reply arrives later as
    /// [`LoginSignal::SleepLockAcquired`]. Returns false if no request was sent.
    fn request_sleep_lock(&self) -> bool;

    /// Report the session's idle hint. Best effort, failures are ignored.
    fn set_idle_hint(&self, idle: bool);
}

/// Notifications the state machines react to.
#[derive(Debug)]
pub enum LoginSignal {
    SleepLockAcquired(Result<OwnedFd>),
    PrepareForSleep(bool),
    Lock,
    Unlock,
}

/// Everything logind tasks report back to the main loop.
#[derive(Debug)]
pub enum LoginEvent {
    ManagerReady(zbus::Proxy<'static>),
    SessionReady(zbus::Proxy<'static>),
    Signal(LoginSignal),
}

/// What a bridge event means for the state machines.
#[derive(Debug)]
pub enum BridgeUpdate {
    /// The manager became reachable; sleep locks can be requested now.
    ManagerReady,
    Signal(LoginSignal),
    /// Bookkeeping only.
    None,
}

/// A session manager whose connection progress arrives as events on the
/// main loop.
pub trait SessionBridge: SessionManager {
    type Event;

    /// Absorb an event. `watch_sleep` subscribes to sleep notifications once
    /// the manager is reachable.
    fn on_event(&mut self, event: Self::Event, watch_sleep: bool) -> BridgeUpdate;
}

/// How to find our session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSelector {
    /// The session this process belongs to.
    Pid(u32),
    /// An explicit session id.
    Id(String),
}

impl SessionSelector {
    pub fn from_config(session_id: Option<&str>) -> Self {
        match session_id {
            Some(id) => Self::Id(id.to_string()),
            None => Self::Pid(std::process::id()),
        }
    }
}

/// logind client used by the orchestrator.
///
/// Proxies are filled in as the corresponding `LoginEvent`s arrive; until
/// then requests are skipped.
#[derive(Debug)]
pub struct LoginClient {
    events: UnboundedSender<LoginEvent>,
    selector: SessionSelector,
    manager: Option<zbus::Proxy<'static>>,
    session: Option<zbus::Proxy<'static>>,
}

impl LoginClient {
    pub fn new(events: UnboundedSender<LoginEvent>, selector: SessionSelector) -> Self {
        Self {
            events,
            selector,
            manager: None,
            session: None,
        }
    }

    /// Connect to the system bus and create the Manager proxy.
    ///
    /// Reports [`LoginEvent::ManagerReady`] on success. Failure is logged and
    /// leaves logind integration off.
    pub fn connect(&self) {
        let events = self.events.clone();
        tokio::spawn(async move {
            match manager_proxy().await {
                Ok(manager) => {
                    let _ = events.send(LoginEvent::ManagerReady(manager));
                }
                Err(e) => warn!("Error connecting to systemd login manager: {:#}", e),
            }
        });
    }

    /// Store the Manager proxy and resolve our session through it.
    pub fn attach_manager(&mut self, manager: zbus::Proxy<'static>) {
        info!("Connected to systemd login manager");
        let events = self.events.clone();
        let selector = self.selector.clone();
        let proxy = manager.clone();
        tokio::spawn(async move {
            match session_proxy(&proxy, &selector).await {
                Ok(session) => {
                    let _ = events.send(LoginEvent::SessionReady(session));
                }
                Err(e) => warn!("Error getting current session: {:#}", e),
            }
        });
        self.manager = Some(manager);
    }

    /// Forward `PrepareForSleep` signals to the main loop.
    pub fn watch_sleep(&self) {
        let Some(manager) = self.manager.clone() else {
            return;
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = forward_prepare_for_sleep(&manager, &events).await {
                warn!("Error subscribing to PrepareForSleep: {:#}", e);
            }
        });
    }

    /// Store the Session proxy and forward its `Lock`/`Unlock` signals.
    pub fn attach_session(&mut self, session: zbus::Proxy<'static>) {
        info!("Resolved session path: {}", session.path());
        let events = self.events.clone();
        let proxy = session.clone();
        tokio::spawn(async move {
            if let Err(e) = forward_lock_signals(&proxy, &events).await {
                warn!("Error subscribing to session signals: {:#}", e);
            }
        });
        self.session = Some(session);
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }
}

impl SessionBridge for LoginClient {
    type Event = LoginEvent;

    fn on_event(&mut self, event: LoginEvent, watch_sleep: bool) -> BridgeUpdate {
        match event {
            LoginEvent::ManagerReady(manager) => {
                self.attach_manager(manager);
                if watch_sleep {
                    self.watch_sleep();
                }
                BridgeUpdate::ManagerReady
            }
            LoginEvent::SessionReady(session) => {
                self.attach_session(session);
                BridgeUpdate::None
            }
            LoginEvent::Signal(signal) => BridgeUpdate::Signal(signal),
        }
    }
}

impl SessionManager for LoginClient {
    fn request_sleep_lock(&self) -> bool {
        let Some(manager) = self.manager.clone() else {
            return false;
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = take_delay_lock(&manager).await;
            let _ = events.send(LoginEvent::Signal(LoginSignal::SleepLockAcquired(result)));
        });
        true
    }

    fn set_idle_hint(&self, idle: bool) {
        let Some(session) = self.session.clone() else {
            trace!("No session, skipping idle hint");
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = session.call::<_, _, ()>("SetIdleHint", &(idle,)).await {
                debug!("SetIdleHint({}) failed: {}", idle, e);
            }
        });
    }
}

/// Create the Manager proxy on the system bus.
async fn manager_proxy() -> Result<zbus::Proxy<'static>> {
    let conn = Connection::system()
        .await
        .context("Failed to connect to system DBus")?;

    zbus::Proxy::new(&conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
        .await
        .context("Failed to create Manager proxy")
}

/// Resolve our session and create a proxy for it.
async fn session_proxy(
    manager: &zbus::Proxy<'static>,
    selector: &SessionSelector,
) -> Result<zbus::Proxy<'static>> {
    let path: OwnedObjectPath = match selector {
        SessionSelector::Id(id) => {
            debug!("Using session id: {}", id);
            manager
                .call("GetSession", &(id.as_str(),))
                .await
                .context("GetSession call failed")?
        }
        SessionSelector::Pid(pid) => {
            debug!("Looking up session of pid {}", pid);
            manager
                .call("GetSessionByPID", &(*pid,))
                .await
                .context("GetSessionByPID call failed")?
        }
    };

    zbus::Proxy::new(
        manager.connection(),
        LOGIND_SERVICE,
        path.into_inner(),
        SESSION_INTERFACE,
    )
    .await
    .context("Failed to create Session proxy")
}

/// Take a delay inhibitor lock for sleep.
async fn take_delay_lock(manager: &zbus::Proxy<'static>) -> Result<OwnedFd> {
    let fd: zbus::zvariant::OwnedFd = manager
        .call("Inhibit", &("sleep", APP_NAME, "Lock screen first", "delay"))
        .await
        .context("Inhibit call failed")?;
    Ok(fd.into())
}

async fn forward_prepare_for_sleep(
    manager: &zbus::Proxy<'static>,
    events: &UnboundedSender<LoginEvent>,
) -> Result<()> {
    let mut signals = manager.receive_signal("PrepareForSleep").await?;

    while let Some(message) = signals.next().await {
        let active: bool = match message.body().deserialize() {
            Ok(active) => active,
            Err(e) => {
                warn!("Malformed PrepareForSleep signal: {}", e);
                continue;
            }
        };
        debug!("PrepareForSleep({})", active);
        if events
            .send(LoginEvent::Signal(LoginSignal::PrepareForSleep(active)))
            .is_err()
        {
            break;
        }
    }
    Ok(())
}

async fn forward_lock_signals(
    session: &zbus::Proxy<'static>,
    events: &UnboundedSender<LoginEvent>,
) -> Result<()> {
    let lock = session
        .receive_signal("Lock")
        .await?
        .map(|_| LoginSignal::Lock);
    let unlock = session
        .receive_signal("Unlock")
        .await?
        .map(|_| LoginSignal::Unlock);
    let mut signals = pin!(stream::select(lock, unlock));

    while let Some(signal) = signals.next().await {
        debug!("Session signal: {:?}", signal);
        if events.send(LoginEvent::Signal(signal)).is_err() {
            break;
        }
    }
    Ok(())
}
