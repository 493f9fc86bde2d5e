//! Wires the X event source, the supervisor and logind together.
//!
//! All state lives in one [`Context`]. The main loop owns it and hands it to
//! whichever source woke up: the X connection, a reaped child, a logind
//! reply or signal, or an OS signal.

use std::os::fd::RawFd;

use anyhow::{Context as _, Result, bail};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};
use x11rb::rust_connection::RustConnection;

use crate::child::{ChildExit, Launcher, ProcessLauncher, Supervisor};
use crate::config::Config;
use crate::domain::{IdleEvent, Role};
use crate::idle::{ChildStatus, IdleAction, IdleEventSink, transition};
use crate::logind::{
    BridgeUpdate, LoginClient, LoginSignal, SessionBridge, SessionManager, SessionSelector,
    SleepInhibitor,
};
use crate::x11::{
    self, Dispatch, EventConnection, EventSource, EventSourceError, Readiness, SaverControl,
};

/// Shared state of the running locker daemon.
#[derive(Debug)]
pub struct Context<L, M> {
    supervisor: Supervisor<L>,
    inhibitor: SleepInhibitor,
    login: M,
    ignore_sleep: bool,
    preparing_for_sleep: bool,
}

impl<L: Launcher, M: SessionManager> Context<L, M> {
    pub fn new(supervisor: Supervisor<L>, login: M, ignore_sleep: bool) -> Self {
        Self {
            supervisor,
            inhibitor: SleepInhibitor::new(),
            login,
            ignore_sleep,
            preparing_for_sleep: false,
        }
    }

    pub fn supervisor(&self) -> &Supervisor<L> {
        &self.supervisor
    }

    pub fn inhibitor(&self) -> &SleepInhibitor {
        &self.inhibitor
    }

    pub fn is_preparing_for_sleep(&self) -> bool {
        self.preparing_for_sleep
    }

    fn child_status(&self) -> ChildStatus {
        ChildStatus {
            locker_running: self.supervisor.is_running(Role::Locker),
            notifier_configured: self.supervisor.is_configured(Role::Notifier),
        }
    }

    /// Descriptor to hand to children, only while a suspend is being prepared.
    fn sleep_lock(&self) -> Option<RawFd> {
        if self.preparing_for_sleep {
            self.inhibitor.raw_fd()
        } else {
            None
        }
    }

    /// Take the sleep lock for the next suspend, unless sleep handling is off.
    pub fn arm_sleep_lock(&mut self) {
        if self.ignore_sleep {
            return;
        }
        self.inhibitor.acquire(&self.login);
    }

    pub fn on_login_signal(&mut self, signal: LoginSignal) {
        match signal {
            LoginSignal::SleepLockAcquired(result) => self.inhibitor.on_acquired(result),
            LoginSignal::PrepareForSleep(true) => self.prepare_for_sleep(),
            LoginSignal::PrepareForSleep(false) => {
                debug!("Resumed from sleep");
                self.arm_sleep_lock();
            }
            LoginSignal::Lock => {
                info!("Session lock requested");
                self.supervisor.start(Role::Locker, None);
            }
            LoginSignal::Unlock => {
                info!("Session unlock requested");
                self.supervisor.stop(Role::Locker);
            }
        }
    }

    /// The locker has to be launched before the lock is closed, or the
    /// system may suspend with the screen still unlocked.
    fn prepare_for_sleep(&mut self) {
        info!("Preparing for sleep");
        self.preparing_for_sleep = true;
        let lock = self.sleep_lock();
        self.supervisor.start(Role::Locker, lock);
        self.inhibitor.release();
        self.preparing_for_sleep = false;
    }

    pub fn on_child_exit(&mut self, exit: ChildExit) {
        self.supervisor.on_exit(exit);
    }

    /// Ask both children to exit.
    pub fn terminate_children(&mut self) {
        self.supervisor.stop(Role::Notifier);
        self.supervisor.stop(Role::Locker);
    }

    /// Restart the server's idle timer unless the screen is locked.
    pub fn reset_saver(&self, saver: &dyn SaverControl) {
        if self.supervisor.is_running(Role::Locker) {
            debug!("Locker running, not resetting screen saver");
            return;
        }
        info!("Resetting screen saver");
        if let Err(e) = saver.reset() {
            warn!("Error resetting screen saver: {}", e);
        }
    }

    /// Drop the sleep lock on the way out.
    pub fn shutdown(&mut self) {
        self.inhibitor.release();
    }
}

impl<L: Launcher, M: SessionBridge> Context<L, M> {
    /// Apply a logind completion or signal.
    pub fn on_login_event(&mut self, event: M::Event) {
        match self.login.on_event(event, !self.ignore_sleep) {
            BridgeUpdate::ManagerReady => self.arm_sleep_lock(),
            BridgeUpdate::Signal(signal) => self.on_login_signal(signal),
            BridgeUpdate::None => {}
        }
    }
}

impl<L: Launcher, M: SessionManager> IdleEventSink for Context<L, M> {
    fn on_idle_event(&mut self, saver: &dyn SaverControl, event: IdleEvent) {
        for &action in transition(event, self.child_status()) {
            match action {
                IdleAction::ForceSaverActive => {
                    if let Err(e) = saver.force_active() {
                        warn!("Error activating built-in screen saver: {}", e);
                    }
                }
                IdleAction::Start(role) => {
                    let lock = self.sleep_lock();
                    self.supervisor.start(role, lock);
                }
                IdleAction::Stop(role) => self.supervisor.stop(role),
                IdleAction::SetIdleHint(idle) => self.login.set_idle_hint(idle),
            }
        }
    }
}

/// Process-level requests for the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Stop both children and leave the loop.
    Shutdown(&'static str),
    /// Restart the server's idle timer.
    ResetSaver,
}

/// Everything besides the X connection that can wake the main loop.
#[derive(Debug)]
pub struct Wakeups<E> {
    pub exits: UnboundedReceiver<ChildExit>,
    pub login: UnboundedReceiver<E>,
    pub control: UnboundedReceiver<Control>,
}

/// Process signals the daemon reacts to.
struct Signals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Signals {
    fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
            hangup: signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?,
        })
    }

    /// Translate signals into [`Control`] requests until the loop goes away.
    fn forward(mut self, control: UnboundedSender<Control>) {
        tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = self.interrupt.recv() => Control::Shutdown("SIGINT"),
                    _ = self.terminate.recv() => Control::Shutdown("SIGTERM"),
                    _ = self.hangup.recv() => Control::ResetSaver,
                };
                if control.send(request).is_err() {
                    break;
                }
            }
        });
    }
}

/// What woke the main loop.
enum Wake<E> {
    Connection(Result<(), EventSourceError>),
    ChildExit(ChildExit),
    Login(E),
    Control(Control),
}

/// Run the daemon until SIGINT/SIGTERM or a fatal error.
pub async fn run(config: &Config) -> Result<()> {
    let notifier = config.notifier_command()?;
    let locker = config.locker.clone();

    let (conn, root) = x11::connect().inspect_err(|_| {
        for diag in x11::diagnostics() {
            error!("  {}", diag);
        }
    })?;
    let mut source: EventSource<RustConnection, Context<ProcessLauncher, LoginClient>> =
        EventSource::new(conn)?;

    let (exit_tx, exits) = mpsc::unbounded_channel();
    let (login_tx, login_events) = mpsc::unbounded_channel();
    let (control_tx, control) = mpsc::unbounded_channel();

    let selector = SessionSelector::from_config(config.session_id.as_deref());
    let login = LoginClient::new(login_tx, selector);
    login.connect();

    let supervisor = Supervisor::new(
        ProcessLauncher::new(exit_tx),
        locker,
        notifier,
        config.transfer_sleep_lock,
    );
    let mut ctx = Context::new(supervisor, login, config.ignore_sleep);

    Signals::install()?.forward(control_tx);

    let claim = x11::screensaver::register(&mut source, root)?;
    info!("Waiting for idle events");

    let mut wakeups = Wakeups {
        exits,
        login: login_events,
        control,
    };
    let outcome = event_loop(&mut source, &mut ctx, &mut wakeups).await;

    claim.unregister(source.connection());
    ctx.shutdown();
    drop(ctx);
    drop(source);

    outcome
}

/// Serve every wake source until shutdown or a fatal connection error.
///
/// Queued X events are dispatched without waiting. Among sources that are
/// ready together, the X connection goes first.
pub async fn event_loop<C, L, M>(
    source: &mut EventSource<C, Context<L, M>>,
    ctx: &mut Context<L, M>,
    wakeups: &mut Wakeups<M::Event>,
) -> Result<()>
where
    C: EventConnection + SaverControl,
    L: Launcher,
    M: SessionBridge,
{
    loop {
        if source.prepare()? == Readiness::Pending {
            let wake = tokio::select! {
                biased;
                res = source.ready() => Wake::Connection(res),
                Some(exit) = wakeups.exits.recv() => Wake::ChildExit(exit),
                Some(event) = wakeups.login.recv() => Wake::Login(event),
                Some(request) = wakeups.control.recv() => Wake::Control(request),
            };

            match wake {
                Wake::Connection(res) => {
                    res?;
                    if !source.check()? {
                        continue;
                    }
                }
                Wake::ChildExit(exit) => {
                    ctx.on_child_exit(exit);
                    continue;
                }
                Wake::Login(event) => {
                    ctx.on_login_event(event);
                    continue;
                }
                Wake::Control(Control::Shutdown(reason)) => {
                    info!("Received {}, exiting", reason);
                    ctx.terminate_children();
                    return Ok(());
                }
                Wake::Control(Control::ResetSaver) => {
                    ctx.reset_saver(source.connection());
                    continue;
                }
            }
        }

        if source.dispatch(ctx)? == Dispatch::Stop {
            bail!("X event handling stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SaverKind, SaverState};
    use crate::x11::ScreenSaverError;
    use crate::x11::Registration;
    use crate::x11::fake::FakeConnection;
    use std::cell::RefCell;
    use std::fs::File;
    use std::io;
    use std::io::Write;
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::os::unix::net::UnixStream;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Launch(Role, Option<RawFd>),
        Terminate(Role, u32),
        IdleHint(bool),
        RequestSleepLock,
        ForceActive,
        Reset,
    }

    type Log = Rc<RefCell<Vec<Call>>>;

    struct FakeLauncher {
        log: Log,
        next_pid: u32,
    }

    impl Launcher for FakeLauncher {
        fn launch(&mut self, role: Role, _command: &[String], fd: Option<RawFd>) -> io::Result<u32> {
            self.log.borrow_mut().push(Call::Launch(role, fd));
            self.next_pid += 1;
            Ok(200 + self.next_pid)
        }

        fn terminate(&mut self, role: Role, pid: u32) -> io::Result<()> {
            self.log.borrow_mut().push(Call::Terminate(role, pid));
            Ok(())
        }
    }

    struct FakeManager {
        log: Log,
    }

    impl SessionManager for FakeManager {
        fn request_sleep_lock(&self) -> bool {
            self.log.borrow_mut().push(Call::RequestSleepLock);
            true
        }

        fn set_idle_hint(&self, idle: bool) {
            self.log.borrow_mut().push(Call::IdleHint(idle));
        }
    }

    impl SessionBridge for FakeManager {
        type Event = LoginSignal;

        fn on_event(&mut self, event: LoginSignal, _watch_sleep: bool) -> BridgeUpdate {
            BridgeUpdate::Signal(event)
        }
    }

    struct FakeSaver {
        log: Log,
    }

    impl SaverControl for FakeSaver {
        fn force_active(&self) -> Result<(), ScreenSaverError> {
            self.log.borrow_mut().push(Call::ForceActive);
            Ok(())
        }

        fn reset(&self) -> Result<(), ScreenSaverError> {
            self.log.borrow_mut().push(Call::Reset);
            Ok(())
        }
    }

    struct Harness {
        ctx: Context<FakeLauncher, FakeManager>,
        saver: FakeSaver,
        log: Log,
    }

    impl Harness {
        fn new(notifier: bool, transfer_sleep_lock: bool, ignore_sleep: bool) -> Self {
            let log = Log::default();
            let supervisor = Supervisor::new(
                FakeLauncher {
                    log: log.clone(),
                    next_pid: 0,
                },
                vec!["i3lock".to_string(), "-n".to_string()],
                notifier.then(|| vec!["notify-send".to_string(), "idle".to_string()]),
                transfer_sleep_lock,
            );
            let manager = FakeManager { log: log.clone() };
            Self {
                ctx: Context::new(supervisor, manager, ignore_sleep),
                saver: FakeSaver { log: log.clone() },
                log,
            }
        }

        fn idle(&mut self, state: SaverState, kind: SaverKind, forced: bool) {
            self.ctx
                .on_idle_event(&self.saver, IdleEvent::new(state, kind, forced));
        }

        fn external(&mut self, state: SaverState) {
            self.idle(state, SaverKind::External, false);
        }

        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.log.borrow_mut())
        }

        fn hold_sleep_lock(&mut self) -> RawFd {
            self.ctx.arm_sleep_lock();
            let fd: OwnedFd = File::open("/dev/null").unwrap().into();
            let raw = fd.as_raw_fd();
            self.ctx
                .on_login_signal(LoginSignal::SleepLockAcquired(Ok(fd)));
            assert!(self.ctx.inhibitor().is_held());
            raw
        }
    }

    #[test]
    fn test_idle_without_notifier_locks() {
        let mut h = Harness::new(false, false, false);
        h.external(SaverState::Started);

        assert_eq!(
            h.take(),
            vec![Call::Launch(Role::Locker, None), Call::IdleHint(true)]
        );
        assert!(h.ctx.supervisor().is_running(Role::Locker));
    }

    #[test]
    fn test_idle_with_notifier_notifies_first() {
        let mut h = Harness::new(true, false, false);
        h.external(SaverState::Started);

        assert_eq!(h.take(), vec![Call::Launch(Role::Notifier, None)]);
        assert!(!h.ctx.supervisor().is_running(Role::Locker));
    }

    #[test]
    fn test_forced_idle_locks_over_notifier() {
        let mut h = Harness::new(true, false, false);
        h.external(SaverState::Started);
        let notifier = h.ctx.supervisor().pid(Role::Notifier).unwrap();
        h.take();

        h.idle(SaverState::Started, SaverKind::External, true);
        assert_eq!(
            h.take(),
            vec![
                Call::Terminate(Role::Notifier, notifier),
                Call::Launch(Role::Locker, None),
                Call::IdleHint(true),
            ]
        );
    }

    #[test]
    fn test_activity_stops_notifier() {
        let mut h = Harness::new(true, false, false);
        h.external(SaverState::Started);
        let notifier = h.ctx.supervisor().pid(Role::Notifier).unwrap();
        h.take();

        h.external(SaverState::Ended);
        assert_eq!(
            h.take(),
            vec![
                Call::Terminate(Role::Notifier, notifier),
                Call::IdleHint(false)
            ]
        );
    }

    #[test]
    fn test_activity_leaves_locker_running() {
        let mut h = Harness::new(false, false, false);
        h.external(SaverState::Started);
        h.take();

        h.idle(SaverState::Ended, SaverKind::External, true);
        assert_eq!(h.take(), vec![Call::IdleHint(false)]);
        assert!(h.ctx.supervisor().is_running(Role::Locker));
    }

    #[test]
    fn test_internal_saver_is_forced_active() {
        let mut h = Harness::new(true, false, false);
        h.idle(SaverState::Started, SaverKind::Internal, false);
        assert_eq!(h.take(), vec![Call::ForceActive]);
    }

    #[test]
    fn test_cycle_locks_after_notifier() {
        let mut h = Harness::new(true, false, false);
        h.external(SaverState::Started);
        let notifier = h.ctx.supervisor().pid(Role::Notifier).unwrap();
        h.take();

        h.external(SaverState::Cycling);
        assert_eq!(
            h.take(),
            vec![
                Call::IdleHint(true),
                Call::Terminate(Role::Notifier, notifier),
                Call::Launch(Role::Locker, None),
            ]
        );

        h.external(SaverState::Cycling);
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_sleep_launches_locker_with_lock_before_release() {
        let mut h = Harness::new(false, true, false);
        let fd = h.hold_sleep_lock();
        h.take();

        h.ctx.on_login_signal(LoginSignal::PrepareForSleep(true));

        assert_eq!(h.take(), vec![Call::Launch(Role::Locker, Some(fd))]);
        assert!(!h.ctx.inhibitor().is_held());
        assert!(!h.ctx.is_preparing_for_sleep());
    }

    #[test]
    fn test_sleep_keeps_lock_from_locker_unless_transferred() {
        let mut h = Harness::new(false, false, false);
        h.hold_sleep_lock();
        h.take();

        h.ctx.on_login_signal(LoginSignal::PrepareForSleep(true));

        assert_eq!(h.take(), vec![Call::Launch(Role::Locker, None)]);
        assert!(!h.ctx.inhibitor().is_held());
    }

    #[test]
    fn test_sleep_while_locked_releases_without_respawn() {
        let mut h = Harness::new(false, true, false);
        h.ctx.on_login_signal(LoginSignal::Lock);
        h.hold_sleep_lock();
        h.take();

        h.ctx.on_login_signal(LoginSignal::PrepareForSleep(true));

        assert!(h.take().is_empty());
        assert!(!h.ctx.inhibitor().is_held());
    }

    #[test]
    fn test_resume_rearms_sleep_lock() {
        let mut h = Harness::new(false, false, false);
        h.hold_sleep_lock();
        h.ctx.on_login_signal(LoginSignal::PrepareForSleep(true));
        h.take();

        h.ctx.on_login_signal(LoginSignal::PrepareForSleep(false));
        assert_eq!(h.take(), vec![Call::RequestSleepLock]);
    }

    #[test]
    fn test_ignore_sleep_never_requests_lock() {
        let mut h = Harness::new(false, false, true);
        h.ctx.arm_sleep_lock();
        h.ctx.on_login_signal(LoginSignal::PrepareForSleep(false));
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_lock_and_unlock_signals() {
        let mut h = Harness::new(true, false, false);
        h.ctx.on_login_signal(LoginSignal::Lock);
        let locker = h.ctx.supervisor().pid(Role::Locker).unwrap();

        h.ctx.on_login_signal(LoginSignal::Lock);
        h.ctx.on_login_signal(LoginSignal::Unlock);

        assert_eq!(
            h.take(),
            vec![
                Call::Launch(Role::Locker, None),
                Call::Terminate(Role::Locker, locker),
            ]
        );
    }

    #[test]
    fn test_reset_skipped_while_locked() {
        let mut h = Harness::new(false, false, false);
        h.ctx.reset_saver(&h.saver);
        assert_eq!(h.take(), vec![Call::Reset]);

        h.ctx.on_login_signal(LoginSignal::Lock);
        h.take();
        h.ctx.reset_saver(&h.saver);
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_terminate_children_stops_both() {
        let mut h = Harness::new(true, false, false);
        h.external(SaverState::Started);
        let notifier = h.ctx.supervisor().pid(Role::Notifier).unwrap();
        h.ctx.on_login_signal(LoginSignal::Lock);
        let locker = h.ctx.supervisor().pid(Role::Locker).unwrap();
        h.take();

        h.ctx.terminate_children();
        // The notifier stays tracked until its exit is reaped.
        assert_eq!(
            h.take(),
            vec![
                Call::Terminate(Role::Notifier, notifier),
                Call::Terminate(Role::Locker, locker),
            ]
        );
    }

    #[test]
    fn test_shutdown_releases_sleep_lock() {
        let mut h = Harness::new(false, false, false);
        h.hold_sleep_lock();
        h.ctx.shutdown();
        assert!(!h.ctx.inhibitor().is_held());
    }

    type FakeSource = EventSource<FakeConnection, Context<FakeLauncher, FakeManager>>;

    /// Loop inputs: the X peer plus senders for the other wake sources.
    struct Feeds {
        peer: UnixStream,
        exits: mpsc::UnboundedSender<ChildExit>,
        login: mpsc::UnboundedSender<LoginSignal>,
        control: mpsc::UnboundedSender<Control>,
    }

    /// Byte 1 is an idle start, byte 2 is activity.
    fn idle_byte(byte: u8) -> IdleEvent {
        let state = if byte == 1 {
            SaverState::Started
        } else {
            SaverState::Ended
        };
        IdleEvent::new(state, SaverKind::External, false)
    }

    fn wire(registration: Registration) -> (FakeSource, Wakeups<LoginSignal>, Feeds) {
        let (conn, peer) = FakeConnection::pair();
        let mut source: FakeSource = EventSource::with_registration(conn, registration).unwrap();
        source.set_callback(|ctx, conn: &FakeConnection, byte| {
            ctx.on_idle_event(conn, idle_byte(byte));
            Dispatch::Continue
        });

        let (exits_tx, exits) = mpsc::unbounded_channel();
        let (login_tx, login) = mpsc::unbounded_channel();
        let (control_tx, control) = mpsc::unbounded_channel();
        let wakeups = Wakeups {
            exits,
            login,
            control,
        };
        let feeds = Feeds {
            peer,
            exits: exits_tx,
            login: login_tx,
            control: control_tx,
        };
        (source, wakeups, feeds)
    }

    #[tokio::test]
    async fn test_loop_dispatches_queued_events_without_waiting() {
        let mut h = Harness::new(false, false, false);
        let (mut source, mut wakeups, feeds) = wire(Registration::UnixFd);
        source.connection().queued.borrow_mut().push_back(1);
        feeds.control.send(Control::Shutdown("SIGTERM")).unwrap();

        event_loop(&mut source, &mut h.ctx, &mut wakeups)
            .await
            .unwrap();

        assert_eq!(
            h.take(),
            vec![
                Call::Launch(Role::Locker, None),
                Call::IdleHint(true),
                Call::Terminate(Role::Locker, 201),
            ]
        );
    }

    #[tokio::test]
    async fn test_loop_fails_when_connection_is_lost() {
        for registration in [Registration::UnixFd, Registration::PollFd] {
            let mut h = Harness::new(false, false, false);
            let (mut source, mut wakeups, feeds) = wire(registration);
            drop(feeds.peer);

            let err = event_loop(&mut source, &mut h.ctx, &mut wakeups)
                .await
                .unwrap_err();

            assert!(
                matches!(
                    err.downcast_ref::<EventSourceError>(),
                    Some(EventSourceError::ConnectionLost(_))
                ),
                "{registration:?}: {err}"
            );
            assert!(h.take().is_empty());
        }
    }

    #[tokio::test]
    async fn test_loop_shutdown_stops_both_children() {
        let mut h = Harness::new(true, false, false);
        let (mut source, mut wakeups, feeds) = wire(Registration::UnixFd);
        source.connection().queued.borrow_mut().push_back(1);
        feeds.login.send(LoginSignal::Lock).unwrap();
        feeds.control.send(Control::Shutdown("SIGINT")).unwrap();

        event_loop(&mut source, &mut h.ctx, &mut wakeups)
            .await
            .unwrap();

        assert_eq!(
            h.take(),
            vec![
                Call::Launch(Role::Notifier, None),
                Call::Terminate(Role::Notifier, 201),
                Call::Launch(Role::Locker, None),
                Call::Terminate(Role::Notifier, 201),
                Call::Terminate(Role::Locker, 202),
            ]
        );
    }

    #[tokio::test]
    async fn test_loop_reaps_children_and_resets_saver() {
        let mut h = Harness::new(false, false, false);
        let (mut source, mut wakeups, feeds) = wire(Registration::PollFd);
        source.connection().queued.borrow_mut().push_back(1);

        // The exit is reaped before the reset request is served.
        feeds.exits.send(ChildExit {
            role: Role::Locker,
            pid: 201,
            status: Ok(std::os::unix::process::ExitStatusExt::from_raw(0)),
        })
        .unwrap();
        feeds.control.send(Control::ResetSaver).unwrap();
        feeds.control.send(Control::Shutdown("SIGTERM")).unwrap();

        event_loop(&mut source, &mut h.ctx, &mut wakeups)
            .await
            .unwrap();

        assert!(!h.ctx.supervisor().is_running(Role::Locker));
        assert_eq!(source.connection().resets.get(), 1);
        assert_eq!(
            h.take(),
            vec![Call::Launch(Role::Locker, None), Call::IdleHint(true)]
        );
    }

    #[tokio::test]
    async fn test_loop_dispatches_wire_events() {
        for registration in [Registration::UnixFd, Registration::PollFd] {
            let mut h = Harness::new(true, false, false);
            let (mut source, mut wakeups, mut feeds) = wire(registration);
            feeds.peer.write_all(&[1, 2]).unwrap();

            let log = h.log.clone();
            let control = feeds.control.clone();
            let stop_after_activity = async move {
                while log.borrow().len() < 3 {
                    tokio::task::yield_now().await;
                }
                control.send(Control::Shutdown("SIGTERM")).unwrap();
            };

            let (outcome, ()) = tokio::join!(
                event_loop(&mut source, &mut h.ctx, &mut wakeups),
                stop_after_activity
            );
            outcome.unwrap();

            assert_eq!(
                h.take(),
                vec![
                    Call::Launch(Role::Notifier, None),
                    Call::Terminate(Role::Notifier, 201),
                    Call::IdleHint(false),
                    Call::Terminate(Role::Notifier, 201),
                ],
                "{registration:?}"
            );
        }
    }
}
