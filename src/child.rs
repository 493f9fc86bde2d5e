//! Notifier and locker process supervision.
//!
//! At most one process runs per role. A handle is only cleared once the exit
//! status has been reaped, so a `start` racing a pending `stop` is a no-op.

use std::io;
use std::os::fd::RawFd;
use std::process::ExitStatus;

use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::domain::Role;

/// Environment variable carrying the inherited sleep lock descriptor.
pub const SLEEP_LOCK_FD_VAR: &str = "XSS_SLEEP_LOCK_FD";

/// Reaped exit status of a child.
#[derive(Debug)]
pub struct ChildExit {
    pub role: Role,
    pub pid: u32,
    pub status: io::Result<ExitStatus>,
}

/// Starts and signals processes. Exits are reported asynchronously.
pub trait Launcher {
    /// Spawn `command`, optionally passing `sleep_lock` through to it.
    fn launch(&mut self, role: Role, command: &[String], sleep_lock: Option<RawFd>)
    -> io::Result<u32>;

    /// Ask a process to terminate.
    fn terminate(&mut self, role: Role, pid: u32) -> io::Result<()>;
}

/// Static description of one role.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub role: Role,

    /// Argument vector; `None` if the role is not configured.
    pub command: Option<Vec<String>>,

    /// Role to stop before this one is started.
    pub kill_first: Option<Role>,

    /// Whether the sleep lock descriptor is handed over at spawn time.
    pub pass_sleep_lock: bool,
}

#[derive(Debug)]
struct Child {
    spec: ChildSpec,
    pid: Option<u32>,
}

/// Supervisor for the notifier and the locker.
#[derive(Debug)]
pub struct Supervisor<L> {
    launcher: L,
    notifier: Child,
    locker: Child,
}

impl<L: Launcher> Supervisor<L> {
    /// Create a supervisor. The locker always silences the notifier first.
    pub fn new(
        launcher: L,
        locker: Vec<String>,
        notifier: Option<Vec<String>>,
        pass_sleep_lock: bool,
    ) -> Self {
        Self {
            launcher,
            notifier: Child {
                spec: ChildSpec {
                    role: Role::Notifier,
                    command: notifier,
                    kill_first: None,
                    pass_sleep_lock: false,
                },
                pid: None,
            },
            locker: Child {
                spec: ChildSpec {
                    role: Role::Locker,
                    command: Some(locker),
                    kill_first: Some(Role::Notifier),
                    pass_sleep_lock,
                },
                pid: None,
            },
        }
    }

    fn child(&self, role: Role) -> &Child {
        match role {
            Role::Notifier => &self.notifier,
            Role::Locker => &self.locker,
        }
    }

    fn child_mut(&mut self, role: Role) -> &mut Child {
        match role {
            Role::Notifier => &mut self.notifier,
            Role::Locker => &mut self.locker,
        }
    }

    pub fn is_configured(&self, role: Role) -> bool {
        self.child(role).spec.command.is_some()
    }

    pub fn is_running(&self, role: Role) -> bool {
        self.child(role).pid.is_some()
    }

    pub fn pid(&self, role: Role) -> Option<u32> {
        self.child(role).pid
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Start `role` unless it is already running.
    ///
    /// `sleep_lock` is only passed on if the role is flagged for it; callers
    /// supply it while a sleep is being prepared.
    pub fn start(&mut self, role: Role, sleep_lock: Option<RawFd>) {
        if self.is_running(role) {
            debug!("{} already running", role);
            return;
        }

        if let Some(first) = self.child(role).spec.kill_first {
            self.stop(first);
        }

        let Self {
            launcher,
            notifier,
            locker,
        } = self;
        let child = match role {
            Role::Notifier => notifier,
            Role::Locker => locker,
        };

        let Some(command) = child.spec.command.as_deref() else {
            debug!("No {} configured", role);
            return;
        };
        let sleep_lock = sleep_lock.filter(|_| child.spec.pass_sleep_lock);

        match launcher.launch(role, command, sleep_lock) {
            Ok(pid) => {
                info!("Started {} (pid {})", role, pid);
                child.pid = Some(pid);
            }
            Err(e) => warn!("Error spawning {}: {}", role, e),
        }
    }

    /// Ask `role` to terminate. The handle stays until the exit is reaped.
    pub fn stop(&mut self, role: Role) {
        let Some(pid) = self.child(role).pid else {
            return;
        };

        debug!("Stopping {} (pid {})", role, pid);
        if let Err(e) = self.launcher.terminate(role, pid) {
            warn!("Error sending SIGTERM to {}: {}", role, e);
        }
    }

    /// Record a reaped exit.
    pub fn on_exit(&mut self, exit: ChildExit) {
        let child = self.child_mut(exit.role);
        if child.pid != Some(exit.pid) {
            debug!("Ignoring exit of stale {} pid {}", exit.role, exit.pid);
            return;
        }
        child.pid = None;

        match exit.status {
            Ok(status) if status.success() => debug!("{} exited", exit.role),
            Ok(status) => info!("{} exited abnormally: {}", exit.role, status),
            Err(e) => info!("Error waiting for {}: {}", exit.role, e),
        }
    }
}

/// Launcher backed by `tokio::process`.
///
/// Each child gets a task that waits for it and reports to `exits`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    exits: UnboundedSender<ChildExit>,
}

impl ProcessLauncher {
    pub fn new(exits: UnboundedSender<ChildExit>) -> Self {
        Self { exits }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &mut self,
        role: Role,
        command: &[String],
        sleep_lock: Option<RawFd>,
    ) -> io::Result<u32> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args);

        if let Some(fd) = sleep_lock {
            cmd.env(SLEEP_LOCK_FD_VAR, fd.to_string());
            // SAFETY: only async-signal-safe fcntl calls run between fork and exec.
            unsafe {
                cmd.pre_exec(move || inherit_fd(fd));
            }
        }

        let mut child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("child exited before its pid was read"))?;

        let exits = self.exits.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            if exits.send(ChildExit { role, pid, status }).is_err() {
                debug!("Exit of {} (pid {}) after shutdown", role, pid);
            }
        });

        Ok(pid)
    }

    fn terminate(&mut self, _role: Role, pid: u32) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

        // SAFETY: kill has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Clear close-on-exec so `fd` survives into the child's new image.
fn inherit_fd(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl on a descriptor number.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
