//! Start, stop and restart the background service.
//!
//! ```text
//! Stopped --start--> Starting --(marker appears)--> Running
//!    ^                                                 |
//!    +------------------ StopRequested <----stop-------+
//! ```
//!
//! The supervisor never hears from the child directly. A spawned service
//! binds its listener, writes its pid through [`ProcessRegistry::save`] and
//! starts serving; the supervisor only observes that by polling the
//! registry.
//!
//! Concurrent starts: two clients can both see "not running" and both spawn
//! a service. There is no cross-process lock. The loser fails to bind the
//! port and exits without touching the marker, so the marker ends up naming
//! the process that owns the port. If the loser somehow got past the bind it
//! would overwrite the marker last and be the instance `is_running` reports;
//! the other becomes a harmless orphan. Both waiting clients see a live
//! marker either way.

use crate::descriptor::StartupDescriptor;
use crate::error::ServiceError;
use crate::registry::{process_alive, ProcessRegistry};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    StopRequested,
}

/// Timing of the start-and-wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Pause before the first liveness check, while the child initializes.
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    /// Total polling budget after the initial delay.
    pub timeout: Duration,
    /// Extra pause after the marker appears, before reporting ready.
    pub confirmation_delay: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_millis(10_000),
            confirmation_delay: Duration::from_millis(500),
        }
    }
}

/// What to execute for the background service.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub descriptor: StartupDescriptor,
}

impl LaunchSpec {
    /// `<executable> start`, where the executable defaults to the running
    /// binary.
    pub fn service(
        executable: Option<PathBuf>,
        descriptor: StartupDescriptor,
    ) -> Result<Self, ServiceError> {
        let program = match executable {
            Some(path) => path,
            None => std::env::current_exe().map_err(ServiceError::Executable)?,
        };

        Ok(Self {
            program,
            args: vec![OsString::from("start")],
            descriptor,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub reference_count: u32,
    pub marker: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    AlreadyRunning(Option<u32>),
    Started(Option<u32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The marker named `pid`; `signalled` is false when that process was
    /// already gone.
    Stopped { pid: u32, signalled: bool },
    NotRunning,
}

pub struct ServiceSupervisor {
    registry: ProcessRegistry,
    launch: LaunchSpec,
    policy: WaitPolicy,
    state: ServiceState,
}

impl ServiceSupervisor {
    pub fn new(registry: ProcessRegistry, launch: LaunchSpec) -> Self {
        let state = if registry.is_running() {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        };

        Self {
            registry,
            launch,
            policy: WaitPolicy::default(),
            state,
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn status(&self) -> ServiceStatus {
        let pid = self.registry.read_pid();
        ServiceStatus {
            running: self.registry.is_running(),
            pid,
            reference_count: self.registry.reference_count(),
            marker: self.registry.pid_file().to_path_buf(),
        }
    }

    /// Launch the service in the background and return its pid without
    /// waiting for it to come up.
    pub fn spawn_detached(&mut self) -> Result<u32, ServiceError> {
        let mut cmd = Command::new(&self.launch.program);
        cmd.args(&self.launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        self.launch.descriptor.apply(&mut cmd);

        // Own process group: Ctrl-C in the client's terminal must not reach
        // the service.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|source| ServiceError::Spawn {
            program: self.launch.program.clone(),
            source,
        })?;
        let pid = child.id();
        // Not awaited; the service outlives this invocation.
        drop(child);

        self.state = ServiceState::Starting;
        tracing::info!(
            pid,
            program = %self.launch.program.display(),
            port = self.launch.descriptor.port,
            "spawned background service"
        );
        Ok(pid)
    }

    /// Poll the registry until the service is up or the policy times out.
    pub async fn wait_until_running(&mut self) -> bool {
        sleep(self.policy.initial_delay).await;

        let deadline = Instant::now() + self.policy.timeout;
        loop {
            if self.registry.is_running() {
                sleep(self.policy.confirmation_delay).await;
                self.state = ServiceState::Running;
                return true;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(self.policy.poll_interval).await;
        }

        tracing::warn!(timeout = ?self.policy.timeout, "service did not report ready");
        self.state = ServiceState::Stopped;
        false
    }

    /// Start the service unless it is already up, then wait for it.
    ///
    /// A timeout is an error: the caller must not send traffic.
    pub async fn ensure_running(&mut self) -> Result<EnsureOutcome, ServiceError> {
        if self.registry.is_running() {
            self.state = ServiceState::Running;
            return Ok(EnsureOutcome::AlreadyRunning(self.registry.read_pid()));
        }

        self.spawn_detached()?;
        if self.wait_until_running().await {
            Ok(EnsureOutcome::Started(self.registry.read_pid()))
        } else {
            Err(ServiceError::StartTimeout(self.policy.timeout))
        }
    }

    /// Signal the recorded service and clear the registry.
    ///
    /// The marker and the reference count are removed whether or not the
    /// signal was delivered: a process that is already gone is the state we
    /// wanted.
    pub fn stop(&mut self) -> StopOutcome {
        self.state = ServiceState::StopRequested;

        let outcome = match self.registry.read_pid() {
            Some(pid) => {
                let signalled = terminate(pid);
                if !signalled {
                    tracing::debug!(pid, "service process was already gone");
                }
                StopOutcome::Stopped { pid, signalled }
            }
            None => StopOutcome::NotRunning,
        };

        self.registry.cleanup();
        self.registry.reset_reference_count();
        self.state = ServiceState::Stopped;
        outcome
    }

    /// Stop, wait for the old process to let go of its port, then spawn a
    /// fresh service. The caller decides whether to wait for readiness.
    pub async fn restart(&mut self) -> Result<(StopOutcome, u32), ServiceError> {
        let stopped = self.stop();
        if let StopOutcome::Stopped {
            pid,
            signalled: true,
        } = stopped
        {
            self.wait_for_exit(pid).await;
        }
        let pid = self.spawn_detached()?;
        Ok((stopped, pid))
    }

    async fn wait_for_exit(&self, pid: u32) {
        let deadline = Instant::now() + self.policy.timeout;
        while process_alive(pid) {
            if Instant::now() >= deadline {
                tracing::warn!(pid, "previous service still running, starting anyway");
                return;
            }
            sleep(self.policy.poll_interval).await;
        }
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(pid, error = %e, "SIGTERM not delivered");
            false
        }
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> bool {
    Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
