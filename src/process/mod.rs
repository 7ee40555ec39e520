//! Running one solver invocation under a wall-clock bound.
//!
//! [`BoundedProcess`] owns the child for its whole life: when the bound is exceeded the child is
//! killed and reaped before [`BoundedProcess::wait_timeout`] returns, and a process that is
//! dropped early (error path, panic) is killed and reaped in `Drop`. No child outlives its guard.
//!
//! On Linux the child can additionally be placed in a cgroup v2 limiting its memory and CPUs.

#[cfg(target_os = "linux")]
mod container_linux;

#[cfg(target_os = "linux")]
use container_linux::Container;

#[cfg(not(target_os = "linux"))]
mod container_stub;

#[cfg(not(target_os = "linux"))]
use container_stub::Container;

use std::{
    fs::File,
    process::{Child, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use tracing::{trace, warn};

/// Resource limits applied to every run. Empty means uncontained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Containment {
    /// Memory cap in megabytes.
    pub memory_limit_mb: Option<u64>,
    /// CPU list such as `"0-3,6"`.
    pub cpus: Option<String>,
}

impl Containment {
    pub fn is_empty(&self) -> bool {
        self.memory_limit_mb.is_none() && self.cpus.is_none()
    }
}

/// How a bounded run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The child exited by itself.
    Exited {
        status: ExitStatus,
        elapsed: Duration,
    },
    /// The bound was exceeded; the child has been killed and reaped.
    TimedOut { elapsed: Duration },
}

fn create_process(call: &[String], output: &File) -> anyhow::Result<Child> {
    let Some((command, args)) = call.split_first() else {
        bail!("empty command line");
    };
    let stdout = output.try_clone().context("could not share output file")?;
    let stderr = output.try_clone().context("could not share output file")?;
    let mut process = std::process::Command::new(command);
    process
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    // own process group, so whatever the solver forks can be killed with it
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        process.process_group(0);
    }

    process
        .spawn()
        .with_context(|| format!("command '{command}' not found"))
}

/// SIGKILL every process of the group led by `child`. Falls back to killing `child` alone where
/// process groups do not exist.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::{
            errno::Errno,
            sys::signal::{killpg, Signal},
            unistd::Pid,
        };
        // the group id is the leader's pid, and stays reserved while any member is alive
        let pgid = Pid::from_raw(child.id() as i32);
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => trace!("killpg failed: {e}"),
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = child.kill() {
            trace!("kill failed: {e}");
        }
    }
}

/// A child process with guaranteed kill-and-reap.
#[derive(Debug)]
pub struct BoundedProcess {
    child: Child,
    container: Option<Container>,
    started: Instant,
    reaped: bool,
}

impl BoundedProcess {
    /// Spawn `call` with stdout and stderr both written to `output`, inside a cgroup enforcing
    /// `containment`.
    ///
    /// # Errors
    /// Returns an error if the cgroup cannot be created (or the platform has none), or if the
    /// command cannot be spawned.
    pub fn launch(
        call: &[String],
        output: &File,
        containment: &Containment,
    ) -> anyhow::Result<BoundedProcess> {
        let container = Container::create(containment).context("could not create cgroup")?;
        let mut child = create_process(call, output)?;
        if let Err(e) = container.add(&child) {
            let _ = child.kill();
            let _ = child.wait();
            container.release();
            return Err(e).context("could not add process to cgroup");
        }

        Ok(BoundedProcess {
            child,
            container: Some(container),
            started: Instant::now(),
            reaped: false,
        })
    }

    /// Spawn `call` with stdout and stderr both written to `output`, without resource limits.
    ///
    /// # Errors
    /// Returns an error if the command cannot be spawned.
    pub fn launch_without_container(
        call: &[String],
        output: &File,
    ) -> anyhow::Result<BoundedProcess> {
        let child = create_process(call, output).context("could not create process")?;

        Ok(BoundedProcess {
            child,
            container: None,
            started: Instant::now(),
            reaped: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Block until the child exits or `timeout` elapses, whichever comes first.
    ///
    /// # Errors
    /// Returns an error if the child cannot be waited on or killed.
    pub fn wait_timeout(&mut self, timeout: Duration) -> anyhow::Result<ProcessExit> {
        let deadline = self.started + timeout;
        let poll = Duration::from_millis(10).min(timeout / 10).max(Duration::from_millis(1));
        loop {
            if let Some(status) = self.child.try_wait().context("could not wait for process")? {
                self.reaped = true;
                // background processes the solver left behind
                kill_group(&mut self.child);
                if let Some(container) = self.container.take() {
                    container.release();
                }
                return Ok(ProcessExit::Exited {
                    status,
                    elapsed: self.started.elapsed(),
                });
            }
            if Instant::now() >= deadline {
                trace!(pid = self.child.id(), ?timeout, "deadline reached, killing");
                self.kill_and_reap()?;
                return Ok(ProcessExit::TimedOut {
                    elapsed: self.started.elapsed(),
                });
            }
            std::thread::sleep(poll);
        }
    }

    fn kill_and_reap(&mut self) -> anyhow::Result<()> {
        if self.reaped {
            return Ok(());
        }
        let mut killed = Ok(());
        if let Some(container) = self.container.take() {
            killed = container.kill().context("could not kill cgroup");
            container.release();
        }
        // also reaches what a failed cgroup kill left alive
        kill_group(&mut self.child);
        self.child.wait().context("could not reap process")?;
        self.reaped = true;
        killed
    }
}

impl Drop for BoundedProcess {
    fn drop(&mut self) {
        if !self.reaped {
            if let Err(e) = self.kill_and_reap() {
                warn!(pid = self.child.id(), "could not clean up process on drop: {e:#}");
            }
        }
    }
}
