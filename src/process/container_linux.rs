use std::{
    process::Child,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use anyhow::{self, bail, Context};
use cgroups_rs::Cgroup;

use super::Containment;

pub fn get_current_user_id() -> anyhow::Result<String> {
    let output = std::process::Command::new("id")
        .arg("-u")
        .output()
        .context("Could not launch 'id -u'")?;
    let stdout = output.stdout;
    let untrimed_id = std::str::from_utf8(&stdout).context("id is not a valid string")?;
    Ok(untrimed_id.trim().to_string())
}

pub fn get_cgroup_path(user_id: &str, group_name: &str) -> String {
    format!("user.slice/user-{user_id}.slice/user@{user_id}.service/{group_name}")
}

/// A cgroup holding exactly one benchmarked process.
#[derive(Debug)]
pub struct Container {
    cgroup: Cgroup,
}

impl Container {
    /// Create a fresh cgroup with the limits of `containment`.
    ///
    /// # Errors
    ///
    /// Returns an error if cgroup v2 is unavailable or the limits are rejected.
    pub fn create(containment: &Containment) -> anyhow::Result<Container> {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let user_id = get_current_user_id().context("could not get user id")?;
        let group_name = format!(
            "SOLVER_BENCH_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let path = get_cgroup_path(&user_id, &group_name);

        let mut builder = cgroups_rs::cgroup_builder::CgroupBuilder::new(&path);
        if let Some(megabytes) = containment.memory_limit_mb {
            let bytes = i64::try_from(megabytes.saturating_mul(1024 * 1024))
                .context("memory limit too large")?;
            builder = builder.memory().memory_hard_limit(bytes).done();
        }
        if let Some(cpus) = &containment.cpus {
            builder = builder.cpu().cpus(cpus.clone()).done();
        }
        let cgroup = builder
            .build(cgroups_rs::hierarchies::auto())
            .context("could not create cgroup")?;
        Ok(Container { cgroup })
    }

    pub fn add(&self, child: &Child) -> anyhow::Result<()> {
        let pid = child.id() as u64;
        self.cgroup
            .add_task_by_tgid(cgroups_rs::CgroupPid { pid })
            .context("could not add task to cgroup")
    }

    /// Kill every task of the cgroup and wait until it is empty.
    pub fn kill(&self) -> anyhow::Result<()> {
        const CLEANUP_DURATION: Duration = Duration::from_secs(1);
        self.cgroup.kill().context("could not kill process")?;
        let deadline = Instant::now() + CLEANUP_DURATION;
        while !self.cgroup.tasks().is_empty() {
            if Instant::now() > deadline {
                bail!("process cleanup timed out");
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    pub fn release(self) {
        if let Err(e) = self.cgroup.delete() {
            // Oh well... Whatever...
            tracing::warn!("Failed to remove cgroup. If this happens a lot, it may slow down the computer. {e}");
        }
    }
}
