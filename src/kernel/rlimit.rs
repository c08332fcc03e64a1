//! Process self-restriction for the worker role.
//!
//! Applied by the worker to itself before it reads untrusted input. There is
//! no fork/exec after this point, so the limits bound the interpreter run.

use crate::config::types::{Result, ServiceError};
use std::time::Duration;

/// Descriptors a worker needs: stdin, stdout, stderr and a little slack
pub const WORKER_MAX_OPEN_FILES: u64 = 8;

/// Kernel-level ceilings for one worker process
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerLimits {
    pub address_space_bytes: u64,
    pub cpu_seconds: u64,
    pub file_size_bytes: u64,
    pub open_files: u64,
    pub core_bytes: u64,
}

impl WorkerLimits {
    /// Derive ceilings from the run's heap and wall-clock budget.
    ///
    /// The address space gets `headroom` on top of the heap ceiling for the
    /// binary, thread stacks and allocator overhead. CPU time gets one spare
    /// second so a wall-clock kill normally arrives first.
    pub fn for_run(memory_bytes: u64, wall_clock: Duration, headroom: u64) -> Self {
        let wall_secs = wall_clock.as_secs() + u64::from(wall_clock.subsec_nanos() > 0);
        Self {
            address_space_bytes: memory_bytes.saturating_add(headroom),
            cpu_seconds: wall_secs.max(1) + 1,
            file_size_bytes: 0,
            open_files: WORKER_MAX_OPEN_FILES,
            core_bytes: 0,
        }
    }
}

#[cfg(unix)]
fn apply_rlimit_value(name: &str, resource: nix::sys::resource::Resource, value: u64) -> Result<()> {
    use nix::sys::resource::setrlimit;

    setrlimit(resource, value as libc::rlim_t, value as libc::rlim_t).map_err(|e| {
        ServiceError::Worker(format!("failed to apply {}={}: {}", name, value, e))
    })
}

/// Apply every ceiling in `limits` to the calling process
#[cfg(unix)]
pub fn apply_worker_limits(limits: &WorkerLimits) -> Result<()> {
    use nix::sys::resource::Resource;

    apply_rlimit_value("RLIMIT_CORE", Resource::RLIMIT_CORE, limits.core_bytes)?;
    apply_rlimit_value("RLIMIT_FSIZE", Resource::RLIMIT_FSIZE, limits.file_size_bytes)?;
    apply_rlimit_value("RLIMIT_NOFILE", Resource::RLIMIT_NOFILE, limits.open_files)?;
    apply_rlimit_value("RLIMIT_CPU", Resource::RLIMIT_CPU, limits.cpu_seconds)?;
    apply_rlimit_value("RLIMIT_AS", Resource::RLIMIT_AS, limits.address_space_bytes)?;
    log::debug!(
        "worker limits applied: as={} cpu={}s nofile={}",
        limits.address_space_bytes,
        limits.cpu_seconds,
        limits.open_files
    );
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_worker_limits(_limits: &WorkerLimits) -> Result<()> {
    Err(ServiceError::Worker(
        "worker limits require a unix host".to_string(),
    ))
}

/// Prevent privilege gain through execve for the rest of this process
#[cfg(target_os = "linux")]
pub fn set_no_new_privs() -> Result<()> {
    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS, 1) takes no pointers and is idempotent.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(ServiceError::Worker(format!(
            "failed to set PR_SET_NO_NEW_PRIVS: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_no_new_privs() -> Result<()> {
    log::warn!("PR_SET_NO_NEW_PRIVS is not available on this platform");
    Ok(())
}
