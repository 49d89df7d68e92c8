/// Sandbox Primitives - Scratch Directories and the Resource Guard
///
/// **Scratch directory lifecycle:**
/// 1. `ScratchDir::create` makes a private directory and hands back a
///    `TeardownCapability` alongside it
/// 2. Starting a worker moves the capability into that worker; while the worker
///    lives nobody can tear the directory down
/// 3. Stopping the worker returns the capability
/// 4. `ScratchDir::teardown` consumes the directory and the capability
///
/// **Resource guard:**
/// Applied inside the forked child before it execs the interpreter, so the
/// restrictions hold for the whole life of the worker and cannot be lifted by it.
/// The kernel-side part (write boundary, process group pinning) lives in
/// `confine.rs` and is installed last, after `no_new_privs`.
use crate::confine::Confinement;
use anyhow::{Context, Result};
use arbiter_common::config::SandboxConfig;
use nix::sched::{unshare, CloneFlags};
use nix::sys::prctl;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use nix::sys::signal::Signal;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Permission to delete a scratch directory. Not clonable, only minted by
/// `ScratchDir::create`.
#[derive(Debug)]
pub struct TeardownCapability {
    _sealed: (),
}

/// Private working directory of one candidate evaluation
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    /// Create `arbiter-<uuid>` under `root`, readable by the owner only
    pub fn create(root: &Path) -> Result<(Self, TeardownCapability)> {
        let path = root.join(format!("arbiter-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create scratch root {}", root.display()))?;
        fs::create_dir(&path)
            .with_context(|| format!("Failed to create scratch directory {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
            .context("Failed to restrict scratch directory permissions")?;

        debug!(path = %path.display(), "Scratch directory created");
        Ok((
            Self {
                path,
                removed: false,
            },
            TeardownCapability { _sealed: () },
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory and everything the candidate left in it
    pub fn teardown(mut self, _capability: TeardownCapability) -> Result<()> {
        self.removed = true;
        remove_tree(&self.path)
            .with_context(|| format!("Failed to remove scratch directory {}", self.path.display()))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Only reached when an evaluation unwound before teardown
        warn!(path = %self.path.display(), "Scratch directory dropped without teardown");
        if let Err(e) = remove_tree(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}

/// `remove_dir_all`, retrying once after giving the owner back full access
/// to anything the candidate made unreadable
fn remove_tree(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(_) => {
            restore_permissions(path);
            fs::remove_dir_all(path)
        }
    }
}

fn restore_permissions(path: &Path) {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return;
    };
    if !metadata.is_dir() {
        return;
    }
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o700));
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            restore_permissions(&entry.path());
        }
    }
}

/// Restrictions installed in every worker process
#[derive(Debug, Clone)]
pub struct ResourceGuard {
    memory_limit_bytes: u64,
    file_size_limit_bytes: u64,
    max_processes: Option<u64>,
    isolate_network: bool,
    confine_filesystem: bool,
    strict_isolation: bool,
}

impl ResourceGuard {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            memory_limit_bytes: config.memory_limit_bytes,
            file_size_limit_bytes: config.file_size_limit_bytes,
            max_processes: config.max_processes,
            isolate_network: config.isolate_network,
            confine_filesystem: config.confine_filesystem,
            strict_isolation: config.strict_isolation,
        }
    }

    /// Arrange for the guard to run in the child between fork and exec.
    /// Writes stay possible beneath `writable` only.
    pub fn install(&self, command: &mut Command, writable: &Path) -> Result<()> {
        let guard = self.clone();
        let mut confinement = Confinement::prepare(writable, self.confine_filesystem, self.strict_isolation)?;
        // SAFETY: `apply` only issues raw syscalls (setsid, prctl, unshare,
        // get/setrlimit, landlock, seccomp); it neither allocates nor takes locks.
        unsafe {
            command.pre_exec(move || {
                guard.apply()?;
                confinement.apply()
            });
        }
        Ok(())
    }

    fn apply(&self) -> std::io::Result<()> {
        // Own process group, so the supervisor can signal every descendant
        nix::unistd::setsid()?;
        prctl::set_pdeathsig(Signal::SIGKILL)?;

        if self.isolate_network {
            let isolated = unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET);
            if let Err(errno) = isolated {
                if self.strict_isolation {
                    return Err(errno.into());
                }
            }
        }

        cap_limit(Resource::RLIMIT_AS, self.memory_limit_bytes)?;
        cap_limit(Resource::RLIMIT_DATA, self.memory_limit_bytes)?;
        cap_limit(Resource::RLIMIT_FSIZE, self.file_size_limit_bytes)?;
        cap_limit(Resource::RLIMIT_CORE, 0)?;
        if let Some(max_processes) = self.max_processes {
            cap_limit(Resource::RLIMIT_NPROC, max_processes)?;
        }

        prctl::set_no_new_privs()?;
        Ok(())
    }
}

/// Lower both soft and hard limit to `value`, never above the inherited hard limit
fn cap_limit(resource: Resource, value: u64) -> nix::Result<()> {
    let (_, hard) = getrlimit(resource)?;
    let value = value.min(hard);
    setrlimit(resource, value, value)
}
