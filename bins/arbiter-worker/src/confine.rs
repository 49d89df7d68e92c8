/// Kernel Confinement - Landlock and Seccomp
///
/// **Filesystem:**
/// A Landlock ruleset handles every write-like access right and grants them
/// back only beneath the scratch directory (plus plain writes to `/dev/null`).
/// Reads are left alone. Removal, truncation and creation anywhere else fail
/// with `EACCES`.
///
/// **Process group:**
/// A seccomp filter answers `setsid` and `setpgid` with `EPERM`. Every process
/// the worker starts therefore stays in the worker's process group, and one
/// `killpg` reaches all of them.
///
/// Everything that allocates happens in `Confinement::prepare`, in the parent.
/// `Confinement::apply` runs between fork and exec and only issues syscalls.
use anyhow::{Context, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const LANDLOCK_CREATE_RULESET_VERSION: libc::c_uint = 1;
const LANDLOCK_RULE_PATH_BENEATH: libc::c_int = 1;

const ACCESS_WRITE_FILE: u64 = 1 << 1;
const ACCESS_REMOVE_DIR: u64 = 1 << 4;
const ACCESS_REMOVE_FILE: u64 = 1 << 5;
const ACCESS_MAKE_CHAR: u64 = 1 << 6;
const ACCESS_MAKE_DIR: u64 = 1 << 7;
const ACCESS_MAKE_REG: u64 = 1 << 8;
const ACCESS_MAKE_SOCK: u64 = 1 << 9;
const ACCESS_MAKE_FIFO: u64 = 1 << 10;
const ACCESS_MAKE_BLOCK: u64 = 1 << 11;
const ACCESS_MAKE_SYM: u64 = 1 << 12;
const ACCESS_REFER: u64 = 1 << 13;
const ACCESS_TRUNCATE: u64 = 1 << 14;

/// Write-like rights known since Landlock ABI 1
const WRITE_ACCESS: u64 = ACCESS_WRITE_FILE
    | ACCESS_REMOVE_DIR
    | ACCESS_REMOVE_FILE
    | ACCESS_MAKE_CHAR
    | ACCESS_MAKE_DIR
    | ACCESS_MAKE_REG
    | ACCESS_MAKE_SOCK
    | ACCESS_MAKE_FIFO
    | ACCESS_MAKE_BLOCK
    | ACCESS_MAKE_SYM;

/// Rights that may be granted on a single file
const FILE_ACCESS: u64 = ACCESS_WRITE_FILE | ACCESS_TRUNCATE;

#[repr(C)]
struct RulesetAttr {
    handled_access_fs: u64,
}

#[repr(C, packed)]
struct PathBeneathAttr {
    allowed_access: u64,
    parent_fd: libc::c_int,
}

const BPF_LD_W_ABS: u16 = 0x00 | 0x00 | 0x20;
const BPF_JMP_JEQ_K: u16 = 0x05 | 0x10 | 0x00;
const BPF_JMP_JGE_K: u16 = 0x05 | 0x30 | 0x00;
const BPF_RET_K: u16 = 0x06 | 0x00;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;

/// Offsets into `struct seccomp_data`
const SECCOMP_DATA_NR: u32 = 0;
const SECCOMP_DATA_ARCH: u32 = 4;

/// x32 syscalls share the x86_64 audit arch and set this bit in the number
const X32_SYSCALL_BIT: u32 = 0x4000_0000;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH: Option<u32> = Some(0xC000_003E);
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH: Option<u32> = Some(0xC000_00B7);
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const AUDIT_ARCH: Option<u32> = None;

/// Landlock ABI version offered by the running kernel, if any
pub fn landlock_abi() -> Option<u32> {
    // SAFETY: the version query takes no attribute pointer and returns an integer.
    let abi = unsafe {
        libc::syscall(
            libc::SYS_landlock_create_ruleset,
            std::ptr::null::<RulesetAttr>(),
            0usize,
            LANDLOCK_CREATE_RULESET_VERSION,
        )
    };
    (abi > 0).then_some(abi as u32)
}

/// Seccomp program refusing the calls that move a process out of its group
fn group_pinning_filter() -> Option<Vec<libc::sock_filter>> {
    let arch = AUDIT_ARCH?;
    let denied = [libc::SYS_setsid as u32, libc::SYS_setpgid as u32];
    let n = denied.len() as u8;

    let stmt = |code, k| libc::sock_filter { code, jt: 0, jf: 0, k };
    let jump = |code, k, jt, jf| libc::sock_filter { code, jt, jf, k };

    // Layout: [arch check, nr load, x32 check, one test per denied call, allow, deny]
    let mut program = vec![
        stmt(BPF_LD_W_ABS, SECCOMP_DATA_ARCH),
        jump(BPF_JMP_JEQ_K, arch, 0, n + 3),
        stmt(BPF_LD_W_ABS, SECCOMP_DATA_NR),
        jump(BPF_JMP_JGE_K, X32_SYSCALL_BIT, n + 1, 0),
    ];
    for (i, nr) in denied.iter().enumerate() {
        program.push(jump(BPF_JMP_JEQ_K, *nr, n - i as u8, 0));
    }
    program.push(stmt(BPF_RET_K, SECCOMP_RET_ALLOW));
    program.push(stmt(BPF_RET_K, SECCOMP_RET_ERRNO | libc::EPERM as u32));
    Some(program)
}

/// Kernel restrictions prepared for one worker
pub struct Confinement {
    /// (path, is directory) pairs that stay writable
    writable: Vec<(CString, bool)>,
    filter: Option<Vec<libc::sock_filter>>,
    strict: bool,
}

impl Confinement {
    /// Build everything `apply` needs for a worker rooted in `scratch`
    pub fn prepare(scratch: &Path, confine_filesystem: bool, strict: bool) -> Result<Self> {
        let mut writable = Vec::new();
        if confine_filesystem {
            let scratch = CString::new(scratch.as_os_str().as_bytes())
                .context("Scratch path contains a NUL byte")?;
            writable.push((scratch, true));
            if Path::new("/dev/null").exists() {
                writable.push((CString::new("/dev/null")?, false));
            }
        }

        Ok(Self {
            writable,
            filter: group_pinning_filter(),
            strict,
        })
    }

    /// Runs in the forked child; `no_new_privs` must already be set
    pub fn apply(&mut self) -> io::Result<()> {
        if !self.writable.is_empty() {
            if let Err(e) = self.restrict_writes() {
                if self.strict {
                    return Err(e);
                }
            }
        }

        if let Some(filter) = self.filter.as_mut() {
            let program = libc::sock_fprog {
                len: filter.len() as libc::c_ushort,
                filter: filter.as_mut_ptr(),
            };
            // SAFETY: `program` points at a live, well-formed BPF program; the
            // kernel copies it before returning.
            let rc = unsafe {
                libc::prctl(
                    libc::PR_SET_SECCOMP,
                    libc::SECCOMP_MODE_FILTER as libc::c_ulong,
                    &program as *const libc::sock_fprog as libc::c_ulong,
                )
            };
            if rc != 0 && self.strict {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(())
    }

    fn restrict_writes(&self) -> io::Result<()> {
        let abi = landlock_abi().ok_or_else(|| io::Error::from_raw_os_error(libc::ENOSYS))?;
        let mut handled = WRITE_ACCESS;
        if abi >= 2 {
            handled |= ACCESS_REFER;
        }
        if abi >= 3 {
            handled |= ACCESS_TRUNCATE;
        }

        let attr = RulesetAttr {
            handled_access_fs: handled,
        };
        // SAFETY: `attr` outlives the call and its size is passed alongside.
        let ruleset = unsafe {
            libc::syscall(
                libc::SYS_landlock_create_ruleset,
                &attr as *const RulesetAttr,
                std::mem::size_of::<RulesetAttr>(),
                0u32,
            )
        };
        if ruleset < 0 {
            return Err(io::Error::last_os_error());
        }
        let ruleset = ruleset as libc::c_int;

        let outcome = self.add_rules(ruleset, handled).and_then(|()| {
            // SAFETY: plain syscall on a ruleset fd we own.
            let rc = unsafe { libc::syscall(libc::SYS_landlock_restrict_self, ruleset, 0u32) };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        });
        // SAFETY: closing our own fd.
        unsafe { libc::close(ruleset) };
        outcome
    }

    fn add_rules(&self, ruleset: libc::c_int, handled: u64) -> io::Result<()> {
        for (path, directory) in &self.writable {
            let allowed = if *directory { handled } else { handled & FILE_ACCESS };
            // SAFETY: `path` is a valid NUL-terminated string.
            let fd = unsafe { libc::open(path.as_ptr(), libc::O_PATH | libc::O_CLOEXEC) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            let rule = PathBeneathAttr {
                allowed_access: allowed,
                parent_fd: fd,
            };
            // SAFETY: `rule` outlives the call; `fd` is open.
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_landlock_add_rule,
                    ruleset,
                    LANDLOCK_RULE_PATH_BENEATH,
                    &rule as *const PathBeneathAttr,
                    0u32,
                )
            };
            let outcome = if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            };
            // SAFETY: closing the O_PATH fd opened above.
            unsafe { libc::close(fd) };
            outcome?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_jumps_land_on_verdicts() {
        let Some(program) = group_pinning_filter() else { return };
        let allow = program.len() - 2;
        let deny = program.len() - 1;

        assert_eq!(program[allow].k, SECCOMP_RET_ALLOW);
        assert_eq!(program[deny].k, SECCOMP_RET_ERRNO | libc::EPERM as u32);
        // Foreign arch and x32 numbers are refused
        assert_eq!(1 + 1 + program[1].jf as usize, deny);
        assert_eq!(3 + 1 + program[3].jt as usize, deny);
        for index in 4..allow {
            assert_eq!(program[index].code, BPF_JMP_JEQ_K);
            assert_eq!(index + 1 + program[index].jt as usize, deny);
            assert_eq!(program[index].jf, 0);
        }
    }

    #[test]
    fn test_prepare_lists_writable_paths() {
        let dir = tempfile::tempdir().unwrap();
        let confinement = Confinement::prepare(dir.path(), true, false).unwrap();
        assert_eq!(
            confinement.writable[0].0.as_bytes(),
            dir.path().as_os_str().as_bytes()
        );
        assert!(confinement.writable[0].1);

        let open = Confinement::prepare(dir.path(), false, false).unwrap();
        assert!(open.writable.is_empty());
    }
}
