use super::syscalls;
use log::{debug, trace};
use nix::{errno::Errno, libc};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// https://elixir.bootlin.com/linux/latest/source/include/uapi/linux/filter.h
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JEQ: u16 = 0x10;
const BPF_JGE: u16 = 0x30;
const BPF_K: u16 = 0x00;
const BPF_MAXINSNS: usize = 4096;

// https://elixir.bootlin.com/linux/latest/source/include/uapi/linux/seccomp.h
const SECCOMP_MODE_FILTER: libc::c_ulong = 2;
const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const SECCOMP_RET_LOG: u32 = 0x7ffc_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_DATA: u32 = 0x0000_ffff;

#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH: u32 = 0xc000_00b7;
#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH: u32 = 0xc000_003e;

/// Syscall numbers of the x32 ABI carry this bit
#[cfg(target_arch = "x86_64")]
const X32_SYSCALL_BIT: u32 = 0x4000_0000;

/// Jump to next instruction and execute
const EVAL_NEXT: u8 = 0;
/// Skip next instruction
const SKIP_NEXT: u8 = 1;

/// Set once a filter is active in this process
static LOADED: AtomicBool = AtomicBool::new(false);

// From seccomp man page:
// struct seccomp_data {
//     int   nr;                   /* System call number */
//     __u32 arch;                 /* AUDIT_ARCH_* value (see <linux/audit.h>) */
//     __u64 instruction_pointer;  /* CPU instruction pointer */
//     __u64 args[6];              /* Up to 6 system call arguments */
// };
#[allow(unused)]
#[repr(C)]
struct SeccompData {
    nr: i32,
    arch: u32,
    instruction_pointer: u64,
    args: [u64; 6],
}

#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

/// Errors while building or loading a filter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The filter context cannot be created with the requested settings
    #[error("failed to create filter context: {0}")]
    ContextCreation(String),
    /// A rule names a syscall that is unknown on this architecture
    #[error("rule for system call {name} rejected: unknown system call")]
    RuleRejected {
        /// Name of the rejected syscall
        name: String,
    },
    /// The program does not fit into a single BPF filter
    #[error("seccomp filter list exceeds maximum number of BPF statements")]
    ListTooLong,
    /// The kernel refused the filter
    #[error("failed to load seccomp filter: {0}")]
    Load(Errno),
    /// This process already loaded a filter
    #[error("a seccomp filter is already loaded in this process")]
    AlreadyLoaded,
}

/// Action taken for every syscall without an allow rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultAction {
    /// Fail the syscall with the given errno
    Errno(i32),
    /// Kill the whole process
    KillProcess,
    /// Allow the syscall and record it in the audit log
    Log,
}

impl DefaultAction {
    /// BPF return value of this action
    fn ret(self) -> Result<u32, Error> {
        match self {
            DefaultAction::Errno(errno) => u32::try_from(errno)
                .ok()
                .filter(|errno| *errno <= SECCOMP_RET_DATA)
                .map(|errno| SECCOMP_RET_ERRNO | errno)
                .ok_or_else(|| {
                    Error::ContextCreation(format!("errno {errno} is out of range"))
                }),
            DefaultAction::KillProcess => Ok(SECCOMP_RET_KILL_PROCESS),
            DefaultAction::Log => Ok(SECCOMP_RET_LOG),
        }
    }
}

/// Classic BPF instruction in the layout the kernel expects
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SockFilter {
    /// Operation
    pub code: u16,
    /// Jump offset if true
    pub jt: u8,
    /// Jump offset if false
    pub jf: u8,
    /// Operand
    pub k: u32,
}

/// Compiled seccomp program. Applying it does not allocate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    list: Vec<SockFilter>,
}

impl Filter {
    /// BPF instructions of this program
    pub fn instructions(&self) -> &[SockFilter] {
        &self.list
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// True if the program has no instructions
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Apply this filter to the calling process. Only one filter can be
    /// applied per process and there is no way to remove it again.
    pub fn apply(&self) -> Result<(), Error> {
        if self.list.len() > BPF_MAXINSNS {
            return Err(Error::ListTooLong);
        }
        if LOADED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyLoaded);
        }

        let sf_prog = SockFprog {
            len: self.list.len() as u16,
            filter: self.list.as_ptr(),
        };
        let sf_prog_ptr = &sf_prog as *const SockFprog;

        // Unprivileged processes must give up gaining privileges before loading a filter
        let result = Errno::result(unsafe {
            libc::prctl(
                libc::PR_SET_NO_NEW_PRIVS,
                1 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
                0 as libc::c_ulong,
            )
        })
        .and_then(|_| {
            Errno::result(unsafe {
                libc::prctl(libc::PR_SET_SECCOMP, SECCOMP_MODE_FILTER, sf_prog_ptr)
            })
        });

        match result {
            Ok(_) => {
                debug!("Loaded seccomp filter ({} instructions)", self.list.len());
                Ok(())
            }
            Err(e) => {
                LOADED.store(false, Ordering::SeqCst);
                Err(Error::Load(e))
            }
        }
    }
}

/// Filter under construction. Dropping the context releases it; a loaded
/// filter stays active independently.
#[derive(Debug)]
pub struct FilterContext {
    default_action: u32,
    allowlist: Vec<u32>,
}

impl FilterContext {
    /// Create a new context that applies `default_action` to every syscall
    /// without an allow rule
    pub fn new(default_action: DefaultAction) -> Result<FilterContext, Error> {
        check_platform_requirements();

        let ret = default_action.ret()?;
        trace!("Creating filter context (default action {:?})", default_action);
        Ok(FilterContext {
            default_action: ret,
            allowlist: Vec::new(),
        })
    }

    /// Allow a syscall by name
    pub fn add_rule(&mut self, name: &str) -> Result<&mut FilterContext, Error> {
        match syscalls::translate(name) {
            Some(nr) => Ok(self.add_rule_nr(nr)),
            None => Err(Error::RuleRejected { name: name.into() }),
        }
    }

    /// Allow a syscall by number
    pub fn add_rule_nr(&mut self, nr: u32) -> &mut FilterContext {
        self.allowlist.push(nr);
        self
    }

    /// Compile the rules into a BPF program
    pub fn build(&self) -> Result<Filter, Error> {
        // sort and dedup syscall numbers to check common syscalls first
        let mut allowlist = self.allowlist.clone();
        allowlist.sort_unstable();
        allowlist.dedup();

        let mut filter = Filter::default();

        // Load architecture into accumulator
        load_arch_into_acc(&mut filter);

        // Kill process if architecture does not match
        jump_if_acc_is_equal(&mut filter, AUDIT_ARCH, SKIP_NEXT, EVAL_NEXT);
        filter.list.push(bpf_ret(SECCOMP_RET_KILL_PROCESS));

        // Load syscall number into accumulator for subsequent filtering
        load_syscall_nr_into_acc(&mut filter);

        // The x32 ABI shares the audit arch with x86_64 but uses different numbers
        #[cfg(target_arch = "x86_64")]
        {
            jump_if_acc_is_greater_or_equal(&mut filter, X32_SYSCALL_BIT, EVAL_NEXT, SKIP_NEXT);
            filter.list.push(bpf_ret(self.default_action));
        }

        // Add filter block for every allowed syscall
        for nr in allowlist {
            trace!("Adding seccomp syscall block (nr={})", nr);

            // If syscall matches return 'allow' directly
            jump_if_acc_is_equal(&mut filter, nr, EVAL_NEXT, SKIP_NEXT);
            return_success(&mut filter);
        }

        // Fall through consequence if no filter rule matched
        filter.list.push(bpf_ret(self.default_action));

        if filter.list.len() > BPF_MAXINSNS {
            Err(Error::ListTooLong)
        } else {
            Ok(filter)
        }
    }

    /// Build the program and load it into the calling process. The context
    /// is released whether loading succeeds or not.
    pub fn load(self) -> Result<(), Error> {
        self.build()?.apply()
    }
}

impl Drop for FilterContext {
    fn drop(&mut self) {
        trace!("Releasing filter context ({} rules)", self.allowlist.len());
    }
}

/// Check if the current platform is supported
fn check_platform_requirements() {
    #[cfg(not(target_os = "linux"))]
    compile_error!("seccomp is only supported on Linux");
    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    compile_error!("seccomp is only supported on aarch64 and x86_64");
    #[cfg(target_endian = "big")]
    compile_error!("seccomp is not supported on Big Endian architectures");
}

/// Load architecture identifier number into accumulator
fn load_arch_into_acc(filter: &mut Filter) {
    filter.list.push(bpf_stmt(
        BPF_LD | BPF_W | BPF_ABS,
        memoffset::offset_of!(SeccompData, arch) as u32,
    ));
}

/// Load the number of the syscall into accumulator
fn load_syscall_nr_into_acc(filter: &mut Filter) {
    filter.list.push(bpf_stmt(
        BPF_LD | BPF_W | BPF_ABS,
        memoffset::offset_of!(SeccompData, nr) as u32,
    ));
}

/// Compare accumulator (32 bit) against given value
fn jump_if_acc_is_equal(filter: &mut Filter, value: u32, jump_true: u8, jump_false: u8) {
    filter.list.push(bpf_jump(
        BPF_JMP | BPF_JEQ | BPF_K,
        value,
        jump_true,
        jump_false,
    ));
}

/// Compare accumulator (32 bit, unsigned) against given lower bound
#[cfg(target_arch = "x86_64")]
fn jump_if_acc_is_greater_or_equal(
    filter: &mut Filter,
    value: u32,
    jump_true: u8,
    jump_false: u8,
) {
    filter.list.push(bpf_jump(
        BPF_JMP | BPF_JGE | BPF_K,
        value,
        jump_true,
        jump_false,
    ));
}

/// Add statement that causes the BPF program return and allow the syscall
fn return_success(filter: &mut Filter) {
    filter.list.push(bpf_ret(SECCOMP_RET_ALLOW));
}

/// Add return clause (e.g. allow, errno, kill)
fn bpf_ret(k: u32) -> SockFilter {
    bpf_stmt(BPF_RET | BPF_K, k)
}

// https://elixir.bootlin.com/linux/latest/source/include/uapi/linux/filter.h#L48
fn bpf_stmt(code: u16, k: u32) -> SockFilter {
    bpf_jump(code, k, 0, 0)
}

// https://elixir.bootlin.com/linux/latest/source/include/uapi/linux/filter.h#L51
fn bpf_jump(code: u16, k: u32, jt: u8, jf: u8) -> SockFilter {
    SockFilter { code, jt, jf, k }
}
