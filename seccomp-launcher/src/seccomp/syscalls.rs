use nix::libc::{self, c_long};

/// Syscalls known on every supported architecture
const COMMON: &[(&str, c_long)] = &[
    ("read", libc::SYS_read),
    ("write", libc::SYS_write),
    ("close", libc::SYS_close),
    ("openat", libc::SYS_openat),
    ("lseek", libc::SYS_lseek),
    ("pread64", libc::SYS_pread64),
    ("pwrite64", libc::SYS_pwrite64),
    ("readv", libc::SYS_readv),
    ("writev", libc::SYS_writev),
    ("ioctl", libc::SYS_ioctl),
    ("fcntl", libc::SYS_fcntl),
    ("dup", libc::SYS_dup),
    ("dup3", libc::SYS_dup3),
    ("pipe2", libc::SYS_pipe2),
    ("brk", libc::SYS_brk),
    ("mmap", libc::SYS_mmap),
    ("munmap", libc::SYS_munmap),
    ("mremap", libc::SYS_mremap),
    ("mprotect", libc::SYS_mprotect),
    ("madvise", libc::SYS_madvise),
    ("clock_gettime", libc::SYS_clock_gettime),
    ("clock_nanosleep", libc::SYS_clock_nanosleep),
    ("nanosleep", libc::SYS_nanosleep),
    ("futex", libc::SYS_futex),
    ("sched_yield", libc::SYS_sched_yield),
    ("rt_sigaction", libc::SYS_rt_sigaction),
    ("rt_sigprocmask", libc::SYS_rt_sigprocmask),
    ("rt_sigreturn", libc::SYS_rt_sigreturn),
    ("sigaltstack", libc::SYS_sigaltstack),
    ("getpid", libc::SYS_getpid),
    ("gettid", libc::SYS_gettid),
    ("getuid", libc::SYS_getuid),
    ("geteuid", libc::SYS_geteuid),
    ("getgid", libc::SYS_getgid),
    ("getegid", libc::SYS_getegid),
    ("getrandom", libc::SYS_getrandom),
    ("uname", libc::SYS_uname),
    ("prctl", libc::SYS_prctl),
    ("set_tid_address", libc::SYS_set_tid_address),
    ("set_robust_list", libc::SYS_set_robust_list),
    ("socket", libc::SYS_socket),
    ("connect", libc::SYS_connect),
    ("clone", libc::SYS_clone),
    ("execve", libc::SYS_execve),
    ("wait4", libc::SYS_wait4),
    ("kill", libc::SYS_kill),
    ("exit", libc::SYS_exit),
    ("exit_group", libc::SYS_exit_group),
];

/// Legacy syscalls that only exist on x86_64
#[cfg(target_arch = "x86_64")]
const ARCH: &[(&str, c_long)] = &[
    ("open", libc::SYS_open),
    ("stat", libc::SYS_stat),
    ("access", libc::SYS_access),
    ("pipe", libc::SYS_pipe),
    ("dup2", libc::SYS_dup2),
    ("poll", libc::SYS_poll),
    ("fork", libc::SYS_fork),
    ("arch_prctl", libc::SYS_arch_prctl),
];

#[cfg(not(target_arch = "x86_64"))]
const ARCH: &[(&str, c_long)] = &[];

/// Get syscall number by name
pub fn translate(name: &str) -> Option<u32> {
    COMMON
        .iter()
        .chain(ARCH)
        .find(|(n, _)| *n == name)
        .map(|(_, nr)| *nr as u32)
}
