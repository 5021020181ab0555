// Write Berkeley Packet Filter (BPF) programs
mod bpf;
pub use bpf::{DefaultAction, Error, Filter, FilterContext, SockFilter};

/// Syscall name to number translation
pub mod syscalls;

use log::debug;
use nix::libc::EPERM;

/// Syscalls a sandboxed program may use. Everything else fails with `EPERM`.
pub const ALLOWLIST: &[&str] = &[
    "exit",
    "exit_group",
    "brk",
    "mmap",
    "munmap",
    "mremap",
    "read",
    "write",
    "clock_gettime",
    "clock_nanosleep",
    "nanosleep",
];

/// Default action for every syscall not on the allowlist
pub const DEFAULT_ACTION: DefaultAction = DefaultAction::Errno(EPERM);

/// Compile the allowlist into a filter without loading it.
pub fn allowlist_filter() -> Result<Filter, Error> {
    allowlist_context()?.build()
}

/// Restrict the calling process to the allowlist. This cannot be undone.
pub fn install() -> Result<(), Error> {
    debug!("Installing syscall allowlist ({} syscalls)", ALLOWLIST.len());
    allowlist_context()?.load()
}

fn allowlist_context() -> Result<FilterContext, Error> {
    let mut context = FilterContext::new(DEFAULT_ACTION)?;
    for name in ALLOWLIST {
        context.add_rule(name)?;
    }
    Ok(context)
}
