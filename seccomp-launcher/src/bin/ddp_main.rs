//! Entry point of compiled DDP programs. Installs the syscall allowlist and
//! hands control to the DDP runtime.

use log::error;
use nix::libc::{self, c_char, c_int, FILE};
use seccomp_launcher::launcher::{Launcher, Runtime, SANDBOX_FAILURE};
use std::{ffi::CString, process, ptr};

extern "C" {
    static mut stdout: *mut FILE;
    static mut stderr: *mut FILE;

    fn ddp_init_runtime(argc: c_int, argv: *mut *mut c_char);
    fn ddp_ddpmain() -> c_int;
    fn ddp_end_runtime();
}

/// The DDP runtime linked into this binary
#[derive(Default)]
struct DdpRuntime {
    args: Vec<CString>,
    argv: Vec<*mut c_char>,
}

impl Runtime for DdpRuntime {
    fn init(&mut self, args: &[String]) {
        // Arguments from the OS never contain interior nul bytes
        self.args = args
            .iter()
            .filter_map(|arg| CString::new(arg.as_str()).ok())
            .collect();
        self.argv = self
            .args
            .iter()
            .map(|arg| arg.as_ptr() as *mut c_char)
            .chain(std::iter::once(ptr::null_mut()))
            .collect();

        unsafe {
            ddp_init_runtime(self.args.len() as c_int, self.argv.as_mut_ptr());
            // Interleave output of both streams line by line
            libc::setvbuf(stdout, ptr::null_mut(), libc::_IOLBF, 0);
            libc::setvbuf(stderr, ptr::null_mut(), libc::_IOLBF, 0);
        }
    }

    fn run(&mut self) -> i32 {
        unsafe { ddp_ddpmain() }
    }

    fn shutdown(&mut self) {
        unsafe { ddp_end_runtime() }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();

    let args = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();

    let mut runtime = DdpRuntime::default();
    match Launcher::new().launch(&mut runtime, &args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{}", e);
            process::exit(SANDBOX_FAILURE);
        }
    }
}
