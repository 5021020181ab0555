use crate::seccomp;
use log::{debug, info};
use std::ops::{Deref, DerefMut};
use thiserror::Error;

/// Exit code of a launcher that refused to start the runtime because the
/// sandbox could not be installed
pub const SANDBOX_FAILURE: i32 = 125;

/// Launcher errors
#[derive(Error, Debug)]
pub enum Error {
    /// The syscall filter could not be installed
    #[error("failed to install sandbox: {0}")]
    Sandbox(#[from] seccomp::Error),
}

/// Runtime that executes the sandboxed program. Implemented by the DDP
/// runtime binding and by test doubles.
pub trait Runtime {
    /// Set up global runtime state. Called once with the process arguments.
    fn init(&mut self, args: &[String]);

    /// Run the program. The result is the exit code of the process.
    fn run(&mut self) -> i32;

    /// Tear down runtime state. Called once after `run`, also if `run` panics.
    fn shutdown(&mut self);
}

/// Mechanism that restricts the process before untrusted code runs
pub trait Sandbox {
    /// Restrict the calling process. Irreversible.
    fn install(&self) -> Result<(), seccomp::Error>;
}

/// The syscall allowlist of this crate
#[derive(Clone, Copy, Debug, Default)]
pub struct Seccomp;

impl Sandbox for Seccomp {
    fn install(&self) -> Result<(), seccomp::Error> {
        seccomp::install()
    }
}

/// A prebuilt filter. Installing it does not allocate which makes it usable
/// right after `fork`.
impl Sandbox for seccomp::Filter {
    fn install(&self) -> Result<(), seccomp::Error> {
        self.apply()
    }
}

/// Point in time the sandbox is installed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Ordering {
    /// Install the sandbox before the runtime is initialized. Runtime
    /// initialization is restricted to the allowlist as well.
    #[default]
    FilterFirst,
    /// Initialize the runtime with full privileges and install the sandbox
    /// right before the program runs.
    InitFirst,
}

/// Starts a runtime inside a sandbox: install → init → run → shutdown
#[derive(Debug, Default)]
pub struct Launcher<S = Seccomp> {
    sandbox: S,
    ordering: Ordering,
}

impl Launcher<Seccomp> {
    /// Launcher with the seccomp allowlist installed first
    pub fn new() -> Launcher<Seccomp> {
        Launcher::default()
    }
}

impl<S: Sandbox> Launcher<S> {
    /// Launcher with a custom sandbox
    pub fn with_sandbox(sandbox: S) -> Launcher<S> {
        Launcher {
            sandbox,
            ordering: Ordering::default(),
        }
    }

    /// Set when the sandbox is installed relative to runtime initialization
    pub fn ordering(mut self, ordering: Ordering) -> Launcher<S> {
        self.ordering = ordering;
        self
    }

    /// Run `runtime` with `args` and return the exit code of its entry point.
    ///
    /// The program never runs outside the sandbox: if installation fails an
    /// error is returned before `run` is called. `shutdown` is called exactly
    /// once if and only if `init` was called.
    pub fn launch<R: Runtime + ?Sized>(
        &self,
        runtime: &mut R,
        args: &[String],
    ) -> Result<i32, Error> {
        let mut runtime = match self.ordering {
            Ordering::FilterFirst => {
                self.install()?;
                debug!("Initializing runtime");
                runtime.init(args);
                Finalize(runtime)
            }
            Ordering::InitFirst => {
                debug!("Initializing runtime");
                runtime.init(args);
                let runtime = Finalize(runtime);
                self.install()?;
                runtime
            }
        };

        let code = runtime.run();
        debug!("Runtime returned {}", code);
        drop(runtime);
        Ok(code)
    }

    fn install(&self) -> Result<(), Error> {
        self.sandbox.install().map_err(Error::Sandbox)?;
        info!("Sandbox installed");
        Ok(())
    }
}

/// Shuts the runtime down when dropped
struct Finalize<'a, R: Runtime + ?Sized>(&'a mut R);

impl<R: Runtime + ?Sized> Deref for Finalize<'_, R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.0
    }
}

impl<R: Runtime + ?Sized> DerefMut for Finalize<'_, R> {
    fn deref_mut(&mut self) -> &mut R {
        self.0
    }
}

impl<R: Runtime + ?Sized> Drop for Finalize<'_, R> {
    fn drop(&mut self) {
        debug!("Shutting down runtime");
        self.0.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;
    use std::{cell::RefCell, panic, rc::Rc};

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Event {
        Install,
        Init(Vec<String>),
        Run,
        Shutdown,
    }

    type Events = Rc<RefCell<Vec<Event>>>;

    struct RecordingSandbox {
        events: Events,
        result: Result<(), seccomp::Error>,
    }

    impl Sandbox for RecordingSandbox {
        fn install(&self) -> Result<(), seccomp::Error> {
            self.events.borrow_mut().push(Event::Install);
            self.result.clone()
        }
    }

    struct RecordingRuntime {
        events: Events,
        code: i32,
        panic: bool,
    }

    impl Runtime for RecordingRuntime {
        fn init(&mut self, args: &[String]) {
            self.events.borrow_mut().push(Event::Init(args.to_vec()));
        }

        fn run(&mut self) -> i32 {
            self.events.borrow_mut().push(Event::Run);
            if self.panic {
                panic!("runtime failure");
            }
            self.code
        }

        fn shutdown(&mut self) {
            self.events.borrow_mut().push(Event::Shutdown);
        }
    }

    fn setup(
        code: i32,
        result: Result<(), seccomp::Error>,
    ) -> (Events, Launcher<RecordingSandbox>, RecordingRuntime) {
        let events = Events::default();
        let sandbox = RecordingSandbox {
            events: events.clone(),
            result,
        };
        let runtime = RecordingRuntime {
            events: events.clone(),
            code,
            panic: false,
        };
        (events, Launcher::with_sandbox(sandbox), runtime)
    }

    fn args() -> Vec<String> {
        vec!["prog".to_string()]
    }

    #[test]
    fn launch_success() {
        let (events, launcher, mut runtime) = setup(0, Ok(()));
        assert_eq!(launcher.launch(&mut runtime, &args()).unwrap(), 0);
        assert_eq!(
            *events.borrow(),
            vec![Event::Install, Event::Init(args()), Event::Run, Event::Shutdown]
        );
    }

    #[test]
    fn exit_code_is_propagated() {
        let (events, launcher, mut runtime) = setup(2, Ok(()));
        assert_eq!(launcher.launch(&mut runtime, &args()).unwrap(), 2);
        assert_eq!(events.borrow().last(), Some(&Event::Shutdown));
    }

    #[test]
    fn init_first() {
        let (events, launcher, mut runtime) = setup(0, Ok(()));
        let launcher = launcher.ordering(Ordering::InitFirst);
        assert_eq!(launcher.launch(&mut runtime, &args()).unwrap(), 0);
        assert_eq!(
            *events.borrow(),
            vec![Event::Init(args()), Event::Install, Event::Run, Event::Shutdown]
        );
    }

    #[test]
    fn sandbox_failure_skips_runtime() {
        let (events, launcher, mut runtime) = setup(0, Err(seccomp::Error::ListTooLong));
        assert!(matches!(
            launcher.launch(&mut runtime, &args()),
            Err(Error::Sandbox(seccomp::Error::ListTooLong))
        ));
        assert_eq!(*events.borrow(), vec![Event::Install]);
    }

    #[test]
    fn sandbox_failure_after_init_shuts_down() {
        let (events, launcher, mut runtime) = setup(0, Err(seccomp::Error::AlreadyLoaded));
        let launcher = launcher.ordering(Ordering::InitFirst);
        assert!(launcher.launch(&mut runtime, &args()).is_err());
        assert_eq!(
            *events.borrow(),
            vec![Event::Init(args()), Event::Install, Event::Shutdown]
        );
    }

    #[test]
    fn shutdown_after_panic() {
        let (events, launcher, mut runtime) = setup(0, Ok(()));
        runtime.panic = true;
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            launcher.launch(&mut runtime, &args())
        }));
        assert!(result.is_err());
        assert_eq!(events.borrow().last(), Some(&Event::Shutdown));
        assert_eq!(
            events
                .borrow()
                .iter()
                .filter(|e| **e == Event::Shutdown)
                .count(),
            1
        );
    }
}
