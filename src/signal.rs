use nix::sys::signal::{self, SigHandler, Signal};
use tracing::debug;

/// Terminal-generated signals the interactive shell itself ignores, so that
/// only the foreground job reacts to ^C, ^\ and ^Z.
const SHELL_IGNORED: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
];

/// Dispositions every child gets back before exec.
const CHILD_DEFAULTS: [Signal; 6] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGCHLD,
];

pub fn ignore_job_control_signals() -> nix::Result<()> {
    for sig in SHELL_IGNORED {
        unsafe { signal::signal(sig, SigHandler::SigIgn) }?;
        debug!(signal = %sig, "ignoring");
    }
    Ok(())
}

/// Called in a freshly forked child. Must not allocate or log.
pub fn restore_child_defaults() {
    for sig in CHILD_DEFAULTS {
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
}

/// Ignores SIGTTOU while alive, so a process outside the foreground group
/// can change the terminal's foreground group without being stopped.
pub struct TtouGuard {
    previous: SigHandler,
}

impl TtouGuard {
    pub fn new() -> TtouGuard {
        let previous = unsafe { signal::signal(Signal::SIGTTOU, SigHandler::SigIgn) }
            .unwrap_or(SigHandler::SigDfl);
        TtouGuard { previous }
    }
}

impl Default for TtouGuard {
    fn default() -> Self {
        TtouGuard::new()
    }
}

impl Drop for TtouGuard {
    fn drop(&mut self) {
        let _ = unsafe { signal::signal(Signal::SIGTTOU, self.previous) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn current(sig: Signal) -> SigHandler {
        let previous = unsafe { signal::signal(sig, SigHandler::SigDfl) }.unwrap();
        unsafe { signal::signal(sig, previous) }.unwrap();
        previous
    }

    #[test]
    #[serial]
    fn ttou_guard_restores_previous_disposition() {
        assert_eq!(current(Signal::SIGTTOU), SigHandler::SigDfl);
        {
            let _guard = TtouGuard::new();
            assert_eq!(current(Signal::SIGTTOU), SigHandler::SigIgn);
        }
        assert_eq!(current(Signal::SIGTTOU), SigHandler::SigDfl);
    }
}
