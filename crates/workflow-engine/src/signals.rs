use anyhow::{anyhow, Result};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tracing::debug;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);
static CHILD_PID: AtomicI32 = AtomicI32::new(0);

extern "C" fn on_signal(signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    LAST_SIGNAL.store(signum, Ordering::SeqCst);
    // SIGINT from a terminal already reached the whole foreground group
    let child = CHILD_PID.load(Ordering::SeqCst);
    if child > 0 && signum != libc::SIGINT {
        unsafe {
            libc::kill(child, signum);
        }
    }
}

/// Replaces the default die-on-signal behavior for SIGINT, SIGTERM and SIGHUP
/// with a flag, so a running test can be waited for and cleanup still happens.
pub fn install_interrupt_handlers() -> Result<()> {
    let handler: extern "C" fn(libc::c_int) = on_signal;
    for signum in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
        let previous = unsafe { libc::signal(signum, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(anyhow!(
                "install handler for signal {}: {}",
                signum,
                io::Error::last_os_error()
            ));
        }
    }
    debug!("interrupt handlers installed");
    Ok(())
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn last_signal() -> Option<i32> {
    match LAST_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        signum => Some(signum),
    }
}

/// Forward SIGTERM/SIGHUP to `pid` while it runs. Cleared on drop.
pub(crate) struct ChildRegistration;

impl ChildRegistration {
    pub(crate) fn register(pid: u32) -> Self {
        CHILD_PID.store(pid as i32, Ordering::SeqCst);
        Self
    }
}

impl Drop for ChildRegistration {
    fn drop(&mut self) {
        CHILD_PID.store(0, Ordering::SeqCst);
    }
}
