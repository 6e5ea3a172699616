//! Termination-signal intercept scope for the window between a staged
//! download and a finished swap.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::barrier::PrimaryWait;
use crate::core::error::NovmResult;

static ARMED_GUARDS: AtomicUsize = AtomicUsize::new(0);

/// While alive, SIGINT/SIGTERM/SIGHUP/SIGQUIT are swallowed. Each one is
/// reported once the primary command has finished so the message does not
/// interleave with its output.
///
/// tokio cannot hand a signal back to the default disposition, so the
/// listener outlives the guard. After the guard is dropped it terminates
/// the process with `128 + signo`, which is what the default action would
/// have reported.
#[derive(Debug)]
pub struct SignalGuard {
    armed: Arc<AtomicBool>,
}

impl SignalGuard {
    pub fn install(primary: PrimaryWait) -> NovmResult<Self> {
        Self::install_with(primary, |code| std::process::exit(code))
    }

    #[cfg(unix)]
    fn install_with<F>(primary: PrimaryWait, terminate: F) -> NovmResult<Self>
    where
        F: Fn(i32) + Send + 'static,
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut term = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let mut quit = signal(SignalKind::quit())?;

        let armed = Arc::new(AtomicBool::new(true));
        ARMED_GUARDS.fetch_add(1, Ordering::SeqCst);

        let flag = Arc::clone(&armed);
        tokio::spawn(async move {
            loop {
                let (name, signo) = tokio::select! {
                    Some(()) = interrupt.recv() => ("SIGINT", 2),
                    Some(()) = term.recv() => ("SIGTERM", 15),
                    Some(()) = hangup.recv() => ("SIGHUP", 1),
                    Some(()) = quit.recv() => ("SIGQUIT", 3),
                    else => break,
                };

                if !flag.load(Ordering::SeqCst) {
                    terminate(128 + signo);
                    continue;
                }

                let mut primary = primary.clone();
                tokio::spawn(async move {
                    primary.wait().await;
                    warn!("ignoring {} since novm is still updating", name);
                });
            }
        });

        Ok(Self { armed })
    }

    #[cfg(not(unix))]
    fn install_with<F>(_primary: PrimaryWait, _terminate: F) -> NovmResult<Self>
    where
        F: Fn(i32) + Send + 'static,
    {
        ARMED_GUARDS.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            armed: Arc::new(AtomicBool::new(true)),
        })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            ARMED_GUARDS.fetch_sub(1, Ordering::SeqCst);
            debug!("termination signals honoured again");
        }
    }
}

/// Whether any guard in this process is currently swallowing signals.
pub fn intercept_active() -> bool {
    ARMED_GUARDS.load(Ordering::SeqCst) > 0
}
