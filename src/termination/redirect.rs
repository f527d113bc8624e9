//! Single-shot redirect after a session ends
//!
//! A countdown and a manual "go now" action race to leave the session view.
//! Both funnel through one guarded function so exactly one navigation
//! happens, and none at all once the guard is torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const TICK: Duration = Duration::from_secs(1);

/// Whatever actually moves the user away from the session view
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);

    /// Visible countdown, in whole seconds left
    fn countdown(&self, _remaining_secs: u64) {}
}

struct Shared {
    target: String,
    navigator: Arc<dyn Navigator>,
    fired: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn fire(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        tracing::info!(redirect_target = %self.target, "Redirecting away from ended session");
        self.navigator.navigate(&self.target);
        true
    }
}

/// Owns the countdown for one termination record
pub struct RedirectGuard {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl RedirectGuard {
    /// Start the countdown; must be called inside a tokio runtime.
    ///
    /// Cancelling `cancel` (typically a child of the owner's shutdown token)
    /// releases the timers immediately, same as [`RedirectGuard::cancel`].
    pub fn start(
        target: impl Into<String>,
        delay: Duration,
        navigator: Arc<dyn Navigator>,
        cancel: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            target: target.into(),
            navigator,
            fired: AtomicBool::new(false),
            cancel,
        });
        let task = tokio::spawn(run_countdown(Arc::clone(&shared), delay));
        Self {
            shared,
            task: Some(task),
        }
    }

    /// Manual redirect; `false` if it already happened or the guard is torn down
    pub fn redirect_now(&self) -> bool {
        self.shared.fire()
    }

    pub fn has_fired(&self) -> bool {
        self.shared.fired.load(Ordering::SeqCst)
    }

    /// Release the timers; no redirect can happen afterwards
    pub fn cancel(&mut self) {
        self.shared.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_countdown(shared: Arc<Shared>, delay: Duration) {
    if shared.fired.load(Ordering::SeqCst) || shared.cancel.is_cancelled() {
        return;
    }
    let mut remaining = u64::try_from(delay.as_millis().div_ceil(1000)).unwrap_or(u64::MAX);
    shared.navigator.countdown(remaining);

    let deadline = tokio::time::sleep(delay);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval_at(Instant::now() + TICK, TICK);

    loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => {
                tracing::debug!("Redirect countdown cancelled");
                return;
            }
            () = &mut deadline => {
                shared.fire();
                return;
            }
            _ = ticker.tick() => {
                if shared.fired.load(Ordering::SeqCst) {
                    return;
                }
                remaining = remaining.saturating_sub(1);
                shared.navigator.countdown(remaining);
            }
        }
    }
}
