use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sleeps for `duration`, re-checking the cancellation flag at most every
/// second. Returns `true` if the flag was raised before the full duration
/// elapsed.
///
/// This is the cooperative checkpoint every campaign task waits with: a stop
/// request is honored within roughly one second instead of a full slice or
/// poll interval.
pub(crate) async fn wait_cancellable(flag: &AtomicBool, duration: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        let step = (deadline - now).min(Duration::from_secs(1));
        tokio::time::sleep(step).await;
    }
}
