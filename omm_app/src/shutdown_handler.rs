use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

/// Clears `running` on Ctrl+C
pub fn setup(session: &str, running: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    let session = session.to_string();
    ctrlc::set_handler(move || {
        tracing::info!(%session, "Shutdown signal received");
        running.store(false, Ordering::Release);
    })
}

/// Blocks until `running` is cleared or `deadline` passes, checking every `poll`
///
/// Returns true when stopped by the flag.
pub fn wait(running: &AtomicBool, deadline: Option<Instant>, poll: Duration) -> bool {
    loop {
        if !running.load(Ordering::Acquire) {
            return true;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return false;
        }
        thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_returns_on_deadline() {
        let running = AtomicBool::new(true);
        let stopped = wait(&running, Some(Instant::now() + Duration::from_millis(20)), Duration::from_millis(5));
        assert!(!stopped);
    }

    #[test]
    fn test_wait_returns_on_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            flag.store(false, Ordering::Release);
        });

        assert!(wait(&running, None, Duration::from_millis(2)));
        stopper.join().unwrap();
    }
}
