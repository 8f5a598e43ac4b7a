//! Liveness watchdog driven by server heartbeats.
//!
//! The monitor holds at most one deadline. Arming spawns an alarm task that
//! sleeps until the deadline and then calls back with the token it was armed
//! with; re-arming aborts the previous alarm first. Because an alarm may
//! already be past its sleep when it is aborted, the callback must confirm
//! the token with [`HeartbeatMonitor::expire`] before acting on it.

use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Single-deadline watchdog.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    window: Duration,
    deadline: Option<Instant>,
    alarm: Option<AbortHandle>,
    token: u64,
}

impl HeartbeatMonitor {
    /// Create a disarmed monitor with the given liveness window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            alarm: None,
            token: 0,
        }
    }

    /// Set a fresh deadline one window from now, cancelling any previous one.
    /// `on_expire` runs with the returned token once the deadline passes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&mut self, on_expire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel_alarm();
        self.token = self.token.wrapping_add(1);
        let token = self.token;
        let deadline = Instant::now() + self.window;
        self.deadline = Some(deadline);

        let alarm = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_expire(token);
        });
        self.alarm = Some(alarm.abort_handle());
        token
    }

    /// Re-arm if armed. Returns `false`, and does nothing, when disarmed.
    pub fn refresh<F>(&mut self, on_expire: F) -> bool
    where
        F: FnOnce(u64) + Send + 'static,
    {
        if !self.is_armed() {
            return false;
        }
        self.arm(on_expire);
        true
    }

    /// Cancel the deadline without firing.
    pub fn disarm(&mut self) {
        self.cancel_alarm();
        self.deadline = None;
    }

    /// Consume the expiry for `token`. Returns `true` exactly once per arming,
    /// and only if that arming is still the current one.
    pub fn expire(&mut self, token: u64) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.deadline = None;
        self.alarm = None;
        true
    }

    /// Whether `token` belongs to the outstanding deadline.
    pub fn is_current(&self, token: u64) -> bool {
        self.deadline.is_some() && self.token == token
    }

    /// Whether a deadline is outstanding.
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The outstanding deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The liveness window.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn cancel_alarm(&mut self) {
        if let Some(alarm) = self.alarm.take() {
            alarm.abort();
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.cancel_alarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const WINDOW: Duration = Duration::from_secs(2);

    fn recorder() -> (
        impl Fn() -> Box<dyn FnOnce(u64) + Send>,
        mpsc::UnboundedReceiver<u64>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let make = move || {
            let tx = tx.clone();
            Box::new(move |token| {
                let _ = tx.send(token);
            }) as Box<dyn FnOnce(u64) + Send>
        };
        (make, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_window() {
        let (make, mut fired) = recorder();
        let mut monitor = HeartbeatMonitor::new(WINDOW);
        let token = monitor.arm(make());

        tokio::time::sleep(WINDOW - Duration::from_millis(1)).await;
        assert!(fired.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.recv().await, Some(token));
        assert!(monitor.expire(token));
        assert!(!monitor.expire(token), "expiry is consumed once");
        assert!(!monitor.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_postpones_expiry_indefinitely() {
        let (make, mut fired) = recorder();
        let mut monitor = HeartbeatMonitor::new(WINDOW);
        monitor.arm(make());

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert!(monitor.refresh(make()));
        }
        assert!(fired.try_recv().is_err());

        tokio::time::sleep(WINDOW + Duration::from_millis(1)).await;
        assert!(fired.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_leaves_single_alarm() {
        let (make, mut fired) = recorder();
        let mut monitor = HeartbeatMonitor::new(WINDOW);
        let first = monitor.arm(make());
        let second = monitor.arm(make());
        assert_ne!(first, second);
        assert!(!monitor.is_current(first));

        tokio::time::sleep(WINDOW * 3).await;
        assert_eq!(fired.recv().await, Some(second));
        assert!(fired.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_cancels() {
        let (make, mut fired) = recorder();
        let mut monitor = HeartbeatMonitor::new(WINDOW);
        let token = monitor.arm(make());
        monitor.disarm();

        tokio::time::sleep(WINDOW * 2).await;
        assert!(fired.try_recv().is_err());
        assert!(!monitor.expire(token));
        assert!(!monitor.refresh(make()), "refresh does not arm a disarmed monitor");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_is_ignored() {
        let mut monitor = HeartbeatMonitor::new(WINDOW);
        let stale = monitor.arm(|_| {});
        let current = monitor.arm(|_| {});

        assert!(!monitor.expire(stale));
        assert!(monitor.is_armed());
        assert!(monitor.expire(current));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_one_window_ahead() {
        let mut monitor = HeartbeatMonitor::new(WINDOW);
        let before = Instant::now();
        monitor.arm(|_| {});
        assert_eq!(monitor.deadline(), Some(before + WINDOW));
        assert_eq!(monitor.window(), WINDOW);
    }
}
