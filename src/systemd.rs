//! systemd service integration for the player daemon.
//!
//! The heartbeat loop doubles as the watchdog keepalive and publishes a short
//! sync summary as the unit's STATUS line. Every call is a no-op when
//! notifications are disabled or off Linux.

/// Sends sd_notify messages when enabled.
#[derive(Debug, Clone, Copy)]
pub struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// `READY=1`, once the daemon is wired up and about to start heartbeats.
    pub fn notify_ready(&self) {
        self.send(Message::Ready);
    }

    /// `STOPPING=1`, after the heartbeat loop has exited.
    pub fn notify_stopping(&self) {
        self.send(Message::Stopping);
    }

    /// `STATUS=<msg>`, shown by `systemctl status`.
    pub fn notify_status(&self, msg: &str) {
        self.send(Message::Status(msg));
    }

    /// `WATCHDOG=1`, sent on every heartbeat tick.
    pub fn notify_watchdog(&self) {
        self.send(Message::Watchdog);
    }

    fn send(&self, message: Message<'_>) {
        if !self.enabled {
            return;
        }
        message.deliver();
    }
}

#[derive(Debug, Clone, Copy)]
enum Message<'a> {
    Ready,
    Stopping,
    Status(&'a str),
    Watchdog,
}

impl Message<'_> {
    #[cfg(target_os = "linux")]
    fn deliver(self) {
        use sd_notify::NotifyState;

        let state = match self {
            Message::Ready => NotifyState::Ready,
            Message::Stopping => NotifyState::Stopping,
            Message::Status(msg) => NotifyState::Status(msg),
            Message::Watchdog => NotifyState::Watchdog,
        };
        if let Err(e) = sd_notify::notify(false, &[state]) {
            tracing::debug!(error = %e, message = ?self, "sd_notify failed");
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn deliver(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_notifier_is_noop() {
        let n = SystemdNotifier::new(false);
        n.notify_ready();
        n.notify_status("Version 3, 4/4 cached");
        n.notify_watchdog();
        n.notify_stopping();
    }

    #[test]
    fn test_enabled_notifier_without_socket_does_not_panic() {
        // Without NOTIFY_SOCKET sd_notify returns Ok and sends nothing.
        let n = SystemdNotifier::new(true);
        n.notify_ready();
        n.notify_status("Offline, playing cached content");
        n.notify_watchdog();
        n.notify_stopping();
    }
}
