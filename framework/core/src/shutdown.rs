use tokio::sync::watch::{Receiver, Sender};

/// Owner side of a stop signal.
///
/// The signal is sticky: once [ShutdownHandle::shutdown] has been called, every listener created
/// before or after that point observes it. The coordinator gives each virtual user its own handle
/// so that it can stop a single user without touching the others, and keeps one more handle for
/// the whole run which is triggered by Ctrl-C.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<bool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::watch::channel(false).0,
        }
    }

    pub fn shutdown(&self) {
        let was_shutdown = self.sender.send_replace(true);
        if was_shutdown {
            log::trace!("Shutdown requested more than once");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Receiver<bool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Point in time check if the shutdown signal has been sent. If this returns true then no new
    /// work should be started.
    pub fn should_shutdown(&self) -> bool {
        // A dropped handle counts as a shutdown.
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Wait for the shutdown signal. Returns immediately if it has already been sent.
    ///
    /// It is safe to race this with another future so that the shutdown signal can be used to cut
    /// other work short.
    pub async fn wait_for_shutdown(&mut self) {
        if self.receiver.wait_for(|stop| *stop).await.is_err() {
            log::trace!("Shutdown handle dropped while waiting for shutdown");
        }
    }
}
