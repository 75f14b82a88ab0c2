// Job Shutdown Token

use std::sync::Arc;
use tokio::sync::watch;

/// Shutdown signal shared by the loops of one job instance
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        if self.is_shutdown() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

/// Shutdown sender; clones signal the same set of tokens
#[derive(Clone)]
pub struct ShutdownSender {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSender {
    /// Signal shutdown to every token
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Mint another token observing this sender
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx: Arc::new(tx) }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_minted_after_shutdown_sees_it() {
        let (tx, token) = shutdown_channel();
        assert!(!token.is_shutdown());
        tx.shutdown();
        let mut late = tx.token();
        assert!(late.is_shutdown());
        late.wait().await;
    }
}
