//! Readiness handle for the crypto capability.
//!
//! A provider may need asynchronous initialization before it can serve
//! requests. Instead of a shared "initialized" flag polled by callers, the
//! handle owns the readiness state: [`CryptoHandle::get`] suspends until the
//! provider has been marked ready, then hands out the provider.

use std::sync::Arc;
use tokio::sync::watch;

use crate::error::CryptoError;
use crate::traits::CryptoProvider;

/// Shared, cloneable access to a [`CryptoProvider`] gated on readiness.
#[derive(Clone)]
pub struct CryptoHandle {
    provider: Arc<dyn CryptoProvider>,
    ready: watch::Receiver<bool>,
}

/// Completes a deferred [`CryptoHandle`]. Dropping it without calling
/// [`complete`](Self::complete) leaves waiters failing with
/// [`CryptoError::NotReady`].
pub struct CryptoInit {
    tx: watch::Sender<bool>,
}

impl CryptoInit {
    /// Mark the provider ready and wake every waiter.
    pub fn complete(self) {
        self.tx.send_replace(true);
    }
}

impl CryptoHandle {
    /// A handle over a provider that is ready immediately.
    pub fn ready(provider: Arc<dyn CryptoProvider>) -> Self {
        let (_tx, ready) = watch::channel(true);
        Self { provider, ready }
    }

    /// A handle whose provider becomes usable once the returned
    /// [`CryptoInit`] is completed.
    pub fn deferred(provider: Arc<dyn CryptoProvider>) -> (Self, CryptoInit) {
        let (tx, ready) = watch::channel(false);
        (Self { provider, ready }, CryptoInit { tx })
    }

    /// Wait until the provider is ready and return it.
    pub async fn get(&self) -> Result<&dyn CryptoProvider, CryptoError> {
        if !*self.ready.borrow() {
            let mut rx = self.ready.clone();
            rx.wait_for(|ready| *ready)
                .await
                .map_err(|_| CryptoError::NotReady)?;
        }
        Ok(self.provider.as_ref())
    }

    /// Whether the provider is ready without waiting.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }
}

impl std::fmt::Debug for CryptoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}
