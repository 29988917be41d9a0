//! Identity provider boundary.

use clicker_core::PlayerId;
use std::future::Future;
use tokio::sync::watch;

/// Supplies the stable identifier that keys this client's record.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Identity if authentication has already resolved.
    fn current_identity(&self) -> Option<PlayerId>;

    /// Resolves once authentication settles; `None` means signed out or failed.
    fn ready(&self) -> impl Future<Output = Option<PlayerId>> + Send;
}

/// Identity that is known up front.
#[derive(Clone, Debug)]
pub struct StaticIdentity(PlayerId);

impl StaticIdentity {
    pub fn new(id: &str) -> Self {
        Self(PlayerId(id.to_string()))
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_identity(&self) -> Option<PlayerId> {
        Some(self.0.clone())
    }

    fn ready(&self) -> impl Future<Output = Option<PlayerId>> + Send {
        std::future::ready(Some(self.0.clone()))
    }
}

/// Authentication progress of a `DeferredIdentity`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityState {
    Pending,
    Ready(PlayerId),
    SignedOut,
}

/// Identity resolved later, e.g. after an anonymous sign-in round trip.
#[derive(Debug)]
pub struct DeferredIdentity {
    tx: watch::Sender<IdentityState>,
}

impl Default for DeferredIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredIdentity {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(IdentityState::Pending);
        Self { tx }
    }

    pub fn resolve(&self, id: &str) {
        self.tx
            .send_replace(IdentityState::Ready(PlayerId(id.to_string())));
    }

    pub fn sign_out(&self) {
        self.tx.send_replace(IdentityState::SignedOut);
    }
}

impl IdentityProvider for DeferredIdentity {
    fn current_identity(&self) -> Option<PlayerId> {
        match &*self.tx.borrow() {
            IdentityState::Ready(id) => Some(id.clone()),
            _ => None,
        }
    }

    fn ready(&self) -> impl Future<Output = Option<PlayerId>> + Send {
        let mut rx = self.tx.subscribe();
        async move {
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    IdentityState::Ready(id) => return Some(id),
                    IdentityState::SignedOut => return None,
                    IdentityState::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        }
    }
}
