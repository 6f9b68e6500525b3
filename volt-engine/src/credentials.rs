//! Contract with the external credential store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use volt_core::{UserCredentials, UserId};

/// Keyed lookup of per-user header+cookie blobs. The store itself (and any
/// refresh UX) lives outside the core.
#[async_trait]
pub trait CredentialsStore: Send + Sync {
    /// `None` when no credentials are on file for the user.
    async fn credentials(&self, user_id: UserId) -> Option<UserCredentials>;
}

/// In-memory store, mainly for tests and embedding.
#[derive(Clone, Default)]
pub struct MemoryCredentialsStore {
    inner: Arc<Mutex<HashMap<UserId, UserCredentials>>>,
}

impl MemoryCredentialsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: UserId, creds: UserCredentials) {
        self.inner.lock().expect("store lock").insert(user_id, creds);
    }

    pub fn remove(&self, user_id: UserId) {
        self.inner.lock().expect("store lock").remove(&user_id);
    }
}

#[async_trait]
impl CredentialsStore for MemoryCredentialsStore {
    async fn credentials(&self, user_id: UserId) -> Option<UserCredentials> {
        self.inner.lock().expect("store lock").get(&user_id).cloned()
    }
}
