//! Sessions by id, and the hook a session calls when it is done

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::network::Hub;
use crate::session::{input_channel, Session, SessionHandle};
use crate::words::WordStore;
use dashmap::DashMap;
use log::info;
use shared::SessionId;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Told exactly once per session, after it has shut down
pub trait Lifecycle: Send + Sync {
    fn on_session_ended(&self, session_id: &SessionId);
}

#[derive(Clone)]
struct Entry {
    handle: SessionHandle,
    hub: Arc<Hub>,
}

/// Owns every running session and forgets them once they end
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Entry>,
    words: Arc<dyn WordStore>,
}

/// Lets sessions report back without keeping the registry alive
struct RegistryLifecycle(Weak<SessionRegistry>);

impl Lifecycle for RegistryLifecycle {
    fn on_session_ended(&self, session_id: &SessionId) {
        if let Some(registry) = self.0.upgrade() {
            registry.forget(session_id);
        }
    }
}

impl SessionRegistry {
    pub fn new(words: Arc<dyn WordStore>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            words,
        })
    }

    /// Starts a new session with its own hub
    pub fn create(
        self: &Arc<Self>,
        id: impl Into<SessionId>,
        config: SessionConfig,
    ) -> Result<(SessionHandle, Arc<Hub>), SessionError> {
        let id = id.into();
        config.validate()?;

        let entry = match self.sessions.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(SessionError::AlreadyExists(id));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (input_tx, input_rx) = input_channel(config.input_queue);
                let hub = Hub::new(input_tx.clone(), config.outbound_queue);
                let (session, handle) = Session::new(
                    id.clone(),
                    config,
                    hub.clone(),
                    Arc::clone(&self.words),
                    (input_tx, input_rx),
                );
                let lifecycle = Arc::new(RegistryLifecycle(Arc::downgrade(self)));
                session.with_lifecycle(lifecycle).spawn();

                vacant.insert(Entry { handle, hub }).clone()
            }
        };

        info!("Created session {}", id);
        Ok((entry.handle, entry.hub))
    }

    pub fn get(&self, id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn hub(&self, id: &str) -> Result<Arc<Hub>, SessionError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(&entry.hub))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Shuts down sessions without activity for longer than `max_idle`.
    /// They leave the registry once their loop has finished cleaning up.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<SessionId> {
        // Clone handles out first, no map guard may be held across an await
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.handle.clone())
            .collect();

        let now = Instant::now();
        let mut reaped = Vec::new();
        for handle in handles {
            if now.duration_since(handle.last_activity().await) > max_idle {
                info!("Session {} idle for over {:?}, shutting down", handle.id(), max_idle);
                handle.shutdown();
                reaped.push(handle.id().clone());
            }
        }
        reaped
    }

    pub fn shutdown_all(&self) {
        for entry in self.sessions.iter() {
            entry.handle.shutdown();
        }
    }

    fn forget(&self, session_id: &SessionId) {
        if self.sessions.remove(session_id).is_some() {
            info!("Session {} removed from registry", session_id);
        }
    }
}

impl Lifecycle for SessionRegistry {
    fn on_session_ended(&self, session_id: &SessionId) {
        self.forget(session_id);
    }
}
