//! Registry of session transports.
//!
//! Replaces a process-wide socket singleton: whoever owns the manager decides
//! when transports are created and torn down.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::Transport;
use super::connector::{Connector, TungsteniteConnector};
use crate::config::{ConfigError, SyncConfig};

/// Normalize a session key (username) for use as a registry key
pub fn normalize_session_key(session_key: &str) -> String {
    session_key.trim().to_string()
}

#[derive(Default)]
struct Registry {
    active_session: Option<String>,
    transports: HashMap<String, Transport>,
}

pub struct ConnectionManager {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    registry: Mutex<Registry>,
}

impl ConnectionManager {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(config: SyncConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Return the transport for `session_key`, creating it on first use.
    ///
    /// Switching to a different session disconnects and drops every
    /// transport of the previous one. The returned transport is not
    /// connected yet; call [`Transport::connect`].
    pub fn acquire(&self, session_key: &str) -> Result<Transport, ConfigError> {
        let key = normalize_session_key(session_key);
        let mut registry = self.registry.lock();

        if let Some(existing) = registry.transports.get(&key) {
            return Ok(existing.clone());
        }

        if registry.active_session.as_deref() != Some(key.as_str()) {
            if !registry.transports.is_empty() {
                tracing::info!("ConnectionManager: session changed, clearing old connections");
            }
            for (_, transport) in registry.transports.drain() {
                transport.disconnect();
            }
        }

        let transport = Transport::new(
            key.clone(),
            self.config.transport_config(&key)?,
            self.connector.clone(),
        );
        tracing::info!("Created transport for session '{}' at {}", key, transport.url());
        registry.transports.insert(key.clone(), transport.clone());
        registry.active_session = Some(key);
        Ok(transport)
    }

    pub fn get(&self, session_key: &str) -> Option<Transport> {
        let key = normalize_session_key(session_key);
        self.registry.lock().transports.get(&key).cloned()
    }

    pub fn active_session(&self) -> Option<String> {
        self.registry.lock().active_session.clone()
    }

    /// Disconnect and forget one session's transport.
    pub fn release(&self, session_key: &str) -> bool {
        let key = normalize_session_key(session_key);
        let mut registry = self.registry.lock();
        let Some(transport) = registry.transports.remove(&key) else {
            return false;
        };
        if registry.active_session.as_deref() == Some(key.as_str()) {
            registry.active_session = None;
        }
        drop(registry);
        transport.disconnect();
        true
    }

    /// Disconnect everything (used during logout and app teardown).
    pub fn clear(&self) {
        let transports: Vec<Transport> = {
            let mut registry = self.registry.lock();
            registry.active_session = None;
            registry.transports.drain().map(|(_, t)| t).collect()
        };
        for transport in transports {
            transport.disconnect();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.clear();
    }
}
