use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use dashmap::DashMap;
use tracing::debug;

use crate::app::models::ChangeMask;

use super::DeviceSession;

/// Returned by [`DeviceSession::client_name`] for a pid with no attached client.
pub const UNKNOWN_CLIENT_NAME: &str = "unknown";

/// A debuggable process running on the device.
pub struct Client {
    pid: u32,
    descriptor: RwLock<String>,
    session: Weak<DeviceSession>,
}

impl Client {
    pub fn new(session: &Arc<DeviceSession>, pid: u32, descriptor: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            pid,
            descriptor: RwLock::new(descriptor.into()),
            session: Arc::downgrade(session),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Process or package name.
    pub fn descriptor(&self) -> String {
        self.descriptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `None` once the owning session is gone.
    pub fn session(&self) -> Option<Arc<DeviceSession>> {
        self.session.upgrade()
    }

    fn set_descriptor(&self, descriptor: &str) {
        *self.descriptor.write().unwrap_or_else(PoisonError::into_inner) = descriptor.to_string();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pid", &self.pid)
            .field("descriptor", &self.descriptor())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Added(Arc<Client>),
    Removed(Arc<Client>),
    Updated(Arc<Client>, ChangeMask),
    Cleared,
}

pub type ClientListener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

pub(super) struct ClientRegistry {
    clients: Mutex<Vec<Arc<Client>>>,
    names: DashMap<u32, String>,
    listener: RwLock<Option<ClientListener>>,
}

impl ClientRegistry {
    pub(super) fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            names: DashMap::new(),
            listener: RwLock::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Client>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ClientEvent) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener(&event);
        }
    }
}

impl DeviceSession {
    pub fn add_client(&self, client: Arc<Client>) {
        self.registry.lock().push(Arc::clone(&client));
        self.registry.names.insert(client.pid(), client.descriptor());
        debug!(serial = %self.serial, pid = client.pid(), "client attached");
        self.registry.emit(ClientEvent::Added(client));
    }

    /// Detaches `client`. With `notify`, a client-list change is broadcast.
    pub fn remove_client(&self, client: &Arc<Client>, notify: bool) {
        let removed = {
            let mut clients = self.registry.lock();
            let before = clients.len();
            clients.retain(|existing| !Arc::ptr_eq(existing, client));
            clients.len() != before
        };
        if !removed {
            return;
        }
        self.registry.names.remove(&client.pid());
        debug!(serial = %self.serial, pid = client.pid(), "client detached");
        self.collaborators.disconnections.on_client_disconnected(client);
        if notify {
            self.collaborators
                .broadcaster
                .notify_device_changed(self, ChangeMask::CLIENT_LIST);
        }
        self.registry.emit(ClientEvent::Removed(Arc::clone(client)));
    }

    /// Applies a descriptor change (if any) and reports `mask` for the client.
    pub fn update_client(&self, client: &Arc<Client>, descriptor: Option<&str>, mask: ChangeMask) {
        if let Some(descriptor) = descriptor {
            client.set_descriptor(descriptor);
        }
        if self.registry.lock().iter().any(|existing| Arc::ptr_eq(existing, client)) {
            self.registry.names.insert(client.pid(), client.descriptor());
        }
        self.collaborators
            .broadcaster
            .notify_client_changed(client, mask);
        self.registry
            .emit(ClientEvent::Updated(Arc::clone(client), mask));
    }

    pub fn clear_client_list(&self) {
        self.registry.lock().clear();
        self.registry.names.clear();
        self.registry.emit(ClientEvent::Cleared);
    }

    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.registry.lock().clone()
    }

    pub fn client(&self, descriptor: &str) -> Option<Arc<Client>> {
        self.registry
            .lock()
            .iter()
            .find(|client| client.descriptor() == descriptor)
            .cloned()
    }

    /// Reads the pid index without touching the client list lock.
    pub fn client_name(&self, pid: u32) -> String {
        self.registry
            .names
            .get(&pid)
            .map(|name| name.value().clone())
            .unwrap_or_else(|| UNKNOWN_CLIENT_NAME.to_string())
    }

    pub fn has_clients(&self) -> bool {
        !self.registry.lock().is_empty()
    }

    /// Replaces the single per-session listener; `None` removes it.
    pub fn set_client_listener(&self, listener: Option<ClientListener>) {
        *self
            .registry
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }
}
