//! Registration with the surrounding device registry.
//!
//! The registry is an external collaborator: the device is handed to it
//! once at startup and detached once at shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use crate::device::Device;
use crate::error::{RegistryError, Result};
use crate::DeviceConfig;

/// Where devices and their video nodes get published.
pub trait DeviceRegistry: Send + Sync {
    fn register_device(&self, name: &str) -> std::result::Result<(), RegistryError>;
    fn unregister_device(&self, name: &str) -> std::result::Result<(), RegistryError>;
    /// Publish a video node; returns the node number assigned.
    fn register_node(
        &self,
        name: &str,
        preferred: Option<u32>,
    ) -> std::result::Result<u32, RegistryError>;
    fn unregister_node(&self, node: u32) -> std::result::Result<(), RegistryError>;
}

#[derive(Default)]
struct Entries {
    devices: Vec<String>,
    nodes: HashMap<u32, String>,
}

/// In-process registry. Can be told to refuse registrations.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: Mutex<Entries>,
    reject_devices: bool,
    reject_nodes: bool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every device registration.
    pub fn rejecting_devices(mut self) -> Self {
        self.reject_devices = true;
        self
    }

    /// Refuse every video node registration.
    pub fn rejecting_nodes(mut self) -> Self {
        self.reject_nodes = true;
        self
    }

    pub fn devices(&self) -> Vec<String> {
        self.entries().devices.clone()
    }

    pub fn node(&self, node: u32) -> Option<String> {
        self.entries().nodes.get(&node).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.entries().nodes.len()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn register_device(&self, name: &str) -> std::result::Result<(), RegistryError> {
        if self.reject_devices {
            return Err(RegistryError::DeviceRejected(name.to_owned()));
        }
        self.entries().devices.push(name.to_owned());
        Ok(())
    }

    fn unregister_device(&self, name: &str) -> std::result::Result<(), RegistryError> {
        let mut entries = self.entries();
        let pos = entries
            .devices
            .iter()
            .position(|d| d == name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_owned()))?;
        entries.devices.remove(pos);
        Ok(())
    }

    fn register_node(
        &self,
        name: &str,
        preferred: Option<u32>,
    ) -> std::result::Result<u32, RegistryError> {
        if self.reject_nodes {
            return Err(RegistryError::NodeRejected(name.to_owned()));
        }
        let mut entries = self.entries();
        let node = match preferred {
            Some(n) if entries.nodes.contains_key(&n) => return Err(RegistryError::NodeInUse(n)),
            Some(n) => n,
            None => (0..).find(|n| !entries.nodes.contains_key(n)).unwrap_or_default(),
        };
        entries.nodes.insert(node, name.to_owned());
        Ok(node)
    }

    fn unregister_node(&self, node: u32) -> std::result::Result<(), RegistryError> {
        self.entries()
            .nodes
            .remove(&node)
            .map(drop)
            .ok_or_else(|| RegistryError::NotRegistered(format!("video node {node}")))
    }
}

/// A device published in a registry. Detaches exactly once, on
/// [`unregister`](Self::unregister) or drop.
pub struct Registration {
    registry: Arc<dyn DeviceRegistry>,
    device: Device,
    device_name: String,
    node: u32,
    active: bool,
}

impl Registration {
    /// Register the device, then its video node. A failure unwinds whatever
    /// step already succeeded.
    pub fn register(
        registry: Arc<dyn DeviceRegistry>,
        device: Device,
        config: &DeviceConfig,
    ) -> Result<Self> {
        registry.register_device(&config.driver)?;

        let node = match registry.register_node(&config.node_name, config.preferred_node) {
            Ok(node) => node,
            Err(e) => {
                warn!(error = %e, "video node registration failed, unwinding");
                if let Err(undo) = registry.unregister_device(&config.driver) {
                    warn!(error = %undo, "unwinding device registration failed");
                }
                return Err(e.into());
            }
        };

        info!(device = %config.driver, node, "device registered");
        Ok(Self {
            registry,
            device,
            device_name: config.driver.clone(),
            node,
            active: true,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn node(&self) -> u32 {
        self.node
    }

    /// Stop streaming, free the pool, then remove the node and the device.
    pub fn unregister(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.device.shutdown();
        if let Err(e) = self.registry.unregister_node(self.node) {
            warn!(error = %e, "video node already gone");
        }
        if let Err(e) = self.registry.unregister_device(&self.device_name) {
            warn!(error = %e, "device already gone");
        }
        info!(device = %self.device_name, node = self.node, "device unregistered");
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.detach();
    }
}
