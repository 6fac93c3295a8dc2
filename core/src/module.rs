//! Module system used by hosts to load and unload the responder

use crate::manager::{ConnectionEvent, IdentdManager};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Module trait that all modules must implement
#[async_trait]
pub trait Module: Send + Sync {
    /// Module name
    fn name(&self) -> &str;

    /// Module version
    fn version(&self) -> &str;

    /// Module description
    fn description(&self) -> &str;

    /// Initialize the module
    async fn init(&mut self) -> Result<()>;

    /// Cleanup the module
    async fn cleanup(&mut self) -> Result<()>;
}

/// Module manager for loading and managing modules
#[derive(Default)]
pub struct ModuleManager {
    modules: HashMap<String, Box<dyn Module>>,
}

impl ModuleManager {
    /// Create a new module manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a module
    pub async fn load_module(&mut self, mut module: Box<dyn Module>) -> Result<()> {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            return Err(Error::Module(format!("Module {} is already loaded", name)));
        }

        module.init().await?;
        info!("Loaded module {} {}", name, module.version());
        self.modules.insert(name, module);

        Ok(())
    }

    /// Unload a module
    pub async fn unload_module(&mut self, name: &str) -> Result<()> {
        let mut module = self
            .modules
            .remove(name)
            .ok_or_else(|| Error::Module(format!("Module {} not found", name)))?;

        module.cleanup().await?;
        info!("Unloaded module {}", name);

        Ok(())
    }

    /// Unload every module, returning the first cleanup error
    pub async fn unload_all(&mut self) -> Result<()> {
        let names: Vec<String> = self.modules.keys().cloned().collect();
        let mut first_error = None;

        for name in names {
            if let Err(e) = self.unload_module(&name).await {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Check whether a module is loaded
    pub fn is_loaded(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Names of the loaded modules
    pub fn loaded_modules(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }
}

/// The ident responder packaged as a module.
///
/// Loading subscribes the manager to `events`; unloading stops the server.
pub struct IdentdModule {
    manager: Arc<IdentdManager>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl IdentdModule {
    pub fn new(manager: Arc<IdentdManager>, events: broadcast::Sender<ConnectionEvent>) -> Self {
        Self { manager, events }
    }
}

#[async_trait]
impl Module for IdentdModule {
    fn name(&self) -> &str {
        "identd"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Answers ident requests from IRC servers"
    }

    async fn init(&mut self) -> Result<()> {
        self.manager.on_load(self.events.subscribe()).await;
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.manager.on_unload().await;
        Ok(())
    }
}
