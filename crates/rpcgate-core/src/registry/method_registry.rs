use super::{FnInvoker, Invoker, RegistrationUnit};
use crate::bridge::CallContext;
use crate::connection::Session;
use crate::{GatewayError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the pseudo-unit used for methods registered outside any unit.
const DIRECT_UNIT: &str = "direct";

struct MethodEntry {
    invoker: Arc<dyn Invoker>,
    unit: String,
}

/// Collects methods during startup.
///
/// Registering a name twice is an error; the first registration is kept and
/// the build is expected to be aborted by the caller.
pub struct RegistryBuilder {
    methods: HashMap<String, MethodEntry>,
    current_unit: Option<String>,
    units_applied: usize,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            current_unit: None,
            units_applied: 0,
        }
    }

    /// Register an invoker under `name`.
    pub fn register(&mut self, name: impl Into<String>, invoker: Arc<dyn Invoker>) -> Result<()> {
        let name = name.into();
        let unit = self
            .current_unit
            .clone()
            .unwrap_or_else(|| DIRECT_UNIT.to_string());

        if let Some(existing) = self.methods.get(&name) {
            return Err(GatewayError::DuplicateMethod {
                method: name,
                unit: format!("{}, already owned by {}", unit, existing.unit),
            });
        }

        self.methods.insert(name, MethodEntry { invoker, unit });
        Ok(())
    }

    /// Register an async closure under `name`.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(CallContext, Arc<Session>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.register(name, Arc::new(FnInvoker::new(f)))
    }

    /// Run every registration unit, in order.
    pub fn apply(&mut self, units: &[Box<dyn RegistrationUnit>]) -> Result<()> {
        for unit in units {
            let before = self.methods.len();
            self.current_unit = Some(unit.name().to_string());
            let outcome = unit.register_into(self);
            self.current_unit = None;
            outcome?;

            self.units_applied += 1;
            debug!(
                "Registration unit {} added {} methods",
                unit.name(),
                self.methods.len() - before
            );
        }
        Ok(())
    }

    /// Number of methods registered so far.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Freeze into a read-only registry.
    pub fn build(self) -> Registry {
        info!(
            "Method registry ready: {} methods from {} units",
            self.methods.len(),
            self.units_applied
        );
        Registry {
            methods: self.methods,
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only method registry.
///
/// Has no mutation API; share it behind an `Arc` and resolve without locking.
pub struct Registry {
    methods: HashMap<String, MethodEntry>,
}

impl Registry {
    /// Look up the invoker for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Invoker>> {
        match self.methods.get(name) {
            Some(entry) => Ok(entry.invoker.clone()),
            None => {
                debug!("Method not found: {}", name);
                Err(GatewayError::MethodNotFound {
                    method: name.to_string(),
                })
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Name of the unit that registered `name`.
    pub fn unit_of(&self, name: &str) -> Option<&str> {
        self.methods.get(name).map(|e| e.unit.as_str())
    }

    /// All method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("methods", &self.methods.len())
            .finish()
    }
}
