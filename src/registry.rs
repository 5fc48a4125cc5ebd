//! Module registry: resolves descriptors into live module instances

use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};

use crate::config::ModuleDescriptor;
use crate::error::{AgentError, Result};
use crate::module::{
    CpuModule, DiskIoModule, DiskModule, ExecModule, GpuModule, MemoryModule, MetricModule,
    NetIoModule, SensorsModule, SystemModule,
};

/// Constructor for a module type. Returns `AgentError::Config` when the
/// descriptor's options are rejected and `AgentError::Init` when a required
/// resource is unavailable.
pub type ModuleCtor =
    Box<dyn Fn(&ModuleDescriptor) -> Result<Box<dyn MetricModule>> + Send + Sync>;

/// Maps module type names to constructors. Built-in and user-registered
/// types are resolved identically; the scheduler never knows the difference.
pub struct ModuleRegistry {
    ctors: HashMap<String, ModuleCtor>,
}

impl ModuleRegistry {
    /// An empty registry with no module types
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// A registry with every built-in module type registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        macro_rules! builtin {
            ($name:literal, $ty:ident) => {
                registry
                    .register_type($name, |d| {
                        $ty::new(d).map(|m| Box::new(m) as Box<dyn MetricModule>)
                    })
                    .expect("built-in module types are distinct");
            };
        }

        builtin!("cpu", CpuModule);
        builtin!("memory", MemoryModule);
        builtin!("disk", DiskModule);
        builtin!("diskio", DiskIoModule);
        builtin!("netio", NetIoModule);
        builtin!("sensors", SensorsModule);
        builtin!("system", SystemModule);
        builtin!("gpu", GpuModule);
        builtin!("exec", ExecModule);

        registry
    }

    /// Register a module type. Custom types register exactly like built-ins.
    pub fn register_type<F>(&mut self, name: impl Into<String>, ctor: F) -> Result<()>
    where
        F: Fn(&ModuleDescriptor) -> Result<Box<dyn MetricModule>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.ctors.contains_key(&name) {
            return Err(AgentError::Config(format!(
                "Module type '{}' is already registered",
                name
            )));
        }
        self.ctors.insert(name, Box::new(ctor));
        Ok(())
    }

    /// Registered type names, for diagnostics
    pub fn type_names(&self) -> Vec<&str> {
        self.ctors.keys().map(String::as_str).collect()
    }

    /// Instantiate one descriptor
    pub fn build(&self, descriptor: &ModuleDescriptor) -> Result<Box<dyn MetricModule>> {
        descriptor.validate()?;
        let ctor = self.ctors.get(descriptor.module_type()).ok_or_else(|| {
            AgentError::Config(format!(
                "Module '{}' has unknown type '{}'",
                descriptor.name,
                descriptor.module_type()
            ))
        })?;
        ctor(descriptor)
    }

    /// Instantiate every enabled descriptor.
    ///
    /// A module that fails to build is disabled and reported once; it never
    /// aborts the rest of the startup. The caller decides what to do when
    /// nothing at all could be enabled.
    pub fn build_all(
        &self,
        descriptors: &[ModuleDescriptor],
    ) -> Vec<(ModuleDescriptor, Box<dyn MetricModule>)> {
        let mut built = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for descriptor in descriptors {
            if !seen.insert(&descriptor.name) {
                error!(
                    "Module '{}' is defined more than once; ignoring the duplicate",
                    descriptor.name
                );
                continue;
            }
            if !descriptor.enabled {
                debug!("Module '{}' is disabled by configuration", descriptor.name);
                continue;
            }

            match self.build(descriptor) {
                Ok(instance) => {
                    info!(
                        "Module '{}' ({}) registered with {}s interval",
                        descriptor.name,
                        descriptor.module_type(),
                        descriptor.interval_secs
                    );
                    built.push((descriptor.clone(), instance));
                }
                Err(AgentError::Init(reason)) => {
                    warn!("Module '{}' disabled: {}", descriptor.name, reason);
                }
                Err(e) => {
                    error!("Module '{}' disabled: {}", descriptor.name, e);
                }
            }
        }

        built
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use crate::point::MetricPoint;

    struct NullModule {
        name: String,
    }

    #[async_trait::async_trait]
    impl MetricModule for NullModule {
        fn name(&self) -> &str {
            &self.name
        }

        async fn collect(&mut self, _now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
            Ok(Vec::new())
        }
    }

    fn null_ctor(descriptor: &ModuleDescriptor) -> Result<Box<dyn MetricModule>> {
        Ok(Box::new(NullModule {
            name: descriptor.name.clone(),
        }))
    }

    fn descriptor(name: &str, module: &str) -> ModuleDescriptor {
        ModuleDescriptor {
            name: name.to_string(),
            module: Some(module.to_string()),
            interval_secs: 5,
            enabled: true,
            timeout_secs: None,
            options: Default::default(),
        }
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let registry = ModuleRegistry::new();
        let Err(err) = registry.build(&descriptor("thing", "does-not-exist")) else {
            panic!("unknown module type must not build");
        };
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_duplicate_type_registration_rejected() {
        let mut registry = ModuleRegistry::new();
        registry.register_type("null", null_ctor).unwrap();
        let err = registry.register_type("null", null_ctor).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_custom_type_builds_like_builtin() {
        let mut registry = ModuleRegistry::new();
        registry.register_type("null", null_ctor).unwrap();
        let module = registry.build(&descriptor("mine", "null")).unwrap();
        assert_eq!(module.name(), "mine");
    }

    #[test]
    fn test_build_all_disables_failing_modules() {
        let mut registry = ModuleRegistry::new();
        registry.register_type("null", null_ctor).unwrap();
        registry
            .register_type("no-gpu", |d| {
                Err(AgentError::Init(format!("Module '{}': no device", d.name)))
            })
            .unwrap();

        let built = registry.build_all(&[
            descriptor("ok", "null"),
            descriptor("gpu", "no-gpu"),
            descriptor("unknown", "missing-type"),
        ]);

        assert_eq!(built.len(), 1);
        assert_eq!(built[0].0.name, "ok");
    }

    #[test]
    fn test_build_all_skips_disabled_and_duplicates() {
        let mut registry = ModuleRegistry::new();
        registry.register_type("null", null_ctor).unwrap();

        let mut off = descriptor("off", "null");
        off.enabled = false;

        let built = registry.build_all(&[
            descriptor("a", "null"),
            descriptor("a", "null"),
            off,
        ]);
        assert_eq!(built.len(), 1);
    }

    #[test]
    fn test_builtin_types_present() {
        let registry = ModuleRegistry::with_builtins();
        for expected in ["cpu", "memory", "disk", "diskio", "netio", "sensors", "system", "gpu", "exec"] {
            assert!(registry.type_names().contains(&expected), "{} missing", expected);
        }
    }
}
