//! Per-operation instrumentation settings
//!
//! Settings are declared in a [`ConfigRegistry`]: a table of units (services,
//! controllers) with optional per-operation overrides. The audit and
//! performance halves resolve independently, each taking the first
//! declaration found in the order operation, unit, default. A declaration is
//! taken whole; fields are never merged across levels.
//!
//! Registries come from [`ConfigRegistry::builder`] or from TOML:
//!
//! ```toml
//! [units.TaskService.performance]
//! slow_threshold_ms = 1500
//!
//! [units.TaskService.operations.createTask.audit]
//! description = "Create Task"
//! log_parameters = true
//! ```
//!
//! [`ConfigResolver`] wraps a registry and caches resolved settings per
//! `(unit, operation)`.

use crate::error::InstrumentError;
use dashmap::DashMap;
use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::HashMap, path::Path, sync::Arc};

/// Default slow-operation threshold in milliseconds
pub const DEFAULT_SLOW_THRESHOLD_MS: u64 = 1000;

/// Audit half of the settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Human-readable description; empty means "derive from the names"
    pub description: String,
    pub log_parameters: bool,
    pub log_return_value: bool,
}

impl AuditSettings {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_parameters(mut self) -> Self {
        self.log_parameters = true;
        self
    }

    pub fn with_return_value(mut self) -> Self {
        self.log_return_value = true;
        self
    }

    /// The configured description, or one derived from the names
    pub fn description_for(&self, unit: &str, operation: &str) -> Cow<'_, str> {
        if self.description.is_empty() {
            Cow::Owned(generate_description(unit, operation))
        } else {
            Cow::Borrowed(&self.description)
        }
    }
}

/// Performance half of the settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub slow_threshold_ms: u64,
    pub always_log: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            slow_threshold_ms: DEFAULT_SLOW_THRESHOLD_MS,
            always_log: false,
        }
    }
}

impl PerformanceSettings {
    pub fn with_threshold(slow_threshold_ms: u64) -> Self {
        Self {
            slow_threshold_ms,
            ..Default::default()
        }
    }

    pub fn always_logged(mut self) -> Self {
        self.always_log = true;
        self
    }
}

/// Effective settings for one `(unit, operation)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentationConfig {
    pub audit: AuditSettings,
    pub performance: PerformanceSettings,
}

/// Settings declared at one level. Absent halves fall through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Declaration {
    pub audit: Option<AuditSettings>,
    pub performance: Option<PerformanceSettings>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit(mut self, settings: AuditSettings) -> Self {
        self.audit = Some(settings);
        self
    }

    pub fn performance(mut self, settings: PerformanceSettings) -> Self {
        self.performance = Some(settings);
        self
    }
}

/// Unit-level declaration plus its operation overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnitDeclaration {
    pub audit: Option<AuditSettings>,
    pub performance: Option<PerformanceSettings>,
    pub operations: HashMap<String, Declaration>,
}

impl UnitDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit(mut self, settings: AuditSettings) -> Self {
        self.audit = Some(settings);
        self
    }

    pub fn performance(mut self, settings: PerformanceSettings) -> Self {
        self.performance = Some(settings);
        self
    }

    pub fn operation(mut self, name: impl Into<String>, declaration: Declaration) -> Self {
        self.operations.insert(name.into(), declaration);
        self
    }
}

/// Two-level declaration table keyed by unit name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigRegistry {
    pub units: HashMap<String, UnitDeclaration>,
}

impl ConfigRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn into_builder(self) -> RegistryBuilder {
        RegistryBuilder { units: self.units }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, InstrumentError> {
        Ok(Figment::from(Toml::string(source)).extract()?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, InstrumentError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(InstrumentError::ConfigFileMissing(path.to_path_buf()));
        }
        Ok(Figment::from(Toml::file(path)).extract()?)
    }

    /// Resolve without caching
    pub fn resolve(&self, unit: &str, operation: &str) -> InstrumentationConfig {
        let Some(declared) = self.units.get(unit) else {
            return InstrumentationConfig::default();
        };
        let op = declared.operations.get(operation);

        InstrumentationConfig {
            audit: op
                .and_then(|d| d.audit.clone())
                .or_else(|| declared.audit.clone())
                .unwrap_or_default(),
            performance: op
                .and_then(|d| d.performance.clone())
                .or_else(|| declared.performance.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    units: HashMap<String, UnitDeclaration>,
}

impl RegistryBuilder {
    /// Declare a unit, replacing any earlier declaration of the same name
    pub fn unit(mut self, name: impl Into<String>, declaration: UnitDeclaration) -> Self {
        self.units.insert(name.into(), declaration);
        self
    }

    /// Declare a unit only if it has no declaration yet
    pub fn unit_or_keep(mut self, name: impl Into<String>, declaration: UnitDeclaration) -> Self {
        self.units.entry(name.into()).or_insert(declaration);
        self
    }

    pub fn build(self) -> ConfigRegistry {
        ConfigRegistry { units: self.units }
    }
}

/// Caching front for a [`ConfigRegistry`]
#[derive(Debug, Default)]
pub struct ConfigResolver {
    registry: ConfigRegistry,
    cache: DashMap<(&'static str, &'static str), Arc<InstrumentationConfig>>,
}

impl ConfigResolver {
    pub fn new(registry: ConfigRegistry) -> Self {
        Self {
            registry,
            cache: DashMap::new(),
        }
    }

    pub fn resolve(&self, unit: &'static str, operation: &'static str) -> Arc<InstrumentationConfig> {
        if let Some(cached) = self.cache.get(&(unit, operation)) {
            return Arc::clone(cached.value());
        }

        let resolved = Arc::new(self.registry.resolve(unit, operation));
        self.cache
            .entry((unit, operation))
            .or_insert(resolved)
            .value()
            .clone()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

/// Description used when none is configured
pub fn generate_description(unit: &str, operation: &str) -> String {
    let entity = unit.replace("Service", "").replace("Controller", "");

    let verb = [
        ("create", "Create"),
        ("update", "Update"),
        ("delete", "Delete"),
        ("get", "Retrieve"),
        ("find", "Retrieve"),
    ]
    .into_iter()
    .find(|(prefix, _)| operation.starts_with(prefix))
    .map(|(_, verb)| verb);

    if let Some(verb) = verb {
        return format!("{} {}", verb, entity);
    }
    if operation.starts_with("login") {
        return "User Login".to_string();
    }
    if operation.starts_with("signUp") {
        return "User Registration".to_string();
    }
    if operation.starts_with("add") {
        return format!("Add {}", entity);
    }
    if operation.starts_with("remove") {
        return format!("Remove {}", entity);
    }
    format!("{} Operation", unit)
}
