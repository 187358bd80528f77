//! 插件注册表：发现适配器并记录每个名字可加载的能力工厂
//!
//! discover() 从所有来源读取候选，逐个按目录解析 perception / action 路径。
//! 单个候选失败只记录并跳过，整体发现总能完成；新表构建完成后一次性替换旧表。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::adapter::{ActionFactory, PerceptionFactory};
use super::catalog::{AdapterCatalog, CapabilityKind};
use super::source::{PluginCandidate, PluginSource};

/// 单个候选注册失败的原因（只用于诊断，不会传播出注册表）
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistrationError {
    #[error("module '{module}' not found for '{path}'")]
    SourceNotFound { path: String, module: String },

    #[error("symbol '{symbol}' not found for '{path}'")]
    SymbolNotFound { path: String, symbol: String },

    #[error("'{path}' does not implement the {expected} interface (found {found})")]
    InterfaceMismatch {
        path: String,
        expected: CapabilityKind,
        found: CapabilityKind,
    },

    #[error("malformed symbol path '{0}', expected 'module.path:Symbol'")]
    MalformedPath(String),

    #[error("malformed declaration: {0}")]
    MalformedDeclaration(String),

    #[error("plugin source failed: {0}")]
    Source(String),
}

/// 注册表记录：一个适配器名及其可用的能力工厂（至少一个）
#[derive(Clone)]
pub struct AdapterDescriptor {
    pub name: String,
    pub perception: Option<PerceptionFactory>,
    pub action: Option<ActionFactory>,
}

impl AdapterDescriptor {
    pub fn has_perception(&self) -> bool {
        self.perception.is_some()
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

impl std::fmt::Debug for AdapterDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterDescriptor")
            .field("name", &self.name)
            .field("perception", &self.has_perception())
            .field("action", &self.has_action())
            .finish()
    }
}

#[derive(Default)]
struct RegistryTable {
    /// 首次成功注册的顺序
    order: Vec<String>,
    entries: HashMap<String, Arc<AdapterDescriptor>>,
}

impl RegistryTable {
    fn insert(&mut self, descriptor: AdapterDescriptor) {
        let name = descriptor.name.clone();
        if self.entries.insert(name.clone(), Arc::new(descriptor)).is_some() {
            tracing::warn!(adapter = %name, "Overwriting previously registered adapter");
        } else {
            self.order.push(name);
        }
    }
}

/// 适配器注册表
pub struct PluginRegistry {
    catalog: AdapterCatalog,
    sources: Vec<Arc<dyn PluginSource>>,
    table: RwLock<RegistryTable>,
}

impl PluginRegistry {
    /// 创建空注册表；需调用 discover() 才会填充
    pub fn new(catalog: AdapterCatalog) -> Self {
        Self {
            catalog,
            sources: Vec::new(),
            table: RwLock::new(RegistryTable::default()),
        }
    }

    pub fn with_source(mut self, source: impl PluginSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// 重新发现全部适配器并整体替换注册表
    pub fn discover(&self) {
        tracing::info!(sources = self.sources.len(), "Discovering available adapters...");
        let mut table = RegistryTable::default();

        for source in &self.sources {
            let candidates = match source.candidates() {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::error!(source = source.name(), error = %e, "Error discovering adapters from source");
                    continue;
                }
            };
            for candidate in candidates {
                tracing::debug!(adapter = %candidate.name, source = source.name(), "Processing plugin candidate");
                match self.resolve_candidate(&candidate) {
                    Ok(Some(descriptor)) => {
                        tracing::info!(
                            adapter = %descriptor.name,
                            perception = descriptor.has_perception(),
                            action = descriptor.has_action(),
                            "Successfully registered adapter"
                        );
                        table.insert(descriptor);
                    }
                    Ok(None) => {
                        tracing::warn!(adapter = %candidate.name, "Failed to load any class for adapter, skipping registration");
                    }
                    Err(e) => {
                        tracing::error!(adapter = %candidate.name, error = %e, "Failed to load or register adapter");
                    }
                }
            }
        }

        if table.order.is_empty() {
            tracing::warn!("No valid adapters discovered");
        } else {
            tracing::info!(adapters = ?table.order, "Adapter discovery finished");
        }

        *self.table.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = table;
    }

    /// 解析单个候选；两种能力都失败时返回 Ok(None)，声明本身不合法时返回 Err
    fn resolve_candidate(
        &self,
        candidate: &PluginCandidate,
    ) -> Result<Option<AdapterDescriptor>, RegistrationError> {
        let declaration = candidate.declaration.as_object().ok_or_else(|| {
            RegistrationError::MalformedDeclaration(format!(
                "declaration for '{}' is not a map ({})",
                candidate.name,
                value_kind(&candidate.declaration)
            ))
        })?;
        let perception_path = declared_path(declaration.get("perception"), CapabilityKind::Perception)?;
        let action_path = declared_path(declaration.get("action"), CapabilityKind::Action)?;

        let perception = perception_path.and_then(|path| {
            tracing::debug!(adapter = %candidate.name, path, "Loading perception class");
            self.catalog
                .resolve_perception(path)
                .map_err(|e| {
                    tracing::warn!(adapter = %candidate.name, path, error = %e, "Failed to load perception class");
                })
                .ok()
        });
        let action = action_path.and_then(|path| {
            tracing::debug!(adapter = %candidate.name, path, "Loading action class");
            self.catalog
                .resolve_action(path)
                .map_err(|e| {
                    tracing::warn!(adapter = %candidate.name, path, error = %e, "Failed to load action class");
                })
                .ok()
        });

        if perception.is_none() && action.is_none() {
            return Ok(None);
        }
        Ok(Some(AdapterDescriptor {
            name: candidate.name.clone(),
            perception,
            action,
        }))
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<AdapterDescriptor>> {
        self.read().entries.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read().entries.contains_key(name)
    }

    /// 已注册名字（按首次注册顺序）
    pub fn list_names(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// 按注册顺序返回所有描述符
    pub fn descriptors(&self) -> Vec<Arc<AdapterDescriptor>> {
        let table = self.read();
        table
            .order
            .iter()
            .filter_map(|name| table.entries.get(name).cloned())
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryTable> {
        self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 缺失或空字符串视为未声明；非字符串值视为声明不合法
fn declared_path(value: Option<&Value>, kind: CapabilityKind) -> Result<Option<&str>, RegistrationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(path)) if path.is_empty() => Ok(None),
        Some(Value::String(path)) => Ok(Some(path.as_str())),
        Some(other) => Err(RegistrationError::MalformedDeclaration(format!(
            "'{kind}' must be a symbol path string, got {}",
            value_kind(other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
