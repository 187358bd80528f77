//! 适配器目录：限定路径 → 工厂函数
//!
//! 路径格式为 `module.path:Symbol`。插件声明里写的是路径字符串，
//! 进程初始化时由各适配器模块把自己的工厂登记到目录里，发现阶段再按路径解析。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::adapter::{ActionAdapter, ActionFactory, PerceptionAdapter, PerceptionFactory};
use super::registry::RegistrationError;

/// 目录中的一个符号：要么是感知工厂，要么是行动工厂
#[derive(Clone)]
enum CatalogSymbol {
    Perception(PerceptionFactory),
    Action(ActionFactory),
}

impl CatalogSymbol {
    fn kind(&self) -> CapabilityKind {
        match self {
            Self::Perception(_) => CapabilityKind::Perception,
            Self::Action(_) => CapabilityKind::Action,
        }
    }
}

/// 能力种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Perception,
    Action,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Perception => "perception",
            Self::Action => "action",
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 编译期登记的适配器目录（module → symbol → factory）
#[derive(Clone, Default)]
pub struct AdapterCatalog {
    modules: HashMap<String, HashMap<String, CatalogSymbol>>,
}

impl AdapterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置适配器已登记的目录
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        super::mock::register(&mut catalog);
        catalog
    }

    pub fn register_perception<F, A>(&mut self, path: &str, factory: F) -> Result<(), RegistrationError>
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: PerceptionAdapter + 'static,
    {
        let factory: PerceptionFactory = Arc::new(move || -> Box<dyn PerceptionAdapter> { Box::new(factory()) });
        self.insert(path, CatalogSymbol::Perception(factory))
    }

    pub fn register_action<F, A>(&mut self, path: &str, factory: F) -> Result<(), RegistrationError>
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: ActionAdapter + 'static,
    {
        let factory: ActionFactory = Arc::new(move || -> Box<dyn ActionAdapter> { Box::new(factory()) });
        self.insert(path, CatalogSymbol::Action(factory))
    }

    fn insert(&mut self, path: &str, symbol: CatalogSymbol) -> Result<(), RegistrationError> {
        let (module, name) = split_path(path)?;
        let previous = self
            .modules
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), symbol);
        if previous.is_some() {
            tracing::warn!(path, "Catalog symbol re-registered, previous factory replaced");
        }
        Ok(())
    }

    pub fn resolve_perception(&self, path: &str) -> Result<PerceptionFactory, RegistrationError> {
        match self.lookup(path)? {
            CatalogSymbol::Perception(factory) => Ok(Arc::clone(factory)),
            other => Err(mismatch(path, CapabilityKind::Perception, other.kind())),
        }
    }

    pub fn resolve_action(&self, path: &str) -> Result<ActionFactory, RegistrationError> {
        match self.lookup(path)? {
            CatalogSymbol::Action(factory) => Ok(Arc::clone(factory)),
            other => Err(mismatch(path, CapabilityKind::Action, other.kind())),
        }
    }

    fn lookup(&self, path: &str) -> Result<&CatalogSymbol, RegistrationError> {
        let (module, name) = split_path(path)?;
        let symbols = self
            .modules
            .get(module)
            .ok_or_else(|| RegistrationError::SourceNotFound {
                path: path.to_string(),
                module: module.to_string(),
            })?;
        symbols
            .get(name)
            .ok_or_else(|| RegistrationError::SymbolNotFound {
                path: path.to_string(),
                symbol: name.to_string(),
            })
    }

    /// 已登记的全部路径（排序后），用于诊断输出
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .modules
            .iter()
            .flat_map(|(module, symbols)| symbols.keys().map(move |s| format!("{module}:{s}")))
            .collect();
        paths.sort();
        paths
    }
}

fn mismatch(path: &str, expected: CapabilityKind, found: CapabilityKind) -> RegistrationError {
    RegistrationError::InterfaceMismatch {
        path: path.to_string(),
        expected,
        found,
    }
}

fn split_path(path: &str) -> Result<(&str, &str), RegistrationError> {
    match path.rsplit_once(':') {
        Some((module, name)) if !module.is_empty() && !name.is_empty() && !module.ends_with(':') => {
            Ok((module, name))
        }
        _ => Err(RegistrationError::MalformedPath(path.to_string())),
    }
}
