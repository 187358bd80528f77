//! 插件来源：为注册表提供候选插件
//!
//! 每个候选是 `(name, declaration)`，declaration 期望是
//! `{ "perception": "module:Symbol", "action": "module:Symbol" }` 形式的映射。
//! 来源只负责读取声明，路径解析与接口检查由 PluginRegistry 完成。

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::registry::RegistrationError;

/// 一个待注册的候选插件
#[derive(Debug, Clone, PartialEq)]
pub struct PluginCandidate {
    pub name: String,
    pub declaration: Value,
}

impl PluginCandidate {
    pub fn new(name: impl Into<String>, declaration: Value) -> Self {
        Self {
            name: name.into(),
            declaration,
        }
    }
}

/// 插件来源 trait：注入到 PluginRegistry，测试中用内存实现替代真实加载机制
pub trait PluginSource: Send + Sync {
    /// 来源名称（用于日志）
    fn name(&self) -> &str;

    /// 枚举候选；整体失败时返回错误，由注册表记录后跳过该来源
    fn candidates(&self) -> Result<Vec<PluginCandidate>, RegistrationError>;
}

/// 内存中的静态来源
#[derive(Debug, Clone, Default)]
pub struct StaticPluginSource {
    label: String,
    candidates: Vec<PluginCandidate>,
}

impl StaticPluginSource {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            candidates: Vec::new(),
        }
    }

    /// 内置适配器（mock_adapter）
    pub fn builtin() -> Self {
        Self::new("builtin").with(super::mock::ADAPTER_NAME, super::mock::declaration())
    }

    pub fn with(mut self, name: impl Into<String>, declaration: Value) -> Self {
        self.candidates.push(PluginCandidate::new(name, declaration));
        self
    }
}

impl PluginSource for StaticPluginSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn candidates(&self) -> Result<Vec<PluginCandidate>, RegistrationError> {
        Ok(self.candidates.clone())
    }
}

/// 从目录中的 `*.toml` 清单读取候选
///
/// ```toml
/// [adapters.notepad]
/// perception = "argus.adapters.notepad:NotepadPerception"
/// action = "argus.adapters.notepad:NotepadAction"
/// ```
///
/// 文件按路径排序读取，同一文件内按声明顺序产出候选。
/// 单个文件解析失败只跳过该文件；目录不存在视为整个来源失败。
#[derive(Debug, Clone)]
pub struct ManifestPluginSource {
    dir: PathBuf,
    label: String,
}

impl ManifestPluginSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let label = format!("manifests:{}", dir.display());
        Self { dir, label }
    }

    fn read_manifest(path: &Path) -> Result<Vec<PluginCandidate>, String> {
        let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let table: toml::Table = toml::from_str(&content).map_err(|e| e.to_string())?;
        let Some(adapters) = table.get("adapters") else {
            return Ok(Vec::new());
        };
        let adapters = adapters
            .as_table()
            .ok_or_else(|| "`adapters` must be a table".to_string())?;
        adapters
            .iter()
            .map(|(name, decl)| {
                serde_json::to_value(decl)
                    .map(|declaration| PluginCandidate::new(name.clone(), declaration))
                    .map_err(|e| e.to_string())
            })
            .collect()
    }
}

impl PluginSource for ManifestPluginSource {
    fn name(&self) -> &str {
        &self.label
    }

    fn candidates(&self) -> Result<Vec<PluginCandidate>, RegistrationError> {
        if !self.dir.is_dir() {
            return Err(RegistrationError::Source(format!(
                "manifest directory {} does not exist",
                self.dir.display()
            )));
        }
        let pattern = self.dir.join("*.toml");
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern).map_err(|e| RegistrationError::Source(e.to_string()))?;

        let mut candidates = Vec::new();
        for path in paths.flatten() {
            match Self::read_manifest(&path) {
                Ok(found) => {
                    tracing::debug!(manifest = %path.display(), count = found.len(), "Read adapter manifest");
                    candidates.extend(found);
                }
                Err(e) => {
                    tracing::warn!(manifest = %path.display(), error = %e, "Skipping unreadable adapter manifest");
                }
            }
        }
        Ok(candidates)
    }
}
