//! Filter configuration - opaque scoring rules / 过滤器配置
//!
//! The rule language itself is interpreted by the engine. The core only needs the
//! filter name, rule counts for logging, and one label per scoring clause.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One scoring/matching rule, kept opaque / 过滤子句
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FilterClause {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Stable clause identifier: explicit label, else `type_value` / 子句标签
    pub fn display_label(&self) -> String {
        if let Some(label) = self.label.as_deref().filter(|l| !l.trim().is_empty()) {
            return label.trim().to_string();
        }
        match self.value.as_deref() {
            Some(value) if !value.is_empty() => format!("{}_{}", self.kind, value),
            _ => self.kind.clone(),
        }
    }
}

/// Search filter definition / 搜索过滤器定义
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub must: Vec<FilterClause>,
    #[serde(default)]
    pub should: Vec<FilterClause>,
    #[serde(default, rename = "mustNot", alias = "must_not")]
    pub must_not: Vec<FilterClause>,
}

impl FilterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_should(mut self, clause: FilterClause) -> Self {
        self.should.push(clause);
        self
    }

    /// One label per scoring (`should`) clause, de-duplicated / 动态分数列标签
    pub fn clause_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::with_capacity(self.should.len());
        for clause in &self.should {
            let base = clause.display_label();
            let mut label = base.clone();
            let mut n = 2;
            while labels.contains(&label) {
                label = format!("{}_{}", base, n);
                n += 1;
            }
            labels.push(label);
        }
        labels
    }

    /// Short description for log lines / 日志摘要
    pub fn summary(&self) -> String {
        format!(
            "'{}' (must: {}, should: {}, must_not: {})",
            self.name,
            self.must.len(),
            self.should.len(),
            self.must_not.len()
        )
    }
}

/// Resolves a filter configuration by path / 配置加载器
pub trait ConfigLoader: Send + Sync {
    fn load_from_path(&self, path: &Path) -> Option<FilterConfig>;
}

/// Loads filters stored as JSON files / JSON 配置加载器
#[derive(Debug, Clone, Default)]
pub struct JsonFilterLoader;

impl ConfigLoader for JsonFilterLoader {
    fn load_from_path(&self, path: &Path) -> Option<FilterConfig> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to read filter {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_str::<FilterConfig>(&content) {
            Ok(mut config) => {
                if config.name.is_empty() {
                    config.name = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string();
                }
                tracing::debug!("Loaded filter {} from {:?}", config.summary(), path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse filter {:?}: {}", path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_labels() {
        let mut labeled = FilterClause::new("joker", "Blueprint");
        labeled.label = Some("bp".to_string());
        let config = FilterConfig::new("test")
            .with_should(FilterClause::new("joker", "Perkeo"))
            .with_should(labeled)
            .with_should(FilterClause::new("joker", "Perkeo"));

        assert_eq!(config.clause_labels(), vec!["joker_Perkeo", "bp", "joker_Perkeo_2"]);
    }

    #[test]
    fn test_json_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perkeo.json");
        std::fs::write(
            &path,
            r#"{"must":[{"type":"voucher","value":"Telescope"}],
                "should":[{"type":"joker","value":"Perkeo","score":10,"antes":[1,2]}]}"#,
        )
        .unwrap();

        let config = JsonFilterLoader.load_from_path(&path).unwrap();
        assert_eq!(config.name, "perkeo");
        assert_eq!(config.must.len(), 1);
        assert_eq!(config.should[0].extra.get("score"), Some(&serde_json::json!(10)));
        assert_eq!(config.clause_labels(), vec!["joker_Perkeo"]);

        std::fs::write(&path, "not json").unwrap();
        assert!(JsonFilterLoader.load_from_path(&path).is_none());
        assert!(JsonFilterLoader.load_from_path(&dir.path().join("missing.json")).is_none());
    }
}
