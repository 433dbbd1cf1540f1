/// 训练与服务配置
///
/// JSON 配置文件，所有字段都有默认值；加载后必须调用 `validate()`。

use crate::algorithms::{ClassifierSpec, RegressorSpec};
use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// 覆盖语料根目录的环境变量
pub const FINGERPRINT_DIR_ENV: &str = "FINGERPRINT_DIR";

/// 任务类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// 房间分类
    Classification,
    /// 适合度百分比回归
    Regression,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Classification => write!(f, "classification"),
            TaskKind::Regression => write!(f, "regression"),
        }
    }
}

/// 默认分类候选：逻辑回归 C 网格 + kNN
pub fn default_classifier_grid() -> Vec<ClassifierSpec> {
    let mut grid: Vec<ClassifierSpec> = [0.01, 0.1, 1.0, 10.0, 100.0]
        .into_iter()
        .map(|c| ClassifierSpec::Logistic { c })
        .collect();
    grid.extend([1, 3, 5].into_iter().map(|k| ClassifierSpec::Knn { k, weighted: false }));
    grid
}

/// 默认回归候选：岭回归 alpha 网格 + kNN
pub fn default_regressor_grid() -> Vec<RegressorSpec> {
    let mut grid: Vec<RegressorSpec> = [0.1, 1.0, 10.0]
        .into_iter()
        .map(|alpha| RegressorSpec::Ridge { alpha })
        .collect();
    grid.extend([1, 3, 5].into_iter().map(|k| RegressorSpec::Knn { k }));
    grid
}

// ============================================================================
// 训练配置
// ============================================================================

/// 训练配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// 语料根目录（每个子目录是一个标签）
    pub corpus_root: PathBuf,
    /// 模型产物输出路径
    pub output_path: PathBuf,
    pub task: TaskKind,
    /// 只装载这些标签目录；为空时装载全部
    pub labels: Option<Vec<String>>,
    /// 记录文件名过滤正则
    pub file_pattern: String,
    /// 留出集比例
    pub test_ratio: f64,
    /// 网格搜索内部验证集比例
    pub validation_ratio: f64,
    pub seed: u64,
    /// 是否进行网格搜索；关闭时使用候选列表中的第一个
    pub model_selection: bool,
    pub classifier_grid: Vec<ClassifierSpec>,
    pub regressor_grid: Vec<RegressorSpec>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            corpus_root: PathBuf::from("fingerprints"),
            output_path: PathBuf::from("artifacts/model.json"),
            task: TaskKind::Classification,
            labels: None,
            file_pattern: r"\.csv$".to_string(),
            test_ratio: 0.2,
            validation_ratio: 0.2,
            seed: 42,
            model_selection: true,
            classifier_grid: default_classifier_grid(),
            regressor_grid: default_regressor_grid(),
        }
    }
}

impl TrainerConfig {
    /// 从 JSON 文件加载
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 写出为 JSON 文件
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 应用环境变量覆盖（`FINGERPRINT_DIR`）
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// 从给定的查找函数应用覆盖；空值忽略
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(FINGERPRINT_DIR_ENV) {
            if !dir.trim().is_empty() {
                tracing::debug!(dir = %dir, "语料根目录由环境变量覆盖");
                self.corpus_root = PathBuf::from(dir);
            }
        }
        self
    }

    /// 编译文件过滤正则
    pub fn file_filter(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.file_pattern)
            .map_err(|e| ConfigError::invalid_value("file_pattern", e.to_string()))
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(ConfigError::invalid_value(
                "test_ratio",
                format!("必须在 (0, 1) 内，实际 {}", self.test_ratio),
            ));
        }
        if !(self.validation_ratio > 0.0 && self.validation_ratio < 1.0) {
            return Err(ConfigError::invalid_value(
                "validation_ratio",
                format!("必须在 (0, 1) 内，实际 {}", self.validation_ratio),
            ));
        }
        if let Some(labels) = &self.labels {
            if labels.is_empty() {
                return Err(ConfigError::invalid_value("labels", "白名单不能为空列表"));
            }
        }
        self.file_filter()?;

        match self.task {
            TaskKind::Classification => {
                if self.classifier_grid.is_empty() {
                    return Err(ConfigError::invalid_value("classifier_grid", "候选列表为空"));
                }
                for spec in &self.classifier_grid {
                    match *spec {
                        ClassifierSpec::Logistic { c } if !(c > 0.0 && c.is_finite()) => {
                            return Err(ConfigError::invalid_value(
                                "classifier_grid",
                                format!("C 必须为正：{}", c),
                            ));
                        }
                        ClassifierSpec::Knn { k: 0, .. } => {
                            return Err(ConfigError::invalid_value("classifier_grid", "k 必须 > 0"));
                        }
                        _ => {}
                    }
                }
            }
            TaskKind::Regression => {
                if self.regressor_grid.is_empty() {
                    return Err(ConfigError::invalid_value("regressor_grid", "候选列表为空"));
                }
                for spec in &self.regressor_grid {
                    match *spec {
                        RegressorSpec::Ridge { alpha } if !(alpha >= 0.0 && alpha.is_finite()) => {
                            return Err(ConfigError::invalid_value(
                                "regressor_grid",
                                format!("alpha 必须非负：{}", alpha),
                            ));
                        }
                        RegressorSpec::Knn { k: 0 } => {
                            return Err(ConfigError::invalid_value("regressor_grid", "k 必须 > 0"));
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// 服务配置
// ============================================================================

/// 推理服务配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// 模型产物路径
    pub artifact_path: PathBuf,
    /// 设置后报告该类别的概率，而不是最可能的房间
    pub positive_class: Option<String>,
    /// 判定阈值（0.0 ~ 1.0），低于该值的结果标为不明
    pub confidence_threshold: f64,
}

impl Default for ServingConfig {
    fn default() -> Self {
        ServingConfig {
            artifact_path: PathBuf::from("artifacts/model.json"),
            positive_class: None,
            confidence_threshold: 0.8,
        }
    }
}

impl ServingConfig {
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::invalid_value(
                "confidence_threshold",
                format!("必须在 [0, 1] 内，实际 {}", self.confidence_threshold),
            ));
        }
        if self.positive_class.as_deref().is_some_and(|c| c.is_empty()) {
            return Err(ConfigError::invalid_value("positive_class", "不能为空字符串"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainerConfig::default().validate().is_ok());
        assert!(ServingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_grids() {
        assert_eq!(default_classifier_grid().len(), 8);
        assert_eq!(default_regressor_grid()[0], RegressorSpec::Ridge { alpha: 0.1 });
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: TrainerConfig =
            serde_json::from_str(r#"{"task": "regression", "labels": ["0", "50"]}"#).unwrap();
        assert_eq!(cfg.task, TaskKind::Regression);
        assert_eq!(cfg.seed, 42);
        assert_eq!(cfg.labels, Some(vec!["0".to_string(), "50".to_string()]));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let cfg = TrainerConfig::default()
            .with_overrides_from(|key| (key == FINGERPRINT_DIR_ENV).then(|| "/data/fp".to_string()));
        assert_eq!(cfg.corpus_root, PathBuf::from("/data/fp"));

        // 空值不覆盖
        let cfg = TrainerConfig::default().with_overrides_from(|_| Some("  ".to_string()));
        assert_eq!(cfg.corpus_root, PathBuf::from("fingerprints"));

        let cfg = TrainerConfig::default().with_overrides_from(|_| None);
        assert_eq!(cfg.corpus_root, PathBuf::from("fingerprints"));
    }

    #[test]
    fn test_env_override_fingerprint_dir() {
        let previous = std::env::var(FINGERPRINT_DIR_ENV).ok();
        // 只有本测试读写该变量
        unsafe { std::env::set_var(FINGERPRINT_DIR_ENV, "/tmp/bluroom-corpus") };
        let cfg = TrainerConfig::default().with_env_overrides();
        match &previous {
            Some(value) => unsafe { std::env::set_var(FINGERPRINT_DIR_ENV, value) },
            None => unsafe { std::env::remove_var(FINGERPRINT_DIR_ENV) },
        }
        assert_eq!(cfg.corpus_root, PathBuf::from("/tmp/bluroom-corpus"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut cfg = TrainerConfig::default();
        cfg.test_ratio = 1.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue { field: "test_ratio", .. })
        ));

        let mut cfg = TrainerConfig::default();
        cfg.file_pattern = "(".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = TrainerConfig::default();
        cfg.classifier_grid = vec![ClassifierSpec::Knn { k: 0, weighted: true }];
        assert!(cfg.validate().is_err());

        let serving = ServingConfig {
            confidence_threshold: 1.5,
            ..ServingConfig::default()
        };
        assert!(serving.validate().is_err());
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        let mut cfg = TrainerConfig::default();
        cfg.model_selection = false;
        cfg.to_json(&path).unwrap();
        assert_eq!(TrainerConfig::from_json(&path).unwrap(), cfg);
    }
}
