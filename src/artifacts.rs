/// 模型产物
///
/// 标识符全集、标准化参数、训练好的模型三者作为一个整体保存，
/// 附带清单（格式版本、任务类型、创建时间等）。
/// 写出时先写同目录临时文件再原子重命名，读取方永远看不到写了一半的文件。

use crate::algorithms::{
    Classifier, EvaluationReport, IdentifierUniverse, NormalizationParams, TrainedModel,
};
use crate::config::TaskKind;
use crate::error::ArtifactError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// 当前产物格式版本
pub const FORMAT_VERSION: u32 = 1;

/// 产物清单
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format_version: u32,
    pub task: TaskKind,
    pub created_at: DateTime<Utc>,
    /// 参与训练的指纹数（训练集 + 留出集）
    pub sample_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    /// 选中的候选配置
    pub selected: String,
    /// 留出集评估
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_out: Option<EvaluationReport>,
}

/// 完整的模型产物
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifacts {
    pub manifest: ArtifactManifest,
    pub universe: IdentifierUniverse,
    pub normalization: NormalizationParams,
    pub model: TrainedModel,
}

impl ModelArtifacts {
    /// 检查三部分是否相互一致
    pub fn validate(&self) -> Result<(), String> {
        if self.manifest.format_version != FORMAT_VERSION {
            return Err(format!(
                "不支持的格式版本 {}（当前 {}）",
                self.manifest.format_version, FORMAT_VERSION
            ));
        }
        if self.universe.is_empty() {
            return Err("标识符全集为空".to_string());
        }
        self.normalization.validate()?;
        self.model.validate()?;

        let dim = self.universe.len();
        if self.normalization.dim() != dim {
            return Err(format!(
                "标准化参数维度 {} 与标识符全集 {} 不一致",
                self.normalization.dim(),
                dim
            ));
        }
        if self.model.input_dim() != dim {
            return Err(format!(
                "模型输入维度 {} 与标识符全集 {} 不一致",
                self.model.input_dim(),
                dim
            ));
        }

        match (&self.model, self.manifest.task) {
            (TrainedModel::Classifier { classes, model }, TaskKind::Classification) => {
                if classes.len() != model.n_classes() {
                    return Err(format!(
                        "类别数 {} 与模型输出 {} 不一致",
                        classes.len(),
                        model.n_classes()
                    ));
                }
                if self.manifest.classes.as_ref().is_some_and(|c| c != classes) {
                    return Err("清单中的类别与模型不一致".to_string());
                }
            }
            (TrainedModel::Regressor { .. }, TaskKind::Regression) => {}
            (model, task) => {
                return Err(format!("任务类型 {} 与模型 {} 不匹配", task, model.kind_name()));
            }
        }
        Ok(())
    }
}

/// 产物存储接口
pub trait ArtifactStore {
    /// 保存；完成前不影响已有产物
    fn save(&self, artifacts: &ModelArtifacts) -> Result<(), ArtifactError>;

    /// 读取并校验
    fn load(&self) -> Result<ModelArtifacts, ArtifactError>;
}

/// 单个 JSON 文件的产物存储
#[derive(Clone, Debug)]
pub struct JsonArtifactStore {
    path: PathBuf,
}

impl JsonArtifactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonArtifactStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ArtifactError {
        ArtifactError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ArtifactStore for JsonArtifactStore {
    fn save(&self, artifacts: &ModelArtifacts) -> Result<(), ArtifactError> {
        artifacts
            .validate()
            .map_err(|reason| ArtifactError::corrupt(&self.path, reason))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        // 临时文件与目标同目录，保证重命名是原子的
        let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, artifacts).map_err(|source| {
                ArtifactError::Parse {
                    path: self.path.clone(),
                    source,
                }
            })?;
            writer.flush().map_err(|e| self.io_error(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        tracing::info!(
            path = %self.path.display(),
            task = %artifacts.manifest.task,
            features = artifacts.universe.len(),
            "模型产物已写出"
        );
        Ok(())
    }

    fn load(&self) -> Result<ModelArtifacts, ArtifactError> {
        if !self.path.exists() {
            return Err(ArtifactError::Missing(self.path.clone()));
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let artifacts: ModelArtifacts =
            serde_json::from_str(&contents).map_err(|source| ArtifactError::Parse {
                path: self.path.clone(),
                source,
            })?;
        artifacts
            .validate()
            .map_err(|reason| ArtifactError::corrupt(&self.path, reason))?;

        tracing::info!(
            path = %self.path.display(),
            task = %artifacts.manifest.task,
            created_at = %artifacts.manifest.created_at,
            "模型产物已载入"
        );
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{ClassifierModel, SoftmaxRegression};

    fn sample() -> ModelArtifacts {
        let classes = vec!["room1".to_string(), "room2".to_string()];
        ModelArtifacts {
            manifest: ArtifactManifest {
                format_version: FORMAT_VERSION,
                task: TaskKind::Classification,
                created_at: Utc::now(),
                sample_count: 2,
                classes: Some(classes.clone()),
                selected: "logistic(C=1)".to_string(),
                held_out: None,
            },
            universe: IdentifierUniverse::from_identifiers(vec!["A".into(), "B".into()]).unwrap(),
            normalization: NormalizationParams::identity(2),
            model: TrainedModel::Classifier {
                classes,
                model: ClassifierModel::Logistic(
                    SoftmaxRegression::from_parts(vec![vec![0.0, 0.0]; 2], vec![0.0, 0.0]).unwrap(),
                ),
            },
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonArtifactStore::new(dir.path().join("nested/model.json"));
        let artifacts = sample();
        store.save(&artifacts).unwrap();
        assert_eq!(store.load().unwrap(), artifacts);

        // 目录中只剩目标文件
        let names: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_missing_artifact() {
        let store = JsonArtifactStore::new("/nonexistent/model.json");
        assert!(matches!(store.load(), Err(ArtifactError::Missing(_))));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut artifacts = sample();
        artifacts.normalization = NormalizationParams::identity(3);
        assert!(artifacts.validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, serde_json::to_string(&artifacts).unwrap()).unwrap();
        let err = JsonArtifactStore::new(&path).load().unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    /// 把 `model.model` 换成给定 JSON 后写盘再载入
    fn load_with_model(model: serde_json::Value) -> Result<ModelArtifacts, ArtifactError> {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["model"]["model"] = model;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, json.to_string()).unwrap();
        JsonArtifactStore::new(&path).load()
    }

    #[test]
    fn test_corrupt_model_parameters_rejected() {
        let corrupt = [
            // 标签越界
            serde_json::json!({
                "algorithm": "knn", "k": 1, "weighted": false, "n_classes": 2,
                "x": [[0.0, 0.0]], "y": [5]
            }),
            // k = 0
            serde_json::json!({
                "algorithm": "knn", "k": 0, "weighted": false, "n_classes": 2,
                "x": [[0.0, 0.0]], "y": [1]
            }),
            // k 大于样本数
            serde_json::json!({
                "algorithm": "knn", "k": 3, "weighted": false, "n_classes": 2,
                "x": [[0.0, 0.0], [1.0, 1.0]], "y": [0, 1]
            }),
            // 样本行长度不一致
            serde_json::json!({
                "algorithm": "knn", "k": 1, "weighted": true, "n_classes": 2,
                "x": [[0.0, 0.0], [1.0]], "y": [0, 1]
            }),
            // 权重行长度不一致
            serde_json::json!({
                "algorithm": "logistic", "weights": [[0.0, 0.0], [0.0]], "bias": [0.0, 0.0]
            }),
        ];
        for model in corrupt {
            let result = load_with_model(model.clone());
            assert!(
                matches!(result, Err(ArtifactError::Corrupt { .. })),
                "{} -> {:?}",
                model,
                result
            );
        }

        let valid = serde_json::json!({
            "algorithm": "knn", "k": 1, "weighted": false, "n_classes": 2,
            "x": [[0.0, 0.0], [1.0, 1.0]], "y": [0, 1]
        });
        assert!(load_with_model(valid).is_ok());
    }

    #[test]
    fn test_non_finite_weights_rejected() {
        let mut artifacts = sample();
        artifacts.model = TrainedModel::Classifier {
            classes: vec!["room1".to_string(), "room2".to_string()],
            model: ClassifierModel::Logistic(
                SoftmaxRegression::from_parts(
                    vec![vec![f64::INFINITY, 0.0], vec![0.0, 0.0]],
                    vec![0.0, 0.0],
                )
                .unwrap(),
            ),
        };
        assert!(artifacts.validate().unwrap_err().contains("非有限"));
        assert!(crate::inference::LoadedModel::new(artifacts).is_err());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut artifacts = sample();
        artifacts.manifest.format_version = 99;
        assert!(artifacts.validate().unwrap_err().contains("99"));
    }

    #[test]
    fn test_garbage_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonArtifactStore::new(&path).load(),
            Err(ArtifactError::Parse { .. })
        ));
    }
}
