/// 训练流程
///
/// 装载语料 → 构建指纹 → 分层划分 → 在训练集上拟合标准化 →
/// 模型选择 → 留出集评估 → 导出产物。
/// 任何一步失败都不会写出产物。

use crate::algorithms::{
    Classifier, ClassificationReport, ClassifierModel, ClassifierSpec, EvaluationReport,
    FingerprintBuilder, FirstCandidate, GridSearch, ModelSelector, Normalizer, Observation,
    RegressionReport, Regressor, RegressorModel, RegressorSpec, Selection, TrainedModel,
    train_test_split,
};
use crate::artifacts::{ArtifactManifest, ArtifactStore, FORMAT_VERSION, ModelArtifacts};
use crate::config::{TaskKind, TrainerConfig};
use crate::corpus::{CorpusLoader, LabeledCorpus};
use crate::error::{TrainError, TrainResult};
use chrono::Utc;
use std::collections::BTreeMap;

/// 一次训练的结果
#[derive(Clone, Debug)]
pub struct TrainingOutcome {
    pub artifacts: ModelArtifacts,
    pub report: EvaluationReport,
    /// 训练集 / 留出集指纹数
    pub train_samples: usize,
    pub test_samples: usize,
}

/// 训练器
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    /// 校验配置后创建
    pub fn new(config: TrainerConfig) -> TrainResult<Self> {
        config.validate()?;
        Ok(Trainer { config })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// 完整流程：装载、训练、导出
    pub fn run<S: ArtifactStore>(&self, store: &S) -> TrainResult<TrainingOutcome> {
        let corpus = self.load_corpus()?;
        let outcome = self.fit_corpus(&corpus)?;
        store.save(&outcome.artifacts)?;
        Ok(outcome)
    }

    /// 按配置装载语料
    pub fn load_corpus(&self) -> TrainResult<LabeledCorpus> {
        let loader = CorpusLoader::new(&self.config.file_pattern)?
            .with_labels(self.config.labels.clone());
        Ok(loader.load(&self.config.corpus_root)?)
    }

    /// 在已装载的语料上训练
    pub fn fit_corpus(&self, corpus: &LabeledCorpus) -> TrainResult<TrainingOutcome> {
        if corpus.is_empty() {
            return Err(TrainError::NoData(format!(
                "语料目录 `{}` 中没有可用的记录（已装载 {} 个文件，跳过 {} 个）",
                self.config.corpus_root.display(),
                corpus.files_loaded,
                corpus.skipped.len()
            )));
        }
        self.fit_observations(&corpus.observations)
    }

    /// 在带标签的观测上训练
    pub fn fit_observations(&self, observations: &[Observation]) -> TrainResult<TrainingOutcome> {
        if observations.is_empty() {
            return Err(TrainError::NoData("观测为空".to_string()));
        }

        let set = FingerprintBuilder::build_training_set(observations);
        if set.universe.is_empty() {
            return Err(TrainError::EmptyUniverse);
        }

        let labels: Vec<String> = set
            .fingerprints
            .iter()
            .map(|f| {
                f.label
                    .clone()
                    .ok_or_else(|| TrainError::NoData("存在无标签的指纹".to_string()))
            })
            .collect::<TrainResult<_>>()?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for label in &labels {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }

        tracing::info!(
            fingerprints = set.fingerprints.len(),
            features = set.universe.len(),
            labels = counts.len(),
            "指纹构建完成"
        );

        let matrix = set.matrix();
        match self.config.task {
            TaskKind::Classification => self.fit_classifier(set.universe, matrix, labels, counts),
            TaskKind::Regression => self.fit_regressor(set.universe, matrix, labels, counts),
        }
    }

    fn split(
        &self,
        n: usize,
        strata: Option<&[usize]>,
        counts: &BTreeMap<String, usize>,
    ) -> TrainResult<crate::algorithms::Split> {
        train_test_split(n, strata, self.config.test_ratio, self.config.seed).map_err(|e| match e {
            TrainError::InsufficientSamples {
                samples, required, ..
            } => TrainError::InsufficientSamples {
                samples,
                required,
                counts: counts.clone(),
            },
            other => other,
        })
    }

    fn fit_classifier(
        &self,
        universe: crate::algorithms::IdentifierUniverse,
        matrix: Vec<Vec<f64>>,
        labels: Vec<String>,
        counts: BTreeMap<String, usize>,
    ) -> TrainResult<TrainingOutcome> {
        if counts.len() < 2 {
            return Err(TrainError::SingleClass { counts });
        }

        // 类别按字典序排列，argmax 并列时取靠前者
        let classes: Vec<String> = counts.keys().cloned().collect();
        let y: Vec<usize> = labels
            .iter()
            .map(|l| classes.binary_search(l).unwrap_or_default())
            .collect();

        let split = self.split(matrix.len(), Some(&y), &counts)?;
        let params = Normalizer::fit(&gather(&matrix, &split.train))?;
        let x = params
            .transform_matrix(&matrix)
            .map_err(|e| TrainError::fit(e.to_string()))?;

        let n_classes = classes.len();
        let grid = &self.config.classifier_grid;
        let fit = |spec: &ClassifierSpec, idx: &[usize]| {
            spec.fit(&gather(&x, idx), &gather_labels(&y, idx), n_classes)
        };
        let score = |model: &ClassifierModel, idx: &[usize]| {
            let y_pred: Vec<usize> = idx.iter().map(|&i| model.predict(&x[i])).collect();
            selection_score(&classes, &gather_labels(&y, idx), &y_pred)
        };
        let selection: Selection<ClassifierSpec, ClassifierModel> = if self.config.model_selection {
            GridSearch::new(self.config.validation_ratio, self.config.seed)
                .select(grid, &split.train, Some(&y), fit, score)?
        } else {
            FirstCandidate.select(grid, &split.train, Some(&y), fit, score)?
        };

        let y_true = gather_labels(&y, &split.test);
        let y_pred: Vec<usize> = split
            .test
            .iter()
            .map(|&i| selection.model.predict(&x[i]))
            .collect();
        let report = ClassificationReport::compute(&classes, &y_true, &y_pred);
        tracing::info!(
            selected = %selection.candidate,
            accuracy = report.accuracy,
            macro_precision = report.macro_precision,
            macro_recall = report.macro_recall,
            macro_f1 = report.macro_f1,
            "留出集评估完成"
        );
        let report = EvaluationReport::Classification(report);

        let artifacts = ModelArtifacts {
            manifest: ArtifactManifest {
                format_version: FORMAT_VERSION,
                task: TaskKind::Classification,
                created_at: Utc::now(),
                sample_count: matrix.len(),
                classes: Some(classes.clone()),
                selected: selection.candidate.to_string(),
                held_out: Some(report.clone()),
            },
            universe,
            normalization: params,
            model: TrainedModel::Classifier {
                classes,
                model: selection.model,
            },
        };

        Ok(TrainingOutcome {
            artifacts,
            report,
            train_samples: split.train.len(),
            test_samples: split.test.len(),
        })
    }

    fn fit_regressor(
        &self,
        universe: crate::algorithms::IdentifierUniverse,
        matrix: Vec<Vec<f64>>,
        labels: Vec<String>,
        counts: BTreeMap<String, usize>,
    ) -> TrainResult<TrainingOutcome> {
        let targets: Vec<f64> = labels
            .iter()
            .map(|label| parse_percentage(label))
            .collect::<TrainResult<_>>()?;

        let split = self.split(matrix.len(), None, &counts)?;
        let params = Normalizer::fit(&gather(&matrix, &split.train))?;
        let x = params
            .transform_matrix(&matrix)
            .map_err(|e| TrainError::fit(e.to_string()))?;

        let grid = &self.config.regressor_grid;
        let fit = |spec: &RegressorSpec, idx: &[usize]| {
            let ys: Vec<f64> = idx.iter().map(|&i| targets[i]).collect();
            spec.fit(&gather(&x, idx), &ys)
        };
        // 负 MAE，越大越好
        let score = |model: &RegressorModel, idx: &[usize]| {
            let mae = idx
                .iter()
                .map(|&i| (model.predict(&x[i]) - targets[i]).abs())
                .sum::<f64>()
                / idx.len().max(1) as f64;
            -mae
        };
        let selection: Selection<RegressorSpec, RegressorModel> = if self.config.model_selection {
            GridSearch::new(self.config.validation_ratio, self.config.seed)
                .select(grid, &split.train, None, fit, score)?
        } else {
            FirstCandidate.select(grid, &split.train, None, fit, score)?
        };

        let y_true: Vec<f64> = split.test.iter().map(|&i| targets[i]).collect();
        let y_pred: Vec<f64> = split
            .test
            .iter()
            .map(|&i| selection.model.predict(&x[i]))
            .collect();
        let report = RegressionReport::compute(&y_true, &y_pred);
        tracing::info!(
            selected = %selection.candidate,
            mae = report.mae,
            r2 = report.r2,
            "留出集评估完成"
        );
        let report = EvaluationReport::Regression(report);

        let artifacts = ModelArtifacts {
            manifest: ArtifactManifest {
                format_version: FORMAT_VERSION,
                task: TaskKind::Regression,
                created_at: Utc::now(),
                sample_count: matrix.len(),
                classes: None,
                selected: selection.candidate.to_string(),
                held_out: Some(report.clone()),
            },
            universe,
            normalization: params,
            model: TrainedModel::Regressor {
                model: selection.model,
            },
        };

        Ok(TrainingOutcome {
            artifacts,
            report,
            train_samples: split.train.len(),
            test_samples: split.test.len(),
        })
    }
}

/// 分类候选的验证得分：宏平均 F1，类别不均衡时不偏向多数类
fn selection_score(classes: &[String], y_true: &[usize], y_pred: &[usize]) -> f64 {
    ClassificationReport::compute(classes, y_true, y_pred).macro_f1
}

/// 回归标签：目录名解析为 [0, 100] 内的数值
fn parse_percentage(label: &str) -> TrainResult<f64> {
    match label.trim().parse::<f64>() {
        Ok(v) if (0.0..=100.0).contains(&v) => Ok(v),
        _ => Err(TrainError::InvalidTarget {
            label: label.to_string(),
        }),
    }
}

fn gather(rows: &[Vec<f64>], idx: &[usize]) -> Vec<Vec<f64>> {
    idx.iter().map(|&i| rows[i].clone()).collect()
}

fn gather_labels(y: &[usize], idx: &[usize]) -> Vec<usize> {
    idx.iter().map(|&i| y[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_observations() -> Vec<Observation> {
        let mut obs = Vec::new();
        for t in 0..10 {
            obs.push(Observation::labeled(t, "A", -45 - (t % 3) as i16, "101"));
            obs.push(Observation::labeled(t, "B", -90, "101"));
            obs.push(Observation::labeled(t, "A", -88, "102"));
            obs.push(Observation::labeled(t, "B", -50 - (t % 2) as i16, "102"));
        }
        obs
    }

    #[test]
    fn test_selection_score_is_macro_f1() {
        let classes = vec!["101".to_string(), "102".to_string()];
        // 全部预测为多数类：准确率 0.9，但少数类 F1 为 0
        let y_true = [0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let majority = [0; 10];
        let balanced = [0, 0, 0, 0, 0, 0, 0, 0, 1, 1];
        let majority_score = selection_score(&classes, &y_true, &majority);
        assert!(majority_score < 0.5);
        assert!(selection_score(&classes, &y_true, &balanced) > majority_score);
    }

    #[test]
    fn test_parse_percentage() {
        assert_eq!(parse_percentage("75").unwrap(), 75.0);
        assert!(matches!(
            parse_percentage("room1"),
            Err(TrainError::InvalidTarget { .. })
        ));
        assert!(parse_percentage("120").is_err());
    }

    #[test]
    fn test_fit_classifier_end_to_end() {
        let trainer = Trainer::new(TrainerConfig::default()).unwrap();
        let outcome = trainer.fit_observations(&room_observations()).unwrap();
        assert_eq!(outcome.artifacts.universe.identifiers(), &["A", "B"]);
        assert_eq!(outcome.train_samples + outcome.test_samples, 20);
        assert!(outcome.artifacts.validate().is_ok());
        match &outcome.report {
            EvaluationReport::Classification(r) => assert_eq!(r.accuracy, 1.0),
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[test]
    fn test_single_class_reports_counts() {
        let obs: Vec<Observation> = (0..5)
            .map(|t| Observation::labeled(t, "A", -60, "101"))
            .collect();
        let trainer = Trainer::new(TrainerConfig::default()).unwrap();
        match trainer.fit_observations(&obs) {
            Err(TrainError::SingleClass { counts }) => assert_eq!(counts.get("101"), Some(&5)),
            other => panic!("unexpected {:?}", other.map(|o| o.report)),
        }
    }

    #[test]
    fn test_empty_observations() {
        let trainer = Trainer::new(TrainerConfig::default()).unwrap();
        assert!(matches!(
            trainer.fit_observations(&[]),
            Err(TrainError::NoData(_))
        ));
    }

    #[test]
    fn test_regression_rejects_non_numeric_label() {
        let config = TrainerConfig {
            task: TaskKind::Regression,
            ..TrainerConfig::default()
        };
        let trainer = Trainer::new(config).unwrap();
        let result = trainer.fit_observations(&room_observations());
        assert!(matches!(result, Err(TrainError::InvalidTarget { .. })));
    }
}
