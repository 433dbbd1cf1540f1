/// 多指纹推理聚合
///
/// 一次请求包含多个时间戳的指纹：逐个对齐、标准化、送入模型，
/// 再把逐指纹输出合成一个结果。
/// - 分类：对概率向量求平均后取最大者（不是对硬标签投票）
/// - 回归：对标量输出求平均
///
/// 每次调用无状态，只读访问模型产物，可以并发调用。

use crate::algorithms::{
    AggregateResult, Fingerprint, FingerprintBuilder, IdentifierUniverse, ModelView,
    NormalizationParams, Observation, PercentageEstimate, ProbabilitySequence, RoomEstimate,
    ScalarSequence, SignalReadings, to_percent,
};
use crate::artifacts::ModelArtifacts;
use crate::error::{ArtifactError, InferenceError};

/// 推理聚合器
pub struct InferenceAggregator;

impl InferenceAggregator {
    /// 对已对齐到 `universe` 的稠密指纹做推理并聚合
    pub fn predict(
        fingerprints: &[Fingerprint],
        model: ModelView<'_>,
        params: &NormalizationParams,
        universe: &IdentifierUniverse,
    ) -> Result<AggregateResult, InferenceError> {
        if fingerprints.is_empty() {
            return Err(InferenceError::EmptyBatch);
        }
        if let Some(bad) = fingerprints.iter().find(|f| f.len() != universe.len()) {
            return Err(InferenceError::DimensionMismatch {
                expected: universe.len(),
                actual: bad.len(),
            });
        }

        match model {
            ModelView::Classifier { classes, model } => {
                let outputs: ProbabilitySequence = fingerprints
                    .iter()
                    .map(|f| params.transform(&f.values).map(|x| model.predict_proba(&x)))
                    .collect::<Result<_, _>>()?;
                let mean = outputs.mean().ok_or(InferenceError::EmptyBatch)?;
                let estimate = RoomEstimate::from_mean(classes, &mean, outputs.len()).ok_or(
                    InferenceError::DimensionMismatch {
                        expected: classes.len(),
                        actual: mean.len(),
                    },
                )?;
                tracing::debug!(
                    samples = estimate.samples,
                    room = %estimate.room_id,
                    percentage = estimate.percentage,
                    "分类聚合完成"
                );
                Ok(AggregateResult::Room(estimate))
            }
            ModelView::Regressor(model) => {
                let outputs: ScalarSequence = fingerprints
                    .iter()
                    .map(|f| params.transform(&f.values).map(|x| model.predict(&x)))
                    .collect::<Result<_, _>>()?;
                let mean = outputs.mean().ok_or(InferenceError::EmptyBatch)?;
                let estimate = PercentageEstimate::from_mean(mean, outputs.len());
                tracing::debug!(
                    samples = estimate.samples,
                    percentage = estimate.percentage,
                    "回归聚合完成"
                );
                Ok(AggregateResult::Percentage(estimate))
            }
        }
    }

    /// 从另一个全集下的稠密指纹重新投影后推理
    pub fn predict_reprojected(
        fingerprints: &[Fingerprint],
        source: &IdentifierUniverse,
        model: ModelView<'_>,
        params: &NormalizationParams,
        universe: &IdentifierUniverse,
    ) -> Result<AggregateResult, InferenceError> {
        let aligned: Vec<Fingerprint> = fingerprints
            .iter()
            .map(|f| f.reproject(source, universe))
            .collect();
        Self::predict(&aligned, model, params, universe)
    }

    /// 从稀疏指纹投影后推理
    pub fn predict_readings(
        readings: &[SignalReadings],
        model: ModelView<'_>,
        params: &NormalizationParams,
        universe: &IdentifierUniverse,
    ) -> Result<AggregateResult, InferenceError> {
        let aligned: Vec<Fingerprint> = readings.iter().map(|r| r.project(universe)).collect();
        Self::predict(&aligned, model, params, universe)
    }

    /// 指定正例类别的平均概率百分比
    pub fn positive_class_percentage(
        fingerprints: &[Fingerprint],
        positive_class: &str,
        model: ModelView<'_>,
        params: &NormalizationParams,
        universe: &IdentifierUniverse,
    ) -> Result<u32, InferenceError> {
        if let ModelView::Classifier { classes, .. } = model {
            if !classes.iter().any(|c| c == positive_class) {
                return Err(InferenceError::UnknownClass(positive_class.to_string()));
            }
        }
        match Self::predict(fingerprints, model, params, universe)? {
            AggregateResult::Room(estimate) => estimate
                .probability_of(positive_class)
                .map(|p| to_percent(p * 100.0))
                .ok_or_else(|| InferenceError::UnknownClass(positive_class.to_string())),
            AggregateResult::Percentage(_) => Err(InferenceError::WrongModelKind {
                expected: "classifier",
                actual: "regressor",
            }),
        }
    }
}

/// 载入后的模型，供服务进程只读共享
#[derive(Debug)]
pub struct LoadedModel {
    artifacts: ModelArtifacts,
}

impl LoadedModel {
    /// 校验产物后创建
    pub fn new(artifacts: ModelArtifacts) -> Result<Self, ArtifactError> {
        artifacts
            .validate()
            .map_err(|reason| ArtifactError::corrupt("<memory>", reason))?;
        Ok(LoadedModel { artifacts })
    }

    pub fn artifacts(&self) -> &ModelArtifacts {
        &self.artifacts
    }

    pub fn universe(&self) -> &IdentifierUniverse {
        &self.artifacts.universe
    }

    pub fn view(&self) -> ModelView<'_> {
        self.artifacts.model.view()
    }

    /// 原始观测 → 指纹 → 聚合结果
    pub fn predict_observations(
        &self,
        observations: &[Observation],
    ) -> Result<AggregateResult, InferenceError> {
        let fingerprints = FingerprintBuilder::build(observations, &self.artifacts.universe);
        self.predict_fingerprints(&fingerprints)
    }

    pub fn predict_fingerprints(
        &self,
        fingerprints: &[Fingerprint],
    ) -> Result<AggregateResult, InferenceError> {
        InferenceAggregator::predict(
            fingerprints,
            self.view(),
            &self.artifacts.normalization,
            &self.artifacts.universe,
        )
    }

    pub fn predict_readings(
        &self,
        readings: &[SignalReadings],
    ) -> Result<AggregateResult, InferenceError> {
        InferenceAggregator::predict_readings(
            readings,
            self.view(),
            &self.artifacts.normalization,
            &self.artifacts.universe,
        )
    }

    /// 原始观测中正例类别的概率百分比
    pub fn positive_class_percentage(
        &self,
        observations: &[Observation],
        positive_class: &str,
    ) -> Result<u32, InferenceError> {
        let fingerprints = FingerprintBuilder::build(observations, &self.artifacts.universe);
        InferenceAggregator::positive_class_percentage(
            &fingerprints,
            positive_class,
            self.view(),
            &self.artifacts.normalization,
            &self.artifacts.universe,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{
        Classifier, ClassifierModel, Regressor, SoftmaxRegression, TrainedModel,
    };
    use crate::artifacts::{ArtifactManifest, FORMAT_VERSION};
    use crate::config::TaskKind;
    use chrono::Utc;

    /// 按第一维取值返回固定概率
    struct TableClassifier;

    impl Classifier for TableClassifier {
        fn n_classes(&self) -> usize {
            2
        }

        fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
            if x[0] > -80.0 {
                vec![0.9, 0.1]
            } else {
                vec![0.5, 0.5]
            }
        }
    }

    struct EchoRegressor;

    impl Regressor for EchoRegressor {
        fn predict(&self, x: &[f64]) -> f64 {
            x[0]
        }
    }

    fn universe() -> IdentifierUniverse {
        IdentifierUniverse::from_identifiers(vec!["A".into(), "B".into()]).unwrap()
    }

    fn classes() -> Vec<String> {
        vec!["room1".to_string(), "room2".to_string()]
    }

    fn fp(values: Vec<f64>) -> Fingerprint {
        Fingerprint {
            timestamp: 0,
            label: None,
            values,
        }
    }

    #[test]
    fn test_mean_of_probabilities() {
        let classes = classes();
        let view = ModelView::Classifier {
            classes: &classes,
            model: &TableClassifier,
        };
        let result = InferenceAggregator::predict(
            &[fp(vec![-60.0, -100.0]), fp(vec![-95.0, -100.0])],
            view,
            &NormalizationParams::identity(2),
            &universe(),
        )
        .unwrap();
        assert_eq!(result.room_id(), Some("room1"));
        assert_eq!(result.percentage(), 70);
    }

    #[test]
    fn test_empty_batch_is_error() {
        let view = ModelView::Regressor(&EchoRegressor);
        let result =
            InferenceAggregator::predict(&[], view, &NormalizationParams::identity(2), &universe());
        assert_eq!(result, Err(InferenceError::EmptyBatch));
    }

    #[test]
    fn test_regression_rounds_half_to_even() {
        let view = ModelView::Regressor(&EchoRegressor);
        let params = NormalizationParams::identity(2);
        let result = InferenceAggregator::predict(
            &[fp(vec![60.0, 0.0]), fp(vec![65.0, 0.0])],
            view,
            &params,
            &universe(),
        )
        .unwrap();
        assert_eq!(result.percentage(), 62);

        let result =
            InferenceAggregator::predict(&[fp(vec![63.5, 0.0])], view, &params, &universe())
                .unwrap();
        assert_eq!(result.percentage(), 64);
    }

    #[test]
    fn test_positive_class() {
        let classes = classes();
        let view = ModelView::Classifier {
            classes: &classes,
            model: &TableClassifier,
        };
        let params = NormalizationParams::identity(2);
        let batch = [fp(vec![-60.0, -100.0])];
        assert_eq!(
            InferenceAggregator::positive_class_percentage(&batch, "room2", view, &params, &universe()),
            Ok(10)
        );
        assert_eq!(
            InferenceAggregator::positive_class_percentage(&batch, "room9", view, &params, &universe()),
            Err(InferenceError::UnknownClass("room9".to_string()))
        );

        let regressor = ModelView::Regressor(&EchoRegressor);
        assert!(matches!(
            InferenceAggregator::positive_class_percentage(&batch, "room1", regressor, &params, &universe()),
            Err(InferenceError::WrongModelKind { .. })
        ));
    }

    #[test]
    fn test_unaligned_fingerprint_rejected() {
        let view = ModelView::Regressor(&EchoRegressor);
        let result = InferenceAggregator::predict(
            &[fp(vec![1.0])],
            view,
            &NormalizationParams::identity(2),
            &universe(),
        );
        assert!(matches!(result, Err(InferenceError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_reprojected_from_wider_universe() {
        let wide =
            IdentifierUniverse::from_identifiers(vec!["Z".into(), "A".into(), "B".into()]).unwrap();
        let view = ModelView::Regressor(&EchoRegressor);
        let result = InferenceAggregator::predict_reprojected(
            &[fp(vec![-30.0, -70.0, -80.0])],
            &wide,
            view,
            &NormalizationParams::identity(2),
            &universe(),
        )
        .unwrap();
        assert_eq!(result.percentage(), 0);
        match result {
            AggregateResult::Percentage(p) => assert_eq!(p.raw_mean, -70.0),
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_predict_readings_projects_sparse_sets() {
        let classes = classes();
        let view = ModelView::Classifier {
            classes: &classes,
            model: &TableClassifier,
        };
        let readings = vec![
            SignalReadings::from_pairs(1, vec![("A", -60), ("Z", -20)]),
            SignalReadings::from_pairs(2, vec![("B", -50)]),
        ];
        let result = InferenceAggregator::predict_readings(
            &readings,
            view,
            &NormalizationParams::identity(2),
            &universe(),
        )
        .unwrap();
        assert_eq!(result.room_id(), Some("room1"));
        assert_eq!(result.percentage(), 70);
        assert_eq!(result.samples(), 2);
    }

    /// room1 = 0.9 的固定模型
    fn loaded_model() -> LoadedModel {
        let artifacts = ModelArtifacts {
            manifest: ArtifactManifest {
                format_version: FORMAT_VERSION,
                task: TaskKind::Classification,
                created_at: Utc::now(),
                sample_count: 0,
                classes: Some(classes()),
                selected: "fixed".to_string(),
                held_out: None,
            },
            universe: universe(),
            normalization: NormalizationParams::identity(2),
            model: TrainedModel::Classifier {
                classes: classes(),
                model: ClassifierModel::Logistic(
                    SoftmaxRegression::from_parts(vec![vec![0.0, 0.0]; 2], vec![9f64.ln(), 0.0])
                        .unwrap(),
                ),
            },
        };
        LoadedModel::new(artifacts).unwrap()
    }

    #[test]
    fn test_loaded_model_readings_match_observations() {
        let model = loaded_model();
        let observations = vec![
            Observation::new(1, "A", -60),
            Observation::new(2, "B", -70),
        ];
        let readings = vec![
            SignalReadings::from_pairs(1, vec![("A", -60)]),
            SignalReadings::from_pairs(2, vec![("B", -70)]),
        ];

        let from_readings = model.predict_readings(&readings).unwrap();
        let from_observations = model.predict_observations(&observations).unwrap();
        assert_eq!(from_readings.room_id(), Some("room1"));
        assert_eq!(from_readings.percentage(), 90);
        assert_eq!(from_readings.percentage(), from_observations.percentage());
        assert_eq!(from_readings.samples(), from_observations.samples());

        assert_eq!(model.predict_readings(&[]), Err(InferenceError::EmptyBatch));
    }
}
