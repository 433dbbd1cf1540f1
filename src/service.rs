/// 推理服务
///
/// - `SharedModel`：进程内共享的只读模型，可原子替换
/// - `EstimationService`：原始记录批次 → 指纹 → 聚合 → 响应

use crate::algorithms::{AggregateResult, Observation};
use crate::artifacts::ArtifactStore;
use crate::config::{ServingConfig, TaskKind};
use crate::corpus::parse_records;
use crate::error::{ArtifactError, InferenceError};
use crate::inference::LoadedModel;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// 共享模型
// ============================================================================

/// 共享模型句柄
///
/// 锁只在克隆/替换 `Arc` 时持有，推理本身不持锁。
/// 替换前已取得的 `Arc` 继续指向旧模型，直到调用方释放。
#[derive(Debug)]
pub struct SharedModel {
    current: RwLock<Arc<LoadedModel>>,
}

impl SharedModel {
    pub fn new(model: LoadedModel) -> Self {
        SharedModel {
            current: RwLock::new(Arc::new(model)),
        }
    }

    /// 从产物存储载入；失败时服务不应启动
    pub fn load<S: ArtifactStore>(store: &S) -> Result<Self, ArtifactError> {
        Ok(Self::new(LoadedModel::new(store.load()?)?))
    }

    /// 当前模型
    pub fn current(&self) -> Arc<LoadedModel> {
        Arc::clone(&self.current.read())
    }

    /// 替换模型，返回旧模型
    pub fn replace(&self, model: LoadedModel) -> Arc<LoadedModel> {
        let next = Arc::new(model);
        std::mem::replace(&mut *self.current.write(), next)
    }

    /// 重新载入产物；失败时保留当前模型
    pub fn reload<S: ArtifactStore>(&self, store: &S) -> Result<(), ArtifactError> {
        let model = LoadedModel::new(store.load()?)?;
        self.replace(model);
        tracing::info!("模型已替换");
        Ok(())
    }
}

// ============================================================================
// 响应
// ============================================================================

/// 推理响应
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EstimateResponse {
    /// 房间分类（或正例类别的概率）
    Room {
        room_id: String,
        percentage_processed: u32,
    },
    /// 适合度百分比
    Percentage { predicted_percentage: u32 },
}

impl From<&AggregateResult> for EstimateResponse {
    fn from(result: &AggregateResult) -> Self {
        match result {
            AggregateResult::Room(r) => EstimateResponse::Room {
                room_id: r.room_id.clone(),
                percentage_processed: r.percentage,
            },
            AggregateResult::Percentage(p) => EstimateResponse::Percentage {
                predicted_percentage: p.percentage,
            },
        }
    }
}

/// 健康检查
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub task: TaskKind,
    pub features: usize,
    pub model_created_at: DateTime<Utc>,
}

// ============================================================================
// 推理服务
// ============================================================================

/// 推理服务
#[derive(Clone, Debug)]
pub struct EstimationService {
    model: Arc<SharedModel>,
    config: ServingConfig,
}

impl EstimationService {
    pub fn new(model: Arc<SharedModel>, config: ServingConfig) -> Self {
        EstimationService { model, config }
    }

    pub fn model(&self) -> &Arc<SharedModel> {
        &self.model
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    /// 解析并按顺序拼接多个原始批次（例如先 BLE 后 Wi-Fi）
    pub fn parse_batches(batches: &[&[u8]]) -> Result<Vec<Observation>, InferenceError> {
        let mut observations = Vec::new();
        for batch in batches {
            observations.extend(parse_records(*batch, None)?);
        }
        Ok(observations)
    }

    /// 对已解析的观测推理
    pub fn estimate_observations(
        &self,
        observations: &[Observation],
    ) -> Result<EstimateResponse, InferenceError> {
        let model = self.model.current();
        if let Some(positive) = &self.config.positive_class {
            let percentage = model.positive_class_percentage(observations, positive)?;
            return Ok(EstimateResponse::Room {
                room_id: positive.clone(),
                percentage_processed: percentage,
            });
        }
        let result = model.predict_observations(observations)?;
        Ok(EstimateResponse::from(&result))
    }

    /// 原始批次 → 响应
    pub fn estimate(&self, batches: &[&[u8]]) -> Result<EstimateResponse, InferenceError> {
        let observations = Self::parse_batches(batches)?;
        let response = self.estimate_observations(&observations);
        match &response {
            Ok(r) => tracing::info!(rows = observations.len(), response = ?r, "推理完成"),
            Err(e) => tracing::warn!(rows = observations.len(), error = %e, "推理失败"),
        }
        response
    }

    /// 健康检查
    pub fn health(&self) -> HealthStatus {
        let model = self.model.current();
        let manifest = &model.artifacts().manifest;
        HealthStatus {
            status: "running".to_string(),
            task: manifest.task,
            features: model.universe().len(),
            model_created_at: manifest.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_json_shape() {
        let room = EstimateResponse::Room {
            room_id: "103".to_string(),
            percentage_processed: 90,
        };
        assert_eq!(
            serde_json::to_string(&room).unwrap(),
            r#"{"room_id":"103","percentage_processed":90}"#
        );
        let pct = EstimateResponse::Percentage {
            predicted_percentage: 62,
        };
        assert_eq!(
            serde_json::to_string(&pct).unwrap(),
            r#"{"predicted_percentage":62}"#
        );
    }

    #[test]
    fn test_parse_batches_keeps_order() {
        let ble: &[u8] = b"1,ble-a,-50\n";
        let wifi: &[u8] = b"1,wifi-a,-70\n";
        let obs = EstimationService::parse_batches(&[ble, wifi]).unwrap();
        assert_eq!(obs[0].identifier, "ble-a");
        assert_eq!(obs[1].identifier, "wifi-a");

        let bad: &[u8] = b"1,x\n";
        assert!(matches!(
            EstimationService::parse_batches(&[ble, bad]),
            Err(InferenceError::Malformed(_))
        ));
    }
}
