/// 特征标准化
///
/// 训练时按列拟合均值与标准差，推理时以同一组参数做仿射变换

use crate::error::{InferenceError, TrainError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 标准差低于该值的列视为零方差，缩放系数取 1
const MIN_SCALE: f64 = 1e-12;

/// 标准化参数（每列的均值与缩放系数）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    /// 每列均值
    pub mean: Vec<f64>,
    /// 每列缩放系数（总体标准差，零方差列为 1）
    pub scale: Vec<f64>,
}

impl NormalizationParams {
    /// 恒等变换参数
    pub fn identity(dim: usize) -> Self {
        NormalizationParams {
            mean: vec![0.0; dim],
            scale: vec![1.0; dim],
        }
    }

    /// 特征维度
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// 对单个指纹做变换: (x - mean) / scale
    pub fn transform(&self, values: &[f64]) -> Result<Vec<f64>, InferenceError> {
        if values.len() != self.mean.len() {
            return Err(InferenceError::DimensionMismatch {
                expected: self.mean.len(),
                actual: values.len(),
            });
        }
        Ok(values
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(x, (m, s))| (x - m) / s)
            .collect())
    }

    /// 对整个矩阵做变换
    pub fn transform_matrix(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, InferenceError> {
        rows.iter().map(|row| self.transform(row)).collect()
    }

    /// 验证参数的合理性
    pub fn validate(&self) -> Result<(), String> {
        if self.mean.len() != self.scale.len() {
            return Err(format!(
                "均值与缩放系数长度不一致：{} vs {}",
                self.mean.len(),
                self.scale.len()
            ));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err("均值包含非有限值".to_string());
        }
        if self.scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err("缩放系数必须为正的有限值".to_string());
        }
        Ok(())
    }

    /// 获取参数描述
    pub fn description(&self) -> String {
        let constant = self.scale.iter().filter(|&&s| s == 1.0).count();
        format!("标准化参数 - 维度 {}, 缩放系数为 1 的列 {}", self.dim(), constant)
    }
}

impl fmt::Display for NormalizationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// 标准化器
pub struct Normalizer;

impl Normalizer {
    /// 按列拟合均值与总体标准差
    pub fn fit(rows: &[Vec<f64>]) -> Result<NormalizationParams, TrainError> {
        let first = rows
            .first()
            .ok_or_else(|| TrainError::NoData("标准化拟合需要至少一行数据".to_string()))?;
        let dim = first.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(TrainError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut scale = vec![0.0; dim];
        for row in rows {
            for ((s, x), m) in scale.iter_mut().zip(row).zip(&mean) {
                let diff = x - m;
                *s += diff * diff;
            }
        }
        for s in &mut scale {
            let std = (*s / n).sqrt();
            *s = if std > MIN_SCALE { std } else { 1.0 };
        }

        Ok(NormalizationParams { mean, scale })
    }
}
