/// 推理结果数据结构
///
/// 逐指纹的模型输出序列，以及聚合后的最终结果（房间或百分比）

use crate::algorithms::estimator::argmax;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 小数比例转为整数百分比（四舍六入五成双，限制在 [0, 100]）
pub fn to_percent(value: f64) -> u32 {
    value.clamp(0.0, 100.0).round_ties_even() as u32
}

// ============================================================================
// 逐指纹输出序列
// ============================================================================

/// 概率向量序列（分类模型的逐指纹输出）
#[derive(Clone, Debug, Default)]
pub struct ProbabilitySequence {
    outputs: Vec<Vec<f64>>,
}

impl ProbabilitySequence {
    /// 创建空序列
    pub fn new() -> Self {
        ProbabilitySequence {
            outputs: Vec::new(),
        }
    }

    /// 添加一个概率向量
    pub fn push(&mut self, proba: Vec<f64>) {
        self.outputs.push(proba);
    }

    /// 获取所有输出
    pub fn all(&self) -> &[Vec<f64>] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// 逐类别求平均（软投票）
    pub fn mean(&self) -> Option<Vec<f64>> {
        let first = self.outputs.first()?;
        let count = self.outputs.len() as f64;
        let mut mean = vec![0.0; first.len()];
        for proba in &self.outputs {
            for (m, p) in mean.iter_mut().zip(proba) {
                *m += p;
            }
        }
        for m in &mut mean {
            *m /= count;
        }
        Some(mean)
    }
}

impl FromIterator<Vec<f64>> for ProbabilitySequence {
    fn from_iter<I: IntoIterator<Item = Vec<f64>>>(iter: I) -> Self {
        ProbabilitySequence {
            outputs: iter.into_iter().collect(),
        }
    }
}

/// 标量序列（回归模型的逐指纹输出）
#[derive(Clone, Debug, Default)]
pub struct ScalarSequence {
    outputs: Vec<f64>,
}

impl ScalarSequence {
    pub fn new() -> Self {
        ScalarSequence {
            outputs: Vec::new(),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.outputs.push(value);
    }

    pub fn all(&self) -> &[f64] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.outputs.is_empty() {
            return None;
        }
        Some(self.outputs.iter().sum::<f64>() / self.outputs.len() as f64)
    }
}

impl FromIterator<f64> for ScalarSequence {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        ScalarSequence {
            outputs: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// 聚合结果
// ============================================================================

/// 单个类别的平均概率
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f64,
}

/// 房间估计结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomEstimate {
    /// 平均概率最大的类别
    pub room_id: String,
    /// 该类别在模型类别中的下标
    pub class_index: usize,
    /// 置信度百分比
    pub percentage: u32,
    /// 各类别平均概率
    pub probabilities: Vec<ClassProbability>,
    /// 参与聚合的指纹数
    pub samples: usize,
    pub timestamp: DateTime<Utc>,
}

impl RoomEstimate {
    /// 由平均概率向量构造；并列时取下标最小的类别
    pub fn from_mean(classes: &[String], mean: &[f64], samples: usize) -> Option<Self> {
        if mean.is_empty() || mean.len() != classes.len() {
            return None;
        }
        let class_index = argmax(mean);
        Some(RoomEstimate {
            room_id: classes[class_index].clone(),
            class_index,
            percentage: to_percent(mean[class_index] * 100.0),
            probabilities: classes
                .iter()
                .zip(mean)
                .map(|(label, &probability)| ClassProbability {
                    label: label.clone(),
                    probability,
                })
                .collect(),
            samples,
            timestamp: Utc::now(),
        })
    }

    /// 指定类别的平均概率
    pub fn probability_of(&self, label: &str) -> Option<f64> {
        self.probabilities
            .iter()
            .find(|p| p.label == label)
            .map(|p| p.probability)
    }

    /// 是否达到置信度阈值（0.0 ~ 1.0）
    pub fn is_confident(&self, threshold: f64) -> bool {
        self.probabilities
            .get(self.class_index)
            .is_some_and(|p| p.probability >= threshold)
    }

    /// 获取详细描述
    pub fn detailed_description(&self) -> String {
        let detail: Vec<String> = self
            .probabilities
            .iter()
            .map(|p| format!("{}={:.3}", p.label, p.probability))
            .collect();
        format!(
            "房间: {}, 置信度: {}%, 指纹数: {}, 各类别: [{}]",
            self.room_id,
            self.percentage,
            self.samples,
            detail.join(", ")
        )
    }
}

/// 百分比估计结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PercentageEstimate {
    /// 取整后的百分比
    pub percentage: u32,
    /// 取整前的平均值
    pub raw_mean: f64,
    pub samples: usize,
    pub timestamp: DateTime<Utc>,
}

impl PercentageEstimate {
    pub fn from_mean(mean: f64, samples: usize) -> Self {
        PercentageEstimate {
            percentage: to_percent(mean),
            raw_mean: mean,
            samples,
            timestamp: Utc::now(),
        }
    }
}

/// 聚合结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateResult {
    Room(RoomEstimate),
    Percentage(PercentageEstimate),
}

impl AggregateResult {
    /// 对外报告的整数百分比
    pub fn percentage(&self) -> u32 {
        match self {
            AggregateResult::Room(r) => r.percentage,
            AggregateResult::Percentage(p) => p.percentage,
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match self {
            AggregateResult::Room(r) => Some(&r.room_id),
            AggregateResult::Percentage(_) => None,
        }
    }

    pub fn samples(&self) -> usize {
        match self {
            AggregateResult::Room(r) => r.samples,
            AggregateResult::Percentage(p) => p.samples,
        }
    }
}

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateResult::Room(r) => write!(f, "{} [{}%]", r.room_id, r.percentage),
            AggregateResult::Percentage(p) => write!(f, "{}%", p.percentage),
        }
    }
}
