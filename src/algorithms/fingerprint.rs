/// 指纹构建
///
/// 将稀疏、异步的信标观测按时间戳分组，
/// 再对齐到标识符全集，得到定长的特征向量。

use crate::algorithms::{IdentifierUniverse, Observation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 未检测到信号时的占位值 (dBm)
pub const MISSING_SIGNAL: f64 = -100.0;

// ============================================================================
// 稀疏指纹
// ============================================================================

/// 单个时间戳下的信号集合（稀疏指纹）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SignalReadings {
    /// 时间戳
    pub timestamp: i64,
    /// 标签（仅训练数据有）
    pub label: Option<String>,
    /// beacon_id -> RSSI 的映射
    measurements: HashMap<String, i16>,
}

impl SignalReadings {
    /// 创建空的信号集合
    pub fn new(timestamp: i64) -> Self {
        SignalReadings {
            timestamp,
            label: None,
            measurements: HashMap::new(),
        }
    }

    /// 设置标签
    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    /// 从 (beacon_id, rssi) 对的向量创建
    pub fn from_pairs(timestamp: i64, pairs: Vec<(&str, i16)>) -> Self {
        let mut readings = SignalReadings::new(timestamp);
        for (id, rssi) in pairs {
            readings.add(id.to_string(), rssi);
        }
        readings
    }

    /// 从 HashMap 创建
    pub fn from_hashmap(timestamp: i64, map: HashMap<String, i16>) -> Self {
        SignalReadings {
            timestamp,
            label: None,
            measurements: map,
        }
    }

    /// 添加测量；同一信标已有值时保留先到的值
    ///
    /// 返回是否实际写入
    pub fn add(&mut self, beacon_id: String, rssi: i16) -> bool {
        match self.measurements.entry(beacon_id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(rssi);
                true
            }
        }
    }

    /// 获取 RSSI
    pub fn get(&self, beacon_id: &str) -> Option<i16> {
        self.measurements.get(beacon_id).copied()
    }

    /// 获取所有测量
    pub fn all(&self) -> &HashMap<String, i16> {
        &self.measurements
    }

    /// 测量数量
    pub fn count(&self) -> usize {
        self.measurements.len()
    }

    /// 是否包含信标
    pub fn contains(&self, beacon_id: &str) -> bool {
        self.measurements.contains_key(beacon_id)
    }

    /// 投影到标识符全集，得到稠密指纹
    ///
    /// 全集之外的信标被丢弃，全集中缺失的信标填 [`MISSING_SIGNAL`]
    pub fn project(&self, universe: &IdentifierUniverse) -> Fingerprint {
        let values = universe
            .iter()
            .map(|id| {
                self.measurements
                    .get(id)
                    .map_or(MISSING_SIGNAL, |&rssi| rssi as f64)
            })
            .collect();
        Fingerprint {
            timestamp: self.timestamp,
            label: self.label.clone(),
            values,
        }
    }
}

// ============================================================================
// 稠密指纹
// ============================================================================

/// 稠密指纹：长度等于标识符全集大小
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub values: Vec<f64>,
}

impl Fingerprint {
    /// 特征维度
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 按标识符取值
    pub fn value_of(&self, universe: &IdentifierUniverse, identifier: &str) -> Option<f64> {
        universe
            .position(identifier)
            .and_then(|idx| self.values.get(idx).copied())
    }

    /// 从另一个全集重新投影到目标全集
    pub fn reproject(&self, from: &IdentifierUniverse, to: &IdentifierUniverse) -> Fingerprint {
        let values = to
            .iter()
            .map(|id| {
                from.position(id)
                    .and_then(|idx| self.values.get(idx).copied())
                    .unwrap_or(MISSING_SIGNAL)
            })
            .collect();
        Fingerprint {
            timestamp: self.timestamp,
            label: self.label.clone(),
            values,
        }
    }
}

/// 全集模式：训练时推导，推理时固定
#[derive(Clone, Copy, Debug)]
pub enum UniverseMode<'a> {
    /// 从输入观测推导（首次出现顺序）
    Derive,
    /// 使用已有全集
    Fixed(&'a IdentifierUniverse),
}

/// 构建结果
#[derive(Clone, Debug, Default)]
pub struct FingerprintSet {
    pub universe: IdentifierUniverse,
    pub fingerprints: Vec<Fingerprint>,
}

impl FingerprintSet {
    /// 特征矩阵（按行）
    pub fn matrix(&self) -> Vec<Vec<f64>> {
        self.fingerprints.iter().map(|f| f.values.clone()).collect()
    }

    /// 各行标签
    pub fn labels(&self) -> Vec<Option<String>> {
        self.fingerprints.iter().map(|f| f.label.clone()).collect()
    }
}

// ============================================================================
// 指纹构建器
// ============================================================================

/// 指纹构建器
pub struct FingerprintBuilder;

impl FingerprintBuilder {
    /// 按 (时间戳, 标签) 分组
    ///
    /// 输出按时间戳升序；时间戳相同的组保持首次出现顺序。
    /// 同一组内同一信标的重复观测，以输入中先出现者为准。
    pub fn group(observations: &[Observation]) -> Vec<SignalReadings> {
        let mut index: HashMap<(i64, Option<&str>), usize> = HashMap::new();
        let mut groups: Vec<SignalReadings> = Vec::new();

        for obs in observations {
            let key = (obs.timestamp, obs.source_label.as_deref());
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(
                    SignalReadings::new(obs.timestamp).with_label(obs.source_label.clone()),
                );
                groups.len() - 1
            });
            groups[slot].add(obs.identifier.clone(), obs.signal_strength);
        }

        // 稳定排序
        groups.sort_by_key(|g| g.timestamp);
        groups
    }

    /// 统一入口：推导或应用全集后构建指纹
    pub fn assemble(observations: &[Observation], mode: UniverseMode<'_>) -> FingerprintSet {
        let universe = match mode {
            UniverseMode::Derive => IdentifierUniverse::derive(observations),
            UniverseMode::Fixed(universe) => universe.clone(),
        };
        let fingerprints = Self::group(observations)
            .iter()
            .map(|readings| readings.project(&universe))
            .collect();
        FingerprintSet {
            universe,
            fingerprints,
        }
    }

    /// 使用固定全集构建指纹
    pub fn build(observations: &[Observation], universe: &IdentifierUniverse) -> Vec<Fingerprint> {
        Self::assemble(observations, UniverseMode::Fixed(universe)).fingerprints
    }

    /// 训练模式：推导全集并构建指纹
    pub fn build_training_set(observations: &[Observation]) -> FingerprintSet {
        Self::assemble(observations, UniverseMode::Derive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe(ids: &[&str]) -> IdentifierUniverse {
        IdentifierUniverse::from_identifiers(ids.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_signal_readings_first_wins() {
        let mut readings = SignalReadings::new(1);
        assert!(readings.add("B1".to_string(), -50));
        assert!(!readings.add("B1".to_string(), -40));
        assert_eq!(readings.count(), 1);
        assert_eq!(readings.get("B1"), Some(-50));
    }

    #[test]
    fn test_project_fills_sentinel_and_drops_unknown() {
        let readings = SignalReadings::from_pairs(7, vec![("A", -60), ("Z", -30)]);
        let fp = readings.project(&universe(&["A", "B"]));
        assert_eq!(fp.values, vec![-60.0, MISSING_SIGNAL]);
        assert_eq!(fp.timestamp, 7);
    }

    #[test]
    fn test_group_sorted_by_timestamp() {
        let observations = vec![
            Observation::new(30, "A", -50),
            Observation::new(10, "B", -60),
            Observation::new(30, "B", -70),
            Observation::new(20, "A", -55),
        ];
        let groups = FingerprintBuilder::group(&observations);
        let timestamps: Vec<i64> = groups.iter().map(|g| g.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
        assert_eq!(groups[2].count(), 2);
    }

    #[test]
    fn test_group_keeps_labels_apart() {
        let observations = vec![
            Observation::labeled(5, "A", -50, "103"),
            Observation::labeled(5, "A", -80, "0"),
        ];
        let set = FingerprintBuilder::build_training_set(&observations);
        assert_eq!(set.fingerprints.len(), 2);
        assert_eq!(set.fingerprints[0].label.as_deref(), Some("103"));
        assert_eq!(set.fingerprints[0].values, vec![-50.0]);
        assert_eq!(set.fingerprints[1].values, vec![-80.0]);
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let fps = FingerprintBuilder::build(&[], &universe(&["A"]));
        assert!(fps.is_empty());
    }

    #[test]
    fn test_reproject_from_larger_universe() {
        let wide = universe(&["Z", "B", "A"]);
        let narrow = universe(&["A", "B", "C"]);
        let fp = Fingerprint {
            timestamp: 1,
            label: None,
            values: vec![-20.0, -70.0, -60.0],
        };
        let projected = fp.reproject(&wide, &narrow);
        assert_eq!(projected.values, vec![-60.0, -70.0, MISSING_SIGNAL]);
        assert_eq!(projected.value_of(&narrow, "B"), Some(-70.0));
    }
}
