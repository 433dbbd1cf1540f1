/// 信标观测记录与标识符全集

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 单条信标观测
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// 时间戳（毫秒，按原样透传）
    pub timestamp: i64,
    /// 信标 MAC 地址或 UUID
    pub identifier: String,
    /// 信号强度 (dBm)
    pub signal_strength: i16,
    /// 来源标签（训练时为房间 ID）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
}

impl Observation {
    /// 创建无标签的观测
    pub fn new(timestamp: i64, identifier: impl Into<String>, signal_strength: i16) -> Self {
        Observation {
            timestamp,
            identifier: identifier.into(),
            signal_strength,
            source_label: None,
        }
    }

    /// 创建带标签的观测
    pub fn labeled(
        timestamp: i64,
        identifier: impl Into<String>,
        signal_strength: i16,
        label: impl Into<String>,
    ) -> Self {
        Observation {
            timestamp,
            identifier: identifier.into(),
            signal_strength,
            source_label: Some(label.into()),
        }
    }

    /// 从元组创建（简洁方式）
    pub fn from_tuple((timestamp, identifier, signal_strength): (i64, &str, i16)) -> Self {
        Self::new(timestamp, identifier, signal_strength)
    }

    /// 附加标签
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.source_label = Some(label.into());
        self
    }
}

/// 标识符全集 - 训练时确定的有序信标列表
///
/// 决定特征向量的维度和列顺序。训练结束后不再修改，
/// 推理时遇到的未知标识符直接丢弃。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct IdentifierUniverse {
    identifiers: Vec<String>,
    positions: HashMap<String, usize>,
}

impl IdentifierUniverse {
    /// 从语料推导全集（按首次出现顺序）
    pub fn derive<'a, I>(observations: I) -> Self
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let mut universe = IdentifierUniverse::default();
        for obs in observations {
            if !universe.positions.contains_key(&obs.identifier) {
                universe
                    .positions
                    .insert(obs.identifier.clone(), universe.identifiers.len());
                universe.identifiers.push(obs.identifier.clone());
            }
        }
        universe
    }

    /// 从固定列表创建，标识符不允许重复
    pub fn from_identifiers(identifiers: Vec<String>) -> Result<Self, String> {
        let mut positions = HashMap::with_capacity(identifiers.len());
        for (idx, id) in identifiers.iter().enumerate() {
            if positions.insert(id.clone(), idx).is_some() {
                return Err(format!("标识符重复：{}", id));
            }
        }
        Ok(IdentifierUniverse {
            identifiers,
            positions,
        })
    }

    /// 标识符在特征向量中的列号
    pub fn position(&self, identifier: &str) -> Option<usize> {
        self.positions.get(identifier).copied()
    }

    /// 是否包含标识符
    pub fn contains(&self, identifier: &str) -> bool {
        self.positions.contains_key(identifier)
    }

    /// 有序标识符列表
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// 按列顺序迭代
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.identifiers.iter()
    }

    /// 特征维度
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

impl TryFrom<Vec<String>> for IdentifierUniverse {
    type Error = String;

    fn try_from(identifiers: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_identifiers(identifiers)
    }
}

impl From<IdentifierUniverse> for Vec<String> {
    fn from(universe: IdentifierUniverse) -> Self {
        universe.identifiers
    }
}

impl fmt::Display for IdentifierUniverse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "标识符全集 [{} 个]", self.identifiers.len())
    }
}
