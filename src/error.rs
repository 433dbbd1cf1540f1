/// 错误类型定义
///
/// 按关注点划分：
/// - `RecordError`：单行记录解析失败
/// - `CorpusError`：训练语料装载（区分可跳过的文件级错误与致命的根目录错误）
/// - `TrainError`：训练流程
/// - `InferenceError`：单次推理请求
/// - `ArtifactError`：模型产物读写
/// - `ConfigError`：配置加载与校验
/// - `ScanError`：蓝牙采集

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// 训练流程结果别名
pub type TrainResult<T> = Result<T, TrainError>;

/// 单行记录解析错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    /// 列数不是 3
    #[error("第 {line} 行列数错误：期望 3 列，实际 {found} 列")]
    ColumnCount { line: u64, found: usize },

    /// 字段无法解析
    #[error("第 {line} 行字段 `{field}` 无法解析：{value:?}")]
    InvalidField {
        line: u64,
        field: &'static str,
        value: String,
    },

    /// 标识符为空
    #[error("第 {line} 行标识符为空")]
    EmptyIdentifier { line: u64 },

    /// CSV 读取底层错误
    #[error("记录读取失败：{0}")]
    Csv(String),
}

impl From<csv::Error> for RecordError {
    fn from(e: csv::Error) -> Self {
        RecordError::Csv(e.to_string())
    }
}

/// 训练语料装载错误
#[derive(Debug, Error)]
pub enum CorpusError {
    /// 语料根目录不存在
    #[error("语料根目录不存在：{0}")]
    RootNotFound(PathBuf),

    /// 目录或文件读取失败
    #[error("读取 `{path}` 失败：{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 单个记录文件格式错误
    #[error("记录文件 `{path}` 格式错误：{source}")]
    MalformedFile {
        path: PathBuf,
        #[source]
        source: RecordError,
    },

    /// 文件过滤正则非法
    #[error("文件过滤规则非法：{0}")]
    InvalidPattern(#[from] regex::Error),
}

impl CorpusError {
    /// 是否可以跳过该文件继续装载
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CorpusError::MalformedFile { .. } | CorpusError::Io { .. })
    }
}

/// 训练流程错误
#[derive(Debug, Error)]
pub enum TrainError {
    /// 配置错误
    #[error("配置错误：{0}")]
    Config(#[from] ConfigError),

    /// 语料装载错误
    #[error("语料错误：{0}")]
    Corpus(#[from] CorpusError),

    /// 产物导出错误
    #[error("产物错误：{0}")]
    Artifact(#[from] ArtifactError),

    /// 没有任何训练数据
    #[error("没有可用的训练数据：{0}")]
    NoData(String),

    /// 只有一个类别，无法训练分类器
    #[error("训练数据只有一个类别，各标签样本数：{counts:?}")]
    SingleClass { counts: BTreeMap<String, usize> },

    /// 标识符全集为空
    #[error("标识符全集为空，无法构建特征")]
    EmptyUniverse,

    /// 样本数不足以划分训练/验证集
    #[error("样本数不足：共 {samples} 个，至少需要 {required} 个；各标签样本数：{counts:?}")]
    InsufficientSamples {
        samples: usize,
        required: usize,
        counts: BTreeMap<String, usize>,
    },

    /// 回归标签无法解析为百分比
    #[error("标签 `{label}` 不是 [0, 100] 范围内的数值")]
    InvalidTarget { label: String },

    /// 模型拟合失败
    #[error("模型拟合失败：{0}")]
    Fit(String),

    /// 特征维度不一致
    #[error("特征维度不一致：期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl TrainError {
    /// 构造 [`TrainError::Fit`]
    pub fn fit<S: Into<String>>(msg: S) -> Self {
        TrainError::Fit(msg.into())
    }
}

/// 推理请求错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InferenceError {
    /// 批次中没有任何指纹
    #[error("批次为空：没有可用于推理的指纹")]
    EmptyBatch,

    /// 原始记录格式错误
    #[error("输入记录格式错误：{0}")]
    Malformed(#[from] RecordError),

    /// 指纹维度与参数不一致
    #[error("特征维度不一致：期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 模型类型与请求不匹配
    #[error("模型类型不匹配：期望 {expected}，实际 {actual}")]
    WrongModelKind {
        expected: &'static str,
        actual: &'static str,
    },

    /// 指定的正例类别不存在
    #[error("类别 `{0}` 不在模型类别中")]
    UnknownClass(String),
}

/// 模型产物读写错误
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// 产物文件不存在
    #[error("产物文件不存在：{0}")]
    Missing(PathBuf),

    /// 读写失败
    #[error("产物读写失败 `{path}`：{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON 解析失败
    #[error("产物解析失败 `{path}`：{source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// 内容不一致或版本不支持
    #[error("产物损坏 `{path}`：{reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl ArtifactError {
    /// 构造 [`ArtifactError::Corrupt`]
    pub fn corrupt<S: Into<String>>(path: impl Into<PathBuf>, reason: S) -> Self {
        ArtifactError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 字段取值非法
    #[error("配置项 `{field}` 非法：{reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// 配置文件读取失败
    #[error("无法读取配置文件 `{path}`：{source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 配置文件 JSON 格式错误
    #[error("无法解析配置文件 `{path}`：{source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// 构造 [`ConfigError::InvalidValue`]
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// 蓝牙采集错误
#[derive(Debug, Error)]
pub enum ScanError {
    /// 蓝牙管理器或适配器操作失败
    #[error("蓝牙操作失败：{0}")]
    Bluetooth(#[from] btleplug::Error),

    /// 未找到蓝牙适配器
    #[error("未找到蓝牙适配器")]
    NoAdapter,

    /// 设备名称过滤正则非法
    #[error("设备名称过滤规则非法：{0}")]
    InvalidPattern(#[from] regex::Error),

    /// 记录写出失败
    #[error("记录写出失败 `{path}`：{reason}")]
    Write { path: PathBuf, reason: String },
}
