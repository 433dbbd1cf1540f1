/// 指纹估计算法模块
///
/// 该模块提供从信标观测到房间估计的核心算法：
/// - 标识符全集与指纹构建（稀疏观测 → 定长向量）
/// - 特征标准化
/// - 多种估计器（分类 / 回归）与模型选择
/// - 多指纹推理结果的聚合

pub mod beacon;
pub mod estimator;
pub mod fingerprint;
pub mod metrics;
pub mod normalizer;
pub mod results;
pub mod selection;

pub use beacon::*;
pub use estimator::*;
pub use fingerprint::*;
pub use metrics::*;
pub use normalizer::*;
pub use results::*;
pub use selection::*;
