/// 估计器
///
/// 两类能力接口：
/// - `Classifier`：输出各类别概率（房间 ID）
/// - `Regressor`：输出标量（适合度百分比）
///
/// 具体模型在载入时确定一次，通过 `TrainedModel::view` 多态分发。

use crate::error::TrainError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// 能力接口
// ============================================================================

/// 概率分类器
pub trait Classifier: Send + Sync {
    /// 类别数
    fn n_classes(&self) -> usize;

    /// 各类别概率，长度为 `n_classes()`，和为 1
    fn predict_proba(&self, x: &[f64]) -> Vec<f64>;

    /// 概率最大的类别下标
    fn predict(&self, x: &[f64]) -> usize {
        argmax(&self.predict_proba(x))
    }
}

/// 标量回归器
pub trait Regressor: Send + Sync {
    fn predict(&self, x: &[f64]) -> f64;
}

/// 最大值下标；并列时取最小下标
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = idx;
        }
    }
    best
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// 按距离排序后取最近的 k 个样本下标（距离相同按训练顺序）
fn nearest(train: &[Vec<f64>], x: &[f64], k: usize) -> Vec<(f64, usize)> {
    let mut distances: Vec<(f64, usize)> = train
        .iter()
        .enumerate()
        .map(|(idx, row)| (squared_distance(row, x).sqrt(), idx))
        .collect();
    distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    distances.truncate(k);
    distances
}

fn check_training_shape(x: &[Vec<f64>], targets: usize) -> Result<usize, TrainError> {
    let first = x
        .first()
        .ok_or_else(|| TrainError::fit("训练样本为空"))?;
    if x.len() != targets {
        return Err(TrainError::fit(format!(
            "样本数与标签数不一致：{} vs {}",
            x.len(),
            targets
        )));
    }
    let dim = first.len();
    if let Some(bad) = x.iter().find(|r| r.len() != dim) {
        return Err(TrainError::DimensionMismatch {
            expected: dim,
            actual: bad.len(),
        });
    }
    Ok(dim)
}

/// 载入的参数矩阵：每行长度为 `dim`，且全部为有限值
fn check_rows(rows: &[Vec<f64>], dim: usize, what: &str) -> Result<(), String> {
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
        return Err(format!("{}第 {} 行长度 {}，应为 {}", what, idx, row.len(), dim));
    }
    if rows.iter().flatten().any(|v| !v.is_finite()) {
        return Err(format!("{}包含非有限值", what));
    }
    Ok(())
}

fn check_k(k: usize, samples: usize) -> Result<(), String> {
    if k == 0 || k > samples {
        return Err(format!("k={} 超出训练样本范围 [1, {}]", k, samples));
    }
    Ok(())
}

// ============================================================================
// 多项逻辑回归
// ============================================================================

/// 多项逻辑回归（softmax），L2 正则
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    /// 每个类别一行权重
    weights: Vec<Vec<f64>>,
    /// 每个类别的偏置
    bias: Vec<f64>,
}

impl SoftmaxRegression {
    /// 最大迭代次数
    pub const MAX_ITER: usize = 1000;
    /// 梯度收敛阈值
    pub const TOLERANCE: f64 = 1e-6;

    /// 由已知参数直接构造
    pub fn from_parts(weights: Vec<Vec<f64>>, bias: Vec<f64>) -> Result<Self, TrainError> {
        if weights.len() != bias.len() || weights.is_empty() {
            return Err(TrainError::fit("权重行数必须与偏置长度一致且非空"));
        }
        let dim = weights[0].len();
        if weights.iter().any(|w| w.len() != dim) {
            return Err(TrainError::fit("各类别权重长度不一致"));
        }
        Ok(SoftmaxRegression { weights, bias })
    }

    /// 全批量梯度下降拟合
    ///
    /// 目标函数：平均交叉熵 + ||W||² / (2·C·n)，
    /// 步长取梯度 Lipschitz 常数的倒数，保证单调下降。
    pub fn fit(x: &[Vec<f64>], y: &[usize], n_classes: usize, c: f64) -> Result<Self, TrainError> {
        let dim = check_training_shape(x, y.len())?;
        if n_classes < 2 {
            return Err(TrainError::fit("逻辑回归至少需要两个类别"));
        }
        if !(c > 0.0 && c.is_finite()) {
            return Err(TrainError::fit(format!("正则系数 C 必须为正：{}", c)));
        }
        if let Some(&bad) = y.iter().find(|&&label| label >= n_classes) {
            return Err(TrainError::fit(format!("标签下标越界：{}", bad)));
        }

        let n = x.len() as f64;
        let l2 = 1.0 / (c * n);
        let mean_sq_norm = x
            .iter()
            .map(|row| row.iter().map(|v| v * v).sum::<f64>() + 1.0)
            .sum::<f64>()
            / n;
        let step = 1.0 / (0.5 * mean_sq_norm + l2);

        let mut model = SoftmaxRegression {
            weights: vec![vec![0.0; dim]; n_classes],
            bias: vec![0.0; n_classes],
        };

        for _ in 0..Self::MAX_ITER {
            let mut grad_w = vec![vec![0.0; dim]; n_classes];
            let mut grad_b = vec![0.0; n_classes];

            for (row, &label) in x.iter().zip(y) {
                let proba = model.predict_proba(row);
                for k in 0..n_classes {
                    let target = if k == label { 1.0 } else { 0.0 };
                    let err = proba[k] - target;
                    grad_b[k] += err;
                    for (g, v) in grad_w[k].iter_mut().zip(row) {
                        *g += err * v;
                    }
                }
            }

            let mut max_grad: f64 = 0.0;
            for k in 0..n_classes {
                grad_b[k] /= n;
                max_grad = max_grad.max(grad_b[k].abs());
                model.bias[k] -= step * grad_b[k];
                for (j, g) in grad_w[k].iter_mut().enumerate() {
                    *g = *g / n + l2 * model.weights[k][j];
                    max_grad = max_grad.max(g.abs());
                    model.weights[k][j] -= step * *g;
                }
            }

            if max_grad < Self::TOLERANCE {
                break;
            }
        }

        Ok(model)
    }

    /// 输入维度
    pub fn input_dim(&self) -> usize {
        self.weights.first().map_or(0, |w| w.len())
    }

    /// 检查反序列化得到的参数
    pub fn validate(&self) -> Result<(), String> {
        if self.weights.is_empty() || self.weights.len() != self.bias.len() {
            return Err(format!(
                "权重行数 {} 与偏置长度 {} 不一致或为空",
                self.weights.len(),
                self.bias.len()
            ));
        }
        check_rows(&self.weights, self.input_dim(), "权重")?;
        if self.bias.iter().any(|b| !b.is_finite()) {
            return Err("偏置包含非有限值".to_string());
        }
        Ok(())
    }
}

impl Classifier for SoftmaxRegression {
    fn n_classes(&self) -> usize {
        self.bias.len()
    }

    fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>())
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }
}

// ============================================================================
// k 近邻
// ============================================================================

/// k 近邻分类器
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnnClassifier {
    k: usize,
    /// 是否按距离倒数加权投票
    weighted: bool,
    n_classes: usize,
    x: Vec<Vec<f64>>,
    y: Vec<usize>,
}

impl KnnClassifier {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
        k: usize,
        weighted: bool,
    ) -> Result<Self, TrainError> {
        check_training_shape(x, y.len())?;
        check_k(k, x.len()).map_err(TrainError::fit)?;
        if let Some(&bad) = y.iter().find(|&&label| label >= n_classes) {
            return Err(TrainError::fit(format!("标签下标越界：{}", bad)));
        }
        Ok(KnnClassifier {
            k,
            weighted,
            n_classes,
            x: x.to_vec(),
            y: y.to_vec(),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.x.first().map_or(0, |r| r.len())
    }

    /// 检查反序列化得到的参数
    pub fn validate(&self) -> Result<(), String> {
        if self.x.len() != self.y.len() {
            return Err(format!("样本数与标签数不一致：{} vs {}", self.x.len(), self.y.len()));
        }
        check_k(self.k, self.x.len())?;
        check_rows(&self.x, self.input_dim(), "近邻样本")?;
        if let Some(&bad) = self.y.iter().find(|&&label| label >= self.n_classes) {
            return Err(format!("标签下标 {} 超出类别数 {}", bad, self.n_classes));
        }
        Ok(())
    }
}

impl Classifier for KnnClassifier {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
        let mut votes = vec![0.0; self.n_classes];
        for (dist, idx) in nearest(&self.x, x, self.k) {
            let weight = if !self.weighted {
                1.0
            } else if dist < 1e-10 {
                1e10
            } else {
                1.0 / dist
            };
            votes[self.y[idx]] += weight;
        }
        let total: f64 = votes.iter().sum();
        votes.into_iter().map(|v| v / total).collect()
    }
}

/// k 近邻回归器（近邻目标值的算术平均）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnnRegressor {
    k: usize,
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
}

impl KnnRegressor {
    pub fn fit(x: &[Vec<f64>], y: &[f64], k: usize) -> Result<Self, TrainError> {
        check_training_shape(x, y.len())?;
        check_k(k, x.len()).map_err(TrainError::fit)?;
        Ok(KnnRegressor {
            k,
            x: x.to_vec(),
            y: y.to_vec(),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.x.first().map_or(0, |r| r.len())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.x.len() != self.y.len() {
            return Err(format!("样本数与目标数不一致：{} vs {}", self.x.len(), self.y.len()));
        }
        check_k(self.k, self.x.len())?;
        check_rows(&self.x, self.input_dim(), "近邻样本")?;
        if self.y.iter().any(|v| !v.is_finite()) {
            return Err("目标值包含非有限值".to_string());
        }
        Ok(())
    }
}

impl Regressor for KnnRegressor {
    fn predict(&self, x: &[f64]) -> f64 {
        let neighbours = nearest(&self.x, x, self.k);
        neighbours.iter().map(|(_, idx)| self.y[*idx]).sum::<f64>() / neighbours.len() as f64
    }
}

// ============================================================================
// 岭回归
// ============================================================================

/// 岭回归（闭式解）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegression {
    weights: Vec<f64>,
    intercept: f64,
}

impl RidgeRegression {
    /// 求解 (XcᵀXc + αI) w = Xcᵀyc，截距不参与正则
    pub fn fit(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<Self, TrainError> {
        let dim = check_training_shape(x, y.len())?;
        if !(alpha >= 0.0 && alpha.is_finite()) {
            return Err(TrainError::fit(format!("alpha 必须非负：{}", alpha)));
        }

        let n = x.len() as f64;
        let mut x_mean = vec![0.0; dim];
        for row in x {
            for (m, v) in x_mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let y_mean = y.iter().sum::<f64>() / n;

        let mut a = vec![vec![0.0; dim]; dim];
        let mut b = vec![0.0; dim];
        for (row, target) in x.iter().zip(y) {
            let centered: Vec<f64> = row.iter().zip(&x_mean).map(|(v, m)| v - m).collect();
            let yc = target - y_mean;
            for i in 0..dim {
                b[i] += centered[i] * yc;
                for j in 0..dim {
                    a[i][j] += centered[i] * centered[j];
                }
            }
        }
        for (i, row) in a.iter_mut().enumerate() {
            row[i] += alpha;
        }

        let weights = solve_linear_system(a, b)
            .ok_or_else(|| TrainError::fit("正规方程奇异，请增大 alpha"))?;
        let intercept = y_mean - weights.iter().zip(&x_mean).map(|(w, m)| w * m).sum::<f64>();

        Ok(RidgeRegression { weights, intercept })
    }

    pub fn input_dim(&self) -> usize {
        self.weights.len()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.intercept.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err("岭回归参数包含非有限值".to_string());
        }
        Ok(())
    }
}

impl Regressor for RidgeRegression {
    fn predict(&self, x: &[f64]) -> f64 {
        self.intercept + self.weights.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }
}

/// 部分主元高斯消元
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * solution[k]).sum();
        solution[row] = (b[row] - tail) / a[row][row];
    }
    Some(solution)
}

// ============================================================================
// 候选配置
// ============================================================================

/// 分类器候选配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ClassifierSpec {
    Logistic { c: f64 },
    Knn { k: usize, weighted: bool },
}

impl ClassifierSpec {
    pub fn fit(
        &self,
        x: &[Vec<f64>],
        y: &[usize],
        n_classes: usize,
    ) -> Result<ClassifierModel, TrainError> {
        match *self {
            ClassifierSpec::Logistic { c } => {
                SoftmaxRegression::fit(x, y, n_classes, c).map(ClassifierModel::Logistic)
            }
            ClassifierSpec::Knn { k, weighted } => {
                KnnClassifier::fit(x, y, n_classes, k, weighted).map(ClassifierModel::Knn)
            }
        }
    }
}

impl fmt::Display for ClassifierSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierSpec::Logistic { c } => write!(f, "logistic(C={})", c),
            ClassifierSpec::Knn { k, weighted } => write!(f, "knn(k={}, weighted={})", k, weighted),
        }
    }
}

/// 回归器候选配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum RegressorSpec {
    Ridge { alpha: f64 },
    Knn { k: usize },
}

impl RegressorSpec {
    pub fn fit(&self, x: &[Vec<f64>], y: &[f64]) -> Result<RegressorModel, TrainError> {
        match *self {
            RegressorSpec::Ridge { alpha } => {
                RidgeRegression::fit(x, y, alpha).map(RegressorModel::Ridge)
            }
            RegressorSpec::Knn { k } => KnnRegressor::fit(x, y, k).map(RegressorModel::Knn),
        }
    }
}

impl fmt::Display for RegressorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegressorSpec::Ridge { alpha } => write!(f, "ridge(alpha={})", alpha),
            RegressorSpec::Knn { k } => write!(f, "knn(k={})", k),
        }
    }
}

// ============================================================================
// 训练好的模型
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ClassifierModel {
    Logistic(SoftmaxRegression),
    Knn(KnnClassifier),
}

impl ClassifierModel {
    pub fn input_dim(&self) -> usize {
        match self {
            ClassifierModel::Logistic(m) => m.input_dim(),
            ClassifierModel::Knn(m) => m.input_dim(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            ClassifierModel::Logistic(m) => m.validate(),
            ClassifierModel::Knn(m) => m.validate(),
        }
    }
}

impl Classifier for ClassifierModel {
    fn n_classes(&self) -> usize {
        match self {
            ClassifierModel::Logistic(m) => m.n_classes(),
            ClassifierModel::Knn(m) => m.n_classes(),
        }
    }

    fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
        match self {
            ClassifierModel::Logistic(m) => m.predict_proba(x),
            ClassifierModel::Knn(m) => m.predict_proba(x),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum RegressorModel {
    Ridge(RidgeRegression),
    Knn(KnnRegressor),
}

impl RegressorModel {
    pub fn input_dim(&self) -> usize {
        match self {
            RegressorModel::Ridge(m) => m.input_dim(),
            RegressorModel::Knn(m) => m.input_dim(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            RegressorModel::Ridge(m) => m.validate(),
            RegressorModel::Knn(m) => m.validate(),
        }
    }
}

impl Regressor for RegressorModel {
    fn predict(&self, x: &[f64]) -> f64 {
        match self {
            RegressorModel::Ridge(m) => m.predict(x),
            RegressorModel::Knn(m) => m.predict(x),
        }
    }
}

/// 训练好的模型 - 分类或回归二选一
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedModel {
    Classifier {
        /// 类别标签，下标与概率向量一致
        classes: Vec<String>,
        model: ClassifierModel,
    },
    Regressor {
        model: RegressorModel,
    },
}

/// 模型的能力视图
#[derive(Clone, Copy)]
pub enum ModelView<'a> {
    Classifier {
        classes: &'a [String],
        model: &'a dyn Classifier,
    },
    Regressor(&'a dyn Regressor),
}

impl<'a> ModelView<'a> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ModelView::Classifier { .. } => "classifier",
            ModelView::Regressor(_) => "regressor",
        }
    }
}

impl TrainedModel {
    pub fn view(&self) -> ModelView<'_> {
        match self {
            TrainedModel::Classifier { classes, model } => ModelView::Classifier {
                classes,
                model,
            },
            TrainedModel::Regressor { model } => ModelView::Regressor(model),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.view().kind_name()
    }

    /// 模型期望的输入维度
    pub fn input_dim(&self) -> usize {
        match self {
            TrainedModel::Classifier { model, .. } => model.input_dim(),
            TrainedModel::Regressor { model } => model.input_dim(),
        }
    }

    /// 模型内部参数是否自洽
    pub fn validate(&self) -> Result<(), String> {
        match self {
            TrainedModel::Classifier { model, .. } => model.validate(),
            TrainedModel::Regressor { model } => model.validate(),
        }
    }

    pub fn classes(&self) -> Option<&[String]> {
        match self {
            TrainedModel::Classifier { classes, .. } => Some(classes),
            TrainedModel::Regressor { .. } => None,
        }
    }
}
