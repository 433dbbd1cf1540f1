/// 评估指标
///
/// 留出集上的分类报告（准确率、宏平均精确率/召回率/F1、逐类统计、混淆矩阵）
/// 与回归报告（MAE、R²）

use serde::{Deserialize, Serialize};
use std::fmt;

/// 单个类别的统计
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// 留出集中该类别的真实样本数
    pub support: usize,
}

/// 分类报告
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    #[serde(default)]
    pub macro_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    /// 混淆矩阵：行为真实类别，列为预测类别
    #[serde(default)]
    pub confusion: Vec<Vec<usize>>,
}

impl ClassificationReport {
    /// 由真实类别与预测类别下标计算
    ///
    /// 某类没有预测样本时精确率记为 0，没有真实样本时召回率记为 0
    pub fn compute(classes: &[String], y_true: &[usize], y_pred: &[usize]) -> Self {
        let n_classes = classes.len();
        let mut tp = vec![0usize; n_classes];
        let mut predicted = vec![0usize; n_classes];
        let mut actual = vec![0usize; n_classes];
        let mut confusion = vec![vec![0usize; n_classes]; n_classes];

        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t < n_classes && p < n_classes {
                confusion[t][p] += 1;
            }
            if t < n_classes {
                actual[t] += 1;
            }
            if p < n_classes {
                predicted[p] += 1;
            }
            if t == p && t < n_classes {
                tp[t] += 1;
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        let per_class: Vec<ClassMetrics> = classes
            .iter()
            .enumerate()
            .map(|(k, label)| {
                let precision = ratio(tp[k], predicted[k]);
                let recall = ratio(tp[k], actual[k]);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: label.clone(),
                    precision,
                    recall,
                    f1,
                    support: actual[k],
                }
            })
            .collect();

        let correct: usize = tp.iter().sum();
        let macro_avg = |f: fn(&ClassMetrics) -> f64| {
            if per_class.is_empty() {
                0.0
            } else {
                per_class.iter().map(f).sum::<f64>() / per_class.len() as f64
            }
        };

        ClassificationReport {
            accuracy: ratio(correct, y_true.len()),
            macro_precision: macro_avg(|m| m.precision),
            macro_recall: macro_avg(|m| m.recall),
            macro_f1: macro_avg(|m| m.f1),
            per_class,
            confusion,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "准确率: {:.4}, 宏平均精确率: {:.4}, 宏平均召回率: {:.4}, 宏平均 F1: {:.4}",
            self.accuracy, self.macro_precision, self.macro_recall, self.macro_f1
        )?;
        writeln!(f, "{:<12} {:>9} {:>9} {:>9} {:>8}", "类别", "precision", "recall", "f1", "support")?;
        for m in &self.per_class {
            writeln!(
                f,
                "{:<12} {:>9.4} {:>9.4} {:>9.4} {:>8}",
                m.label, m.precision, m.recall, m.f1, m.support
            )?;
        }

        writeln!(f, "混淆矩阵（行：真实，列：预测）")?;
        write!(f, "{:<12}", "")?;
        for m in &self.per_class {
            write!(f, " {:>8}", m.label)?;
        }
        writeln!(f)?;
        for (m, row) in self.per_class.iter().zip(&self.confusion) {
            write!(f, "{:<12}", m.label)?;
            for count in row {
                write!(f, " {:>8}", count)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// 回归报告
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    /// 平均绝对误差
    pub mae: f64,
    /// 决定系数；真实值方差为 0 时记为 0
    pub r2: f64,
    pub samples: usize,
}

impl RegressionReport {
    pub fn compute(y_true: &[f64], y_pred: &[f64]) -> Self {
        let n = y_true.len();
        if n == 0 {
            return RegressionReport {
                mae: 0.0,
                r2: 0.0,
                samples: 0,
            };
        }

        let mean = y_true.iter().sum::<f64>() / n as f64;
        let mut abs_err = 0.0;
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for (t, p) in y_true.iter().zip(y_pred) {
            abs_err += (t - p).abs();
            ss_res += (t - p) * (t - p);
            ss_tot += (t - mean) * (t - mean);
        }

        RegressionReport {
            mae: abs_err / n as f64,
            r2: if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 },
            samples: n,
        }
    }
}

impl fmt::Display for RegressionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MAE: {:.4}, R²: {:.4} ({} 个样本)", self.mae, self.r2, self.samples)
    }
}

/// 留出集评估报告
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationReport {
    Classification(ClassificationReport),
    Regression(RegressionReport),
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationReport::Classification(r) => write!(f, "{}", r),
            EvaluationReport::Regression(r) => write!(f, "{}", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_report() {
        let classes = vec!["0".to_string(), "103".to_string()];
        let report = ClassificationReport::compute(&classes, &[0, 0, 1, 1], &[0, 1, 1, 1]);
        assert_eq!(report.accuracy, 0.75);
        assert_eq!(report.per_class[0].precision, 1.0);
        assert_eq!(report.per_class[0].recall, 0.5);
        assert!((report.per_class[1].precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(report.per_class[1].support, 2);
        assert!((report.macro_recall - 0.75).abs() < 1e-12);

        assert_eq!(report.confusion, vec![vec![1, 1], vec![0, 2]]);
        // f1: 2/3 与 0.8
        assert!((report.macro_f1 - (2.0 / 3.0 + 0.8) / 2.0).abs() < 1e-12);

        let text = report.to_string();
        assert!(text.contains("混淆矩阵"));
        assert!(text.lines().last().unwrap().ends_with("       0        2"));

        let held_out = EvaluationReport::Classification(report);
        let json = serde_json::to_string(&held_out).unwrap();
        assert!(json.contains("\"confusion\":[[1,1],[0,2]]"));
        let restored: EvaluationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, held_out);
    }

    #[test]
    fn test_class_never_predicted() {
        let classes = vec!["a".to_string(), "b".to_string()];
        let report = ClassificationReport::compute(&classes, &[0, 1], &[0, 0]);
        assert_eq!(report.per_class[1].precision, 0.0);
        assert_eq!(report.per_class[1].f1, 0.0);
    }

    #[test]
    fn test_regression_report() {
        let report = RegressionReport::compute(&[10.0, 20.0, 30.0], &[12.0, 18.0, 30.0]);
        assert!((report.mae - 4.0 / 3.0).abs() < 1e-12);
        assert!((report.r2 - (1.0 - 8.0 / 200.0)).abs() < 1e-12);
    }
}
