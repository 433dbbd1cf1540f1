/// 批量判定
///
/// 对样本目录中的每个记录文件独立推理，按置信度阈值给出判定状态，
/// 结果可导出为 CSV。单个文件失败不影响其他文件。

use crate::algorithms::AggregateResult;
use crate::corpus::{list_record_files, read_record_file};
use crate::error::{CorpusError, RecordError};
use crate::inference::LoadedModel;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// 判定状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgementStatus {
    /// 置信度达到阈值，视为正解
    Confident,
    /// 置信度不足
    Uncertain,
}

impl fmt::Display for JudgementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JudgementStatus::Confident => write!(f, "正解"),
            JudgementStatus::Uncertain => write!(f, "不明"),
        }
    }
}

/// 单个样本文件的判定结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JudgementRow {
    /// 相对样本目录的路径
    pub sample_file: String,
    /// 预测的房间；回归模型为空
    pub predicted: Option<String>,
    pub percentage: u32,
    pub status: JudgementStatus,
    /// 各类别平均概率（回归模型为空）
    pub probabilities: Vec<f64>,
    pub fingerprints: usize,
}

/// 失败的样本文件
#[derive(Clone, Debug)]
pub struct JudgementFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// 判定报告
#[derive(Clone, Debug, Default)]
pub struct JudgementReport {
    /// 分类模型的类别（CSV 概率列的表头）
    pub classes: Vec<String>,
    pub rows: Vec<JudgementRow>,
    pub failures: Vec<JudgementFailure>,
}

impl JudgementReport {
    pub fn confident_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.status == JudgementStatus::Confident)
            .count()
    }

    /// 写出 CSV（带表头）
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), RecordError> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        let mut header = vec![
            "sample_file".to_string(),
            "predicted".to_string(),
            "percentage".to_string(),
            "status".to_string(),
            "fingerprints".to_string(),
        ];
        header.extend(self.classes.iter().map(|c| format!("p_{}", c)));
        csv_writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![
                row.sample_file.clone(),
                row.predicted.clone().unwrap_or_default(),
                row.percentage.to_string(),
                row.status.to_string(),
                row.fingerprints.to_string(),
            ];
            record.extend(row.probabilities.iter().map(|p| format!("{:.4}", p)));
            csv_writer.write_record(&record)?;
        }
        csv_writer
            .flush()
            .map_err(|e| RecordError::Csv(e.to_string()))?;
        Ok(())
    }
}

/// 批量判定器
pub struct Judge<'a> {
    model: &'a LoadedModel,
    /// 判定阈值（0.0 ~ 1.0）
    threshold: f64,
}

impl<'a> Judge<'a> {
    pub fn new(model: &'a LoadedModel, threshold: f64) -> Self {
        Judge { model, threshold }
    }

    /// 判定单个聚合结果
    pub fn status_of(&self, result: &AggregateResult) -> JudgementStatus {
        let confident = match result {
            AggregateResult::Room(r) => r.is_confident(self.threshold),
            AggregateResult::Percentage(p) => p.raw_mean / 100.0 >= self.threshold,
        };
        if confident {
            JudgementStatus::Confident
        } else {
            JudgementStatus::Uncertain
        }
    }

    /// 判定单个样本文件
    pub fn judge_file(&self, root: &Path, path: &Path) -> Result<JudgementRow, String> {
        let observations = read_record_file(path, None).map_err(|e| e.to_string())?;
        let result = self
            .model
            .predict_observations(&observations)
            .map_err(|e| e.to_string())?;

        let sample_file = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        if let AggregateResult::Room(r) = &result {
            tracing::debug!(file = %sample_file, "{}", r.detailed_description());
        }
        let (predicted, probabilities) = match &result {
            AggregateResult::Room(r) => (
                Some(r.room_id.clone()),
                r.probabilities.iter().map(|p| p.probability).collect(),
            ),
            AggregateResult::Percentage(_) => (None, Vec::new()),
        };

        Ok(JudgementRow {
            sample_file,
            predicted,
            percentage: result.percentage(),
            status: self.status_of(&result),
            probabilities,
            fingerprints: result.samples(),
        })
    }

    /// 判定目录下所有匹配的样本文件
    pub fn judge_dir(&self, root: &Path, filter: &Regex) -> Result<JudgementReport, CorpusError> {
        let mut report = JudgementReport {
            classes: self
                .model
                .artifacts()
                .model
                .classes()
                .map(|c| c.to_vec())
                .unwrap_or_default(),
            ..JudgementReport::default()
        };

        for path in list_record_files(root, filter)? {
            match self.judge_file(root, &path) {
                Ok(row) => {
                    tracing::debug!(
                        file = %row.sample_file,
                        percentage = row.percentage,
                        status = %row.status,
                        "样本判定完成"
                    );
                    report.rows.push(row);
                }
                Err(reason) => {
                    tracing::warn!(file = %path.display(), reason = %reason, "样本判定失败，跳过");
                    report.failures.push(JudgementFailure { path, reason });
                }
            }
        }

        tracing::info!(
            samples = report.rows.len(),
            confident = report.confident_count(),
            failures = report.failures.len(),
            "批量判定完成"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(JudgementStatus::Confident.to_string(), "正解");
        assert_eq!(JudgementStatus::Uncertain.to_string(), "不明");
    }

    #[test]
    fn test_csv_layout() {
        let report = JudgementReport {
            classes: vec!["101".to_string(), "102".to_string()],
            rows: vec![JudgementRow {
                sample_file: "a.csv".to_string(),
                predicted: Some("101".to_string()),
                percentage: 85,
                status: JudgementStatus::Confident,
                probabilities: vec![0.85, 0.15],
                fingerprints: 3,
            }],
            failures: Vec::new(),
        };
        let mut buf = Vec::new();
        report.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("sample_file,predicted,percentage,status,fingerprints,p_101,p_102")
        );
        assert_eq!(lines.next(), Some("a.csv,101,85,正解,3,0.8500,0.1500"));
    }
}
