/// 记录文件读写与训练语料装载
///
/// 记录文件为无表头的三列 CSV：`timestamp, identifier, signal_strength`。
/// 语料根目录下每个子目录是一个标签，目录内匹配过滤规则的文件都属于该标签。

use crate::algorithms::Observation;
use crate::error::{CorpusError, RecordError};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

// ============================================================================
// 记录编解码
// ============================================================================

/// 解析记录流
///
/// 任一行格式错误即整体失败，错误中带行号
pub fn parse_records<R: Read>(reader: R, label: Option<&str>) -> Result<Vec<Observation>, RecordError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut observations = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());

        if record.len() != 3 {
            return Err(RecordError::ColumnCount {
                line,
                found: record.len(),
            });
        }

        let timestamp: i64 = record[0].parse().map_err(|_| RecordError::InvalidField {
            line,
            field: "timestamp",
            value: record[0].to_string(),
        })?;
        let identifier = &record[1];
        if identifier.is_empty() {
            return Err(RecordError::EmptyIdentifier { line });
        }
        let signal_strength: i16 = record[2].parse().map_err(|_| RecordError::InvalidField {
            line,
            field: "signal_strength",
            value: record[2].to_string(),
        })?;

        let mut obs = Observation::new(timestamp, identifier, signal_strength);
        if let Some(label) = label {
            obs = obs.with_label(label);
        }
        observations.push(obs);
    }
    Ok(observations)
}

/// 写出记录（无表头三列）
pub fn write_records<W: Write>(writer: W, observations: &[Observation]) -> Result<(), RecordError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    for obs in observations {
        csv_writer.write_record([
            obs.timestamp.to_string(),
            obs.identifier.clone(),
            obs.signal_strength.to_string(),
        ])?;
    }
    csv_writer
        .flush()
        .map_err(|e| RecordError::Csv(e.to_string()))?;
    Ok(())
}

/// 读取单个记录文件
pub fn read_record_file(path: &Path, label: Option<&str>) -> Result<Vec<Observation>, CorpusError> {
    let file = std::fs::File::open(path).map_err(|source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_records(std::io::BufReader::new(file), label).map_err(|source| CorpusError::MalformedFile {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// 语料装载
// ============================================================================

/// 被跳过的文件
#[derive(Clone, Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// 装载好的带标签语料
#[derive(Clone, Debug, Default)]
pub struct LabeledCorpus {
    /// 按标签目录、文件名的字典序拼接的观测
    pub observations: Vec<Observation>,
    pub files_loaded: usize,
    pub skipped: Vec<SkippedFile>,
    /// 每个标签的观测条数
    pub label_counts: BTreeMap<String, usize>,
}

impl LabeledCorpus {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// 语料装载器
#[derive(Clone, Debug)]
pub struct CorpusLoader {
    filter: Regex,
    labels: Option<Vec<String>>,
}

impl CorpusLoader {
    /// 使用文件名过滤正则创建
    pub fn new(file_pattern: &str) -> Result<Self, CorpusError> {
        Ok(CorpusLoader {
            filter: Regex::new(file_pattern)?,
            labels: None,
        })
    }

    /// 设置标签白名单
    pub fn with_labels(mut self, labels: Option<Vec<String>>) -> Self {
        self.labels = labels;
        self
    }

    fn label_allowed(&self, label: &str) -> bool {
        self.labels
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|l| l == label))
    }

    /// 装载语料
    ///
    /// 根目录不存在或无法读取时失败；单个文件出错时记录并跳过
    pub fn load(&self, root: &Path) -> Result<LabeledCorpus, CorpusError> {
        if !root.is_dir() {
            return Err(CorpusError::RootNotFound(root.to_path_buf()));
        }

        let mut corpus = LabeledCorpus::default();
        for (label, label_dir) in sorted_entries(root)?
            .into_iter()
            .filter(|(_, path)| path.is_dir())
        {
            if !self.label_allowed(&label) {
                tracing::debug!(label = %label, "标签不在白名单中，跳过");
                continue;
            }

            let files = match sorted_entries(&label_dir) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(error = %e, "标签目录读取失败，跳过");
                    corpus.skipped.push(SkippedFile {
                        path: label_dir,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for (name, path) in files {
                if !path.is_file() || !self.filter.is_match(&name) {
                    continue;
                }
                match read_record_file(&path, Some(&label)) {
                    Ok(observations) => {
                        tracing::debug!(
                            label = %label,
                            file = %path.display(),
                            rows = observations.len(),
                            "记录文件已装载"
                        );
                        *corpus.label_counts.entry(label.clone()).or_insert(0) += observations.len();
                        corpus.observations.extend(observations);
                        corpus.files_loaded += 1;
                    }
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(error = %e, "记录文件无法解析，跳过");
                        corpus.skipped.push(SkippedFile {
                            path,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(
            files = corpus.files_loaded,
            skipped = corpus.skipped.len(),
            observations = corpus.observations.len(),
            "语料装载完成"
        );
        Ok(corpus)
    }
}

/// 目录项按名称排序；名称不是 UTF-8 的项被忽略
fn sorted_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>, CorpusError> {
    let io_err = |source: std::io::Error| CorpusError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if let Ok(name) = entry.file_name().into_string() {
            entries.push((name, entry.path()));
        }
    }
    entries.sort();
    Ok(entries)
}

/// 递归列出目录下匹配过滤规则的文件（按路径排序）
pub fn list_record_files(root: &Path, filter: &Regex) -> Result<Vec<PathBuf>, CorpusError> {
    if !root.is_dir() {
        return Err(CorpusError::RootNotFound(root.to_path_buf()));
    }
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for (name, path) in sorted_entries(&dir)? {
            if path.is_dir() {
                pending.push(path);
            } else if filter.is_match(&name) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
