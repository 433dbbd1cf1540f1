/// 模型选择
///
/// - `train_test_split`：按类别分层的训练/留出划分（固定种子可复现）
/// - `ModelSelector`：给定候选配置与评分函数，返回最优的已训练模型
///   - `GridSearch`：在训练集内部再分层划分验证集，逐个候选评分后用全部训练样本重训最优者
///   - `FirstCandidate`：关闭模型选择时直接使用第一个候选

use crate::error::TrainError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::fmt::Display;

/// 样本下标划分
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// 训练/留出划分
///
/// `strata` 为每个样本的类别下标时按类别分层；每个类别至少保留一个训练样本，
/// 留出集至少一个样本。返回的下标各自升序。
pub fn train_test_split(
    n_samples: usize,
    strata: Option<&[usize]>,
    test_ratio: f64,
    seed: u64,
) -> Result<Split, TrainError> {
    if n_samples < 2 {
        return Err(TrainError::InsufficientSamples {
            samples: n_samples,
            required: 2,
            counts: BTreeMap::new(),
        });
    }
    if !(test_ratio > 0.0 && test_ratio < 1.0) {
        return Err(TrainError::fit(format!("留出比例必须在 (0, 1) 内：{}", test_ratio)));
    }

    // 分组：无分层时全部样本视为同一组
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..n_samples {
        let key = strata.map_or(0, |s| s[idx]);
        groups.entry(key).or_default().push(idx);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_samples);
    let mut test = Vec::new();
    let mut largest: Option<Vec<usize>> = None;

    for (_, mut members) in groups {
        members.shuffle(&mut rng);
        let wanted = (members.len() as f64 * test_ratio).round() as usize;
        let n_test = wanted.min(members.len() - 1);
        test.extend_from_slice(&members[..n_test]);
        let rest = members[n_test..].to_vec();
        if largest.as_ref().is_none_or(|l| rest.len() > l.len()) {
            largest = Some(rest.clone());
        }
        train.extend(rest);
    }

    // 小样本时四舍五入可能让留出集为空，从最大的组里借一个
    if test.is_empty() {
        match largest {
            Some(rest) if rest.len() >= 2 => {
                let moved = rest[0];
                train.retain(|&i| i != moved);
                test.push(moved);
            }
            _ => {
                return Err(TrainError::InsufficientSamples {
                    samples: n_samples,
                    required: n_samples + 1,
                    counts: BTreeMap::new(),
                });
            }
        }
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok(Split { train, test })
}

/// 一次模型选择的结果
#[derive(Debug)]
pub struct Selection<C, M> {
    /// 最终模型（已在全部给定样本上训练）
    pub model: M,
    /// 选中的候选配置
    pub candidate: C,
    /// 各候选的验证分数；拟合失败的候选为 None
    pub scores: Vec<Option<f64>>,
}

/// 模型选择接口
pub trait ModelSelector {
    /// 在 `indices` 指定的样本上选择并训练模型
    ///
    /// - `fit(candidate, sample_indices)` 训练一个模型
    /// - `score(model, sample_indices)` 评分，越大越好
    fn select<C, M, F, S>(
        &self,
        candidates: &[C],
        indices: &[usize],
        strata: Option<&[usize]>,
        fit: F,
        score: S,
    ) -> Result<Selection<C, M>, TrainError>
    where
        C: Clone + Display,
        F: FnMut(&C, &[usize]) -> Result<M, TrainError>,
        S: FnMut(&M, &[usize]) -> f64;
}

/// 不做选择，直接使用第一个候选
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstCandidate;

impl ModelSelector for FirstCandidate {
    fn select<C, M, F, S>(
        &self,
        candidates: &[C],
        indices: &[usize],
        _strata: Option<&[usize]>,
        mut fit: F,
        _score: S,
    ) -> Result<Selection<C, M>, TrainError>
    where
        C: Clone + Display,
        F: FnMut(&C, &[usize]) -> Result<M, TrainError>,
        S: FnMut(&M, &[usize]) -> f64,
    {
        let candidate = candidates
            .first()
            .ok_or_else(|| TrainError::fit("候选配置列表为空"))?;
        tracing::info!(candidate = %candidate, "模型选择已关闭，使用第一个候选");
        let model = fit(candidate, indices)?;
        Ok(Selection {
            model,
            candidate: candidate.clone(),
            scores: vec![None; candidates.len()],
        })
    }
}

/// 网格搜索
#[derive(Clone, Copy, Debug)]
pub struct GridSearch {
    /// 内部验证集比例
    pub validation_ratio: f64,
    pub seed: u64,
}

impl GridSearch {
    pub fn new(validation_ratio: f64, seed: u64) -> Self {
        GridSearch {
            validation_ratio,
            seed,
        }
    }
}

impl Default for GridSearch {
    fn default() -> Self {
        Self::new(0.2, 42)
    }
}

impl ModelSelector for GridSearch {
    fn select<C, M, F, S>(
        &self,
        candidates: &[C],
        indices: &[usize],
        strata: Option<&[usize]>,
        mut fit: F,
        mut score: S,
    ) -> Result<Selection<C, M>, TrainError>
    where
        C: Clone + Display,
        F: FnMut(&C, &[usize]) -> Result<M, TrainError>,
        S: FnMut(&M, &[usize]) -> f64,
    {
        if candidates.is_empty() {
            return Err(TrainError::fit("候选配置列表为空"));
        }
        if candidates.len() == 1 {
            return FirstCandidate.select(candidates, indices, strata, fit, score);
        }

        // 内部划分作用于 indices 的位置，再映射回样本下标
        let local_strata: Option<Vec<usize>> =
            strata.map(|s| indices.iter().map(|&i| s[i]).collect());
        let inner = match train_test_split(
            indices.len(),
            local_strata.as_deref(),
            self.validation_ratio,
            self.seed,
        ) {
            Ok(split) => split,
            Err(e) => {
                tracing::warn!(error = %e, "样本过少无法划分验证集，退回第一个候选");
                return FirstCandidate.select(candidates, indices, strata, fit, score);
            }
        };
        let inner_train: Vec<usize> = inner.train.iter().map(|&p| indices[p]).collect();
        let inner_val: Vec<usize> = inner.test.iter().map(|&p| indices[p]).collect();

        let mut scores = Vec::with_capacity(candidates.len());
        let mut best: Option<(usize, f64)> = None;
        for (pos, candidate) in candidates.iter().enumerate() {
            match fit(candidate, &inner_train) {
                Ok(model) => {
                    let s = score(&model, &inner_val);
                    tracing::debug!(candidate = %candidate, score = s, "候选评分");
                    if best.is_none_or(|(_, b)| s > b) {
                        best = Some((pos, s));
                    }
                    scores.push(Some(s));
                }
                Err(e) => {
                    tracing::warn!(candidate = %candidate, error = %e, "候选拟合失败，跳过");
                    scores.push(None);
                }
            }
        }

        let (best_pos, best_score) =
            best.ok_or_else(|| TrainError::fit("所有候选配置都拟合失败"))?;
        let candidate = candidates[best_pos].clone();
        tracing::info!(candidate = %candidate, score = best_score, "网格搜索完成");

        let model = fit(&candidate, indices)?;
        Ok(Selection {
            model,
            candidate,
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_is_stratified_and_reproducible() {
        let strata: Vec<usize> = (0..20).map(|i| i % 2).collect();
        let a = train_test_split(20, Some(&strata), 0.2, 42).unwrap();
        let b = train_test_split(20, Some(&strata), 0.2, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.test.len(), 4);
        assert_eq!(a.test.iter().filter(|&&i| strata[i] == 0).count(), 2);
        assert_eq!(a.train.len() + a.test.len(), 20);
    }

    #[test]
    fn test_split_keeps_one_training_sample_per_class() {
        let strata = vec![0, 1, 1, 1, 1];
        let split = train_test_split(5, Some(&strata), 0.5, 7).unwrap();
        assert!(split.train.contains(&0));
        assert!(!split.test.is_empty());
    }

    #[test]
    fn test_split_needs_two_samples() {
        assert!(train_test_split(1, None, 0.2, 0).is_err());
        let split = train_test_split(2, None, 0.2, 0).unwrap();
        assert_eq!(split.test.len(), 1);
    }

    #[test]
    fn test_grid_search_picks_best_and_refits() {
        let candidates = vec![1usize, 5, 3];
        let indices: Vec<usize> = (0..10).collect();
        let mut refit_sizes = Vec::new();
        let selection = GridSearch::default()
            .select(
                &candidates,
                &indices,
                None,
                |c: &usize, idx: &[usize]| {
                    refit_sizes.push(idx.len());
                    Ok(*c)
                },
                |m: &usize, _| *m as f64,
            )
            .unwrap();
        assert_eq!(selection.candidate, 5);
        assert_eq!(selection.model, 5);
        assert_eq!(refit_sizes.last(), Some(&10));
    }

    #[test]
    fn test_grid_search_skips_failing_candidates() {
        let candidates = vec![0usize, 2];
        let indices: Vec<usize> = (0..10).collect();
        let selection = GridSearch::default()
            .select(
                &candidates,
                &indices,
                None,
                |c: &usize, _: &[usize]| {
                    if *c == 0 {
                        Err(TrainError::fit("bad"))
                    } else {
                        Ok(*c)
                    }
                },
                |_: &usize, _| 1.0,
            )
            .unwrap();
        assert_eq!(selection.candidate, 2);
        assert_eq!(selection.scores, vec![None, Some(1.0)]);
    }
}
