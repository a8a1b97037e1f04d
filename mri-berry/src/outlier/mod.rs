//! 无监督离群扫描检测.
//!
//! 每个特征类型独立拟合一个检测模型, 按配置的离群比例取异常分数最高的
//! 受试者, 最后以 **并集** 策略汇总: 任一特征类型标记即进入报告,
//! 报告内的原因按特征类型请求顺序排列.
//!
//! 检测在会话开始前恰好运行一次, 评分过程中从不重算.

use std::cmp::Reverse;
use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::features::FeatureMatrix;
use crate::SubjectId;

mod forest;
mod lof;

/// 离群检测方法.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierMethod {
    /// isolation forest. 随机划分树集成, 路径越短越异常.
    IsolationForest,

    /// 局部密度. k 近邻平均距离越大越异常.
    LocalDensity,
}

impl OutlierMethod {
    /// 按名称解析方法. 未知名称返回 `None`.
    pub fn from_name(name: &str) -> Option<OutlierMethod> {
        match name {
            "isolation_forest" => Some(Self::IsolationForest),
            "local_density" | "lof" => Some(Self::LocalDensity),
            _ => None,
        }
    }

    /// 方法的规范名称.
    pub fn name(&self) -> &'static str {
        match self {
            Self::IsolationForest => "isolation_forest",
            Self::LocalDensity => "local_density",
        }
    }
}

/// 离群检测参数错误.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectError {
    /// 离群比例超出 `[1/n, (n-1)/n]`. 参数为比例和该特征类型的有效受试者数 n.
    ///
    /// 超出该界时无监督污染估计无定义: n 个样本中无法标记少于 1 个
    /// 或多于 n-1 个.
    InvalidFraction(f64, usize),
}

/// 离群报告: 受试者 -> 标记它的特征类型序列 (按请求顺序).
///
/// 空报告是合法的 (无离群, 或检测被禁用). 检测完成后该结构只读.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlierReport {
    flags: HashMap<SubjectId, Vec<String>>,
}

impl OutlierReport {
    /// 标记 `id` 的特征类型序列. 未被标记时为空.
    #[inline]
    pub fn reasons(&self, id: &str) -> &[String] {
        self.flags.get(id).map_or(&[], Vec::as_slice)
    }

    /// `id` 是否被任一特征类型标记?
    #[inline]
    pub fn is_flagged(&self, id: &str) -> bool {
        self.flags.contains_key(id)
    }

    /// 被标记的受试者个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// 报告是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// 供展示层使用的预警文案, 按特征类型请求顺序.
    pub fn alert_messages(&self, id: &str) -> Vec<String> {
        self.reasons(id)
            .iter()
            .map(|ty| format!("flagged by {ty} features"))
            .collect()
    }
}

/// 对按请求顺序排列的特征矩阵运行离群检测.
///
/// `enabled == false` 时立即返回空报告, 不做任何计算.
/// 每个特征类型的有效受试者数 n 必须满足 `1/n <= fraction <= (n-1)/n`,
/// 否则返回 [`DetectError::InvalidFraction`]. 空矩阵 (所有受试者提取失败)
/// 不参与检测, 只记录 warning.
///
/// 给定相同的 `seed`, 检测结果跨运行完全一致.
pub fn detect(
    matrices: &[(String, FeatureMatrix)],
    method: OutlierMethod,
    fraction: f64,
    enabled: bool,
    seed: u64,
) -> Result<OutlierReport, DetectError> {
    if !enabled {
        return Ok(OutlierReport::default());
    }

    let mut per_type = Vec::with_capacity(matrices.len());
    for (pos, (ty, matrix)) in matrices.iter().enumerate() {
        if matrix.is_empty() {
            log::warn!("特征类型 `{ty}` 没有有效受试者, 跳过检测");
            continue;
        }
        let n = matrix.len();
        let (lo, hi) = (1.0 / n as f64, (n - 1) as f64 / n as f64);
        if fraction < lo || fraction > hi {
            return Err(DetectError::InvalidFraction(fraction, n));
        }

        // 每个特征类型使用独立但确定的种子.
        let type_seed = seed.wrapping_add(pos as u64);
        let scores = match method {
            OutlierMethod::IsolationForest => forest::anomaly_scores(matrix.data(), type_seed),
            OutlierMethod::LocalDensity => lof::anomaly_scores(matrix.data()),
        };

        let num_flagged = (fraction * n as f64).ceil() as usize;
        let flagged: Vec<SubjectId> = top_k(&scores, num_flagged)
            .into_iter()
            .map(|row| matrix.subject_ids()[row].clone())
            .collect();
        log::info!(
            "特征类型 `{ty}`: {n} 个有效受试者, 标记 {} 个离群",
            flagged.len()
        );
        per_type.push((ty.clone(), flagged));
    }

    Ok(assemble_report(&per_type))
}

/// 按并集策略将逐特征类型的标记汇总为报告.
///
/// 报告内每个受试者的原因顺序与 `per_type` 的类型顺序一致.
fn assemble_report(per_type: &[(String, Vec<SubjectId>)]) -> OutlierReport {
    let mut report = OutlierReport::default();
    for (ty, flagged) in per_type {
        for id in flagged {
            report.flags.entry(id.clone()).or_default().push(ty.clone());
        }
    }
    report
}

/// 异常分数最高的 `k` 行索引. 分数相同时取行号小者, 保证确定性.
fn top_k(scores: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by_key(|&i| (Reverse(OrderedFloat(scores[i])), i));
    order.truncate(k);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    /// n 个聚团样本 + 指定行的远离样本.
    fn planted(n: usize, outlier_rows: &[usize]) -> FeatureMatrix {
        let rows = (0..n)
            .map(|i| {
                let base = if outlier_rows.contains(&i) { 100.0 } else { 0.0 };
                (
                    format!("sub{i:03}"),
                    vec![base + i as f64 * 0.01, base - i as f64 * 0.01],
                )
            })
            .collect();
        FeatureMatrix::from_rows(rows)
    }

    #[test]
    fn test_disabled_returns_empty_report() {
        let ms = vec![("cortical".to_owned(), planted(10, &[3]))];
        let report = detect(&ms, OutlierMethod::IsolationForest, 5.0, false, 0).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_fraction_bounds_enforced() {
        let ms = vec![("cortical".to_owned(), planted(10, &[3]))];
        for bad in [0.05, 0.95] {
            assert_eq!(
                detect(&ms, OutlierMethod::LocalDensity, bad, true, 0),
                Err(DetectError::InvalidFraction(bad, 10))
            );
        }
        // 边界值本身合法.
        assert!(detect(&ms, OutlierMethod::LocalDensity, 0.1, true, 0).is_ok());
        assert!(detect(&ms, OutlierMethod::LocalDensity, 0.9, true, 0).is_ok());
    }

    #[test]
    fn test_union_policy_and_reason_order() {
        // 10 个受试者; cortical 标记 {3, 7}, subcortical 标记 {7}.
        let per_type = vec![
            (
                "cortical".to_owned(),
                vec!["sub003".to_owned(), "sub007".to_owned()],
            ),
            ("subcortical".to_owned(), vec!["sub007".to_owned()]),
        ];
        let report = assemble_report(&per_type);

        assert_eq!(report.len(), 2);
        assert_eq!(report.reasons("sub003"), &["cortical".to_owned()]);
        assert_eq!(
            report.reasons("sub007"),
            &["cortical".to_owned(), "subcortical".to_owned()]
        );
        assert!(!report.is_flagged("sub000"));
        assert_eq!(
            report.alert_messages("sub003"),
            vec!["flagged by cortical features".to_owned()]
        );
    }

    #[test]
    fn test_both_methods_find_planted_outliers() {
        let ms = vec![("cortical".to_owned(), planted(10, &[3, 7]))];
        for method in [OutlierMethod::IsolationForest, OutlierMethod::LocalDensity] {
            let report = detect(&ms, method, 0.2, true, 42).unwrap();
            assert_eq!(report.len(), 2, "method = {}", method.name());
            assert!(report.is_flagged("sub003"));
            assert!(report.is_flagged("sub007"));
        }
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let ms = vec![
            ("cortical".to_owned(), planted(16, &[2])),
            ("subcortical".to_owned(), planted(16, &[9])),
        ];
        let a = detect(&ms, OutlierMethod::IsolationForest, 0.25, true, 7).unwrap();
        let b = detect(&ms, OutlierMethod::IsolationForest, 0.25, true, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flag_count_honours_fraction() {
        let ms = vec![("cortical".to_owned(), planted(10, &[0]))];
        let report = detect(&ms, OutlierMethod::LocalDensity, 0.2, true, 0).unwrap();
        // ceil(0.2 * 10) = 2.
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn test_method_names_round_trip() {
        for m in [OutlierMethod::IsolationForest, OutlierMethod::LocalDensity] {
            assert_eq!(OutlierMethod::from_name(m.name()), Some(m));
        }
        assert_eq!(OutlierMethod::from_name("dbscan"), None);
    }
}
