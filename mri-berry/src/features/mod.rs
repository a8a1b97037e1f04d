//! 受试者特征提取与按类型特征矩阵.
//!
//! 特征提取本体是注入能力 ([`FeatureSource`]): 引擎不关心数值来自何处
//! (表面统计文件、体数据直算等), 只要求每个受试者对每个特征类型产出
//! 定长的数值向量. 提取结果只在一次运行内做内存缓存, 从不落盘.

use std::collections::HashMap;

use ndarray::Array2;

use crate::{MriScan, Subject, SubjectId, VolumeSource};

/// 特征提取运行时错误.
#[derive(Debug, Clone)]
pub enum FeatureError {
    /// 某受试者提取失败. 参数为受试者标识符和失败原因.
    ///
    /// 提取失败从不静默回填默认值: 该受试者会被从对应特征类型的
    /// 矩阵中剔除, 且永远不会被标记为离群 (信号缺失本身不是信号).
    Extraction(SubjectId, String),

    /// 请求了没有对应提取源的特征类型.
    UnknownType(String),
}

/// 特征提取能力. 每个实现对应一种特征类型.
pub trait FeatureSource {
    /// 本源产出的特征类型名 (如 `"cortical"`).
    fn feature_type(&self) -> &str;

    /// 提取 `subject` 的特征向量. 同一源的所有成功结果长度必须一致.
    fn extract(&self, subject: &Subject) -> Result<Vec<f64>, FeatureError>;
}

/// 一个特征类型下, 所有提取成功受试者的 (受试者 × 特征) 矩阵.
///
/// 行顺序与受试者列表顺序一致 (剔除失败者之后).
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    subjects: Vec<SubjectId>,
    data: Array2<f64>,
}

impl FeatureMatrix {
    /// 由对齐的 (受试者, 特征向量) 行构建矩阵.
    ///
    /// 所有行长度必须一致, 否则程序 panic (提取源契约被破坏).
    pub fn from_rows(rows: Vec<(SubjectId, Vec<f64>)>) -> FeatureMatrix {
        let width = rows.first().map_or(0, |(_, v)| v.len());
        let mut subjects = Vec::with_capacity(rows.len());
        let mut flat = Vec::with_capacity(rows.len() * width);
        for (id, row) in rows {
            assert_eq!(row.len(), width, "特征向量长度不一致");
            subjects.push(id);
            flat.extend(row);
        }
        let data = Array2::from_shape_vec((subjects.len(), width), flat).unwrap();
        FeatureMatrix { subjects, data }
    }

    /// 矩阵中的受试者标识符, 按行顺序.
    #[inline]
    pub fn subject_ids(&self) -> &[SubjectId] {
        &self.subjects
    }

    /// 底层 (受试者 × 特征) 数据.
    #[inline]
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// 有效受试者 (行) 个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// 矩阵是否为空 (所有受试者都提取失败)?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// 特征仓库: 持有全部注入的提取源, 并做一次运行内的结果缓存.
pub struct FeatureStore {
    sources: Vec<Box<dyn FeatureSource>>,
    cache: HashMap<SubjectId, HashMap<String, Vec<f64>>>,
}

impl FeatureStore {
    /// 以给定提取源集合创建仓库.
    ///
    /// 同名特征类型只允许出现一次, 否则程序 panic.
    pub fn new(sources: Vec<Box<dyn FeatureSource>>) -> Self {
        for (i, a) in sources.iter().enumerate() {
            for b in sources.iter().skip(i + 1) {
                assert_ne!(a.feature_type(), b.feature_type(), "特征类型重复注册");
            }
        }
        Self {
            sources,
            cache: HashMap::new(),
        }
    }

    /// 提取 `subject` 在 `feature_type` 下的特征向量, 命中缓存时不重算.
    pub fn extract(
        &mut self,
        subject: &Subject,
        feature_type: &str,
    ) -> Result<Vec<f64>, FeatureError> {
        if let Some(hit) = self
            .cache
            .get(subject.id())
            .and_then(|per_type| per_type.get(feature_type))
        {
            return Ok(hit.clone());
        }

        let source = self
            .sources
            .iter()
            .find(|s| s.feature_type() == feature_type)
            .ok_or_else(|| FeatureError::UnknownType(feature_type.to_owned()))?;

        let row = source.extract(subject)?;
        self.cache
            .entry(subject.id().to_owned())
            .or_default()
            .insert(feature_type.to_owned(), row.clone());
        Ok(row)
    }

    /// 为 `feature_type` 组装 (受试者 × 特征) 矩阵.
    ///
    /// 提取失败的受试者被剔除并以 warning 记录, 不会中止其余受试者;
    /// 只有特征类型本身未注册才返回错误.
    pub fn matrix(
        &mut self,
        subjects: &[Subject],
        feature_type: &str,
    ) -> Result<FeatureMatrix, FeatureError> {
        let mut rows = Vec::with_capacity(subjects.len());
        for subject in subjects {
            match self.extract(subject, feature_type) {
                Ok(row) => rows.push((subject.id().to_owned(), row)),
                Err(FeatureError::Extraction(id, reason)) => {
                    log::warn!("特征提取失败, 剔除受试者 `{id}` ({feature_type}): {reason}");
                }
                Err(e @ FeatureError::UnknownType(_)) => return Err(e),
            }
        }
        Ok(FeatureMatrix::from_rows(rows))
    }

    /// 按请求顺序为每个特征类型组装矩阵.
    pub fn matrices(
        &mut self,
        subjects: &[Subject],
        feature_types: &[String],
    ) -> Result<Vec<(String, FeatureMatrix)>, FeatureError> {
        feature_types
            .iter()
            .map(|ty| Ok((ty.clone(), self.matrix(subjects, ty)?)))
            .collect()
    }
}

/// 基于体数据前景强度统计的默认特征源.
///
/// 当外部形态学统计不可用时, 引擎仍可用它拿到一个可用的离群信号.
pub struct IntensityStatSource<V: VolumeSource> {
    volumes: V,
}

impl<V: VolumeSource> IntensityStatSource<V> {
    /// 以给定体数据加载器创建特征源.
    pub fn new(volumes: V) -> Self {
        Self { volumes }
    }
}

/// [`IntensityStatSource`] 产出的特征向量长度.
pub const INTENSITY_STAT_LEN: usize = 8;

impl<V: VolumeSource> FeatureSource for IntensityStatSource<V> {
    fn feature_type(&self) -> &str {
        "intensity"
    }

    fn extract(&self, subject: &Subject) -> Result<Vec<f64>, FeatureError> {
        let scan = self
            .volumes
            .load(subject)
            .map_err(|e| FeatureError::Extraction(subject.id().to_owned(), format!("{e:?}")))?;
        intensity_stats(&scan)
            .ok_or_else(|| FeatureError::Extraction(subject.id().to_owned(), "全背景体数据".into()))
    }
}

/// 前景体素强度统计: 均值, 标准差, p10/p25/p50/p75/p90 分位数, 前景占比.
fn intensity_stats(scan: &MriScan) -> Option<Vec<f64>> {
    let mut fg: Vec<f64> = scan
        .data()
        .iter()
        .filter(|v| v.is_finite() && **v != 0.0)
        .map(|&v| v as f64)
        .collect();
    if fg.is_empty() {
        return None;
    }
    fg.sort_unstable_by(f64::total_cmp);

    let n = fg.len() as f64;
    let mean = fg.iter().sum::<f64>() / n;
    let var = fg.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let pct = |q: f64| fg[((q * (fg.len() - 1) as f64).round() as usize).min(fg.len() - 1)];

    let stats = vec![
        mean,
        var.sqrt(),
        pct(0.10),
        pct(0.25),
        pct(0.50),
        pct(0.75),
        pct(0.90),
        n / scan.data().len() as f64,
    ];
    debug_assert_eq!(stats.len(), INTENSITY_STAT_LEN);
    Some(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// 可编程测试源: 按受试者标识符决定成败, 并统计实际提取次数.
    struct ScriptedSource {
        name: &'static str,
        fail_ids: Vec<&'static str>,
        calls: Rc<Cell<u32>>,
    }

    impl FeatureSource for ScriptedSource {
        fn feature_type(&self) -> &str {
            self.name
        }

        fn extract(&self, subject: &Subject) -> Result<Vec<f64>, FeatureError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_ids.contains(&subject.id()) {
                return Err(FeatureError::Extraction(
                    subject.id().to_owned(),
                    "scripted failure".into(),
                ));
            }
            Ok(vec![subject.id().len() as f64, 1.0])
        }
    }

    fn subjects(ids: &[&str]) -> Vec<Subject> {
        ids.iter().map(|id| Subject::new(*id, "/dev/null")).collect()
    }

    #[test]
    fn test_failed_subject_excluded_not_fatal() {
        let calls = Rc::new(Cell::new(0));
        let mut store = FeatureStore::new(vec![Box::new(ScriptedSource {
            name: "cortical",
            fail_ids: vec!["bad"],
            calls: calls.clone(),
        })]);

        let all = subjects(&["a", "bad", "c"]);
        let m = store.matrix(&all, "cortical").unwrap();
        assert_eq!(m.subject_ids(), &["a".to_owned(), "c".to_owned()]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.data().dim(), (2, 2));
    }

    #[test]
    fn test_cache_prevents_recomputation() {
        let calls = Rc::new(Cell::new(0));
        let mut store = FeatureStore::new(vec![Box::new(ScriptedSource {
            name: "cortical",
            fail_ids: vec![],
            calls: calls.clone(),
        })]);

        let all = subjects(&["a", "b"]);
        store.matrix(&all, "cortical").unwrap();
        store.matrix(&all, "cortical").unwrap();
        // 第二次组装全部命中缓存.
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let mut store = FeatureStore::new(vec![]);
        let all = subjects(&["a"]);
        assert!(matches!(
            store.matrix(&all, "no-such-type"),
            Err(FeatureError::UnknownType(_))
        ));
    }

    #[test]
    fn test_intensity_stats_shape_and_order() {
        let scan = crate::data::tests::phantom((12, 12, 12), 100.0);
        let stats = intensity_stats(&scan).unwrap();
        assert_eq!(stats.len(), INTENSITY_STAT_LEN);
        // 同值前景: 均值 = 各分位数, 标准差为 0.
        assert_eq!(stats[0], 100.0);
        assert_eq!(stats[1], 0.0);
        assert!(stats[2..7].iter().all(|&p| p == 100.0));
        assert!(stats[7] > 0.0 && stats[7] < 1.0);

        let empty = crate::MriScan::from_parts(Default::default(), ndarray::Array3::zeros([4, 4, 4]));
        assert!(intensity_stats(&empty).is_none());
    }

    #[test]
    fn test_matrices_preserve_request_order() {
        let calls = Rc::new(Cell::new(0));
        let mut store = FeatureStore::new(vec![
            Box::new(ScriptedSource {
                name: "cortical",
                fail_ids: vec![],
                calls: calls.clone(),
            }),
            Box::new(ScriptedSource {
                name: "subcortical",
                fail_ids: vec![],
                calls: calls.clone(),
            }),
        ]);

        let all = subjects(&["a"]);
        let types = vec!["subcortical".to_owned(), "cortical".to_owned()];
        let ms = store.matrices(&all, &types).unwrap();
        assert_eq!(ms[0].0, "subcortical");
        assert_eq!(ms[1].0, "cortical");
    }
}
