//! 确定性切片布局选取.
//!
//! 从 3D 体数据形状出发, 按请求的视图轴顺序, 在每个轴的中心区域内等距选取
//! 整数切片位置. 布局只由 (形状, 视图, 每视图切片数) 决定, 跨运行、跨受试者
//! 稳定, 便于评审者建立稳定的视觉预期.

use crate::consts::{BOUNDARY_EXCLUDE_RATIO, NUM_VALID_VIEWS};
use crate::Idx3d;

/// 布局参数错误.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// 视图列表为空.
    NoViews,

    /// 非法视图轴. 仅允许 0, 1, 2.
    InvalidView(usize),

    /// 每视图切片数必须是正偶数.
    InvalidSliceCount(u32),

    /// 行数无法整除每视图切片数.
    ///
    /// 两个参数分别为每视图切片数和请求的行数.
    RowsNotDividing(u32, u32),
}

/// 一次评审展示所需的全部 (视图轴, 切片索引) 对, 按视图请求顺序排列.
///
/// 该结构是纯推导数据: 每个受试者重新计算, 从不持久化.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePlan {
    pairs: Vec<(usize, usize)>,
    num_rows: u32,
    num_cols: u32,
}

impl SlicePlan {
    /// 按 `views` 给定的视图轴顺序, 从形状为 `shape` 的体数据中选取
    /// 每视图 `num_slices_per_view` 张切片.
    ///
    /// 选取规则: 对每个轴, 先按 [`BOUNDARY_EXCLUDE_RATIO`] 排除两端边界切片
    /// (靠近边界的切片几乎全是背景), 然后在剩余中心区域内等距取整数位置,
    /// 升序排列.
    ///
    /// `num_rows_per_view` 只影响下游网格布局, 不影响选哪些切片;
    /// 但必须整除 `num_slices_per_view`.
    pub fn select(
        shape: Idx3d,
        views: &[usize],
        num_slices_per_view: u32,
        num_rows_per_view: u32,
    ) -> Result<SlicePlan, LayoutError> {
        validate(views, num_slices_per_view, num_rows_per_view)?;

        let dims = [shape.0, shape.1, shape.2];
        let mut pairs = Vec::with_capacity(views.len() * num_slices_per_view as usize);
        for &axis in views {
            for index in central_positions(dims[axis], num_slices_per_view) {
                pairs.push((axis, index));
            }
        }

        Ok(SlicePlan {
            pairs,
            num_rows: num_rows_per_view,
            num_cols: num_slices_per_view / num_rows_per_view,
        })
    }

    /// 全部 (视图轴, 切片索引) 对, 按视图请求顺序.
    #[inline]
    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    /// 切片总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// 布局是否为空? 构造成功时恒为 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// 每视图的展示网格 (行数, 列数).
    #[inline]
    pub fn grid(&self) -> (u32, u32) {
        (self.num_rows, self.num_cols)
    }
}

impl<'a> IntoIterator for &'a SlicePlan {
    type Item = &'a (usize, usize);
    type IntoIter = std::slice::Iter<'a, (usize, usize)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

/// 校验布局参数. 会话构建时提前调用, 保证配置错误在任何展示前暴露.
pub fn validate(
    views: &[usize],
    num_slices_per_view: u32,
    num_rows_per_view: u32,
) -> Result<(), LayoutError> {
    if views.is_empty() {
        return Err(LayoutError::NoViews);
    }
    if let Some(&bad) = views.iter().find(|&&v| v >= NUM_VALID_VIEWS) {
        return Err(LayoutError::InvalidView(bad));
    }
    if num_slices_per_view == 0 || num_slices_per_view % 2 != 0 {
        return Err(LayoutError::InvalidSliceCount(num_slices_per_view));
    }
    if num_rows_per_view == 0 || num_slices_per_view % num_rows_per_view != 0 {
        return Err(LayoutError::RowsNotDividing(
            num_slices_per_view,
            num_rows_per_view,
        ));
    }
    Ok(())
}

/// 在长度为 `len` 的轴上, 排除两端边界后等距选取 `num` 个整数位置, 升序.
///
/// 轴过短时中心区域会退化, 此时位置可能重复, 但永远不会越界.
fn central_positions(len: usize, num: u32) -> Vec<usize> {
    debug_assert!(num >= 2, "切片数必须是正偶数");
    if len == 0 {
        return Vec::new();
    }

    let margin = (((len as f64) * BOUNDARY_EXCLUDE_RATIO).round() as usize).max(1);
    let lo = margin.min(len - 1);
    let hi = len.saturating_sub(margin + 1).max(lo);

    let span = (hi - lo) as f64;
    let steps = (num - 1) as f64;
    (0..num)
        .map(|i| lo + (span * i as f64 / steps).round() as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: Idx3d = (160, 256, 256);

    #[test]
    fn test_pair_count_and_view_order() {
        let plan = SlicePlan::select(SHAPE, &[2, 0], 6, 2).unwrap();
        assert_eq!(plan.len(), 12);

        // 轴块按输入顺序连续排列.
        let axes: Vec<usize> = plan.pairs().iter().map(|&(a, _)| a).collect();
        assert_eq!(&axes[..6], &[2; 6]);
        assert_eq!(&axes[6..], &[0; 6]);
    }

    #[test]
    fn test_indices_within_bounds_and_sorted() {
        for &(views, num) in &[(&[0usize, 1, 2][..], 12u32), (&[1][..], 2), (&[2, 1][..], 8)] {
            let plan = SlicePlan::select(SHAPE, views, num, 1).unwrap();
            let dims = [SHAPE.0, SHAPE.1, SHAPE.2];
            for &(axis, idx) in plan.pairs() {
                assert!(idx < dims[axis]);
                // 排除了极端边界切片.
                assert!(idx > 0 && idx < dims[axis] - 1);
            }
            // 每个轴块内升序.
            for chunk in plan.pairs().chunks(num as usize) {
                assert!(chunk.windows(2).all(|w| w[0].1 <= w[1].1));
            }
        }
    }

    #[test]
    fn test_deterministic_across_calls() {
        let a = SlicePlan::select(SHAPE, &[0, 1, 2], 12, 2).unwrap();
        let b = SlicePlan::select(SHAPE, &[0, 1, 2], 12, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_odd_or_zero_slice_count_rejected() {
        for bad in [1u32, 3, 7, 0] {
            assert_eq!(
                SlicePlan::select(SHAPE, &[0], bad, 1),
                Err(LayoutError::InvalidSliceCount(bad))
            );
        }
    }

    #[test]
    fn test_invalid_view_rejected() {
        assert_eq!(
            SlicePlan::select(SHAPE, &[0, 3], 4, 2),
            Err(LayoutError::InvalidView(3))
        );
        assert_eq!(SlicePlan::select(SHAPE, &[], 4, 2), Err(LayoutError::NoViews));
    }

    #[test]
    fn test_rows_must_divide() {
        assert_eq!(
            SlicePlan::select(SHAPE, &[0], 12, 5),
            Err(LayoutError::RowsNotDividing(12, 5))
        );
        let plan = SlicePlan::select(SHAPE, &[0], 12, 3).unwrap();
        assert_eq!(plan.grid(), (3, 4));
    }

    #[test]
    fn test_rows_do_not_change_selection() {
        let a = SlicePlan::select(SHAPE, &[0, 1], 12, 2).unwrap();
        let b = SlicePlan::select(SHAPE, &[0, 1], 12, 6).unwrap();
        assert_eq!(a.pairs(), b.pairs());
    }

    #[test]
    fn test_tiny_axis_never_out_of_bounds() {
        let plan = SlicePlan::select((4, 4, 4), &[0, 1, 2], 6, 2).unwrap();
        for &(axis, idx) in plan.pairs() {
            let _ = axis;
            assert!(idx < 4);
        }
    }
}
