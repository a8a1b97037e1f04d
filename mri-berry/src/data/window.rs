/// 可视化窗口, 包含窗位 (window level) 和窗宽 (window width).
///
/// MRI 强度没有 CT HU 那样的绝对标度, 因此窗口通常由单个扫描的
/// 前景强度范围推导 (见 [`crate::MriScan::vis_window`]).
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug)]
pub struct VisWindow {
    level: f32,
    width: f32,
}

impl VisWindow {
    /// 构建可视化窗口.
    ///
    /// `level` 和 `width` 必须在合理范围内, 否则返回 `None`.
    pub fn new(level: f32, width: f32) -> Option<VisWindow> {
        if (-1e9..=1e9).contains(&level) && 0.0 < width && width <= 1e9 {
            Some(Self { level, width })
        } else {
            None
        }
    }

    /// 从强度区间 `[min, max]` 构建窗口.
    ///
    /// 区间退化 (空或单点) 或端点非有限时返回 `None`.
    pub fn from_range(min: f32, max: f32) -> Option<VisWindow> {
        if !min.is_finite() || !max.is_finite() || max <= min {
            return None;
        }
        Self::new((min + max) / 2.0, max - min)
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.level - self.width / 2.0
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.level + self.width / 2.0
    }

    /// 窗位.
    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    /// 求在当前窗口设置下, 强度值 `v` 对应的灰度图像素整数值 (0 <= value <= 255).
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, v: f32) -> Option<u8> {
        if !v.is_finite() {
            return None;
        }
        let lb = self.lower_bound();
        if v <= lb {
            Some(u8::MIN)
        } else if v >= self.upper_bound() {
            Some(u8::MAX)
        } else {
            // 255, not 256.
            Some((((v - lb) / self.width()) * 255.0) as u8)
        }
    }
}
