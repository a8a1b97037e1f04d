//! 会话配置.
//!
//! 配置错误一律在会话构建时立即暴露, 从不静默回退到默认值.

use std::path::{Path, PathBuf};

use crate::consts::{
    DEFAULT_FEATURE_TYPES, DEFAULT_NUM_ROWS, DEFAULT_NUM_SLICES, DEFAULT_OUTLIER_FRACTION,
    DEFAULT_SEED, DEFAULT_VIEWS, SESSION_FILE_NAME,
};
use crate::layout::{self, LayoutError};
use crate::outlier::OutlierMethod;

/// 配置校验错误.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// 未知的离群检测方法名.
    UnknownMethod(String),

    /// 离群比例必须是开区间 (0, 1) 内的值.
    ///
    /// 逐特征类型的 `[1/n, (n-1)/n]` 精确界在检测时校验, 因为 n
    /// 取决于提取成功的受试者数.
    FractionOutOfRange(f64),

    /// 未请求任何特征类型但检测未被禁用.
    NoFeatureTypes,

    /// 布局参数非法.
    Layout(LayoutError),
}

/// 一次评审会话的全部配置值. 不绑定任何具体 CLI 语法.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    method: OutlierMethod,
    outlier_fraction: f64,
    feature_types: Vec<String>,
    disable_outlier_detection: bool,
    views: Vec<usize>,
    num_slices_per_view: u32,
    num_rows_per_view: u32,
    out_dir: PathBuf,
    seed: u64,
}

impl ReviewConfig {
    /// 以校验后的值构建配置.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method_name: &str,
        outlier_fraction: f64,
        feature_types: Vec<String>,
        disable_outlier_detection: bool,
        views: Vec<usize>,
        num_slices_per_view: u32,
        num_rows_per_view: u32,
        out_dir: PathBuf,
    ) -> Result<ReviewConfig, ConfigError> {
        let method = OutlierMethod::from_name(method_name)
            .ok_or_else(|| ConfigError::UnknownMethod(method_name.to_owned()))?;
        if !(0.0 < outlier_fraction && outlier_fraction < 1.0) {
            return Err(ConfigError::FractionOutOfRange(outlier_fraction));
        }
        if feature_types.is_empty() && !disable_outlier_detection {
            return Err(ConfigError::NoFeatureTypes);
        }
        layout::validate(&views, num_slices_per_view, num_rows_per_view)
            .map_err(ConfigError::Layout)?;

        Ok(ReviewConfig {
            method,
            outlier_fraction,
            feature_types,
            disable_outlier_detection,
            views,
            num_slices_per_view,
            num_rows_per_view,
            out_dir,
            seed: DEFAULT_SEED,
        })
    }

    /// 全默认配置: isolation forest, 比例 0.3, cortical + subcortical 特征,
    /// 三视图每视图 12 张切片 2 行.
    pub fn with_defaults(out_dir: PathBuf) -> ReviewConfig {
        ReviewConfig {
            method: OutlierMethod::IsolationForest,
            outlier_fraction: DEFAULT_OUTLIER_FRACTION,
            feature_types: DEFAULT_FEATURE_TYPES.iter().map(|s| s.to_string()).collect(),
            disable_outlier_detection: false,
            views: DEFAULT_VIEWS.to_vec(),
            num_slices_per_view: DEFAULT_NUM_SLICES,
            num_rows_per_view: DEFAULT_NUM_ROWS,
            out_dir,
            seed: DEFAULT_SEED,
        }
    }

    /// 替换随机种子. 固定种子保证离群标记跨运行可审计复现.
    pub fn with_seed(mut self, seed: u64) -> ReviewConfig {
        self.seed = seed;
        self
    }

    /// 禁用离群检测.
    pub fn without_outlier_detection(mut self) -> ReviewConfig {
        self.disable_outlier_detection = true;
        self
    }

    /// 离群检测方法.
    #[inline]
    pub fn method(&self) -> OutlierMethod {
        self.method
    }

    /// 离群比例.
    #[inline]
    pub fn outlier_fraction(&self) -> f64 {
        self.outlier_fraction
    }

    /// 请求的特征类型, 按请求顺序.
    #[inline]
    pub fn feature_types(&self) -> &[String] {
        &self.feature_types
    }

    /// 是否禁用离群检测?
    #[inline]
    pub fn detection_enabled(&self) -> bool {
        !self.disable_outlier_detection
    }

    /// 视图轴, 按请求顺序.
    #[inline]
    pub fn views(&self) -> &[usize] {
        &self.views
    }

    /// 每视图切片数.
    #[inline]
    pub fn num_slices_per_view(&self) -> u32 {
        self.num_slices_per_view
    }

    /// 每视图行数.
    #[inline]
    pub fn num_rows_per_view(&self) -> u32 {
        self.num_rows_per_view
    }

    /// 输出目录.
    #[inline]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// 离群检测随机种子.
    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// 会话文件的完整路径.
    pub fn session_file(&self) -> PathBuf {
        self.out_dir.join(SESSION_FILE_NAME)
    }
}

/// 获取 `{用户主目录}/ratings` 默认输出目录.
pub fn default_out_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("ratings");
    Some(ans)
}
