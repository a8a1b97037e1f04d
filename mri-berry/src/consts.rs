//! 通用常量.

/// 评分标签词汇表.
pub mod labels {
    /// 预留的 "通过" 标签. 与其他所有标签互斥.
    pub const PASS: &str = "pass";

    /// 运动伪影.
    pub const MOTION: &str = "motion";

    /// 振铃伪影.
    pub const RINGING: &str = "ringing";

    /// 重影.
    pub const GHOSTING: &str = "ghosting";

    /// 场不均匀性.
    pub const INHOMOGENEITY: &str = "inhomogeneity";

    /// 信噪比过低.
    pub const LOW_SNR: &str = "low-snr";

    /// 其他问题 (需在备注中说明).
    pub const OTHER: &str = "other";

    /// 完整词汇表, 按固定展示顺序排列. `PASS` 永远排第一.
    pub const ISSUE_LIST: [&str; 7] = [
        PASS,
        MOTION,
        RINGING,
        GHOSTING,
        INHOMOGENEITY,
        LOW_SNR,
        OTHER,
    ];

    /// 标签是否是预留的 "通过" 标签?
    #[inline]
    pub fn is_pass(label: &str) -> bool {
        label == PASS
    }

    /// 标签是否属于词汇表?
    #[inline]
    pub fn in_vocabulary(label: &str) -> bool {
        ISSUE_LIST.contains(&label)
    }
}

/// 会话文件字段分隔符.
pub const FIELD_DELIM: char = ',';

/// 会话文件多标签分隔符. 必须与 [`FIELD_DELIM`] 不同.
pub const LABEL_DELIM: char = '+';

/// 会话文件默认文件名.
pub const SESSION_FILE_NAME: &str = "t1_mri_ratings.csv";

/// 默认视图轴: 矢状位, 冠状位, 横断位.
pub const DEFAULT_VIEWS: [usize; 3] = [0, 1, 2];

/// 合法视图轴个数 (3D 体数据).
pub const NUM_VALID_VIEWS: usize = 3;

/// 默认每视图切片数. 必须是正偶数.
pub const DEFAULT_NUM_SLICES: u32 = 12;

/// 默认每视图行数.
pub const DEFAULT_NUM_ROWS: u32 = 2;

/// 默认离群比例.
pub const DEFAULT_OUTLIER_FRACTION: f64 = 0.3;

/// 默认离群检测随机种子. 固定种子保证跨运行审计可复现.
pub const DEFAULT_SEED: u64 = 42;

/// 默认特征类型.
pub const DEFAULT_FEATURE_TYPES: [&str; 2] = ["cortical", "subcortical"];

/// 切片选取时, 每个轴两端各排除的边界占比 (接近空背景的切片).
pub const BOUNDARY_EXCLUDE_RATIO: f64 = 0.1;
