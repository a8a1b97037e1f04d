use std::ops::Index;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::{Idx3d, SubjectId};

pub mod window;

pub use window::VisWindow;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 一个评审单元: 受试者标识符加上其 3D 体数据文件的解析路径.
///
/// 受试者列表在会话构建时确定, 会话生命周期内不可变.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    id: SubjectId,
    volume_path: PathBuf,
}

impl Subject {
    /// 创建受试者.
    pub fn new<S: Into<SubjectId>, P: Into<PathBuf>>(id: S, volume_path: P) -> Self {
        Self {
            id: id.into(),
            volume_path: volume_path.into(),
        }
    }

    /// 受试者标识符.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 体数据文件路径.
    #[inline]
    pub fn volume_path(&self) -> &Path {
        &self.volume_path
    }
}

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 3D MRI nii 文件 header 的共用属性和部分通用操作.
pub trait VolumeAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小.
    fn shape(&self) -> Idx3d;

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }
}

/// nii 格式 3D MRI 扫描, 包括 header 和体素强度数据. 强度值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct MriScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl VolumeAttr for MriScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// 裁剪会改变数据形状, 因此形状以数据为准而非 header.
    #[inline]
    fn shape(&self) -> Idx3d {
        self.data.dim()
    }
}

impl Index<Idx3d> for MriScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl MriScan {
    /// 从 nii (或 nii.gz) 文件打开 3D MRI 扫描.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 根据裸体素数据和 header 直接创建实体. 测试与内存数据源会用到.
    pub fn from_parts(header: NiftiHeader, data: Array3<f32>) -> Self {
        Self {
            header: Box::new(header),
            data,
        }
    }

    /// 底层体素数据视图.
    #[inline]
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// 体数据是否全为背景 (所有体素为零或非有限值)?
    ///
    /// 这样的扫描不可评审: 评审循环会跳过它而不强制打分.
    pub fn is_all_background(&self) -> bool {
        self.data.iter().all(|&v| !v.is_finite() || v == 0.0)
    }

    /// 前景 (非零有限体素) 的 3D 包围盒, 闭区间端点 `(low, high)`.
    ///
    /// 全背景时返回 `None`.
    pub fn foreground_extent(&self) -> Option<(Idx3d, Idx3d)> {
        let (mut lo, mut hi) = ((usize::MAX, usize::MAX, usize::MAX), (0, 0, 0));
        let mut seen = false;
        for ((z, h, w), &v) in self.data.indexed_iter() {
            if v.is_finite() && v != 0.0 {
                seen = true;
                lo = (lo.0.min(z), lo.1.min(h), lo.2.min(w));
                hi = (hi.0.max(z), hi.1.max(h), hi.2.max(w));
            }
        }
        seen.then_some((lo, hi))
    }

    /// 裁剪到前景包围盒, 返回新的扫描实体.
    ///
    /// 裁剪能避免大量纯背景切片进入布局. 全背景时返回 `None`.
    pub fn cropped_to_extent(&self) -> Option<MriScan> {
        let (lo, hi) = self.foreground_extent()?;
        let data = self
            .data
            .slice(s![lo.0..=hi.0, lo.1..=hi.1, lo.2..=hi.2])
            .to_owned();
        Some(Self {
            header: self.header.clone(),
            data,
        })
    }

    /// 获取 `axis` 轴上第 `index` 层的二维切片视图.
    ///
    /// 当 `axis` 不在 0..3 内或 `index` 越界时 panic.
    #[inline]
    pub fn slice_view(&self, axis: usize, index: usize) -> ArrayView2<f32> {
        assert!(axis < 3, "视图轴只能是 0, 1, 2");
        self.data.index_axis(Axis(axis), index)
    }

    /// 按给定可视化窗口将一张切片规范化为 8-bit 灰度图.
    ///
    /// 非有限体素映射为黑色.
    pub fn render_slice(&self, axis: usize, index: usize, window: &VisWindow) -> Array2<u8> {
        self.slice_view(axis, index)
            .map(|&v| window.eval(v).unwrap_or(u8::MIN))
    }

    /// 构建覆盖本扫描前景强度范围的可视化窗口.
    ///
    /// 全背景或强度范围退化时返回 `None`.
    pub fn vis_window(&self) -> Option<VisWindow> {
        let (mut min_v, mut max_v) = (f32::MAX, f32::MIN);
        for &v in self.data.iter().filter(|v| v.is_finite()) {
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        VisWindow::from_range(min_v, max_v)
    }
}

/// 加载受试者体数据的运行时错误.
#[derive(Debug, Clone)]
pub enum VolumeError {
    /// 文件不可读或不是合法 nifti 数据. 参数为受试者标识符与底层错误描述.
    Unreadable(SubjectId, String),

    /// 体数据全为背景, 无可评审内容. 参数为受试者标识符.
    AllBackground(SubjectId),
}

/// 体数据加载能力. 评审循环通过该接口获取受试者的 3D 扫描.
pub trait VolumeSource {
    /// 加载 `subject` 的 3D 体数据.
    ///
    /// 实现可以直接以 [`VolumeError::AllBackground`] 拒绝全背景体数据
    /// (默认加载器如此); 未拒绝的由评审循环在裁剪阶段跳过.
    fn load(&self, subject: &Subject) -> Result<MriScan, VolumeError>;
}

/// 默认的 nifti 文件加载器.
#[derive(Debug, Default, Clone, Copy)]
pub struct NiftiVolumeSource;

impl VolumeSource for NiftiVolumeSource {
    fn load(&self, subject: &Subject) -> Result<MriScan, VolumeError> {
        let scan = MriScan::open(subject.volume_path())
            .map_err(|e| VolumeError::Unreadable(subject.id().to_owned(), e.to_string()))?;
        if scan.is_all_background() {
            return Err(VolumeError::AllBackground(subject.id().to_owned()));
        }
        Ok(scan)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::Array3;

    /// 构造一个 `shape` 形状、中心区域为同值前景的测试扫描.
    pub(crate) fn phantom(shape: Idx3d, value: f32) -> MriScan {
        let mut data = Array3::<f32>::zeros([shape.0, shape.1, shape.2]);
        let lo = (shape.0 / 4, shape.1 / 4, shape.2 / 4);
        let hi = (shape.0 * 3 / 4, shape.1 * 3 / 4, shape.2 * 3 / 4);
        for ((z, h, w), v) in data.indexed_iter_mut() {
            if (lo.0..hi.0).contains(&z) && (lo.1..hi.1).contains(&h) && (lo.2..hi.2).contains(&w)
            {
                *v = value;
            }
        }
        MriScan::from_parts(NiftiHeader::default(), data)
    }

    #[test]
    fn test_default_loader_rejects_missing_file() {
        let subject = Subject::new("x", "/no/such/volume.nii.gz");
        assert!(matches!(
            NiftiVolumeSource.load(&subject),
            Err(VolumeError::Unreadable(id, _)) if id == "x"
        ));
    }

    #[test]
    fn test_all_background_detection() {
        let empty = MriScan::from_parts(NiftiHeader::default(), Array3::zeros([8, 8, 8]));
        assert!(empty.is_all_background());
        assert!(empty.foreground_extent().is_none());
        assert!(empty.cropped_to_extent().is_none());

        let scan = phantom((8, 8, 8), 100.0);
        assert!(!scan.is_all_background());
    }

    #[test]
    fn test_crop_shrinks_to_foreground() {
        let scan = phantom((16, 16, 16), 50.0);
        let cropped = scan.cropped_to_extent().unwrap();
        assert_eq!(cropped.shape(), (8, 8, 8));
        assert!(!cropped.is_all_background());
    }

    #[test]
    fn test_slice_view_shape() {
        let scan = phantom((8, 12, 16), 1.0);
        assert_eq!(scan.slice_view(0, 4).dim(), (12, 16));
        assert_eq!(scan.slice_view(1, 4).dim(), (8, 16));
        assert_eq!(scan.slice_view(2, 4).dim(), (8, 12));
    }

    #[test]
    fn test_render_slice_uses_window() {
        let scan = phantom((8, 8, 8), 200.0);
        let window = scan.vis_window().unwrap();
        let img = scan.render_slice(0, 4, &window);
        assert_eq!(img.dim(), (8, 8));
        assert!(img.iter().any(|&p| p == u8::MAX));
        assert!(img.iter().any(|&p| p == u8::MIN));
    }
}
