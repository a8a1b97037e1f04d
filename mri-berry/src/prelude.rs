//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d, SubjectId};

pub use crate::{MriScan, NiftiVolumeSource, Subject, VisWindow, VolumeAttr, VolumeError,
                VolumeSource};

pub use crate::config::{default_out_dir, ConfigError, ReviewConfig};

pub use crate::layout::{LayoutError, SlicePlan};

pub use crate::features::{FeatureError, FeatureMatrix, FeatureSource, FeatureStore,
                          IntensityStatSource};

pub use crate::outlier::{detect, DetectError, OutlierMethod, OutlierReport};

pub use crate::review::{ReviewError, ReviewLoop, ReviewOutcome, ReviewUi, SubjectView, UiEvent};

pub use crate::session::{Rating, RatingSession, SessionError};

pub use crate::consts::labels::{ISSUE_LIST, PASS};
