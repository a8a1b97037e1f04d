#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 T1 MRI 3D 脑部扫描的人工质量评审 (rating) 会话引擎:
//! 断点续评、逐受试者评分状态机、无监督离群扫描预警与确定性切片布局.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 引擎本身不绑定任何具体 UI 框架: 显示与按键/勾选事件通过
//!   [`review::ReviewUi`] 能力接口注入, 引擎单线程阻塞等待事件.
//! 2. 一次运行只允许一个评审者进程访问一个会话文件. 持久化采用
//!   "先备份再覆写" 策略, 而非文件锁.
//! 3. 在非期望情况下 (编程错误), 程序会直接 panic, 而不会导致内存错误.
//!   As what Rust promises.
//!
//! # 开发计划
//!
//! ### 确定性切片布局 ✅
//!
//! 从 3D 体数据的形状, 按视图轴选取中心区域内等距切片, 跨运行可复现.
//!
//! 实现位于 `mri-berry/src/layout.rs`.
//!
//! ### 特征提取与按类型特征矩阵 ✅
//!
//! 注入式特征提取能力, 逐受试者缓存, 失败受试者从模型中剔除.
//!
//! 实现位于 `mri-berry/src/features`.
//!
//! ### 无监督离群检测 ✅
//!
//! isolation forest 与局部密度两种方法, 固定种子可复现,
//! 逐特征类型拟合后按 "并集" 策略汇总.
//!
//! 实现位于 `mri-berry/src/outlier`.
//!
//! ### 评分会话与断点续评 ✅
//!
//! pass 标签与其他标签互斥的评分集合, 会话文件逐行恢复 (容忍坏行),
//! 覆写前先备份.
//!
//! 实现位于 `mri-berry/src/session`.
//!
//! ### 评审循环状态机 ✅
//!
//! `Idle -> Reviewing -> {Reviewing | Saving -> Done}`.
//! advance/quit 均要求至少选择一个标签; 不可读/全零体数据跳过不计.
//!
//! 实现位于 `mri-berry/src/review`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 受试者标识符. 在一次会话内唯一.
pub type SubjectId = String;

/// 3D MRI nii 文件基础数据结构.
mod data;

pub use data::{MriScan, NiftiVolumeSource, Subject, VisWindow, VolumeAttr, VolumeError,
               VolumeSource};

pub mod consts;

pub mod config;
pub mod features;
pub mod layout;
pub mod outlier;
pub mod prelude;
pub mod review;
pub mod session;
