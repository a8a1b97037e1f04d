//! 评审循环状态机.
//!
//! `Idle -> Reviewing(subject) -> {Reviewing(next) | Saving -> Done}`.
//!
//! 单线程、外部驱动: 循环对每个受试者展示切片布局与离群预警, 然后阻塞
//! 等待注入 UI 的事件. advance 和 quit 共享同一前置条件 —— 当前受试者
//! 至少选择了一个标签 (预留 pass 标签也算); 不满足时事件被拒绝,
//! 状态保持不变. 等待不设超时: 人在回路中.

use ndarray::Array2;

use crate::config::ReviewConfig;
use crate::features::{FeatureError, FeatureStore};
use crate::layout::{LayoutError, SlicePlan};
use crate::outlier::{self, DetectError, OutlierReport};
use crate::session::{Rating, RatingSession, SessionError};
use crate::{Subject, VisWindow, VolumeAttr, VolumeError, VolumeSource};

/// 注入 UI 发来的评审事件.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// 勾选框点击: 翻转一个标签.
    ToggleLabel(String),

    /// 更新当前受试者的备注全文.
    SetNotes(String),

    /// 请求进入下一个受试者.
    Advance,

    /// 请求保存并退出.
    Quit,
}

/// 交给展示层的当前受试者包.
pub struct SubjectView<'a> {
    /// 受试者.
    pub subject: &'a Subject,

    /// 切片布局.
    pub plan: &'a SlicePlan,

    /// 按布局顺序规范化好的 8-bit 灰度切片.
    pub slices: &'a [Array2<u8>],

    /// 离群预警文案. 未被标记时为空.
    pub alerts: &'a [String],

    /// (当前序号, 本次运行待评总数), 序号从 1 起.
    pub position: (usize, usize),
}

/// 评审 UI 能力. 引擎通过该接口展示并阻塞获取事件.
pub trait ReviewUi {
    /// 展示一个受试者. 随后引擎会反复调用 [`ReviewUi::next_event`].
    fn present(&mut self, view: &SubjectView<'_>);

    /// 阻塞等待下一个评审事件.
    fn next_event(&mut self) -> UiEvent;

    /// 向评审者报告被拒绝的操作 (未选标签就 advance/quit, 未知标签等).
    fn reject(&mut self, message: &str);
}

/// 评审循环运行时错误.
#[derive(Debug)]
pub enum ReviewError {
    /// 特征提取配置问题 (未注册的特征类型).
    Feature(FeatureError),

    /// 离群检测参数问题.
    Detect(DetectError),

    /// 布局参数问题.
    Layout(LayoutError),

    /// 终态保存失败.
    ///
    /// [`SessionError::Persistence`] 内携带覆写前的备份路径作为恢复点;
    /// 失败时刻的完整会话状态随错误一并返回, 调用方可持有并向可写
    /// 路径重试保存, 已记录的评分不会丢失.
    Session {
        /// 底层会话错误.
        source: SessionError,

        /// 失败时刻的完整会话状态.
        session: RatingSession,
    },
}

impl From<FeatureError> for ReviewError {
    fn from(e: FeatureError) -> Self {
        Self::Feature(e)
    }
}

impl From<DetectError> for ReviewError {
    fn from(e: DetectError) -> Self {
        Self::Detect(e)
    }
}

impl From<LayoutError> for ReviewError {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

/// 一次完整运行的结果摘要.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    /// 本次运行内记录评分的受试者数.
    pub rated: usize,

    /// 因体数据不可读或全背景而跳过的受试者数. 它们保持未完成.
    pub skipped: usize,

    /// 是否经由 quit 提前结束 (剩余受试者留待下次运行).
    pub quit_early: bool,
}

/// 状态机状态. 见模块文档.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Reviewing(usize),
    Saving,
    Done,
}

/// 评审循环: 持有全部会话范围状态, 驱动其余所有组件.
pub struct ReviewLoop<U, V> {
    config: ReviewConfig,
    subjects: Vec<Subject>,
    ui: U,
    volumes: V,
    state: LoopState,
}

impl<U: ReviewUi, V: VolumeSource> ReviewLoop<U, V> {
    /// 以固定受试者列表与注入能力创建循环. 初始状态 `Idle`.
    pub fn new(config: ReviewConfig, subjects: Vec<Subject>, ui: U, volumes: V) -> Self {
        Self {
            config,
            subjects,
            ui,
            volumes,
            state: LoopState::Idle,
        }
    }

    /// 运行整个会话: 检测一次, 恢复一次, 逐受试者评审, 终态保存恰好一次.
    ///
    /// 配置类错误 (特征类型未注册、离群比例越界) 在任何展示发生前返回.
    pub fn run(&mut self, features: &mut FeatureStore) -> Result<ReviewOutcome, ReviewError> {
        debug_assert_eq!(self.state, LoopState::Idle);

        // 离群检测在任何受试者展示前恰好运行一次, 之后只读.
        let report = if self.config.detection_enabled() {
            let matrices = features.matrices(&self.subjects, self.config.feature_types())?;
            outlier::detect(
                &matrices,
                self.config.method(),
                self.config.outlier_fraction(),
                true,
                self.config.seed(),
            )?
        } else {
            OutlierReport::default()
        };

        let session_file = self.config.session_file();
        let (mut session, incomplete) = RatingSession::restore(&self.subjects, &session_file);
        log::info!(
            "会话开始: 共 {} 个受试者, 待评 {} 个",
            self.subjects.len(),
            incomplete.len()
        );

        let todo: Vec<Subject> = self
            .subjects
            .iter()
            .filter(|s| incomplete.iter().any(|id| id.as_str() == s.id()))
            .cloned()
            .collect();

        let mut outcome = ReviewOutcome {
            rated: 0,
            skipped: 0,
            quit_early: false,
        };

        'subjects: for (pos, subject) in todo.iter().enumerate() {
            self.state = LoopState::Reviewing(pos);

            let Some((plan, slices)) = self.prepare_display(subject)? else {
                // 不可读/全背景的数据不强制打分: 跳过, 留待下次运行.
                outcome.skipped += 1;
                continue;
            };

            let alerts = report.alert_messages(subject.id());
            let view = SubjectView {
                subject,
                plan: &plan,
                slices: &slices,
                alerts: &alerts,
                position: (pos + 1, todo.len()),
            };
            self.ui.present(&view);

            // 逐受试者瞬态: 进入下一个受试者时重置.
            let mut rating = Rating::new();
            let mut notes = String::new();

            loop {
                let event = self.ui.next_event();
                let quitting = matches!(event, UiEvent::Quit);
                match event {
                    UiEvent::ToggleLabel(label) => {
                        if let Err(SessionError::UnknownLabel(l)) = rating.toggle(&label) {
                            self.ui.reject(&format!("未知标签 `{l}`"));
                        }
                    }
                    UiEvent::SetNotes(text) => notes = text,
                    UiEvent::Advance | UiEvent::Quit => {
                        if rating.is_empty() {
                            self.ui
                                .reject("请先完成评分: 至少选择一个标签 (pass 也可)");
                            continue;
                        }
                        // 非空集合的 record 不会失败.
                        session
                            .record(subject.id(), rating, notes)
                            .expect("非空评分的记录不会失败");
                        outcome.rated += 1;

                        if quitting {
                            // 终态保存紧随其后, 无需增量保存.
                            outcome.quit_early = true;
                            break 'subjects;
                        }
                        // 增量保存, 将崩溃损失压到单个受试者;
                        // 失败只告警, 内存状态完好, 终态保存仍会重试.
                        if pos + 1 < todo.len() {
                            if let Err(e) = session.save(&session_file) {
                                log::error!("增量保存失败 (稍后会重试): {e:?}");
                            }
                        }
                        break;
                    }
                }
            }
        }

        // 终态保存恰好一次. 此后不再允许任何状态修改.
        if let LoopState::Reviewing(pos) = self.state {
            log::debug!("评审在第 {} 个待评受试者后结束", pos + 1);
        }
        self.state = LoopState::Saving;
        match session.save(&session_file) {
            Ok(Some(b)) => {
                log::info!("已写入 `{}`, 备份于 `{}`", session_file.display(), b.display());
            }
            Ok(None) => {}
            Err(source) => {
                let mut msg = format!("会话保存失败: 无法写入 `{}`", session_file.display());
                if let SessionError::Persistence { backup: Some(b), .. } = &source {
                    msg.push_str(&format!(", 先前备份完好: `{}`", b.display()));
                }
                self.ui.reject(&msg);
                return Err(ReviewError::Session { source, session });
            }
        }
        self.state = LoopState::Done;

        Ok(outcome)
    }

    /// 为一个受试者准备布局与规范化切片.
    ///
    /// 返回 `None` 表示该受试者应被跳过 (不可读或全背景).
    fn prepare_display(
        &mut self,
        subject: &Subject,
    ) -> Result<Option<(SlicePlan, Vec<Array2<u8>>)>, ReviewError> {
        let scan = match self.volumes.load(subject) {
            Ok(scan) => scan,
            Err(e) => {
                log::warn!("体数据不可读, 跳过受试者 `{}`: {e:?}", subject.id());
                return Ok(None);
            }
        };

        let Some(cropped) = scan.cropped_to_extent() else {
            let e = VolumeError::AllBackground(subject.id().to_owned());
            log::warn!("体数据不可评审, 跳过受试者: {e:?}");
            return Ok(None);
        };

        let plan = SlicePlan::select(
            cropped.shape(),
            self.config.views(),
            self.config.num_slices_per_view(),
            self.config.num_rows_per_view(),
        )?;

        let window = cropped
            .vis_window()
            .unwrap_or_else(|| VisWindow::new(0.0, 1.0).unwrap());
        let slices = plan
            .pairs()
            .iter()
            .map(|&(axis, index)| cropped.render_slice(axis, index, &window))
            .collect();

        Ok(Some((plan, slices)))
    }
}
