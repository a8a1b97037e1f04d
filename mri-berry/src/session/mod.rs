//! 评分会话: 评分集合、备注与断点续评.
//!
//! 会话文件是 "哪些受试者已完成" 的唯一事实来源: 续评时以文件内容
//! 重建状态, 从不信任任何跨运行的内存标志.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::consts::labels;
use crate::{Subject, SubjectId};

mod persist;

/// 会话层运行时错误.
#[derive(Debug)]
pub enum SessionError {
    /// 试图以空标签集合记录受试者. 参数为受试者标识符.
    ///
    /// 受试者只能通过至少选择一个标签 (含预留 pass 标签) 变为已完成.
    EmptyRating(SubjectId),

    /// 标签不属于词汇表.
    UnknownLabel(String),

    /// 给出的标签组合里 pass 与其他标签同时出现.
    ///
    /// 互斥规则只通过 [`Rating::toggle`] 的状态转移维持; 直接给出的
    /// 冲突组合 (如会话文件里的 `pass+motion`) 视为输入损坏, 不做静默修复.
    PassNotExclusive,

    /// 会话文件写入失败. 先前的备份 (若有) 保持完好, 可作为恢复点.
    Persistence {
        /// 底层 I/O 错误.
        source: io::Error,

        /// 覆写前创建的备份路径.
        backup: Option<PathBuf>,
    },
}

/// 一个受试者的评分: 从固定词汇表中选出的标签集合.
///
/// 不变式: 集合要么为空 (未评), 要么只含词汇表标签; 预留 pass 标签
/// 与其他所有标签互斥. 标签按词汇表顺序存储与序列化.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rating {
    // 词汇表索引集合, 升序. 用索引而非字符串保证顺序与去重的不变式.
    selected: Vec<usize>,
}

impl Rating {
    /// 空评分.
    #[inline]
    pub fn new() -> Rating {
        Rating::default()
    }

    /// 从标签序列构建评分.
    ///
    /// 任何未知标签都会使整个序列构建失败; pass 与其他标签同时出现
    /// 返回 [`SessionError::PassNotExclusive`], 而不是像 [`Rating::toggle`]
    /// 那样做互斥修复.
    pub fn from_labels<'a, I: IntoIterator<Item = &'a str>>(it: I) -> Result<Rating, SessionError> {
        let mut rating = Rating::new();
        for label in it {
            let idx = vocabulary_index(label)?;
            if !rating.selected.contains(&idx) {
                let pos = rating.selected.partition_point(|&i| i < idx);
                rating.selected.insert(pos, idx);
            }
        }
        if rating.selected.len() > 1 && rating.contains(labels::PASS) {
            return Err(SessionError::PassNotExclusive);
        }
        Ok(rating)
    }

    /// 评分是否为空 (未评)?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// 是否已选中 `label`?
    pub fn contains(&self, label: &str) -> bool {
        self.labels().any(|l| l == label)
    }

    /// 已选标签, 按词汇表顺序.
    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.selected.iter().map(|&i| labels::ISSUE_LIST[i])
    }

    /// 标签状态翻转, 即勾选框的一次点击.
    ///
    /// 互斥规则: 选中 pass 会清空其他所有标签; 选中其他标签会清掉 pass.
    /// 未知标签返回 [`SessionError::UnknownLabel`], 集合不变.
    pub fn toggle(&mut self, label: &str) -> Result<(), SessionError> {
        let idx = vocabulary_index(label)?;
        match self.selected.iter().position(|&i| i == idx) {
            Some(pos) => {
                self.selected.remove(pos);
            }
            None => self.insert(idx),
        }
        Ok(())
    }

    fn insert(&mut self, idx: usize) {
        if labels::is_pass(labels::ISSUE_LIST[idx]) {
            self.selected.clear();
        } else {
            self.selected.retain(|&i| !labels::is_pass(labels::ISSUE_LIST[i]));
        }
        let pos = self.selected.partition_point(|&i| i < idx);
        self.selected.insert(pos, idx);
    }
}

fn vocabulary_index(label: &str) -> Result<usize, SessionError> {
    labels::ISSUE_LIST
        .iter()
        .position(|&l| l == label)
        .ok_or_else(|| SessionError::UnknownLabel(label.to_owned()))
}

/// 一次运行的会话状态: 受试者 -> 评分/备注.
///
/// 该结构在一次运行内由评审循环独占持有; 排序映射保证序列化行顺序确定.
#[derive(Debug, Default)]
pub struct RatingSession {
    ratings: BTreeMap<SubjectId, Rating>,
    notes: BTreeMap<SubjectId, String>,
}

impl RatingSession {
    /// 从先前的会话文件恢复状态, 并计算未完成列表.
    ///
    /// 文件不存在时从空状态开始, 未完成列表等于全部受试者.
    /// 文件存在时逐行尽力恢复: 坏行以 warning 记录并跳过,
    /// 单行损坏永远不会丢弃整个先前会话.
    ///
    /// 未完成列表 = `all_subjects` 中没有非空已恢复评分者, 原顺序保持.
    pub fn restore(all_subjects: &[Subject], prior_file: &Path) -> (RatingSession, Vec<SubjectId>) {
        let mut session = RatingSession::default();

        if prior_file.exists() {
            match persist::read_session_file(prior_file) {
                Ok((rows, issues)) => {
                    for issue in &issues {
                        log::warn!(
                            "会话文件 `{}` 第 {} 行损坏, 已跳过: {}",
                            prior_file.display(),
                            issue.line_no,
                            issue.reason
                        );
                    }
                    for (id, (rating, notes)) in rows {
                        session.notes.insert(id.clone(), notes);
                        session.ratings.insert(id, rating);
                    }
                }
                Err(e) => {
                    // 整个文件不可读按全新会话处理, 但必须让评审者知情.
                    log::error!("无法读取会话文件 `{}`: {e}", prior_file.display());
                }
            }
        }

        let incomplete = session.incomplete(all_subjects);
        (session, incomplete)
    }

    /// `all_subjects` 中尚未携带非空评分的受试者, 原顺序保持.
    pub fn incomplete(&self, all_subjects: &[Subject]) -> Vec<SubjectId> {
        all_subjects
            .iter()
            .filter(|s| self.ratings.get(s.id()).map_or(true, Rating::is_empty))
            .map(|s| s.id().to_owned())
            .collect()
    }

    /// 记录 (覆写) 一个受试者的评分与备注.
    ///
    /// 空评分被拒绝且状态不变: 见 [`SessionError::EmptyRating`].
    pub fn record(
        &mut self,
        id: &str,
        rating: Rating,
        notes: String,
    ) -> Result<(), SessionError> {
        if rating.is_empty() {
            return Err(SessionError::EmptyRating(id.to_owned()));
        }
        self.ratings.insert(id.to_owned(), rating);
        self.notes.insert(id.to_owned(), notes);
        Ok(())
    }

    /// 已记录受试者的评分.
    #[inline]
    pub fn rating(&self, id: &str) -> Option<&Rating> {
        self.ratings.get(id)
    }

    /// 已记录受试者的备注.
    #[inline]
    pub fn notes(&self, id: &str) -> Option<&str> {
        self.notes.get(id).map(String::as_str)
    }

    /// 已记录 (非空评分) 的受试者个数.
    pub fn len(&self) -> usize {
        self.ratings.values().filter(|r| !r.is_empty()).count()
    }

    /// 会话是否没有任何记录?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 将会话状态原子化保存到 `target`.
    ///
    /// 若 `target` 已存在, 先复制出带时间戳的备份再覆写, 这样失败或被
    /// 中断的写入永远不会毁掉唯一的先前副本. 返回备份路径 (若创建).
    ///
    /// 同一会话内多次调用幂等: 文件始终精确反映内存映射,
    /// 每个受试者恰好一行.
    pub fn save(&self, target: &Path) -> Result<Option<PathBuf>, SessionError> {
        let backup = persist::backup_existing(target).map_err(|source| SessionError::Persistence {
            source,
            backup: None,
        })?;

        let rows = self.ratings.iter().map(|(id, rating)| {
            let notes = self.notes.get(id).map_or("", String::as_str);
            (id.as_str(), rating, notes)
        });
        persist::write_session_file(target, rows).map_err(|source| SessionError::Persistence {
            source,
            backup: backup.clone(),
        })?;

        Ok(backup)
    }
}
