//! 会话文件编解码与备份.
//!
//! 行格式: `subject_id,label1+label2+...,notes`. 字段分隔符 `,`,
//! 多标签分隔符 `+`; 备注是最后一个字段, 因此备注内允许出现逗号.
//! 备注内的换行在写入时替换为空格, 保证一行一个受试者.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::Rating;
use crate::consts::{FIELD_DELIM, LABEL_DELIM};
use crate::SubjectId;

/// 恢复会话文件时单行的解析失败记录.
pub(crate) struct LineIssue {
    /// 1 起始的行号.
    pub line_no: usize,

    /// 失败原因.
    pub reason: String,
}

/// 逐行尽力解析会话文件.
///
/// 坏行收集到 `LineIssue` 中返回, 不会中止其余行的解析.
/// 以 `#` 开头的行视为注释跳过 (兼容可能带表头的旧文件).
pub(crate) fn read_session_file(
    path: &Path,
) -> io::Result<(BTreeMap<SubjectId, (Rating, String)>, Vec<LineIssue>)> {
    let content = fs::read_to_string(path)?;
    let mut rows = BTreeMap::new();
    let mut issues = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok((id, rating, notes)) => {
                // 同一受试者多行时, 后行覆盖前行 (与内存覆写语义一致).
                rows.insert(id, (rating, notes));
            }
            Err(reason) => issues.push(LineIssue { line_no, reason }),
        }
    }
    Ok((rows, issues))
}

fn parse_line(line: &str) -> Result<(SubjectId, Rating, String), String> {
    let mut fields = line.splitn(3, FIELD_DELIM);
    let id = fields.next().unwrap_or("").trim();
    let labels = fields.next().ok_or_else(|| "缺少标签字段".to_owned())?;
    let notes = fields.next().unwrap_or("");

    if id.is_empty() {
        return Err("受试者标识符为空".to_owned());
    }

    let rating = Rating::from_labels(
        labels
            .split(LABEL_DELIM)
            .map(str::trim)
            .filter(|l| !l.is_empty()),
    )
    .map_err(|e| format!("{e:?}"))?;
    if rating.is_empty() {
        return Err("标签集合为空".to_owned());
    }

    Ok((id.to_owned(), rating, notes.to_owned()))
}

/// 将全部会话行写入 `path`, 每个受试者恰好一行.
pub(crate) fn write_session_file<'a, I>(path: &Path, rows: I) -> io::Result<()>
where
    I: Iterator<Item = (&'a str, &'a Rating, &'a str)>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut out = fs::File::create(path)?;
    for (id, rating, notes) in rows {
        if rating.is_empty() {
            continue;
        }
        let labels = itertools::join(rating.labels(), &LABEL_DELIM.to_string());
        let notes = notes.replace(['\n', '\r'], " ");
        writeln!(out, "{id}{FIELD_DELIM}{labels}{FIELD_DELIM}{notes}")?;
    }
    out.flush()
}

/// 若 `target` 已存在, 复制出带时间戳的备份. 返回备份路径.
pub(crate) fn backup_existing(target: &Path) -> io::Result<Option<PathBuf>> {
    if !target.exists() {
        return Ok(None);
    }
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{secs}.bak"));
    let backup = target.with_file_name(name);
    fs::copy(target, &backup)?;
    Ok(Some(backup))
}
