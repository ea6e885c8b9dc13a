// 内容目录：index.json 清单 + 每分类一个 {分类}.md 文档
// 清单缺失或损坏按空卡组处理；单个分类文档读不到则告警跳过，绝不中断启动
// 维护操作：重建清单（--write-index）、合并按日拆分的源目录（--merge-sources）

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::card::Category;
use crate::parser;

// 原始清单里 files 映射保留为空数组，维持线格式不变
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContentIndex {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub files: HashMap<String, Vec<String>>,
}

pub fn load_index(dir: &Path) -> ContentIndex {
    let path = dir.join("index.json");
    let s = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "读取内容清单失败，按空卡组处理");
            return ContentIndex::default();
        }
    };
    match serde_json::from_str(&s) {
        Ok(index) => index,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "内容清单不是合法 JSON，按空卡组处理");
            ContentIndex::default()
        }
    }
}

/// 按清单顺序装载各分类；没有卡片的分类不进入卡组
pub fn load_categories(dir: &Path) -> Vec<Category> {
    let index = load_index(dir);
    let mut out = Vec::new();
    for name in &index.categories {
        let path = dir.join(format!("{}.md", name));
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(category = %name, path = %path.display(), error = %err, "分类文档读取失败，跳过");
                continue;
            }
        };
        let cards = parser::parse_cards(&text, name);
        tracing::debug!(category = %name, cards = cards.len(), "分类装载完成");
        if cards.is_empty() {
            continue;
        }
        out.push(Category {
            name: name.clone(),
            cards,
        });
    }
    out
}

// ---------------- 维护操作 ----------------

/// 扫描内容目录下的 *.md 重建 index.json（README.md 与 index.md 除外）
pub fn write_index(dir: &Path) -> Result<ContentIndex> {
    let mut categories = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("读取内容目录失败: {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "README.md" || name == "index.md" {
            continue;
        }
        if let Some(stem) = name.strip_suffix(".md") {
            categories.push(stem.to_string());
        }
    }
    categories.sort();
    let files = categories
        .iter()
        .map(|c| (c.clone(), Vec::new()))
        .collect();
    let index = ContentIndex { categories, files };
    let path = dir.join("index.json");
    let s = serde_json::to_string_pretty(&index)?;
    fs::write(&path, s).with_context(|| format!("写入内容清单失败: {}", path.display()))?;
    Ok(index)
}

// 无日期后缀的源文件排在所有日期之后
const UNDATED_SEQ: u32 = 9999;

/// 把内容目录下的每个子目录（一个分类的按日源文件）合并为 {分类}.md
/// 返回 (分类名, 输出路径) 列表
pub fn merge_sources(content_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs: Vec<(String, PathBuf)> = Vec::new();
    let entries = fs::read_dir(content_dir)
        .with_context(|| format!("读取内容目录失败: {}", content_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            dirs.push((name, entry.path()));
        }
    }
    dirs.sort();

    let mut merged = Vec::new();
    for (name, dir) in dirs {
        let Some(text) = merge_category_dir(&dir)? else {
            tracing::warn!(category = %name, "目录里没有可合并的源文件，跳过");
            continue;
        };
        let out_path = content_dir.join(format!("{}.md", name));
        fs::write(&out_path, text)
            .with_context(|| format!("写入合并文件失败: {}", out_path.display()))?;
        merged.push((name, out_path));
    }
    Ok(merged)
}

// 日期升序（月、日），同日按 seq 升序；日期变化时插入一条日期标记
fn merge_category_dir(dir: &Path) -> Result<Option<String>> {
    let mut names: Vec<String> = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("读取源目录失败: {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".md") && name != "README.md" && name != "index.md" {
            names.push(name);
        }
    }
    names.sort();

    let mut files: Vec<(Option<(u32, u32)>, u32, String, String)> = Vec::new();
    for name in names {
        let path = dir.join(&name);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("读取源文件失败: {}", path.display()))?;
        match parser::parse_day_filename(&name) {
            Some((month, day, seq)) => files.push((Some((month, day)), seq, name, content)),
            None => files.push((None, UNDATED_SEQ, name, content)),
        }
    }
    if files.is_empty() {
        return Ok(None);
    }
    files.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.1.cmp(&b.1)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });

    let mut out: Vec<String> = Vec::new();
    let mut current: Option<(u32, u32)> = None;
    for (date, _seq, name, content) in &files {
        match date {
            Some((month, day)) => {
                if current != Some((*month, *day)) {
                    if !out.is_empty() {
                        out.push(String::new());
                    }
                    out.push(format!("==============={}/{}", month, day));
                    out.push(String::new());
                    current = Some((*month, *day));
                }
            }
            None => {
                if !out.is_empty() {
                    out.push(String::new());
                }
                out.push(format!("// 文件: {} (无日期)", name));
                out.push(String::new());
            }
        }
        out.push(content.trim().to_string());
        out.push(String::new());
    }
    Ok(Some(out.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn missing_index_yields_empty_deck() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_categories(tmp.path()).is_empty());
    }

    #[test]
    fn malformed_index_yields_empty_deck() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "index.json", "{not json");
        assert!(load_categories(tmp.path()).is_empty());
    }

    #[test]
    fn missing_category_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "index.json",
            r#"{"categories":["law","ghost"],"files":{}}"#,
        );
        write(tmp.path(), "law.md", "<<<<<\nbody\n>>>>>\n");
        let categories = load_categories(tmp.path());
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "law");
        assert_eq!(categories[0].cards.len(), 1);
    }

    #[test]
    fn category_without_cards_is_omitted() {
        let tmp = tempfile::tempdir().unwrap();
        write(
            tmp.path(),
            "index.json",
            r#"{"categories":["empty","law"],"files":{}}"#,
        );
        write(tmp.path(), "empty.md", "no cards here\n");
        write(tmp.path(), "law.md", "<<<<<\nbody\n>>>>>\n");
        let categories = load_categories(tmp.path());
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "law");
    }

    #[test]
    fn write_index_sorts_and_excludes_special_files() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "history.md", "");
        write(tmp.path(), "art.md", "");
        write(tmp.path(), "README.md", "");
        write(tmp.path(), "index.md", "");
        write(tmp.path(), "notes.txt", "");
        let index = write_index(tmp.path()).unwrap();
        assert_eq!(index.categories, vec!["art", "history"]);

        let reloaded = load_index(tmp.path());
        assert_eq!(reloaded.categories, vec!["art", "history"]);
        assert!(reloaded.files.contains_key("art"));
    }

    #[test]
    fn merge_emits_marker_only_on_date_change() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = tmp.path().join("history");
        fs::create_dir(&cat).unwrap();
        write(&cat, "1-11_18.md", "<<<<<\na\n>>>>>");
        write(&cat, "2-11_18.md", "<<<<<\nb\n>>>>>");
        write(&cat, "3-11_19.md", "<<<<<\nc\n>>>>>");

        let merged = merge_sources(tmp.path()).unwrap();
        assert_eq!(merged.len(), 1);
        let text = fs::read_to_string(&merged[0].1).unwrap();
        assert_eq!(text.matches("===============11/18").count(), 1);
        assert_eq!(text.matches("===============11/19").count(), 1);

        // 合并产物必须能被解析器按正确的日期桶切回卡片
        let cards = parser::parse_cards(&text, "history");
        assert_eq!(cards.len(), 3);
        assert_eq!(cards[0].id, "history-2025-11-18-0");
        assert_eq!(cards[1].id, "history-2025-11-18-1");
        assert_eq!(cards[2].id, "history-2025-11-19-0");
    }

    #[test]
    fn merge_orders_by_date_then_seq_and_puts_undated_last() {
        let tmp = tempfile::tempdir().unwrap();
        let cat = tmp.path().join("mix");
        fs::create_dir(&cat).unwrap();
        write(&cat, "9-3_2.md", "third");
        write(&cat, "1-11_18.md", "fourth");
        write(&cat, "2-3_2.md", "second");
        write(&cat, "1-3_2.md", "first");
        write(&cat, "loose.md", "undated");

        let merged = merge_sources(tmp.path()).unwrap();
        let text = fs::read_to_string(&merged[0].1).unwrap();
        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        let third = text.find("third").unwrap();
        let fourth = text.find("fourth").unwrap();
        let undated = text.find("undated").unwrap();
        assert!(first < second && second < third && third < fourth && fourth < undated);
        assert!(text.contains("// 文件: loose.md (无日期)"));
    }
}
