// 卡片 ID 迁移：把旧版（源文件名拼接）ID 解析成当前的日期桶格式
// 能识别的旧格式改写，已是当前格式的原样放行，认不出的返回 None 由调用方丢弃

use once_cell::sync::Lazy;
use regex::Regex;

use crate::parser::FALLBACK_YEAR;

// 旧版 ID 中间嵌的是按日源文件名：{seq}-{month}_{day}.md
static LEGACY_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)-(\d+)_(\d+)\.md$").unwrap());

fn valid_month(m: u32) -> bool {
    (1..=12).contains(&m)
}

fn valid_day(d: u32) -> bool {
    (1..=31).contains(&d)
}

/// 解析一条旧 ID。返回 None 表示没有对应的迁移目标
pub fn migrate_card_id(old_id: &str) -> Option<String> {
    let parts: Vec<&str> = old_id.split('-').collect();
    if parts.len() < 2 {
        return None;
    }

    // 当前格式 {分类}-{年}-{月}-{日}-{序号}：原样放行，迁移是幂等的
    if parts.len() == 5
        && parts[1].len() == 4
        && parts[1].chars().all(|c| c.is_ascii_digit())
    {
        if let (Ok(m), Ok(d)) = (parts[2].parse::<u32>(), parts[3].parse::<u32>()) {
            if valid_month(m) && valid_day(d) {
                return Some(old_id.to_string());
            }
        }
    }

    // {分类}-{月}-{日}-{序号}：补上年份；第二段已是 4 位数字则认为带年，放行
    if parts.len() == 4 {
        if let (Ok(m), Ok(d)) = (parts[1].parse::<u32>(), parts[2].parse::<u32>()) {
            if valid_month(m) && valid_day(d) {
                if parts[1].len() == 4 {
                    return Some(old_id.to_string());
                }
                return Some(format!(
                    "{}-{}-{}-{}-{}",
                    parts[0], FALLBACK_YEAR, m, d, parts[3]
                ));
            }
        }
    }

    // {分类}-{源文件名}-{序号}：文件名本身含 '-'，把中间段拼回去再比对
    if parts.len() >= 3 {
        let filename = parts[1..parts.len() - 1].join("-");
        if let Some(caps) = LEGACY_FILE_RE.captures(&filename) {
            let m: u32 = caps[2].parse().ok()?;
            let d: u32 = caps[3].parse().ok()?;
            if valid_month(m) && valid_day(d) {
                return Some(format!(
                    "{}-{}-{}-{}-{}",
                    parts[0],
                    FALLBACK_YEAR,
                    m,
                    d,
                    parts[parts.len() - 1]
                ));
            }
        }
        return None;
    }

    // {分类}-{序号}：无日期卡，格式未变
    Some(old_id.to_string())
}

/// 批量迁移一组标注，丢掉解析不出的条目。返回 (迁移后条目, 是否有变化)
pub fn migrate_items<T: crate::card::CardKeyed>(items: Vec<T>) -> (Vec<T>, bool) {
    let mut changed = false;
    let mut out = Vec::with_capacity(items.len());
    for mut item in items {
        match migrate_card_id(item.card_id()) {
            Some(new_id) => {
                if new_id != item.card_id() {
                    tracing::debug!(from = %item.card_id(), to = %new_id, "迁移卡片 ID");
                    item.set_card_id(new_id);
                    changed = true;
                }
                out.push(item);
            }
            None => {
                tracing::warn!(card_id = %item.card_id(), "丢弃无法迁移的卡片标注");
                changed = true;
            }
        }
    }
    (out, changed)
}
