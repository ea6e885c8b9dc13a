// 卡片解析器：把一个分类的 markdown 文本切分为卡片序列
// 行规则自上而下匹配：日期标记 / <<<<< 开卡 / >>>>> 收卡 / ### 解析分隔 / 普通行
// 正文为空的卡片直接丢弃，不占用桶内序号；未闭合的卡片静默吞掉

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::card::Card;

/// 旧数据没有年份信息，ID 中统一补这个年份；迁移逻辑使用同一常量
pub const FALLBACK_YEAR: i32 = 2025;

const CARD_OPEN: &str = "<<<<<";
const CARD_CLOSE: &str = ">>>>>";
const EXPLANATION_MARK: &str = "###";

// 日期标记：恰好 15 个 = 紧跟 月/日，整行无其他字符
static DATE_MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^={15}(\d+)/(\d+)$").unwrap());
// 按日拆分的源文件名：{seq}-{month}_{day}.md，不做取值范围校验
static DAY_FILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)-(\d+)_(\d+)\.md$").unwrap());

#[derive(Debug, Default)]
struct ParseState {
    month: Option<u32>,
    day: Option<u32>,
    in_card: bool,
    in_explanation: bool,
    body: Vec<String>,
    explanation: Vec<String>,
    // 桶键 "{月}-{日}" 或 "no-date"；同一日期重复出现时序号继续累加
    counters: HashMap<String, usize>,
    cards: Vec<Card>,
}

impl ParseState {
    fn open_card(&mut self) {
        // 已打开时再次开卡：丢弃已累积内容，重新开始
        self.in_card = true;
        self.in_explanation = false;
        self.body.clear();
        self.explanation.clear();
    }

    fn close_card(&mut self, category: &str) {
        if !self.in_card {
            return;
        }
        self.in_card = false;
        self.in_explanation = false;
        let body = self.body.join("\n").trim().to_string();
        let explanation = self.explanation.join("\n").trim().to_string();
        self.body.clear();
        self.explanation.clear();
        if body.is_empty() {
            return;
        }
        let counter = self.counters.entry(self.bucket_key()).or_insert(0);
        let index = *counter;
        *counter += 1;
        let (id, year) = match (self.month, self.day) {
            (Some(m), Some(d)) => (
                format!("{}-{}-{}-{}-{}", category, FALLBACK_YEAR, m, d, index),
                Some(FALLBACK_YEAR),
            ),
            _ => (format!("{}-{}", category, index), None),
        };
        self.cards.push(Card {
            id,
            category: category.to_string(),
            content: body,
            explanation: if explanation.is_empty() {
                None
            } else {
                Some(explanation)
            },
            index,
            year,
            month: self.month,
            day: self.day,
        });
    }

    fn bucket_key(&self) -> String {
        match (self.month, self.day) {
            (Some(m), Some(d)) => format!("{}-{}", m, d),
            _ => "no-date".to_string(),
        }
    }
}

/// 解析一个分类文档。纯函数：相同输入永远产出相同的卡片与 ID
pub fn parse_cards(text: &str, category: &str) -> Vec<Card> {
    let mut st = ParseState::default();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some((month, day)) = parse_date_marker(trimmed) {
            // 卡片内部出现合法日期标记同样生效并被消耗
            st.month = Some(month);
            st.day = Some(day);
            continue;
        }
        if trimmed == CARD_OPEN {
            st.open_card();
            continue;
        }
        if trimmed == CARD_CLOSE {
            st.close_card(category);
            continue;
        }
        if st.in_card && trimmed == EXPLANATION_MARK {
            st.in_explanation = true;
            continue;
        }
        if st.in_card {
            if st.in_explanation {
                st.explanation.push(line.to_string());
            } else {
                st.body.push(line.to_string());
            }
        }
    }
    st.cards
}

// 月 1-12、日 1-31 之外的行不是日期标记，落回普通行规则
fn parse_date_marker(trimmed: &str) -> Option<(u32, u32)> {
    let caps = DATE_MARKER_RE.captures(trimmed)?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    if (1..=12).contains(&month) && (1..=31).contains(&day) {
        Some((month, day))
    } else {
        None
    }
}

/// 从按日拆分的源文件名提取 (月, 日, 序号)；迁移与合并工具共用
pub fn parse_day_filename(name: &str) -> Option<(u32, u32, u32)> {
    let caps = DAY_FILE_RE.captures(name)?;
    let seq: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    Some((month, day, seq))
}
