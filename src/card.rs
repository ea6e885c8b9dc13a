// 卡片与标注数据模型
// - Card/Category 是解析产物，只存在于内存，每次启动重新解析
// - 三类标注记录按 camelCase 线格式存入远端 JSON 文档，数组元素以 cardId 去重

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub id: String,
    pub category: String,
    pub content: String,
    pub explanation: Option<String>,
    /// 卡片在所属日期桶内的序号
    pub index: usize,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub cards: Vec<Card>,
}

// ---------------- 标注记录 ----------------

/// 三类标注共用的键访问接口，配合通用远端存储与 ID 迁移使用
pub trait CardKeyed {
    /// 远端文档文件名（同时作为本地 gist id 缓存的键）
    const DOC_FILENAME: &'static str;
    /// 远端文档描述，列表查找时与文件名一起匹配
    const DOC_DESCRIPTION: &'static str;

    fn card_id(&self) -> &str;
    fn set_card_id(&mut self, id: String);
    /// 旧版文档是裸 id 数组，按当前时刻补全记录；无法补全的类型返回 None
    fn from_bare_id(card_id: String, now: String) -> Option<Self>
    where
        Self: Sized;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteItem {
    pub card_id: String,
    pub added_at: String,
}

impl FavoriteItem {
    pub fn new(card_id: String) -> Self {
        Self {
            card_id,
            added_at: Utc::now().to_rfc3339(),
        }
    }
}

impl CardKeyed for FavoriteItem {
    const DOC_FILENAME: &'static str = "quiz-card-favorites.json";
    const DOC_DESCRIPTION: &'static str = "Quiz Card Favorites";

    fn card_id(&self) -> &str {
        &self.card_id
    }
    fn set_card_id(&mut self, id: String) {
        self.card_id = id;
    }
    fn from_bare_id(card_id: String, now: String) -> Option<Self> {
        Some(Self {
            card_id,
            added_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderstandingItem {
    pub card_id: String,
    pub level: UnderstandingLevel,
    pub updated_at: String,
}

impl UnderstandingItem {
    pub fn new(card_id: String, level: UnderstandingLevel) -> Self {
        Self {
            card_id,
            level,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

impl CardKeyed for UnderstandingItem {
    const DOC_FILENAME: &'static str = "quiz-card-understandings.json";
    const DOC_DESCRIPTION: &'static str = "Quiz Card Understandings";

    fn card_id(&self) -> &str {
        &self.card_id
    }
    fn set_card_id(&mut self, id: String) {
        self.card_id = id;
    }
    fn from_bare_id(_card_id: String, _now: String) -> Option<Self> {
        // 裸 id 不携带理解度，无法补全
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashItem {
    pub card_id: String,
    pub added_at: String,
}

impl TrashItem {
    pub fn new(card_id: String) -> Self {
        Self {
            card_id,
            added_at: Utc::now().to_rfc3339(),
        }
    }
}

impl CardKeyed for TrashItem {
    const DOC_FILENAME: &'static str = "quiz-card-trash.json";
    const DOC_DESCRIPTION: &'static str = "Quiz Card Trash";

    fn card_id(&self) -> &str {
        &self.card_id
    }
    fn set_card_id(&mut self, id: String) {
        self.card_id = id;
    }
    fn from_bare_id(card_id: String, now: String) -> Option<Self> {
        Some(Self {
            card_id,
            added_at: now,
        })
    }
}

// ---------------- 理解度与筛选模式 ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderstandingLevel {
    Low,
    Medium,
    High,
}

impl UnderstandingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// 组合排序的升序约定：high 在前
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMode {
    Sequential,
    Random,
}

impl OrderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Random => "random",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Self::Sequential => Self::Random,
            Self::Random => Self::Sequential,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilterMode {
    All,
    Week,
}

impl DateFilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Week => "week",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Self::All => Self::Week,
            Self::Week => Self::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoriteFilterMode {
    All,
    Favorites,
    Normal,
}

impl FavoriteFilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Favorites => "favorites",
            Self::Normal => "normal",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::All => Self::Favorites,
            Self::Favorites => Self::Normal,
            Self::Normal => Self::All,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrashFilterMode {
    All,
    Trash,
}

impl TrashFilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Trash => "trash",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            Self::All => Self::Trash,
            Self::Trash => Self::All,
        }
    }
}
