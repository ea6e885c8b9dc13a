// 卡组装配：扁平化 → 过滤管线 → 顺序
// 过滤阶段固定顺序：分类 → 最近一周 → 收藏 → 理解度 → 回收站
// 随机顺序是会话内持有的排列，只在卡组长度变化或显式重洗时重新生成

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::card::{
    Card, Category, DateFilterMode, FavoriteFilterMode, FavoriteItem, TrashFilterMode,
    TrashItem, UnderstandingItem, UnderstandingLevel,
};

// 每个分类保留的最近日期桶数
const WEEK_BUCKETS: usize = 7;

#[derive(Debug, Clone)]
pub struct DeckQuery {
    /// 选中的分类；空集表示全部
    pub categories: HashSet<String>,
    pub date_filter: DateFilterMode,
    pub favorite_filter: FavoriteFilterMode,
    /// 选中的理解度档位；空集不启用该阶段
    pub levels: HashSet<UnderstandingLevel>,
    pub trash_filter: TrashFilterMode,
}

impl Default for DeckQuery {
    fn default() -> Self {
        Self {
            categories: HashSet::new(),
            date_filter: DateFilterMode::All,
            favorite_filter: FavoriteFilterMode::All,
            levels: HashSet::new(),
            trash_filter: TrashFilterMode::All,
        }
    }
}

pub fn flatten(categories: &[Category]) -> Vec<Card> {
    categories
        .iter()
        .flat_map(|c| c.cards.iter().cloned())
        .collect()
}

fn bucket_of(card: &Card) -> Option<(u32, u32)> {
    card.month.zip(card.day)
}

/// 每个分类取最近的 7 个日期桶（月、日降序）；无日期桶永远算最旧的一个
fn week_buckets(cards: &[Card]) -> HashMap<String, HashSet<Option<(u32, u32)>>> {
    let mut by_category: HashMap<String, Vec<Option<(u32, u32)>>> = HashMap::new();
    for card in cards {
        let buckets = by_category.entry(card.category.clone()).or_default();
        let bucket = bucket_of(card);
        if !buckets.contains(&bucket) {
            buckets.push(bucket);
        }
    }
    by_category
        .into_iter()
        .map(|(category, mut buckets)| {
            buckets.sort_by(|a, b| match (a, b) {
                (Some(x), Some(y)) => y.cmp(x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            });
            buckets.truncate(WEEK_BUCKETS);
            (category, buckets.into_iter().collect())
        })
        .collect()
}

/// 过滤管线。返回 cards 里保留卡片的下标，保持原有顺序
pub fn filter_deck(
    cards: &[Card],
    query: &DeckQuery,
    favorites: &HashMap<String, FavoriteItem>,
    understandings: &HashMap<String, UnderstandingItem>,
    trash: &HashMap<String, TrashItem>,
) -> Vec<usize> {
    let mut keep: Vec<usize> = (0..cards.len()).collect();

    if !query.categories.is_empty() {
        keep.retain(|&i| query.categories.contains(&cards[i].category));
    }

    if query.date_filter == DateFilterMode::Week {
        let recent = week_buckets(cards);
        keep.retain(|&i| {
            recent
                .get(&cards[i].category)
                .map_or(false, |buckets| buckets.contains(&bucket_of(&cards[i])))
        });
    }

    match query.favorite_filter {
        FavoriteFilterMode::All => {}
        FavoriteFilterMode::Favorites => keep.retain(|&i| favorites.contains_key(&cards[i].id)),
        FavoriteFilterMode::Normal => keep.retain(|&i| !favorites.contains_key(&cards[i].id)),
    }

    // 理解度阶段只在选了档位时启用；没有标注的卡不属于任何档位
    if !query.levels.is_empty() {
        keep.retain(|&i| {
            understandings
                .get(&cards[i].id)
                .map_or(false, |item| query.levels.contains(&item.level))
        });
    }

    match query.trash_filter {
        TrashFilterMode::All => keep.retain(|&i| !trash.contains_key(&cards[i].id)),
        TrashFilterMode::Trash => keep.retain(|&i| trash.contains_key(&cards[i].id)),
    }

    keep
}

// ---------------- 随机顺序 ----------------

/// 当前可见卡组上的一个排列。长度不变时保持稳定，翻卡不会跳
#[derive(Debug, Default)]
pub struct ShuffleState {
    order: Vec<usize>,
}

impl ShuffleState {
    /// 保证排列覆盖 len 张卡；长度变了才重新洗
    pub fn ensure(&mut self, len: usize) {
        if self.order.len() != len {
            self.regenerate(len, &mut rand::thread_rng());
        }
    }

    pub fn reshuffle(&mut self, len: usize) {
        self.regenerate(len, &mut rand::thread_rng());
    }

    pub fn reshuffle_with<R: Rng>(&mut self, len: usize, rng: &mut R) {
        self.regenerate(len, rng);
    }

    fn regenerate<R: Rng>(&mut self, len: usize, rng: &mut R) {
        self.order = (0..len).collect();
        self.order.shuffle(rng);
    }

    /// 把卡组内位置映射到 visible 下标
    pub fn map(&self, pos: usize) -> Option<usize> {
        self.order.get(pos).copied()
    }
}

// ---------------- 管理列表排序 ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Understanding,
    FavoriteTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn arrow(self) -> &'static str {
        match self {
            SortDir::Asc => "↑",
            SortDir::Desc => "↓",
        }
    }
}

/// 组合排序：最近切换的键优先级最高。单键循环 升序 → 降序 → 关
#[derive(Debug, Clone, Default)]
pub struct ManageSort {
    pub keys: Vec<(SortKey, SortDir)>,
}

impl ManageSort {
    pub fn toggle(&mut self, key: SortKey) {
        match self.keys.iter().position(|(k, _)| *k == key) {
            None => self.keys.insert(0, (key, SortDir::Asc)),
            Some(i) => {
                let (_, dir) = self.keys.remove(i);
                if dir == SortDir::Asc {
                    self.keys.insert(0, (key, SortDir::Desc));
                }
            }
        }
    }

    pub fn dir_of(&self, key: SortKey) -> Option<SortDir> {
        self.keys.iter().find(|(k, _)| *k == key).map(|(_, d)| *d)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// 缺失属性不论方向都排最后
fn cmp_option<T: Ord>(a: Option<T>, b: Option<T>, dir: SortDir) -> std::cmp::Ordering {
    match (a, b) {
        (Some(x), Some(y)) => match dir {
            SortDir::Asc => x.cmp(&y),
            SortDir::Desc => y.cmp(&x),
        },
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

/// 按组合键对下标排序；稳定排序，完全相等的保持原顺序
pub fn sort_for_manage(
    cards: &[Card],
    idxs: &[usize],
    sort: &ManageSort,
    favorites: &HashMap<String, FavoriteItem>,
    understandings: &HashMap<String, UnderstandingItem>,
) -> Vec<usize> {
    let mut out = idxs.to_vec();
    if sort.is_empty() {
        return out;
    }
    out.sort_by(|&a, &b| {
        for (key, dir) in &sort.keys {
            let ord = match key {
                SortKey::Understanding => cmp_option(
                    understandings.get(&cards[a].id).map(|u| u.level.rank()),
                    understandings.get(&cards[b].id).map(|u| u.level.rank()),
                    *dir,
                ),
                SortKey::FavoriteTime => cmp_option(
                    favorites.get(&cards[a].id).map(|f| f.added_at.as_str()),
                    favorites.get(&cards[b].id).map(|f| f.added_at.as_str()),
                    *dir,
                ),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    out
}

/// 搜索匹配：调用方先把查询转小写
pub fn card_matches_query(card: &Card, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    if card.content.to_lowercase().contains(query) {
        return true;
    }
    card.explanation
        .as_deref()
        .map_or(false, |e| e.to_lowercase().contains(query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn card(category: &str, id: &str, month: Option<u32>, day: Option<u32>) -> Card {
        Card {
            id: id.to_string(),
            category: category.to_string(),
            content: format!("content of {}", id),
            explanation: None,
            index: 0,
            year: month.map(|_| 2025),
            month,
            day,
        }
    }

    fn dated_deck(days: &[u32]) -> Vec<Card> {
        days.iter()
            .enumerate()
            .map(|(i, &d)| {
                card(
                    "law",
                    &format!("law-2025-11-{}-{}", d, i),
                    Some(11),
                    Some(d),
                )
            })
            .collect()
    }

    fn favorite_of(id: &str, added_at: &str) -> FavoriteItem {
        FavoriteItem {
            card_id: id.to_string(),
            added_at: added_at.to_string(),
        }
    }

    fn understanding_of(id: &str, level: UnderstandingLevel) -> UnderstandingItem {
        UnderstandingItem {
            card_id: id.to_string(),
            level,
            updated_at: String::new(),
        }
    }

    #[test]
    fn week_filter_keeps_seven_most_recent_buckets() {
        let cards = dated_deck(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let query = DeckQuery {
            date_filter: DateFilterMode::Week,
            ..DeckQuery::default()
        };
        let keep = filter_deck(&cards, &query, &HashMap::new(), &HashMap::new(), &HashMap::new());
        let days: Vec<u32> = keep.iter().map(|&i| cards[i].day.unwrap()).collect();
        assert_eq!(days, vec![4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn week_filter_treats_dateless_bucket_as_oldest() {
        // 7 个日期桶 + 无日期桶：无日期的被挤掉
        let mut cards = dated_deck(&[1, 2, 3, 4, 5, 6, 7]);
        cards.push(card("law", "law-99", None, None));
        let query = DeckQuery {
            date_filter: DateFilterMode::Week,
            ..DeckQuery::default()
        };
        let keep = filter_deck(&cards, &query, &HashMap::new(), &HashMap::new(), &HashMap::new());
        assert!(keep.iter().all(|&i| cards[i].id != "law-99"));
        assert_eq!(keep.len(), 7);

        // 3 个日期桶 + 无日期桶：一共 4 桶，全保留
        let mut cards = dated_deck(&[1, 2, 3]);
        cards.push(card("law", "law-99", None, None));
        let keep = filter_deck(&cards, &query, &HashMap::new(), &HashMap::new(), &HashMap::new());
        assert_eq!(keep.len(), 4);
    }

    #[test]
    fn week_filter_is_per_category() {
        let mut cards = dated_deck(&[1, 2, 3, 4, 5, 6, 7, 8]);
        cards.push(card("art", "art-2025-11-1-0", Some(11), Some(1)));
        let query = DeckQuery {
            date_filter: DateFilterMode::Week,
            ..DeckQuery::default()
        };
        let keep = filter_deck(&cards, &query, &HashMap::new(), &HashMap::new(), &HashMap::new());
        // law 的 11/1 桶超出七个被挤掉，art 只有一个桶照常保留
        assert!(keep.iter().any(|&i| cards[i].id == "art-2025-11-1-0"));
        assert!(keep.iter().all(|&i| !(cards[i].category == "law" && cards[i].day == Some(1))));
    }

    #[test]
    fn empty_category_set_means_all() {
        let mut cards = dated_deck(&[1]);
        cards.push(card("art", "art-0", None, None));
        let query = DeckQuery::default();
        let keep = filter_deck(&cards, &query, &HashMap::new(), &HashMap::new(), &HashMap::new());
        assert_eq!(keep.len(), 2);

        let query = DeckQuery {
            categories: ["art".to_string()].into_iter().collect(),
            ..DeckQuery::default()
        };
        let keep = filter_deck(&cards, &query, &HashMap::new(), &HashMap::new(), &HashMap::new());
        assert_eq!(keep.len(), 1);
        assert_eq!(cards[keep[0]].id, "art-0");
    }

    #[test]
    fn favorite_filter_modes() {
        let cards = dated_deck(&[1, 2]);
        let mut favorites = HashMap::new();
        favorites.insert(cards[0].id.clone(), favorite_of(&cards[0].id, "t"));

        let mut query = DeckQuery {
            favorite_filter: FavoriteFilterMode::Favorites,
            ..DeckQuery::default()
        };
        let keep = filter_deck(&cards, &query, &favorites, &HashMap::new(), &HashMap::new());
        assert_eq!(keep, vec![0]);

        query.favorite_filter = FavoriteFilterMode::Normal;
        let keep = filter_deck(&cards, &query, &favorites, &HashMap::new(), &HashMap::new());
        assert_eq!(keep, vec![1]);
    }

    #[test]
    fn understanding_filter_excludes_unrated_cards() {
        let cards = dated_deck(&[1, 2, 3]);
        let mut understandings = HashMap::new();
        understandings.insert(
            cards[0].id.clone(),
            understanding_of(&cards[0].id, UnderstandingLevel::Low),
        );
        understandings.insert(
            cards[1].id.clone(),
            understanding_of(&cards[1].id, UnderstandingLevel::High),
        );
        let query = DeckQuery {
            levels: [UnderstandingLevel::Low].into_iter().collect(),
            ..DeckQuery::default()
        };
        let keep = filter_deck(&cards, &query, &HashMap::new(), &understandings, &HashMap::new());
        assert_eq!(keep, vec![0]);
    }

    #[test]
    fn trash_filter_modes() {
        let cards = dated_deck(&[1, 2]);
        let mut trash = HashMap::new();
        trash.insert(
            cards[1].id.clone(),
            TrashItem {
                card_id: cards[1].id.clone(),
                added_at: String::new(),
            },
        );

        let query = DeckQuery::default();
        let keep = filter_deck(&cards, &query, &HashMap::new(), &HashMap::new(), &trash);
        assert_eq!(keep, vec![0]);

        let query = DeckQuery {
            trash_filter: TrashFilterMode::Trash,
            ..DeckQuery::default()
        };
        let keep = filter_deck(&cards, &query, &HashMap::new(), &HashMap::new(), &trash);
        assert_eq!(keep, vec![1]);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut shuffle = ShuffleState::default();
        let mut rng = StdRng::seed_from_u64(7);
        shuffle.reshuffle_with(20, &mut rng);
        let mut seen: Vec<usize> = (0..20).filter_map(|p| shuffle.map(p)).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn ensure_keeps_order_while_length_is_stable() {
        let mut shuffle = ShuffleState::default();
        shuffle.ensure(10);
        let before: Vec<Option<usize>> = (0..10).map(|p| shuffle.map(p)).collect();
        shuffle.ensure(10);
        let after: Vec<Option<usize>> = (0..10).map(|p| shuffle.map(p)).collect();
        assert_eq!(before, after);

        // 长度变了才重洗，且排列收缩到新长度
        shuffle.ensure(5);
        assert!(shuffle.map(4).is_some());
        assert_eq!(shuffle.map(5), None);
    }

    #[test]
    fn reshuffle_redraws_the_permutation() {
        let mut shuffle = ShuffleState::default();
        let mut a = StdRng::seed_from_u64(1);
        let mut b = StdRng::seed_from_u64(2);
        shuffle.reshuffle_with(50, &mut a);
        let first: Vec<Option<usize>> = (0..50).map(|p| shuffle.map(p)).collect();
        shuffle.reshuffle_with(50, &mut b);
        let second: Vec<Option<usize>> = (0..50).map(|p| shuffle.map(p)).collect();
        assert_ne!(first, second);
    }

    #[test]
    fn manage_sort_toggle_cycles_and_prioritizes_recent_key() {
        let mut sort = ManageSort::default();
        sort.toggle(SortKey::Understanding);
        assert_eq!(sort.dir_of(SortKey::Understanding), Some(SortDir::Asc));
        sort.toggle(SortKey::FavoriteTime);
        assert_eq!(sort.keys[0].0, SortKey::FavoriteTime);
        sort.toggle(SortKey::Understanding);
        // 重新切换把该键提到最前
        assert_eq!(sort.keys[0], (SortKey::Understanding, SortDir::Desc));
        sort.toggle(SortKey::Understanding);
        assert_eq!(sort.dir_of(SortKey::Understanding), None);
        assert_eq!(sort.keys.len(), 1);
    }

    #[test]
    fn manage_sort_puts_missing_attribute_last_in_both_directions() {
        let cards = dated_deck(&[1, 2, 3]);
        let mut favorites = HashMap::new();
        favorites.insert(cards[0].id.clone(), favorite_of(&cards[0].id, "2025-01-02"));
        favorites.insert(cards[2].id.clone(), favorite_of(&cards[2].id, "2025-01-01"));

        let mut sort = ManageSort::default();
        sort.toggle(SortKey::FavoriteTime);
        let idxs: Vec<usize> = (0..cards.len()).collect();
        let sorted = sort_for_manage(&cards, &idxs, &sort, &favorites, &HashMap::new());
        assert_eq!(sorted, vec![2, 0, 1]);

        sort.toggle(SortKey::FavoriteTime);
        let sorted = sort_for_manage(&cards, &idxs, &sort, &favorites, &HashMap::new());
        assert_eq!(sorted, vec![0, 2, 1]);
    }

    #[test]
    fn understanding_asc_puts_high_first() {
        let cards = dated_deck(&[1, 2, 3]);
        let mut understandings = HashMap::new();
        understandings.insert(
            cards[0].id.clone(),
            understanding_of(&cards[0].id, UnderstandingLevel::Low),
        );
        understandings.insert(
            cards[1].id.clone(),
            understanding_of(&cards[1].id, UnderstandingLevel::High),
        );
        understandings.insert(
            cards[2].id.clone(),
            understanding_of(&cards[2].id, UnderstandingLevel::Medium),
        );
        let mut sort = ManageSort::default();
        sort.toggle(SortKey::Understanding);
        let idxs: Vec<usize> = (0..cards.len()).collect();
        let sorted = sort_for_manage(&cards, &idxs, &sort, &HashMap::new(), &understandings);
        assert_eq!(sorted, vec![1, 2, 0]);
    }

    #[test]
    fn equal_keys_keep_canonical_order() {
        let cards = dated_deck(&[1, 2, 3]);
        let mut sort = ManageSort::default();
        sort.toggle(SortKey::Understanding);
        let idxs: Vec<usize> = (0..cards.len()).collect();
        // 谁都没有理解度标注，全部并列，顺序不动
        let sorted = sort_for_manage(&cards, &idxs, &sort, &HashMap::new(), &HashMap::new());
        assert_eq!(sorted, idxs);
    }

    #[test]
    fn search_matches_content_and_explanation() {
        let mut c = card("law", "law-0", None, None);
        c.content = "宪法的基本原则".to_string();
        c.explanation = Some("Rule of Law".to_string());
        assert!(card_matches_query(&c, "基本"));
        assert!(card_matches_query(&c, "rule of"));
        assert!(!card_matches_query(&c, "刑法"));
        assert!(card_matches_query(&c, ""));
    }
}
