// 标注持久化：收藏 / 理解度 / 回收站共用一个泛型 store
// 写入策略是乐观的：先改本地，再发一次远端写，失败只报不回滚
// 远端文档是 JSON 数组；旧版裸字符串数组在装载时就地升级

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::card::CardKeyed;
use crate::gist::{GistClient, GistError, Result as GistResult};
use crate::migrate;

// ---------------- 会话状态文件 ----------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionFile {
    #[serde(default)]
    pub github_token: Option<String>,
    /// 文件名 → gist id 的缓存，免得每次启动都扫列表
    #[serde(default)]
    pub gist_ids: HashMap<String, String>,
}

#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    pub data: SessionFile,
}

impl SessionStore {
    pub fn open(path: PathBuf) -> Self {
        let data = if path.exists() {
            match fs::read_to_string(&path) {
                Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "读取会话状态失败，按全新会话处理");
                    SessionFile::default()
                }
            }
        } else {
            SessionFile::default()
        };
        Self { path, data }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("创建状态目录失败: {}", dir.display()))?;
        }
        let s = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, s)
            .with_context(|| format!("写入会话状态失败: {}", self.path.display()))?;
        Ok(())
    }

    pub fn set_token(&mut self, token: Option<String>) -> Result<()> {
        self.data.github_token = token;
        self.save()
    }

    pub fn gist_id(&self, filename: &str) -> Option<&str> {
        self.data.gist_ids.get(filename).map(String::as_str)
    }

    pub fn remember_gist_id(&mut self, filename: &str, gist_id: String) -> Result<()> {
        self.data.gist_ids.insert(filename.to_string(), gist_id);
        self.save()
    }

    pub fn forget_gist_id(&mut self, filename: &str) -> Result<()> {
        self.data.gist_ids.remove(filename);
        self.save()
    }
}

// ---------------- 标注 store ----------------

#[derive(Debug, Default)]
pub struct AnnotationStore<T> {
    items: HashMap<String, T>,
    gist_id: Option<String>,
}

impl<T> AnnotationStore<T>
where
    T: CardKeyed + Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            gist_id: None,
        }
    }

    /// 从远端装载。没有文档视为空集；装载中完成旧 ID 迁移并把结果推回一次
    pub fn load(&mut self, client: &GistClient, session: &mut SessionStore) -> Result<()> {
        let gist_id = match session.gist_id(T::DOC_FILENAME) {
            Some(id) => Some(id.to_string()),
            None => {
                let found = client.find_document(T::DOC_FILENAME, T::DOC_DESCRIPTION)?;
                if let Some(id) = &found {
                    session.remember_gist_id(T::DOC_FILENAME, id.clone())?;
                }
                found
            }
        };

        let Some(gist_id) = gist_id else {
            self.items.clear();
            self.gist_id = None;
            return Ok(());
        };

        let content = match client.fetch_document(&gist_id, T::DOC_FILENAME) {
            Ok(content) => content,
            // 缓存的 id 已失效（gist 被删），忘掉它按不存在处理
            Err(GistError::Api { status: 404, .. }) => {
                tracing::warn!(gist_id = %gist_id, filename = T::DOC_FILENAME, "缓存的 gist 已不存在");
                session.forget_gist_id(T::DOC_FILENAME)?;
                self.items.clear();
                self.gist_id = None;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let decoded = match content {
            Some(s) => decode_items::<T>(&s),
            None => Vec::new(),
        };
        let count = decoded.len();
        let (migrated, changed) = migrate::migrate_items(decoded);

        self.items = migrated
            .into_iter()
            .map(|item| (item.card_id().to_string(), item))
            .collect();
        self.gist_id = Some(gist_id.clone());
        tracing::info!(filename = T::DOC_FILENAME, count, "标注装载完成");

        if changed {
            let payload = self.payload()?;
            client.update_document(&gist_id, T::DOC_FILENAME, &payload)?;
            tracing::info!(filename = T::DOC_FILENAME, "旧 ID 迁移结果已推回远端");
        }
        Ok(())
    }

    // 按 card_id 排序的 pretty JSON，保证同样的集合写出同样的字节
    fn payload(&self) -> serde_json::Result<String> {
        let mut values: Vec<&T> = self.items.values().collect();
        values.sort_by(|a, b| a.card_id().cmp(b.card_id()));
        serde_json::to_string_pretty(&values)
    }

    // 一次远端写。文档不存在就新建并记住 id
    fn push(&mut self, client: &GistClient, session: &mut SessionStore) -> GistResult<()> {
        let payload = self.payload()?;
        match &self.gist_id {
            Some(id) => client.update_document(id, T::DOC_FILENAME, &payload)?,
            None => {
                let id = client.create_document(T::DOC_FILENAME, T::DOC_DESCRIPTION, &payload)?;
                if let Err(err) = session.remember_gist_id(T::DOC_FILENAME, id.clone()) {
                    tracing::warn!(error = %err, "gist id 写入会话缓存失败");
                }
                self.gist_id = Some(id);
            }
        }
        Ok(())
    }

    /// 写入或覆盖一条标注。本地先生效，远端失败不回滚
    pub fn upsert(
        &mut self,
        item: T,
        client: &GistClient,
        session: &mut SessionStore,
    ) -> GistResult<()> {
        self.items.insert(item.card_id().to_string(), item);
        self.push(client, session)
    }

    /// 删除一条标注；本来就没有则不发远端写
    pub fn remove(
        &mut self,
        card_id: &str,
        client: &GistClient,
        session: &mut SessionStore,
    ) -> GistResult<()> {
        if self.items.remove(card_id).is_none() {
            return Ok(());
        }
        self.push(client, session)
    }

    /// 批量写入，整批只发一次远端写
    pub fn upsert_many(
        &mut self,
        items: Vec<T>,
        client: &GistClient,
        session: &mut SessionStore,
    ) -> GistResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        for item in items {
            self.items.insert(item.card_id().to_string(), item);
        }
        self.push(client, session)
    }

    /// 批量删除，整批只发一次远端写
    pub fn remove_many(
        &mut self,
        card_ids: &[String],
        client: &GistClient,
        session: &mut SessionStore,
    ) -> GistResult<()> {
        let mut removed = false;
        for id in card_ids {
            removed |= self.items.remove(id).is_some();
        }
        if !removed {
            return Ok(());
        }
        self.push(client, session)
    }

    pub fn contains(&self, card_id: &str) -> bool {
        self.items.contains_key(card_id)
    }

    pub fn get(&self, card_id: &str) -> Option<&T> {
        self.items.get(card_id)
    }

    pub fn items(&self) -> &HashMap<String, T> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 断开远端时清空本地状态
    pub fn reset(&mut self) {
        self.items.clear();
        self.gist_id = None;
    }
}

// 远端文档容错解码：数组元素可以是完整记录，也可以是旧版裸 card_id 字符串
// 单条坏记录告警跳过，不拖垮整个文档
fn decode_items<T: CardKeyed + DeserializeOwned>(content: &str) -> Vec<T> {
    let values: Vec<serde_json::Value> = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(error = %err, filename = T::DOC_FILENAME, "标注文档不是 JSON 数组，按空集处理");
            return Vec::new();
        }
    };
    let now = chrono::Utc::now().to_rfc3339();
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            serde_json::Value::String(card_id) => match T::from_bare_id(card_id.clone(), now.clone())
            {
                Some(item) => out.push(item),
                None => {
                    tracing::warn!(card_id = %card_id, filename = T::DOC_FILENAME, "裸 ID 条目无法补全，丢弃");
                }
            },
            other => match serde_json::from_value::<T>(other) {
                Ok(item) => out.push(item),
                Err(err) => {
                    tracing::warn!(error = %err, filename = T::DOC_FILENAME, "跳过无法解析的标注记录");
                }
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{FavoriteItem, TrashItem, UnderstandingItem, UnderstandingLevel};

    #[test]
    fn session_store_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state").join("quizcard-state.json");

        let mut store = SessionStore::open(path.clone());
        assert!(store.data.github_token.is_none());
        store.set_token(Some("ghp_test".to_string())).unwrap();
        store
            .remember_gist_id("quiz-card-favorites.json", "abc".to_string())
            .unwrap();

        let reopened = SessionStore::open(path);
        assert_eq!(reopened.data.github_token.as_deref(), Some("ghp_test"));
        assert_eq!(reopened.gist_id("quiz-card-favorites.json"), Some("abc"));
        assert_eq!(reopened.gist_id("quiz-card-trash.json"), None);
    }

    #[test]
    fn corrupt_session_file_becomes_fresh_session() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("quizcard-state.json");
        fs::write(&path, "{broken").unwrap();
        let store = SessionStore::open(path);
        assert!(store.data.github_token.is_none());
        assert!(store.data.gist_ids.is_empty());
    }

    #[test]
    fn decode_accepts_full_records() {
        let raw = r#"[
            { "cardId": "law-2025-11-18-0", "addedAt": "2025-11-18T00:00:00Z" },
            { "cardId": "law-0", "addedAt": "2025-11-19T00:00:00Z" }
        ]"#;
        let items: Vec<FavoriteItem> = decode_items(raw);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].card_id, "law-2025-11-18-0");
    }

    #[test]
    fn decode_upgrades_bare_id_strings() {
        let raw = r#"["law-0", { "cardId": "law-1", "addedAt": "t" }]"#;
        let items: Vec<FavoriteItem> = decode_items(raw);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].card_id, "law-0");
        assert!(!items[0].added_at.is_empty());
    }

    #[test]
    fn bare_id_understanding_entries_are_dropped() {
        // 裸 ID 推不出理解度档位，只能丢
        let raw = r#"["law-0", { "cardId": "law-1", "level": "high", "updatedAt": "t" }]"#;
        let items: Vec<UnderstandingItem> = decode_items(raw);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].card_id, "law-1");
        assert_eq!(items[0].level, UnderstandingLevel::High);
    }

    #[test]
    fn decode_skips_malformed_records() {
        let raw = r#"[
            { "cardId": "law-0", "level": null, "updatedAt": "t" },
            { "cardId": "law-1", "level": "low", "updatedAt": "t" },
            42
        ]"#;
        let items: Vec<UnderstandingItem> = decode_items(raw);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].card_id, "law-1");
    }

    #[test]
    fn decode_of_non_array_document_is_empty() {
        let items: Vec<TrashItem> = decode_items(r#"{"cardId":"law-0"}"#);
        assert!(items.is_empty());
        let items: Vec<TrashItem> = decode_items("not json at all");
        assert!(items.is_empty());
    }

    #[test]
    fn payload_is_sorted_by_card_id() {
        let mut store: AnnotationStore<FavoriteItem> = AnnotationStore::new();
        for id in ["law-2", "law-0", "law-1"] {
            store
                .items
                .insert(id.to_string(), FavoriteItem::new(id.to_string()));
        }
        let payload = store.payload().unwrap();
        let a = payload.find("law-0").unwrap();
        let b = payload.find("law-1").unwrap();
        let c = payload.find("law-2").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn reset_clears_local_state() {
        let mut store: AnnotationStore<FavoriteItem> = AnnotationStore::new();
        store
            .items
            .insert("law-0".to_string(), FavoriteItem::new("law-0".to_string()));
        store.gist_id = Some("abc".to_string());
        assert!(!store.is_empty());
        assert!(store.contains("law-0"));

        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.get("law-0").is_none());
        assert!(store.gist_id.is_none());
    }

    #[test]
    fn local_toggle_twice_restores_the_map() {
        let mut store: AnnotationStore<FavoriteItem> = AnnotationStore::new();
        store
            .items
            .insert("law-0".to_string(), FavoriteItem::new("law-0".to_string()));
        let before = store.payload().unwrap();

        store
            .items
            .insert("law-1".to_string(), FavoriteItem::new("law-1".to_string()));
        store.items.remove("law-1");
        assert_eq!(store.payload().unwrap(), before);
    }
}
