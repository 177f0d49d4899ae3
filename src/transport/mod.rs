pub mod http;
pub mod memory;

use crate::engine::model::Attributes;
use crate::error::FetchError;
use futures::future::LocalBoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use http::HttpRestClient;
pub use memory::MemoryRestClient;

/// クエリパラメータ（キー順を固定してリクエストを決定的にする）
pub type QueryParams = BTreeMap<String, Value>;

pub type FetchFuture<T> = LocalBoxFuture<'static, Result<T, FetchError>>;

/// 関連エンティティ（著者）の参照キー
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// 項目の `author` 値から参照キーを取り出す（0や空は参照なし）
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => match number.as_u64() {
                Some(0) => None,
                Some(id) => Some(Self(id.to_string())),
                None => None,
            },
            Value::String(text) => {
                let text = text.trim();
                if text.is_empty() || text == "0" {
                    None
                } else {
                    Some(Self(text.to_string()))
                }
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for EntityKey {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// リモートのコンテンツAPI
pub trait RestClient {
    /// ページング付きの項目一覧を取得
    fn fetch_items(&self, params: &QueryParams) -> FetchFuture<Vec<Value>>;

    /// 参照キーから著者データを取得
    fn fetch_author(&self, key: &EntityKey) -> FetchFuture<Attributes>;

    /// この種別の項目が著者の解決をサポートするか
    fn supports_author_lookup(&self, item_type: &str) -> bool {
        let _ = item_type;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_key_from_value() {
        assert_eq!(EntityKey::from_value(&json!(3)), Some(EntityKey::from(3u64)));
        assert_eq!(EntityKey::from_value(&json!(" 7 ")), Some(EntityKey::from("7")));
        assert_eq!(EntityKey::from_value(&json!(0)), None);
        assert_eq!(EntityKey::from_value(&json!("")), None);
        assert_eq!(EntityKey::from_value(&json!(null)), None);
        assert_eq!(EntityKey::from_value(&json!({"id": 1})), None);
    }
}
