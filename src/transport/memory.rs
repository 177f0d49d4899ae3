use super::{EntityKey, FetchFuture, QueryParams, RestClient};
use crate::engine::model::{coerce_u64, Attributes};
use crate::error::FetchError;
use futures::future;
use futures::FutureExt;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// メモリ上の項目と著者を返すクライアント（ネイティブ環境・オフライン用）
///
/// 項目は登録順（サーバー側で並べ替え済みとみなす）に `per_page` 件まで返す。
/// 受けたリクエストは記録され、後から確認できる。
#[derive(Debug, Default)]
pub struct MemoryRestClient {
    items: RefCell<Vec<Value>>,
    authors: RefCell<HashMap<EntityKey, Attributes>>,
    item_requests: RefCell<Vec<QueryParams>>,
    author_requests: RefCell<Vec<EntityKey>>,
    types_without_authors: RefCell<HashSet<String>>,
}

impl MemoryRestClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<Value>) -> Self {
        let client = Self::default();
        *client.items.borrow_mut() = items;
        client
    }

    pub fn push_item(&self, item: Value) {
        self.items.borrow_mut().push(item);
    }

    pub fn add_author(&self, key: impl Into<EntityKey>, author: Attributes) {
        self.authors.borrow_mut().insert(key.into(), author);
    }

    /// 指定した種別の項目では著者を解決しない
    pub fn disable_author_lookup(&self, item_type: &str) {
        self.types_without_authors.borrow_mut().insert(item_type.to_string());
    }

    pub fn item_requests(&self) -> Vec<QueryParams> {
        self.item_requests.borrow().clone()
    }

    pub fn author_requests(&self) -> Vec<EntityKey> {
        self.author_requests.borrow().clone()
    }
}

impl RestClient for MemoryRestClient {
    fn fetch_items(&self, params: &QueryParams) -> FetchFuture<Vec<Value>> {
        self.item_requests.borrow_mut().push(params.clone());

        let per_page = params
            .get("per_page")
            .and_then(coerce_u64)
            .map_or(usize::MAX, |n| n as usize);
        let items: Vec<Value> = self.items.borrow().iter().take(per_page).cloned().collect();
        log::trace!("memory client serving {} items", items.len());

        future::ready(Ok(items)).boxed_local()
    }

    fn fetch_author(&self, key: &EntityKey) -> FetchFuture<Attributes> {
        self.author_requests.borrow_mut().push(key.clone());

        let result = match self.authors.borrow().get(key) {
            Some(author) => Ok(author.clone()),
            None => Err(FetchError::Status {
                status: 404,
                url: format!("memory://users/{}", key),
            }),
        };
        future::ready(result).boxed_local()
    }

    fn supports_author_lookup(&self, item_type: &str) -> bool {
        !self.types_without_authors.borrow().contains(item_type)
    }
}
