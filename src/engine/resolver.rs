use crate::engine::collection::ContentItem;
use crate::engine::model::Model;
use crate::error::FetchError;
use crate::transport::{EntityKey, RestClient};
use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub type EntityResult = Result<Rc<Model>, FetchError>;
pub type EntityFuture = Shared<LocalBoxFuture<'static, EntityResult>>;

/// ウィジェット1つ分の著者キャッシュ
///
/// 取得中・取得済みのどちらもキャッシュに残り、ウィジェットの寿命の間は破棄しない。
pub struct EntityResolver {
    client: Rc<dyn RestClient>,
    cache: RefCell<HashMap<EntityKey, EntityFuture>>,
    fetches: Cell<usize>,
}

impl EntityResolver {
    pub fn new(client: Rc<dyn RestClient>) -> Self {
        Self {
            client,
            cache: RefCell::new(HashMap::new()),
            fetches: Cell::new(0),
        }
    }

    pub fn resolve(&self, key: &EntityKey) -> EntityFuture {
        if let Some(pending) = self.cache.borrow().get(key) {
            return pending.clone();
        }

        log::debug!("resolving author {}", key);
        self.fetches.set(self.fetches.get() + 1);
        let pending = self
            .client
            .fetch_author(key)
            .map(|result| result.map(|author| Rc::new(Model::new(author))))
            .boxed_local()
            .shared();
        self.cache.borrow_mut().insert(key.clone(), pending.clone());
        pending
    }

    /// 項目が著者の解決機能と参照を持つ場合のみ解決する
    pub fn resolve_item(&self, item: &ContentItem) -> Option<(EntityKey, EntityFuture)> {
        let key = item.author_ref()?;
        let pending = self.resolve(&key);
        Some((key, pending))
    }

    pub fn is_cached(&self, key: &EntityKey) -> bool {
        self.cache.borrow().contains_key(key)
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// 実際に発行した取得の回数
    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }
}
