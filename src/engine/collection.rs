use crate::engine::model::{Attributes, Model};
use crate::error::FetchError;
use crate::transport::{EntityKey, QueryParams, RestClient};
use chrono::{DateTime, NaiveDateTime};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

/// 項目取得時に必ず付与するクエリ（呼び出し側の指定が優先）
pub const DEFAULT_QUERY_PARAMS: [(&str, &str); 3] = [("_embed", "true"), ("order", "desc"), ("orderby", "date")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl ItemId {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_u64().map(ItemId),
            Value::String(text) => text.trim().parse().ok().map(ItemId),
            _ => None,
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 日付文字列を日時に変換する（RFC 3339 / `T` 区切り / 空白区切り）
pub fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    let text = value.as_str()?.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

/// 1件のコンテンツ項目（IDは不変、その他の属性は変更可能）
#[derive(Debug)]
pub struct ContentItem {
    id: ItemId,
    item_type: String,
    author_lookup: bool,
    model: Model,
}

impl ContentItem {
    /// `id` を持たない属性からは作成しない
    pub fn new(attributes: Attributes, author_lookup: bool) -> Option<Self> {
        let id = attributes.get("id").and_then(ItemId::from_value)?;
        let item_type = attributes
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("post")
            .to_string();
        Some(Self {
            id,
            item_type,
            author_lookup,
            model: Model::new(attributes),
        })
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn attributes(&self) -> Attributes {
        self.model.attributes()
    }

    pub fn date(&self) -> Option<NaiveDateTime> {
        self.model.get("date").as_ref().and_then(parse_date)
    }

    pub fn has_author_lookup(&self) -> bool {
        self.author_lookup
    }

    /// 著者の参照キー（解決機能を持たない項目では常に `None`）
    pub fn author_ref(&self) -> Option<EntityKey> {
        if !self.author_lookup {
            return None;
        }
        self.model.get("author").as_ref().and_then(EntityKey::from_value)
    }
}

/// 新しい日付が先、日付のない項目は最後、同じ日付はIDの大きい方が先
pub fn compare_items(a: &ContentItem, b: &ContentItem) -> Ordering {
    let by_date = match (a.date(), b.date()) {
        (Some(a_date), Some(b_date)) => b_date.cmp(&a_date),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date.then_with(|| b.id().cmp(&a.id()))
}

/// デフォルトのクエリを呼び出し側のパラメータに補う
pub fn with_default_params(mut params: QueryParams) -> QueryParams {
    for (key, value) in DEFAULT_QUERY_PARAMS {
        let value = match value {
            "true" => Value::Bool(true),
            other => Value::String(other.to_string()),
        };
        params.entry(key.to_string()).or_insert(value);
    }
    params
}

type ItemCallback = Rc<dyn Fn(&Rc<ContentItem>)>;
type EventCallback = Rc<dyn Fn()>;

/// コンテンツ項目のコレクション
///
/// 日付の新しい順に並べ、取得結果は既存項目を保ったまま追加マージする。
pub struct ItemCollection {
    items: RefCell<Vec<Rc<ContentItem>>>,
    client: Rc<dyn RestClient>,
    add_listeners: RefCell<Vec<ItemCallback>>,
    change_listeners: RefCell<Vec<EventCallback>>,
    sync_listeners: RefCell<Vec<EventCallback>>,
    self_ref: Weak<ItemCollection>,
}

impl ItemCollection {
    pub fn new(client: Rc<dyn RestClient>) -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            items: RefCell::new(Vec::new()),
            client,
            add_listeners: RefCell::new(Vec::new()),
            change_listeners: RefCell::new(Vec::new()),
            sync_listeners: RefCell::new(Vec::new()),
            self_ref: weak.clone(),
        })
    }

    /// 埋め込みデータから取得なしで初期化
    pub fn with_items(client: Rc<dyn RestClient>, items: Vec<Value>) -> Rc<Self> {
        let collection = Self::new(client);
        collection.add_values(items);
        collection
    }

    pub fn items(&self) -> Vec<Rc<ContentItem>> {
        self.items.borrow().clone()
    }

    pub fn get(&self, id: ItemId) -> Option<Rc<ContentItem>> {
        self.items.borrow().iter().find(|item| item.id() == id).cloned()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.borrow().iter().any(|item| item.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn sort(&self) {
        self.items.borrow_mut().sort_by(|a, b| compare_items(a, b));
    }

    /// リモートから取得して追加マージし、`sync` を通知する
    ///
    /// 戻り値は新たに追加された件数。失敗はそのまま呼び出し側に返す。
    pub async fn fetch(&self, params: QueryParams) -> Result<usize, FetchError> {
        let params = with_default_params(params);
        debug!("fetching items with {:?}", params);

        let values = self.client.fetch_items(&params).await?;
        let received = values.len();
        let added = self.add_values(values);
        debug!("fetched {} items, {} new", received, added.len());

        Self::emit(&self.sync_listeners);
        Ok(added.len())
    }

    /// 未知のIDの項目だけを追加する（既存項目はローカルの変更を保つ）
    pub fn add_values(&self, values: Vec<Value>) -> Vec<Rc<ContentItem>> {
        let mut added: Vec<Rc<ContentItem>> = Vec::new();

        for value in values {
            let attributes = match value {
                Value::Object(attributes) => attributes,
                other => {
                    warn!("skipping non-object item: {}", other);
                    continue;
                }
            };
            let item_type = attributes.get("type").and_then(Value::as_str).unwrap_or("post");
            let author_lookup = self.client.supports_author_lookup(item_type);
            let Some(item) = ContentItem::new(attributes, author_lookup) else {
                warn!("skipping item without a numeric id");
                continue;
            };
            if self.contains(item.id()) || added.iter().any(|existing| existing.id() == item.id()) {
                trace!("item {} already present", item.id());
                continue;
            }

            let item = Rc::new(item);
            self.watch_item(&item);
            added.push(item);
        }

        if added.is_empty() {
            return added;
        }

        self.items.borrow_mut().extend(added.iter().cloned());
        self.sort();

        let listeners = self.add_listeners.borrow().clone();
        for item in &added {
            for listener in &listeners {
                listener(item);
            }
        }
        added
    }

    pub fn on_add<F>(&self, callback: F)
    where
        F: Fn(&Rc<ContentItem>) + 'static,
    {
        self.add_listeners.borrow_mut().push(Rc::new(callback));
    }

    /// 項目の属性変更（並べ替え後）の通知
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn() + 'static,
    {
        self.change_listeners.borrow_mut().push(Rc::new(callback));
    }

    /// 取得完了の通知
    pub fn on_sync<F>(&self, callback: F)
    where
        F: Fn() + 'static,
    {
        self.sync_listeners.borrow_mut().push(Rc::new(callback));
    }

    fn watch_item(&self, item: &Rc<ContentItem>) {
        let collection = self.self_ref.clone();
        item.model().on_change(move |_, _| {
            if let Some(collection) = collection.upgrade() {
                collection.sort();
                Self::emit(&collection.change_listeners);
            }
        });
    }

    fn emit(listeners: &RefCell<Vec<EventCallback>>) {
        let listeners = listeners.borrow().clone();
        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for ItemCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemCollection")
            .field("items", &*self.items.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryRestClient;
    use proptest::prelude::*;
    use serde_json::json;
    use std::cell::Cell;

    fn item(id: u64, date: &str) -> Value {
        json!({"id": id, "type": "post", "date": date, "author": 1, "title": {"raw": "", "rendered": ""}})
    }

    fn ids(collection: &ItemCollection) -> Vec<u64> {
        collection.items().iter().map(|item| item.id().0).collect()
    }

    #[test]
    fn test_parse_date_forms() {
        let expected = NaiveDateTime::parse_from_str("2016-12-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_date(&json!("2016-12-01T10:00:00")), Some(expected));
        assert_eq!(parse_date(&json!("2016-12-01 10:00:00")), Some(expected));
        assert_eq!(parse_date(&json!("2016-12-01T10:00:00Z")), Some(expected));
        assert_eq!(parse_date(&json!("yesterday")), None);
        assert_eq!(parse_date(&json!(1480586400)), None);
    }

    #[test]
    fn test_items_sort_newest_first() {
        let client = Rc::new(MemoryRestClient::new());
        let collection = ItemCollection::with_items(
            client,
            vec![
                item(1, "2016-01-01T00:00:00"),
                item(2, "2016-03-01T00:00:00"),
                item(3, "2016-02-01T00:00:00"),
            ],
        );
        assert_eq!(ids(&collection), vec![2, 3, 1]);
    }

    #[test]
    fn test_equal_dates_break_ties_by_id() {
        let client = Rc::new(MemoryRestClient::new());
        let collection = ItemCollection::with_items(
            client,
            vec![
                item(4, "2016-01-01T00:00:00"),
                item(9, "2016-01-01T00:00:00"),
                item(6, "2016-01-01T00:00:00"),
                json!({"id": 1, "type": "post"}),
            ],
        );
        assert_eq!(ids(&collection), vec![9, 6, 4, 1]);
    }

    #[test]
    fn test_item_change_resorts_and_notifies() {
        let client = Rc::new(MemoryRestClient::new());
        let collection = ItemCollection::with_items(
            client,
            vec![item(1, "2016-01-01T00:00:00"), item(2, "2016-02-01T00:00:00")],
        );
        let changes = Rc::new(Cell::new(0));
        let seen = changes.clone();
        collection.on_change(move || seen.set(seen.get() + 1));

        let oldest = collection.get(ItemId(1)).unwrap();
        oldest.model().set("date", json!("2016-05-01T00:00:00"));

        assert_eq!(changes.get(), 1);
        assert_eq!(ids(&collection), vec![1, 2]);
    }

    #[test]
    fn test_default_params_do_not_override_caller() {
        let mut params = QueryParams::new();
        params.insert("order".to_string(), json!("asc"));
        params.insert("per_page".to_string(), json!(10));

        let merged = with_default_params(params);
        assert_eq!(merged["order"], json!("asc"));
        assert_eq!(merged["orderby"], json!("date"));
        assert_eq!(merged["_embed"], json!(true));
        assert_eq!(merged["per_page"], json!(10));
    }

    #[test]
    fn test_author_ref_requires_capability() {
        let client = Rc::new(MemoryRestClient::new());
        client.disable_author_lookup("page");
        let collection = ItemCollection::with_items(
            client,
            vec![item(1, "2016-01-01T00:00:00"), json!({"id": 2, "type": "page", "author": 3})],
        );
        assert_eq!(collection.get(ItemId(1)).unwrap().author_ref(), Some(EntityKey::from(1u64)));
        assert_eq!(collection.get(ItemId(2)).unwrap().author_ref(), None);
    }

    #[tokio::test]
    async fn test_fetch_merges_without_replacing() {
        let client = Rc::new(MemoryRestClient::with_items(vec![
            item(3, "2016-03-01T00:00:00"),
            item(2, "2016-02-01T00:00:00"),
            item(1, "2016-01-01T00:00:00"),
        ]));
        let collection = ItemCollection::with_items(client.clone(), vec![item(2, "2016-02-01T00:00:00")]);
        collection.get(ItemId(2)).unwrap().model().set("slug", json!("edited-locally"));

        let added = Rc::new(RefCell::new(Vec::new()));
        let seen = added.clone();
        collection.on_add(move |item| seen.borrow_mut().push(item.id().0));
        let syncs = Rc::new(Cell::new(0));
        let synced = syncs.clone();
        collection.on_sync(move || synced.set(synced.get() + 1));

        let mut params = QueryParams::new();
        params.insert("per_page".to_string(), json!(3));
        assert_eq!(collection.fetch(params).await.unwrap(), 2);

        assert_eq!(ids(&collection), vec![3, 2, 1]);
        assert_eq!(*added.borrow(), vec![3, 1]);
        assert_eq!(syncs.get(), 1);
        assert_eq!(
            collection.get(ItemId(2)).unwrap().model().get("slug"),
            Some(json!("edited-locally"))
        );
        assert_eq!(client.item_requests()[0]["orderby"], json!("date"));
    }

    proptest! {
        #[test]
        fn prop_sorted_descending_with_id_tiebreak(offsets in proptest::collection::vec(0i64..20, 1..30)) {
            let base = DateTime::from_timestamp(1_480_000_000, 0).unwrap().naive_utc();
            let values: Vec<Value> = offsets
                .iter()
                .enumerate()
                .map(|(index, offset)| {
                    let date = base + chrono::Duration::hours(*offset);
                    item(index as u64 + 1, &date.format("%Y-%m-%dT%H:%M:%S").to_string())
                })
                .collect();

            let collection = ItemCollection::with_items(Rc::new(MemoryRestClient::new()), values);
            let items = collection.items();
            prop_assert_eq!(items.len(), offsets.len());
            for pair in items.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let (a_date, b_date) = (a.date().unwrap(), b.date().unwrap());
                prop_assert!(a_date > b_date || (a_date == b_date && a.id() > b.id()));
            }
        }
    }
}
