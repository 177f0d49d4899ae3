use crate::customize::channel::{LiveSettings, Setting, SubscriptionId};
use crate::engine::collection::{ContentItem, ItemId};
use crate::engine::model::Attributes;
use lazy_static::lazy_static;
use log::{debug, trace, warn};
use regex::Regex;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::rc::{Rc, Weak};

lazy_static! {
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"\n\n+").unwrap();
}

/// `{raw, rendered}` 形式で差分を取るフィールド
const TEXT_FIELDS: [&str; 3] = ["title", "content", "excerpt"];
/// そのまま転送するフィールド
const VERBATIM_FIELDS: [&str; 2] = ["author", "slug"];

/// 項目に対応するライブ設定ID（`post[<type>][<id>]`）
pub fn setting_id(item: &ContentItem) -> String {
    format!("post[{}][{}]", item.item_type(), item.id())
}

/// 空行区切りを段落タグで包む
pub fn wrap_paragraphs(text: &str) -> String {
    format!("<p>{}</p>", PARAGRAPH_BREAK.split(text).collect::<Vec<_>>().join("</p><p>"))
}

/// 設定値から項目の属性更新を組み立てて1回で適用する
///
/// 設定値にないフィールドは触らない。変更があれば `true`。
pub fn update_item(item: &ContentItem, post_data: &Value) -> bool {
    let Some(post_data) = post_data.as_object() else {
        warn!("post setting for item {} is not an object", item.id());
        return false;
    };
    let mut attributes = Attributes::new();

    for field in TEXT_FIELDS {
        let Some(value) = post_data.get(&format!("post_{}", field)) else {
            continue;
        };
        let current_raw = item.model().get(field).and_then(|current| current.get("raw").cloned());
        if current_raw.as_ref() == Some(value) {
            continue;
        }
        let rendered = match value.as_str() {
            Some(text) if !text.is_empty() && field != "title" => Value::String(wrap_paragraphs(text)),
            _ => value.clone(),
        };
        attributes.insert(field.to_string(), json!({"raw": value, "rendered": rendered}));
    }

    for field in VERBATIM_FIELDS {
        if let Some(value) = post_data.get(&format!("post_{}", field)) {
            attributes.insert(field.to_string(), value.clone());
        }
    }

    if let Some(date) = post_data.get("post_date").and_then(Value::as_str) {
        attributes.insert("date".to_string(), Value::String(date.replacen(' ', "T", 1)));
    }

    item.model().set_many(attributes)
}

type TrackedItems = RefCell<HashMap<ItemId, Vec<Weak<ContentItem>>>>;

#[derive(Debug)]
struct Binding {
    setting_id: String,
    /// 解除後に届いた設定を見分けるための世代
    token: u64,
    subscription: Option<SubscriptionId>,
}

/// 同じIDの生きている項目すべてに設定値を反映する（死んだ参照はここで捨てる）
fn update_tracked(tracked: &TrackedItems, id: ItemId, post_data: &Value) -> usize {
    let items: Vec<Rc<ContentItem>> = match tracked.borrow_mut().get_mut(&id) {
        Some(items) => {
            items.retain(|weak| weak.strong_count() > 0);
            items.iter().filter_map(Weak::upgrade).collect()
        }
        None => Vec::new(),
    };
    items.iter().filter(|item| update_item(item, post_data)).count()
}

/// 項目とライブ設定の対応付け
///
/// 設定の購読はIDごとに1つで、同じIDを表示するウィジェットが複数あれば全項目に配る。
pub struct PostPreviewBridge {
    channel: Rc<LiveSettings>,
    bindings: Rc<RefCell<HashMap<ItemId, Binding>>>,
    tracked: Rc<TrackedItems>,
    next_token: Cell<u64>,
}

impl PostPreviewBridge {
    pub fn new(channel: Rc<LiveSettings>) -> Self {
        Self {
            channel,
            bindings: Rc::new(RefCell::new(HashMap::new())),
            tracked: Rc::new(RefCell::new(HashMap::new())),
            next_token: Cell::new(0),
        }
    }

    /// 項目の設定を購読する
    ///
    /// 購読済みのIDなら既存の購読に項目を足すだけで `false`。同期済みで設定があれば
    /// その場で現在値を反映する。未同期のうちは最初の反映を同期完了まで遅らせ、
    /// その時点の値を使う。
    pub fn observe(&self, item: &Rc<ContentItem>) -> bool {
        let item_id = item.id();
        {
            let mut tracked = self.tracked.borrow_mut();
            let items = tracked.entry(item_id).or_default();
            items.retain(|weak| weak.strong_count() > 0);
            if !items.iter().any(|weak| ptr::eq(weak.as_ptr(), Rc::as_ptr(item))) {
                items.push(Rc::downgrade(item));
            }
        }

        let bound = self.bindings.borrow().get(&item_id).map(|binding| binding.setting_id.clone());
        if let Some(bound) = bound {
            if self.channel.is_synchronized() {
                if let Some(setting) = self.channel.setting(&bound) {
                    update_item(item, &setting.get());
                }
            }
            return false;
        }

        let id = setting_id(item);
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.bindings.borrow_mut().insert(
            item_id,
            Binding {
                setting_id: id.clone(),
                token,
                subscription: None,
            },
        );
        trace!("observing {}", id);

        let channel = Rc::downgrade(&self.channel);
        let bindings = Rc::downgrade(&self.bindings);
        let tracked = Rc::downgrade(&self.tracked);
        self.channel.when_setting(&id, move |setting: &Rc<Setting>| {
            let Some(bindings) = bindings.upgrade() else {
                return;
            };
            let current = bindings.borrow().get(&item_id).is_some_and(|binding| binding.token == token);
            if !current {
                trace!("{} arrived after release", setting.id());
                return;
            }

            let listener_items = tracked.clone();
            let subscription = setting.bind(move |post_data| {
                if let Some(tracked) = listener_items.upgrade() {
                    update_tracked(&tracked, item_id, post_data);
                }
            });
            if let Some(binding) = bindings.borrow_mut().get_mut(&item_id) {
                binding.subscription = Some(subscription);
            }

            let setting = setting.clone();
            let apply = move || {
                if let Some(tracked) = tracked.upgrade() {
                    update_tracked(&tracked, item_id, &setting.get());
                }
            };
            match channel.upgrade() {
                Some(channel) if !channel.is_synchronized() => channel.on_synchronized(apply),
                _ => apply(),
            }
        });
        true
    }

    /// 項目の追跡をやめる
    ///
    /// 同じIDの項目がほかに残っていなければ設定の購読も解除して `true` を返す。
    pub fn release(&self, item: &ContentItem) -> bool {
        let item_id = item.id();
        {
            let mut tracked = self.tracked.borrow_mut();
            let Some(items) = tracked.get_mut(&item_id) else {
                return false;
            };
            items.retain(|weak| weak.strong_count() > 0 && !ptr::eq(weak.as_ptr(), item));
            if !items.is_empty() {
                return false;
            }
            tracked.remove(&item_id);
        }

        let Some(binding) = self.bindings.borrow_mut().remove(&item_id) else {
            return false;
        };
        if let Some(subscription) = binding.subscription {
            self.channel.unbind(&binding.setting_id, subscription);
        }
        debug!("released {}", binding.setting_id);
        true
    }

    pub fn release_items(&self, items: &[Rc<ContentItem>]) -> usize {
        items.iter().filter(|item| self.release(item)).count()
    }

    /// サーバーが描画した項目データで上書きする
    pub fn apply_rendered_resources(&self, resources: &Attributes) -> usize {
        let mut applied = 0;
        for (post_id, resource) in resources {
            let Some(id) = ItemId::from_value(&Value::String(post_id.clone())) else {
                continue;
            };
            let items = self.tracked_items(id);
            if items.is_empty() {
                continue;
            }
            match resource.as_object() {
                Some(resource) => {
                    for item in &items {
                        item.model().set_many(resource.clone());
                    }
                    applied += 1;
                }
                None => warn!("rendered resource for item {} is not an object", post_id),
            }
        }
        debug!("applied {} rendered resources", applied);
        applied
    }

    /// `render-partials-response` の受け口（`rest_post_resources` がなければ無視）
    pub fn on_render_partials_response(&self, data: &Value) -> usize {
        match data.get("rest_post_resources").and_then(Value::as_object) {
            Some(resources) => self.apply_rendered_resources(resources),
            None => 0,
        }
    }

    pub fn is_bound(&self, id: ItemId) -> bool {
        self.bindings.borrow().contains_key(&id)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.borrow().len()
    }

    fn tracked_items(&self, id: ItemId) -> Vec<Rc<ContentItem>> {
        self.tracked
            .borrow()
            .get(&id)
            .map(|items| items.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for PostPreviewBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostPreviewBridge")
            .field("bindings", &*self.bindings.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64) -> Rc<ContentItem> {
        let attributes = json!({
            "id": id,
            "type": "post",
            "date": "2016-01-01T00:00:00",
            "author": 1,
            "slug": "hello",
            "title": {"raw": "Hello", "rendered": "Hello"},
            "content": {"raw": "Body", "rendered": "<p>Body</p>"}
        });
        Rc::new(ContentItem::new(attributes.as_object().cloned().unwrap(), true).unwrap())
    }

    fn count_changes(item: &ContentItem) -> Rc<Cell<usize>> {
        let changes = Rc::new(Cell::new(0));
        let seen = changes.clone();
        item.model().on_change(move |_, _| seen.set(seen.get() + 1));
        changes
    }

    #[test]
    fn test_same_title_is_not_a_change() {
        let item = item(1);
        let changes = count_changes(&item);
        assert!(!update_item(&item, &json!({"post_title": "Hello"})));
        assert_eq!(changes.get(), 0);
    }

    #[test]
    fn test_new_title_sets_raw_and_rendered() {
        let item = item(1);
        assert!(update_item(&item, &json!({"post_title": "Hi"})));
        assert_eq!(item.model().get("title"), Some(json!({"raw": "Hi", "rendered": "Hi"})));
    }

    #[test]
    fn test_content_is_paragraph_wrapped() {
        let item = item(1);
        update_item(&item, &json!({"post_content": "one\n\ntwo\n\n\nthree", "post_excerpt": ""}));
        assert_eq!(
            item.model().get("content"),
            Some(json!({"raw": "one\n\ntwo\n\n\nthree", "rendered": "<p>one</p><p>two</p><p>three</p>"}))
        );
        assert_eq!(item.model().get("excerpt"), Some(json!({"raw": "", "rendered": ""})));
    }

    #[test]
    fn test_verbatim_fields_and_date() {
        let item = item(1);
        let changes = count_changes(&item);
        update_item(
            &item,
            &json!({"post_author": 3, "post_slug": "renamed", "post_date": "2017-02-03 04:05:06"}),
        );
        assert_eq!(changes.get(), 1);
        assert_eq!(item.model().get("author"), Some(json!(3)));
        assert_eq!(item.model().get("slug"), Some(json!("renamed")));
        assert_eq!(item.model().get("date"), Some(json!("2017-02-03T04:05:06")));
        assert_eq!(item.model().get("title"), Some(json!({"raw": "Hello", "rendered": "Hello"})));
    }

    #[test]
    fn test_observe_is_idempotent() {
        let channel = Rc::new(LiveSettings::new());
        let bridge = PostPreviewBridge::new(channel.clone());
        let item = item(4);

        assert!(bridge.observe(&item));
        assert!(!bridge.observe(&item));
        assert!(bridge.is_bound(ItemId(4)));
        assert_eq!(bridge.binding_count(), 1);

        channel.mark_synchronized();
        channel.add("post[post][4]", json!({"post_title": "Live"}));
        assert_eq!(item.model().get("title").unwrap()["raw"], json!("Live"));

        channel.set("post[post][4]", json!({"post_title": "Later"}));
        assert_eq!(item.model().get("title").unwrap()["raw"], json!("Later"));
    }

    #[test]
    fn test_unsynchronized_channel_defers_first_application() {
        let channel = Rc::new(LiveSettings::new());
        channel.add("post[post][2]", json!({"post_title": "Draft"}));
        let bridge = PostPreviewBridge::new(channel.clone());
        let item = item(2);

        bridge.observe(&item);
        assert_eq!(item.model().get("title").unwrap()["raw"], json!("Hello"));

        channel.set("post[post][2]", json!({"post_title": "Final"}));
        assert_eq!(item.model().get("title").unwrap()["raw"], json!("Final"));

        channel.mark_synchronized();
        assert_eq!(item.model().get("title").unwrap()["raw"], json!("Final"));
    }

    #[test]
    fn test_rendered_resources_override_tracked_items() {
        let channel = Rc::new(LiveSettings::new());
        let bridge = PostPreviewBridge::new(channel);
        let item = item(5);
        bridge.observe(&item);

        let applied = bridge.on_render_partials_response(&json!({
            "rest_post_resources": {
                "5": {"title": {"raw": "Hi", "rendered": "Hi &amp; bye"}},
                "99": {"title": {"raw": "x", "rendered": "x"}}
            }
        }));
        assert_eq!(applied, 1);
        assert_eq!(item.model().get("title").unwrap()["rendered"], json!("Hi &amp; bye"));

        assert_eq!(bridge.on_render_partials_response(&json!({"contents": {}})), 0);
    }

    #[test]
    fn test_same_id_in_two_widgets_gets_every_edit() {
        let channel = Rc::new(LiveSettings::new());
        channel.mark_synchronized();
        let bridge = PostPreviewBridge::new(channel.clone());
        let first = item(1);
        let second = item(1);

        assert!(bridge.observe(&first));
        channel.add("post[post][1]", json!({"post_title": "Live"}));
        assert!(!bridge.observe(&second));
        assert_eq!(second.model().get("title").unwrap()["raw"], json!("Live"));

        channel.set("post[post][1]", json!({"post_title": "Both"}));
        assert_eq!(first.model().get("title").unwrap()["raw"], json!("Both"));
        assert_eq!(second.model().get("title").unwrap()["raw"], json!("Both"));
        assert_eq!(channel.setting("post[post][1]").unwrap().listener_count(), 1);
    }

    #[test]
    fn test_release_unbinds_after_last_item() {
        let channel = Rc::new(LiveSettings::new());
        channel.mark_synchronized();
        let setting = channel.add("post[post][3]", json!({"post_title": "Live"}));
        let bridge = PostPreviewBridge::new(channel.clone());
        let first = item(3);
        let second = item(3);
        bridge.observe(&first);
        bridge.observe(&second);
        assert_eq!(setting.listener_count(), 1);

        assert!(!bridge.release(&first));
        assert!(bridge.is_bound(ItemId(3)));
        channel.set("post[post][3]", json!({"post_title": "Kept"}));
        assert_eq!(first.model().get("title").unwrap()["raw"], json!("Live"));
        assert_eq!(second.model().get("title").unwrap()["raw"], json!("Kept"));

        assert!(bridge.release(&second));
        assert_eq!(bridge.binding_count(), 0);
        assert_eq!(setting.listener_count(), 0);
        assert!(!bridge.release(&second));
    }

    #[test]
    fn test_rebuilt_item_is_bound_again() {
        let channel = Rc::new(LiveSettings::new());
        channel.mark_synchronized();
        channel.add("post[post][6]", json!({"post_title": "Live"}));
        let bridge = PostPreviewBridge::new(channel.clone());
        let old = item(6);
        bridge.observe(&old);
        assert_eq!(bridge.release_items(&[old]), 1);

        let rebuilt = item(6);
        assert!(bridge.observe(&rebuilt));
        assert_eq!(rebuilt.model().get("title").unwrap()["raw"], json!("Live"));
        channel.set("post[post][6]", json!({"post_title": "Again"}));
        assert_eq!(rebuilt.model().get("title").unwrap()["raw"], json!("Again"));
    }

    #[test]
    fn test_release_before_setting_arrives_skips_binding() {
        let channel = Rc::new(LiveSettings::new());
        let bridge = PostPreviewBridge::new(channel.clone());
        let item = item(8);
        bridge.observe(&item);
        bridge.release(&item);

        let setting = channel.add("post[post][8]", json!({"post_title": "Late"}));
        assert_eq!(setting.listener_count(), 0);
        assert_eq!(item.model().get("title").unwrap()["raw"], json!("Hello"));
    }
}
