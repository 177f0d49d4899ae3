use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

pub type Attributes = Map<String, Value>;
pub type SubscriptionId = usize;

type ChangeCallback = Rc<dyn Fn(&Model, &Attributes)>;
type FieldCallback = Rc<dyn Fn(&Model, &Value)>;

struct FieldListener {
    id: SubscriptionId,
    key: String,
    callback: FieldCallback,
}

/// キー/値の属性と変更通知を持つモデル
///
/// 値の検証は行わない。`set` で実際に値が変わった場合のみ、
/// 変更キーごとの通知の後に汎用の変更通知を1回だけ発火する。
pub struct Model {
    attributes: RefCell<Attributes>,
    change_listeners: RefCell<Vec<(SubscriptionId, ChangeCallback)>>,
    field_listeners: RefCell<Vec<FieldListener>>,
    next_subscription: Cell<SubscriptionId>,
}

impl Model {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes: RefCell::new(attributes),
            change_listeners: RefCell::new(Vec::new()),
            field_listeners: RefCell::new(Vec::new()),
            next_subscription: Cell::new(0),
        }
    }

    /// デフォルト値の上に属性を重ねて作成（属性側が優先）
    pub fn with_defaults(defaults: &Attributes, attributes: Attributes) -> Self {
        let mut merged = defaults.clone();
        merged.extend(attributes);
        Self::new(merged)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes.borrow().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.attributes.borrow().contains_key(key)
    }

    /// 数値として解釈できる場合のみ取得（数値文字列も受け付ける）
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.attributes.borrow().get(key).and_then(coerce_u64)
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes.borrow().clone()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        let mut attributes = Attributes::new();
        attributes.insert(key.into(), value);
        self.set_many(attributes)
    }

    /// 複数の属性をまとめて設定し、変更があれば通知する
    pub fn set_many(&self, attributes: Attributes) -> bool {
        let changed = {
            let mut current = self.attributes.borrow_mut();
            let mut changed = Attributes::new();
            for (key, value) in attributes {
                if current.get(&key) != Some(&value) {
                    current.insert(key.clone(), value.clone());
                    changed.insert(key, value);
                }
            }
            changed
        };

        if changed.is_empty() {
            return false;
        }

        // コールバック内からの再入に備えて借用を解放してから通知する
        let field_listeners: Vec<(String, FieldCallback)> = self
            .field_listeners
            .borrow()
            .iter()
            .filter(|listener| changed.contains_key(&listener.key))
            .map(|listener| (listener.key.clone(), listener.callback.clone()))
            .collect();
        for (key, callback) in field_listeners {
            if let Some(value) = changed.get(&key) {
                callback(self, value);
            }
        }

        let change_listeners: Vec<ChangeCallback> = self
            .change_listeners
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in change_listeners {
            callback(self, &changed);
        }

        true
    }

    /// いずれかの属性が変わったときの通知を登録
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Model, &Attributes) + 'static,
    {
        let id = self.next_id();
        self.change_listeners.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    /// 特定のキーが変わったときだけの通知を登録
    pub fn on_field_change<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Model, &Value) + 'static,
    {
        let id = self.next_id();
        self.field_listeners.borrow_mut().push(FieldListener {
            id,
            key: key.to_string(),
            callback: Rc::new(callback),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.change_listeners.borrow_mut().retain(|(listener_id, _)| {
            let keep = *listener_id != id;
            removed |= !keep;
            keep
        });
        self.field_listeners.borrow_mut().retain(|listener| {
            let keep = listener.id != id;
            removed |= !keep;
            keep
        });
        removed
    }

    fn next_id(&self) -> SubscriptionId {
        let id = self.next_subscription.get();
        self.next_subscription.set(id + 1);
        id
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new(Attributes::new())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("attributes", &*self.attributes.borrow())
            .finish_non_exhaustive()
    }
}

/// JSON値を非負整数として解釈する
pub fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
