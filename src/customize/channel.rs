use log::{debug, trace};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub use crate::engine::model::SubscriptionId;

type ValueCallback = Rc<dyn Fn(&Value)>;
type SettingWaiter = Box<dyn FnOnce(&Rc<Setting>)>;

/// 1つのライブ設定値
pub struct Setting {
    id: String,
    value: RefCell<Value>,
    listeners: RefCell<Vec<(SubscriptionId, ValueCallback)>>,
    next_subscription: Cell<SubscriptionId>,
}

impl Setting {
    fn new(id: &str, value: Value) -> Self {
        Self {
            id: id.to_string(),
            value: RefCell::new(value),
            listeners: RefCell::new(Vec::new()),
            next_subscription: Cell::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    /// 値が変わった場合のみ購読者に通知する
    pub fn set(&self, value: Value) -> bool {
        if *self.value.borrow() == value {
            return false;
        }
        *self.value.borrow_mut() = value.clone();
        trace!("setting {} updated", self.id);

        let listeners: Vec<ValueCallback> =
            self.listeners.borrow().iter().map(|(_, listener)| listener.clone()).collect();
        for listener in listeners {
            listener(&value);
        }
        true
    }

    pub fn bind<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + 'static,
    {
        let id = self.next_subscription.get();
        self.next_subscription.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    pub fn unbind(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(subscription, _)| *subscription != id);
        let removed = listeners.len() != before;
        if removed {
            trace!("setting {} listener {} removed", self.id, id);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setting")
            .field("id", &self.id)
            .field("value", &*self.value.borrow())
            .field("listeners", &self.listeners.borrow().len())
            .finish_non_exhaustive()
    }
}

// 管理画面の編集はサーバーの再描画より先にここへ届く
/// プレビュー側から見たライブ設定チャンネル
#[derive(Default)]
pub struct LiveSettings {
    settings: RefCell<HashMap<String, Rc<Setting>>>,
    waiters: RefCell<HashMap<String, Vec<SettingWaiter>>>,
    synchronized: Cell<bool>,
    sync_waiters: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl LiveSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定を追加し、その設定を待っていたコールバックを実行する
    ///
    /// 既にあれば値を更新するだけ。
    pub fn add(&self, id: &str, value: Value) -> Rc<Setting> {
        if let Some(existing) = self.setting(id) {
            existing.set(value);
            return existing;
        }

        let setting = Rc::new(Setting::new(id, value));
        self.settings.borrow_mut().insert(id.to_string(), setting.clone());
        debug!("setting {} added", id);

        let waiters = self.waiters.borrow_mut().remove(id).unwrap_or_default();
        for waiter in waiters {
            waiter(&setting);
        }
        setting
    }

    pub fn setting(&self, id: &str) -> Option<Rc<Setting>> {
        self.settings.borrow().get(id).cloned()
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.setting(id).map(|setting| setting.get())
    }

    /// 存在しない設定への書き込みは無視して `false` を返す
    pub fn set(&self, id: &str, value: Value) -> bool {
        match self.setting(id) {
            Some(setting) => setting.set(value),
            None => false,
        }
    }

    /// 設定がなければ何もせず `None`
    pub fn bind<F>(&self, id: &str, callback: F) -> Option<SubscriptionId>
    where
        F: Fn(&Value) + 'static,
    {
        self.setting(id).map(|setting| setting.bind(callback))
    }

    pub fn unbind(&self, id: &str, subscription: SubscriptionId) -> bool {
        self.setting(id).is_some_and(|setting| setting.unbind(subscription))
    }

    /// 設定が存在すれば即座に、なければ追加された時点で実行する
    pub fn when_setting<F>(&self, id: &str, callback: F)
    where
        F: FnOnce(&Rc<Setting>) + 'static,
    {
        match self.setting(id) {
            Some(setting) => callback(&setting),
            None => self
                .waiters
                .borrow_mut()
                .entry(id.to_string())
                .or_default()
                .push(Box::new(callback)),
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized.get()
    }

    /// 同期完了時に1回だけ実行する（同期済みなら即座に）
    pub fn on_synchronized<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        if self.synchronized.get() {
            callback();
        } else {
            self.sync_waiters.borrow_mut().push(Box::new(callback));
        }
    }

    pub fn mark_synchronized(&self) {
        if self.synchronized.replace(true) {
            return;
        }
        debug!("live settings synchronized");
        let waiters = std::mem::take(&mut *self.sync_waiters.borrow_mut());
        for waiter in waiters {
            waiter();
        }
    }
}

impl fmt::Debug for LiveSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSettings")
            .field("settings", &self.settings.borrow().len())
            .field("synchronized", &self.synchronized.get())
            .finish_non_exhaustive()
    }
}
