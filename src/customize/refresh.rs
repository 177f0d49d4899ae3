use crate::customize::channel::LiveSettings;
use crate::engine::registry::WidgetRegistry;
use crate::error::RefreshError;
use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use log::{debug, trace};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type RefreshCompletion = LocalBoxFuture<'static, Result<(), RefreshError>>;

/// `recent-posts-3` を種別 `recent-posts` と番号 `3` に分けたもの
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetIdParts {
    pub id_base: String,
    pub number: Option<u64>,
}

impl WidgetIdParts {
    pub fn parse(widget_id: &str) -> Self {
        if let Some((base, number)) = widget_id.rsplit_once('-') {
            if let Ok(number) = number.parse() {
                return Self {
                    id_base: base.to_string(),
                    number: Some(number),
                };
            }
        }
        Self {
            id_base: widget_id.to_string(),
            number: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialRefreshRequest {
    pub partial_id: String,
    pub widget_id: String,
    /// この部分に関係する設定ID（先頭がウィジェット自身の設定）
    pub settings: Vec<String>,
}

impl PartialRefreshRequest {
    pub fn for_widget(widget_id: &str, settings: Vec<String>) -> Self {
        Self {
            partial_id: format!("widget[{}]", widget_id),
            widget_id: widget_id.to_string(),
            settings,
        }
    }

    pub fn widget_parts(&self) -> WidgetIdParts {
        WidgetIdParts::parse(&self.widget_id)
    }
}

pub enum RefreshOutcome {
    /// 割り込み側で反映済み
    Handled(RefreshCompletion),
    /// ホストの既定処理に任せる
    Delegate,
}

impl fmt::Debug for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::Handled(_) => f.write_str("Handled"),
            RefreshOutcome::Delegate => f.write_str("Delegate"),
        }
    }
}

pub trait RefreshInterceptor {
    fn intercept(&self, request: &PartialRefreshRequest) -> RefreshOutcome;
}

/// ホストの既定のリフレッシュ（サーバーで再描画して差し替える）
pub trait HostRefresh {
    fn refresh(&self, request: &PartialRefreshRequest) -> RefreshCompletion;
}

/// ウィジェット種別ごとの割り込み表
pub struct RefreshDispatcher {
    interceptors: RefCell<HashMap<String, Rc<dyn RefreshInterceptor>>>,
    host: Rc<dyn HostRefresh>,
}

impl RefreshDispatcher {
    pub fn new(host: Rc<dyn HostRefresh>) -> Self {
        Self {
            interceptors: RefCell::new(HashMap::new()),
            host,
        }
    }

    pub fn register(&self, widget_type: &str, interceptor: Rc<dyn RefreshInterceptor>) {
        debug!("refresh interceptor registered for {}", widget_type);
        self.interceptors.borrow_mut().insert(widget_type.to_string(), interceptor);
    }

    pub fn unregister(&self, widget_type: &str) -> bool {
        self.interceptors.borrow_mut().remove(widget_type).is_some()
    }

    pub fn is_registered(&self, widget_type: &str) -> bool {
        self.interceptors.borrow().contains_key(widget_type)
    }

    pub fn refresh(&self, request: &PartialRefreshRequest) -> RefreshCompletion {
        let parts = request.widget_parts();
        let interceptor = self.interceptors.borrow().get(&parts.id_base).cloned();
        if let Some(interceptor) = interceptor {
            if let RefreshOutcome::Handled(completion) = interceptor.intercept(request) {
                trace!("partial {} handled locally", request.partial_id);
                return completion;
            }
        }
        trace!("partial {} delegated to host", request.partial_id);
        self.host.refresh(request)
    }
}

impl fmt::Debug for RefreshDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<String> = self.interceptors.borrow().keys().cloned().collect();
        types.sort();
        f.debug_struct("RefreshDispatcher").field("interceptors", &types).finish_non_exhaustive()
    }
}

/// 登録済みウィジェットの設定変更をインスタンスへ直接流し込む
#[derive(Debug)]
pub struct RecentItemsRefresh {
    registry: Rc<WidgetRegistry>,
    channel: Rc<LiveSettings>,
}

impl RecentItemsRefresh {
    pub fn new(registry: Rc<WidgetRegistry>, channel: Rc<LiveSettings>) -> Self {
        Self { registry, channel }
    }
}

impl RefreshInterceptor for RecentItemsRefresh {
    fn intercept(&self, request: &PartialRefreshRequest) -> RefreshOutcome {
        let Some(view) = self.registry.get(&request.widget_id) else {
            return RefreshOutcome::Delegate;
        };
        let Some(setting_id) = request.settings.first() else {
            return RefreshOutcome::Delegate;
        };
        let instance = match self.channel.get(setting_id) {
            Some(Value::Object(instance)) => instance,
            _ => return RefreshOutcome::Delegate,
        };

        debug!("widget {}: applying {} locally", request.widget_id, setting_id);
        view.instance().set_many(instance);
        RefreshOutcome::Handled(future::ready(Ok(())).boxed_local())
    }
}
