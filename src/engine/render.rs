use crate::config::ComponentConfig;
use crate::dom_renderer::{EmbeddedData, WidgetContainer, EDIT_SHORTCUT_CLASS};
use crate::engine::collection::{ContentItem, ItemCollection};
use crate::engine::model::{coerce_u64, Attributes, Model};
use crate::engine::resolver::{EntityFuture, EntityResolver};
use crate::error::TemplateError;
use crate::template::{ItemSnapshot, RenderPayload, Template};
use crate::transport::{EntityKey, QueryParams, RestClient};
use futures::future::join_all;
use log::{debug, error, trace, warn};
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

/// 「もっと見る」ボタンのクラス
pub const LOAD_MORE_CLASS: &str = "load-more";

/// ウィジェット生成に必要な共有資源
#[derive(Clone)]
pub struct WidgetContext {
    pub client: Rc<dyn RestClient>,
    pub template: Rc<dyn Template>,
    pub default_instance: Attributes,
    pub count_field: String,
    pub posts_per_page: u64,
}

impl WidgetContext {
    pub fn from_config(config: &ComponentConfig, client: Rc<dyn RestClient>, template: Rc<dyn Template>) -> Self {
        Self {
            client,
            template,
            default_instance: config.default_instance_data.clone(),
            count_field: config.count_field.clone(),
            posts_per_page: config.posts_per_page,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    /// 描画要求が予約済み
    PendingRender,
    /// 著者の解決待ち
    AwaitingEntities,
    /// DOMへの反映直後
    Committed,
}

type RenderedCallback = Rc<dyn Fn(&WidgetView)>;
type OnceCallback = Box<dyn FnOnce(&WidgetView)>;

/// ウィジェット1つ分の描画パイプライン
///
/// 設定・コレクション・著者のどれが変わっても、最新の状態で1回だけ描画する。
pub struct WidgetView {
    widget_id: String,
    args: Attributes,
    instance: Model,
    collection: Rc<ItemCollection>,
    resolver: EntityResolver,
    container: RefCell<Box<dyn WidgetContainer>>,
    template: Rc<dyn Template>,
    count_field: String,
    posts_per_page: u64,
    state: Cell<RenderState>,
    generation: Cell<u64>,
    render_lock: tokio::sync::Mutex<()>,
    render_count: Cell<usize>,
    watched_entities: RefCell<HashSet<EntityKey>>,
    rendered_listeners: RefCell<Vec<RenderedCallback>>,
    once_rendered: RefCell<Vec<OnceCallback>>,
    self_ref: Weak<WidgetView>,
}

impl WidgetView {
    /// ビューを作成して購読を張り、初回描画を予約する
    ///
    /// 描画と取得は `spawn_local` で動くため、`LocalSet` の中で呼ぶこと。
    pub fn new(
        widget_id: &str,
        embedded: EmbeddedData,
        container: Box<dyn WidgetContainer>,
        context: &WidgetContext,
    ) -> Rc<Self> {
        let EmbeddedData { args, instance, posts } = embedded;
        let seeded = posts.is_some();
        let collection = match posts {
            Some(posts) => ItemCollection::with_items(context.client.clone(), posts),
            None => ItemCollection::new(context.client.clone()),
        };

        let view = Rc::new_cyclic(|weak| Self {
            widget_id: widget_id.to_string(),
            args,
            instance: Model::with_defaults(&context.default_instance, instance),
            collection,
            resolver: EntityResolver::new(context.client.clone()),
            container: RefCell::new(container),
            template: context.template.clone(),
            count_field: context.count_field.clone(),
            posts_per_page: context.posts_per_page,
            state: Cell::new(RenderState::Idle),
            generation: Cell::new(0),
            render_lock: tokio::sync::Mutex::new(()),
            render_count: Cell::new(0),
            watched_entities: RefCell::new(HashSet::new()),
            rendered_listeners: RefCell::new(Vec::new()),
            once_rendered: RefCell::new(Vec::new()),
            self_ref: weak.clone(),
        });

        view.wire();
        if !seeded {
            match view.instance.get(&view.count_field) {
                Some(value) => view.fetch_count(&value),
                None => view.spawn_fetch(0),
            }
        }
        view.request_render();
        debug!("widget {} created ({} seeded items)", view.widget_id, view.collection.len());
        view
    }

    fn wire(&self) {
        let weak = self.self_ref.clone();
        self.instance.on_field_change(&self.count_field, move |_, value| {
            if let Some(view) = weak.upgrade() {
                view.fetch_count(value);
            }
        });

        let weak = self.self_ref.clone();
        self.instance.on_change(move |_, _| {
            if let Some(view) = weak.upgrade() {
                view.request_render();
            }
        });

        let weak = self.self_ref.clone();
        self.collection.on_change(move || {
            if let Some(view) = weak.upgrade() {
                view.request_render();
            }
        });

        let weak = self.self_ref.clone();
        self.collection.on_sync(move || {
            if let Some(view) = weak.upgrade() {
                view.request_render();
            }
        });

        let weak = self.self_ref.clone();
        self.collection.on_add(move |item| {
            if let Some(view) = weak.upgrade() {
                view.watch_author(item);
            }
        });

        for item in self.collection.items() {
            self.watch_author(&item);
        }
    }

    pub fn widget_id(&self) -> &str {
        &self.widget_id
    }

    pub fn args(&self) -> &Attributes {
        &self.args
    }

    pub fn instance(&self) -> &Model {
        &self.instance
    }

    pub fn collection(&self) -> &Rc<ItemCollection> {
        &self.collection
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn render_state(&self) -> RenderState {
        self.state.get()
    }

    /// DOMに反映した描画の回数
    pub fn render_count(&self) -> usize {
        self.render_count.get()
    }

    pub fn is_attached(&self) -> bool {
        self.container.borrow().is_attached()
    }

    /// 現在の表示件数（数値でなければ0として扱う）
    pub fn count(&self) -> u64 {
        match self.instance.get(&self.count_field) {
            Some(value) => coerce_u64(&value).unwrap_or_else(|| {
                warn!(
                    "widget {}: `{}` is not a number ({}), treating as 0",
                    self.widget_id, self.count_field, value
                );
                0
            }),
            None => 0,
        }
    }

    /// 表示件数を1ページ分増やし、次の描画後にボタンへフォーカスを戻す
    pub fn load_more(&self) {
        self.once_rendered(|view| {
            if !view.container.borrow_mut().focus(LOAD_MORE_CLASS) {
                debug!("widget {}: no .{} control to focus", view.widget_id, LOAD_MORE_CLASS);
            }
        });
        let count = self.count() + self.posts_per_page;
        debug!("widget {}: load more, count -> {}", self.widget_id, count);
        self.instance.set(self.count_field.clone(), json!(count));
    }

    pub fn on_rendered<F>(&self, callback: F)
    where
        F: Fn(&WidgetView) + 'static,
    {
        self.rendered_listeners.borrow_mut().push(Rc::new(callback));
    }

    /// 次の描画完了時に1回だけ呼ばれる
    pub fn once_rendered<F>(&self, callback: F)
    where
        F: FnOnce(&WidgetView) + 'static,
    {
        self.once_rendered.borrow_mut().push(Box::new(callback));
    }

    /// 描画を予約する
    ///
    /// 世代番号を進めてタスクを積む。実行時点で最新の世代のタスクだけが描画するので、
    /// 同じターン内の複数の要求は1回の描画にまとまる。
    pub fn request_render(&self) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        if matches!(self.state.get(), RenderState::Idle | RenderState::Committed) {
            self.state.set(RenderState::PendingRender);
        }
        trace!("widget {}: render requested (generation {})", self.widget_id, generation);

        let weak = self.self_ref.clone();
        tokio::task::spawn_local(async move {
            let Some(view) = weak.upgrade() else {
                return;
            };
            if view.generation.get() != generation {
                return;
            }
            let _guard = view.render_lock.lock().await;
            // 待っている間に新しい要求が来ていればそちらに任せる
            if view.generation.get() != generation {
                return;
            }
            if let Err(e) = view.render_pass(generation).await {
                error!("widget {}: {}", view.widget_id, e);
            }
        });
    }

    /// 予約を待たずに1回描画する
    pub async fn render_now(&self) -> Result<(), TemplateError> {
        let _guard = self.render_lock.lock().await;
        self.render_pass(self.generation.get()).await
    }

    async fn render_pass(&self, generation: u64) -> Result<(), TemplateError> {
        let result = self.compose_and_commit().await;
        // リスナーには Committed のまま通知する
        if result.is_ok() {
            self.emit_rendered();
        }

        let next = if self.generation.get() > generation {
            RenderState::PendingRender
        } else {
            RenderState::Idle
        };
        self.state.set(next);
        result
    }

    async fn compose_and_commit(&self) -> Result<(), TemplateError> {
        let mut data = self.args.clone();
        data.extend(self.instance.attributes());

        self.collection.sort();
        let items = self.collection.items();
        let mut posts: Vec<ItemSnapshot> = items.iter().map(|item| ItemSnapshot::from_item(item)).collect();

        let pending: Vec<(usize, EntityKey, EntityFuture)> = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                self.resolver
                    .resolve_item(item)
                    .map(|(key, future)| (index, key, future))
            })
            .collect();

        self.state.set(RenderState::AwaitingEntities);
        let results = join_all(pending.iter().map(|(_, _, future)| future.clone())).await;

        for ((index, key, _), result) in pending.into_iter().zip(results) {
            match result {
                Ok(author) => {
                    self.watch_entity(&key, &author);
                    posts[index].author = Value::Object(author.attributes());
                }
                Err(e) => {
                    warn!(
                        "widget {}: author {} for item {} unavailable: {}",
                        self.widget_id, key, posts[index].id, e
                    );
                }
            }
        }

        let payload = RenderPayload { data, posts };
        let markup = self.template.render(&payload)?;

        {
            let mut container = self.container.borrow_mut();
            container.retain_only(EDIT_SHORTCUT_CLASS);
            container.append_markup(&markup);
        }
        self.state.set(RenderState::Committed);
        self.render_count.set(self.render_count.get() + 1);
        debug!(
            "widget {}: rendered {} items (render #{})",
            self.widget_id,
            payload.posts.len(),
            self.render_count.get()
        );
        Ok(())
    }

    fn emit_rendered(&self) {
        let listeners = self.rendered_listeners.borrow().clone();
        for listener in listeners {
            listener(self);
        }
        let once = std::mem::take(&mut *self.once_rendered.borrow_mut());
        for callback in once {
            callback(self);
        }
    }

    /// 項目の著者を先に解決して変更を購読する
    fn watch_author(&self, item: &Rc<ContentItem>) {
        let Some((key, pending)) = self.resolver.resolve_item(item) else {
            return;
        };
        let weak = self.self_ref.clone();
        tokio::task::spawn_local(async move {
            let result = pending.await;
            let Some(view) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(author) => view.watch_entity(&key, &author),
                Err(e) => debug!("widget {}: author {} not watched: {}", view.widget_id, key, e),
            }
        });
    }

    fn watch_entity(&self, key: &EntityKey, entity: &Rc<Model>) {
        if !self.watched_entities.borrow_mut().insert(key.clone()) {
            return;
        }
        let weak = self.self_ref.clone();
        entity.on_change(move |_, _| {
            if let Some(view) = weak.upgrade() {
                view.request_render();
            }
        });
    }

    /// 件数が数値のときだけ取得する
    fn fetch_count(&self, value: &Value) {
        match coerce_u64(value) {
            Some(count) => self.spawn_fetch(count),
            None => warn!(
                "widget {}: `{}` is not a number ({}), fetch skipped",
                self.widget_id, self.count_field, value
            ),
        }
    }

    fn spawn_fetch(&self, per_page: u64) {
        let collection = self.collection.clone();
        let widget_id = self.widget_id.clone();
        tokio::task::spawn_local(async move {
            let mut params = QueryParams::new();
            params.insert("per_page".to_string(), json!(per_page));
            match collection.fetch(params).await {
                Ok(added) => debug!("widget {}: fetch added {} items", widget_id, added),
                Err(e) => error!("widget {}: fetch failed: {}", widget_id, e),
            }
        });
    }
}

impl fmt::Debug for WidgetView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetView")
            .field("widget_id", &self.widget_id)
            .field("state", &self.state.get())
            .field("render_count", &self.render_count.get())
            .finish_non_exhaustive()
    }
}
