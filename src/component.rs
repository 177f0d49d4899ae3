use crate::config::ComponentConfig;
use crate::customize::{LiveSettings, PostPreviewBridge, RecentItemsRefresh, RefreshDispatcher};
use crate::dom_renderer::{EmbeddedData, WidgetContainer};
use crate::engine::registry::WidgetRegistry;
use crate::engine::render::{WidgetContext, WidgetView};
use crate::error::{Error, Result};
use crate::template::Template;
use crate::transport::RestClient;
use log::{debug, info, warn};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// ウィジェット種別全体のまとめ役
///
/// コンテナからビューを作って登録し、プレビュー中はライブ設定と部分リフレッシュをつなぐ。
pub struct RecentItemsComponent {
    config: ComponentConfig,
    context: WidgetContext,
    registry: Rc<WidgetRegistry>,
    bridge: RefCell<Option<Rc<PostPreviewBridge>>>,
}

impl RecentItemsComponent {
    pub fn new(config: ComponentConfig, client: Rc<dyn RestClient>, template: Rc<dyn Template>) -> Self {
        let context = WidgetContext::from_config(&config, client, template);
        Self {
            config,
            context,
            registry: Rc::new(WidgetRegistry::new()),
            bridge: RefCell::new(None),
        }
    }

    pub fn config(&self) -> &ComponentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Rc<WidgetRegistry> {
        &self.registry
    }

    pub fn widget(&self, widget_id: &str) -> Option<Rc<WidgetView>> {
        self.registry.get(widget_id)
    }

    pub fn bridge(&self) -> Option<Rc<PostPreviewBridge>> {
        self.bridge.borrow().clone()
    }

    /// プレビュー中のみ、ライブ設定の反映と部分リフレッシュの割り込みを有効にする
    pub fn init(&self, channel: Rc<LiveSettings>, dispatcher: &RefreshDispatcher) -> bool {
        if !self.config.is_customize_preview {
            debug!("not a customize preview, live settings disabled");
            return false;
        }
        if self.bridge.borrow().is_some() {
            return true;
        }

        let bridge = Rc::new(PostPreviewBridge::new(channel.clone()));
        for view in self.registry.ids().iter().filter_map(|id| self.registry.get(id)) {
            attach_preview(&view, &bridge);
        }
        *self.bridge.borrow_mut() = Some(bridge);

        dispatcher.register(
            &self.config.id_base,
            Rc::new(RecentItemsRefresh::new(self.registry.clone(), channel)),
        );
        info!("live preview enabled for {} widgets", self.config.id_base);
        true
    }

    /// コンテナごとにビューを作って登録し、見つかったウィジェットIDを返す
    ///
    /// 登録済みのIDは作り直さない。読めないコンテナは警告して飛ばす。
    pub fn set_up_widgets(&self, containers: Vec<Box<dyn WidgetContainer>>) -> Vec<String> {
        let mut widget_ids = Vec::new();

        for container in containers {
            let (widget_id, embedded) = match read_embedded(container.as_ref()) {
                Ok(found) => found,
                Err(e) => {
                    warn!("skipping widget container: {}", e);
                    continue;
                }
            };

            if !self.registry.contains(&widget_id) {
                let view = WidgetView::new(&widget_id, embedded, container, &self.context);
                if let Some(bridge) = self.bridge.borrow().as_ref() {
                    attach_preview(&view, bridge);
                }
                self.registry.insert(view);
                info!("widget {} set up", widget_id);
            }
            widget_ids.push(widget_id);
        }
        widget_ids
    }

    /// 部分リフレッシュで差し替わったコンテナを拾い直す
    pub fn on_partial_content_rendered(&self, containers: Vec<Box<dyn WidgetContainer>>) -> Vec<String> {
        self.set_up_widgets(containers)
    }

    pub fn on_render_partials_response(&self, data: &Value) -> usize {
        match self.bridge.borrow().as_ref() {
            Some(bridge) => bridge.on_render_partials_response(data),
            None => 0,
        }
    }

    /// ビューを登録から外し、その項目のライブ設定購読も解除する
    pub fn remove_widget(&self, widget_id: &str) -> bool {
        match self.registry.remove(widget_id) {
            Some(view) => {
                self.release_preview(&view);
                true
            }
            None => false,
        }
    }

    pub fn prune_detached(&self) -> Vec<String> {
        self.registry
            .prune_detached()
            .iter()
            .map(|view| {
                self.release_preview(view);
                view.widget_id().to_string()
            })
            .collect()
    }

    fn release_preview(&self, view: &WidgetView) {
        if let Some(bridge) = self.bridge.borrow().as_ref() {
            let released = bridge.release_items(&view.collection().items());
            debug!("widget {}: released {} live bindings", view.widget_id(), released);
        }
    }
}

fn read_embedded(container: &dyn WidgetContainer) -> Result<(String, EmbeddedData)> {
    let value = container.embedded_data().ok_or(Error::MissingEmbeddedData)?;
    let embedded = EmbeddedData::from_value(value)?;
    let widget_id = embedded.widget_id().ok_or(Error::MissingWidgetId)?.to_string();
    Ok((widget_id, embedded))
}

/// ビューの既存項目と今後追加される項目をライブ設定に結びつける
fn attach_preview(view: &Rc<WidgetView>, bridge: &Rc<PostPreviewBridge>) {
    for item in view.collection().items() {
        bridge.observe(&item);
    }
    let bridge = Rc::downgrade(bridge);
    view.collection().on_add(move |item| {
        if let Some(bridge) = bridge.upgrade() {
            bridge.observe(item);
        }
    });
}
