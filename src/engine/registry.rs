use crate::engine::render::WidgetView;
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// ウィジェットIDからビューへの登録表
///
/// コンポーネントが所有し、部分リフレッシュの割り込みからも参照される。
#[derive(Debug, Default)]
pub struct WidgetRegistry {
    views: RefCell<HashMap<String, Rc<WidgetView>>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, widget_id: &str) -> Option<Rc<WidgetView>> {
        self.views.borrow().get(widget_id).cloned()
    }

    pub fn contains(&self, widget_id: &str) -> bool {
        self.views.borrow().contains_key(widget_id)
    }

    /// 既に登録済みなら何もしない
    pub fn insert(&self, view: Rc<WidgetView>) -> bool {
        let mut views = self.views.borrow_mut();
        if views.contains_key(view.widget_id()) {
            return false;
        }
        views.insert(view.widget_id().to_string(), view);
        true
    }

    pub fn remove(&self, widget_id: &str) -> Option<Rc<WidgetView>> {
        let removed = self.views.borrow_mut().remove(widget_id);
        if removed.is_some() {
            debug!("widget {} unregistered", widget_id);
        }
        removed
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.views.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.views.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.borrow().is_empty()
    }

    /// コンテナがページから外れたビューを取り除いて返す（ID順）
    pub fn prune_detached(&self) -> Vec<Rc<WidgetView>> {
        let mut detached: Vec<String> = self
            .views
            .borrow()
            .iter()
            .filter(|(_, view)| !view.is_attached())
            .map(|(id, _)| id.clone())
            .collect();
        detached.sort();
        detached.iter().filter_map(|id| self.remove(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom_renderer::{EmbeddedData, MemoryContainer};
    use crate::engine::render::WidgetContext;
    use crate::template::ListTemplate;
    use crate::transport::MemoryRestClient;
    use serde_json::Map;
    use tokio::task::LocalSet;

    fn view(id: &str, container: &MemoryContainer) -> Rc<WidgetView> {
        let ctx = WidgetContext {
            client: Rc::new(MemoryRestClient::new()),
            template: Rc::new(ListTemplate),
            default_instance: Map::new(),
            count_field: "count".to_string(),
            posts_per_page: 5,
        };
        let embedded = EmbeddedData {
            posts: Some(Vec::new()),
            ..EmbeddedData::default()
        };
        WidgetView::new(id, embedded, Box::new(container.clone()), &ctx)
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_per_id() {
        LocalSet::new()
            .run_until(async {
                let registry = WidgetRegistry::new();
                let container = MemoryContainer::new();
                assert!(registry.insert(view("recent-posts-2", &container)));
                assert!(!registry.insert(view("recent-posts-2", &container)));
                assert!(registry.insert(view("recent-posts-3", &container)));
                assert_eq!(registry.ids(), vec!["recent-posts-2", "recent-posts-3"]);

                assert!(registry.remove("recent-posts-2").is_some());
                assert!(!registry.contains("recent-posts-2"));
                assert_eq!(registry.len(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_prune_detached() {
        LocalSet::new()
            .run_until(async {
                let registry = WidgetRegistry::new();
                let kept = MemoryContainer::new();
                let removed = MemoryContainer::new();
                registry.insert(view("recent-posts-2", &kept));
                registry.insert(view("recent-posts-3", &removed));

                removed.detach();
                let pruned: Vec<String> =
                    registry.prune_detached().iter().map(|view| view.widget_id().to_string()).collect();
                assert_eq!(pruned, vec!["recent-posts-3".to_string()]);
                assert!(registry.contains("recent-posts-2"));
            })
            .await;
    }
}
