use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 描画のたびに残すべき編集ショートカットのクラス
pub const EDIT_SHORTCUT_CLASS: &str = "customize-partial-edit-shortcut";

/// DOMコンテナID生成用カウンター
static CONTAINER_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// ウィジェットのルート要素
///
/// 埋め込みデータの読み出しと、子要素の差し替えだけを扱う。
pub trait WidgetContainer {
    /// ルート要素に埋め込まれた初期化データ（`{args, instance, posts}`）
    fn embedded_data(&self) -> Option<Value>;

    /// 指定クラスを持つ子要素以外をすべて取り除く
    fn retain_only(&mut self, class: &str);

    /// 描画済みマークアップを末尾に追加
    fn append_markup(&mut self, markup: &str);

    /// 指定クラスの要素にフォーカスを移す（見つかればtrue）
    fn focus(&mut self, class: &str) -> bool;

    /// まだページに接続されているか
    fn is_attached(&self) -> bool {
        true
    }
}

/// コンテナの子要素
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomNode {
    pub classes: Vec<String>,
    pub html: String,
}

impl DomNode {
    pub fn markup(html: impl Into<String>) -> Self {
        Self {
            classes: Vec::new(),
            html: html.into(),
        }
    }

    pub fn with_class(class: &str, html: impl Into<String>) -> Self {
        Self {
            classes: vec![class.to_string()],
            html: html.into(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

#[derive(Debug, Default)]
struct ContainerState {
    embedded: Option<Value>,
    children: Vec<DomNode>,
    focused: Option<String>,
    commits: usize,
    detached: bool,
}

/// メモリ上のコンテナ（ネイティブ環境用）
///
/// クローンは同じ状態を共有するので、ウィジェットに渡した後も中身を確認できる。
#[derive(Debug, Clone)]
pub struct MemoryContainer {
    container_id: String,
    state: Rc<RefCell<ContainerState>>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::with_container(&Self::generate_container_id())
    }

    pub fn with_container(container_id: &str) -> Self {
        Self {
            container_id: container_id.to_string(),
            state: Rc::new(RefCell::new(ContainerState::default())),
        }
    }

    pub fn with_embedded(embedded: Value) -> Self {
        let container = Self::new();
        container.state.borrow_mut().embedded = Some(embedded);
        container
    }

    /// 一意なコンテナIDを生成
    fn generate_container_id() -> String {
        let id = CONTAINER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("recent-items-container-{}", id)
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn push_child(&self, node: DomNode) {
        self.state.borrow_mut().children.push(node);
    }

    pub fn children(&self) -> Vec<DomNode> {
        self.state.borrow().children.clone()
    }

    pub fn focused(&self) -> Option<String> {
        self.state.borrow().focused.clone()
    }

    /// `append_markup` が呼ばれた回数（＝DOMへのコミット回数）
    pub fn commit_count(&self) -> usize {
        self.state.borrow().commits
    }

    pub fn detach(&self) {
        self.state.borrow_mut().detached = true;
    }

    /// 子要素のHTMLを連結して取得
    pub fn inner_html(&self) -> String {
        self.state
            .borrow()
            .children
            .iter()
            .map(|node| node.html.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// コンテナ全体のHTMLを取得
    pub fn get_html(&self) -> String {
        format!(
            "<div id=\"{}\" class=\"widget recent-items-widget\">\n{}\n</div>",
            self.container_id,
            self.inner_html()
        )
    }
}

impl Default for MemoryContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl WidgetContainer for MemoryContainer {
    fn embedded_data(&self) -> Option<Value> {
        self.state.borrow().embedded.clone()
    }

    fn retain_only(&mut self, class: &str) {
        let mut state = self.state.borrow_mut();
        let before = state.children.len();
        state.children.retain(|node| node.has_class(class));
        log::trace!(
            "DOM clear container {}: removed {} children",
            self.container_id,
            before - state.children.len()
        );
    }

    fn append_markup(&mut self, markup: &str) {
        let mut state = self.state.borrow_mut();
        state.children.push(DomNode::markup(markup));
        state.commits += 1;
    }

    fn focus(&mut self, class: &str) -> bool {
        let mut state = self.state.borrow_mut();
        let needle = format!("class=\"{}\"", class);
        let found = state
            .children
            .iter()
            .any(|node| node.has_class(class) || node.html.contains(&needle));
        if found {
            state.focused = Some(class.to_string());
        }
        found
    }

    fn is_attached(&self) -> bool {
        !self.state.borrow().detached
    }
}
