use crate::engine::collection::{ContentItem, ItemId};
use crate::engine::model::Attributes;
use crate::error::TemplateError;
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

/// テンプレートに渡すデータ（引数・設定をマージしたものと項目一覧）
#[derive(Debug, Clone, Serialize)]
pub struct RenderPayload {
    #[serde(flatten)]
    pub data: Attributes,
    pub posts: Vec<ItemSnapshot>,
}

impl RenderPayload {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 1件分のスナップショット
///
/// `date` は必ず日時として実体化される。`author` は解決済みなら著者データ、
/// 未解決なら元の参照値のまま。
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub date: Option<NaiveDateTime>,
    pub author: Value,
    #[serde(flatten)]
    pub fields: Attributes,
}

impl ItemSnapshot {
    pub fn from_item(item: &ContentItem) -> Self {
        let mut fields = item.attributes();
        fields.remove("id");
        fields.remove("date");
        let author = fields.remove("author").unwrap_or(Value::Null);
        Self {
            id: item.id(),
            date: item.date(),
            author,
            fields,
        }
    }

    /// `{raw, rendered}` 形式のフィールドから描画済みの値を取り出す
    pub fn rendered(&self, field: &str) -> Option<&str> {
        match self.fields.get(field)? {
            Value::String(text) => Some(text),
            value => value.get("rendered").and_then(Value::as_str),
        }
    }

    pub fn author_name(&self) -> Option<&str> {
        self.author.get("name").and_then(Value::as_str)
    }
}

pub trait Template {
    fn render(&self, payload: &RenderPayload) -> Result<String, TemplateError>;
}

impl<F> Template for F
where
    F: Fn(&RenderPayload) -> String,
{
    fn render(&self, payload: &RenderPayload) -> Result<String, TemplateError> {
        Ok(self(payload))
    }
}

/// 標準のリスト表示テンプレート
#[derive(Debug, Clone, Default)]
pub struct ListTemplate;

impl Template for ListTemplate {
    fn render(&self, payload: &RenderPayload) -> Result<String, TemplateError> {
        let mut html = String::new();

        if let Some(title) = payload.data.get("title").and_then(Value::as_str).filter(|t| !t.is_empty()) {
            html.push_str(&format!("<h2 class=\"widget-title\">{}</h2>", escape_html(title)));
        }

        html.push_str("<ul class=\"recent-items\">");
        for post in &payload.posts {
            let link = post.fields.get("link").and_then(Value::as_str).unwrap_or("#");
            html.push_str(&format!(
                "<li class=\"recent-item\" data-id=\"{}\"><a href=\"{}\">{}</a>",
                post.id,
                escape_html(link),
                post.rendered("title").unwrap_or("")
            ));
            if let Some(date) = post.date {
                html.push_str(&format!(
                    " <time datetime=\"{}\">{}</time>",
                    date.format("%Y-%m-%dT%H:%M:%S"),
                    date.format("%Y-%m-%d")
                ));
            }
            if let Some(name) = post.author_name() {
                html.push_str(&format!(" <span class=\"author\">{}</span>", escape_html(name)));
            }
            html.push_str("</li>");
        }
        html.push_str("</ul>");
        html.push_str("<button type=\"button\" class=\"load-more\">Load more</button>");

        Ok(html)
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
