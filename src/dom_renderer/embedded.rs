use crate::engine::model::Attributes;
use crate::error::Error;
use serde::Deserialize;
use serde_json::Value;

/// ウィジェットのルート要素に埋め込まれた初期化データ
///
/// `posts` がなければコレクションは初回取得を行い、あればそれで初期化する。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbeddedData {
    #[serde(default)]
    pub args: Attributes,
    #[serde(default)]
    pub instance: Attributes,
    #[serde(default)]
    pub posts: Option<Vec<Value>>,
}

impl EmbeddedData {
    pub fn from_value(value: Value) -> Result<Self, Error> {
        serde_json::from_value(value).map_err(Error::EmbeddedData)
    }

    pub fn widget_id(&self) -> Option<&str> {
        self.args.get("widget_id").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_posts_means_fetch() {
        let data = EmbeddedData::from_value(json!({
            "args": {"widget_id": "recent-posts-2"},
            "instance": {"count": 5},
            "posts": null
        }))
        .unwrap();
        assert_eq!(data.widget_id(), Some("recent-posts-2"));
        assert!(data.posts.is_none());
    }

    #[test]
    fn test_seeded_posts() {
        let data = EmbeddedData::from_value(json!({"args": {}, "posts": [{"id": 1}]})).unwrap();
        assert_eq!(data.posts.as_ref().map(|posts| posts.len()), Some(1));
        assert_eq!(data.widget_id(), None);
    }

    #[test]
    fn test_malformed_data() {
        assert!(matches!(
            EmbeddedData::from_value(json!({"args": []})),
            Err(Error::EmbeddedData(_))
        ));
    }
}
