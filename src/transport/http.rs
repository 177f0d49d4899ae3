use super::{EntityKey, FetchFuture, QueryParams, RestClient};
use crate::engine::model::Attributes;
use crate::error::FetchError;
use futures::FutureExt;
use reqwest::Url;
use serde_json::Value;

/// WordPress互換のREST APIに対するHTTPクライアント
pub struct HttpRestClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRestClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn items_url(&self, params: &QueryParams) -> Result<Url, FetchError> {
        let endpoint = format!("{}/wp/v2/posts", self.base_url);
        Url::parse_with_params(&endpoint, query_pairs(params))
            .map_err(|e| FetchError::Transport(format!("invalid url {}: {}", endpoint, e)))
    }

    pub fn author_url(&self, key: &EntityKey) -> Result<Url, FetchError> {
        let endpoint = format!("{}/wp/v2/users/{}", self.base_url, key);
        Url::parse(&endpoint).map_err(|e| FetchError::Transport(format!("invalid url {}: {}", endpoint, e)))
    }
}

/// JSON値をクエリ文字列用に展開（文字列はそのまま、他はJSON表記）
fn query_pairs(params: &QueryParams) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

async fn get_json(client: reqwest::Client, url: Url) -> Result<Value, FetchError> {
    log::debug!("GET {}", url);

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;
    serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
}

impl RestClient for HttpRestClient {
    fn fetch_items(&self, params: &QueryParams) -> FetchFuture<Vec<Value>> {
        let client = self.client.clone();
        let url = self.items_url(params);
        async move {
            match get_json(client, url?).await? {
                Value::Array(items) => Ok(items),
                other => Err(FetchError::Decode(format!("expected an array of items, got {}", other))),
            }
        }
        .boxed_local()
    }

    fn fetch_author(&self, key: &EntityKey) -> FetchFuture<Attributes> {
        let client = self.client.clone();
        let url = self.author_url(key);
        async move {
            match get_json(client, url?).await? {
                Value::Object(author) => Ok(author),
                other => Err(FetchError::Decode(format!("expected an author object, got {}", other))),
            }
        }
        .boxed_local()
    }
}
