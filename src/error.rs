use thiserror::Error;

/// リモート取得（項目一覧・著者）の失敗
///
/// 関連エンティティのキャッシュは `Shared` な Future を保持するため `Clone` が必要
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("template render failed: {0}")]
pub struct TemplateError(pub String);

/// ホスト側の部分リフレッシュの失敗
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("host refresh failed for partial `{partial_id}`: {message}")]
    Host { partial_id: String, message: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid component config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown log level `{0}`")]
    UnknownLogLevel(String),
    #[error("cannot read config file `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid embedded widget data: {0}")]
    EmbeddedData(#[source] serde_json::Error),
    #[error("container carries no embedded widget data")]
    MissingEmbeddedData,
    #[error("embedded args carry no widget_id")]
    MissingWidgetId,
}

pub type Result<T> = std::result::Result<T, Error>;
