use crate::engine::model::Attributes;
use crate::error::ConfigError;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

// ========================================
// ログ設定
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,      // ログを一切表示しない（panicは除く）
    Error,    // エラーレベルのみ
    Warn,     // 警告レベル以上
    #[default]
    Info,     // 情報レベル以上
    Debug,    // デバッグレベル以上
    Trace,    // 全てのログ
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ConfigError::UnknownLogLevel(other.to_string())),
        }
    }
}

/// ログレベルを初期化する関数
pub fn init_logger(log_level: &LogLevel) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let level = match log_level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        };

        let mut builder = Builder::from_default_env();

        if matches!(log_level, LogLevel::Off) {
            builder
                .filter_level(LevelFilter::Off)
                .format(|_, _| Ok(()))
                .try_init()
                .ok(); // エラーを無視
        } else {
            builder
                .filter_level(level)
                // HTTPクライアントのInfoログを抑制
                .filter_module("reqwest", LevelFilter::Warn)
                .filter_module("hyper", LevelFilter::Warn)
                .filter_module("hyper_util", LevelFilter::Warn)
                .filter_module("rustls", LevelFilter::Warn)
                .format_timestamp_secs()
                .try_init()
                .ok(); // エラーを無視
        }
    });
}

// ========================================
// コンポーネント設定
// ========================================

/// ウィジェット種別ごとの設定（ホストから埋め込まれるJSONと同じキー名）
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ComponentConfig {
    /// ウィジェット種別（`recent-posts-3` の `recent-posts` 部分）
    pub id_base: String,
    /// 「もっと見る」で増やす件数
    pub posts_per_page: u64,
    pub default_instance_data: Attributes,
    pub is_customize_preview: bool,
    /// 表示件数を保持する設定キー
    pub count_field: String,
    /// REST APIのルート（コマンドラインの `--base-url` が優先）
    pub rest_base_url: Option<String>,
    /// コマンドラインの `--log-level` / `--quiet` が優先
    pub log_level: LogLevel,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            id_base: "recent-posts".to_string(),
            posts_per_page: 5,
            default_instance_data: Attributes::new(),
            is_customize_preview: false,
            count_field: "count".to_string(),
            rest_base_url: None,
            log_level: LogLevel::Info,
        }
    }
}

impl ComponentConfig {
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&source)
    }
}

/// 設定ファイルを読む（指定がなければ既定値）
pub fn load_config(path: Option<&str>) -> Result<ComponentConfig, ConfigError> {
    match path {
        Some(path) => ComponentConfig::from_file(Path::new(path)),
        None => Ok(ComponentConfig::default()),
    }
}

// ========================================
// コマンドライン引数構造体
// ========================================

const DEFAULT_BASE_URL: &str = "http://localhost:8080/wp-json";

/// デモバイナリのコマンドライン引数
///
/// 省略した値は設定ファイルの値、それもなければ既定値を使う。
#[derive(Debug)]
pub struct CliArgs {
    pub base_url: Option<String>,
    pub config_path: Option<String>,
    pub widget_id: String,
    pub count: u64,
    pub quiet: bool, // panic以外のログを抑制
    pub log_level: Option<LogLevel>,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            base_url: None,
            config_path: None,
            widget_id: "recent-posts-1".to_string(),
            count: 5,
            quiet: false,
            log_level: None,
        }
    }
}

impl CliArgs {
    pub fn base_url(&self, config: &ComponentConfig) -> String {
        self.base_url
            .as_deref()
            .or(config.rest_base_url.as_deref())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn log_level(&self, config: &ComponentConfig) -> LogLevel {
        if self.quiet {
            return LogLevel::Off;
        }
        self.log_level.unwrap_or(config.log_level)
    }
}

pub fn parse_args() -> CliArgs {
    let args: Vec<String> = env::args().collect();
    parse_args_from(args.iter().skip(1).map(String::as_str))
}

pub fn parse_args_from<'a>(args: impl IntoIterator<Item = &'a str>) -> CliArgs {
    let mut cli_args = CliArgs::default();

    for arg in args {
        match arg {
            "--quiet" | "-q" => {
                cli_args.quiet = true;
            }
            "--help" | "-h" => {
                show_help();
                std::process::exit(0);
            }
            _ => {
                if let Some(url) = arg.strip_prefix("--base-url=") {
                    cli_args.base_url = Some(url.trim_end_matches('/').to_string());
                } else if let Some(path) = arg.strip_prefix("--config=") {
                    cli_args.config_path = Some(path.to_string());
                } else if let Some(id) = arg.strip_prefix("--widget-id=") {
                    cli_args.widget_id = id.to_string();
                } else if let Some(count) = arg.strip_prefix("--count=") {
                    match count.parse() {
                        Ok(count) => cli_args.count = count,
                        Err(_) => eprintln!("ignoring non-numeric --count value `{}`", count),
                    }
                } else if let Some(level) = arg.strip_prefix("--log-level=") {
                    match level.parse() {
                        Ok(level) => cli_args.log_level = Some(level),
                        Err(e) => eprintln!("{}", e),
                    }
                }
            }
        }
    }
    cli_args
}

const HELP: &str = "Recent Items Widget Renderer

USAGE:
    recent_items [OPTIONS]

OPTIONS:
    --base-url=URL           REST API root (default: restBaseUrl from --config, else http://localhost:8080/wp-json)
    --config=PATH            Component config JSON (idBase, postsPerPage, restBaseUrl, logLevel, ...)
    --widget-id=ID           Widget id to render (default: recent-posts-1)
    --count=N                Number of items to request (default: 5)
    --quiet, -q              Suppress all logs except panics
    --log-level=LEVEL        Set log level (off/error/warn/info/debug/trace; default: logLevel from --config)
    --help, -h               Show this help";

// ロガー初期化前に呼ばれるので標準出力へ直接書く
pub fn show_help() {
    println!("{}", HELP);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let config = ComponentConfig::from_json(r#"{"idBase": "recent-items", "isCustomizePreview": true}"#).unwrap();
        assert_eq!(config.id_base, "recent-items");
        assert!(config.is_customize_preview);
        assert_eq!(config.posts_per_page, 5);
        assert_eq!(config.count_field, "count");
        assert!(config.default_instance_data.is_empty());
    }

    #[test]
    fn test_config_reads_instance_defaults() {
        let config = ComponentConfig::from_json(
            r#"{"postsPerPage": 3, "defaultInstanceData": {"title": "Recent", "count": 5}, "logLevel": "debug"}"#,
        )
        .unwrap();
        assert_eq!(config.posts_per_page, 3);
        assert_eq!(config.default_instance_data["title"], "Recent");
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_config_rejects_malformed_json() {
        assert!(matches!(ComponentConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!(matches!("loud".parse::<LogLevel>(), Err(ConfigError::UnknownLogLevel(_))));
    }

    #[test]
    fn test_parse_args() {
        let config = ComponentConfig::default();
        let args = parse_args_from([
            "--base-url=https://example.com/wp-json/",
            "--count=8",
            "--log-level=trace",
            "--config=widget.json",
        ]);
        assert_eq!(args.base_url(&config), "https://example.com/wp-json");
        assert_eq!(args.count, 8);
        assert_eq!(args.log_level(&config), LogLevel::Trace);
        assert_eq!(args.config_path.as_deref(), Some("widget.json"));

        let quiet = parse_args_from(["-q", "--log-level=debug"]);
        assert!(quiet.quiet);
        assert_eq!(quiet.log_level(&config), LogLevel::Off);
    }

    #[test]
    fn test_help_lists_every_flag() {
        for flag in ["--base-url=", "--config=", "--widget-id=", "--count=", "--quiet", "--log-level=", "--help"] {
            assert!(HELP.contains(flag), "{} missing from help", flag);
        }
    }

    #[test]
    fn test_cli_falls_back_to_config() {
        let config = ComponentConfig::from_json(r#"{"restBaseUrl": "https://cms.test/wp-json/", "logLevel": "warn"}"#)
            .unwrap();
        let args = parse_args_from(["--count=3"]);
        assert_eq!(args.base_url(&config), "https://cms.test/wp-json");
        assert_eq!(args.log_level(&config), LogLevel::Warn);

        let defaults = ComponentConfig::default();
        assert_eq!(args.base_url(&defaults), "http://localhost:8080/wp-json");
        assert_eq!(args.log_level(&defaults), LogLevel::Info);

        let explicit = parse_args_from(["--base-url=http://other/wp-json", "--log-level=error"]);
        assert_eq!(explicit.base_url(&config), "http://other/wp-json");
        assert_eq!(explicit.log_level(&config), LogLevel::Error);
    }

    #[test]
    fn test_load_config_from_file() {
        assert_eq!(load_config(None).unwrap().id_base, "recent-posts");

        let path = env::temp_dir().join(format!("recent_items_config_{}.json", std::process::id()));
        fs::write(&path, r#"{"idBase": "recent-items", "restBaseUrl": "https://cms.test/wp-json"}"#).unwrap();
        let config = load_config(path.to_str()).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.id_base, "recent-items");
        assert_eq!(config.rest_base_url.as_deref(), Some("https://cms.test/wp-json"));

        assert!(matches!(load_config(Some("/nonexistent/recent_items.json")), Err(ConfigError::Read { .. })));
    }
}
