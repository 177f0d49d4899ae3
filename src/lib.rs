pub mod component;
pub mod config;
pub mod customize;
pub mod dom_renderer;
pub mod engine;
pub mod error;
pub mod template;
pub mod transport;

pub use component::RecentItemsComponent;
pub use config::{init_logger, load_config, parse_args, CliArgs, ComponentConfig, LogLevel};
pub use customize::{HostRefresh, LiveSettings, PartialRefreshRequest, RefreshDispatcher};
pub use dom_renderer::{EmbeddedData, MemoryContainer, WidgetContainer};
pub use engine::{ItemCollection, Model, RenderState, WidgetView};
pub use error::{Error, FetchError, Result, TemplateError};
pub use template::{ListTemplate, RenderPayload, Template};
pub use transport::{HttpRestClient, MemoryRestClient, RestClient};
