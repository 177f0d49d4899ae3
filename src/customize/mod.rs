pub mod bridge;
pub mod channel;
pub mod refresh;

pub use bridge::PostPreviewBridge;
pub use channel::{LiveSettings, Setting};
pub use refresh::{
    HostRefresh, PartialRefreshRequest, RecentItemsRefresh, RefreshCompletion, RefreshDispatcher, RefreshInterceptor,
    RefreshOutcome, WidgetIdParts,
};
