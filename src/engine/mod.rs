pub mod collection;
pub mod model;
pub mod registry;
pub mod render;
pub mod resolver;

pub use collection::{ContentItem, ItemCollection, ItemId};
pub use model::{Attributes, Model};
pub use registry::WidgetRegistry;
pub use render::{RenderState, WidgetContext, WidgetView};
pub use resolver::EntityResolver;
