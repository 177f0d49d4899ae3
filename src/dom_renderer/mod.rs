pub mod dom;
pub mod embedded;

pub use dom::{DomNode, MemoryContainer, WidgetContainer, EDIT_SHORTCUT_CLASS};
pub use embedded::EmbeddedData;
