mod drawing;
mod geometry;
mod page;
mod preferences;

pub use drawing::{Color, Drawing, DrawingError, Point, Stroke, Tool};
pub use geometry::{to_document_space, to_input_space, Rect, RenderTransform};
pub use page::{Page, PageId, PageRef};
pub use preferences::{EmbedPolicy, InkPreferences};
