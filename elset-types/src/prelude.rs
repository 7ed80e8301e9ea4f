pub use crate::elset::{ElementSet, ElementSetHistory, Source};
pub use crate::point::PropagatedPoint;
pub use crate::time::UtcTimestamp;
pub use crate::tle::RawElementSet;
pub use crate::CatalogId;
