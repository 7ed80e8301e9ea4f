pub mod elset;
pub mod point;
pub mod prelude;
pub mod time;
pub mod tle;

/// NORAD catalog number
pub type CatalogId = u32;
