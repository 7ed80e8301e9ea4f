pub use crate::epoch::{parse_epoch_fields, EpochFields};
pub use crate::parser::{
    is_element_line, parse_catalog, parse_element_set, scan_catalog, CatalogScan, ParseError,
};

pub mod epoch;
pub mod parser;

/// Columns 19-32 (1-indexed) of line 1: `YYDDD.DDDDDDDD`
pub const EPOCH_COLUMNS: std::ops::Range<usize> = 18..32;
/// Two-digit years below this belong to the 2000s
pub const EPOCH_CENTURY_PIVOT: u32 = 57;
/// Longest diagnostic excerpt carried by an error
pub const SNIPPET_LEN: usize = 64;

/// A log-safe excerpt of `text`, never longer than `max` characters plus an ellipsis
pub fn snippet(text: &str, max: usize) -> String {
    let mut out: String = text.trim().chars().take(max).collect();
    if text.trim().chars().nth(max).is_some() {
        out.push_str("...");
    }
    out
}
