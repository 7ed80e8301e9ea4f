//! Parsers for the provider's plaintext element-set feed
//!
//! A record is either three lines (title, line 1, line 2) or the two element
//! lines alone. Element lines are recognized by their leading line number
//! followed by whitespace.

use crate::{snippet, SNIPPET_LEN};
use elset_types::prelude::*;
use nom::{
    branch::alt,
    character::complete::{char, line_ending, not_line_ending, space0, space1},
    combinator::{eof, opt, recognize, verify},
    multi::many0,
    sequence::{pair, terminated, tuple},
    IResult,
};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("No line 1 element line found in '{snippet}'")]
    MissingLine1 { snippet: String },
    #[error("Line 1 is not followed by a line 2 element line in '{snippet}'")]
    MissingLine2 { snippet: String },
    #[error("Invalid epoch columns in line 1 '{snippet}'")]
    Epoch { snippet: String },
    #[error("Unrecognized catalog content at '{snippet}'")]
    Catalog { snippet: String },
}

/// True when `line` is element line `number`, i.e. the digit followed by whitespace
pub fn is_element_line(line: &str, number: char) -> bool {
    recognize(pair(char::<_, nom::error::Error<&str>>(number), space1))(line).is_ok()
}

/// Extract the first element set from a provider response.
///
/// Scans for the first line 1 and the first line 2 after it. The title is the
/// non-blank, non-element line directly above line 1, if there is one.
pub fn parse_element_set(text: &str) -> Result<RawElementSet, ParseError> {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();

    let idx1 = lines
        .iter()
        .position(|l| is_element_line(l, '1'))
        .ok_or_else(|| ParseError::MissingLine1 {
            snippet: snippet(text, SNIPPET_LEN),
        })?;
    let idx2 = lines[idx1 + 1..]
        .iter()
        .position(|l| is_element_line(l, '2'))
        .map(|offset| idx1 + 1 + offset)
        .ok_or_else(|| ParseError::MissingLine2 {
            snippet: snippet(lines[idx1], SNIPPET_LEN),
        })?;

    let display_name = idx1
        .checked_sub(1)
        .map(|i| lines[i].trim())
        .filter(|l| !l.is_empty() && !is_element_line(l, '2'))
        .map(str::to_owned);
    if display_name.is_none() {
        debug!(line1 = lines[idx1], "Element set has no title line");
    }

    Ok(RawElementSet {
        display_name,
        line1: lines[idx1].to_owned(),
        line2: lines[idx2].to_owned(),
    })
}

/// Parse a whole catalog file of 2-line and 3-line records, blank lines allowed
pub fn parse_catalog(text: &str) -> Result<Vec<RawElementSet>, ParseError> {
    let (rest, records) = many0(record)(text).map_err(|_| ParseError::Catalog {
        snippet: snippet(text, SNIPPET_LEN),
    })?;
    if !rest.trim().is_empty() {
        return Err(ParseError::Catalog {
            snippet: snippet(rest, SNIPPET_LEN),
        });
    }
    debug!(records = records.len(), "Parsed catalog");
    Ok(records)
}

/// Records found by [`scan_catalog`], and the lines it could not place
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogScan {
    pub records: Vec<RawElementSet>,
    /// Short excerpts of the skipped lines, in file order
    pub skipped: Vec<String>,
}

/// Lenient catalog parse for provider group feeds.
///
/// Walks the non-blank lines, taking a title + line 1 + line 2 or a bare
/// line 1 + line 2 wherever one starts. Any other line is skipped and
/// reported, and scanning resumes on the next line.
pub fn scan_catalog(text: &str) -> CatalogScan {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let mut scan = CatalogScan::default();
    let mut i = 0;
    while i < lines.len() {
        let at = |n: usize| lines.get(i + n).copied().unwrap_or("");
        let (a, b, c) = (at(0), at(1), at(2));
        let is_title = !is_element_line(a, '1') && !is_element_line(a, '2');
        if is_title && is_element_line(b, '1') && is_element_line(c, '2') {
            scan.records.push(RawElementSet {
                display_name: Some(a.to_owned()),
                line1: b.to_owned(),
                line2: c.to_owned(),
            });
            i += 3;
        } else if is_element_line(a, '1') && is_element_line(b, '2') {
            scan.records.push(RawElementSet {
                display_name: None,
                line1: a.to_owned(),
                line2: b.to_owned(),
            });
            i += 2;
        } else {
            scan.skipped.push(snippet(a, SNIPPET_LEN));
            i += 1;
        }
    }
    debug!(
        records = scan.records.len(),
        skipped = scan.skipped.len(),
        "Scanned catalog"
    );
    scan
}

fn record(s: &str) -> IResult<&str, RawElementSet> {
    let (s, _) = many0(blank_line)(s)?;
    let (s, name) = opt(terminated(title, line_ending))(s)?;
    let (s, line1) = terminated(line1, line_ending)(s)?;
    let (s, line2) = terminated(line2, alt((line_ending, eof)))(s)?;
    Ok((
        s,
        RawElementSet {
            display_name: name.map(|n| n.trim().to_owned()),
            line1: line1.trim_end().to_owned(),
            line2: line2.trim_end().to_owned(),
        },
    ))
}

fn blank_line(s: &str) -> IResult<&str, &str> {
    recognize(pair(space0, line_ending))(s)
}

fn title(s: &str) -> IResult<&str, &str> {
    verify(not_line_ending, |l: &str| {
        !l.trim().is_empty() && !is_element_line(l, '1') && !is_element_line(l, '2')
    })(s)
}

fn line1(s: &str) -> IResult<&str, &str> {
    recognize(tuple((char('1'), space1, not_line_ending)))(s)
}

fn line2(s: &str) -> IResult<&str, &str> {
    recognize(tuple((char('2'), space1, not_line_ending)))(s)
}
