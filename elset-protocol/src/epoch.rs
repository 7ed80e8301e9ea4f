//! The epoch field of line 1, `YYDDD.DDDDDDDD`

use crate::{snippet, ParseError, EPOCH_COLUMNS, SNIPPET_LEN};
use nom::{
    bytes::complete::take_while_m_n,
    character::complete::{char, digit0},
    combinator::{eof, map_res, recognize},
    sequence::pair,
    IResult,
};

/// The raw epoch encoding, before century and calendar resolution
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct EpochFields {
    /// 0..=99
    pub two_digit_year: u32,
    /// 1..=366
    pub day_of_year: u32,
    /// Fraction of the day, 0.0..1.0
    pub day_fraction: f64,
}

pub fn parse_epoch_fields(line1: &str) -> Result<EpochFields, ParseError> {
    let err = || ParseError::Epoch {
        snippet: snippet(line1, SNIPPET_LEN),
    };
    let field = line1.get(EPOCH_COLUMNS).ok_or_else(err)?;
    let (_, fields) = epoch_field(field.trim()).map_err(|_| err())?;
    if !(1..=366).contains(&fields.day_of_year) || !(0.0..1.0).contains(&fields.day_fraction) {
        return Err(err());
    }
    Ok(fields)
}

fn epoch_field(s: &str) -> IResult<&str, EpochFields> {
    let (s, two_digit_year) = year(s)?;
    let (s, day_of_year) = day(s)?;
    let (s, fraction) = recognize(pair(char('.'), digit0))(s)?;
    let (s, _) = eof(s)?;
    // "." alone is a valid zero fraction
    let day_fraction = format!("0{fraction}0").parse::<f64>().unwrap_or(0.0);
    Ok((
        s,
        EpochFields {
            two_digit_year,
            day_of_year,
            day_fraction,
        },
    ))
}

fn year(s: &str) -> IResult<&str, u32> {
    map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), str::parse)(s)
}

fn day(s: &str) -> IResult<&str, u32> {
    map_res(take_while_m_n(1, 3, |c: char| c.is_ascii_digit()), str::parse)(s)
}
