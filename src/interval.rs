//! Interval arguments of the TIMEBUCKET macro, parsed with nom.
//!
//! Accepted spellings all normalize to `INTERVAL <n> <UNIT>`:
//!
//! ```text
//! 1 hour      '15 minutes'      INTERVAL 1 DAY      interval '2 weeks'
//! ```

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{alpha1, char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map_opt, map_res, opt},
    sequence::{delimited, terminated},
    IResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl IntervalUnit {
    /// Singular or plural unit name, any case.
    pub fn from_word(word: &str) -> Option<Self> {
        let upper = word.to_ascii_uppercase();
        let singular = upper.strip_suffix('S').unwrap_or(&upper);
        match singular {
            "SECOND" => Some(Self::Second),
            "MINUTE" => Some(Self::Minute),
            "HOUR" => Some(Self::Hour),
            "DAY" => Some(Self::Day),
            "WEEK" => Some(Self::Week),
            "MONTH" => Some(Self::Month),
            "QUARTER" => Some(Self::Quarter),
            "YEAR" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Second => "SECOND",
            Self::Minute => "MINUTE",
            Self::Hour => "HOUR",
            Self::Day => "DAY",
            Self::Week => "WEEK",
            Self::Month => "MONTH",
            Self::Quarter => "QUARTER",
            Self::Year => "YEAR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub count: u64,
    pub unit: IntervalUnit,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INTERVAL {} {}", self.count, self.unit.as_str())
    }
}

/// Parse an interval argument. Returns `None` for anything unrecognized.
pub fn parse_interval(input: &str) -> Option<Interval> {
    all_consuming(interval)(input.trim())
        .ok()
        .map(|(_, interval)| interval)
}

fn interval(input: &str) -> IResult<&str, Interval> {
    let (input, _) = opt(terminated(tag_no_case("INTERVAL"), multispace1))(input)?;
    alt((
        delimited(char('\''), delimited(multispace0, amount, multispace0), char('\'')),
        amount,
    ))(input)
}

fn amount(input: &str) -> IResult<&str, Interval> {
    let (input, count) = map_res(digit1, |digits: &str| digits.parse::<u64>())(input)?;
    let (input, _) = multispace0(input)?;
    let (input, unit) = map_opt(alpha1, IntervalUnit::from_word)(input)?;
    Ok((input, Interval { count, unit }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare() {
        let iv = parse_interval("1 hour").unwrap();
        assert_eq!(iv, Interval { count: 1, unit: IntervalUnit::Hour });
        assert_eq!(iv.to_string(), "INTERVAL 1 HOUR");
    }

    #[test]
    fn test_quoted_and_prefixed() {
        assert_eq!(parse_interval("'15 minutes'").unwrap().to_string(), "INTERVAL 15 MINUTE");
        assert_eq!(parse_interval("INTERVAL 1 DAY").unwrap().to_string(), "INTERVAL 1 DAY");
        assert_eq!(parse_interval("interval '2 weeks'").unwrap().to_string(), "INTERVAL 2 WEEK");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_interval("").is_none());
        assert!(parse_interval("hour").is_none());
        assert!(parse_interval("1 fortnight").is_none());
        assert!(parse_interval("1 hour extra").is_none());
    }
}
