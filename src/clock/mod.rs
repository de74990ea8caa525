//! Timestamps used to order events

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use time::{format_description, Date, OffsetDateTime};

use crate::error::{Error, Result};

///[DateTime] is a wrapper around the epoch time as i64. This type also functions as a wrapper
///around the time package which offers the datetime parsing functionality that is required when
///loading external data.
//The internal representation with the time package should remain hidden from clients. Whilst this
//results in some duplication of the API, this retains the option to get rid of the dependency on
//time or change individual functions later.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DateTime(i64);

impl DateTime {
    /// Parse a date string with an explicit format description, for example
    /// `"[year]-[month]-[day]"`. The resulting timestamp is midnight UTC.
    pub fn from_date_string(val: &str, date_fmt: &str) -> Result<Self> {
        let format = format_description::parse(date_fmt)
            .map_err(|_| Error::domain_violation(format!("bad date format: {date_fmt}")))?;
        let parsed_date = Date::parse(val, &format)
            .map_err(|_| Error::domain_violation(format!("unparseable date: {val}")))?;
        let parsed_time = parsed_date.with_time(time::macros::time!(00:00));
        Ok(Self::from(parsed_time.assume_utc().unix_timestamp()))
    }
}

impl Deref for DateTime {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<OffsetDateTime> for DateTime {
    fn from(value: OffsetDateTime) -> Self {
        value.unix_timestamp().into()
    }
}

impl From<DateTime> for i64 {
    fn from(v: DateTime) -> Self {
        v.0
    }
}

impl From<i64> for DateTime {
    fn from(v: i64) -> Self {
        DateTime(v)
    }
}
