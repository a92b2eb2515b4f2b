// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use chrono::{DateTime, Datelike, NaiveDate};

use super::{TransformFunction, unsupported};
use crate::spec::PrimitiveLiteral;
use crate::{Error, ErrorKind, Result};

/// Seconds in one hour.
const SECONDS_PER_HOUR: i64 = 3600;
/// Microseconds in one second.
const MICROS_PER_SECOND: i64 = 1_000_000;
/// Microseconds in one hour.
const MICROS_PER_HOUR: i64 = SECONDS_PER_HOUR * MICROS_PER_SECOND;
/// Microseconds in one day.
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;
/// Year of unix epoch.
const UNIX_EPOCH_YEAR: i32 = 1970;
/// One day from unix epoch.
const DAY_FROM_UNIX_EPOCH: i32 = 719163;

fn date_from_days(days: i32) -> Result<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + DAY_FROM_UNIX_EPOCH).ok_or_else(|| {
        Error::new(
            ErrorKind::DataInvalid,
            format!("Date value out of range: {days}"),
        )
    })
}

fn date_from_micros(micros: i64) -> Result<NaiveDate> {
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Timestamp value out of range: {micros}"),
            )
        })
}

fn source_date(transform: &str, input: &PrimitiveLiteral) -> Result<NaiveDate> {
    match input {
        PrimitiveLiteral::Date(v) => date_from_days(*v),
        PrimitiveLiteral::Timestamp(v) | PrimitiveLiteral::Timestamptz(v) => date_from_micros(*v),
        _ => Err(unsupported(transform, input)),
    }
}

/// Extract a date or timestamp year, as years from 1970
#[derive(Debug)]
pub struct Year;

impl TransformFunction for Year {
    fn transform_literal(&self, input: &PrimitiveLiteral) -> Result<Option<PrimitiveLiteral>> {
        let date = source_date("year", input)?;
        Ok(Some(PrimitiveLiteral::Int(date.year() - UNIX_EPOCH_YEAR)))
    }
}

/// Extract a date or timestamp month, as months from 1970-01-01
#[derive(Debug)]
pub struct Month;

impl TransformFunction for Month {
    fn transform_literal(&self, input: &PrimitiveLiteral) -> Result<Option<PrimitiveLiteral>> {
        let date = source_date("month", input)?;
        Ok(Some(PrimitiveLiteral::Int(
            (date.year() - UNIX_EPOCH_YEAR) * 12 + date.month0() as i32,
        )))
    }
}

/// Extract a date or timestamp day, as days from 1970-01-01
#[derive(Debug)]
pub struct Day;

impl TransformFunction for Day {
    fn transform_literal(&self, input: &PrimitiveLiteral) -> Result<Option<PrimitiveLiteral>> {
        let days = match input {
            PrimitiveLiteral::Date(v) => *v,
            PrimitiveLiteral::Timestamp(v) | PrimitiveLiteral::Timestamptz(v) => {
                v.div_euclid(MICROS_PER_DAY).try_into()?
            }
            _ => return Err(unsupported("day", input)),
        };
        Ok(Some(PrimitiveLiteral::Date(days)))
    }
}

/// Extract a timestamp hour, as hours from 1970-01-01 00:00:00
#[derive(Debug)]
pub struct Hour;

impl TransformFunction for Hour {
    fn transform_literal(&self, input: &PrimitiveLiteral) -> Result<Option<PrimitiveLiteral>> {
        let hours = match input {
            PrimitiveLiteral::Timestamp(v) | PrimitiveLiteral::Timestamptz(v) => {
                v.div_euclid(MICROS_PER_HOUR).try_into()?
            }
            _ => return Err(unsupported("hour", input)),
        };
        Ok(Some(PrimitiveLiteral::Int(hours)))
    }
}
