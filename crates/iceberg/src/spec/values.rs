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

//! Values of source columns and partition tuples.

use std::fmt::{Display, Formatter};

use ordered_float::OrderedFloat;
use serde_derive::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use uuid::Uuid;

/// Values present in a partition tuple or handed to a transform.
///
/// Temporal values use the physical representation: dates are days since the unix epoch, times
/// are microseconds since midnight, timestamps are microseconds since the unix epoch. Decimals
/// hold their unscaled value.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrimitiveLiteral {
    /// 0x00 for false, non-zero byte for true
    Boolean(bool),
    /// Stored as 4-byte little-endian
    Int(i32),
    /// Stored as 8-byte little-endian
    Long(i64),
    /// Stored as 4-byte little-endian
    Float(OrderedFloat<f32>),
    /// Stored as 8-byte little-endian
    Double(OrderedFloat<f64>),
    /// Days since 1970-01-01
    Date(i32),
    /// Microseconds since midnight
    Time(i64),
    /// Microseconds since 1970-01-01 00:00:00
    Timestamp(i64),
    /// Microseconds since 1970-01-01 00:00:00 UTC
    Timestamptz(i64),
    /// UTF-8 bytes (without length)
    String(String),
    /// 16-byte big-endian value
    Uuid(Uuid),
    /// Binary value
    Fixed(Vec<u8>),
    /// Binary value (without length)
    Binary(Vec<u8>),
    /// Unscaled value of a decimal
    Decimal(#[serde_as(as = "DisplayFromStr")] i128),
}

impl PrimitiveLiteral {
    /// Returns true if the literal is a NaN float or double.
    pub fn is_nan(&self) -> bool {
        match self {
            PrimitiveLiteral::Float(v) => v.is_nan(),
            PrimitiveLiteral::Double(v) => v.is_nan(),
            _ => false,
        }
    }
}

impl Display for PrimitiveLiteral {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveLiteral::Boolean(v) => write!(f, "{v}"),
            PrimitiveLiteral::Int(v) | PrimitiveLiteral::Date(v) => write!(f, "{v}"),
            PrimitiveLiteral::Long(v)
            | PrimitiveLiteral::Time(v)
            | PrimitiveLiteral::Timestamp(v)
            | PrimitiveLiteral::Timestamptz(v) => write!(f, "{v}"),
            PrimitiveLiteral::Float(v) => write!(f, "{v}"),
            PrimitiveLiteral::Double(v) => write!(f, "{v}"),
            PrimitiveLiteral::String(v) => write!(f, "{v}"),
            PrimitiveLiteral::Uuid(v) => write!(f, "{v}"),
            PrimitiveLiteral::Fixed(v) | PrimitiveLiteral::Binary(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            PrimitiveLiteral::Decimal(v) => write!(f, "{v}"),
        }
    }
}

/// A partition tuple: one optional value per partition field, in spec order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Struct {
    fields: Vec<Option<PrimitiveLiteral>>,
}

impl Struct {
    /// Create an empty struct.
    pub fn empty() -> Self {
        Self { fields: vec![] }
    }

    /// Returns the values of the struct.
    pub fn fields(&self) -> &[Option<PrimitiveLiteral>] {
        &self.fields
    }

    /// Returns an iterator over the values of the struct.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = Option<&PrimitiveLiteral>> {
        self.fields.iter().map(|v| v.as_ref())
    }
}

impl FromIterator<Option<PrimitiveLiteral>> for Struct {
    fn from_iter<I: IntoIterator<Item = Option<PrimitiveLiteral>>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_struct_json() {
        let partition = Struct::from_iter([
            Some(PrimitiveLiteral::Int(3)),
            None,
            Some(PrimitiveLiteral::Decimal(-500754589)),
        ]);

        let json = serde_json::to_string(&partition).unwrap();
        assert_eq!(json, r#"[{"int":3},null,{"decimal":"-500754589"}]"#);
        assert_eq!(serde_json::from_str::<Struct>(&json).unwrap(), partition);
    }

    #[test]
    fn test_nan() {
        assert!(PrimitiveLiteral::Double(OrderedFloat(f64::NAN)).is_nan());
        assert!(!PrimitiveLiteral::Double(OrderedFloat(1.0)).is_nan());
        assert!(!PrimitiveLiteral::Int(1).is_nan());
    }
}
