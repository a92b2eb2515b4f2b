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

//! Transforms in iceberg.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::datatypes::PrimitiveType;
use super::values::PrimitiveLiteral;
use crate::ErrorKind;
use crate::error::{Error, Result};
use crate::transform::create_transform_function;

/// Transform is used to derive a partition value from a source column value.
///
/// Two transforms are equal if and only if their descriptors (`Display` output, e.g.
/// `bucket[16]`) are equal, no matter how they were constructed. Serialization uses the
/// descriptor too.
///
/// All transforms must return `null` for a `null` input value.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Transform {
    /// Source value, unmodified
    ///
    /// - Source type could be any primitive type.
    /// - Return type is the same with source type.
    Identity,
    /// Hash of value, mod `N`.
    ///
    /// Bucket partition transforms use a 32-bit hash of the source value.
    /// The 32-bit hash implementation is the 32-bit Murmur3 hash, x86
    /// variant, seeded with 0.
    ///
    /// ```text
    /// def bucket_N(x) = (murmur3_x86_32_hash(x) & Integer.MAX_VALUE) % N
    /// ```
    ///
    /// - Source type could be `int`, `long`, `decimal`, `date`, `time`,
    ///   `timestamp`, `timestamptz`, `string`, `uuid`, `fixed`, `binary`.
    /// - Return type is `int`.
    Bucket(u32),
    /// Value truncated to width `W`
    ///
    /// - `int`/`long`/`decimal`: `v - (v % W)` with a positive remainder,
    ///   e.g. W=10: 1 ￫ 0, -1 ￫ -10
    /// - `string`: the first `W` code points, e.g. L=3: iceberg ￫ ice
    /// - `binary`: the first `W` bytes
    Truncate(u32),
    /// Extract a date or timestamp year, as years from 1970
    Year,
    /// Extract a date or timestamp month, as months from 1970-01-01
    Month,
    /// Extract a date or timestamp day, as days from 1970-01-01
    Day,
    /// Extract a timestamp hour, as hours from 1970-01-01 00:00:00
    Hour,
    /// Always produces `null`
    ///
    /// The void transform replaces the transform of a dropped partition field, so the field
    /// keeps its slot in the partition tuple of manifests written under older specs.
    Void,
}

impl Transform {
    /// Creates a `bucket[n]` transform, rejecting `n == 0`.
    pub fn bucket(n: u32) -> Result<Self> {
        let transform = Transform::Bucket(n);
        transform.validate()?;
        Ok(transform)
    }

    /// Creates a `truncate[w]` transform, rejecting `w == 0`.
    pub fn truncate(width: u32) -> Result<Self> {
        let transform = Transform::Truncate(width);
        transform.validate()?;
        Ok(transform)
    }

    /// Checks the parameter of `bucket[n]` and `truncate[w]`, which must be positive.
    ///
    /// The variants can be built directly, so anything that persists a transform checks it here.
    pub fn validate(&self) -> Result<()> {
        match self {
            Transform::Bucket(0) => Err(Error::new(
                ErrorKind::DataInvalid,
                "Invalid number of buckets: 0 (must be > 0)",
            )),
            Transform::Truncate(0) => Err(Error::new(
                ErrorKind::DataInvalid,
                "Invalid truncate width: 0 (must be > 0)",
            )),
            _ => Ok(()),
        }
    }

    /// Get the return type of transform given the input type.
    pub fn result_type(&self, input_type: &PrimitiveType) -> Result<PrimitiveType> {
        let invalid = || {
            Err(Error::new(
                ErrorKind::DataInvalid,
                format!("{input_type} is not a valid input type of {self} transform"),
            ))
        };
        match self {
            Transform::Identity | Transform::Void => Ok(input_type.clone()),
            Transform::Bucket(_) => match input_type {
                PrimitiveType::Int
                | PrimitiveType::Long
                | PrimitiveType::Decimal { .. }
                | PrimitiveType::Date
                | PrimitiveType::Time
                | PrimitiveType::Timestamp
                | PrimitiveType::Timestamptz
                | PrimitiveType::String
                | PrimitiveType::Uuid
                | PrimitiveType::Fixed(_)
                | PrimitiveType::Binary => Ok(PrimitiveType::Int),
                _ => invalid(),
            },
            Transform::Truncate(_) => match input_type {
                PrimitiveType::Int
                | PrimitiveType::Long
                | PrimitiveType::String
                | PrimitiveType::Binary
                | PrimitiveType::Decimal { .. } => Ok(input_type.clone()),
                _ => invalid(),
            },
            Transform::Year | Transform::Month => match input_type {
                PrimitiveType::Timestamp | PrimitiveType::Timestamptz | PrimitiveType::Date => {
                    Ok(PrimitiveType::Int)
                }
                _ => invalid(),
            },
            Transform::Day => match input_type {
                PrimitiveType::Timestamp | PrimitiveType::Timestamptz | PrimitiveType::Date => {
                    Ok(PrimitiveType::Date)
                }
                _ => invalid(),
            },
            Transform::Hour => match input_type {
                PrimitiveType::Timestamp | PrimitiveType::Timestamptz => Ok(PrimitiveType::Int),
                _ => invalid(),
            },
        }
    }

    /// Applies the transform to a single source value.
    ///
    /// `None` stands for a null partition value.
    pub fn apply(&self, value: Option<&PrimitiveLiteral>) -> Result<Option<PrimitiveLiteral>> {
        let Some(value) = value else {
            return Ok(None);
        };
        create_transform_function(self)?.transform_literal(value)
    }

    /// Whether the transform preserves the order of values.
    pub fn preserves_order(&self) -> bool {
        !matches!(self, Transform::Void | Transform::Bucket(_))
    }

    /// Whether partition values produced by this transform can tell files apart.
    pub fn is_void(&self) -> bool {
        matches!(self, Transform::Void)
    }

    /// Return the unique transform name to check if similar transforms for the same source field
    /// are added multiple times in partition spec builder.
    pub fn dedup_name(&self) -> String {
        match self {
            Transform::Year | Transform::Month | Transform::Day | Transform::Hour => {
                "time".to_string()
            }
            _ => format!("{self}"),
        }
    }
}

impl Display for Transform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Void => write!(f, "void"),
            Transform::Bucket(length) => write!(f, "bucket[{length}]"),
            Transform::Truncate(width) => write!(f, "truncate[{width}]"),
        }
    }
}

fn parse_parameter(descriptor: &str, prefix: &str) -> Result<u32> {
    descriptor
        .strip_prefix(prefix)
        .and_then(|v| v.strip_prefix('['))
        .and_then(|v| v.strip_suffix(']'))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("transform {prefix} type {descriptor:?} is invalid"),
            )
        })?
        .parse()
        .map_err(|err| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("transform {prefix} type {descriptor:?} is invalid"),
            )
            .with_source(err)
        })
}

impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let t = match s {
            "identity" => Transform::Identity,
            "year" => Transform::Year,
            "month" => Transform::Month,
            "day" => Transform::Day,
            "hour" => Transform::Hour,
            "void" => Transform::Void,
            v if v.starts_with("bucket") => Transform::bucket(parse_parameter(v, "bucket")?)?,
            v if v.starts_with("truncate") => {
                Transform::truncate(parse_parameter(v, "truncate")?)?
            }
            v => {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!("transform {v:?} is invalid"),
                ));
            }
        };

        Ok(t)
    }
}

impl Serialize for Transform {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(format!("{self}").as_str())
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(<D::Error as serde::de::Error>::custom)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_descriptor_round_trip() {
        for (descriptor, transform) in [
            ("identity", Transform::Identity),
            ("bucket[16]", Transform::Bucket(16)),
            ("truncate[4]", Transform::Truncate(4)),
            ("year", Transform::Year),
            ("month", Transform::Month),
            ("day", Transform::Day),
            ("hour", Transform::Hour),
            ("void", Transform::Void),
        ] {
            assert_eq!(descriptor.parse::<Transform>().unwrap(), transform);
            assert_eq!(transform.to_string(), descriptor);
        }
    }

    #[test]
    fn test_equality_is_by_descriptor() {
        let parsed: Transform = "bucket[16]".parse().unwrap();
        let built = Transform::bucket(16).unwrap();
        let deserialized: Transform = serde_json::from_str(r#""bucket[16]""#).unwrap();

        assert_eq!(parsed, built);
        assert_eq!(built, deserialized);
        assert_ne!(built, Transform::Bucket(8));
        assert_eq!(serde_json::to_string(&built).unwrap(), r#""bucket[16]""#);
    }

    #[test]
    fn test_zero_parameter_rejected() {
        assert_eq!(
            Transform::bucket(0).unwrap_err().kind(),
            ErrorKind::DataInvalid
        );
        assert!(Transform::truncate(0).is_err());
        assert!("bucket[0]".parse::<Transform>().is_err());
        assert!("truncate[0]".parse::<Transform>().is_err());
        assert!("bucket[x]".parse::<Transform>().is_err());
        assert!("bucket".parse::<Transform>().is_err());
        assert!("zorder".parse::<Transform>().is_err());
        assert!(serde_json::from_str::<Transform>(r#""bucket[0]""#).is_err());
    }

    #[test]
    fn test_result_type() {
        assert_eq!(
            Transform::Bucket(8)
                .result_type(&PrimitiveType::String)
                .unwrap(),
            PrimitiveType::Int
        );
        assert_eq!(
            Transform::Day.result_type(&PrimitiveType::Timestamp).unwrap(),
            PrimitiveType::Date
        );
        assert_eq!(
            Transform::Void.result_type(&PrimitiveType::Double).unwrap(),
            PrimitiveType::Double
        );
        assert!(Transform::Hour.result_type(&PrimitiveType::Date).is_err());
        assert!(Transform::Bucket(8).result_type(&PrimitiveType::Float).is_err());
        assert!(
            Transform::Truncate(8)
                .result_type(&PrimitiveType::Boolean)
                .is_err()
        );
    }

    #[test]
    fn test_apply() {
        assert_eq!(
            Transform::Bucket(100)
                .apply(Some(&PrimitiveLiteral::Int(34)))
                .unwrap(),
            Some(PrimitiveLiteral::Int(79))
        );
        assert_eq!(
            Transform::Void
                .apply(Some(&PrimitiveLiteral::Int(34)))
                .unwrap(),
            None
        );
        assert_eq!(Transform::Identity.apply(None).unwrap(), None);
    }

    #[test]
    fn test_preserves_order() {
        assert!(Transform::Identity.preserves_order());
        assert!(Transform::Truncate(3).preserves_order());
        assert!(!Transform::Bucket(3).preserves_order());
        assert!(!Transform::Void.preserves_order());
        assert_eq!(Transform::Year.dedup_name(), Transform::Hour.dedup_name());
    }
}
