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

//! Column types of a table schema.
//!
//! Partition source columns are always primitive, so nested types are not modelled here.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use super::values::PrimitiveLiteral;
use crate::error::Result;
use crate::{Error, ErrorKind};

/// Primitive data types
#[derive(Debug, PartialEq, Eq, Clone, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum PrimitiveType {
    /// True or False
    Boolean,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 32-bit IEEE 754 floating bit.
    Float,
    /// 64-bit IEEE 754 floating bit.
    Double,
    /// Fixed point decimal
    Decimal {
        /// Precision
        precision: u32,
        /// Scale
        scale: u32,
    },
    /// Calendar date without timezone or time.
    Date,
    /// Time of day without date or timezone.
    Time,
    /// Timestamp without timezone
    Timestamp,
    /// Timestamp with timezone
    Timestamptz,
    /// Arbitrary-length character sequences encoded in utf-8
    String,
    /// Universally Unique Identifiers
    Uuid,
    /// Fixed length byte array
    Fixed(u64),
    /// Arbitrary-length byte array.
    Binary,
}

impl PrimitiveType {
    /// Check whether literal is compatible with the type.
    pub fn compatible(&self, literal: &PrimitiveLiteral) -> bool {
        matches!(
            (self, literal),
            (PrimitiveType::Boolean, PrimitiveLiteral::Boolean(_))
                | (PrimitiveType::Int, PrimitiveLiteral::Int(_))
                | (PrimitiveType::Long, PrimitiveLiteral::Long(_))
                | (PrimitiveType::Float, PrimitiveLiteral::Float(_))
                | (PrimitiveType::Double, PrimitiveLiteral::Double(_))
                | (PrimitiveType::Decimal { .. }, PrimitiveLiteral::Decimal(_))
                | (PrimitiveType::Date, PrimitiveLiteral::Date(_))
                | (PrimitiveType::Time, PrimitiveLiteral::Time(_))
                | (PrimitiveType::Timestamp, PrimitiveLiteral::Timestamp(_))
                | (PrimitiveType::Timestamptz, PrimitiveLiteral::Timestamptz(_))
                | (PrimitiveType::String, PrimitiveLiteral::String(_))
                | (PrimitiveType::Uuid, PrimitiveLiteral::Uuid(_))
                | (PrimitiveType::Fixed(_), PrimitiveLiteral::Fixed(_))
                | (PrimitiveType::Binary, PrimitiveLiteral::Binary(_))
        )
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Int => write!(f, "int"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Time => write!(f, "time"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::Timestamptz => write!(f, "timestamptz"),
            PrimitiveType::String => write!(f, "string"),
            PrimitiveType::Uuid => write!(f, "uuid"),
            PrimitiveType::Fixed(size) => write!(f, "fixed[{size}]"),
            PrimitiveType::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for PrimitiveType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let t = match s {
            "boolean" => PrimitiveType::Boolean,
            "int" => PrimitiveType::Int,
            "long" => PrimitiveType::Long,
            "float" => PrimitiveType::Float,
            "double" => PrimitiveType::Double,
            "date" => PrimitiveType::Date,
            "time" => PrimitiveType::Time,
            "timestamp" => PrimitiveType::Timestamp,
            "timestamptz" => PrimitiveType::Timestamptz,
            "string" => PrimitiveType::String,
            "uuid" => PrimitiveType::Uuid,
            "binary" => PrimitiveType::Binary,
            v if v.starts_with("decimal(") && v.ends_with(')') => {
                let (precision, scale) = v
                    .trim_start_matches("decimal(")
                    .trim_end_matches(')')
                    .split_once(',')
                    .ok_or_else(|| {
                        Error::new(
                            ErrorKind::DataInvalid,
                            format!("Decimal requires precision and scale: {v}"),
                        )
                    })?;
                PrimitiveType::Decimal {
                    precision: precision.trim().parse()?,
                    scale: scale.trim().parse()?,
                }
            }
            v if v.starts_with("fixed[") && v.ends_with(']') => {
                PrimitiveType::Fixed(v.trim_start_matches("fixed[").trim_end_matches(']').parse()?)
            }
            v => {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!("primitive type {v:?} is invalid"),
                ));
            }
        };
        Ok(t)
    }
}

/// Reference to nested field.
pub type NestedFieldRef = Arc<NestedField>;

/// A named column of a schema or of a partition type.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NestedField {
    /// Id unique in table schema
    pub id: i32,
    /// Field Name
    pub name: String,
    /// Optional or required
    pub required: bool,
    /// Datatype
    #[serde(rename = "type")]
    pub field_type: PrimitiveType,
    /// Fields may have an optional comment or doc string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl NestedField {
    /// Construct a required field.
    pub fn required(id: i32, name: impl ToString, field_type: PrimitiveType) -> Self {
        Self {
            id,
            name: name.to_string(),
            required: true,
            field_type,
            doc: None,
        }
    }

    /// Construct an optional field.
    pub fn optional(id: i32, name: impl ToString, field_type: PrimitiveType) -> Self {
        Self {
            id,
            name: name.to_string(),
            required: false,
            field_type,
            doc: None,
        }
    }

    /// Set the field's doc.
    pub fn with_doc(mut self, doc: impl ToString) -> Self {
        self.doc = Some(doc.to_string());
        self
    }
}

/// Ordered fields of a struct, such as a partition tuple.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct StructType {
    fields: Vec<NestedFieldRef>,
}

impl StructType {
    /// Creates a struct type with the given fields.
    pub fn new(fields: Vec<NestedFieldRef>) -> Self {
        Self { fields }
    }

    /// Get struct fields.
    pub fn fields(&self) -> &[NestedFieldRef] {
        &self.fields
    }
}
