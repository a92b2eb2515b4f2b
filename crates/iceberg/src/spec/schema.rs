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

//! This module defines schema in iceberg.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::datatypes::{NestedField, NestedFieldRef};
use crate::error::Result;
use crate::{Error, ErrorKind};

/// Type alias for schema id.
pub type SchemaId = i32;
/// Reference to [`Schema`].
pub type SchemaRef = Arc<Schema>;
/// Default schema id.
pub const DEFAULT_SCHEMA_ID: SchemaId = 0;

/// Defines schema in iceberg.
#[derive(Debug, Clone)]
pub struct Schema {
    schema_id: SchemaId,
    fields: Vec<NestedFieldRef>,
    highest_field_id: i32,

    id_to_field: HashMap<i32, NestedFieldRef>,
    name_to_id: HashMap<String, i32>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.schema_id == other.schema_id && self.fields == other.fields
    }
}

impl Eq for Schema {}

/// Schema builder.
#[derive(Debug)]
pub struct SchemaBuilder {
    schema_id: i32,
    fields: Vec<NestedFieldRef>,
}

impl SchemaBuilder {
    /// Add fields to schema builder.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = NestedFieldRef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Set schema id.
    pub fn with_schema_id(mut self, schema_id: i32) -> Self {
        self.schema_id = schema_id;
        self
    }

    /// Builds the schema.
    pub fn build(self) -> Result<Schema> {
        let mut id_to_field = HashMap::with_capacity(self.fields.len());
        let mut name_to_id = HashMap::with_capacity(self.fields.len());

        for field in &self.fields {
            if id_to_field.insert(field.id, field.clone()).is_some() {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!("Invalid schema: multiple fields for id {}", field.id),
                ));
            }
            if name_to_id.insert(field.name.clone(), field.id).is_some() {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!("Invalid schema: multiple fields for name {}", field.name),
                ));
            }
        }

        let highest_field_id = id_to_field.keys().cloned().max().unwrap_or(0);

        Ok(Schema {
            schema_id: self.schema_id,
            fields: self.fields,
            highest_field_id,
            id_to_field,
            name_to_id,
        })
    }
}

impl Schema {
    /// Create a schema builder.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            schema_id: DEFAULT_SCHEMA_ID,
            fields: vec![],
        }
    }

    /// Get field by field id.
    pub fn field_by_id(&self, field_id: i32) -> Option<&NestedFieldRef> {
        self.id_to_field.get(&field_id)
    }

    /// Get field by field name.
    pub fn field_by_name(&self, field_name: &str) -> Option<&NestedFieldRef> {
        self.name_to_id
            .get(field_name)
            .and_then(|id| self.field_by_id(*id))
    }

    /// Returns [`highest_field_id`].
    #[inline]
    pub fn highest_field_id(&self) -> i32 {
        self.highest_field_id
    }

    /// Returns [`schema_id`].
    #[inline]
    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    /// Returns the top level fields.
    #[inline]
    pub fn fields(&self) -> &[NestedFieldRef] {
        &self.fields
    }
}

#[derive(Serialize, serde_derive::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SchemaSerde {
    schema_id: SchemaId,
    fields: Vec<NestedField>,
}

impl Serialize for Schema {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where S: Serializer {
        SchemaSerde {
            schema_id: self.schema_id,
            fields: self.fields.iter().map(|f| f.as_ref().clone()).collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where D: Deserializer<'de> {
        let serde = SchemaSerde::deserialize(deserializer)?;
        Schema::builder()
            .with_schema_id(serde.schema_id)
            .with_fields(serde.fields.into_iter().map(Arc::new))
            .build()
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::spec::PrimitiveType;

    fn table_schema_simple() -> Schema {
        Schema::builder()
            .with_schema_id(1)
            .with_fields(vec![
                NestedField::optional(1, "foo", PrimitiveType::String).into(),
                NestedField::required(2, "bar", PrimitiveType::Int).into(),
                NestedField::optional(3, "baz", PrimitiveType::Boolean).into(),
            ])
            .build()
            .unwrap()
    }

    #[test]
    fn test_schema_lookup() {
        let schema = table_schema_simple();
        assert_eq!(schema.highest_field_id(), 3);
        assert_eq!(schema.field_by_name("bar").unwrap().id, 2);
        assert_eq!(schema.field_by_id(3).unwrap().name, "baz");
        assert!(schema.field_by_id(4).is_none());
    }

    #[test]
    fn test_schema_rejects_duplicate_ids() {
        let err = Schema::builder()
            .with_fields(vec![
                NestedField::optional(1, "foo", PrimitiveType::String).into(),
                NestedField::required(1, "bar", PrimitiveType::Int).into(),
            ])
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
    }

    #[test]
    fn test_schema_json() {
        let schema = table_schema_simple();
        let json = serde_json::to_string(&schema).unwrap();
        assert_eq!(serde_json::from_str::<Schema>(&json).unwrap(), schema);
    }
}
