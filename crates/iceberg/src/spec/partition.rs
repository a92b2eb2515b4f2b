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

/*!
 * Partitioning
*/
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use itertools::Itertools;
use serde_derive::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::transform::Transform;
use super::values::{PrimitiveLiteral, Struct};
use super::{NestedField, Schema, StructType};
use crate::error::Result;
use crate::{Error, ErrorKind};

/// The first partition field id assigned to a table.
pub(crate) const PARTITION_DATA_ID_START: i32 = 1000;
/// Last assigned partition field id of a table that was never partitioned.
pub const UNPARTITIONED_LAST_ASSIGNED_ID: i32 = PARTITION_DATA_ID_START - 1;
/// Spec id of the initial partition spec of a table.
pub const DEFAULT_PARTITION_SPEC_ID: i32 = 0;

/// Marks a partition field computed from more than one source column.
pub const MULTI_SOURCE_ID: i32 = -1;

/// Reference to [`PartitionSpec`].
pub type PartitionSpecRef = Arc<PartitionSpec>;

use _serde::PartitionFieldSerde;

/// Partition fields capture the transform from table data to partition values.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Serialize, Deserialize)]
#[serde(try_from = "PartitionFieldSerde", into = "PartitionFieldSerde")]
pub struct PartitionField {
    source_id: i32,
    source_ids: Vec<i32>,
    /// A partition field id that is used to identify a partition field. It is unique across all
    /// partition specs of a table and never reused.
    pub field_id: i32,
    /// A partition name.
    pub name: String,
    /// A transform that is applied to the source column to produce a partition value.
    pub transform: Transform,
}

impl PartitionField {
    /// Creates a field derived from a single source column.
    pub fn new(source_id: i32, field_id: i32, name: impl ToString, transform: Transform) -> Self {
        Self {
            source_id,
            source_ids: vec![source_id],
            field_id,
            name: name.to_string(),
            transform,
        }
    }

    /// Creates a field derived from one or more source columns.
    ///
    /// With more than one source the single [`source_id`](Self::source_id) is
    /// [`MULTI_SOURCE_ID`].
    pub fn try_new(
        source_ids: Vec<i32>,
        field_id: i32,
        name: impl ToString,
        transform: Transform,
    ) -> Result<Self> {
        let source_id = match source_ids.as_slice() {
            [] => {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "At least one source id should be provided",
                ));
            }
            [id] => *id,
            _ => MULTI_SOURCE_ID,
        };
        Ok(Self {
            source_id,
            source_ids,
            field_id,
            name: name.to_string(),
            transform,
        })
    }

    /// The source column id, or [`MULTI_SOURCE_ID`] when the field reads several columns.
    pub fn source_id(&self) -> i32 {
        self.source_id
    }

    /// All source column ids, in order.
    pub fn source_ids(&self) -> &[i32] {
        &self.source_ids
    }

    /// Whether this field is computed from more than one column.
    pub fn is_multi_source(&self) -> bool {
        self.source_ids.len() > 1
    }

    /// Turns this field into an unbound field that keeps its field id.
    pub fn into_unbound(self) -> UnboundPartitionField {
        UnboundPartitionField {
            source_ids: self.source_ids,
            field_id: Some(self.field_id),
            name: self.name,
            transform: self.transform,
        }
    }
}

impl Display for PartitionField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_multi_source() {
            write!(
                f,
                "{}: {}: {}([{}])",
                self.field_id,
                self.name,
                self.transform,
                self.source_ids.iter().join(", ")
            )
        } else {
            write!(
                f,
                "{}: {}: {}({})",
                self.field_id, self.name, self.transform, self.source_id
            )
        }
    }
}

///  Partition spec that defines how to produce a tuple of partition values from a record.
///
/// The order of fields is the layout of the partition tuple.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionSpec {
    spec_id: i32,
    fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// Create a new partition spec builder bound to the given schema.
    pub fn builder(schema: &Schema) -> PartitionSpecBuilder<'_> {
        PartitionSpecBuilder::new(schema)
    }

    /// The spec without any fields.
    pub fn unpartition_spec() -> Self {
        Self {
            spec_id: DEFAULT_PARTITION_SPEC_ID,
            fields: vec![],
        }
    }

    /// Change the spec id of the partition spec
    pub(crate) fn with_spec_id(self, spec_id: i32) -> Self {
        Self { spec_id, ..self }
    }

    /// Spec id of the partition spec
    pub fn spec_id(&self) -> i32 {
        self.spec_id
    }

    /// Fields of the partition spec
    pub fn fields(&self) -> &[PartitionField] {
        &self.fields
    }

    /// Returns the field with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<&PartitionField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns if the partition spec is unpartitioned.
    ///
    /// A [`PartitionSpec`] is unpartitioned if it has no fields or all fields are [`Transform::Void`] transform.
    pub fn is_unpartitioned(&self) -> bool {
        self.fields.iter().all(|f| f.transform.is_void())
    }

    /// Highest field id of this spec, or [`UNPARTITIONED_LAST_ASSIGNED_ID`] if it has no fields.
    pub fn highest_field_id(&self) -> i32 {
        self.fields
            .iter()
            .map(|f| f.field_id)
            .max()
            .unwrap_or(UNPARTITIONED_LAST_ASSIGNED_ID)
    }

    /// Returns the partition type of this partition spec.
    ///
    /// Multi-source fields take their result type from the first source column.
    pub fn partition_type(&self, schema: &Schema) -> Result<StructType> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for partition_field in &self.fields {
            let source_id = partition_field.source_ids[0];
            let field = schema.field_by_id(source_id).ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    format!("No column with source column id {source_id} in schema {schema:?}"),
                )
            })?;
            let res_type = partition_field.transform.result_type(&field.field_type)?;
            let field =
                NestedField::optional(partition_field.field_id, &partition_field.name, res_type)
                    .into();
            fields.push(field);
        }
        Ok(StructType::new(fields))
    }

    /// Computes the partition tuple of a row given its values by source column id.
    ///
    /// Missing values are treated as null.
    pub fn partition_for(&self, row: &HashMap<i32, PrimitiveLiteral>) -> Result<Struct> {
        self.fields
            .iter()
            .map(|field| {
                if field.is_multi_source() && !field.transform.is_void() {
                    return Err(Error::new(
                        ErrorKind::FeatureUnsupported,
                        format!("Computing values of multi-source field {field} is not supported"),
                    ));
                }
                field.transform.apply(row.get(&field.source_ids[0]))
            })
            .collect()
    }

    /// Turns this spec into an unbound spec that keeps its spec id and field ids.
    pub fn into_unbound(self) -> UnboundPartitionSpec {
        UnboundPartitionSpec {
            spec_id: Some(self.spec_id),
            fields: self
                .fields
                .into_iter()
                .map(PartitionField::into_unbound)
                .collect(),
        }
    }

    /// Whether two specs produce the same partition tuples, ignoring spec ids.
    pub fn is_compatible_with(&self, other: &PartitionSpec) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| {
                    a.source_ids == b.source_ids && a.transform == b.transform && a.name == b.name
                })
    }
}

/// Unbound partition field can be built without a schema and later bound to a schema.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "kebab-case")]
pub struct UnboundPartitionField {
    /// Source column ids from the table's schema
    pub source_ids: Vec<i32>,
    /// Partition field id, assigned from the table's counter when missing.
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<i32>,
    /// A partition name.
    #[builder(setter(into))]
    pub name: String,
    /// A transform that is applied to the source column to produce a partition value.
    pub transform: Transform,
}

/// Unbound partition spec can be built without a schema and later bound to a schema.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UnboundPartitionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) spec_id: Option<i32>,
    pub(crate) fields: Vec<UnboundPartitionField>,
}

impl UnboundPartitionSpec {
    /// Create an empty unbound partition spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the spec id.
    pub fn with_spec_id(mut self, spec_id: i32) -> Self {
        self.spec_id = Some(spec_id);
        self
    }

    /// Add a single-source field without a field id.
    pub fn add_partition_field(
        mut self,
        source_id: i32,
        name: impl ToString,
        transform: Transform,
    ) -> Self {
        self.fields.push(UnboundPartitionField {
            source_ids: vec![source_id],
            field_id: None,
            name: name.to_string(),
            transform,
        });
        self
    }

    /// Add a field.
    pub fn add_unbound_field(mut self, field: UnboundPartitionField) -> Self {
        self.fields.push(field);
        self
    }

    /// Spec id, if one was set.
    pub fn spec_id(&self) -> Option<i32> {
        self.spec_id
    }

    /// Fields of the spec.
    pub fn fields(&self) -> &[UnboundPartitionField] {
        &self.fields
    }

    /// Bind this spec to a schema, assigning missing field ids after `last_assigned_field_id`.
    pub fn bind(self, schema: &Schema, last_assigned_field_id: i32) -> Result<PartitionSpec> {
        let mut builder = PartitionSpecBuilder::new(schema)
            .with_last_assigned_field_id(last_assigned_field_id);
        if let Some(spec_id) = self.spec_id {
            builder = builder.with_spec_id(spec_id);
        }
        builder.add_unbound_fields(self.fields)?.build()
    }
}

/// Create a new [`PartitionSpec`] checked against a schema.
#[derive(Debug)]
pub struct PartitionSpecBuilder<'a> {
    spec_id: i32,
    last_assigned_field_id: i32,
    fields: Vec<PartitionField>,
    schema: &'a Schema,
}

impl<'a> PartitionSpecBuilder<'a> {
    /// Create a new partition spec builder with the given schema.
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            spec_id: DEFAULT_PARTITION_SPEC_ID,
            last_assigned_field_id: UNPARTITIONED_LAST_ASSIGNED_ID,
            fields: vec![],
            schema,
        }
    }

    /// Set the spec id for the partition spec.
    pub fn with_spec_id(mut self, spec_id: i32) -> Self {
        self.spec_id = spec_id;
        self
    }

    /// Continue assigning field ids after the table's last assigned partition field id.
    pub fn with_last_assigned_field_id(mut self, last_assigned_field_id: i32) -> Self {
        self.last_assigned_field_id = last_assigned_field_id;
        self
    }

    /// Add a new partition field to the partition spec from a source column name.
    pub fn add_partition_field(
        self,
        source_name: impl AsRef<str>,
        target_name: impl Into<String>,
        transform: Transform,
    ) -> Result<Self> {
        self.add_multi_source_field(&[source_name.as_ref()], target_name, transform)
    }

    /// Add a new partition field computed from several source columns.
    pub fn add_multi_source_field(
        self,
        source_names: &[&str],
        target_name: impl Into<String>,
        transform: Transform,
    ) -> Result<Self> {
        let source_ids = source_names
            .iter()
            .map(|name| {
                self.schema
                    .field_by_name(name)
                    .map(|f| f.id)
                    .ok_or_else(|| {
                        Error::new(
                            ErrorKind::DataInvalid,
                            format!("Cannot find source column with name: {name} in schema"),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.add_unbound_field(UnboundPartitionField {
            source_ids,
            field_id: None,
            name: target_name.into(),
            transform,
        })
    }

    /// Add a new partition field, assigning a field id if it has none.
    pub fn add_unbound_field(mut self, field: UnboundPartitionField) -> Result<Self> {
        let field_id = match field.field_id {
            Some(id) => id,
            None => {
                self.last_assigned_field_id += 1;
                self.last_assigned_field_id
            }
        };
        let field = PartitionField::try_new(field.source_ids, field_id, field.name, field.transform)?;
        self.check_field(&field)?;
        self.last_assigned_field_id = self.last_assigned_field_id.max(field_id);
        self.fields.push(field);
        Ok(self)
    }

    /// Add multiple partition fields.
    pub fn add_unbound_fields(
        self,
        fields: impl IntoIterator<Item = UnboundPartitionField>,
    ) -> Result<Self> {
        fields
            .into_iter()
            .try_fold(self, |builder, field| builder.add_unbound_field(field))
    }

    /// Build the partition spec.
    pub fn build(self) -> Result<PartitionSpec> {
        Ok(PartitionSpec {
            spec_id: self.spec_id,
            fields: self.fields,
        })
    }

    fn check_field(&self, field: &PartitionField) -> Result<()> {
        if field.name.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Cannot use empty partition name",
            ));
        }
        if self.fields.iter().any(|f| f.name == field.name) {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Cannot use partition name more than once: {}", field.name),
            ));
        }
        if self.fields.iter().any(|f| f.field_id == field.field_id) {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Cannot use field id more than once: {}", field.field_id),
            ));
        }
        field
            .transform
            .validate()
            .map_err(|e| e.with_context("partition_field", field.name.clone()))?;

        for source_id in field.source_ids() {
            let source = self.schema.field_by_id(*source_id).ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    format!("Cannot find source column with id: {source_id} in schema"),
                )
            })?;
            field.transform.result_type(&source.field_type)?;
        }

        // A partition name may only shadow a schema column when it is the identity of that column.
        if let Some(column) = self.schema.field_by_name(&field.name) {
            let identity_of_column =
                field.transform == Transform::Identity && field.source_ids() == [column.id];
            if !identity_of_column && !field.transform.is_void() {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!(
                        "Cannot create partition with a name that exists in schema: {}",
                        field.name
                    ),
                ));
            }
        }

        if !field.transform.is_void() {
            let dedup_name = field.transform.dedup_name();
            let redundant = self.fields.iter().find(|f| {
                !f.transform.is_void()
                    && f.source_ids == field.source_ids
                    && f.transform.dedup_name() == dedup_name
            });
            if let Some(existing) = redundant {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!("Cannot add redundant partition: {existing} conflicts with {field}"),
                ));
            }
        }

        Ok(())
    }
}

mod _serde {
    use serde_derive::{Deserialize, Serialize};

    use super::PartitionField;
    use crate::spec::Transform;
    use crate::{Error, ErrorKind};

    /// Single-source fields are written with `source-id`, multi-source fields with `source-ids`.
    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub(super) struct PartitionFieldSerde {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_ids: Option<Vec<i32>>,
        field_id: i32,
        name: String,
        transform: Transform,
    }

    impl TryFrom<PartitionFieldSerde> for PartitionField {
        type Error = Error;

        fn try_from(value: PartitionFieldSerde) -> Result<Self, Self::Error> {
            let source_ids = match (value.source_ids, value.source_id) {
                (Some(ids), _) => ids,
                (None, Some(id)) => vec![id],
                (None, None) => {
                    return Err(Error::new(
                        ErrorKind::DataInvalid,
                        "Partition field requires source-id or source-ids",
                    ));
                }
            };
            PartitionField::try_new(source_ids, value.field_id, value.name, value.transform)
        }
    }

    impl From<PartitionField> for PartitionFieldSerde {
        fn from(value: PartitionField) -> Self {
            let (source_id, source_ids) = if value.is_multi_source() {
                (None, Some(value.source_ids))
            } else {
                (Some(value.source_id), None)
            };
            Self {
                source_id,
                source_ids,
                field_id: value.field_id,
                name: value.name,
                transform: value.transform,
            }
        }
    }
}
