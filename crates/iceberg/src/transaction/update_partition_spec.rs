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

//! Partition spec evolution.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::spec::{PartitionField, PartitionSpec, Transform, UnboundPartitionSpec};
use crate::table::Table;
use crate::transaction::action::{ActionCommit, TransactionAction};
use crate::{Error, ErrorKind, Result, TableRequirement, TableUpdate};

#[derive(Debug, Clone)]
enum PartitionChange {
    Add {
        source_name: String,
        name: String,
        transform: Transform,
    },
    Remove {
        name: String,
    },
    Rename {
        name: String,
        new_name: String,
    },
}

/// Transaction action that evolves the default partition spec of a table.
///
/// The new spec keeps every field of the current default spec at its position:
/// - removed fields stay in place with a [`Transform::Void`] transform, so partition tuples of
///   manifests written under older specs keep their layout,
/// - renamed fields keep their field id,
/// - added fields are appended and take their field id from the table's partition field
///   counter.
///
/// The resulting spec becomes the default spec. If an equivalent spec already exists, that spec
/// is reused.
#[derive(Debug, Default)]
pub struct UpdatePartitionSpecAction {
    changes: Vec<PartitionChange>,
}

impl UpdatePartitionSpecAction {
    /// Creates an action without changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a partition field computed from the column `source_name`.
    pub fn add_field(
        mut self,
        source_name: impl ToString,
        name: impl ToString,
        transform: Transform,
    ) -> Self {
        self.changes.push(PartitionChange::Add {
            source_name: source_name.to_string(),
            name: name.to_string(),
            transform,
        });
        self
    }

    /// Adds an identity partition field named after the column.
    pub fn add_identity(self, source_name: impl ToString) -> Self {
        let source_name = source_name.to_string();
        self.add_field(source_name.clone(), source_name, Transform::Identity)
    }

    /// Removes a partition field, turning it into a void field.
    pub fn remove_field(mut self, name: impl ToString) -> Self {
        self.changes.push(PartitionChange::Remove {
            name: name.to_string(),
        });
        self
    }

    /// Renames a partition field.
    pub fn rename_field(mut self, name: impl ToString, new_name: impl ToString) -> Self {
        self.changes.push(PartitionChange::Rename {
            name: name.to_string(),
            new_name: new_name.to_string(),
        });
        self
    }

    /// Computes the evolved spec for `table` without committing it.
    ///
    /// The returned spec carries the next free spec id of the table.
    pub fn new_spec(&self, table: &Table) -> Result<PartitionSpec> {
        let metadata = table.metadata();
        let next_spec_id = metadata
            .partition_specs_iter()
            .map(|spec| spec.spec_id())
            .max()
            .unwrap_or_default()
            + 1;
        self.unbound_spec(table)?
            .with_spec_id(next_spec_id)
            .bind(metadata.current_schema(), metadata.last_partition_id())
    }

    fn unbound_spec(&self, table: &Table) -> Result<UnboundPartitionSpec> {
        let metadata = table.metadata();
        let schema = metadata.current_schema();
        let mut fields: Vec<PartitionField> = metadata.default_partition_spec().fields().to_vec();
        let mut added: HashSet<i32> = HashSet::new();
        let mut removed: HashSet<i32> = HashSet::new();
        let mut renamed: HashSet<i32> = HashSet::new();
        let mut last_assigned_partition_id = metadata.last_partition_id();

        for change in &self.changes {
            match change {
                PartitionChange::Add {
                    source_name,
                    name,
                    transform,
                } => {
                    let source = schema.field_by_name(source_name).ok_or_else(|| {
                        Error::new(
                            ErrorKind::DataInvalid,
                            format!("Cannot find source column with name: {source_name} in schema"),
                        )
                    })?;
                    transform.result_type(&source.field_type)?;

                    if let Some(existing) = fields.iter().find(|f| {
                        !f.transform.is_void()
                            && f.source_ids() == [source.id]
                            && f.transform.dedup_name() == transform.dedup_name()
                    }) {
                        return Err(Error::new(
                            ErrorKind::DataInvalid,
                            format!(
                                "Duplicate partition field for {source_name}, {} already exists",
                                existing.name
                            ),
                        ));
                    }

                    // A void field with the same name gives way to the new field.
                    if let Some(existing) = fields.iter_mut().find(|f| &f.name == name) {
                        if !existing.transform.is_void() {
                            return Err(Error::new(
                                ErrorKind::DataInvalid,
                                format!("Cannot add duplicate partition field name: {name}"),
                            ));
                        }
                        existing.name = format!("{}_{}", existing.name, existing.field_id);
                    }

                    last_assigned_partition_id += 1;
                    let field_id = last_assigned_partition_id;

                    added.insert(field_id);
                    fields.push(PartitionField::new(source.id, field_id, name, *transform));
                }
                PartitionChange::Remove { name } => {
                    let field = Self::find_field(&mut fields, name)?;
                    if added.contains(&field.field_id) {
                        return Err(Error::new(
                            ErrorKind::DataInvalid,
                            format!("Cannot delete newly added field {name}"),
                        ));
                    }
                    if renamed.contains(&field.field_id) {
                        return Err(Error::new(
                            ErrorKind::DataInvalid,
                            format!("Cannot rename and delete field {name}"),
                        ));
                    }
                    field.transform = Transform::Void;
                    removed.insert(field.field_id);
                }
                PartitionChange::Rename { name, new_name } => {
                    if let Some(existing) = fields.iter_mut().find(|f| &f.name == new_name) {
                        if !existing.transform.is_void() {
                            return Err(Error::new(
                                ErrorKind::DataInvalid,
                                format!("Cannot rename {name} to existing field {new_name}"),
                            ));
                        }
                        existing.name = format!("{}_{}", existing.name, existing.field_id);
                    }

                    let field = Self::find_field(&mut fields, name)?;
                    if added.contains(&field.field_id) {
                        return Err(Error::new(
                            ErrorKind::DataInvalid,
                            "Cannot rename recently added partitions",
                        ));
                    }
                    if removed.contains(&field.field_id) {
                        return Err(Error::new(
                            ErrorKind::DataInvalid,
                            format!("Cannot delete and rename partition field {name}"),
                        ));
                    }
                    field.name = new_name.clone();
                    renamed.insert(field.field_id);
                }
            }
        }

        Ok(fields
            .into_iter()
            .map(PartitionField::into_unbound)
            .fold(UnboundPartitionSpec::new(), |spec, field| {
                spec.add_unbound_field(field)
            }))
    }

    fn find_field<'a>(
        fields: &'a mut [PartitionField],
        name: &str,
    ) -> Result<&'a mut PartitionField> {
        fields.iter_mut().find(|f| f.name == name).ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Cannot find partition field {name}"),
            )
        })
    }
}

#[async_trait]
impl TransactionAction for UpdatePartitionSpecAction {
    async fn commit(self: Arc<Self>, table: &Table) -> Result<ActionCommit> {
        let spec = self.unbound_spec(table)?;
        let metadata = table.metadata();

        let updates = vec![TableUpdate::AddSpec { spec }, TableUpdate::SetDefaultSpec {
            spec_id: -1,
        }];
        let requirements = vec![
            TableRequirement::LastAssignedPartitionIdMatch {
                last_assigned_partition_id: metadata.last_partition_id(),
            },
            TableRequirement::DefaultSpecIdMatch {
                default_spec_id: metadata.default_partition_spec_id(),
            },
        ];

        Ok(ActionCommit::new(updates, requirements))
    }
}
