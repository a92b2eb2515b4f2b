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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use super::{
    DEFAULT_PARTITION_SPEC_ID, FormatVersion, INITIAL_SEQUENCE_NUMBER, ONE_MINUTE_MS,
    PartitionSpec, Schema, Snapshot, SnapshotLog, StructType, TableMetadata, TableProperties,
    UNPARTITIONED_LAST_ASSIGNED_ID, UnboundPartitionSpec,
};
use crate::error::{Error, ErrorKind, Result};
use crate::TableUpdate;

/// Refers to the partition spec added last in the same builder.
pub const LAST_ADDED: i32 = -1;

/// Manipulating table metadata.
///
/// For this builder the order of called functions matters. Functions are applied in-order.
/// All operations applied to the `TableMetadata` are tracked in `changes` as a chronologically
/// ordered vec of `TableUpdate`.
/// If an operation does not lead to a change of the `TableMetadata`, the corresponding update
/// is omitted from `changes`.
#[derive(Debug, Clone)]
pub struct TableMetadataBuilder {
    metadata: TableMetadata,
    changes: Vec<TableUpdate>,
    last_added_spec_id: Option<i32>,
    added_snapshot_ids: HashSet<i64>,
}

/// Result of modifying or creating a `TableMetadata`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadataBuildResult {
    /// The new `TableMetadata`.
    pub metadata: TableMetadata,
    /// The changes that were applied to the metadata.
    pub changes: Vec<TableUpdate>,
}

impl TableMetadataBuilder {
    /// Create a `TableMetadata` object from scratch.
    ///
    /// The schema is kept with its own ids. Partition field ids missing from `spec` are assigned
    /// starting at 1000 and the spec gets id 0.
    pub fn new(
        schema: Schema,
        spec: UnboundPartitionSpec,
        location: impl Into<String>,
        format_version: FormatVersion,
        properties: HashMap<String, String>,
    ) -> Result<Self> {
        let last_column_id = schema.highest_field_id();
        let current_schema_id = schema.schema_id();
        let builder = Self {
            metadata: TableMetadata {
                format_version,
                table_uuid: Uuid::new_v4(),
                location: location.into(),
                last_sequence_number: INITIAL_SEQUENCE_NUMBER,
                last_updated_ms: 0,
                last_column_id,
                schemas: HashMap::from([(current_schema_id, Arc::new(schema))]),
                current_schema_id,
                partition_specs: HashMap::new(),
                default_spec: Arc::new(PartitionSpec::unpartition_spec()),
                default_partition_type: StructType::default(),
                last_partition_id: UNPARTITIONED_LAST_ASSIGNED_ID,
                properties: HashMap::new(),
                current_snapshot_id: None,
                snapshots: HashMap::new(),
                snapshot_log: vec![],
            },
            changes: vec![],
            last_added_spec_id: None,
            added_snapshot_ids: HashSet::new(),
        };

        builder
            .add_default_partition_spec(spec.with_spec_id(DEFAULT_PARTITION_SPEC_ID))?
            .set_properties(properties)
    }

    /// Creates a new table metadata builder from the given metadata to modify it.
    #[must_use]
    pub fn new_from_metadata(previous: TableMetadata) -> Self {
        Self {
            metadata: previous,
            changes: Vec::default(),
            last_added_spec_id: None,
            added_snapshot_ids: HashSet::new(),
        }
    }

    /// Changes recorded so far.
    pub fn changes(&self) -> &[TableUpdate] {
        &self.changes
    }

    /// Set properties. If a property already exists, it will be overwritten.
    ///
    /// # Errors
    /// - The resulting properties contain a value that can't be parsed into [`TableProperties`].
    pub fn set_properties(mut self, properties: HashMap<String, String>) -> Result<Self> {
        if properties.is_empty() {
            return Ok(self);
        }

        let mut merged = self.metadata.properties.clone();
        merged.extend(properties.clone());
        TableProperties::try_from(&merged)?;

        self.metadata.properties = merged;
        self.changes.push(TableUpdate::SetProperties {
            updates: properties,
        });
        Ok(self)
    }

    /// Remove properties from the table metadata.
    /// Does nothing if the key is not present.
    pub fn remove_properties(mut self, properties: &[String]) -> Self {
        let removals: Vec<String> = properties
            .iter()
            .filter(|key| self.metadata.properties.remove(key.as_str()).is_some())
            .cloned()
            .collect();

        if !removals.is_empty() {
            self.changes.push(TableUpdate::RemoveProperties { removals });
        }
        self
    }

    /// Add a snapshot to the table metadata.
    ///
    /// The snapshot does not become current, use [`Self::set_current_snapshot`] for that.
    ///
    /// # Errors
    /// - Snapshot id already exists.
    /// - For format version > 1: the sequence number of the snapshot is not higher than the
    ///   highest sequence number of the table.
    /// - The parent of the snapshot is not part of the table.
    /// - The snapshot is more than a minute older than the last snapshot log entry or the
    ///   last update of the table.
    pub fn add_snapshot(mut self, snapshot: Snapshot) -> Result<Self> {
        if self
            .metadata
            .snapshots
            .contains_key(&snapshot.snapshot_id())
        {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Snapshot already exists for: '{}'", snapshot.snapshot_id()),
            ));
        }

        if self.metadata.format_version != FormatVersion::V1
            && snapshot.sequence_number() <= self.metadata.last_sequence_number
        {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Cannot add snapshot with sequence number {} older than last sequence number {}",
                    snapshot.sequence_number(),
                    self.metadata.last_sequence_number
                ),
            ));
        }

        if let Some(parent_id) = snapshot.parent_snapshot_id() {
            if !self.metadata.snapshots.contains_key(&parent_id) {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!(
                        "Cannot add snapshot {} with unknown parent snapshot {parent_id}",
                        snapshot.snapshot_id()
                    ),
                ));
            }
        }

        if let Some(last) = self.metadata.snapshot_log.last() {
            // commits can happen concurrently from different machines.
            // A tolerance helps us avoid failure for small clock skew
            if snapshot.timestamp_ms() - last.timestamp_ms < -ONE_MINUTE_MS {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    format!(
                        "Invalid snapshot timestamp {}: before last snapshot timestamp {}",
                        snapshot.timestamp_ms(),
                        last.timestamp_ms
                    ),
                ));
            }
        }

        if snapshot.timestamp_ms() - self.metadata.last_updated_ms < -ONE_MINUTE_MS {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Invalid snapshot timestamp {}: before last updated timestamp {}",
                    snapshot.timestamp_ms(),
                    self.metadata.last_updated_ms
                ),
            ));
        }

        // Mutation happens in next line - must be infallible from here
        self.changes.push(TableUpdate::AddSnapshot {
            snapshot: snapshot.clone(),
        });

        self.metadata.last_updated_ms = snapshot.timestamp_ms();
        if self.metadata.format_version != FormatVersion::V1 {
            self.metadata.last_sequence_number = snapshot.sequence_number();
        }
        self.added_snapshot_ids.insert(snapshot.snapshot_id());
        self.metadata
            .snapshots
            .insert(snapshot.snapshot_id(), snapshot.into());

        Ok(self)
    }

    /// Make an existing snapshot the current snapshot of the table and record it in the
    /// snapshot log.
    ///
    /// # Errors
    /// - The snapshot is not part of the table.
    pub fn set_current_snapshot(mut self, snapshot_id: i64) -> Result<Self> {
        if self.metadata.current_snapshot_id == Some(snapshot_id) {
            return Ok(self);
        }

        let snapshot = self
            .metadata
            .snapshots
            .get(&snapshot_id)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    format!("Cannot set current snapshot to unknown snapshot id: '{snapshot_id}'"),
                )
            })?
            .clone();

        let timestamp_ms = if self.added_snapshot_ids.contains(&snapshot_id) {
            snapshot.timestamp_ms()
        } else {
            chrono::Utc::now().timestamp_millis()
        };

        self.metadata.current_snapshot_id = Some(snapshot_id);
        self.metadata.last_updated_ms = self.metadata.last_updated_ms.max(timestamp_ms);
        self.metadata.snapshot_log.push(SnapshotLog {
            snapshot_id,
            timestamp_ms,
        });
        self.changes
            .push(TableUpdate::SetCurrentSnapshot { snapshot_id });

        Ok(self)
    }

    /// Add a partition spec to the table metadata.
    ///
    /// The spec is bound eagerly to the current schema. Fields without a field id get the next
    /// ids after the table's last assigned partition id. If a compatible spec already exists,
    /// its id is reused and no new spec is added.
    ///
    /// # Errors
    /// - The partition spec cannot be bound to the current schema.
    pub fn add_partition_spec(mut self, unbound_spec: UnboundPartitionSpec) -> Result<Self> {
        let schema = self.metadata.current_schema().clone();
        let spec = unbound_spec
            .clone()
            .bind(&schema, self.metadata.last_partition_id)?;

        let new_spec_id = self.reuse_or_create_new_spec_id(&spec);
        if let Some(existing) = self.metadata.partition_specs.get(&new_spec_id) {
            if self.last_added_spec_id != Some(new_spec_id) {
                let unbound_spec = existing.as_ref().clone().into_unbound();
                self.changes
                    .push(TableUpdate::AddSpec { spec: unbound_spec });
                self.last_added_spec_id = Some(new_spec_id);
            }

            return Ok(self);
        }

        let spec = spec.with_spec_id(new_spec_id);
        let unbound_spec = spec.clone().into_unbound();
        let highest_field_id = spec.highest_field_id();
        self.metadata
            .partition_specs
            .insert(new_spec_id, Arc::new(spec));
        self.changes
            .push(TableUpdate::AddSpec { spec: unbound_spec });

        self.last_added_spec_id = Some(new_spec_id);
        self.metadata.last_partition_id =
            std::cmp::max(self.metadata.last_partition_id, highest_field_id);

        Ok(self)
    }

    /// Set the default partition spec.
    ///
    /// # Errors
    /// - spec_id is -1 but no spec has been added via this builder.
    /// - No partition spec with the given id exists.
    pub fn set_default_partition_spec(mut self, mut spec_id: i32) -> Result<Self> {
        if spec_id == LAST_ADDED {
            spec_id = self.last_added_spec_id.ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    "Cannot set default partition spec to last added spec: no spec has been added.",
                )
            })?;
        }

        if self
            .metadata
            .partition_specs
            .get(&spec_id)
            .is_some_and(|spec| spec == &self.metadata.default_spec)
        {
            return Ok(self);
        }

        let schemaless_spec = self
            .metadata
            .partition_specs
            .get(&spec_id)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    format!("Cannot set default partition spec to unknown spec with id: '{spec_id}'",),
                )
            })?
            .clone();
        self.metadata.default_partition_type =
            schemaless_spec.partition_type(self.metadata.current_schema())?;
        self.metadata.default_spec = schemaless_spec;

        if self.last_added_spec_id == Some(spec_id) {
            self.changes.push(TableUpdate::SetDefaultSpec {
                spec_id: LAST_ADDED,
            });
        } else {
            self.changes.push(TableUpdate::SetDefaultSpec { spec_id });
        }

        Ok(self)
    }

    /// Add a partition spec and set it as default
    pub fn add_default_partition_spec(self, unbound_spec: UnboundPartitionSpec) -> Result<Self> {
        self.add_partition_spec(unbound_spec)?
            .set_default_partition_spec(LAST_ADDED)
    }

    /// Build the table metadata.
    ///
    /// # Errors
    /// - The resulting metadata fails validation.
    pub fn build(mut self) -> Result<TableMetadataBuildResult> {
        if self.metadata.last_updated_ms == 0 {
            self.metadata.last_updated_ms = chrono::Utc::now().timestamp_millis();
        }

        self.metadata.try_normalize()?;

        Ok(TableMetadataBuildResult {
            metadata: self.metadata,
            changes: self.changes,
        })
    }

    /// If a compatible spec already exists, use the same ID. Otherwise, use 1 more than the highest ID.
    fn reuse_or_create_new_spec_id(&self, new_spec: &PartitionSpec) -> i32 {
        self.metadata
            .partition_specs
            .iter()
            .find_map(|(id, old_spec)| new_spec.is_compatible_with(old_spec).then_some(*id))
            .unwrap_or_else(|| {
                self.get_highest_spec_id()
                    .map(|id| id + 1)
                    .unwrap_or(DEFAULT_PARTITION_SPEC_ID)
            })
    }

    fn get_highest_spec_id(&self) -> Option<i32> {
        self.metadata.partition_specs.keys().max().copied()
    }
}

impl From<TableMetadataBuildResult> for TableMetadata {
    fn from(result: TableMetadataBuildResult) -> Self {
        result.metadata
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::spec::{
        NestedField, Operation, PrimitiveType, Summary, Transform, UnboundPartitionField,
    };

    const TEST_LOCATION: &str = "memory:/warehouse/db/t";

    fn schema() -> Schema {
        Schema::builder()
            .with_fields(vec![
                NestedField::required(1, "id", PrimitiveType::Long).into(),
                NestedField::optional(2, "data", PrimitiveType::String).into(),
                NestedField::optional(3, "ts", PrimitiveType::Timestamp).into(),
            ])
            .build()
            .unwrap()
    }

    fn partition_spec() -> UnboundPartitionSpec {
        UnboundPartitionSpec::new().add_partition_field(1, "id_bucket", Transform::Bucket(16))
    }

    fn builder_without_changes(format_version: FormatVersion) -> TableMetadataBuilder {
        TableMetadataBuilder::new(
            schema(),
            partition_spec(),
            TEST_LOCATION,
            format_version,
            HashMap::new(),
        )
        .unwrap()
        .build()
        .unwrap()
        .metadata
        .into_builder()
    }

    fn snapshot(snapshot_id: i64, parent: Option<i64>, sequence_number: i64) -> Snapshot {
        Snapshot::builder()
            .with_snapshot_id(snapshot_id)
            .with_parent_snapshot_id(parent)
            .with_sequence_number(sequence_number)
            .with_timestamp_ms(chrono::Utc::now().timestamp_millis())
            .with_manifest_list(format!("{TEST_LOCATION}/metadata/snap-{snapshot_id}.json"))
            .with_summary(Summary::new(Operation::Append))
            .build()
    }

    #[test]
    fn test_minimal_build() {
        let metadata = TableMetadataBuilder::new(
            schema(),
            partition_spec(),
            TEST_LOCATION,
            FormatVersion::V2,
            HashMap::new(),
        )
        .unwrap()
        .build()
        .unwrap()
        .metadata;

        assert_eq!(metadata.format_version(), FormatVersion::V2);
        assert_eq!(metadata.location(), TEST_LOCATION);
        assert_eq!(metadata.last_column_id(), 3);
        assert_eq!(metadata.last_sequence_number(), 0);
        assert_eq!(metadata.default_partition_spec_id(), 0);
        assert_eq!(metadata.last_partition_id(), 1000);
        assert_eq!(metadata.default_partition_spec().fields()[0].field_id, 1000);
        assert_eq!(metadata.default_partition_type().fields().len(), 1);
        assert!(metadata.current_snapshot().is_none());
        assert!(metadata.last_updated_ms() > 0);
    }

    #[test]
    fn test_add_partition_spec_assigns_new_ids() {
        let build_result = builder_without_changes(FormatVersion::V2)
            .add_partition_spec(
                partition_spec().add_partition_field(3, "ts_day", Transform::Day),
            )
            .unwrap()
            .build()
            .unwrap();

        let spec = build_result.metadata.partition_spec_by_id(1).unwrap();
        assert_eq!(build_result.metadata.last_partition_id(), 1002);
        assert_eq!(
            spec.fields().iter().map(|f| f.field_id).collect::<Vec<_>>(),
            vec![1001, 1002]
        );
        // The default spec is unchanged.
        assert_eq!(build_result.metadata.default_partition_spec_id(), 0);
        assert_eq!(build_result.changes.len(), 1);
    }

    #[test]
    fn test_add_partition_spec_keeps_existing_field_ids() {
        let spec = UnboundPartitionSpec::new()
            .add_unbound_field(
                UnboundPartitionField::builder()
                    .source_ids(vec![1])
                    .field_id(1000)
                    .name("id_bucket")
                    .transform(Transform::Bucket(16))
                    .build(),
            )
            .add_partition_field(3, "ts_day", Transform::Day);

        let metadata = builder_without_changes(FormatVersion::V2)
            .add_default_partition_spec(spec)
            .unwrap()
            .build()
            .unwrap()
            .metadata;

        assert_eq!(metadata.default_partition_spec_id(), 1);
        assert_eq!(
            metadata
                .default_partition_spec()
                .fields()
                .iter()
                .map(|f| f.field_id)
                .collect::<Vec<_>>(),
            vec![1000, 1001]
        );
        assert_eq!(metadata.last_partition_id(), 1001);
    }

    #[test]
    fn test_add_compatible_partition_spec_reuses_id() {
        let build_result = builder_without_changes(FormatVersion::V2)
            .add_partition_spec(partition_spec())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(build_result.metadata.partition_specs_iter().len(), 1);
        assert_eq!(build_result.metadata.last_partition_id(), 1000);
    }

    #[test]
    fn test_set_default_partition_spec_last_added() {
        let builder = builder_without_changes(FormatVersion::V2);
        let err = builder
            .clone()
            .set_default_partition_spec(LAST_ADDED)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);

        let err = builder.clone().set_default_partition_spec(5).unwrap_err();
        assert!(err.message().contains("unknown spec with id: '5'"));

        let build_result = builder
            .add_partition_spec(UnboundPartitionSpec::new())
            .unwrap()
            .set_default_partition_spec(LAST_ADDED)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(build_result.metadata.default_partition_spec_id(), 1);
        assert!(build_result.metadata.default_partition_type().fields().is_empty());
        assert_eq!(build_result.changes[1], TableUpdate::SetDefaultSpec {
            spec_id: LAST_ADDED
        });
    }

    #[test]
    fn test_add_and_set_current_snapshot() {
        let metadata = builder_without_changes(FormatVersion::V2)
            .add_snapshot(snapshot(1, None, 1))
            .unwrap()
            .set_current_snapshot(1)
            .unwrap()
            .add_snapshot(snapshot(2, Some(1), 2))
            .unwrap()
            .set_current_snapshot(2)
            .unwrap()
            .build()
            .unwrap()
            .metadata;

        assert_eq!(metadata.current_snapshot_id(), Some(2));
        assert_eq!(metadata.last_sequence_number(), 2);
        assert_eq!(
            metadata
                .history()
                .iter()
                .map(|log| log.snapshot_id)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_add_snapshot_errors() {
        let builder = builder_without_changes(FormatVersion::V2)
            .add_snapshot(snapshot(1, None, 1))
            .unwrap();

        let err = builder.clone().add_snapshot(snapshot(1, None, 2)).unwrap_err();
        assert!(err.message().contains("Snapshot already exists for: '1'"));

        let err = builder
            .clone()
            .add_snapshot(snapshot(2, Some(1), 1))
            .unwrap_err();
        assert!(err.message().contains("older than last sequence number 1"));

        let err = builder
            .clone()
            .add_snapshot(snapshot(2, Some(7), 2))
            .unwrap_err();
        assert!(err.message().contains("unknown parent snapshot 7"));

        let err = builder.set_current_snapshot(9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
    }

    #[test]
    fn test_v1_snapshots_keep_initial_sequence_number() {
        let metadata = builder_without_changes(FormatVersion::V1)
            .add_snapshot(snapshot(1, None, 0))
            .unwrap()
            .set_current_snapshot(1)
            .unwrap()
            .build()
            .unwrap()
            .metadata;
        assert_eq!(metadata.last_sequence_number(), 0);
        assert_eq!(metadata.next_sequence_number(), 0);
    }

    #[test]
    fn test_properties() {
        let builder = builder_without_changes(FormatVersion::V2);

        let err = builder
            .clone()
            .set_properties(HashMap::from([(
                TableProperties::PROPERTY_COMMIT_NUM_RETRIES.to_string(),
                "many".to_string(),
            )]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);

        let build_result = builder
            .set_properties(HashMap::from([
                ("owner".to_string(), "ops".to_string()),
                ("team".to_string(), "storage".to_string()),
            ]))
            .unwrap()
            .remove_properties(&["team".to_string(), "missing".to_string()])
            .build()
            .unwrap();

        assert_eq!(
            build_result.metadata.properties(),
            &HashMap::from([("owner".to_string(), "ops".to_string())])
        );
        assert_eq!(build_result.changes[1], TableUpdate::RemoveProperties {
            removals: vec!["team".to_string()]
        });
    }
}
