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

//! The commit pointer of a table and the updates and requirements a commit carries.

mod memory;
mod metadata_location;

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
pub use memory::MemoryMetadataStore;
pub use metadata_location::MetadataLocation;
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::spec::{
    Snapshot, TableMetadata, TableMetadataBuilder, TableMetadataRef, UnboundPartitionSpec,
};
use crate::{Error, ErrorKind, Result};

/// A table metadata value together with the location it was read from.
///
/// The location is the version token of the compare-and-swap: a swap is only accepted when the
/// store still points at it.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedMetadata {
    metadata: TableMetadataRef,
    location: MetadataLocation,
}

impl VersionedMetadata {
    /// Creates a new versioned metadata.
    pub fn new(metadata: impl Into<TableMetadataRef>, location: MetadataLocation) -> Self {
        Self {
            metadata: metadata.into(),
            location,
        }
    }

    /// The table metadata.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Shared reference of the table metadata.
    pub fn metadata_ref(&self) -> TableMetadataRef {
        self.metadata.clone()
    }

    /// Location of the metadata file, the version token.
    pub fn location(&self) -> &MetadataLocation {
        &self.location
    }
}

/// Proof that a swap was performed, handed to [`MetadataStore::report_outcome`].
#[derive(Debug, Clone, PartialEq)]
pub struct SwapReceipt {
    location: MetadataLocation,
    metadata: TableMetadataRef,
}

impl SwapReceipt {
    /// Creates a receipt for metadata written to `location`.
    pub fn new(location: MetadataLocation, metadata: impl Into<TableMetadataRef>) -> Self {
        Self {
            location,
            metadata: metadata.into(),
        }
    }

    /// Location the store now points at.
    pub fn location(&self) -> &MetadataLocation {
        &self.location
    }
}

impl From<SwapReceipt> for VersionedMetadata {
    fn from(receipt: SwapReceipt) -> Self {
        VersionedMetadata::new(receipt.metadata, receipt.location)
    }
}

/// Holds the pointer to the current metadata file of one table.
///
/// A commit is split in two steps: [`perform_swap`](Self::perform_swap) atomically replaces the
/// pointer if it still matches the base location, and [`report_outcome`](Self::report_outcome)
/// tells the caller what the store now points at. Callers should go through
/// [`compare_and_swap`](Self::compare_and_swap), which composes both.
#[async_trait]
pub trait MetadataStore: Debug + Send + Sync {
    /// Read the current metadata and its version token.
    async fn load(&self) -> Result<VersionedMetadata>;

    /// Write `metadata` as the next version and swap the pointer from `base` to it.
    ///
    /// Returns a retryable [`ErrorKind::CatalogCommitConflicts`] if the pointer moved away from
    /// `base`.
    async fn perform_swap(
        &self,
        base: &MetadataLocation,
        metadata: TableMetadata,
    ) -> Result<SwapReceipt>;

    /// Report the result of a performed swap.
    async fn report_outcome(&self, receipt: SwapReceipt) -> Result<VersionedMetadata>;

    /// Atomically replace the metadata at `base` by `metadata`.
    ///
    /// A failure to report the outcome of a performed swap is returned as
    /// [`ErrorKind::CommitStateUnknown`]: the swap may have taken effect, so the caller must
    /// reload the table to find out and must not retry blindly.
    async fn compare_and_swap(
        &self,
        base: &MetadataLocation,
        metadata: TableMetadata,
    ) -> Result<VersionedMetadata> {
        let receipt = self.perform_swap(base, metadata).await?;
        let location = receipt.location().to_string();

        self.report_outcome(receipt).await.map_err(|err| {
            Error::new(
                ErrorKind::CommitStateUnknown,
                "Commit state is unknown, reload the table to check if the commit was applied",
            )
            .with_context("base", base.to_string())
            .with_context("location", location)
            .with_source(err)
        })
    }
}

/// TableRequirement represents a requirement for a table in the catalog.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "type")]
pub enum TableRequirement {
    /// The table UUID must match the requirement.
    #[serde(rename = "assert-table-uuid")]
    UuidMatch {
        /// Uuid of original table.
        uuid: Uuid,
    },
    /// The current snapshot of the table must be the requirement's `snapshot-id`.
    #[serde(rename = "assert-current-snapshot-id")]
    CurrentSnapshotIdMatch {
        /// The snapshot id of the table to assert.
        /// If the id is `None`, the table must not have a current snapshot.
        #[serde(rename = "snapshot-id")]
        snapshot_id: Option<i64>,
    },
    /// The table's last assigned partition id must match the
    /// requirement.
    #[serde(rename = "assert-last-assigned-partition-id")]
    LastAssignedPartitionIdMatch {
        /// Last assigned partition id of the table to assert.
        #[serde(rename = "last-assigned-partition-id")]
        last_assigned_partition_id: i32,
    },
    /// The table's default spec id must match the requirement.
    #[serde(rename = "assert-default-spec-id")]
    DefaultSpecIdMatch {
        /// Default spec id of the table to assert.
        #[serde(rename = "default-spec-id")]
        default_spec_id: i32,
    },
}

/// TableUpdate represents an update to a table in the catalog.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "action", rename_all = "kebab-case")]
#[allow(clippy::large_enum_variant)]
pub enum TableUpdate {
    /// Add a new partition spec to the table
    AddSpec {
        /// The partition spec to add.
        spec: UnboundPartitionSpec,
    },
    /// Set table's default spec
    #[serde(rename_all = "kebab-case")]
    SetDefaultSpec {
        /// Partition spec id to set as the default spec. -1 means the last added spec.
        spec_id: i32,
    },
    /// Add snapshot to table.
    AddSnapshot {
        /// Snapshot to add.
        snapshot: Snapshot,
    },
    /// Make a snapshot of the table current.
    #[serde(rename_all = "kebab-case")]
    SetCurrentSnapshot {
        /// Snapshot id to make current.
        snapshot_id: i64,
    },
    /// Update table's properties.
    SetProperties {
        /// Properties to update for table.
        updates: HashMap<String, String>,
    },
    /// Remove table's properties.
    RemoveProperties {
        /// Properties to remove
        removals: Vec<String>,
    },
}

impl TableUpdate {
    /// Applies the update to the table metadata builder.
    pub fn apply(self, builder: TableMetadataBuilder) -> Result<TableMetadataBuilder> {
        match self {
            TableUpdate::AddSpec { spec } => builder.add_partition_spec(spec),
            TableUpdate::SetDefaultSpec { spec_id } => builder.set_default_partition_spec(spec_id),
            TableUpdate::AddSnapshot { snapshot } => builder.add_snapshot(snapshot),
            TableUpdate::SetCurrentSnapshot { snapshot_id } => {
                builder.set_current_snapshot(snapshot_id)
            }
            TableUpdate::SetProperties { updates } => builder.set_properties(updates),
            TableUpdate::RemoveProperties { removals } => Ok(builder.remove_properties(&removals)),
        }
    }
}

impl TableRequirement {
    /// Check that the requirement is met by the table metadata.
    ///
    /// A failed requirement means a concurrent commit changed what the update was built on, it
    /// is reported as a non-retryable [`ErrorKind::CatalogCommitConflicts`].
    pub fn check(&self, metadata: &TableMetadata) -> Result<()> {
        match self {
            TableRequirement::UuidMatch { uuid } => {
                if &metadata.uuid() != uuid {
                    return Err(Error::new(
                        ErrorKind::CatalogCommitConflicts,
                        "Requirement failed: Table UUID does not match",
                    )
                    .with_context("expected", uuid.to_string())
                    .with_context("found", metadata.uuid().to_string()));
                }
            }
            TableRequirement::CurrentSnapshotIdMatch { snapshot_id } => {
                if metadata.current_snapshot_id() != *snapshot_id {
                    return Err(Error::new(
                        ErrorKind::CatalogCommitConflicts,
                        "Requirement failed: Current snapshot has changed",
                    )
                    .with_context("expected", format!("{snapshot_id:?}"))
                    .with_context("found", format!("{:?}", metadata.current_snapshot_id())));
                }
            }
            TableRequirement::DefaultSpecIdMatch { default_spec_id } => {
                if metadata.default_partition_spec_id() != *default_spec_id {
                    return Err(Error::new(
                        ErrorKind::CatalogCommitConflicts,
                        "Requirement failed: Default partition spec id does not match",
                    )
                    .with_context("expected", default_spec_id.to_string())
                    .with_context("found", metadata.default_partition_spec_id().to_string()));
                }
            }
            TableRequirement::LastAssignedPartitionIdMatch {
                last_assigned_partition_id,
            } => {
                if metadata.last_partition_id() != *last_assigned_partition_id {
                    return Err(Error::new(
                        ErrorKind::CatalogCommitConflicts,
                        "Requirement failed: Last assigned partition id does not match",
                    )
                    .with_context("expected", last_assigned_partition_id.to_string())
                    .with_context("found", metadata.last_partition_id().to_string()));
                }
            }
        };

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::FileIOBuilder;
    use crate::spec::{FormatVersion, NestedField, PrimitiveType, Schema, Transform};

    fn table_metadata() -> TableMetadata {
        let schema = Schema::builder()
            .with_fields(vec![
                NestedField::required(1, "id", PrimitiveType::Long).into(),
                NestedField::required(2, "data", PrimitiveType::String).into(),
            ])
            .build()
            .unwrap();
        TableMetadataBuilder::new(
            schema,
            UnboundPartitionSpec::new(),
            "memory:/warehouse/t",
            FormatVersion::V2,
            HashMap::new(),
        )
        .unwrap()
        .build()
        .unwrap()
        .metadata
    }

    #[test]
    fn test_check_requirements() {
        let metadata = table_metadata();

        TableRequirement::UuidMatch {
            uuid: metadata.uuid(),
        }
        .check(&metadata)
        .unwrap();
        TableRequirement::CurrentSnapshotIdMatch { snapshot_id: None }
            .check(&metadata)
            .unwrap();
        TableRequirement::DefaultSpecIdMatch { default_spec_id: 0 }
            .check(&metadata)
            .unwrap();

        let err = TableRequirement::CurrentSnapshotIdMatch {
            snapshot_id: Some(1),
        }
        .check(&metadata)
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CatalogCommitConflicts);
        assert!(!err.retryable());

        let err = TableRequirement::LastAssignedPartitionIdMatch {
            last_assigned_partition_id: 1000,
        }
        .check(&metadata)
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CatalogCommitConflicts);
    }

    #[test]
    fn test_apply_updates() {
        let metadata = table_metadata();
        let mut builder = metadata.into_builder();
        for update in [
            TableUpdate::AddSpec {
                spec: UnboundPartitionSpec::new().add_partition_field(
                    2,
                    "data_bucket",
                    Transform::Bucket(4),
                ),
            },
            TableUpdate::SetDefaultSpec { spec_id: -1 },
            TableUpdate::SetProperties {
                updates: HashMap::from([("owner".to_string(), "me".to_string())]),
            },
        ] {
            builder = update.apply(builder).unwrap();
        }
        let metadata = builder.build().unwrap().metadata;

        assert_eq!(metadata.default_partition_spec_id(), 1);
        assert_eq!(metadata.last_partition_id(), 1000);
        assert_eq!(metadata.properties().get("owner"), Some(&"me".to_string()));
    }

    #[test]
    fn test_table_update_json() {
        let update = TableUpdate::SetCurrentSnapshot { snapshot_id: 42 };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"action":"set-current-snapshot","snapshot-id":42}"#);
        assert_eq!(serde_json::from_str::<TableUpdate>(&json).unwrap(), update);
    }

    #[derive(Debug)]
    struct FaultyMetadataStore {
        inner: MemoryMetadataStore,
    }

    #[async_trait]
    impl MetadataStore for FaultyMetadataStore {
        async fn load(&self) -> Result<VersionedMetadata> {
            self.inner.load().await
        }

        async fn perform_swap(
            &self,
            base: &MetadataLocation,
            metadata: TableMetadata,
        ) -> Result<SwapReceipt> {
            self.inner.perform_swap(base, metadata).await
        }

        async fn report_outcome(&self, _receipt: SwapReceipt) -> Result<VersionedMetadata> {
            Err(Error::new(ErrorKind::Unexpected, "Datacenter on Fire"))
        }
    }

    #[tokio::test]
    async fn test_failed_report_is_commit_state_unknown() {
        let file_io = FileIOBuilder::new("memory").build().unwrap();
        let store = FaultyMetadataStore {
            inner: MemoryMetadataStore::create(file_io, &table_metadata())
                .await
                .unwrap(),
        };
        let base = store.load().await.unwrap();
        let updated = base
            .metadata()
            .clone()
            .into_builder()
            .set_properties(HashMap::from([("k".to_string(), "v".to_string())]))
            .unwrap()
            .build()
            .unwrap()
            .metadata;

        let err = store
            .compare_and_swap(base.location(), updated.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitStateUnknown);
        assert!(!err.retryable());
        assert!(err.to_string().contains("Datacenter on Fire"));

        // The swap went through although its outcome was reported as unknown.
        let current = store.load().await.unwrap();
        assert_eq!(
            current.location().version(),
            base.location().version() + 1
        );
        assert_eq!(
            current.location().table_location(),
            base.location().table_location()
        );
        let location = current.location().to_string();
        assert_eq!(err.context_values("location").collect::<Vec<_>>(), vec![
            location.as_str()
        ]);
        assert_eq!(current.metadata(), &updated);
    }
}
