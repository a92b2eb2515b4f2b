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
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::spec::{
    DataContentType, DataFile, ManifestEntry, ManifestStatus, Operation, Struct, StructType,
};
use crate::table::Table;
use crate::transaction::snapshot::SnapshotProducer;
use crate::transaction::{ActionCommit, TransactionAction};
use crate::{Error, ErrorKind};

/// FastAppendAction is a transaction action for fast append data files to the table.
///
/// The added files go to one new manifest, the manifests of the current snapshot are kept as
/// they are.
pub struct FastAppendAction {
    check_duplicate: bool,
    snapshot_id: i64,
    commit_uuid: Uuid,
    attempt: AtomicU64,
    snapshot_properties: HashMap<String, String>,
    added_data_files: Vec<DataFile>,
}

impl FastAppendAction {
    pub(crate) fn new(snapshot_id: i64) -> Self {
        Self {
            check_duplicate: true,
            snapshot_id,
            commit_uuid: Uuid::new_v4(),
            attempt: AtomicU64::new(0),
            snapshot_properties: HashMap::default(),
            added_data_files: vec![],
        }
    }

    fn validate_added_data_files(table: &Table, added_data_files: &[DataFile]) -> Result<()> {
        if added_data_files.is_empty() {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                "No added data files found when write a manifest file",
            ));
        }

        for data_file in added_data_files {
            if data_file.content_type() != DataContentType::Data {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "Only data content type is allowed for fast append",
                ));
            }
            // Check if the data file partition spec id matches the table default partition spec id.
            if table.metadata().default_partition_spec_id() != data_file.partition_spec_id {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "Data file partition spec id does not match table default partition spec id",
                )
                .with_context("file", data_file.file_path()));
            }
            Self::validate_partition_value(
                data_file.partition(),
                table.metadata().default_partition_type(),
            )
            .map_err(|e| e.with_context("file", data_file.file_path()))?;
        }

        Ok(())
    }

    async fn validate_duplicate_files(table: &Table, added_data_files: &[DataFile]) -> Result<()> {
        let new_files: HashSet<&str> = added_data_files
            .iter()
            .map(|df| df.file_path.as_str())
            .collect();

        let mut referenced_files = Vec::new();
        if let Some(current_snapshot) = table.metadata().current_snapshot() {
            let manifest_list = table
                .object_cache()
                .get_manifest_list(current_snapshot, table.metadata())
                .await?;
            for manifest_file in manifest_list.entries() {
                let manifest = table.object_cache().get_manifest(manifest_file).await?;
                for entry in manifest.entries() {
                    let file_path = entry.file_path();
                    if new_files.contains(file_path) && entry.is_alive() {
                        referenced_files.push(file_path.to_string());
                    }
                }
            }
        }

        if !referenced_files.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Cannot add files that are already referenced by table, files: {}",
                    referenced_files.join(", ")
                ),
            ));
        }

        Ok(())
    }

    // Check if the partition value is compatible with the partition type.
    fn validate_partition_value(
        partition_value: &Struct,
        partition_type: &StructType,
    ) -> Result<()> {
        if partition_value.fields().len() != partition_type.fields().len() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Partition value is not compatible with partition type",
            ));
        }

        for (value, field) in partition_value.iter().zip(partition_type.fields()) {
            if let Some(value) = value {
                if !field.field_type.compatible(value) {
                    return Err(Error::new(
                        ErrorKind::DataInvalid,
                        "Partition value is not compatible partition type",
                    )
                    .with_context("field", &field.name));
                }
            }
        }
        Ok(())
    }

    /// Set whether to check duplicate files
    pub fn with_check_duplicate(mut self, v: bool) -> Self {
        self.check_duplicate = v;
        self
    }

    /// Add data files to the snapshot.
    pub fn add_data_files(mut self, data_files: impl IntoIterator<Item = DataFile>) -> Self {
        self.added_data_files.extend(data_files);
        self
    }

    /// Set snapshot summary properties.
    pub fn set_snapshot_properties(mut self, snapshot_properties: HashMap<String, String>) -> Self {
        self.snapshot_properties = snapshot_properties;
        self
    }
}

#[async_trait]
impl TransactionAction for FastAppendAction {
    async fn commit(self: Arc<Self>, table: &Table) -> Result<ActionCommit> {
        Self::validate_added_data_files(table, &self.added_data_files)?;

        if self.check_duplicate {
            Self::validate_duplicate_files(table, &self.added_data_files).await?;
        }

        let producer = SnapshotProducer::new(
            table,
            self.snapshot_id,
            self.commit_uuid,
            self.attempt.fetch_add(1, Ordering::Relaxed),
            self.snapshot_properties.clone(),
        );

        let mut writer = producer.new_manifest_writer(
            table.metadata().default_partition_spec_id(),
            None,
            Some(self.snapshot_id),
        )?;
        for data_file in &self.added_data_files {
            writer.add_entry(ManifestEntry {
                status: ManifestStatus::Added,
                snapshot_id: None,
                sequence_number: None,
                file_sequence_number: None,
                data_file: data_file.clone(),
            })?;
        }
        let added_manifest = writer.write_manifest_file().await?;

        let mut manifests = vec![added_manifest];
        if let Some(current_snapshot) = table.metadata().current_snapshot() {
            let manifest_list = table
                .object_cache()
                .get_manifest_list(current_snapshot, table.metadata())
                .await?;
            manifests.extend(manifest_list.entries().iter().cloned());
        }

        let added_records: u64 = self.added_data_files.iter().map(|f| f.record_count()).sum();
        let summary = HashMap::from([
            (
                "added-data-files".to_string(),
                self.added_data_files.len().to_string(),
            ),
            ("added-records".to_string(), added_records.to_string()),
        ]);

        producer.commit(Operation::Append, summary, manifests).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::ErrorKind;
    use crate::spec::{
        DataContentType, DataFileBuilder, DataFileFormat, FormatVersion, ManifestStatus,
        Operation, PrimitiveLiteral, Struct, Transform, UnboundPartitionSpec,
    };
    use crate::transaction::Transaction;
    use crate::transaction::action::ApplyTransactionAction;
    use crate::transaction::tests::{make_table, make_v2_table};

    #[tokio::test]
    async fn test_empty_data_append_action() {
        let (table, store) = make_v2_table().await;
        let tx = Transaction::new(&table);
        let tx = tx.fast_append().add_data_files(vec![]).apply(tx).unwrap();
        let err = tx.commit(&store).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn test_fast_append_file_with_incompatible_partition_value() {
        let spec = UnboundPartitionSpec::new().add_partition_field(3, "c3", Transform::Identity);
        let (table, store) = make_table(FormatVersion::V2, spec, []).await;
        let data_file = DataFileBuilder::default()
            .content(DataContentType::Data)
            .file_path("test/1.parquet")
            .file_format(DataFileFormat::Parquet)
            .file_size_in_bytes(100)
            .record_count(1)
            .partition(Struct::from_iter([Some(PrimitiveLiteral::Int(1))]))
            .build()
            .unwrap();
        let tx = Transaction::new(&table);
        let tx = tx.fast_append().add_data_files(vec![data_file]).apply(tx).unwrap();
        let err = tx.commit(&store).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
    }

    #[tokio::test]
    async fn test_fast_append() {
        let spec = UnboundPartitionSpec::new().add_partition_field(3, "c3", Transform::Identity);
        let (table, store) = make_table(FormatVersion::V2, spec, []).await;
        let data_file = DataFileBuilder::default()
            .content(DataContentType::Data)
            .file_path("test/3.parquet")
            .file_format(DataFileFormat::Parquet)
            .file_size_in_bytes(100)
            .record_count(1)
            .partition(Struct::from_iter([Some(PrimitiveLiteral::String(
                "a".to_string(),
            ))]))
            .build()
            .unwrap();
        let tx = Transaction::new(&table);
        let tx = tx
            .fast_append()
            .add_data_files(vec![data_file.clone()])
            .apply(tx)
            .unwrap();
        let table = tx.commit(&store).await.unwrap();

        let snapshot = table.metadata().current_snapshot().unwrap();
        assert_eq!(snapshot.sequence_number(), 1);
        assert_eq!(snapshot.parent_snapshot_id(), None);
        assert_eq!(snapshot.summary().operation, Operation::Append);
        assert_eq!(
            snapshot.summary().additional_properties["added-data-files"],
            "1"
        );

        let manifest_list = snapshot
            .load_manifest_list(table.file_io(), table.metadata())
            .await
            .unwrap();
        assert_eq!(manifest_list.entries().len(), 1);
        let manifest_file = &manifest_list.entries()[0];
        assert_eq!(manifest_file.sequence_number, 1);
        assert_eq!(manifest_file.added_snapshot_id, snapshot.snapshot_id());
        assert!(
            manifest_file
                .manifest_path
                .starts_with("memory:/warehouse/t/metadata/")
        );

        let manifest = manifest_file.load_manifest(table.file_io()).await.unwrap();
        assert_eq!(manifest.entries().len(), 1);
        let entry = &manifest.entries()[0];
        assert_eq!(entry.status(), ManifestStatus::Added);
        assert_eq!(entry.snapshot_id(), Some(snapshot.snapshot_id()));
        assert_eq!(entry.sequence_number(), Some(1));
        assert_eq!(entry.data_file(), &data_file);

        // A second append keeps the first manifest.
        let tx = Transaction::new(&table);
        let tx = tx
            .fast_append()
            .add_data_files(vec![
                DataFileBuilder::default()
                    .file_path("test/4.parquet")
                    .file_format(DataFileFormat::Parquet)
                    .file_size_in_bytes(100)
                    .record_count(2)
                    .partition(Struct::from_iter([None]))
                    .build()
                    .unwrap(),
            ])
            .apply(tx)
            .unwrap();
        let table = tx.commit(&store).await.unwrap();
        let snapshot = table.metadata().current_snapshot().unwrap();
        let manifest_list = snapshot
            .load_manifest_list(table.file_io(), table.metadata())
            .await
            .unwrap();
        assert_eq!(manifest_list.entries().len(), 2);
        assert_eq!(&manifest_list.entries()[1], manifest_file);
        assert_eq!(snapshot.sequence_number(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_files_are_rejected() {
        let (table, store) = make_v2_table().await;
        let data_file = DataFileBuilder::default()
            .file_path("test/1.parquet")
            .file_format(DataFileFormat::Parquet)
            .file_size_in_bytes(100)
            .record_count(1)
            .build()
            .unwrap();
        let tx = Transaction::new(&table);
        let tx = tx
            .fast_append()
            .add_data_files(vec![data_file.clone()])
            .apply(tx)
            .unwrap();
        let table = tx.commit(&store).await.unwrap();

        let tx = Transaction::new(&table);
        let tx = tx
            .fast_append()
            .add_data_files(vec![data_file])
            .apply(tx)
            .unwrap();
        let err = tx.commit(&store).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
    }
}
