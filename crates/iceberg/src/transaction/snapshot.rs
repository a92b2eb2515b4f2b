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

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::error::Result;
use crate::io::OutputFile;
use crate::spec::{
    FormatVersion, ManifestContentType, ManifestFile, ManifestListWriter, ManifestWriter,
    ManifestWriterBuilder, Operation, Snapshot, Summary,
};
use crate::table::Table;
use crate::transaction::ActionCommit;
use crate::{Error, ErrorKind, TableRequirement, TableUpdate};

const META_ROOT_PATH: &str = "metadata";

/// Writes the files of a new snapshot and turns them into table updates.
///
/// A producer lives for one commit attempt of one action.
pub(crate) struct SnapshotProducer<'a> {
    table: &'a Table,
    snapshot_id: i64,
    commit_uuid: Uuid,
    attempt: u64,
    snapshot_properties: HashMap<String, String>,
    // Numbers the manifests written in this attempt.
    manifest_counter: AtomicU64,
}

impl<'a> SnapshotProducer<'a> {
    pub(crate) fn new(
        table: &'a Table,
        snapshot_id: i64,
        commit_uuid: Uuid,
        attempt: u64,
        snapshot_properties: HashMap<String, String>,
    ) -> Self {
        Self {
            table,
            snapshot_id,
            commit_uuid,
            attempt,
            snapshot_properties,
            manifest_counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn table(&self) -> &Table {
        self.table
    }

    pub(crate) fn snapshot_id(&self) -> i64 {
        self.snapshot_id
    }

    fn new_manifest_output(&self, dir: Option<&str>) -> Result<OutputFile> {
        let metadata = self.table.metadata();
        let dir = match dir {
            Some(dir) => dir.trim_end_matches('/').to_string(),
            None => format!("{}/{}", metadata.location(), META_ROOT_PATH),
        };
        let path = format!(
            "{dir}/{}-m{}.json",
            self.commit_uuid,
            self.manifest_counter.fetch_add(1, Ordering::Relaxed)
        );
        self.table.file_io().new_output(path)
    }

    /// Create a data manifest writer for the partition spec `spec_id`.
    ///
    /// The manifest is written under `dir`, or the metadata directory of the table if `dir` is
    /// `None`. Entries added through the writer are attributed to `snapshot_id`.
    pub(crate) fn new_manifest_writer(
        &self,
        spec_id: i32,
        dir: Option<&str>,
        snapshot_id: Option<i64>,
    ) -> Result<ManifestWriter> {
        let metadata = self.table.metadata();
        let partition_spec = metadata.partition_spec_by_id(spec_id).ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Partition spec {spec_id} not found in table metadata"),
            )
        })?;

        Ok(ManifestWriterBuilder::new(
            self.new_manifest_output(dir)?,
            snapshot_id,
            None,
            metadata.current_schema().clone(),
            partition_spec.as_ref().clone(),
        )
        .build(metadata.format_version(), ManifestContentType::Data))
    }

    fn manifest_list_path(&self) -> String {
        format!(
            "{}/{}/snap-{}-{}-{}.json",
            self.table.metadata().location(),
            META_ROOT_PATH,
            self.snapshot_id,
            self.attempt,
            self.commit_uuid,
        )
    }

    /// Write the manifest list and return the updates adding the snapshot to the table.
    ///
    /// The snapshot is based on the current snapshot of the table, the commit is rejected if the
    /// current snapshot changed in between.
    pub(crate) async fn commit(
        self,
        operation: Operation,
        summary_properties: HashMap<String, String>,
        manifests: Vec<ManifestFile>,
    ) -> Result<ActionCommit> {
        let metadata = self.table.metadata();
        let next_seq_num = metadata.next_sequence_number();
        let parent_snapshot_id = metadata.current_snapshot_id();

        let manifest_list_path = self.manifest_list_path();
        let output = self.table.file_io().new_output(&manifest_list_path)?;
        let mut manifest_list_writer = match metadata.format_version() {
            FormatVersion::V1 => ManifestListWriter::v1(output, self.snapshot_id),
            FormatVersion::V2 => ManifestListWriter::v2(output, self.snapshot_id, next_seq_num),
        };
        manifest_list_writer.add_manifests(manifests.into_iter())?;
        manifest_list_writer.close().await?;

        let mut additional_properties = summary_properties;
        additional_properties.extend(self.snapshot_properties);
        let summary = Summary {
            operation,
            additional_properties,
        };

        let commit_ts = chrono::Utc::now().timestamp_millis();
        let new_snapshot = Snapshot::builder()
            .with_manifest_list(manifest_list_path)
            .with_snapshot_id(self.snapshot_id)
            .with_parent_snapshot_id(parent_snapshot_id)
            .with_sequence_number(next_seq_num)
            .with_summary(summary)
            .with_schema_id(metadata.current_schema_id())
            .with_timestamp_ms(commit_ts)
            .build();

        tracing::debug!(
            snapshot_id = self.snapshot_id,
            sequence_number = next_seq_num,
            operation = operation.as_str(),
            "Produced snapshot"
        );

        Ok(ActionCommit::new(
            vec![
                TableUpdate::AddSnapshot {
                    snapshot: new_snapshot,
                },
                TableUpdate::SetCurrentSnapshot {
                    snapshot_id: self.snapshot_id,
                },
            ],
            vec![
                TableRequirement::UuidMatch {
                    uuid: metadata.uuid(),
                },
                TableRequirement::CurrentSnapshotIdMatch {
                    snapshot_id: parent_snapshot_id,
                },
            ],
        ))
    }
}
