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

use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::Result;
use crate::spec::manifest::data_file::{DataContentType, DataFile, DataFileFormat};
use crate::spec::{INITIAL_SEQUENCE_NUMBER, ManifestFile};
use crate::{Error, ErrorKind};

/// Reference to [`ManifestEntry`].
pub type ManifestEntryRef = Arc<ManifestEntry>;

/// An entry of a manifest: one data file together with its status and the
/// snapshot and sequence numbers that track where it came from.
#[derive(Debug, PartialEq, Eq, Clone, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestEntry {
    /// Used to track additions and deletions.
    pub status: ManifestStatus,
    /// Snapshot id where the file was added, or deleted if status is 2.
    /// Inherited when null.
    #[builder(default, setter(strip_option(fallback = snapshot_id_opt)))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<i64>,
    /// Data sequence number of the file.
    /// Inherited when null and status is 1 (added).
    #[builder(default, setter(strip_option(fallback = sequence_number_opt)))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<i64>,
    /// File sequence number indicating when the file was added.
    /// Inherited when null and status is 1 (added).
    #[builder(default, setter(strip_option(fallback = file_sequence_number_opt)))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sequence_number: Option<i64>,
    /// File path, partition tuple, metrics, …
    pub data_file: DataFile,
}

impl ManifestEntry {
    /// Check if this manifest entry is deleted.
    pub fn is_alive(&self) -> bool {
        matches!(
            self.status,
            ManifestStatus::Added | ManifestStatus::Existing
        )
    }

    /// Status of this manifest entry
    pub fn status(&self) -> ManifestStatus {
        self.status
    }

    /// Content type of this manifest entry.
    #[inline]
    pub fn content_type(&self) -> DataContentType {
        self.data_file.content
    }

    /// File format of this manifest entry.
    #[inline]
    pub fn file_format(&self) -> DataFileFormat {
        self.data_file.file_format
    }

    /// Data file path of this manifest entry.
    #[inline]
    pub fn file_path(&self) -> &str {
        &self.data_file.file_path
    }

    /// Data file record count of the manifest entry.
    #[inline]
    pub fn record_count(&self) -> u64 {
        self.data_file.record_count
    }

    /// Inherit data from manifest list, such as snapshot id, sequence number.
    pub(crate) fn inherit_data(&mut self, snapshot_entry: &ManifestFile) {
        if self.snapshot_id.is_none() {
            self.snapshot_id = Some(snapshot_entry.added_snapshot_id);
        }

        if self.sequence_number.is_none()
            && (self.status == ManifestStatus::Added
                || snapshot_entry.sequence_number == INITIAL_SEQUENCE_NUMBER)
        {
            self.sequence_number = Some(snapshot_entry.sequence_number);
        }

        if self.file_sequence_number.is_none()
            && (self.status == ManifestStatus::Added
                || snapshot_entry.sequence_number == INITIAL_SEQUENCE_NUMBER)
        {
            self.file_sequence_number = Some(snapshot_entry.sequence_number);
        }
    }

    /// Snapshot id
    #[inline]
    pub fn snapshot_id(&self) -> Option<i64> {
        self.snapshot_id
    }

    /// Data sequence number.
    #[inline]
    pub fn sequence_number(&self) -> Option<i64> {
        self.sequence_number
    }

    /// File sequence number.
    #[inline]
    pub fn file_sequence_number(&self) -> Option<i64> {
        self.file_sequence_number
    }

    /// File size in bytes.
    #[inline]
    pub fn file_size_in_bytes(&self) -> u64 {
        self.data_file.file_size_in_bytes
    }

    /// get a reference to the actual data file
    #[inline]
    pub fn data_file(&self) -> &DataFile {
        &self.data_file
    }
}

/// Used to track additions and deletions in ManifestEntry.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ManifestStatus {
    /// Value: 0
    Existing = 0,
    /// Value: 1
    Added = 1,
    /// Value: 2
    ///
    /// Deletes are informational only and not used in scans.
    Deleted = 2,
}

impl TryFrom<i32> for ManifestStatus {
    type Error = Error;

    fn try_from(v: i32) -> Result<ManifestStatus> {
        match v {
            0 => Ok(ManifestStatus::Existing),
            1 => Ok(ManifestStatus::Added),
            2 => Ok(ManifestStatus::Deleted),
            _ => Err(Error::new(
                ErrorKind::DataInvalid,
                format!("manifest status {v} is invalid"),
            )),
        }
    }
}

impl From<ManifestStatus> for i32 {
    fn from(v: ManifestStatus) -> Self {
        v as i32
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::spec::{DataFileBuilder, ManifestContentType, UNASSIGNED_SEQUENCE_NUMBER};

    fn entry(status: ManifestStatus) -> ManifestEntry {
        ManifestEntry::builder()
            .status(status)
            .data_file(
                DataFileBuilder::default()
                    .file_path("memory:/t/data/a.parquet")
                    .file_format(DataFileFormat::Parquet)
                    .record_count(1)
                    .file_size_in_bytes(10)
                    .build()
                    .unwrap(),
            )
            .build()
    }

    fn manifest_file(sequence_number: i64) -> ManifestFile {
        ManifestFile {
            manifest_path: "memory:/t/metadata/m0.json".to_string(),
            manifest_length: 100,
            partition_spec_id: 0,
            content: ManifestContentType::Data,
            sequence_number,
            min_sequence_number: sequence_number,
            added_snapshot_id: 7,
            added_files_count: Some(1),
            existing_files_count: Some(0),
            deleted_files_count: Some(0),
            added_rows_count: Some(1),
            existing_rows_count: Some(0),
            deleted_rows_count: Some(0),
            partitions: None,
            key_metadata: None,
        }
    }

    #[test]
    fn test_inherit_added_entry() {
        let mut added = entry(ManifestStatus::Added);
        added.inherit_data(&manifest_file(5));
        assert_eq!(added.snapshot_id(), Some(7));
        assert_eq!(added.sequence_number(), Some(5));
        assert_eq!(added.file_sequence_number(), Some(5));
    }

    #[test]
    fn test_inherit_keeps_explicit_values() {
        let mut existing = ManifestEntry {
            snapshot_id: Some(3),
            sequence_number: Some(2),
            file_sequence_number: Some(2),
            ..entry(ManifestStatus::Existing)
        };
        existing.inherit_data(&manifest_file(5));
        assert_eq!(existing.snapshot_id(), Some(3));
        assert_eq!(existing.sequence_number(), Some(2));

        // existing entries only inherit sequence numbers from v1 manifests
        let mut existing = entry(ManifestStatus::Existing);
        existing.inherit_data(&manifest_file(5));
        assert_eq!(existing.sequence_number(), None);
        existing.inherit_data(&manifest_file(INITIAL_SEQUENCE_NUMBER));
        assert_eq!(existing.sequence_number(), Some(INITIAL_SEQUENCE_NUMBER));
        assert_ne!(existing.sequence_number(), Some(UNASSIGNED_SEQUENCE_NUMBER));
    }

    #[test]
    fn test_status_json() {
        let entry = entry(ManifestStatus::Deleted);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], 2);
        assert!(json.get("snapshot-id").is_none());
        assert_eq!(serde_json::from_value::<ManifestEntry>(json).unwrap(), entry);
        assert!(ManifestStatus::try_from(3).is_err());
    }
}
