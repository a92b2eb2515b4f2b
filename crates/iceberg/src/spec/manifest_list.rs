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

//! ManifestList for Iceberg.

use bytes::Bytes;
use serde_derive::{Deserialize, Serialize};

use super::{FormatVersion, INITIAL_SEQUENCE_NUMBER, Manifest, PrimitiveLiteral};
use crate::error::Result;
use crate::io::{FileIO, OutputFile};
use crate::{Error, ErrorKind};

/// Placeholder for sequence number. The field with this value must be replaced with the actual
/// sequence number before it write.
pub const UNASSIGNED_SEQUENCE_NUMBER: i64 = -1;

/// Placeholder for snapshot id of a manifest written before the id of its snapshot is known.
pub const UNASSIGNED_SNAPSHOT_ID: i64 = -1;

/// Snapshots are embedded in table metadata, but the list of manifests for a
/// snapshot are stored in a separate manifest list file.
///
/// A new manifest list is written for each attempt to commit a snapshot
/// because the list of manifests always changes to produce a new snapshot.
/// When a manifest list is written, the (optimistic) sequence number of the
/// snapshot is written for all new manifest files tracked by the list.
///
/// A manifest list includes summary metadata that can be used to avoid
/// scanning all of the manifests in a snapshot when planning a table scan.
/// This includes the number of added, existing, and deleted files, and a
/// summary of values for each field of the partition spec used to write the
/// manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestList {
    /// Entries in a manifest list.
    entries: Vec<ManifestFile>,
}

impl ManifestList {
    /// Parse manifest list from bytes.
    ///
    /// Manifests of a v1 list have no sequence numbers and are read with
    /// sequence number 0.
    pub fn parse_with_version(bs: &[u8], version: FormatVersion) -> Result<ManifestList> {
        let mut list: ManifestList = serde_json::from_slice(bs).map_err(|err| {
            Error::new(ErrorKind::DataInvalid, "Failed to parse manifest list").with_source(err)
        })?;
        if version == FormatVersion::V1 {
            for manifest in list.entries.iter_mut() {
                manifest.sequence_number = INITIAL_SEQUENCE_NUMBER;
                manifest.min_sequence_number = INITIAL_SEQUENCE_NUMBER;
            }
        }
        Ok(list)
    }

    /// Get the entries in the manifest list.
    pub fn entries(&self) -> &[ManifestFile] {
        &self.entries
    }

    /// Take ownership of the entries in the manifest list, consuming it
    pub fn consume_entries(self) -> impl IntoIterator<Item = ManifestFile> {
        self.entries
    }
}

/// A manifest list writer.
pub struct ManifestListWriter {
    format_version: FormatVersion,
    output_file: OutputFile,
    sequence_number: i64,
    snapshot_id: i64,
    manifest_files: Vec<ManifestFile>,
}

impl std::fmt::Debug for ManifestListWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestListWriter")
            .field("format_version", &self.format_version)
            .field("output_file", &self.output_file.location())
            .field("snapshot_id", &self.snapshot_id)
            .finish_non_exhaustive()
    }
}

impl ManifestListWriter {
    /// Construct a v1 [`ManifestListWriter`] that writes to a provided [`OutputFile`].
    pub fn v1(output_file: OutputFile, snapshot_id: i64) -> Self {
        Self::new(
            FormatVersion::V1,
            output_file,
            snapshot_id,
            INITIAL_SEQUENCE_NUMBER,
        )
    }

    /// Construct a v2 [`ManifestListWriter`] that writes to a provided [`OutputFile`].
    pub fn v2(output_file: OutputFile, snapshot_id: i64, sequence_number: i64) -> Self {
        Self::new(FormatVersion::V2, output_file, snapshot_id, sequence_number)
    }

    fn new(
        format_version: FormatVersion,
        output_file: OutputFile,
        snapshot_id: i64,
        sequence_number: i64,
    ) -> Self {
        Self {
            format_version,
            output_file,
            sequence_number,
            snapshot_id,
            manifest_files: vec![],
        }
    }

    /// Append manifests to be written.
    ///
    /// Manifests added by this snapshot get the snapshot's sequence number. In a v1 list every
    /// manifest has sequence number 0.
    pub fn add_manifests(&mut self, manifests: impl Iterator<Item = ManifestFile>) -> Result<()> {
        for mut manifest in manifests {
            match self.format_version {
                FormatVersion::V1 => {
                    manifest.sequence_number = INITIAL_SEQUENCE_NUMBER;
                    manifest.min_sequence_number = INITIAL_SEQUENCE_NUMBER;
                }
                FormatVersion::V2 => {
                    if manifest.sequence_number == UNASSIGNED_SEQUENCE_NUMBER {
                        self.check_added_by_this_snapshot(&manifest)?;
                        manifest.sequence_number = self.sequence_number;
                    }
                    if manifest.min_sequence_number == UNASSIGNED_SEQUENCE_NUMBER {
                        self.check_added_by_this_snapshot(&manifest)?;
                        // Only a manifest without live entries has no minimum, use the
                        // sequence number of the snapshot.
                        manifest.min_sequence_number = self.sequence_number;
                    }
                }
            }
            self.manifest_files.push(manifest);
        }
        Ok(())
    }

    fn check_added_by_this_snapshot(&self, manifest: &ManifestFile) -> Result<()> {
        if manifest.added_snapshot_id != self.snapshot_id {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Found unassigned sequence number for a manifest from snapshot {}.",
                    manifest.added_snapshot_id
                ),
            )
            .with_context("manifest", &manifest.manifest_path));
        }
        Ok(())
    }

    /// Write the manifest list to the output file.
    pub async fn close(self) -> Result<()> {
        let list = ManifestList {
            entries: self.manifest_files,
        };
        self.output_file
            .write(Bytes::from(serde_json::to_vec(&list)?))
            .await
    }
}

/// Entry in a manifest list.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestFile {
    /// Location of the manifest file
    pub manifest_path: String,
    /// Length of the manifest file in bytes
    pub manifest_length: i64,
    /// ID of a partition spec used to write the manifest; must be listed
    /// in table metadata partition-specs
    pub partition_spec_id: i32,
    /// The type of files tracked by the manifest, either data or delete
    /// files; 0 for all v1 manifests
    pub content: ManifestContentType,
    /// The sequence number when the manifest was added to the table; use 0
    /// when reading v1 manifest lists
    pub sequence_number: i64,
    /// The minimum data sequence number of all live data or delete files in
    /// the manifest; use 0 when reading v1 manifest lists
    pub min_sequence_number: i64,
    /// ID of the snapshot where the manifest file was added
    pub added_snapshot_id: i64,
    /// Number of entries in the manifest that have status ADDED, when null
    /// this is assumed to be non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_files_count: Option<u32>,
    /// Number of entries in the manifest that have status EXISTING (0),
    /// when null this is assumed to be non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_files_count: Option<u32>,
    /// Number of entries in the manifest that have status DELETED (2),
    /// when null this is assumed to be non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_files_count: Option<u32>,
    /// Number of rows in all of files in the manifest that have status
    /// ADDED, when null this is assumed to be non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_rows_count: Option<u64>,
    /// Number of rows in all of files in the manifest that have status
    /// EXISTING, when null this is assumed to be non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_rows_count: Option<u64>,
    /// Number of rows in all of files in the manifest that have status
    /// DELETED, when null this is assumed to be non-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_rows_count: Option<u64>,
    /// A list of field summaries for each partition field in the spec. Each
    /// field in the list corresponds to a field in the manifest file’s
    /// partition spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<Vec<FieldSummary>>,
    /// Implementation-specific key metadata for encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_metadata: Option<Vec<u8>>,
}

impl ManifestFile {
    /// Checks if the manifest file has any added files.
    pub fn has_added_files(&self) -> bool {
        self.added_files_count.is_none_or(|c| c > 0)
    }

    /// Checks if the manifest file has any existing files.
    pub fn has_existing_files(&self) -> bool {
        self.existing_files_count.is_none_or(|c| c > 0)
    }

    /// Checks if the manifest file has any deleted files.
    pub fn has_deleted_files(&self) -> bool {
        self.deleted_files_count.is_none_or(|c| c > 0)
    }

    /// Number of entries of the manifest, counting all statuses. Unknown counts are taken as 0.
    pub fn entries_count(&self) -> u64 {
        [
            self.added_files_count,
            self.existing_files_count,
            self.deleted_files_count,
        ]
        .into_iter()
        .map(|c| c.unwrap_or(0) as u64)
        .sum()
    }

    /// Load [`Manifest`].
    ///
    /// This method will also initialize inherited values of [`ManifestEntry`], such as `sequence_number`.
    ///
    /// [`ManifestEntry`]: crate::spec::ManifestEntry
    pub async fn load_manifest(&self, file_io: &FileIO) -> Result<Manifest> {
        let bs = file_io.new_input(&self.manifest_path)?.read().await?;
        let (metadata, mut entries) = Manifest::try_from_json_bytes(&bs)?;

        if metadata.partition_spec.spec_id() != self.partition_spec_id {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Manifest is written with partition spec {}, but listed with partition spec {}",
                    metadata.partition_spec.spec_id(),
                    self.partition_spec_id
                ),
            )
            .with_context("manifest", &self.manifest_path));
        }

        // Let entries inherit values from the manifest list entry.
        for entry in &mut entries {
            entry.inherit_data(self);
        }

        Ok(Manifest::new(metadata, entries))
    }
}

/// The type of files tracked by the manifest, either data or delete files; Data(0) for all v1 manifests
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ManifestContentType {
    /// The manifest content is data.
    #[default]
    Data = 0,
    /// The manifest content is deletes.
    Deletes = 1,
}

impl TryFrom<i32> for ManifestContentType {
    type Error = Error;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ManifestContentType::Data),
            1 => Ok(ManifestContentType::Deletes),
            _ => Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Invalid manifest content type. Expected 0 or 1, got {value}"),
            )),
        }
    }
}

impl From<ManifestContentType> for i32 {
    fn from(value: ManifestContentType) -> Self {
        value as i32
    }
}

/// Field summary for partition field in the spec.
///
/// Each field in the list corresponds to a field in the manifest file’s partition spec.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldSummary {
    /// Whether the manifest contains at least one partition with a null
    /// value for the field
    pub contains_null: bool,
    /// Whether the manifest contains at least one partition with a NaN
    /// value for the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_nan: Option<bool>,
    /// The minimum value for the field in the manifests
    /// partitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<PrimitiveLiteral>,
    /// The maximum value for the field in the manifests
    /// partitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<PrimitiveLiteral>,
}
