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
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::Result;
use crate::spec::{PrimitiveLiteral, Struct};
use crate::{Error, ErrorKind};

/// Data file carries data file path, partition tuple, metrics, …
#[derive(Debug, PartialEq, Clone, Eq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataFile {
    /// Type of content stored by the data file: data, equality deletes,
    /// or position deletes (all v1 files are data files)
    #[builder(default)]
    pub(crate) content: DataContentType,
    /// Full URI for the file with FS scheme
    #[builder(setter(into))]
    pub(crate) file_path: String,
    /// String file format name, `avro`, `orc` or `parquet`
    pub(crate) file_format: DataFileFormat,
    /// Partition data tuple, schema based on the partition spec output using
    /// partition field ids for the struct field ids
    #[builder(default)]
    pub(crate) partition: Struct,
    /// Number of records in this file
    pub(crate) record_count: u64,
    /// Total file size in bytes
    pub(crate) file_size_in_bytes: u64,
    /// Map from column id to the total size on disk of all regions that
    /// store the column.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub(crate) column_sizes: HashMap<i32, u64>,
    /// Map from column id to number of values in the column (including null
    /// and NaN values)
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub(crate) value_counts: HashMap<i32, u64>,
    /// Map from column id to number of null values in the column
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub(crate) null_value_counts: HashMap<i32, u64>,
    /// Map from column id to lower bound in the column.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub(crate) lower_bounds: HashMap<i32, PrimitiveLiteral>,
    /// Map from column id to upper bound in the column.
    #[builder(default)]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub(crate) upper_bounds: HashMap<i32, PrimitiveLiteral>,
    /// Implementation-specific key metadata for encryption
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) key_metadata: Option<Vec<u8>>,
    /// Split offsets for the data file. Must be sorted ascending
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) split_offsets: Vec<i64>,
    /// Spec id of the manifest the file is tracked in. Not written to manifests, it is taken
    /// from the manifest metadata on read.
    #[builder(default)]
    #[serde(skip)]
    pub(crate) partition_spec_id: i32,
}

impl DataFile {
    /// Get the content type of the data file (data, equality deletes, or position deletes)
    pub fn content_type(&self) -> DataContentType {
        self.content
    }
    /// Get the file path as full URI with FS scheme
    pub fn file_path(&self) -> &str {
        &self.file_path
    }
    /// Get the file format of the file (avro, orc or parquet).
    pub fn file_format(&self) -> DataFileFormat {
        self.file_format
    }
    /// Get the partition values of the file.
    pub fn partition(&self) -> &Struct {
        &self.partition
    }
    /// Get the record count in the data file.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }
    /// Get the file size in bytes.
    pub fn file_size_in_bytes(&self) -> u64 {
        self.file_size_in_bytes
    }
    /// Get the column sizes.
    pub fn column_sizes(&self) -> &HashMap<i32, u64> {
        &self.column_sizes
    }
    /// Get the columns value counts for the data file.
    pub fn value_counts(&self) -> &HashMap<i32, u64> {
        &self.value_counts
    }
    /// Get the null value counts of the data file.
    pub fn null_value_counts(&self) -> &HashMap<i32, u64> {
        &self.null_value_counts
    }
    /// Get the lower bounds of the data file values per column.
    pub fn lower_bounds(&self) -> &HashMap<i32, PrimitiveLiteral> {
        &self.lower_bounds
    }
    /// Get the upper bounds of the data file values per column.
    pub fn upper_bounds(&self) -> &HashMap<i32, PrimitiveLiteral> {
        &self.upper_bounds
    }
    /// Get the Implementation-specific key metadata for the data file.
    pub fn key_metadata(&self) -> Option<&[u8]> {
        self.key_metadata.as_deref()
    }
    /// Get the split offsets of the data file.
    pub fn split_offsets(&self) -> &[i64] {
        &self.split_offsets
    }
    /// Get the partition spec id of the manifest tracking this file.
    pub fn partition_spec_id(&self) -> i32 {
        self.partition_spec_id
    }
}

/// Type of content stored by the data file: data, equality deletes, or
/// position deletes (all v1 files are data files)
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(try_from = "i32", into = "i32")]
pub enum DataContentType {
    /// value: 0
    #[default]
    Data = 0,
    /// value: 1
    PositionDeletes = 1,
    /// value: 2
    EqualityDeletes = 2,
}

impl TryFrom<i32> for DataContentType {
    type Error = Error;

    fn try_from(v: i32) -> Result<DataContentType> {
        match v {
            0 => Ok(DataContentType::Data),
            1 => Ok(DataContentType::PositionDeletes),
            2 => Ok(DataContentType::EqualityDeletes),
            _ => Err(Error::new(
                ErrorKind::DataInvalid,
                format!("data content type {v} is invalid"),
            )),
        }
    }
}

impl From<DataContentType> for i32 {
    fn from(v: DataContentType) -> Self {
        v as i32
    }
}

/// Format of this data.
#[derive(Debug, PartialEq, Eq, Clone, Copy, SerializeDisplay, DeserializeFromStr)]
pub enum DataFileFormat {
    /// Avro file format: <https://avro.apache.org/>
    Avro,
    /// Orc file format: <https://orc.apache.org/>
    Orc,
    /// Parquet file format: <https://parquet.apache.org/>
    Parquet,
}

impl FromStr for DataFileFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "avro" => Ok(Self::Avro),
            "orc" => Ok(Self::Orc),
            "parquet" => Ok(Self::Parquet),
            _ => Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Unsupported data file format: {s}"),
            )),
        }
    }
}

impl std::fmt::Display for DataFileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataFileFormat::Avro => write!(f, "avro"),
            DataFileFormat::Orc => write!(f, "orc"),
            DataFileFormat::Parquet => write!(f, "parquet"),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_data_content_type_default() {
        assert_eq!(DataContentType::default(), DataContentType::Data);
        assert_eq!(i32::from(DataContentType::EqualityDeletes), 2);
        assert!(DataContentType::try_from(3).is_err());
    }

    #[test]
    fn test_data_file_json() {
        let data_file = DataFileBuilder::default()
            .file_path("memory:/t/data/a.parquet")
            .file_format(DataFileFormat::Parquet)
            .partition(Struct::from_iter([Some(PrimitiveLiteral::Int(1))]))
            .record_count(10)
            .file_size_in_bytes(1024)
            .value_counts(HashMap::from([(1, 10)]))
            .lower_bounds(HashMap::from([(1, PrimitiveLiteral::Int(-3))]))
            .partition_spec_id(2)
            .build()
            .unwrap();

        let json = serde_json::to_value(&data_file).unwrap();
        assert_eq!(json["file-format"], "parquet");
        assert_eq!(json["content"], 0);
        assert!(json.get("partition-spec-id").is_none());

        let parsed: DataFile = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.partition_spec_id(), 0);
        assert_eq!(
            DataFile {
                partition_spec_id: 2,
                ..parsed
            },
            data_file
        );
    }
}
