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

use serde_derive::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::{DataContentType, DataFile, FormatVersion, ManifestContentType, PartitionSpec};
use crate::spec::{SchemaId, SchemaRef};
use crate::{Error, ErrorKind, Result};

/// Header of a manifest file: what its entries were written against.
#[derive(Debug, PartialEq, Clone, Eq, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestMetadata {
    /// Current table schema when the manifest was written.
    pub schema: SchemaRef,
    /// Id of that schema.
    pub schema_id: SchemaId,
    /// The spec the partition tuples of all entries follow.
    pub partition_spec: PartitionSpec,
    /// Format version of the table.
    pub format_version: FormatVersion,
    /// Whether the manifest tracks data or delete files.
    pub content: ManifestContentType,
}

impl ManifestMetadata {
    /// Id of the partition spec of the entries.
    pub fn spec_id(&self) -> i32 {
        self.partition_spec.spec_id()
    }

    /// Checks that `data_file` can be tracked by this manifest: its content kind must match the
    /// manifest content and its partition tuple must have one value per partition field.
    pub fn check_data_file(&self, data_file: &DataFile) -> Result<()> {
        let content_matches = match self.content {
            ManifestContentType::Data => data_file.content == DataContentType::Data,
            ManifestContentType::Deletes => data_file.content != DataContentType::Data,
        };
        if !content_matches {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Data file {} has content {:?}, which a {:?} manifest can't track",
                    data_file.file_path(),
                    data_file.content,
                    self.content
                ),
            ));
        }

        let expected = self.partition_spec.fields().len();
        let actual = data_file.partition.fields().len();
        if actual != expected {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Data file {} has {actual} partition values, but partition spec {} has {expected} fields",
                    data_file.file_path(),
                    self.spec_id()
                ),
            ));
        }
        Ok(())
    }
}
