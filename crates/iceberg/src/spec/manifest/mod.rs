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

//! Manifests and their entries.
//!
//! Manifests are stored as a JSON document holding the [`ManifestMetadata`] and the
//! [`ManifestEntry`]s. Entries are written with unassigned snapshot ids and sequence numbers when
//! those are inherited from the manifest list at read time.

mod data_file;
pub use data_file::*;
mod entry;
pub use entry::*;
mod metadata;
pub use metadata::*;
mod writer;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};
pub use writer::*;

use super::{FormatVersion, ManifestContentType, PartitionSpec};
use crate::error::Result;
use crate::{Error, ErrorKind};

/// A manifest contains metadata and a list of entries.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Manifest {
    metadata: ManifestMetadata,
    entries: Vec<ManifestEntryRef>,
}

#[derive(Serialize)]
struct ManifestRef<'a> {
    metadata: &'a ManifestMetadata,
    entries: &'a [ManifestEntryRef],
}

#[derive(Deserialize)]
struct ManifestOwned {
    metadata: ManifestMetadata,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse manifest metadata and entries from the bytes of a manifest file.
    pub(crate) fn try_from_json_bytes(bs: &[u8]) -> Result<(ManifestMetadata, Vec<ManifestEntry>)> {
        let ManifestOwned {
            metadata,
            mut entries,
        } = serde_json::from_slice(bs).map_err(|err| {
            Error::new(ErrorKind::DataInvalid, "Fail to parse manifest").with_source(err)
        })?;

        for entry in entries.iter_mut() {
            metadata.check_data_file(&entry.data_file)?;
            entry.data_file.partition_spec_id = metadata.spec_id();
        }

        Ok((metadata, entries))
    }

    /// Parse manifest from the bytes of a manifest file.
    pub fn parse_json(bs: &[u8]) -> Result<Self> {
        let (metadata, entries) = Self::try_from_json_bytes(bs)?;
        Ok(Self::new(metadata, entries))
    }

    /// Serialize the manifest into the bytes of a manifest file.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&ManifestRef {
            metadata: &self.metadata,
            entries: &self.entries,
        })?)
    }

    /// Entries slice.
    pub fn entries(&self) -> &[ManifestEntryRef] {
        &self.entries
    }

    /// Get metadata.
    pub fn metadata(&self) -> &ManifestMetadata {
        &self.metadata
    }

    /// Consume this Manifest, returning its constituent parts
    pub fn into_parts(self) -> (Vec<ManifestEntryRef>, ManifestMetadata) {
        let Self { entries, metadata } = self;
        (entries, metadata)
    }

    /// Constructor from [`ManifestMetadata`] and [`ManifestEntry`]s.
    pub fn new(metadata: ManifestMetadata, entries: Vec<ManifestEntry>) -> Self {
        Self {
            metadata,
            entries: entries.into_iter().map(Arc::new).collect(),
        }
    }
}
