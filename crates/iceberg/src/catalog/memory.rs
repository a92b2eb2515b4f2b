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

//! This module contains memory metadata store implementation.

use futures::lock::Mutex;

use super::{MetadataLocation, MetadataStore, SwapReceipt, VersionedMetadata};
use crate::io::FileIO;
use crate::spec::TableMetadata;
use crate::{Error, ErrorKind, Result};

/// Metadata store that keeps the pointer to the current metadata file in memory.
///
/// Metadata files themselves are written through the [`FileIO`], so they can be read by anyone
/// sharing it.
#[derive(Debug)]
pub struct MemoryMetadataStore {
    file_io: FileIO,
    current: Mutex<MetadataLocation>,
}

impl MemoryMetadataStore {
    /// Writes the first version of a table's metadata and creates a store pointing at it.
    pub async fn create(file_io: FileIO, metadata: &TableMetadata) -> Result<Self> {
        let location = MetadataLocation::new_with_table_location(metadata.location());
        metadata.write_to(&file_io, &location.to_string()).await?;

        Ok(Self {
            file_io,
            current: Mutex::new(location),
        })
    }

    /// Creates a store pointing at an existing metadata file.
    pub fn new(file_io: FileIO, current: MetadataLocation) -> Self {
        Self {
            file_io,
            current: Mutex::new(current),
        }
    }

    /// The [`FileIO`] metadata files are written with.
    pub fn file_io(&self) -> &FileIO {
        &self.file_io
    }
}

#[async_trait::async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn load(&self) -> Result<VersionedMetadata> {
        let location = self.current.lock().await.clone();
        let metadata = TableMetadata::read_from(&self.file_io, &location.to_string()).await?;

        Ok(VersionedMetadata::new(metadata, location))
    }

    async fn perform_swap(
        &self,
        base: &MetadataLocation,
        metadata: TableMetadata,
    ) -> Result<SwapReceipt> {
        let mut current = self.current.lock().await;
        if *current != *base {
            return Err(Error::new(
                ErrorKind::CatalogCommitConflicts,
                "Cannot commit: the table was updated by another writer",
            )
            .with_context("expected", base.to_string())
            .with_context("found", current.to_string())
            .with_retryable(true));
        }

        let next = current.with_next_version();
        metadata.write_to(&self.file_io, &next.to_string()).await?;
        *current = next.clone();

        Ok(SwapReceipt::new(next, metadata))
    }

    async fn report_outcome(&self, receipt: SwapReceipt) -> Result<VersionedMetadata> {
        Ok(receipt.into())
    }
}
