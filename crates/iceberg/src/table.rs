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

//! Table API for Apache Iceberg

use std::sync::Arc;

use crate::catalog::{MetadataLocation, MetadataStore, VersionedMetadata};
use crate::io::{FileIO, ObjectCache};
use crate::spec::{TableMetadata, TableMetadataRef};
use crate::{Error, ErrorKind, Result};

/// Builder to create a [`Table`].
pub struct TableBuilder {
    file_io: Option<FileIO>,
    metadata_location: Option<MetadataLocation>,
    metadata: Option<TableMetadataRef>,
    disable_cache: bool,
    cache_size_bytes: Option<u64>,
}

impl TableBuilder {
    pub(crate) fn new() -> Self {
        Self {
            file_io: None,
            metadata_location: None,
            metadata: None,
            disable_cache: false,
            cache_size_bytes: None,
        }
    }

    /// required - sets the necessary FileIO to use for the table
    pub fn file_io(mut self, file_io: FileIO) -> Self {
        self.file_io = Some(file_io);
        self
    }

    /// required - sets the location of the metadata file the table was read from
    pub fn metadata_location(mut self, metadata_location: MetadataLocation) -> Self {
        self.metadata_location = Some(metadata_location);
        self
    }

    /// required - passes in the TableMetadata to use for the Table
    pub fn metadata<T: Into<TableMetadataRef>>(mut self, metadata: T) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// specifies if the Table's manifest cache will be disabled,
    /// so that reads of Manifests and ManifestLists will never
    /// get cached.
    pub fn disable_cache(mut self) -> Self {
        self.disable_cache = true;
        self
    }

    /// optionally set a non-default manifest cache size
    pub fn cache_size_bytes(mut self, cache_size_bytes: u64) -> Self {
        self.cache_size_bytes = Some(cache_size_bytes);
        self
    }

    /// build the Table
    pub fn build(self) -> Result<Table> {
        let Self {
            file_io,
            metadata_location,
            metadata,
            disable_cache,
            cache_size_bytes,
        } = self;

        let Some(file_io) = file_io else {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "FileIO must be provided with TableBuilder.file_io()",
            ));
        };

        let Some(metadata) = metadata else {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "TableMetadataRef must be provided with TableBuilder.metadata()",
            ));
        };

        let Some(metadata_location) = metadata_location else {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "MetadataLocation must be provided with TableBuilder.metadata_location()",
            ));
        };

        let object_cache = if disable_cache {
            Arc::new(ObjectCache::with_disabled_cache(file_io.clone()))
        } else if let Some(cache_size_bytes) = cache_size_bytes {
            Arc::new(ObjectCache::new_with_capacity(
                file_io.clone(),
                cache_size_bytes,
            ))
        } else {
            Arc::new(ObjectCache::new(file_io.clone()))
        };

        Ok(Table {
            file_io,
            metadata_location,
            metadata,
            object_cache,
        })
    }
}

/// A table: one version of its metadata plus the means to read the files it references.
///
/// A `Table` value never changes. Committing a [`Transaction`](crate::transaction::Transaction)
/// returns a new `Table` for the new version.
#[derive(Debug, Clone)]
pub struct Table {
    file_io: FileIO,
    metadata_location: MetadataLocation,
    metadata: TableMetadataRef,
    object_cache: Arc<ObjectCache>,
}

impl Table {
    /// Returns a TableBuilder to build a table
    pub fn builder() -> TableBuilder {
        TableBuilder::new()
    }

    /// Loads the current version of a table from its metadata store.
    pub async fn load(store: &dyn MetadataStore, file_io: FileIO) -> Result<Table> {
        let versioned = store.load().await?;
        Table::builder()
            .file_io(file_io)
            .metadata_location(versioned.location().clone())
            .metadata(versioned.metadata_ref())
            .build()
    }

    /// Returns a table for another version of the same table.
    ///
    /// The file io and manifest cache are shared with `self`.
    pub fn with_versioned(mut self, versioned: VersionedMetadata) -> Self {
        self.metadata_location = versioned.location().clone();
        self.metadata = versioned.metadata_ref();
        self
    }

    pub(crate) fn with_metadata(mut self, metadata: TableMetadataRef) -> Self {
        self.metadata = metadata;
        self
    }

    /// Reloads the table from its metadata store.
    pub async fn refresh(self, store: &dyn MetadataStore) -> Result<Self> {
        let versioned = store.load().await?;
        Ok(self.with_versioned(versioned))
    }

    /// Returns current metadata.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Returns current metadata ref.
    pub fn metadata_ref(&self) -> TableMetadataRef {
        self.metadata.clone()
    }

    /// Returns current metadata location, the version token used to commit on top of it.
    pub fn metadata_location(&self) -> &MetadataLocation {
        &self.metadata_location
    }

    /// Returns file io used in this table.
    pub fn file_io(&self) -> &FileIO {
        &self.file_io
    }

    /// Returns this table's object cache
    pub fn object_cache(&self) -> Arc<ObjectCache> {
        self.object_cache.clone()
    }
}
