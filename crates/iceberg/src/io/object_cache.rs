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

use crate::io::FileIO;
use crate::spec::{FormatVersion, Manifest, ManifestFile, ManifestList, SnapshotRef, TableMetadata};
use crate::{Error, ErrorKind, Result};

const DEFAULT_CACHE_SIZE_BYTES: u64 = 32 * 1024 * 1024; // 32MB

#[derive(Clone, Debug)]
pub(crate) enum CachedItem {
    ManifestList(Arc<ManifestList>),
    Manifest(Arc<Manifest>),
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub(crate) enum CachedObjectKey {
    ManifestList((String, FormatVersion)),
    Manifest(String),
}

/// Caches metadata objects deserialized from immutable files
#[derive(Clone, Debug)]
pub struct ObjectCache {
    cache: moka::future::Cache<CachedObjectKey, CachedItem>,
    file_io: FileIO,
    cache_disabled: bool,
}

impl ObjectCache {
    /// Creates a new [`ObjectCache`]
    /// with the default cache size
    pub fn new(file_io: FileIO) -> Self {
        Self::new_with_capacity(file_io, DEFAULT_CACHE_SIZE_BYTES)
    }

    /// Creates a new [`ObjectCache`]
    /// with a specific cache size
    pub fn new_with_capacity(file_io: FileIO, cache_size_bytes: u64) -> Self {
        if cache_size_bytes == 0 {
            Self::with_disabled_cache(file_io)
        } else {
            Self {
                cache: moka::future::Cache::builder()
                    .weigher(|_, val: &CachedItem| match val {
                        CachedItem::ManifestList(item) => {
                            item.entries().len() * size_of::<ManifestFile>()
                        }
                        CachedItem::Manifest(item) => {
                            size_of::<Manifest>() + item.entries().len() * 256
                        }
                    }
                    .try_into()
                    .unwrap_or(u32::MAX))
                    .max_capacity(cache_size_bytes)
                    .build(),
                file_io,
                cache_disabled: false,
            }
        }
    }

    /// Creates a new [`ObjectCache`]
    /// with caching disabled
    pub fn with_disabled_cache(file_io: FileIO) -> Self {
        Self {
            cache: moka::future::Cache::new(0),
            file_io,
            cache_disabled: true,
        }
    }

    /// The [`FileIO`] objects are read through.
    pub fn file_io(&self) -> &FileIO {
        &self.file_io
    }

    /// Retrieves an Arc [`Manifest`] from the cache
    /// or retrieves one from FileIO and parses it if not present
    pub async fn get_manifest(&self, manifest_file: &ManifestFile) -> Result<Arc<Manifest>> {
        if self.cache_disabled {
            return manifest_file
                .load_manifest(&self.file_io)
                .await
                .map(Arc::new);
        }

        let key = CachedObjectKey::Manifest(manifest_file.manifest_path.clone());

        let cache_entry = self
            .cache
            .entry_by_ref(&key)
            .or_try_insert_with(self.fetch_and_parse_manifest(manifest_file))
            .await
            .map_err(|err| {
                Arc::try_unwrap(err).unwrap_or_else(|err| {
                    Error::new(
                        ErrorKind::Unexpected,
                        format!("Failed to load manifest {}", manifest_file.manifest_path),
                    )
                    .with_source(err)
                })
            })?
            .into_value();

        match cache_entry {
            CachedItem::Manifest(arc_manifest) => Ok(arc_manifest),
            _ => Err(Error::new(
                ErrorKind::Unexpected,
                format!("cached object for key '{key:?}' is not a Manifest"),
            )),
        }
    }

    /// Retrieves an Arc [`ManifestList`] from the cache
    /// or retrieves one from FileIO and parses it if not present
    pub async fn get_manifest_list(
        &self,
        snapshot: &SnapshotRef,
        table_metadata: &TableMetadata,
    ) -> Result<Arc<ManifestList>> {
        if self.cache_disabled {
            return snapshot
                .load_manifest_list(&self.file_io, table_metadata)
                .await
                .map(Arc::new);
        }

        let key = CachedObjectKey::ManifestList((
            snapshot.manifest_list().to_string(),
            table_metadata.format_version(),
        ));
        let cache_entry = self
            .cache
            .entry_by_ref(&key)
            .or_try_insert_with(self.fetch_and_parse_manifest_list(snapshot, table_metadata))
            .await
            .map_err(|err| {
                Arc::try_unwrap(err).unwrap_or_else(|err| {
                    Error::new(
                        ErrorKind::Unexpected,
                        "Failed to load manifest list in cache",
                    )
                    .with_source(err)
                })
            })?
            .into_value();

        match cache_entry {
            CachedItem::ManifestList(arc_manifest_list) => Ok(arc_manifest_list),
            _ => Err(Error::new(
                ErrorKind::Unexpected,
                format!("cached object for path '{key:?}' is not a manifest list"),
            )),
        }
    }

    async fn fetch_and_parse_manifest(&self, manifest_file: &ManifestFile) -> Result<CachedItem> {
        let manifest = manifest_file.load_manifest(&self.file_io).await?;

        Ok(CachedItem::Manifest(Arc::new(manifest)))
    }

    async fn fetch_and_parse_manifest_list(
        &self,
        snapshot: &SnapshotRef,
        table_metadata: &TableMetadata,
    ) -> Result<CachedItem> {
        let manifest_list = snapshot
            .load_manifest_list(&self.file_io, table_metadata)
            .await?;

        Ok(CachedItem::ManifestList(Arc::new(manifest_list)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::io::FileIOBuilder;
    use crate::spec::{
        DataFileBuilder, DataFileFormat, ManifestEntry, ManifestStatus, ManifestWriterBuilder,
        NestedField, PartitionSpec, PrimitiveType, Schema, Struct,
    };

    async fn write_manifest(file_io: &FileIO, path: &str) -> ManifestFile {
        let schema = Schema::builder()
            .with_fields(vec![NestedField::required(1, "id", PrimitiveType::Long).into()])
            .build()
            .unwrap();
        let mut writer = ManifestWriterBuilder::new(
            file_io.new_output(path).unwrap(),
            Some(1),
            None,
            Arc::new(schema),
            PartitionSpec::unpartition_spec(),
        )
        .build_v2_data();
        writer
            .add_entry(
                ManifestEntry::builder()
                    .status(ManifestStatus::Added)
                    .data_file(
                        DataFileBuilder::default()
                            .file_path("memory:/t/data/a.parquet")
                            .file_format(DataFileFormat::Parquet)
                            .partition(Struct::empty())
                            .record_count(1)
                            .file_size_in_bytes(10)
                            .build()
                            .unwrap(),
                    )
                    .build(),
            )
            .unwrap();
        let mut manifest_file = writer.write_manifest_file().await.unwrap();
        manifest_file.sequence_number = 1;
        manifest_file.min_sequence_number = 1;
        manifest_file
    }

    #[tokio::test]
    async fn test_get_manifest_is_served_from_cache() {
        let file_io = FileIOBuilder::new("memory").build().unwrap();
        let manifest_file = write_manifest(&file_io, "memory:/t/metadata/m0.json").await;
        let cache = ObjectCache::new(file_io.clone());

        let first = cache.get_manifest(&manifest_file).await.unwrap();
        assert_eq!(first.entries().len(), 1);
        assert_eq!(first.entries()[0].sequence_number(), Some(1));

        file_io.delete(&manifest_file.manifest_path).await.unwrap();
        let second = cache.get_manifest(&manifest_file).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_disabled_cache_reads_through() {
        let file_io = FileIOBuilder::new("memory").build().unwrap();
        let manifest_file = write_manifest(&file_io, "memory:/t/metadata/m1.json").await;
        let cache = ObjectCache::new_with_capacity(file_io.clone(), 0);

        assert_eq!(cache.get_manifest(&manifest_file).await.unwrap().entries().len(), 1);

        file_io.delete(&manifest_file.manifest_path).await.unwrap();
        assert!(cache.get_manifest(&manifest_file).await.is_err());
    }

    #[tokio::test]
    async fn test_cache_does_not_keep_failures() {
        let file_io = FileIOBuilder::new("memory").build().unwrap();
        let cache = ObjectCache::new(file_io.clone());
        let mut manifest_file = write_manifest(&file_io, "memory:/t/metadata/m2.json").await;
        manifest_file.manifest_path = "memory:/t/metadata/missing.json".to_string();

        assert!(cache.get_manifest(&manifest_file).await.is_err());

        let written = write_manifest(&file_io, "memory:/t/metadata/missing.json").await;
        assert_eq!(written.manifest_path, manifest_file.manifest_path);
        assert!(cache.get_manifest(&written).await.is_ok());
    }
}
