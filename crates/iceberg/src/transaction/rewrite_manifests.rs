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

//! Compaction of the manifests of the current snapshot.

use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::join_all;
use futures::lock::Mutex;
use itertools::Itertools;
use uuid::Uuid;

use crate::error::Result;
use crate::spec::{
    FormatVersion, Manifest, ManifestContentType, ManifestFile, ManifestList, Operation,
};
use crate::table::Table;
use crate::transaction::snapshot::SnapshotProducer;
use crate::transaction::{ActionCommit, Transaction, TransactionAction};
use crate::{Error, ErrorKind, MetadataStore};

/// Created manifest count during rewrite manifest action.
pub const CREATED_MANIFESTS_COUNT: &str = "manifests-created";
/// Kept manifest count during rewrite manifest action.
pub const KEPT_MANIFESTS_COUNT: &str = "manifests-kept";
/// Count of manifest been rewrite and delete during rewrite manifest action.
pub const REPLACED_MANIFESTS_COUNT: &str = "manifests-replaced";
/// Count of manifest entry been process during rewrite manifest action.
pub const PROCESSED_ENTRY_COUNT: &str = "entries-processed";

type ManifestPredicate = Arc<dyn Fn(&ManifestFile) -> bool + Send + Sync>;

/// Manifests written to replace a group of manifests of the same partition spec.
#[derive(Debug, Clone)]
struct RewrittenCluster {
    sources: Vec<ManifestFile>,
    outputs: Vec<ManifestFile>,
}

/// What a commit attempt rewrote, kept for the following attempts and for the result.
#[derive(Debug, Clone, Default)]
struct RewriteState {
    clusters: Vec<RewrittenCluster>,
    entries_processed: u64,
}

impl RewriteState {
    fn rewritten_manifests(&self) -> Vec<ManifestFile> {
        self.clusters
            .iter()
            .flat_map(|c| c.sources.iter().cloned())
            .collect()
    }

    fn added_manifests(&self) -> Vec<ManifestFile> {
        self.clusters
            .iter()
            .flat_map(|c| c.outputs.iter().cloned())
            .collect()
    }
}

/// The outcome of [`RewriteManifestsAction::execute`].
#[derive(Debug, Clone)]
pub struct RewriteManifestsResult {
    /// The table after the rewrite. It is the unchanged input table if nothing was rewritten.
    pub table: Table,
    /// Manifests of the previous snapshot that were replaced.
    pub rewritten_manifests: Vec<ManifestFile>,
    /// Manifests that replaced them.
    pub added_manifests: Vec<ManifestFile>,
}

/// Action compacting the data manifests of the current snapshot.
///
/// Selected manifests are grouped by partition spec and packed greedily into clusters of about
/// `target_manifest_size_bytes`. The entries of every cluster are copied into new manifests,
/// live entries as `EXISTING` and deleted ones as `DELETED`, keeping their snapshot id and
/// sequence numbers. The new snapshot lists the new manifests where the first manifest of their
/// cluster was, with every other manifest left in place.
///
/// Manifests are written once. When the commit has to be retried, the written manifests are
/// reused as long as every manifest they replace is still part of the current snapshot;
/// otherwise the rewrite is aborted.
pub struct RewriteManifestsAction {
    snapshot_id: i64,
    commit_uuid: Uuid,
    attempt: AtomicU64,
    predicate: Option<ManifestPredicate>,
    target_manifest_size_bytes: Option<u64>,
    use_caching: bool,
    staging_location: Option<String>,
    snapshot_id_inheritance_enabled: Option<bool>,
    snapshot_properties: HashMap<String, String>,
    state: Mutex<Option<RewriteState>>,
}

impl Debug for RewriteManifestsAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteManifestsAction")
            .field("snapshot_id", &self.snapshot_id)
            .field("commit_uuid", &self.commit_uuid)
            .field("target_manifest_size_bytes", &self.target_manifest_size_bytes)
            .field("use_caching", &self.use_caching)
            .field("staging_location", &self.staging_location)
            .finish_non_exhaustive()
    }
}

impl RewriteManifestsAction {
    pub(crate) fn new(snapshot_id: i64) -> Self {
        Self {
            snapshot_id,
            commit_uuid: Uuid::new_v4(),
            attempt: AtomicU64::new(0),
            predicate: None,
            target_manifest_size_bytes: None,
            use_caching: false,
            staging_location: None,
            snapshot_id_inheritance_enabled: None,
            snapshot_properties: HashMap::new(),
            state: Mutex::new(None),
        }
    }

    /// Only rewrite the data manifests for which `predicate` returns true. By default every
    /// data manifest is rewritten.
    pub fn rewrite_if(
        mut self,
        predicate: impl Fn(&ManifestFile) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Target size of the written manifests. Defaults to the
    /// `commit.manifest.target-size-bytes` table property. Must be positive, a zero target
    /// fails the rewrite with [`ErrorKind::DataInvalid`].
    pub fn target_manifest_size_bytes(mut self, target_manifest_size_bytes: u64) -> Self {
        self.target_manifest_size_bytes = Some(target_manifest_size_bytes);
        self
    }

    /// Read manifests through the table's object cache.
    pub fn use_caching(mut self, use_caching: bool) -> Self {
        self.use_caching = use_caching;
        self
    }

    /// Directory the new manifests are staged in when they can't inherit the snapshot id, that
    /// is for v1 tables without snapshot id inheritance. Defaults to the metadata directory of
    /// the table.
    pub fn staging_location(mut self, staging_location: impl ToString) -> Self {
        self.staging_location = Some(staging_location.to_string());
        self
    }

    /// Overrides the `compatibility.snapshot-id-inheritance.enabled` table property.
    pub fn snapshot_id_inheritance_enabled(mut self, enabled: bool) -> Self {
        self.snapshot_id_inheritance_enabled = Some(enabled);
        self
    }

    /// Set snapshot summary properties.
    pub fn set_snapshot_properties(mut self, snapshot_properties: HashMap<String, String>) -> Self {
        self.snapshot_properties = snapshot_properties;
        self
    }

    /// Rewrites the manifests of `table` and commits the result to `store`.
    ///
    /// Manifests written for a rewrite that could not be committed are deleted again, unless
    /// the commit outcome is unknown.
    pub async fn execute(
        self,
        table: &Table,
        store: &dyn MetadataStore,
    ) -> Result<RewriteManifestsResult> {
        let action = Arc::new(self);
        let committed = Transaction::new(table)
            .with_action(action.clone())
            .commit(store)
            .await;
        let state = action.state.lock().await.take().unwrap_or_default();

        match committed {
            Ok(table) => Ok(RewriteManifestsResult {
                table,
                rewritten_manifests: state.rewritten_manifests(),
                added_manifests: state.added_manifests(),
            }),
            Err(err) if err.kind() == ErrorKind::CommitStateUnknown => Err(err),
            Err(err) => {
                for manifest in state.added_manifests() {
                    if let Err(delete_err) = table.file_io().delete(&manifest.manifest_path).await
                    {
                        tracing::warn!(
                            manifest = %manifest.manifest_path,
                            error = %delete_err,
                            "Failed to delete manifest of aborted rewrite"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    fn selected(&self, manifest: &ManifestFile) -> bool {
        manifest.content == ManifestContentType::Data
            && self.predicate.as_ref().is_none_or(|p| p(manifest))
    }

    async fn load_manifest_list(&self, table: &Table) -> Result<Option<Arc<ManifestList>>> {
        let Some(snapshot) = table.metadata().current_snapshot() else {
            return Ok(None);
        };
        let manifest_list = if self.use_caching {
            table
                .object_cache()
                .get_manifest_list(snapshot, table.metadata())
                .await?
        } else {
            Arc::new(
                snapshot
                    .load_manifest_list(table.file_io(), table.metadata())
                    .await?,
            )
        };
        Ok(Some(manifest_list))
    }

    async fn load_manifest(&self, table: &Table, manifest: &ManifestFile) -> Result<Arc<Manifest>> {
        if self.use_caching {
            table.object_cache().get_manifest(manifest).await
        } else {
            manifest.load_manifest(table.file_io()).await.map(Arc::new)
        }
    }

    /// Checks that the manifests rewritten by an earlier attempt are still current.
    fn validate_rewritten(state: &RewriteState, current: &[ManifestFile]) -> Result<()> {
        let current: HashMap<&str, &ManifestFile> = current
            .iter()
            .map(|m| (m.manifest_path.as_str(), m))
            .collect();
        let stale = state
            .clusters
            .iter()
            .flat_map(|c| c.sources.iter())
            .filter(|m| current.get(m.manifest_path.as_str()) != Some(m))
            .map(|m| m.manifest_path.as_str())
            .collect_vec();

        if !stale.is_empty() {
            return Err(Error::new(
                ErrorKind::CatalogCommitConflicts,
                "Manifest is missing from the current snapshot, it was rewritten or removed by a concurrent commit",
            )
            .with_context("manifest", stale.join(", ")));
        }
        Ok(())
    }

    /// Packs the manifests of one partition spec into clusters of about `target` bytes.
    fn cluster(manifests: Vec<ManifestFile>, target: u64) -> Vec<Vec<ManifestFile>> {
        let mut clusters = vec![];
        let mut current = vec![];
        let mut current_len = 0u64;
        for manifest in manifests {
            let len = manifest.manifest_length.max(0) as u64;
            if !current.is_empty() && current_len + len > target {
                clusters.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current_len += len;
            current.push(manifest);
        }
        if !current.is_empty() {
            clusters.push(current);
        }
        clusters
    }

    fn average_entry_size(manifests: &[ManifestFile]) -> u64 {
        let total_len: u64 = manifests
            .iter()
            .map(|m| m.manifest_length.max(0) as u64)
            .sum();
        let total_entries: u64 = manifests.iter().map(|m| m.entries_count()).sum();
        if total_entries == 0 {
            1
        } else {
            (total_len / total_entries).max(1)
        }
    }

    /// Copies the entries of a cluster into new manifests of at most about `target` bytes.
    async fn rewrite_cluster(
        &self,
        producer: &SnapshotProducer<'_>,
        sources: Vec<ManifestFile>,
        avg_entry_size: u64,
        target: u64,
        dir: Option<&str>,
        writer_snapshot_id: Option<i64>,
    ) -> Result<(RewrittenCluster, u64)> {
        let spec_id = sources[0].partition_spec_id;
        let mut outputs = vec![];
        let mut processed = 0u64;
        let mut writer = producer.new_manifest_writer(spec_id, dir, writer_snapshot_id)?;

        for source in &sources {
            let manifest = self.load_manifest(producer.table(), source).await?;
            for entry in manifest.entries() {
                let count = writer.entry_count() as u64;
                if count > 0 && (count + 1) * avg_entry_size > target {
                    let full = std::mem::replace(
                        &mut writer,
                        producer.new_manifest_writer(spec_id, dir, writer_snapshot_id)?,
                    );
                    outputs.push(full.write_manifest_file().await?);
                }
                writer.add_rewritten_entry(entry.as_ref().clone())?;
                processed += 1;
            }
        }
        if writer.entry_count() > 0 {
            outputs.push(writer.write_manifest_file().await?);
        }

        // The snapshot id is applied here for staged manifests, which were written without one.
        for output in &mut outputs {
            output.added_snapshot_id = producer.snapshot_id();
        }

        Ok((RewrittenCluster { sources, outputs }, processed))
    }

    async fn perform_rewrite(
        &self,
        producer: &SnapshotProducer<'_>,
        manifests: &[ManifestFile],
    ) -> Result<RewriteState> {
        let table = producer.table();
        let props = table.metadata().table_properties()?;
        let target = match self.target_manifest_size_bytes {
            Some(0) => {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "Invalid target manifest size: must be positive",
                ));
            }
            Some(target) => target,
            None => props.manifest_target_size_bytes,
        };
        let inheritance = self
            .snapshot_id_inheritance_enabled
            .unwrap_or(props.snapshot_id_inheritance_enabled);
        let needs_staging = table.metadata().format_version() == FormatVersion::V1 && !inheritance;

        let (dir, writer_snapshot_id) = if needs_staging {
            (self.staging_location.as_deref(), None)
        } else {
            (None, Some(self.snapshot_id))
        };
        let relocating = dir.is_some();

        let mut groups: Vec<(i32, Vec<ManifestFile>)> = vec![];
        for manifest in manifests.iter().filter(|m| self.selected(m)) {
            match groups
                .iter_mut()
                .find(|(spec_id, _)| *spec_id == manifest.partition_spec_id)
            {
                Some((_, group)) => group.push(manifest.clone()),
                None => groups.push((manifest.partition_spec_id, vec![manifest.clone()])),
            }
        }

        let mut jobs = vec![];
        for (_, group) in groups {
            let avg_entry_size = Self::average_entry_size(&group);
            for cluster in Self::cluster(group, target) {
                // A lone manifest that is small enough already only gets rewritten to move it.
                if cluster.len() == 1
                    && cluster[0].manifest_length.max(0) as u64 <= target
                    && !relocating
                {
                    continue;
                }
                jobs.push(self.rewrite_cluster(
                    producer,
                    cluster,
                    avg_entry_size,
                    target,
                    dir,
                    writer_snapshot_id,
                ));
            }
        }

        tracing::debug!(
            snapshot_id = self.snapshot_id,
            clusters = jobs.len(),
            target_manifest_size_bytes = target,
            "Rewriting manifests"
        );

        let mut state = RewriteState::default();
        let mut first_err = None;
        for result in join_all(jobs).await {
            match result {
                Ok((cluster, processed)) => {
                    state.entries_processed += processed;
                    state.clusters.push(cluster);
                }
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        // Outputs of the clusters that did succeed are not recorded anywhere else.
        if let Some(err) = first_err {
            for manifest in state.added_manifests() {
                if let Err(delete_err) = table.file_io().delete(&manifest.manifest_path).await {
                    tracing::warn!(
                        manifest = %manifest.manifest_path,
                        error = %delete_err,
                        "Failed to delete manifest of failed rewrite"
                    );
                }
            }
            return Err(err);
        }
        Ok(state)
    }

    #[inline]
    fn active_file_count<'t>(manifest_iter: impl Iterator<Item = &'t ManifestFile>) -> Result<u64> {
        let mut count = 0;
        for manifest in manifest_iter {
            count += manifest.added_files_count.ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    "Manifest file should have added files count",
                )
                .with_context("manifest", &manifest.manifest_path)
            })? as u64;
            count += manifest.existing_files_count.ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    "Manifest file should have existing files count",
                )
                .with_context("manifest", &manifest.manifest_path)
            })? as u64;
        }
        Ok(count)
    }

    fn validate_files_counts(state: &RewriteState) -> Result<()> {
        for cluster in &state.clusters {
            let created = Self::active_file_count(cluster.outputs.iter())?;
            let replaced = Self::active_file_count(cluster.sources.iter())?;
            if created != replaced {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "The number of files in the new manifest files should be equal to the number of files in the replaced manifest files",
                )
                .with_context("created", created.to_string())
                .with_context("replaced", replaced.to_string()));
            }
        }
        Ok(())
    }

    /// Replaces the sources of every cluster by its outputs, at the position of the first
    /// source.
    fn new_manifests(state: &RewriteState, current: &[ManifestFile]) -> (Vec<ManifestFile>, usize) {
        let mut first_sources: HashMap<&str, &RewrittenCluster> = HashMap::new();
        let mut replaced: HashSet<&str> = HashSet::new();
        for cluster in &state.clusters {
            if let Some(first) = cluster.sources.first() {
                first_sources.insert(first.manifest_path.as_str(), cluster);
            }
            replaced.extend(cluster.sources.iter().map(|m| m.manifest_path.as_str()));
        }

        let mut manifests = vec![];
        let mut kept = 0;
        for manifest in current {
            let path = manifest.manifest_path.as_str();
            if let Some(cluster) = first_sources.get(path) {
                manifests.extend(cluster.outputs.iter().cloned());
            } else if !replaced.contains(path) {
                manifests.push(manifest.clone());
                kept += 1;
            }
        }
        (manifests, kept)
    }

    fn summary(state: &RewriteState, kept: usize) -> HashMap<String, String> {
        let mut summary = HashMap::new();
        summary.insert(
            CREATED_MANIFESTS_COUNT.to_string(),
            state.added_manifests().len().to_string(),
        );
        summary.insert(KEPT_MANIFESTS_COUNT.to_string(), kept.to_string());
        summary.insert(
            REPLACED_MANIFESTS_COUNT.to_string(),
            state.rewritten_manifests().len().to_string(),
        );
        summary.insert(
            PROCESSED_ENTRY_COUNT.to_string(),
            state.entries_processed.to_string(),
        );
        summary
    }
}

#[async_trait]
impl TransactionAction for RewriteManifestsAction {
    async fn commit(self: Arc<Self>, table: &Table) -> Result<ActionCommit> {
        let mut state_guard = self.state.lock().await;

        let Some(manifest_list) = self.load_manifest_list(table).await? else {
            // Do nothing for empty snapshot
            *state_guard = Some(RewriteState::default());
            return Ok(ActionCommit::default());
        };
        let current = manifest_list.entries();

        let producer = SnapshotProducer::new(
            table,
            self.snapshot_id,
            self.commit_uuid,
            self.attempt.fetch_add(1, Ordering::Relaxed),
            self.snapshot_properties.clone(),
        );

        let state = match state_guard.as_ref() {
            Some(state) => {
                Self::validate_rewritten(state, current)?;
                tracing::debug!(
                    snapshot_id = self.snapshot_id,
                    "Reusing manifests rewritten by a previous attempt"
                );
                state.clone()
            }
            None => {
                let state = self.perform_rewrite(&producer, current).await?;
                *state_guard = Some(state.clone());
                state
            }
        };

        if state.clusters.is_empty() {
            return Ok(ActionCommit::default());
        }

        Self::validate_files_counts(&state)?;

        let (manifests, kept) = Self::new_manifests(&state, current);
        let summary = Self::summary(&state, kept);

        tracing::info!(
            snapshot_id = self.snapshot_id,
            manifests_replaced = state.rewritten_manifests().len(),
            manifests_created = state.added_manifests().len(),
            manifests_kept = kept,
            "Committing rewritten manifests"
        );

        producer.commit(Operation::Replace, summary, manifests).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use itertools::iproduct;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use uuid::Uuid;

    use super::{
        CREATED_MANIFESTS_COUNT, KEPT_MANIFESTS_COUNT, PROCESSED_ENTRY_COUNT,
        REPLACED_MANIFESTS_COUNT,
    };
    use crate::catalog::{
        MemoryMetadataStore, MetadataLocation, SwapReceipt, VersionedMetadata,
    };
    use crate::io::FileIOBuilder;
    use crate::spec::{
        DataFile, DataFileBuilder, DataFileFormat, FormatVersion, ManifestEntry, ManifestFile,
        ManifestStatus, NestedField, Operation, PrimitiveLiteral, PrimitiveType, Schema, Struct,
        TableMetadata, TableMetadataBuilder, TableProperties, Transform, UnboundPartitionSpec,
    };
    use crate::table::Table;
    use crate::transaction::action::ApplyTransactionAction;
    use crate::transaction::snapshot::SnapshotProducer;
    use crate::transaction::tests::make_table;
    use crate::transaction::{ActionCommit, Transaction, TransactionAction};
    use crate::{Error, ErrorKind, MetadataStore, Result};

    const STAGING_LOCATION: &str = "memory:/warehouse/staging";
    const METADATA_LOCATION: &str = "memory:/warehouse/t/metadata/";

    fn configurations() -> impl Iterator<Item = (FormatVersion, bool, bool)> {
        iproduct!([FormatVersion::V1, FormatVersion::V2], [false, true], [
            false, true
        ])
    }

    async fn make_configured_table(
        format_version: FormatVersion,
        snapshot_id_inheritance: bool,
        spec: UnboundPartitionSpec,
    ) -> (Table, MemoryMetadataStore) {
        make_table(format_version, spec, [(
            TableProperties::PROPERTY_SNAPSHOT_ID_INHERITANCE_ENABLED,
            if snapshot_id_inheritance {
                "true"
            } else {
                "false"
            },
        )])
        .await
    }

    fn data_file(path: &str, partition: Struct, spec_id: i32) -> DataFile {
        DataFileBuilder::default()
            .file_path(format!("memory:/warehouse/t/data/{path}"))
            .file_format(DataFileFormat::Parquet)
            .file_size_in_bytes(10)
            .record_count(1)
            .partition(partition)
            .partition_spec_id(spec_id)
            .build()
            .unwrap()
    }

    fn unpartitioned_files(prefix: &str, count: usize) -> Vec<DataFile> {
        (0..count)
            .map(|i| data_file(&format!("{prefix}-{i}.parquet"), Struct::empty(), 0))
            .collect()
    }

    async fn append(table: &Table, store: &dyn MetadataStore, files: Vec<DataFile>) -> Table {
        let tx = Transaction::new(table);
        let tx = tx.fast_append().add_data_files(files).apply(tx).unwrap();
        tx.commit(store).await.unwrap()
    }

    async fn current_manifests(table: &Table) -> Vec<ManifestFile> {
        match table.metadata().current_snapshot() {
            Some(snapshot) => snapshot
                .load_manifest_list(table.file_io(), table.metadata())
                .await
                .unwrap()
                .entries()
                .to_vec(),
            None => vec![],
        }
    }

    async fn entries(table: &Table, manifests: &[ManifestFile]) -> Vec<ManifestEntry> {
        let mut entries = vec![];
        for manifest in manifests {
            let manifest = manifest.load_manifest(table.file_io()).await.unwrap();
            entries.extend(manifest.entries().iter().map(|e| e.as_ref().clone()));
        }
        entries
    }

    type Provenance = HashMap<String, (Option<i64>, Option<i64>, Option<i64>)>;

    fn provenance(entries: &[ManifestEntry]) -> Provenance {
        entries
            .iter()
            .map(|e| {
                (
                    e.file_path().to_string(),
                    (
                        e.snapshot_id(),
                        e.sequence_number(),
                        e.file_sequence_number(),
                    ),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rewrite_if_false_produces_no_snapshot() {
        for (format_version, inheritance, caching) in configurations() {
            let (table, store) =
                make_configured_table(format_version, inheritance, UnboundPartitionSpec::new())
                    .await;
            let table = append(&table, &store, unpartitioned_files("a", 2)).await;
            let table = append(&table, &store, unpartitioned_files("b", 2)).await;

            let result = Transaction::new(&table)
                .rewrite_manifests()
                .rewrite_if(|_| false)
                .use_caching(caching)
                .execute(&table, &store)
                .await
                .unwrap();

            assert!(result.rewritten_manifests.is_empty());
            assert!(result.added_manifests.is_empty());
            assert_eq!(
                result.table.metadata().current_snapshot_id(),
                table.metadata().current_snapshot_id()
            );
            assert_eq!(store.load().await.unwrap().location().version(), 2);
        }
    }

    #[tokio::test]
    async fn test_rewrite_table_without_snapshot() {
        let (table, store) =
            make_configured_table(FormatVersion::V2, false, UnboundPartitionSpec::new()).await;
        let result = Transaction::new(&table)
            .rewrite_manifests()
            .execute(&table, &store)
            .await
            .unwrap();
        assert!(result.rewritten_manifests.is_empty());
        assert!(result.table.metadata().current_snapshot().is_none());
        assert_eq!(store.load().await.unwrap().location().version(), 0);
    }

    #[tokio::test]
    async fn test_rewrite_small_manifests_unpartitioned_table() {
        for (format_version, inheritance, caching) in configurations() {
            let (table, store) =
                make_configured_table(format_version, inheritance, UnboundPartitionSpec::new())
                    .await;
            let table = append(&table, &store, unpartitioned_files("a", 2)).await;
            let table = append(&table, &store, unpartitioned_files("b", 2)).await;

            let before = current_manifests(&table).await;
            assert_eq!(before.len(), 2);
            let expected = provenance(&entries(&table, &before).await);

            let result = Transaction::new(&table)
                .rewrite_manifests()
                .use_caching(caching)
                .staging_location(STAGING_LOCATION)
                .execute(&table, &store)
                .await
                .unwrap();

            assert_eq!(result.rewritten_manifests, before);
            assert_eq!(result.added_manifests.len(), 1);
            let added = &result.added_manifests[0];
            assert_eq!(added.existing_files_count, Some(4));
            assert!(!added.has_added_files());
            assert!(!added.has_deleted_files());

            let staged = format_version == FormatVersion::V1 && !inheritance;
            let expected_prefix = if staged {
                STAGING_LOCATION
            } else {
                METADATA_LOCATION
            };
            assert!(
                added.manifest_path.starts_with(expected_prefix),
                "{} should start with {expected_prefix}",
                added.manifest_path
            );

            let table = result.table;
            let snapshot = table.metadata().current_snapshot().unwrap();
            assert_eq!(snapshot.summary().operation, Operation::Replace);
            let summary = &snapshot.summary().additional_properties;
            assert_eq!(summary[CREATED_MANIFESTS_COUNT], "1");
            assert_eq!(summary[KEPT_MANIFESTS_COUNT], "0");
            assert_eq!(summary[REPLACED_MANIFESTS_COUNT], "2");
            assert_eq!(summary[PROCESSED_ENTRY_COUNT], "4");

            let after = current_manifests(&table).await;
            assert_eq!(after.len(), 1);
            assert_eq!(after[0].manifest_path, added.manifest_path);
            assert_eq!(after[0].added_snapshot_id, snapshot.snapshot_id());

            let after_entries = entries(&table, &after).await;
            assert!(
                after_entries
                    .iter()
                    .all(|e| e.status() == ManifestStatus::Existing)
            );
            assert_eq!(provenance(&after_entries), expected);
        }
    }

    #[tokio::test]
    async fn test_rewrite_partitioned_table_into_target_sized_manifests() {
        for (format_version, inheritance, caching) in configurations() {
            let spec =
                UnboundPartitionSpec::new().add_partition_field(3, "c3", Transform::Identity);
            let (mut table, store) =
                make_configured_table(format_version, inheritance, spec).await;
            for value in ["a", "b", "c", "d"] {
                let partition =
                    Struct::from_iter([Some(PrimitiveLiteral::String(value.to_string()))]);
                let files = (0..2)
                    .map(|i| data_file(&format!("{value}-{i}.parquet"), partition.clone(), 0))
                    .collect();
                table = append(&table, &store, files).await;
            }

            let before = current_manifests(&table).await;
            assert_eq!(before.len(), 4);
            let total_len: i64 = before.iter().map(|m| m.manifest_length).sum();
            let avg_entry_size = total_len as f64 / 8.0;
            let target = (1.05 * 4.0 * avg_entry_size) as u64;

            let result = Transaction::new(&table)
                .rewrite_manifests()
                .use_caching(caching)
                .target_manifest_size_bytes(target)
                .execute(&table, &store)
                .await
                .unwrap();

            assert_eq!(result.rewritten_manifests.len(), 4);
            assert_eq!(result.added_manifests.len(), 2);
            for added in &result.added_manifests {
                assert_eq!(added.existing_files_count, Some(4));
                assert!(!added.has_added_files());
                assert!(!added.has_deleted_files());
            }

            let after = current_manifests(&result.table).await;
            assert_eq!(after.len(), 2);
            assert_eq!(
                provenance(&entries(&result.table, &after).await),
                provenance(&entries(&table, &before).await)
            );
        }
    }

    #[tokio::test]
    async fn test_rewrite_selected_manifests() {
        let (table, store) =
            make_configured_table(FormatVersion::V2, false, UnboundPartitionSpec::new()).await;
        let table = append(&table, &store, unpartitioned_files("a", 1)).await;
        let table = append(&table, &store, unpartitioned_files("b", 1)).await;
        let table = append(&table, &store, unpartitioned_files("c", 1)).await;

        let before = current_manifests(&table).await;
        assert_eq!(before.len(), 3);
        let untouched = before[1].clone();
        let untouched_bytes = table
            .file_io()
            .new_input(&untouched.manifest_path)
            .unwrap()
            .read()
            .await
            .unwrap();

        let untouched_path = untouched.manifest_path.clone();
        let result = Transaction::new(&table)
            .rewrite_manifests()
            .rewrite_if(move |m| m.manifest_path != untouched_path)
            .execute(&table, &store)
            .await
            .unwrap();

        assert_eq!(result.rewritten_manifests, vec![
            before[0].clone(),
            before[2].clone()
        ]);
        assert_eq!(result.added_manifests.len(), 1);

        let after = current_manifests(&result.table).await;
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].manifest_path, result.added_manifests[0].manifest_path);
        assert_eq!(after[1], untouched);
        let bytes = result
            .table
            .file_io()
            .new_input(&untouched.manifest_path)
            .unwrap()
            .read()
            .await
            .unwrap();
        assert_eq!(bytes, untouched_bytes);

        let summary = &result
            .table
            .metadata()
            .current_snapshot()
            .unwrap()
            .summary()
            .additional_properties;
        assert_eq!(summary[KEPT_MANIFESTS_COUNT], "1");
    }

    #[tokio::test]
    async fn test_single_right_sized_manifest_is_kept() {
        let (table, store) =
            make_configured_table(FormatVersion::V2, false, UnboundPartitionSpec::new()).await;
        let table = append(&table, &store, unpartitioned_files("a", 3)).await;

        let result = Transaction::new(&table)
            .rewrite_manifests()
            .execute(&table, &store)
            .await
            .unwrap();
        assert!(result.rewritten_manifests.is_empty());
        assert_eq!(
            result.table.metadata().current_snapshot_id(),
            table.metadata().current_snapshot_id()
        );

        // Relocating to a staging location rewrites it anyway.
        let (table, store) =
            make_configured_table(FormatVersion::V1, false, UnboundPartitionSpec::new()).await;
        let table = append(&table, &store, unpartitioned_files("a", 3)).await;
        let result = Transaction::new(&table)
            .rewrite_manifests()
            .staging_location(STAGING_LOCATION)
            .execute(&table, &store)
            .await
            .unwrap();
        assert_eq!(result.rewritten_manifests.len(), 1);
        assert_eq!(result.added_manifests.len(), 1);
        assert!(
            result.added_manifests[0]
                .manifest_path
                .starts_with(STAGING_LOCATION)
        );
    }

    #[tokio::test]
    async fn test_large_manifest_is_split() {
        let (table, store) =
            make_configured_table(FormatVersion::V2, false, UnboundPartitionSpec::new()).await;
        let table = append(&table, &store, unpartitioned_files("a", 1000)).await;

        let before = current_manifests(&table).await;
        assert_eq!(before.len(), 1);
        let target = before[0].manifest_length as u64 / 2;

        let result = Transaction::new(&table)
            .rewrite_manifests()
            .target_manifest_size_bytes(target)
            .execute(&table, &store)
            .await
            .unwrap();

        assert_eq!(result.rewritten_manifests.len(), 1);
        assert!(result.added_manifests.len() >= 2);
        let total: u32 = result
            .added_manifests
            .iter()
            .map(|m| m.existing_files_count.unwrap())
            .sum();
        assert_eq!(total, 1000);

        let after = current_manifests(&result.table).await;
        assert_eq!(after.len(), result.added_manifests.len());
        assert_eq!(entries(&result.table, &after).await.len(), 1000);
    }

    #[tokio::test]
    async fn test_manifests_of_different_specs_are_not_merged() {
        let spec = UnboundPartitionSpec::new().add_partition_field(3, "c3", Transform::Identity);
        let (table, store) = make_configured_table(FormatVersion::V2, false, spec).await;
        let old_partition = Struct::from_iter([Some(PrimitiveLiteral::String("x".to_string()))]);
        let table = append(&table, &store, vec![data_file(
            "old-1.parquet",
            old_partition.clone(),
            0,
        )])
        .await;
        let table = append(&table, &store, vec![data_file(
            "old-2.parquet",
            old_partition,
            0,
        )])
        .await;

        let tx = Transaction::new(&table);
        let tx = tx
            .update_partition_spec()
            .add_field("id", "id_bucket", Transform::Bucket(8))
            .apply(tx)
            .unwrap();
        let table = tx.commit(&store).await.unwrap();
        assert_eq!(table.metadata().default_partition_spec_id(), 1);

        let new_partition = Struct::from_iter([
            Some(PrimitiveLiteral::String("x".to_string())),
            Some(PrimitiveLiteral::Int(3)),
        ]);
        let table = append(&table, &store, vec![data_file(
            "new-1.parquet",
            new_partition.clone(),
            1,
        )])
        .await;
        let table = append(&table, &store, vec![data_file(
            "new-2.parquet",
            new_partition,
            1,
        )])
        .await;

        let result = Transaction::new(&table)
            .rewrite_manifests()
            .execute(&table, &store)
            .await
            .unwrap();

        assert_eq!(result.rewritten_manifests.len(), 4);
        assert_eq!(result.added_manifests.len(), 2);
        let mut spec_ids: Vec<_> = result
            .added_manifests
            .iter()
            .map(|m| m.partition_spec_id)
            .collect();
        spec_ids.sort();
        assert_eq!(spec_ids, vec![0, 1]);

        for manifest in current_manifests(&result.table).await {
            let entries = entries(&result.table, std::slice::from_ref(&manifest)).await;
            assert_eq!(entries.len(), 2);
            assert!(
                entries
                    .iter()
                    .all(|e| e.data_file().partition_spec_id() == manifest.partition_spec_id)
            );
        }
    }

    #[tokio::test]
    async fn test_zero_target_size_is_rejected() {
        let (table, store) =
            make_configured_table(FormatVersion::V2, false, UnboundPartitionSpec::new()).await;
        let table = append(&table, &store, unpartitioned_files("a", 2)).await;
        let table = append(&table, &store, unpartitioned_files("b", 2)).await;

        let err = Transaction::new(&table)
            .rewrite_manifests()
            .target_manifest_size_bytes(0)
            .execute(&table, &store)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
        assert!(!err.retryable());

        let table = table.refresh(&store).await.unwrap();
        assert_eq!(table.metadata_location().version(), 2);
        assert_eq!(current_manifests(&table).await.len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_manifest_fails_without_commit() {
        let (mut table, store) =
            make_configured_table(FormatVersion::V2, false, UnboundPartitionSpec::new()).await;
        for prefix in ["a", "b", "c", "d"] {
            table = append(&table, &store, unpartitioned_files(prefix, 2)).await;
        }
        let before = current_manifests(&table).await;
        assert_eq!(before.len(), 4);
        let snapshot_id = table.metadata().current_snapshot_id();

        // Two clusters of two manifests each, the second one can't be read.
        let total_len: i64 = before.iter().map(|m| m.manifest_length).sum();
        let target = (1.05 * total_len as f64 / 2.0) as u64;
        table
            .file_io()
            .delete(&before[3].manifest_path)
            .await
            .unwrap();

        let action = Transaction::new(&table)
            .rewrite_manifests()
            .target_manifest_size_bytes(target);
        let commit_uuid = action.commit_uuid;
        let err = action.execute(&table, &store).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(!err.retryable());

        let table = table.refresh(&store).await.unwrap();
        assert_eq!(table.metadata_location().version(), 4);
        assert_eq!(table.metadata().current_snapshot_id(), snapshot_id);
        assert_eq!(current_manifests(&table).await, before);
        for n in 0..4 {
            let path = format!("{METADATA_LOCATION}{commit_uuid}-m{n}.json");
            assert!(
                !table.file_io().exists(&path).await.unwrap(),
                "{path} should have been deleted"
            );
        }
    }

    /// Marks one data file as deleted in the manifest that tracks it.
    struct DeleteFileAction {
        snapshot_id: i64,
        file_path: String,
    }

    #[async_trait]
    impl TransactionAction for DeleteFileAction {
        async fn commit(self: Arc<Self>, table: &Table) -> Result<ActionCommit> {
            let producer =
                SnapshotProducer::new(table, self.snapshot_id, Uuid::new_v4(), 0, HashMap::new());
            let mut manifests = vec![];
            for manifest in current_manifests(table).await {
                let loaded = manifest.load_manifest(table.file_io()).await?;
                if !loaded
                    .entries()
                    .iter()
                    .any(|e| e.file_path() == self.file_path)
                {
                    manifests.push(manifest);
                    continue;
                }
                let mut writer = producer.new_manifest_writer(
                    manifest.partition_spec_id,
                    None,
                    Some(self.snapshot_id),
                )?;
                for entry in loaded.entries() {
                    let mut entry = entry.as_ref().clone();
                    if entry.file_path() == self.file_path {
                        entry.status = ManifestStatus::Deleted;
                        entry.snapshot_id = Some(self.snapshot_id);
                    }
                    writer.add_rewritten_entry(entry)?;
                }
                manifests.push(writer.write_manifest_file().await?);
            }
            producer
                .commit(Operation::Delete, HashMap::new(), manifests)
                .await
        }
    }

    #[tokio::test]
    async fn test_deleted_entries_are_carried_over() {
        for (format_version, inheritance, caching) in configurations() {
            let (table, store) =
                make_configured_table(format_version, inheritance, UnboundPartitionSpec::new())
                    .await;
            let table = append(&table, &store, unpartitioned_files("a", 2)).await;
            let table = append(&table, &store, unpartitioned_files("b", 2)).await;

            let deleted_path = "memory:/warehouse/t/data/a-1.parquet".to_string();
            let tx = Transaction::new(&table);
            let tx = DeleteFileAction {
                snapshot_id: 4242,
                file_path: deleted_path.clone(),
            }
            .apply(tx)
            .unwrap();
            let table = tx.commit(&store).await.unwrap();

            let before = current_manifests(&table).await;
            assert_eq!(before.len(), 2);
            let before_entries = entries(&table, &before).await;
            let deleted = before_entries
                .iter()
                .find(|e| e.file_path() == deleted_path)
                .unwrap();
            assert_eq!(deleted.status(), ManifestStatus::Deleted);
            assert_eq!(deleted.snapshot_id(), Some(4242));
            let expected = provenance(&before_entries);

            let result = Transaction::new(&table)
                .rewrite_manifests()
                .use_caching(caching)
                .staging_location(STAGING_LOCATION)
                .execute(&table, &store)
                .await
                .unwrap();

            assert_eq!(result.added_manifests.len(), 1);
            let added = &result.added_manifests[0];
            assert_eq!(added.existing_files_count, Some(3));
            assert_eq!(added.deleted_files_count, Some(1));
            assert_eq!(added.added_files_count, Some(0));

            let after = current_manifests(&result.table).await;
            let after_entries = entries(&result.table, &after).await;
            assert_eq!(after_entries.len(), 4);
            for entry in &after_entries {
                let expected_status = if entry.file_path() == deleted_path {
                    ManifestStatus::Deleted
                } else {
                    ManifestStatus::Existing
                };
                assert_eq!(entry.status(), expected_status, "{}", entry.file_path());
            }
            assert_eq!(provenance(&after_entries), expected);
        }
    }

    /// Reports a failure although the swap went through.
    #[derive(Debug)]
    struct FaultyMetadataStore {
        inner: MemoryMetadataStore,
    }

    #[async_trait]
    impl MetadataStore for FaultyMetadataStore {
        async fn load(&self) -> Result<VersionedMetadata> {
            self.inner.load().await
        }

        async fn perform_swap(
            &self,
            base: &MetadataLocation,
            metadata: TableMetadata,
        ) -> Result<SwapReceipt> {
            self.inner.perform_swap(base, metadata).await
        }

        async fn report_outcome(&self, _receipt: SwapReceipt) -> Result<VersionedMetadata> {
            Err(Error::new(ErrorKind::Unexpected, "Datacenter on Fire"))
        }
    }

    #[tokio::test]
    async fn test_commit_state_unknown() {
        let (table, store) =
            make_configured_table(FormatVersion::V2, false, UnboundPartitionSpec::new()).await;
        let table = append(&table, &store, unpartitioned_files("a", 2)).await;
        let table = append(&table, &store, unpartitioned_files("b", 2)).await;

        let store = FaultyMetadataStore { inner: store };
        let err = Transaction::new(&table)
            .rewrite_manifests()
            .execute(&table, &store)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitStateUnknown);
        assert!(!err.retryable());
        assert!(err.to_string().contains("Datacenter on Fire"));

        let table = table.refresh(&store).await.unwrap();
        let manifests = current_manifests(&table).await;
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].existing_files_count, Some(4));
        assert!(
            table
                .file_io()
                .exists(&manifests[0].manifest_path)
                .await
                .unwrap()
        );
    }

    /// Lets another writer append a file right before the first swap.
    #[derive(Debug)]
    struct AppendBeforeSwapStore {
        inner: MemoryMetadataStore,
        appended: AtomicBool,
    }

    #[async_trait]
    impl MetadataStore for AppendBeforeSwapStore {
        async fn load(&self) -> Result<VersionedMetadata> {
            self.inner.load().await
        }

        async fn perform_swap(
            &self,
            base: &MetadataLocation,
            metadata: TableMetadata,
        ) -> Result<SwapReceipt> {
            if !self.appended.swap(true, Ordering::SeqCst) {
                let table = Table::load(&self.inner, self.inner.file_io().clone()).await?;
                let tx = Transaction::new(&table);
                let tx = tx
                    .fast_append()
                    .add_data_files(unpartitioned_files("concurrent", 1))
                    .apply(tx)?;
                tx.commit(&self.inner).await?;
            }
            self.inner.perform_swap(base, metadata).await
        }

        async fn report_outcome(&self, receipt: SwapReceipt) -> Result<VersionedMetadata> {
            self.inner.report_outcome(receipt).await
        }
    }

    #[tokio::test]
    async fn test_retry_keeps_concurrently_appended_manifest() {
        for (format_version, inheritance, caching) in configurations() {
            let (table, store) =
                make_configured_table(format_version, inheritance, UnboundPartitionSpec::new())
                    .await;
            let table = append(&table, &store, unpartitioned_files("a", 2)).await;
            let table = append(&table, &store, unpartitioned_files("b", 2)).await;
            let expected = provenance(&entries(&table, &current_manifests(&table).await).await);

            let store = AppendBeforeSwapStore {
                inner: store,
                appended: AtomicBool::new(false),
            };
            let result = Transaction::new(&table)
                .rewrite_manifests()
                .use_caching(caching)
                .execute(&table, &store)
                .await
                .unwrap();

            assert_eq!(result.rewritten_manifests.len(), 2);
            assert_eq!(result.added_manifests.len(), 1);

            let table = result.table;
            assert_eq!(table.metadata_location().version(), 4);
            let snapshot = table.metadata().current_snapshot().unwrap();
            let parent = snapshot.parent_snapshot(table.metadata()).unwrap();
            assert_eq!(parent.summary().operation, Operation::Append);

            let parent_manifests = parent
                .load_manifest_list(table.file_io(), table.metadata())
                .await
                .unwrap();
            let appended = parent_manifests.entries()[0].clone();
            assert_eq!(appended.added_files_count, Some(1));

            let after = current_manifests(&table).await;
            assert_eq!(after.len(), 2);
            assert_eq!(after[0], appended);
            assert_eq!(after[1].manifest_path, result.added_manifests[0].manifest_path);
            assert_eq!(
                provenance(&entries(&table, &after[1..]).await),
                expected
            );
        }
    }

    /// Lets another writer rewrite all manifests right before the first swap.
    #[derive(Debug)]
    struct RewriteBeforeSwapStore {
        inner: MemoryMetadataStore,
        rewritten: AtomicBool,
    }

    #[async_trait]
    impl MetadataStore for RewriteBeforeSwapStore {
        async fn load(&self) -> Result<VersionedMetadata> {
            self.inner.load().await
        }

        async fn perform_swap(
            &self,
            base: &MetadataLocation,
            metadata: TableMetadata,
        ) -> Result<SwapReceipt> {
            if !self.rewritten.swap(true, Ordering::SeqCst) {
                let table = Table::load(&self.inner, self.inner.file_io().clone()).await?;
                Transaction::new(&table)
                    .rewrite_manifests()
                    .execute(&table, &self.inner)
                    .await?;
            }
            self.inner.perform_swap(base, metadata).await
        }

        async fn report_outcome(&self, receipt: SwapReceipt) -> Result<VersionedMetadata> {
            self.inner.report_outcome(receipt).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_rewrite_aborts() {
        let (table, store) =
            make_configured_table(FormatVersion::V2, false, UnboundPartitionSpec::new()).await;
        let table = append(&table, &store, unpartitioned_files("a", 2)).await;
        let table = append(&table, &store, unpartitioned_files("b", 2)).await;

        let store = RewriteBeforeSwapStore {
            inner: store,
            rewritten: AtomicBool::new(false),
        };
        let err = Transaction::new(&table)
            .rewrite_manifests()
            .execute(&table, &store)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CatalogCommitConflicts);
        assert!(!err.retryable());
        assert!(err.to_string().contains("Manifest is missing"));

        // Only the concurrent rewrite was committed.
        let table = table.refresh(&store).await.unwrap();
        assert_eq!(table.metadata_location().version(), 3);
        assert_eq!(current_manifests(&table).await.len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_on_local_file_system() {
        let tmp_dir = TempDir::new().unwrap();
        let location = format!("{}/t", tmp_dir.path().to_str().unwrap());
        let schema = Schema::builder()
            .with_fields(vec![
                NestedField::required(1, "id", PrimitiveType::Long).into(),
            ])
            .build()
            .unwrap();
        let metadata = TableMetadataBuilder::new(
            schema,
            UnboundPartitionSpec::new(),
            location.clone(),
            FormatVersion::V2,
            HashMap::new(),
        )
        .unwrap()
        .build()
        .unwrap()
        .metadata;

        let file_io = FileIOBuilder::new_fs_io().build().unwrap();
        let store = MemoryMetadataStore::create(file_io.clone(), &metadata)
            .await
            .unwrap();
        let table = Table::load(&store, file_io).await.unwrap();
        let table = append(&table, &store, unpartitioned_files("a", 2)).await;
        let table = append(&table, &store, unpartitioned_files("b", 2)).await;

        let result = Transaction::new(&table)
            .rewrite_manifests()
            .execute(&table, &store)
            .await
            .unwrap();

        assert_eq!(result.added_manifests.len(), 1);
        let added = &result.added_manifests[0];
        assert!(added.manifest_path.starts_with(&format!("{location}/metadata/")));
        assert!(std::path::Path::new(&added.manifest_path).exists());

        let table = Table::load(&store, table.file_io().clone()).await.unwrap();
        assert_eq!(current_manifests(&table).await.len(), 1);
    }
}
