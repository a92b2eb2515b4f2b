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

//! This module contains transaction api.
//!
//! The transaction API enables changes to be made to an existing table.
//!
//! Note that this may also have side effects, such as producing new manifest
//! files.
//!
//! A transaction is committed optimistically: every attempt loads the current metadata from the
//! [`MetadataStore`], replays the actions on it and swaps the metadata pointer. An attempt that
//! lost the race against another writer is retried with exponential backoff, driven by the
//! `commit.retry.*` table properties.
//!
//! ```ignore
//! use iceberg_metadata::transaction::{ApplyTransactionAction, Transaction};
//!
//! let tx = Transaction::new(&table);
//! let action = tx.fast_append().add_data_files(my_data_files);
//! let tx = action.apply(tx)?;
//!
//! let table = tx.commit(&store).await?;
//! ```

mod action;

pub use action::*;
mod append;
mod rewrite_manifests;
mod snapshot;
mod update_partition_spec;
mod update_properties;

use std::sync::Arc;
use std::time::Duration;

pub use append::FastAppendAction;
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder, RetryableWithContext};
pub use rewrite_manifests::{RewriteManifestsAction, RewriteManifestsResult};
pub use update_partition_spec::UpdatePartitionSpecAction;
pub use update_properties::UpdatePropertiesAction;
use uuid::Uuid;

use crate::error::Result;
use crate::spec::TableProperties;
use crate::table::Table;
use crate::transaction::action::BoxedTransactionAction;
use crate::{Error, ErrorKind, MetadataStore, TableUpdate};

/// Table transaction.
#[derive(Clone)]
pub struct Transaction {
    table: Table,
    actions: Vec<BoxedTransactionAction>,
}

impl Transaction {
    /// Creates a new transaction.
    pub fn new(table: &Table) -> Self {
        Self {
            table: table.clone(),
            actions: vec![],
        }
    }

    pub(crate) fn with_action(mut self, action: BoxedTransactionAction) -> Self {
        self.actions.push(action);
        self
    }

    fn update_table_metadata(table: Table, updates: &[TableUpdate]) -> Result<Table> {
        let mut metadata_builder = table.metadata().clone().into_builder();
        for update in updates {
            metadata_builder = update.clone().apply(metadata_builder)?;
        }

        Ok(table.with_metadata(Arc::new(metadata_builder.build()?.metadata)))
    }

    /// Checks the requirements of an [`ActionCommit`] against `table` and applies its updates,
    /// returning the updated table.
    fn apply(
        table: Table,
        mut action_commit: ActionCommit,
        has_updates: &mut bool,
    ) -> Result<Table> {
        let updates = action_commit.take_updates();
        let requirements = action_commit.take_requirements();

        for requirement in &requirements {
            requirement.check(table.metadata())?;
        }

        if updates.is_empty() {
            return Ok(table);
        }
        *has_updates = true;

        Self::update_table_metadata(table, &updates)
    }

    fn generate_unique_snapshot_id(&self) -> i64 {
        let generate_random_id = || -> i64 {
            let (lhs, rhs) = Uuid::new_v4().as_u64_pair();
            ((lhs ^ rhs) as i64) & i64::MAX
        };
        let mut snapshot_id = generate_random_id();
        while self
            .table
            .metadata()
            .snapshots()
            .any(|s| s.snapshot_id() == snapshot_id)
        {
            snapshot_id = generate_random_id();
        }
        snapshot_id
    }

    /// Update table's property.
    pub fn update_table_properties(&self) -> UpdatePropertiesAction {
        UpdatePropertiesAction::new()
    }

    /// Creates a fast append action.
    pub fn fast_append(&self) -> FastAppendAction {
        FastAppendAction::new(self.generate_unique_snapshot_id())
    }

    /// Creates an action evolving the default partition spec.
    pub fn update_partition_spec(&self) -> UpdatePartitionSpecAction {
        UpdatePartitionSpecAction::new()
    }

    /// Creates an action compacting the manifests of the current snapshot.
    pub fn rewrite_manifests(&self) -> RewriteManifestsAction {
        RewriteManifestsAction::new(self.generate_unique_snapshot_id())
    }

    /// Commit transaction.
    ///
    /// Conflicts with concurrent writers are retried, so the returned table may contain changes
    /// of other writers. Errors of kind [`ErrorKind::CommitStateUnknown`] are never retried: the
    /// table must be reloaded to learn whether the commit took effect.
    pub async fn commit(self, store: &dyn MetadataStore) -> Result<Table> {
        if self.actions.is_empty() {
            // nothing to commit
            return Ok(self.table);
        }

        let table_props = self.table.metadata().table_properties().map_err(|e| {
            Error::new(ErrorKind::DataInvalid, "Invalid table properties").with_source(e)
        })?;

        let backoff = Self::build_backoff(table_props)?;
        let tx = self;

        (|mut tx: Transaction| async {
            let result = tx.do_commit(store).await;
            (tx, result)
        })
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .context(tx)
        .when(|e| e.retryable())
        .notify(|e, dur| {
            tracing::warn!(error = %e, retry_after = ?dur, "Commit failed, retrying");
        })
        .await
        .1
    }

    fn build_backoff(props: TableProperties) -> Result<ExponentialBackoff> {
        Ok(ExponentialBuilder::new()
            .with_min_delay(Duration::from_millis(props.commit_min_retry_wait_ms))
            .with_max_delay(Duration::from_millis(props.commit_max_retry_wait_ms))
            .with_total_delay(Some(Duration::from_millis(
                props.commit_total_retry_timeout_ms,
            )))
            .with_max_times(props.commit_num_retries)
            .with_factor(2.0)
            .build())
    }

    async fn do_commit(&mut self, store: &dyn MetadataStore) -> Result<Table> {
        let current = store.load().await?;

        if self.table.metadata_location() != current.location() {
            // current base is stale, use refreshed as base and re-apply transaction actions
            self.table = self.table.clone().with_versioned(current);
        }

        let mut current_table = self.table.clone();
        let mut has_updates = false;

        for action in &self.actions {
            let action_commit = Arc::clone(action).commit(&current_table).await?;
            current_table = Self::apply(current_table, action_commit, &mut has_updates)?;
        }

        if !has_updates {
            return Ok(self.table.clone());
        }

        let committed = store
            .compare_and_swap(
                self.table.metadata_location(),
                current_table.metadata().clone(),
            )
            .await?;
        tracing::debug!(location = %committed.location(), "Committed table metadata");

        Ok(self.table.clone().with_versioned(committed))
    }
}
