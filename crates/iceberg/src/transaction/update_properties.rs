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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::table::Table;
use crate::transaction::action::{ActionCommit, TransactionAction};
use crate::{Error, ErrorKind, Result, TableUpdate};

/// A transactional action that updates or removes table properties.
///
/// Properties such as `commit.manifest.target-size-bytes` or the commit retry settings are
/// read from the table metadata, so this is how they are tuned. Each key can only be updated
/// or removed in a single action, not both.
pub struct UpdatePropertiesAction {
    updates: HashMap<String, String>,
    removals: HashSet<String>,
}

impl UpdatePropertiesAction {
    /// Creates a new [`UpdatePropertiesAction`] with no updates or removals.
    pub fn new() -> Self {
        UpdatePropertiesAction {
            updates: HashMap::default(),
            removals: HashSet::default(),
        }
    }

    /// Adds a key-value pair to the update set of this action.
    pub fn set(mut self, key: impl ToString, value: impl ToString) -> Self {
        self.updates.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds a key to the removal set of this action.
    pub fn remove(mut self, key: impl ToString) -> Self {
        self.removals.insert(key.to_string());
        self
    }
}

impl Default for UpdatePropertiesAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionAction for UpdatePropertiesAction {
    async fn commit(self: Arc<Self>, _table: &Table) -> Result<ActionCommit> {
        if let Some(overlapping_key) = self.removals.iter().find(|k| self.updates.contains_key(*k))
        {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                format!("Key {overlapping_key} is present in both removal set and update set"),
            ));
        }

        let mut updates = vec![];
        if !self.updates.is_empty() {
            updates.push(TableUpdate::SetProperties {
                updates: self.updates.clone(),
            });
        }
        if !self.removals.is_empty() {
            updates.push(TableUpdate::RemoveProperties {
                removals: self.removals.iter().cloned().collect(),
            });
        }

        Ok(ActionCommit::new(updates, vec![]))
    }
}
