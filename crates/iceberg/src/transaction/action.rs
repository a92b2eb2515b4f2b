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

use std::mem::take;
use std::sync::Arc;

use async_trait::async_trait;

use crate::table::Table;
use crate::transaction::Transaction;
use crate::{Result, TableRequirement, TableUpdate};

pub(crate) type BoxedTransactionAction = Arc<dyn TransactionAction>;

/// One change of a [`Transaction`].
///
/// `commit` runs once per commit attempt against the table as it was loaded for that attempt,
/// with the updates of the actions before it already applied.
#[async_trait]
pub(crate) trait TransactionAction: Sync + Send {
    /// Produces the metadata updates of this action and the requirements they are valid under.
    async fn commit(self: Arc<Self>, table: &Table) -> Result<ActionCommit>;
}

/// Adds an action to a [`Transaction`].
pub trait ApplyTransactionAction {
    /// Returns `tx` with this action appended.
    fn apply(self, tx: Transaction) -> Result<Transaction>;
}

impl<T: TransactionAction + 'static> ApplyTransactionAction for T {
    fn apply(self, tx: Transaction) -> Result<Transaction>
    where Self: Sized {
        Ok(tx.with_action(Arc::new(self)))
    }
}

/// Updates produced by an action, together with the requirements the table has to meet for
/// them to apply. An empty commit leaves the table untouched.
#[derive(Debug, Default)]
pub struct ActionCommit {
    updates: Vec<TableUpdate>,
    requirements: Vec<TableRequirement>,
}

impl ActionCommit {
    /// Creates a new `ActionCommit`.
    pub fn new(updates: Vec<TableUpdate>, requirements: Vec<TableRequirement>) -> Self {
        Self {
            updates,
            requirements,
        }
    }

    /// Takes the updates out of this commit.
    pub fn take_updates(&mut self) -> Vec<TableUpdate> {
        take(&mut self.updates)
    }

    /// Takes the requirements out of this commit.
    pub fn take_requirements(&mut self) -> Vec<TableRequirement> {
        take(&mut self.requirements)
    }
}
