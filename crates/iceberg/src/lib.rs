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

//! Table metadata and commit engine for Apache Iceberg tables.
//!
//! The crate models partition specs and transforms, manifests, manifest lists, snapshots and
//! table metadata, and commits changes to them through an optimistic compare-and-swap on a
//! [`MetadataStore`].
//!
//! # Examples
//!
//! ## Compact The Manifests Of A Table
//!
//! ```rust, no_run
//! use iceberg_metadata::io::FileIOBuilder;
//! use iceberg_metadata::table::Table;
//! use iceberg_metadata::transaction::Transaction;
//! use iceberg_metadata::{MemoryMetadataStore, MetadataLocation, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Build your file IO.
//!     let file_io = FileIOBuilder::new("memory").build()?;
//!     // Point a store at an existing metadata file.
//!     let store = MemoryMetadataStore::new(
//!         file_io.clone(),
//!         MetadataLocation::new_with_table_location("memory:/warehouse/t"),
//!     );
//!     let table = Table::load(&store, file_io).await?;
//!     // Rewrite small manifests into manifests of the target size.
//!     let result = Transaction::new(&table)
//!         .rewrite_manifests()
//!         .target_manifest_size_bytes(8 * 1024 * 1024)
//!         .execute(&table, &store)
//!         .await?;
//!
//!     println!(
//!         "replaced {} manifests by {}",
//!         result.rewritten_manifests.len(),
//!         result.added_manifests.len()
//!     );
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

#[macro_use]
extern crate derive_builder;

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod catalog;
pub use catalog::{
    MemoryMetadataStore, MetadataLocation, MetadataStore, SwapReceipt, TableRequirement,
    TableUpdate, VersionedMetadata,
};

pub mod table;

pub mod io;
pub mod spec;

pub mod transaction;
pub mod transform;
