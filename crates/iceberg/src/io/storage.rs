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

use opendal::layers::RetryLayer;
use opendal::services::{FsConfig, MemoryConfig};
use opendal::Operator;

use crate::{Error, ErrorKind, Result};

/// The storages a [`FileIO`](super::FileIO) can talk to.
#[derive(Debug)]
pub(crate) enum Storage {
    /// Process local storage, shared by every clone of the file io that created it.
    Memory(Operator),
    /// The local file system, rooted at `/`.
    LocalFs,
}

impl Storage {
    /// Build the storage for a scheme.
    pub(crate) fn build(scheme_str: &str) -> Result<Self> {
        match scheme_str {
            "memory" => Ok(Self::Memory(
                Operator::from_config(MemoryConfig::default())?.finish(),
            )),
            "file" | "" => Ok(Self::LocalFs),
            s => Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Constructing file io from scheme: {s} not supported now"),
            )),
        }
    }

    /// Creates operator from path.
    ///
    /// # Arguments
    ///
    /// * path: It should be *absolute* path starting with scheme string used to construct [`FileIO`](super::FileIO).
    ///
    /// # Returns
    ///
    /// The return value consists of two parts:
    ///
    /// * An [`opendal::Operator`] instance used to operate on file.
    /// * Relative path to the root uri of [`opendal::Operator`].
    pub(crate) fn create_operator<'a>(&self, path: &'a impl AsRef<str>) -> Result<(Operator, &'a str)> {
        let path = path.as_ref();
        let (op, relative_path) = match self {
            Storage::Memory(op) => {
                if let Some(stripped) = path.strip_prefix("memory:/") {
                    (op.clone(), stripped)
                } else {
                    (op.clone(), Self::strip_root(path)?)
                }
            }
            Storage::LocalFs => {
                let mut cfg = FsConfig::default();
                cfg.root = Some("/".to_string());
                let op = Operator::from_config(cfg)?.finish();
                if let Some(stripped) = path.strip_prefix("file:/") {
                    (op, stripped)
                } else {
                    (op, Self::strip_root(path)?)
                }
            }
        };

        // Transient failures of the backing store are retried by the operator.
        let op = op.layer(RetryLayer::new());
        Ok((op, relative_path))
    }

    fn strip_root(path: &str) -> Result<&str> {
        path.strip_prefix('/').ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Path should be absolute, but got: {path}"),
            )
        })
    }
}
