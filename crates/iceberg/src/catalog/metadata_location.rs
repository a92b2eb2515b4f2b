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

use std::fmt::Display;
use std::str::FromStr;

use uuid::Uuid;

use crate::{Error, ErrorKind, Result, ensure_data_valid};

/// Location of one metadata file of a table: `<table>/metadata/<version>-<uuid>.metadata.json`.
///
/// Every commit writes a fresh file with the next version, so the location doubles as the
/// version token a metadata store compares before swapping its pointer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetadataLocation {
    table_location: String,
    version: i32,
    id: Uuid,
}

impl MetadataLocation {
    /// The first metadata file of a new table, at version 0.
    pub fn new_with_table_location(table_location: impl ToString) -> Self {
        Self {
            table_location: table_location.to_string().trim_end_matches('/').to_string(),
            version: 0,
            id: Uuid::new_v4(),
        }
    }

    /// Location of the file that succeeds this one.
    pub fn with_next_version(&self) -> Self {
        Self {
            table_location: self.table_location.clone(),
            version: self.version + 1,
            id: Uuid::new_v4(),
        }
    }

    /// Base location of the table.
    pub fn table_location(&self) -> &str {
        &self.table_location
    }

    /// Version of this metadata file.
    pub fn version(&self) -> i32 {
        self.version
    }

    fn parse_table_location(dir: &str) -> Result<&str> {
        dir.strip_suffix("/metadata").ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Metadata location not under \"/metadata\" subdirectory: {dir}"),
            )
        })
    }

    fn parse_file_name(file_name: &str) -> Result<(i32, Uuid)> {
        let (version, id) = file_name
            .strip_suffix(".metadata.json")
            .and_then(|stem| stem.split_once('-'))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    format!("Invalid metadata file name: {file_name}"),
                )
            })?;

        let version = version.parse::<i32>()?;
        ensure_data_valid!(
            version >= 0,
            "Metadata version must not be negative: {}",
            file_name
        );
        Ok((version, Uuid::parse_str(id)?))
    }
}

impl Display for MetadataLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/metadata/{:0>5}-{}.metadata.json",
            self.table_location, self.version, self.id
        )
    }
}

impl FromStr for MetadataLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (dir, file_name) = s.rsplit_once('/').ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Invalid metadata location: {s}"),
            )
        })?;

        let table_location = Self::parse_table_location(dir)?.to_string();
        let (version, id) = Self::parse_file_name(file_name)?;

        Ok(MetadataLocation {
            table_location,
            version,
            id,
        })
    }
}
