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

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

// Helper function to parse a property from a HashMap
// If the property is not found, use the default value
fn parse_property<T: FromStr>(
    properties: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T>
where
    <T as FromStr>::Err: Display,
{
    properties.get(key).map_or(Ok(default), |value| {
        value.parse::<T>().map_err(|e| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Invalid value for {key}: {e}"),
            )
        })
    })
}

/// TableProperties that contains the properties of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProperties {
    /// The number of times to retry a commit.
    pub commit_num_retries: usize,
    /// The minimum wait time between retries.
    pub commit_min_retry_wait_ms: u64,
    /// The maximum wait time between retries.
    pub commit_max_retry_wait_ms: u64,
    /// The total timeout for commit retries.
    pub commit_total_retry_timeout_ms: u64,
    /// The size manifests are packed to when they are written or rewritten.
    pub manifest_target_size_bytes: u64,
    /// Whether manifests may leave the snapshot id of their entries to be inherited.
    pub snapshot_id_inheritance_enabled: bool,
}

impl TableProperties {
    /// Property key for number of commit retries.
    pub const PROPERTY_COMMIT_NUM_RETRIES: &str = "commit.retry.num-retries";
    /// Default value for number of commit retries.
    pub const PROPERTY_COMMIT_NUM_RETRIES_DEFAULT: usize = 4;

    /// Property key for minimum wait time (ms) between retries.
    pub const PROPERTY_COMMIT_MIN_RETRY_WAIT_MS: &str = "commit.retry.min-wait-ms";
    /// Default value for minimum wait time (ms) between retries.
    pub const PROPERTY_COMMIT_MIN_RETRY_WAIT_MS_DEFAULT: u64 = 100;

    /// Property key for maximum wait time (ms) between retries.
    pub const PROPERTY_COMMIT_MAX_RETRY_WAIT_MS: &str = "commit.retry.max-wait-ms";
    /// Default value for maximum wait time (ms) between retries.
    pub const PROPERTY_COMMIT_MAX_RETRY_WAIT_MS_DEFAULT: u64 = 60 * 1000; // 1 minute

    /// Property key for total maximum retry time (ms).
    pub const PROPERTY_COMMIT_TOTAL_RETRY_TIME_MS: &str = "commit.retry.total-timeout-ms";
    /// Default value for total maximum retry time (ms).
    pub const PROPERTY_COMMIT_TOTAL_RETRY_TIME_MS_DEFAULT: u64 = 30 * 60 * 1000; // 30 minutes

    /// Property key for the target size of manifest files.
    pub const PROPERTY_MANIFEST_TARGET_SIZE_BYTES: &str = "commit.manifest.target-size-bytes";
    /// Default target size of manifest files.
    pub const PROPERTY_MANIFEST_TARGET_SIZE_BYTES_DEFAULT: u64 = 8 * 1024 * 1024; // 8 MB

    /// Property key enabling snapshot id inheritance for v1 tables.
    pub const PROPERTY_SNAPSHOT_ID_INHERITANCE_ENABLED: &str =
        "compatibility.snapshot-id-inheritance.enabled";
    /// Default value of snapshot id inheritance.
    pub const PROPERTY_SNAPSHOT_ID_INHERITANCE_ENABLED_DEFAULT: bool = false;
}

impl TryFrom<&HashMap<String, String>> for TableProperties {
    // parse by entry key or use default value
    type Error = Error;

    fn try_from(props: &HashMap<String, String>) -> Result<Self> {
        let properties = TableProperties {
            commit_num_retries: parse_property(
                props,
                TableProperties::PROPERTY_COMMIT_NUM_RETRIES,
                TableProperties::PROPERTY_COMMIT_NUM_RETRIES_DEFAULT,
            )?,
            commit_min_retry_wait_ms: parse_property(
                props,
                TableProperties::PROPERTY_COMMIT_MIN_RETRY_WAIT_MS,
                TableProperties::PROPERTY_COMMIT_MIN_RETRY_WAIT_MS_DEFAULT,
            )?,
            commit_max_retry_wait_ms: parse_property(
                props,
                TableProperties::PROPERTY_COMMIT_MAX_RETRY_WAIT_MS,
                TableProperties::PROPERTY_COMMIT_MAX_RETRY_WAIT_MS_DEFAULT,
            )?,
            commit_total_retry_timeout_ms: parse_property(
                props,
                TableProperties::PROPERTY_COMMIT_TOTAL_RETRY_TIME_MS,
                TableProperties::PROPERTY_COMMIT_TOTAL_RETRY_TIME_MS_DEFAULT,
            )?,
            manifest_target_size_bytes: parse_property(
                props,
                TableProperties::PROPERTY_MANIFEST_TARGET_SIZE_BYTES,
                TableProperties::PROPERTY_MANIFEST_TARGET_SIZE_BYTES_DEFAULT,
            )?,
            snapshot_id_inheritance_enabled: parse_property(
                props,
                TableProperties::PROPERTY_SNAPSHOT_ID_INHERITANCE_ENABLED,
                TableProperties::PROPERTY_SNAPSHOT_ID_INHERITANCE_ENABLED_DEFAULT,
            )?,
        };

        if properties.manifest_target_size_bytes == 0 {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Invalid value for {}: must be positive",
                    TableProperties::PROPERTY_MANIFEST_TARGET_SIZE_BYTES
                ),
            ));
        }
        Ok(properties)
    }
}
