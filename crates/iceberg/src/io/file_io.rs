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

use bytes::Bytes;
use opendal::Operator;

use super::storage::Storage;
use crate::Result;

/// FileIO implementation, used to manipulate files in underlying storage.
///
/// # Note
///
/// All path passed to `FileIO` must be absolute path starting with scheme string used to construct `FileIO`.
/// For example, if you construct `FileIO` with `memory` scheme, then all path passed to `FileIO` must start
/// with `memory:/`. Local file system paths may omit the `file:` prefix.
///
/// Supported storages:
///
/// | Storage           | Scheme           | Expected Path Format   |
/// |-------------------|------------------|------------------------|
/// | Local file system | `file` or empty  | `file:/path/to/file`   |
/// | Memory            | `memory`         | `memory:/path/to/file` |
#[derive(Clone, Debug)]
pub struct FileIO {
    inner: Arc<Storage>,
}

impl FileIO {
    /// Deletes file.
    ///
    /// # Arguments
    ///
    /// * path: It should be *absolute* path starting with scheme string used to construct [`FileIO`].
    pub async fn delete(&self, path: impl AsRef<str>) -> Result<()> {
        let (op, relative_path) = self.inner.create_operator(&path)?;
        Ok(op.delete(relative_path).await?)
    }

    /// Check file exists.
    ///
    /// # Arguments
    ///
    /// * path: It should be *absolute* path starting with scheme string used to construct [`FileIO`].
    pub async fn exists(&self, path: impl AsRef<str>) -> Result<bool> {
        let (op, relative_path) = self.inner.create_operator(&path)?;
        Ok(op.exists(relative_path).await?)
    }

    /// Creates input file.
    ///
    /// # Arguments
    ///
    /// * path: It should be *absolute* path starting with scheme string used to construct [`FileIO`].
    pub fn new_input(&self, path: impl AsRef<str>) -> Result<InputFile> {
        let (op, relative_path) = self.inner.create_operator(&path)?;
        let path = path.as_ref().to_string();
        let relative_path_pos = path.len() - relative_path.len();
        Ok(InputFile {
            op,
            path,
            relative_path_pos,
        })
    }

    /// Creates output file.
    ///
    /// # Arguments
    ///
    /// * path: It should be *absolute* path starting with scheme string used to construct [`FileIO`].
    pub fn new_output(&self, path: impl AsRef<str>) -> Result<OutputFile> {
        let (op, relative_path) = self.inner.create_operator(&path)?;
        let path = path.as_ref().to_string();
        let relative_path_pos = path.len() - relative_path.len();
        Ok(OutputFile {
            op,
            path,
            relative_path_pos,
        })
    }
}

/// Builder for [`FileIO`].
#[derive(Clone, Debug)]
pub struct FileIOBuilder {
    /// This is used to infer scheme of operator.
    ///
    /// If this is `None`, then [`FileIOBuilder::build`](FileIOBuilder::build) will build a local file io.
    scheme_str: Option<String>,
}

impl FileIOBuilder {
    /// Creates a new builder with scheme.
    pub fn new(scheme_str: impl ToString) -> Self {
        Self {
            scheme_str: Some(scheme_str.to_string()),
        }
    }

    /// Creates a new builder for local file io.
    pub fn new_fs_io() -> Self {
        Self { scheme_str: None }
    }

    /// Builds [`FileIO`].
    pub fn build(self) -> Result<FileIO> {
        let storage = Storage::build(self.scheme_str.as_deref().unwrap_or_default())?;
        Ok(FileIO {
            inner: Arc::new(storage),
        })
    }
}

/// The struct the represents the metadata of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// The size of the file.
    pub size: u64,
}

/// Input file is used for reading from files.
#[derive(Debug)]
pub struct InputFile {
    op: Operator,
    // Absolution path of file.
    path: String,
    // Relative path of file to uri, starts at [`relative_path_pos`]
    relative_path_pos: usize,
}

impl InputFile {
    /// Absolute path to root uri.
    pub fn location(&self) -> &str {
        &self.path
    }

    /// Check if file exists.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.op.exists(&self.path[self.relative_path_pos..]).await?)
    }

    /// Fetch and returns metadata of file.
    pub async fn metadata(&self) -> Result<FileMetadata> {
        let meta = self.op.stat(&self.path[self.relative_path_pos..]).await?;

        Ok(FileMetadata {
            size: meta.content_length(),
        })
    }

    /// Read and returns whole content of file.
    pub async fn read(&self) -> Result<Bytes> {
        Ok(self
            .op
            .read(&self.path[self.relative_path_pos..])
            .await?
            .to_bytes())
    }
}

/// Output file is used for writing to files.
#[derive(Debug)]
pub struct OutputFile {
    op: Operator,
    // Absolution path of file.
    path: String,
    // Relative path of file to uri, starts at [`relative_path_pos`]
    relative_path_pos: usize,
}

impl OutputFile {
    /// Relative path to root uri.
    pub fn location(&self) -> &str {
        &self.path
    }

    /// Checks if file exists.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.op.exists(&self.path[self.relative_path_pos..]).await?)
    }

    /// Converts into [`InputFile`].
    pub fn to_input_file(self) -> InputFile {
        InputFile {
            op: self.op,
            path: self.path,
            relative_path_pos: self.relative_path_pos,
        }
    }

    /// Create a new output file with given bytes, replacing any previous content.
    pub async fn write(&self, bs: Bytes) -> Result<()> {
        let mut writer = self.op.writer(&self.path[self.relative_path_pos..]).await?;
        writer.write(bs).await?;
        writer.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::{FileIO, FileIOBuilder};
    use crate::ErrorKind;

    fn create_local_file_io() -> FileIO {
        FileIOBuilder::new_fs_io().build().unwrap()
    }

    fn write_to_file<P: AsRef<Path>>(s: &str, path: P) {
        let mut f = File::create(path).unwrap();
        write!(f, "{s}").unwrap();
    }

    #[tokio::test]
    async fn test_local_input_file() {
        let tmp_dir = TempDir::new().unwrap();

        let file_name = "a.txt";
        let content = "Iceberg loves rust.";

        let full_path = format!("{}/{}", tmp_dir.path().to_str().unwrap(), file_name);
        write_to_file(content, &full_path);

        let file_io = create_local_file_io();
        let input_file = file_io.new_input(&full_path).unwrap();

        assert!(input_file.exists().await.unwrap());
        assert_eq!(&full_path, input_file.location());
        assert_eq!(input_file.metadata().await.unwrap().size, content.len() as u64);
        assert_eq!(input_file.read().await.unwrap(), Bytes::from(content));
    }

    #[tokio::test]
    async fn test_delete_local_file() {
        let tmp_dir = TempDir::new().unwrap();
        let full_path = format!("{}/a.txt", tmp_dir.path().to_str().unwrap());
        write_to_file("Iceberg loves rust.", &full_path);

        let file_io = create_local_file_io();
        assert!(file_io.exists(&full_path).await.unwrap());
        file_io.delete(&full_path).await.unwrap();
        assert!(!file_io.exists(&full_path).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_output_file() {
        let tmp_dir = TempDir::new().unwrap();
        let full_path = format!("file:{}/metadata/b.txt", tmp_dir.path().to_str().unwrap());

        let file_io = create_local_file_io();
        let output_file = file_io.new_output(&full_path).unwrap();
        assert!(!output_file.exists().await.unwrap());
        output_file.write(Bytes::from("hello")).await.unwrap();

        let input_file = output_file.to_input_file();
        assert_eq!(input_file.read().await.unwrap(), Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_memory_io_is_shared_by_clones() {
        let file_io = FileIOBuilder::new("memory").build().unwrap();
        let path = "memory:/warehouse/t/metadata/a.json";

        file_io
            .new_output(path)
            .unwrap()
            .write(Bytes::from("{}"))
            .await
            .unwrap();

        let cloned = file_io.clone();
        assert!(cloned.exists(path).await.unwrap());
        assert_eq!(
            cloned.new_input(path).unwrap().read().await.unwrap(),
            Bytes::from("{}")
        );

        // A separately built memory io does not see the file.
        let other = FileIOBuilder::new("memory").build().unwrap();
        assert!(!other.exists(path).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let file_io = FileIOBuilder::new("memory").build().unwrap();
        let err = file_io
            .new_input("memory:/warehouse/missing.json")
            .unwrap()
            .read()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = FileIOBuilder::new("s3").build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FeatureUnsupported);
    }
}
