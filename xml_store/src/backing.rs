// Copyright © 2025 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::Path;
use std::{fmt, fs};

use log::debug;
use vmm_sys_util::tempfile::TempFile;

use crate::Error;

const BACKING_FILE_PREFIX: &str = "/tmp/xml_store_";

/// Temporary file mirroring the serialized form of a document, for tools
/// that only accept a file path. The file is removed when dropped.
pub struct BackingFile {
    file: TempFile,
}

impl fmt::Debug for BackingFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BackingFile")
            .field("path", &self.file.as_path())
            .finish()
    }
}

impl BackingFile {
    pub fn new() -> Result<Self, Error> {
        let file =
            TempFile::new_with_prefix(BACKING_FILE_PREFIX).map_err(Error::BackingFileCreate)?;
        debug!("Created backing file {}", file.as_path().display());
        Ok(BackingFile { file })
    }

    /// Replaces the whole file content with `contents`.
    pub fn write(&self, contents: &str) -> Result<(), Error> {
        fs::write(self.file.as_path(), contents).map_err(Error::BackingFileWrite)
    }

    pub fn path(&self) -> &Path {
        self.file.as_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_file_lifecycle() {
        let backing = BackingFile::new().unwrap();
        let path = backing.path().to_path_buf();
        backing.write("<domain/>").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<domain/>");
        backing.write("<a/>").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<a/>");
        drop(backing);
        assert!(!path.exists());
    }
}
