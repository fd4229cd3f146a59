//! Local filesystem back-end.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tracing::debug;

use crate::error::{self, Error, Result};

use super::{
    BackendFile, BackendFileOps, BackendOps, CreateDisposition, DirectoryList, DirectoryListOps,
    FileInfo, FileType,
};

pub(crate) struct LocalStorage;

impl LocalStorage {
    pub(crate) fn new() -> Self {
        LocalStorage
    }
}

impl BackendOps for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn create(
        &mut self,
        path: &Path,
        _size: u64,
        disposition: CreateDisposition,
    ) -> Result<BackendFile> {
        if path.exists() && disposition == CreateDisposition::Fail {
            return error::FileExistsSnafu { path }.fail();
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).context(error::IoSnafu { path: parent })?;
            }
        }
        let file = match disposition {
            CreateDisposition::Append => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)
                    .context(error::IoSnafu { path })?;
                file.seek(SeekFrom::End(0)).context(error::IoSnafu { path })?;
                file
            }
            CreateDisposition::Fail | CreateDisposition::Overwrite => {
                File::create(path).context(error::IoSnafu { path })?
            }
        };
        let size = file.metadata().context(error::IoSnafu { path })?.len();
        debug!(message = "Created storage file.", path = ?path, ?disposition);
        Ok(BackendFile::Local(LocalFile {
            path: path.to_path_buf(),
            file: Some(file),
            size,
        }))
    }

    fn open(&mut self, path: &Path) -> Result<BackendFile> {
        let file = File::open(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let size = file.metadata().context(error::IoSnafu { path })?.len();
        Ok(BackendFile::Local(LocalFile {
            path: path.to_path_buf(),
            file: Some(file),
            size,
        }))
    }

    fn exists(&mut self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&mut self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_directory(&mut self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_readable(&mut self, path: &Path) -> bool {
        if path.is_dir() {
            return fs::read_dir(path).is_ok();
        }
        File::open(path).is_ok()
    }

    fn is_writable(&mut self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(metadata) => !metadata.permissions().readonly(),
            Err(_) => false,
        }
    }

    fn delete(&mut self, path: &Path) -> Result<()> {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io {
                path: path.to_path_buf(),
                source,
            },
        })
    }

    fn rename(&mut self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).context(error::IoSnafu { path: from })
    }

    fn make_directory(&mut self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).context(error::IoSnafu { path })
    }

    fn file_info(&mut self, path: &Path) -> Result<FileInfo> {
        let metadata = fs::symlink_metadata(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        Ok(file_info_from_metadata(&metadata))
    }

    fn open_directory_list(&mut self, path: &Path) -> Result<DirectoryList> {
        if !path.is_dir() {
            return error::NotADirectorySnafu { path }.fail();
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).context(error::IoSnafu { path })? {
            let entry = entry.context(error::IoSnafu { path })?;
            let info = entry
                .metadata()
                .map(|metadata| file_info_from_metadata(&metadata))
                .unwrap_or_default();
            entries.push((entry.file_name().to_string_lossy().into_owned(), info));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.reverse();
        Ok(DirectoryList::Local(LocalDirectoryList { entries }))
    }
}

fn file_info_from_metadata(metadata: &fs::Metadata) -> FileInfo {
    let file_type = if metadata.is_dir() {
        FileType::Directory
    } else if metadata.file_type().is_symlink() {
        FileType::Link
    } else if metadata.is_file() {
        FileType::File
    } else {
        FileType::Special
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::{FileTypeExt, MetadataExt};
        let raw_type = metadata.file_type();
        let file_type = if raw_type.is_block_device() || raw_type.is_char_device() {
            FileType::Device
        } else if raw_type.is_fifo() {
            FileType::Fifo
        } else if raw_type.is_socket() {
            FileType::Socket
        } else {
            file_type
        };
        let rdev = metadata.rdev();
        return FileInfo {
            file_type,
            size: metadata.len(),
            access_time: metadata.atime(),
            modification_time: metadata.mtime(),
            change_time: metadata.ctime(),
            user_id: metadata.uid(),
            group_id: metadata.gid(),
            permissions: metadata.mode() & 0o7777,
            // Linux encodes major/minor split across the low bytes.
            major: (((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff)) as u32,
            minor: ((rdev & 0xff) | ((rdev >> 12) & !0xff)) as u32,
        };
    }

    #[cfg(not(unix))]
    {
        FileInfo {
            file_type,
            size: metadata.len(),
            ..Default::default()
        }
    }
}

pub(crate) struct LocalFile {
    path: PathBuf,
    file: Option<File>,
    size: u64,
}

impl LocalFile {
    fn file_mut(&mut self) -> &mut File {
        self.file.as_mut().expect("local file already closed")
    }
}

impl BackendFileOps for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let path = self.path.clone();
        self.file_mut().read(buf).context(error::IoSnafu { path })
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let path = self.path.clone();
        self.file_mut()
            .write_all(data)
            .context(error::IoSnafu { path: path.clone() })?;
        self.size = self.size.max(
            self.file_mut()
                .stream_position()
                .context(error::IoSnafu { path })?,
        );
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        let path = self.path.clone();
        self.file_mut()
            .seek(SeekFrom::Start(offset))
            .context(error::IoSnafu { path })?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().context(error::IoSnafu { path: &self.path })?;
        }
        Ok(())
    }
}

pub(crate) struct LocalDirectoryList {
    /// Entries in reverse order; popped from the back.
    entries: Vec<(String, FileInfo)>,
}

impl DirectoryListOps for LocalDirectoryList {
    fn next_entry(&mut self) -> Option<(String, FileInfo)> {
        self.entries.pop()
    }
}
