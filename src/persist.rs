// Bitcoin Dev Kit
//
// Copyright (c) 2020-2022 Bitcoin Dev Kit Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Persistence for payment channels
//!
//! The [`Bip47Wallet`] keeps every channel in memory and writes the whole collection through a
//! [`PersistBackend`] every time a channel changes. It only reads it back when it's loaded.
//!
//! [`Bip47Wallet`]: crate::wallet::Bip47Wallet

use crate::channel::Channel;

/// A persistence backend for channels
pub trait PersistBackend {
    /// The error the backend returns when it fails to write
    type WriteError: core::fmt::Debug;
    /// The error the backend returns when it fails to load
    type LoadError: core::fmt::Debug;

    /// Replace the persisted collection with `channels`.
    ///
    /// An interrupted save must leave either the previous collection or the new one behind,
    /// never a mix of the two.
    fn save(&mut self, channels: &[Channel]) -> Result<(), Self::WriteError>;

    /// Read back the last saved collection. Nothing saved yet is not an error.
    fn load(&mut self) -> Result<Vec<Channel>, Self::LoadError>;
}

impl PersistBackend for () {
    type WriteError = ();
    type LoadError = ();

    fn save(&mut self, _channels: &[Channel]) -> Result<(), Self::WriteError> {
        Ok(())
    }

    fn load(&mut self) -> Result<Vec<Channel>, Self::LoadError> {
        Ok(Vec::new())
    }
}

#[cfg(feature = "file-store")]
mod file_store {
    use std::fmt;
    use std::fs::{self, File};
    use std::io::{self, Write};
    use std::path::{Path, PathBuf};

    use super::*;

    /// Errors of a [`JsonFileStore`]
    #[derive(Debug)]
    pub enum FileStoreError {
        Io(io::Error),
        Json(serde_json::Error),
    }

    impl fmt::Display for FileStoreError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                FileStoreError::Io(e) => write!(f, "I/O error: {}", e),
                FileStoreError::Json(e) => write!(f, "Invalid channel file: {}", e),
            }
        }
    }

    impl std::error::Error for FileStoreError {}

    impl_error!(io::Error, Io, FileStoreError);
    impl_error!(serde_json::Error, Json, FileStoreError);

    /// Store channels as a pretty-printed JSON array in a single file.
    ///
    /// Saves go to `<path>.tmp` first, which is then renamed over `<path>`.
    #[derive(Debug, Clone)]
    pub struct JsonFileStore {
        path: PathBuf,
    }

    impl JsonFileStore {
        pub fn new<P: AsRef<Path>>(path: P) -> Self {
            JsonFileStore {
                path: path.as_ref().to_path_buf(),
            }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn tmp_path(&self) -> PathBuf {
            let mut tmp = self.path.clone().into_os_string();
            tmp.push(".tmp");
            tmp.into()
        }
    }

    impl PersistBackend for JsonFileStore {
        type WriteError = FileStoreError;
        type LoadError = FileStoreError;

        fn save(&mut self, channels: &[Channel]) -> Result<(), Self::WriteError> {
            let data = serde_json::to_vec_pretty(channels)?;
            let tmp = self.tmp_path();

            let mut file = File::create(&tmp)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;

            log::debug!("Saved {} channels to {}", channels.len(), self.path.display());
            Ok(())
        }

        fn load(&mut self) -> Result<Vec<Channel>, Self::LoadError> {
            let data = match fs::read(&self.path) {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            Ok(serde_json::from_slice(&data)?)
        }
    }

}

#[cfg(feature = "file-store")]
pub use file_store::*;
