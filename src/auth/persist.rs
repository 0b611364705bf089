// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session persistence across restarts.
//!
//! Only the token pair is written; identity and expiry are decoded from the
//! access token again when the file is loaded.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{AuthError, Session};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedSession {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
        }
    }
}

/// JSON file holding the last signed-in session.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the persisted token pair, if there is one.
    pub fn load(&self) -> Result<Option<PersistedSession>, AuthError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence(&self.path, e)),
        };
        let persisted = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| AuthError::Persistence(format!("{}: {e}", self.path.display())))?;
        Ok(Some(persisted))
    }

    /// Write the session (atomic write via rename).
    pub fn save(&self, session: &Session) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| persistence(parent, e))?;
        }

        let temp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&temp_path).map_err(|e| persistence(&temp_path, e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &PersistedSession::from(session))
                .map_err(|e| AuthError::Persistence(e.to_string()))?;
            writer.flush().map_err(|e| persistence(&temp_path, e))?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| persistence(&self.path, e))
    }

    /// Remove the persisted session. Missing files are fine.
    pub fn clear(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence(&self.path, e)),
        }
    }
}

fn persistence(path: &Path, e: io::Error) -> AuthError {
    AuthError::Persistence(format!("{}: {e}", path.display()))
}
