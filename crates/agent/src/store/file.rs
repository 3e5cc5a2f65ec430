//! Filesystem store
//!
//! # Directory Structure
//!
//! ```text
//! store/
//! ├── domains/
//! │   └── example.org/
//! │       ├── md.json            # Managed domain record
//! │       └── certificate.json   # Chain, key and metadata, replaced as a unit
//! ├── accounts/
//! │   └── ACME-example.org-0000/
//! │       ├── account.json       # Account record
//! │       └── account.pem        # Account key
//! ├── authz/
//! │   └── example.org/
//! │       └── authz.json         # Authorization set of the managed domain
//! ├── staging/
//! │   └── example.org/
//! │       └── privkey.pem        # Key for the certificate being issued
//! └── challenges/
//!     └── example.org/
//!         └── http-01.txt        # Challenge material for an external server
//! ```
//!
//! Every file is written to a temporary file in the target directory and
//! renamed into place. Directories are created with mode 0700 and key
//! material with mode 0600 on Unix.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use mdacme_config::ChallengeType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, trace};

use super::{check_key, Store, StoredCertificate};
use crate::account::AccountRecord;
use crate::authz::AuthzSet;
use crate::error::StoreError;
use crate::md::ManagedDomain;

const DOMAINS: &str = "domains";
const ACCOUNTS: &str = "accounts";
const AUTHZ: &str = "authz";
const STAGING: &str = "staging";
const CHALLENGES: &str = "challenges";

/// Store rooted at a directory
#[derive(Debug)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Open the store, creating its directory structure
    pub fn new(base_path: &Path) -> Result<Self, StoreError> {
        create_private_dir(base_path)?;
        for group in [DOMAINS, ACCOUNTS, AUTHZ, STAGING, CHALLENGES] {
            create_private_dir(&base_path.join(group))?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate store"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path(&self, group: &str, key: &str, file: &str) -> Result<PathBuf, StoreError> {
        check_key(key)?;
        Ok(self.base_path.join(group).join(key).join(file))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        match read_optional(path)? {
            Some(content) => {
                let value = serde_json::from_str(&content)?;
                trace!(path = %path.display(), "Loaded store entry");
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T, private: bool) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(value)?;
        write_atomic(path, &content, private)
    }

    fn list_group(&self, group: &str, marker: &str) -> Result<Vec<String>, StoreError> {
        let group_path = self.base_path.join(group);
        let entries = match fs::read_dir(&group_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || !entry.path().join(marker).exists() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl Store for FileStore {
    fn load_md(&self, name: &str) -> Result<Option<ManagedDomain>, StoreError> {
        self.read_json(&self.path(DOMAINS, name, "md.json")?)
    }

    fn save_md(&self, md: &ManagedDomain) -> Result<(), StoreError> {
        self.write_json(&self.path(DOMAINS, &md.name, "md.json")?, md, false)?;
        debug!(md = %md.name, state = %md.state, "Saved managed domain");
        Ok(())
    }

    fn list_mds(&self) -> Result<Vec<String>, StoreError> {
        self.list_group(DOMAINS, "md.json")
    }

    fn load_account(&self, id: &str) -> Result<Option<AccountRecord>, StoreError> {
        self.read_json(&self.path(ACCOUNTS, id, "account.json")?)
    }

    fn save_account(&self, record: &AccountRecord) -> Result<(), StoreError> {
        self.write_json(&self.path(ACCOUNTS, &record.id, "account.json")?, record, true)?;
        debug!(account = %record.id, url = %record.url, "Saved account");
        Ok(())
    }

    fn list_accounts(&self) -> Result<Vec<String>, StoreError> {
        self.list_group(ACCOUNTS, "account.json")
    }

    fn load_account_key(&self, id: &str) -> Result<Option<String>, StoreError> {
        read_optional(&self.path(ACCOUNTS, id, "account.pem")?)
    }

    fn save_account_key(&self, id: &str, key_pem: &str) -> Result<(), StoreError> {
        write_atomic(&self.path(ACCOUNTS, id, "account.pem")?, key_pem.as_bytes(), true)
    }

    fn create_account_key(&self, id: &str, key_pem: &str) -> Result<bool, StoreError> {
        let path = self.path(ACCOUNTS, id, "account.pem")?;
        let created = write_new(&path, key_pem.as_bytes())?;
        if !created {
            trace!(account = %id, "Account id already taken");
        }
        Ok(created)
    }

    fn load_authz_set(&self, md: &str) -> Result<Option<AuthzSet>, StoreError> {
        self.read_json(&self.path(AUTHZ, md, "authz.json")?)
    }

    fn save_authz_set(&self, md: &str, set: &AuthzSet) -> Result<(), StoreError> {
        self.write_json(&self.path(AUTHZ, md, "authz.json")?, set, false)
    }

    fn load_staged_key(&self, md: &str) -> Result<Option<String>, StoreError> {
        read_optional(&self.path(STAGING, md, "privkey.pem")?)
    }

    fn save_staged_key(&self, md: &str, key_pem: &str) -> Result<(), StoreError> {
        write_atomic(&self.path(STAGING, md, "privkey.pem")?, key_pem.as_bytes(), true)
    }

    fn remove_staged_key(&self, md: &str) -> Result<(), StoreError> {
        remove_optional(&self.path(STAGING, md, "privkey.pem")?)
    }

    fn load_certificate(&self, md: &str) -> Result<Option<StoredCertificate>, StoreError> {
        let cert: Option<StoredCertificate> =
            self.read_json(&self.path(DOMAINS, md, "certificate.json")?)?;
        if let Some(ref cert) = cert {
            debug!(md = %md, expires = %cert.meta.expires, "Loaded stored certificate");
        }
        Ok(cert)
    }

    fn save_certificate(&self, md: &str, cert: &StoredCertificate) -> Result<(), StoreError> {
        self.write_json(&self.path(DOMAINS, md, "certificate.json")?, cert, true)?;
        info!(md = %md, expires = %cert.meta.expires, "Saved certificate to store");
        Ok(())
    }

    fn save_challenge(
        &self,
        domain: &str,
        kind: ChallengeType,
        content: &str,
    ) -> Result<(), StoreError> {
        let file = format!("{}.txt", kind);
        write_atomic(&self.path(CHALLENGES, domain, &file)?, content.as_bytes(), false)
    }

    fn load_challenge(
        &self,
        domain: &str,
        kind: ChallengeType,
    ) -> Result<Option<String>, StoreError> {
        let file = format!("{}.txt", kind);
        read_optional(&self.path(CHALLENGES, domain, &file)?)
    }

    fn remove_challenge(&self, domain: &str, kind: ChallengeType) -> Result<(), StoreError> {
        let file = format!("{}.txt", kind);
        remove_optional(&self.path(CHALLENGES, domain, &file)?)
    }
}

fn create_private_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!(path = %path.display(), "No store entry");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_optional(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create `path` with private permissions, `false` if it already exists
///
/// The content is written to a temporary file first and linked into place,
/// which fails atomically when the target already exists.
fn write_new(path: &Path, content: &[u8]) -> Result<bool, StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
    if !dir.exists() {
        create_private_dir(dir)?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    match tmp.persist_noclobber(path) {
        Ok(_) => {
            trace!(path = %path.display(), len = content.len(), "Created store entry");
            Ok(true)
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(StoreError::Io(e.error)),
    }
}

/// Replace `path` with `content` via a temporary file and rename
fn write_atomic(path: &Path, content: &[u8], private: bool) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
    if !dir.exists() {
        create_private_dir(dir)?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if private { 0o600 } else { 0o644 };
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    trace!(path = %path.display(), len = content.len(), "Wrote store entry");
    Ok(())
}
