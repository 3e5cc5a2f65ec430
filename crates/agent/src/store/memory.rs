//! In-memory store for tests and embedding.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mdacme_config::ChallengeType;

use super::{check_key, Store, StoredCertificate};
use crate::account::AccountRecord;
use crate::authz::AuthzSet;
use crate::error::StoreError;
use crate::md::ManagedDomain;

/// Store keeping every entry in concurrent maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    mds: DashMap<String, ManagedDomain>,
    accounts: DashMap<String, AccountRecord>,
    account_keys: DashMap<String, String>,
    authz: DashMap<String, AuthzSet>,
    staged_keys: DashMap<String, String>,
    certificates: DashMap<String, StoredCertificate>,
    challenges: DashMap<(String, ChallengeType), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_keys<V>(map: &DashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.iter().map(|e| e.key().clone()).collect();
    keys.sort();
    keys
}

fn get<V: Clone>(map: &DashMap<String, V>, key: &str) -> Result<Option<V>, StoreError> {
    check_key(key)?;
    Ok(map.get(key).map(|v| v.value().clone()))
}

fn put<V>(map: &DashMap<String, V>, key: &str, value: V) -> Result<(), StoreError> {
    check_key(key)?;
    map.insert(key.to_string(), value);
    Ok(())
}

impl Store for MemoryStore {
    fn load_md(&self, name: &str) -> Result<Option<ManagedDomain>, StoreError> {
        get(&self.mds, name)
    }

    fn save_md(&self, md: &ManagedDomain) -> Result<(), StoreError> {
        put(&self.mds, &md.name, md.clone())
    }

    fn list_mds(&self) -> Result<Vec<String>, StoreError> {
        Ok(sorted_keys(&self.mds))
    }

    fn load_account(&self, id: &str) -> Result<Option<AccountRecord>, StoreError> {
        get(&self.accounts, id)
    }

    fn save_account(&self, record: &AccountRecord) -> Result<(), StoreError> {
        put(&self.accounts, &record.id, record.clone())
    }

    fn list_accounts(&self) -> Result<Vec<String>, StoreError> {
        Ok(sorted_keys(&self.accounts))
    }

    fn load_account_key(&self, id: &str) -> Result<Option<String>, StoreError> {
        get(&self.account_keys, id)
    }

    fn save_account_key(&self, id: &str, key_pem: &str) -> Result<(), StoreError> {
        put(&self.account_keys, id, key_pem.to_string())
    }

    fn create_account_key(&self, id: &str, key_pem: &str) -> Result<bool, StoreError> {
        check_key(id)?;
        match self.account_keys.entry(id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(key_pem.to_string());
                Ok(true)
            }
        }
    }

    fn load_authz_set(&self, md: &str) -> Result<Option<AuthzSet>, StoreError> {
        get(&self.authz, md)
    }

    fn save_authz_set(&self, md: &str, set: &AuthzSet) -> Result<(), StoreError> {
        put(&self.authz, md, set.clone())
    }

    fn load_staged_key(&self, md: &str) -> Result<Option<String>, StoreError> {
        get(&self.staged_keys, md)
    }

    fn save_staged_key(&self, md: &str, key_pem: &str) -> Result<(), StoreError> {
        put(&self.staged_keys, md, key_pem.to_string())
    }

    fn remove_staged_key(&self, md: &str) -> Result<(), StoreError> {
        check_key(md)?;
        self.staged_keys.remove(md);
        Ok(())
    }

    fn load_certificate(&self, md: &str) -> Result<Option<StoredCertificate>, StoreError> {
        get(&self.certificates, md)
    }

    fn save_certificate(&self, md: &str, cert: &StoredCertificate) -> Result<(), StoreError> {
        put(&self.certificates, md, cert.clone())
    }

    fn save_challenge(
        &self,
        domain: &str,
        kind: ChallengeType,
        content: &str,
    ) -> Result<(), StoreError> {
        check_key(domain)?;
        self.challenges
            .insert((domain.to_string(), kind), content.to_string());
        Ok(())
    }

    fn load_challenge(
        &self,
        domain: &str,
        kind: ChallengeType,
    ) -> Result<Option<String>, StoreError> {
        check_key(domain)?;
        Ok(self
            .challenges
            .get(&(domain.to_string(), kind))
            .map(|v| v.value().clone()))
    }

    fn remove_challenge(&self, domain: &str, kind: ChallengeType) -> Result<(), StoreError> {
        check_key(domain)?;
        self.challenges.remove(&(domain.to_string(), kind));
        Ok(())
    }
}
