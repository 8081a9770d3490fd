//! Read-only views of the surrounding portal: resources, department tokens
//! and API keys. The engine never writes through these.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::{Principal, Resource};

#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    async fn resource(&self, id: Ulid) -> Option<Resource>;

    /// Every resource filed under `group`, across departments.
    async fn resources_in_group(&self, group: &str) -> Vec<Resource>;

    /// Resolve a department's opaque access token to its id.
    async fn department_by_token(&self, token: &str) -> Option<Ulid>;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `None` for unknown or malformed keys. Callers must not distinguish
    /// the two.
    async fn authenticate(&self, api_key: &str) -> Option<Principal>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepartmentEntry {
    pub id: Ulid,
    pub name: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub id: Ulid,
    #[serde(default)]
    pub name: Option<String>,
    pub api_key: String,
    #[serde(default)]
    pub departments: Vec<Ulid>,
    #[serde(default)]
    pub admin: bool,
}

/// On-disk shape of a directory file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryFile {
    #[serde(default)]
    pub departments: Vec<DepartmentEntry>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

/// Directory held in memory, loaded once at startup.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    resources: HashMap<Ulid, Resource>,
    tokens: HashMap<String, Ulid>,
    keys: HashMap<String, Principal>,
}

impl StaticDirectory {
    pub fn new(file: DirectoryFile) -> Self {
        let tokens = file
            .departments
            .into_iter()
            .map(|d| (d.token, d.id))
            .collect();
        let resources = file.resources.into_iter().map(|r| (r.id, r)).collect();
        let keys = file
            .users
            .into_iter()
            .map(|u| {
                let principal = Principal {
                    user_id: u.id,
                    departments: u.departments,
                    admin: u.admin,
                };
                (u.api_key, principal)
            })
            .collect();
        Self {
            resources,
            tokens,
            keys,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

#[async_trait]
impl ResourceDirectory for StaticDirectory {
    async fn resource(&self, id: Ulid) -> Option<Resource> {
        self.resources.get(&id).cloned()
    }

    async fn resources_in_group(&self, group: &str) -> Vec<Resource> {
        let mut found: Vec<Resource> = self
            .resources
            .values()
            .filter(|r| r.group == group)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.id);
        found
    }

    async fn department_by_token(&self, token: &str) -> Option<Ulid> {
        self.tokens.get(token).copied()
    }
}

#[async_trait]
impl Authenticator for StaticDirectory {
    async fn authenticate(&self, api_key: &str) -> Option<Principal> {
        if api_key.is_empty() || api_key.len() > crate::limits::MAX_API_KEY_LEN {
            return None;
        }
        self.keys.get(api_key).cloned()
    }
}
