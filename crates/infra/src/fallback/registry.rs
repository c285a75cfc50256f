//! Last-known-good tool catalog.
//!
//! One snapshot per tenant. A snapshot older than `max_age` is kept but
//! never served.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use toolmesh_common::resilience::{Clock, SharedClock, SystemClock};
use toolmesh_domain::types::Tool;
use tracing::{debug, info};

use super::errors::FallbackError;

#[derive(Debug, Clone)]
struct Snapshot {
    tools: Vec<Tool>,
    last_update: SystemTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    last_update: DateTime<Utc>,
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRegistry {
    saved_at: DateTime<Utc>,
    tenants: BTreeMap<String, PersistedSnapshot>,
}

pub struct FallbackRegistry {
    snapshots: RwLock<HashMap<String, Snapshot>>,
    max_age: Duration,
    clock: SharedClock,
}

impl std::fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRegistry")
            .field("tenants", &self.snapshots.read().len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl FallbackRegistry {
    pub fn new(max_age: Duration) -> Self {
        Self::with_clock(max_age, Arc::new(SystemClock))
    }

    pub fn with_clock(max_age: Duration, clock: SharedClock) -> Self {
        Self { snapshots: RwLock::new(HashMap::new()), max_age, clock }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Replace the snapshot for `tenant` and stamp it with the current time
    pub fn update_tools(&self, tenant: &str, tools: Vec<Tool>) {
        let count = tools.len();
        let snapshot = Snapshot { tools, last_update: self.clock.system_time() };
        self.snapshots.write().insert(tenant.to_string(), snapshot);
        debug!(tenant, count, "fallback snapshot updated");
    }

    /// Replace one tool in an existing snapshot without restamping it.
    ///
    /// Returns false when there is no snapshot for `tenant`.
    pub fn upsert_tool(&self, tenant: &str, tool: Tool) -> bool {
        let mut snapshots = self.snapshots.write();
        let Some(snapshot) = snapshots.get_mut(tenant) else {
            return false;
        };
        match snapshot.tools.iter_mut().find(|t| t.id == tool.id) {
            Some(existing) => *existing = tool,
            None => snapshot.tools.push(tool),
        }
        true
    }

    /// Tools for `tenant`, or `None` if there is no fresh snapshot
    pub fn get_tools(&self, tenant: &str) -> Option<Vec<Tool>> {
        self.fresh_tools(tenant).ok()
    }

    pub fn get_tool(&self, tenant: &str, tool_id: &str) -> Option<Tool> {
        self.fresh_tool(tenant, tool_id).ok()
    }

    /// Like [`get_tools`](Self::get_tools), saying why nothing was served
    pub fn fresh_tools(&self, tenant: &str) -> Result<Vec<Tool>, FallbackError> {
        let snapshots = self.snapshots.read();
        let snapshot = self.fresh(&snapshots, tenant)?;
        Ok(snapshot.tools.clone())
    }

    pub fn fresh_tool(&self, tenant: &str, tool_id: &str) -> Result<Tool, FallbackError> {
        let snapshots = self.snapshots.read();
        let snapshot = self.fresh(&snapshots, tenant)?;
        snapshot.tools.iter().find(|t| t.id == tool_id).cloned().ok_or_else(|| {
            FallbackError::ToolMissing { tenant: tenant.to_string(), tool_id: tool_id.to_string() }
        })
    }

    fn fresh<'a>(
        &self,
        snapshots: &'a HashMap<String, Snapshot>,
        tenant: &str,
    ) -> Result<&'a Snapshot, FallbackError> {
        let snapshot = snapshots
            .get(tenant)
            .ok_or_else(|| FallbackError::Missing { tenant: tenant.to_string() })?;
        let age = self.age_of(snapshot);
        if age > self.max_age {
            return Err(FallbackError::Stale {
                tenant: tenant.to_string(),
                age,
                max_age: self.max_age,
            });
        }
        Ok(snapshot)
    }

    fn age_of(&self, snapshot: &Snapshot) -> Duration {
        self.clock.system_time().duration_since(snapshot.last_update).unwrap_or(Duration::ZERO)
    }

    /// Time since the snapshot for `tenant` was taken
    pub fn age(&self, tenant: &str) -> Option<Duration> {
        self.snapshots.read().get(tenant).map(|s| self.age_of(s))
    }

    /// True when there is no snapshot or it is older than `max_age`
    pub fn is_stale(&self, tenant: &str) -> bool {
        self.age(tenant).map_or(true, |age| age > self.max_age)
    }

    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.snapshots.read().keys().cloned().collect();
        tenants.sort();
        tenants
    }

    pub fn clear(&self) {
        self.snapshots.write().clear();
    }

    /// Write every snapshot to `path` as JSON.
    ///
    /// The file is written next to `path` and renamed over it, so readers
    /// never see a partial snapshot.
    pub async fn persist_to_disk(&self, path: &Path) -> Result<(), FallbackError> {
        let persisted = {
            let snapshots = self.snapshots.read();
            PersistedRegistry {
                saved_at: Utc::now(),
                tenants: snapshots
                    .iter()
                    .map(|(tenant, s)| {
                        let snapshot = PersistedSnapshot {
                            last_update: DateTime::<Utc>::from(s.last_update),
                            tools: s.tools.clone(),
                        };
                        (tenant.clone(), snapshot)
                    })
                    .collect(),
            }
        };
        let json = serde_json::to_vec_pretty(&persisted)?;

        let tmp = path.with_extension("tmp");
        let io_err = |source| FallbackError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&tmp, &json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;

        debug!(path = %path.display(), tenants = persisted.tenants.len(), "fallback snapshot persisted");
        Ok(())
    }

    /// Replace all snapshots with the ones stored at `path`.
    ///
    /// Snapshot timestamps are kept, so a file older than `max_age` loads
    /// but serves nothing. Returns the number of tenants loaded.
    pub async fn load_from_disk(&self, path: &Path) -> Result<usize, FallbackError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| FallbackError::Io { path: path.to_path_buf(), source })?;
        let persisted: PersistedRegistry = serde_json::from_slice(&bytes)?;

        let loaded: HashMap<String, Snapshot> = persisted
            .tenants
            .into_iter()
            .map(|(tenant, s)| {
                let snapshot = Snapshot { tools: s.tools, last_update: SystemTime::from(s.last_update) };
                (tenant, snapshot)
            })
            .collect();
        let count = loaded.len();
        *self.snapshots.write() = loaded;

        info!(path = %path.display(), tenants = count, "fallback snapshot loaded");
        Ok(count)
    }
}
