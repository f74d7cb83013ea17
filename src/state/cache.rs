//! Package state cache
//!
//! Single source of truth for "is package X installed, at what version, is it
//! outdated". The snapshot is rebuilt from package manager queries when it is
//! older than the TTL and persisted as JSON after every mutation.
//!
//! Readers hold an `Arc` to one immutable snapshot generation. A full refresh
//! builds a new snapshot and swaps the pointer under the write lock, so a
//! reader never sees a mix of old and new entries.

use crate::config::schema::PackagesConfig;
use crate::error::{KegError, KegResult};
use crate::fsutil;
use crate::runner::{command_line, CommandRunner, RunMode};
use crate::state::query::{self, VersionInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Observed state of one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
    pub installed: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub installed_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_version: String,

    /// Only ever true for installed packages
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub outdated: bool,

    pub fetched_at: DateTime<Utc>,
}

impl PackageState {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            installed: false,
            installed_version: String::new(),
            latest_version: String::new(),
            outdated: false,
            fetched_at: now,
        }
    }
}

/// One generation of the cache, as persisted on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Time of the last full refresh; `None` forces the next read to refresh
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub packages: BTreeMap<String, PackageState>,
}

impl CacheSnapshot {
    fn is_stale(&self, ttl: Duration) -> bool {
        match self.last_updated {
            None => true,
            // A timestamp in the future counts as fresh
            Some(at) => (Utc::now() - at).to_std().is_ok_and(|age| age > ttl),
        }
    }
}

/// Installed and latest versions of an outdated package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    pub name: String,
    pub installed_version: String,
    pub latest_version: String,
}

/// Tunables for the cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub manager: String,
    pub ttl: Duration,
    pub batch_size: usize,
    pub command_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&PackagesConfig::default())
    }
}

impl From<&PackagesConfig> for CacheSettings {
    fn from(config: &PackagesConfig) -> Self {
        Self {
            manager: config.manager.clone(),
            ttl: Duration::from_secs(config.ttl_secs),
            batch_size: config.batch_size.max(1),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

/// Process-wide cache handle; share it by reference or `Arc`
pub struct PackageStateCache {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
    settings: CacheSettings,
    snapshot: RwLock<Arc<CacheSnapshot>>,
}

impl PackageStateCache {
    /// Open the cache backed by `path`, loading any previous snapshot.
    ///
    /// A missing or unreadable file yields an empty, stale snapshot.
    pub fn open(path: PathBuf, runner: Arc<dyn CommandRunner>, settings: CacheSettings) -> Self {
        let snapshot = load_snapshot(&path);
        Self {
            path,
            runner,
            settings,
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot generation
    pub async fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Whether the next `is_installed` would trigger a refresh
    pub async fn is_stale(&self) -> bool {
        self.snapshot.read().await.is_stale(self.settings.ttl)
    }

    /// Check if a package is installed, refreshing first if the cache is stale.
    ///
    /// Never fails: a failed or cancelled refresh answers from whatever is cached.
    pub async fn is_installed(&self, cancel: &CancellationToken, name: &str) -> bool {
        if self.is_stale().await {
            if let Err(e) = self.refresh(cancel, false).await {
                debug!("Package state refresh failed, using cached data: {}", e);
            }
        }
        self.snapshot
            .read()
            .await
            .packages
            .get(name)
            .is_some_and(|p| p.installed)
    }

    /// Cached state for a package, if known
    pub async fn get_state(&self, name: &str) -> Option<PackageState> {
        self.snapshot.read().await.packages.get(name).cloned()
    }

    /// Names of all installed packages
    pub async fn installed_set(&self) -> BTreeSet<String> {
        self.snapshot
            .read()
            .await
            .packages
            .iter()
            .filter(|(_, p)| p.installed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Packages that are both installed and outdated
    pub async fn outdated_map(&self) -> BTreeMap<String, PackageInfo> {
        self.snapshot
            .read()
            .await
            .packages
            .iter()
            .filter(|(_, p)| p.installed && p.outdated)
            .map(|(name, p)| {
                (
                    name.clone(),
                    PackageInfo {
                        name: name.clone(),
                        installed_version: p.installed_version.clone(),
                        latest_version: p.latest_version.clone(),
                    },
                )
            })
            .collect()
    }

    /// Rebuild the snapshot from the package manager.
    ///
    /// Skipped when fresh unless `force`. A failed outdated query is not
    /// fatal: the refresh continues with nothing marked outdated.
    pub async fn refresh(&self, cancel: &CancellationToken, force: bool) -> KegResult<()> {
        let mut current = self.snapshot.write().await;

        if !force && !current.is_stale(self.settings.ttl) {
            debug!(
                "Package state is fresh, skipping refresh (last updated {:?})",
                current.last_updated
            );
            return Ok(());
        }

        debug!("Refreshing package state...");
        let start = Instant::now();

        let installed = self.query_installed(cancel).await?;
        let outdated = match self.query_outdated(cancel).await {
            Ok(map) => map,
            Err(KegError::Cancelled) => return Err(KegError::Cancelled),
            Err(e) => {
                debug!("Outdated query failed (non-fatal): {}", e);
                HashMap::new()
            }
        };

        let now = Utc::now();
        let packages = installed
            .into_iter()
            .map(|name| {
                let state = match outdated.get(&name) {
                    Some(v) => PackageState {
                        installed: true,
                        installed_version: v.installed.clone(),
                        latest_version: v.latest.clone(),
                        outdated: true,
                        fetched_at: now,
                    },
                    None => {
                        let previous = current.packages.get(&name);
                        PackageState {
                            installed: true,
                            installed_version: previous
                                .map(|p| p.installed_version.clone())
                                .unwrap_or_default(),
                            latest_version: previous
                                .map(|p| p.latest_version.clone())
                                .unwrap_or_default(),
                            outdated: false,
                            fetched_at: now,
                        }
                    }
                };
                (name, state)
            })
            .collect();

        let next = Arc::new(CacheSnapshot {
            last_updated: Some(now),
            packages,
        });
        self.persist(&next);
        *current = next;

        debug!(
            "Package state refreshed in {:?} ({} packages)",
            start.elapsed(),
            current.packages.len()
        );
        Ok(())
    }

    /// Fetch installed/latest versions for specific packages in batches.
    ///
    /// A failed batch is logged and skipped; the call only fails when every
    /// batch failed or it was cancelled.
    pub async fn refresh_versions(
        &self,
        cancel: &CancellationToken,
        names: &[String],
    ) -> KegResult<()> {
        let chunks = query::dedupe_chunks(names, self.settings.batch_size);
        if chunks.is_empty() {
            return Ok(());
        }

        let mut current = self.snapshot.write().await;
        let mut packages = current.packages.clone();
        let mut applied = 0usize;
        let mut last_error = None;

        for chunk in &chunks {
            let versions = match self.query_versions(cancel, chunk).await {
                Ok(v) => v,
                Err(KegError::Cancelled) => return Err(KegError::Cancelled),
                Err(e) => {
                    debug!("Version query failed for {} package(s): {}", chunk.len(), e);
                    last_error = Some(e);
                    continue;
                }
            };

            let now = Utc::now();
            for (name, v) in versions {
                let entry = packages
                    .entry(name)
                    .or_insert_with(|| PackageState::empty(now));
                entry.installed = !v.installed.is_empty();
                entry.outdated = entry.installed && !v.latest.is_empty() && v.installed != v.latest;
                entry.installed_version = v.installed;
                entry.latest_version = v.latest;
                entry.fetched_at = now;
            }
            applied += 1;
        }

        if applied == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        let next = Arc::new(CacheSnapshot {
            last_updated: current.last_updated,
            packages,
        });
        self.persist(&next);
        *current = next;
        Ok(())
    }

    /// Drop the named entries, or with no names force a full refresh on the
    /// next read while keeping the current data.
    pub async fn invalidate(&self, names: &[&str]) {
        self.mutate(|snapshot| {
            if names.is_empty() {
                snapshot.last_updated = None;
            } else {
                for name in names {
                    snapshot.packages.remove(*name);
                }
            }
        })
        .await;
    }

    /// Record a successful install
    pub async fn mark_installed(&self, name: &str, version: &str) {
        self.mutate(|snapshot| {
            let now = Utc::now();
            let entry = snapshot
                .packages
                .entry(name.to_string())
                .or_insert_with(|| PackageState::empty(now));
            entry.installed = true;
            entry.installed_version = version.to_string();
            entry.latest_version = version.to_string();
            entry.outdated = false;
            entry.fetched_at = now;
        })
        .await;
    }

    /// Record a successful upgrade
    pub async fn mark_upgraded(&self, name: &str, version: &str) {
        // Same resulting state as a fresh install of `version`
        self.mark_installed(name, version).await;
    }

    /// Record a successful removal
    pub async fn mark_uninstalled(&self, name: &str) {
        self.mutate(|snapshot| {
            snapshot.packages.remove(name);
        })
        .await;
    }

    async fn mutate(&self, f: impl FnOnce(&mut CacheSnapshot)) {
        let mut current = self.snapshot.write().await;
        let snapshot = Arc::make_mut(&mut *current);
        f(snapshot);
        self.persist(snapshot);
    }

    fn persist(&self, snapshot: &CacheSnapshot) {
        if let Err(e) = fsutil::write_json_atomic(&self.path, snapshot) {
            warn!("Failed to save package state cache: {}", e);
        }
    }

    async fn query_installed(&self, cancel: &CancellationToken) -> KegResult<BTreeSet<String>> {
        let out = self.query(cancel, &["list", "--formula", "-1"]).await?;
        Ok(query::parse_installed(&out))
    }

    async fn query_outdated(
        &self,
        cancel: &CancellationToken,
    ) -> KegResult<HashMap<String, VersionInfo>> {
        let args = ["outdated", "--json=v2"];
        let out = self.query(cancel, &args).await?;
        query::parse_outdated(&out, &command_line(&self.settings.manager, &args))
    }

    async fn query_versions(
        &self,
        cancel: &CancellationToken,
        names: &[String],
    ) -> KegResult<HashMap<String, VersionInfo>> {
        let mut args = vec!["info", "--json=v2"];
        args.extend(names.iter().map(String::as_str));
        let out = self.query(cancel, &args).await?;
        query::parse_info(&out, &command_line(&self.settings.manager, &args))
    }

    async fn query(&self, cancel: &CancellationToken, args: &[&str]) -> KegResult<Vec<u8>> {
        self.runner
            .run(
                cancel,
                self.settings.command_timeout,
                RunMode::Capture,
                &self.settings.manager,
                args,
            )
            .await
    }
}

fn load_snapshot(path: &Path) -> CacheSnapshot {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheSnapshot::default(),
        Err(e) => {
            debug!("Cannot read package state cache {}: {}", path.display(), e);
            return CacheSnapshot::default();
        }
    };

    match serde_json::from_slice::<CacheSnapshot>(&data) {
        Ok(snapshot) => {
            debug!(
                "Loaded package state cache ({} packages, last updated {:?})",
                snapshot.packages.len(),
                snapshot.last_updated
            );
            snapshot
        }
        Err(e) => {
            debug!("Discarding corrupt package state cache (will rebuild): {}", e);
            CacheSnapshot::default()
        }
    }
}
