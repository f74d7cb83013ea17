//! Catalog freshness decisions
//!
//! A refresh is a small state machine over local presence, stored metadata,
//! the caller's `force` flag and the upstream status:
//!
//! - fresh catalog and no `force`: nothing happens, no request is made
//! - otherwise a GET is issued, conditional on the stored upstream ETag when
//!   a catalog is present
//! - 304 with a catalog: only `last_checked` moves
//! - 304 without a catalog: one unconditional refetch, then give up
//! - 200: the body is built and stored
//! - anything else: `last_checked` moves and the error is returned
//!
//! Every path that touches the network records `last_checked` exactly once.

use crate::catalog::builder::build_catalog;
use crate::catalog::fetch::{BodyLimitExceeded, CappedBody, FetchResponse, Fetcher};
use crate::catalog::store::{CatalogMeta, CatalogStore};
use crate::config::schema::CatalogConfig;
use crate::error::{KegError, KegResult};
use chrono::{DateTime, Utc};
use std::io::{Seek, SeekFrom};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub url: String,
    pub interval: Duration,
    pub max_download_bytes: u64,
}

impl From<&CatalogConfig> for SchedulerSettings {
    fn from(config: &CatalogConfig) -> Self {
        Self {
            url: config.url.clone(),
            interval: config.refresh_interval(),
            max_download_bytes: config.max_download_bytes(),
        }
    }
}

/// What a refresh did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Within the refresh interval; no request made
    Fresh,
    /// Upstream reported no change
    NotModified,
    /// A new catalog was stored
    Updated {
        count: usize,
        size_bytes: u64,
        etag: String,
    },
    /// Metadata pointed at a missing catalog; an unconditional fetch restored it
    Recovered {
        count: usize,
        size_bytes: u64,
        etag: String,
    },
}

pub struct RefreshScheduler {
    store: Arc<CatalogStore>,
    fetcher: Arc<dyn Fetcher>,
    settings: SchedulerSettings,
}

impl RefreshScheduler {
    pub fn new(
        store: Arc<CatalogStore>,
        fetcher: Arc<dyn Fetcher>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    /// Bring the stored catalog up to date.
    ///
    /// Concurrent calls are not deduplicated; the last atomic replace wins.
    pub fn refresh(&self, cancel: &CancellationToken, force: bool) -> KegResult<RefreshOutcome> {
        let now = Utc::now();
        let present = self.store.get_hot().is_some() || self.store.has_index();
        let meta = self.store.read_meta()?.unwrap_or_default();

        if present && !force {
            if let Some(last) = meta.last_activity() {
                let age = now.signed_duration_since(last);
                if age.to_std().is_ok_and(|age| age < self.settings.interval) {
                    debug!("Catalog is fresh (checked {}s ago), skipping", age.num_seconds());
                    return Ok(RefreshOutcome::Fresh);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(KegError::Cancelled);
        }

        let previous = if present && !meta.upstream_etag.is_empty() {
            Some(meta.upstream_etag.as_str())
        } else {
            None
        };

        let response = match self.fetch(previous) {
            Ok(r) => r,
            Err(e) => {
                self.touch_checked(now);
                return Err(e);
            }
        };

        match response.status {
            200 => {
                let meta = self.persist(cancel, response, now)?;
                info!("Catalog updated: {} items", meta.count);
                Ok(RefreshOutcome::Updated {
                    count: meta.count,
                    size_bytes: meta.size_bytes,
                    etag: meta.etag,
                })
            }
            304 if present => {
                self.touch_checked(now);
                info!("Catalog not modified upstream");
                Ok(RefreshOutcome::NotModified)
            }
            304 => {
                warn!("Catalog metadata present but catalog missing; refetching unconditionally");
                self.recover(cancel, now)
            }
            status => {
                self.touch_checked(now);
                Err(KegError::UpstreamStatus { status })
            }
        }
    }

    fn recover(&self, cancel: &CancellationToken, now: DateTime<Utc>) -> KegResult<RefreshOutcome> {
        let response = match self.fetch(None) {
            Ok(r) => r,
            Err(e) => {
                self.touch_checked(now);
                return Err(e);
            }
        };
        if response.status != 200 {
            self.touch_checked(now);
            return Err(KegError::DanglingRecovery {
                status: response.status,
            });
        }

        let meta = self.persist(cancel, response, now)?;
        info!("Catalog recovered: {} items", meta.count);
        Ok(RefreshOutcome::Recovered {
            count: meta.count,
            size_bytes: meta.size_bytes,
            etag: meta.etag,
        })
    }

    fn fetch(&self, if_none_match: Option<&str>) -> KegResult<FetchResponse> {
        self.fetcher.fetch(
            &self.settings.url,
            if_none_match,
            self.settings.max_download_bytes,
        )
    }

    /// Build the body into a spool file, then hand it to the store.
    ///
    /// Any failure records `last_checked` and leaves the stored catalog as it was.
    fn persist(
        &self,
        cancel: &CancellationToken,
        response: FetchResponse,
        now: DateTime<Utc>,
    ) -> KegResult<CatalogMeta> {
        let result = self.build_and_store(cancel, response, now);
        if result.is_err() {
            self.touch_checked(now);
        }
        result
    }

    fn build_and_store(
        &self,
        cancel: &CancellationToken,
        response: FetchResponse,
        now: DateTime<Utc>,
    ) -> KegResult<CatalogMeta> {
        let limit = self.settings.max_download_bytes;
        if let Some(declared) = response.content_length {
            if declared > limit {
                return Err(KegError::PayloadTooLarge {
                    size: declared,
                    limit,
                });
            }
        }
        let body = response
            .body
            .ok_or_else(|| KegError::Fetch("200 response without a body".to_string()))?;
        let body = CappedBody::new(body, limit);

        let dir = self.store.dir();
        std::fs::create_dir_all(dir)
            .map_err(|e| KegError::io(format!("creating {}", dir.display()), e))?;
        let mut spool = tempfile::tempfile_in(dir)
            .map_err(|e| KegError::io(format!("creating spool file in {}", dir.display()), e))?;

        let started = Instant::now();
        let built = build_catalog(cancel, body, &mut spool).map_err(over_limit)?;
        debug!("Catalog built in {:?}", started.elapsed());

        spool
            .seek(SeekFrom::Start(0))
            .map_err(|e| KegError::io("rewinding spool file", e))?;

        let meta = CatalogMeta {
            etag: built.etag(),
            generated_at: Some(built.generated_at),
            count: built.count,
            size_bytes: built.size_bytes,
            sha256: built.sha256,
            upstream_etag: response.etag.unwrap_or_default(),
            last_success: Some(now),
            last_checked: Some(now),
        };
        self.store.write_index_gz(&mut spool, &meta)
    }

    /// Best-effort `last_checked` update; writes default metadata if none exists.
    fn touch_checked(&self, now: DateTime<Utc>) {
        let mut meta = match self.store.read_meta() {
            Ok(meta) => meta.unwrap_or_default(),
            Err(e) => {
                debug!("Not recording catalog check: {}", e);
                return;
            }
        };
        meta.touch_checked(now);
        if let Err(e) = self.store.write_meta(&meta) {
            warn!("Failed to record catalog check: {}", e);
        }
    }
}

/// Surface a body that ran past the download cap as `PayloadTooLarge`.
fn over_limit(err: KegError) -> KegError {
    if let KegError::Io { source, .. } = &err {
        if let Some(over) = BodyLimitExceeded::find(source) {
            return KegError::PayloadTooLarge {
                size: over.seen,
                limit: over.limit,
            };
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogIndex;
    use chrono::Duration as ChronoDuration;
    use std::collections::VecDeque;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PAYLOAD: &str = r#"[{"name":"foo","versions":{"stable":"1.1.0"}},
                              {"name":"bar","versions":{"stable":"2.0"}}]"#;

    enum Scripted {
        Ok {
            status: u16,
            etag: Option<&'static str>,
            body: &'static str,
        },
        /// 200 without a declared length
        Undeclared(&'static str),
        Transport,
    }

    /// Replays queued responses and records the validator sent with each call
    #[derive(Default)]
    struct ScriptedFetcher {
        queue: Mutex<VecDeque<Scripted>>,
        seen: Mutex<Vec<Option<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(script.into()),
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Fetcher for ScriptedFetcher {
        fn fetch(
            &self,
            _url: &str,
            if_none_match: Option<&str>,
            _max_bytes: u64,
        ) -> KegResult<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push(if_none_match.map(str::to_string));
            match self.queue.lock().unwrap().pop_front() {
                Some(Scripted::Ok { status, etag, body }) => Ok(FetchResponse {
                    status,
                    etag: etag.map(str::to_string),
                    content_length: Some(body.len() as u64),
                    body: (status == 200)
                        .then(|| Box::new(body.as_bytes()) as Box<dyn Read + Send>),
                }),
                Some(Scripted::Undeclared(body)) => Ok(FetchResponse {
                    status: 200,
                    etag: None,
                    content_length: None,
                    body: Some(Box::new(body.as_bytes())),
                }),
                Some(Scripted::Transport) => Err(KegError::Fetch("connection reset".to_string())),
                None => panic!("unexpected fetch"),
            }
        }
    }

    fn ok(status: u16, etag: Option<&'static str>, body: &'static str) -> Scripted {
        Scripted::Ok { status, etag, body }
    }

    fn scheduler(dir: &TempDir, fetcher: Arc<ScriptedFetcher>) -> RefreshScheduler {
        RefreshScheduler::new(
            Arc::new(CatalogStore::open(dir.path())),
            fetcher,
            SchedulerSettings {
                url: "https://example.invalid/formula.json".to_string(),
                interval: Duration::from_secs(24 * 3600),
                max_download_bytes: 1024 * 1024,
            },
        )
    }

    /// Store a catalog whose last check happened `age` ago.
    fn seed(dir: &TempDir, age: ChronoDuration) -> CatalogMeta {
        let fetcher = ScriptedFetcher::new(vec![ok(200, Some("\"v1\""), PAYLOAD)]);
        let sched = scheduler(dir, fetcher);
        sched.refresh(&CancellationToken::new(), true).unwrap();

        let mut meta = sched.store().read_meta().unwrap().unwrap();
        let then = Utc::now() - age;
        meta.last_success = Some(then);
        meta.last_checked = Some(then);
        sched.store().write_meta(&meta).unwrap();
        meta
    }

    fn stored_meta(dir: &TempDir) -> CatalogMeta {
        CatalogStore::open(dir.path()).read_meta().unwrap().unwrap()
    }

    #[test]
    fn fresh_catalog_skips_network() {
        let dir = TempDir::new().unwrap();
        let before = seed(&dir, ChronoDuration::hours(1));
        let fetcher = ScriptedFetcher::new(vec![]);

        let outcome = scheduler(&dir, fetcher.clone())
            .refresh(&CancellationToken::new(), false)
            .unwrap();

        assert_eq!(outcome, RefreshOutcome::Fresh);
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(stored_meta(&dir), before);
    }

    #[test]
    fn first_refresh_builds_and_stores() {
        let dir = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(vec![ok(200, Some("\"v1\""), PAYLOAD)]);
        let sched = scheduler(&dir, fetcher.clone());

        let outcome = sched.refresh(&CancellationToken::new(), false).unwrap();

        let RefreshOutcome::Updated { count, etag, .. } = outcome else {
            panic!("expected update, got {outcome:?}");
        };
        assert_eq!(count, 2);
        assert_eq!(fetcher.seen(), vec![None]);

        let meta = stored_meta(&dir);
        assert_eq!(meta.etag, etag);
        assert_eq!(meta.upstream_etag, "\"v1\"");
        assert_eq!(meta.last_success, meta.last_checked);

        let opened = sched.store().open_index_gz(&CancellationToken::new()).unwrap();
        let index = CatalogIndex::from_gzip(opened.reader).unwrap();
        assert_eq!(index.items.len(), 2);
    }

    #[test]
    fn force_bypasses_interval_with_validator() {
        let dir = TempDir::new().unwrap();
        seed(&dir, ChronoDuration::minutes(5));
        let fetcher = ScriptedFetcher::new(vec![ok(304, None, "")]);

        let outcome = scheduler(&dir, fetcher.clone())
            .refresh(&CancellationToken::new(), true)
            .unwrap();

        assert_eq!(outcome, RefreshOutcome::NotModified);
        assert_eq!(fetcher.seen(), vec![Some("\"v1\"".to_string())]);
    }

    #[test]
    fn not_modified_only_touches_last_checked() {
        let dir = TempDir::new().unwrap();
        let before = seed(&dir, ChronoDuration::hours(30));
        let fetcher = ScriptedFetcher::new(vec![ok(304, None, "")]);

        let outcome = scheduler(&dir, fetcher.clone())
            .refresh(&CancellationToken::new(), false)
            .unwrap();

        assert_eq!(outcome, RefreshOutcome::NotModified);
        let after = stored_meta(&dir);
        assert!(after.last_checked > before.last_checked);
        assert_eq!(after.last_success, before.last_success);
        assert_eq!(after.etag, before.etag);
        assert_eq!(after.upstream_etag, before.upstream_etag);
    }

    #[test]
    fn dangling_meta_recovers_with_unconditional_fetch() {
        let dir = TempDir::new().unwrap();
        seed(&dir, ChronoDuration::hours(1));
        std::fs::remove_file(dir.path().join("index-light.json.gz")).unwrap();

        let fetcher = ScriptedFetcher::new(vec![
            ok(304, None, ""),
            ok(200, Some("\"v2\""), PAYLOAD),
        ]);
        let sched = scheduler(&dir, fetcher.clone());
        sched.store().clear_hot();

        let outcome = sched.refresh(&CancellationToken::new(), false).unwrap();

        assert!(matches!(outcome, RefreshOutcome::Recovered { count: 2, .. }));
        assert_eq!(fetcher.seen(), vec![None, None]);
        assert!(sched.store().has_index());
        assert_eq!(stored_meta(&dir).upstream_etag, "\"v2\"");
    }

    #[test]
    fn dangling_meta_gives_up_after_one_retry() {
        let dir = TempDir::new().unwrap();
        let mut meta = CatalogMeta {
            upstream_etag: "\"stale\"".to_string(),
            ..CatalogMeta::default()
        };
        meta.touch_checked(Utc::now() - ChronoDuration::hours(48));
        CatalogStore::open(dir.path()).write_meta(&meta).unwrap();

        let fetcher = ScriptedFetcher::new(vec![ok(304, None, ""), ok(304, None, "")]);
        let err = scheduler(&dir, fetcher.clone())
            .refresh(&CancellationToken::new(), false)
            .unwrap_err();

        assert!(matches!(err, KegError::DanglingRecovery { status: 304 }));
        assert_eq!(fetcher.calls(), 2);
        assert!(stored_meta(&dir).last_checked > meta.last_checked);
    }

    #[test]
    fn server_error_touches_last_checked_and_keeps_catalog() {
        let dir = TempDir::new().unwrap();
        let before = seed(&dir, ChronoDuration::hours(30));
        let fetcher = ScriptedFetcher::new(vec![ok(503, None, "")]);
        let sched = scheduler(&dir, fetcher);

        let err = sched.refresh(&CancellationToken::new(), false).unwrap_err();

        assert!(matches!(err, KegError::UpstreamStatus { status: 503 }));
        assert!(err.is_retryable());
        let after = stored_meta(&dir);
        assert!(after.last_checked > before.last_checked);
        assert_eq!(after.etag, before.etag);
        assert!(sched.store().open_index_gz(&CancellationToken::new()).is_ok());
    }

    #[test]
    fn failing_upstream_is_not_hot_looped() {
        let dir = TempDir::new().unwrap();
        seed(&dir, ChronoDuration::hours(30));

        let fetcher = ScriptedFetcher::new(vec![Scripted::Transport]);
        let sched = scheduler(&dir, fetcher.clone());
        assert!(matches!(
            sched.refresh(&CancellationToken::new(), false),
            Err(KegError::Fetch(_))
        ));
        assert_eq!(
            sched.refresh(&CancellationToken::new(), false).unwrap(),
            RefreshOutcome::Fresh
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn malformed_payload_keeps_previous_catalog() {
        let dir = TempDir::new().unwrap();
        let before = seed(&dir, ChronoDuration::hours(30));
        let fetcher = ScriptedFetcher::new(vec![ok(200, Some("\"v9\""), r#"{"not":"array"}"#)]);
        let sched = scheduler(&dir, fetcher);

        let err = sched.refresh(&CancellationToken::new(), false).unwrap_err();

        assert!(matches!(err, KegError::CatalogFormat(_)));
        let after = stored_meta(&dir);
        assert_eq!(after.etag, before.etag);
        assert_eq!(after.upstream_etag, "\"v1\"");
        assert!(after.last_checked > before.last_checked);
        assert_eq!(sched.store().get_hot().unwrap().etag, before.etag);
    }

    #[test]
    fn oversized_payload_is_rejected_before_reading() {
        let dir = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(vec![ok(200, None, PAYLOAD)]);
        let mut sched = scheduler(&dir, fetcher);
        sched.settings.max_download_bytes = 8;

        let err = sched.refresh(&CancellationToken::new(), false).unwrap_err();

        assert!(matches!(err, KegError::PayloadTooLarge { limit: 8, .. }));
        assert!(!sched.store().has_index());
        assert!(stored_meta(&dir).last_checked.is_some());
    }

    #[test]
    fn undeclared_oversized_payload_is_too_large() {
        let dir = TempDir::new().unwrap();
        let before = seed(&dir, ChronoDuration::hours(30));
        let fetcher = ScriptedFetcher::new(vec![Scripted::Undeclared(PAYLOAD)]);
        let mut sched = scheduler(&dir, fetcher);
        sched.settings.max_download_bytes = 8;

        let err = sched.refresh(&CancellationToken::new(), false).unwrap_err();

        assert!(
            matches!(err, KegError::PayloadTooLarge { size, limit: 8 } if size > 8),
            "{err:?}"
        );
        let after = stored_meta(&dir);
        assert_eq!(after.etag, before.etag);
        assert!(after.last_checked > before.last_checked);
    }

    #[test]
    fn cancelled_refresh_makes_no_request() {
        let dir = TempDir::new().unwrap();
        let fetcher = ScriptedFetcher::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = scheduler(&dir, fetcher.clone())
            .refresh(&cancel, false)
            .unwrap_err();

        assert!(matches!(err, KegError::Cancelled));
        assert_eq!(fetcher.calls(), 0);
    }
}
