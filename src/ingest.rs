//! `IngestPipeline::fetch`: the size-check → fetch → tier-validate →
//! store → index sequence that turns a bare `(repo_url, branch)` into a
//! cached repository, with at-most-one concurrent ingest per
//! `(repo, branch)` fingerprint.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, instrument, warn};

use repocache_audit::AuditLog;
use repocache_chunk::CacheBackend;
use repocache_manifest::{RepoBlobs, RepoCache};

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::tier_policy::GatedTierPolicy;

/// What the pipeline needs from the out-of-process repository ingester.
/// Implemented against the real remote service outside this crate; tests
/// supply an in-memory fake.
#[async_trait]
pub trait RepoIngester: Send + Sync {
    async fn repo_size_mb(&self, repo_url: &str) -> anyhow::Result<f64>;
    async fn ingest(&self, repo_url: &str, branch: &str, token: Option<&str>) -> anyhow::Result<IngestedRepo>;
}

#[derive(Debug, Clone)]
pub struct IngestedRepo {
    pub content: Vec<u8>,
    pub tree: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub ok: bool,
    pub error: Option<String>,
}

impl IngestOutcome {
    fn ok() -> Self {
        Self { ok: true, error: None }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self { ok: false, error: Some(message.into()) }
    }
}

static TOKEN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)estimated tokens:\s*(\d+)",
        r"(?i)tokens:\s*(\d+)",
        r"(?i)token count:\s*(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("token pattern is a fixed, valid regex"))
    .collect()
});

fn extract_estimated_tokens(summary: &str) -> Option<i64> {
    TOKEN_PATTERNS
        .iter()
        .find_map(|re| re.captures(summary).and_then(|c| c.get(1)?.as_str().parse().ok()))
}

/// Parse `owner/name` out of an HTTPS GitHub URL or a `git@github.com:`
/// SSH URL. Any other shape is rejected.
fn parse_repo_identity(repo_url: &str) -> Result<String> {
    let trimmed = repo_url.trim().trim_end_matches(".git");

    let rest = if let Some(r) = trimmed.strip_prefix("https://github.com/") {
        r
    } else if let Some(r) = trimmed.strip_prefix("git@github.com:") {
        r
    } else {
        return Err(CoreError::InvalidRepoUrl(repo_url.to_string()));
    };

    let mut parts = rest.trim_matches('/').split('/');
    let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(CoreError::InvalidRepoUrl(repo_url.to_string()));
    };
    if owner.is_empty() || name.is_empty() {
        return Err(CoreError::InvalidRepoUrl(repo_url.to_string()));
    }
    Ok(format!("{owner}/{name}"))
}

fn fingerprint(repo: &str, branch: &str) -> String {
    format!("{repo}@{branch}")
}

/// Drop any file whose path starts with one of `excludes` out of a
/// boundary-delimited content dump, keeping the boundary/`FILE:` framing
/// around every surviving section intact.
fn strip_excluded_content(content: &str, excludes: &[String]) -> String {
    let boundary = "=".repeat(repocache_index::BOUNDARY_LEN);
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<&str> = content.split('\n').collect();
    if had_trailing_newline {
        lines.pop();
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;
    let mut skipping = false;
    while i < lines.len() {
        let is_header_triplet = lines[i] == boundary
            && lines.get(i + 1).map(|l| l.starts_with("FILE: ")).unwrap_or(false)
            && lines.get(i + 2) == Some(&boundary.as_str());
        if is_header_triplet {
            let path = lines[i + 1].strip_prefix("FILE: ").unwrap_or("");
            skipping = excludes.iter().any(|prefix| path.starts_with(prefix.as_str()));
            if !skipping {
                out.push(lines[i]);
                out.push(lines[i + 1]);
                out.push(lines[i + 2]);
            }
            i += 3;
            continue;
        }
        if !skipping {
            out.push(lines[i]);
        }
        i += 1;
    }

    let mut result = out.join("\n");
    if had_trailing_newline {
        result.push('\n');
    }
    result
}

fn strip_excluded_tree_lines(tree: &str, excludes: &[String]) -> String {
    tree.lines()
        .filter(|line| !excludes.iter().any(|prefix| line.trim_start().starts_with(prefix.as_str())))
        .collect::<Vec<_>>()
        .join("\n")
}

struct OversizeEntry {
    decided_at: Instant,
    size_mb: f64,
}

const OVERSIZE_CACHE_TTL: Duration = Duration::from_secs(3600);
const RETRY_BACKOFFS: [Duration; 3] =
    [Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(20)];
const DEFAULT_MAX_REPO_SIZE_MB: f64 = 150.0;

pub struct IngestPipeline<'a> {
    cache: RepoCache<'a>,
    tier_policy: &'a GatedTierPolicy<'a>,
    ingester: Arc<dyn RepoIngester>,
    audit: &'a AuditLog,
    config: &'a CoreConfig,
    exclude_prefixes: Vec<String>,
    inflight: Mutex<HashMap<String, Arc<OnceCell<IngestOutcome>>>>,
    oversize_cache: Mutex<HashMap<String, OversizeEntry>>,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(
        backend: &'a dyn CacheBackend,
        tier_policy: &'a GatedTierPolicy<'a>,
        ingester: Arc<dyn RepoIngester>,
        audit: &'a AuditLog,
        config: &'a CoreConfig,
    ) -> Self {
        Self {
            cache: RepoCache::new(backend),
            tier_policy,
            ingester,
            audit,
            config,
            exclude_prefixes: vec!["analytics/".to_string()],
            inflight: Mutex::new(HashMap::new()),
            oversize_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Single entry point: size-check → fetch → tier-validate → store →
    /// index. A second call for the same `(repo, branch)` arriving while
    /// the first is mid-flight joins it and receives the same outcome.
    #[instrument(skip(self), fields(repo_url, branch, user_tier))]
    pub async fn fetch(
        &self,
        repo_url: &str,
        branch: &str,
        user_tier: &str,
        user_id: Option<&str>,
        force: bool,
    ) -> Result<IngestOutcome> {
        if user_tier.trim().is_empty() {
            return Ok(IngestOutcome::rejected("empty tier is not a valid identity"));
        }

        let repo = parse_repo_identity(repo_url)?;
        let fp = fingerprint(&repo, branch);

        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(fp.clone()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let outcome = cell
            .get_or_try_init(|| self.fetch_inner(repo_url, &repo, branch, user_tier, user_id, force))
            .await?
            .clone();

        self.inflight.lock().await.remove(&fp);
        Ok(outcome)
    }

    async fn fetch_inner(
        &self,
        repo_url: &str,
        repo: &str,
        branch: &str,
        user_tier: &str,
        user_id: Option<&str>,
        force: bool,
    ) -> Result<IngestOutcome> {
        if !force {
            let status = self
                .cache
                .exists_with_metadata(repo)
                .await
                .map_err(CoreError::Manifest)?;
            if status.exists {
                info!(repo, "ingest skipped, repository already cached");
                return Ok(IngestOutcome::ok());
            }
        }

        if let Some(outcome) = self.check_size(repo_url, repo).await? {
            return Ok(outcome);
        }

        let ingested = match self.fetch_with_retry(repo_url, branch).await {
            Ok(repo) => repo,
            Err(e) => {
                warn!(repo, error = %e, "external ingester exhausted all retry attempts");
                return Ok(IngestOutcome::rejected(format!(
                    "external ingester failed after {} attempts: {e}",
                    RETRY_BACKOFFS.len() + 1
                )));
            }
        };

        let estimated_tokens = match extract_estimated_tokens(&ingested.summary) {
            Some(tokens) => tokens,
            None if self.config.strict_token_extraction => {
                return Ok(IngestOutcome::rejected(
                    "could not extract a token estimate from the ingest summary",
                ));
            }
            None => 0,
        };

        let validation = self.tier_policy.validate(user_tier, repo, estimated_tokens, user_id)?;
        if !validation.allowed {
            return Ok(IngestOutcome::rejected(validation.message));
        }

        let content_text = String::from_utf8_lossy(&ingested.content).into_owned();
        let filtered_content = strip_excluded_content(&content_text, &self.exclude_prefixes);
        let filtered_tree = strip_excluded_tree_lines(&ingested.tree, &self.exclude_prefixes);

        let blobs = RepoBlobs {
            content: filtered_content.into_bytes(),
            tree: filtered_tree.into_bytes(),
            summary: ingested.summary.into_bytes(),
        };

        if let Err(first_err) = self.cache.store(repo, &blobs).await {
            warn!(repo, error = %first_err, "store failed, retrying once");
            if let Err(second_err) = self.cache.store(repo, &blobs).await {
                return Ok(IngestOutcome::rejected(format!(
                    "repository store failed twice: {second_err}"
                )));
            }
        }

        self.build_index(repo, &blobs.content);

        info!(repo, branch, estimated_tokens, "ingest complete");
        Ok(IngestOutcome::ok())
    }

    async fn check_size(&self, repo_url: &str, repo: &str) -> Result<Option<IngestOutcome>> {
        let max_mb = DEFAULT_MAX_REPO_SIZE_MB;

        {
            let cache = self.oversize_cache.lock().await;
            if let Some(entry) = cache.get(repo) {
                if entry.decided_at.elapsed() < OVERSIZE_CACHE_TTL {
                    return Ok(Some(IngestOutcome::rejected(format!(
                        "repository is {:.1} MiB, exceeding the {max_mb:.0} MiB limit (cached decision)",
                        entry.size_mb
                    ))));
                }
            }
        }

        let size_mb = match self.ingester.repo_size_mb(repo_url).await {
            Ok(size_mb) => size_mb,
            Err(e) => {
                warn!(repo, error = %e, "size check failed, treating as rejection rather than a hard error");
                return Ok(Some(IngestOutcome::rejected(format!(
                    "could not determine repository size: {e}"
                ))));
            }
        };

        if size_mb > max_mb {
            self.oversize_cache.lock().await.insert(
                repo.to_string(),
                OversizeEntry { decided_at: Instant::now(), size_mb },
            );
            return Ok(Some(IngestOutcome::rejected(format!(
                "repository is {size_mb:.1} MiB, exceeding the {max_mb:.0} MiB limit"
            ))));
        }

        Ok(None)
    }

    async fn fetch_with_retry(&self, repo_url: &str, branch: &str) -> anyhow::Result<IngestedRepo> {
        let token = self.config.repo_fetch_token.as_deref();
        let mut last_err = None;

        for backoff in std::iter::once(None).chain(RETRY_BACKOFFS.into_iter().map(Some)) {
            if let Some(delay) = backoff {
                tokio::time::sleep(delay).await;
            }
            match self.ingester.ingest(repo_url, branch, token).await {
                Ok(repo) => return Ok(repo),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.expect("loop always attempts at least once"))
    }

    /// Best-effort: a failure here is logged and does not fail the
    /// ingest, matching step 10's non-fatal contract.
    fn build_index(&self, repo: &str, content: &[u8]) {
        let Ok(text) = std::str::from_utf8(content) else {
            warn!(repo, "content blob is not valid UTF-8, skipping index build");
            return;
        };
        let index = repocache_index::ContentIndex::build(text);
        let path = self.index_path(repo);
        if let Err(e) = index.write_to(&path) {
            warn!(repo, path = %path.display(), error = %e, "failed to persist content index");
        }
    }

    fn index_path(&self, repo: &str) -> PathBuf {
        let sanitized = repo.replace('/', "__");
        PathBuf::from(&self.config.storage_dir).join(format!("{sanitized}.idx"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repocache_audit::AuditLog;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeBackend {
        data: StdMutex<StdHashMap<String, Vec<u8>>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self { data: StdMutex::new(StdHashMap::new()) }
        }
    }

    #[async_trait]
    impl CacheBackend for FakeBackend {
        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }
        async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<bool> {
            self.data.lock().unwrap().insert(key.to_string(), value);
            Ok(true)
        }
        async fn delete(&self, keys: &[String]) -> anyhow::Result<u64> {
            let mut data = self.data.lock().unwrap();
            Ok(keys.iter().filter(|k| data.remove(*k).is_some()).count() as u64)
        }
        async fn exists(&self, keys: &[String]) -> anyhow::Result<u64> {
            let data = self.data.lock().unwrap();
            Ok(keys.iter().filter(|k| data.contains_key(*k)).count() as u64)
        }
        async fn pipeline_get(&self, keys: &[String]) -> anyhow::Result<Vec<repocache_chunk::PipelineGetResult>> {
            let data = self.data.lock().unwrap();
            Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
        }
        async fn pipeline_set(&self, pairs: Vec<(String, Vec<u8>)>) -> anyhow::Result<bool> {
            let mut data = self.data.lock().unwrap();
            for (k, v) in pairs {
                data.insert(k, v);
            }
            Ok(true)
        }
        async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
            let prefix = pattern.trim_end_matches('*');
            let data = self.data.lock().unwrap();
            Ok(data.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
        }
    }

    struct FakeIngester {
        size_mb: f64,
        summary: String,
    }

    #[async_trait]
    impl RepoIngester for FakeIngester {
        async fn repo_size_mb(&self, _repo_url: &str) -> anyhow::Result<f64> {
            Ok(self.size_mb)
        }
        async fn ingest(&self, _repo_url: &str, _branch: &str, _token: Option<&str>) -> anyhow::Result<IngestedRepo> {
            let boundary = "=".repeat(repocache_index::BOUNDARY_LEN);
            let content = format!(
                "{b}\nFILE: src/main.rs\n{b}\nfn main() {{}}\n{b}\nFILE: analytics/events.rs\n{b}\nlet x = 1;\n",
                b = boundary
            );
            Ok(IngestedRepo {
                content: content.into_bytes(),
                tree: "src/main.rs\nanalytics/events.rs\n".to_string(),
                summary: self.summary.clone(),
            })
        }
    }

    fn test_config(storage_dir: &std::path::Path) -> CoreConfig {
        CoreConfig {
            cache: crate::config::CacheConfig {
                url: "redis://cache.internal.example:6379".to_string(),
                password: None,
                ssl: false,
                ssl_cert_reqs: crate::config::CertReqs::Required,
                max_connections: 20,
                socket_timeout: Duration::from_secs(5),
            },
            default_tier: "free".to_string(),
            tier_limits: crate::config::TierLimits { free: 1_000_000, pro: 10_000_000, enterprise: -1 },
            repo_fetch_token: None,
            storage_dir: storage_dir.to_string_lossy().into_owned(),
            strict_token_extraction: false,
        }
    }

    #[tokio::test]
    async fn fetch_rejects_malformed_repo_url() {
        let backend = FakeBackend::new();
        let audit = AuditLog::new();
        let gated = GatedTierPolicy::with_defaults(&audit).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ingester = Arc::new(FakeIngester { size_mb: 1.0, summary: "estimated tokens: 500".to_string() });
        let pipeline = IngestPipeline::new(&backend, &gated, ingester, &audit, &config);

        let err = pipeline.fetch("ftp://nope", "main", "free", None, false).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRepoUrl(_)));
    }

    #[tokio::test]
    async fn fetch_rejects_oversized_repo() {
        let backend = FakeBackend::new();
        let audit = AuditLog::new();
        let gated = GatedTierPolicy::with_defaults(&audit).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ingester = Arc::new(FakeIngester { size_mb: 200.0, summary: String::new() });
        let pipeline = IngestPipeline::new(&backend, &gated, ingester, &audit, &config);

        let outcome = pipeline
            .fetch("https://github.com/acme/widgets", "main", "free", None, false)
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("150"));
    }

    #[tokio::test]
    async fn fetch_stores_and_strips_excluded_paths() {
        let backend = FakeBackend::new();
        let audit = AuditLog::new();
        let gated = GatedTierPolicy::with_defaults(&audit).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ingester = Arc::new(FakeIngester { size_mb: 1.0, summary: "estimated tokens: 500".to_string() });
        let pipeline = IngestPipeline::new(&backend, &gated, ingester, &audit, &config);

        let outcome = pipeline
            .fetch("https://github.com/acme/widgets", "main", "pro", Some("u-1"), false)
            .await
            .unwrap();
        assert!(outcome.ok, "{:?}", outcome.error);

        let status = pipeline.cache.exists_with_metadata("acme/widgets").await.unwrap();
        assert!(status.exists);

        let blobs = pipeline.cache.get("acme/widgets").await.unwrap().unwrap();
        let content = String::from_utf8(blobs.content).unwrap();
        assert!(content.contains("src/main.rs"));
        assert!(!content.contains("analytics/events.rs"));
    }

    #[tokio::test]
    async fn fetch_short_circuits_when_already_cached() {
        let backend = FakeBackend::new();
        let audit = AuditLog::new();
        let gated = GatedTierPolicy::with_defaults(&audit).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ingester = Arc::new(FakeIngester { size_mb: 1.0, summary: "estimated tokens: 500".to_string() });
        let pipeline = IngestPipeline::new(&backend, &gated, ingester, &audit, &config);

        pipeline
            .fetch("https://github.com/acme/widgets", "main", "pro", None, false)
            .await
            .unwrap();
        let second = pipeline
            .fetch("https://github.com/acme/widgets", "main", "pro", None, false)
            .await
            .unwrap();
        assert!(second.ok);
    }

    #[test]
    fn parses_https_and_ssh_identities() {
        assert_eq!(
            parse_repo_identity("https://github.com/acme/widgets").unwrap(),
            "acme/widgets"
        );
        assert_eq!(
            parse_repo_identity("git@github.com:acme/widgets.git").unwrap(),
            "acme/widgets"
        );
        assert!(parse_repo_identity("https://gitlab.com/acme/widgets").is_err());
    }

    #[test]
    fn extracts_token_estimate_case_insensitively() {
        assert_eq!(extract_estimated_tokens("Estimated Tokens: 1234"), Some(1234));
        assert_eq!(extract_estimated_tokens("token count: 7"), Some(7));
        assert_eq!(extract_estimated_tokens("no numbers here"), None);
    }

    struct CountingIngester {
        inner: FakeIngester,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RepoIngester for CountingIngester {
        async fn repo_size_mb(&self, repo_url: &str) -> anyhow::Result<f64> {
            self.inner.repo_size_mb(repo_url).await
        }
        async fn ingest(&self, repo_url: &str, branch: &str, token: Option<&str>) -> anyhow::Result<IngestedRepo> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Give other concurrent callers a chance to join this in-flight
            // ingest before it completes, so the test actually exercises
            // the single-flight join rather than racing sequential calls.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.ingest(repo_url, branch, token).await
        }
    }

    #[tokio::test]
    async fn concurrent_fetches_for_the_same_repo_join_a_single_ingest() {
        let backend = FakeBackend::new();
        let audit = AuditLog::new();
        let gated = GatedTierPolicy::with_defaults(&audit).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let ingester = Arc::new(CountingIngester {
            inner: FakeIngester { size_mb: 1.0, summary: "estimated tokens: 500".to_string() },
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let pipeline = Arc::new(IngestPipeline::new(&backend, &gated, ingester.clone(), &audit, &config));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline
                    .fetch("https://github.com/acme/widgets", "main", "pro", None, false)
                    .await
            }));
        }

        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(outcome.ok, "{:?}", outcome.error);
        }

        assert_eq!(ingester.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
