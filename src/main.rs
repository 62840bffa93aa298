/*!
 * repocache-cli - demo front end for the repository caching subsystem.
 *
 * Exercises the full `IngestPipeline` against a local directory standing
 * in for the remote repository ingester (out of scope for this crate),
 * then reports cache/tier/health state through the same types a real
 * caller would use.
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};

use repocache::ingest::{IngestedRepo, RepoIngester};
use repocache::{
    CacheClient, CoreConfig, FallbackRegistry, GatedTierPolicy, IngestPipeline,
};
use repocache_audit::AuditLog;
use repocache_chunk::CacheBackend;

#[derive(Parser)]
#[command(name = "repocache", version, about = "Repository cache and virtual-access subsystem", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a repository (from a local directory, standing in for the
    /// remote ingester) into the cache, or return it from cache if present.
    Fetch {
        /// A github.com owner/name identity, e.g. https://github.com/acme/widgets
        #[arg(long)]
        repo_url: String,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long, default_value = "free")]
        tier: String,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Local directory read by the demo ingester in place of a real fetch.
        #[arg(long)]
        local_path: PathBuf,
    },
    /// List configured tiers and their limits.
    Tiers,
    /// Ping the cache backend and print a health summary.
    Health,
}

/// Stands in for the remote repository ingester by reading a local
/// directory tree. The real ingester is an external service this crate
/// never calls directly; production callers supply their own
/// `RepoIngester` implementation.
struct LocalDirIngester {
    root: PathBuf,
}

impl LocalDirIngester {
    fn list_paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        collect_files(&self.root, &self.root, &mut paths)?;
        paths.sort();
        Ok(paths)
    }

    fn build_content(&self, paths: &[String]) -> String {
        let mut content = String::new();
        for path in paths {
            let full = self.root.join(path);
            let text = fs::read_to_string(&full).unwrap_or_default();
            content.push_str(&"=".repeat(48));
            content.push('\n');
            content.push_str(&format!("FILE: {path}\n"));
            content.push_str(&"=".repeat(48));
            content.push('\n');
            content.push_str(&text);
            content.push('\n');
        }
        content
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[async_trait]
impl RepoIngester for LocalDirIngester {
    async fn repo_size_mb(&self, _repo_url: &str) -> anyhow::Result<f64> {
        let mut total = 0u64;
        fn size_of(path: &Path, total: &mut u64) -> std::io::Result<()> {
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let p = entry.path();
                if p.is_dir() {
                    size_of(&p, total)?;
                } else {
                    *total += entry.metadata()?.len();
                }
            }
            Ok(())
        }
        size_of(&self.root, &mut total)?;
        Ok(total as f64 / (1024.0 * 1024.0))
    }

    async fn ingest(&self, _repo_url: &str, _branch: &str, _token: Option<&str>) -> anyhow::Result<IngestedRepo> {
        let paths = self.list_paths()?;
        let content = self.build_content(&paths);
        let tree = paths.join("\n");
        let summary = format!(
            "Directory: {}\nFiles: {}\nEstimated tokens: {}",
            self.root.display(),
            paths.len(),
            content.len() / 4,
        );
        Ok(IngestedRepo { content: content.into_bytes(), tree, summary })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    repocache::logging::init_stdout_logging()?;

    let cli = Cli::parse();
    let config = CoreConfig::from_env().context("loading configuration from the environment")?;
    let cache = CacheClient::connect(&config.cache).context("connecting to the cache backend")?;
    let audit = AuditLog::new();

    match cli.command {
        Commands::Tiers => print_tiers(&audit)?,
        Commands::Health => print_health(&cache, &audit).await?,
        Commands::Fetch { repo_url, branch, tier, user_id, force, local_path } => {
            fetch(&cache, &audit, &config, repo_url, branch, tier, user_id, force, local_path).await?
        }
    }

    Ok(())
}

fn print_tiers(audit: &AuditLog) -> Result<()> {
    let policy = GatedTierPolicy::with_defaults(audit)?;
    let mut table = Table::new();
    table.set_header(vec!["tier", "limit (tokens)", "usage at 0 tokens"]);
    for tier in policy.available_tiers() {
        let details = policy.details(&tier, 0)?;
        let limit = if details.tier_limit < 0 { "unlimited".to_string() } else { details.tier_limit.to_string() };
        let usage = details.usage_pct.map(|p| format!("{p:.1}%")).unwrap_or_else(|| "-".to_string());
        table.add_row(vec![Cell::new(tier), Cell::new(limit), Cell::new(usage)]);
    }
    println!("{table}");
    Ok(())
}

async fn print_health(cache: &CacheClient, audit: &AuditLog) -> Result<()> {
    let fallbacks: FallbackRegistry<()> = FallbackRegistry::new();
    let report = repocache::health_report(cache, audit, vec![("demo".to_string(), fallbacks.stats("demo").await)]).await;

    let mut table = Table::new();
    table.set_header(vec!["field", "value"]);
    table.add_row(vec!["status".to_string(), format!("{:?}", report.status)]);
    table.add_row(vec!["circuit_closed".to_string(), report.cache.circuit_closed.to_string()]);
    table.add_row(vec!["pool_idle".to_string(), report.cache.pool_idle.to_string()]);
    table.add_row(vec!["pool_active".to_string(), report.cache.pool_active.to_string()]);
    table.add_row(vec!["open_service_issues".to_string(), report.open_service_issues.len().to_string()]);
    table.add_row(vec!["recent_error_count".to_string(), report.recent_error_count.to_string()]);
    println!("{table}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn fetch(
    cache: &CacheClient,
    audit: &AuditLog,
    config: &CoreConfig,
    repo_url: String,
    branch: String,
    tier: String,
    user_id: Option<String>,
    force: bool,
    local_path: PathBuf,
) -> Result<()> {
    let tier_policy = GatedTierPolicy::with_defaults(audit)?;
    let ingester: Arc<dyn RepoIngester> = Arc::new(LocalDirIngester { root: local_path });
    let pipeline = IngestPipeline::new(cache as &dyn CacheBackend, &tier_policy, ingester, audit, config);

    let outcome = pipeline
        .fetch(&repo_url, &branch, &tier, user_id.as_deref(), force)
        .await?;

    if outcome.ok {
        println!("ingested {repo_url}@{branch} for tier {tier}");
    } else {
        println!("rejected: {}", outcome.error.unwrap_or_default());
    }
    Ok(())
}
