//! Named alternative processing paths with rolling success-rate tracking.
//!
//! A `FallbackRegistry<T>` is scoped to one result type: callers needing
//! fallback chains for more than one kind of result (an ingest outcome vs.
//! a raw cache read, say) hold one registry per type, each keyed by its
//! own set of operation names.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

type BoxFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

struct FallbackEntry<T> {
    name: String,
    run: Arc<dyn Fn() -> BoxFuture<T> + Send + Sync>,
    success_rate: f64,
    avg_exec_time: Duration,
}

/// Point-in-time diagnostics for one registered fallback.
#[derive(Debug, Clone)]
pub struct FallbackStats {
    pub name: String,
    pub success_rate: f64,
    pub avg_exec_time: Duration,
}

pub struct FallbackRegistry<T> {
    operations: Mutex<HashMap<String, Vec<FallbackEntry<T>>>>,
}

impl<T: Send + 'static> FallbackRegistry<T> {
    pub fn new() -> Self {
        Self { operations: Mutex::new(HashMap::new()) }
    }

    /// Register an alternative implementation for `operation`, appended
    /// after any fallback already registered for it.
    pub async fn register<F, Fut>(&self, operation: &str, name: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let entry = FallbackEntry {
            name: name.to_string(),
            run: Arc::new(move || Box::pin(f())),
            success_rate: 0.5,
            avg_exec_time: Duration::ZERO,
        };
        self.operations
            .lock()
            .await
            .entry(operation.to_string())
            .or_default()
            .push(entry);
    }

    fn record(entry: &mut FallbackEntry<T>, success: bool, elapsed: Duration) {
        let delta = if success { 0.1 } else { -0.1 };
        entry.success_rate = (entry.success_rate + delta).clamp(0.0, 1.0);
        entry.avg_exec_time = if entry.avg_exec_time.is_zero() {
            elapsed
        } else {
            entry.avg_exec_time.mul_f64(0.8) + elapsed.mul_f64(0.2)
        };
    }

    /// Try `primary`; on failure, iterate this operation's fallbacks in
    /// registration order and return the first to succeed. Each attempt
    /// updates that entry's rolling success rate and smoothed timing.
    pub async fn execute<F, Fut>(&self, operation: &str, primary: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match primary().await {
            Ok(value) => return Ok(value),
            Err(primary_err) => {
                warn!(operation, error = %primary_err, "primary failed, trying registered fallbacks");
                let mut operations = self.operations.lock().await;
                let Some(entries) = operations.get_mut(operation) else {
                    return Err(primary_err);
                };

                let mut last_err = primary_err;
                for entry in entries.iter_mut() {
                    let start = Instant::now();
                    match (entry.run)().await {
                        Ok(value) => {
                            Self::record(entry, true, start.elapsed());
                            info!(operation, fallback = %entry.name, "fallback succeeded");
                            return Ok(value);
                        }
                        Err(e) => {
                            Self::record(entry, false, start.elapsed());
                            last_err = e;
                        }
                    }
                }
                Err(last_err)
            }
        }
    }

    pub async fn stats(&self, operation: &str) -> Vec<FallbackStats> {
        self.operations
            .lock()
            .await
            .get(operation)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| FallbackStats {
                        name: e.name.clone(),
                        success_rate: e.success_rate,
                        avg_exec_time: e.avg_exec_time,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<T: Send + 'static> Default for FallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn falls_back_to_first_successful_alternative() {
        let registry: FallbackRegistry<u32> = FallbackRegistry::new();
        registry
            .register("read", "secondary", || async { Err(anyhow::anyhow!("still down")) })
            .await;
        registry.register("read", "tertiary", || async { Ok(42u32) }).await;

        let result = registry.execute("read", || async { Err(anyhow::anyhow!("primary down")) }).await;
        assert_eq!(result.unwrap(), 42);

        let stats = registry.stats("read").await;
        assert_eq!(stats[0].name, "secondary");
        assert!(stats[0].success_rate < 0.5);
        assert_eq!(stats[1].name, "tertiary");
        assert!(stats[1].success_rate > 0.5);
    }

    #[tokio::test]
    async fn primary_success_never_touches_fallbacks() {
        let registry: FallbackRegistry<u32> = FallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry
            .register("read", "secondary", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0u32)
                }
            })
            .await;

        let result = registry.execute("read", || async { Ok(7u32) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_registered_fallbacks_surfaces_primary_error() {
        let registry: FallbackRegistry<u32> = FallbackRegistry::new();
        let result = registry.execute("read", || async { Err(anyhow::anyhow!("down")) }).await;
        assert!(result.is_err());
    }
}
