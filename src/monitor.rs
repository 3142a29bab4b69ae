//! Usage counters for queries, generated SQL and tool calls.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorStats {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub total_sql_generated: u64,
    pub total_tool_calls: u64,
    pub tool_usage: BTreeMap<String, u64>,
    /// Seconds.
    pub avg_response_time: f64,
    /// Percent of finished queries that succeeded.
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    stats: MonitorStats,
    total_response_time: f64,
}

#[derive(Debug, Default)]
pub struct Monitor {
    counters: Mutex<Counters>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut Counters)) {
        // Counters are plain numbers, so a poisoned lock is still usable.
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut counters);
    }

    pub fn query_started(&self, conversation_id: &str, query: &str) {
        let preview: String = query.chars().take(100).collect();
        info!("Query started | Conv: {} | {}", conversation_id, preview);
        self.update(|c| c.stats.total_queries += 1);
    }

    pub fn query_finished(&self, elapsed: Duration, error: Option<&str>) {
        let seconds = elapsed.as_secs_f64();
        match error {
            None => info!("Query completed | Duration: {:.2}s", seconds),
            Some(e) => error!("Query failed | Duration: {:.2}s | {}", seconds, e),
        }

        self.update(|c| {
            if error.is_none() {
                c.stats.successful_queries += 1;
            } else {
                c.stats.failed_queries += 1;
            }
            c.total_response_time += seconds;
            if c.stats.total_queries > 0 {
                c.stats.avg_response_time = c.total_response_time / c.stats.total_queries as f64;
            }
            let finished = c.stats.successful_queries + c.stats.failed_queries;
            c.stats.success_rate = c.stats.successful_queries as f64 / finished as f64 * 100.0;
        });
    }

    pub fn sql_generated(&self, sql: Option<&str>) {
        match sql {
            Some(sql) => {
                let preview: String = sql.chars().take(150).collect();
                info!("SQL generated: {}", preview);
            }
            None => warn!("SQL generation failed"),
        }
        self.update(|c| c.stats.total_sql_generated += 1);
    }

    pub fn tool_called(&self, name: &str, success: bool) {
        if success {
            info!("Tool {} executed", name);
        } else {
            warn!("Tool {} failed", name);
        }
        self.update(|c| {
            c.stats.total_tool_calls += 1;
            *c.stats.tool_usage.entry(name.to_string()).or_default() += 1;
        });
    }

    pub fn snapshot(&self) -> MonitorStats {
        match self.counters.lock() {
            Ok(guard) => guard.stats.clone(),
            Err(poisoned) => poisoned.into_inner().stats.clone(),
        }
    }

    /// Log a one-line summary of the counters.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            "Monitor: {} queries ({} ok, {} failed, {:.1}% success), {} SQL, {} tool calls, avg {:.2}s",
            s.total_queries,
            s.successful_queries,
            s.failed_queries,
            s.success_rate,
            s.total_sql_generated,
            s.total_tool_calls,
            s.avg_response_time
        );
    }
}
