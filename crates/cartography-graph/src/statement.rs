//! A single Cypher statement of a graph job.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{GraphSession, Params};

/// Longest total wait spent retrying a failing iterative statement.
pub const CLEANUP_MAX_RETRY_TIME: Duration = Duration::from_secs(600);

/// Error text that marks a failure worth retrying: Neo4j transient errors
/// and lost or refused connections.
const TRANSIENT_MARKERS: &[&str] = &[
    "neo.transienterror",
    "deadlock",
    "unavailable",
    "connection",
    "broken pipe",
    "timed out",
];

/// Whether `err` may succeed when the same query is run again.
///
/// Client errors such as Cypher syntax or constraint failures are final.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return true;
        }
        let message = cause.to_string().to_lowercase();
        if message.contains("neo.clienterror") {
            return false;
        }
        TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
    })
}

/// Fibonacci delays (1, 1, 2, 3, 5, ... times `base`) bounded by a total budget.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    base: Duration,
    max_elapsed: Duration,
    elapsed: Duration,
    current: u32,
    next: u32,
}

impl FibonacciBackoff {
    pub fn new(base: Duration, max_elapsed: Duration) -> Self {
        Self {
            base,
            max_elapsed,
            elapsed: Duration::ZERO,
            current: 1,
            next: 1,
        }
    }

    /// Next delay, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.base.saturating_mul(self.current);
        if self.elapsed + delay > self.max_elapsed {
            return None;
        }
        self.elapsed += delay;
        let following = self.current.saturating_add(self.next);
        self.current = self.next;
        self.next = following;
        Some(delay)
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.base, self.max_elapsed);
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), CLEANUP_MAX_RETRY_TIME)
    }
}

/// A Cypher query plus its parameters.
///
/// Iterative statements are expected to `LIMIT $LIMIT_SIZE` their work and
/// return a `TotalCompleted` count; they are re-run until that count is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatement {
    pub query: String,
    #[serde(default)]
    pub parameters: Params,
    #[serde(default)]
    pub iterative: bool,
    #[serde(default)]
    pub iterationsize: u64,
    #[serde(skip)]
    pub parent_job_name: Option<String>,
    #[serde(skip)]
    pub parent_job_sequence_num: Option<usize>,
}

impl GraphStatement {
    pub fn new(query: impl Into<String>, parameters: Params, iterative: bool, iterationsize: u64) -> Self {
        Self {
            query: query.into(),
            parameters,
            iterative,
            iterationsize,
            parent_job_name: None,
            parent_job_sequence_num: None,
        }
    }

    /// Add parameters, replacing existing values with the same name.
    pub fn merge_parameters(&mut self, parameters: &Params) {
        for (key, value) in parameters {
            self.parameters.insert(key.clone(), value.clone());
        }
    }

    /// Parameters sent with the query, including `LIMIT_SIZE` when iterative.
    pub fn effective_parameters(&self) -> Params {
        let mut params = self.parameters.clone();
        if self.iterative {
            params.insert("LIMIT_SIZE".to_string(), Value::from(self.iterationsize));
        }
        params
    }

    /// Run the statement once, or until exhausted when iterative.
    pub async fn run<S: GraphSession + ?Sized>(&self, session: &S) -> Result<()> {
        if self.iterative {
            self.run_iterative(session, FibonacciBackoff::default()).await?;
        } else {
            session.run(&self.query, &self.parameters).await?;
        }
        Ok(())
    }

    /// Re-run the query until a batch reports zero completed items.
    ///
    /// Transiently failed batches are retried after each `backoff` delay;
    /// any other error is returned at once. Returns the total number of
    /// items processed.
    pub async fn run_iterative<S: GraphSession + ?Sized>(
        &self,
        session: &S,
        mut backoff: FibonacciBackoff,
    ) -> Result<u64> {
        let params = self.effective_parameters();
        let mut total = 0u64;
        let mut batches = 0usize;

        loop {
            match session.fetch(&self.query, &params, &["TotalCompleted"]).await {
                Ok(rows) => {
                    let completed = rows
                        .first()
                        .and_then(|row| row.get("TotalCompleted"))
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    batches += 1;
                    backoff.reset();
                    if completed == 0 {
                        break;
                    }
                    total += completed;
                }
                Err(e) if !is_transient(&e) => {
                    return Err(e).context("Iterative statement failed");
                }
                Err(e) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            job = self.parent_job_name.as_deref().unwrap_or(""),
                            statement = self.parent_job_sequence_num,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Iterative statement failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(e).context("Iterative statement kept failing, giving up");
                    }
                },
            }
        }

        debug!(
            job = self.parent_job_name.as_deref().unwrap_or(""),
            statement = self.parent_job_sequence_num,
            batches,
            total,
            "Iterative statement finished"
        );
        Ok(total)
    }
}
