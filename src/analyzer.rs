//! Analyzer adapter: the single expensive external call per item.
//!
//! The engine treats the analyzer as an opaque function from `(file_ref,
//! job_description)` to structured JSON or a classified error. Results are
//! stored verbatim and never interpreted; classification is the only thing
//! the state machine acts on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::batch::FileRef;
use crate::item::ItemError;

/// Classified outcome of one analyzer call.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Structured scoring output, stored verbatim under the item's result.
    Ok(serde_json::Value),
    /// Retryable upstream condition (rate limit, server busy, network).
    Transient(ItemError),
    /// Non-retryable failure, including schema-validation rejections.
    Permanent(ItemError),
}

/// Trait for running the external analysis call.
///
/// Classification is total: transport failures come back as transient
/// verdicts, not errors, so the state machine is the only retry mechanism.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, file_ref: &FileRef, job_description: &str) -> Verdict;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Analyzer that POSTs to a scoring endpoint and classifies the response.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpAnalyzer {
    pub fn new(endpoint: String, api_key: String, timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Classify an upstream HTTP response into a verdict.
///
/// Rate limits (429), request timeouts (408), and server errors (5xx) are
/// retryable; any other non-success is permanent; a success body must parse
/// as JSON or the adapter reports a permanent schema failure.
fn classify_response(status: u16, body: &str) -> Verdict {
    if status == 429 {
        return Verdict::Transient(ItemError::new("rate_limited", format!("HTTP {status}")));
    }
    if status == 408 || status >= 500 {
        return Verdict::Transient(ItemError::new("server_busy", format!("HTTP {status}")));
    }
    if !(200..300).contains(&status) {
        let detail: String = body.chars().take(200).collect();
        return Verdict::Permanent(ItemError::new(
            "upstream_rejected",
            format!("HTTP {status}: {detail}"),
        ));
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(result) => Verdict::Ok(result),
        Err(e) => Verdict::Permanent(ItemError::new(
            "invalid_response",
            format!("response was not valid JSON: {e}"),
        )),
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    #[tracing::instrument(skip(self, job_description), fields(file_ref = %file_ref))]
    async fn analyze(&self, file_ref: &FileRef, job_description: &str) -> Verdict {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&serde_json::json!({
                "file_ref": file_ref,
                "job_description": job_description,
            }));
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "analyzer request did not reach the endpoint");
                return Verdict::Transient(ItemError::new("upstream_unavailable", e.to_string()));
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, status, "analyzer response body could not be read");
                return Verdict::Transient(ItemError::new("upstream_unavailable", e.to_string()));
            }
        };

        tracing::debug!(status, response_len = body.len(), "analyzer call finished");
        classify_response(status, &body)
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

/// One scripted verdict, optionally gated on a trigger so tests can control
/// exactly when (or whether) the call returns.
struct ScriptedVerdict {
    verdict: Verdict,
    gate: Option<oneshot::Receiver<()>>,
}

/// Record of a call made to the mock analyzer.
#[derive(Debug, Clone)]
pub struct MockAnalysis {
    pub file_ref: FileRef,
    pub job_description: String,
}

/// Mock analyzer for tests.
///
/// Verdicts are scripted per filename (the last path component of the file
/// reference) and consumed in FIFO order, so a retried item can see a
/// different verdict on each attempt.
#[derive(Clone, Default)]
pub struct MockAnalyzer {
    verdicts: Arc<Mutex<HashMap<String, Vec<ScriptedVerdict>>>>,
    calls: Arc<Mutex<Vec<MockAnalysis>>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next verdict for calls against `filename`.
    pub fn add_verdict(&self, filename: &str, verdict: Verdict) {
        self.verdicts
            .lock()
            .entry(filename.to_string())
            .or_default()
            .push(ScriptedVerdict {
                verdict,
                gate: None,
            });
    }

    /// Script a verdict that is only returned once the returned trigger is
    /// fired. While the trigger is held unfired, the analyzer call hangs,
    /// which is how tests simulate a dead or slow worker.
    pub fn add_verdict_with_gate(&self, filename: &str, verdict: Verdict) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.verdicts
            .lock()
            .entry(filename.to_string())
            .or_default()
            .push(ScriptedVerdict {
                verdict,
                gate: Some(rx),
            });
        tx
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<MockAnalysis> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, file_ref: &FileRef, job_description: &str) -> Verdict {
        self.calls.lock().push(MockAnalysis {
            file_ref: file_ref.clone(),
            job_description: job_description.to_string(),
        });

        let key = file_ref
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or(file_ref.as_str())
            .to_string();

        // Take the scripted entry out before awaiting the gate so the lock
        // is not held across the await.
        let scripted = {
            let mut verdicts = self.verdicts.lock();
            match verdicts.get_mut(&key) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };

        match scripted {
            Some(ScriptedVerdict { verdict, gate }) => {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                verdict
            }
            None => Verdict::Permanent(ItemError::new(
                "unscripted",
                format!("no scripted verdict for {key}"),
            )),
        }
    }
}
