use crate::types::{GateResult, ValidationGate, ValidationRun};
use chrono::Utc;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const OUTPUT_CHAR_LIMIT: usize = 1000;
pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct GateRunner {
    timeout: Duration,
    max_output_bytes: usize,
    max_retries: u32,
}

impl Default for GateRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl GateRunner {
    pub fn new(timeout: Duration, max_output_bytes: usize, max_retries: u32) -> Self {
        Self {
            timeout,
            max_output_bytes,
            max_retries,
        }
    }

    /// Runs one gate, retrying up to the per-gate attempt limit.
    pub async fn run_gate(&self, gate: &ValidationGate, working_dir: &Path) -> GateResult {
        let max_attempts = self.max_retries.max(1);
        let mut attempts = 0;
        let mut passed = false;
        let mut output = String::new();
        while attempts < max_attempts {
            attempts += 1;
            let (ok, captured) = self.run_once(gate, working_dir).await;
            debug!(gate = %gate.name, attempt = attempts, passed = ok, "gate attempt finished");
            passed = ok;
            output = captured;
            if passed {
                break;
            }
        }
        GateResult {
            gate: gate.name.clone(),
            passed,
            attempts,
            output: truncate_output(&output),
            completed_at: Utc::now(),
        }
    }

    /// Runs gates in order, stopping after the first required gate that fails.
    pub async fn run_all(&self, gates: &[ValidationGate], working_dir: &Path) -> ValidationRun {
        let started = Instant::now();
        let mut results = Vec::with_capacity(gates.len());
        let mut all_passed = true;
        for gate in gates {
            let result = self.run_gate(gate, working_dir).await;
            let failed = !result.passed;
            results.push(result);
            if failed && gate.required {
                warn!(gate = %gate.name, "required gate failed");
                all_passed = false;
                break;
            }
            if failed {
                warn!(gate = %gate.name, "optional gate failed");
            }
        }
        ValidationRun {
            results,
            all_passed,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Repeats the whole pipeline until it passes or `max_retries` runs are used.
    ///
    /// `on_retry` sees the attempt that just failed and the first failing gate.
    pub async fn run_with_auto_retry<F>(
        &self,
        gates: &[ValidationGate],
        working_dir: &Path,
        max_retries: u32,
        mut on_retry: F,
    ) -> ValidationRun
    where
        F: FnMut(u32, &str),
    {
        let max_attempts = max_retries.max(1);
        let mut attempt = 1;
        loop {
            let run = self.run_all(gates, working_dir).await;
            if run.all_passed || attempt >= max_attempts {
                info!(attempt, passed = run.all_passed, "validation finished");
                return run;
            }
            let failed_gate = run
                .first_failure()
                .map(|result| result.gate.clone())
                .unwrap_or_default();
            on_retry(attempt, &failed_gate);
            attempt += 1;
        }
    }

    async fn run_once(&self, gate: &ValidationGate, working_dir: &Path) -> (bool, String) {
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&gate.command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => return (false, format!("failed to run {}: {err}", gate.command)),
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;

        let outcome = tokio::time::timeout(self.timeout, async {
            tokio::join!(
                read_capped(stdout, limit),
                read_capped(stderr, limit),
                child.wait()
            )
        })
        .await;

        match outcome {
            Ok((stdout, stderr, Ok(status))) => (status.success(), format!("{stdout}{stderr}")),
            Ok((_, _, Err(err))) => (false, format!("failed to wait for {}: {err}", gate.command)),
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!(gate = %gate.name, error = %err, "failed to kill timed out gate");
                }
                (
                    false,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            }
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                // Keep draining past the cap so the child never blocks on a full pipe.
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..read.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

pub fn truncate_output(output: &str) -> String {
    match output.char_indices().nth(OUTPUT_CHAR_LIMIT) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &output[..cut]),
        None => output.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(retries: u32) -> GateRunner {
        GateRunner::new(Duration::from_secs(10), 1024 * 1024, retries)
    }

    #[test]
    fn test_truncate_output_boundaries() {
        let exact = "a".repeat(OUTPUT_CHAR_LIMIT);
        assert_eq!(truncate_output(&exact), exact);

        let long = "b".repeat(OUTPUT_CHAR_LIMIT + 1);
        let truncated = truncate_output(&long);
        assert_eq!(
            truncated,
            format!("{}{TRUNCATION_MARKER}", "b".repeat(OUTPUT_CHAR_LIMIT))
        );
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let long = "é".repeat(OUTPUT_CHAR_LIMIT + 5);
        let truncated = truncate_output(&long);
        let kept = truncated.strip_suffix(TRUNCATION_MARKER).unwrap();
        assert_eq!(kept.chars().count(), OUTPUT_CHAR_LIMIT);
    }

    #[tokio::test]
    async fn test_passing_gate_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ValidationGate::new("lint", "echo clean; echo warn >&2", true);
        let result = runner(3).run_gate(&gate, dir.path()).await;
        assert!(result.passed);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.output, "clean\nwarn\n");
    }

    #[tokio::test]
    async fn test_failing_gate_uses_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ValidationGate::new("test", "echo run >> attempts.log; exit 1", true);
        let result = runner(3).run_gate(&gate, dir.path()).await;
        assert!(!result.passed);
        assert_eq!(result.attempts, 3);
        let log = std::fs::read_to_string(dir.path().join("attempts.log")).unwrap();
        assert_eq!(log.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_gate_passes_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ValidationGate::new(
            "flaky",
            "if [ -f marker ]; then exit 0; else touch marker; exit 1; fi",
            true,
        );
        let result = runner(3).run_gate(&gate, dir.path()).await;
        assert!(result.passed);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ValidationGate::new("hang", "sleep 30", true);
        let runner = GateRunner::new(Duration::from_millis(200), 1024, 1);
        let started = Instant::now();
        let result = runner.run_gate(&gate, dir.path()).await;
        assert!(!result.passed);
        assert!(result.output.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_output_is_capped_in_bytes_then_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ValidationGate::new("noisy", "yes x | head -c 200000", true);
        let runner = GateRunner::new(Duration::from_secs(10), 4096, 1);
        let result = runner.run_gate(&gate, dir.path()).await;
        assert!(result.passed);
        assert!(result.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            result.output.chars().count(),
            OUTPUT_CHAR_LIMIT + TRUNCATION_MARKER.chars().count()
        );
    }

    #[tokio::test]
    async fn test_required_failure_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let gates = vec![
            ValidationGate::new("install", "exit 1", true),
            ValidationGate::new("lint", "touch lint-ran", false),
        ];
        let run = runner(1).run_all(&gates, dir.path()).await;
        assert!(!run.all_passed);
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].gate, "install");
        assert!(!dir.path().join("lint-ran").exists());
    }

    #[tokio::test]
    async fn test_optional_failure_continues() {
        let dir = tempfile::tempdir().unwrap();
        let gates = vec![
            ValidationGate::new("fmt", "exit 1", false),
            ValidationGate::new("build", "true", true),
        ];
        let run = runner(1).run_all(&gates, dir.path()).await;
        assert!(run.all_passed);
        assert_eq!(run.results.len(), 2);
        assert!(!run.results[0].passed);
    }

    #[tokio::test]
    async fn test_auto_retry_reports_each_failed_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let gates = vec![ValidationGate::new("check", "exit 2", true)];
        let mut retries = Vec::new();
        let run = runner(1)
            .run_with_auto_retry(&gates, dir.path(), 3, |attempt, gate| {
                retries.push((attempt, gate.to_string()));
            })
            .await;
        assert!(!run.all_passed);
        assert_eq!(
            retries,
            vec![(1, "check".to_string()), (2, "check".to_string())]
        );
    }

    #[tokio::test]
    async fn test_auto_retry_returns_first_passing_run() {
        let dir = tempfile::tempdir().unwrap();
        let gates = vec![ValidationGate::new(
            "eventually",
            "n=$(cat count 2>/dev/null || echo 0); n=$((n+1)); echo $n > count; [ $n -ge 2 ]",
            true,
        )];
        let mut calls = 0;
        let run = runner(1)
            .run_with_auto_retry(&gates, dir.path(), 5, |_, _| calls += 1)
            .await;
        assert!(run.all_passed);
        assert_eq!(calls, 1);
    }
}
