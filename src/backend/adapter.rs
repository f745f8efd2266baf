use std::sync::Arc;

use serde::Serialize;
use std::sync::Mutex;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{BackendError, GenerateOptions, Generated, GenerationBackend};

/// Retry/fallback discipline shared by both pipeline stages.
///
/// Cleans the input, retries the primary backend with exponential backoff,
/// and falls back once to the secondary if one is configured. Exhausting
/// both is a hard failure for this call; retrying the whole message again
/// is the stage processor's job via stream redelivery.
pub struct GenerationAdapter {
    primary: Arc<dyn GenerationBackend>,
    fallback: Option<Arc<dyn GenerationBackend>>,
    max_attempts: u32,
    call_timeout: Duration,
    max_input_chars: usize,
    clean_input: bool,
    stats: Mutex<AdapterStats>,
}

/// Counters surfaced on the stats endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdapterStats {
    pub generations: u64,
    pub successes: u64,
    pub failures: u64,
    pub primary_uses: u64,
    pub fallback_uses: u64,
    pub avg_duration_secs: f64,
}

impl GenerationAdapter {
    pub fn new(
        primary: Arc<dyn GenerationBackend>,
        fallback: Option<Arc<dyn GenerationBackend>>,
        max_attempts: u32,
        call_timeout: Duration,
        max_input_chars: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            max_attempts: max_attempts.max(1),
            call_timeout,
            max_input_chars,
            clean_input: true,
            stats: Mutex::new(AdapterStats::default()),
        }
    }

    /// Pass input through verbatim apart from the empty check.
    ///
    /// The language stage hands over a fully assembled prompt whose line
    /// structure and trailing question must survive intact; any per-field
    /// cleaning happens before assembly.
    pub fn preserving_input(mut self) -> Self {
        self.clean_input = false;
        self
    }

    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    pub fn stats(&self) -> AdapterStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// One complete generation call: clean, retry primary, fall back once.
    pub async fn generate(
        &self,
        input: &str,
        opts: &GenerateOptions,
    ) -> Result<Generated, BackendError> {
        let started = Instant::now();
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.generations += 1;
        }

        let cleaned = if self.clean_input {
            match clean_text(input, self.max_input_chars) {
                Some(text) => text,
                None => {
                    self.record_failure();
                    return Err(BackendError::InvalidInput(
                        "empty after cleaning".to_string(),
                    ));
                }
            }
        } else if input.trim().is_empty() {
            self.record_failure();
            return Err(BackendError::InvalidInput("empty input".to_string()));
        } else {
            input.to_string()
        };

        for attempt in 0..self.max_attempts {
            debug!(
                "Generation attempt {}/{} on '{}'",
                attempt + 1,
                self.max_attempts,
                self.primary.name()
            );
            match self.attempt(&self.primary, &cleaned, opts).await {
                Ok(generated) => {
                    self.record_success(started, false);
                    return Ok(generated);
                }
                Err(e) => warn!(
                    "Generation attempt {} on '{}' failed: {}",
                    attempt + 1,
                    self.primary.name(),
                    e
                ),
            }
            if attempt + 1 < self.max_attempts {
                sleep(Duration::from_secs(1u64 << attempt.min(6))).await;
            }
        }

        if let Some(fallback) = &self.fallback {
            info!(
                "Primary backend '{}' exhausted, trying fallback '{}'",
                self.primary.name(),
                fallback.name()
            );
            match self.attempt(fallback, &cleaned, opts).await {
                Ok(generated) => {
                    self.record_success(started, true);
                    return Ok(generated);
                }
                Err(e) => error!("Fallback backend '{}' failed: {}", fallback.name(), e),
            }
        }

        self.record_failure();
        Err(BackendError::Exhausted {
            primary: self.primary.name().to_string(),
            fallback: self.fallback.as_ref().map(|f| f.name().to_string()),
        })
    }

    /// One attempt with the overall per-call timeout applied; a timeout is
    /// treated the same as a backend error for retry/fallback purposes.
    async fn attempt(
        &self,
        backend: &Arc<dyn GenerationBackend>,
        input: &str,
        opts: &GenerateOptions,
    ) -> Result<Generated, BackendError> {
        match timeout(self.call_timeout, backend.generate(input, opts)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.call_timeout)),
        }
    }

    fn record_success(&self, started: Instant, used_fallback: bool) {
        let elapsed = started.elapsed().as_secs_f64();
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.successes += 1;
        if used_fallback {
            stats.fallback_uses += 1;
        } else {
            stats.primary_uses += 1;
        }
        let n = stats.successes as f64;
        stats.avg_duration_secs = (stats.avg_duration_secs * (n - 1.0) + elapsed) / n;
    }

    fn record_failure(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.failures += 1;
    }
}

/// Collapse whitespace, truncate at a word boundary, reject empty input.
pub fn clean_text(text: &str, max_chars: usize) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    if collapsed.chars().count() <= max_chars {
        return Some(collapsed);
    }

    warn!(
        "Input too long ({} chars), truncating to {}",
        collapsed.chars().count(),
        max_chars
    );
    let truncated: String = collapsed.chars().take(max_chars).collect();
    let at_boundary = match truncated.rsplit_once(' ') {
        Some((head, _)) => head.to_string(),
        None => truncated,
    };
    Some(format!("{}...", at_boundary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyBackend {
        name: &'static str,
        calls: AtomicU32,
        succeed_after: u32,
    }

    #[async_trait::async_trait]
    impl GenerationBackend for FlakyBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(
            &self,
            input: &str,
            _opts: &GenerateOptions,
        ) -> Result<Generated, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.succeed_after {
                return Err(BackendError::Status(500));
            }
            Ok(Generated {
                artifact: input.as_bytes().to_vec(),
                metadata: super::super::GenerationMetadata {
                    backend: self.name.to_string(),
                    format: "text".to_string(),
                    size_bytes: input.len(),
                    duration_seconds: None,
                    text_length: input.chars().count(),
                    encoding: "utf-8".to_string(),
                },
            })
        }
    }

    fn backend(name: &'static str, succeed_after: u32) -> Arc<FlakyBackend> {
        Arc::new(FlakyBackend {
            name,
            calls: AtomicU32::new(0),
            succeed_after,
        })
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(
            clean_text("  what \t time\n is it  ", 100).unwrap(),
            "what time is it"
        );
    }

    #[test]
    fn clean_text_rejects_empty() {
        assert!(clean_text("   \n\t ", 100).is_none());
        assert!(clean_text("", 100).is_none());
    }

    #[test]
    fn clean_text_truncates_at_word_boundary() {
        let cleaned = clean_text("alpha beta gamma delta", 12).unwrap();
        assert_eq!(cleaned, "alpha beta...");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_primary_then_succeeds() {
        let primary = backend("primary", 2);
        let adapter = GenerationAdapter::new(
            primary.clone(),
            None,
            3,
            Duration::from_secs(5),
            1000,
        );

        let generated = adapter
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(generated.metadata.backend, "primary");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
        assert_eq!(adapter.stats().successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_when_primary_exhausted() {
        let primary = backend("primary", u32::MAX);
        let secondary = backend("secondary", 0);
        let adapter = GenerationAdapter::new(
            primary,
            Some(secondary),
            2,
            Duration::from_secs(5),
            1000,
        );

        let generated = adapter
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(generated.metadata.backend, "secondary");
        let stats = adapter.stats();
        assert_eq!(stats.fallback_uses, 1);
        assert_eq!(stats.primary_uses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_of_both_is_a_hard_failure() {
        let adapter = GenerationAdapter::new(
            backend("primary", u32::MAX),
            Some(backend("secondary", u32::MAX)),
            2,
            Duration::from_secs(5),
            1000,
        );

        let err = adapter
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Exhausted { .. }));
        assert_eq!(adapter.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn preserving_input_keeps_structure_and_length() {
        let primary = backend("primary", 0);
        let adapter = GenerationAdapter::new(
            primary,
            None,
            1,
            Duration::from_secs(5),
            // Far smaller than the input; must not truncate in this mode
            16,
        )
        .preserving_input();

        let prompt = format!(
            "You are Raven.\n\nRecent conversation history:\nQ: {}\nA: {}\n\nCurrent question: When is the next standup?",
            "x".repeat(400),
            "y".repeat(400),
        );
        let generated = adapter
            .generate(&prompt, &GenerateOptions::default())
            .await
            .unwrap();

        // FlakyBackend echoes its input back as the artifact
        assert_eq!(generated.artifact, prompt.as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn preserving_input_still_rejects_empty() {
        let primary = backend("primary", 0);
        let adapter = GenerationAdapter::new(
            primary.clone(),
            None,
            1,
            Duration::from_secs(5),
            1000,
        )
        .preserving_input();

        let err = adapter
            .generate(" \n ", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_is_rejected_without_backend_calls() {
        let primary = backend("primary", 0);
        let adapter = GenerationAdapter::new(
            primary.clone(),
            None,
            3,
            Duration::from_secs(5),
            1000,
        );

        let err = adapter
            .generate("   ", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }
}
