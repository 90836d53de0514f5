use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::app::ports::{ClockPort, HttpClientPort, HttpGetResult};
use crate::config::FetchConfig;
use crate::error::Result;

/// Why a host stopped being eligible for requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The manual robots.txt/ToS review has not cleared this run.
    NotPermitted,
    /// Upstream answered 403.
    Forbidden,
    /// The URL falls under a path the robots review ruled out.
    RobotsDisallow { path: String },
    /// An earlier hard stop already halted this host.
    HostHalted,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::NotPermitted => write!(f, "fetching not permitted by configuration"),
            BlockReason::Forbidden => write!(f, "HTTP 403 Forbidden"),
            BlockReason::RobotsDisallow { path } => write!(f, "path disallowed by robots review: {}", path),
            BlockReason::HostHalted => write!(f, "host halted earlier in this run"),
        }
    }
}

/// Classification of a single request attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Success(String),
    Blocked(BlockReason),
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// A status that is neither success, blocking, nor worth retrying (e.g. 404).
    Rejected { status: u16 },
}

/// Retry state machine. Exposed so callers and tests can inspect where a fetch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    Idle,
    Attempting { attempt: u32 },
    Retrying { attempt: u32, wait: Duration },
    Succeeded,
    GaveUp,
    Stopped,
}

/// Per-page bookkeeping, alive until the page reaches a terminal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub attempt_count: u32,
    pub last_status: Option<u16>,
    /// Interval scheduled before each retry, measured from the previous completed request.
    pub retry_waits: Vec<Duration>,
}

impl FetchRequest {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            attempt_count: 0,
            last_status: None,
            retry_waits: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    pub request: FetchRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchGiveUp {
    pub request: FetchRequest,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HardStop {
    pub host: String,
    pub reason: BlockReason,
    pub request: FetchRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(FetchedPage),
    GiveUp(FetchGiveUp),
    Blocked(HardStop),
}

/// Serialized, rate-limited GET with bounded exponential backoff.
///
/// Taking `&mut self` in `fetch` keeps at most one request in flight per fetcher.
pub struct RateLimitedFetcher {
    http: Arc<dyn HttpClientPort>,
    clock: Arc<dyn ClockPort>,
    config: FetchConfig,
    last_request_at: Option<Instant>,
    halted_hosts: HashSet<String>,
    state: FetchState,
}

impl RateLimitedFetcher {
    /// Rejects a config outside the crawl-delay and attempt limits.
    pub fn new(http: Arc<dyn HttpClientPort>, clock: Arc<dyn ClockPort>, config: FetchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            http,
            clock,
            config,
            last_request_at: None,
            halted_hosts: HashSet::new(),
            state: FetchState::Idle,
        })
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn is_halted(&self, host: &str) -> bool {
        self.halted_hosts.contains(host)
    }

    /// Backoff added on top of the crawl delay after the given failed attempt (1-based).
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1) as i32;
        let secs = self.config.backoff_base().as_secs_f64() * self.config.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(secs)
    }

    pub async fn fetch(&mut self, url: &str) -> FetchOutcome {
        let mut request = FetchRequest::new(url);
        self.state = FetchState::Idle;

        let parsed = match reqwest::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.state = FetchState::GaveUp;
                return FetchOutcome::GiveUp(FetchGiveUp {
                    request,
                    reason: format!("invalid URL: {}", e),
                });
            }
        };
        let host = parsed.host_str().unwrap_or_default().to_string();

        if !self.config.allowed {
            return self.stop(host, BlockReason::NotPermitted, request);
        }
        if self.halted_hosts.contains(&host) {
            return self.stop(host, BlockReason::HostHalted, request);
        }
        if let Some(path) = self
            .config
            .disallowed_paths
            .iter()
            .find(|prefix| parsed.path().starts_with(prefix.as_str()))
        {
            let reason = BlockReason::RobotsDisallow { path: path.clone() };
            return self.stop(host, reason, request);
        }

        let mut interval = self.config.crawl_delay();
        loop {
            let attempt = request.attempt_count + 1;
            self.state = FetchState::Attempting { attempt };
            self.wait_for_slot(interval).await;

            debug!(url = %url, attempt, "issuing GET");
            request.attempt_count = attempt;
            let response = self.http.get(url).await;
            self.last_request_at = Some(self.clock.now());
            if let Ok(resp) = &response {
                request.last_status = Some(resp.status);
            }

            match self.classify(response) {
                AttemptResult::Success(body) => {
                    self.state = FetchState::Succeeded;
                    info!(url = %url, attempts = attempt, "fetched page");
                    return FetchOutcome::Success(FetchedPage {
                        url: url.to_string(),
                        body,
                        fetched_at: self.clock.wall_now(),
                        request,
                    });
                }
                AttemptResult::Blocked(reason) => {
                    return self.stop(host, reason, request);
                }
                AttemptResult::Rejected { status } => {
                    return self.give_up(request, format!("non-retryable HTTP status {}", status));
                }
                AttemptResult::Transient { reason, retry_after } => {
                    if attempt >= self.config.max_attempts {
                        return self.give_up(
                            request,
                            format!("{} after {} attempts", reason, attempt),
                        );
                    }
                    if let Some(hint) = retry_after {
                        if hint > self.config.max_retry_after() {
                            return self.give_up(
                                request,
                                format!("Retry-After of {}s exceeds the configured ceiling", hint.as_secs()),
                            );
                        }
                    }
                    let scheduled = self.config.crawl_delay() + self.backoff_for(attempt);
                    let wait = retry_after.map_or(scheduled, |hint| scheduled.max(hint));
                    warn!(url = %url, attempt, reason = %reason, wait_ms = wait.as_millis() as u64, "transient failure, backing off");
                    request.retry_waits.push(wait);
                    self.state = FetchState::Retrying { attempt, wait };
                    interval = wait;
                }
            }
        }
    }

    /// Sleeps until `interval` has passed since the previous completed request.
    async fn wait_for_slot(&self, interval: Duration) {
        let Some(last) = self.last_request_at else {
            return;
        };
        let ready_at = last + interval;
        let now = self.clock.now();
        if ready_at > now {
            self.clock.sleep(ready_at - now).await;
        }
    }

    fn classify(&self, response: std::result::Result<HttpGetResult, String>) -> AttemptResult {
        let resp = match response {
            Ok(resp) => resp,
            Err(e) => {
                return AttemptResult::Transient {
                    reason: format!("request failed: {}", e),
                    retry_after: None,
                }
            }
        };
        match resp.status {
            200..=299 => AttemptResult::Success(resp.body),
            403 => AttemptResult::Blocked(BlockReason::Forbidden),
            429 => AttemptResult::Transient {
                reason: "HTTP 429 Too Many Requests".to_string(),
                retry_after: resp
                    .retry_after
                    .as_deref()
                    .and_then(|v| parse_retry_after(v, self.clock.wall_now())),
            },
            408 | 500..=599 => AttemptResult::Transient {
                reason: format!("HTTP {}", resp.status),
                retry_after: None,
            },
            status => AttemptResult::Rejected { status },
        }
    }

    fn stop(&mut self, host: String, reason: BlockReason, request: FetchRequest) -> FetchOutcome {
        warn!(host = %host, url = %request.url, reason = %reason, "hard stop, no further requests to host");
        self.halted_hosts.insert(host.clone());
        self.state = FetchState::Stopped;
        FetchOutcome::Blocked(HardStop { host, reason, request })
    }

    fn give_up(&mut self, request: FetchRequest, reason: String) -> FetchOutcome {
        warn!(url = %request.url, attempts = request.attempt_count, reason = %reason, "giving up on page");
        self.state = FetchState::GaveUp;
        FetchOutcome::GiveUp(FetchGiveUp { request, reason })
    }
}

/// Parses a `Retry-After` value given either as delta-seconds or as an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ok, status, status_with_retry_after, FakeClock, ScriptedHttp};
    use chrono::TimeZone;

    fn config() -> FetchConfig {
        FetchConfig {
            allowed: true,
            crawl_delay_ms: 2_000,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2.0,
            ..FetchConfig::default()
        }
    }

    fn fetcher(http: &Arc<ScriptedHttp>, clock: &Arc<FakeClock>, config: FetchConfig) -> RateLimitedFetcher {
        RateLimitedFetcher::new(http.clone(), clock.clone(), config).unwrap()
    }

    const URL: &str = "https://stats.example.com/years/2024/opp.htm";

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let http = Arc::new(ScriptedHttp::new(vec![ok("<table></table>")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        match f.fetch(URL).await {
            FetchOutcome::Success(page) => {
                assert_eq!(page.body, "<table></table>");
                assert_eq!(page.request.attempt_count, 1);
                assert_eq!(page.request.last_status, Some(200));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(f.state(), &FetchState::Succeeded);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_crawl_delay_between_pages() {
        let http = Arc::new(ScriptedHttp::new(vec![ok("a"), ok("b")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        f.fetch(URL).await;
        f.fetch(URL).await;

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
        assert_eq!(http.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_backoff_strictly_increases_and_gives_up_after_three() {
        let http = Arc::new(ScriptedHttp::new(vec![
            status(503),
            Err("connection reset".to_string()),
            status(500),
            ok("never reached"),
        ]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        let outcome = f.fetch(URL).await;

        let give_up = match outcome {
            FetchOutcome::GiveUp(g) => g,
            other => panic!("expected give-up, got {:?}", other),
        };
        assert_eq!(give_up.request.attempt_count, 3);
        assert_eq!(http.calls().len(), 3);
        let waits = &give_up.request.retry_waits;
        assert_eq!(waits.len(), 2);
        assert!(waits.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3), Duration::from_secs(4)]);
        assert_eq!(f.state(), &FetchState::GaveUp);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let http = Arc::new(ScriptedHttp::new(vec![status(502), ok("body")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        match f.fetch(URL).await {
            FetchOutcome::Success(page) => assert_eq!(page.request.attempt_count, 2),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forbidden_halts_host_without_retry() {
        let http = Arc::new(ScriptedHttp::new(vec![status(403), ok("never")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        match f.fetch(URL).await {
            FetchOutcome::Blocked(stop) => {
                assert_eq!(stop.reason, BlockReason::Forbidden);
                assert_eq!(stop.host, "stats.example.com");
                assert_eq!(stop.request.attempt_count, 1);
            }
            other => panic!("expected hard stop, got {:?}", other),
        }
        assert!(f.is_halted("stats.example.com"));

        match f.fetch("https://stats.example.com/years/2023/opp.htm").await {
            FetchOutcome::Blocked(stop) => assert_eq!(stop.reason, BlockReason::HostHalted),
            other => panic!("expected hard stop, got {:?}", other),
        }
        assert_eq!(http.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_not_permitted_issues_no_request() {
        let http = Arc::new(ScriptedHttp::new(vec![ok("never")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, FetchConfig { allowed: false, ..config() });

        match f.fetch(URL).await {
            FetchOutcome::Blocked(stop) => assert_eq!(stop.reason, BlockReason::NotPermitted),
            other => panic!("expected hard stop, got {:?}", other),
        }
        assert!(http.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disallowed_path_is_blocked_before_request() {
        let http = Arc::new(ScriptedHttp::new(vec![ok("never")]));
        let clock = Arc::new(FakeClock::new());
        let cfg = FetchConfig {
            disallowed_paths: vec!["/years/".to_string()],
            ..config()
        };
        let mut f = fetcher(&http, &clock, cfg);

        match f.fetch(URL).await {
            FetchOutcome::Blocked(stop) => {
                assert!(matches!(stop.reason, BlockReason::RobotsDisallow { .. }));
            }
            other => panic!("expected hard stop, got {:?}", other),
        }
        assert!(http.calls().is_empty());
        assert!(f.is_halted("stats.example.com"));
    }

    #[tokio::test]
    async fn test_429_waits_at_least_retry_after() {
        let http = Arc::new(ScriptedHttp::new(vec![status_with_retry_after(429, "10"), ok("body")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        match f.fetch(URL).await {
            FetchOutcome::Success(page) => {
                assert_eq!(page.request.retry_waits, vec![Duration::from_secs(10)]);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn test_429_with_short_hint_keeps_backoff() {
        let http = Arc::new(ScriptedHttp::new(vec![status_with_retry_after(429, "1"), ok("body")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        f.fetch(URL).await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3)]);
    }

    #[tokio::test]
    async fn test_excessive_retry_after_gives_up() {
        let http = Arc::new(ScriptedHttp::new(vec![status_with_retry_after(429, "3600")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        assert!(matches!(f.fetch(URL).await, FetchOutcome::GiveUp(_)));
        assert_eq!(http.calls().len(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let http = Arc::new(ScriptedHttp::new(vec![status(404), ok("never")]));
        let clock = Arc::new(FakeClock::new());
        let mut f = fetcher(&http, &clock, config());

        assert!(matches!(f.fetch(URL).await, FetchOutcome::GiveUp(_)));
        assert_eq!(http.calls().len(), 1);
        assert!(!f.is_halted("stats.example.com"));
    }

    #[test]
    fn test_unbounded_config_is_rejected() {
        let http = Arc::new(ScriptedHttp::new(vec![status(503); 8]));
        let clock = Arc::new(FakeClock::new());

        let too_many = FetchConfig { max_attempts: 8, ..config() };
        assert!(RateLimitedFetcher::new(http.clone(), clock.clone(), too_many).is_err());

        let no_delay = FetchConfig { crawl_delay_ms: 0, ..config() };
        assert!(RateLimitedFetcher::new(http.clone(), clock.clone(), no_delay).is_err());

        let no_backoff = FetchConfig { backoff_base_ms: 0, ..config() };
        assert!(RateLimitedFetcher::new(http.clone(), clock.clone(), no_backoff).is_err());
        assert!(http.calls().is_empty());
    }

    #[test]
    fn test_parse_retry_after_forms() {
        let now = Utc.with_ymd_and_hms(2024, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Mon, 21 Oct 2024 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }
}
