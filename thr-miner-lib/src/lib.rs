mod block;
pub mod client;
mod miner;
pub mod settings;
mod sha256;
pub mod logger;
mod staleness;
mod target;

pub use block::{
    AddressError, CandidateBlock, MinerAddress, TipHash, TipHashError, PLACEHOLDER_ADDRESS,
};
pub use client::{ChainEndpoint, ClientError, HttpEndpoint};
pub use logger::{init_global_logger, HashrateEntry, Log, LogRecord, LogSeverity, LoggerConfig};
pub use miner::{
    format_hashes_per_sec, format_number, Miner, MinerError, MiningSettings, NonceStride,
    SearchJob, SearchOutcome,
};
pub use settings::{ConfigSettings, MinerSettings, SettingsError};
pub use sha256::{pow_hash, PowHasher};
pub use staleness::{StalenessMonitor, TipCheck};
pub use target::{meets, Difficulty};

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use eyre::{Result, WrapErr};

pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub address: MinerAddress,
    pub difficulty: Difficulty,
    /// Wait after the tip could not be fetched.
    pub retry_backoff: Duration,
    /// Wait after a submission, accepted or not.
    pub cycle_delay: Duration,
}

/// How one fetch → search → submit round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    FetchFailed,
    Submitted,
    SubmitFailed,
    Stale,
    Exhausted,
    Shutdown,
}

impl CycleOutcome {
    /// Pause before the next round.
    pub fn delay(&self, settings: &DriverSettings) -> Duration {
        match self {
            CycleOutcome::FetchFailed => settings.retry_backoff,
            CycleOutcome::Submitted | CycleOutcome::SubmitFailed | CycleOutcome::Exhausted => {
                settings.cycle_delay
            }
            // A competing block exists already; go after the new tip right away.
            CycleOutcome::Stale | CycleOutcome::Shutdown => Duration::ZERO,
        }
    }
}

pub struct SessionStats {
    started: Instant,
    blocks_found: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    fetch_failures: AtomicU64,
}

impl SessionStats {
    fn new() -> Self {
        SessionStats {
            started: Instant::now(),
            blocks_found: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
        }
    }

    pub fn blocks_found(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> String {
        let runtime = self.started.elapsed().as_secs();
        format!(
            "Runtime: {:02}h:{:02}m:{:02}s | Found: {} | Accepted: {} | Rejected: {} | Stale restarts: {}",
            runtime / 3600,
            (runtime % 3600) / 60,
            runtime % 60,
            self.blocks_found(),
            self.accepted(),
            self.rejected(),
            self.stale(),
        )
    }
}

/// Fetches the tip, mines on it and submits the result, forever.
pub struct Server<E: ChainEndpoint = HttpEndpoint> {
    endpoint: E,
    miner: Miner,
    settings: DriverSettings,
    stats: SessionStats,
    shutdown: Arc<AtomicBool>,
    log: Log,
}

pub type ServerRef<E = HttpEndpoint> = Arc<Server<E>>;

impl Server<HttpEndpoint> {
    pub fn from_settings(settings: MinerSettings, log: Log) -> Result<Self, ClientError> {
        let endpoint = HttpEndpoint::new(&settings.server_url, settings.request_timeout)?;
        let driver = DriverSettings {
            address: settings.address,
            difficulty: settings.difficulty,
            retry_backoff: settings.retry_backoff,
            cycle_delay: settings.cycle_delay,
        };
        Ok(Server::new(endpoint, driver, settings.mining, log))
    }
}

impl<E: ChainEndpoint> Server<E> {
    pub fn new(endpoint: E, settings: DriverSettings, mining: MiningSettings, log: Log) -> Self {
        Server {
            endpoint,
            miner: Miner::new(mining),
            settings,
            stats: SessionStats::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            log,
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Stops the running search within one hash and ends `run`.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub async fn run(self: ServerRef<E>) -> Result<()> {
        self.log.info(
            format!("🚀 CPU miner started for address: {}", self.settings.address),
            Some("Miner"),
        );
        self.log.info(format!("📡 Server: {}", self.endpoint.describe()), Some("Miner"));

        loop {
            if self.is_shutting_down() {
                break;
            }
            let outcome = self.run_cycle().await?;
            if outcome == CycleOutcome::Shutdown {
                break;
            }
            let delay = outcome.delay(&self.settings);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        self.log.info(self.stats.summary(), Some("Shutdown"));
        Ok(())
    }

    pub async fn run_cycle(self: &ServerRef<E>) -> Result<CycleOutcome> {
        let tip = match self.endpoint.fetch_tip().await {
            Ok(tip) => tip,
            Err(err) => {
                self.stats.fetch_failures.fetch_add(1, Ordering::Relaxed);
                self.log.error(format!("❌ Couldn't fetch last block hash: {}", err), Some("Chain"));
                self.log.info(
                    format!(
                        "⏳ Waiting for server connection, retrying in {}s...",
                        self.settings.retry_backoff.as_secs()
                    ),
                    Some("Status"),
                );
                return Ok(CycleOutcome::FetchFailed);
            }
        };

        let job = SearchJob {
            prev_hash: tip,
            address: self.settings.address.clone(),
            difficulty: self.settings.difficulty,
        };

        match self.search(job).await? {
            Ok(SearchOutcome::Found(block)) => {
                self.stats.blocks_found.fetch_add(1, Ordering::Relaxed);
                Ok(self.submit(block).await)
            }
            Ok(SearchOutcome::Stale) => {
                self.stats.stale.fetch_add(1, Ordering::Relaxed);
                Ok(CycleOutcome::Stale)
            }
            Ok(SearchOutcome::Cancelled) => Ok(CycleOutcome::Shutdown),
            Err(err @ MinerError::WorkerPanicked(_)) => {
                Err(eyre::Report::new(err).wrap_err("mining task failed"))
            }
            Err(err) => {
                self.log.error(format!("Error: {}. Fetching a fresh tip.", err), Some("Miner"));
                Ok(CycleOutcome::Exhausted)
            }
        }
    }

    /// Runs the CPU-bound search on the blocking pool; the staleness probe
    /// drives the async fetch from there through the runtime handle.
    async fn search(
        self: &ServerRef<E>,
        job: SearchJob,
    ) -> Result<Result<SearchOutcome, MinerError>> {
        let server = Arc::clone(self);
        let handle = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || {
            let probe_server = Arc::clone(&server);
            let probe = move || handle.block_on(probe_server.endpoint.fetch_tip());
            server
                .miner
                .find_nonce(&job, probe, &server.shutdown, &server.log)
        })
        .await
        .wrap_err("mining task failed")
    }

    /// Hands the candidate to the endpoint once; it is never resubmitted.
    async fn submit(&self, block: CandidateBlock) -> CycleOutcome {
        self.log.info(
            format!(
                "🛰️ Submitting block nonce={} to {}",
                block.nonce,
                self.endpoint.describe()
            ),
            Some("Share"),
        );
        let outcome = match self.endpoint.submit(block).await {
            Ok(ack) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                self.log.info(format!("📬 Submission successful: {}", ack), Some("Share"));
                CycleOutcome::Submitted
            }
            Err(err) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                self.log.error(format!("⚠️ Submission failed: {}", err), Some("Share"));
                CycleOutcome::SubmitFailed
            }
        };
        self.log.info(format!("📊 {}", self.stats.summary()), Some("Status"));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{Logger, LoggerConfig};
    use serde_json::{json, Value};
    use std::{collections::VecDeque, sync::Mutex};

    struct FakeEndpoint {
        tips: Mutex<VecDeque<Result<TipHash, ClientError>>>,
        current: Mutex<Option<TipHash>>,
        submit_result: Result<Value, ClientError>,
        submitted: Mutex<Vec<CandidateBlock>>,
        fetches: AtomicU64,
        panic_from_fetch: Option<u64>,
    }

    impl FakeEndpoint {
        fn new(
            tips: Vec<Result<TipHash, ClientError>>,
            submit_result: Result<Value, ClientError>,
        ) -> Self {
            FakeEndpoint {
                tips: Mutex::new(tips.into_iter().collect()),
                current: Mutex::new(None),
                submit_result,
                submitted: Mutex::new(Vec::new()),
                fetches: AtomicU64::new(0),
                panic_from_fetch: None,
            }
        }

        fn submitted(&self) -> Vec<CandidateBlock> {
            self.submitted.lock().unwrap().clone()
        }

        fn fetches(&self) -> u64 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl ChainEndpoint for FakeEndpoint {
        // Scripted tips first, then the last tip handed out.
        async fn fetch_tip(&self) -> Result<TipHash, ClientError> {
            let fetch = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.panic_from_fetch.map_or(false, |n| fetch >= n) {
                panic!("endpoint crashed on fetch {}", fetch);
            }
            let mut current = self.current.lock().unwrap();
            match self.tips.lock().unwrap().pop_front() {
                Some(Ok(tip)) => {
                    *current = Some(tip.clone());
                    Ok(tip)
                }
                Some(Err(err)) => Err(err),
                None => current
                    .clone()
                    .ok_or_else(|| ClientError::Unreachable("no tip scripted".to_string())),
            }
        }

        async fn submit(&self, block: CandidateBlock) -> Result<Value, ClientError> {
            self.submitted.lock().unwrap().push(block);
            self.submit_result.clone()
        }

        fn describe(&self) -> String {
            "fake://chain".to_string()
        }
    }

    fn tip(c: char) -> TipHash {
        TipHash::parse(c.to_string().repeat(64)).unwrap()
    }

    fn unreachable() -> Result<TipHash, ClientError> {
        Err(ClientError::Unreachable("connection refused".to_string()))
    }

    fn driver(difficulty: u32, retry_backoff: Duration, cycle_delay: Duration) -> DriverSettings {
        DriverSettings {
            address: MinerAddress::new("addr1").unwrap(),
            difficulty: Difficulty::new(difficulty),
            retry_backoff,
            cycle_delay,
        }
    }

    fn mining(workers: usize, stale_check_interval: Duration) -> MiningSettings {
        MiningSettings {
            workers,
            report_interval: Duration::from_secs(5),
            stale_check_interval,
        }
    }

    fn server_with(
        endpoint: FakeEndpoint,
        settings: DriverSettings,
        mining: MiningSettings,
    ) -> ServerRef<FakeEndpoint> {
        let log = Log::from_logger(Logger::in_memory(LoggerConfig {
            console_output: false,
            ..Default::default()
        }));
        Arc::new(Server::new(endpoint, settings, mining, log))
    }

    fn server(endpoint: FakeEndpoint, difficulty: u32, stale_check_interval: Duration) -> ServerRef<FakeEndpoint> {
        server_with(
            endpoint,
            driver(difficulty, DEFAULT_RETRY_BACKOFF, DEFAULT_CYCLE_DELAY),
            mining(1, stale_check_interval),
        )
    }

    fn logged(server: &ServerRef<FakeEndpoint>, needle: &str) -> bool {
        server
            .log()
            .logger()
            .get_logs()
            .iter()
            .any(|r| r.msg.contains(needle))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_failures_retry_until_tip_arrives() {
        let endpoint = FakeEndpoint::new(
            vec![unreachable(), unreachable(), Ok(TipHash::genesis())],
            Ok(json!({"status": "ok"})),
        );
        let server = server(endpoint, 0, Duration::from_secs(60));

        assert_eq!(server.run_cycle().await.unwrap(), CycleOutcome::FetchFailed);
        assert_eq!(server.run_cycle().await.unwrap(), CycleOutcome::FetchFailed);
        assert!(server.endpoint().submitted().is_empty());

        assert_eq!(server.run_cycle().await.unwrap(), CycleOutcome::Submitted);
        let submitted = server.endpoint().submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].prev_hash, TipHash::genesis().as_str());
        assert_eq!(submitted[0].nonce, 0);
        assert_eq!(server.endpoint().fetches(), 3);
        assert_eq!(server.stats().fetch_failures(), 2);
        assert!(logged(&server, "Waiting for server connection"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_submission_is_not_resubmitted() {
        let endpoint = FakeEndpoint::new(
            vec![Ok(tip('a')), Ok(tip('b'))],
            Err(ClientError::Rejected {
                status: 500,
                body: "internal error".to_string(),
            }),
        );
        let server = server(endpoint, 1, Duration::from_secs(60));

        assert_eq!(server.run_cycle().await.unwrap(), CycleOutcome::SubmitFailed);
        assert_eq!(server.endpoint().submitted().len(), 1);
        assert!(logged(&server, "Submission failed"));

        assert_eq!(server.run_cycle().await.unwrap(), CycleOutcome::SubmitFailed);
        let submitted = server.endpoint().submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].prev_hash, tip('a').as_str());
        assert_eq!(submitted[1].prev_hash, tip('b').as_str());
        assert_eq!(server.endpoint().fetches(), 2);
        assert_eq!(server.stats().rejected(), 2);
        assert_eq!(server.stats().accepted(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_tip_abandons_search() {
        // The probe during the search pops the second tip, which differs.
        let endpoint = FakeEndpoint::new(vec![Ok(tip('a')), Ok(tip('b'))], Ok(json!({})));
        let server = server(endpoint, 64, Duration::from_millis(5));

        let outcome = server.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Stale);
        assert!(server.endpoint().submitted().is_empty());
        assert_eq!(server.stats().stale(), 1);
        assert_eq!(server.endpoint().fetches(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_stops_run() {
        let endpoint = FakeEndpoint::new(vec![Ok(tip('a'))], Ok(json!({})));
        let server = server(endpoint, 64, Duration::from_secs(60));
        server.request_shutdown();
        Arc::clone(&server).run().await.unwrap();
        assert_eq!(server.endpoint().fetches(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_interrupts_running_search() {
        let endpoint = FakeEndpoint::new(vec![Ok(tip('a'))], Ok(json!({})));
        let server = server(endpoint, 64, Duration::from_secs(60));
        let stopper = Arc::clone(&server);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.request_shutdown();
        });
        assert_eq!(server.run_cycle().await.unwrap(), CycleOutcome::Shutdown);
        assert!(server.endpoint().submitted().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_backs_off_until_tip_then_submits() {
        let backoff = Duration::from_millis(40);
        let endpoint = FakeEndpoint::new(
            vec![unreachable(), unreachable(), Ok(tip('a'))],
            Ok(json!({"status": "ok"})),
        );
        let server = server_with(
            endpoint,
            driver(0, backoff, Duration::from_millis(300)),
            mining(1, Duration::from_secs(60)),
        );

        let started = Instant::now();
        let runner = tokio::spawn(Arc::clone(&server).run());
        while server.endpoint().submitted().is_empty() {
            assert!(started.elapsed() < Duration::from_secs(5), "no submission");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let until_submit = started.elapsed();
        // Lands during the post-submit delay, so no further fetch happens.
        server.request_shutdown();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(until_submit >= backoff * 2);
        assert_eq!(server.endpoint().fetches(), 3);
        assert_eq!(server.endpoint().submitted().len(), 1);
        assert_eq!(server.stats().fetch_failures(), 2);
        assert_eq!(server.stats().accepted(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_panic_ends_run_with_error() {
        let mut endpoint = FakeEndpoint::new(vec![Ok(tip('a'))], Ok(json!({})));
        // The staleness check mid-search is the second fetch.
        endpoint.panic_from_fetch = Some(1);
        let server = server_with(
            endpoint,
            driver(64, DEFAULT_RETRY_BACKOFF, DEFAULT_CYCLE_DELAY),
            mining(2, Duration::from_millis(5)),
        );

        let err = tokio::time::timeout(Duration::from_secs(5), Arc::clone(&server).run())
            .await
            .unwrap()
            .unwrap_err();
        assert!(format!("{:#}", err).contains("mining task failed"));
        assert!(server.endpoint().submitted().is_empty());
        assert_eq!(server.endpoint().fetches(), 2);
    }

    #[test]
    fn test_cycle_delays() {
        let settings = driver(5, DEFAULT_RETRY_BACKOFF, DEFAULT_CYCLE_DELAY);
        assert_eq!(CycleOutcome::FetchFailed.delay(&settings), Duration::from_secs(5));
        assert_eq!(CycleOutcome::Submitted.delay(&settings), Duration::from_secs(2));
        assert_eq!(CycleOutcome::SubmitFailed.delay(&settings), Duration::from_secs(2));
        assert_eq!(CycleOutcome::Stale.delay(&settings), Duration::ZERO);
    }
}
