use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

use crate::{
    block::{CandidateBlock, MinerAddress, TipHash},
    client::ClientError,
    sha256::PowHasher,
    staleness::{StalenessMonitor, TipCheck, DEFAULT_STALE_CHECK_INTERVAL},
    target::Difficulty,
    Log,
};

pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Hashes a worker counts locally before publishing them to the shared counter.
const HASH_COUNTER_FLUSH: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MinerError {
    #[error("nonce space exhausted after nonce {last_nonce} on tip {prev_hash}")]
    NonceSpaceExhausted { last_nonce: u64, prev_hash: String },

    #[error("mining worker {0} panicked")]
    WorkerPanicked(usize),
}

#[derive(Debug, Clone)]
pub struct MiningSettings {
    pub workers: usize,
    pub report_interval: Duration,
    pub stale_check_interval: Duration,
}

impl Default for MiningSettings {
    fn default() -> Self {
        MiningSettings {
            workers: DEFAULT_WORKERS,
            report_interval: DEFAULT_REPORT_INTERVAL,
            stale_check_interval: DEFAULT_STALE_CHECK_INTERVAL,
        }
    }
}

/// Everything a search attempt needs to know about the puzzle.
#[derive(Debug, Clone)]
pub struct SearchJob {
    pub prev_hash: TipHash,
    pub address: MinerAddress,
    pub difficulty: Difficulty,
}

/// The slice of the nonce space a worker walks: `start, start + step, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceStride {
    pub start: u64,
    pub step: u64,
}

impl NonceStride {
    pub fn sequential() -> Self {
        NonceStride { start: 0, step: 1 }
    }

    pub fn for_worker(worker_id: usize, workers: usize) -> Self {
        NonceStride {
            start: worker_id as u64,
            step: workers.max(1) as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(CandidateBlock),
    /// The chain tip moved; nothing found on the old tip is worth submitting.
    Stale,
    /// Another worker (or a shutdown request) ended the attempt.
    Cancelled,
}

const SEARCHING: u8 = 0;
const FOUND: u8 = 1;
const STALE: u8 = 2;
const ABORTED: u8 = 3;

/// State shared by all workers of one search attempt.
///
/// The state word leaves `SEARCHING` exactly once; the worker whose
/// transition succeeds owns the attempt's result.
pub struct SearchControl {
    state: AtomicU8,
    shutdown: Arc<AtomicBool>,
    hashes: AtomicU64,
}

impl SearchControl {
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        SearchControl {
            state: AtomicU8::new(SEARCHING),
            shutdown,
            hashes: AtomicU64::new(0),
        }
    }

    fn finish(&self, state: u8) -> bool {
        self.state
            .compare_exchange(SEARCHING, state, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) != SEARCHING || self.shutdown.load(Ordering::Relaxed)
    }

    pub fn hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    fn add_hashes(&self, count: u64) {
        if count > 0 {
            self.hashes.fetch_add(count, Ordering::Relaxed);
        }
    }
}

/// Ends the attempt for every worker if the owning worker unwinds.
struct AbortOnPanic<'a>(&'a SearchControl);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.finish(ABORTED);
        }
    }
}

/// Source of the current tip, consulted by the staleness check mid-search.
pub trait TipProbe {
    fn latest_tip(&mut self) -> Result<TipHash, ClientError>;
}

impl<F> TipProbe for F
where
    F: FnMut() -> Result<TipHash, ClientError>,
{
    fn latest_tip(&mut self) -> Result<TipHash, ClientError> {
        self()
    }
}

/// Duties of the lead worker: staleness checks and rate telemetry.
pub struct Supervisor<P> {
    monitor: StalenessMonitor,
    probe: P,
    report_interval: Duration,
    last_report: Instant,
}

impl<P: TipProbe> Supervisor<P> {
    pub fn new(probe: P, stale_check_interval: Duration, report_interval: Duration) -> Self {
        let now = Instant::now();
        Supervisor {
            monitor: StalenessMonitor::new(stale_check_interval, now),
            probe,
            report_interval,
            last_report: now,
        }
    }

    fn check_tip(&mut self, started_on: &TipHash, now: Instant, log: &Log) -> bool {
        if !self.monitor.is_due(now) {
            return false;
        }
        let latest = self.probe.latest_tip();
        match self.monitor.evaluate(started_on, latest, Instant::now()) {
            TipCheck::Unchanged => {
                log.debug(format!("Tip unchanged after {}s", self.monitor.threshold().as_secs()), Some("Chain"));
                false
            }
            TipCheck::Changed(tip) => {
                log.info(
                    format!("🔄 New block found on network ({}...). Restarting mining...", tip.short()),
                    Some("Chain"),
                );
                true
            }
            TipCheck::Unknown(err) => {
                log.warn(format!("Staleness check failed, continuing search: {}", err), Some("Chain"));
                false
            }
        }
    }

    fn report_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_report) > self.report_interval
    }
}

/// Walks one nonce stride until the digest meets the job's difficulty.
///
/// Within the stride nonces are tried in strictly increasing order. Only a
/// worker given a supervisor checks for staleness and reports rates.
pub fn search_worker<P: TipProbe>(
    job: &SearchJob,
    stride: NonceStride,
    control: &SearchControl,
    mut supervisor: Option<&mut Supervisor<P>>,
    log: &Log,
) -> Result<SearchOutcome, MinerError> {
    let _abort = AbortOnPanic(control);
    let hasher = PowHasher::new(job.prev_hash.as_str(), job.address.as_str());
    let started = Instant::now();
    let mut nonce = stride.start;
    let mut pending_hashes = 0u64;

    loop {
        if control.is_stopped() {
            control.add_hashes(pending_hashes);
            return Ok(SearchOutcome::Cancelled);
        }

        let now = supervisor.as_ref().map(|_| Instant::now());
        if let (Some(sup), Some(now)) = (supervisor.as_mut(), now) {
            if sup.check_tip(&job.prev_hash, now, log) {
                control.add_hashes(pending_hashes);
                return Ok(if control.finish(STALE) {
                    SearchOutcome::Stale
                } else {
                    SearchOutcome::Cancelled
                });
            }
        }

        let digest = hasher.digest(nonce);
        pending_hashes += 1;

        if let (Some(sup), Some(now)) = (supervisor.as_mut(), now) {
            if sup.report_due(now) {
                control.add_hashes(pending_hashes);
                pending_hashes = 0;
                let elapsed = started.elapsed().as_secs_f64();
                let hashrate = if elapsed > 0.0 {
                    control.hashes() as f64 / elapsed
                } else {
                    0.0
                };
                log.info(
                    format!(
                        "[{}] nonce={} hash={}... ({})",
                        job.address,
                        nonce,
                        &hex::encode(digest)[..16],
                        format_hashes_per_sec(hashrate as u64)
                    ),
                    Some("Hashrate"),
                );
                log.report_hashrate(hashrate);
                sup.last_report = Instant::now();
            }
        }

        if job.difficulty.is_met_by(&digest) {
            control.add_hashes(pending_hashes);
            if !control.finish(FOUND) {
                return Ok(SearchOutcome::Cancelled);
            }
            let pow_hash = hex::encode(digest);
            log.info(
                format!(
                    "✅ Found valid nonce {} after {} hashes in {:.1}s",
                    nonce,
                    format_number(control.hashes()),
                    started.elapsed().as_secs_f64()
                ),
                Some("Share"),
            );
            log.info(format!("   Hash: {}", pow_hash), Some("Share"));
            return Ok(SearchOutcome::Found(CandidateBlock::new(
                &job.address,
                nonce,
                pow_hash,
                &job.prev_hash,
            )));
        }

        if pending_hashes >= HASH_COUNTER_FLUSH {
            control.add_hashes(pending_hashes);
            pending_hashes = 0;
        }

        nonce = match nonce.checked_add(stride.step) {
            Some(next) => next,
            None => {
                control.add_hashes(pending_hashes);
                control.finish(ABORTED);
                return Err(MinerError::NonceSpaceExhausted {
                    last_nonce: nonce,
                    prev_hash: job.prev_hash.to_string(),
                });
            }
        };
    }
}

/// CPU miner splitting each search over `settings.workers` threads.
pub struct Miner {
    settings: MiningSettings,
}

impl Miner {
    pub fn new(settings: MiningSettings) -> Self {
        Miner { settings }
    }

    /// Blocks until a worker finds a nonce, the tip goes stale, or `shutdown`
    /// is raised. Run it off the async executor.
    pub fn find_nonce<P: TipProbe + Send>(
        &self,
        job: &SearchJob,
        probe: P,
        shutdown: &Arc<AtomicBool>,
        log: &Log,
    ) -> Result<SearchOutcome, MinerError> {
        let workers = self.settings.workers.max(1);
        let control = SearchControl::new(Arc::clone(shutdown));
        let mut supervisor = Supervisor::new(
            probe,
            self.settings.stale_check_interval,
            self.settings.report_interval,
        );

        log.info(
            format!(
                "⛏️  Starting mining for {} (difficulty={}, workers={})",
                job.address, job.difficulty, workers
            ),
            Some("Miner"),
        );
        log.info(format!("   Last block hash: {}", job.prev_hash), Some("Miner"));

        if workers == 1 {
            return search_worker(job, NonceStride::sequential(), &control, Some(&mut supervisor), log);
        }

        let results: Vec<Result<SearchOutcome, MinerError>> = thread::scope(|scope| {
            let control = &control;
            let helpers: Vec<_> = (1..workers)
                .map(|id| {
                    scope.spawn(move || {
                        search_worker::<P>(job, NonceStride::for_worker(id, workers), control, None, log)
                    })
                })
                .collect();

            let lead = search_worker(
                job,
                NonceStride::for_worker(0, workers),
                control,
                Some(&mut supervisor),
                log,
            );

            let mut results = vec![lead];
            for (offset, helper) in helpers.into_iter().enumerate() {
                results.push(
                    helper
                        .join()
                        .unwrap_or(Err(MinerError::WorkerPanicked(offset + 1))),
                );
            }
            results
        });

        merge_outcomes(results)
    }
}

/// Picks the attempt's result out of the per-worker results. A panicked
/// worker fails the attempt; otherwise a found block or staleness wins over
/// cancellation and other errors surface only if nothing won.
fn merge_outcomes(
    results: Vec<Result<SearchOutcome, MinerError>>,
) -> Result<SearchOutcome, MinerError> {
    let mut first_error = None;
    let mut outcome = SearchOutcome::Cancelled;
    for result in results {
        match result {
            Err(err @ MinerError::WorkerPanicked(_)) => return Err(err),
            Ok(SearchOutcome::Cancelled) => {}
            Ok(decided) => outcome = decided,
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    match (outcome, first_error) {
        (SearchOutcome::Cancelled, Some(err)) => Err(err),
        (outcome, _) => Ok(outcome),
    }
}

pub fn format_number(value: u64) -> String {
    let digits = value.to_string();
    let len = digits.len();
    let mut formatted = String::with_capacity(len + len / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(digit);
    }
    formatted
}

// Format hashes per second as H/s, kH/s, MH/s, ...
pub fn format_hashes_per_sec(value: u64) -> String {
    let units = ["H/s", "kH/s", "MH/s", "GH/s", "TH/s", "PH/s", "EH/s"];
    let mut unit = 0;
    let mut float_value = value as f64;
    while float_value >= 1000.0 && unit < units.len() - 1 {
        float_value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", format_number(value), units[unit])
    } else {
        format!("{:.2} {}", float_value, units[unit])
    }
}
