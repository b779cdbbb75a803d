use super::*;
use crate::cache::TieredCache;
use crate::config::RetryConfig;
use crate::decode::tests::png_bytes;
use crate::job::FailureReason;
use crate::transport::{Response, TransportError};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Barrier, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(10);

fn config(pool_size: usize, max_attempts: u32, delay_ms: u64) -> FetchConfig {
    FetchConfig {
        pool_size,
        retry: RetryConfig {
            max_attempts,
            delay_ms,
        },
        ..FetchConfig::default()
    }
}

fn memory_cache() -> Arc<TieredCache> {
    Arc::new(TieredCache::new(16, Duration::from_secs(3600)))
}

/// Collects outcomes and lets the test block until enough arrived.
#[derive(Default)]
struct Collector {
    seen: Mutex<Vec<(String, FetchOutcome)>>,
    arrived: Condvar,
}

impl Collector {
    fn wait_for(&self, n: usize) -> Vec<(String, FetchOutcome)> {
        let guard = self.seen.lock().unwrap();
        let (guard, res) = self
            .arrived
            .wait_timeout_while(guard, WAIT, |seen| seen.len() < n)
            .unwrap();
        assert!(!res.timed_out(), "timed out waiting for {} outcomes", n);
        guard.clone()
    }

    fn snapshot(&self) -> Vec<(String, FetchOutcome)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Completion for Collector {
    fn complete(&self, key: &str, outcome: FetchOutcome) {
        self.seen.lock().unwrap().push((key.to_string(), outcome));
        self.arrived.notify_all();
    }
}

/// Serves `body` to every open.
struct Serving {
    body: Vec<u8>,
    calls: AtomicU32,
}

impl Serving {
    fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            calls: AtomicU32::new(0),
        }
    }
}

impl Transport for Serving {
    fn open(&self, _key: &str) -> Result<Response, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::from_bytes(self.body.clone(), true))
    }
}

/// Blocks every open until released; counts opens that have started.
struct Gated {
    body: Vec<u8>,
    state: Mutex<(bool, u32)>,
    changed: Condvar,
}

impl Gated {
    fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            state: Mutex::new((false, 0)),
            changed: Condvar::new(),
        }
    }

    fn release(&self) {
        self.state.lock().unwrap().0 = true;
        self.changed.notify_all();
    }

    fn wait_entered(&self, n: u32) {
        let guard = self.state.lock().unwrap();
        let (_guard, res) = self
            .changed
            .wait_timeout_while(guard, WAIT, |(_, entered)| *entered < n)
            .unwrap();
        assert!(!res.timed_out(), "transport never entered");
    }

    fn entered(&self) -> u32 {
        self.state.lock().unwrap().1
    }
}

impl Transport for Gated {
    fn open(&self, _key: &str) -> Result<Response, TransportError> {
        let mut guard = self.state.lock().unwrap();
        guard.1 += 1;
        self.changed.notify_all();
        let _guard = self.changed.wait_while(guard, |(open, _)| !*open).unwrap();
        Ok(Response::from_bytes(self.body.clone(), true))
    }
}

#[test]
fn fetches_decodes_and_caches() {
    let transport = Arc::new(Serving::new(png_bytes(24, 12)));
    let cache = memory_cache();
    let scheduler = Scheduler::new(&config(1, 3, 10), transport.clone(), cache.clone()).unwrap();
    let collector = Arc::new(Collector::default());
    let consumer = Arc::new(Slot::new());

    let dispatch = scheduler.request("img://a", &consumer, collector.clone(), None);
    assert_eq!(dispatch, Dispatch::Queued);

    let outcomes = collector.wait_for(1);
    assert_eq!(outcomes[0].0, "img://a");
    let image = outcomes[0].1.image().expect("decoded image");
    assert_eq!((image.width(), image.height()), (24, 12));
    assert!(scheduler.cache().contains_key_in_memory("img://a"));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    scheduler.shutdown();
}

#[test]
fn blank_key_is_skipped() {
    let scheduler =
        Scheduler::new(&config(1, 1, 0), Arc::new(Serving::new(Vec::new())), memory_cache()).unwrap();
    let collector = Arc::new(Collector::default());
    let consumer = Arc::new(Slot::new());
    assert_eq!(
        scheduler.request("", &consumer, collector.clone(), None),
        Dispatch::Skipped(SkipReason::MissingKey)
    );
    assert_eq!(
        scheduler.request("   ", &consumer, collector.clone(), None),
        Dispatch::Skipped(SkipReason::MissingKey)
    );
    assert_eq!(consumer.current_key(), None);
    scheduler.shutdown();
    assert!(collector.snapshot().is_empty());
}

#[test]
fn repeated_request_dispatches_once() {
    let transport = Arc::new(Gated::new(png_bytes(4, 4)));
    let scheduler = Scheduler::new(&config(2, 1, 0), transport.clone(), memory_cache()).unwrap();
    let collector = Arc::new(Collector::default());
    let consumer = Arc::new(Slot::new());

    assert_eq!(scheduler.request("img://k", &consumer, collector.clone(), None), Dispatch::Queued);
    assert_eq!(
        scheduler.request("img://k", &consumer, collector.clone(), None),
        Dispatch::Skipped(SkipReason::AlreadyAwaiting)
    );
    transport.release();
    scheduler.shutdown();

    assert_eq!(collector.snapshot().len(), 1);
    assert_eq!(transport.entered(), 1);
}

#[test]
fn concurrent_repeats_from_one_consumer_dispatch_once() {
    const CALLERS: usize = 8;
    let transport = Arc::new(Gated::new(png_bytes(4, 4)));
    let scheduler = Scheduler::new(&config(2, 1, 0), transport.clone(), memory_cache()).unwrap();
    let collector = Arc::new(Collector::default());
    let consumer = Arc::new(Slot::new());
    let start = Barrier::new(CALLERS);

    let dispatches: Vec<Dispatch> = thread::scope(|s| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                s.spawn(|| {
                    start.wait();
                    scheduler.request("img://same", &consumer, collector.clone(), None)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    transport.release();
    scheduler.shutdown();

    let queued = dispatches.iter().filter(|d| **d == Dispatch::Queued).count();
    assert_eq!(queued, 1);
    assert_eq!(
        dispatches
            .iter()
            .filter(|d| **d == Dispatch::Skipped(SkipReason::AlreadyAwaiting))
            .count(),
        CALLERS - 1
    );
    assert_eq!(transport.entered(), 1);
    assert_eq!(collector.snapshot().len(), 1);
}

#[test]
fn superseded_key_is_not_delivered_but_still_cached() {
    let transport = Arc::new(Gated::new(png_bytes(4, 4)));
    let cache = memory_cache();
    let scheduler = Scheduler::new(&config(2, 1, 0), transport.clone(), cache.clone()).unwrap();
    let collector = Arc::new(Collector::default());
    let consumer = Arc::new(Slot::new());

    assert_eq!(scheduler.request("img://old", &consumer, collector.clone(), None), Dispatch::Queued);
    assert_eq!(scheduler.request("img://new", &consumer, collector.clone(), None), Dispatch::Queued);
    transport.wait_entered(2);
    transport.release();
    scheduler.shutdown();

    let outcomes = collector.snapshot();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, "img://new");
    assert!(cache.contains_key_in_memory("img://old"));
}

#[test]
fn memory_hit_is_delivered_on_the_calling_thread() {
    let transport = Arc::new(Serving::new(Vec::new()));
    let cache = memory_cache();
    cache.put("img://hot", Bytes::from(png_bytes(40, 20)));
    let scheduler = Scheduler::new(&config(1, 1, 0), transport.clone(), cache).unwrap();
    let consumer = Arc::new(Slot::new());

    let caller = thread::current().id();
    let delivered_on = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&delivered_on);
    let callback: Arc<dyn Completion> = Arc::new(move |_key: &str, outcome: FetchOutcome| {
        let image = outcome.image().cloned();
        *sink.lock().unwrap() = Some((thread::current().id(), image));
    });

    let dispatch = scheduler.request("img://hot", &consumer, callback, Dims::new(10, 10));
    assert_eq!(dispatch, Dispatch::Hit);
    let (thread_id, image) = delivered_on.lock().unwrap().take().expect("delivered synchronously");
    assert_eq!(thread_id, caller);
    let image = image.expect("image");
    assert_eq!((image.width(), image.height()), (10, 5));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    scheduler.shutdown();
}

#[test]
fn put_during_flight_does_not_short_circuit_the_job() {
    let fetched = png_bytes(16, 8);
    let transport = Arc::new(Gated::new(fetched.clone()));
    let cache = memory_cache();
    let scheduler = Scheduler::new(&config(1, 1, 0), transport.clone(), cache.clone()).unwrap();
    let collector = Arc::new(Collector::default());
    let consumer = Arc::new(Slot::new());

    assert_eq!(scheduler.request("img://p", &consumer, collector.clone(), None), Dispatch::Queued);
    transport.wait_entered(1);
    cache.put("img://p", Bytes::from(png_bytes(2, 2)));
    transport.release();

    let outcomes = collector.wait_for(1);
    let image = outcomes[0].1.image().expect("loaded");
    assert_eq!((image.width(), image.height()), (16, 8));
    assert_eq!(cache.get("img://p").unwrap().as_ref(), &fetched[..]);
    scheduler.shutdown();
}

/// Fails the first `fail_first` opens made from each worker thread.
struct FlakyPerThread {
    body: Vec<u8>,
    fail_first: u32,
    attempts: Mutex<HashMap<ThreadId, u32>>,
    first_attempt: Barrier,
    calls: AtomicU32,
}

impl Transport for FlakyPerThread {
    fn open(&self, _key: &str) -> Result<Response, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(thread::current().id()).or_insert(0);
            *n += 1;
            *n
        };
        if n == 1 {
            // Both jobs are past their cache check before either can succeed.
            self.first_attempt.wait();
        }
        if n <= self.fail_first {
            return Err(TransportError::Http(503));
        }
        Ok(Response::from_bytes(self.body.clone(), true))
    }
}

#[test]
fn two_consumers_same_key_both_recover_after_retries() {
    let delay_ms = 30;
    let transport = Arc::new(FlakyPerThread {
        body: png_bytes(8, 8),
        fail_first: 2,
        attempts: Mutex::new(HashMap::new()),
        first_attempt: Barrier::new(2),
        calls: AtomicU32::new(0),
    });
    let scheduler = Scheduler::new(&config(2, 3, delay_ms), transport.clone(), memory_cache()).unwrap();
    let collector = Arc::new(Collector::default());
    let first = Arc::new(Slot::new());
    let second = Arc::new(Slot::new());

    let started = Instant::now();
    assert_eq!(scheduler.request("img://x", &first, collector.clone(), None), Dispatch::Queued);
    assert_eq!(scheduler.request("img://x", &second, collector.clone(), None), Dispatch::Queued);

    let outcomes = collector.wait_for(2);
    assert!(started.elapsed() >= Duration::from_millis(2 * delay_ms));
    assert!(outcomes.iter().all(|(key, o)| key == "img://x" && o.is_loaded()));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 6);
    scheduler.shutdown();
}

#[test]
fn always_failing_transport_is_tried_max_attempts_times() {
    struct Down(AtomicU32);
    impl Transport for Down {
        fn open(&self, _key: &str) -> Result<Response, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )))
        }
    }

    let transport = Arc::new(Down(AtomicU32::new(0)));
    let cache = memory_cache();
    let scheduler = Scheduler::new(&config(1, 3, 20), transport.clone(), cache.clone()).unwrap();
    let collector = Arc::new(Collector::default());
    let consumer = Arc::new(Slot::new());

    let started = Instant::now();
    scheduler.request("img://down", &consumer, collector.clone(), None);
    let outcomes = collector.wait_for(1);
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(outcomes[0].1.failure_reason(), Some(FailureReason::Transport));
    assert_eq!(transport.0.load(Ordering::SeqCst), 3);
    assert!(cache.get("img://down").is_none());
    scheduler.shutdown();
}

#[test]
fn panicking_job_reports_failure_and_worker_keeps_serving() {
    struct PanicsOn {
        bad: &'static str,
        body: Vec<u8>,
    }
    impl Transport for PanicsOn {
        fn open(&self, key: &str) -> Result<Response, TransportError> {
            if key == self.bad {
                panic!("transport bug on {}", key);
            }
            Ok(Response::from_bytes(self.body.clone(), false))
        }
    }

    let transport = Arc::new(PanicsOn {
        bad: "img://boom",
        body: png_bytes(4, 4),
    });
    let scheduler = Scheduler::new(&config(1, 1, 0), transport, memory_cache()).unwrap();
    let collector = Arc::new(Collector::default());
    let a = Arc::new(Slot::new());
    let b = Arc::new(Slot::new());

    scheduler.request("img://boom", &a, collector.clone(), None);
    scheduler.request("img://fine", &b, collector.clone(), None);
    let outcomes = collector.wait_for(2);

    let by_key: HashMap<_, _> = outcomes.into_iter().collect();
    assert_eq!(by_key["img://boom"].failure_reason(), Some(FailureReason::Panicked));
    assert!(by_key["img://fine"].is_loaded());
    scheduler.shutdown();
}

#[test]
fn clear_cache_empties_memory() {
    let cache = memory_cache();
    cache.put("img://a", Bytes::from_static(b"x"));
    let scheduler = Scheduler::new(&config(1, 1, 0), Arc::new(Serving::new(Vec::new())), cache).unwrap();
    scheduler.clear_cache();
    assert!(!scheduler.cache().contains_key_in_memory("img://a"));
    assert_eq!(scheduler.pool_size(), 1);
    scheduler.shutdown();
}
