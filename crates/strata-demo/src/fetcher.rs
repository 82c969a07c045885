//! A byte fetcher that answers from a tokio runtime after a simulated delay.

use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;
use futures::channel::oneshot;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use strata_config::StreamConfig;
use strata_tiles::{ByteFetcher, FetchError, FetchFuture};
use tokio::runtime::Handle;
use tracing::debug;

/// Where payload bytes come from once the delay has passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    /// Read the URL as a path on disk.
    Filesystem,
    /// Generate a payload whose size is derived from the URL.
    Synthetic,
}

/// Latency and failure settings sampled per request.
#[derive(Clone, Copy, Debug)]
struct Conditions {
    latency: Duration,
    jitter_ms: u64,
    failure_rate: f64,
}

/// Simulated network: every fetch becomes a task that sleeps, then either
/// fails or yields bytes through a oneshot channel.
pub struct SimulatedFetcher {
    runtime: Handle,
    source: Source,
    conditions: Conditions,
    rng: Mutex<Xoshiro256StarStar>,
}

impl SimulatedFetcher {
    pub fn new(runtime: Handle, source: Source, stream: &StreamConfig) -> Self {
        Self {
            runtime,
            source,
            conditions: Conditions {
                latency: Duration::from_millis(stream.latency_ms),
                jitter_ms: stream.latency_jitter_ms,
                failure_rate: stream.failure_rate.clamp(0.0, 1.0),
            },
            rng: Mutex::new(Xoshiro256StarStar::seed_from_u64(stream.seed)),
        }
    }

    /// Delay and failure outcome for the next request.
    fn sample(&self) -> (Duration, bool) {
        let Ok(mut rng) = self.rng.lock() else {
            return (self.conditions.latency, false);
        };
        let jitter = if self.conditions.jitter_ms > 0 {
            rng.gen_range(0..=self.conditions.jitter_ms)
        } else {
            0
        };
        let fails = rng.gen_bool(self.conditions.failure_rate);
        (self.conditions.latency + Duration::from_millis(jitter), fails)
    }
}

impl ByteFetcher for SimulatedFetcher {
    fn fetch(&self, url: &str, priority: f64) -> FetchFuture {
        let (delay, fails) = self.sample();
        let (tx, rx) = oneshot::channel();
        let url = url.to_owned();
        let source = self.source;
        debug!(%url, priority, delay_ms = delay.as_millis() as u64, "fetch started");

        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let result = if fails {
                Err(FetchError::Failed {
                    message: format!("simulated failure for {url}"),
                })
            } else {
                match source {
                    Source::Filesystem => tokio::fs::read(&url).await.map_err(|err| FetchError::Failed {
                        message: format!("{url}: {err}"),
                    }),
                    Source::Synthetic => Ok(synthetic_payload(&url)),
                }
            };
            // The receiver is gone when the request was cancelled.
            let _ = tx.send(result);
        });

        rx.map(|result| result.unwrap_or(Err(FetchError::Aborted)))
            .boxed()
    }
}

/// A `b3dm`-tagged payload whose size shrinks with the tile's depth, read from
/// the first path segment of a synthetic URL (`tiles/<level>/<x>/<y>.b3dm`).
pub fn synthetic_payload(url: &str) -> Vec<u8> {
    let level = url
        .split('/')
        .nth(1)
        .and_then(|segment| segment.parse::<u32>().ok())
        .unwrap_or(0);
    let body = (64 * 1024usize) >> level.min(4);
    let mut bytes = Vec::with_capacity(4 + body);
    bytes.extend_from_slice(b"b3dm");
    bytes.resize(4 + body, 0);
    bytes
}
