//! Host telemetry sampling
//!
//! One sampler task per connection emits a [`StatsSample`] on a fixed
//! cadence until its cancellation token fires. A failed collection is
//! logged and the tick skipped; it never ends the loop or the connection.

use std::time::Instant;

use anyhow::Result;
use sysinfo::{Networks, System};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use vigil_protocol::{ServerMessage, StatsSample};

/// Source of telemetry samples.
///
/// The sampler loop is written against this trait so tests can script
/// per-tick failures.
pub trait Collect: Send {
    /// Produce one snapshot of host resource usage
    fn sample(&mut self) -> Result<StatsSample>;
}

/// Collects host figures through sysinfo.
///
/// Holds its `System` and `Networks` handles across ticks: CPU usage and
/// network rates are deltas against the previous refresh.
pub struct StatsCollector {
    sys: System,
    networks: Networks,
    last_refresh: Option<Instant>,
}

impl StatsCollector {
    /// Create a collector and prime the baseline refresh
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let networks = Networks::new_with_refreshed_list();

        Self {
            sys,
            networks,
            last_refresh: Some(Instant::now()),
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collect for StatsCollector {
    fn sample(&mut self) -> Result<StatsSample> {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.networks.refresh();

        let now = Instant::now();
        let elapsed = self
            .last_refresh
            .map(|t| now.duration_since(t).as_secs_f64())
            .unwrap_or(0.0);
        self.last_refresh = Some(now);

        // Sum per-interface deltas into the two aggregate scalar rates
        let (tx_bytes, rx_bytes) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(tx, rx), (_name, data)| {
                (tx + data.transmitted(), rx + data.received())
            });

        let (net_tx_bytes_per_sec, net_rx_bytes_per_sec) = if elapsed > 0.0 {
            (tx_bytes as f64 / elapsed, rx_bytes as f64 / elapsed)
        } else {
            (0.0, 0.0)
        };

        Ok(StatsSample {
            cpu_percent: self.sys.global_cpu_usage(),
            mem_used_bytes: self.sys.used_memory(),
            mem_total_bytes: self.sys.total_memory(),
            uptime_secs: System::uptime(),
            net_tx_bytes_per_sec,
            net_rx_bytes_per_sec,
        })
    }
}

/// Run the sampling loop for one connection.
///
/// Emits one sample per interval tick until cancelled. Cancellation is
/// checked again after each tick fires, so no sample is emitted once the
/// token is observed cancelled.
pub async fn run_sampler<C: Collect>(
    mut collector: C,
    interval: std::time::Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<ServerMessage>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first interval tick fires immediately; consume it so emission
    // starts one cadence after connect, like the rest of the stream.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    break;
                }
                match collector.sample() {
                    Ok(sample) => {
                        if tx.send(ServerMessage::Stats(sample)).await.is_err() {
                            // Connection is gone; its teardown cancels us
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Telemetry collection failed, skipping tick: {:#}", e);
                    }
                }
            }
        }
    }

    tracing::debug!("Telemetry sampler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Collector that fails on scripted ticks and counts calls
    struct ScriptedCollector {
        calls: u32,
        fail_on: Vec<u32>,
    }

    impl ScriptedCollector {
        fn new(fail_on: Vec<u32>) -> Self {
            Self { calls: 0, fail_on }
        }

        fn stub_sample(tick: u32) -> StatsSample {
            StatsSample {
                cpu_percent: tick as f32,
                mem_used_bytes: 0,
                mem_total_bytes: 0,
                uptime_secs: u64::from(tick),
                net_tx_bytes_per_sec: 0.0,
                net_rx_bytes_per_sec: 0.0,
            }
        }
    }

    impl Collect for ScriptedCollector {
        fn sample(&mut self) -> Result<StatsSample> {
            self.calls += 1;
            if self.fail_on.contains(&self.calls) {
                anyhow::bail!("simulated collection failure at tick {}", self.calls);
            }
            Ok(Self::stub_sample(self.calls))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_is_skipped_stream_continues() {
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let collector = ScriptedCollector::new(vec![3]);

        let handle = tokio::spawn(run_sampler(
            collector,
            Duration::from_secs(2),
            cancel.clone(),
            tx,
        ));

        // 10-second window = 5 cadence ticks, tick 3 fails
        tokio::time::sleep(Duration::from_secs(11)).await;
        cancel.cancel();
        handle.await.unwrap();

        let mut ticks = Vec::new();
        while let Some(ServerMessage::Stats(sample)) = rx.recv().await {
            ticks.push(sample.uptime_secs);
        }
        assert_eq!(ticks, vec![1, 2, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_emission_after_cancel() {
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let collector = ScriptedCollector::new(vec![]);

        let handle = tokio::spawn(run_sampler(
            collector,
            Duration::from_secs(2),
            cancel.clone(),
            tx,
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();

        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 2);

        // Channel is closed once the sampler task has ended; nothing can
        // arrive later.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_order_preserved() {
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let collector = ScriptedCollector::new(vec![]);

        let handle = tokio::spawn(run_sampler(
            collector,
            Duration::from_secs(2),
            cancel.clone(),
            tx,
        ));

        tokio::time::sleep(Duration::from_secs(9)).await;
        cancel.cancel();
        handle.await.unwrap();

        let mut ticks = Vec::new();
        while let Some(ServerMessage::Stats(sample)) = rx.recv().await {
            ticks.push(sample.uptime_secs);
        }
        assert_eq!(ticks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_stats_collector_produces_sample() {
        let mut collector = StatsCollector::new();
        let sample = collector.sample().unwrap();
        assert!(sample.mem_total_bytes > 0);
        assert!(sample.cpu_percent >= 0.0);
    }
}
