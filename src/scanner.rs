/// Scan cycle glue between the radio and the MQTT publisher.
///
/// The radio thread feeds every advertisement into [`ScanOrchestrator::on_advertisement`],
/// which keeps only the latest sighting per address. When the radio reports
/// the cycle finished, [`ScanOrchestrator::end_cycle`] publishes each cached
/// sighting (raw report first, then the decoded beacon report), clears the
/// cache and optionally publishes scanner statistics. The caller restarts
/// the scan afterwards.
use crate::beacon::{self, BeaconRecord};
use crate::cache::{BeaconCache, Sighting, CACHE_SIZE};
use crate::config::ValueString;
use crate::mqtt::MessageSink;
use crate::protocol::{self, Publication, StatsReport};
use crate::watchdog::Watchdog;

/// Minimum spacing between stats reports
pub const STATS_INTERVAL_MS: u32 = 60_000;

/// Running totals since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub seen: u32,
    pub pub_raw: u32,
    pub pub_ibeacon: u32,
    pub pub_eddystone: u32,
    pub pub_err: u32,
}

/// Heap usage as reported by the platform allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapInfo {
    pub total_alloc: u32,
    pub total_free: u32,
}

pub struct ScanOrchestrator<'w, const N: usize = CACHE_SIZE> {
    cache: BeaconCache<N>,
    hostname: ValueString,
    boot_count: u32,
    stats: ScanStats,
    stats_interval_ms: Option<u32>,
    last_stats_ms: u32,
    watchdog: &'w Watchdog,
}

impl<'w, const N: usize> ScanOrchestrator<'w, N> {
    pub fn new(hostname: &str, boot_count: u32, watchdog: &'w Watchdog, now_ms: u32) -> Self {
        let mut name = ValueString::new();
        for c in hostname.chars() {
            if name.push(c).is_err() {
                break;
            }
        }
        Self {
            cache: BeaconCache::new(),
            hostname: name,
            boot_count,
            stats: ScanStats::default(),
            stats_interval_ms: None,
            last_stats_ms: now_ms,
            watchdog,
        }
    }

    /// Publish a stats report at most once per `interval_ms`.
    pub fn enable_stats(&mut self, interval_ms: u32) {
        self.stats_interval_ms = Some(interval_ms);
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.cache.len()
    }

    pub fn on_advertisement(&mut self, address: &[u8; 6], rssi: i8, payload: &[u8]) {
        self.watchdog.reset();
        self.cache.find_or_create(address).update(rssi, payload);
        self.stats.seen = self.stats.seen.wrapping_add(1);
    }

    /// Publish everything seen this cycle and empty the cache.
    ///
    /// `heap` is only consulted when a stats report is due. Returns the
    /// number of sightings handled.
    pub fn end_cycle<M, H>(&mut self, sink: &mut M, now_ms: u32, heap: H) -> usize
    where
        M: MessageSink,
        H: FnOnce() -> HeapInfo,
    {
        let mut handled = 0;
        for sighting in self.cache.drain() {
            self.publish_sighting(sink, &sighting);
            handled += 1;
        }

        if let Some(interval) = self.stats_interval_ms {
            if now_ms.wrapping_sub(self.last_stats_ms) >= interval {
                self.last_stats_ms = now_ms;
                self.publish_stats(sink, heap());
                self.watchdog.reset();
            }
        }

        log::debug!(
            "Scan: cycle done, {} devices (seen={} raw={} ibeacon={} eddystone={} err={})",
            handled,
            self.stats.seen,
            self.stats.pub_raw,
            self.stats.pub_ibeacon,
            self.stats.pub_eddystone,
            self.stats.pub_err
        );
        handled
    }

    fn publish_sighting<M: MessageSink>(&mut self, sink: &mut M, sighting: &Sighting) {
        if let Some(p) = protocol::raw_publication(&self.hostname, sighting) {
            if self.send(sink, &p) {
                self.stats.pub_raw += 1;
            }
        }
        self.watchdog.reset();

        let record = beacon::decode_any(&sighting.adv);
        if let Some(p) = protocol::beacon_publication(&self.hostname, sighting, &record) {
            if self.send(sink, &p) {
                match record {
                    BeaconRecord::Eddystone(_) => self.stats.pub_eddystone += 1,
                    _ => self.stats.pub_ibeacon += 1,
                }
            }
            self.watchdog.reset();
        }
    }

    fn publish_stats<M: MessageSink>(&mut self, sink: &mut M, heap: HeapInfo) {
        let report = StatsReport {
            boot_count: self.boot_count,
            seen: self.stats.seen,
            pub_raw: self.stats.pub_raw,
            pub_ibeacon: self.stats.pub_ibeacon,
            pub_eddystone: self.stats.pub_eddystone,
            pub_err: self.stats.pub_err,
            total_alloc: heap.total_alloc,
            total_free: heap.total_free,
        };
        if let Some(p) = protocol::stats_publication(&self.hostname, &report) {
            self.send(sink, &p);
        }
    }

    fn send<M: MessageSink>(&mut self, sink: &mut M, p: &Publication) -> bool {
        let ok = sink.send(&p.topic, &p.payload);
        if !ok {
            self.stats.pub_err += 1;
        }
        ok
    }
}
