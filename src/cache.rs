/// Per-cycle beacon cache.
///
/// Holds one [`Sighting`] per hardware address seen during the current scan
/// cycle. Lookup is a linear scan; capacity is a few dozen entries and the
/// cache is drained at the end of every cycle. When full, a new address
/// takes over the last slot.
use heapless::Vec;

use crate::beacon::MAX_ADV_LEN;

/// Default number of addresses tracked per scan cycle.
pub const CACHE_SIZE: usize = 64;

/// Raw advertisement payload, truncated to what the radio can deliver.
pub type AdvData = Vec<u8, MAX_ADV_LEN>;

/// Most recent observation of one advertiser within a scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sighting {
    pub address: [u8; 6],
    pub rssi: i8,
    pub adv: AdvData,
}

impl Sighting {
    pub fn new(address: [u8; 6]) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Record a fresh advertisement, keeping at most [`MAX_ADV_LEN`] bytes.
    pub fn update(&mut self, rssi: i8, payload: &[u8]) {
        self.rssi = rssi;
        self.adv.clear();
        let len = payload.len().min(MAX_ADV_LEN);
        // Cannot fail: len is clamped to capacity
        let _ = self.adv.extend_from_slice(&payload[..len]);
    }
}

pub struct BeaconCache<const N: usize = CACHE_SIZE> {
    entries: Vec<Sighting, N>,
}

impl<const N: usize> BeaconCache<N> {
    /// Eviction reuses the last slot, so there must be one.
    const HAS_SLOT: () = assert!(N > 0, "BeaconCache capacity must be at least 1");

    pub const fn new() -> Self {
        let () = Self::HAS_SLOT;
        Self {
            entries: Vec::new(),
        }
    }

    /// Entry for `address`, created if absent.
    pub fn find_or_create(&mut self, address: &[u8; 6]) -> &mut Sighting {
        if let Some(idx) = self.entries.iter().position(|s| s.address == *address) {
            return &mut self.entries[idx];
        }

        if self.entries.is_full() {
            self.entries.pop();
        }
        // Cannot fail: a slot was just freed if needed
        let _ = self.entries.push(Sighting::new(*address));
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    /// Take every entry in insertion order, leaving the cache empty.
    pub fn drain(&mut self) -> impl Iterator<Item = Sighting> {
        core::mem::take(&mut self.entries).into_iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sighting> {
        self.entries.iter()
    }
}

impl<const N: usize> Default for BeaconCache<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> [u8; 6] {
        [0xAA, 0xBB, 0xCC, 0x00, 0x00, n]
    }

    #[test]
    fn same_address_reuses_entry() {
        let mut cache = BeaconCache::<4>::new();
        cache.find_or_create(&addr(1)).update(-40, &[1, 2, 3]);
        cache.find_or_create(&addr(1)).update(-50, &[4]);
        assert_eq!(cache.len(), 1);
        let s = cache.find_or_create(&addr(1));
        assert_eq!(s.rssi, -50);
        assert_eq!(s.adv.as_slice(), &[4]);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = BeaconCache::<4>::new();
        for n in 0..5 {
            cache.find_or_create(&addr(n)).update(-60, &[n]);
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.iter().any(|s| s.address == addr(4)));
        // Last slot was the one evicted
        assert!(!cache.iter().any(|s| s.address == addr(3)));
    }

    #[test]
    fn most_recent_address_always_present() {
        let mut cache = BeaconCache::<3>::new();
        for n in 0..10 {
            cache.find_or_create(&addr(n));
            assert!(cache.iter().any(|s| s.address == addr(n)));
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn evicted_slot_starts_fresh() {
        let mut cache = BeaconCache::<1>::new();
        cache.find_or_create(&addr(1)).update(-30, &[9, 9, 9]);
        let s = cache.find_or_create(&addr(2));
        assert_eq!(s.address, addr(2));
        assert!(s.adv.is_empty());
    }

    #[test]
    fn single_slot_cache_keeps_only_latest() {
        let mut cache = BeaconCache::<1>::new();
        for n in 0..5 {
            cache.find_or_create(&addr(n)).update(-50, &[n]);
            assert_eq!(cache.len(), 1);
        }
        let drained: std::vec::Vec<Sighting> = cache.drain().collect();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].address, addr(4));
        assert_eq!(drained[0].adv.as_slice(), &[4]);
    }

    #[test]
    fn drain_yields_each_address_once_in_order() {
        let mut cache = BeaconCache::<8>::new();
        for n in [5, 3, 7, 3, 5, 1] {
            cache.find_or_create(&addr(n));
        }
        let drained: std::vec::Vec<[u8; 6]> = cache.drain().map(|s| s.address).collect();
        assert_eq!(drained, [addr(5), addr(3), addr(7), addr(1)]);
        assert!(cache.is_empty());
        assert_eq!(cache.drain().count(), 0);
    }

    #[test]
    fn payload_truncated_to_max_adv_len() {
        let mut cache = BeaconCache::<2>::new();
        let long = [0x42u8; 80];
        cache.find_or_create(&addr(1)).update(-70, &long);
        assert_eq!(cache.find_or_create(&addr(1)).adv.len(), MAX_ADV_LEN);
    }

    #[test]
    fn clear_empties_cache() {
        let mut cache = BeaconCache::<2>::new();
        cache.find_or_create(&addr(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
