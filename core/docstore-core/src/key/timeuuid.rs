//! Time-ordered (version 1) UUID generation.
//!
//! Historical writes append one clustering cell per version, so the version
//! component must strictly increase within the process. The generator keeps
//! the last issued tick and bumps it when the clock has not advanced.

use rand::RngCore;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// 100ns intervals between 1582-10-15 and 1970-01-01.
const GREGORIAN_OFFSET: u64 = 0x01B2_1DD2_1381_4000;

/// Strictly increasing timeuuid source.
pub struct TimeUuidGenerator {
    last_ticks: AtomicU64,
    clock_seq: u16,
    node: [u8; 6],
}

impl TimeUuidGenerator {
    /// Create a generator with a random clock sequence and multicast node id.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut node = [0u8; 6];
        rng.fill_bytes(&mut node);
        // random node ids must set the multicast bit
        node[0] |= 0x01;
        Self {
            last_ticks: AtomicU64::new(0),
            clock_seq: (rng.next_u32() & 0x3FFF) as u16,
            node,
        }
    }

    /// Process-wide shared generator.
    pub fn global() -> &'static TimeUuidGenerator {
        static GLOBAL: OnceLock<TimeUuidGenerator> = OnceLock::new();
        GLOBAL.get_or_init(TimeUuidGenerator::new)
    }

    /// Next timeuuid; never equal to or older than a previously issued one.
    pub fn next(&self) -> Uuid {
        let now = now_ticks();
        let mut last = self.last_ticks.load(Ordering::Relaxed);
        let ticks = loop {
            let candidate = now.max(last + 1);
            match self.last_ticks.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break candidate,
                Err(actual) => last = actual,
            }
        };
        self.build(ticks)
    }

    fn build(&self, ticks: u64) -> Uuid {
        let time_low = (ticks & 0xFFFF_FFFF) as u32;
        let time_mid = ((ticks >> 32) & 0xFFFF) as u16;
        let time_hi_and_version = (((ticks >> 48) & 0x0FFF) as u16) | (1 << 12);
        let mut tail = [0u8; 8];
        tail[0] = ((self.clock_seq >> 8) as u8 & 0x3F) | 0x80;
        tail[1] = self.clock_seq as u8;
        tail[2..].copy_from_slice(&self.node);
        Uuid::from_fields(time_low, time_mid, time_hi_and_version, &tail)
    }
}

impl Default for TimeUuidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ticks() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_nanos() / 100) as u64 + GREGORIAN_OFFSET
}
