//! Lock-free atomic counters shared by the WebSocket, SSE, proxy, and media
//! engines, plus optional mutex-guarded detail maps for per-path/per-status
//! breakdowns (disabled by default — callers opt in per engine).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A single monotonically-increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A counter that can also go down (e.g. "current connections").
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn incr(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn decr(&self) -> i64 {
        self.0.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A timestamp recorded as milliseconds since `UNIX_EPOCH`, `0` meaning
/// "never". Stored as an atomic so it can be updated from any fan-out path
/// without a lock.
#[derive(Debug, Default)]
pub struct LastSeen(AtomicU64);

impl LastSeen {
    pub fn touch(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// WebSocket engine counters (§4.4): total connections accepted, messages
/// sent/received. "current connections" is deliberately not tracked here —
/// it is defined as the client map's length, read under its own lock.
#[derive(Debug, Default)]
pub struct WsStats {
    pub total_connections: Counter,
    pub messages_sent: Counter,
    pub messages_received: Counter,
}

/// SSE engine counters (§4.5).
#[derive(Debug, Default)]
pub struct SseStats {
    pub total_connections: Counter,
    pub current_connections: Gauge,
    pub messages_sent: Counter,
    pub rejected_connections: Counter,
    pub last_connected_ms: LastSeen,
    pub last_disconnected_ms: LastSeen,
}

/// Reverse proxy engine counters (§4.6).
#[derive(Debug, Default)]
pub struct ProxyStats {
    pub total: Counter,
    pub success: Counter,
    pub failure: Counter,
    pub bytes_proxied: Counter,
    pub last_request_ms: LastSeen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_and_gauge_arithmetic() {
        let c = Counter::default();
        assert_eq!(c.incr(), 1);
        assert_eq!(c.add(5), 6);
        assert_eq!(c.get(), 6);

        let g = Gauge::default();
        g.incr();
        g.incr();
        assert_eq!(g.decr(), 1);
        assert_eq!(g.get(), 1);
    }

    #[test]
    fn last_seen_starts_empty() {
        let l = LastSeen::default();
        assert_eq!(l.get(), None);
        l.touch(42);
        assert_eq!(l.get(), Some(42));
    }
}
