//! 媒体收发计数

use std::sync::atomic::{AtomicU64, Ordering};

/// 媒体统计，可在发送路径和驱动任务之间共享
#[derive(Debug, Default)]
pub struct MediaStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_dropped: AtomicU64,
    send_errors: AtomicU64,
    packets_received: AtomicU64,
}

/// 某一时刻的统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaStatsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub frames_dropped: u64,
    pub send_errors: u64,
    pub packets_received: u64,
}

impl MediaStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MediaStatsSnapshot {
        MediaStatsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_records() {
        let stats = MediaStats::new();
        stats.record_sent(1112);
        stats.record_sent(40);
        stats.record_dropped_frame();
        stats.record_send_error();
        stats.record_received();

        assert_eq!(
            stats.snapshot(),
            MediaStatsSnapshot {
                packets_sent: 2,
                bytes_sent: 1152,
                frames_dropped: 1,
                send_errors: 1,
                packets_received: 1,
            }
        );
    }
}
