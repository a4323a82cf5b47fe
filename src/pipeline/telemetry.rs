//! 吞吐量统计

use std::time::{Duration, Instant};

use tracing::info;

/// 周期性吞吐量采样
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThroughputSample {
    /// 已处理帧数
    pub processed: u64,
    /// 距开始的时间
    pub elapsed: Duration,
    /// 平均处理速率 (帧/秒, 自开始)
    pub average_fps: f64,
    /// 最近一个周期的处理速率
    pub recent_fps: f64,
    /// 距截止时间的剩余时间
    pub remaining: Duration,
}

impl ThroughputSample {
    pub fn log(&self) {
        info!(
            "📊 已处理 {} 帧, 用时 {:.1}s, 平均 {:.2} FPS, 最近 {:.2} FPS, 剩余 {:.1}s",
            self.processed,
            self.elapsed.as_secs_f64(),
            self.average_fps,
            self.recent_fps,
            self.remaining.as_secs_f64()
        );
    }
}

pub struct ThroughputMeter {
    start: Instant,
    deadline: Instant,
    interval: Duration,
    last_report: Instant,
    last_processed: u64,
}

impl ThroughputMeter {
    pub fn new(start: Instant, deadline: Instant, interval: Duration) -> Self {
        Self {
            start,
            deadline,
            interval,
            last_report: start,
            last_processed: 0,
        }
    }

    /// 到达采样周期时返回采样
    pub fn tick(&mut self, now: Instant, processed: u64) -> Option<ThroughputSample> {
        let since_last = now.saturating_duration_since(self.last_report);
        if since_last < self.interval {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.start);
        let sample = ThroughputSample {
            processed,
            elapsed,
            average_fps: rate(processed, elapsed),
            recent_fps: rate(processed.saturating_sub(self.last_processed), since_last),
            remaining: self.deadline.saturating_duration_since(now),
        };

        self.last_report = now;
        self.last_processed = processed;
        Some(sample)
    }
}

fn rate(frames: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        frames as f64 / secs
    } else {
        0.0
    }
}
