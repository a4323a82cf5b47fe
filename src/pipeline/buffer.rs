//! 帧缓冲区 (采集线程 → 处理线程)
//!
//! 单把互斥锁保护的 FIFO 队列:
//! - 硬上限: 队列满时拒绝新帧 (计数后丢弃, 采集线程不阻塞)
//! - 软上限: 处理线程取帧时从最旧端淘汰积压
//! - 追赶:   取最新一帧, 丢弃其余所有积压帧

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::FrameEnvelope;

/// 硬上限默认值
pub const DEFAULT_CAPACITY: usize = 1000;
/// 软上限默认值
pub const DEFAULT_SOFT_CAP: usize = 100;

/// 缓冲区统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    /// 成功入队
    pub pushed: u64,
    /// 队列满被拒绝
    pub rejected: u64,
    /// 超过软上限被淘汰
    pub evicted: u64,
    /// 追赶时跳过
    pub skipped: u64,
}

struct Inner {
    queue: VecDeque<FrameEnvelope>,
    closed: bool,
    stats: BufferStats,
}

pub struct FrameBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    soft_cap: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_SOFT_CAP)
    }
}

impl FrameBuffer {
    pub fn new(capacity: usize, soft_cap: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                closed: false,
                stats: BufferStats::default(),
            }),
            capacity,
            soft_cap: soft_cap.clamp(1, capacity),
        }
    }

    // 持锁期间不会 panic, 中毒时直接取回数据
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 入队; 仅在缓冲区已关闭时返回 false
    ///
    /// 队列满时新帧被丢弃并计入 `rejected`, 仍返回 true
    pub fn push(&self, envelope: FrameEnvelope) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        if inner.queue.len() >= self.capacity {
            inner.stats.rejected += 1;
            return true;
        }
        inner.queue.push_back(envelope);
        inner.stats.pushed += 1;
        true
    }

    /// 取最旧一帧 (先执行软上限淘汰)
    pub fn pop_oldest(&self) -> Option<FrameEnvelope> {
        let mut inner = self.lock();
        self.trim(&mut inner);
        inner.queue.pop_front()
    }

    /// 追赶: 取最新一帧, 丢弃其余积压帧
    pub fn drain_keeping_newest(&self) -> Option<FrameEnvelope> {
        let mut inner = self.lock();
        self.trim(&mut inner);
        let newest = inner.queue.pop_back()?;
        inner.stats.skipped += inner.queue.len() as u64;
        inner.queue.clear();
        Some(newest)
    }

    fn trim(&self, inner: &mut Inner) {
        let excess = inner.queue.len().saturating_sub(self.soft_cap);
        if excess > 0 {
            inner.queue.drain(..excess);
            inner.stats.evicted += excess as u64;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// 关闭后拒绝入队, 已入队的帧仍可取出
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn soft_cap(&self) -> usize {
        self.soft_cap
    }
}
