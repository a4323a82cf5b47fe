//! 采集线程
//! 职责: FrameSource → 编号 + 时间戳 → FrameBuffer

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::buffer::FrameBuffer;
use super::{FrameEnvelope, StopSignal};
use crate::input::FrameSource;

/// 采集结束原因
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureEnd {
    /// 收到停止信号
    Stopped,
    /// 视频源读完
    Exhausted,
    /// 读取失败 (视为流结束)
    Failed(String),
    /// 缓冲区已关闭
    BufferClosed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureReport {
    /// 读取的帧数 (= 最后一帧的序号)
    pub frames_read: u64,
    pub end: CaptureEnd,
}

impl Default for CaptureReport {
    fn default() -> Self {
        Self {
            frames_read: 0,
            end: CaptureEnd::Stopped,
        }
    }
}

pub struct CaptureLoop {
    source: Box<dyn FrameSource + Send>,
    buffer: Arc<FrameBuffer>,
    stop: StopSignal,
}

impl CaptureLoop {
    pub fn new(source: Box<dyn FrameSource + Send>, buffer: Arc<FrameBuffer>, stop: StopSignal) -> Self {
        Self {
            source,
            buffer,
            stop,
        }
    }

    /// 循环读取直到停止/流结束/缓冲区关闭, 退出时释放视频源并关闭缓冲区
    pub fn run(self) -> CaptureReport {
        let Self {
            mut source,
            buffer,
            stop,
        } = self;
        let name = source.describe();
        info!("🎬 采集线程启动: {}", name);

        let mut sequence = 0u64;
        let end = loop {
            if stop.is_triggered() {
                break CaptureEnd::Stopped;
            }

            match source.next_frame() {
                Ok(Some(frame)) => {
                    sequence += 1;
                    let envelope = FrameEnvelope {
                        sequence,
                        captured_at: Instant::now(),
                        frame,
                    };
                    if !buffer.push(envelope) {
                        // 收尾时先触发停止再关闭缓冲区
                        break if stop.is_triggered() {
                            CaptureEnd::Stopped
                        } else {
                            CaptureEnd::BufferClosed
                        };
                    }
                }
                Ok(None) => break CaptureEnd::Exhausted,
                Err(e) => {
                    warn!("⚠️ 读取帧失败, 视为流结束: {}", e);
                    break CaptureEnd::Failed(e.to_string());
                }
            }
        };

        drop(source);
        buffer.close();
        info!("🎬 采集线程退出: {} ({} 帧, {:?})", name, sequence, end);

        CaptureReport {
            frames_read: sequence,
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::input::Frame;

    struct CountingSource {
        remaining: u64,
        fail_at_end: bool,
    }

    impl FrameSource for CountingSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.remaining == 0 {
                return if self.fail_at_end {
                    Err(SourceError::Read("device unplugged".into()))
                } else {
                    Ok(None)
                };
            }
            self.remaining -= 1;
            Ok(Some(Frame::new(0, 1, 1, vec![0; 3])))
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    fn run_with(remaining: u64, fail_at_end: bool) -> (CaptureReport, Arc<FrameBuffer>) {
        let buffer = Arc::new(FrameBuffer::default());
        let capture = CaptureLoop::new(
            Box::new(CountingSource {
                remaining,
                fail_at_end,
            }),
            buffer.clone(),
            StopSignal::new(),
        );
        (capture.run(), buffer)
    }

    #[test]
    fn test_sequences_start_at_one_and_buffer_closes() {
        let (report, buffer) = run_with(3, false);
        assert_eq!(report.frames_read, 3);
        assert_eq!(report.end, CaptureEnd::Exhausted);
        assert!(buffer.is_closed());

        let seqs: Vec<u64> = std::iter::from_fn(|| buffer.pop_oldest())
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_read_error_ends_capture() {
        let (report, buffer) = run_with(2, true);
        assert_eq!(report.frames_read, 2);
        assert!(matches!(report.end, CaptureEnd::Failed(_)));
        assert!(buffer.is_closed());
    }

    #[test]
    fn test_stop_signal_before_first_read() {
        let buffer = Arc::new(FrameBuffer::default());
        let stop = StopSignal::new();
        stop.trigger();
        let report = CaptureLoop::new(
            Box::new(CountingSource {
                remaining: 5,
                fail_at_end: false,
            }),
            buffer.clone(),
            stop,
        )
        .run();
        assert_eq!(report.frames_read, 0);
        assert_eq!(report.end, CaptureEnd::Stopped);
        assert!(buffer.is_empty());
    }
}
