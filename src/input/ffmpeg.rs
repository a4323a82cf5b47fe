//! FFmpeg 输入 (摄像头 / RTSP / 视频文件)
//!
//! 解码在独立线程中运行, FrameFilter 把 RGB24 帧经有界通道交给 `next_frame`:
//! ```text
//! FFmpeg 解码线程 → ForwardFilter → crossbeam(8) → FfmpegSource::next_frame
//! ```

use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::{Frame, FrameSource, InputSource, StreamEnd};
use crate::error::SourceError;

const CHANNEL_DEPTH: usize = 8;

/// 解码过滤器: AVFrame (rgb24) → Frame
struct ForwardFilter {
    tx: Sender<Frame>,
    index: u64,
    dropped: u64,
}

impl FrameFilter for ForwardFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: ez_ffmpeg::Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<ez_ffmpeg::Frame>, String> {
        let Some(decoded) = (unsafe { copy_rgb24(&frame, self.index) }) else {
            self.dropped += 1;
            if self.dropped <= 10 {
                warn!("⚠️ 丢弃帧 #{}: 空帧/损坏帧", self.index);
            }
            return Ok(None);
        };
        self.index += 1;

        // 接收端已释放 → 停止解码
        self.tx
            .send(decoded)
            .map_err(|_| "frame receiver dropped".to_string())?;
        Ok(None)
    }
}

/// 按 linesize 逐行拷贝 rgb24 平面
///
/// # Safety
/// `frame` 必须是 FFmpeg 输出的有效视频帧, 像素格式为 rgb24
unsafe fn copy_rgb24(frame: &ez_ffmpeg::Frame, index: u64) -> Option<Frame> {
    if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
        return None;
    }

    let av = frame.as_ptr();
    let w = (*av).width as usize;
    let h = (*av).height as usize;
    let stride = (*av).linesize[0] as usize;
    let plane = (*av).data[0];

    if w == 0 || h == 0 || plane.is_null() || stride < w * 3 {
        return None;
    }

    let row_bytes = w * 3;
    let mut data = Vec::with_capacity(row_bytes * h);
    for row in 0..h {
        let src = std::slice::from_raw_parts(plane.add(row * stride), row_bytes);
        data.extend_from_slice(src);
    }

    Some(Frame::new(index, w as u32, h as u32, data))
}

/// FFmpeg 视频源
pub struct FfmpegSource {
    name: String,
    rx: Receiver<Frame>,
    end: StreamEnd,
    _decoder: JoinHandle<()>,
}

impl FfmpegSource {
    /// 打开视频源并等待解码器启动
    pub fn open(source: &InputSource) -> Result<Self, SourceError> {
        let name = source.to_string();
        let input = build_input(source)?;

        let (tx, rx) = bounded::<Frame>(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let end = StreamEnd::new();
        let decoder_end = end.clone();

        info!("🔗 打开视频源: {}", name);
        let decoder = thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || decode(input, tx, ready_tx, decoder_end))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                name,
                rx,
                end,
                _decoder: decoder,
            }),
            Ok(Err(reason)) => Err(SourceError::Open {
                source_name: name,
                reason,
            }),
            Err(_) => Err(SourceError::Open {
                source_name: name,
                reason: "decoder thread exited".into(),
            }),
        }
    }
}

fn decode(input: Input, tx: Sender<Frame>, ready: Sender<Result<(), String>>, end: StreamEnd) {
    let filter = ForwardFilter {
        tx,
        index: 0,
        dropped: 0,
    };
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("forward", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let ctx = match FfmpegContext::builder()
        .input(input)
        .filter_desc("format=rgb24")
        .output(out)
        .build()
    {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = ready.send(Err(format!("构建失败: {}", e)));
            return;
        }
    };

    let sch = match ctx.start() {
        Ok(sch) => sch,
        Err(e) => {
            let _ = ready.send(Err(format!("启动失败: {}", e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // 接收端释放时过滤器返回错误, 调度器随之结束
    if let Err(e) = sch.wait() {
        if end.fail(e.to_string()) {
            error!("❌ 解码失败: {}", e);
        } else {
            debug!("读取端已释放: {}", e);
        }
    }
    debug!("解码循环结束");
    info!("📹 解码线程退出");
}

fn build_input(source: &InputSource) -> Result<Input, SourceError> {
    match source {
        InputSource::Camera(index) => {
            let url = camera_url(*index)?;
            info!("🔍 使用格式: {}, 输入: {}", CAMERA_FORMAT, url);
            Ok(Input::new(url).set_format(CAMERA_FORMAT))
        }
        InputSource::Rtsp(_) | InputSource::IpCamera { .. } => {
            let url = source.rtsp_url().unwrap_or_default();
            Ok(Input::new(url).set_input_opts(
                [
                    ("rtsp_transport", "tcp"),
                    ("buffer_size", "67108864"),
                    ("rtsp_flags", "prefer_tcp"),
                ]
                .into(),
            ))
        }
        InputSource::VideoFile(path) => Ok(Input::new(path.to_string_lossy().into_owned())),
        InputSource::ImageDir(path) => Err(SourceError::Open {
            source_name: path.display().to_string(),
            reason: "image directories are read without ffmpeg".into(),
        }),
    }
}

#[cfg(target_os = "windows")]
const CAMERA_FORMAT: &str = "dshow";
#[cfg(target_os = "macos")]
const CAMERA_FORMAT: &str = "avfoundation";
#[cfg(target_os = "linux")]
const CAMERA_FORMAT: &str = "v4l2";
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
const CAMERA_FORMAT: &str = "video4linux2";

/// 摄像头地址 (Windows 需要设备名)
fn camera_url(index: usize) -> Result<String, SourceError> {
    #[cfg(target_os = "windows")]
    {
        let devices = list_video_devices();
        match devices.into_iter().find(|(i, _)| *i == index) {
            Some((_, name)) => Ok(format!("video={}", name)),
            None => Err(SourceError::Open {
                source_name: format!("camera:{}", index),
                reason: "no such device".into(),
            }),
        }
    }
    #[cfg(target_os = "linux")]
    {
        Ok(format!("/dev/video{}", index))
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        Ok(format!("{}", index))
    }
}

/// 获取可用的摄像头设备列表
pub fn list_video_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            error!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        // 发送端释放 = 解码结束, 是否出错由 StreamEnd 决定
        match self.rx.recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(_) => self.end.finish(),
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.end.close_reader();
    }
}
