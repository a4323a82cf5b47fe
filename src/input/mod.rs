/// 视频输入系统 (Video Input System)
///
/// 采集线程通过 `FrameSource` 拉取原始帧:
/// - ImageDirSource: 图片序列 (目录), 可按帧率模拟摄像头
/// - FfmpegSource:   摄像头 / RTSP / 视频文件 (需要 `ffmpeg` 功能)
pub mod image_dir;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use image::RgbImage;

use crate::error::{ConfigError, SourceError};

pub use image_dir::ImageDirSource;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{list_video_devices, FfmpegSource};

// ========== 帧与视频源接口 ==========

/// 原始帧 (RGB24, 行优先紧密排列)
#[derive(Clone)]
pub struct Frame {
    /// 视频源内的帧序号 (从0开始)
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    pub fn new(index: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            index,
            width,
            height,
            data,
        }
    }

    pub fn from_rgb_image(index: u64, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(index, width, height, image.into_raw())
    }

    /// 拷贝为 RgbImage (尺寸与数据长度不符时返回 None)
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// 视频源: 阻塞读取下一帧
pub trait FrameSource {
    /// `Ok(None)` 表示流结束
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// 用于日志的描述
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// 解码线程 → 读取端的流结束状态
///
/// 解码线程出错时记录原因, 读取端在通道断开后据此区分正常结束与读取失败
#[derive(Clone, Debug, Default)]
pub struct StreamEnd(Arc<Mutex<StreamEndState>>);

#[derive(Debug, Default)]
struct StreamEndState {
    failure: Option<String>,
    reader_closed: bool,
}

impl StreamEnd {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StreamEndState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 记录解码失败; 读取端已释放时返回 false (属于正常收尾)
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        let mut state = self.lock();
        if state.reader_closed {
            return false;
        }
        state.failure.get_or_insert_with(|| reason.into());
        true
    }

    /// 读取端释放
    pub fn close_reader(&self) {
        self.lock().reader_closed = true;
    }

    /// 通道断开后调用: 有失败记录 → `Err`, 否则正常结束
    pub fn finish(&self) -> Result<Option<Frame>, SourceError> {
        match self.lock().failure.clone() {
            Some(reason) => Err(SourceError::Read(reason)),
            None => Ok(None),
        }
    }
}

// ========== 输入源描述 ==========

/// 输入源
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// 本地摄像头 (设备序号)
    Camera(usize),
    /// RTSP 流地址
    Rtsp(String),
    /// IP 摄像头 (地址 + 账号)
    IpCamera {
        address: String,
        username: String,
        password: String,
    },
    /// 视频文件
    VideoFile(PathBuf),
    /// 图片目录
    ImageDir(PathBuf),
}

impl InputSource {
    /// RTSP 地址 (IP 摄像头按 `rtsp://用户名:密码@地址/1` 拼接)
    pub fn rtsp_url(&self) -> Option<String> {
        match self {
            InputSource::Rtsp(url) => Some(url.clone()),
            InputSource::IpCamera {
                address,
                username,
                password,
            } => Some(format!("rtsp://{}:{}@{}/1", username, password, address)),
            _ => None,
        }
    }

    /// 打开视频源
    pub fn open(&self, options: &SourceOptions) -> Result<Box<dyn FrameSource + Send>, SourceError> {
        match self {
            InputSource::ImageDir(dir) => {
                let pace = options
                    .fps
                    .filter(|fps| fps.is_finite() && *fps > 0.0)
                    .map(|fps| Duration::from_secs_f64(1.0 / fps));
                Ok(Box::new(ImageDirSource::open(dir, pace)?))
            }
            #[cfg(feature = "ffmpeg")]
            _ => Ok(Box::new(FfmpegSource::open(self)?)),
            #[cfg(not(feature = "ffmpeg"))]
            _ => Err(SourceError::FeatureDisabled(self.to_string())),
        }
    }
}

/// 打开视频源时的可选参数
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// 图片序列的模拟帧率 (None = 尽快读取)
    pub fps: Option<f64>,
}

impl FromStr for InputSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::EmptySource);
        }

        if let Some(index) = s.strip_prefix("camera:") {
            return index
                .trim()
                .parse()
                .map(InputSource::Camera)
                .map_err(|_| ConfigError::InvalidSource(s.to_string()));
        }

        if s.starts_with("rtsp://") || s.starts_with("rtsps://") {
            return Ok(InputSource::Rtsp(s.to_string()));
        }

        if let Some(rest) = s.strip_prefix("ip:") {
            // 密码中允许出现 ':'
            let mut parts = rest.splitn(3, ':');
            return match (parts.next(), parts.next(), parts.next()) {
                (Some(address), Some(username), Some(password)) if !address.is_empty() => {
                    Ok(InputSource::IpCamera {
                        address: address.to_string(),
                        username: username.to_string(),
                        password: password.to_string(),
                    })
                }
                _ => Err(ConfigError::InvalidSource(s.to_string())),
            };
        }

        let path = PathBuf::from(s);
        if path.is_dir() {
            Ok(InputSource::ImageDir(path))
        } else {
            Ok(InputSource::VideoFile(path))
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Camera(index) => write!(f, "摄像头 #{}", index),
            InputSource::Rtsp(url) => write!(f, "RTSP {}", url),
            // 不打印密码
            InputSource::IpCamera {
                address, username, ..
            } => write!(f, "IP摄像头 {}@{}", username, address),
            InputSource::VideoFile(path) => write!(f, "视频文件 {}", path.display()),
            InputSource::ImageDir(path) => write!(f, "图片目录 {}", path.display()),
        }
    }
}
