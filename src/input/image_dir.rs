//! 图片序列输入
//!
//! 按文件名排序读取目录中的图片, 可选按固定帧率节流来模拟实时摄像头

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{Frame, FrameSource};
use crate::error::SourceError;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// 图片目录视频源
pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    /// 帧间隔 (None = 不节流)
    pace: Option<Duration>,
    last_emit: Option<Instant>,
}

impl ImageDirSource {
    pub fn open(dir: &Path, pace: Option<Duration>) -> Result<Self, SourceError> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(SourceError::NoImages(dir.to_path_buf()));
        }

        info!("🖼️ 图片目录 {} 共 {} 帧", dir.display(), files.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
            pace,
            last_emit: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn wait_for_slot(&mut self) {
        if let (Some(pace), Some(last)) = (self.pace, self.last_emit) {
            let elapsed = last.elapsed();
            if elapsed < pace {
                thread::sleep(pace - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let index = self.cursor as u64;
        self.cursor += 1;

        self.wait_for_slot();
        let image = image::open(&path)?.to_rgb8();
        debug!("读取 {} ({}x{})", path.display(), image.width(), image.height());

        Ok(Some(Frame::from_rgb_image(index, image)))
    }

    fn describe(&self) -> String {
        format!("图片目录 {}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dwell-imgdir-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_reads_images_in_name_order() {
        let dir = scratch_dir("order");
        RgbImage::from_pixel(4, 2, Rgb([10, 0, 0])).save(dir.join("b.png")).unwrap();
        RgbImage::from_pixel(4, 2, Rgb([20, 0, 0])).save(dir.join("a.png")).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut source = ImageDirSource::open(&dir, None).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!((first.width, first.height), (4, 2));
        assert_eq!(first.data[0], 20);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.data[0], 10);

        assert!(source.next_frame().unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_dir_is_an_error() {
        let dir = scratch_dir("empty");
        assert!(matches!(
            ImageDirSource::open(&dir, None),
            Err(SourceError::NoImages(_))
        ));
        let _ = fs::remove_dir_all(&dir);
    }
}
