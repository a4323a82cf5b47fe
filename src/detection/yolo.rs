// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 ONNX 检测器
// 包含: 模型加载、预处理 (等比缩放)、推理、后处理 (阈值 + 类别映射 + NMS)

use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use ndarray::{s, ArrayView2, Axis};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info};

use super::labels::coco_label;
use super::{non_max_suppression, BBox, Detection, Detector};
use crate::input::Frame;

/// 推理分辨率
pub const INF_SIZE: u32 = 640;
/// 置信度阈值 (严格大于)
pub const CONF_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.45;
const CXYWH_OFFSET: usize = 4;
/// 填充色 (与 Ultralytics 一致)
const PAD_VALUE: f32 = 144.0 / 255.0;

/// YOLOv8 检测器
pub struct YoloDetector {
    session: Session,
    inf_size: u32,
    resizer: fr::Resizer,
}

impl YoloDetector {
    /// 加载 ONNX 模型
    pub fn load(model_path: &Path) -> Result<Self> {
        info!("📦 加载检测模型: {}", model_path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .with_context(|| format!("无法加载模型 {}", model_path.display()))?;

        info!("✅ 检测模型就绪 (输入 {}x{})", INF_SIZE, INF_SIZE);
        Ok(Self {
            session,
            inf_size: INF_SIZE,
            resizer: fr::Resizer::new(),
        })
    }

    /// 等比缩放到左上角, 其余填充, 返回 (CHW 张量, 缩放比)
    fn preprocess(&mut self, frame: &Frame) -> Result<(Vec<f32>, f32)> {
        if frame.width == 0 || frame.height == 0 {
            bail!("空帧 {}x{}", frame.width, frame.height);
        }

        let size = self.inf_size as usize;
        let ratio = (self.inf_size as f32 / frame.width as f32)
            .min(self.inf_size as f32 / frame.height as f32);
        let w_new = ((frame.width as f32 * ratio).round() as u32).clamp(1, self.inf_size);
        let h_new = ((frame.height as f32 * ratio).round() as u32).clamp(1, self.inf_size);

        let src = fr::images::Image::from_vec_u8(
            frame.width,
            frame.height,
            frame.data.clone(),
            fr::PixelType::U8x3,
        )?;
        let mut dst = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x3);
        self.resizer.resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
        )?;

        // HWC → CHW, 归一化到 [0, 1]
        let mut input = vec![PAD_VALUE; 3 * size * size];
        let pixels = dst.buffer();
        let (w_new, h_new) = (w_new as usize, h_new as usize);
        for y in 0..h_new {
            for x in 0..w_new {
                let src_idx = (y * w_new + x) * 3;
                for c in 0..3 {
                    input[c * size * size + y * size + x] = pixels[src_idx + c] as f32 / 255.0;
                }
            }
        }

        Ok((input, ratio))
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let t_pre = Instant::now();
        let (input, ratio) = self.preprocess(frame)?;
        let pre_ms = t_pre.elapsed().as_secs_f64() * 1000.0;

        let t_run = Instant::now();
        let size = self.inf_size as usize;
        let shape = [1, 3, size, size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;
        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let (out_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
        let run_ms = t_run.elapsed().as_secs_f64() * 1000.0;

        let t_post = Instant::now();
        let detections = postprocess(data, &dims, ratio, frame.width as f32, frame.height as f32)?;
        let post_ms = t_post.elapsed().as_secs_f64() * 1000.0;

        debug!(
            "帧 #{}: {} 个目标 (预处理 {:.1}ms, 推理 {:.1}ms, 后处理 {:.1}ms)",
            frame.index,
            detections.len(),
            pre_ms,
            run_ms,
            post_ms
        );
        Ok(detections)
    }

    fn name(&self) -> &str {
        "yolov8"
    }
}

/// 解析 [1, 4 + nc, anchors] 输出
fn postprocess(
    output: &[f32],
    dims: &[usize],
    ratio: f32,
    width_original: f32,
    height_original: f32,
) -> Result<Vec<Detection>> {
    let (channels, anchors) = match dims {
        [1, c, a] if *c > CXYWH_OFFSET => (*c, *a),
        _ => bail!("意外的模型输出形状 {:?}", dims),
    };
    if output.len() < channels * anchors {
        bail!("模型输出长度不足: {} < {}", output.len(), channels * anchors);
    }

    let preds = ArrayView2::from_shape((channels, anchors), &output[..channels * anchors])?;
    let mut detections = Vec::new();

    // 每列一个候选: [cx, cy, w, h, class0, class1, ...]
    for pred in preds.axis_iter(Axis(1)) {
        let bbox = pred.slice(s![0..CXYWH_OFFSET]);
        let (class_id, confidence) = pred
            .slice(s![CXYWH_OFFSET..])
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, x| if x.1 > best.1 { x } else { best });

        if confidence <= CONF_THRESHOLD {
            continue;
        }
        let Some(label) = coco_label(class_id as u32) else {
            continue;
        };

        let cx = bbox[0] / ratio;
        let cy = bbox[1] / ratio;
        let w = bbox[2] / ratio;
        let h = bbox[3] / ratio;
        let bbox = BBox::new(
            (cx - w / 2.0).clamp(0.0, width_original),
            (cy - h / 2.0).clamp(0.0, height_original),
            (cx + w / 2.0).clamp(0.0, width_original),
            (cy + h / 2.0).clamp(0.0, height_original),
        );
        detections.push(Detection::new(bbox, label).with_confidence(confidence));
    }

    non_max_suppression(&mut detections, NMS_IOU);
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造 [1, 84, anchors] 输出
    fn fake_output(anchors: usize, preds: &[(usize, [f32; 4], usize, f32)]) -> Vec<f32> {
        let mut out = vec![0.0; 84 * anchors];
        for &(i, [cx, cy, w, h], class, conf) in preds {
            out[i] = cx;
            out[anchors + i] = cy;
            out[2 * anchors + i] = w;
            out[3 * anchors + i] = h;
            out[(4 + class) * anchors + i] = conf;
        }
        out
    }

    #[test]
    fn test_postprocess_thresholds_and_scales() {
        let out = fake_output(
            4,
            &[
                (0, [100.0, 100.0, 40.0, 40.0], 2, 0.9),  // car
                (1, [300.0, 300.0, 20.0, 20.0], 0, 0.5),  // 未超过阈值
                (2, [200.0, 200.0, 20.0, 20.0], 4, 0.95), // airplane 不关注
                (3, [101.0, 101.0, 40.0, 40.0], 2, 0.8),  // 与 #0 重叠, NMS 抑制
            ],
        );
        let dets = postprocess(&out, &[1, 84, 4], 0.5, 1280.0, 720.0).unwrap();

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "car");
        assert_eq!(dets[0].bbox, BBox::new(160.0, 160.0, 240.0, 240.0));
    }

    #[test]
    fn test_postprocess_rejects_bad_shape() {
        assert!(postprocess(&[0.0; 8], &[1, 2, 4], 1.0, 10.0, 10.0).is_err());
    }
}
