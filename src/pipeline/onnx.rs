//! ONNX-backed extractor: SCRFD for detection, ArcFace (w600k_r50) for
//! embeddings. Models are fetched on first start unless auto-download is
//! disabled.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::pipeline::extractor::{DetectedFace, EmbeddingExtractor, ExtractError, FaceBbox};

const SCRFD_MODEL_URL_HF: &str = "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx";
const SCRFD_MODEL_URL_GH: &str = "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx";
const ARCFACE_MODEL_URL: &str = "https://huggingface.co/maze/faceX/resolve/e010b5098c3685fd00b22dd2aec6f37320e3d850/w600k_r50.onnx";

const DETECT_SIZE: u32 = 640;
const EMBED_SIZE: u32 = 112;

pub struct OnnxExtractor {
    pub models_dir: PathBuf,
    confidence: f32,
    nms_iou: f32,
    detect_session: Option<Mutex<Session>>,
    embed_session: Option<Mutex<Session>>,
}

impl OnnxExtractor {
    pub fn new(models_dir: PathBuf) -> Self {
        let confidence = std::env::var("OMOIDE_FACE_CONFIDENCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.20);
        let nms_iou = std::env::var("OMOIDE_FACE_NMS_IOU")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.4);
        Self { models_dir, confidence, nms_iou, detect_session: None, embed_session: None }
    }

    pub fn loaded(&self) -> bool {
        self.detect_session.is_some() && self.embed_session.is_some()
    }

    pub async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir).context("cannot create models directory")?;

        let auto_dl = std::env::var("OMOIDE_FACE_AUTO_DOWNLOAD")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE"))
            .unwrap_or(true);
        if auto_dl {
            if let Err(e) = self.download_models().await {
                warn!(error = %e, "face model auto-download failed");
            }
        }

        if let Err(e) = self.load_models() {
            warn!(error = %e, "face models not loaded; extraction will fail until they are present");
        }
        Ok(())
    }

    async fn download_models(&self) -> Result<()> {
        let scrfd_path = self.models_dir.join("scrfd_500m_bnkps.onnx");
        let arcface_path = self.models_dir.join("w600k_r50.onnx");
        let client = reqwest::Client::new();

        if !scrfd_path.exists() {
            info!("downloading SCRFD detection model");
            if let Err(e) = download_file(&client, SCRFD_MODEL_URL_HF, &scrfd_path).await {
                warn!(error = %e, "primary SCRFD mirror failed, trying fallback");
                download_file(&client, SCRFD_MODEL_URL_GH, &scrfd_path).await?;
            }
        }
        if !arcface_path.exists() {
            info!("downloading ArcFace recognition model");
            download_file(&client, ARCFACE_MODEL_URL, &arcface_path).await?;
        }
        Ok(())
    }

    fn load_models(&mut self) -> Result<()> {
        let scrfd_path = self.models_dir.join("scrfd_500m_bnkps.onnx");
        let arcface_path = self.models_dir.join("w600k_r50.onnx");
        if !scrfd_path.exists() || !arcface_path.exists() {
            anyhow::bail!(
                "face models missing; expected SCRFD at {:?} and ArcFace at {:?}",
                scrfd_path,
                arcface_path
            );
        }

        let detect = Session::builder()?
            .commit_from_file(&scrfd_path)
            .context("cannot create SCRFD session")?;
        let embed = Session::builder()?
            .commit_from_file(&arcface_path)
            .context("cannot create ArcFace session")?;
        self.detect_session = Some(Mutex::new(detect));
        self.embed_session = Some(Mutex::new(embed));
        info!(scrfd = ?scrfd_path, arcface = ?arcface_path, "face models loaded");
        Ok(())
    }

    /// Letterbox to 640x640 NCHW BGR, normalized to [-1, 1]. Returns the
    /// scale needed to map detections back to original coordinates.
    fn preprocess_detect(&self, image: &DynamicImage) -> (Vec<f32>, f32) {
        let (ow, oh) = (image.width() as f32, image.height() as f32);
        let scale = DETECT_SIZE as f32 / ow.max(oh);
        let nw = (ow * scale) as u32;
        let nh = (oh * scale) as u32;
        let resized = image.resize_exact(nw.max(1), nh.max(1), image::imageops::FilterType::Triangle);
        let mut padded = DynamicImage::new_rgb8(DETECT_SIZE, DETECT_SIZE);
        image::imageops::overlay(&mut padded, &resized, 0, 0);
        let rgb = padded.to_rgb8();
        let mut data = Vec::with_capacity(3 * (DETECT_SIZE * DETECT_SIZE) as usize);
        for c in 0..3 {
            for y in 0..DETECT_SIZE {
                for x in 0..DETECT_SIZE {
                    let p = rgb.get_pixel(x, y);
                    // InsightFace models expect BGR
                    let v = match c {
                        0 => p[2],
                        1 => p[1],
                        _ => p[0],
                    } as f32;
                    data.push((v - 127.5) / 128.0);
                }
            }
        }
        (data, scale)
    }

    fn preprocess_embed(&self, face_crop: &DynamicImage) -> Vec<f32> {
        let resized = face_crop.resize_exact(EMBED_SIZE, EMBED_SIZE, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();
        let mut data = Vec::with_capacity(3 * (EMBED_SIZE * EMBED_SIZE) as usize);
        for c in 0..3 {
            for y in 0..EMBED_SIZE {
                for x in 0..EMBED_SIZE {
                    let p = rgb.get_pixel(x, y);
                    let v = match c {
                        0 => p[0],
                        1 => p[1],
                        _ => p[2],
                    } as f32;
                    data.push((v - 127.5) / 128.0);
                }
            }
        }
        data
    }

    pub fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBbox>> {
        let mut session = self
            .detect_session
            .as_ref()
            .context("detection model not loaded")?
            .lock();
        let (data, scale) = self.preprocess_detect(image);
        let (img_w, img_h) = (image.width() as f32, image.height() as f32);

        let input_name = session.inputs[0].name.clone();
        let shape = vec![1i64, 3, DETECT_SIZE as i64, DETECT_SIZE as i64];
        let input = Value::from_array((shape, data)).context("cannot build SCRFD input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("SCRFD inference failed")?;

        // SCRFD is anchor-free per stride: each grid cell carries a score and
        // (l, t, r, b) distances in stride units.
        let mut raw: Vec<FaceBbox> = Vec::new();
        for stride in [8usize, 16, 32] {
            let (Some(sv), Some(bv)) = (
                outputs.get(&format!("score_{stride}")),
                outputs.get(&format!("bbox_{stride}")),
            ) else {
                continue;
            };
            let (Ok((_, scores)), Ok((_, boxes))) =
                (sv.try_extract_tensor::<f32>(), bv.try_extract_tensor::<f32>())
            else {
                continue;
            };

            let side = DETECT_SIZE as usize / stride;
            let grid = side * side;
            if grid == 0 || scores.len() % grid != 0 {
                warn!(stride, scores = scores.len(), "unexpected SCRFD output shape");
                continue;
            }
            let anchors = scores.len() / grid;
            let stride_f = stride as f32;

            for i in 0..grid {
                let cy = (i / side) as f32 * stride_f;
                let cx = (i % side) as f32 * stride_f;
                for a in 0..anchors {
                    let idx = i * anchors + a;
                    let conf = scores[idx];
                    if conf < self.confidence {
                        continue;
                    }
                    let b = idx * 4;
                    if b + 3 >= boxes.len() {
                        continue;
                    }
                    let x1 = ((cx - boxes[b] * stride_f) / scale).clamp(0.0, img_w);
                    let y1 = ((cy - boxes[b + 1] * stride_f) / scale).clamp(0.0, img_h);
                    let x2 = ((cx + boxes[b + 2] * stride_f) / scale).clamp(0.0, img_w);
                    let y2 = ((cy + boxes[b + 3] * stride_f) / scale).clamp(0.0, img_h);
                    if x2 - x1 < 8.0 || y2 - y1 < 8.0 {
                        continue;
                    }
                    raw.push(FaceBbox { x1, y1, x2, y2, confidence: conf });
                }
            }
        }

        let keep = nms(&raw, self.nms_iou);
        Ok(keep.into_iter().map(|i| raw[i].clone()).collect())
    }

    pub fn embed_face(&self, face_crop: &DynamicImage) -> Result<Vec<f32>> {
        let mut session = self
            .embed_session
            .as_ref()
            .context("recognition model not loaded")?
            .lock();
        let data = self.preprocess_embed(face_crop);

        let input_name = session.inputs[0].name.clone();
        let shape = vec![1i64, 3, EMBED_SIZE as i64, EMBED_SIZE as i64];
        let input = Value::from_array((shape, data)).context("cannot build ArcFace input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("ArcFace inference failed")?;

        let key = outputs
            .keys()
            .find(|k| matches!(*k, "output" | "embedding" | "fc1" | "features"))
            .or_else(|| outputs.keys().next())
            .context("ArcFace produced no outputs")?
            .to_string();
        let val = outputs.get(&key).context("ArcFace output missing")?;
        let (_, slice) = val
            .try_extract_tensor::<f32>()
            .context("ArcFace output is not an f32 tensor")?;
        let mut v = slice.to_vec();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= 0.0 {
            anyhow::bail!("ArcFace embedding has zero norm");
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<DetectedFace>, ExtractError> {
        if !self.loaded() {
            return Err(ExtractError::ModelUnavailable);
        }
        let img = image::load_from_memory(bytes).map_err(|e| ExtractError::Decode(e.to_string()))?;
        let bboxes = self
            .detect_faces(&img)
            .map_err(|e| ExtractError::Inference(e.to_string()))?;

        let mut out = Vec::with_capacity(bboxes.len());
        for bbox in bboxes {
            let x1 = bbox.x1.max(0.0) as u32;
            let y1 = bbox.y1.max(0.0) as u32;
            let x2 = (bbox.x2.min(img.width() as f32) as u32).min(img.width());
            let y2 = (bbox.y2.min(img.height() as f32) as u32).min(img.height());
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            let crop = img.crop_imm(x1, y1, x2 - x1, y2 - y1);
            match self.embed_face(&crop) {
                Ok(embedding) => out.push(DetectedFace { bbox, embedding }),
                Err(e) => warn!(error = %e, "face embedding failed, skipping face"),
            }
        }
        Ok(out)
    }
}

async fn download_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("cannot fetch {url}"))?;
    if !response.status().is_success() {
        anyhow::bail!("model download failed: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("cannot read model body")?;
    if bytes.len() < 1024 {
        anyhow::bail!("downloaded file is suspiciously small ({} bytes)", bytes.len());
    }
    std::fs::write(path, &bytes).with_context(|| format!("cannot write {path:?}"))?;
    info!(?path, size = bytes.len(), "downloaded model");
    Ok(())
}

/// Greedy non-maximum suppression; returns indexes to keep, best first.
fn nms(boxes: &[FaceBbox], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for &i in &order {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order {
            if j != i && !suppressed[j] && iou(&boxes[i], &boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn iou(a: &FaceBbox, b: &FaceBbox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let iw = (ix2 - ix1).max(0.0);
    let ih = (iy2 - iy1).max(0.0);
    let inter = iw * ih;
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBbox {
        FaceBbox { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn nms_suppresses_overlapping_boxes() {
        let boxes = vec![
            bx(0.0, 0.0, 100.0, 100.0, 0.9),
            bx(5.0, 5.0, 105.0, 105.0, 0.8),
            bx(200.0, 200.0, 300.0, 300.0, 0.7),
        ];
        let keep = nms(&boxes, 0.4);
        assert_eq!(keep, vec![0, 2]);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bx(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bx(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }
}
