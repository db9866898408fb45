// Text recognition
//
// `Recognizer` is the capability the frame pipeline consumes. `OnnxRecognizer`
// implements it for a CTC line recognizer (PaddleOCR-style export).

use anyhow::{Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::{session::Session, value::Value};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

use crate::core::config::RecognitionConfig;
use crate::core::errors::{RecognitionError, RecognitionResult};
use crate::services::onnx_builder::build_cpu_session;

/// Extracts text from an image or image region.
///
/// Best-effort: an empty string is a valid answer. Implementations are shared
/// across concurrent requests and must be safe for concurrent use.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> RecognitionResult<String>;
}

/// Narrowest tensor width fed to the model
const MIN_WIDTH: u32 = 8;

/// Index of the CTC blank token
const BLANK_INDEX: usize = 0;

/// Symbol table: index 0 is the blank, then one entry per vocab line, then space
#[derive(Debug, Clone)]
pub struct Vocabulary {
    symbols: Vec<String>,
}

impl Vocabulary {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary file {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut symbols = vec![String::new()];
        for line in content.lines() {
            let symbol = line.trim_end_matches('\r');
            if symbol.is_empty() {
                continue;
            }
            symbols.push(symbol.to_string());
        }
        symbols.push(" ".to_string());

        debug!("Loaded {} vocabulary entries", symbols.len());
        Self { symbols }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.len() <= 1
    }

    /// Join decoded indices into text; unknown indices are skipped
    pub fn render(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .filter_map(|&idx| self.symbols.get(idx))
            .map(String::as_str)
            .collect()
    }
}

/// CTC greedy decode over `[seq_len, vocab_size]` scores.
///
/// Takes the best class per timestep, collapses repeats and drops blanks.
pub fn ctc_greedy_decode(logits: &[f32], seq_len: usize, vocab_size: usize) -> Vec<usize> {
    let mut decoded = Vec::new();
    let mut prev_idx: Option<usize> = None;

    for t in 0..seq_len {
        let offset = t * vocab_size;
        let Some(step) = logits.get(offset..offset + vocab_size) else {
            break;
        };

        let mut best_idx = 0;
        let mut best_val = f32::NEG_INFINITY;
        for (i, &val) in step.iter().enumerate() {
            if val > best_val {
                best_val = val;
                best_idx = i;
            }
        }

        if best_idx != BLANK_INDEX && Some(best_idx) != prev_idx {
            decoded.push(best_idx);
        }

        prev_idx = Some(best_idx);
    }

    decoded
}

/// Tensor width for a `width x height` image scaled to `target_height`
pub fn scaled_width(width: u32, height: u32, target_height: u32, max_width: u32) -> u32 {
    let scale = target_height as f32 / height.max(1) as f32;
    ((width as f32 * scale).round() as u32).clamp(MIN_WIDTH, max_width)
}

/// ONNX CTC recognizer; one session shared behind a mutex
pub struct OnnxRecognizer {
    session: Mutex<Session>,
    input_name: String,
    vocab: Vocabulary,
    input_height: u32,
    max_width: u32,
}

impl OnnxRecognizer {
    pub fn new(config: &RecognitionConfig) -> Result<Self> {
        let session = build_cpu_session(Path::new(&config.model_path), "recognizer", None)?;
        let vocab = Vocabulary::load(Path::new(&config.vocab_path))?;

        if vocab.is_empty() {
            anyhow::bail!("Recognizer vocabulary at {} is empty", config.vocab_path);
        }

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());

        info!(
            "✓ Recognizer ready: vocab_size={}, input '{}' height={}",
            vocab.len(),
            input_name,
            config.input_height
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            vocab,
            input_height: config.input_height,
            max_width: config.max_width,
        })
    }

    /// Resize to the model height keeping aspect ratio, normalize RGB to
    /// [-1, 1], and lay out as `[1, 3, H, W]`.
    fn preprocess_image(&self, image: &DynamicImage) -> RecognitionResult<Array4<f32>> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(RecognitionError::PreprocessingFailed(format!(
                "empty image {}x{}",
                w, h
            )));
        }

        let new_w = scaled_width(w, h, self.input_height, self.max_width);
        let rgb = image
            .resize_exact(new_w, self.input_height, FilterType::Triangle)
            .to_rgb8();

        let mut tensor =
            Array4::<f32>::zeros((1, 3, self.input_height as usize, new_w as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
            }
        }

        Ok(tensor)
    }
}

impl Recognizer for OnnxRecognizer {
    fn recognize(&self, image: &DynamicImage) -> RecognitionResult<String> {
        let tensor = self.preprocess_image(image)?;

        let shape: [usize; 4] = {
            let s = tensor.shape();
            [s[0], s[1], s[2], s[3]]
        };
        let (data, _offset) = tensor.into_raw_vec_and_offset();
        let input = Value::from_array((shape, data))?;

        // Run inference - extract data while session is held, then release
        let (dims, logits) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![self.input_name.as_str() => input])?;

            let first_key = outputs
                .keys()
                .next()
                .ok_or_else(|| RecognitionError::UnexpectedOutput(vec![]))?;
            let (shape, data) = outputs[first_key].try_extract_tensor::<f32>()?;

            let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
            (dims, data.to_vec())
        };

        let (seq_len, vocab_size) = match dims.as_slice() {
            // [S, 1, V]
            [s, 1, v] => (*s, *v),
            // [1, S, V]
            [1, s, v] => (*s, *v),
            // [S, V]
            [s, v] => (*s, *v),
            _ => return Err(RecognitionError::UnexpectedOutput(dims)),
        };

        let indices = ctc_greedy_decode(&logits, seq_len, vocab_size);
        let text = self.vocab.render(&indices);

        debug!("OCR result: '{}'", text);
        Ok(text)
    }
}
