use crate::core::errors::ConfigError;
use std::env;
use std::str::FromStr;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    pub max_upload_bytes: usize,
}

/// Detector configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub model_path: String,
    /// Deliberately permissive; precision comes from the text filter
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub target_size: u32,
    pub max_detections: usize,
    /// Number of ONNX sessions (concurrent detector inferences)
    pub pool_size: usize,
}

/// Recognizer configuration
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    pub model_path: String,
    pub vocab_path: String,
    pub input_height: u32,
    pub max_width: u32,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub recognition: RecognitionConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env();
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Self {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| parse_level(&s))
            .unwrap_or(Level::INFO);

        Self {
            server: ServerConfig {
                port: env_or("SERVER_PORT", 8000),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
                max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 20 * 1024 * 1024),
            },
            detection: DetectionConfig {
                model_path: env::var("DETECTOR_MODEL_PATH")
                    .unwrap_or_else(|_| "models/detector.onnx".to_string()),
                confidence_threshold: env_or("CONFIDENCE_THRESHOLD", 0.1),
                iou_threshold: env_or("IOU_THRESHOLD", 0.7),
                target_size: env_or("TARGET_SIZE", 640),
                max_detections: env_or("MAX_DETECTIONS", 300),
                pool_size: env::var("DETECTOR_POOL_SIZE")
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or_else(|| std::cmp::min(num_cpus::get(), 4).max(1)),
            },
            recognition: RecognitionConfig {
                model_path: env::var("RECOGNIZER_MODEL_PATH")
                    .unwrap_or_else(|_| "models/recognizer.onnx".to_string()),
                vocab_path: env::var("RECOGNIZER_VOCAB_PATH")
                    .unwrap_or_else(|_| "models/recognizer_vocab.txt".to_string()),
                input_height: env_or("RECOGNIZER_INPUT_HEIGHT", 48),
                max_width: env_or("RECOGNIZER_MAX_WIDTH", 1280),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "max_upload_bytes must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.detection.confidence_threshold,
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.iou_threshold) {
            return Err(ConfigError::InvalidIoUThreshold(self.detection.iou_threshold));
        }

        // YOLO strides require a multiple of 32
        if !(320..=2048).contains(&self.detection.target_size)
            || self.detection.target_size % 32 != 0
        {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "target_size must be a multiple of 32 between 320 and 2048, got {}",
                self.detection.target_size
            )));
        }

        if self.detection.max_detections == 0 {
            return Err(ConfigError::InvalidDetectionConfig(
                "max_detections must be > 0".to_string(),
            ));
        }

        if self.detection.pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(self.detection.pool_size));
        }

        if !(16..=128).contains(&self.recognition.input_height) {
            return Err(ConfigError::InvalidRecognitionConfig(format!(
                "input_height must be between 16 and 128, got {}",
                self.recognition.input_height
            )));
        }

        if self.recognition.max_width < self.recognition.input_height {
            return Err(ConfigError::InvalidRecognitionConfig(format!(
                "max_width ({}) must be >= input_height ({})",
                self.recognition.max_width, self.recognition.input_height
            )));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_bytes
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.detection.confidence_threshold
    }

    pub fn iou_threshold(&self) -> f32 {
        self.detection.iou_threshold
    }

    pub fn target_size(&self) -> u32 {
        self.detection.target_size
    }
}

impl Default for Config {
    /// Built-in defaults without consulting the environment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8000,
                host: "0.0.0.0".to_string(),
                log_level: Level::INFO,
                max_upload_bytes: 20 * 1024 * 1024,
            },
            detection: DetectionConfig {
                model_path: "models/detector.onnx".to_string(),
                confidence_threshold: 0.1,
                iou_threshold: 0.7,
                target_size: 640,
                max_detections: 300,
                pool_size: 1,
            },
            recognition: RecognitionConfig {
                model_path: "models/recognizer.onnx".to_string(),
                vocab_path: "models/recognizer_vocab.txt".to_string(),
                input_height: 48,
                max_width: 1280,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_thresholds() {
        let mut config = Config::default();
        config.detection.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfidenceThreshold(_))
        ));

        let mut config = Config::default();
        config.detection.iou_threshold = -0.1;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidIoUThreshold(_))));
    }

    #[test]
    fn test_rejects_unaligned_target_size() {
        let mut config = Config::default();
        config.detection.target_size = 650;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDetectionConfig(_))
        ));
    }

    #[test]
    fn test_rejects_narrow_recognizer_width() {
        let mut config = Config::default();
        config.recognition.max_width = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARNING"), Some(Level::WARN));
        assert_eq!(parse_level("verbose"), None);
    }
}
