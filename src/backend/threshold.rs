use super::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKind {
    Detection,
    Download,
}

/// Byte-length heuristic: genuine photos are larger than the placeholder
/// images the source serves for missing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdGate {
    detection: usize,
    download: usize,
}

impl ThresholdGate {
    pub fn new(detection: usize, download: usize) -> Self {
        Self {
            detection,
            download,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.detection_threshold_bytes,
            config.download_threshold_bytes,
        )
    }

    pub fn threshold(&self, kind: ThresholdKind) -> usize {
        match kind {
            ThresholdKind::Detection => self.detection,
            ThresholdKind::Download => self.download,
        }
    }

    pub fn accepts(&self, len: usize, kind: ThresholdKind) -> bool {
        len >= self.threshold(kind)
    }
}

impl Default for ThresholdGate {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
