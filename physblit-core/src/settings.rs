//! Transform settings: the user-facing properties of the stage plus the
//! in-process backend size, persisted as JSON.

use crate::blitter::{DeinterlaceMode, RotationMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// 64 MiB
pub const DEFAULT_CONTIGUOUS_CAPACITY: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    pub output_rotation: RotationMode,
    /// Apply the crop rectangle attached to input frames
    pub enable_crop: bool,
    pub deinterlace_mode: DeinterlaceMode,
    /// Bytes available to the in-process contiguous backend
    pub contiguous_capacity: usize,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            output_rotation: RotationMode::None,
            enable_crop: true,
            deinterlace_mode: DeinterlaceMode::None,
            contiguous_capacity: DEFAULT_CONTIGUOUS_CAPACITY,
        }
    }
}

impl TransformSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults if the file does not exist or cannot be read.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => {
                info!("loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("ignoring settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// The runtime properties of a transform stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    OutputRotation,
    EnableCrop,
    DeinterlaceMode,
}

/// A property together with its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "property", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    OutputRotation(RotationMode),
    EnableCrop(bool),
    DeinterlaceMode(DeinterlaceMode),
}

impl PropertyValue {
    pub fn property(&self) -> Property {
        match self {
            Self::OutputRotation(_) => Property::OutputRotation,
            Self::EnableCrop(_) => Property::EnableCrop,
            Self::DeinterlaceMode(_) => Property::DeinterlaceMode,
        }
    }
}

impl TransformSettings {
    pub fn get(&self, property: Property) -> PropertyValue {
        match property {
            Property::OutputRotation => PropertyValue::OutputRotation(self.output_rotation),
            Property::EnableCrop => PropertyValue::EnableCrop(self.enable_crop),
            Property::DeinterlaceMode => PropertyValue::DeinterlaceMode(self.deinterlace_mode),
        }
    }

    pub fn set(&mut self, value: PropertyValue) {
        match value {
            PropertyValue::OutputRotation(mode) => self.output_rotation = mode,
            PropertyValue::EnableCrop(enable) => self.enable_crop = enable,
            PropertyValue::DeinterlaceMode(mode) => self.deinterlace_mode = mode,
        }
    }
}
