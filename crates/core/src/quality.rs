//! Quality tiers and the engine parameter set derived from them.
//!
//! Each [`ProcessingQuality`] maps to a fixed [`QualityPreset`]. Callers
//! may override individual fields through [`ProcessingOptions`]; an
//! explicit override always wins over the preset.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Processing quality requested for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingQuality {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl ProcessingQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }

    /// The fixed engine preset for this tier.
    pub fn preset(self) -> QualityPreset {
        match self {
            Self::Low => QualityPreset {
                feature_quality: FeatureQuality::Low,
                mesh_size: 100_000,
                min_num_features: 5_000,
                orthophoto_resolution: 10.0,
                fast_orthophoto: true,
                optimize_disk_space: true,
                pc_quality: None,
                use_3dmesh: false,
            },
            Self::Medium => QualityPreset {
                feature_quality: FeatureQuality::Medium,
                mesh_size: 200_000,
                min_num_features: 8_000,
                orthophoto_resolution: 5.0,
                fast_orthophoto: false,
                optimize_disk_space: false,
                pc_quality: None,
                use_3dmesh: false,
            },
            Self::High => QualityPreset {
                feature_quality: FeatureQuality::High,
                mesh_size: 400_000,
                min_num_features: 10_000,
                orthophoto_resolution: 2.0,
                fast_orthophoto: false,
                optimize_disk_space: false,
                pc_quality: Some(FeatureQuality::High),
                use_3dmesh: false,
            },
            Self::Ultra => QualityPreset {
                feature_quality: FeatureQuality::Ultra,
                mesh_size: 600_000,
                min_num_features: 15_000,
                orthophoto_resolution: 1.0,
                fast_orthophoto: false,
                optimize_disk_space: false,
                pc_quality: Some(FeatureQuality::Ultra),
                use_3dmesh: true,
            },
        }
    }
}

impl fmt::Display for ProcessingQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingQuality {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "ultra" => Ok(Self::Ultra),
            other => Err(CoreError::Validation(format!(
                "Unknown processing quality '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for ProcessingQuality {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Feature extraction / point cloud quality levels understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureQuality {
    Ultra,
    High,
    Medium,
    Low,
    Lowest,
}

impl FeatureQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ultra => "ultra",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Lowest => "lowest",
        }
    }
}

/// Engine settings implied by a quality tier.
///
/// Higher tiers raise the quality knobs and switch off the fast-path and
/// disk-saving shortcuts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityPreset {
    pub feature_quality: FeatureQuality,
    pub mesh_size: u32,
    pub min_num_features: u32,
    /// Ground sampling distance in cm/pixel.
    pub orthophoto_resolution: f64,
    pub fast_orthophoto: bool,
    pub optimize_disk_space: bool,
    pub pc_quality: Option<FeatureQuality>,
    pub use_3dmesh: bool,
}

// ---------------------------------------------------------------------------
// Caller options
// ---------------------------------------------------------------------------

/// Options supplied when processing is started.
///
/// Every field except `quality` is an override; `None` means "use the
/// preset". `dsm`, `dtm` and `auto_boundary` are always sent and default
/// to `true`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProcessingOptions {
    pub quality: ProcessingQuality,
    pub feature_quality: Option<FeatureQuality>,
    #[validate(range(min = 1_000, max = 10_000_000))]
    pub mesh_size: Option<u32>,
    pub dsm: Option<bool>,
    pub dtm: Option<bool>,
    #[validate(range(min = 0.1, max = 100.0))]
    pub orthophoto_resolution: Option<f64>,
    #[validate(range(min = 100, max = 100_000))]
    pub min_num_features: Option<u32>,
    pub pc_classify: Option<bool>,
    pub pc_rectify: Option<bool>,
    pub use_3dmesh: Option<bool>,
    pub auto_boundary: Option<bool>,
    pub fast_orthophoto: Option<bool>,
    pub optimize_disk_space: Option<bool>,
}

impl ProcessingOptions {
    /// Options for `quality` with no overrides.
    pub fn for_quality(quality: ProcessingQuality) -> Self {
        Self {
            quality,
            ..Default::default()
        }
    }

    /// Resolve the preset for `self.quality` and apply the overrides.
    pub fn resolve(&self) -> TaskParameters {
        let preset = self.quality.preset();
        let mut params = TaskParameters::default();

        params.set(
            "feature-quality",
            self.feature_quality.unwrap_or(preset.feature_quality).as_str(),
        );
        params.set("mesh-size", self.mesh_size.unwrap_or(preset.mesh_size));
        params.set(
            "min-num-features",
            self.min_num_features.unwrap_or(preset.min_num_features),
        );
        params.set(
            "orthophoto-resolution",
            self.orthophoto_resolution
                .unwrap_or(preset.orthophoto_resolution),
        );
        params.set(
            "fast-orthophoto",
            self.fast_orthophoto.unwrap_or(preset.fast_orthophoto),
        );
        params.set(
            "optimize-disk-space",
            self.optimize_disk_space.unwrap_or(preset.optimize_disk_space),
        );
        if let Some(pc_quality) = preset.pc_quality {
            params.set("pc-quality", pc_quality.as_str());
        }
        let use_3dmesh = self.use_3dmesh.unwrap_or(preset.use_3dmesh);
        if use_3dmesh {
            params.set("use-3dmesh", true);
        }

        params.set("dsm", self.dsm.unwrap_or(true));
        params.set("dtm", self.dtm.unwrap_or(true));
        params.set("auto-boundary", self.auto_boundary.unwrap_or(true));

        if let Some(classify) = self.pc_classify {
            params.set("pc-classify", classify);
        }
        if let Some(rectify) = self.pc_rectify {
            params.set("pc-rectify", rectify);
        }

        params
    }
}

// ---------------------------------------------------------------------------
// Resolved parameters
// ---------------------------------------------------------------------------

/// Named engine parameters, keyed by the engine's option name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskParameters(BTreeMap<String, serde_json::Value>);

impl TaskParameters {
    pub fn set(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The `[{"name": ..., "value": ...}]` list form the engine expects.
    pub fn to_option_list(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.iter()
                .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
                .collect(),
        )
    }
}
