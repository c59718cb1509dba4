//! Result artifacts produced by a completed job.
//!
//! The engine's result bundle is a zip with a conventional layout. Each
//! [`ArtifactKind`] knows where it lives inside the unpacked bundle and
//! the file name it is served under.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Orthophoto,
    Dem,
    PointCloud,
    TexturedModel,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Orthophoto,
        ArtifactKind::Dem,
        ArtifactKind::PointCloud,
        ArtifactKind::TexturedModel,
    ];

    /// Path relative to the unpacked bundle root.
    pub fn bundle_path(self) -> &'static str {
        match self {
            Self::Orthophoto => "odm_orthophoto/odm_orthophoto.tif",
            Self::Dem => "odm_dem/dsm.tif",
            Self::PointCloud => "odm_georeferencing/odm_georeferenced_model.laz",
            Self::TexturedModel => "odm_texturing/odm_textured_model_geo.obj",
        }
    }

    /// Public download name.
    pub fn download_name(self) -> &'static str {
        match self {
            Self::Orthophoto => "orthophoto.tif",
            Self::Dem => "dsm.tif",
            Self::PointCloud => "pointcloud.laz",
            Self::TexturedModel => "textured_model.obj",
        }
    }

    pub fn from_download_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.download_name() == name)
    }
}
