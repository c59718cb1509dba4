//! Result bundle unpacking and artifact discovery.

use std::path::{Path, PathBuf};

use orthoflow_core::artifacts::ArtifactKind;
use orthoflow_db::models::project::ResultArtifacts;

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("unpack task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Extract `bundle` into `dest_dir`.
///
/// Runs on the blocking pool; entries that would escape `dest_dir` are
/// rejected by the archive reader.
pub async fn unpack_bundle(bundle: &Path, dest_dir: &Path) -> Result<(), ResultsError> {
    let bundle = bundle.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), ResultsError> {
        let file = std::fs::File::open(&bundle)?;
        let mut archive = zip::ZipArchive::new(file)?;
        archive.extract(&dest_dir)?;
        Ok(())
    })
    .await?
}

/// Map the known artifact locations under `root` to their absolute paths.
///
/// Missing files leave the corresponding field unset.
pub async fn locate_artifacts(root: &Path) -> ResultArtifacts {
    let mut artifacts = ResultArtifacts::default();
    for kind in ArtifactKind::ALL {
        let path: PathBuf = root.join(kind.bundle_path());
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            artifacts.set(kind, path.to_string_lossy().into_owned());
        }
    }
    artifacts
}
