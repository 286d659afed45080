//! Flat-binary parameter snapshots keyed by epoch.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::CheckpointErr;

/// Durable store for parameter snapshots.
///
/// One headerless file per named tensor per epoch (`{name}_{epoch}.bin`)
/// holding the tensor's `f32` values in row-major order. Single-writer by
/// policy: only the coordinator rank saves, so there is no concurrent-write
/// coordination here.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointErr> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CheckpointErr::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, name: &str, epoch: usize) -> PathBuf {
        self.dir.join(format!("{name}_{epoch}.bin"))
    }

    /// Writes the snapshot of `name` at `epoch`.
    pub fn save(&self, name: &str, epoch: usize, data: &[f32]) -> Result<(), CheckpointErr> {
        let path = self.file_path(name, epoch);
        fs::write(&path, bytemuck::cast_slice(data))
            .map_err(|source| CheckpointErr::Io { path, source })
    }

    /// Reads the snapshot of `name` at `epoch` into `out`.
    ///
    /// The stored element count must match `out.len()` exactly; resuming
    /// against a differently-shaped live tensor is a fatal mismatch.
    pub fn load_into(&self, name: &str, epoch: usize, out: &mut [f32]) -> Result<(), CheckpointErr> {
        let path = self.file_path(name, epoch);
        let bytes = fs::read(&path).map_err(|source| CheckpointErr::Io {
            path: path.clone(),
            source,
        })?;

        if bytes.len() != out.len() * size_of::<f32>() {
            return Err(CheckpointErr::ShapeMismatch {
                path,
                got: bytes.len() / size_of::<f32>(),
                expected: out.len(),
            });
        }

        // The source Vec has no alignment guarantee, so read per element.
        for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(size_of::<f32>())) {
            *dst = bytemuck::pod_read_unaligned(chunk);
        }

        Ok(())
    }
}
