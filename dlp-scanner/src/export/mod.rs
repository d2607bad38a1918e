//! Export module for reconstructed point clouds.

mod pcd;

pub use pcd::{read_pcd, write_pcd, PcdEncoding};

use crate::cloud::PointCloud;
use crate::error::{Result, ScanError};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Highest file number tried by [`PcdDirectorySink`].
const MAX_FILE_NUMBER: u32 = 1024;

/// Destination for finished scans (removable drive, network peer...).
pub trait PointCloudSink {
    fn send(&mut self, cloud: &PointCloud) -> Result<()>;
}

/// Save a point cloud to a `.pcd` file.
pub fn save_pcd(cloud: &PointCloud, path: &Path, encoding: PcdEncoding) -> Result<usize> {
    let file = File::create(path)?;
    let written = write_pcd(BufWriter::new(file), cloud, encoding)?;
    log::info!("Exported {} points to {:?}", written, path);
    Ok(written)
}

/// Load a `.pcd` file as a flat point list.
pub fn load_pcd(path: &Path) -> Result<PointCloud> {
    let file = File::open(path)?;
    let points = read_pcd(BufReader::new(file))?;
    log::debug!("Loaded {} points from {:?}", points.len(), path);
    Ok(PointCloud::List(points))
}

/// Writes each scan to the next free `pointcloud_N.pcd` in a directory.
#[derive(Debug, Clone)]
pub struct PcdDirectorySink {
    dir: PathBuf,
    encoding: PcdEncoding,
    next: u32,
}

impl PcdDirectorySink {
    pub fn new(dir: impl Into<PathBuf>, encoding: PcdEncoding) -> Self {
        Self {
            dir: dir.into(),
            encoding,
            next: 1,
        }
    }

    /// Next unused file path, or `None` once the numbers run out.
    fn next_path(&mut self) -> Option<PathBuf> {
        while self.next < MAX_FILE_NUMBER {
            let path = self.dir.join(format!("pointcloud_{}.pcd", self.next));
            self.next += 1;
            if !path.exists() {
                return Some(path);
            }
        }
        None
    }
}

impl PointCloudSink for PcdDirectorySink {
    fn send(&mut self, cloud: &PointCloud) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.next_path().ok_or_else(|| {
            ScanError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("no free pointcloud_N.pcd name left in {:?}", self.dir),
            ))
        })?;
        save_pcd(cloud, &path, self.encoding)?;
        Ok(())
    }
}
