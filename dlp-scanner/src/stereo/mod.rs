//! Stereo triangulation of decoded correspondences.

mod reconstruct;
mod triangulate;

pub use reconstruct::{
    code_centroids, contrast_mask, ProjectorKey, ReconstructionConfig, ReconstructionReport, Reconstructor,
    SecondView,
};
pub use triangulate::{closest_approach, ClosestApproach, PinholeCamera, Ray, StereoGeometry, Triangulated};
