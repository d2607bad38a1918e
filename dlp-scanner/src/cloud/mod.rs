//! Point cloud containers.

mod filter;

pub use filter::{filter_outliers, FilterReport};

/// Marker for a rejected grid cell.
pub const INVALID_POINT: [f32; 3] = [f32::INFINITY; 3];

pub fn is_finite_point(p: &[f32; 3]) -> bool {
    p.iter().all(|v| v.is_finite())
}

/// Row-major H x W grid of points; non-finite cells are invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseCloud {
    pub width: u32,
    pub height: u32,
    pub points: Vec<[f32; 3]>,
}

impl DenseCloud {
    /// Grid with every cell invalid.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            points: vec![INVALID_POINT; (width * height) as usize],
        }
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    pub fn get(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        let p = self.points[self.index(x, y)];
        is_finite_point(&p).then_some(p)
    }

    pub fn set(&mut self, x: u32, y: u32, point: [f32; 3]) {
        let idx = self.index(x, y);
        self.points[idx] = point;
    }

    pub fn invalidate_all(&mut self) {
        self.points.fill(INVALID_POINT);
    }

    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| is_finite_point(p)).count()
    }
}

/// Output of reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub enum PointCloud {
    Grid(DenseCloud),
    List(Vec<[f32; 3]>),
}

impl PointCloud {
    /// Valid points in storage order.
    pub fn finite_points(&self) -> Vec<[f32; 3]> {
        let points = match self {
            PointCloud::Grid(grid) => &grid.points,
            PointCloud::List(points) => points,
        };
        points.iter().copied().filter(is_finite_point).collect()
    }

    pub fn valid_count(&self) -> usize {
        match self {
            PointCloud::Grid(grid) => grid.valid_count(),
            PointCloud::List(points) => points.iter().filter(|p| is_finite_point(p)).count(),
        }
    }

    pub fn as_grid(&self) -> Option<&DenseCloud> {
        match self {
            PointCloud::Grid(grid) => Some(grid),
            PointCloud::List(_) => None,
        }
    }

    pub fn as_grid_mut(&mut self) -> Option<&mut DenseCloud> {
        match self {
            PointCloud::Grid(grid) => Some(grid),
            PointCloud::List(_) => None,
        }
    }
}
