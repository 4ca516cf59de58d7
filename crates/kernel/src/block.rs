//! Structured grid blocks, index ranges and boundary surfaces.
//!
//! A block is a Cartesian box of nodes. Node `(i, j, k)` sits at
//! `origin + (i, j, k) * mesh_size` and owns the cubic cell of edge
//! `mesh_size` centred on it. Two-dimensional blocks have a single layer in z.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::Real;

/// Half-open box of node indices `[start, end)` in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterRange {
    /// First index included, per axis.
    pub start: [usize; 3],
    /// One past the last index, per axis.
    pub end: [usize; 3],
}

impl IterRange {
    /// Build a range; `end` is clamped so it is never below `start`.
    pub fn new(start: [usize; 3], end: [usize; 3]) -> Self {
        let end = [
            end[0].max(start[0]),
            end[1].max(start[1]),
            end[2].max(start[2]),
        ];
        Self { start, end }
    }

    /// A range containing nothing.
    pub fn empty() -> Self {
        Self {
            start: [0; 3],
            end: [0; 3],
        }
    }

    /// Number of nodes in the range.
    pub fn cell_count(&self) -> usize {
        (0..3).map(|a| self.end[a] - self.start[a]).product()
    }

    /// True when the range holds no node.
    pub fn is_empty(&self) -> bool {
        self.cell_count() == 0
    }

    /// Whether `ijk` lies inside.
    #[inline]
    pub fn contains(&self, ijk: [usize; 3]) -> bool {
        (0..3).all(|a| ijk[a] >= self.start[a] && ijk[a] < self.end[a])
    }

    /// Common part of two ranges, if any.
    pub fn intersect(&self, other: &IterRange) -> Option<IterRange> {
        let mut start = [0; 3];
        let mut end = [0; 3];
        for a in 0..3 {
            start[a] = self.start[a].max(other.start[a]);
            end[a] = self.end[a].min(other.end[a]);
            if start[a] >= end[a] {
                return None;
            }
        }
        Some(IterRange { start, end })
    }

    /// Iterate indices with x fastest, then y, then z.
    pub fn iter(&self) -> impl Iterator<Item = [usize; 3]> {
        let r = *self;
        (r.start[2]..r.end[2])
            .flat_map(move |k| (r.start[1]..r.end[1]).map(move |j| (j, k)))
            .flat_map(move |(j, k)| (r.start[0]..r.end[0]).map(move |i| [i, j, k]))
    }
}

/// Faces of a block.
///
/// Left/Right bound x, Bottom/Top bound y, Back/Front bound z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundarySurface {
    /// Minimum x.
    Left,
    /// Maximum x.
    Right,
    /// Maximum y.
    Top,
    /// Minimum y.
    Bottom,
    /// Maximum z.
    Front,
    /// Minimum z.
    Back,
}

impl BoundarySurface {
    /// All faces in precedence order: a node shared by several faces
    /// belongs to the first one listed.
    pub const ALL: [BoundarySurface; 6] = [
        BoundarySurface::Left,
        BoundarySurface::Right,
        BoundarySurface::Top,
        BoundarySurface::Bottom,
        BoundarySurface::Front,
        BoundarySurface::Back,
    ];

    /// Axis normal to the face.
    pub fn axis(self) -> usize {
        match self {
            BoundarySurface::Left | BoundarySurface::Right => 0,
            BoundarySurface::Top | BoundarySurface::Bottom => 1,
            BoundarySurface::Front | BoundarySurface::Back => 2,
        }
    }

    /// Whether the face sits at the maximum index of its axis.
    pub fn is_max(self) -> bool {
        matches!(
            self,
            BoundarySurface::Right | BoundarySurface::Top | BoundarySurface::Front
        )
    }

    /// Outward unit normal.
    pub fn normal(self) -> [i32; 3] {
        let mut n = [0; 3];
        n[self.axis()] = if self.is_max() { 1 } else { -1 };
        n
    }
}

/// A structured grid block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block id, unique within a simulation.
    pub id: usize,
    /// Human-readable name.
    pub name: String,
    /// Spatial dimension, 2 or 3.
    pub dim: usize,
    /// Node counts per axis; `size[2] == 1` in 2-D.
    pub size: [usize; 3],
    /// Node spacing.
    pub mesh_size: Real,
    /// Coordinates of node `(0, 0, 0)`.
    pub origin: [Real; 3],
}

impl Block {
    /// Validate and build a block.
    pub fn new(
        id: usize,
        name: impl Into<String>,
        dim: usize,
        size: [usize; 3],
        mesh_size: Real,
        origin: [Real; 3],
    ) -> KernelResult<Self> {
        let name = name.into();
        if dim != 2 && dim != 3 {
            return Err(KernelError::Invalid(format!(
                "block '{name}' has dimension {dim}, expected 2 or 3"
            )));
        }
        if dim == 2 && size[2] != 1 {
            return Err(KernelError::Invalid(format!(
                "2-D block '{name}' must have a single z layer, got {}",
                size[2]
            )));
        }
        if size.iter().any(|&n| n == 0) {
            return Err(KernelError::Invalid(format!("block '{name}' has an empty axis")));
        }
        if !(mesh_size > 0.0) {
            return Err(KernelError::Invalid(format!(
                "block '{name}' has non-positive mesh size {mesh_size}"
            )));
        }
        Ok(Self {
            id,
            name,
            dim,
            size,
            mesh_size,
            origin,
        })
    }

    /// Total node count.
    pub fn cell_count(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    /// Linear index of node `ijk`, x fastest.
    #[inline]
    pub fn index(&self, ijk: [usize; 3]) -> usize {
        (ijk[2] * self.size[1] + ijk[1]) * self.size[0] + ijk[0]
    }

    /// Inverse of [`Block::index`].
    #[inline]
    pub fn coords(&self, idx: usize) -> [usize; 3] {
        let nx = self.size[0];
        let ny = self.size[1];
        [idx % nx, (idx / nx) % ny, idx / (nx * ny)]
    }

    /// Range covering every node.
    pub fn whole_range(&self) -> IterRange {
        IterRange::new([0; 3], self.size)
    }

    /// Range of nodes not lying on any face.
    pub fn bulk_range(&self) -> IterRange {
        let mut start = [0; 3];
        let mut end = self.size;
        for a in 0..self.dim {
            start[a] = 1.min(self.size[a]);
            end[a] = self.size[a].saturating_sub(1);
        }
        IterRange::new(start, end)
    }

    /// Nodes assigned to `surface`.
    ///
    /// Face ranges partition the outer layer: edge and corner nodes go to
    /// the first face of [`BoundarySurface::ALL`] they lie on.
    pub fn surface_range(&self, surface: BoundarySurface) -> KernelResult<IterRange> {
        let axis = surface.axis();
        if axis >= self.dim {
            return Err(KernelError::Invalid(format!(
                "surface {surface:?} does not exist on {}-D block '{}'",
                self.dim, self.name
            )));
        }
        let mut start = [0; 3];
        let mut end = self.size;
        let plane = if surface.is_max() { self.size[axis] - 1 } else { 0 };
        start[axis] = plane;
        end[axis] = plane + 1;
        // Axes claimed by faces earlier in precedence order lose their
        // outer layer.
        for earlier in 0..axis {
            start[earlier] = 1.min(self.size[earlier]);
            end[earlier] = self.size[earlier].saturating_sub(1);
        }
        Ok(IterRange::new(start, end))
    }

    /// Sum of outward normals of every face the node lies on.
    pub fn composite_normal(&self, ijk: [usize; 3]) -> [i32; 3] {
        let mut n = [0; 3];
        for a in 0..self.dim {
            if ijk[a] == 0 {
                n[a] -= 1;
            }
            if ijk[a] + 1 == self.size[a] {
                n[a] += 1;
            }
        }
        n
    }

    /// Node reached from `ijk` by offset `c`, or `None` outside the block.
    #[inline]
    pub fn offset(&self, ijk: [usize; 3], c: [i32; 3]) -> Option<[usize; 3]> {
        let mut out = [0; 3];
        for a in 0..3 {
            let v = ijk[a] as i64 + c[a] as i64;
            if v < 0 || v >= self.size[a] as i64 {
                return None;
            }
            out[a] = v as usize;
        }
        Some(out)
    }

    /// Node reached from `ijk` by offset `c`, wrapping around every axis.
    #[inline]
    pub fn wrapped(&self, ijk: [usize; 3], c: [i32; 3]) -> [usize; 3] {
        let mut out = [0; 3];
        for a in 0..3 {
            let n = self.size[a] as i64;
            out[a] = (ijk[a] as i64 + c[a] as i64).rem_euclid(n) as usize;
        }
        out
    }

    /// Physical coordinates of node `ijk`.
    #[inline]
    pub fn coordinate(&self, ijk: [usize; 3]) -> [Real; 3] {
        let mut x = self.origin;
        for a in 0..self.dim {
            x[a] += ijk[a] as Real * self.mesh_size;
        }
        x
    }

    /// Physical extent covered by the block's cells.
    pub fn bounds(&self) -> ([Real; 3], [Real; 3]) {
        let mut lo = self.origin;
        let mut hi = self.origin;
        for a in 0..self.dim {
            lo[a] -= 0.5 * self.mesh_size;
            hi[a] += (self.size[a] as Real - 0.5) * self.mesh_size;
        }
        (lo, hi)
    }

    /// Node range whose cells intersect the box `[lo, hi]`.
    pub fn cells_touching(&self, lo: [Real; 3], hi: [Real; 3]) -> IterRange {
        let mut start = [0; 3];
        let mut end = self.size;
        for a in 0..self.dim {
            let first = ((lo[a] - self.origin[a]) / self.mesh_size - 0.5).floor() as i64 + 1;
            let last = ((hi[a] - self.origin[a]) / self.mesh_size + 0.5).floor() as i64;
            let n = self.size[a] as i64;
            start[a] = first.clamp(0, n) as usize;
            end[a] = (last + 1).clamp(0, n) as usize;
        }
        IterRange::new(start, end)
    }
}
