use std::fmt::{Debug, Display, Formatter};

use itertools::Itertools;

use crate::dtype::{DType, Format};
use crate::error::{GraphError, GraphResult};

/// The maximum tensor rank supported by kernels.
pub const MAX_RANK: usize = 8;

/// An ordered list of dimension sizes. A size of zero marks an empty or not-yet-inferred dimension.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

/// Build a [Shape] from literal dimensions, panicking if the rank exceeds [MAX_RANK].
#[macro_export]
macro_rules! shape {
    [$($dim:expr),* $(,)?] => {
        $crate::shape::Shape::fixed(&[$($dim),*])
    };
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> GraphResult<Shape> {
        if dims.len() > MAX_RANK {
            return Err(GraphError::RankTooLarge {
                rank: dims.len(),
                max: MAX_RANK,
            });
        }
        Ok(Shape { dims })
    }

    /// Like [Shape::new] but panics on invalid rank, for shapes known at compile time.
    pub fn fixed(dims: &[usize]) -> Shape {
        assert!(dims.len() <= MAX_RANK, "Rank of {:?} exceeds {}", dims, MAX_RANK);
        Shape { dims: dims.to_vec() }
    }

    pub fn scalar() -> Shape {
        Shape { dims: vec![] }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements, `None` if the product overflows.
    pub fn checked_numel(&self) -> Option<usize> {
        checked_product(&self.dims)
    }

    pub fn last(&self) -> Option<usize> {
        self.dims.last().copied()
    }

    /// Resolve a possibly negative axis, where `-1` is the last axis.
    pub fn axis(&self, axis: isize) -> Option<usize> {
        let rank = self.rank() as isize;
        let axis = if axis < 0 { axis + rank } else { axis };
        (0..rank).contains(&axis).then_some(axis as usize)
    }

    pub fn with_dim(&self, axis: usize, size: usize) -> Shape {
        let mut dims = self.dims.clone();
        dims[axis] = size;
        Shape { dims }
    }

    /// Merge all axes except the last `keep` ones into a single leading axis.
    ///
    /// For example `[B, S, H].merge_leading(1) == [B * S, H]`.
    /// Returns `None` if fewer than `keep + 1` axes exist or the merged size overflows.
    pub fn merge_leading(&self, keep: usize) -> Option<Shape> {
        if self.rank() <= keep {
            return None;
        }
        let split = self.rank() - keep;
        let leading = checked_product(&self.dims[..split])?;

        let mut dims = vec![leading];
        dims.extend_from_slice(&self.dims[split..]);
        Some(Shape { dims })
    }

    /// Product of the dimensions before `axis`.
    pub fn outer_size(&self, axis: usize) -> Option<usize> {
        checked_product(&self.dims[..axis])
    }

    /// Product of the dimensions after `axis`.
    pub fn inner_size(&self, axis: usize) -> Option<usize> {
        checked_product(&self.dims[axis + 1..])
    }

    /// Numpy-style broadcast of two shapes, aligned on the trailing axis.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        let rank = self.rank().max(other.rank());
        let dims = (0..rank)
            .map(|i| {
                let a = self.dim_from_end(rank - 1 - i);
                let b = other.dim_from_end(rank - 1 - i);
                match (a, b) {
                    (a, b) if a == b => Some(a),
                    (1, b) => Some(b),
                    (a, 1) => Some(a),
                    _ => None,
                }
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Shape { dims })
    }

    fn dim_from_end(&self, i: usize) -> usize {
        if i < self.rank() {
            self.dims[self.rank() - 1 - i]
        } else {
            1
        }
    }

    /// Dense row-major strides. The element count must not overflow.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0; self.rank()];
        let mut acc = 1;
        for i in (0..self.rank()).rev() {
            strides[i] = acc;
            acc *= self.dims[i];
        }
        strides
    }

    /// Strides for reading a tensor of this shape as if it was broadcast to `target`:
    /// broadcast axes get stride zero.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let dense = self.strides();
        let offset = target.rank() - self.rank();
        (0..target.rank())
            .map(|i| {
                if i < offset || self.dims[i - offset] == 1 {
                    0
                } else {
                    dense[i - offset]
                }
            })
            .collect()
    }
}

fn checked_product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl Debug for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shape({})", self)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.dims.is_empty() {
            write!(f, "[]")
        } else {
            write!(f, "{}", self.dims.iter().join(" x "))
        }
    }
}

/// Immutable description of a tensor: element type, memory format and shape.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TensorDesc {
    pub dtype: DType,
    pub format: Format,
    pub shape: Shape,
}

impl TensorDesc {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        TensorDesc {
            dtype,
            format: Format::Nd,
            shape,
        }
    }

    pub fn with_format(self, format: Format) -> Self {
        TensorDesc { format, ..self }
    }

    pub fn with_shape(&self, shape: Shape) -> Self {
        TensorDesc {
            dtype: self.dtype,
            format: self.format,
            shape,
        }
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        TensorDesc {
            dtype,
            format: self.format,
            shape: self.shape.clone(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn checked_numel(&self) -> Option<usize> {
        self.shape.checked_numel()
    }

    pub fn size_bytes(&self) -> GraphResult<usize> {
        self.shape
            .checked_numel()
            .and_then(|n| n.checked_mul(self.dtype.size_bytes()))
            .ok_or_else(|| GraphError::SizeOverflow {
                shape: self.shape.clone(),
            })
    }

    /// Whether `other` describes the same bytes under a different logical shape.
    pub fn is_view_of(&self, other: &TensorDesc) -> bool {
        let same_count = match (self.checked_numel(), other.checked_numel()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };
        self.dtype == other.dtype && self.format == other.format && same_count
    }
}

impl Display for TensorDesc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.dtype.name(), self.shape)?;
        if self.format != Format::Nd {
            write!(f, "({:?})", self.format)?;
        }
        Ok(())
    }
}
