//! Axis-aligned watermark regions in source-image pixel space.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle `(x1, y1)`–`(x2, y2)` with `x1 <= x2` and `y1 <= y2`.
///
/// Coordinates may fall outside the image; the mask builder clamps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// Left edge.
    pub x1: i32,
    /// Top edge.
    pub y1: i32,
    /// Right edge.
    pub x2: i32,
    /// Bottom edge.
    pub y2: i32,
}

impl Region {
    /// Create a region, swapping corners if they arrive out of order.
    #[must_use]
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Tight axis-aligned bounding box of an arbitrary polygon.
    ///
    /// Float coordinates are truncated toward zero. Returns `None` for an
    /// empty polygon.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_polygon(points: &[(f32, f32)]) -> Option<Self> {
        let (&(fx, fy), rest) = points.split_first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (fx, fy, fx, fy);
        for &(x, y) in rest {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Self::new(min_x as i32, min_y as i32, max_x as i32, max_y as i32))
    }

    /// Divide every coordinate by `factor`, mapping a region found on a
    /// resized image back to the original.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn scaled_down(self, factor: f32) -> Self {
        let down = |v: i32| (v as f32 / factor) as i32;
        Self::new(down(self.x1), down(self.y1), down(self.x2), down(self.y2))
    }

    /// Shift the region by a crop offset.
    #[must_use]
    pub fn translated(self, dx: i32, dy: i32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }
}

impl std::str::FromStr for Region {
    type Err = String;

    /// Parse `x1,y1,x2,y2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<i32> = s
            .split(',')
            .map(|p| p.trim().parse::<i32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid region '{s}': {e}"))?;
        match parts.as_slice() {
            &[x1, y1, x2, y2] => Ok(Self::new(x1, y1, x2, y2)),
            _ => Err(format!("invalid region '{s}', expected x1,y1,x2,y2")),
        }
    }
}
