// Shared 2D helpers. Points are plain `(x, y)` tuples; every function here
// tolerates degenerate input (zero-length vectors, empty rectangles).

use serde::Serialize;

use crate::ir::Point;

pub const EPS: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn centered(center: Point, width: f32, height: f32) -> Self {
        Self::new(center.0 - width / 2.0, center.1 - height / 2.0, width, height)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn inflate(&self, pad: f32) -> Self {
        Self::new(
            self.x - pad,
            self.y - pad,
            (self.width + pad * 2.0).max(0.0),
            (self.height + pad * 2.0).max(0.0),
        )
    }

    pub fn translate(&self, delta: Point) -> Self {
        Self::new(self.x + delta.0, self.y + delta.1, self.width, self.height)
    }

    pub fn union(&self, other: &Rect) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Self::new(x, y, right - x, bottom - y)
    }

    /// Open-interior overlap test: rectangles that only touch do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains(&self, point: Point) -> bool {
        point.0 > self.x && point.0 < self.right() && point.1 > self.y && point.1 < self.bottom()
    }

    /// Minimal translation that moves `self` out of `other`, along the axis
    /// of least penetration. `None` when they do not overlap.
    pub fn separation(&self, other: &Rect) -> Option<Separation> {
        if !self.overlaps(other) {
            return None;
        }
        let (cx, cy) = self.center();
        let (ox, oy) = other.center();
        let pen_x = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let pen_y = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        // Push out through the nearer face, not just the overlap extent, so
        // nested rectangles separate fully.
        let push_x = if cx < ox {
            self.right() - other.x
        } else {
            other.right() - self.x
        };
        let push_y = if cy < oy {
            self.bottom() - other.y
        } else {
            other.bottom() - self.y
        };
        if pen_x <= pen_y {
            let sign = if cx < ox { -1.0 } else { 1.0 };
            Some(Separation {
                axis: Axis::X,
                sign,
                depth: push_x.max(pen_x),
            })
        } else {
            let sign = if cy < oy { -1.0 } else { 1.0 };
            Some(Separation {
                axis: Axis::Y,
                sign,
                depth: push_y.max(pen_y),
            })
        }
    }

    /// Clamps the rectangle inside `bounds`; oversized rectangles are centered.
    pub fn clamp_within(&self, bounds: &Rect) -> Self {
        let x = if self.width >= bounds.width {
            bounds.x + (bounds.width - self.width) / 2.0
        } else {
            self.x.clamp(bounds.x, bounds.right() - self.width)
        };
        let y = if self.height >= bounds.height {
            bounds.y + (bounds.height - self.height) / 2.0
        } else {
            self.y.clamp(bounds.y, bounds.bottom() - self.height)
        };
        Self::new(x, y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub fn unit(self, sign: f32) -> Point {
        match self {
            Axis::X => (sign, 0.0),
            Axis::Y => (0.0, sign),
        }
    }
}

/// Direction (`sign` along `axis`) and distance that move the first
/// rectangle of a [`Rect::separation`] call clear of the second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Separation {
    pub axis: Axis,
    pub sign: f32,
    pub depth: f32,
}

impl Separation {
    pub fn vector(&self) -> Point {
        scale(self.axis.unit(self.sign), self.depth)
    }
}

pub fn add(a: Point, b: Point) -> Point {
    (a.0 + b.0, a.1 + b.1)
}

pub fn sub(a: Point, b: Point) -> Point {
    (a.0 - b.0, a.1 - b.1)
}

pub fn scale(a: Point, s: f32) -> Point {
    (a.0 * s, a.1 * s)
}

pub fn length(a: Point) -> f32 {
    (a.0 * a.0 + a.1 * a.1).sqrt()
}

pub fn dot(a: Point, b: Point) -> f32 {
    a.0 * b.0 + a.1 * b.1
}

pub fn distance(a: Point, b: Point) -> f32 {
    length(sub(b, a))
}

pub fn lerp(a: Point, b: Point, t: f32) -> Point {
    (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t)
}

/// Unit vector, or `None` when `a` is too short to have a direction.
pub fn normalize(a: Point) -> Option<Point> {
    let len = length(a);
    if len <= EPS || !len.is_finite() {
        return None;
    }
    Some((a.0 / len, a.1 / len))
}

pub fn clamp_length(a: Point, max_len: f32) -> Point {
    let len = length(a);
    if len <= max_len || len <= EPS {
        return a;
    }
    scale(a, max_len / len)
}

pub fn is_finite(p: Point) -> bool {
    p.0.is_finite() && p.1.is_finite()
}

pub fn point_segment_distance(point: Point, a: Point, b: Point) -> f32 {
    let d = sub(b, a);
    let len2 = d.0 * d.0 + d.1 * d.1;
    if len2 <= EPS * EPS {
        return distance(point, a);
    }
    let t = (((point.0 - a.0) * d.0 + (point.1 - a.1) * d.1) / len2).clamp(0.0, 1.0);
    distance(point, lerp(a, b, t))
}

/// True when the segment passes through the open interior of `rect`.
/// Segments that only run along an edge or touch a corner do not count.
pub fn segment_crosses_rect(a: Point, b: Point, rect: &Rect) -> bool {
    // Liang–Barsky clip against the rectangle, then require a clipped piece
    // of positive length whose midpoint lies strictly inside.
    let d = sub(b, a);
    let mut t0 = 0.0f32;
    let mut t1 = 1.0f32;
    let checks = [
        (-d.0, a.0 - rect.x),
        (d.0, rect.right() - a.0),
        (-d.1, a.1 - rect.y),
        (d.1, rect.bottom() - a.1),
    ];
    for (p, q) in checks {
        if p.abs() <= 1e-9 {
            if q < 0.0 {
                return false;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return false;
        }
    }
    if (t1 - t0) * length(d) <= EPS {
        return rect.contains(a);
    }
    rect.contains(lerp(a, b, (t0 + t1) * 0.5))
}

/// Total length of a polyline.
pub fn path_length(points: &[Point]) -> f32 {
    points.windows(2).map(|seg| distance(seg[0], seg[1])).sum()
}

/// Point at `fraction` of the arclength, with the direction of the segment
/// it falls on.
pub fn point_at_fraction(points: &[Point], fraction: f32) -> Option<(Point, Point)> {
    if points.len() < 2 {
        return None;
    }
    let total = path_length(points);
    let mut remaining = total * fraction.clamp(0.0, 1.0);
    let mut fallback = None;
    for seg in points.windows(2) {
        let len = distance(seg[0], seg[1]);
        if len <= EPS {
            continue;
        }
        let dir = scale(sub(seg[1], seg[0]), 1.0 / len);
        fallback = Some((seg[1], dir));
        if remaining <= len {
            return Some((lerp(seg[0], seg[1], remaining / len), dir));
        }
        remaining -= len;
    }
    fallback.or(Some((points[0], (1.0, 0.0))))
}

/// Drops repeated points and interior points that continue straight on,
/// keeping the second and second-to-last points (exit and entry) fixed.
pub fn compress_path(points: &[Point]) -> Vec<Point> {
    let mut deduped: Vec<Point> = Vec::with_capacity(points.len());
    for &point in points {
        let repeat = deduped
            .last()
            .is_some_and(|prev: &Point| (point.0 - prev.0).abs() <= EPS && (point.1 - prev.1).abs() <= EPS);
        if !repeat {
            deduped.push(point);
        }
    }
    if deduped.len() <= 3 {
        return deduped;
    }
    let last_idx = deduped.len() - 1;
    let mut out: Vec<Point> = Vec::with_capacity(deduped.len());
    out.push(deduped[0]);
    for idx in 1..last_idx {
        let curr = deduped[idx];
        if idx == 1 || idx == last_idx - 1 {
            out.push(curr);
            continue;
        }
        let prev = out[out.len() - 1];
        let next = deduped[idx + 1];
        let dx1 = curr.0 - prev.0;
        let dy1 = curr.1 - prev.1;
        let dx2 = next.0 - curr.0;
        let dy2 = next.1 - curr.1;
        let same_dir = dx1 * dx2 + dy1 * dy2 > 0.0;
        if same_dir && ((dx1.abs() <= EPS && dx2.abs() <= EPS) || (dy1.abs() <= EPS && dy2.abs() <= EPS))
        {
            continue;
        }
        out.push(curr);
    }
    out.push(deduped[last_idx]);
    out
}

pub fn path_bend_count(points: &[Point]) -> usize {
    if points.len() < 3 {
        return 0;
    }
    let mut bends = 0usize;
    for idx in 1..points.len() - 1 {
        let d1 = sub(points[idx], points[idx - 1]);
        let d2 = sub(points[idx + 1], points[idx]);
        if length(d1) <= EPS || length(d2) <= EPS {
            continue;
        }
        let cross = d1.0 * d2.1 - d1.1 * d2.0;
        if cross.abs() > EPS {
            bends += 1;
        }
    }
    bends
}

pub fn is_axis_aligned(points: &[Point]) -> bool {
    points
        .windows(2)
        .all(|seg| (seg[0].0 - seg[1].0).abs() <= EPS || (seg[0].1 - seg[1].1).abs() <= EPS)
}
