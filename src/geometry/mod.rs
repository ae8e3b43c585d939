#![forbid(unsafe_code)]
//! Spatial primitives: 3-D points, axis-aligned boxes, and the tetrahedron
//! circumcenter used to grow Voronoi MBRs.

use rand::Rng;

/// A point in 3-D space. Coordinates are stored as `f32`, matching the
/// on-disk format; derived measures are computed in `f64`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex(pub [f32; 3]);

impl Vertex {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vertex([x, y, z])
    }

    pub fn x(&self) -> f32 {
        self.0[0]
    }

    pub fn y(&self) -> f32 {
        self.0[1]
    }

    pub fn z(&self) -> f32 {
        self.0[2]
    }
}

impl std::ops::Index<usize> for Vertex {
    type Output = f32;

    fn index(&self, i: usize) -> &f32 {
        &self.0[i]
    }
}

/// An axis-aligned box. A freshly created MBR is *empty* (low above high in
/// every dimension) so that expanding it with the first point initializes
/// all bounds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Box3 {
    pub low: Vertex,
    pub high: Vertex,
}

impl Box3 {
    /// The empty box: the identity element of [`Box3::union`].
    pub const EMPTY: Box3 = Box3 {
        low: Vertex([f32::INFINITY, f32::INFINITY, f32::INFINITY]),
        high: Vertex([f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY]),
    };

    pub fn new(low: Vertex, high: Vertex) -> Self {
        Box3 { low, high }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.low[i] > self.high[i])
    }

    /// True when the two boxes share at least one point. Boundaries count.
    pub fn overlap(a: &Box3, b: &Box3) -> bool {
        (0..3).all(|i| a.low[i] <= b.high[i] && b.low[i] <= a.high[i])
    }

    /// True when `outer` fully contains `inner`.
    pub fn contains(outer: &Box3, inner: &Box3) -> bool {
        !inner.is_empty() && (0..3).all(|i| outer.low[i] <= inner.low[i] && inner.high[i] <= outer.high[i])
    }

    /// True when the point lies inside the box. Boundaries count.
    pub fn contains_point(b: &Box3, p: &Vertex) -> bool {
        (0..3).all(|i| b.low[i] <= p[i] && p[i] <= b.high[i])
    }

    /// Grows the box to include `p`.
    pub fn expand(&mut self, p: &Vertex) {
        for i in 0..3 {
            if p[i] < self.low.0[i] {
                self.low.0[i] = p[i];
            }
            if p[i] > self.high.0[i] {
                self.high.0[i] = p[i];
            }
        }
    }

    /// Grows the box to cover `other`. Empty operands are ignored.
    pub fn union_in_place(&mut self, other: &Box3) {
        if other.is_empty() {
            return;
        }
        self.expand(&other.low);
        self.expand(&other.high);
    }

    pub fn union(a: &Box3, b: &Box3) -> Box3 {
        let mut out = *a;
        out.union_in_place(b);
        out
    }

    /// Volume of the box in `f64`. Empty boxes have zero volume.
    pub fn volume(b: &Box3) -> f64 {
        if b.is_empty() {
            return 0.0;
        }
        (0..3)
            .map(|i| f64::from(b.high[i]) - f64::from(b.low[i]))
            .product()
    }

    pub fn center(&self) -> Vertex {
        Vertex([
            (self.low[0] + self.high[0]) * 0.5,
            (self.low[1] + self.high[1]) * 0.5,
            (self.low[2] + self.high[2]) * 0.5,
        ])
    }

    /// MBR of a set of points.
    pub fn bounding_box_of<'a>(points: impl IntoIterator<Item = &'a Vertex>) -> Box3 {
        let mut out = Box3::EMPTY;
        for p in points {
            out.expand(p);
        }
        out
    }

    /// A random cube of the given target volume placed uniformly inside
    /// `world`. Used only by the workload generator.
    pub fn random_box(world: &Box3, volume: f64, rng: &mut impl Rng) -> Box3 {
        let edge = volume.cbrt() as f32;
        let mut low = [0.0f32; 3];
        let mut high = [0.0f32; 3];
        for i in 0..3 {
            let span = (world.high[i] - world.low[i] - edge).max(0.0);
            let start = world.low[i] + rng.gen::<f32>() * span;
            low[i] = start;
            high[i] = start + edge;
        }
        Box3::new(Vertex(low), Vertex(high))
    }
}

/// Center of the sphere through the four points of a tetrahedron.
///
/// Solves `2 (v_i - a) · x = |v_i|^2 - |a|^2` for `i = b, c, d` by Cramer's
/// rule in `f64`. A (near-)singular system means the tetrahedron is
/// degenerate; the centroid is returned instead so downstream Voronoi MBRs
/// stay finite.
pub fn tet_circumcenter(a: &Vertex, b: &Vertex, c: &Vertex, d: &Vertex) -> Vertex {
    let av = [f64::from(a[0]), f64::from(a[1]), f64::from(a[2])];
    let mut m = [[0.0f64; 3]; 3];
    let mut rhs = [0.0f64; 3];
    for (row, v) in [b, c, d].into_iter().enumerate() {
        let pv = [f64::from(v[0]), f64::from(v[1]), f64::from(v[2])];
        let mut sq = 0.0;
        for i in 0..3 {
            m[row][i] = 2.0 * (pv[i] - av[i]);
            sq += pv[i] * pv[i] - av[i] * av[i];
        }
        rhs[row] = sq;
    }

    let det = det3(&m);
    let scale: f64 = m
        .iter()
        .map(|row| row.iter().map(|x| x.abs()).fold(0.0f64, f64::max))
        .product();
    if det.abs() <= 1e-12 * scale.max(1e-300) {
        return centroid(a, b, c, d);
    }

    let mut out = [0.0f32; 3];
    for col in 0..3 {
        let mut mc = m;
        for row in 0..3 {
            mc[row][col] = rhs[row];
        }
        out[col] = (det3(&mc) / det) as f32;
    }
    Vertex(out)
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn centroid(a: &Vertex, b: &Vertex, c: &Vertex, d: &Vertex) -> Vertex {
    Vertex([
        (a[0] + b[0] + c[0] + d[0]) * 0.25,
        (a[1] + b[1] + c[1] + d[1]) * 0.25,
        (a[2] + b[2] + c[2] + d[2]) * 0.25,
    ])
}
