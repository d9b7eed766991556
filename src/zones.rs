// src/zones.rs
//
// Named polygon zones that gate which plate detections count toward a
// session. A detection only matters while its box center sits inside a
// configured zone; in dual mode the entry zone is checked before the exit
// zone, which is also the tie-break when the two overlap.
//
// Layouts are replaced wholesale (the editor swaps a new ZoneLayout through
// a watch channel), never mutated in place, so the classifier always reads
// consistent geometry.

use crate::types::Point;

/// Fixed set of zone names. Single mode uses `Single`; dual mode uses
/// `Entry` and `Exit`, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Single,
    Entry,
    Exit,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Entry => "entry",
            Self::Exit => "exit",
        }
    }

    /// Direction label that ends up in the read event row.
    pub fn direction_label(&self) -> &'static str {
        match self {
            Self::Single => "-",
            Self::Entry => "IN",
            Self::Exit => "OUT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Zone {
    pub kind: ZoneKind,
    pub points: Vec<Point>,
}

impl Zone {
    pub fn new(kind: ZoneKind, points: Vec<Point>) -> Self {
        Self { kind, points }
    }

    /// Even-odd containment with the boundary counted as inside.
    ///
    /// Self-intersecting polygons are tolerated; parity decides membership
    /// for them. Edge points short-circuit to true before the parity walk.
    pub fn contains(&self, p: Point) -> bool {
        let pts = &self.points;
        let n = pts.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (pts[j], pts[i]);

            if on_segment(p, a, b) {
                return true;
            }

            if (a.y > p.y) != (b.y > p.y) {
                let t = (p.y - a.y) as f64 / (b.y - a.y) as f64;
                let x_cross = a.x as f64 + t * (b.x - a.x) as f64;
                if (p.x as f64) < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Whether `p` lies on the closed segment a-b. Integer exact.
fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross =
        (b.x - a.x) as i64 * (p.y - a.y) as i64 - (b.y - a.y) as i64 * (p.x - a.x) as i64;
    if cross != 0 {
        return false;
    }
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// The active zone set, in classification order.
#[derive(Debug, Clone)]
pub struct ZoneLayout {
    zones: Vec<Zone>,
}

impl ZoneLayout {
    pub fn single(points: Vec<Point>) -> Self {
        Self {
            zones: vec![Zone::new(ZoneKind::Single, points)],
        }
    }

    pub fn dual(entry: Vec<Point>, exit: Vec<Point>) -> Self {
        Self {
            zones: vec![
                Zone::new(ZoneKind::Entry, entry),
                Zone::new(ZoneKind::Exit, exit),
            ],
        }
    }

    pub fn is_dual(&self) -> bool {
        self.zones.len() == 2
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// First zone (in configured order) containing the point, or None.
    pub fn classify(&self, p: Point) -> Option<ZoneKind> {
        self.zones.iter().find(|z| z.contains(p)).map(|z| z.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    #[test]
    fn test_point_inside_zone() {
        let zone = Zone::new(ZoneKind::Single, square(200, 200, 500, 500));
        assert!(zone.contains(Point::new(350, 350)));
        assert!(!zone.contains(Point::new(100, 350)));
        assert!(!zone.contains(Point::new(350, 600)));
    }

    #[test]
    fn test_boundary_counts_as_inside() {
        let zone = Zone::new(ZoneKind::Single, square(200, 200, 500, 500));
        // Edge point
        assert!(zone.contains(Point::new(200, 350)));
        // Corner point
        assert!(zone.contains(Point::new(500, 500)));
        // One pixel out
        assert!(!zone.contains(Point::new(501, 500)));
    }

    #[test]
    fn test_non_convex_polygon() {
        // L-shape: the notch at the top right is outside
        let zone = Zone::new(
            ZoneKind::Single,
            vec![
                Point::new(0, 0),
                Point::new(10, 0),
                Point::new(10, 5),
                Point::new(5, 5),
                Point::new(5, 10),
                Point::new(0, 10),
            ],
        );
        assert!(zone.contains(Point::new(2, 8)));
        assert!(zone.contains(Point::new(8, 2)));
        assert!(!zone.contains(Point::new(8, 8)));
    }

    #[test]
    fn test_classify_none_outside_all() {
        let layout = ZoneLayout::dual(square(50, 200, 300, 500), square(400, 200, 650, 500));
        assert_eq!(layout.classify(Point::new(10, 10)), None);
    }

    #[test]
    fn test_classify_dual_order() {
        let layout = ZoneLayout::dual(square(50, 200, 300, 500), square(400, 200, 650, 500));
        assert_eq!(layout.classify(Point::new(100, 300)), Some(ZoneKind::Entry));
        assert_eq!(layout.classify(Point::new(500, 300)), Some(ZoneKind::Exit));
    }

    #[test]
    fn test_overlap_prefers_entry() {
        // Overlapping zones: entry wins because it is checked first
        let layout = ZoneLayout::dual(square(0, 0, 100, 100), square(50, 0, 150, 100));
        assert_eq!(layout.classify(Point::new(75, 50)), Some(ZoneKind::Entry));
    }

    #[test]
    fn test_degenerate_polygon_rejects_all() {
        let zone = Zone::new(ZoneKind::Single, vec![Point::new(0, 0), Point::new(5, 5)]);
        assert!(!zone.contains(Point::new(2, 2)));
    }
}
