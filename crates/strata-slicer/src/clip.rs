//! Invocation layer over the 2D polygon engine.
//!
//! Every Boolean and offset operation in the pipeline goes through this
//! module. Coordinates cross the boundary unchanged: the engine is driven
//! with the `One` point scaler, so its f64 "unscaled" values coincide with
//! our scaled integer grid.
//!
//! All path sets returned here follow one orientation convention: outer
//! contours wind counter-clockwise (positive area), holes clockwise, and
//! nesting alternates. Consumers rely on this for hole tests, exposed-surface
//! checks and island extraction.

use clipper2::{EndType, FillRule, JoinType, One, Paths as ClipPaths, Point as ClipPoint};

use crate::config::{Config, FillKind, JoinStyle};
use crate::geom::{self, Path, PathSet, Point};

fn to_clipper(paths: &[Path]) -> ClipPaths<One> {
    ClipPaths::new(
        paths
            .iter()
            .map(|p| {
                clipper2::Path::new(
                    p.iter().map(|pt| ClipPoint::from_scaled(pt.x, pt.y)).collect(),
                )
            })
            .collect(),
    )
}

fn from_clipper(paths: &ClipPaths<One>) -> PathSet {
    paths
        .iter()
        .map(|p| p.iter().map(|pt| Point::new(pt.x_scaled(), pt.y_scaled())).collect())
        .collect()
}

fn join_type(style: JoinStyle) -> JoinType {
    match style {
        JoinStyle::Miter => JoinType::Miter,
        JoinStyle::Square => JoinType::Square,
        JoinStyle::Round => JoinType::Round,
    }
}

fn fill_rule(kind: FillKind) -> FillRule {
    match kind {
        FillKind::EvenOdd => FillRule::EvenOdd,
        FillKind::NonZero => FillRule::NonZero,
        FillKind::Positive => FillRule::Positive,
        FillKind::Negative => FillRule::Negative,
    }
}

/// Re-establish the crate-wide orientation convention: rings at even nesting
/// depth counter-clockwise, odd depth clockwise.
fn orient_rings(mut paths: PathSet) -> PathSet {
    paths.retain(|p| p.len() >= 3);
    let depths: Vec<usize> = paths
        .iter()
        .enumerate()
        .map(|(i, ring)| {
            paths
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != i && geom::point_in_polygon(ring[0], other))
                .count()
        })
        .collect();
    for (ring, depth) in paths.iter_mut().zip(depths) {
        let ccw = geom::is_ccw(ring);
        if ccw == (depth % 2 == 1) {
            ring.reverse();
        }
    }
    paths
}

fn finish(result: Result<ClipPaths<One>, clipper2::ClipperError>) -> PathSet {
    match result {
        Ok(paths) => orient_rings(from_clipper(&paths)),
        Err(err) => {
            log::warn!("polygon engine error: {err}; dropping operand");
            Vec::new()
        }
    }
}

/// Union `paths` with itself under `rule`, producing a strictly simple,
/// consistently oriented ring set.
pub fn union_all(paths: &PathSet, rule: FillKind) -> PathSet {
    if paths.is_empty() {
        return Vec::new();
    }
    finish(clipper2::union(to_clipper(paths), ClipPaths::new(Vec::new()), fill_rule(rule)))
}

/// Union of two region sets (non-zero rule).
pub fn union(subject: &PathSet, clip: &PathSet) -> PathSet {
    if subject.is_empty() {
        return union_all(clip, FillKind::NonZero);
    }
    finish(clipper2::union(to_clipper(subject), to_clipper(clip), FillRule::NonZero))
}

/// `subject` minus `clip` (non-zero rule).
pub fn difference(subject: &PathSet, clip: &PathSet) -> PathSet {
    if subject.is_empty() {
        return Vec::new();
    }
    if clip.is_empty() {
        return union_all(subject, FillKind::NonZero);
    }
    finish(clipper2::difference(to_clipper(subject), to_clipper(clip), FillRule::NonZero))
}

/// `subject` intersected with `clip` (non-zero rule).
pub fn intersection(subject: &PathSet, clip: &PathSet) -> PathSet {
    if subject.is_empty() || clip.is_empty() {
        return Vec::new();
    }
    finish(clipper2::intersect(to_clipper(subject), to_clipper(clip), FillRule::NonZero))
}

fn inflate(
    cfg: &Config,
    src: &PathSet,
    delta_scaled: f64,
    join: JoinStyle,
) -> PathSet {
    if src.is_empty() {
        return Vec::new();
    }
    let result = to_clipper(src).inflate(
        delta_scaled,
        join_type(join),
        EndType::Polygon,
        cfg.offset_miter_limit,
    );
    orient_rings(from_clipper(&result))
}

/// Offset closed regions by `dist` model units. Positive distances grow the
/// filled region using the configured outset join, negative distances shrink
/// it using the inset join. A non-zero `overlap_removal_ratio` applies the
/// two-step offset that erases features narrower than that fraction of the
/// extrusion width.
pub fn offset(cfg: &Config, src: &PathSet, dist: f64, overlap_removal_ratio: f64) -> PathSet {
    let (join, back_join) = if dist > 0.0 {
        (cfg.outset_join_type, cfg.inset_join_type)
    } else {
        (cfg.inset_join_type, cfg.outset_join_type)
    };
    offset_with(cfg, src, dist, overlap_removal_ratio, join, back_join)
}

/// Offset with square joins in both directions. Used where mitered spikes
/// would push support or brim geometry into the model.
pub fn offset_square(cfg: &Config, src: &PathSet, dist: f64, overlap_removal_ratio: f64) -> PathSet {
    offset_with(cfg, src, dist, overlap_removal_ratio, JoinStyle::Square, JoinStyle::Square)
}

fn offset_with(
    cfg: &Config,
    src: &PathSet,
    dist: f64,
    overlap_removal_ratio: f64,
    join: JoinStyle,
    back_join: JoinStyle,
) -> PathSet {
    if overlap_removal_ratio > 0.0 {
        let extra = if dist > 0.0 {
            cfg.extrusion_width * overlap_removal_ratio / 2.0
        } else {
            cfg.extrusion_width * overlap_removal_ratio / -2.0
        };
        let tmp = inflate(cfg, src, cfg.scale_constant * (dist + extra), join);
        inflate(cfg, &tmp, cfg.scale_constant * -extra, back_join)
    } else {
        inflate(cfg, src, cfg.scale_constant * dist, join)
    }
}

/// Shrink-then-grow round trip that drops features narrower than `ratio`
/// extrusion widths while leaving the rest unchanged.
pub fn remove_overlap(cfg: &Config, src: &PathSet, ratio: f64) -> PathSet {
    let tmp = inflate(
        cfg,
        src,
        cfg.scale_constant * cfg.extrusion_width * ratio / -2.0,
        cfg.inset_join_type,
    );
    inflate(cfg, &tmp, cfg.scale_constant * cfg.extrusion_width * ratio / 2.0, cfg.outset_join_type)
}

/// One node of a nested contour forest. Children of an outer contour are its
/// holes; children of a hole are contours nested inside it.
#[derive(Debug, Clone, Default)]
pub struct PolyNode {
    /// The node's ring.
    pub contour: Path,
    /// Immediate descendants.
    pub children: Vec<PolyNode>,
}

/// Build a nesting forest from a simple ring set. Input rings must be
/// non-overlapping (the output of a Boolean operation); orientation is
/// normalized per depth.
pub fn build_tree(rings: PathSet) -> Vec<PolyNode> {
    let rings: Vec<Path> = rings.into_iter().filter(|r| r.len() >= 3).collect();
    let n = rings.len();
    let mut order: Vec<usize> = (0..n).collect();
    let areas: Vec<i128> = rings.iter().map(|r| geom::signed_area_2x(r).abs()).collect();
    order.sort_by(|&a, &b| areas[b].cmp(&areas[a]));

    // parent[i]: containing ring with the smallest area, if any.
    let mut parent: Vec<Option<usize>> = vec![None; n];
    for (pos, &i) in order.iter().enumerate() {
        for &j in order[..pos].iter().rev() {
            if areas[j] >= areas[i] && geom::point_in_polygon(rings[i][0], &rings[j]) {
                parent[i] = Some(j);
                break;
            }
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut roots: Vec<usize> = Vec::new();
    for i in 0..n {
        match parent[i] {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
    }

    fn build(i: usize, depth: usize, rings: &[Path], children: &[Vec<usize>]) -> PolyNode {
        let mut contour = rings[i].clone();
        if geom::is_ccw(&contour) == (depth % 2 == 1) {
            contour.reverse();
        }
        PolyNode {
            contour,
            children: children[i]
                .iter()
                .map(|&c| build(c, depth + 1, rings, children))
                .collect(),
        }
    }

    roots.into_iter().map(|r| build(r, 0, &rings, &children)).collect()
}

/// Clip open 2-point pattern lines against a closed region. Returns the
/// sub-segments that lie inside, as 2-point paths.
pub fn clip_lines(lines: &PathSet, region: &PathSet) -> PathSet {
    if region.is_empty() {
        return Vec::new();
    }
    let mut out = PathSet::new();
    for line in lines {
        if line.len() != 2 || line[0] == line[1] {
            continue;
        }
        let p0 = line[0];
        let p1 = line[1];
        let dx = (p1.x - p0.x) as f64;
        let dy = (p1.y - p0.y) as f64;
        let mut ts: Vec<f64> = vec![0.0, 1.0];
        for ring in region {
            let n = ring.len();
            for k in 0..n {
                let a = ring[k];
                let b = ring[(k + 1) % n];
                let ex = (b.x - a.x) as f64;
                let ey = (b.y - a.y) as f64;
                let denom = dx * ey - dy * ex;
                if denom == 0.0 {
                    continue;
                }
                let ax = (a.x - p0.x) as f64;
                let ay = (a.y - p0.y) as f64;
                let t = (ax * ey - ay * ex) / denom;
                let s = (ax * dy - ay * dx) / denom;
                if (-1e-12..=1.0 + 1e-12).contains(&s) && t > 0.0 && t < 1.0 {
                    ts.push(t);
                }
            }
        }
        ts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        ts.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        for w in ts.windows(2) {
            let (t0, t1) = (w[0], w[1]);
            let tm = (t0 + t1) / 2.0;
            let mid = Point::new(
                p0.x + (tm * dx).round() as i64,
                p0.y + (tm * dy).round() as i64,
            );
            if geom::point_in_region(mid, region) {
                let q0 = Point::new(
                    p0.x + (t0 * dx).round() as i64,
                    p0.y + (t0 * dy).round() as i64,
                );
                let q1 = Point::new(
                    p0.x + (t1 * dx).round() as i64,
                    p0.y + (t1 * dy).round() as i64,
                );
                if q0 != q1 {
                    out.push(vec![q0, q1]);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: i64, y0: i64, size: i64) -> Path {
        vec![
            Point::new(x0, y0),
            Point::new(x0 + size, y0),
            Point::new(x0 + size, y0 + size),
            Point::new(x0, y0 + size),
        ]
    }

    fn cfg() -> Config {
        let mut c = Config { scale_constant: 1000.0, ..Config::default() };
        c.resolve().unwrap();
        c
    }

    fn area(paths: &PathSet) -> f64 {
        paths.iter().map(|p| geom::signed_area_2x(p) as f64 / 2.0).sum()
    }

    #[test]
    fn test_union_merges_overlap() {
        let a = vec![square(0, 0, 1000)];
        let b = vec![square(500, 0, 1000)];
        let u = union(&a, &b);
        assert_eq!(u.len(), 1);
        assert!((area(&u) - 1_500_000.0).abs() < 1000.0);
        assert!(geom::is_ccw(&u[0]));
    }

    #[test]
    fn test_difference_cuts_hole() {
        let outer = vec![square(0, 0, 1000)];
        let inner = vec![square(250, 250, 500)];
        let d = difference(&outer, &inner);
        assert_eq!(d.len(), 2);
        // Net area = outer minus hole.
        assert!((area(&d) - 750_000.0).abs() < 1000.0);
        // One CCW outer, one CW hole.
        let ccw = d.iter().filter(|p| geom::is_ccw(p)).count();
        assert_eq!(ccw, 1);
    }

    #[test]
    fn test_offset_grows_and_shrinks() {
        let c = cfg();
        let sq = vec![square(0, 0, 10_000)];
        let grown = offset(&c, &sq, 1.0, 0.0); // +1 unit = +1000 scaled
        assert!(area(&grown) > area(&sq));
        let shrunk = offset(&c, &sq, -1.0, 0.0);
        assert!((area(&shrunk) - 8000.0 * 8000.0).abs() < 100_000.0);
        // Offsetting away more than the half-width empties the set.
        let gone = offset(&c, &sq, -6.0, 0.0);
        assert!(gone.is_empty());
    }

    #[test]
    fn test_offset_round_trip_contained() {
        let c = cfg();
        let sq = vec![square(0, 0, 10_000)];
        let rt = offset(&c, &offset(&c, &sq, 2.0, 0.0), -2.0, 0.0);
        // Round trip stays within the original square (plus join tolerance).
        for ring in &rt {
            for p in ring {
                assert!(p.x >= -10 && p.x <= 10_010);
                assert!(p.y >= -10 && p.y <= 10_010);
            }
        }
    }

    #[test]
    fn test_remove_overlap_drops_slivers() {
        let c = cfg();
        // 0.1 unit wide sliver: passes through untouched only if wider than
        // the removal band (0.45 * 1.0 = one extrusion width).
        let sliver = vec![vec![
            Point::new(0, 0),
            Point::new(10_000, 0),
            Point::new(10_000, 100),
            Point::new(0, 100),
        ]];
        assert!(remove_overlap(&c, &sliver, 1.0).is_empty());
        let wide = vec![square(0, 0, 10_000)];
        assert!(!remove_overlap(&c, &wide, 1.0).is_empty());
    }

    #[test]
    fn test_build_tree_nesting() {
        let outer = square(0, 0, 1000);
        let mut hole = square(200, 200, 600);
        hole.reverse();
        let mut nested = square(400, 400, 200);
        let tree = build_tree(vec![outer, hole, nested.clone()]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].children.len(), 1);
        assert!(geom::is_ccw(&tree[0].contour));
        assert!(!geom::is_ccw(&tree[0].children[0].contour));
        assert!(geom::is_ccw(&tree[0].children[0].children[0].contour));
        // Orientation is normalized regardless of input winding.
        nested.reverse();
        let tree2 = build_tree(vec![square(0, 0, 1000), nested]);
        assert!(!geom::is_ccw(&tree2[0].children[0].contour));
    }

    #[test]
    fn test_clip_lines_respects_holes() {
        let outer = square(0, 0, 1000);
        let region = difference(&vec![outer], &vec![square(400, 250, 200)]);
        // Horizontal line through the hole band.
        let lines = vec![vec![Point::new(-100, 350), Point::new(1100, 350)]];
        let clipped = clip_lines(&lines, &region);
        assert_eq!(clipped.len(), 2);
        for seg in &clipped {
            let mid = Point::new((seg[0].x + seg[1].x) / 2, (seg[0].y + seg[1].y) / 2);
            assert!(geom::point_in_region(mid, &region));
        }
        // A line missing the region entirely clips to nothing.
        let outside = vec![vec![Point::new(-100, 2000), Point::new(1100, 2000)]];
        assert!(clip_lines(&outside, &region).is_empty());
    }
}
