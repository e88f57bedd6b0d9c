//! Path planning: orders islands, shells and infill, tracks machine state,
//! plans retract-aware travels with combing, and emits the abstract move
//! stream for each layer.

use std::f64::consts::FRAC_PI_4;

use crate::config::Config;
use crate::geom::{self, Path, PathSet, Point};
use crate::mesh::BuildArea;
use crate::slice::{Island, Layer};

/// Empirical distance limit (in extrusion widths) for connecting two
/// anti-parallel solid infill lines without a travel.
const CONNECT_DIST_FACTOR: f64 = 3.864;

/// One abstract motion command.
#[derive(Debug, Clone, Copy, Default)]
pub struct GMove {
    /// Target X, scaled units.
    pub x: i64,
    /// Target Y, scaled units.
    pub y: i64,
    /// Target Z, scaled units.
    pub z: i64,
    /// Extruded length delta, model units.
    pub e: f64,
    /// Feed rate, model units per second.
    pub feed_rate: f64,
    /// Participates in layer-time feed scaling.
    pub scalable: bool,
    /// No extrusion.
    pub is_travel: bool,
    /// Pure E-axis re-prime.
    pub is_restart: bool,
}

/// Extruder state tracked during planning and export.
#[derive(Debug, Clone, Copy, Default)]
pub struct Machine {
    /// Current X, scaled units.
    pub x: i64,
    /// Current Y, scaled units.
    pub y: i64,
    /// Current Z, scaled units.
    pub z: i64,
    /// Accumulated extrusion, model units.
    pub e: f64,
    /// Last commanded feed rate.
    pub feed_rate: f64,
    /// Material is withdrawn; extrusion is illegal until a restart.
    pub is_retracted: bool,
    /// Latch forcing a retract on the next travel.
    pub force_retract: bool,
}

fn get_boundary_crossing(p: &Path, p0: Point, p1: Point) -> Option<usize> {
    for i in 1..p.len() {
        if geom::segments_intersect(p[i - 1], p[i], p0, p1) {
            return Some(i - 1);
        }
    }
    if !p.is_empty() && geom::segments_intersect(p[p.len() - 1], p[0], p0, p1) {
        return Some(p.len() - 1);
    }
    None
}

fn crosses_boundary(m: &Machine, bounds: &PathSet, x: i64, y: i64) -> Option<usize> {
    let p0 = Point::new(m.x, m.y);
    let p1 = Point::new(x, y);
    bounds.iter().position(|b| get_boundary_crossing(b, p0, p1).is_some())
}

/// Whether the segment crosses (or lies on) the island's exposed top
/// surface.
fn crosses_exposed_surface(island: &Island, p0: Point, p1: Point) -> bool {
    let mut in_outer = false;
    for p in &island.exposed_surface {
        if get_boundary_crossing(p, p0, p1).is_some() {
            return true;
        } else if geom::point_in_polygon(p0, p) || geom::point_in_polygon(p1, p) {
            if !geom::is_ccw(p) {
                // Both endpoints sit in a hole of the exposed region.
                return false;
            }
            in_outer = true;
        }
    }
    in_outer
}

/// Nearest segment of the closed path, then the nearer endpoint of that
/// segment. Distance is returned in model units.
fn nearest_vertex_on_closed_path(p: &Path, pt: Point, cfg: &Config) -> (usize, f64) {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for i in 0..p.len() {
        let i2 = (i + 1) % p.len();
        let dist = geom::distance_to_line(pt, p[i], p[i2]);
        if dist < best_dist {
            best_dist = dist;
            best = if geom::distance_to_point(pt, p[i]) < geom::distance_to_point(pt, p[i2]) {
                i
            } else {
                i2
            };
        }
    }
    (best, geom::distance_to_point(pt, p[best]) / cfg.scale_constant)
}

/// Nearest vertex over a whole path set. Returns (path, vertex, distance in
/// model units).
fn find_nearest_path(paths: &PathSet, x: i64, y: i64, cfg: &Config) -> (usize, usize, f64) {
    let mut best = (0usize, 0usize);
    let mut best_dist = f64::INFINITY;
    for (i, p) in paths.iter().enumerate() {
        for (k, pt) in p.iter().enumerate() {
            let dx = (pt.x - x) as f64;
            let dy = (pt.y - y) as f64;
            let dist = dx * dx + dy * dy;
            if dist < best_dist {
                best_dist = dist;
                best = (i, k);
            }
        }
    }
    (best.0, best.1, best_dist.sqrt() / cfg.scale_constant)
}

/// Nearest path judged by its seam (first) vertex only.
fn find_nearest_aligned_path(paths: &PathSet, x: i64, y: i64, cfg: &Config) -> (usize, f64) {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, p) in paths.iter().enumerate() {
        let dx = (p[0].x - x) as f64;
        let dy = (p[0].y - y) as f64;
        let dist = dx * dx + dy * dy;
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    (best, best_dist.sqrt() / cfg.scale_constant)
}

/// Nearest 2-point line; `flip` is set when its far end is the closer one.
/// Distance is to the nearer endpoint, in model units.
fn find_nearest_segment(lines: &PathSet, x: i64, y: i64, cfg: &Config) -> (usize, f64, bool) {
    let pt = Point::new(x, y);
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, p) in lines.iter().enumerate() {
        debug_assert_eq!(p.len(), 2);
        let dist = geom::distance_to_line(pt, p[0], p[1]);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    let dist0 = geom::distance_to_point(pt, lines[best][0]);
    let dist1 = geom::distance_to_point(pt, lines[best][1]);
    let flip = dist0 > dist1;
    (best, dist0.min(dist1) / cfg.scale_constant, flip)
}

/// Arc length along a closed path from `start` to `end`, walking forward or
/// backward. Model units.
fn partial_path_len(p: &Path, start: usize, end: usize, reverse: bool, cfg: &Config) -> f64 {
    let mut l = 0.0;
    let mut prev = p[start];
    let mut i = start;
    loop {
        if reverse {
            i = if i > 0 { i - 1 } else { p.len() - 1 };
        } else {
            i = if i < p.len() - 1 { i + 1 } else { 0 };
        }
        l += geom::distance_to_point(prev, p[i]);
        prev = p[i];
        if i == end {
            break;
        }
    }
    l / cfg.scale_constant
}

/// Counts proper crossings of the closed path by `p0`-`p1`; a single touch
/// does not count. Also reports the nearest crossed edge's distance from
/// `p0` in model units.
fn crosses_boundary_2pt(p: &Path, p0: Point, p1: Point, cfg: &Config) -> (bool, f64) {
    let mut best_dist = f64::INFINITY;
    let mut intersections = 0usize;
    let mut k = 0;
    while k < p.len() {
        let k2 = if k == 0 { p.len() - 1 } else { k - 1 };
        if geom::segments_intersect(p[k2], p[k], p0, p1) {
            let dist = geom::distance_to_line(p0, p[k2], p[k]);
            if dist < best_dist {
                best_dist = dist;
            }
            intersections += 1;
            if p[k] == p0 || p[k] == p1 {
                // Skip the shared vertex so it is not counted twice.
                k += 1;
            }
        }
        k += 1;
    }
    (intersections > 1, best_dist / cfg.scale_constant)
}

/// The obstacle (if any) crossed by the straight line, nearest first.
fn nearest_boundary_crossing_2pt(
    bounds: &PathSet,
    p0: Point,
    p1: Point,
    cfg: &Config,
) -> Option<usize> {
    let mut best_dist = f64::INFINITY;
    let mut best = None;
    for (i, b) in bounds.iter().enumerate() {
        let (crossed, dist) = crosses_boundary_2pt(b, p0, p1, cfg);
        if crossed && dist < best_dist {
            best = Some(i);
            best_dist = dist;
        }
    }
    best
}

/// Starting from `end_idx` and walking back toward `start_idx`, the first
/// boundary vertex reachable from `p0` without crossing any obstacle.
fn find_best_travel_point(
    bounds: &PathSet,
    b_idx: usize,
    p0: Point,
    start_idx: usize,
    end_idx: usize,
    reverse: bool,
    cfg: &Config,
) -> usize {
    let p = &bounds[b_idx];
    let mut i = end_idx;
    let mut r;
    loop {
        r = i;
        if nearest_boundary_crossing_2pt(bounds, p0, p[i], cfg).is_none() {
            return i;
        }
        if reverse {
            i = if i < p.len() - 1 { i + 1 } else { 0 };
        } else {
            i = if i > 0 { i - 1 } else { p.len() - 1 };
        }
        if i == start_idx {
            return r;
        }
    }
}

fn path_len_is_greater_than(p: &Path, len: f64, cfg: &Config) -> bool {
    let mut l = 0.0;
    let limit = len * cfg.scale_constant;
    for i in 1..p.len() {
        l += geom::distance_to_point(p[i - 1], p[i]);
        if l > limit {
            return true;
        }
    }
    l += geom::distance_to_point(p[p.len() - 1], p[0]);
    l > limit
}

/// Cut `clip` model units off the end of the path. The last point must be
/// the true end (closed paths carry a duplicated first point). Removed
/// points are collected in order into `clipped`.
fn clip_path_from_end(p: &mut Path, mut clipped: Option<&mut Path>, clip: f64, cfg: &Config) {
    let mut prev = *p.last().unwrap();
    let mut l = 0.0;
    loop {
        if let Some(out) = clipped.as_deref_mut() {
            out.push(*p.last().unwrap());
        }
        p.pop();
        let last = *p.last().unwrap();
        let xv = cfg.unscale(last.x - prev.x);
        let yv = cfg.unscale(last.y - prev.y);
        let norm = (xv * xv + yv * yv).sqrt();
        l += norm;
        if l == clip {
            break;
        } else if l > clip {
            let new_x = cfg.unscale(last.x) - (l - clip) * (xv / norm);
            let new_y = cfg.unscale(last.y) - (l - clip) * (yv / norm);
            p.push(Point::new(cfg.scale(new_x), cfg.scale(new_y)));
            break;
        }
        prev = last;
    }
    if let Some(out) = clipped {
        out.reverse();
    }
}

/// Per-layer planner. Owns the machine and the transient comb state; the
/// finished move list is written back into the layer.
pub struct Planner<'a> {
    cfg: &'a Config,
    m: Machine,
    moves: Vec<GMove>,
    layer_time: f64,
    last_boundaries: PathSet,
    last_comb_paths: PathSet,
    printed_outer_boundaries: PathSet,
    printed_outer_comb_paths: PathSet,
}

impl<'a> Planner<'a> {
    /// A planner parked at the lower-left corner of the extended build
    /// area, primed but flagged as retracted so the first extrusion
    /// restarts explicitly.
    pub fn new(cfg: &'a Config, area: &BuildArea) -> Self {
        Self {
            cfg,
            m: Machine {
                x: cfg.scale(area.x0),
                y: cfg.scale(area.y0),
                z: 0,
                e: 0.0,
                feed_rate: 0.0,
                is_retracted: true,
                force_retract: false,
            },
            moves: Vec::new(),
            layer_time: 0.0,
            last_boundaries: PathSet::new(),
            last_comb_paths: PathSet::new(),
            printed_outer_boundaries: PathSet::new(),
            printed_outer_comb_paths: PathSet::new(),
        }
    }

    fn append(&mut self, mv: GMove, len: f64) {
        self.layer_time += len / mv.feed_rate;
        self.moves.push(mv);
    }

    fn do_retract(&mut self) {
        if !self.m.is_retracted && self.cfg.retract_len > 0.0 {
            let mv = GMove {
                x: self.m.x,
                y: self.m.y,
                z: self.m.z,
                e: -self.cfg.retract_len,
                feed_rate: self.cfg.retract_speed,
                scalable: false,
                is_travel: false,
                is_restart: false,
            };
            self.append(mv, self.cfg.retract_len);
            self.m.is_retracted = true;
        }
    }

    fn append_linear_travel(&mut self, x: i64, y: i64, z: i64, feed_rate: f64) {
        if x != self.m.x || y != self.m.y || z != self.m.z {
            let dx = self.cfg.unscale(x - self.m.x);
            let dy = self.cfg.unscale(y - self.m.y);
            let dz = self.cfg.unscale(z - self.m.z);
            let len = (dx * dx + dy * dy + dz * dz).sqrt();
            let mv = GMove {
                x,
                y,
                z,
                e: 0.0,
                feed_rate,
                scalable: false,
                is_travel: true,
                is_restart: false,
            };
            self.append(mv, len);
            self.m.x = x;
            self.m.y = y;
            self.m.z = z;
        }
    }

    fn append_comb_move(
        &mut self,
        island: Option<&Island>,
        comb_moves: &mut Path,
        p0: Point,
        p1: Point,
        force_retract: &mut bool,
    ) -> f64 {
        if !*force_retract && !self.m.is_retracted {
            if let Some(island) = island {
                if crosses_exposed_surface(island, p0, p1) {
                    *force_retract = true;
                }
            }
        }
        comb_moves.push(p1);
        geom::distance_to_point(p0, p1) / self.cfg.scale_constant
    }

    /// Travel from the machine position to `(x, y)` walking along comb
    /// paths around obstacles. Falls back to retract-and-direct when no
    /// progress can be made.
    fn combed_travel(
        &mut self,
        island: Option<&Island>,
        bounds: PathSet,
        paths: &PathSet,
        x: i64,
        y: i64,
        feed_rate: f64,
        retract_threshold: f64,
    ) {
        if x == self.m.x || y == self.m.y || paths.is_empty() {
            return;
        }
        let cfg = self.cfg;
        let mut b = bounds;
        let mut last_bound_idx: Option<usize> = None;
        let mut closest_dist = f64::INFINITY;
        let mut comb_dist = 0.0;
        let mut p0 = Point::new(self.m.x, self.m.y);
        let p1 = Point::new(x, y);
        let mut comb_moves = Path::new();
        let mut force_retract = false;

        while !b.is_empty() {
            let Some(bound_idx) = nearest_boundary_crossing_2pt(&b, p0, p1, cfg) else {
                // No more crossings; move directly.
                break;
            };
            if Some(bound_idx) == last_bound_idx {
                b.remove(bound_idx);
                last_bound_idx = None;
                force_retract = true;
                log::debug!("combing made no progress at z = {}", cfg.unscale(self.m.z));
                continue;
            }
            let p = b[bound_idx].clone();
            let (start_idx, _) = nearest_vertex_on_closed_path(&p, p0, cfg);
            let (end_idx, _) = nearest_vertex_on_closed_path(&p, p1, cfg);
            if geom::distance_to_point(p[end_idx], p1) >= closest_dist {
                b.remove(bound_idx);
                last_bound_idx = None;
                force_retract = true;
                log::debug!("combing indirection dropped at z = {}", cfg.unscale(self.m.z));
                continue;
            }
            if start_idx == end_idx {
                let (pi, pk, _) = find_nearest_path(paths, p[end_idx].x, p[end_idx].y, cfg);
                comb_dist += self.append_comb_move(
                    island,
                    &mut comb_moves,
                    p0,
                    paths[pi][pk],
                    &mut force_retract,
                );
                p0 = paths[pi][pk];
            } else {
                let f_len = partial_path_len(&p, start_idx, end_idx, false, cfg);
                let r_len = partial_path_len(&p, start_idx, end_idx, true, cfg);
                let reverse = r_len < f_len;
                // One point back from the start so all relevant edges get
                // checked.
                let mut i = if reverse {
                    if start_idx < p.len() - 1 {
                        start_idx + 1
                    } else {
                        0
                    }
                } else if start_idx > 0 {
                    start_idx - 1
                } else {
                    p.len() - 1
                };
                loop {
                    i = find_best_travel_point(&b, bound_idx, p0, i, end_idx, reverse, cfg);
                    let (pi, pk, _) = find_nearest_path(paths, p[i].x, p[i].y, cfg);
                    comb_dist += self.append_comb_move(
                        island,
                        &mut comb_moves,
                        p0,
                        paths[pi][pk],
                        &mut force_retract,
                    );
                    p0 = paths[pi][pk];
                    if !crosses_boundary_2pt(&p, p0, p1, cfg).0
                        && geom::distance_to_point(p0, p1) < closest_dist
                    {
                        break;
                    }
                    if i == end_idx {
                        break;
                    }
                }
            }
            let dist = geom::distance_to_point(p0, p1);
            if dist >= closest_dist {
                b.remove(bound_idx);
                last_bound_idx = None;
                force_retract = true;
                log::debug!("combing ended up farther away at z = {}", cfg.unscale(self.m.z));
            } else {
                closest_dist = dist;
                last_bound_idx = Some(bound_idx);
            }
        }
        comb_dist += geom::distance_to_point(p0, p1) / cfg.scale_constant;
        if force_retract || comb_dist >= retract_threshold {
            self.do_retract();
        }
        for pt in comb_moves {
            self.append_linear_travel(pt.x, pt.y, self.m.z, feed_rate);
        }
    }

    /// Move to the exit point of the island just printed: the comb-path
    /// vertex nearest the travel target.
    fn move_to_island_exit(&mut self, x: i64, y: i64, feed_rate: f64) {
        let (pi, pk, _) = find_nearest_path(&self.last_comb_paths, x, y, self.cfg);
        let point = self.last_comb_paths[pi][pk];
        let bounds = self.last_boundaries.clone();
        let paths = self.last_comb_paths.clone();
        self.combed_travel(None, bounds, &paths, point.x, point.y, feed_rate, 0.0);
        self.append_linear_travel(point.x, point.y, self.m.z, feed_rate);
    }

    /// The planner's single gate for motion: travels decide retraction and
    /// combing here; extrusion moves restart the material when needed.
    #[allow(clippy::too_many_arguments)]
    fn linear_move(
        &mut self,
        island: Option<&Island>,
        x: i64,
        y: i64,
        z: i64,
        mut extra_e_len: f64,
        feed_rate: f64,
        flow_adjust: f64,
        scalable: bool,
        is_travel: bool,
        doing_infill: bool,
    ) {
        let cfg = self.cfg;
        let dx = cfg.unscale(x - self.m.x);
        let dy = cfg.unscale(y - self.m.y);
        let dz = cfg.unscale(z - self.m.z);
        let len = (dx * dx + dy * dy + dz * dz).sqrt();
        let mut mv = GMove {
            x,
            y,
            z,
            e: 0.0,
            feed_rate,
            scalable,
            is_travel,
            is_restart: false,
        };
        if is_travel {
            let retract_threshold = if doing_infill && !cfg.retract_within_island {
                cfg.retract_threshold
            } else {
                cfg.retract_min_travel
            };
            if self.m.force_retract {
                self.do_retract();
            }
            if z == self.m.z && cfg.comb {
                if !self.last_boundaries.is_empty() {
                    // Leaving the previous island: exit along its comb
                    // paths, then comb between islands.
                    self.do_retract();
                    if !self.last_comb_paths.is_empty() {
                        self.move_to_island_exit(x, y, feed_rate);
                    }
                    self.last_boundaries.clear();
                    self.last_comb_paths.clear();
                    let bounds = self.printed_outer_boundaries.clone();
                    let paths = self.printed_outer_comb_paths.clone();
                    self.combed_travel(island, bounds, &paths, x, y, feed_rate, retract_threshold);
                } else if let Some(isl) = island {
                    let bounds = isl.boundaries.clone();
                    self.combed_travel(
                        island,
                        bounds,
                        &isl.comb_paths,
                        x,
                        y,
                        feed_rate,
                        retract_threshold,
                    );
                } else {
                    let bounds = self.printed_outer_boundaries.clone();
                    let paths = self.printed_outer_comb_paths.clone();
                    self.combed_travel(island, bounds, &paths, x, y, feed_rate, retract_threshold);
                }
            } else if !self.m.is_retracted
                && cfg.retract_len > 0.0
                && (!self.last_boundaries.is_empty()
                    || len > retract_threshold
                    || island
                        .map(|isl| crosses_boundary(&self.m, &isl.boundaries, x, y).is_some())
                        .unwrap_or(false)
                    || island
                        .map(|isl| {
                            len > cfg.extrusion_width * 2.0
                                && crosses_exposed_surface(
                                    isl,
                                    Point::new(self.m.x, self.m.y),
                                    Point::new(x, y),
                                )
                        })
                        .unwrap_or(false))
            {
                self.do_retract();
            }
        } else {
            if self.m.is_retracted && cfg.retract_len > 0.0 {
                let mut restart = GMove {
                    x: self.m.x,
                    y: self.m.y,
                    z: self.m.z,
                    e: cfg.retract_len,
                    feed_rate: cfg.restart_speed,
                    scalable: false,
                    is_travel: false,
                    is_restart: true,
                };
                if cfg.extra_restart_len < 0.0 {
                    restart.e += cfg.extra_restart_len;
                } else {
                    extra_e_len += cfg.extra_restart_len;
                }
                let restart_len = restart.e;
                self.append(restart, restart_len);
                self.m.is_retracted = false;
            }
            mv.e = len * cfg.extrusion_area * cfg.flow_multiplier * flow_adjust / cfg.material_area;
        }
        if extra_e_len != 0.0 {
            let restart = GMove {
                x: self.m.x,
                y: self.m.y,
                z: self.m.z,
                e: extra_e_len,
                feed_rate: feed_rate * cfg.extrusion_area / cfg.material_area,
                scalable: true,
                is_travel: false,
                is_restart: true,
            };
            self.append(restart, extra_e_len.abs());
        }
        if x != self.m.x || y != self.m.y || z != self.m.z || mv.e != 0.0 {
            self.append(mv, len);
            self.m.x = x;
            self.m.y = y;
            self.m.z = z;
        }
        self.m.force_retract = false;
    }

    /// Spread the retraction over travel along the loop, emitting negative-E
    /// moves until `retract_len` is consumed. Returns the index where the
    /// retract finished.
    fn moving_retract(&mut self, p: &Path, z: i64, start_idx: usize, feed_rate: f64) -> usize {
        let cfg = self.cfg;
        let len_ratio = cfg.moving_retract_speed / feed_rate;
        let move_len = cfg.retract_len / len_ratio;
        let mut x0 = cfg.unscale(self.m.x);
        let mut y0 = cfg.unscale(self.m.y);
        let mut l = 0.0;
        let mut rl = 0.0;
        let mut i = start_idx;
        loop {
            if i >= p.len() {
                i = 0;
            }
            let x1 = cfg.unscale(p[i].x);
            let y1 = cfg.unscale(p[i].y);
            let xv = x1 - x0;
            let yv = y1 - y0;
            let norm = (xv * xv + yv * yv).sqrt();
            l += norm;
            if rl + norm * len_ratio >= cfg.retract_len {
                let new_x = x1 - (l - move_len) * (xv / norm);
                let new_y = y1 - (l - move_len) * (yv / norm);
                let mv = GMove {
                    x: cfg.scale(new_x),
                    y: cfg.scale(new_y),
                    z,
                    e: -(cfg.retract_len - rl),
                    feed_rate,
                    scalable: false,
                    is_travel: false,
                    is_restart: false,
                };
                self.append(mv, move_len - (l - norm));
                self.m.x = mv.x;
                self.m.y = mv.y;
                self.m.z = mv.z;
                break;
            } else if norm > 0.0 {
                let mv = GMove {
                    x: p[i].x,
                    y: p[i].y,
                    z,
                    e: -norm * len_ratio,
                    feed_rate,
                    scalable: false,
                    is_travel: false,
                    is_restart: false,
                };
                self.append(mv, norm);
            }
            rl += norm * len_ratio;
            x0 = x1;
            y0 = y1;
            i += 1;
        }
        self.m.is_retracted = true;
        i
    }

    /// Trace over already printed material with the extruder off.
    fn shell_wipe(
        &mut self,
        p: &Path,
        island: Option<&Island>,
        z: i64,
        start_idx: usize,
        feed_rate: f64,
    ) {
        let cfg = self.cfg;
        let mut x0 = cfg.unscale(self.m.x);
        let mut y0 = cfg.unscale(self.m.y);
        let mut l = 0.0;
        let mut i = start_idx;
        loop {
            if i >= p.len() {
                i = 0;
            }
            let x1 = cfg.unscale(p[i].x);
            let y1 = cfg.unscale(p[i].y);
            let xv = x1 - x0;
            let yv = y1 - y0;
            let norm = (xv * xv + yv * yv).sqrt();
            l += norm;
            if l >= cfg.wipe_len {
                let new_x = x1 - (l - cfg.wipe_len) * (xv / norm);
                let new_y = y1 - (l - cfg.wipe_len) * (yv / norm);
                self.linear_move(
                    island,
                    cfg.scale(new_x),
                    cfg.scale(new_y),
                    z,
                    0.0,
                    feed_rate,
                    1.0,
                    false,
                    true,
                    false,
                );
                break;
            } else if norm > 0.0 {
                self.linear_move(island, p[i].x, p[i].y, z, 0.0, feed_rate, 1.0, false, true, false);
            }
            x0 = x1;
            y0 = y1;
            i += 1;
        }
    }

    /// Emit one closed loop: travel to the seam, extrude around with the end
    /// clipped, coast, then optionally retract on the move and wipe.
    fn closed_path_moves(
        &mut self,
        p: &Path,
        start_idx: usize,
        island: Option<&Island>,
        z: i64,
        feed_rate: f64,
    ) {
        let cfg = self.cfg;
        if p.len() < 3 {
            return;
        }
        let w = cfg.extrusion_width;
        let mut total_clip = 0.0;
        let mut do_anchor = false;
        if cfg.shell_clip > 0.0 && path_len_is_greater_than(p, cfg.shell_clip * w * 2.0, cfg) {
            total_clip += cfg.shell_clip * w;
        }
        if cfg.anchor && path_len_is_greater_than(p, total_clip + w, cfg) {
            do_anchor = true;
            total_clip += w / 2.0 * FRAC_PI_4;
        }
        let mut lp = p.clone();
        lp.rotate_left(start_idx);
        lp.push(lp[0]);
        if total_clip > 0.0 {
            clip_path_from_end(&mut lp, None, total_clip, cfg);
        }
        let mut coast_path = Path::new();
        if cfg.coast_len > 0.0
            && path_len_is_greater_than(p, total_clip + cfg.coast_len * 2.0, cfg)
        {
            clip_path_from_end(&mut lp, Some(&mut coast_path), cfg.coast_len, cfg);
        }
        let mut first_point = true;
        for pt in &lp {
            if first_point {
                self.linear_move(
                    island,
                    pt.x,
                    pt.y,
                    z,
                    0.0,
                    cfg.travel_feed_rate,
                    1.0,
                    false,
                    true,
                    false,
                );
                first_point = false;
            } else {
                let mut anchor_e_len = 0.0;
                if do_anchor {
                    anchor_e_len = w / 2.0 * FRAC_PI_4 * cfg.extrusion_area * cfg.flow_multiplier
                        / cfg.material_area;
                    do_anchor = false;
                }
                self.linear_move(island, pt.x, pt.y, z, anchor_e_len, feed_rate, 1.0, true, false, false);
            }
        }
        // Coasting must not trigger a retract of its own.
        self.m.is_retracted = true;
        for pt in &coast_path {
            self.linear_move(island, pt.x, pt.y, z, 0.0, feed_rate, 1.0, true, true, false);
        }
        self.m.is_retracted = false;
        let mut seam_idx = start_idx;
        if cfg.moving_retract && cfg.retract_len > 0.0 {
            seam_idx = self.moving_retract(p, z, start_idx, feed_rate);
        }
        if cfg.wipe_len > 0.0 {
            self.m.force_retract = true;
            self.shell_wipe(p, island, z, seam_idx, feed_rate);
        }
    }

    /// Print the brim loops, innermost ring set first, nearest loop next.
    fn plan_brim(&mut self, mut brim: Vec<PathSet>, z: i64) {
        for set in &mut brim {
            while !set.is_empty() {
                let (best, start, _) = find_nearest_path(set, self.m.x, self.m.y, self.cfg);
                let path = set.swap_remove(best);
                self.closed_path_moves(&path, start, None, z, self.cfg.perimeter_feed_rate);
            }
        }
        self.m.force_retract = true;
    }

    fn do_support_wipe(&mut self, last_line: &Path, z: i64) {
        let cfg = self.cfg;
        if cfg.support_wipe_len > 0.0 {
            self.m.force_retract = true;
            let xv = (last_line[1].x - last_line[0].x) as f64;
            let yv = (last_line[1].y - last_line[0].y) as f64;
            let norm = (xv * xv + yv * yv).sqrt();
            let wipe = cfg.support_wipe_len * cfg.scale_constant;
            if norm > wipe {
                self.linear_move(
                    None,
                    last_line[1].x - (wipe * (xv / norm)).round() as i64,
                    last_line[1].y - (wipe * (yv / norm)).round() as i64,
                    z,
                    0.0,
                    cfg.travel_feed_rate,
                    1.0,
                    false,
                    true,
                    true,
                );
            } else {
                self.linear_move(
                    None,
                    last_line[0].x,
                    last_line[0].y,
                    z,
                    0.0,
                    cfg.travel_feed_rate,
                    1.0,
                    false,
                    true,
                    true,
                );
            }
        }
    }

    /// Print a set of straight lines nearest-first, connecting runs that sit
    /// close together and wiping before boundary crossings.
    #[allow(clippy::too_many_arguments)]
    fn plan_support_lines(
        &mut self,
        mut lines: PathSet,
        islands: &[Island],
        z: i64,
        min_len: f64,
        connect_threshold: f64,
        flow_adjust: f64,
        feed_rate: f64,
    ) {
        let cfg = self.cfg;
        let mut last_line: Path = Vec::new();
        let mut first = true;
        while !lines.is_empty() {
            let (best, best_dist, flip) = find_nearest_segment(&lines, self.m.x, self.m.y, cfg);
            let mut p = lines.swap_remove(best);
            let len = geom::distance_to_point(p[0], p[1]) / cfg.scale_constant;
            if len > min_len {
                let mut cross_bound = false;
                if !first {
                    let p0 = Point::new(self.m.x, self.m.y);
                    let target = if flip { p[1] } else { p[0] };
                    'outer: for island in islands {
                        for bound in &island.outer_boundaries {
                            if get_boundary_crossing(bound, last_line[0], last_line[1]).is_some()
                                || get_boundary_crossing(bound, p0, target).is_some()
                            {
                                cross_bound = true;
                                self.m.force_retract = true;
                                break 'outer;
                            }
                        }
                    }
                }
                let connect = !first && !cross_bound && best_dist < connect_threshold;
                if !first && cross_bound {
                    self.do_support_wipe(&last_line, z);
                }
                if flip {
                    p.swap(0, 1);
                }
                if connect {
                    self.linear_move(None, p[0].x, p[0].y, z, 0.0, feed_rate, flow_adjust, true, false, true);
                } else {
                    self.linear_move(
                        None,
                        p[0].x,
                        p[0].y,
                        z,
                        0.0,
                        cfg.travel_feed_rate,
                        flow_adjust,
                        false,
                        true,
                        true,
                    );
                }
                self.linear_move(None, p[1].x, p[1].y, z, 0.0, feed_rate, flow_adjust, true, false, true);
                last_line = p;
                first = false;
            }
        }
        if !first {
            self.do_support_wipe(&last_line, z);
        }
    }

    /// Weighted inset ordering: nearest loop at every depth, with the
    /// preferred side's distances left unweighted so depth jumps stay
    /// opportunistic.
    fn plan_insets_weighted(&mut self, island: &mut Island, z: i64, outside_first: bool) {
        let cfg = self.cfg;
        let shells = cfg.shells.max(0) as usize;
        loop {
            let mut best_dist = f64::INFINITY;
            let mut pick: Option<(usize, usize, usize)> = None;
            for i in 0..shells {
                if island.insets[i].is_empty() {
                    continue;
                }
                let (r, start, mut dist) =
                    if cfg.align_seams && (cfg.align_interior_seams || i == 0) {
                        let (idx, d) =
                            find_nearest_aligned_path(&island.insets[i], self.m.x, self.m.y, cfg);
                        (idx, 0, d)
                    } else {
                        find_nearest_path(&island.insets[i], self.m.x, self.m.y, cfg)
                    };
                if outside_first {
                    if i != 0 {
                        dist = dist * (i + 1) as f64 + cfg.retract_min_travel;
                    }
                } else if i != shells - 1 {
                    dist = dist * (shells - i) as f64 + cfg.retract_min_travel;
                }
                if dist < best_dist {
                    best_dist = dist;
                    pick = Some((i, r, start));
                }
            }
            let Some((inset, best, start)) = pick else { break };
            let path = island.insets[inset].swap_remove(best);
            let feed = if inset == 0 { cfg.perimeter_feed_rate } else { cfg.loop_feed_rate };
            self.closed_path_moves(&path, start, Some(&*island), z, feed);
        }
    }

    /// Strict inset ordering: all loops at each depth before advancing.
    fn plan_insets_strict_order(&mut self, island: &mut Island, z: i64, outside_first: bool) {
        let cfg = self.cfg;
        let shells = cfg.shells.max(0) as isize;
        let mut i = if outside_first { 0 } else { shells - 1 };
        while i >= 0 && i < shells {
            if island.insets[i as usize].is_empty() {
                i += if outside_first { 1 } else { -1 };
                continue;
            }
            let (best, start) = if cfg.align_seams && (cfg.align_interior_seams || i == 0) {
                let (idx, _) =
                    find_nearest_aligned_path(&island.insets[i as usize], self.m.x, self.m.y, cfg);
                (idx, 0)
            } else {
                let (idx, s, _) =
                    find_nearest_path(&island.insets[i as usize], self.m.x, self.m.y, cfg);
                (idx, s)
            };
            let path = island.insets[i as usize].swap_remove(best);
            let feed = if i == 0 { cfg.perimeter_feed_rate } else { cfg.loop_feed_rate };
            self.closed_path_moves(&path, start, Some(&*island), z, feed);
        }
    }

    fn plan_insets(&mut self, island: &mut Island, z: i64, outside_first: bool) {
        if self.cfg.shells > 0 {
            if self.cfg.strict_shell_order {
                self.plan_insets_strict_order(island, z, outside_first);
            } else {
                self.plan_insets_weighted(island, z, outside_first);
            }
        }
        if self.cfg.retract_after_shells {
            self.m.force_retract = true;
        }
    }

    /// Print lines nearest-first with a travel before each one.
    fn plan_infill_simple(
        &mut self,
        mut lines: PathSet,
        island: Option<&Island>,
        feed_rate: f64,
        flow_adjust: f64,
        z: i64,
    ) {
        while !lines.is_empty() {
            let (best, _, flip) = find_nearest_segment(&lines, self.m.x, self.m.y, self.cfg);
            let mut p = lines.swap_remove(best);
            if flip {
                p.swap(0, 1);
            }
            self.linear_move(
                island,
                p[0].x,
                p[0].y,
                z,
                0.0,
                self.cfg.travel_feed_rate,
                flow_adjust,
                false,
                true,
                true,
            );
            self.linear_move(island, p[1].x, p[1].y, z, 0.0, feed_rate, flow_adjust, true, false, true);
        }
    }

    /// Pick the next solid infill line, preferring adjacent anti-parallel
    /// neighbors so runs can be connected or smoothed.
    fn find_next_solid_infill_segment(
        &self,
        lines: &PathSet,
        line0: &Path,
    ) -> (usize, f64, bool, bool) {
        let cfg = self.cfg;
        let w = cfg.extrusion_width;
        let fudge = w / 8.0;
        let mut best = 0;
        let mut best_flip = false;
        let mut best_is_adjacent = false;
        let mut best_dist = f64::INFINITY;
        let mut best_adj_dist = f64::INFINITY;
        for (i, candidate) in lines.iter().enumerate() {
            debug_assert_eq!(candidate.len(), 2);
            let mut line1 = [candidate[0], candidate[1]];
            let l_dist0 = geom::distance_to_line(line0[0], line1[0], line1[1]);
            let l_dist1 = geom::distance_to_line(line0[1], line1[0], line1[1]);
            let l_dist2 = geom::distance_to_line(line1[0], line0[0], line0[1]);
            let l_dist3 = geom::distance_to_line(line1[1], line0[0], line0[1]);
            let min_dist = l_dist0.min(l_dist1).min(l_dist2).min(l_dist3);
            let scaled_min_dist = min_dist / cfg.scale_constant;
            let scaled_p_dist =
                geom::perpendicular_distance_to_line(line0[1], line1[0], line1[1])
                    / cfg.scale_constant;
            let pt_dist0 = geom::distance_to_point(line0[1], line1[0]);
            let pt_dist1 = geom::distance_to_point(line0[1], line1[1]);
            let is_adjacent = scaled_p_dist < w + fudge
                && scaled_p_dist > w - fudge
                && scaled_min_dist < w * 2.0;
            if pt_dist0 > pt_dist1 {
                line1.swap(0, 1);
            }
            let is_opposite_dir = ((line0[0].x < line0[1].x) != (line1[0].x < line1[1].x))
                || ((line0[0].y < line0[1].y) != (line1[0].y < line1[1].y));
            let mut adj_dist = l_dist1;
            if !is_opposite_dir {
                adj_dist *= 2.0;
            }
            if !is_adjacent {
                adj_dist *= 2.0;
            }
            if adj_dist < best_adj_dist {
                best_adj_dist = adj_dist;
                best_flip = (is_adjacent && !is_opposite_dir) || (pt_dist0 > pt_dist1);
                best_dist = if best_flip { pt_dist1 } else { pt_dist0 };
                best_is_adjacent = is_adjacent;
                best = i;
            }
        }
        (best, best_dist / cfg.scale_constant, best_flip, best_is_adjacent)
    }

    /// Solid infill with smoothing: short adjacent runs collapse into a
    /// midpoint curve at compensated flow, longer anti-parallel neighbors
    /// are connected without a travel, everything else prints plainly.
    fn plan_smoothed_solid_infill(
        &mut self,
        mut lines: PathSet,
        island: &Island,
        feed_rate: f64,
        z: i64,
    ) {
        let cfg = self.cfg;
        if lines.is_empty() {
            return;
        }
        let w = cfg.extrusion_width;
        let s = cfg.scale_constant;
        let (best, _, flip) = find_nearest_segment(&lines, self.m.x, self.m.y, cfg);
        let mut line0 = lines.swap_remove(best);
        if flip {
            line0.swap(0, 1);
        }
        let mut last_was_smoothed = false;
        let mut needs_travel = true;
        while !lines.is_empty() {
            let (best, best_dist, flip, is_adjacent) =
                self.find_next_solid_infill_segment(&lines, &line0);
            let mut line1 = lines.swap_remove(best);
            if flip {
                line1.swap(0, 1);
            }
            let cross_bound = island
                .solid_infill_boundaries
                .iter()
                .any(|b| get_boundary_crossing(b, line0[1], line1[0]).is_some());

            // A point is constrained when it sits in a hole of the
            // constraining edge or outside all of its outers; gap fill is
            // always constrained and shortcuts are not taken there.
            let mut is_constrained = false;
            let mut in_outer = false;
            let mut in_hole = false;
            if island.constraining_edge.is_empty() {
                is_constrained = true;
            } else {
                for bound in &island.constraining_edge {
                    let in_bound = geom::point_in_polygon(line0[1], bound)
                        || geom::point_in_polygon(line1[0], bound);
                    let bound_is_hole = !geom::is_ccw(bound);
                    if in_bound == bound_is_hole {
                        is_constrained = true;
                        in_hole = in_hole || bound_is_hole;
                    } else if in_bound && !bound_is_hole {
                        in_outer = true;
                    }
                }
                if is_constrained && in_outer && !in_hole {
                    is_constrained = false;
                }
            }

            let mid0 = Point::new((line0[0].x + line0[1].x) / 2, (line0[0].y + line0[1].y) / 2);
            let mid1 = Point::new((line1[0].x + line1[1].x) / 2, (line1[0].y + line1[1].y) / 2);
            let len_line0 = geom::distance_to_point(line0[0], line0[1]);
            let len_line1 = geom::distance_to_point(line1[0], line1[1]);
            let len_mid = geom::distance_to_point(mid0, mid1);
            let xv0 = (line0[1].x - line0[0].x) as f64;
            let yv0 = (line0[1].y - line0[0].y) as f64;
            let xv1 = (line1[1].x - line1[0].x) as f64;
            let yv1 = (line1[1].y - line1[0].y) as f64;
            let xv_mid = (mid1.x - mid0.x) as f64;
            let yv_mid = (mid1.y - mid0.y) as f64;
            // Width of the region swept by each line, measured perpendicular
            // to the midpoint connector.
            let region_width0 = ((xv0 * yv_mid - yv0 * xv_mid) / len_mid).abs();
            let region_width1 = ((xv1 * yv_mid - yv1 * xv_mid) / len_mid).abs();
            let p_dist =
                geom::perpendicular_distance_to_line(line0[1], line1[0], line1[1]) / s;
            let shortening_dist = best_dist / p_dist * w / 2.0;
            let is_opposite_dir = ((line0[0].x < line0[1].x) != (line1[0].x < line1[1].x))
                || ((line0[0].y < line0[1].y) != (line1[0].y < line1[1].y));
            let connect_min_len = shortening_dist.max(w / 2.0) * s;

            if cfg.infill_smooth_threshold > 0.0
                && !cross_bound
                && is_adjacent
                && len_line0 <= w * cfg.infill_smooth_threshold * 2.0 * s
                && len_line1 <= w * cfg.infill_smooth_threshold * 2.0 * s
                && region_width0 <= w * cfg.infill_smooth_threshold * s
                && region_width1 <= w * cfg.infill_smooth_threshold * s
            {
                if !last_was_smoothed {
                    if needs_travel {
                        self.linear_move(
                            Some(island),
                            line0[0].x,
                            line0[0].y,
                            z,
                            0.0,
                            cfg.travel_feed_rate,
                            1.0,
                            false,
                            true,
                            true,
                        );
                    }
                    self.linear_move(
                        Some(island),
                        mid0.x,
                        mid0.y,
                        z,
                        0.0,
                        feed_rate,
                        1.0,
                        true,
                        false,
                        true,
                    );
                }
                // Feed such that the midpoint pass deposits both lines'
                // volume.
                let extrude_ratio = (len_line0 + len_line1) / 2.0 / len_mid;
                let scaled_feed_rate = (feed_rate / extrude_ratio).min(cfg.travel_feed_rate);
                self.linear_move(
                    Some(island),
                    mid1.x,
                    mid1.y,
                    z,
                    0.0,
                    scaled_feed_rate,
                    extrude_ratio,
                    true,
                    false,
                    true,
                );
                last_was_smoothed = true;
                needs_travel = false;
            } else if !cross_bound
                && !is_constrained
                && is_adjacent
                && is_opposite_dir
                && best_dist < w * CONNECT_DIST_FACTOR
                && (if last_was_smoothed { len_line0 / 2.0 } else { len_line0 }) > connect_min_len
                && len_line1 / 2.0 > connect_min_len
            {
                let pt0 = Point::new(
                    line0[1].x - (shortening_dist * s * (xv0 / len_line0)).round() as i64,
                    line0[1].y - (shortening_dist * s * (yv0 / len_line0)).round() as i64,
                );
                let pt1 = Point::new(
                    line1[0].x - (shortening_dist * s * (-xv1 / len_line1)).round() as i64,
                    line1[0].y - (shortening_dist * s * (-yv1 / len_line1)).round() as i64,
                );
                if needs_travel {
                    self.linear_move(
                        Some(island),
                        line0[0].x,
                        line0[0].y,
                        z,
                        0.0,
                        cfg.travel_feed_rate,
                        1.0,
                        false,
                        true,
                        true,
                    );
                }
                self.linear_move(Some(island), pt0.x, pt0.y, z, 0.0, feed_rate, 1.0, true, false, true);
                self.linear_move(Some(island), pt1.x, pt1.y, z, 0.0, feed_rate, 1.0, true, false, true);
                last_was_smoothed = false;
                needs_travel = false;
            } else {
                if needs_travel {
                    self.linear_move(
                        Some(island),
                        line0[0].x,
                        line0[0].y,
                        z,
                        0.0,
                        cfg.travel_feed_rate,
                        1.0,
                        false,
                        true,
                        true,
                    );
                }
                self.linear_move(
                    Some(island),
                    line0[1].x,
                    line0[1].y,
                    z,
                    0.0,
                    feed_rate,
                    1.0,
                    true,
                    false,
                    true,
                );
                last_was_smoothed = false;
                needs_travel = true;
            }
            line0 = line1;
        }
        if needs_travel {
            self.linear_move(
                Some(island),
                line0[0].x,
                line0[0].y,
                z,
                0.0,
                cfg.travel_feed_rate,
                1.0,
                false,
                true,
                true,
            );
        }
        self.linear_move(
            Some(island),
            line0[1].x,
            line0[1].y,
            z,
            0.0,
            feed_rate,
            1.0,
            true,
            false,
            true,
        );
    }

    fn finish(mut self, layer: &mut Layer) {
        // Flush any pending retract with a zero-length travel.
        let (x, y, z) = (self.m.x, self.m.y, self.m.z);
        self.linear_move(None, x, y, z, 0.0, self.cfg.travel_feed_rate, 1.0, false, true, false);
        layer.moves = self.moves;
        layer.layer_time = self.layer_time;
    }
}

/// Plan one layer's moves from a freshly parked machine. `brim` is printed
/// on layer 0 only.
pub fn plan_layer(layer: &mut Layer, brim: &[PathSet], cfg: &Config, area: &BuildArea) {
    let mut planner = Planner::new(cfg, area);
    let z = cfg.scale(
        layer.index as f64 * cfg.layer_height + cfg.layer_height + cfg.object_z_extra,
    );
    if layer.index == 0 && cfg.brim_lines > 0 {
        planner.plan_brim(brim.to_vec(), z);
    }
    if cfg.generate_support {
        let flow_adjust = if layer.index > 0 { cfg.support_flow_mult } else { 1.0 };
        let feed_rate =
            if layer.index > 0 { cfg.support_feed_rate } else { cfg.perimeter_feed_rate };
        let w = cfg.extrusion_width;
        let interface_connect = if layer.index == 0 || cfg.connect_support_lines {
            if layer.index == 0 && cfg.solid_support_base {
                w * 1.9
            } else {
                w / cfg.interface_density * 1.9
            }
        } else {
            0.0
        };
        let body_connect = if layer.index == 0 || cfg.connect_support_lines {
            w / cfg.support_density * 10.0
        } else {
            0.0
        };
        let interface_lines = std::mem::take(&mut layer.support_interface_lines);
        let body_lines = std::mem::take(&mut layer.support_lines);
        planner.plan_support_lines(
            interface_lines,
            &layer.islands,
            z,
            w,
            interface_connect,
            flow_adjust,
            feed_rate,
        );
        planner.plan_support_lines(
            body_lines,
            &layer.islands,
            z,
            w * 2.0,
            body_connect,
            flow_adjust,
            feed_rate,
        );
    }
    let outside_first = cfg.outside_first || layer.index == 0;
    let mut islands = std::mem::take(&mut layer.islands);
    while !islands.is_empty() {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, island) in islands.iter().enumerate() {
            let dist = if cfg.align_seams {
                find_nearest_aligned_path(&island.insets[0], planner.m.x, planner.m.y, cfg).1
            } else {
                find_nearest_path(&island.insets[0], planner.m.x, planner.m.y, cfg).2
            };
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        let mut island = islands.swap_remove(best);
        planner.plan_insets(&mut island, z, outside_first);
        let solid = std::mem::take(&mut island.solid_infill);
        planner.plan_smoothed_solid_infill(solid, &island, cfg.solid_infill_feed_rate, z);
        let iron = std::mem::take(&mut island.iron_paths);
        planner.plan_infill_simple(
            iron,
            Some(&island),
            cfg.iron_feed_rate,
            cfg.iron_flow_multiplier,
            z,
        );
        let sparse = std::mem::take(&mut island.sparse_infill);
        planner.plan_infill_simple(sparse, Some(&island), cfg.sparse_infill_feed_rate, 1.0, z);
        if cfg.comb {
            planner
                .printed_outer_boundaries
                .extend(island.outer_boundaries.iter().cloned());
            planner
                .printed_outer_comb_paths
                .extend(island.outer_comb_paths.iter().cloned());
            planner.last_boundaries = island.boundaries.clone();
            planner.last_comb_paths = island.comb_paths.clone();
        }
    }
    planner.m.force_retract = true;
    planner.last_boundaries.clear();
    planner.last_comb_paths.clear();
    planner.printed_outer_boundaries.clear();
    planner.printed_outer_comb_paths.clear();
    planner.finish(layer);
}

/// Plan the raft into a standalone move list emitted before layer 0.
pub fn plan_raft(raft: &[PathSet; 2], cfg: &Config, area: &BuildArea) -> Vec<GMove> {
    let mut planner = Planner::new(cfg, area);
    let w = cfg.extrusion_width;
    let z = cfg.scale(cfg.raft_base_layer_height);
    let flow_adjust = (cfg.raft_base_layer_height * cfg.raft_base_layer_width)
        / (cfg.layer_height * w);
    let feed_rate = cfg.solid_infill_feed_rate * cfg.first_layer_mult;
    planner.plan_support_lines(
        raft[0].clone(),
        &[],
        z,
        w * 2.0,
        cfg.raft_base_layer_width / cfg.raft_base_layer_density * 1.9,
        flow_adjust,
        feed_rate,
    );
    for i in 1..=cfg.raft_interface_layers {
        let z = cfg.scale(cfg.raft_base_layer_height + cfg.layer_height * i as f64);
        planner.plan_support_lines(
            raft[1].clone(),
            &[],
            z,
            w * 2.0,
            w * 1.9,
            cfg.raft_interface_flow_mult,
            cfg.solid_infill_feed_rate,
        );
    }
    planner.m.force_retract = true;
    let (x, y, z) = (planner.m.x, planner.m.y, planner.m.z);
    planner.linear_move(None, x, y, z, 0.0, cfg.travel_feed_rate, 1.0, false, true, false);
    planner.moves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inset;
    use crate::outline;
    use crate::slice::Segment;
    use approx::assert_relative_eq;

    fn seg(x0: f64, y0: f64, x1: f64, y1: f64) -> Segment {
        Segment { x: [x0, x1], y: [y0, y1] }
    }

    fn square_segs(x0: f64, y0: f64, size: f64) -> Vec<Segment> {
        let (x1, y1) = (x0 + size, y0 + size);
        vec![
            seg(x0, y0, x1, y0),
            seg(x1, y0, x1, y1),
            seg(x1, y1, x0, y1),
            seg(x0, y1, x0, y0),
        ]
    }

    fn area() -> BuildArea {
        BuildArea { x0: -5.0, y0: -5.0, x1: 50.0, y1: 50.0 }
    }

    fn retracts(moves: &[GMove]) -> Vec<usize> {
        moves
            .iter()
            .enumerate()
            .filter(|(_, m)| m.e < 0.0 && !m.is_restart && !m.is_travel)
            .map(|(i, _)| i)
            .collect()
    }

    fn restarts(moves: &[GMove]) -> Vec<usize> {
        moves.iter().enumerate().filter(|(_, m)| m.is_restart).map(|(i, _)| i).collect()
    }

    #[test]
    fn test_retract_between_distant_islands() {
        let mut cfg = Config {
            coarseness: 0.0,
            comb: false,
            infill_density: 0.0,
            roof_thickness: 0.0,
            floor_thickness: 0.0,
            fill_inset_gaps: false,
            ..Config::default()
        };
        cfg.resolve().unwrap();
        let mut segs = square_segs(0.0, 0.0, 10.0);
        segs.extend(square_segs(40.0, 0.0, 10.0));
        let mut layer = outline::build_layer(0, segs, &cfg);
        assert_eq!(layer.islands.len(), 2);
        inset::generate(&mut layer, &cfg);
        plan_layer(&mut layer, &[], &cfg, &area());
        // One retract crossing between the islands, one at layer end.
        let r = retracts(&layer.moves);
        assert_eq!(r.len(), 2);
        // Balanced with restarts between any two extrusions: the travel gap
        // between the islands carries retract then restart.
        let rs = restarts(&layer.moves);
        assert_eq!(rs.len(), 2);
        assert!(r[0] < rs[1] && rs[1] < r[1]);
        // Scalable extrusion moves all deposit material.
        for m in &layer.moves {
            if m.scalable && !m.is_travel && !m.is_restart {
                assert!(m.e > 0.0);
            }
        }
    }

    #[test]
    fn test_combing_goes_around_obstacle_without_retract() {
        let mut cfg = Config::default();
        cfg.resolve().unwrap();
        let ring: Path = vec![
            Point::new(4000, 4000),
            Point::new(6000, 4000),
            Point::new(6000, 6000),
            Point::new(4000, 6000),
        ];
        let bounds = vec![ring.clone()];
        let paths = vec![ring];
        let mut planner = Planner::new(&cfg, &area());
        planner.m.x = 3000;
        planner.m.y = 5000;
        planner.m.is_retracted = false;
        planner.combed_travel(None, bounds, &paths, 7000, 5000, cfg.travel_feed_rate, 1e9);
        assert!(!planner.moves.is_empty());
        // Only travels, no retract.
        for m in &planner.moves {
            assert!(m.is_travel);
            assert_eq!(m.e, 0.0);
        }
        // No emitted segment cuts through the obstacle interior.
        let inner = vec![
            Point::new(4001, 4001),
            Point::new(5999, 4001),
            Point::new(5999, 5999),
            Point::new(4001, 5999),
        ];
        let mut prev = Point::new(3000, 5000);
        for m in &planner.moves {
            let next = Point::new(m.x, m.y);
            let (crossed, _) = crosses_boundary_2pt(&inner, prev, next, &cfg);
            assert!(!crossed, "comb segment crosses the hole");
            prev = next;
        }
    }

    #[test]
    fn test_moving_retract_sums_to_retract_len() {
        let mut cfg = Config { moving_retract: true, ..Config::default() };
        cfg.resolve().unwrap();
        let p: Path = vec![
            Point::new(0, 0),
            Point::new(10_000_000, 0),
            Point::new(10_000_000, 10_000_000),
            Point::new(0, 10_000_000),
        ];
        let mut planner = Planner::new(&cfg, &area());
        planner.m.x = 0;
        planner.m.y = 0;
        planner.m.is_retracted = false;
        planner.moving_retract(&p, 200_000, 0, cfg.perimeter_feed_rate);
        let total_e: f64 = planner.moves.iter().map(|m| m.e).sum();
        assert_relative_eq!(total_e, -cfg.retract_len, epsilon = 1e-9);
        assert!(planner.m.is_retracted);
        assert!(planner.moves.iter().all(|m| m.e <= 0.0));
    }

    #[test]
    fn test_shell_wipe_travels_wipe_len_along_loop() {
        let mut cfg = Config { wipe_len: 2.0, ..Config::default() };
        cfg.resolve().unwrap();
        let p: Path = vec![
            Point::new(0, 0),
            Point::new(10_000_000, 0),
            Point::new(10_000_000, 10_000_000),
            Point::new(0, 10_000_000),
        ];
        let mut planner = Planner::new(&cfg, &area());
        planner.m.x = 0;
        planner.m.y = 0;
        planner.m.z = 200_000;
        planner.m.is_retracted = true;
        planner.shell_wipe(&p, None, 200_000, 0, cfg.perimeter_feed_rate);
        // Ends 2 units along the loop, extruder off the whole way.
        assert_eq!(planner.m.x, cfg.scale(2.0));
        assert_eq!(planner.m.y, 0);
        assert!(planner.moves.iter().all(|m| m.is_travel && m.e == 0.0));
    }

    #[test]
    fn test_closed_path_seam_clipping_leaves_gap() {
        let mut cfg = Config {
            comb: false,
            align_seams: false,
            retract_len: 0.0,
            ..Config::default()
        };
        cfg.resolve().unwrap();
        let p: Path = vec![
            Point::new(0, 0),
            Point::new(10_000_000, 0),
            Point::new(10_000_000, 10_000_000),
            Point::new(0, 10_000_000),
        ];
        let mut planner = Planner::new(&cfg, &area());
        planner.closed_path_moves(&p, 0, None, 200_000, cfg.perimeter_feed_rate);
        // The loop must not return all the way to the seam: shell_clip
        // leaves a gap of shell_clip * extrusion_width.
        let last = planner.moves.last().unwrap();
        let end = Point::new(last.x, last.y);
        let gap = geom::distance_to_point(end, Point::new(0, 0)) / cfg.scale_constant;
        assert_relative_eq!(gap, cfg.shell_clip * cfg.extrusion_width, epsilon = 1e-6);
        // Total extrusion covers the rest of the perimeter.
        let extruded: f64 = planner.moves.iter().filter(|m| !m.is_travel).map(|m| m.e).sum();
        let expected_len = 40.0 - cfg.shell_clip * cfg.extrusion_width;
        let expected_e =
            expected_len * cfg.extrusion_area * cfg.flow_multiplier / cfg.material_area;
        assert_relative_eq!(extruded, expected_e, epsilon = 1e-6);
    }
}
