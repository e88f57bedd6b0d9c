//! Serialize the planned move stream as G-code.
//!
//! Layers are emitted strictly in ascending order; the export-side machine
//! state is separate from planning state and only moves forward. Feed-rate
//! scaling for slow layers happens here, as a multiplicative property of
//! the rendering, so plans never need recomputing.

use std::io::Write;

use thiserror::Error;

use strata_slicer::{Config, GMove, Machine, SliceResult};

use crate::template::write_fragment;

/// Errors raised while writing G-code.
#[derive(Error, Debug)]
pub enum GcodeError {
    /// Output stream failure.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Material accounting reported after export.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportStats {
    /// Total filament length consumed, model units.
    pub material_length: f64,
    /// Material mass in the configured mass unit.
    pub material_mass: f64,
    /// Material cost in the configured currency.
    pub material_cost: f64,
}

/// Format one move, emitting only the fields that changed. `force_xyz`
/// makes the first motion of the file absolute in every axis.
fn write_move<W: Write>(
    f: &mut W,
    mv: &GMove,
    m: &mut Machine,
    feed_rate_mult: f64,
    force_xyz: bool,
    cfg: &Config,
) -> Result<(), GcodeError> {
    let mut feed_rate = mv.feed_rate;
    if mv.scalable {
        feed_rate *= feed_rate_mult;
        let min_feed_rate = if mv.is_restart {
            cfg.min_feed_rate * cfg.extrusion_area / cfg.material_area
        } else {
            cfg.min_feed_rate
        };
        if feed_rate < min_feed_rate {
            feed_rate = min_feed_rate;
        }
    }
    let feed_per_min = |rate: f64| -> i64 {
        if rate * 60.0 <= 1.0 {
            1
        } else {
            (rate * 60.0).round() as i64
        }
    };
    if mv.is_travel && mv.z != m.z && cfg.separate_z_travel {
        write!(f, "G1 Z{:.3}", cfg.unscale(mv.z))?;
        if feed_rate != m.feed_rate {
            write!(f, " F{}", feed_per_min(feed_rate))?;
        }
        writeln!(f)?;
        m.z = mv.z;
    }
    write!(f, "G1")?;
    if force_xyz || mv.x != m.x {
        write!(f, " X{:.3}", cfg.unscale(mv.x))?;
    }
    if force_xyz || mv.y != m.y {
        write!(f, " Y{:.3}", cfg.unscale(mv.y))?;
    }
    if force_xyz || mv.z != m.z {
        write!(f, " Z{:.3}", cfg.unscale(mv.z))?;
    }
    if mv.e != 0.0 {
        write!(f, " E{:.5}", m.e + mv.e)?;
    }
    if feed_rate != m.feed_rate {
        write!(f, " F{}", feed_per_min(feed_rate))?;
    }
    writeln!(f)?;
    m.x = mv.x;
    m.y = mv.y;
    m.z = mv.z;
    m.e += mv.e;
    m.feed_rate = feed_rate;
    Ok(())
}

/// Write the complete G-code program: prologue, raft, every layer in order
/// with its fragments and feed scaling, epilogue, and the material trailer.
/// Each layer's move list is released after it is written.
pub fn write_gcode<W: Write>(
    out: &mut W,
    result: &mut SliceResult,
    cfg: &Config,
) -> Result<ExportStats, GcodeError> {
    let mut export = Machine::default();
    let mut total_e = 0.0;
    let mut feed_rate_mult = cfg.first_layer_mult;
    let mut is_first_move = true;

    write_fragment(out, &cfg.start_gcode, cfg)?;

    let raft_moves = std::mem::take(&mut result.raft_moves);
    if !raft_moves.is_empty() {
        writeln!(out, "; raft")?;
        for mv in &raft_moves {
            write_move(out, mv, &mut export, 1.0, is_first_move, cfg)?;
            is_first_move = false;
        }
    }

    let layer_times: Vec<f64> = result.layers.iter().map(|l| l.layer_time).collect();
    for i in 0..result.layers.len() {
        writeln!(
            out,
            "; layer {} (z = {})",
            i,
            i as f64 * cfg.layer_height + cfg.layer_height + cfg.object_z_extra
        )?;
        for fragment in &cfg.at_layer {
            if fragment.layer == i as i64 {
                write_fragment(out, &fragment.value, cfg)?;
            }
        }
        if i as i64 == cfg.cool_layer {
            write_fragment(out, &cfg.cool_on_gcode, cfg)?;
        }
        // Moving average over the last layer_time_samples layers; layers
        // before the first are padded with the first layer's unscaled time.
        let mut average_layer_time = layer_times[i] / feed_rate_mult;
        for k in 1..cfg.layer_time_samples {
            average_layer_time += if (k as usize) < i {
                layer_times[i - k as usize]
            } else {
                layer_times[0] / cfg.first_layer_mult
            };
        }
        average_layer_time /= cfg.layer_time_samples as f64;
        if average_layer_time < cfg.min_layer_time {
            feed_rate_mult *= average_layer_time / cfg.min_layer_time;
        }
        let moves = std::mem::take(&mut result.layers[i].moves);
        for mv in &moves {
            write_move(out, mv, &mut export, feed_rate_mult, is_first_move, cfg)?;
            is_first_move = false;
        }
        feed_rate_mult = 1.0;
        total_e += export.e;
        export.e = 0.0;
        writeln!(out, "G92 E0")?;
    }

    write_fragment(out, &cfg.cool_off_gcode, cfg)?;
    write_fragment(out, &cfg.end_gcode, cfg)?;

    let material_length = total_e / cfg.flow_multiplier;
    let material_mass = cfg.material_area * total_e * cfg.material_density / cfg.flow_multiplier;
    let stats = ExportStats {
        material_length,
        material_mass,
        material_cost: material_mass * cfg.material_cost,
    };
    writeln!(out, "; material length = {:.4}", stats.material_length)?;
    writeln!(out, "; material mass   = {:.4}", stats.material_mass)?;
    writeln!(out, "; material cost   = {:.4}", stats.material_cost)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_slicer::{BuildArea, Layer, SliceSummary};

    fn cfg() -> Config {
        let mut c = Config::default();
        c.resolve().unwrap();
        c
    }

    fn mv(x: f64, y: f64, z: f64, e: f64, feed: f64, cfg: &Config) -> GMove {
        GMove {
            x: cfg.scale(x),
            y: cfg.scale(y),
            z: cfg.scale(z),
            e,
            feed_rate: feed,
            scalable: false,
            is_travel: e == 0.0,
            is_restart: false,
        }
    }

    fn result_with_moves(moves: Vec<GMove>, layer_time: f64) -> SliceResult {
        let mut layer = Layer::new(0);
        layer.moves = moves;
        layer.layer_time = layer_time;
        SliceResult {
            layers: vec![layer],
            raft_moves: Vec::new(),
            area: BuildArea::default(),
            summary: SliceSummary {
                layer_count: 1,
                island_count: 1,
                estimated_time_seconds: layer_time,
            },
        }
    }

    #[test]
    fn test_delta_field_emission() {
        let c = cfg();
        let moves = vec![
            mv(0.0, 0.0, 0.2, 0.0, 120.0, &c),
            mv(10.0, 0.0, 0.2, 0.5, 25.0, &c),
            mv(10.0, 5.0, 0.2, 0.25, 25.0, &c),
        ];
        let mut result = result_with_moves(moves, 60.0);
        let mut out = Vec::new();
        write_gcode(&mut out, &mut result, &c).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // First motion is fully absolute.
        assert!(lines.iter().any(|l| l.starts_with("G1 X0.000 Y0.000 Z0.200")));
        // Second move repeats neither Y nor Z, accumulates E, converts feed.
        assert!(text.contains("G1 X10.000 E0.50000 F1500"), "{text}");
        // Third move only changes Y and E; F is unchanged and omitted.
        assert!(text.contains("G1 Y5.000 E0.75000\n"), "{text}");
        // One E reset per layer.
        assert_eq!(text.matches("G92 E0").count(), 1);
    }

    #[test]
    fn test_separate_z_travel() {
        let mut c = Config { separate_z_travel: true, ..Config::default() };
        c.resolve().unwrap();
        let moves = vec![mv(5.0, 5.0, 0.4, 0.0, 120.0, &c)];
        let mut result = result_with_moves(moves, 60.0);
        let mut out = Vec::new();
        write_gcode(&mut out, &mut result, &c).unwrap();
        let text = String::from_utf8(out).unwrap();
        // The Z change is split out before the XY motion.
        let z_line = text.lines().position(|l| l == "G1 Z0.400 F7200").unwrap();
        let xy_line = text.lines().position(|l| l.starts_with("G1 X5.000 Y5.000")).unwrap();
        assert!(z_line < xy_line);
    }

    #[test]
    fn test_slow_layer_feed_scaling() {
        let c = cfg();
        // layer_time 1s is far below min_layer_time 8s. With the first
        // layer's padding the average is 1 / 0.5 = 2s over all samples, so
        // scalable feeds are multiplied by 0.5 * 2/8 = 0.125.
        let scalable = GMove {
            x: c.scale(10.0),
            y: 0,
            z: c.scale(0.2),
            e: 0.5,
            feed_rate: 40.0,
            scalable: true,
            is_travel: false,
            is_restart: false,
        };
        let mut result = result_with_moves(vec![scalable], 1.0);
        let mut out = Vec::new();
        write_gcode(&mut out, &mut result, &c).unwrap();
        let text = String::from_utf8(out).unwrap();
        // 40 * 0.125 = 5 units/s -> floored at min_feed_rate 10 -> F600.
        assert!(text.contains("F600"), "{text}");
    }

    #[test]
    fn test_material_trailer() {
        let c = cfg();
        let moves = vec![
            mv(0.0, 0.0, 0.2, 0.0, 120.0, &c),
            mv(10.0, 0.0, 0.2, 2.0, 25.0, &c),
        ];
        let mut result = result_with_moves(moves, 60.0);
        let mut out = Vec::new();
        let stats = write_gcode(&mut out, &mut result, &c).unwrap();
        approx::assert_relative_eq!(stats.material_length, 2.0);
        assert!(stats.material_mass > 0.0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("; material length = 2.0000"));
        // Layer moves are released after emission.
        assert!(result.layers[0].moves.is_empty());
    }

    #[test]
    fn test_at_layer_and_cool_fragments() {
        let mut c = Config { cool_layer: 0, ..Config::default() };
        c.set("at_layer", "0=M42 P1 S255").unwrap();
        c.resolve().unwrap();
        let moves = vec![mv(1.0, 1.0, 0.2, 0.0, 120.0, &c)];
        let mut result = result_with_moves(moves, 60.0);
        let mut out = Vec::new();
        write_gcode(&mut out, &mut result, &c).unwrap();
        let text = String::from_utf8(out).unwrap();
        let frag = text.lines().position(|l| l == "M42 P1 S255").unwrap();
        let cool = text.lines().position(|l| l == "M106 S255").unwrap();
        let motion = text.lines().position(|l| l.starts_with("G1 ")).unwrap();
        assert!(frag < motion && cool < motion);
        let off = text.lines().position(|l| l == "M107").unwrap();
        let trailer = text.lines().position(|l| l.starts_with("; material")).unwrap();
        assert!(motion < off && off < trailer);
    }
}
