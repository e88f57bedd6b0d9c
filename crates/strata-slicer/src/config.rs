//! Configuration record.
//!
//! One immutable `Config` value is constructed at startup (defaults, then
//! config files, then overrides), resolved once, and passed by shared
//! reference through the whole pipeline. Derived values are computed by
//! [`Config::resolve`] and are rejected as assignment targets by
//! [`Config::set`].

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sparse infill pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillPattern {
    /// Two orthogonal line sets at half density each.
    #[default]
    Grid,
    /// Three line sets at 0, 60 and 120 degrees, a third of the density each.
    Triangle,
    /// One line set rotating 60 degrees per layer.
    Triangle2,
    /// One line set rotating 90 degrees per layer.
    Rectilinear,
}

/// Join style for polygon offsetting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinStyle {
    /// Mitered corners, limited by `offset_miter_limit`.
    #[default]
    Miter,
    /// Squared-off corners.
    Square,
    /// Arc-approximated corners.
    Round,
}

/// Fill rule used when unioning raw outlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillKind {
    /// Even-odd rule; useful for broken models with self-intersections.
    EvenOdd,
    /// Non-zero winding rule.
    #[default]
    NonZero,
    /// Positive winding only.
    Positive,
    /// Negative winding only.
    Negative,
}

/// A named `{variable}` usable in G-code templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserVar {
    /// Variable name.
    pub key: String,
    /// Substituted text.
    pub value: String,
}

/// A G-code fragment emitted immediately before a specific layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtLayerGcode {
    /// Layer index the fragment precedes.
    pub layer: i64,
    /// Fragment text.
    pub value: String,
}

/// The slicer configuration record. Field semantics follow the configuration
/// key of the same name; all lengths are in model units (millimeters for STL
/// input) unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Config {
    pub layer_height: f64,
    /// Segment connection tolerance for outline stitching.
    pub tolerance: f64,
    /// Integer grid scale. Precision is `1 / scale_constant` units.
    pub scale_constant: f64,
    /// Approximate output coarseness; drives path simplification.
    pub coarseness: f64,
    pub extrusion_width: f64,
    pub xy_scale_factor: f64,
    pub z_scale_factor: f64,
    pub x_center: f64,
    pub y_center: f64,
    pub packing_density: f64,
    pub edge_packing_density: f64,
    /// Length clipped off shell ends, in units of `extrusion_width`.
    pub shell_clip: f64,
    pub extra_offset: f64,
    pub infill_density: f64,
    pub infill_pattern: FillPattern,
    pub solid_infill_angle: f64,
    pub sparse_infill_angle: f64,
    pub shells: i64,
    pub roof_thickness: f64,
    pub floor_thickness: f64,
    /// Minimum contact patch through roof/floor layers, in units of
    /// `extrusion_width`.
    pub min_shell_contact: f64,
    pub solid_fill_expansion: f64,
    pub material_diameter: f64,
    pub flow_multiplier: f64,
    /// Base feed rate. All feed rates are in units per second.
    pub feed_rate: f64,
    pub perimeter_feed_rate: f64,
    pub loop_feed_rate: f64,
    pub solid_infill_feed_rate: f64,
    pub sparse_infill_feed_rate: f64,
    pub support_feed_rate: f64,
    pub iron_feed_rate: f64,
    pub travel_feed_rate: f64,
    pub first_layer_mult: f64,
    pub coast_len: f64,
    pub wipe_len: f64,
    pub retract_len: f64,
    pub retract_speed: f64,
    pub moving_retract_speed: f64,
    pub restart_speed: f64,
    pub retract_min_travel: f64,
    pub retract_threshold: f64,
    pub retract_within_island: bool,
    pub retract_after_shells: bool,
    pub moving_retract: bool,
    pub extra_restart_len: f64,
    /// Layer at which part cooling is switched on (-1 disables).
    pub cool_layer: i64,
    pub start_gcode: String,
    pub end_gcode: String,
    pub cool_on_gcode: String,
    pub cool_off_gcode: String,
    /// Allowable edge path overlap in units of `extrusion_width`.
    pub edge_overlap: f64,
    pub comb: bool,
    pub strict_shell_order: bool,
    pub align_seams: bool,
    pub align_interior_seams: bool,
    pub simplify_insets: bool,
    pub fill_inset_gaps: bool,
    pub no_solid: bool,
    pub anchor: bool,
    pub outside_first: bool,
    pub iron_top_surface: bool,
    pub separate_z_travel: bool,
    pub preserve_layer_offset: bool,
    /// Orient all outlines counter-clockwise; fixes some broken models but
    /// fills holes.
    pub combine_all: bool,
    pub poly_fill_type: FillKind,
    pub inset_join_type: JoinStyle,
    pub outset_join_type: JoinStyle,
    pub offset_miter_limit: f64,
    pub offset_arc_tolerance: f64,
    pub fill_threshold: f64,
    pub infill_smooth_threshold: f64,
    pub min_sparse_infill_len: f64,
    pub infill_overlap: f64,
    pub iron_flow_multiplier: f64,
    pub iron_density: f64,
    pub generate_support: bool,
    pub support_everywhere: bool,
    pub solid_support_base: bool,
    pub connect_support_lines: bool,
    pub expand_support_interface: bool,
    pub support_angle: f64,
    /// Horizontal support spacing in units of `edge_width`.
    pub support_margin: f64,
    /// Vertical support spacing in layers.
    pub support_vert_margin: i64,
    pub interface_roof_layers: i64,
    pub interface_floor_layers: i64,
    pub support_xy_expansion: f64,
    pub support_density: f64,
    pub interface_density: f64,
    pub support_flow_mult: f64,
    pub support_wipe_len: f64,
    pub min_layer_time: f64,
    pub layer_time_samples: i64,
    pub min_feed_rate: f64,
    pub brim_width: f64,
    pub brim_adhesion_factor: f64,
    pub generate_raft: bool,
    pub raft_xy_expansion: f64,
    pub raft_base_layer_height: f64,
    pub raft_base_layer_width: f64,
    pub raft_base_layer_density: f64,
    /// Vertical gap between model and raft, in units of `layer_height`.
    pub raft_vert_margin: f64,
    pub raft_interface_flow_mult: f64,
    pub raft_interface_layers: i64,
    pub material_density: f64,
    pub material_cost: f64,

    /// User-set `{variable}` substitutions.
    pub user_vars: Vec<UserVar>,
    /// Per-layer G-code fragments.
    pub at_layer: Vec<AtLayerGcode>,

    // Derived values, filled in by resolve(). Read-only as settings.
    #[serde(skip)]
    pub edge_width: f64,
    #[serde(skip)]
    pub extrusion_area: f64,
    #[serde(skip)]
    pub edge_offset: f64,
    #[serde(skip)]
    pub material_area: f64,
    #[serde(skip)]
    pub roof_layers: i64,
    #[serde(skip)]
    pub floor_layers: i64,
    #[serde(skip)]
    pub brim_lines: i64,
    #[serde(skip)]
    pub solid_infill_clip_offset: f64,
    #[serde(skip)]
    pub interface_clip_offset: f64,
    /// Extra XY extent from brim, support and raft expansion.
    #[serde(skip)]
    pub xy_extra: f64,
    /// Extra Z applied to everything but the raft on export.
    #[serde(skip)]
    pub object_z_extra: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layer_height: 0.2,
            tolerance: 0.001,
            scale_constant: 1_000_000.0,
            coarseness: 0.01,
            extrusion_width: 0.45,
            xy_scale_factor: 1.003,
            z_scale_factor: 1.0,
            x_center: 0.0,
            y_center: 0.0,
            packing_density: 0.75,
            edge_packing_density: 0.5,
            shell_clip: 0.15,
            extra_offset: 0.0,
            infill_density: 0.2,
            infill_pattern: FillPattern::Grid,
            solid_infill_angle: 45.0,
            sparse_infill_angle: 45.0,
            shells: 2,
            roof_thickness: 0.8,
            floor_thickness: 0.8,
            min_shell_contact: 1.0,
            solid_fill_expansion: 1.0,
            material_diameter: 1.75,
            flow_multiplier: 1.0,
            feed_rate: 50.0,
            perimeter_feed_rate: -0.5,
            loop_feed_rate: -0.7,
            solid_infill_feed_rate: -1.0,
            sparse_infill_feed_rate: -1.0,
            support_feed_rate: -1.0,
            iron_feed_rate: -1.0,
            travel_feed_rate: 120.0,
            first_layer_mult: 0.5,
            coast_len: 0.0,
            wipe_len: 0.0,
            retract_len: 1.0,
            retract_speed: 20.0,
            moving_retract_speed: -0.5,
            restart_speed: -1.0,
            retract_min_travel: 5.0,
            retract_threshold: 30.0,
            retract_within_island: false,
            retract_after_shells: false,
            moving_retract: false,
            extra_restart_len: 0.0,
            cool_layer: 2,
            start_gcode: String::new(),
            end_gcode: String::new(),
            cool_on_gcode: "M106 S255".into(),
            cool_off_gcode: "M107".into(),
            edge_overlap: 0.5,
            comb: true,
            strict_shell_order: false,
            align_seams: true,
            align_interior_seams: true,
            simplify_insets: true,
            fill_inset_gaps: true,
            no_solid: false,
            anchor: false,
            outside_first: false,
            iron_top_surface: false,
            separate_z_travel: false,
            preserve_layer_offset: false,
            combine_all: false,
            poly_fill_type: FillKind::NonZero,
            inset_join_type: JoinStyle::Miter,
            outset_join_type: JoinStyle::Miter,
            offset_miter_limit: 2.0,
            offset_arc_tolerance: 5.0,
            fill_threshold: 0.25,
            infill_smooth_threshold: 2.0,
            min_sparse_infill_len: 1.0,
            infill_overlap: 0.05,
            iron_flow_multiplier: 0.1,
            iron_density: 2.0,
            generate_support: false,
            support_everywhere: true,
            solid_support_base: true,
            connect_support_lines: false,
            expand_support_interface: true,
            support_angle: 70.0,
            support_margin: 0.6,
            support_vert_margin: 1,
            interface_roof_layers: 3,
            interface_floor_layers: 0,
            support_xy_expansion: 2.0,
            support_density: 0.2,
            interface_density: 0.7,
            support_flow_mult: 0.75,
            support_wipe_len: 5.0,
            min_layer_time: 8.0,
            layer_time_samples: 5,
            min_feed_rate: 10.0,
            brim_width: 0.0,
            brim_adhesion_factor: 0.5,
            generate_raft: false,
            raft_xy_expansion: 5.0,
            raft_base_layer_height: 0.3,
            raft_base_layer_width: 0.6,
            raft_base_layer_density: 0.5,
            raft_vert_margin: 1.0,
            raft_interface_flow_mult: 0.75,
            raft_interface_layers: 1,
            material_density: 0.00125,
            material_cost: 0.01499,
            user_vars: Vec::new(),
            at_layer: Vec::new(),
            edge_width: 0.0,
            extrusion_area: 0.0,
            edge_offset: 0.0,
            material_area: 0.0,
            roof_layers: 0,
            floor_layers: 0,
            brim_lines: 0,
            solid_infill_clip_offset: 0.0,
            interface_clip_offset: 0.0,
            xy_extra: 0.0,
            object_z_extra: 0.0,
        }
    }
}

/// Range bound for numeric settings; `None` means unbounded on that side.
struct Range {
    low: Option<f64>,
    high: Option<f64>,
    low_eq: bool,
    high_eq: bool,
}

impl Range {
    const fn new(low: Option<f64>, high: Option<f64>, low_eq: bool, high_eq: bool) -> Self {
        Self { low, high, low_eq, high_eq }
    }

    fn check(&self, v: f64) -> bool {
        if let Some(l) = self.low {
            if !(if self.low_eq { v >= l } else { v > l }) {
                return false;
            }
        }
        if let Some(h) = self.high {
            if !(if self.high_eq { v <= h } else { v < h }) {
                return false;
            }
        }
        true
    }

    fn describe(&self) -> String {
        match (self.low, self.high) {
            (Some(l), Some(h)) => format!(
                "within {}{},{}{}",
                if self.low_eq { '[' } else { '(' },
                l,
                h,
                if self.high_eq { ']' } else { ')' }
            ),
            (Some(l), None) => format!("{} {}", if self.low_eq { ">=" } else { ">" }, l),
            (None, Some(h)) => format!("{} {}", if self.high_eq { "<=" } else { "<" }, h),
            (None, None) => "any value".into(),
        }
    }
}

const GT_ZERO: Range = Range::new(Some(0.0), None, false, false);
const GE_ZERO: Range = Range::new(Some(0.0), None, true, false);
const UNIT: Range = Range::new(Some(0.0), Some(1.0), true, true);
const ANY: Range = Range::new(None, None, false, false);

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| ConfigError::BadValue {
        key: key.into(),
        value: value.into(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| ConfigError::BadValue {
        key: key.into(),
        value: value.into(),
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(value.bytes().next(), Some(b't' | b'T' | b'y' | b'Y'))
        || value.trim().parse::<i64>().map(|v| v != 0).unwrap_or(false)
}

fn check_f64(key: &str, v: f64, range: &Range) -> Result<f64, ConfigError> {
    if range.check(v) {
        Ok(v)
    } else {
        Err(ConfigError::OutOfRange { key: key.into(), bound: range.describe() })
    }
}

fn check_i64(key: &str, v: i64, range: &Range) -> Result<i64, ConfigError> {
    if range.check(v as f64) {
        Ok(v)
    } else {
        Err(ConfigError::OutOfRange { key: key.into(), bound: range.describe() })
    }
}

const SETTING_KEYS: &[&str] = &[
    "layer_height",
    "tolerance",
    "scale_constant",
    "coarseness",
    "extrusion_width",
    "xy_scale_factor",
    "z_scale_factor",
    "x_center",
    "y_center",
    "packing_density",
    "edge_packing_density",
    "shell_clip",
    "extra_offset",
    "infill_density",
    "infill_pattern",
    "solid_infill_angle",
    "sparse_infill_angle",
    "shells",
    "roof_thickness",
    "floor_thickness",
    "min_shell_contact",
    "solid_fill_expansion",
    "material_diameter",
    "flow_multiplier",
    "feed_rate",
    "perimeter_feed_rate",
    "loop_feed_rate",
    "solid_infill_feed_rate",
    "sparse_infill_feed_rate",
    "support_feed_rate",
    "iron_feed_rate",
    "travel_feed_rate",
    "first_layer_mult",
    "coast_len",
    "wipe_len",
    "retract_len",
    "retract_speed",
    "moving_retract_speed",
    "restart_speed",
    "retract_min_travel",
    "retract_threshold",
    "retract_within_island",
    "retract_after_shells",
    "moving_retract",
    "extra_restart_len",
    "cool_layer",
    "start_gcode",
    "end_gcode",
    "cool_on_gcode",
    "cool_off_gcode",
    "edge_overlap",
    "comb",
    "strict_shell_order",
    "align_seams",
    "align_interior_seams",
    "simplify_insets",
    "fill_inset_gaps",
    "no_solid",
    "anchor",
    "outside_first",
    "iron_top_surface",
    "separate_z_travel",
    "preserve_layer_offset",
    "combine_all",
    "poly_fill_type",
    "inset_join_type",
    "outset_join_type",
    "offset_miter_limit",
    "offset_arc_tolerance",
    "fill_threshold",
    "infill_smooth_threshold",
    "min_sparse_infill_len",
    "infill_overlap",
    "iron_flow_multiplier",
    "iron_density",
    "generate_support",
    "support_everywhere",
    "solid_support_base",
    "connect_support_lines",
    "expand_support_interface",
    "support_angle",
    "support_margin",
    "support_vert_margin",
    "interface_roof_layers",
    "interface_floor_layers",
    "support_xy_expansion",
    "support_density",
    "interface_density",
    "support_flow_mult",
    "support_wipe_len",
    "min_layer_time",
    "layer_time_samples",
    "min_feed_rate",
    "brim_width",
    "brim_adhesion_factor",
    "generate_raft",
    "raft_xy_expansion",
    "raft_base_layer_height",
    "raft_base_layer_width",
    "raft_base_layer_density",
    "raft_vert_margin",
    "raft_interface_flow_mult",
    "raft_interface_layers",
    "material_density",
    "material_cost",
];

const READ_ONLY_KEYS: &[&str] = &[
    "edge_width",
    "extrusion_area",
    "edge_offset",
    "material_area",
    "roof_layers",
    "floor_layers",
    "brim_lines",
    "solid_infill_clip_offset",
    "interface_clip_offset",
];

impl Config {
    /// Assign one setting by key. Unknown keys are rejected except for the
    /// built-in aliases `infill_feed_rate`, `gcode_variable` (or `v`) and
    /// `at_layer`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if READ_ONLY_KEYS.contains(&key) {
            return Err(ConfigError::ReadOnly(key.into()));
        }
        macro_rules! f {
            ($field:ident, $range:expr) => {{
                self.$field = check_f64(key, parse_f64(key, value)?, &$range)?;
            }};
        }
        macro_rules! int {
            ($field:ident, $range:expr) => {{
                self.$field = check_i64(key, parse_i64(key, value)?, &$range)?;
            }};
        }
        macro_rules! b {
            ($field:ident) => {{
                self.$field = parse_bool(value);
            }};
        }
        match key {
            "layer_height" => f!(layer_height, GT_ZERO),
            "tolerance" => f!(tolerance, GE_ZERO),
            "scale_constant" => f!(scale_constant, GT_ZERO),
            "coarseness" => f!(coarseness, GE_ZERO),
            "extrusion_width" => f!(extrusion_width, GT_ZERO),
            "xy_scale_factor" => f!(xy_scale_factor, GT_ZERO),
            "z_scale_factor" => f!(z_scale_factor, GT_ZERO),
            "x_center" => f!(x_center, ANY),
            "y_center" => f!(y_center, ANY),
            "packing_density" => f!(packing_density, UNIT),
            "edge_packing_density" => f!(edge_packing_density, UNIT),
            "shell_clip" => f!(shell_clip, GE_ZERO),
            "extra_offset" => f!(extra_offset, ANY),
            "infill_density" => f!(infill_density, UNIT),
            "infill_pattern" => {
                self.infill_pattern = match value {
                    "grid" => FillPattern::Grid,
                    "triangle" => FillPattern::Triangle,
                    "triangle2" => FillPattern::Triangle2,
                    "rectilinear" => FillPattern::Rectilinear,
                    _ => {
                        return Err(ConfigError::BadValue { key: key.into(), value: value.into() })
                    }
                };
            }
            "solid_infill_angle" => f!(solid_infill_angle, ANY),
            "sparse_infill_angle" => f!(sparse_infill_angle, ANY),
            "shells" => int!(shells, GE_ZERO),
            "roof_thickness" => f!(roof_thickness, GE_ZERO),
            "floor_thickness" => f!(floor_thickness, GE_ZERO),
            "min_shell_contact" => f!(min_shell_contact, GE_ZERO),
            "solid_fill_expansion" => f!(solid_fill_expansion, GE_ZERO),
            "material_diameter" => f!(material_diameter, GT_ZERO),
            "flow_multiplier" => f!(flow_multiplier, GE_ZERO),
            "feed_rate" => f!(feed_rate, GT_ZERO),
            "perimeter_feed_rate" => f!(perimeter_feed_rate, ANY),
            "loop_feed_rate" => f!(loop_feed_rate, ANY),
            "solid_infill_feed_rate" => f!(solid_infill_feed_rate, ANY),
            "sparse_infill_feed_rate" => f!(sparse_infill_feed_rate, ANY),
            "support_feed_rate" => f!(support_feed_rate, ANY),
            "iron_feed_rate" => f!(iron_feed_rate, ANY),
            "travel_feed_rate" => f!(travel_feed_rate, ANY),
            "first_layer_mult" => f!(first_layer_mult, GT_ZERO),
            "coast_len" => f!(coast_len, GE_ZERO),
            "wipe_len" => f!(wipe_len, GE_ZERO),
            "retract_len" => f!(retract_len, GE_ZERO),
            "retract_speed" => f!(retract_speed, GT_ZERO),
            "moving_retract_speed" => f!(moving_retract_speed, ANY),
            "restart_speed" => f!(restart_speed, ANY),
            "retract_min_travel" => f!(retract_min_travel, GE_ZERO),
            "retract_threshold" => f!(retract_threshold, GE_ZERO),
            "retract_within_island" => b!(retract_within_island),
            "retract_after_shells" => b!(retract_after_shells),
            "moving_retract" => b!(moving_retract),
            "extra_restart_len" => f!(extra_restart_len, ANY),
            "cool_layer" => int!(cool_layer, Range::new(Some(-1.0), None, true, false)),
            "start_gcode" => self.start_gcode = value.into(),
            "end_gcode" => self.end_gcode = value.into(),
            "cool_on_gcode" => self.cool_on_gcode = value.into(),
            "cool_off_gcode" => self.cool_off_gcode = value.into(),
            "edge_overlap" => f!(edge_overlap, UNIT),
            "comb" => b!(comb),
            "strict_shell_order" => b!(strict_shell_order),
            "align_seams" => b!(align_seams),
            "align_interior_seams" => b!(align_interior_seams),
            "simplify_insets" => b!(simplify_insets),
            "fill_inset_gaps" => b!(fill_inset_gaps),
            "no_solid" => b!(no_solid),
            "anchor" => b!(anchor),
            "outside_first" => b!(outside_first),
            "iron_top_surface" => b!(iron_top_surface),
            "separate_z_travel" => b!(separate_z_travel),
            "preserve_layer_offset" => b!(preserve_layer_offset),
            "combine_all" => b!(combine_all),
            "poly_fill_type" => {
                self.poly_fill_type = match value {
                    "even_odd" => FillKind::EvenOdd,
                    "non_zero" => FillKind::NonZero,
                    "positive" => FillKind::Positive,
                    "negative" => FillKind::Negative,
                    _ => {
                        return Err(ConfigError::BadValue { key: key.into(), value: value.into() })
                    }
                };
            }
            "inset_join_type" => self.inset_join_type = parse_join(key, value)?,
            "outset_join_type" => self.outset_join_type = parse_join(key, value)?,
            "offset_miter_limit" => f!(offset_miter_limit, Range::new(Some(2.0), None, true, false)),
            "offset_arc_tolerance" => {
                f!(offset_arc_tolerance, Range::new(Some(0.25), None, true, false))
            }
            "fill_threshold" => f!(fill_threshold, GE_ZERO),
            "infill_smooth_threshold" => {
                f!(infill_smooth_threshold, Range::new(Some(0.0), Some(4.0), true, true))
            }
            "min_sparse_infill_len" => f!(min_sparse_infill_len, GE_ZERO),
            "infill_overlap" => f!(infill_overlap, Range::new(Some(0.0), Some(0.5), true, true)),
            "iron_flow_multiplier" => f!(iron_flow_multiplier, UNIT),
            "iron_density" => f!(iron_density, Range::new(Some(1.0), None, true, false)),
            "generate_support" => b!(generate_support),
            "support_everywhere" => b!(support_everywhere),
            "solid_support_base" => b!(solid_support_base),
            "connect_support_lines" => b!(connect_support_lines),
            "expand_support_interface" => b!(expand_support_interface),
            "support_angle" => f!(support_angle, Range::new(Some(0.0), Some(90.0), false, false)),
            "support_margin" => f!(support_margin, GE_ZERO),
            "support_vert_margin" => int!(support_vert_margin, GE_ZERO),
            "interface_roof_layers" => int!(interface_roof_layers, GE_ZERO),
            "interface_floor_layers" => int!(interface_floor_layers, GE_ZERO),
            "support_xy_expansion" => f!(support_xy_expansion, GE_ZERO),
            "support_density" => f!(support_density, Range::new(Some(0.0), Some(1.0), false, true)),
            "interface_density" => {
                f!(interface_density, Range::new(Some(0.0), Some(1.0), false, true))
            }
            "support_flow_mult" => {
                f!(support_flow_mult, Range::new(Some(0.0), Some(1.0), false, true))
            }
            "support_wipe_len" => f!(support_wipe_len, GE_ZERO),
            "min_layer_time" => f!(min_layer_time, GE_ZERO),
            "layer_time_samples" => int!(layer_time_samples, Range::new(Some(1.0), None, true, false)),
            "min_feed_rate" => f!(min_feed_rate, GT_ZERO),
            "brim_width" => f!(brim_width, GE_ZERO),
            "brim_adhesion_factor" => f!(brim_adhesion_factor, UNIT),
            "generate_raft" => b!(generate_raft),
            "raft_xy_expansion" => f!(raft_xy_expansion, GE_ZERO),
            "raft_base_layer_height" => f!(raft_base_layer_height, GT_ZERO),
            "raft_base_layer_width" => f!(raft_base_layer_width, GT_ZERO),
            "raft_base_layer_density" => {
                f!(raft_base_layer_density, Range::new(Some(0.0), Some(1.0), false, true))
            }
            "raft_vert_margin" => f!(raft_vert_margin, GE_ZERO),
            "raft_interface_flow_mult" => f!(raft_interface_flow_mult, GT_ZERO),
            "raft_interface_layers" => int!(raft_interface_layers, GE_ZERO),
            "material_density" => f!(material_density, GE_ZERO),
            "material_cost" => f!(material_cost, GE_ZERO),
            "infill_feed_rate" => {
                self.set("solid_infill_feed_rate", value)?;
                self.set("sparse_infill_feed_rate", value)?;
            }
            "gcode_variable" | "v" => {
                let (name, text) = value.split_once('=').unwrap_or((value, ""));
                if self.is_setting(name) {
                    return Err(ConfigError::VariableIsSetting(name.into()));
                }
                self.user_vars.retain(|uv| uv.key != name);
                self.user_vars.push(UserVar { key: name.into(), value: text.into() });
            }
            "at_layer" => {
                let (layer, text) = value.split_once('=').unwrap_or((value, ""));
                let layer = parse_i64(key, layer)?;
                self.at_layer.push(AtLayerGcode { layer, value: text.into() });
            }
            _ => return Err(ConfigError::UnknownKey(key.into())),
        }
        Ok(())
    }

    /// Whether `key` names a setting (including read-only derived ones).
    pub fn is_setting(&self, key: &str) -> bool {
        READ_ONLY_KEYS.contains(&key) || SETTING_KEYS.contains(&key)
    }

    /// Look up a setting's current value as display text, for `{variable}`
    /// substitution in G-code templates. Feed rates are presented in units
    /// per minute, the way the emitted commands use them.
    pub fn lookup(&self, key: &str) -> Option<String> {
        if let Some(uv) = self.user_vars.iter().find(|uv| uv.key == key) {
            return Some(uv.value.clone());
        }
        let f = |v: f64| Some(format!("{v}"));
        let i = |v: i64| Some(format!("{v}"));
        let feed = |v: f64| Some(format!("{}", (v * 60.0).round() as i64));
        match key {
            "layer_height" => f(self.layer_height),
            "extrusion_width" => f(self.extrusion_width),
            "edge_width" => f(self.edge_width),
            "infill_density" => f(self.infill_density),
            "shells" => i(self.shells),
            "feed_rate" => feed(self.feed_rate),
            "perimeter_feed_rate" => feed(self.perimeter_feed_rate),
            "loop_feed_rate" => feed(self.loop_feed_rate),
            "solid_infill_feed_rate" => feed(self.solid_infill_feed_rate),
            "sparse_infill_feed_rate" => feed(self.sparse_infill_feed_rate),
            "support_feed_rate" => feed(self.support_feed_rate),
            "iron_feed_rate" => feed(self.iron_feed_rate),
            "travel_feed_rate" => feed(self.travel_feed_rate),
            "retract_len" => f(self.retract_len),
            "retract_speed" => feed(self.retract_speed),
            "restart_speed" => feed(self.restart_speed),
            "min_feed_rate" => feed(self.min_feed_rate),
            "material_diameter" => f(self.material_diameter),
            "scale_constant" => f(self.scale_constant),
            "roof_thickness" => f(self.roof_thickness),
            "floor_thickness" => f(self.floor_thickness),
            "support_angle" => f(self.support_angle),
            "brim_width" => f(self.brim_width),
            "first_layer_mult" => f(self.first_layer_mult),
            "min_layer_time" => f(self.min_layer_time),
            _ => None,
        }
    }

    /// Validate cross-setting constraints and compute every derived value.
    /// Must be called once after the last `set` and before slicing.
    pub fn resolve(&mut self) -> crate::error::Result<()> {
        use std::f64::consts::FRAC_PI_4;
        if self.layer_height > self.extrusion_width {
            return Err(crate::error::SlicerError::InvalidSettings(
                "layer_height must not be greater than extrusion_width".into(),
            ));
        }
        let h = self.layer_height;
        let w = self.extrusion_width;
        self.roof_layers = (self.roof_thickness / h).round() as i64;
        self.floor_layers = (self.floor_thickness / h).round() as i64;
        if self.outside_first || self.shells < 2 {
            self.edge_packing_density = 1.0;
        }
        self.extrusion_area = w * h - (h * h - h * h * FRAC_PI_4) * (1.0 - self.packing_density);
        self.edge_width = (self.extrusion_area - h * h * FRAC_PI_4) / h + h;
        self.edge_offset =
            -(self.edge_width + (self.edge_width - w) * (1.0 - self.edge_packing_density)) / 2.0;
        self.material_area = self.material_diameter * self.material_diameter * FRAC_PI_4;
        self.brim_lines = (self.brim_width / w).round() as i64;
        self.solid_infill_clip_offset = ((0.5 + self.shells as f64
            - self.fill_threshold
            - self.min_shell_contact)
            * w)
            .max(0.0);
        self.xy_extra = (self.extra_offset + w * self.brim_lines as f64) * 2.0;
        if self.generate_support {
            self.xy_extra += (self.support_xy_expansion
                + (0.5 + self.support_margin) * self.edge_width
                - self.edge_offset)
                * 2.0;
        }
        let interface_clip_1 = w * (1.0 - self.edge_overlap) / 2.0
            + (0.5 + self.support_margin) * self.edge_width
            - self.edge_offset
            - w / 8.0;
        let interface_clip_2 = (self.support_angle.to_radians()).tan() * h;
        self.interface_clip_offset = interface_clip_1.min(interface_clip_2);
        if self.generate_raft {
            self.xy_extra += self.raft_xy_expansion * 2.0;
            self.object_z_extra += self.raft_base_layer_height
                + h * (self.raft_vert_margin + self.raft_interface_layers as f64);
        }
        // Negative feed rates are multiples of a base rate.
        fn feed(v: f64, base: f64) -> f64 {
            if v >= 0.0 {
                v
            } else {
                base * -v
            }
        }
        self.perimeter_feed_rate = feed(self.perimeter_feed_rate, self.feed_rate);
        self.loop_feed_rate = feed(self.loop_feed_rate, self.feed_rate);
        self.solid_infill_feed_rate = feed(self.solid_infill_feed_rate, self.feed_rate);
        self.sparse_infill_feed_rate = feed(self.sparse_infill_feed_rate, self.feed_rate);
        self.support_feed_rate = feed(self.support_feed_rate, self.feed_rate);
        self.iron_feed_rate = feed(self.iron_feed_rate, self.solid_infill_feed_rate);
        self.travel_feed_rate = feed(self.travel_feed_rate, self.feed_rate);
        self.moving_retract_speed = feed(self.moving_retract_speed, self.retract_speed);
        self.restart_speed = feed(self.restart_speed, self.retract_speed);
        Ok(())
    }

    /// Convert model units to scaled grid units.
    pub fn scale(&self, v: f64) -> i64 {
        (v * self.scale_constant).round() as i64
    }

    /// Convert scaled grid units back to model units.
    pub fn unscale(&self, v: i64) -> f64 {
        v as f64 / self.scale_constant
    }

    /// Path simplification epsilon in scaled units.
    pub fn simplify_epsilon(&self) -> f64 {
        self.coarseness * self.scale_constant
    }
}

fn parse_join(key: &str, value: &str) -> Result<JoinStyle, ConfigError> {
    match value {
        "miter" => Ok(JoinStyle::Miter),
        "square" => Ok(JoinStyle::Square),
        "round" => Ok(JoinStyle::Round),
        _ => Err(ConfigError::BadValue { key: key.into(), value: value.into() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_set_and_range() {
        let mut cfg = Config::default();
        cfg.set("layer_height", "0.3").unwrap();
        assert_relative_eq!(cfg.layer_height, 0.3);
        assert!(matches!(
            cfg.set("layer_height", "0"),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            cfg.set("infill_density", "1.5"),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(cfg.set("nonsense", "1"), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn test_read_only_rejected() {
        let mut cfg = Config::default();
        assert!(matches!(cfg.set("edge_width", "0.5"), Err(ConfigError::ReadOnly(_))));
        assert!(matches!(cfg.set("roof_layers", "3"), Err(ConfigError::ReadOnly(_))));
    }

    #[test]
    fn test_enum_parsing() {
        let mut cfg = Config::default();
        cfg.set("infill_pattern", "triangle2").unwrap();
        assert_eq!(cfg.infill_pattern, FillPattern::Triangle2);
        assert!(cfg.set("infill_pattern", "hexagon").is_err());
        cfg.set("inset_join_type", "round").unwrap();
        assert_eq!(cfg.inset_join_type, JoinStyle::Round);
        cfg.set("poly_fill_type", "even_odd").unwrap();
        assert_eq!(cfg.poly_fill_type, FillKind::EvenOdd);
    }

    #[test]
    fn test_bool_parsing() {
        let mut cfg = Config::default();
        cfg.set("comb", "false").unwrap();
        assert!(!cfg.comb);
        cfg.set("comb", "yes").unwrap();
        assert!(cfg.comb);
        cfg.set("comb", "0").unwrap();
        assert!(!cfg.comb);
        cfg.set("comb", "1").unwrap();
        assert!(cfg.comb);
    }

    #[test]
    fn test_infill_feed_rate_alias() {
        let mut cfg = Config::default();
        cfg.set("infill_feed_rate", "42").unwrap();
        assert_relative_eq!(cfg.solid_infill_feed_rate, 42.0);
        assert_relative_eq!(cfg.sparse_infill_feed_rate, 42.0);
    }

    #[test]
    fn test_gcode_variable_and_at_layer() {
        let mut cfg = Config::default();
        cfg.set("gcode_variable", "bed_temp=60").unwrap();
        assert_eq!(cfg.lookup("bed_temp").as_deref(), Some("60"));
        // Redefinition replaces.
        cfg.set("v", "bed_temp=70").unwrap();
        assert_eq!(cfg.user_vars.len(), 1);
        assert_eq!(cfg.lookup("bed_temp").as_deref(), Some("70"));
        assert!(matches!(
            cfg.set("gcode_variable", "layer_height=9"),
            Err(ConfigError::VariableIsSetting(_))
        ));
        cfg.set("at_layer", "5=M106 S128").unwrap();
        assert_eq!(cfg.at_layer[0].layer, 5);
        assert_eq!(cfg.at_layer[0].value, "M106 S128");
    }

    #[test]
    fn test_resolve_derived_values() {
        let mut cfg = Config::default();
        cfg.resolve().unwrap();
        // roof/floor 0.8 at h = 0.2
        assert_eq!(cfg.roof_layers, 4);
        assert_eq!(cfg.floor_layers, 4);
        assert!(cfg.edge_width > cfg.extrusion_width);
        assert!(cfg.edge_offset < 0.0);
        assert_relative_eq!(
            cfg.material_area,
            1.75 * 1.75 * std::f64::consts::FRAC_PI_4
        );
        // Negative feed rates resolved into positives.
        assert_relative_eq!(cfg.perimeter_feed_rate, 25.0);
        assert_relative_eq!(cfg.loop_feed_rate, 35.0);
        assert_relative_eq!(cfg.moving_retract_speed, 10.0);
    }

    #[test]
    fn test_resolve_rejects_thick_layers() {
        let mut cfg = Config::default();
        cfg.set("layer_height", "0.5").unwrap();
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn test_edge_packing_density_forced() {
        let mut cfg = Config::default();
        cfg.set("outside_first", "true").unwrap();
        cfg.resolve().unwrap();
        assert_relative_eq!(cfg.edge_packing_density, 1.0);
    }

    #[test]
    fn test_scale_round_trip() {
        let cfg = Config::default();
        let v = cfg.scale(1.2345);
        assert_eq!(v, 1_234_500);
        assert_relative_eq!(cfg.unscale(v), 1.2345);
    }
}
