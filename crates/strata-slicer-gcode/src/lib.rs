#![warn(missing_docs)]

//! G-code generation for the strata slicer.
//!
//! This crate turns the abstract move stream planned by `strata-slicer`
//! into textual G-code: deltas only for changed axes, feed rates converted
//! to units per minute, layer-time feed scaling, configured prologue and
//! epilogue fragments with `{variable}` substitution, and per-layer
//! fragments.
//!
//! # Example
//!
//! ```ignore
//! use strata_slicer::{slice_mesh, Config};
//! use strata_slicer_gcode::write_gcode;
//!
//! let mut result = slice_mesh(mesh, &cfg)?;
//! let mut out = std::fs::File::create("out.gcode")?;
//! let stats = write_gcode(&mut out, &mut result, &cfg)?;
//! eprintln!("material length = {:.4}", stats.material_length);
//! ```

pub mod template;
pub mod writer;

pub use writer::{write_gcode, ExportStats, GcodeError};
