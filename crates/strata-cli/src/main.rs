//! strata CLI - slice a binary STL into G-code.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use strata_slicer::{position_mesh, slice_mesh, Config};
use strata_slicer_gcode::write_gcode;

mod config_file;
mod stl;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Slice a binary STL into G-code", long_about = None)]
struct Cli {
    /// Input STL path ('-' reads stdin)
    input: String,

    /// Output G-code path ('-' writes stdout)
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: String,

    /// Load a configuration file (repeatable, applied in order)
    #[arg(short = 'c', long = "config")]
    config: Vec<PathBuf>,

    /// Set one option as key=value (repeatable, applied after files)
    #[arg(short = 'S', long = "set")]
    set: Vec<String>,

    /// Layer height
    #[arg(short = 'l')]
    layer_height: Option<f64>,

    /// Extrusion width
    #[arg(short = 'w')]
    extrusion_width: Option<f64>,

    /// Segment connection tolerance
    #[arg(short = 't')]
    tolerance: Option<f64>,

    /// Scale the object by this factor
    #[arg(short = 's', default_value_t = 1.0)]
    scale: f64,

    /// Sparse infill density
    #[arg(short = 'd')]
    infill_density: Option<f64>,

    /// Number of shells
    #[arg(short = 'n')]
    shells: Option<i64>,

    /// Roof thickness
    #[arg(short = 'r')]
    roof_thickness: Option<f64>,

    /// Floor thickness
    #[arg(short = 'f')]
    floor_thickness: Option<f64>,

    /// Brim width
    #[arg(short = 'b')]
    brim_width: Option<f64>,

    /// Output coarseness
    #[arg(short = 'C')]
    coarseness: Option<f64>,

    /// Translate the object in X
    #[arg(short = 'x', default_value_t = 0.0)]
    x_translate: f64,

    /// Translate the object in Y
    #[arg(short = 'y', default_value_t = 0.0)]
    y_translate: f64,

    /// Chop off the bottom of the object
    #[arg(short = 'z', default_value_t = 0.0)]
    z_chop: f64,
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::default();
    for path in &cli.config {
        config_file::load(&mut cfg, path)?;
    }
    for pair in &cli.set {
        let (key, value) = pair.split_once('=').unwrap_or((pair.as_str(), ""));
        cfg.set(key, value).map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    let shorthand: [(&str, Option<String>); 8] = [
        ("layer_height", cli.layer_height.map(|v| v.to_string())),
        ("extrusion_width", cli.extrusion_width.map(|v| v.to_string())),
        ("tolerance", cli.tolerance.map(|v| v.to_string())),
        ("infill_density", cli.infill_density.map(|v| v.to_string())),
        ("shells", cli.shells.map(|v| v.to_string())),
        ("roof_thickness", cli.roof_thickness.map(|v| v.to_string())),
        ("floor_thickness", cli.floor_thickness.map(|v| v.to_string())),
        ("brim_width", cli.brim_width.map(|v| v.to_string())),
    ];
    for (key, value) in shorthand {
        if let Some(value) = value {
            cfg.set(key, &value).map_err(|e| anyhow::anyhow!("{e}"))?;
        }
    }
    if let Some(coarseness) = cli.coarseness {
        cfg.set("coarseness", &coarseness.to_string())
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    cfg.x_center += cli.x_translate;
    cfg.y_center += cli.y_translate;
    cfg.resolve().map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(cfg)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if cli.scale == 0.0 {
        bail!("scale factor cannot be 0");
    }
    let cfg = build_config(&cli)?;
    log::info!("configuration: {cfg:#?}");

    let mut mesh = stl::read_stl(&cli.input)
        .with_context(|| format!("failed to read stl: {}", cli.input))?;
    log::info!(
        "loaded object: {} polygons, {:.3} x {:.3} x {:.3}",
        mesh.triangles.len(),
        mesh.width,
        mesh.depth,
        mesh.height
    );

    position_mesh(&mut mesh, &cfg, cli.scale, cli.z_chop);
    log::info!(
        "placed at ({:.3}, {:.3}), height {:.3}",
        mesh.center.x,
        mesh.center.y,
        mesh.height
    );

    let start = std::time::Instant::now();
    let mut result = slice_mesh(mesh, &cfg).map_err(|e| anyhow::anyhow!("{e}"))?;
    log::info!(
        "sliced {} layers ({} islands) in {:.3}s",
        result.summary.layer_count,
        result.summary.island_count,
        start.elapsed().as_secs_f64()
    );

    let stats = if cli.output == "-" {
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        let stats = write_gcode(&mut out, &mut result, &cfg)?;
        out.flush()?;
        stats
    } else {
        let file = File::create(&cli.output)
            .with_context(|| format!("failed to open output: {}", cli.output))?;
        let mut out = BufWriter::new(file);
        let stats = write_gcode(&mut out, &mut result, &cfg)?;
        out.flush()?;
        stats
    };
    log::info!("material length = {:.4}", stats.material_length);
    log::info!("material mass   = {:.4}", stats.material_mass);
    log::info!("material cost   = {:.4}", stats.material_cost);
    Ok(())
}
