//! Line-oriented `key=value` configuration files.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use strata_slicer::Config;

/// Apply configuration text. Lines are `key=value`; `#` starts a comment;
/// a line beginning with a space or tab continues the previous value
/// (keeping the newline, so multi-line G-code fragments work). Errors carry
/// `file:line` context.
pub fn apply(cfg: &mut Config, text: &str, label: &str) -> Result<()> {
    let physical: Vec<&str> = text.split('\n').collect();
    let mut i = 0;
    while i < physical.len() {
        let line_number = i + 1;
        let mut logical = physical[i].to_string();
        while i + 1 < physical.len()
            && (physical[i + 1].starts_with(' ') || physical[i + 1].starts_with('\t'))
        {
            logical.push('\n');
            logical.push_str(physical[i + 1]);
            i += 1;
        }
        i += 1;
        if logical.is_empty() || logical.starts_with('#') {
            continue;
        }
        let (key, value) = logical.split_once('=').unwrap_or((logical.as_str(), ""));
        cfg.set(key, value)
            .map_err(|e| anyhow!("{}", e.at(label, line_number)))?;
    }
    Ok(())
}

/// Load one configuration file into `cfg`.
pub fn load(cfg: &mut Config, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to open config file: {}", path.display()))?;
    apply(cfg, &text, &path.display().to_string())?;
    log::info!("loaded config file: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_keys_and_comments() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            "# comment\nlayer_height=0.3\n\nshells=4\ncomb=false\n",
            "test",
        )
        .unwrap();
        assert!((cfg.layer_height - 0.3).abs() < 1e-12);
        assert_eq!(cfg.shells, 4);
        assert!(!cfg.comb);
    }

    #[test]
    fn test_continuation_lines_keep_newlines() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            "start_gcode=G28\n\tM104 S{temp}\n\tG1 Z5\nshells=3\n",
            "test",
        )
        .unwrap();
        assert_eq!(cfg.start_gcode, "G28\n\tM104 S{temp}\n\tG1 Z5");
        assert_eq!(cfg.shells, 3);
    }

    #[test]
    fn test_error_carries_line_context() {
        let mut cfg = Config::default();
        let err = apply(&mut cfg, "layer_height=0.2\nbogus_key=1\n", "printer.cfg")
            .unwrap_err()
            .to_string();
        assert!(err.contains("line 2"), "{err}");
        assert!(err.contains("printer.cfg"), "{err}");
        assert!(err.contains("bogus_key"), "{err}");
    }
}
