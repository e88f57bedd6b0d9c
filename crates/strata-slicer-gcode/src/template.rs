//! Configured G-code fragments with `{variable}` substitution.

use std::io::Write;

use strata_slicer::Config;

/// Write a configured fragment. `{name}` resolves against the settings and
/// user variables; `{a:b}` tries each alternative in order. An unresolved
/// variable logs a warning and inserts nothing. Leading whitespace and
/// blank lines are stripped so indented config files stay readable, and a
/// final newline is always emitted for a non-empty fragment.
pub fn write_fragment<W: Write>(out: &mut W, s: &str, cfg: &Config) -> std::io::Result<()> {
    if s.is_empty() {
        return Ok(());
    }
    let mut line_start = true;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '{' {
            match s[i + 1..].find('}') {
                Some(rel) => {
                    let key_str = &s[i + 1..i + 1 + rel];
                    let alternatives: Vec<&str> = key_str.split(':').collect();
                    for (k, key) in alternatives.iter().enumerate() {
                        if let Some(value) = cfg.lookup(key) {
                            out.write_all(value.as_bytes())?;
                            break;
                        } else if k + 1 == alternatives.len() {
                            log::warn!("variable not found: {key}");
                        }
                    }
                    i += rel + 2;
                }
                None => {
                    log::error!("syntax: expected '}}'");
                    out.write_all(b"{")?;
                    i += 1;
                }
            }
            line_start = false;
        } else if c == '\n' {
            if !line_start {
                out.write_all(b"\n")?;
            }
            line_start = true;
            i += 1;
        } else if !line_start || (c != '\t' && c != ' ') {
            line_start = false;
            out.write_all(&bytes[i..=i])?;
            i += 1;
        } else {
            i += 1;
        }
    }
    out.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(s: &str, cfg: &Config) -> String {
        let mut out = Vec::new();
        write_fragment(&mut out, s, cfg).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn cfg() -> Config {
        let mut c = Config::default();
        c.set("gcode_variable", "bed_temp=60").unwrap();
        c.resolve().unwrap();
        c
    }

    #[test]
    fn test_plain_text_gets_trailing_newline() {
        let c = cfg();
        assert_eq!(render("G28", &c), "G28\n");
        assert_eq!(render("", &c), "");
    }

    #[test]
    fn test_user_variable_substitution() {
        let c = cfg();
        assert_eq!(render("M140 S{bed_temp}", &c), "M140 S60\n");
    }

    #[test]
    fn test_setting_substitution_converts_feed_rates() {
        let c = cfg();
        // travel_feed_rate 120 units/s is presented as 7200 units/min.
        assert_eq!(render("G0 F{travel_feed_rate}", &c), "G0 F7200\n");
        assert_eq!(render("; lh {layer_height}", &c), "; lh 0.2\n");
    }

    #[test]
    fn test_unknown_variable_inserts_nothing() {
        let c = cfg();
        assert_eq!(render("M104 S{nozzle_temp}", &c), "M104 S\n");
    }

    #[test]
    fn test_fallback_chain() {
        let c = cfg();
        assert_eq!(render("S{nozzle_temp:bed_temp}", &c), "S60\n");
    }

    #[test]
    fn test_leading_whitespace_and_blank_lines_stripped() {
        let c = cfg();
        assert_eq!(render("  G28\n\n\tG1 Z5", &c), "G28\nG1 Z5\n");
    }
}
