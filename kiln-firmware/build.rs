//! Build script for kiln-firmware
//!
//! - Sets up linker search paths for memory.x
//! - Validates kiln.toml at compile time

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sections the on-device loader understands
const KNOWN_SECTIONS: &[&str] = &[
    "safety",
    "timing",
    "relay",
    "adaptation",
    "recovery",
    "pid",
    "gain_schedule",
    "tuning",
    "retry",
    "profile",
];

fn main() {
    setup_linker();
    validate_config();
}

/// Set up linker search paths for memory.x
fn setup_linker() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // Copy memory.x to the output directory
    let memory_x = include_bytes!("memory.x");
    let mut f = File::create(out_dir.join("memory.x")).expect("create memory.x");
    f.write_all(memory_x).expect("write memory.x");

    // Tell rustc where to find memory.x
    println!("cargo:rustc-link-search={}", out_dir.display());

    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}

/// Validate kiln.toml at compile time
fn validate_config() {
    println!("cargo:rerun-if-changed=kiln.toml");

    let config_path = Path::new("kiln.toml");
    if !config_path.exists() {
        fail("kiln.toml not found", &["The firmware embeds kiln.toml; create one next to Cargo.toml".into()]);
    }

    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => fail("Failed to read kiln.toml", &[e.to_string()]),
    };

    let config: toml::Value = match toml::from_str(&content) {
        Ok(value) => value,
        Err(e) => fail(
            "Invalid TOML syntax in kiln.toml",
            &e.to_string().lines().map(str::to_string).collect::<Vec<_>>(),
        ),
    };

    let mut errors = Vec::new();
    validate_sections(&config, &mut errors);
    validate_safety(&config, &mut errors);
    validate_profiles(&config, &mut errors);

    if !errors.is_empty() {
        fail("Invalid kiln.toml", &errors);
    }

    println!("cargo:warning=kiln.toml validated successfully");
}

/// Abort the build with a boxed error report
fn fail(title: &str, lines: &[String]) -> ! {
    panic!(
        "\n\
        ╔══════════════════════════════════════════════════════════════════╗\n\
        ║  ERROR: {:<57}║\n\
        ╠══════════════════════════════════════════════════════════════════╣\n\
        {}\n\
        ╚══════════════════════════════════════════════════════════════════╝\n",
        title,
        format_error_lines(lines)
    );
}

/// Format error message lines with box drawing
fn format_error_lines(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| {
            let truncated = if line.len() > 62 {
                format!("{}...", &line[..59])
            } else {
                line.to_string()
            };
            format!("║  • {:<62} ║", truncated)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn number(value: &toml::Value) -> Option<f64> {
    match value {
        toml::Value::Integer(i) => Some(*i as f64),
        toml::Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Every top-level key must be a section the loader knows
fn validate_sections(config: &toml::Value, errors: &mut Vec<String>) {
    let Some(table) = config.as_table() else {
        errors.push("document must be a table".into());
        return;
    };
    for (name, value) in table {
        if !KNOWN_SECTIONS.contains(&name.as_str()) {
            errors.push(format!("unknown section [{}]", name));
        } else if !value.is_table() {
            errors.push(format!("'{}' must be a section", name));
        }
    }
    if table.get("profile").is_none() {
        errors.push("at least one [profile.*] is required".into());
    }
}

fn validate_safety(config: &toml::Value, errors: &mut Vec<String>) {
    let Some(safety) = config.get("safety") else {
        return;
    };
    let get = |key: &str| safety.get(key).and_then(number);

    if let (Some(max), Some(sensor_max)) = (get("max_temp"), get("sensor_max")) {
        if max >= sensor_max {
            errors.push("[safety] max_temp must be below sensor_max".into());
        }
    }
    if let (Some(min), Some(max)) = (get("sensor_min"), get("sensor_max")) {
        if min >= max {
            errors.push("[safety] sensor_min must be below sensor_max".into());
        }
    }
}

/// Validate firing profiles
fn validate_profiles(config: &toml::Value, errors: &mut Vec<String>) {
    let Some(profiles) = config.get("profile").and_then(|p| p.as_table()) else {
        return;
    };

    for (name, profile) in profiles {
        if name.len() > 24 {
            errors.push(format!("[profile.{}] name longer than 24 characters", name));
        }

        let steps = match profile.get("steps") {
            Some(toml::Value::Array(steps)) => steps,
            Some(_) => {
                errors.push(format!("[profile.{}] steps must be an array", name));
                continue;
            }
            None => {
                errors.push(format!("[profile.{}] missing 'steps'", name));
                continue;
            }
        };
        if steps.is_empty() {
            errors.push(format!("[profile.{}] steps cannot be empty", name));
        }

        for (i, step) in steps.iter().enumerate() {
            let Some(step) = step.as_table() else {
                errors.push(format!("[profile.{}] step {} must be a table", name, i));
                continue;
            };
            let has = |key: &str| step.get(key).and_then(number).is_some();

            match step.get("type").and_then(|t| t.as_str()) {
                Some("ramp") => {
                    if !has("target") || !has("rate") {
                        errors.push(format!("[profile.{}] ramp {} needs target and rate", name, i));
                    }
                }
                Some("hold") => {
                    if !has("target") || !has("duration") {
                        errors.push(format!("[profile.{}] hold {} needs target and duration", name, i));
                    }
                }
                Some("cooling") => {
                    if !has("target") && i + 1 != steps.len() {
                        errors.push(format!(
                            "[profile.{}] cooling {} without target must be last",
                            name, i
                        ));
                    }
                }
                Some(other) => {
                    errors.push(format!("[profile.{}] step {} has unknown type '{}'", name, i, other));
                }
                None => {
                    errors.push(format!("[profile.{}] step {} missing 'type'", name, i));
                }
            }

            for key in ["rate", "min_rate", "duration"] {
                if step.get(key).and_then(number).is_some_and(|v| v < 0.0) {
                    errors.push(format!("[profile.{}] step {} {} is negative", name, i, key));
                }
            }
        }
    }
}
