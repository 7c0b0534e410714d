use ansi_term::Colour::{Green, Red};
use anyhow::{anyhow, Result};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::{load_spec, validate_spec, Environment};
use crate::error::ConfigureError;

/// Validate a spec file, or every `*.yml`/`*.yaml` file under a directory.
pub fn validate_target(target: &Path, env: &dyn Environment) -> Result<()> {
    if !target.exists() {
        return Err(anyhow!(
            "{:?} ... {} - file/directory does not exist",
            target,
            Red.paint("Failed")
        ));
    }

    if !target.is_dir() {
        return validate_file(target, env);
    }

    // Scan all files recursive from the target directory
    let mut files = vec![];
    for entry in WalkDir::new(target).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_yaml(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    let invalid = files
        .iter()
        .filter(|file| {
            // Validate but don't stop at the first bad file
            validate_file(file, env)
                .map_err(|e| println!("{}", e))
                .is_err()
        })
        .count();

    if invalid > 0 {
        return Err(anyhow!(
            "{} of {} file(s) under {:?} are invalid",
            invalid,
            files.len(),
            target
        ));
    }

    Ok(())
}

/// Validate one spec file.
pub fn validate_file(file: &Path, env: &dyn Environment) -> Result<()> {
    let invalid = |e: ConfigureError| anyhow!("{:?} ... {} - {}", file, Red.paint("invalid"), e);

    let tree = load_spec(file, env).map_err(|e| invalid(e.into()))?;
    let spec = validate_spec(&tree).map_err(|e| invalid(ConfigureError::Validation(e)))?;

    // "OK" in green color
    println!("{:?} ... {} ({} roles)", file, Green.paint("ok"), spec.len());

    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}
