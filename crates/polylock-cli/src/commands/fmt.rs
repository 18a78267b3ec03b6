use super::{json_pretty, EXIT_OUT_OF_DATE, EXIT_SUCCESS};
use polylock_schema::{HelpText, Lockfile};
use std::path::Path;

/// Re-render `path` sorted, without capability packages, and with a fresh help header.
pub fn run(path: &Path, check: bool, json: bool) -> Result<u8, String> {
    let current = std::fs::read_to_string(path)
        .map_err(|e| format!("lock file I/O error: {}: {e}", path.display()))?;
    let lockfile = Lockfile::parse(&current).map_err(|e| e.to_string())?;

    let choices = lockfile.metadata.recorded_options();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let help = HelpText {
        file_name: &file_name,
        metadata_choices: &choices,
    };
    let formatted = lockfile.render(Some(&help)).map_err(|e| e.to_string())?;
    let unchanged = formatted == current;

    if !check && !unchanged {
        lockfile
            .write_to_file(path, &choices, true)
            .map_err(|e| e.to_string())?;
    }

    if json {
        let payload = serde_json::json!({
            "lockfile": path,
            "formatted": unchanged,
            "rewritten": !check && !unchanged,
        });
        println!("{}", json_pretty(&payload)?);
    } else if unchanged {
        println!("{} is formatted", path.display());
    } else if check {
        println!("{} would be reformatted", path.display());
    } else {
        println!("reformatted {}", path.display());
    }

    if check && !unchanged {
        Ok(EXIT_OUT_OF_DATE)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
