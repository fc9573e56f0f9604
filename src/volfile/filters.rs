//! Volfile filters (spec.md §4.4 "Serialization"): after a volfile is
//! written and renamed into place, every executable file in a filter
//! directory is invoked with the volfile's path as its single argument,
//! in deterministic (sorted) order, and may rewrite the file in place.

use std::fs;
use std::path::Path;
use std::process::Command;

use super::VolfileError;

pub fn apply_filters(volfile_path: &Path, filter_dir: &Path) -> Result<(), VolfileError> {
    let entries = match fs::read_dir(filter_dir) {
        Ok(entries) => entries,
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(VolfileError::Io {
                path: filter_dir.to_path_buf(),
                source,
            })
        }
    };

    let mut filters: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_executable(p))
        .collect();
    filters.sort();

    for filter in filters {
        Command::new(&filter)
            .arg(volfile_path)
            .status()
            .map_err(|source| VolfileError::Io {
                path: filter.clone(),
                source,
            })?;
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[cfg(unix)]
    #[test]
    fn filters_run_in_sorted_order_and_mutate_in_place() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let volfile = dir.path().join("v1.vol");
        fs::write(&volfile, "original\n").unwrap();

        let filter_dir = dir.path().join("filters");
        fs::create_dir(&filter_dir).unwrap();
        let script_path = filter_dir.join("10-append.sh");
        let mut script = fs::File::create(&script_path).unwrap();
        writeln!(script, "#!/bin/sh").unwrap();
        writeln!(script, "echo appended >> \"$1\"").unwrap();
        drop(script);
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();

        apply_filters(&volfile, &filter_dir).unwrap();
        let contents = fs::read_to_string(&volfile).unwrap();
        assert!(contents.contains("appended"));
    }

    #[test]
    fn missing_filter_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let volfile = dir.path().join("v1.vol");
        fs::write(&volfile, "x").unwrap();
        assert!(apply_filters(&volfile, &dir.path().join("no-such-dir")).is_ok());
    }
}
