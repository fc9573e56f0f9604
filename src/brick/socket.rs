//! Deterministic brick control-socket path (spec.md §4.5 step 5; §6 "Brick
//! socket path"): `<tmp>/<md5_of_source_path>.socket`, where the source
//! string is `<voldir>/run/<hostname>-<exp_path>`.

use std::path::{Path, PathBuf};

/// `exp_path` has its slashes translated to hyphens before hashing, matching
/// the on-disk brick-info filename convention (spec.md §4.3 "Layout").
pub fn brick_socket_path(voldir: &Path, tmp_dir: &Path, hostname: &str, exp_path: &str) -> PathBuf {
    let flattened = exp_path.trim_start_matches('/').replace('/', "-");
    let source = format!("{}/run/{}-{}", voldir.display(), hostname, flattened);
    let digest = md5::compute(source.as_bytes());
    tmp_dir.join(format!("{:x}.socket", digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_hash_to_the_same_path() {
        let voldir = Path::new("/var/lib/glusterd/vols/v1");
        let tmp = Path::new("/tmp");
        let a = brick_socket_path(voldir, tmp, "h1", "/data/b1");
        let b = brick_socket_path(voldir, tmp, "h1", "/data/b1");
        assert_eq!(a, b);
    }

    #[test]
    fn different_paths_hash_differently() {
        let voldir = Path::new("/var/lib/glusterd/vols/v1");
        let tmp = Path::new("/tmp");
        let a = brick_socket_path(voldir, tmp, "h1", "/data/b1");
        let b = brick_socket_path(voldir, tmp, "h1", "/data/b2");
        assert_ne!(a, b);
    }
}
