//! On-disk layout (spec.md §4.3 "Layout"):
//! `<workdir>/vols/<volname>/info`,
//! `<workdir>/vols/<volname>/bricks/<host>:<exp_path>` (slashes in
//! export-path translated to hyphens), `<workdir>/peers/<uuid>`, and a
//! per-volume `cksum` file.

use std::path::{Path, PathBuf};

use uuid::Uuid;

pub struct Layout {
    workdir: PathBuf,
}

impl Layout {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self { workdir: workdir.into() }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn vols_dir(&self) -> PathBuf {
        self.workdir.join("vols")
    }

    pub fn volume_dir(&self, name: &str) -> PathBuf {
        self.vols_dir().join(name)
    }

    pub fn volume_info(&self, name: &str) -> PathBuf {
        self.volume_dir(name).join("info")
    }

    pub fn volume_cksum(&self, name: &str) -> PathBuf {
        self.volume_dir(name).join("cksum")
    }

    pub fn volume_run_dir(&self, name: &str) -> PathBuf {
        self.volume_dir(name).join("run")
    }

    pub fn brick_info(&self, volume: &str, host: &str, exp_path: &str) -> PathBuf {
        self.volume_dir(volume)
            .join("bricks")
            .join(brick_file_name(host, exp_path))
    }

    pub fn peers_dir(&self) -> PathBuf {
        self.workdir.join("peers")
    }

    pub fn peer_info(&self, uuid: &Uuid) -> PathBuf {
        self.peers_dir().join(uuid.to_string())
    }
}

/// `<host>:<exp_path>` with path slashes translated to hyphens (spec.md
/// §4.3).
pub fn brick_file_name(host: &str, exp_path: &str) -> String {
    format!("{}:{}", host, exp_path.replace('/', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brick_file_name_replaces_slashes() {
        assert_eq!(brick_file_name("h1", "/data/b1"), "h1:-data-b1");
    }

    #[test]
    fn layout_nests_under_workdir() {
        let layout = Layout::new("/tmp/work");
        assert_eq!(layout.volume_info("v1"), PathBuf::from("/tmp/work/vols/v1/info"));
        assert_eq!(layout.peers_dir(), PathBuf::from("/tmp/work/peers"));
    }
}
