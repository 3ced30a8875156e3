//! Package lookup across ament install prefixes

use std::path::{Path, PathBuf};

/// Ordered list of install prefixes, searched first to last
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmentIndex {
    prefixes: Vec<PathBuf>,
}

impl AmentIndex {
    /// Build the index from `AMENT_PREFIX_PATH`, falling back to `/opt/ros/$ROS_DISTRO`
    pub fn from_env() -> Self {
        let mut prefixes: Vec<PathBuf> = std::env::var("AMENT_PREFIX_PATH")
            .map(|value| {
                value
                    .split(':')
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        if let Ok(distro) = std::env::var("ROS_DISTRO") {
            let system = PathBuf::from("/opt/ros").join(distro);
            if !prefixes.contains(&system) {
                prefixes.push(system);
            }
        }

        log::debug!("Ament prefixes: {:?}", prefixes);
        Self { prefixes }
    }

    pub fn with_prefixes<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    /// `<prefix>/share/<package>` of the first prefix that has it
    pub fn package_share(&self, package: &str) -> Option<PathBuf> {
        self.first_existing(|prefix| prefix.join("share").join(package))
    }

    /// `<prefix>/lib/<package>/<executable>` of the first prefix that has it
    pub fn package_executable(&self, package: &str, executable: &str) -> Option<PathBuf> {
        self.first_existing(|prefix| prefix.join("lib").join(package).join(executable))
    }

    fn first_existing(&self, candidate: impl Fn(&Path) -> PathBuf) -> Option<PathBuf> {
        self.prefixes
            .iter()
            .map(|prefix| candidate(prefix))
            .find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_share_first_prefix_wins() {
        let overlay = tempfile::tempdir().unwrap();
        let underlay = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(overlay.path().join("share/rr1_description")).unwrap();
        std::fs::create_dir_all(underlay.path().join("share/rr1_description")).unwrap();
        std::fs::create_dir_all(underlay.path().join("share/gazebo_ros")).unwrap();

        let index = AmentIndex::with_prefixes([overlay.path(), underlay.path()]);
        assert_eq!(
            index.package_share("rr1_description"),
            Some(overlay.path().join("share/rr1_description"))
        );
        assert_eq!(
            index.package_share("gazebo_ros"),
            Some(underlay.path().join("share/gazebo_ros"))
        );
        assert_eq!(index.package_share("missing"), None);
    }

    #[test]
    fn test_package_executable() {
        let prefix = tempfile::tempdir().unwrap();
        let lib = prefix.path().join("lib/controller_manager");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("spawner"), "").unwrap();

        let index = AmentIndex::with_prefixes([prefix.path()]);
        assert_eq!(
            index.package_executable("controller_manager", "spawner"),
            Some(lib.join("spawner"))
        );
        assert_eq!(index.package_executable("controller_manager", "unspawner"), None);
    }
}
