use chrono::{DateTime, Local, Utc};
use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Profile mode for the application (dev or prod)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    fn app_name(self) -> &'static str {
        match self {
            Profile::Dev => "medtime-dev",
            Profile::Prod => "medtime",
        }
    }
}

fn project_dirs(profile: Profile) -> Option<ProjectDirs> {
    ProjectDirs::from("com", "medtime", profile.app_name())
}

/// Configuration directory; the dev profile gets its own
pub fn get_config_dir(profile: Profile) -> Option<PathBuf> {
    project_dirs(profile).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Data directory; the dev profile gets its own
pub fn get_data_dir(profile: Profile) -> Option<PathBuf> {
    project_dirs(profile).map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand `~` in a path string to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Format an instant in the local time zone for display
pub fn format_local(instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_leaves_plain_paths() {
        assert_eq!(expand_path("/tmp/medtime.db"), PathBuf::from("/tmp/medtime.db"));
        assert_eq!(expand_path("relative/app.db"), PathBuf::from("relative/app.db"));
    }

    #[test]
    fn expand_path_resolves_home() {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            assert_eq!(expand_path("~/x/app.db"), home.join("x/app.db"));
        }
    }

    #[test]
    fn dev_and_prod_dirs_differ() {
        if let (Some(dev), Some(prod)) = (get_data_dir(Profile::Dev), get_data_dir(Profile::Prod)) {
            assert_ne!(dev, prod);
        }
    }
}
