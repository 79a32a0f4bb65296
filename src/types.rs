//! Core types for Tether

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// A fixed pairing of a local data directory and its mirrored remote folder.
///
/// Categories are synchronized independently; nothing links the state of one
/// to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Notes,
    Playlists,
    Templates,
    History,
    Images,
    UrlPad,
}

impl Category {
    /// Every category, in the order runs visit them
    pub const ALL: [Category; 6] = [
        Category::Notes,
        Category::Playlists,
        Category::Templates,
        Category::History,
        Category::Images,
        Category::UrlPad,
    ];

    /// Directory name under the application data root
    pub fn local_dir_name(&self) -> &'static str {
        match self {
            Category::Notes => "Notes",
            Category::Playlists => "Playlists",
            Category::Templates => "Templates",
            Category::History => "History",
            Category::Images => "Images",
            Category::UrlPad => "UrlPad",
        }
    }

    /// Top-level folder under the remote account's app-scoped root
    pub fn remote_dir(&self) -> String {
        format!("/{}", self.local_dir_name())
    }

    /// Local directory for this category under `data_root`
    pub fn local_dir(&self, data_root: &Path) -> PathBuf {
        data_root.join(self.local_dir_name())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.local_dir_name())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "notes" => Ok(Category::Notes),
            "playlists" => Ok(Category::Playlists),
            "templates" => Ok(Category::Templates),
            "history" => Ok(Category::History),
            "images" => Ok(Category::Images),
            "urlpad" | "url_pad" | "url-pad" => Ok(Category::UrlPad),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// A file as seen on one side of a sync pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the category root, `/`-separated
    pub relative_path: String,
    /// Content modification time, normalized with [`normalize_mtime`]
    pub modified_at: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
}

/// Truncate a timestamp to whole milliseconds.
///
/// Both sides of a comparison go through this so a file written with a
/// nanosecond clock still compares equal to the copy a store kept at
/// millisecond precision.
pub fn normalize_mtime(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(3)
}

/// Convert a filesystem timestamp into a normalized UTC time
pub fn system_time_to_utc(t: SystemTime) -> DateTime<Utc> {
    normalize_mtime(DateTime::<Utc>::from(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_category_round_trip_names() {
        for category in Category::ALL {
            let parsed: Category = category.to_string().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert_eq!("url-pad".parse::<Category>().unwrap(), Category::UrlPad);
        assert!("favorites".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_paths() {
        assert_eq!(Category::Templates.remote_dir(), "/Templates");
        assert_eq!(
            Category::Notes.local_dir(Path::new("/data")),
            PathBuf::from("/data/Notes")
        );
    }

    #[test]
    fn test_normalize_mtime_drops_sub_millis() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let n = normalize_mtime(t);
        assert_eq!(n.timestamp_subsec_nanos(), 123_000_000);
        assert_eq!(normalize_mtime(n), n);
    }
}
