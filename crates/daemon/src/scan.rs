//! Scanner module for discovering videos in the input directory.
//!
//! The input directory is flat: only its direct children are considered, and
//! only regular files carrying the configured video extension.

use std::io;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Checks if a file name carries exactly the given extension (leading dot optional).
///
/// Matching is case-sensitive: `demo.MP4` is not an `mp4` video.
pub fn has_video_extension(file_name: &str, extension: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == extension.trim_start_matches('.'))
        .unwrap_or(false)
}

/// Lists the video file names directly inside `dir`, sorted by name.
///
/// Hidden files and subdirectories are ignored. Unreadable entries are
/// skipped; failing to read `dir` itself is an error so the caller can
/// report it and try again on the next poll.
pub fn list_videos(dir: &Path, extension: &str) -> io::Result<Vec<String>> {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    let mut names = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // depth 0 means the root itself could not be read
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(_) => continue,
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str() else {
            warn!(
                file = %entry.file_name().to_string_lossy(),
                dir = %dir.display(),
                "Skipping file with non UTF-8 name"
            );
            continue;
        };

        if name.starts_with('.') || !has_video_extension(name, extension) {
            continue;
        }

        names.push(name.to_string());
    }

    Ok(names)
}
