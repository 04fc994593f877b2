use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Extension of generated audio files
pub const OUTPUT_EXTENSION: &str = "wav";

/// Number of existing audio files in `dir`, plus one
///
/// A missing directory counts as empty.
///
/// # Errors
/// Returns error if the directory exists but cannot be listed
pub fn next_output_ordinal(dir: &Path) -> io::Result<u32> {
    if !dir.exists() {
        return Ok(1);
    }

    let count = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(OUTPUT_EXTENSION))
        })
        .count();

    Ok(u32::try_from(count).unwrap_or(u32::MAX - 1) + 1)
}

/// Path `<dir>/<n>.wav` for the next output, creating `dir` if needed
///
/// Starts at [`next_output_ordinal`] and skips names that already exist,
/// so a gap left by a deleted file never overwrites a later one.
///
/// # Errors
/// Returns error if the directory cannot be created or listed
pub fn next_output_path(dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let mut ordinal = next_output_ordinal(dir)?;
    loop {
        let candidate = dir.join(format!("{ordinal}.{OUTPUT_EXTENSION}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        ordinal = ordinal.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn create_test_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "piper_speak_output_{label}_{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_ordinal_after_two_files() {
        let dir = create_test_dir("two");
        fs::write(dir.join("1.wav"), b"fake").unwrap();
        fs::write(dir.join("2.wav"), b"fake").unwrap();

        assert_eq!(next_output_ordinal(&dir).unwrap(), 3);
        assert_eq!(next_output_path(&dir).unwrap(), dir.join("3.wav"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_ordinal_ignores_other_files() {
        let dir = create_test_dir("mixed");
        fs::write(dir.join("1.WAV"), b"fake").unwrap();
        fs::write(dir.join("notes.txt"), b"text").unwrap();
        fs::create_dir_all(dir.join("old.wav")).unwrap();

        assert_eq!(next_output_ordinal(&dir).unwrap(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_directory_starts_at_one() {
        let dir = create_test_dir("missing").join("Output");

        assert_eq!(next_output_ordinal(&dir).unwrap(), 1);
        assert_eq!(next_output_path(&dir).unwrap(), dir.join("1.wav"));
        assert!(dir.is_dir());

        let _ = fs::remove_dir_all(dir.parent().unwrap());
    }

    #[test]
    fn test_gap_does_not_overwrite() {
        let dir = create_test_dir("gap");
        // 1.wav was deleted, so the count says 3 but 3.wav exists
        fs::write(dir.join("2.wav"), b"fake").unwrap();
        fs::write(dir.join("3.wav"), b"fake").unwrap();

        assert_eq!(next_output_ordinal(&dir).unwrap(), 3);
        assert_eq!(next_output_path(&dir).unwrap(), dir.join("4.wav"));

        let _ = fs::remove_dir_all(&dir);
    }
}
