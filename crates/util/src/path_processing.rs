use std::path::PathBuf;

use dirs_next::home_dir;

/// Resolves a user-supplied path from `BEACON_CONFIG_PATH` or `BEACON_STATE_DIR`.
///
/// Surrounding whitespace is dropped and a leading `~`, `~/` or `~\` is replaced by the
/// home directory. Without a home directory the tilde is kept as a literal path segment.
pub fn expand_tilde(path: &str) -> PathBuf {
    let path = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    match path.strip_prefix('~') {
        Some("") => home(),
        Some(rest) if rest.starts_with(['/', '\\']) => home().join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_home_prefix() {
        temp_env::with_var("HOME", Some("/tmp/beacon-home"), || {
            assert_eq!(expand_tilde("~/state/x.json"), PathBuf::from("/tmp/beacon-home/state/x.json"));
            assert_eq!(expand_tilde("~"), PathBuf::from("/tmp/beacon-home"));
        });
    }

    #[test]
    fn leaves_plain_paths_untouched() {
        assert_eq!(expand_tilde("  /var/run/beacon "), PathBuf::from("/var/run/beacon"));
        assert_eq!(expand_tilde("relative/dir"), PathBuf::from("relative/dir"));
        assert_eq!(expand_tilde("~beacon/dir"), PathBuf::from("~beacon/dir"));
    }
}
