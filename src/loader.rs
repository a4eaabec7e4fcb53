// =============================================================================
// loader.rs - KEYWORD AND SOURCE LISTS
// =============================================================================
//
// Both list formats are one entry per line. Lines starting with '#' and blank
// lines are skipped. Source lists additionally keep only lines that start
// with "http", so a stray note in a sources file never turns into a request.
// =============================================================================

use std::path::Path;
use tracing::{error, info};

use crate::error::{ReactorError, Result};

fn entries(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(|line| line.trim_end_matches(['\r', '\n']))
        .filter(|line| !line.is_empty())
}

/// Every non-empty, non-comment line, in file order.
pub fn parse_keywords(contents: &str) -> Vec<String> {
    entries(contents).map(str::to_string).collect()
}

/// Like [`parse_keywords`], keeping only lines that start with `http`.
pub fn parse_sources(contents: &str) -> Vec<String> {
    entries(contents)
        .filter(|line| line.starts_with("http"))
        .map(str::to_string)
        .collect()
}

async fn read(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            info!(path = %path.display(), "loading contents of {}", path.display());
            Ok(contents)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!(path = %path.display(), "unable to load {}", path.display());
            Err(ReactorError::ConfigMissing {
                path: path.display().to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Load a keyword list. A missing file is `ConfigMissing`; an empty or
/// comment-only file is an empty list.
pub async fn load_keywords(path: impl AsRef<Path>) -> Result<Vec<String>> {
    read(path.as_ref()).await.map(|contents| parse_keywords(&contents))
}

/// Load a source URL list. Same rules as [`load_keywords`] plus the
/// `http` prefix filter.
pub async fn load_sources(path: impl AsRef<Path>) -> Result<Vec<String>> {
    read(path.as_ref()).await.map(|contents| parse_sources(&contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const MIXED: &str = "# watchlist\n\nalpha\nhttp://bad.example/hosts.txt\n  \nbeta\nhttps://feeds.example/ips\nftp://old.example/list\n";

    #[tokio::test]
    async fn test_keywords_skip_comments_and_blank_lines() {
        let file = fixture("#comment\n\nalpha\nbeta\n");
        assert_eq!(load_keywords(file.path()).await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_keyword_and_source_loaders_diverge_on_mixed_file() {
        let file = fixture(MIXED);
        let keywords = load_keywords(file.path()).await.unwrap();
        let sources = load_sources(file.path()).await.unwrap();

        assert_eq!(
            keywords,
            vec![
                "alpha",
                "http://bad.example/hosts.txt",
                "  ",
                "beta",
                "https://feeds.example/ips",
                "ftp://old.example/list",
            ]
        );
        assert_eq!(
            sources,
            vec!["http://bad.example/hosts.txt", "https://feeds.example/ips"]
        );
    }

    #[tokio::test]
    async fn test_empty_and_comment_only_files_are_empty_lists() {
        let empty = fixture("");
        let comments = fixture("# nothing\n#here\n\n");
        assert!(load_keywords(empty.path()).await.unwrap().is_empty());
        assert!(load_keywords(comments.path()).await.unwrap().is_empty());
        assert!(load_sources(comments.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("keywords.conf");
        assert!(matches!(
            load_keywords(&missing).await,
            Err(ReactorError::ConfigMissing { .. })
        ));
        assert!(matches!(
            load_sources(&missing).await,
            Err(ReactorError::ConfigMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_directory_path_is_an_io_error_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_keywords(dir.path()).await,
            Err(ReactorError::Io(_))
        ));
    }

    #[test]
    fn test_windows_line_endings_are_stripped() {
        assert_eq!(parse_keywords("alpha\r\nbeta\r\n"), vec!["alpha", "beta"]);
        assert_eq!(
            parse_sources("http://a.example\r\n"),
            vec!["http://a.example"]
        );
    }
}
