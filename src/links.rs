//! Link shortcuts: keys bound to sibling directories that files can be copied into.
//!
//! The links file holds one `KEY:dirname` binding per line, e.g.
//!
//! ```text
//! f:favorites
//! F2:wallpapers
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Highest function key accepted as a link key.
const MAX_FUNCTION_KEY: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkKey {
    /// A single ASCII letter or digit, stored lowercase.
    Char(char),
    /// Function key F1..=F12.
    Function(u8),
}

impl LinkKey {
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        let mut chars = key.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return c
                .is_ascii_alphanumeric()
                .then(|| Self::Char(c.to_ascii_lowercase()));
        }

        let number = key.strip_prefix(&['F', 'f'][..])?;
        match number.parse::<u8>() {
            Ok(n) if (1..=MAX_FUNCTION_KEY).contains(&n) => Some(Self::Function(n)),
            _ => None,
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{}", c),
            Self::Function(n) => write!(f, "F{}", n),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Links {
    bindings: BTreeMap<LinkKey, String>,
}

impl Links {
    /// Parse links text. Malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut bindings = BTreeMap::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let segments: Vec<&str> = line.split(':').collect();
            let [key, dir] = segments.as_slice() else {
                debug!(line, "Skipping malformed link line");
                continue;
            };
            if key.is_empty() || dir.is_empty() {
                continue;
            }
            match LinkKey::parse(key) {
                Some(key) => {
                    bindings.entry(key).or_insert_with(|| dir.to_string());
                }
                None => debug!(key, "Skipping link with unknown key"),
            }
        }
        Self { bindings }
    }

    /// Read the links file. A missing file yields no links.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "No links file");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read links file {:?}", path))
            }
        };
        let links = Self::parse(&text);
        info!(?path, count = links.len(), "Loaded links");
        Ok(links)
    }

    pub fn get(&self, key: LinkKey) -> Option<&str> {
        self.bindings.get(&key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LinkKey, &str)> {
        self.bindings.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Names of the link directories that exist under `base`, sorted.
    /// Falls back to `..` so there is always somewhere to go.
    pub fn existing_dirs(&self, base: &Path) -> Vec<String> {
        let mut dirs: Vec<String> = self
            .bindings
            .values()
            .filter(|dir| base.join(dir).is_dir())
            .filter_map(|dir| {
                Path::new(dir)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
            })
            .collect();
        if dirs.is_empty() {
            dirs.push("..".to_string());
        }
        dirs.sort();
        dirs.dedup();
        dirs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    CreatedNew,
    Overwritten,
    SourceNotFound,
    TargetDirNotFound,
    Failed(String),
}

impl CopyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::CreatedNew | Self::Overwritten)
    }
}

impl fmt::Display for CopyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreatedNew => write!(f, "Copy successful! (new)"),
            Self::Overwritten => write!(f, "Copy successful! (overwrite)"),
            Self::SourceNotFound => write!(f, "Copy failed! (source not found)"),
            Self::TargetDirNotFound => write!(f, "Copy failed! (target dir not found)"),
            Self::Failed(reason) => write!(f, "Copy failed! ({})", reason),
        }
    }
}

/// Directories searched for `link_dir`, nearest first.
fn link_search_paths(file_dir: &Path, link_dir: &str) -> [PathBuf; 3] {
    [
        file_dir.join(link_dir),
        file_dir.join("..").join(link_dir),
        file_dir.join("..").join("..").join(link_dir),
    ]
}

/// Copy `file` into the first `link_dir` found next to it or up to two levels above,
/// keeping its modification time.
pub fn copy_file_to_link_dir(file: &Path, link_dir: &str) -> CopyOutcome {
    if !file.is_file() {
        return CopyOutcome::SourceNotFound;
    }
    let Some(name) = file.file_name() else {
        return CopyOutcome::SourceNotFound;
    };
    let file_dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let Some(target_dir) = link_search_paths(file_dir, link_dir)
        .into_iter()
        .find(|p| p.is_dir())
    else {
        return CopyOutcome::TargetDirNotFound;
    };

    let target = target_dir.join(name);
    let existed = target.exists();
    match copy_preserving_mtime(file, &target) {
        Ok(()) if existed => CopyOutcome::Overwritten,
        Ok(()) => CopyOutcome::CreatedNew,
        Err(e) => {
            warn!(?file, ?target, "Copy to link dir failed: {:#}", e);
            CopyOutcome::Failed(e.to_string())
        }
    }
}

fn copy_preserving_mtime(source: &Path, target: &Path) -> Result<()> {
    let mtime = std::fs::metadata(source)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to read mtime of {:?}", source))?;
    std::fs::copy(source, target)
        .with_context(|| format!("Failed to copy {:?} to {:?}", source, target))?;
    File::options()
        .write(true)
        .open(target)
        .and_then(|f| f.set_modified(mtime))
        .with_context(|| format!("Failed to set mtime of {:?}", target))?;
    debug!(?source, ?target, "Copied file to link dir");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[test]
    fn test_parse_keys() {
        assert_eq!(LinkKey::parse("a"), Some(LinkKey::Char('a')));
        assert_eq!(LinkKey::parse("A"), Some(LinkKey::Char('a')));
        assert_eq!(LinkKey::parse("7"), Some(LinkKey::Char('7')));
        assert_eq!(LinkKey::parse("F1"), Some(LinkKey::Function(1)));
        assert_eq!(LinkKey::parse("f12"), Some(LinkKey::Function(12)));
        assert_eq!(LinkKey::parse("F13"), None);
        assert_eq!(LinkKey::parse("F0"), None);
        assert_eq!(LinkKey::parse("ab"), None);
        assert_eq!(LinkKey::parse("?"), None);
        assert_eq!(LinkKey::parse("é"), None);
        assert_eq!(LinkKey::parse("-"), None);
        assert_eq!(LinkKey::parse(""), None);
    }

    #[test]
    fn test_parse_links_text() {
        let links = Links::parse(
            "f:favorites\n\n  w:wallpapers  \nbad line\nx:too:many\n:nokey\nk:\nF3:memes\nqq:nope\n",
        );
        assert_eq!(links.len(), 3);
        assert_eq!(links.get(LinkKey::Char('f')), Some("favorites"));
        assert_eq!(links.get(LinkKey::Char('w')), Some("wallpapers"));
        assert_eq!(links.get(LinkKey::Function(3)), Some("memes"));
        assert_eq!(links.get(LinkKey::Char('x')), None);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let links = Links::load(&dir.path().join("links.txt")).unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.txt");
        fs::write(&path, "s:saved\n").unwrap();
        let links = Links::load(&path).unwrap();
        assert_eq!(links.iter().collect::<Vec<_>>(), vec![(LinkKey::Char('s'), "saved")]);
    }

    #[test]
    fn test_existing_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("zeta")).unwrap();
        fs::create_dir(dir.path().join("alpha")).unwrap();
        let links = Links::parse("z:zeta\na:alpha\nm:missing\n");

        assert_eq!(links.existing_dirs(dir.path()), vec!["alpha", "zeta"]);
        assert_eq!(Links::default().existing_dirs(dir.path()), vec![".."]);
    }

    fn setup_tree() -> (TempDir, PathBuf) {
        let root = TempDir::new().unwrap();
        let photos = root.path().join("a").join("b").join("photos");
        fs::create_dir_all(&photos).unwrap();
        let file = photos.join("cat.png");
        fs::write(&file, b"meow").unwrap();
        File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000))
            .unwrap();
        (root, file)
    }

    #[test]
    fn test_copy_searches_upwards() {
        let (root, file) = setup_tree();
        let keep = root.path().join("a").join("keep");
        fs::create_dir(&keep).unwrap();

        assert_eq!(copy_file_to_link_dir(&file, "keep"), CopyOutcome::CreatedNew);
        let copied = keep.join("cat.png");
        assert_eq!(fs::read(&copied).unwrap(), b"meow");
        assert_eq!(
            fs::metadata(&copied).unwrap().modified().unwrap(),
            fs::metadata(&file).unwrap().modified().unwrap()
        );

        assert_eq!(copy_file_to_link_dir(&file, "keep"), CopyOutcome::Overwritten);
    }

    #[test]
    fn test_copy_prefers_nearest_dir() {
        let (root, file) = setup_tree();
        let near = file.parent().unwrap().join("keep");
        let far = root.path().join("a").join("keep");
        fs::create_dir(&near).unwrap();
        fs::create_dir(&far).unwrap();

        assert_eq!(copy_file_to_link_dir(&file, "keep"), CopyOutcome::CreatedNew);
        assert!(near.join("cat.png").exists());
        assert!(!far.join("cat.png").exists());
    }

    #[test]
    fn test_copy_failures() {
        let (root, file) = setup_tree();
        assert_eq!(
            copy_file_to_link_dir(&file, "nowhere"),
            CopyOutcome::TargetDirNotFound
        );
        assert_eq!(
            copy_file_to_link_dir(&root.path().join("ghost.png"), "keep"),
            CopyOutcome::SourceNotFound
        );
        assert!(!CopyOutcome::SourceNotFound.is_success());
        assert_eq!(
            CopyOutcome::Overwritten.to_string(),
            "Copy successful! (overwrite)"
        );
    }
}
