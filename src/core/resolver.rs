//! 路径解析：把备份配置展开成需要同步的文件列表

use crate::config::{ConfigError, SyncConfig};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 需要同步的本地文件
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackedPath {
    path: PathBuf,
    name: String,
}

impl TrackedPath {
    /// 绝对路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件名，用于匹配远程对象
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TrackedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// 路径被跳过的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    NotAFile,
    NotADirectory,
    Excluded,
    Unreadable(String),
    /// 与已跟踪的路径同名（远程按名称匹配，只能保留一个）
    DuplicateName(PathBuf),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotFound => write!(f, "不存在"),
            SkipReason::NotAFile => write!(f, "不是普通文件"),
            SkipReason::NotADirectory => write!(f, "不是文件夹"),
            SkipReason::Excluded => write!(f, "匹配排除规则"),
            SkipReason::Unreadable(e) => write!(f, "无法读取: {}", e),
            SkipReason::DuplicateName(kept) => write!(f, "与 {} 同名", kept.display()),
        }
    }
}

/// 解析结果
#[derive(Debug, Default)]
pub struct Resolution {
    pub tracked: Vec<TrackedPath>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
}

/// 路径解析器
#[derive(Debug, Default)]
pub struct PathResolver {
    exclude: Vec<String>,
}

impl PathResolver {
    pub fn new(exclude: Vec<String>) -> Self {
        Self { exclude }
    }

    /// 展开配置中的文件和文件夹（文件夹只展开一层）
    pub fn resolve(config: &SyncConfig) -> Resolution {
        Self::new(config.exclude.clone()).resolve_paths(&config.files, &config.folders)
    }

    pub fn resolve_paths(&self, files: &[PathBuf], folders: &[PathBuf]) -> Resolution {
        let mut resolution = Resolution::default();
        let mut names = HashMap::new();

        for file in files {
            match tracked_file(file) {
                Ok(tracked) => admit(&mut resolution, &mut names, tracked),
                Err(reason) => {
                    warn!("跳过文件 {}: {}", file.display(), reason);
                    resolution.skipped.push((file.clone(), reason));
                }
            }
        }

        for folder in folders {
            if !folder.is_dir() {
                let reason = if folder.exists() {
                    SkipReason::NotADirectory
                } else {
                    SkipReason::NotFound
                };
                warn!("跳过文件夹 {}: {}", folder.display(), reason);
                resolution.skipped.push((folder.clone(), reason));
                continue;
            }

            // 只取直接子项
            let mut children: Vec<PathBuf> = Vec::new();
            for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
                match entry {
                    Ok(entry) => children.push(entry.into_path()),
                    Err(e) => {
                        let path = e.path().unwrap_or(folder.as_path()).to_path_buf();
                        warn!("读取文件夹条目失败 {}: {}", path.display(), e);
                        resolution
                            .skipped
                            .push((path, SkipReason::Unreadable(e.to_string())));
                    }
                }
            }
            children.sort();

            for child in children {
                let name = child
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if self.is_excluded(&name) {
                    debug!("排除文件: {}", child.display());
                    resolution.skipped.push((child, SkipReason::Excluded));
                    continue;
                }

                match tracked_file(&child) {
                    Ok(tracked) => admit(&mut resolution, &mut names, tracked),
                    Err(reason) => {
                        debug!("跳过 {}: {}", child.display(), reason);
                        resolution.skipped.push((child, reason));
                    }
                }
            }
        }

        info!(
            "路径解析完成: {} 个文件, {} 个被跳过",
            resolution.tracked.len(),
            resolution.skipped.len()
        );

        resolution
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude.iter().any(|p| matches_pattern(name, p))
    }
}

/// 每个文件名只保留第一个路径，同一路径重复出现时直接忽略
fn admit(
    resolution: &mut Resolution,
    names: &mut HashMap<String, PathBuf>,
    tracked: TrackedPath,
) {
    match names.get(tracked.name()) {
        Some(kept) if kept == &tracked.path => {}
        Some(kept) => {
            warn!("跳过 {}: 与 {} 同名", tracked, kept.display());
            resolution
                .skipped
                .push((tracked.path, SkipReason::DuplicateName(kept.clone())));
        }
        None => {
            names.insert(tracked.name.clone(), tracked.path.clone());
            resolution.tracked.push(tracked);
        }
    }
}

/// 校验单个文件（`upload` 命令使用）
pub fn resolve_file(path: &Path) -> Result<TrackedPath, ConfigError> {
    tracked_file(path).map_err(|reason| match reason {
        SkipReason::NotFound => ConfigError::Invalid(format!("文件不存在: {}", path.display())),
        _ => ConfigError::NotAFile(path.to_path_buf()),
    })
}

/// 存在且为普通文件（指向文件的符号链接也可以）时返回 TrackedPath
fn tracked_file(path: &Path) -> Result<TrackedPath, SkipReason> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(SkipReason::NotFound),
        Err(e) => return Err(SkipReason::Unreadable(e.to_string())),
    };

    if !metadata.is_file() {
        return Err(SkipReason::NotAFile);
    }

    let path = std::path::absolute(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SkipReason::Unreadable("文件名不是合法的 UTF-8".to_string()))?
        .to_string();

    Ok(TrackedPath { path, name })
}

/// 简单的文件名模式匹配（支持 `*` 和 `?`）
fn matches_pattern(name: &str, pattern: &str) -> bool {
    if !pattern.contains('*') && !pattern.contains('?') {
        return name == pattern;
    }

    let regex_pattern = regex::escape(pattern)
        .replace("\\*", ".*")
        .replace("\\?", ".");

    regex::Regex::new(&format!("^{}$", regex_pattern))
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_folder_expansion_skips_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.txt"), b"deep").unwrap();

        let config = SyncConfig {
            folders: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let resolution = PathResolver::resolve(&config);

        assert_eq!(resolution.tracked.len(), 1);
        assert_eq!(resolution.tracked[0].name(), "notes.txt");
        assert!(resolution.tracked[0].path().is_absolute());
    }

    #[test]
    fn test_directory_in_files_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();

        let config = SyncConfig {
            files: vec![
                dir.path().to_path_buf(),
                file.clone(),
                dir.path().join("missing.txt"),
            ],
            ..Default::default()
        };
        let resolution = PathResolver::resolve(&config);

        assert_eq!(resolution.tracked.len(), 1);
        assert_eq!(resolution.tracked[0].name(), "a.txt");
        assert!(resolution
            .skipped
            .contains(&(dir.path().to_path_buf(), SkipReason::NotAFile)));
        assert!(resolution
            .skipped
            .contains(&(dir.path().join("missing.txt"), SkipReason::NotFound)));
    }

    #[test]
    fn test_file_reachable_twice_is_tracked_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();

        let config = SyncConfig {
            files: vec![file.clone()],
            folders: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let resolution = PathResolver::resolve(&config);

        let names: Vec<_> = resolution.tracked.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_missing_folder_and_file_as_folder() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();

        let config = SyncConfig {
            folders: vec![dir.path().join("nope"), file.clone()],
            ..Default::default()
        };
        let resolution = PathResolver::resolve(&config);

        assert!(resolution.tracked.is_empty());
        assert_eq!(
            resolution.skipped,
            vec![
                (dir.path().join("nope"), SkipReason::NotFound),
                (file, SkipReason::NotADirectory),
            ]
        );
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"k").unwrap();
        fs::write(dir.path().join("draft.tmp"), b"t").unwrap();
        fs::write(dir.path().join(".DS_Store"), b"x").unwrap();

        let config = SyncConfig {
            folders: vec![dir.path().to_path_buf()],
            exclude: vec!["*.tmp".to_string(), ".DS_Store".to_string()],
            ..Default::default()
        };
        let resolution = PathResolver::resolve(&config);

        let names: Vec<_> = resolution.tracked.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["keep.txt"]);
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("a.tmp", "*.tmp"));
        assert!(!matches_pattern("a.tmpx", "*.tmp"));
        assert!(matches_pattern("a1.log", "a?.log"));
        assert!(matches_pattern("Thumbs.db", "Thumbs.db"));
        assert!(!matches_pattern("thumbs.db", "Thumbs.db"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_to_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        fs::write(dir.path().join("real.txt"), b"r").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let resolution = PathResolver::new(Vec::new()).resolve_paths(
            &[dir.path().join("link"), dir.path().join("link.txt")],
            &[],
        );

        assert_eq!(resolution.tracked.len(), 1);
        assert_eq!(resolution.tracked[0].name(), "link.txt");
    }

    #[test]
    fn test_resolve_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_file(dir.path()),
            Err(ConfigError::NotAFile(_))
        ));
        assert!(matches!(
            resolve_file(&dir.path().join("missing")),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_same_name_in_two_folders_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let d1 = dir.path().join("d1");
        let d2 = dir.path().join("d2");
        fs::create_dir(&d1).unwrap();
        fs::create_dir(&d2).unwrap();
        fs::write(d1.join("x.txt"), b"1").unwrap();
        fs::write(d2.join("x.txt"), b"2").unwrap();

        let resolution =
            PathResolver::new(Vec::new()).resolve_paths(&[], &[d1.clone(), d2.clone()]);

        assert_eq!(resolution.tracked.len(), 1);
        assert_eq!(resolution.tracked[0].path(), d1.join("x.txt"));
        assert_eq!(
            resolution.skipped,
            vec![(d2.join("x.txt"), SkipReason::DuplicateName(d1.join("x.txt")))]
        );
    }

    #[test]
    fn test_unnormalized_path_to_same_file_is_not_tracked_twice() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, b"a").unwrap();

        let resolution = PathResolver::new(Vec::new()).resolve_paths(
            &[file.clone(), dir.path().join("sub").join("..").join("a.txt")],
            &[],
        );

        assert_eq!(resolution.tracked.len(), 1);
        assert_eq!(resolution.skipped.len(), 1);
        assert!(matches!(resolution.skipped[0].1, SkipReason::DuplicateName(_)));
    }
}
