//! Optional provenance recorded in lockfile metadata.

use polylock_schema::{GitMeta, InputMeta, MetadataOption, TimeMeta};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub time: Option<TimeMeta>,
    pub git: Option<GitMeta>,
    pub inputs: Option<BTreeMap<String, InputMeta>>,
}

/// Gather the requested provenance for `sources`, keyed by their path
/// relative to `lockfile_dir`. Git details that cannot be determined are
/// left out.
pub fn collect_provenance(
    options: &BTreeSet<MetadataOption>,
    sources: &[PathBuf],
    lockfile_dir: &Path,
) -> Result<Provenance, std::io::Error> {
    let time = options
        .contains(&MetadataOption::Timestamp)
        .then(TimeMeta::now);

    let wants_git = [
        MetadataOption::GitSha,
        MetadataOption::GitUserName,
        MetadataOption::GitUserEmail,
    ]
    .iter()
    .any(|o| options.contains(o));
    let git = wants_git.then(|| GitMeta {
        git_user_name: options
            .contains(&MetadataOption::GitUserName)
            .then(|| git(&["config", "user.name"], lockfile_dir))
            .flatten(),
        git_user_email: options
            .contains(&MetadataOption::GitUserEmail)
            .then(|| git(&["config", "user.email"], lockfile_dir))
            .flatten(),
        git_sha: options
            .contains(&MetadataOption::GitSha)
            .then(|| newest_source_commit(sources))
            .flatten(),
    });

    let inputs = if options.contains(&MetadataOption::InputDigest) {
        let mut digests = BTreeMap::new();
        for source in sources {
            let content = fs::read(source)?;
            digests.insert(
                relative_source_path(source, lockfile_dir),
                InputMeta {
                    blake3: blake3::hash(&content).to_hex().to_string(),
                },
            );
        }
        Some(digests)
    } else {
        None
    };

    Ok(Provenance { time, git, inputs })
}

fn git(args: &[&str], cwd: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

/// The most recent commit touching any source, with `-dirty` appended when
/// that source has uncommitted changes.
fn newest_source_commit(sources: &[PathBuf]) -> Option<String> {
    let mut newest: Option<(i64, String, &Path)> = None;
    for source in sources {
        let dir = source
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let file = source.file_name()?.to_string_lossy().into_owned();
        let Some(line) = git(&["log", "-n", "1", "--format=%H %ct", "--", &file], dir) else {
            debug!("no git history for {}", source.display());
            continue;
        };
        let mut parts = line.split_whitespace();
        let (Some(sha), Some(ts)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(ts) = ts.parse::<i64>() else {
            continue;
        };
        let is_newer = match &newest {
            None => true,
            Some((best, _, _)) => ts > *best,
        };
        if is_newer {
            newest = Some((ts, sha.to_owned(), source.as_path()));
        }
    }

    let (_, sha, source) = newest?;
    let dir = source
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file = source.file_name()?.to_string_lossy().into_owned();
    if git(&["status", "--porcelain", "--", &file], dir).is_some() {
        warn!("{} has uncommitted changes", source.display());
        Some(format!("{sha}-dirty"))
    } else {
        Some(sha)
    }
}

/// `source` relative to `base`, `/`-separated. Falls back to the path as
/// given when either cannot be resolved.
pub fn relative_source_path(source: &Path, base: &Path) -> String {
    let (Ok(source_abs), Ok(base_abs)) = (source.canonicalize(), base.canonicalize()) else {
        return source.to_string_lossy().into_owned();
    };
    let to: Vec<Component> = source_abs.components().collect();
    let from: Vec<Component> = base_abs.components().collect();
    let common = to.iter().zip(&from).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = vec!["..".to_owned(); from.len() - common];
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}
