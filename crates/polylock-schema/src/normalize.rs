use crate::channel::{Channel, PipRepository};
use crate::dependency::{Dependency, DependencySource};
use crate::manifest::{DependencyEntry, ManifestError, ManifestV1};
use crate::spec::LockSpecification;
use crate::types::{Platform, DEFAULT_PLATFORMS, MAIN_CATEGORY};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

impl ManifestV1 {
    /// Turn the manifest into a per-platform lock specification.
    ///
    /// Platforms come from `platform_override` when non-empty, then from the
    /// manifest, then from [`DEFAULT_PLATFORMS`]. Every platform gets an entry,
    /// even when no dependency applies to it.
    pub fn normalize(
        &self,
        source: &Path,
        platform_override: &[Platform],
    ) -> Result<LockSpecification, ManifestError> {
        if self.manifest_version != 1 {
            return Err(ManifestError::UnsupportedVersion(self.manifest_version));
        }

        let platforms: Vec<Platform> = if !platform_override.is_empty() {
            platform_override.to_vec()
        } else if !self.platforms.is_empty() {
            self.platforms.iter().map(|p| Platform::new(p.trim())).collect()
        } else {
            DEFAULT_PLATFORMS.iter().map(|p| Platform::new(*p)).collect()
        };
        for platform in &platforms {
            if !platform.is_known() {
                return Err(ManifestError::UnknownPlatform(platform.to_string()));
            }
        }

        let channels = self
            .channels
            .iter()
            .map(|c| Channel::from_string(c))
            .collect::<Result<Vec<_>, _>>()?;
        let pip_repositories = self
            .pip_repositories
            .iter()
            .map(|r| PipRepository::new(r.trim()))
            .collect();

        let mut dependencies: BTreeMap<Platform, Vec<Dependency>> = platforms
            .iter()
            .map(|p| (p.clone(), Vec::new()))
            .collect();

        for entry in &self.dependencies {
            let dep = entry.to_dependency()?;
            let selector = entry.platform_selector()?;
            for (platform, deps) in &mut dependencies {
                if selector.as_ref().is_some_and(|s| !s.contains(platform)) {
                    continue;
                }
                if deps.iter().any(|d| d.merge_key() == dep.merge_key()) {
                    return Err(ManifestError::DuplicateDependency {
                        name: dep.name.clone(),
                        manager: dep.manager,
                        platform: platform.to_string(),
                    });
                }
                deps.push(dep.clone());
            }
        }

        Ok(LockSpecification {
            dependencies,
            channels,
            pip_repositories,
            sources: vec![source.to_path_buf()],
            allow_pypi_requests: self.allow_pypi_requests.unwrap_or(true),
        })
    }
}

impl DependencyEntry {
    fn platform_selector(&self) -> Result<Option<BTreeSet<Platform>>, ManifestError> {
        let Some(platforms) = &self.platforms else {
            return Ok(None);
        };
        let mut out = BTreeSet::new();
        for raw in platforms {
            let platform = Platform::new(raw.trim());
            if !platform.is_known() {
                return Err(ManifestError::UnknownPlatform(platform.into_inner()));
            }
            out.insert(platform);
        }
        Ok(Some(out))
    }

    fn to_dependency(&self) -> Result<Dependency, ManifestError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ManifestError::EmptyDependencyName);
        }

        let vcs: Vec<(&str, &String)> = [("git", &self.git), ("hg", &self.hg), ("svn", &self.svn)]
            .into_iter()
            .filter_map(|(kind, url)| url.as_ref().map(|u| (kind, u)))
            .collect();

        let mut declared = Vec::new();
        if self.version.is_some() {
            declared.push("version");
        }
        if self.url.is_some() {
            declared.push("url");
        }
        declared.extend(vcs.iter().map(|(kind, _)| *kind));
        if self.path.is_some() {
            declared.push("path");
        }
        if declared.len() > 1 {
            return Err(ManifestError::AmbiguousSource {
                name: name.to_owned(),
                sources: declared.join(", "),
            });
        }

        let dangling = |field: &'static str, requires: &'static str| {
            Err(ManifestError::DanglingField {
                name: name.to_owned(),
                field,
                requires,
            })
        };
        if self.rev.is_some() && vcs.is_empty() {
            return dangling("rev", "git, hg or svn");
        }
        if !self.hashes.is_empty() && self.url.is_none() {
            return dangling("hashes", "url");
        }
        if (self.directory.is_some() || self.subdirectory.is_some()) && self.path.is_none() {
            return dangling("directory", "path");
        }

        let source = if let Some(url) = &self.url {
            DependencySource::Url {
                url: url.clone(),
                hashes: self.hashes.clone(),
            }
        } else if let Some((kind, url)) = vcs.first() {
            DependencySource::Vcs {
                source: (*url).clone(),
                vcs: (*kind).to_owned(),
                rev: self.rev.clone(),
            }
        } else if let Some(path) = &self.path {
            DependencySource::Path {
                path: path.clone(),
                is_directory: self.directory.unwrap_or(false),
                subdirectory: self.subdirectory.clone(),
            }
        } else {
            DependencySource::Versioned {
                version: self.version.clone().unwrap_or_else(|| "*".to_owned()),
                build: self.build.clone(),
                conda_channel: self.channel.clone(),
                hash: self.hash.clone(),
            }
        };

        Ok(Dependency {
            name: name.to_owned(),
            manager: self.manager,
            category: self
                .category
                .as_deref()
                .map_or_else(|| MAIN_CATEGORY.to_owned(), |c| c.trim().to_owned()),
            extras: self.extras.iter().map(|e| e.trim().to_owned()).collect(),
            markers: self.markers.clone(),
            source,
        })
    }
}
