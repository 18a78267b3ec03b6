//! Dependency model, source manifests, content hashing, and the lockfile format for polylock.
//!
//! This crate defines the schema layer: declared dependencies (`Dependency`)
//! and the per-platform `LockSpecification` they form, the native TOML source
//! manifest (`ManifestV1`) and its normalization, channel credential handling,
//! synthetic capability packages (`VirtualPackageRepo`), per-platform content
//! hashing, and the versioned `Lockfile` with its merge and ordering rules.

pub mod channel;
pub mod dependency;
pub mod hash;
pub mod lockfile;
pub mod manifest;
pub mod normalize;
pub mod spec;
pub mod types;
pub mod virtual_package;

pub use channel::{Channel, ChannelError, PipRepository};
pub use dependency::{Dependency, DependencySource, Manager};
pub use hash::{
    backwards_compatible_content_hashes, compute_content_hashes, content_hash_for_platform,
};
pub use lockfile::{
    GitMeta, HashModel, HelpText, InputMeta, LockError, LockKey, LockMeta, LockedDependency,
    Lockfile, MetadataOption, PackageSource, TimeMeta, DEFAULT_LOCKFILE_NAME, LOCKFILE_VERSION,
};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, DependencyEntry, ManifestError, ManifestV1,
    MANIFEST_FILE_NAME,
};
pub use spec::{ordered_union, LockSpecification};
pub use types::{
    is_virtual_package, ContentHash, Platform, DEFAULT_PLATFORMS, DEV_CATEGORY, KNOWN_PLATFORMS,
    MAIN_CATEGORY,
};
pub use virtual_package::{
    default_virtual_package_repo, FakePackage, VirtualPackageError, VirtualPackageRepo,
    DEFAULT_CUDA_VERSION,
};
