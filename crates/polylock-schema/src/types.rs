//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so they can be used as
//! map keys in both TOML and JSON documents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Target platform identifier of one solve, e.g. `linux-64` or `osx-arm64`.
    Platform
);

string_newtype!(
    /// Lowercase hex content hash of a lock specification for one platform.
    ContentHash
);

/// Platforms locked when neither the manifest nor the caller names any.
pub const DEFAULT_PLATFORMS: &[&str] = &["linux-64", "osx-64", "win-64"];

/// Platform identifiers accepted in manifests and on the command line.
pub const KNOWN_PLATFORMS: &[&str] = &[
    "emscripten-wasm32",
    "linux-32",
    "linux-64",
    "linux-aarch64",
    "linux-armv6l",
    "linux-armv7l",
    "linux-ppc64",
    "linux-ppc64le",
    "linux-riscv64",
    "linux-s390x",
    "osx-64",
    "osx-arm64",
    "wasi-wasm32",
    "win-32",
    "win-64",
    "win-arm64",
];

impl Platform {
    pub fn is_known(&self) -> bool {
        KNOWN_PLATFORMS.contains(&self.as_str())
    }
}

/// Name prefix reserved for synthetic capability packages (`__glibc`, `__osx`, ...).
pub const VIRTUAL_PACKAGE_PREFIX: &str = "__";

/// Synthetic capability packages constrain solving but are never installed or persisted.
pub fn is_virtual_package(name: &str) -> bool {
    name.starts_with(VIRTUAL_PACKAGE_PREFIX)
}

/// Category every dependency belongs to unless declared otherwise.
pub const MAIN_CATEGORY: &str = "main";
pub const DEV_CATEGORY: &str = "dev";
