//! This library provides parsing and comparison of Hyperledger Fabric release
//! versions. Versions consist of three numeric components and an optional
//! build tag. The format can be described by
//! `<MAJOR>(.<MINOR>(.<PATCH>))(-<TAG>)`, for example `2.5.1-0`.
//!
//! ## Usage
//!
//! Versions can be parsed and validated from [`str`] using Rust's standard
//! [`FromStr`](std::str::FromStr) trait.
//!
//! ```
//! # use std::str::FromStr;
//! use fabric_version::FabricVersion;
//!
//! let version = FabricVersion::from_str("2.5.1-0")
//!     .expect("valid Fabric version");
//!
//! assert_eq!(version.tag.as_deref(), Some("0"));
//! ```
//!
//! Operators frequently have to compare versions taken from user input which
//! may be incomplete or empty. [`FabricVersion::lenient`] never fails and treats
//! missing or unparsable components as zero.
//!
//! ```
//! use fabric_version::{FabricVersion, MajorRelease, V2_4_1};
//!
//! let version = FabricVersion::lenient("2.4.5-1");
//! assert!(version.greater_than(&V2_4_1));
//! assert_eq!(version.major_release(), MajorRelease::V2);
//!
//! assert_eq!(FabricVersion::lenient("").major_release(), MajorRelease::V1);
//! ```

// NOTE: Fixed in https://github.com/la10736/rstest/pull/244 but not yet
// released.
#[cfg(test)]
use rstest_reuse::{self};

mod release;
mod version;

pub use release::*;
pub use version::*;

/// Compares two version strings on their numeric components, ignoring tags.
pub fn equal_without_tag(lhs: &str, rhs: &str) -> bool {
    FabricVersion::lenient(lhs).equal_without_tag(&FabricVersion::lenient(rhs))
}

/// Returns `true` if `lhs` is a strictly newer release than `rhs`.
pub fn greater_than(lhs: &str, rhs: &str) -> bool {
    FabricVersion::lenient(lhs).greater_than(&FabricVersion::lenient(rhs))
}

/// Returns `true` if `lhs` is a strictly older release than `rhs`.
pub fn less_than(lhs: &str, rhs: &str) -> bool {
    FabricVersion::lenient(lhs).less_than(&FabricVersion::lenient(rhs))
}

/// Returns the coarse release line of `version`. Empty input maps to
/// [`MajorRelease::V1`].
pub fn major_release(version: &str) -> MajorRelease {
    FabricVersion::lenient(version).major_release()
}
