use strum::{Display, EnumString};

use crate::FabricVersion;

/// A coarse Fabric release line, derived from the major version component.
///
/// Releases before 2.0 (including the empty/unknown version `0.0.0`) belong to
/// [`MajorRelease::V1`]. Major versions which are newer than anything this
/// crate knows about map to [`MajorRelease::Unknown`], so that no migration
/// logic accidentally treats them as a 2.x release.
#[derive(Clone, Copy, Debug, Display, EnumString, Hash, PartialEq, Eq)]
pub enum MajorRelease {
    #[strum(serialize = "V1")]
    V1,

    #[strum(serialize = "V2")]
    V2,

    #[strum(serialize = "Unknown")]
    Unknown,
}

impl From<&FabricVersion> for MajorRelease {
    fn from(version: &FabricVersion) -> Self {
        match version.major {
            0 | 1 => Self::V1,
            2 => Self::V2,
            _ => Self::Unknown,
        }
    }
}
