use std::{cmp::Ordering, fmt::Display, num::ParseIntError, str::FromStr, sync::LazyLock};

use regex::Regex;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::MajorRelease;

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^v?(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.(?P<patch>\d+))?(?:-(?P<tag>[0-9A-Za-z][0-9A-Za-z.-]*))?$",
    )
    .expect("failed to compile version regex")
});

/// The first release of the 2.4 line which requires the 2.4 migration steps.
pub const V2_4_1: FabricVersion = FabricVersion::new(2, 4, 1);

/// The first release of the 2.5 line which requires the 2.5 migration steps.
pub const V2_5_1: FabricVersion = FabricVersion::new(2, 5, 1);

/// Error variants which can be encountered when creating a new
/// [`FabricVersion`] from unparsed input.
#[derive(Debug, PartialEq, Snafu)]
pub enum ParseVersionError {
    #[snafu(display(
        "invalid version format, expected <MAJOR>(.<MINOR>(.<PATCH>))(-<TAG>), got {input:?}"
    ))]
    InvalidFormat { input: String },

    #[snafu(display("failed to parse {component} version component"))]
    ParseComponent {
        source: ParseIntError,
        component: &'static str,
    },
}

/// A Hyperledger Fabric release version, following the
/// `<MAJOR>.<MINOR>.<PATCH>(-<TAG>)` format.
///
/// The tag is carried along for display purposes only. All ordering queries
/// ([`greater_than`](Self::greater_than), [`less_than`](Self::less_than) and
/// [`equal_without_tag`](Self::equal_without_tag)) look at the numeric
/// components exclusively. Because of that, [`FabricVersion`] deliberately does
/// not implement [`Ord`]: two versions can be "equal without tag" while not
/// being equal.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct FabricVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub tag: Option<String>,
}

impl FromStr for FabricVersion {
    type Err = ParseVersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let captures = VERSION_REGEX
            .captures(input)
            .context(InvalidFormatSnafu { input })?;

        let component = |name: &'static str| -> Result<u64, ParseVersionError> {
            captures.name(name).map_or(Ok(0), |m| {
                m.as_str()
                    .parse::<u64>()
                    .context(ParseComponentSnafu { component: name })
            })
        };

        Ok(Self {
            major: component("major")?,
            minor: component("minor")?,
            patch: component("patch")?,
            tag: captures.name("tag").map(|tag| tag.as_str().to_owned()),
        })
    }
}

impl Display for FabricVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            major,
            minor,
            patch,
            tag,
        } = self;

        match tag {
            Some(tag) => write!(f, "{major}.{minor}.{patch}-{tag}"),
            None => write!(f, "{major}.{minor}.{patch}"),
        }
    }
}

impl FabricVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            tag: None,
        }
    }

    /// Parses `input` without ever failing.
    ///
    /// Everything after the first `-` is treated as the tag. The remainder is
    /// split on `.`, components which are missing or not numeric become `0` and
    /// components beyond the third are ignored. An optional leading `v` is
    /// accepted.
    pub fn lenient(input: &str) -> Self {
        let input = input.trim();
        let input = input.strip_prefix('v').unwrap_or(input);

        let (numbers, tag) = match input.split_once('-') {
            Some((numbers, tag)) if !tag.is_empty() => (numbers, Some(tag.to_owned())),
            Some((numbers, _)) => (numbers, None),
            None => (input, None),
        };

        let mut components = numbers
            .split('.')
            .map(|component| component.parse::<u64>().unwrap_or_default());

        Self {
            major: components.next().unwrap_or_default(),
            minor: components.next().unwrap_or_default(),
            patch: components.next().unwrap_or_default(),
            tag,
        }
    }

    /// Compares the numeric `major.minor.patch` triple of both versions.
    pub fn cmp_without_tag(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }

    pub fn equal_without_tag(&self, other: &Self) -> bool {
        self.cmp_without_tag(other) == Ordering::Equal
    }

    pub fn greater_than(&self, other: &Self) -> bool {
        self.cmp_without_tag(other) == Ordering::Greater
    }

    /// Returns `true` if this version is neither greater than nor equal
    /// (without tag) to `other`.
    pub fn less_than(&self, other: &Self) -> bool {
        !self.greater_than(other) && !self.equal_without_tag(other)
    }

    /// Shorthand for "equal without tag or greater than".
    pub fn at_least(&self, other: &Self) -> bool {
        self.equal_without_tag(other) || self.greater_than(other)
    }

    pub fn major_release(&self) -> MajorRelease {
        MajorRelease::from(self)
    }
}
