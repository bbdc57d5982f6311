//! Semantic version value type for deployment packages.
//!
//! Parses `v?major.minor.patch(-prerelease)?`, with an `Empty` sentinel
//! that represents "no version" and compares strictly below every other
//! value. Equality and ordering are semantic: `v1.2.3` and `1.2.3` are
//! the same version and sort identically against anything else.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(v)?(\d+)\.(\d+)\.(\d+)(?:-([A-Za-z0-9.]+))?$").unwrap()
    })
}

#[derive(Debug, Clone)]
enum Core {
    Empty,
    Value {
        major: u64,
        minor: u64,
        patch: u64,
        pre_release: Option<String>,
        has_v_prefix: bool,
    },
}

/// `has_v_prefix` is display-only and deliberately excluded: `v1.2.3` and
/// `1.2.3` must compare equal, consistent with the hand-written `Ord`
/// below which already ignores it.
impl PartialEq for Core {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Core::Empty, Core::Empty) => true,
            (
                Core::Value {
                    major: am,
                    minor: an,
                    patch: ap,
                    pre_release: apre,
                    ..
                },
                Core::Value {
                    major: bm,
                    minor: bn,
                    patch: bp,
                    pre_release: bpre,
                    ..
                },
            ) => am == bm && an == bn && ap == bp && apre == bpre,
            _ => false,
        }
    }
}

impl Eq for Core {}

/// A parsed, semantically-comparable package version, or the `Empty` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersion(Core);

impl PackageVersion {
    /// The `Empty` sentinel: "no version installed yet". Compares strictly
    /// below any real version.
    pub fn empty() -> Self {
        PackageVersion(Core::Empty)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0, Core::Empty)
    }

    /// Parse a version string. Malformed input (including `null`, `""`,
    /// `"unknown"`, `"-"`) normalizes to `Empty` rather than erroring —
    /// callers that need to distinguish "absent" from "malformed" should
    /// use [`PackageVersion::try_parse_strict`].
    pub fn parse(input: &str) -> Self {
        Self::try_parse_strict(input).unwrap_or_else(|_| Self::empty())
    }

    /// Parse a version string, returning `Err` for anything that isn't a
    /// recognized sentinel or a valid `v?x.y.z(-pre)?`.
    pub fn try_parse_strict(input: &str) -> Result<Self, InvalidVersion> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") || trimmed == "-" {
            return Ok(Self::empty());
        }

        let caps = version_regex()
            .captures(trimmed)
            .ok_or_else(|| InvalidVersion(trimmed.to_string()))?;

        let has_v_prefix = caps.get(1).is_some();
        let major = caps[2].parse().map_err(|_| InvalidVersion(trimmed.to_string()))?;
        let minor = caps[3].parse().map_err(|_| InvalidVersion(trimmed.to_string()))?;
        let patch = caps[4].parse().map_err(|_| InvalidVersion(trimmed.to_string()))?;
        let pre_release = caps.get(5).map(|m| m.as_str().to_string());

        Ok(PackageVersion(Core::Value {
            major,
            minor,
            patch,
            pre_release,
            has_v_prefix,
        }))
    }

    /// `true` for anything that parsed as a real version (not `Empty`,
    /// not malformed-normalized-to-Empty).
    pub fn is_valid_nonempty(&self) -> bool {
        matches!(self.0, Core::Value { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidVersion(pub String);

impl fmt::Display for InvalidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a valid package version", self.0)
    }
}

impl std::error::Error for InvalidVersion {}

impl Default for PackageVersion {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Core::Empty => write!(f, "-"),
            Core::Value {
                major,
                minor,
                patch,
                pre_release,
                has_v_prefix,
            } => {
                if *has_v_prefix {
                    write!(f, "v")?;
                }
                write!(f, "{}.{}.{}", major, minor, patch)?;
                if let Some(pre) = pre_release {
                    write!(f, "-{}", pre)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for PackageVersion {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Core::Empty, Core::Empty) => Ordering::Equal,
            (Core::Empty, Core::Value { .. }) => Ordering::Less,
            (Core::Value { .. }, Core::Empty) => Ordering::Greater,
            (
                Core::Value {
                    major: am,
                    minor: an,
                    patch: ap,
                    pre_release: apre,
                    ..
                },
                Core::Value {
                    major: bm,
                    minor: bn,
                    patch: bp,
                    pre_release: bpre,
                    ..
                },
            ) => (am, an, ap)
                .cmp(&(bm, bn, bp))
                .then_with(|| compare_pre_release(apre, bpre)),
        }
    }
}

/// A version with no pre-release sorts above the same core version with
/// one (release > any pre-release of itself); between two pre-releases,
/// plain string ordering applies.
fn compare_pre_release(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for PackageVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer).map_err(D::Error::custom)?;
        Ok(PackageVersion::parse(&s))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_version() -> impl Strategy<Value = PackageVersion> {
        (any::<bool>(), 0u64..1000, 0u64..1000, 0u64..1000).prop_map(
            |(has_v, major, minor, patch)| {
                let prefix = if has_v { "v" } else { "" };
                PackageVersion::parse(&format!("{prefix}{major}.{minor}.{patch}"))
            },
        )
    }

    proptest! {
        #[test]
        fn round_trip_through_display(v in arb_version()) {
            prop_assert_eq!(PackageVersion::parse(&v.to_string()), v);
        }

        #[test]
        fn v_prefix_never_affects_equality_or_ordering(major in 0u64..1000, minor in 0u64..1000, patch in 0u64..1000) {
            let bare = PackageVersion::parse(&format!("{major}.{minor}.{patch}"));
            let prefixed = PackageVersion::parse(&format!("v{major}.{minor}.{patch}"));
            prop_assert_eq!(&bare, &prefixed);
            prop_assert_eq!(bare.cmp(&prefixed), std::cmp::Ordering::Equal);
        }

        #[test]
        fn empty_is_always_the_minimum(v in arb_version()) {
            prop_assert!(PackageVersion::empty() < v);
        }

        #[test]
        fn ordering_is_total_and_consistent_with_major_minor_patch(
            a in (0u64..50, 0u64..50, 0u64..50),
            b in (0u64..50, 0u64..50, 0u64..50),
        ) {
            let va = PackageVersion::parse(&format!("{}.{}.{}", a.0, a.1, a.2));
            let vb = PackageVersion::parse(&format!("{}.{}.{}", b.0, b.1, b.2));
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        }
    }
}
