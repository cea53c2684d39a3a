//! SDK version reconciliation.
//!
//! A program's module tree can contain several copies of the `@pulumi/pulumi`
//! SDK (hoisted, nested, linked). Mixing copies whose protocols drifted apart
//! produces confusing runtime failures, so plugin discovery records every copy
//! it sees and this module decides which pairs can coexist.

use semver::Version;

/// Failure text when two pre-1.0 (or pre-1.0 vs 1.x/2.x) copies disagree.
pub const DIFFERING_MAJOR_MINOR: &str = "Differing major or minor versions are not supported.";

/// Failure text when two post-2.x copies disagree on the major version.
pub const DIFFERING_MAJOR: &str = "Differing major versions are not supported.";

/// Reports whether two copies of the SDK can be used together, returning the
/// reason when they cannot. The check is symmetric in its arguments.
///
/// The rules:
/// - both `0.x`: the minor versions must match,
/// - `1.x` and `2.x` are mutually compatible in any combination,
/// - above `2.x` the major versions must match,
/// - `0.17.x` is grandfathered in as compatible with `1.x`.
pub fn compatible(a: &Version, b: &Version) -> (bool, &'static str) {
    if a.major == 0 && b.major == 0 {
        if a.minor == b.minor {
            return (true, "");
        }
        return (false, DIFFERING_MAJOR_MINOR);
    }
    if (1..=2).contains(&a.major) && (1..=2).contains(&b.major) {
        return (true, "");
    }
    if a.major > 2 || b.major > 2 {
        if a.major == b.major {
            return (true, "");
        }
        return (false, DIFFERING_MAJOR);
    }
    // One side is 0.x and the other is 1.x or 2.x. The 0.17 series spoke the
    // same protocol as 1.x and stays compatible with it.
    if (is_0_17(a) && b.major == 1) || (is_0_17(b) && a.major == 1) {
        return (true, "");
    }
    (false, DIFFERING_MAJOR_MINOR)
}

fn is_0_17(v: &Version) -> bool {
    v.major == 0 && v.minor == 17
}
