//! `check_version`: collects every incompatibility before reporting,
//! rather than failing fast on the first mismatch, matching the
//! reference's `VersionAPI.cpp`.

/// The ABI surface this crate implements. Family changes are breaking;
/// minor bumps are backward compatible additions a caller built against an
/// older minor may simply not use.
pub const FAMILY: u32 = 0;
pub const MAJOR: u32 = 1;
pub const MINOR: u32 = 3;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VersionMismatch: u32 {
        const FAMILY = 1 << 0;
        const MAJOR  = 1 << 1;
        const MINOR  = 1 << 2;
    }
}

/// Checks a caller-declared `(family, major, minor)` triple against this
/// build, returning every axis that fails rather than the first. `family`
/// must match exactly, `major` must match exactly, and `minor` must be no
/// newer than this build's own (a caller compiled against a newer minor
/// may rely on additions this build does not have).
pub fn check(family: u32, major: u32, minor: u32) -> VersionMismatch {
    let mut mismatch = VersionMismatch::empty();
    if family != FAMILY {
        mismatch |= VersionMismatch::FAMILY;
    }
    if major != MAJOR {
        mismatch |= VersionMismatch::MAJOR;
    }
    if minor > MINOR {
        mismatch |= VersionMismatch::MINOR;
    }
    mismatch
}

/// `#[no_mangle]` entry point: returns the mismatch bitset as a raw `u32`,
/// zero meaning fully compatible.
#[no_mangle]
pub extern "C" fn check_version(family: u32, major: u32, minor: u32) -> u32 {
    check(family, major, minor).bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_compatible() {
        assert!(check(FAMILY, MAJOR, MINOR).is_empty());
    }

    #[test]
    fn older_minor_is_compatible() {
        assert!(check(FAMILY, MAJOR, 0).is_empty());
    }

    #[test]
    fn every_axis_reported_together() {
        let mismatch = check(FAMILY + 1, MAJOR + 1, MINOR + 1);
        assert!(mismatch.contains(VersionMismatch::FAMILY));
        assert!(mismatch.contains(VersionMismatch::MAJOR));
        assert!(mismatch.contains(VersionMismatch::MINOR));
    }
}
