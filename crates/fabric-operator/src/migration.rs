//! Decides which staged migrations a Fabric version change requires.
//!
//! Migration stages are "at least this stage" markers: a single large jump
//! (e.g. 1.4 to 2.5.1) has to run the side effects of every stage it crosses,
//! while a small jump only runs the stages in between. The rules below are
//! therefore evaluated independently and may all fire for one transition.

use fabric_version::{FabricVersion, MajorRelease, V2_4_1, V2_5_1};

use crate::update::{Update, UpdateFlag};

/// The migration stages a version transition crosses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationFlags {
    pub migrate_to_v2: bool,
    pub migrate_to_v24: bool,
    pub migrate_to_v25: bool,
}

impl MigrationFlags {
    /// Sets the corresponding flags on `update`, leaving all others untouched.
    pub fn apply_to(self, update: &mut Update) {
        update.set_if(UpdateFlag::MigrateToV2, self.migrate_to_v2);
        update.set_if(UpdateFlag::MigrateToV24, self.migrate_to_v24);
        update.set_if(UpdateFlag::MigrateToV25, self.migrate_to_v25);
    }

    pub fn any(self) -> bool {
        self.migrate_to_v2 || self.migrate_to_v24 || self.migrate_to_v25
    }
}

/// Returns the migration stages required to move from `old_version` to
/// `new_version`.
pub fn decide_migration(old_version: &str, new_version: &str) -> MigrationFlags {
    let old = FabricVersion::lenient(old_version);
    let new = FabricVersion::lenient(new_version);
    let mut flags = MigrationFlags::default();

    // 1.x (or unknown) to 2.x
    if (old_version.trim().is_empty() || old.major_release() == MajorRelease::V1)
        && new.major_release() == MajorRelease::V2
    {
        flags.migrate_to_v2 = true;

        if new.at_least(&V2_5_1) {
            flags.migrate_to_v24 = true;
            flags.migrate_to_v25 = true;
        } else if new.at_least(&V2_4_1) {
            flags.migrate_to_v24 = true;
        }
    }

    // 2.x below 2.4.1
    if old.major_release() == MajorRelease::V2 && old.less_than(&V2_4_1) {
        flags.migrate_to_v24 = true;

        if new.at_least(&V2_5_1) {
            flags.migrate_to_v25 = true;
        }
    }

    // 2.x below 2.5.1
    if old.major_release() == MajorRelease::V2 && old.less_than(&V2_5_1) && new.at_least(&V2_5_1)
    {
        flags.migrate_to_v25 = true;
    }

    flags
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn flags(v2: bool, v24: bool, v25: bool) -> MigrationFlags {
        MigrationFlags {
            migrate_to_v2: v2,
            migrate_to_v24: v24,
            migrate_to_v25: v25,
        }
    }

    #[rstest]
    #[case("", "2.5.1-0", flags(true, true, true))]
    #[case("1.4.9-0", "2.4.1-0", flags(true, true, false))]
    #[case("2.2.0-0", "2.4.5-0", flags(false, true, false))]
    #[case("1.4.12", "2.2.5", flags(true, false, false))]
    #[case("1.4.12", "2.5.4-1", flags(true, true, true))]
    #[case("", "2.4.3", flags(true, true, false))]
    #[case("2.2.5", "2.5.1", flags(false, true, true))]
    #[case("2.4.3", "2.5.1-2", flags(false, false, true))]
    #[case("2.4.3", "2.4.9", flags(false, false, false))]
    #[case("2.5.1", "2.5.4", flags(false, false, false))]
    #[case("2.5.4", "2.5.1", flags(false, false, false))]
    #[case("1.4.9", "1.4.12", flags(false, false, false))]
    #[case("", "", flags(false, false, false))]
    #[case("2", "2.5", flags(false, true, false))]
    fn decide(#[case] old: &str, #[case] new: &str, #[case] expected: MigrationFlags) {
        assert_eq!(decide_migration(old, new), expected);
    }

    #[test]
    fn rules_accumulate_on_update() {
        let mut update = Update::from([UpdateFlag::SpecUpdated, UpdateFlag::MigrateToV24]);
        decide_migration("2.4.3", "2.5.1").apply_to(&mut update);

        assert!(update.spec_updated());
        assert!(update.migrate_to_v24());
        assert!(update.migrate_to_v25());
        assert!(!update.migrate_to_v2());
    }
}
