//! The record of a single detected change to a managed resource.
//!
//! Predicates build an [`Update`] from the difference between two object
//! states and push it onto the [`UpdateQueue`](crate::queue::UpdateQueue).
//! The reconciler pops one update per pass and hands it to the offering,
//! which decides which side effects (certificate rotation, database upgrade,
//! restart, ...) have to run.

use std::collections::BTreeSet;

use strum::{Display, EnumIter, IntoEnumIterator};

/// A single kind of change an [`Update`] can carry.
#[derive(Clone, Copy, Debug, Display, EnumIter, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdateFlag {
    // Spec level
    SpecUpdated,
    OverridesUpdated,

    // Identity and crypto material
    MspUpdated,
    TlsCertCreated,
    EcertCreated,
    TlsCertUpdated,
    EcertUpdated,
    TlsCertEnroll,
    EcertEnroll,
    TlsReenrollNeeded,
    EcertReenrollNeeded,
    TlsCertNewKeyReenroll,
    EcertNewKeyReenroll,

    // Lifecycle
    RestartNeeded,
    NodeOuUpdated,
    ImagesUpdated,
    FabricVersionUpdated,

    // Migration stages
    MigrateToV2,
    MigrateToV24,
    MigrateToV25,
    UpgradeDbs,
}

impl UpdateFlag {
    /// Informational flags describe what happened but do not require any work
    /// on their own.
    pub fn is_informational(self) -> bool {
        matches!(self, Self::TlsCertCreated | Self::EcertCreated)
    }
}

/// A de-duplicatable set of change flags.
///
/// A default constructed update has no flag set and signals "nothing to do".
/// Two updates are equal if and only if exactly the same flags are set.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct Update {
    flags: BTreeSet<UpdateFlag>,
}

impl std::fmt::Display for Update {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.flags.is_empty() {
            return write!(f, "[]");
        }

        write!(f, "[")?;
        for (i, flag) in self.flags.iter().enumerate() {
            let prefix = match i {
                0 => "",
                _ => ", ",
            };
            write!(f, "{prefix}{flag}")?;
        }
        write!(f, "]")
    }
}

impl FromIterator<UpdateFlag> for Update {
    fn from_iter<T: IntoIterator<Item = UpdateFlag>>(iter: T) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[UpdateFlag; N]> for Update {
    fn from(flags: [UpdateFlag; N]) -> Self {
        flags.into_iter().collect()
    }
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, flag: UpdateFlag) {
        self.flags.insert(flag);
    }

    /// Sets `flag` if `condition` holds. Never clears a flag.
    pub fn set_if(&mut self, flag: UpdateFlag, condition: bool) {
        if condition {
            self.set(flag);
        }
    }

    pub fn with(mut self, flag: UpdateFlag) -> Self {
        self.set(flag);
        self
    }

    pub fn is_set(&self, flag: UpdateFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn flags(&self) -> impl Iterator<Item = UpdateFlag> + '_ {
        self.flags.iter().copied()
    }

    /// Returns `true` if any actionable flag is set.
    pub fn needed(&self) -> bool {
        self.flags.iter().any(|flag| !flag.is_informational())
    }

    pub fn certificate_updated(&self) -> bool {
        self.tls_cert_updated() || self.ecert_updated()
    }

    pub fn certificate_created(&self) -> bool {
        self.tls_cert_created() || self.ecert_created()
    }

    /// Returns `true` if the current crypto material is about to be replaced
    /// and should be backed up first.
    pub fn crypto_backup_needed(&self) -> bool {
        self.ecert_enroll()
            || self.tls_cert_enroll()
            || self.ecert_reenroll_needed()
            || self.tls_reenroll_needed()
            || self.ecert_new_key_reenroll()
            || self.tls_cert_new_key_reenroll()
            || self.msp_updated()
    }

    /// Returns the names of all set flags, in declaration order.
    pub fn flag_names(&self) -> Vec<String> {
        UpdateFlag::iter()
            .filter(|flag| self.is_set(*flag))
            .map(|flag| flag.to_string())
            .collect()
    }
}

macro_rules! flag_accessors {
    ($($name:ident => $flag:ident),* $(,)?) => {
        impl Update {
            $(
                #[inline]
                pub fn $name(&self) -> bool {
                    self.is_set(UpdateFlag::$flag)
                }
            )*
        }
    };
}

flag_accessors! {
    spec_updated => SpecUpdated,
    overrides_updated => OverridesUpdated,
    msp_updated => MspUpdated,
    tls_cert_created => TlsCertCreated,
    ecert_created => EcertCreated,
    tls_cert_updated => TlsCertUpdated,
    ecert_updated => EcertUpdated,
    tls_cert_enroll => TlsCertEnroll,
    ecert_enroll => EcertEnroll,
    tls_reenroll_needed => TlsReenrollNeeded,
    ecert_reenroll_needed => EcertReenrollNeeded,
    tls_cert_new_key_reenroll => TlsCertNewKeyReenroll,
    ecert_new_key_reenroll => EcertNewKeyReenroll,
    restart_needed => RestartNeeded,
    node_ou_updated => NodeOuUpdated,
    images_updated => ImagesUpdated,
    fabric_version_updated => FabricVersionUpdated,
    migrate_to_v2 => MigrateToV2,
    migrate_to_v24 => MigrateToV24,
    migrate_to_v25 => MigrateToV25,
    upgrade_dbs => UpgradeDbs,
}
