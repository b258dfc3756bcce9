//! Predicates for secrets holding the signing certificates of nodes.
//!
//! Certificates are often created outside of the operator (by an enrollment
//! job or by hand), so the secrets do not necessarily carry an owner
//! reference yet. In that case the owner is inferred from the secret name and
//! the reference is attached, which also puts the secret under Kubernetes
//! garbage collection.

use std::collections::BTreeMap;

use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::runtime::reflector::ObjectRef;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{
    context::Context,
    crd::ManagedResource,
    predicate::owners,
    update::{Update, UpdateFlag},
};

const SIGN_CERT_SUFFIX: &str = "-signcert";
const INIT_ROOT_CERT_MARKER: &str = "-init-rootcert";

/// Returns the flag a create (`created == true`) or update of the secret
/// `name` sets on `owner`, if it is the TLS or enrollment signing certificate
/// of exactly that owner.
pub fn certificate_flag(name: &str, owner: &str, created: bool) -> Option<UpdateFlag> {
    let prefix = name
        .strip_suffix(SIGN_CERT_SUFFIX)?
        .strip_suffix(owner)?
        .strip_suffix('-')?;

    match (prefix, created) {
        ("tls", true) => Some(UpdateFlag::TlsCertCreated),
        ("tls", false) => Some(UpdateFlag::TlsCertUpdated),
        ("ecert", true) => Some(UpdateFlag::EcertCreated),
        ("ecert", false) => Some(UpdateFlag::EcertUpdated),
        _ => None,
    }
}

/// Key under which [`without_contents`] stores the digest of a secret.
pub const CONTENT_DIGEST_KEY: &str = "sha256";

/// Replaces the contents of `secret` with a digest of them.
///
/// Watches keep the last seen state of every secret in scope. The predicates
/// only need to know whether the contents changed, so the key material is
/// dropped before it is tracked.
pub fn without_contents(secret: &mut Secret) {
    secret.metadata.managed_fields = None;

    let (data, string_data) = (secret.data.take(), secret.string_data.take());
    if data.is_none() && string_data.is_none() {
        return;
    }

    let mut hasher = Sha256::new();
    for (key, value) in data.iter().flatten() {
        digest_entry(&mut hasher, b'd', key, &value.0);
    }
    for (key, value) in string_data.iter().flatten() {
        digest_entry(&mut hasher, b's', key, value.as_bytes());
    }

    secret.data = Some(BTreeMap::from([(
        CONTENT_DIGEST_KEY.to_owned(),
        ByteString(hasher.finalize().to_vec()),
    )]));
}

// Length prefixes keep ("ab", "c") and ("a", "bc") apart.
fn digest_entry(hasher: &mut Sha256, origin: u8, key: &str, value: &[u8]) {
    hasher.update([origin]);
    for part in [key.as_bytes(), value] {
        hasher.update(part.len().to_le_bytes());
        hasher.update(part);
    }
}

/// Derives the name of the owning resource from a secret name.
///
/// Secrets are named `<prefix>-<owner>-<type>` or `<owner>-init-rootcert`.
/// Owner names may contain dashes themselves, so an owner whose name contains
/// `-init-rootcert` is not recognized correctly.
pub fn infer_owner_name(secret_name: &str) -> Option<String> {
    let tokens: Vec<&str> = secret_name.split('-').collect();
    if tokens.len() < 3 {
        return None;
    }

    let owner = if secret_name.contains(INIT_ROOT_CERT_MARKER) {
        &tokens[..tokens.len() - 2]
    } else {
        &tokens[1..tokens.len() - 1]
    };

    Some(owner.join("-"))
}

/// Returns the name of the resource of kind `R` owning `secret`.
async fn owner<R: ManagedResource>(ctx: &Context<R>, secret: &Secret) -> Option<String> {
    let meta = &secret.metadata;
    let namespace = meta.namespace.as_deref()?;

    if meta
        .owner_references
        .as_ref()
        .is_some_and(|owners| !owners.is_empty())
    {
        return owners::<R>(meta).into_iter().next().map(|owner| owner.name);
    }

    let candidate = infer_owner_name(meta.name.as_deref()?)?;
    let siblings = match ctx.siblings.list(R::KIND, namespace).await {
        Ok(siblings) => siblings,
        Err(error) => {
            warn!(
                error = &error as &dyn std::error::Error,
                "failed to list possible owners of secret"
            );
            return None;
        }
    };
    let owner = siblings
        .into_iter()
        .find(|sibling| sibling.name == candidate)?;

    match owner.owner_reference() {
        Some(reference) => {
            debug!(owner = owner.name, "attaching inferred owner to secret");

            if let Err(error) = ctx.secrets.set_owner(secret, reference).await {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to attach owner reference to secret"
                );
            }
        }
        None => debug!(owner = owner.name, "owner has no uid yet, not attaching it"),
    }

    Some(owner.name)
}

async fn certificate_changed<R: ManagedResource>(
    ctx: &Context<R>,
    secret: &Secret,
    created: bool,
) -> Option<ObjectRef<R>> {
    let owner = owner(ctx, secret).await?;
    let flag = certificate_flag(secret.metadata.name.as_deref()?, &owner, created)?;

    debug!(%owner, %flag, "signing certificate changed");
    ctx.queue.push(&owner, Update::from([flag]));

    Some(ObjectRef::new(&owner).within(secret.metadata.namespace.as_deref()?))
}

/// Handles a secret showing up. Returns the resource to reconcile, if any.
#[tracing::instrument(skip_all, fields(secret = secret.metadata.name.as_deref().unwrap_or_default()))]
pub async fn create<R: ManagedResource>(ctx: &Context<R>, secret: &Secret) -> Option<ObjectRef<R>> {
    certificate_changed(ctx, secret, true).await
}

/// Handles a modified secret. Only changed contents count as an update.
#[tracing::instrument(skip_all, fields(secret = new.metadata.name.as_deref().unwrap_or_default()))]
pub async fn update<R: ManagedResource>(
    ctx: &Context<R>,
    old: &Secret,
    new: &Secret,
) -> Option<ObjectRef<R>> {
    if old.data == new.data && old.string_data == new.string_data {
        return None;
    }

    certificate_changed(ctx, new, false).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;
    use rstest::rstest;

    use super::*;
    use crate::{
        crd::{IBPPeer, ResourceKind},
        testing::{FakeCluster, ScriptedOffering},
    };

    #[rstest]
    #[case("tls-org1-peer1-signcert", Some("org1-peer1"))]
    #[case("ecert-org1-peer1-signcert", Some("org1-peer1"))]
    #[case("ecert-peer1-cacerts", Some("peer1"))]
    #[case("org1-peer1-init-rootcert", Some("org1-peer1"))]
    #[case("peer1-init-rootcert", Some("peer1"))]
    #[case("tls-signcert", None)]
    #[case("signcert", None)]
    fn owner_names(#[case] secret: &str, #[case] expected: Option<&str>) {
        assert_eq!(infer_owner_name(secret).as_deref(), expected);
    }

    #[test]
    fn init_rootcert_in_owner_name_misparses() {
        assert_eq!(
            infer_owner_name("tls-my-init-rootcert-peer-signcert").as_deref(),
            Some("tls-my-init-rootcert")
        );
    }

    #[rstest]
    #[case("tls-org1-peer1-signcert", true, Some(UpdateFlag::TlsCertCreated))]
    #[case("tls-org1-peer1-signcert", false, Some(UpdateFlag::TlsCertUpdated))]
    #[case("ecert-org1-peer1-signcert", true, Some(UpdateFlag::EcertCreated))]
    #[case("ecert-org1-peer1-signcert", false, Some(UpdateFlag::EcertUpdated))]
    #[case("ecert-org1-peer1-keystore", false, None)]
    #[case("org1-peer1-signcert", false, None)]
    #[case("tls-org1-peer2-signcert", false, None)]
    #[case("tlsca-org1-peer1-signcert", false, None)]
    #[case("tls-xorg1-peer1-signcert", false, None)]
    #[case("ecert-tls-org1-peer1-signcert", false, None)]
    fn certificate_flags(
        #[case] name: &str,
        #[case] created: bool,
        #[case] expected: Option<UpdateFlag>,
    ) {
        assert_eq!(certificate_flag(name, "org1-peer1", created), expected);
    }

    fn secret(name: &str, owner: Option<OwnerReference>, cert: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("fabric".to_owned()),
                owner_references: owner.map(|owner| vec![owner]),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                "cert.pem".to_owned(),
                ByteString(cert.as_bytes().to_vec()),
            )])),
            ..Secret::default()
        }
    }

    fn peer_owner(name: &str) -> OwnerReference {
        OwnerReference {
            api_version: "ibp.com/v1beta1".to_owned(),
            kind: "IBPPeer".to_owned(),
            name: name.to_owned(),
            uid: "1234".to_owned(),
            ..OwnerReference::default()
        }
    }

    #[tokio::test]
    async fn owned_tls_secret_queues_update() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        let ctx = fake.context(Arc::new(ScriptedOffering::default()));

        let old = secret("tls-org1-peer1-signcert", Some(peer_owner("org1-peer1")), "a");
        let new = secret("tls-org1-peer1-signcert", Some(peer_owner("org1-peer1")), "b");

        let target = update(&ctx, &old, &new).await.expect("owner is reconciled");

        assert_eq!(target.name, "org1-peer1");
        assert_eq!(
            ctx.queue.pop("org1-peer1"),
            Update::from([UpdateFlag::TlsCertUpdated])
        );
    }

    #[tokio::test]
    async fn certificate_of_other_node_is_ignored() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        let ctx = fake.context(Arc::new(ScriptedOffering::default()));

        let old = secret("tls-org1-peer2-signcert", Some(peer_owner("org1-peer1")), "a");
        let new = secret("tls-org1-peer2-signcert", Some(peer_owner("org1-peer1")), "b");

        assert!(update(&ctx, &old, &new).await.is_none());
        assert!(ctx.queue.is_empty("org1-peer1"));
    }

    #[tokio::test]
    async fn metadata_only_change_is_ignored() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        let ctx = fake.context(Arc::new(ScriptedOffering::default()));

        let old = secret("tls-org1-peer1-signcert", None, "a");
        let new = secret("tls-org1-peer1-signcert", Some(peer_owner("org1-peer1")), "a");

        assert!(update(&ctx, &old, &new).await.is_none());
        assert!(ctx.queue.is_empty("org1-peer1"));
    }

    #[tokio::test]
    async fn secret_of_other_kind_is_ignored() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        fake.add_sibling(ResourceKind::Peer, "org1-orderer1");
        let ctx = fake.context(Arc::new(ScriptedOffering::default()));

        let mut owner = peer_owner("org1-orderer1");
        owner.kind = "IBPOrderer".to_owned();

        let created = secret("ecert-org1-orderer1-signcert", Some(owner), "a");
        assert!(create(&ctx, &created).await.is_none());
        assert!(fake.owner_writes().is_empty());
    }

    #[tokio::test]
    async fn owner_is_inferred_and_attached() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        fake.add_sibling(ResourceKind::Peer, "org1-peer1");
        let ctx = fake.context(Arc::new(ScriptedOffering::default()));

        let created = secret("ecert-org1-peer1-signcert", None, "a");
        let target = create(&ctx, &created).await.expect("owner was inferred");

        assert_eq!(target.name, "org1-peer1");
        assert_eq!(target.namespace.as_deref(), Some("fabric"));
        assert_eq!(
            ctx.queue.pop("org1-peer1"),
            Update::from([UpdateFlag::EcertCreated])
        );
        assert_eq!(
            fake.owner_writes(),
            [("ecert-org1-peer1-signcert".to_owned(), "org1-peer1".to_owned())]
        );
    }

    #[tokio::test]
    async fn unknown_owner_is_ignored() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        fake.add_sibling(ResourceKind::Peer, "org1-peer2");
        let ctx = fake.context(Arc::new(ScriptedOffering::default()));

        let created = secret("tls-org1-peer1-signcert", None, "a");

        assert!(create(&ctx, &created).await.is_none());
        assert!(fake.owner_writes().is_empty());
    }

    #[tokio::test]
    async fn non_certificate_secret_is_ignored() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        let ctx = fake.context(Arc::new(ScriptedOffering::default()));

        let created = secret(
            "tls-org1-peer1-keystore",
            Some(peer_owner("org1-peer1")),
            "a",
        );

        assert!(create(&ctx, &created).await.is_none());
        assert!(ctx.queue.is_empty("org1-peer1"));
    }

    #[test]
    fn contents_are_replaced_by_digest() {
        let mut first = secret("tls-org1-peer1-signcert", None, "a");
        let mut same = secret("tls-org1-peer1-signcert", Some(peer_owner("org1-peer1")), "a");
        let mut other = secret("tls-org1-peer1-signcert", None, "b");
        for tracked in [&mut first, &mut same, &mut other] {
            without_contents(tracked);
        }

        let digest = first.data.as_ref().and_then(|data| data.get(CONTENT_DIGEST_KEY));
        assert_eq!(digest.map(|digest| digest.0.len()), Some(32));
        assert!(!first.data.iter().flatten().any(|(key, _)| key == "cert.pem"));
        assert_eq!(first.data, same.data);
        assert_ne!(first.data, other.data);
    }

    #[test]
    fn secret_without_contents_stays_empty() {
        let mut empty = Secret::default();
        without_contents(&mut empty);

        assert_eq!(empty.data, None);
    }

    #[tokio::test]
    async fn change_is_detected_on_digests() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        let ctx = fake.context(Arc::new(ScriptedOffering::default()));

        let mut old = secret("ecert-org1-peer1-signcert", Some(peer_owner("org1-peer1")), "a");
        let mut new = secret("ecert-org1-peer1-signcert", Some(peer_owner("org1-peer1")), "b");
        without_contents(&mut old);
        without_contents(&mut new);

        assert!(update(&ctx, &old, &new).await.is_some());
        assert_eq!(
            ctx.queue.pop("org1-peer1"),
            Update::from([UpdateFlag::EcertUpdated])
        );
    }
}
