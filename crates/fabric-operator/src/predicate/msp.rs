use crate::crd::{MspSpec, MspSpecItem};

/// Returns `true` if the MSP material changed in a way that requires new
/// crypto material to be written.
///
/// Admin certificates are distributed separately, so changes that only touch
/// them are ignored. Removing MSP material is not an update either.
pub fn msp_updated(old: Option<&MspSpec>, new: Option<&MspSpec>) -> bool {
    match (old, new) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => {
            item_updated(old.component.as_ref(), new.component.as_ref())
                || item_updated(old.tls.as_ref(), new.tls.as_ref())
                || item_updated(old.client_auth.as_ref(), new.client_auth.as_ref())
        }
    }
}

fn item_updated(old: Option<&MspSpecItem>, new: Option<&MspSpecItem>) -> bool {
    match (old, new) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => without_admin_certs(old) != without_admin_certs(new),
    }
}

fn without_admin_certs(item: &MspSpecItem) -> MspSpecItem {
    MspSpecItem {
        admin_certs: Vec::new(),
        ..item.clone()
    }
}
