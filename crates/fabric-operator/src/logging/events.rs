//! Kubernetes events describing failed reconciliations.

use std::error::Error;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType};

use super::controller::ReconcilerError;

/// Upper bound of an event note in bytes.
const MAX_NOTE_LEN: usize = 1024;

const ELLIPSIS: char = '…';

/// Builds the warning event telling the owner of a resource why it could not
/// be reconciled.
pub(super) fn reconcile_failure_event<E: ReconcilerError>(error: &E) -> Event {
    Event {
        type_: EventType::Warning,
        reason: error.category().to_owned(),
        note: Some(note(error, MAX_NOTE_LEN)),
        action: "Reconcile".to_owned(),
        secondary: error.secondary_object().map(ObjectReference::from),
    }
}

/// Renders `error` and all of its causes, cut down to `max_len` bytes.
fn note(error: &dyn Error, max_len: usize) -> String {
    let mut note = error.to_string();

    let mut cause = error.source();
    while let Some(current) = cause {
        note.push_str(": ");
        note.push_str(&current.to_string());
        cause = current.source();
    }

    shorten(&mut note, max_len);
    note
}

/// Cuts `text` at a character boundary so that it fits into `max_len` bytes,
/// marking the cut with an ellipsis if there is room for one.
fn shorten(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }

    let budget = max_len.saturating_sub(ELLIPSIS.len_utf8());
    let cut = text
        .char_indices()
        .map(|(index, _)| index)
        .take_while(|index| *index <= budget)
        .last()
        .unwrap_or(0);

    text.truncate(cut);
    if ELLIPSIS.len_utf8() <= max_len {
        text.push(ELLIPSIS);
    }
}
