//! Human readable descriptions of what a selective deployment lost between
//! two versions. The separator tokens are part of the contract with the
//! dispatcher, which splits the strings back into fields.

use crate::resources::{
    crd::v1alpha::selectivedeployment::{ControllerRef, SelectiveDeployment},
    workload::WorkloadKind,
};

/// Separates the type of a removed controller from its name.
pub const ENTRY_SEPARATOR: &str = "?/delta/? ";
/// Separates removed controller entries.
pub const LIST_SEPARATOR: &str = "/?delta?/ ";
/// Separates the fields of a deletion delta.
pub const FIELD_SEPARATOR: &str = "-?delta?- ";

/// Renders every entry of `old` whose `(type, name)` pair doesn't occur in
/// `new`, in the order of `old`. Duplicated entries are reported once per
/// occurrence.
pub fn removed_controllers(old: &[ControllerRef], new: &[ControllerRef]) -> Vec<String> {
    old.iter()
        .filter(|old_entry| {
            !new.iter()
                .any(|new_entry| old_entry.kind == new_entry.kind && old_entry.name == new_entry.name)
        })
        .map(render_entry)
        .collect()
}

pub fn render_entry(controller: &ControllerRef) -> String {
    format!("{}{ENTRY_SEPARATOR}{}", controller.kind, controller.name)
}

pub fn join_removed(removed: &[String]) -> String {
    removed.join(LIST_SEPARATOR)
}

/// Joins two removed-controller lists, skipping empty ones.
pub fn merge_removed(removed: &str, more: &str) -> String {
    match (removed.is_empty(), more.is_empty()) {
        (_, true) => removed.to_owned(),
        (true, false) => more.to_owned(),
        (false, false) => format!("{removed}{LIST_SEPARATOR}{more}"),
    }
}

/// Adds `removed` to the controller list a deletion delta carries. Deltas
/// without the expected fields are returned unchanged.
pub fn extend_deletion_delta(deletion: &str, removed: &str) -> String {
    match deletion.rsplit_once(FIELD_SEPARATOR) {
        Some((identity, listed)) => format!(
            "{identity}{FIELD_SEPARATOR}{}",
            merge_removed(listed, removed)
        ),
        None => deletion.to_owned(),
    }
}

/// Delta of an update: the controllers that disappeared from the spec.
pub fn update_delta(old: &SelectiveDeployment, new: &SelectiveDeployment) -> String {
    join_removed(&removed_controllers(
        &old.spec.controller,
        &new.spec.controller,
    ))
}

/// Delta of a deletion: name, namespace, declared type and every controller
/// the deleted object referenced.
pub fn deletion_delta(deleted: &SelectiveDeployment) -> String {
    let workload_type = deleted.spec.workload_type.to_string();
    let removed = join_removed(&removed_controllers(&deleted.spec.controller, &[]));

    [
        deleted.metadata.name.as_deref().unwrap_or_default(),
        deleted.metadata.namespace.as_deref().unwrap_or_default(),
        workload_type.as_str(),
        removed.as_str(),
    ]
    .join(FIELD_SEPARATOR)
}

/// Parses a joined list produced by [`join_removed`]. Entries that don't
/// name a known workload kind are skipped.
pub fn parse_removed(delta: &str) -> Vec<ControllerRef> {
    delta
        .split(LIST_SEPARATOR)
        .filter_map(|entry| {
            let (kind, name) = entry.split_once(ENTRY_SEPARATOR)?;
            let kind = match kind {
                "Deployment" => WorkloadKind::Deployment,
                "DaemonSet" => WorkloadKind::DaemonSet,
                "StatefulSet" => WorkloadKind::StatefulSet,
                _ => return None,
            };

            Some(ControllerRef::new(kind, name))
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
pub struct DeletionDelta<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub workload_type: &'a str,
    pub removed: Vec<ControllerRef>,
}

pub fn parse_deletion_delta(delta: &str) -> Option<DeletionDelta<'_>> {
    let mut fields = delta.splitn(4, FIELD_SEPARATOR);

    Some(DeletionDelta {
        name: fields.next()?,
        namespace: fields.next()?,
        workload_type: fields.next()?,
        removed: parse_removed(fields.next()?),
    })
}
