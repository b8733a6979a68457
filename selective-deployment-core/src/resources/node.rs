use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Node;

const READY_CONDITION: &str = "Ready";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyStatus {
    True,
    False,
    Unknown,
}

/// What an update of a node means for the workloads placed on the fleet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeTransition {
    /// Ready False/Unknown -> True, or Unschedulable true -> false
    BecameReady,
    /// Ready True -> False/Unknown, or Unschedulable false -> true
    BecameUnhealthy,
    /// still Ready and schedulable, but its IP address set has changed
    AddressesChanged,
    Unchanged,
}

pub fn ready_status(node: &Node) -> ReadyStatus {
    let condition = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition.type_ == READY_CONDITION)
        });

    match condition.map(|condition| condition.status.as_str()) {
        Some("True") => ReadyStatus::True,
        Some("False") => ReadyStatus::False,
        _ => ReadyStatus::Unknown,
    }
}

pub fn is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

fn addresses(node: &Node) -> BTreeSet<&str> {
    node.status
        .as_ref()
        .and_then(|status| status.addresses.as_ref())
        .into_iter()
        .flatten()
        .map(|address| address.address.as_str())
        .collect()
}

/// Compares the address sets of both nodes, ordering doesn't matter.
pub fn addresses_changed(old: &Node, new: &Node) -> bool {
    addresses(old) != addresses(new)
}

pub fn classify_transition(old: &Node, new: &Node) -> NodeTransition {
    let old_ready = ready_status(old);
    let new_ready = ready_status(new);
    let old_unschedulable = is_unschedulable(old);
    let new_unschedulable = is_unschedulable(new);

    if (old_ready != ReadyStatus::True && new_ready == ReadyStatus::True)
        || (old_unschedulable && !new_unschedulable)
    {
        NodeTransition::BecameReady
    } else if (old_ready == ReadyStatus::True && new_ready != ReadyStatus::True)
        || (!old_unschedulable && new_unschedulable)
    {
        NodeTransition::BecameUnhealthy
    } else if !new_unschedulable && new_ready == ReadyStatus::True && addresses_changed(old, new) {
        NodeTransition::AddressesChanged
    } else {
        NodeTransition::Unchanged
    }
}
