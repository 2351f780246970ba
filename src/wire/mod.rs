//! Device model and its compact wire representation.

mod codec;
mod model;

pub use codec::{
    DeviceField, PolicyField, ResourceField, WireObject, from_wire, policy_from_wire,
    policy_to_wire, resource_from_wire, resource_to_wire, to_wire, to_wire_with,
};
pub use model::{Device, Location, Policy, Resource};
