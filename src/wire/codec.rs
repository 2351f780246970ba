//! Compact wire keys.
//!
//! Devices travel as JSON objects with abbreviated keys (`man`, `mn`,
//! `uuid`, ...). [`to_wire`] emits exactly the requested fields that are
//! set; [`from_wire`] maps keys back through inverse tables built once,
//! dropping keys it does not know.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map, Value};

use super::model::{Device, Location, Policy, Resource};
use crate::core::WireError;

/// A wire document.
pub type WireObject = Map<String, Value>;

// =============================================================================
// FIELD TABLES
// =============================================================================

/// Device fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceField {
    Id,
    Manufacturer,
    ManufacturerUrl,
    ModelName,
    ModelNumber,
    PlatformId,
    PlatformName,
    PlatformFirmware,
    PlatformOs,
    Type,
    Version,
    Location,
    LocationName,
    Currency,
    Region,
    SystemTime,
    Policy,
    Schemes,
    Links,
}

impl DeviceField {
    /// Every device field.
    pub const ALL: &'static [DeviceField] = &[
        DeviceField::Id,
        DeviceField::Manufacturer,
        DeviceField::ManufacturerUrl,
        DeviceField::ModelName,
        DeviceField::ModelNumber,
        DeviceField::PlatformId,
        DeviceField::PlatformName,
        DeviceField::PlatformFirmware,
        DeviceField::PlatformOs,
        DeviceField::Type,
        DeviceField::Version,
        DeviceField::Location,
        DeviceField::LocationName,
        DeviceField::Currency,
        DeviceField::Region,
        DeviceField::SystemTime,
        DeviceField::Policy,
        DeviceField::Schemes,
        DeviceField::Links,
    ];

    /// Fields served by the device detail resource.
    pub const DETAIL: &'static [DeviceField] = &[
        DeviceField::Id,
        DeviceField::Manufacturer,
        DeviceField::ManufacturerUrl,
        DeviceField::ModelName,
        DeviceField::ModelNumber,
        DeviceField::PlatformId,
        DeviceField::PlatformName,
        DeviceField::PlatformFirmware,
        DeviceField::PlatformOs,
        DeviceField::Type,
        DeviceField::Version,
        DeviceField::Location,
        DeviceField::LocationName,
        DeviceField::Currency,
        DeviceField::Region,
        DeviceField::SystemTime,
        DeviceField::Schemes,
    ];

    /// Fields of a resource listing entry.
    pub const SUMMARY: &'static [DeviceField] = &[DeviceField::Id, DeviceField::Links];

    /// Wire key.
    pub fn wire_key(self) -> &'static str {
        match self {
            DeviceField::Id => "uuid",
            DeviceField::Manufacturer => "man",
            DeviceField::ManufacturerUrl => "murl",
            DeviceField::ModelName => "mn",
            DeviceField::ModelNumber => "mno",
            DeviceField::PlatformId => "pi",
            DeviceField::PlatformName => "pn",
            DeviceField::PlatformFirmware => "pfv",
            DeviceField::PlatformOs => "pos",
            DeviceField::Type => "t",
            DeviceField::Version => "v",
            DeviceField::Location => "loc",
            DeviceField::LocationName => "locn",
            DeviceField::Currency => "cur",
            DeviceField::Region => "reg",
            DeviceField::SystemTime => "stim",
            DeviceField::Policy => "pol",
            DeviceField::Schemes => "s",
            DeviceField::Links => "links",
        }
    }

    /// Field for a wire key.
    pub fn from_wire_key(key: &str) -> Option<Self> {
        static INVERSE: LazyLock<HashMap<&'static str, DeviceField>> = LazyLock::new(|| {
            DeviceField::ALL
                .iter()
                .map(|field| (field.wire_key(), *field))
                .collect()
        });
        INVERSE.get(key).copied()
    }
}

/// Resource fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceField {
    TypeName,
    Type,
    Interface,
    Path,
    Name,
    Properties,
    Value,
    Parent,
    Policy,
}

impl ResourceField {
    /// Every resource field.
    pub const ALL: &'static [ResourceField] = &[
        ResourceField::TypeName,
        ResourceField::Type,
        ResourceField::Interface,
        ResourceField::Path,
        ResourceField::Name,
        ResourceField::Properties,
        ResourceField::Value,
        ResourceField::Parent,
        ResourceField::Policy,
    ];

    /// Fields of a resource listing link.
    pub const SUMMARY: &'static [ResourceField] = &[
        ResourceField::Path,
        ResourceField::Type,
        ResourceField::Interface,
        ResourceField::Policy,
    ];

    /// Wire key.
    pub fn wire_key(self) -> &'static str {
        match self {
            ResourceField::TypeName => "rtn",
            ResourceField::Type => "rt",
            ResourceField::Interface => "if",
            ResourceField::Path => "href",
            ResourceField::Name => "n",
            ResourceField::Properties => "p",
            ResourceField::Value => "v",
            ResourceField::Parent => "par",
            ResourceField::Policy => "pol",
        }
    }

    /// Field for a wire key.
    pub fn from_wire_key(key: &str) -> Option<Self> {
        static INVERSE: LazyLock<HashMap<&'static str, ResourceField>> = LazyLock::new(|| {
            ResourceField::ALL
                .iter()
                .map(|field| (field.wire_key(), *field))
                .collect()
        });
        INVERSE.get(key).copied()
    }
}

/// Policy fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyField {
    Observable,
    Discoverable,
    Access,
}

impl PolicyField {
    /// Every policy field.
    pub const ALL: &'static [PolicyField] = &[
        PolicyField::Observable,
        PolicyField::Discoverable,
        PolicyField::Access,
    ];

    /// Wire key.
    pub fn wire_key(self) -> &'static str {
        match self {
            PolicyField::Observable => "obs",
            PolicyField::Discoverable => "dis",
            PolicyField::Access => "acc",
        }
    }

    /// Field for a wire key.
    pub fn from_wire_key(key: &str) -> Option<Self> {
        PolicyField::ALL
            .iter()
            .find(|field| field.wire_key() == key)
            .copied()
    }
}

// =============================================================================
// ENCODE
// =============================================================================

/// Encode `device` with the listed fields. Links carry every resource field.
pub fn to_wire(device: &Device, fields: &[DeviceField]) -> WireObject {
    to_wire_with(device, fields, ResourceField::ALL)
}

/// Encode `device`, choosing the resource fields used under `links`.
pub fn to_wire_with(
    device: &Device,
    fields: &[DeviceField],
    resource_fields: &[ResourceField],
) -> WireObject {
    let mut target = WireObject::new();
    for field in fields {
        if let Some(value) = device_value(device, *field, resource_fields) {
            target.insert(field.wire_key().to_string(), value);
        }
    }
    target
}

/// Encode one resource with the listed fields.
pub fn resource_to_wire(resource: &Resource, fields: &[ResourceField]) -> WireObject {
    let mut target = WireObject::new();
    for field in fields {
        let value = match field {
            ResourceField::TypeName => text(&resource.type_name),
            ResourceField::Type => text(&resource.resource_type),
            ResourceField::Interface => text(&resource.interface),
            ResourceField::Path => text(&resource.path),
            ResourceField::Name => text(&resource.name),
            ResourceField::Properties => resource.properties.clone().map(Value::Object),
            ResourceField::Value => resource.value.clone().filter(|v| !v.is_null()),
            ResourceField::Parent => text(&resource.parent),
            ResourceField::Policy => resource.policy.as_ref().map(policy_to_wire),
        };
        if let Some(value) = value {
            target.insert(field.wire_key().to_string(), value);
        }
    }
    target
}

/// Encode a policy key by key.
pub fn policy_to_wire(policy: &Policy) -> Value {
    let mut target = WireObject::new();
    for field in PolicyField::ALL {
        let value = match field {
            PolicyField::Observable => policy.observable.map(Value::Bool),
            PolicyField::Discoverable => policy.discoverable.map(Value::Bool),
            PolicyField::Access => text(&policy.access),
        };
        if let Some(value) = value {
            target.insert(field.wire_key().to_string(), value);
        }
    }
    Value::Object(target)
}

fn text(value: &Option<String>) -> Option<Value> {
    value.clone().map(Value::String)
}

fn device_value(device: &Device, field: DeviceField, resource_fields: &[ResourceField]) -> Option<Value> {
    match field {
        DeviceField::Id => text(&device.id),
        DeviceField::Manufacturer => text(&device.manufacturer),
        DeviceField::ManufacturerUrl => text(&device.manufacturer_url),
        DeviceField::ModelName => text(&device.model_name),
        DeviceField::ModelNumber => text(&device.model_number),
        DeviceField::PlatformId => text(&device.platform_id),
        DeviceField::PlatformName => text(&device.platform_name),
        DeviceField::PlatformFirmware => text(&device.platform_firmware),
        DeviceField::PlatformOs => text(&device.platform_os),
        DeviceField::Type => text(&device.device_type),
        DeviceField::Version => text(&device.version),
        DeviceField::Location => device
            .location
            .as_ref()
            .map(|loc| {
                Value::Array(vec![
                    Value::Number(loc.lat.clone()),
                    Value::Number(loc.long.clone()),
                ])
            }),
        DeviceField::LocationName => text(&device.location_name),
        DeviceField::Currency => text(&device.currency),
        DeviceField::Region => text(&device.region),
        DeviceField::SystemTime => text(&device.system_time),
        DeviceField::Policy => device.policy.as_ref().map(policy_to_wire),
        DeviceField::Schemes => device
            .schemes
            .as_ref()
            .map(|schemes| schemes.iter().cloned().map(Value::String).collect()),
        DeviceField::Links => device.resources.as_ref().map(|resources| {
            resources
                .iter()
                .map(|r| Value::Object(resource_to_wire(r, resource_fields)))
                .collect()
        }),
    }
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode a device. Unknown keys and `null` values are ignored.
pub fn from_wire(source: &WireObject) -> Result<Device, WireError> {
    let mut device = Device::default();
    for (key, value) in source {
        let Some(field) = DeviceField::from_wire_key(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let key = field.wire_key();
        match field {
            DeviceField::Id => device.id = Some(string(key, value)?),
            DeviceField::Manufacturer => device.manufacturer = Some(string(key, value)?),
            DeviceField::ManufacturerUrl => device.manufacturer_url = Some(string(key, value)?),
            DeviceField::ModelName => device.model_name = Some(string(key, value)?),
            DeviceField::ModelNumber => device.model_number = Some(string(key, value)?),
            DeviceField::PlatformId => device.platform_id = Some(string(key, value)?),
            DeviceField::PlatformName => device.platform_name = Some(string(key, value)?),
            DeviceField::PlatformFirmware => device.platform_firmware = Some(string(key, value)?),
            DeviceField::PlatformOs => device.platform_os = Some(string(key, value)?),
            DeviceField::Type => device.device_type = Some(string(key, value)?),
            DeviceField::Version => device.version = Some(string(key, value)?),
            DeviceField::Location => device.location = Some(location(key, value)?),
            DeviceField::LocationName => device.location_name = Some(string(key, value)?),
            DeviceField::Currency => device.currency = Some(string(key, value)?),
            DeviceField::Region => device.region = Some(string(key, value)?),
            DeviceField::SystemTime => device.system_time = Some(string(key, value)?),
            DeviceField::Policy => device.policy = Some(policy_from_wire(value)?),
            DeviceField::Schemes => {
                let items = array(key, value)?;
                let schemes = items
                    .iter()
                    .map(|item| string(key, item))
                    .collect::<Result<Vec<_>, _>>()?;
                device.schemes = Some(schemes);
            }
            DeviceField::Links => {
                let resources = array(key, value)?
                    .iter()
                    .map(|item| match item {
                        Value::Object(object) => resource_from_wire(object),
                        _ => Err(WireError::NotAnObject("links entry")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                device.resources = Some(resources);
            }
        }
    }
    Ok(device)
}

/// Decode a resource. Unknown keys and `null` values are ignored.
pub fn resource_from_wire(source: &WireObject) -> Result<Resource, WireError> {
    let mut resource = Resource::default();
    for (key, value) in source {
        let Some(field) = ResourceField::from_wire_key(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let key = field.wire_key();
        match field {
            ResourceField::TypeName => resource.type_name = Some(string(key, value)?),
            ResourceField::Type => resource.resource_type = Some(string(key, value)?),
            ResourceField::Interface => resource.interface = Some(string(key, value)?),
            ResourceField::Path => resource.path = Some(string(key, value)?),
            ResourceField::Name => resource.name = Some(string(key, value)?),
            ResourceField::Properties => match value {
                Value::Object(object) => resource.properties = Some(object.clone()),
                other => return Err(invalid(key, "an object", other)),
            },
            ResourceField::Value => resource.value = Some(value.clone()),
            ResourceField::Parent => resource.parent = Some(string(key, value)?),
            ResourceField::Policy => resource.policy = Some(policy_from_wire(value)?),
        }
    }
    Ok(resource)
}

/// Decode a policy object.
pub fn policy_from_wire(value: &Value) -> Result<Policy, WireError> {
    let Value::Object(source) = value else {
        return Err(WireError::NotAnObject("pol"));
    };
    let mut policy = Policy::default();
    for (key, value) in source {
        let Some(field) = PolicyField::from_wire_key(key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let key = field.wire_key();
        match field {
            PolicyField::Observable => policy.observable = Some(boolean(key, value)?),
            PolicyField::Discoverable => policy.discoverable = Some(boolean(key, value)?),
            PolicyField::Access => policy.access = Some(string(key, value)?),
        }
    }
    Ok(policy)
}

fn invalid(key: &'static str, expected: &str, found: &Value) -> WireError {
    WireError::InvalidValue {
        key,
        reason: format!("expected {expected}, found {found}"),
    }
}

fn string(key: &'static str, value: &Value) -> Result<String, WireError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(key, "a string", value))
}

fn boolean(key: &'static str, value: &Value) -> Result<bool, WireError> {
    value.as_bool().ok_or_else(|| invalid(key, "a boolean", value))
}

fn array<'a>(key: &'static str, value: &'a Value) -> Result<&'a Vec<Value>, WireError> {
    value.as_array().ok_or_else(|| invalid(key, "an array", value))
}

fn location(key: &'static str, value: &Value) -> Result<Location, WireError> {
    match array(key, value)?.as_slice() {
        [Value::Number(lat), Value::Number(long)] => Ok(Location {
            lat: lat.clone(),
            long: long.clone(),
        }),
        [_, _] => Err(invalid(key, "two numbers", value)),
        _ => Err(invalid(key, "[lat, long]", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn projector() -> Device {
        let mut properties = Map::new();
        properties.insert("brand".into(), json!("acme"));
        Device {
            id: Some("12345-67890".into()),
            manufacturer: Some("Internet of Protocols Alliance".into()),
            manufacturer_url: Some("http://iopa.io".into()),
            model_name: Some("npm install iopa-devices".into()),
            model_number: Some("iopa-devices".into()),
            platform_name: Some("IOPA Device Stick".into()),
            platform_firmware: Some("1.0".into()),
            platform_os: Some("linux".into()),
            device_type: Some("urn:io.iopa:demo:devices".into()),
            version: Some("1.0".into()),
            location: Location::from_degrees(36.5, -115.25),
            location_name: Some("Las Vegas".into()),
            schemes: Some(vec!["coap".into(), "coaps".into()]),
            policy: Some(Policy {
                observable: Some(false),
                ..Policy::default()
            }),
            ..Device::default()
        }
        .with_resource(Resource {
            type_name: Some("Projector".into()),
            resource_type: Some("urn:io.iopa:resource:projector".into()),
            interface: Some("if.switch.binary".into()),
            path: Some("/media/projector".into()),
            name: Some("Projector 1".into()),
            value: Some(json!(false)),
            properties: Some(properties),
            policy: Some(Policy {
                observable: Some(true),
                discoverable: Some(true),
                access: Some("rw".into()),
            }),
            ..Resource::default()
        })
    }

    #[test]
    fn test_device_round_trip() {
        let device = projector();
        let wire = to_wire(&device, DeviceField::ALL);
        assert_eq!(from_wire(&wire).unwrap(), device);
    }

    #[test]
    fn test_wire_round_trip() {
        let wire = json!({
            "uuid": "D1",
            "mn": "Model",
            "loc": [1.5, 2.5],
            "pol": {"obs": true},
            "links": [{"href": "/a", "rt": "urn:x", "v": 3, "par": "D1"}]
        });
        let Value::Object(wire) = wire else { unreachable!() };

        let device = from_wire(&wire).unwrap();
        assert_eq!(to_wire(&device, DeviceField::ALL), wire);
    }

    #[test]
    fn test_integer_location_kept() {
        let Value::Object(wire) = json!({"uuid": "D1", "loc": [36, -115]}) else {
            unreachable!()
        };
        let device = from_wire(&wire).unwrap();
        assert_eq!(device.location.as_ref().map(Location::degrees), Some((36.0, -115.0)));
        assert_eq!(to_wire(&device, DeviceField::ALL), wire);
        assert_eq!(wire["loc"], json!([36, -115]));
    }

    #[test]
    fn test_empty_links_kept() {
        let Value::Object(wire) = json!({"uuid": "D1", "links": []}) else { unreachable!() };
        let device = from_wire(&wire).unwrap();
        assert_eq!(device.resources, Some(Vec::new()));
        assert_eq!(to_wire(&device, DeviceField::ALL), wire);

        assert!(!to_wire(&Device::new("D1"), DeviceField::ALL).contains_key("links"));
    }

    #[test]
    fn test_empty_id_kept() {
        let Value::Object(wire) = json!({"uuid": "", "mn": "M"}) else { unreachable!() };
        let device = from_wire(&wire).unwrap();
        assert_eq!(device.id.as_deref(), Some(""));
        assert_eq!(to_wire(&device, DeviceField::ALL), wire);

        assert!(!to_wire(&Device::default(), DeviceField::ALL).contains_key("uuid"));
    }

    #[test]
    fn test_absent_fields_omitted() {
        let mut device = Device::new("D1");
        device.model_name = Some("M".into());

        let wire = to_wire(&device, DeviceField::ALL);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire["uuid"], json!("D1"));
        assert_eq!(wire["mn"], json!("M"));
        assert!(!wire.values().any(Value::is_null));
    }

    #[test]
    fn test_only_listed_fields() {
        let device = projector();
        let wire = to_wire(&device, &[DeviceField::Id, DeviceField::Type]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire["t"], json!("urn:io.iopa:demo:devices"));

        let detail = to_wire(&device, DeviceField::DETAIL);
        assert!(!detail.contains_key("links"));
        assert!(!detail.contains_key("pol"));
    }

    #[test]
    fn test_summary_links() {
        let device = projector();
        let wire = to_wire_with(&device, DeviceField::SUMMARY, ResourceField::SUMMARY);
        assert_eq!(
            Value::Object(wire),
            json!({
                "uuid": "12345-67890",
                "links": [{
                    "href": "/media/projector",
                    "rt": "urn:io.iopa:resource:projector",
                    "if": "if.switch.binary",
                    "pol": {"obs": true, "dis": true, "acc": "rw"}
                }]
            })
        );
    }

    #[test]
    fn test_unknown_keys_dropped() {
        let Value::Object(wire) = json!({"uuid": "D1", "zzz": 1, "mn": null}) else {
            unreachable!()
        };
        let device = from_wire(&wire).unwrap();
        assert_eq!(device, Device::new("D1"));
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let Value::Object(wire) = json!({"uuid": 7}) else { unreachable!() };
        assert!(matches!(
            from_wire(&wire),
            Err(WireError::InvalidValue { key: "uuid", .. })
        ));

        let Value::Object(wire) = json!({"links": [1]}) else { unreachable!() };
        assert_eq!(from_wire(&wire), Err(WireError::NotAnObject("links entry")));
    }

    #[test]
    fn test_inverse_tables() {
        for field in DeviceField::ALL {
            assert_eq!(DeviceField::from_wire_key(field.wire_key()), Some(*field));
        }
        for field in ResourceField::ALL {
            assert_eq!(ResourceField::from_wire_key(field.wire_key()), Some(*field));
        }
        assert_eq!(PolicyField::from_wire_key("acc"), Some(PolicyField::Access));
        assert_eq!(DeviceField::from_wire_key("nope"), None);
    }
}
