//! Device and resource model.

use serde_json::{Map, Number, Value};

/// Geographic position.
///
/// Coordinates keep their JSON number form, so `36` stays an integer and
/// `36.0` a float through a decode/encode cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Latitude in degrees.
    pub lat: Number,
    /// Longitude in degrees.
    pub long: Number,
}

impl Location {
    /// Position from degrees. `None` for NaN or infinite values.
    pub fn from_degrees(lat: f64, long: f64) -> Option<Self> {
        Some(Self {
            lat: Number::from_f64(lat)?,
            long: Number::from_f64(long)?,
        })
    }

    /// Latitude and longitude as floats.
    pub fn degrees(&self) -> (f64, f64) {
        (
            self.lat.as_f64().unwrap_or_default(),
            self.long.as_f64().unwrap_or_default(),
        )
    }
}

/// Access policy of a device or resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    /// Resource can be observed.
    pub observable: Option<bool>,
    /// Resource is listed by discovery.
    pub discoverable: Option<bool>,
    /// Access mode, e.g. `"rw"`.
    pub access: Option<String>,
}

impl Policy {
    /// Check whether no policy field is set.
    pub fn is_empty(&self) -> bool {
        self.observable.is_none() && self.discoverable.is_none() && self.access.is_none()
    }
}

/// A sub-resource of a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    /// Human readable type name.
    pub type_name: Option<String>,
    /// Resource type, e.g. `urn:io.iopa:resource:projector`.
    pub resource_type: Option<String>,
    /// Interface, e.g. `if.switch.binary`.
    pub interface: Option<String>,
    /// Path on the device, e.g. `/media/projector`.
    pub path: Option<String>,
    /// Resource name.
    pub name: Option<String>,
    /// Current value.
    pub value: Option<Value>,
    /// Free-form properties.
    pub properties: Option<Map<String, Value>>,
    /// Id of the owning device.
    pub parent: Option<String>,
    /// Policy.
    pub policy: Option<Policy>,
}

impl Resource {
    /// Create a resource at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// A device and its resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    /// Unique id. Required for registration.
    pub id: Option<String>,
    /// Manufacturer name.
    pub manufacturer: Option<String>,
    /// Manufacturer web site.
    pub manufacturer_url: Option<String>,
    /// Model name.
    pub model_name: Option<String>,
    /// Model number.
    pub model_number: Option<String>,
    /// Platform identifier.
    pub platform_id: Option<String>,
    /// Platform name, used as the `SERVER` product token.
    pub platform_name: Option<String>,
    /// Firmware version.
    pub platform_firmware: Option<String>,
    /// Operating system.
    pub platform_os: Option<String>,
    /// Device type, e.g. `urn:io.iopa:demo:devices`.
    pub device_type: Option<String>,
    /// Device version.
    pub version: Option<String>,
    /// Geographic position.
    pub location: Option<Location>,
    /// Human readable location.
    pub location_name: Option<String>,
    /// Currency code.
    pub currency: Option<String>,
    /// Region code.
    pub region: Option<String>,
    /// Device clock, as reported.
    pub system_time: Option<String>,
    /// Access policy of the device.
    pub policy: Option<Policy>,
    /// Supported URL schemes, e.g. `coap`.
    pub schemes: Option<Vec<String>>,
    /// Where the device is served. Never sent on the wire.
    pub url: Option<String>,
    /// Resources in declaration order. `Some(vec![])` is an explicitly
    /// empty `links` list.
    pub resources: Option<Vec<Resource>>,
}

impl Device {
    /// Create a device with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// The id, or `""` when unset.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> &[Resource] {
        self.resources.as_deref().unwrap_or_default()
    }

    /// Add a resource, stamping its parent id.
    pub fn with_resource(mut self, mut resource: Resource) -> Self {
        if resource.parent.is_none() {
            resource.parent = self.id.clone();
        }
        self.resources.get_or_insert_with(Vec::new).push(resource);
        self
    }

    /// First resource, the one announcements describe the device by.
    pub fn primary_resource(&self) -> Option<&Resource> {
        self.resources().first()
    }
}
