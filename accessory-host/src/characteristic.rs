//! Observable characteristic values with change detection
//!
//! A [`Characteristic`] holds one value exposed to the smart-home network.
//! Writes only count as changes when the new value differs from the stored
//! one (`PartialEq`), and every change is broadcast twice:
//!
//! - typed, as a [`ValueChange`] to subscribers of the characteristic itself
//! - as JSON, as a [`CharacteristicEvent`] on the accessory-wide event bus that
//!   the transport forwards to paired controllers
//!
//! Each change carries its [`ChangeOrigin`] so consumers can tell writes made
//! by the local process apart from writes made by a remote controller.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::CharacteristicError;

/// Capacity of the per-characteristic change channel
const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Who caused a characteristic value to change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    /// Written by this process
    Local,
    /// Written by a paired controller over the network
    Remote,
}

/// A typed change notification for a single characteristic
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange<T> {
    /// The new value
    pub value: T,
    /// Who wrote it
    pub origin: ChangeOrigin,
}

/// A change notification addressed by accessory and instance id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacteristicEvent {
    pub aid: u64,
    pub iid: u64,
    pub value: Value,
    pub origin: ChangeOrigin,
}

/// Sender half of an accessory's event bus, tagged with the accessory id.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    aid: u64,
    tx: broadcast::Sender<CharacteristicEvent>,
}

impl EventNotifier {
    pub fn new(aid: u64, tx: broadcast::Sender<CharacteristicEvent>) -> Self {
        Self { aid, tx }
    }

    fn notify(&self, iid: u64, value: Value, origin: ChangeOrigin) {
        // No receivers is the normal state before a controller connects.
        let _ = self.tx.send(CharacteristicEvent {
            aid: self.aid,
            iid,
            value,
            origin,
        });
    }
}

/// Well-known characteristic types, identified by their short HAP type ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicType {
    On,
    Brightness,
    Name,
    Manufacturer,
    Model,
    SerialNumber,
    FirmwareRevision,
}

impl CharacteristicType {
    /// Short type id as used in the accessory database
    pub fn type_id(&self) -> &'static str {
        match self {
            CharacteristicType::On => "25",
            CharacteristicType::Brightness => "8",
            CharacteristicType::Name => "23",
            CharacteristicType::Manufacturer => "20",
            CharacteristicType::Model => "21",
            CharacteristicType::SerialNumber => "30",
            CharacteristicType::FirmwareRevision => "52",
        }
    }

    /// Whether paired controllers may write this characteristic
    pub fn is_writable(&self) -> bool {
        matches!(self, CharacteristicType::On | CharacteristicType::Brightness)
    }
}

/// Inclusive numeric bounds of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

impl Bounds {
    /// The 0..=100 percentage range used by brightness-style values
    pub const PERCENTAGE: Bounds = Bounds {
        min: 0,
        max: 100,
        step: 1,
    };

    fn check(&self, value: i64) -> Result<(), CharacteristicError> {
        if value < self.min || value > self.max {
            return Err(CharacteristicError::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Values that can be stored in a characteristic
///
/// The format name and JSON conversions define how the value appears in the
/// accessory database and how remote writes are decoded.
pub trait CharacteristicValue: Clone + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// Format name in the accessory database
    const FORMAT: &'static str;

    fn to_json(&self) -> Value;

    /// Decode a remotely written value, `None` if the JSON type does not fit
    fn from_json(value: &Value) -> Option<Self>;

    /// Numeric view used for bounds checks; `None` for non-numeric formats
    fn as_i64(&self) -> Option<i64> {
        None
    }
}

impl CharacteristicValue for bool {
    const FORMAT: &'static str = "bool";

    fn to_json(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_json(value: &Value) -> Option<Self> {
        // Controllers may send booleans as 0/1.
        match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            _ => None,
        }
    }
}

impl CharacteristicValue for u8 {
    const FORMAT: &'static str = "uint8";

    fn to_json(&self) -> Value {
        Value::from(*self)
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_u64().and_then(|n| u8::try_from(n).ok())
    }

    fn as_i64(&self) -> Option<i64> {
        Some(i64::from(*self))
    }
}

impl CharacteristicValue for String {
    const FORMAT: &'static str = "string";

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

/// Entry for one characteristic in the accessory database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacteristicDescription {
    #[serde(rename = "type")]
    pub char_type: &'static str,
    pub iid: u64,
    pub perms: Vec<&'static str>,
    pub format: &'static str,
    pub value: Value,
    #[serde(rename = "minValue", skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(rename = "maxValue", skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(rename = "minStep", skip_serializing_if = "Option::is_none")]
    pub min_step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
}

/// A single observable, settable value on a service
pub struct Characteristic<T: CharacteristicValue> {
    iid: u64,
    kind: CharacteristicType,
    bounds: Option<Bounds>,
    unit: Option<&'static str>,
    value: Mutex<T>,
    changes: broadcast::Sender<ValueChange<T>>,
    notifier: EventNotifier,
}

impl<T: CharacteristicValue> Characteristic<T> {
    /// Create a characteristic with an initial value
    pub fn new(iid: u64, kind: CharacteristicType, initial: T, notifier: EventNotifier) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            iid,
            kind,
            bounds: None,
            unit: None,
            value: Mutex::new(initial),
            changes,
            notifier,
        }
    }

    /// Restrict remote writes to `bounds`
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn iid(&self) -> u64 {
        self.iid
    }

    pub fn kind(&self) -> CharacteristicType {
        self.kind
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// Current value
    pub fn value(&self) -> T {
        self.value.lock().clone()
    }

    /// Set the value from the local process
    ///
    /// Returns `true` if the value changed. Only changes are broadcast.
    pub fn set_value(&self, value: T) -> bool {
        self.store(value, ChangeOrigin::Local)
    }

    /// Apply a write from a remote controller
    ///
    /// Read-only characteristics and values outside the bounds are rejected.
    /// Returns `Ok(true)` if the value changed and listeners were notified.
    pub fn remote_update(&self, value: T) -> Result<bool, CharacteristicError> {
        if !self.kind.is_writable() {
            return Err(CharacteristicError::ReadOnly { iid: self.iid });
        }
        if let (Some(bounds), Some(n)) = (self.bounds, value.as_i64()) {
            bounds.check(n)?;
        }
        Ok(self.store(value, ChangeOrigin::Remote))
    }

    /// Subscribe to typed change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ValueChange<T>> {
        self.changes.subscribe()
    }

    fn store(&self, value: T, origin: ChangeOrigin) -> bool {
        let mut current = self.value.lock();
        if *current == value {
            return false;
        }
        *current = value.clone();

        // Broadcast while holding the lock so notifications keep write order.
        let json = value.to_json();
        let _ = self.changes.send(ValueChange { value, origin });
        self.notifier.notify(self.iid, json, origin);
        true
    }
}

impl<T: CharacteristicValue> std::fmt::Debug for Characteristic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Characteristic")
            .field("iid", &self.iid)
            .field("kind", &self.kind)
            .field("value", &*self.value.lock())
            .finish()
    }
}

/// Type-erased view of a characteristic used by the transport
pub trait AnyCharacteristic: Send + Sync {
    fn iid(&self) -> u64;

    fn json_value(&self) -> Value;

    fn describe(&self) -> CharacteristicDescription;

    /// Decode, validate and apply a remote JSON write
    fn write_json(&self, value: &Value) -> Result<bool, CharacteristicError>;
}

impl<T: CharacteristicValue> AnyCharacteristic for Characteristic<T> {
    fn iid(&self) -> u64 {
        self.iid
    }

    fn json_value(&self) -> Value {
        self.value.lock().to_json()
    }

    fn describe(&self) -> CharacteristicDescription {
        let mut perms = vec!["pr"];
        if self.kind.is_writable() {
            perms.push("pw");
            perms.push("ev");
        }

        CharacteristicDescription {
            char_type: self.kind.type_id(),
            iid: self.iid,
            perms,
            format: T::FORMAT,
            value: self.json_value(),
            min_value: self.bounds.map(|b| b.min),
            max_value: self.bounds.map(|b| b.max),
            min_step: self.bounds.map(|b| b.step),
            unit: self.unit,
        }
    }

    fn write_json(&self, value: &Value) -> Result<bool, CharacteristicError> {
        if !self.kind.is_writable() {
            return Err(CharacteristicError::ReadOnly { iid: self.iid });
        }

        // Range errors take precedence over narrowing failures, so 300 on a
        // uint8 reports out-of-range rather than an invalid type.
        if let (Some(bounds), Some(n)) = (self.bounds, value.as_i64()) {
            bounds.check(n)?;
        }

        let decoded = T::from_json(value).ok_or_else(|| CharacteristicError::InvalidValue {
            format: T::FORMAT,
            value: value.to_string(),
        })?;

        self.remote_update(decoded)
    }
}
