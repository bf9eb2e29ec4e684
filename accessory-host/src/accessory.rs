//! The speaker accessory exposed to the smart-home network.
//!
//! The accessory presents the desktop speaker as a lightbulb-typed service:
//! the power switch maps to the `On` characteristic and the volume level
//! maps to `Brightness` (0..=100).

use serde::Serialize;
use tokio::sync::broadcast;

use crate::characteristic::{
    AnyCharacteristic, Bounds, Characteristic, CharacteristicDescription, CharacteristicEvent,
    CharacteristicType, EventNotifier,
};

/// Accessory id of the speaker; the host exposes a single accessory
pub const SPEAKER_AID: u64 = 1;

/// Instance id of the power characteristic
pub const ON_IID: u64 = 9;

/// Instance id of the volume (brightness) characteristic
pub const VOLUME_IID: u64 = 10;

const EVENT_BUS_CAPACITY: usize = 64;

/// Descriptive accessory metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_revision: String,
}

impl AccessoryInfo {
    /// Metadata with the given display name and crate defaults for the rest
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manufacturer: "speaker-bridge".to_string(),
            model: "Desktop Speaker".to_string(),
            serial_number: uuid::Uuid::new_v4().simple().to_string()[..12].to_uppercase(),
            firmware_revision: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The accessory information service (read-only metadata)
#[derive(Debug)]
pub struct InformationService {
    pub name: Characteristic<String>,
    pub manufacturer: Characteristic<String>,
    pub model: Characteristic<String>,
    pub serial_number: Characteristic<String>,
    pub firmware_revision: Characteristic<String>,
}

impl InformationService {
    const IID: u64 = 1;
    const TYPE: &'static str = "3E";

    fn new(info: &AccessoryInfo, notifier: &EventNotifier) -> Self {
        let string = |iid, kind, value: &String| {
            Characteristic::new(iid, kind, value.clone(), notifier.clone())
        };

        Self {
            name: string(2, CharacteristicType::Name, &info.name),
            manufacturer: string(3, CharacteristicType::Manufacturer, &info.manufacturer),
            model: string(4, CharacteristicType::Model, &info.model),
            serial_number: string(5, CharacteristicType::SerialNumber, &info.serial_number),
            firmware_revision: string(
                6,
                CharacteristicType::FirmwareRevision,
                &info.firmware_revision,
            ),
        }
    }

    fn characteristics(&self) -> [&dyn AnyCharacteristic; 5] {
        [
            &self.name,
            &self.manufacturer,
            &self.model,
            &self.serial_number,
            &self.firmware_revision,
        ]
    }
}

/// Lightbulb-typed service carrying the speaker's power and volume
#[derive(Debug)]
pub struct SpeakerService {
    /// Power flag
    pub on: Characteristic<bool>,
    /// Volume level as brightness, 0..=100
    pub volume: Characteristic<u8>,
}

impl SpeakerService {
    const IID: u64 = 8;
    const TYPE: &'static str = "43";

    fn new(notifier: &EventNotifier) -> Self {
        Self {
            on: Characteristic::new(ON_IID, CharacteristicType::On, false, notifier.clone()),
            volume: Characteristic::new(VOLUME_IID, CharacteristicType::Brightness, 0, notifier.clone())
                .with_bounds(Bounds::PERCENTAGE)
                .with_unit("percentage"),
        }
    }

    fn characteristics(&self) -> [&dyn AnyCharacteristic; 2] {
        [&self.on, &self.volume]
    }
}

/// Entry for one service in the accessory database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDescription {
    #[serde(rename = "type")]
    pub service_type: &'static str,
    pub iid: u64,
    pub characteristics: Vec<CharacteristicDescription>,
}

/// Entry for the accessory in the accessory database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessoryDescription {
    pub aid: u64,
    pub services: Vec<ServiceDescription>,
}

/// The virtual speaker accessory
///
/// Each instance gets a fresh device id, so the accessory announces itself
/// with a new identity every run.
pub struct SpeakerAccessory {
    device_id: String,
    info: InformationService,
    speaker: SpeakerService,
    events: broadcast::Sender<CharacteristicEvent>,
}

impl SpeakerAccessory {
    pub fn new(info: AccessoryInfo) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let notifier = EventNotifier::new(SPEAKER_AID, events.clone());

        Self {
            device_id: random_device_id(),
            info: InformationService::new(&info, &notifier),
            speaker: SpeakerService::new(&notifier),
            events,
        }
    }

    pub fn aid(&self) -> u64 {
        SPEAKER_AID
    }

    /// Device id in `XX:XX:XX:XX:XX:XX` form
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn name(&self) -> String {
        self.info.name.value()
    }

    pub fn information(&self) -> &InformationService {
        &self.info
    }

    pub fn speaker(&self) -> &SpeakerService {
        &self.speaker
    }

    /// Subscribe to every characteristic change on this accessory
    pub fn subscribe_events(&self) -> broadcast::Receiver<CharacteristicEvent> {
        self.events.subscribe()
    }

    /// Look up a characteristic by address
    pub fn characteristic(&self, aid: u64, iid: u64) -> Option<&dyn AnyCharacteristic> {
        if aid != SPEAKER_AID {
            return None;
        }
        self.info
            .characteristics()
            .into_iter()
            .chain(self.speaker.characteristics())
            .find(|c| c.iid() == iid)
    }

    /// Accessory database entry
    pub fn describe(&self) -> AccessoryDescription {
        AccessoryDescription {
            aid: SPEAKER_AID,
            services: vec![
                ServiceDescription {
                    service_type: InformationService::TYPE,
                    iid: InformationService::IID,
                    characteristics: describe_all(&self.info.characteristics()),
                },
                ServiceDescription {
                    service_type: SpeakerService::TYPE,
                    iid: SpeakerService::IID,
                    characteristics: describe_all(&self.speaker.characteristics()),
                },
            ],
        }
    }
}

impl std::fmt::Debug for SpeakerAccessory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeakerAccessory")
            .field("device_id", &self.device_id)
            .field("name", &self.name())
            .field("speaker", &self.speaker)
            .finish()
    }
}

fn describe_all(characteristics: &[&dyn AnyCharacteristic]) -> Vec<CharacteristicDescription> {
    characteristics.iter().map(|c| c.describe()).collect()
}

fn random_device_id() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    bytes[..6]
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}
