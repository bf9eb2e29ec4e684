//! Accessory model and HTTP accessory host for speaker-bridge.
//!
//! This crate exposes a single virtual speaker to the smart-home network. It
//! knows nothing about desktop audio; the sync core drives it through the
//! speaker service's characteristics.
//!
//! # Overview
//!
//! - [`Characteristic`]: one observable value with change detection. Local
//!   writes ([`Characteristic::set_value`]) and remote writes
//!   ([`Characteristic::remote_update`]) are broadcast to subscribers tagged
//!   with their [`ChangeOrigin`].
//! - [`SpeakerAccessory`]: accessory information plus a lightbulb-typed
//!   [`SpeakerService`] whose `on` and `volume` (brightness) characteristics
//!   carry the speaker's power and volume.
//! - [`AccessoryServer`]: HTTP host serving the accessory to controllers that
//!   paired with the setup code.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use accessory_host::{AccessoryInfo, AccessoryServer, ChangeOrigin, ServerConfig, SpeakerAccessory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), accessory_host::ServerError> {
//!     let accessory = Arc::new(SpeakerAccessory::new(AccessoryInfo::new("Desk speaker")));
//!     accessory.speaker().on.set_value(true);
//!     accessory.speaker().volume.set_value(40);
//!
//!     let mut changes = accessory.speaker().volume.subscribe();
//!     let server = AccessoryServer::start(ServerConfig::default(), Arc::clone(&accessory)).await?;
//!
//!     while let Ok(change) = changes.recv().await {
//!         if change.origin == ChangeOrigin::Remote {
//!             println!("Controller set volume to {}", change.value);
//!         }
//!     }
//!
//!     server.shutdown().await
//! }
//! ```

pub mod accessory;
pub mod characteristic;
pub mod config;
pub mod error;
pub mod pairing;
pub mod server;

pub use accessory::{
    AccessoryDescription, AccessoryInfo, InformationService, ServiceDescription,
    SpeakerAccessory, SpeakerService, ON_IID, SPEAKER_AID, VOLUME_IID,
};
pub use characteristic::{
    AnyCharacteristic, Bounds, ChangeOrigin, Characteristic, CharacteristicEvent,
    CharacteristicType, CharacteristicValue, ValueChange,
};
pub use config::ServerConfig;
pub use error::{CharacteristicError, PairingError, PinError, ServerError};
pub use pairing::{PairingPin, Pairings, MAX_FAILED_ATTEMPTS, MAX_PAIRINGS};
pub use server::{AccessoryServer, CharacteristicEntry, CharacteristicsBody, CONTROLLER_HEADER};
