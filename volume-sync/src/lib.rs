//! Desktop volume ↔ speaker accessory synchronization.
//!
//! [`SyncController`] keeps the host's output volume and the accessory's
//! volume characteristic equal. Changes made on the desktop are found by
//! polling a [`VolumeSource`] and pushed to the accessory; volumes written
//! by paired controllers are pushed to the desktop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use accessory_host::{AccessoryInfo, SpeakerAccessory};
//! use volume_sync::{SyncConfig, SyncController, SystemVolume};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), volume_sync::SyncError> {
//!     let accessory = Arc::new(SpeakerAccessory::new(AccessoryInfo::new("Desk speaker")));
//!     let controller = SyncController::initialize(
//!         Arc::new(SystemVolume::default()),
//!         accessory,
//!         SyncConfig::default(),
//!     )
//!     .await?;
//!
//!     let mut handle = controller.spawn();
//!     handle.wait().await
//! }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod volume;

pub use config::SyncConfig;
pub use controller::{SyncController, SyncHandle};
pub use error::{Result, SyncError, VolumeError};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use volume::{SystemVolume, VolumeBackend, VolumeLevel, VolumeSource};
