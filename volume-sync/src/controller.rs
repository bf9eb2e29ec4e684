//! Bidirectional volume synchronization
//!
//! The controller owns the last desktop volume it observed or wrote. Every
//! read-modify-write of that value, including the host call that goes with
//! it, happens under one async mutex, so the poll loop and remote writes
//! are serialized and neither can undo the other.
//!
//! Desktop changes are picked up by polling and pushed to the accessory as
//! local writes. Remote writes from controllers arrive on the volume
//! characteristic's change channel and are pushed to the desktop. Each push
//! is a no-op when the target already holds the value, which is what keeps
//! one change from echoing back and forth.

use std::sync::Arc;

use accessory_host::{ChangeOrigin, SpeakerAccessory, ValueChange};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::volume::{VolumeLevel, VolumeSource};

/// Keeps the desktop volume and the speaker accessory in agreement
pub struct SyncController {
    source: Arc<dyn VolumeSource>,
    accessory: Arc<SpeakerAccessory>,
    config: SyncConfig,
    desktop_volume: Mutex<VolumeLevel>,
}

impl SyncController {
    /// Read the desktop volume once and seed the accessory from it
    ///
    /// The accessory's `on` flag is set to whether the level is above zero
    /// and its volume to the level itself. A failed read is returned as
    /// [`SyncError::VolumeRead`]; there is nothing sensible to start from.
    pub async fn initialize(
        source: Arc<dyn VolumeSource>,
        accessory: Arc<SpeakerAccessory>,
        config: SyncConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let level = source.get_volume().await.map_err(SyncError::VolumeRead)?;
        info!(%level, "Current desktop volume");

        let speaker = accessory.speaker();
        speaker.on.set_value(level.is_audible());
        speaker.volume.set_value(level.value());

        Ok(Arc::new(Self {
            source,
            accessory,
            config,
            desktop_volume: Mutex::new(level),
        }))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn accessory(&self) -> &Arc<SpeakerAccessory> {
        &self.accessory
    }

    /// Last desktop volume observed or written
    pub async fn desktop_volume(&self) -> VolumeLevel {
        *self.desktop_volume.lock().await
    }

    /// Current accessory volume
    pub fn accessory_volume(&self) -> u8 {
        self.accessory.speaker().volume.value()
    }

    /// Set the desktop volume unless it already holds `level`
    ///
    /// The cached level advances before the host write. If the write fails
    /// the error is logged and the next poll, seeing the real host level
    /// differ from the cache, pushes that level back to the accessory.
    ///
    /// Returns `true` if a write was attempted.
    pub async fn push_desktop_volume(&self, level: VolumeLevel) -> bool {
        let mut cached = self.desktop_volume.lock().await;
        self.write_desktop(&mut cached, level).await
    }

    /// Push whatever the accessory holds now to the desktop
    ///
    /// The accessory value is read under the cache lock, so a poll that
    /// overwrote a remote write in the meantime wins and the two sides
    /// cannot be left apart.
    pub async fn sync_remote_volume(&self) -> bool {
        let mut cached = self.desktop_volume.lock().await;
        let value = self.accessory_volume();
        match VolumeLevel::new(value) {
            Ok(level) => {
                debug!(%level, "Remote volume change");
                self.write_desktop(&mut cached, level).await
            }
            Err(e) => {
                warn!(error = %e, "Ignoring accessory volume");
                false
            }
        }
    }

    async fn write_desktop(&self, cached: &mut VolumeLevel, level: VolumeLevel) -> bool {
        if *cached == level {
            return false;
        }

        info!(%level, "Changing desktop volume");
        *cached = level;

        if let Err(e) = self.source.set_volume(level).await {
            error!(%level, error = %e, "Failed to set desktop volume");
        }
        true
    }

    /// Set the accessory volume unless it already holds `level`
    ///
    /// Returns `true` if the value changed. Subscribers see the change with
    /// [`ChangeOrigin::Local`].
    pub fn push_accessory_volume(&self, level: VolumeLevel) -> bool {
        let changed = self.accessory.speaker().volume.set_value(level.value());
        if changed {
            info!(%level, "Changing accessory volume");
        }
        changed
    }

    /// Handle a volume written by a remote controller
    pub async fn on_remote_volume_changed(&self, level: VolumeLevel) -> bool {
        debug!(%level, "Remote volume change");
        self.push_desktop_volume(level).await
    }

    /// Sample the desktop volume once
    ///
    /// Returns the new level when it differs from the last one observed or
    /// written, after pushing it to the accessory. A failed read leaves the
    /// cache untouched.
    pub async fn poll_once(&self) -> Result<Option<VolumeLevel>> {
        let mut cached = self.desktop_volume.lock().await;
        let current = self.source.get_volume().await.map_err(SyncError::VolumeRead)?;
        if *cached == current {
            return Ok(None);
        }

        debug!(previous = %*cached, %current, "Desktop volume changed");
        *cached = current;
        self.push_accessory_volume(current);
        Ok(Some(current))
    }

    /// Poll the desktop volume until shutdown is signalled
    ///
    /// A failed read ends the loop with an error; the caller decides whether
    /// that is fatal.
    pub async fn run_poll_loop(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(interval = ?self.config.poll_interval, "Watching desktop volume");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    debug!("Poll loop stopped");
                    return Ok(());
                }
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Desktop volume poll failed");
                return Err(e);
            }
        }
    }

    /// Apply remote volume writes until shutdown or the channel closes
    ///
    /// Local writes on the same channel are skipped. A remote notification
    /// only signals that the accessory changed; the value applied is the
    /// accessory's current one, read by [`sync_remote_volume`]. Missed
    /// notifications after a lag are covered the same way.
    ///
    /// [`sync_remote_volume`]: SyncController::sync_remote_volume
    pub async fn run_remote_listener(
        &self,
        mut changes: broadcast::Receiver<ValueChange<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let received = tokio::select! {
                received = changes.recv() => received,
                _ = wait_for_shutdown(&mut shutdown) => {
                    debug!("Remote listener stopped");
                    return;
                }
            };

            match received {
                Ok(ValueChange {
                    origin: ChangeOrigin::Remote,
                    ..
                }) => {
                    self.sync_remote_volume().await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Remote listener lagged, resyncing from accessory");
                    self.sync_remote_volume().await;
                }
                Err(RecvError::Closed) => {
                    debug!("Volume change channel closed");
                    return;
                }
            }
        }
    }

    /// Start the poll loop and the remote listener on the current runtime
    ///
    /// The listener subscribes before this returns, so no remote write made
    /// after `spawn` is missed.
    pub fn spawn(self: &Arc<Self>) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let changes = self.accessory.speaker().volume.subscribe();

        let poller = Arc::clone(self);
        let poll_shutdown = shutdown_rx.clone();
        let poll = tokio::spawn(async move { poller.run_poll_loop(poll_shutdown).await });

        let listener = Arc::clone(self);
        let remote =
            tokio::spawn(async move { listener.run_remote_listener(changes, shutdown_rx).await });

        SyncHandle {
            shutdown_tx,
            poll: Some(poll),
            listener: Some(remote),
        }
    }
}

/// Handle to the tasks started by [`SyncController::spawn`]
///
/// Dropping the handle signals both tasks to stop.
pub struct SyncHandle {
    shutdown_tx: watch::Sender<bool>,
    poll: Option<JoinHandle<Result<()>>>,
    listener: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Wait for the poll loop to end
    ///
    /// This only resolves after shutdown or when a desktop volume read
    /// fails, in which case the read error is returned.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(poll) = self.poll.as_mut() else {
            return Ok(());
        };
        let result = poll.await;
        self.poll = None;
        flatten(result)
    }

    /// Stop both tasks and wait for them to finish
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        if let Some(listener) = self.listener.take() {
            listener
                .await
                .map_err(|e| SyncError::TaskFailed(e.to_string()))?;
        }

        match self.poll.take() {
            Some(poll) => flatten(poll.await),
            None => Ok(()),
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn flatten(result: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    result.map_err(|e| SyncError::TaskFailed(e.to_string()))?
}

/// Resolves once `true` is sent or the sender is gone
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_for_shutdown_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter did not observe shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_on_sender_drop() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .expect("waiter did not observe dropped sender");
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_already_signalled() {
        let (tx, mut rx) = watch::channel(true);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .expect("waiter should return immediately");
        drop(tx);
    }

    #[test]
    fn test_flatten_join_results() {
        assert!(flatten(Ok(Ok(()))).is_ok());
        assert!(matches!(
            flatten(Ok(Err(SyncError::Configuration("x".into())))),
            Err(SyncError::Configuration(_))
        ));
    }
}
