//! Application state management
//! This module wires the configured backend, pipeline and manager together.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::bluetooth::{BluestBackend, GattBackend, NotificationHandler};
use crate::core::stream::CsvRecordSink;
use crate::core::BluetoothManager;

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    /// The Bluetooth manager instance
    pub bluetooth_manager: BluetoothManager,
    driver: JoinHandle<()>,
}

impl AppState {
    /// Opens the default adapter and starts the manager.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing Bluetooth backend...");
        let backend = BluestBackend::new().await?;
        Self::with_backend(config, Arc::new(backend)).await
    }

    /// Starts the manager on any backend.
    pub async fn with_backend(config: AppConfig, backend: Arc<dyn GattBackend>) -> Result<Self> {
        let mut notification_handler =
            NotificationHandler::new(config.connection.router(), config.stream.batch_threshold);
        if let Some(dir) = &config.stream.raw_log_dir {
            let sink = CsvRecordSink::create(dir).await?;
            notification_handler = notification_handler.with_sink(sink);
        }

        info!("Initializing BluetoothManager...");
        let (bluetooth_manager, driver) =
            BluetoothManager::spawn(backend, config.connection.clone(), notification_handler);
        Ok(Self {
            config,
            bluetooth_manager,
            driver,
        })
    }

    /// Gets a handle to the Bluetooth manager
    pub fn bluetooth_manager(&self) -> BluetoothManager {
        self.bluetooth_manager.clone()
    }

    /// Releases the session and waits for the driver to finish.
    pub async fn shutdown(self) -> Result<()> {
        // Already closed means already stopped.
        let _ = self.bluetooth_manager.shutdown();
        self.driver.await?;
        Ok(())
    }
}
