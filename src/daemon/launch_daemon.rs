// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the mbslave-api project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management
//!
//! Opens the tag database, registers the configured tags, then launches each
//! enabled service as an independent tokio task. Every task watches a shared
//! `running` flag and winds down once [`Daemon::shutdown`] clears it.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use rocket::config::LogLevel;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;

use crate::api::{build_rocket, ApiState};
use crate::config::Config;
use crate::modbus::run_server;
use crate::registers::RegisterResolver;
use crate::store::{SqliteTagStore, TagStore};

/// Represents a daemon task manager that coordinates multiple background services
///
/// # Fields
///
/// * `tasks` - Collection of handles to running tasks for management and cleanup
/// * `running` - Atomic flag shared between tasks to coordinate shutdown
/// * `store` - Tag store shared by the Modbus server and the HTTP API
/// * `modbus_addr` - Address the Modbus listener is actually bound to
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    store: Option<Arc<dyn TagStore>>,
    modbus_addr: Option<SocketAddr>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            store: None,
            modbus_addr: None,
        }
    }

    /// Launch all configured tasks based on configuration
    ///
    /// The following services may be started:
    /// * Modbus TCP server - If `config.modbus.enabled` is `true`
    /// * HTTP API - If `config.api.enabled` is `true`
    /// * Heartbeat monitoring - Always started
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened, when the tags cannot be registered
    /// or when the Modbus listener cannot bind.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let store = SqliteTagStore::open(&config.database.path)
            .with_context(|| format!("Failed to open database {}", config.database.path))?;
        self.launch_with_store(config, Arc::new(store)).await
    }

    /// Same as [`Daemon::launch`] with an already opened store
    pub async fn launch_with_store(
        &mut self,
        config: &Config,
        store: Arc<dyn TagStore>,
    ) -> Result<()> {
        store
            .upsert_tags(&config.registers)
            .context("Failed to register configured tags")?;
        self.store = Some(store.clone());

        if config.modbus.enabled {
            self.start_modbus_server(config, store.clone()).await?;
        }

        if config.api.enabled {
            self.start_api_server(config, store)?;
        }

        self.start_heartbeat()?;

        Ok(())
    }

    /// Start the Modbus TCP server
    ///
    /// The listener is bound before the task is spawned so that an unavailable
    /// port fails the launch instead of a background task.
    async fn start_modbus_server(&mut self, config: &Config, store: Arc<dyn TagStore>) -> Result<()> {
        info!(
            "Starting modbus server on {}:{}",
            config.modbus.address, config.modbus.port
        );
        let listener = TcpListener::bind((config.modbus.address.as_str(), config.modbus.port))
            .await
            .with_context(|| {
                format!(
                    "Failed to bind Modbus server to {}:{}",
                    config.modbus.address, config.modbus.port
                )
            })?;
        self.modbus_addr = Some(listener.local_addr()?);

        let resolver = RegisterResolver::new(store, config.allow_null_registers);
        let max_clients = config.modbus.max_clients;
        let running = self.running.clone();

        let task = tokio::spawn(async move {
            let server_handle = tokio::spawn(async move {
                if let Err(e) = run_server(listener, resolver, max_clients).await {
                    error!("Modbus server error: {}", e);
                }
            });

            while running.load(Ordering::SeqCst) {
                // Check every second if we should continue running
                time::sleep(Duration::from_secs(1)).await;
            }

            info!("Shutting down Modbus server...");
            server_handle.abort();

            match time::timeout(Duration::from_secs(5), server_handle).await {
                Ok(_) => info!("Modbus server shut down successfully"),
                Err(_) => warn!("Modbus server shutdown timed out, forcing termination"),
            }

            Ok(())
        });

        self.tasks.push(task);
        info!("Modbus server started");
        Ok(())
    }

    /// Start the Rocket HTTP API
    fn start_api_server(&mut self, config: &Config, store: Arc<dyn TagStore>) -> Result<()> {
        info!(
            "Starting API server on {}:{}",
            config.api.address, config.api.port
        );

        let figment = rocket::Config::figment()
            .merge(("ident", config.api.name.clone()))
            .merge(("address", config.api.address.clone()))
            .merge(("port", config.api.port))
            .merge(("log_level", LogLevel::Normal));

        let rocket = build_rocket(
            figment,
            ApiState {
                store,
                registers: config.registers.clone(),
            },
        );

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let ignited = rocket.ignite().await?;
            let shutdown = ignited.shutdown();

            tokio::spawn(async move {
                while running.load(Ordering::SeqCst) {
                    time::sleep(Duration::from_secs(1)).await;
                }
                info!("Shutting down API server...");
                shutdown.notify();
            });

            ignited.launch().await?;
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    fn start_heartbeat(&mut self) -> Result<()> {
        info!("Starting heartbeat monitor");

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                debug!("Daemon heartbeat: running");
                time::sleep(Duration::from_secs(1)).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Tag store opened by [`Daemon::launch`]
    pub fn store(&self) -> Option<Arc<dyn TagStore>> {
        self.store.clone()
    }

    /// Local address of the Modbus listener, once started
    pub fn modbus_local_addr(&self) -> Option<SocketAddr> {
        self.modbus_addr
    }

    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for every task, giving each one 5 seconds
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(Err(e))) => error!("Task failed: {}", e),
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Ok(Ok(Ok(()))) => {}
                Err(_) => warn!("Task did not complete within timeout period, may be hung"),
            }
        }
        Ok(())
    }
}
