// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Async driver for one engine instance.
//!
//! [`GmpDriver`] wraps an [`Instance`] and turns its side effects into
//! [`SupervisorOutput`]s: queries to transmit, client notifications and other
//! events. It is synchronous and takes the current time explicitly, so it can
//! be replayed in virtual time.
//!
//! [`GmpSupervisor`] runs a driver on tokio: it sleeps until the engine's next
//! deadline or until a command arrives, whichever comes first, and forwards
//! every output on a channel.

pub mod command_handler;
pub mod scenario;

use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Duration};

use crate::config::{Config, ConfigError};
use crate::logging::{Facility, Logger};
use crate::protocols::router::{
    ClientId, ClientNotification, GmpError, HostNotification, Instance, IntfId, IntfRegistry,
    QueryPacket, RouterEvent,
};
use crate::{log_debug, log_info, log_warning};

pub use command_handler::{handle_supervisor_command, CommandAction, Response, SupervisorCommand};
pub use scenario::{Scenario, ScenarioStep, TimedOutput};

/// Everything the driver hands to the outside world
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "output", rename_all = "snake_case")]
pub enum SupervisorOutput {
    Response { response: Response },
    Transmit { packet: QueryPacket },
    Notification {
        client: ClientId,
        notification: ClientNotification,
    },
    HostNotification {
        client: ClientId,
        notification: HostNotification,
    },
    Event { event: RouterEvent },
}

/// Errors building a driver from configuration
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("engine refused configuration: {0}")]
    Engine(#[from] GmpError),
}

/// Synchronous engine wrapper
#[derive(Debug)]
pub struct GmpDriver {
    instance: Instance,
    logger: Logger,
}

impl GmpDriver {
    pub fn new(instance: Instance) -> Self {
        let logger = instance.logger().clone();
        Self { instance, logger }
    }

    /// Create the instance and attach every configured interface
    pub fn from_config(
        config: &Config,
        registry: IntfRegistry,
        logger: Logger,
        now: Instant,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        logger.set_global_level(config.logging.level);
        let mut instance = Instance::new(
            config.instance.proto,
            config.instance.params(),
            registry,
            config.hooks.build(),
            logger,
            now,
        );
        instance.set_trace_facilities(&config.logging.trace);
        if config.instance.host_tracking {
            instance.enable_host_tracking();
        }
        for intf in &config.interfaces {
            instance.attach_intf(intf.id, now)?;
            instance.set_intf_params(intf.id, &intf.params, now)?;
            if intf.address.is_some() {
                instance.update_intf_state(intf.id, intf.address, now)?;
            }
        }
        Ok(Self::new(instance))
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.instance.next_deadline()
    }

    /// Apply one command and collect what it caused
    pub fn handle(
        &mut self,
        command: SupervisorCommand,
        now: Instant,
    ) -> (Vec<SupervisorOutput>, CommandAction) {
        let (response, action) = handle_supervisor_command(command, &mut self.instance, now);
        let mut outputs = vec![SupervisorOutput::Response { response }];
        outputs.extend(self.drain(now));
        (outputs, action)
    }

    /// Fire due timers and collect what they caused
    pub fn tick(&mut self, now: Instant) -> Vec<SupervisorOutput> {
        self.instance.run_timers(now);
        self.drain(now)
    }

    /// Turn pending engine events into outputs until none are left
    fn drain(&mut self, now: Instant) -> Vec<SupervisorOutput> {
        let mut outputs = Vec::new();
        loop {
            let events = self.instance.take_events();
            if events.is_empty() {
                return outputs;
            }
            for event in events {
                match event {
                    RouterEvent::StartXmit { intf } => self.drain_xmit(intf, now, &mut outputs),
                    RouterEvent::NotificationsReady { client } => {
                        self.drain_notifications(client, &mut outputs)
                    }
                    RouterEvent::HostNotificationsReady { client } => {
                        self.drain_host_notifications(client, &mut outputs)
                    }
                    event => outputs.push(SupervisorOutput::Event { event }),
                }
            }
        }
    }

    fn drain_xmit(&mut self, intf: IntfId, now: Instant, outputs: &mut Vec<SupervisorOutput>) {
        loop {
            match self.instance.xmit(intf, now) {
                Ok(Some(packet)) => outputs.push(SupervisorOutput::Transmit { packet }),
                Ok(None) => return,
                Err(e) => {
                    log_debug!(self.logger, Facility::Supervisor, "Transmit on {}: {}", intf, e);
                    return;
                }
            }
        }
    }

    fn drain_notifications(&mut self, client: ClientId, outputs: &mut Vec<SupervisorOutput>) {
        let mut prev = None;
        loop {
            match self.instance.get_notification(client, prev.take()) {
                Ok(Some(notification)) => {
                    outputs.push(SupervisorOutput::Notification {
                        client,
                        notification: notification.clone(),
                    });
                    prev = Some(notification);
                }
                Ok(None) => break,
                Err(e) => {
                    log_debug!(self.logger, Facility::Supervisor, "Client {}: {}", client, e);
                    return;
                }
            }
        }
        if let Some(last) = prev {
            let _ = self.instance.return_notification(client, last);
        }
    }

    fn drain_host_notifications(&mut self, client: ClientId, outputs: &mut Vec<SupervisorOutput>) {
        loop {
            match self.instance.get_host_notification(client) {
                Ok(Some(notification)) => outputs.push(SupervisorOutput::HostNotification {
                    client,
                    notification,
                }),
                Ok(None) => return,
                Err(e) => {
                    log_debug!(self.logger, Facility::Supervisor, "Client {}: {}", client, e);
                    return;
                }
            }
        }
    }

    /// Tear the instance down
    pub fn shutdown(self, now: Instant) {
        self.instance.destroy(now);
    }
}

/// Runs a driver on tokio
pub struct GmpSupervisor {
    driver: GmpDriver,
    /// Channel to receive commands
    command_rx: mpsc::Receiver<SupervisorCommand>,
    /// Channel to send outputs
    output_tx: mpsc::Sender<SupervisorOutput>,
    logger: Logger,
}

impl GmpSupervisor {
    pub fn new(
        driver: GmpDriver,
        command_rx: mpsc::Receiver<SupervisorCommand>,
        output_tx: mpsc::Sender<SupervisorOutput>,
    ) -> Self {
        let logger = driver.logger.clone();
        Self {
            driver,
            command_rx,
            output_tx,
            logger,
        }
    }

    async fn emit(&self, outputs: Vec<SupervisorOutput>) -> bool {
        for output in outputs {
            if self.output_tx.send(output).await.is_err() {
                log_warning!(
                    self.logger,
                    Facility::Supervisor,
                    "Output channel closed, supervisor exiting"
                );
                return false;
            }
        }
        true
    }

    /// Run until shutdown or until the command channel closes
    pub async fn run(mut self) {
        log_info!(self.logger, Facility::Supervisor, "GMP supervisor started");
        let now = Instant::now();
        let outputs = self.driver.tick(now);
        if !self.emit(outputs).await {
            self.driver.shutdown(Instant::now());
            return;
        }

        loop {
            let deadline = self.driver.next_deadline();
            let wait = async {
                match deadline {
                    Some(at) => sleep_until(tokio::time::Instant::from_std(at)).await,
                    // No timers, sleep for a long time (or until a command)
                    None => sleep(Duration::from_secs(3600)).await,
                }
            };

            tokio::select! {
                _ = wait => {
                    let outputs = self.driver.tick(Instant::now());
                    if !self.emit(outputs).await {
                        break;
                    }
                }

                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        log_info!(
                            self.logger,
                            Facility::Supervisor,
                            "Command channel closed, supervisor exiting"
                        );
                        break;
                    };
                    let now = Instant::now();
                    let (mut outputs, action) = self.driver.handle(command, now);
                    outputs.extend(self.driver.tick(now));
                    if !self.emit(outputs).await || action == CommandAction::Shutdown {
                        break;
                    }
                }
            }
        }
        self.driver.shutdown(Instant::now());
        log_info!(self.logger, Facility::Supervisor, "GMP supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MemorySink, Severity};
    use crate::protocols::router::{ClientOptions, NotificationType};
    use crate::protocols::{GroupRecord, Packet, RecordType, Version};
    use std::sync::Arc;

    fn driver(now: Instant) -> GmpDriver {
        let config = Config::parse(
            r#"{ interfaces: [{ id: 1, address: "10.0.0.1" }] }"#,
        )
        .unwrap();
        let logger = Logger::memory(Arc::new(MemorySink::new(256)), Severity::Info);
        GmpDriver::from_config(&config, IntfRegistry::new(), logger, now).unwrap()
    }

    #[test]
    fn test_driver_transmits_startup_queries() {
        let now = Instant::now();
        let mut driver = driver(now);
        let deadline = driver.next_deadline().unwrap();
        assert_eq!(deadline, now + Duration::from_millis(100));
        let outputs = driver.tick(deadline);
        assert!(outputs.iter().any(|o| matches!(
            o,
            SupervisorOutput::Transmit { packet } if packet.group.is_none()
        )));
    }

    #[test]
    fn test_driver_delivers_notifications() {
        let now = Instant::now();
        let mut driver = driver(now);
        let (outputs, _) = driver.handle(
            SupervisorCommand::RegisterClient {
                options: ClientOptions::default(),
            },
            now,
        );
        assert_eq!(
            outputs[0],
            SupervisorOutput::Response {
                response: Response::Client { client: ClientId(0) }
            }
        );
        driver.tick(now);

        let g = "239.1.1.1".parse().unwrap();
        let packet = Packet::report(
            Version::Sources,
            "10.0.0.9".parse().unwrap(),
            vec![GroupRecord::new(RecordType::IsExclude, g, vec![])],
        );
        let (outputs, _) = driver.handle(
            SupervisorCommand::ReceivePacket {
                intf: IntfId(1),
                packet,
            },
            now,
        );
        let notified: Vec<_> = outputs
            .iter()
            .filter_map(|o| match o {
                SupervisorOutput::Notification { notification, .. } => Some(notification),
                _ => None,
            })
            .collect();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].kind, NotificationType::GroupAddExclude);
        assert_eq!(notified[0].group, Some(g));
    }

    #[test]
    fn test_driver_rejects_invalid_config() {
        let config = Config::parse(r#"{ interfaces: [{ id: 1, robustness: 0 }] }"#).unwrap();
        let result = GmpDriver::from_config(
            &config,
            IntfRegistry::new(),
            Logger::stderr_json(),
            Instant::now(),
        );
        assert!(matches!(result, Err(DriverError::Config(_))));
    }
}
