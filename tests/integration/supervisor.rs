// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Supervisor loop tests against the tokio clock.

use std::time::{Duration, Instant};

use anyhow::Result;
use gmp_router::config::Config;
use gmp_router::logging::Logger;
use gmp_router::protocols::router::{ClientOptions, IntfId, IntfRegistry, NotificationType};
use gmp_router::protocols::{GroupRecord, Packet, RecordType, Version};
use gmp_router::supervisor::{
    GmpDriver, GmpSupervisor, Response, SupervisorCommand, SupervisorOutput,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::tests::ONE_INTERFACE;

fn spawn_supervisor() -> (
    mpsc::Sender<SupervisorCommand>,
    mpsc::Receiver<SupervisorOutput>,
    tokio::task::JoinHandle<()>,
) {
    let config = Config::parse(ONE_INTERFACE).unwrap();
    let driver = GmpDriver::from_config(
        &config,
        IntfRegistry::new(),
        Logger::stderr_json(),
        Instant::now(),
    )
    .unwrap();
    let (command_tx, command_rx) = mpsc::channel(16);
    let (output_tx, output_rx) = mpsc::channel(64);
    let handle = tokio::spawn(GmpSupervisor::new(driver, command_rx, output_tx).run());
    (command_tx, output_rx, handle)
}

/// Receive outputs until one matches
async fn wait_for(
    rx: &mut mpsc::Receiver<SupervisorOutput>,
    pred: impl Fn(&SupervisorOutput) -> bool,
) -> Result<SupervisorOutput> {
    loop {
        let output = timeout(Duration::from_secs(5), rx.recv())
            .await?
            .ok_or_else(|| anyhow::anyhow!("output channel closed"))?;
        if pred(&output) {
            return Ok(output);
        }
    }
}

#[tokio::test]
async fn test_supervisor_sends_startup_query() -> Result<()> {
    let (command_tx, mut output_rx, handle) = spawn_supervisor();
    let output = wait_for(&mut output_rx, |o| {
        matches!(o, SupervisorOutput::Transmit { .. })
    })
    .await?;
    match output {
        SupervisorOutput::Transmit { packet } => {
            assert_eq!(packet.intf, IntfId(1));
            assert_eq!(packet.group, None);
        }
        other => panic!("unexpected output {:?}", other),
    }
    command_tx.send(SupervisorCommand::Shutdown).await?;
    timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

#[tokio::test]
async fn test_supervisor_delivers_client_notifications() -> Result<()> {
    let (command_tx, mut output_rx, handle) = spawn_supervisor();
    command_tx
        .send(SupervisorCommand::RegisterClient {
            options: ClientOptions::default(),
        })
        .await?;
    let registered = wait_for(&mut output_rx, |o| {
        matches!(o, SupervisorOutput::Response { .. })
    })
    .await?;
    let client = match registered {
        SupervisorOutput::Response {
            response: Response::Client { client },
        } => client,
        other => panic!("unexpected registration reply {:?}", other),
    };

    let group = "239.9.9.9".parse()?;
    command_tx
        .send(SupervisorCommand::ReceivePacket {
            intf: IntfId(1),
            packet: Packet::report(
                Version::Sources,
                "10.0.0.30".parse()?,
                vec![GroupRecord::new(RecordType::IsExclude, group, vec![])],
            ),
        })
        .await?;
    let notified = wait_for(&mut output_rx, |o| {
        matches!(o, SupervisorOutput::Notification { .. })
    })
    .await?;
    match notified {
        SupervisorOutput::Notification {
            client: to,
            notification,
        } => {
            assert_eq!(to, client);
            assert_eq!(notification.kind, NotificationType::GroupAddExclude);
            assert_eq!(notification.group, Some(group));
        }
        other => panic!("unexpected output {:?}", other),
    }

    command_tx.send(SupervisorCommand::Shutdown).await?;
    timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

#[tokio::test]
async fn test_supervisor_exits_when_commands_close() -> Result<()> {
    let (command_tx, _output_rx, handle) = spawn_supervisor();
    drop(command_tx);
    timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}
