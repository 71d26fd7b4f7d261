// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Integration Test for the application main function.

use std::process::Stdio;

use anyhow::Result;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;

use super::tests::{write_temp, ONE_INTERFACE};

fn gmprd() -> TokioCommand {
    TokioCommand::new(env!("CARGO_BIN_EXE_gmprd"))
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

/// **Passing Test:** A valid configuration is accepted.
#[tokio::test]
async fn test_check_config_accepts_valid_file() -> Result<()> {
    let (_dir, path) = write_temp("gmp.json5", ONE_INTERFACE);
    let output = gmprd().arg("check-config").arg(&path).output().await?;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Configuration OK: 1 interface(s)"));
    Ok(())
}

/// **Passing Test:** Invalid values make the command fail.
#[tokio::test]
async fn test_check_config_rejects_invalid_file() -> Result<()> {
    let (_dir, path) = write_temp(
        "gmp.json5",
        r#"{ interfaces: [{ id: 1, robustness: 0 }] }"#,
    );
    let output = gmprd().arg("check-config").arg(&path).output().await?;
    assert!(!output.status.success());
    Ok(())
}

/// **Passing Test:** The printed default configuration validates.
#[tokio::test]
async fn test_default_config_round_trips() -> Result<()> {
    let output = gmprd().arg("default-config").output().await?;
    assert!(output.status.success());
    let (_dir, path) = write_temp("default.json5", &String::from_utf8(output.stdout)?);
    let output = gmprd().arg("check-config").arg(&path).output().await?;
    assert!(output.status.success());
    Ok(())
}

/// **Passing Test:** A scenario replays to timestamped JSON lines.
#[tokio::test]
async fn test_simulate_prints_timed_outputs() -> Result<()> {
    let (_dir, path) = write_temp(
        "scenario.json5",
        r#"{
            config: { interfaces: [{ id: 1, address: "10.0.0.1" }] },
            steps: [
                { at_ms: 0, command: { command: "register_client" } },
                { at_ms: 200, command: { command: "receive_packet", intf: 1, packet: {
                    version: 3, src: "10.0.0.9",
                    body: { kind: "report", records: [{ type: "is_ex", group: "239.1.1.1", sources: [] }] },
                } } },
            ],
            run_until_ms: 3000,
        }"#,
    );
    let output = gmprd().arg("simulate").arg(&path).output().await?;
    assert!(output.status.success());
    let lines = json_lines(&output.stdout);

    let transmits: Vec<u64> = lines
        .iter()
        .filter(|v| v["output"] == "transmit")
        .map(|v| v["at_ms"].as_u64().unwrap())
        .collect();
    assert_eq!(transmits, vec![100, 2100]);

    let joined = lines
        .iter()
        .find(|v| v["output"] == "notification")
        .unwrap();
    assert_eq!(joined["at_ms"], 200);
    assert_eq!(joined["notification"]["kind"], "group_add_exclude");
    assert_eq!(joined["notification"]["group"], "239.1.1.1");
    Ok(())
}

/// **Passing Test:** `run` answers commands from stdin and exits on shutdown.
#[tokio::test]
async fn test_run_answers_stdin_commands() -> Result<()> {
    let (_dir, path) = write_temp("gmp.json5", ONE_INTERFACE);
    let mut child = gmprd()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let mut stdin = child.stdin.take().unwrap();
    stdin
        .write_all(b"{\"command\":\"register_client\"}\nnot json\n{\"command\":\"shutdown\"}\n")
        .await?;
    drop(stdin);

    let output = tokio::time::timeout(std::time::Duration::from_secs(10), child.wait_with_output())
        .await??;
    assert!(output.status.success());
    let lines = json_lines(&output.stdout);
    assert!(lines
        .iter()
        .any(|v| v["response"]["response"] == "client" && v["response"]["client"] == 0));
    assert!(lines
        .iter()
        .any(|v| v["response"]["response"] == "error"));
    Ok(())
}
