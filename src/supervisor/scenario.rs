// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deterministic replay of timed commands in virtual time.
//!
//! A scenario is a configuration plus a list of commands stamped with a
//! millisecond offset. Timers fire exactly at their deadlines in between
//! commands, so the same scenario always yields the same outputs.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{CommandAction, DriverError, GmpDriver, SupervisorCommand, SupervisorOutput};
use crate::config::{Config, ConfigError};
use crate::logging::Logger;
use crate::protocols::router::IntfRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioStep {
    /// Offset from the start of the run
    pub at_ms: u64,
    pub command: SupervisorCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub config: Config,
    pub steps: Vec<ScenarioStep>,
    /// Keep running timers until this offset; defaults to the last step
    pub run_until_ms: Option<u64>,
}

/// One output with the virtual time it was produced at
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimedOutput {
    pub at_ms: u64,
    #[serde(flatten)]
    pub output: SupervisorOutput,
}

impl Scenario {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Replay the scenario and collect every output
    pub fn run(&self, logger: Logger) -> Result<Vec<TimedOutput>, DriverError> {
        let start = Instant::now();
        let mut driver = GmpDriver::from_config(&self.config, IntfRegistry::new(), logger, start)?;
        let mut out = Vec::new();
        let mut steps: Vec<&ScenarioStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.at_ms);

        for step in steps {
            advance(&mut driver, start, step.at_ms, &mut out);
            let now = start + Duration::from_millis(step.at_ms);
            let (outputs, action) = driver.handle(step.command.clone(), now);
            out.extend(stamp(step.at_ms, outputs));
            if action == CommandAction::Shutdown {
                driver.shutdown(now);
                return Ok(out);
            }
        }
        let last = self.steps.iter().map(|s| s.at_ms).max().unwrap_or(0);
        let until = self.run_until_ms.unwrap_or(last).max(last);
        advance(&mut driver, start, until, &mut out);
        driver.shutdown(start + Duration::from_millis(until));
        Ok(out)
    }
}

fn stamp(at_ms: u64, outputs: Vec<SupervisorOutput>) -> impl Iterator<Item = TimedOutput> {
    outputs
        .into_iter()
        .map(move |output| TimedOutput { at_ms, output })
}

/// Fire every timer due up to `until_ms`, each at its own deadline
fn advance(driver: &mut GmpDriver, start: Instant, until_ms: u64, out: &mut Vec<TimedOutput>) {
    let until = start + Duration::from_millis(until_ms);
    while let Some(deadline) = driver.next_deadline() {
        if deadline > until {
            break;
        }
        let at_ms = deadline.saturating_duration_since(start).as_millis() as u64;
        let outputs = driver.tick(deadline);
        out.extend(stamp(at_ms, outputs));
    }
}
