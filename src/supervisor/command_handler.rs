// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Supervisor command handling logic.
//!
//! This module contains the pure (no I/O) command handler function and the
//! command/response types. The handler maps a command onto the engine API and
//! returns a response along with any action the driving loop must take.

use std::net::IpAddr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::logging::{Facility, Severity};
use crate::protocols::router::{
    ClientId, ClientOptions, GmpError, HostGroupInfo, Instance, IntfGroupInfo, IntfHostInfo,
    IntfId, IntfListMode, IntfParams, IntfStats, LimitState,
};
use crate::protocols::Packet;

/// Commands accepted by the supervisor, one JSON object each
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SupervisorCommand {
    AttachInterface {
        intf: IntfId,
        #[serde(default)]
        params: Option<IntfParams>,
    },
    DetachInterface {
        intf: IntfId,
    },
    SetInterfaceParams {
        intf: IntfId,
        params: IntfParams,
    },
    /// Bring an interface up with an address, or down without one
    UpdateIntfState {
        intf: IntfId,
        #[serde(default)]
        address: Option<IpAddr>,
    },
    ReceivePacket {
        intf: IntfId,
        packet: Packet,
    },
    RegisterClient {
        #[serde(default)]
        options: ClientOptions,
    },
    DetachClient {
        client: ClientId,
    },
    Refresh {
        client: ClientId,
        #[serde(default)]
        flush: bool,
    },
    RefreshIntf {
        client: ClientId,
        intf: IntfId,
        #[serde(default)]
        flush: bool,
    },
    RefreshHostState {
        client: ClientId,
    },
    GetIntfList {
        group: IpAddr,
        #[serde(default)]
        source: Option<IpAddr>,
        #[serde(default)]
        mode: IntfListMode,
    },
    GetIntfGroups {
        intf: IntfId,
    },
    GetHostGroups {
        intf: IntfId,
        host: IpAddr,
    },
    GetIntfHosts {
        intf: IntfId,
    },
    IsForwardingChannel {
        intf: IntfId,
        #[serde(default)]
        source: Option<IpAddr>,
        group: IpAddr,
        #[serde(default)]
        exact: bool,
    },
    SgIsExcluded {
        intf: IntfId,
        group: IpAddr,
        source: IpAddr,
    },
    TimeoutGroupRange {
        intf: IntfId,
        prefix: IpAddr,
        prefix_len: u8,
        #[serde(default)]
        send_query: bool,
    },
    ChkGrpLimit {
        intf: IntfId,
    },
    ForceGeneralQueries {
        intf: IntfId,
    },
    RequestGeneralQueries {
        intf: IntfId,
    },
    ForceOneGeneralQuery {
        intf: IntfId,
    },
    RequestOneGeneralQuery {
        intf: IntfId,
    },
    DisableHostTracking {
        intf: IntfId,
    },
    NotifyOifMapChange {
        intf: IntfId,
    },
    GetIntfStats {
        intf: IntfId,
    },
    GetQuerier {
        intf: IntfId,
    },
    SetLogLevel {
        level: Severity,
    },
    SetTraceFacilities {
        facilities: Vec<Facility>,
    },
    Shutdown,
}

/// Reply to one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    Success,
    Error { message: String },
    Client { client: ClientId },
    Interfaces { interfaces: Vec<IntfId> },
    Groups { groups: Vec<IntfGroupInfo> },
    HostGroups { groups: Vec<HostGroupInfo> },
    Hosts { hosts: Vec<IntfHostInfo> },
    Flag { value: bool },
    Stats { stats: IntfStats },
    Querier {
        querier: bool,
        address: Option<IpAddr>,
        limit_state: LimitState,
    },
}

impl From<GmpError> for Response {
    fn from(e: GmpError) -> Self {
        Response::Error {
            message: e.to_string(),
        }
    }
}

/// Action that may need to be taken after handling a supervisor command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// No further action needed
    None,
    /// Stop the driving loop
    Shutdown,
}

fn respond<T>(result: Result<T, GmpError>, ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => ok(value),
        Err(e) => e.into(),
    }
}

fn done(result: Result<(), GmpError>) -> Response {
    respond(result, |_| Response::Success)
}

/// Handle a supervisor command by driving the instance and returning a response + action.
///
/// This function is pure apart from the instance itself and unit-testable.
/// Side effects the instance queues (transmissions, notifications) are left
/// for the caller to drain.
pub fn handle_supervisor_command(
    command: SupervisorCommand,
    instance: &mut Instance,
    now: Instant,
) -> (Response, CommandAction) {
    let response = match command {
        SupervisorCommand::AttachInterface { intf, params } => {
            let result = instance.attach_intf(intf, now).and_then(|_| match params {
                Some(params) => instance.set_intf_params(intf, &params, now),
                None => Ok(()),
            });
            done(result)
        }
        SupervisorCommand::DetachInterface { intf } => done(instance.detach_intf(intf, now)),
        SupervisorCommand::SetInterfaceParams { intf, params } => {
            done(instance.set_intf_params(intf, &params, now))
        }
        SupervisorCommand::UpdateIntfState { intf, address } => {
            done(instance.update_intf_state(intf, address, now))
        }
        SupervisorCommand::ReceivePacket { intf, packet } => {
            done(instance.receive_packet(intf, &packet, now))
        }
        SupervisorCommand::RegisterClient { options } => respond(
            instance.register_client(options, now),
            |client| Response::Client { client },
        ),
        SupervisorCommand::DetachClient { client } => done(instance.detach_client(client)),
        SupervisorCommand::Refresh { client, flush } => done(instance.refresh(client, flush)),
        SupervisorCommand::RefreshIntf {
            client,
            intf,
            flush,
        } => done(instance.refresh_intf(client, intf, flush)),
        SupervisorCommand::RefreshHostState { client } => {
            done(instance.refresh_host_state(client))
        }
        SupervisorCommand::GetIntfList {
            group,
            source,
            mode,
        } => respond(instance.get_intf_list(group, source, mode), |interfaces| {
            Response::Interfaces { interfaces }
        }),
        SupervisorCommand::GetIntfGroups { intf } => {
            respond(instance.get_intf_groups(intf), |groups| Response::Groups {
                groups,
            })
        }
        SupervisorCommand::GetHostGroups { intf, host } => {
            respond(instance.get_host_groups(intf, host), |groups| {
                Response::HostGroups { groups }
            })
        }
        SupervisorCommand::GetIntfHosts { intf } => {
            respond(instance.get_intf_hosts(intf), |hosts| Response::Hosts {
                hosts,
            })
        }
        SupervisorCommand::IsForwardingChannel {
            intf,
            source,
            group,
            exact,
        } => respond(
            instance.is_forwarding_channel(intf, source, group, exact),
            |value| Response::Flag { value },
        ),
        SupervisorCommand::SgIsExcluded {
            intf,
            group,
            source,
        } => respond(instance.sg_is_excluded(intf, group, source), |value| {
            Response::Flag { value }
        }),
        SupervisorCommand::TimeoutGroupRange {
            intf,
            prefix,
            prefix_len,
            send_query,
        } => done(instance.timeout_group_range(intf, prefix, prefix_len, send_query, now)),
        SupervisorCommand::ChkGrpLimit { intf } => {
            respond(instance.chk_grp_limit(intf, now), |value| Response::Flag {
                value,
            })
        }
        SupervisorCommand::ForceGeneralQueries { intf } => {
            done(instance.force_general_queries(intf, now))
        }
        SupervisorCommand::RequestGeneralQueries { intf } => {
            done(instance.request_general_queries(intf, now))
        }
        SupervisorCommand::ForceOneGeneralQuery { intf } => {
            done(instance.force_one_general_query(intf, now))
        }
        SupervisorCommand::RequestOneGeneralQuery { intf } => {
            done(instance.request_one_general_query(intf, now))
        }
        SupervisorCommand::DisableHostTracking { intf } => {
            done(instance.disable_host_tracking(intf))
        }
        SupervisorCommand::NotifyOifMapChange { intf } => {
            done(instance.notify_oif_map_change(intf))
        }
        SupervisorCommand::GetIntfStats { intf } => {
            respond(instance.intf_stats(intf), |stats| Response::Stats { stats })
        }
        SupervisorCommand::GetQuerier { intf } => {
            let result = instance.is_querier(intf).and_then(|querier| {
                Ok(Response::Querier {
                    querier,
                    address: instance.querier_addr(intf)?,
                    limit_state: instance.limit_state(intf)?,
                })
            });
            respond(result, |r| r)
        }
        SupervisorCommand::SetLogLevel { level } => {
            instance.logger().set_global_level(level);
            Response::Success
        }
        SupervisorCommand::SetTraceFacilities { facilities } => {
            instance.set_trace_facilities(&facilities);
            Response::Success
        }
        SupervisorCommand::Shutdown => return (Response::Success, CommandAction::Shutdown),
    };
    (response, CommandAction::None)
}
