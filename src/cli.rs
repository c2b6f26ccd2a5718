//! CLI argument parsing for the learnswitch toggle.
//!
//! Positional targets are parsed leniently by clap and validated here so each
//! problem gets its own message followed by the usage text.
use crate::vim::Action;
use clap::{CommandFactory, Parser};
use std::net::Ipv4Addr;

const AFTER_HELP: &str = "\
Note: <ESX-IP> MUST be an IP address, not a hostname or FQDN

Description:
   Add opaqueData key/value pairs on Host and PortGroup:
   com.vmware.netoverlay.layer1              = 'learnswitch' (host)
   com.vmware.net.learnswitch.enable         = '1'           (portgroup)

Environment:
   vc_user          vCenter user name
   vc_password      vCenter password
   dvpg_name_list   comma-separated port group names on the DVS

Examples:
   learnswitch-cfg 192.168.1.150 VDS-6.5 192.168.1.148 add
   learnswitch-cfg 192.168.1.150 VDS-6.5 192.168.1.148 remove";

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "learnswitch-cfg",
    version,
    about = "Toggle learnswitch overlay opaque data on a DVS, host and port groups",
    after_help = AFTER_HELP
)]
pub struct RootArgs {
    /// vCenter address
    #[arg(value_name = "VC")]
    pub vc: Option<String>,

    /// Name of the distributed virtual switch
    #[arg(value_name = "DVS-NAME")]
    pub dvs_name: Option<String>,

    /// Management IP address of the ESX host
    #[arg(value_name = "ESX-IP")]
    pub esx_ip: Option<String>,

    /// add or remove (default: add)
    #[arg(value_name = "ACTION")]
    pub action: Option<String>,

    /// HTTPS port of the management endpoint
    #[arg(long, value_name = "PORT", default_value_t = 443)]
    pub port: u16,

    /// SOAP endpoint path
    #[arg(long, value_name = "PATH", default_value = "/sdk")]
    pub sdk_path: String,

    /// API version sent in the SOAPAction header
    #[arg(long, value_name = "VERSION", default_value = "6.0")]
    pub api_version: String,

    /// Verify the endpoint's TLS certificate
    #[arg(long)]
    pub verify_tls: bool,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub timeout: u64,

    /// Seconds to wait for each update task
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub task_timeout: u64,

    /// Print a JSON report of every key edit on stdout
    #[arg(long)]
    pub json: bool,

    /// Log fetched opaque data and API calls
    #[arg(long)]
    pub debug: bool,
}

/// Validated positional targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub vc: String,
    pub dvs_name: String,
    pub host_ip: Ipv4Addr,
    pub action: Action,
}

/// Why the positional arguments cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgProblem {
    /// Nothing to act on; show usage only.
    NoTarget,
    /// A specific argument is wrong.
    Invalid(&'static str),
}

impl RootArgs {
    pub fn target(&self) -> Result<Target, ArgProblem> {
        let vc = non_empty(&self.vc).ok_or(ArgProblem::NoTarget)?;
        let dvs_name =
            non_empty(&self.dvs_name).ok_or(ArgProblem::Invalid("must specify dvs name"))?;
        let host_ip = non_empty(&self.esx_ip)
            .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
            .ok_or(ArgProblem::Invalid("must specify a host IP address"))?;
        let action = match self.action.as_deref() {
            None | Some("add") => Action::Add,
            Some("remove") => Action::Remove,
            Some(_) => return Err(ArgProblem::Invalid("must specify an action: add remove")),
        };
        Ok(Target {
            vc: vc.to_string(),
            dvs_name: dvs_name.to_string(),
            host_ip,
            action,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn usage() -> String {
    RootArgs::command().render_help().to_string()
}
