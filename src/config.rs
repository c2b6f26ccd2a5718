//! Run configuration assembled from the environment and CLI flags.
//!
//! Credentials and the port group list come from the environment so they stay
//! out of shell history; connection tuning comes from flags.
use crate::cli::{RootArgs, Target};
use crate::vim::EndpointConfig;
use anyhow::{anyhow, Result};
use std::time::Duration;

pub const USER_ENV: &str = "vc_user";
pub const PASSWORD_ENV: &str = "vc_password";
pub const PORTGROUPS_ENV: &str = "dvpg_name_list";

#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything a run needs besides the positional targets.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub credentials: Credentials,
    pub portgroups: Vec<String>,
    pub endpoint: EndpointConfig,
    pub task_timeout: Duration,
}

impl RunConfig {
    /// Load from the process environment.
    pub fn from_env(args: &RootArgs, target: &Target) -> Result<Self> {
        Self::from_lookup(args, target, |name| std::env::var(name).ok())
    }

    /// Load with an injectable variable lookup.
    pub fn from_lookup<F>(args: &RootArgs, target: &Target, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| anyhow!("environment variable {name} is not set"))
        };
        let credentials = Credentials {
            user: required(USER_ENV)?,
            password: required(PASSWORD_ENV)?,
        };
        let portgroups = parse_portgroups(&required(PORTGROUPS_ENV)?);
        if portgroups.is_empty() {
            return Err(anyhow!(
                "environment variable {PORTGROUPS_ENV} lists no port groups"
            ));
        }
        Ok(Self {
            credentials,
            portgroups,
            endpoint: EndpointConfig {
                host: target.vc.clone(),
                port: args.port,
                path: args.sdk_path.clone(),
                api_version: args.api_version.clone(),
                verify_tls: args.verify_tls,
                timeout: Duration::from_secs(args.timeout),
            },
            task_timeout: Duration::from_secs(args.task_timeout),
        })
    }
}

/// Split a comma-separated port group list, trimming blanks.
pub fn parse_portgroups(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
