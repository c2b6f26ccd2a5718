//! Learnswitch overlay toggling.
//!
//! Two opaque keys are managed: the overlay marker on the host's DVS
//! membership and the enable flag on each port group. Every edit reads the
//! current keys first and skips the update when it would be a no-op, so a run
//! can be repeated safely.
use crate::inventory::{self, Dvs, Host, Portgroup};
use crate::vim::{Action, OpaqueDataSpec, OpaqueEntry, Selection, Transport, VimClient};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

pub const HOST_OVERLAY_KEY: &str = "com.vmware.netoverlay.layer1";
pub const HOST_OVERLAY_VALUE: &str = "learnswitch";
pub const PORTGROUP_ENABLE_KEY: &str = "com.vmware.net.learnswitch.enable";
pub const PORTGROUP_ENABLE_VALUE: &str = "1";

/// What one invocation should do.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub dvs_name: String,
    pub host_ip: String,
    pub portgroups: Vec<String>,
    pub action: Action,
    pub task_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Host,
    Portgroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Outcome {
    /// The update task ran to completion.
    Applied,
    /// `add` skipped: the key already carries this value.
    AlreadyPresent { value: String },
    /// `remove` skipped: the key is not set.
    Absent,
}

/// One key edit, as reported with `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub target_kind: TargetKind,
    pub target: String,
    pub key: String,
    pub action: Action,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// An object whose opaque data is being edited.
struct Target {
    kind: TargetKind,
    name: String,
    selection: Selection,
    inherited: Option<bool>,
}

impl Target {
    fn host(dvs: &Dvs, host: &Host) -> Self {
        Self {
            kind: TargetKind::Host,
            name: host.name.clone(),
            selection: Selection::Host {
                dvs_uuid: dvs.uuid.clone(),
                host: host.mor.clone(),
            },
            inherited: None,
        }
    }

    fn portgroup(dvs: &Dvs, pg: &Portgroup) -> Self {
        Self {
            kind: TargetKind::Portgroup,
            name: pg.name.clone(),
            selection: Selection::Portgroup {
                dvs_uuid: dvs.uuid.clone(),
                portgroup_key: pg.key.clone(),
            },
            // port group values are set directly, never inherited
            inherited: Some(false),
        }
    }

    /// Label used in progress lines, e.g. `host: esx01` or `PG: web`.
    fn label(&self) -> &'static str {
        match self.kind {
            TargetKind::Host => "host",
            TargetKind::Portgroup => "PG",
        }
    }

    /// Object named in the `Set:`/`Remove:` lines: `host esx01` or `PG: web`.
    fn subject(&self) -> String {
        match self.kind {
            TargetKind::Host => format!("host {}", self.name),
            TargetKind::Portgroup => format!("PG: {}", self.name),
        }
    }
}

/// Resolve every object, then apply the plan.
///
/// With `add` the host overlay is set before the port groups are enabled;
/// with `remove` the port groups are cleared first and the host overlay last.
/// All port groups are resolved before any of them is edited.
pub fn run<T: Transport>(
    client: &VimClient<T>,
    plan: &RunPlan,
    out: &mut dyn Write,
) -> Result<Vec<Change>> {
    let dvs = inventory::find_dvs(client, &plan.dvs_name)?
        .ok_or_else(|| anyhow!("DVS {} not found", plan.dvs_name))?;
    let host = inventory::find_host(client, &plan.host_ip)?
        .ok_or_else(|| anyhow!("host {} not found", plan.host_ip))?;

    let mut changes = Vec::new();
    let host_target = Target::host(&dvs, &host);

    if plan.action == Action::Add {
        changes.push(edit_host_overlay(client, &host_target, plan, out)?);
    }

    let mut portgroups = Vec::with_capacity(plan.portgroups.len());
    for name in &plan.portgroups {
        let pg = inventory::find_portgroup(client, &dvs, name)?
            .ok_or_else(|| anyhow!("PortGroup({}:{}) not found", dvs.name, name))?;
        portgroups.push(pg);
    }

    for pg in &portgroups {
        let target = Target::portgroup(&dvs, pg);
        changes.push(edit_key(
            client,
            &target,
            OpaqueEntry::new(PORTGROUP_ENABLE_KEY, PORTGROUP_ENABLE_VALUE.as_bytes()),
            plan,
            out,
        )?);
    }

    if plan.action == Action::Remove {
        changes.push(edit_host_overlay(client, &host_target, plan, out)?);
    }

    Ok(changes)
}

fn edit_host_overlay<T: Transport>(
    client: &VimClient<T>,
    target: &Target,
    plan: &RunPlan,
    out: &mut dyn Write,
) -> Result<Change> {
    edit_key(
        client,
        target,
        OpaqueEntry::new(HOST_OVERLAY_KEY, HOST_OVERLAY_VALUE.as_bytes()),
        plan,
        out,
    )
}

/// Add or remove one key on one target unless it is already in the wanted state.
fn edit_key<T: Transport>(
    client: &VimClient<T>,
    target: &Target,
    entry: OpaqueEntry,
    plan: &RunPlan,
    out: &mut dyn Write,
) -> Result<Change> {
    let selections = std::slice::from_ref(&target.selection);
    let existing = client
        .fetch_opaque_data(selections, false)
        .with_context(|| format!("read opaque data of {} {}", target.label(), target.name))?;
    for current in &existing {
        tracing::debug!(
            object = %target.name,
            key = %current.key,
            value = %current.display_value(),
            "fetched opaque data"
        );
    }
    let found = existing.iter().find(|current| current.key == entry.key);
    let label = target.label();

    let outcome = match (plan.action, found) {
        (Action::Add, Some(current)) => {
            let value = current.display_value();
            writeln!(
                out,
                "INFO: {} already exists with value: {} on {label}: {}. No changes made.",
                entry.key, value, target.name
            )?;
            Some(Outcome::AlreadyPresent { value })
        }
        (Action::Remove, None) => {
            writeln!(
                out,
                "INFO: {} does not exist on {label}: {}. No changes made.",
                entry.key, target.name
            )?;
            Some(Outcome::Absent)
        }
        _ => None,
    };
    if let Some(outcome) = outcome {
        return Ok(change(target, &entry.key, plan.action, outcome));
    }

    match plan.action {
        Action::Add => writeln!(
            out,
            "INFO: Set: {} = {} on {}",
            entry.key,
            entry.display_value(),
            target.subject()
        )?,
        Action::Remove => writeln!(
            out,
            "INFO: Remove: {} on {}",
            entry.key,
            target.subject()
        )?,
    }

    let key = entry.key.clone();
    let spec = OpaqueDataSpec {
        operation: plan.action,
        entry,
        inherited: target.inherited,
    };
    let task = client
        .update_opaque_data(selections, std::slice::from_ref(&spec), false)
        .with_context(|| format!("{} {key} on {label}: {}", plan.action, target.name))?;
    client
        .wait_for_task(&task, plan.task_timeout)
        .with_context(|| format!("{} {key} on {label}: {}", plan.action, target.name))?;
    tracing::info!(
        object = %target.name,
        key = %key,
        action = %plan.action,
        "opaque data updated"
    );

    Ok(change(target, &key, plan.action, Outcome::Applied))
}

fn change(target: &Target, key: &str, action: Action, outcome: Outcome) -> Change {
    Change {
        target_kind: target.kind,
        target: target.name.clone(),
        key: key.to_string(),
        action,
        outcome,
    }
}
