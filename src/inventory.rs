//! Name and IP lookups for the objects a run touches.
use crate::vim::{ManagedObjectRef, Transport, VimClient};
use anyhow::{Context, Result};

const DVS_KIND: &str = "VmwareDistributedVirtualSwitch";

/// A resolved switch with the properties the run needs.
#[derive(Debug, Clone)]
pub struct Dvs {
    pub mor: ManagedObjectRef,
    pub name: String,
    pub uuid: String,
}

#[derive(Debug, Clone)]
pub struct Host {
    pub mor: ManagedObjectRef,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Portgroup {
    pub name: String,
    pub key: String,
}

/// Find a VMware DVS by name anywhere under the root folder.
///
/// Folders are walked depth-first; datacenters contribute their network
/// folder. The first match in walk order wins.
pub fn find_dvs<T: Transport>(client: &VimClient<T>, name: &str) -> Result<Option<Dvs>> {
    let root = client.content()?.root_folder.clone();
    let Some(mor) = find_dvs_in_folder(client, &root, name)? else {
        return Ok(None);
    };
    let uuid = client
        .text_property(&mor, "uuid")
        .with_context(|| format!("read uuid of DVS {name}"))?;
    tracing::info!(dvs = name, mor = %mor, uuid = %uuid, "resolved DVS");
    Ok(Some(Dvs {
        mor,
        name: name.to_string(),
        uuid,
    }))
}

fn find_dvs_in_folder<T: Transport>(
    client: &VimClient<T>,
    folder: &ManagedObjectRef,
    name: &str,
) -> Result<Option<ManagedObjectRef>> {
    for entity in client.refs_property(folder, "childEntity")? {
        let found = match entity.kind.as_str() {
            "Datacenter" => {
                let network = client.property(&entity, "networkFolder")?;
                match network.as_ref().and_then(|value| value.as_refs()) {
                    Some([network_folder, ..]) => {
                        find_dvs_in_folder(client, network_folder, name)?
                    }
                    _ => None,
                }
            }
            "Folder" => find_dvs_in_folder(client, &entity, name)?,
            DVS_KIND => {
                let entity_name = client.text_property(&entity, "name")?;
                (entity_name == name).then(|| entity.clone())
            }
            other => {
                tracing::debug!(kind = other, mor = %entity, "skipping inventory entity");
                None
            }
        };
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

/// Find a host by its management IP address.
pub fn find_host<T: Transport>(client: &VimClient<T>, ip: &str) -> Result<Option<Host>> {
    let Some(mor) = client.find_by_ip(ip, false)? else {
        return Ok(None);
    };
    let name = client
        .text_property(&mor, "name")
        .with_context(|| format!("read name of host {ip}"))?;
    tracing::info!(ip, host = %name, mor = %mor, "resolved host");
    Ok(Some(Host { mor, name }))
}

/// Find a port group on the switch by name.
pub fn find_portgroup<T: Transport>(
    client: &VimClient<T>,
    dvs: &Dvs,
    name: &str,
) -> Result<Option<Portgroup>> {
    for mor in client.refs_property(&dvs.mor, "portgroup")? {
        let props = client.retrieve_properties(&mor, &["name", "key"])?;
        let pg_name = props.get("name").and_then(|v| v.as_text());
        if pg_name != Some(name) {
            continue;
        }
        let key = props
            .get("key")
            .and_then(|v| v.as_text())
            .unwrap_or(&mor.value)
            .to_string();
        tracing::info!(portgroup = name, key = %key, mor = %mor, "resolved port group");
        return Ok(Some(Portgroup {
            name: name.to_string(),
            key,
        }));
    }
    Ok(None)
}
