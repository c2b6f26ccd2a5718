//! Typed wrappers around the management API methods the tool calls.
use super::soap::{
    child, child_text, children, decode_opaque, envelope, mor_element, opaque_spec_element,
    parse_document, parse_mor, response_element, selection_element, text_element, xsi_type,
};
use super::transport::Transport;
use super::types::{
    ManagedObjectRef, OpaqueDataSpec, OpaqueEntry, PropertyValue, Selection, ServiceContent,
    TaskState,
};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

const TASK_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct VimClient<T: Transport> {
    transport: T,
    content: Option<ServiceContent>,
}

impl<T: Transport> VimClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            content: None,
        }
    }

    /// Service content fetched by [`VimClient::connect`].
    pub fn content(&self) -> Result<&ServiceContent> {
        self.content
            .as_ref()
            .ok_or_else(|| anyhow!("not connected: service content not retrieved"))
    }

    fn invoke(&self, method: &str, this: &ManagedObjectRef, params: &str) -> Result<String> {
        let body = envelope(method, this, params);
        self.transport.call(method, &body)
    }

    /// Retrieve the service content and log in with the given credentials.
    pub fn connect(&mut self, user: &str, password: &str) -> Result<&ServiceContent> {
        let content = self
            .retrieve_service_content()
            .context("retrieve service content")?;
        let params = format!(
            "{}{}",
            text_element("userName", user),
            text_element("password", password)
        );
        self.invoke("Login", &content.session_manager, &params)
            .with_context(|| format!("log in as {user}"))?;
        tracing::info!(user, "logged in");
        Ok(&*self.content.insert(content))
    }

    fn retrieve_service_content(&self) -> Result<ServiceContent> {
        let service_instance = ManagedObjectRef::new("ServiceInstance", "ServiceInstance");
        let xml = self.invoke("RetrieveServiceContent", &service_instance, "")?;
        let doc = parse_document(&xml)?;
        let response = response_element(&doc, "RetrieveServiceContent")?;
        let returnval =
            child(response, "returnval").ok_or_else(|| anyhow!("service content is empty"))?;
        let field = |name: &str| {
            child(returnval, name)
                .and_then(parse_mor)
                .ok_or_else(|| anyhow!("service content is missing {name}"))
        };
        Ok(ServiceContent {
            root_folder: field("rootFolder")?,
            property_collector: field("propertyCollector")?,
            search_index: field("searchIndex")?,
            session_manager: field("sessionManager")?,
            dv_switch_manager: field("dvSwitchManager")?,
        })
    }

    pub fn logout(&self) -> Result<()> {
        let content = self.content()?;
        self.invoke("Logout", &content.session_manager, "")?;
        Ok(())
    }

    /// Read a set of properties from one object.
    ///
    /// Unset properties are absent from the returned map.
    pub fn retrieve_properties(
        &self,
        obj: &ManagedObjectRef,
        paths: &[&str],
    ) -> Result<BTreeMap<String, PropertyValue>> {
        let collector = self.content()?.property_collector.clone();
        let path_set: String = paths.iter().map(|p| text_element("pathSet", p)).collect();
        let params = format!(
            "<specSet><propSet>{}<all>false</all>{path_set}</propSet>\
<objectSet>{}<skip>false</skip></objectSet></specSet>",
            text_element("type", &obj.kind),
            mor_element("obj", obj),
        );
        let xml = self
            .invoke("RetrieveProperties", &collector, &params)
            .with_context(|| format!("retrieve {} of {obj}", paths.join(",")))?;
        parse_properties(&xml)
    }

    pub fn property(&self, obj: &ManagedObjectRef, path: &str) -> Result<Option<PropertyValue>> {
        let mut props = self.retrieve_properties(obj, &[path])?;
        Ok(props.remove(path))
    }

    pub fn text_property(&self, obj: &ManagedObjectRef, path: &str) -> Result<String> {
        match self.property(obj, path)? {
            Some(PropertyValue::Text(text)) => Ok(text),
            Some(other) => bail!("{path} of {obj} is not text: {other:?}"),
            None => bail!("{path} of {obj} is not set"),
        }
    }

    pub fn refs_property(
        &self,
        obj: &ManagedObjectRef,
        path: &str,
    ) -> Result<Vec<ManagedObjectRef>> {
        match self.property(obj, path)? {
            Some(value) => value
                .as_refs()
                .map(<[ManagedObjectRef]>::to_vec)
                .ok_or_else(|| anyhow!("{path} of {obj} is not a reference list")),
            None => Ok(Vec::new()),
        }
    }

    pub fn find_by_ip(&self, ip: &str, vm_search: bool) -> Result<Option<ManagedObjectRef>> {
        let index = self.content()?.search_index.clone();
        let params = format!(
            "{}<vmSearch>{vm_search}</vmSearch>",
            text_element("ip", ip)
        );
        let xml = self
            .invoke("FindByIp", &index, &params)
            .with_context(|| format!("search for {ip}"))?;
        let doc = parse_document(&xml)?;
        let response = response_element(&doc, "FindByIp")?;
        Ok(child(response, "returnval").and_then(parse_mor))
    }

    /// Fetch all opaque entries for the selections.
    pub fn fetch_opaque_data(
        &self,
        selections: &[Selection],
        is_runtime: bool,
    ) -> Result<Vec<OpaqueEntry>> {
        let manager = self.content()?.dv_switch_manager.clone();
        let mut params: String = selections
            .iter()
            .map(|s| selection_element("selectionSet", s))
            .collect();
        params.push_str(&format!("<isRuntime>{is_runtime}</isRuntime>"));
        let xml = self
            .invoke("FetchOpaqueDataEx", &manager, &params)
            .context("fetch opaque data")?;
        let doc = parse_document(&xml)?;
        let response = response_element(&doc, "FetchOpaqueDataEx")?;

        let mut entries = Vec::new();
        for info in children(response, "returnval") {
            for data in children(info, "opaqueData") {
                let key = child_text(data, "key")
                    .ok_or_else(|| anyhow!("opaque data entry without key"))?;
                let value = match child_text(data, "opaqueData") {
                    Some(text) => decode_opaque(&text)
                        .with_context(|| format!("opaque value of {key}"))?,
                    None => Vec::new(),
                };
                entries.push(OpaqueEntry { key, value });
            }
        }
        Ok(entries)
    }

    /// Start an opaque-data update and return the task handle.
    pub fn update_opaque_data(
        &self,
        selections: &[Selection],
        specs: &[OpaqueDataSpec],
        is_runtime: bool,
    ) -> Result<ManagedObjectRef> {
        let manager = self.content()?.dv_switch_manager.clone();
        let mut params: String = selections
            .iter()
            .map(|s| selection_element("selectionSet", s))
            .collect();
        for spec in specs {
            params.push_str(&opaque_spec_element("opaqueDataSpec", spec));
        }
        params.push_str(&format!("<isRuntime>{is_runtime}</isRuntime>"));
        let xml = self
            .invoke("UpdateOpaqueDataEx_Task", &manager, &params)
            .context("update opaque data")?;
        let doc = parse_document(&xml)?;
        let response = response_element(&doc, "UpdateOpaqueDataEx_Task")?;
        child(response, "returnval")
            .and_then(parse_mor)
            .ok_or_else(|| anyhow!("update opaque data returned no task"))
    }

    /// Block until the task finishes, failing if it errors or runs past `timeout`.
    pub fn wait_for_task(&self, task: &ManagedObjectRef, timeout: Duration) -> Result<()> {
        self.wait_for_task_with_interval(task, timeout, TASK_POLL_INTERVAL)
    }

    fn wait_for_task_with_interval(
        &self,
        task: &ManagedObjectRef,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            let props = self.retrieve_properties(task, &["info.state", "info.error"])?;
            let state = props
                .get("info.state")
                .and_then(PropertyValue::as_text)
                .and_then(TaskState::parse)
                .ok_or_else(|| anyhow!("task {task} reported no usable state"))?;
            tracing::debug!(task = %task, state = ?state, "task poll");
            match state {
                TaskState::Success => {
                    tracing::info!(
                        task = %task,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "task complete"
                    );
                    return Ok(());
                }
                TaskState::Error => {
                    let message = match props.get("info.error") {
                        Some(PropertyValue::Fault(message)) => message.clone(),
                        Some(PropertyValue::Text(message)) => message.clone(),
                        _ => "no error detail".to_string(),
                    };
                    bail!("task {task} failed: {message}");
                }
                TaskState::Queued | TaskState::Running => {}
            }
            if start.elapsed() >= timeout {
                bail!(
                    "task {task} did not finish within {}s",
                    timeout.as_secs()
                );
            }
            std::thread::sleep(interval);
        }
    }
}

fn parse_properties(xml: &str) -> Result<BTreeMap<String, PropertyValue>> {
    let doc = parse_document(xml)?;
    let response = response_element(&doc, "RetrieveProperties")?;
    let mut props = BTreeMap::new();
    for object in children(response, "returnval") {
        for prop in children(object, "propSet") {
            let Some(name) = child_text(prop, "name") else {
                continue;
            };
            let Some(val) = child(prop, "val") else {
                continue;
            };
            props.insert(name, parse_value(val));
        }
    }
    Ok(props)
}

fn parse_value(val: roxmltree::Node<'_, '_>) -> PropertyValue {
    match xsi_type(val) {
        Some("ArrayOfManagedObjectReference") => PropertyValue::Refs(
            children(val, "ManagedObjectReference")
                .filter_map(parse_mor)
                .collect(),
        ),
        Some("ManagedObjectReference") => match parse_mor(val) {
            Some(mor) => PropertyValue::Ref(mor),
            None => PropertyValue::Text(String::new()),
        },
        Some("LocalizedMethodFault") => {
            let message = child_text(val, "localizedMessage")
                .filter(|m| !m.is_empty())
                .or_else(|| {
                    child(val, "fault")
                        .and_then(xsi_type)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "unknown fault".to_string());
            PropertyValue::Fault(message)
        }
        _ => PropertyValue::Text(val.text().map(|t| t.trim().to_string()).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::testing::{
        mor_list_response, properties_response, service_content_response, task_state_response,
        ScriptedTransport,
    };
    use crate::vim::types::Action;

    fn connected(transport: ScriptedTransport) -> VimClient<ScriptedTransport> {
        transport.push("RetrieveServiceContent", service_content_response());
        transport.push("Login", "<LoginResponse xmlns=\"urn:vim25\"/>");
        let mut client = VimClient::new(transport);
        client.connect("admin", "secret").expect("connect");
        client
    }

    #[test]
    fn connect_reads_service_content_and_logs_in() {
        let client = connected(ScriptedTransport::default());
        let content = client.content().expect("content");
        assert_eq!(content.root_folder, ManagedObjectRef::new("Folder", "group-d1"));
        assert_eq!(content.dv_switch_manager.value, "DVSManager");

        let requests = client.transport.requests();
        assert_eq!(requests[0].0, "RetrieveServiceContent");
        assert!(requests[1].1.contains("<userName>admin</userName>"));
        assert!(requests[1].1.contains("<password>secret</password>"));
    }

    #[test]
    fn retrieve_properties_parses_text_and_reference_lists() {
        let transport = ScriptedTransport::default();
        let client = connected(transport);
        client.transport.push(
            "RetrieveProperties",
            &properties_response(
                "VmwareDistributedVirtualSwitch",
                "dvs-21",
                &[
                    ("name", "<val xsi:type=\"xsd:string\">VDS-6.5</val>".to_string()),
                    (
                        "portgroup",
                        mor_list_response(&[
                            ("DistributedVirtualPortgroup", "dvportgroup-22"),
                            ("DistributedVirtualPortgroup", "dvportgroup-23"),
                        ]),
                    ),
                ],
            ),
        );

        let dvs = ManagedObjectRef::new("VmwareDistributedVirtualSwitch", "dvs-21");
        let props = client
            .retrieve_properties(&dvs, &["name", "portgroup"])
            .expect("properties");
        assert_eq!(props["name"].as_text(), Some("VDS-6.5"));
        assert_eq!(props["portgroup"].as_refs().map(|refs| refs.len()), Some(2));

        let request = client.transport.last_request("RetrieveProperties");
        assert!(request.contains("<type>VmwareDistributedVirtualSwitch</type>"));
        assert!(request.contains("<pathSet>name</pathSet><pathSet>portgroup</pathSet>"));
    }

    #[test]
    fn find_by_ip_returns_none_for_empty_response() {
        let client = connected(ScriptedTransport::default());
        client
            .transport
            .push("FindByIp", "<FindByIpResponse xmlns=\"urn:vim25\"/>");
        assert!(client.find_by_ip("10.0.0.9", false).expect("search").is_none());
        assert!(client
            .transport
            .last_request("FindByIp")
            .contains("<ip>10.0.0.9</ip><vmSearch>false</vmSearch>"));
    }

    #[test]
    fn fetch_opaque_data_decodes_every_entry() {
        let client = connected(ScriptedTransport::default());
        client.transport.push(
            "FetchOpaqueDataEx",
            "<FetchOpaqueDataExResponse xmlns=\"urn:vim25\">\
<returnval><opaqueData><key>com.vmware.netoverlay.layer1</key><opaqueData>bGVhcm5zd2l0Y2g=</opaqueData></opaqueData></returnval>\
<returnval><opaqueData><key>other</key></opaqueData></returnval>\
</FetchOpaqueDataExResponse>",
        );
        let selection = Selection::Portgroup {
            dvs_uuid: "uuid".to_string(),
            portgroup_key: "dvportgroup-22".to_string(),
        };
        let entries = client
            .fetch_opaque_data(&[selection], false)
            .expect("fetch");
        assert_eq!(
            entries,
            vec![
                OpaqueEntry::new("com.vmware.netoverlay.layer1", b"learnswitch".to_vec()),
                OpaqueEntry::new("other", Vec::new()),
            ]
        );
        assert!(client
            .transport
            .last_request("FetchOpaqueDataEx")
            .contains("<isRuntime>false</isRuntime>"));
    }

    #[test]
    fn update_returns_task_and_wait_reports_task_error() {
        let client = connected(ScriptedTransport::default());
        client.transport.push(
            "UpdateOpaqueDataEx_Task",
            "<UpdateOpaqueDataEx_TaskResponse xmlns=\"urn:vim25\">\
<returnval type=\"Task\">task-101</returnval></UpdateOpaqueDataEx_TaskResponse>",
        );
        let selection = Selection::Host {
            dvs_uuid: "uuid".to_string(),
            host: ManagedObjectRef::new("HostSystem", "host-9"),
        };
        let spec = OpaqueDataSpec {
            operation: Action::Remove,
            entry: OpaqueEntry::new("com.vmware.netoverlay.layer1", b"learnswitch".to_vec()),
            inherited: None,
        };
        let task = client
            .update_opaque_data(&[selection], &[spec], false)
            .expect("update");
        assert_eq!(task, ManagedObjectRef::new("Task", "task-101"));
        assert!(client
            .transport
            .last_request("UpdateOpaqueDataEx_Task")
            .contains("<operation>remove</operation>"));

        client
            .transport
            .push("RetrieveProperties", &task_state_response("task-101", "running", None));
        client.transport.push(
            "RetrieveProperties",
            &task_state_response("task-101", "error", Some("The object has already been deleted")),
        );
        let err = client
            .wait_for_task_with_interval(&task, Duration::from_secs(5), Duration::ZERO)
            .expect_err("task error");
        assert!(err.to_string().contains("already been deleted"));
    }

    #[test]
    fn wait_for_task_times_out() {
        let client = connected(ScriptedTransport::default());
        client
            .transport
            .push("RetrieveProperties", &task_state_response("task-7", "queued", None));
        let task = ManagedObjectRef::new("Task", "task-7");
        let err = client
            .wait_for_task_with_interval(&task, Duration::ZERO, Duration::ZERO)
            .expect_err("timeout");
        assert!(err.to_string().contains("did not finish"));
    }
}
