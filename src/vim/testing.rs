//! In-memory transport and canned responses for unit tests.
use super::soap::fault_message;
use super::transport::Transport;
use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

#[derive(Default)]
struct Script {
    responses: BTreeMap<String, VecDeque<String>>,
    requests: Vec<(String, String)>,
}

/// Replays queued responses per method and records every request.
///
/// Clones share the same script, so a test can keep a handle after moving the
/// transport into a client.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Rc<RefCell<Script>>,
}

impl ScriptedTransport {
    /// Queue a response body for the next call of `method`.
    pub fn push(&self, method: &str, body: &str) {
        self.script
            .borrow_mut()
            .responses
            .entry(method.to_string())
            .or_default()
            .push_back(wrap_body(body));
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.script.borrow().requests.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests().iter().filter(|(m, _)| m == method).count()
    }

    pub fn last_request(&self, method: &str) -> String {
        self.requests()
            .into_iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, body)| body)
            .unwrap_or_else(|| panic!("no {method} request recorded"))
    }
}

impl Transport for ScriptedTransport {
    fn call(&self, method: &str, envelope: &str) -> Result<String> {
        let mut script = self.script.borrow_mut();
        script
            .requests
            .push((method.to_string(), envelope.to_string()));
        let body = script
            .responses
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| anyhow!("no scripted response for {method}"))?;
        if let Some(fault) = fault_message(&body) {
            return Err(anyhow!("{method} failed: {fault}"));
        }
        Ok(body)
    }
}

fn wrap_body(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" \
xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" \
xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\
<soapenv:Body>{body}</soapenv:Body></soapenv:Envelope>"
    )
}

pub fn service_content_response() -> &'static str {
    "<RetrieveServiceContentResponse xmlns=\"urn:vim25\"><returnval>\
<rootFolder type=\"Folder\">group-d1</rootFolder>\
<propertyCollector type=\"PropertyCollector\">propertyCollector</propertyCollector>\
<about><name>VMware vCenter Server</name></about>\
<searchIndex type=\"SearchIndex\">SearchIndex</searchIndex>\
<sessionManager type=\"SessionManager\">SessionManager</sessionManager>\
<dvSwitchManager type=\"DistributedVirtualSwitchManager\">DVSManager</dvSwitchManager>\
</returnval></RetrieveServiceContentResponse>"
}

/// A `RetrievePropertiesResponse` for one object; each prop is `(name, <val> xml)`.
pub fn properties_response(kind: &str, id: &str, props: &[(&str, String)]) -> String {
    let prop_sets: String = props
        .iter()
        .map(|(name, val)| format!("<propSet><name>{name}</name>{val}</propSet>"))
        .collect();
    format!(
        "<RetrievePropertiesResponse xmlns=\"urn:vim25\"><returnval>\
<obj type=\"{kind}\">{id}</obj>{prop_sets}</returnval></RetrievePropertiesResponse>"
    )
}

pub fn text_val(text: &str) -> String {
    format!("<val xsi:type=\"xsd:string\">{text}</val>")
}

pub fn mor_val(kind: &str, id: &str) -> String {
    format!("<val type=\"{kind}\" xsi:type=\"ManagedObjectReference\">{id}</val>")
}

pub fn mor_list_response(refs: &[(&str, &str)]) -> String {
    let items: String = refs
        .iter()
        .map(|(kind, id)| {
            format!(
                "<ManagedObjectReference type=\"{kind}\" xsi:type=\"ManagedObjectReference\">{id}</ManagedObjectReference>"
            )
        })
        .collect();
    format!("<val xsi:type=\"ArrayOfManagedObjectReference\">{items}</val>")
}

pub fn task_state_response(task: &str, state: &str, error: Option<&str>) -> String {
    let mut props = vec![(
        "info.state",
        format!("<val xsi:type=\"TaskInfoState\">{state}</val>"),
    )];
    if let Some(message) = error {
        props.push((
            "info.error",
            format!(
                "<val xsi:type=\"LocalizedMethodFault\"><fault xsi:type=\"ManagedObjectNotFound\"/>\
<localizedMessage>{message}</localizedMessage></val>"
            ),
        ));
    }
    properties_response("Task", task, &props)
}

pub fn opaque_response(entries: &[(&str, &str)]) -> String {
    let data: String = entries
        .iter()
        .map(|(key, encoded)| {
            format!("<opaqueData><key>{key}</key><opaqueData>{encoded}</opaqueData></opaqueData>")
        })
        .collect();
    format!(
        "<FetchOpaqueDataExResponse xmlns=\"urn:vim25\"><returnval>{data}</returnval></FetchOpaqueDataExResponse>"
    )
}

pub fn task_response(task: &str) -> String {
    format!(
        "<UpdateOpaqueDataEx_TaskResponse xmlns=\"urn:vim25\"><returnval type=\"Task\">{task}</returnval></UpdateOpaqueDataEx_TaskResponse>"
    )
}
