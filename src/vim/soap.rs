//! SOAP envelope rendering and response parsing.
//!
//! Requests are small enough that string templates with escaping are clearer
//! than a serializer. Responses are parsed with `roxmltree` and matched by
//! local name so server namespace prefixes do not matter.
use super::types::{ManagedObjectRef, OpaqueDataSpec, Selection};
use anyhow::{anyhow, Context, Result};
use base64::Engine;
use roxmltree::{Document, Node};
use std::borrow::Cow;

pub const VIM_NAMESPACE: &str = "urn:vim25";
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

// Wire type names for the opaque-data family.
const HOST_SELECTION_TYPE: &str = "DVSHostMemberSelection";
const PORTGROUP_SELECTION_TYPE: &str = "DVPortgroupSelection";
const OPAQUE_DATA_TYPE: &str = "DVSOpaqueData";
const INHERITED_OPAQUE_DATA_TYPE: &str = "DVSInheritedOpaqueData";

/// Wrap a method call body in a SOAP 1.1 envelope.
pub fn envelope(method: &str, this: &ManagedObjectRef, params: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" \
xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" xmlns:xsi=\"{XSI_NAMESPACE}\">\
<soapenv:Body>\
<{method} xmlns=\"{VIM_NAMESPACE}\">{this_xml}{params}</{method}>\
</soapenv:Body>\
</soapenv:Envelope>",
        this_xml = mor_element("_this", this),
    )
}

pub fn mor_element(tag: &str, mor: &ManagedObjectRef) -> String {
    format!(
        "<{tag} type=\"{}\">{}</{tag}>",
        escape_xml(&mor.kind),
        escape_xml(&mor.value)
    )
}

pub fn text_element(tag: &str, text: &str) -> String {
    format!("<{tag}>{}</{tag}>", escape_xml(text))
}

pub fn selection_element(tag: &str, selection: &Selection) -> String {
    match selection {
        Selection::Host { dvs_uuid, host } => format!(
            "<{tag} xsi:type=\"{HOST_SELECTION_TYPE}\">{}{}</{tag}>",
            text_element("dvsUuid", dvs_uuid),
            mor_element("host", host)
        ),
        Selection::Portgroup {
            dvs_uuid,
            portgroup_key,
        } => format!(
            "<{tag} xsi:type=\"{PORTGROUP_SELECTION_TYPE}\">{}{}</{tag}>",
            text_element("dvsUuid", dvs_uuid),
            text_element("portgroupKey", portgroup_key)
        ),
    }
}

pub fn opaque_spec_element(tag: &str, spec: &OpaqueDataSpec) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(&spec.entry.value);
    let (data_type, inherited) = match spec.inherited {
        Some(flag) => (
            INHERITED_OPAQUE_DATA_TYPE,
            format!("<inherited>{flag}</inherited>"),
        ),
        None => (OPAQUE_DATA_TYPE, String::new()),
    };
    format!(
        "<{tag}>{}<opaqueData xsi:type=\"{data_type}\">{}{}{inherited}</opaqueData></{tag}>",
        text_element("operation", spec.operation.as_str()),
        text_element("key", &spec.entry.key),
        text_element("opaqueData", &encoded),
    )
}

/// Escape text for an element body or attribute value.
fn escape_xml(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        let entity = match ch {
            '&' => "&amp;",
            '<' => "&lt;",
            '>' => "&gt;",
            '"' => "&quot;",
            '\'' => "&apos;",
            _ => {
                escaped.push(ch);
                continue;
            }
        };
        escaped.push_str(entity);
    }
    Cow::Owned(escaped)
}

/// Pull the `faultstring` out of a SOAP fault body, if the body is one.
pub fn fault_message(xml: &str) -> Option<String> {
    let doc = Document::parse(xml).ok()?;
    let fault = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "Fault")?;
    let message = child(fault, "faultstring")
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let detail_kind = child(fault, "detail")
        .and_then(|detail| detail.children().find(|n| n.is_element()))
        .map(|n| n.tag_name().name().to_string());
    match (message, detail_kind) {
        (Some(message), Some(kind)) => Some(format!("{kind}: {message}")),
        (Some(message), None) => Some(message),
        (None, Some(kind)) => Some(kind),
        (None, None) => Some("unspecified SOAP fault".to_string()),
    }
}

pub fn parse_document(xml: &str) -> Result<Document<'_>> {
    Document::parse(xml).context("parse SOAP response XML")
}

/// Locate the `<method>Response` element of a parsed response.
pub fn response_element<'a, 'input>(
    doc: &'a Document<'input>,
    method: &str,
) -> Result<Node<'a, 'input>> {
    let expected = format!("{method}Response");
    doc.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == expected)
        .ok_or_else(|| anyhow!("response does not contain {expected}"))
}

pub fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

pub fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

pub fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

/// Read a managed object reference encoded as `<tag type="Kind">id</tag>`.
pub fn parse_mor(node: Node<'_, '_>) -> Option<ManagedObjectRef> {
    let kind = node.attribute("type")?;
    let value = node.text()?.trim();
    if value.is_empty() {
        return None;
    }
    Some(ManagedObjectRef::new(kind, value))
}

pub fn xsi_type<'a>(node: Node<'a, '_>) -> Option<&'a str> {
    node.attribute((XSI_NAMESPACE, "type"))
        .map(|t| t.rsplit(':').next().unwrap_or(t))
}

pub fn decode_opaque(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .context("decode base64 opaque value")
}
