//! SOAP 1.2 envelopes and faults

use super::Element;
use crate::{Result, RouteError};
use serde_json::{json, Value};

/// SOAP 1.2 envelope namespace
pub const SOAP12_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Namespace of the fault detail element
const ERROR_NAMESPACE: &str = "urn:zimbra";

/// A request or response: optional `<context>` header plus one body element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub context: Option<Element>,
    pub body: Element,
}

impl Envelope {
    pub fn new(context: Option<Element>, body: Element) -> Self {
        Self { context, body }
    }

    /// Parse an envelope document
    pub fn parse(xml: &str) -> Result<Self> {
        let root = Element::parse(xml)?;
        if root.local_name() != "Envelope" {
            return Err(RouteError::InvalidRequest(format!(
                "expected soap Envelope, found {}",
                root.name()
            )));
        }

        let context = root
            .child("Header")
            .and_then(|h| h.child("context"))
            .cloned();
        let body = root
            .require_child("Body")?
            .first_child()
            .cloned()
            .ok_or_else(|| RouteError::InvalidRequest("empty soap Body".to_string()))?;

        Ok(Self { context, body })
    }

    /// Serialize with the `soap` prefix
    pub fn to_xml(&self) -> Result<String> {
        let mut envelope = Element::new("soap:Envelope").with_attr("xmlns:soap", SOAP12_NAMESPACE);
        if let Some(context) = &self.context {
            envelope.add_child(Element::new("soap:Header").with_child(context.clone()));
        }
        envelope.add_child(Element::new("soap:Body").with_child(self.body.clone()));
        envelope.to_xml()
    }

    /// JSON rendering for `js` clients
    pub fn to_json(&self) -> Value {
        let mut body = serde_json::Map::new();
        body.insert(self.body.local_name().to_string(), self.body.to_json());

        let mut root = serde_json::Map::new();
        if let Some(context) = &self.context {
            root.insert("Header".to_string(), json!({ "context": context.to_json() }));
        }
        root.insert("Body".to_string(), Value::Object(body));
        Value::Object(root)
    }

    /// Whether the body is a fault
    pub fn is_fault(&self) -> bool {
        self.body.local_name() == "Fault"
    }
}

/// Build a `soap:Fault` body for an error
pub fn fault_element(err: &RouteError) -> Element {
    let value = if err.is_sender_fault() {
        "soap:Sender"
    } else {
        "soap:Receiver"
    };

    Element::new("soap:Fault")
        .with_child(
            Element::new("soap:Code").with_child(Element::new("soap:Value").with_text(value)),
        )
        .with_child(
            Element::new("soap:Reason")
                .with_child(Element::new("soap:Text").with_text(err.to_string())),
        )
        .with_child(
            Element::new("soap:Detail").with_child(
                Element::new("Error")
                    .with_attr("xmlns", ERROR_NAMESPACE)
                    .with_child(Element::new("Code").with_text(err.fault_code())),
            ),
        )
}

/// Turn a fault body back into an error, None if `body` is not a fault
pub fn decode_fault(body: &Element) -> Option<RouteError> {
    if body.local_name() != "Fault" {
        return None;
    }

    let reason = body
        .child("Reason")
        .and_then(|r| r.child("Text"))
        .map(|t| t.text().to_string())
        .unwrap_or_default();
    let code = body
        .child("Detail")
        .and_then(|d| d.child("Error"))
        .and_then(|e| e.child("Code"))
        .map(|c| c.text().trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "service.FAILURE".to_string());

    Some(RouteError::RemoteFault { code, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope() {
        let xml = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
            <soap:Header>
                <context xmlns="urn:zimbra"><account by="id">acct-a</account></context>
            </soap:Header>
            <soap:Body>
                <GetFolderRequest xmlns="urn:zimbraMail"><folder l="42"/></GetFolderRequest>
            </soap:Body>
        </soap:Envelope>"#;

        let env = Envelope::parse(xml).unwrap();
        assert_eq!(env.body.local_name(), "GetFolderRequest");
        let context = env.context.unwrap();
        assert_eq!(context.child("account").unwrap().text(), "acct-a");
    }

    #[test]
    fn test_parse_rejects_non_envelope() {
        assert!(matches!(
            Envelope::parse("<GetFolderRequest/>"),
            Err(RouteError::InvalidRequest(_))
        ));
        let empty = r#"<soap:Envelope xmlns:soap="x"><soap:Body></soap:Body></soap:Envelope>"#;
        assert!(matches!(
            Envelope::parse(empty),
            Err(RouteError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_serialize_and_reparse() {
        let env = Envelope::new(
            Some(Element::new("context").with_attr("xmlns", "urn:zimbra")),
            Element::new("NoOpRequest").with_attr("xmlns", "urn:zimbraMail"),
        );
        let xml = env.to_xml().unwrap();
        assert!(xml.starts_with("<soap:Envelope"));
        assert_eq!(Envelope::parse(&xml).unwrap(), env);
    }

    #[test]
    fn test_fault_roundtrip() {
        let err = RouteError::NoSuchAccount("acct-z".into());
        let fault = fault_element(&err);
        assert_eq!(
            fault
                .child("Code")
                .and_then(|c| c.child("Value"))
                .map(Element::text),
            Some("soap:Sender")
        );

        match decode_fault(&fault) {
            Some(RouteError::RemoteFault { code, reason }) => {
                assert_eq!(code, "account.NO_SUCH_ACCOUNT");
                assert_eq!(reason, "no such account: acct-z");
            }
            other => panic!("expected remote fault, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_fault() {
        assert!(decode_fault(&Element::new("GetFolderResponse")).is_none());
    }

    #[test]
    fn test_to_json() {
        let env = Envelope::new(
            None,
            Element::new("GetFolderResponse").with_child(Element::new("folder").with_attr("id", "2")),
        );
        let json = env.to_json();
        assert_eq!(json["Body"]["GetFolderResponse"]["folder"][0]["id"], "2");
        assert!(json.get("Header").is_none());
    }
}
