//! The `<body/>` wrapper carrying stanzas over BOSH.

use log::debug;
use minidom::Element;
use std::fmt;

use super::settings::ConnectionSettings;
use crate::error::ParseError;
use crate::ns;

/// An outgoing body: ordered attributes plus the stanzas batched into it.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Body {
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Body {
    /// A body for an established session.
    pub(crate) fn new(rid: Option<u64>, sid: Option<&str>) -> Body {
        let mut body = Body::default();
        body.set_attr("xmlns", ns::HTTPBIND);
        if let Some(rid) = rid {
            body.set_attr("rid", rid.to_string());
        }
        if let Some(sid) = sid {
            body.set_attr("sid", sid);
        }
        body
    }

    /// The session creation request.
    pub(crate) fn session_creation(settings: &ConnectionSettings, rid: u64) -> Body {
        let mut body = Body::default();
        body.set_attr("content", "text/xml; charset=utf-8");
        body.set_attr("xmlns", ns::HTTPBIND);
        body.set_attr("xmlns:xmpp", ns::XBOSH);
        body.set_attr("ver", settings.version.as_str());
        body.set_attr("xmpp:version", "1.0");
        body.set_attr("xml:lang", "en");
        body.set_attr("ack", "1");
        body.set_attr("secure", settings.secure.to_string());
        body.set_attr("rid", rid.to_string());
        body.set_attr("to", settings.host_name.as_str());
        if let Some(route) = settings.route() {
            body.set_attr("route", route);
        }
        body.set_attr("hold", settings.hold.to_string());
        body.set_attr("wait", settings.wait.to_string());
        body
    }

    /// Sets an attribute, keeping the position of an existing one.
    pub(crate) fn set_attr<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some(attr) => attr.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub(crate) fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn push(&mut self, stanza: Element) {
        self.children.push(stanza);
    }

    pub(crate) fn children(&self) -> &[Element] {
        &self.children
    }
}

impl fmt::Display for Body {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "<body")?;
        for (name, value) in &self.attrs {
            write!(fmt, " {}='{}'", name, escape(value))?;
        }
        if self.children.is_empty() {
            return write!(fmt, "/>");
        }
        write!(fmt, ">")?;
        for child in &self.children {
            write!(fmt, "{}", String::from(child))?;
        }
        write!(fmt, "</body>")
    }
}

/// Parses a response, which must be a `<body/>` element.
pub(crate) fn parse_response(content: &str) -> Result<Element, ParseError> {
    let element = content
        .parse::<Element>()
        .map_err(|e| ParseError(e.to_string().into()))?;
    if element.name() != "body" {
        return Err(ParseError(
            format!("expected <body/>, got <{}/>", element.name()).into(),
        ));
    }
    debug!("<< {}", content);
    Ok(element)
}

/// Escapes an attribute value.
fn escape(input: &str) -> String {
    let mut result = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '\'' => result.push_str("&apos;"),
            '"' => result.push_str("&quot;"),
            o => result.push(o),
        }
    }
    result
}
