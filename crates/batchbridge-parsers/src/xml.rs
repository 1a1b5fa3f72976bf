//! XML listing parsing (Grid Engine `qstat -xml`, Torque `qstat -x`).
//!
//! Produces the same shape as the line parsers: identifier to field map.

use crate::{ParseError, Record, Records};

/// Identity of an XML document: root element and declared schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlRoot {
    /// Name of the root element.
    pub name: String,
    /// URI bound to the `xsd` namespace prefix, if declared on the root.
    pub schema: Option<String>,
}

fn parse_document(text: &str) -> Result<roxmltree::Document<'_>, ParseError> {
    roxmltree::Document::parse(text).map_err(|e| {
        let fragment = text.lines().next().unwrap_or_default();
        ParseError::new(format!("malformed XML ({e})"), fragment)
    })
}

/// Read the root element name and schema of an XML document.
pub fn xml_root(text: &str) -> Result<XmlRoot, ParseError> {
    let doc = parse_document(text)?;
    let root = doc.root_element();
    Ok(XmlRoot {
        name: root.tag_name().name().to_string(),
        schema: root.lookup_namespace_uri(Some("xsd")).map(str::to_string),
    })
}

/// Collect every `<element>` in the document into a record of its child
/// elements, indexed by the text of the `key_field` child.
///
/// Nested children are flattened one level as `parent.child`.
pub fn xml_records(text: &str, element: &str, key_field: &str) -> Result<Records, ParseError> {
    let doc = parse_document(text)?;
    let mut records = Records::new();

    for node in doc.descendants().filter(|n| n.has_tag_name(element)) {
        let mut record = Record::new();
        for child in node.children().filter(|c| c.is_element()) {
            let name = child.tag_name().name();
            let nested: Vec<_> = child.children().filter(|c| c.is_element()).collect();
            if nested.is_empty() {
                let value = child.text().unwrap_or_default().trim();
                record.insert(name.to_string(), value.to_string());
            } else {
                for grandchild in nested {
                    let value = grandchild.text().unwrap_or_default().trim();
                    record.insert(
                        format!("{}.{}", name, grandchild.tag_name().name()),
                        value.to_string(),
                    );
                }
            }
        }

        let key = record
            .get(key_field)
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| {
                ParseError::new(
                    format!("<{element}> without <{key_field}>"),
                    format!("{record:?}"),
                )
            })?;
        records.insert(key, record);
    }

    Ok(records)
}
