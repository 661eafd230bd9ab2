//! Mutable XML tree for package parts.
//!
//! Parts are parsed with `roxmltree` and copied into an arena so they can be
//! rewritten in place. Detached nodes stay in the arena, so a [`NodeId`]
//! captured before a mutation keeps pointing at the same node afterwards.

use std::fmt::Write as _;

use crate::error::Error;

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QName {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(namespace: &str, prefix: &str, local: &str) -> Self {
        QName {
            namespace: Some(namespace.to_string()),
            prefix: Some(prefix.to_string()),
            local: local.to_string(),
        }
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == Some(namespace)
    }

    fn write_qualified(&self, out: &mut String) {
        if let Some(prefix) = &self.prefix {
            out.push_str(prefix);
            out.push(':');
        }
        out.push_str(&self.local);
    }
}

#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Clone, Debug)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    /// Namespace declarations made on this element: (prefix, uri).
    pub namespaces: Vec<(Option<String>, String)>,
}

#[derive(Clone, Debug)]
enum NodeKind {
    Root,
    Element(Element),
    Text(String),
    Comment(String),
    Pi { target: String, value: Option<String> },
}

#[derive(Clone, Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Clone, Debug)]
pub struct XmlTree {
    nodes: Vec<NodeData>,
}

impl XmlTree {
    pub fn parse(text: &str) -> Result<Self, Error> {
        let doc = roxmltree::Document::parse(text)?;
        let mut tree = XmlTree {
            nodes: vec![NodeData { kind: NodeKind::Root, parent: None, children: Vec::new() }],
        };
        let root = tree.root();
        for child in doc.root().children() {
            tree.import_node(Some(root), child);
        }
        Ok(tree)
    }

    /// Parse a standalone snippet and add its root element to this tree, detached.
    /// The snippet must declare every namespace prefix it uses.
    pub fn import_fragment(&mut self, xml: &str) -> Result<NodeId, Error> {
        let doc = roxmltree::Document::parse(xml)?;
        self.import_node(None, doc.root_element())
            .ok_or_else(|| Error::InvalidTemplate("empty XML fragment".into()))
    }

    fn import_node(&mut self, parent: Option<NodeId>, node: roxmltree::Node) -> Option<NodeId> {
        let kind = match node.node_type() {
            roxmltree::NodeType::Element => NodeKind::Element(convert_element(node)),
            roxmltree::NodeType::Text => NodeKind::Text(node.text().unwrap_or("").to_string()),
            roxmltree::NodeType::Comment => {
                NodeKind::Comment(node.text().unwrap_or("").to_string())
            }
            roxmltree::NodeType::PI => {
                let pi = node.pi()?;
                NodeKind::Pi {
                    target: pi.target.to_string(),
                    value: pi.value.map(str::to_string),
                }
            }
            roxmltree::NodeType::Root => return None,
        };
        let id = self.push(kind);
        if let Some(parent) = parent {
            self.append(parent, id);
        }
        for child in node.children() {
            self.import_node(Some(id), child);
        }
        Some(id)
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData { kind, parent: None, children: Vec::new() });
        NodeId(self.nodes.len() - 1)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root_element(&self) -> Option<NodeId> {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .find(|&id| matches!(self.nodes[id.0].kind, NodeKind::Element(_)))
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is(&self, id: NodeId, namespace: &str, local: &str) -> bool {
        self.element(id).is_some_and(|el| el.name.is(namespace, local))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn child(&self, id: NodeId, namespace: &str, local: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.is(c, namespace, local))
    }

    pub fn child_elements(&self, id: NodeId, namespace: &str, local: &str) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&c| self.is(c, namespace, local))
            .collect()
    }

    /// All matching descendants of `id` in document order, `id` itself excluded.
    pub fn descendants(&self, id: NodeId, namespace: &str, local: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if self.is(next, namespace, local) {
                found.push(next);
            }
            stack.extend(self.children(next).iter().rev().copied());
        }
        found
    }

    pub fn nearest_ancestor(&self, id: NodeId, namespace: &str, local: &str) -> Option<NodeId> {
        let mut current = self.parent(id);
        while let Some(node) = current {
            if self.is(node, namespace, local) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current == self.root()
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.0].kind {
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Comment(_) | NodeKind::Pi { .. } => {}
            NodeKind::Root | NodeKind::Element(_) => {
                for &child in &self.nodes[id.0].children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Replace every child of `id` with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        for child in std::mem::take(&mut self.nodes[id.0].children) {
            self.nodes[child.0].parent = None;
        }
        if !text.is_empty() {
            let node = self.push(NodeKind::Text(text.to_string()));
            self.append(id, node);
        }
    }

    pub fn attribute(&self, id: NodeId, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.element(id)?
            .attributes
            .iter()
            .find(|a| a.name.local == local && a.name.namespace.as_deref() == namespace)
            .map(|a| a.value.as_str())
    }

    pub fn set_attribute(&mut self, id: NodeId, name: QName, value: &str) {
        let Some(el) = self.element_mut(id) else {
            return;
        };
        if let Some(existing) = el
            .attributes
            .iter_mut()
            .find(|a| a.name.local == name.local && a.name.namespace == name.namespace)
        {
            existing.value = value.to_string();
        } else {
            el.attributes.push(Attribute { name, value: value.to_string() });
        }
    }

    pub fn new_element(&mut self, name: QName) -> NodeId {
        self.push(NodeKind::Element(Element {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }))
    }

    /// First child named `name`, created at `index` when absent.
    pub fn child_or_insert(&mut self, parent: NodeId, name: QName, index: usize) -> NodeId {
        if let Some(namespace) = name.namespace.as_deref()
            && let Some(existing) = self.child(parent, namespace, &name.local)
        {
            return existing;
        }
        let created = self.new_element(name);
        self.insert(parent, index, created);
        created
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    pub fn insert_before(&mut self, sibling: NodeId, node: NodeId) {
        let Some(parent) = self.parent(sibling) else {
            return;
        };
        self.detach(node);
        let index = self.index_in_parent(sibling).unwrap_or(0);
        self.insert(parent, index, node);
    }

    /// Put `new` where `old` is and detach `old`. No-op when `old` is detached.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        let Some(parent) = self.parent(old) else {
            return;
        };
        self.detach(new);
        if let Some(index) = self.index_in_parent(old) {
            self.nodes[parent.0].children[index] = new;
            self.nodes[new.0].parent = Some(parent);
            self.nodes[old.0].parent = None;
        }
    }

    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent.take() else {
            return;
        };
        self.nodes[parent.0].children.retain(|&c| c != id);
    }

    fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.nodes[parent.0].children.iter().position(|&c| c == id)
    }

    /// Copy `id` and its subtree; the copy is detached.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let kind = self.nodes[id.0].kind.clone();
        let copy = self.push(kind);
        for child in self.nodes[id.0].children.clone() {
            let child_copy = self.deep_clone(child);
            self.append(copy, child_copy);
        }
        copy
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from(DECLARATION);
        let mut scope: Vec<(Option<String>, String)> =
            vec![(Some("xml".to_string()), XML_NS.to_string())];
        for &child in &self.nodes[0].children {
            self.write_node(child, &mut out, &mut scope);
        }
        out
    }

    /// Serialize a single subtree without XML declaration.
    #[cfg(test)]
    pub fn node_to_xml(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut scope: Vec<(Option<String>, String)> =
            vec![(Some("xml".to_string()), XML_NS.to_string())];
        self.write_node(id, &mut out, &mut scope);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String, scope: &mut Vec<(Option<String>, String)>) {
        match &self.nodes[id.0].kind {
            NodeKind::Root => {
                for &child in &self.nodes[id.0].children {
                    self.write_node(child, out, scope);
                }
            }
            NodeKind::Text(text) => escape_into(text, false, out),
            NodeKind::Comment(text) => {
                let _ = write!(out, "<!--{text}-->");
            }
            NodeKind::Pi { target, value } => match value {
                Some(value) => {
                    let _ = write!(out, "<?{target} {value}?>");
                }
                None => {
                    let _ = write!(out, "<?{target}?>");
                }
            },
            NodeKind::Element(el) => {
                let mark = scope.len();
                let mut declared: Vec<(Option<String>, String)> = Vec::new();
                for (prefix, uri) in &el.namespaces {
                    declare(prefix.as_deref(), uri, scope, &mut declared);
                }
                bind_name(&el.name, false, scope, &mut declared);
                for attr in &el.attributes {
                    bind_name(&attr.name, true, scope, &mut declared);
                }

                out.push('<');
                el.name.write_qualified(out);
                for (prefix, uri) in &declared {
                    match prefix {
                        Some(p) => {
                            let _ = write!(out, " xmlns:{p}=\"");
                        }
                        None => out.push_str(" xmlns=\""),
                    }
                    escape_into(uri, true, out);
                    out.push('"');
                }
                for attr in &el.attributes {
                    out.push(' ');
                    attr.name.write_qualified(out);
                    out.push_str("=\"");
                    escape_into(&attr.value, true, out);
                    out.push('"');
                }

                let children = &self.nodes[id.0].children;
                if children.is_empty() {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    for &child in children {
                        self.write_node(child, out, scope);
                    }
                    out.push_str("</");
                    el.name.write_qualified(out);
                    out.push('>');
                }
                scope.truncate(mark);
            }
        }
    }
}

fn lookup<'a>(scope: &'a [(Option<String>, String)], prefix: Option<&str>) -> Option<&'a str> {
    scope
        .iter()
        .rev()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.as_str())
}

fn declare(
    prefix: Option<&str>,
    uri: &str,
    scope: &mut Vec<(Option<String>, String)>,
    declared: &mut Vec<(Option<String>, String)>,
) {
    if prefix == Some("xml") || lookup(scope, prefix) == Some(uri) {
        return;
    }
    if prefix.is_none() && uri.is_empty() && lookup(scope, None).is_none() {
        return;
    }
    let binding = (prefix.map(str::to_string), uri.to_string());
    scope.push(binding.clone());
    declared.push(binding);
}

fn bind_name(
    name: &QName,
    is_attribute: bool,
    scope: &mut Vec<(Option<String>, String)>,
    declared: &mut Vec<(Option<String>, String)>,
) {
    match (&name.namespace, &name.prefix) {
        (Some(uri), Some(prefix)) => declare(Some(prefix), uri, scope, declared),
        (Some(uri), None) if !is_attribute => declare(None, uri, scope, declared),
        (None, _) if !is_attribute => declare(None, "", scope, declared),
        _ => {}
    }
}

fn convert_element(node: roxmltree::Node) -> Element {
    let tag = node.tag_name();
    let name = QName {
        namespace: tag.namespace().map(str::to_string),
        prefix: tag.namespace().and_then(|uri| prefix_for(node, uri, false)),
        local: tag.name().to_string(),
    };

    let attributes = node
        .attributes()
        .map(|attr| Attribute {
            name: QName {
                namespace: attr.namespace().map(str::to_string),
                prefix: attr.namespace().and_then(|uri| prefix_for(node, uri, true)),
                local: attr.name().to_string(),
            },
            value: attr.value().to_string(),
        })
        .collect();

    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    let namespaces = node
        .namespaces()
        .filter(|ns| ns.uri() != XML_NS)
        .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
        .collect();

    Element { name, attributes, namespaces }
}

fn prefix_for(node: roxmltree::Node, uri: &str, needs_prefix: bool) -> Option<String> {
    if uri == XML_NS {
        return Some("xml".to_string());
    }
    node.namespaces()
        .filter(|ns| ns.uri() == uri)
        .find(|ns| !needs_prefix || ns.name().is_some())
        .and_then(|ns| ns.name())
        .map(str::to_string)
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\n' if attribute => out.push_str("&#10;"),
            '\t' if attribute => out.push_str("&#9;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

/// Escape text for inclusion in hand-built XML snippets.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_into(text, true, &mut out);
    out
}
