//! `DomNode` and `DataSource` over real DOM elements.

use cg_core::dom::DomNode;
use cg_core::path::DataSource;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Element, NodeList};

/// A live element.
#[derive(Debug, Clone, PartialEq)]
pub struct WebNode(pub Element);

impl WebNode {
    pub fn element(&self) -> &Element {
        &self.0
    }
}

/// Elements in a node list, skipping text and comment nodes.
pub fn elements(list: &NodeList) -> Vec<WebNode> {
    (0..list.length())
        .filter_map(|i| list.item(i))
        .filter_map(|node| node.dyn_into::<Element>().ok())
        .map(WebNode)
        .collect()
}

impl DomNode for WebNode {
    type Data = JsData;

    fn matches(&self, selector: &str) -> bool {
        self.0.matches(selector).unwrap_or(false)
    }

    fn query(&self, selector: &str) -> Option<Self> {
        self.0.query_selector(selector).ok().flatten().map(WebNode)
    }

    fn query_all(&self, selector: &str) -> Vec<Self> {
        self.0
            .query_selector_all(selector)
            .map(|list| elements(&list))
            .unwrap_or_default()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.0.get_attribute(name)
    }

    fn text(&self) -> String {
        self.0.text_content().unwrap_or_default()
    }

    /// The element itself: host data lives under its `data` property.
    fn host_data(&self) -> Option<JsData> {
        Some(JsData(self.0.clone().into()))
    }
}

/// A host-owned JS object read through `Reflect`.
#[derive(Debug, Clone)]
pub struct JsData(pub JsValue);

impl JsData {
    fn walk(&self, path: &str) -> Option<JsValue> {
        let mut current = self.0.clone();
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            if !current.is_object() {
                return None;
            }
            current = js_sys::Reflect::get(&current, &JsValue::from_str(segment)).ok()?;
            if current.is_undefined() || current.is_null() {
                return None;
            }
        }
        Some(current)
    }
}

impl DataSource for JsData {
    fn lookup(&self, path: &str) -> Option<String> {
        let leaf = self.walk(path)?;
        if let Some(s) = leaf.as_string() {
            return Some(s);
        }
        if let Some(b) = leaf.as_bool() {
            return Some(b.to_string());
        }
        let n = leaf.as_f64()?;
        Some(if n.fract() == 0.0 && n.abs() < 1e15 {
            format!("{}", n as i64)
        } else {
            n.to_string()
        })
    }
}
