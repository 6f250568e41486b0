//! `Document` over the live page via `web-sys`.
//!
//! Typed selectors render to CSS and go through `querySelectorAll`. A
//! selector the browser rejects is logged and matches nothing.

use branchscope::dom::{ChildNode, Document, Rect, Selector};
use wasm_bindgen::JsCast;
use web_sys::{Element, HtmlElement, Node, NodeList};

/// Roots owned by the host's rendering framework. Elements under these must
/// not be decorated.
const HOST_MANAGED_ROOTS: &str = "[data-reactroot], #__next, [data-radix-popper-content-wrapper]";

#[derive(Debug, Clone)]
pub struct WebDocument {
    document: web_sys::Document,
}

impl WebDocument {
    pub fn new(document: web_sys::Document) -> Self {
        Self { document }
    }
}

pub(crate) fn elements(list: &NodeList) -> Vec<Element> {
    (0..list.length())
        .filter_map(|i| list.item(i))
        .filter_map(|node| node.dyn_into::<Element>().ok())
        .collect()
}

impl Document for WebDocument {
    type Element = Element;

    fn select_all(&self, scope: Option<&Element>, selector: &Selector) -> Vec<Element> {
        let css = selector.to_css();
        let found = match scope {
            Some(el) => el.query_selector_all(&css),
            None => self.document.query_selector_all(&css),
        };
        match found {
            Ok(list) => elements(&list),
            Err(err) => {
                log::warn!("selector `{css}` rejected: {err:?}");
                Vec::new()
            }
        }
    }

    fn attribute(&self, element: &Element, name: &str) -> Option<String> {
        element.get_attribute(name)
    }

    fn tag_name(&self, element: &Element) -> String {
        element.tag_name().to_ascii_lowercase()
    }

    fn text_content(&self, element: &Element) -> String {
        element.text_content().unwrap_or_default()
    }

    fn child_nodes(&self, element: &Element) -> Vec<ChildNode<Element>> {
        let list = element.child_nodes();
        (0..list.length())
            .filter_map(|i| list.item(i))
            .filter_map(|node| match node.node_type() {
                Node::ELEMENT_NODE => node.dyn_into::<Element>().ok().map(ChildNode::Element),
                Node::TEXT_NODE => node.text_content().map(ChildNode::Text),
                _ => None,
            })
            .collect()
    }

    fn parent(&self, element: &Element) -> Option<Element> {
        element.parent_element()
    }

    fn bounding_box(&self, element: &Element) -> Option<Rect> {
        let r = element.get_bounding_client_rect();
        Some(Rect::new(r.x(), r.y(), r.width(), r.height()))
    }

    fn is_connected(&self, element: &Element) -> bool {
        element.is_connected()
    }

    fn click(&self, element: &Element) {
        match element.dyn_ref::<HtmlElement>() {
            Some(html) => html.click(),
            None => log::warn!("cannot click non-HTML element <{}>", element.tag_name()),
        }
    }

    fn class_name(&self, element: &Element) -> String {
        element.class_name()
    }

    fn is_host_managed(&self, element: &Element) -> bool {
        matches!(element.closest(HOST_MANAGED_ROOTS), Ok(Some(_)))
    }
}
