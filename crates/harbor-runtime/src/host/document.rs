//! HTML documents behind `LoadDoc` and its jQuery-like selections.
//!
//! Parsed trees are not `Send`, so each document is kept as source text and
//! re-parsed per operation. A selection is a list of node positions in
//! document order over every node of the tree (elements and text), which
//! stays stable across parses of the same text.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Value, json};

use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

type NodeRef<'a> = <ElementRef<'a> as std::ops::Deref>::Target;

/// Identity of a node inside one parsed tree.
fn node_key(node: NodeRef<'_>) -> usize {
    std::ptr::from_ref(node.value()).addr()
}

/// One parsed document plus its position index.
struct Parsed {
    html: Html,
}

impl Parsed {
    fn new(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
        }
    }

    fn order(&self) -> Vec<NodeRef<'_>> {
        self.html.tree.root().descendants().collect()
    }
}

struct Index<'a> {
    nodes: Vec<NodeRef<'a>>,
    positions: HashMap<usize, usize>,
}

impl<'a> Index<'a> {
    fn new(parsed: &'a Parsed) -> Self {
        let nodes = parsed.order();
        let positions = nodes.iter().enumerate().map(|(i, n)| (node_key(*n), i)).collect();
        Self { nodes, positions }
    }

    fn pos(&self, node: NodeRef<'a>) -> Option<usize> {
        self.positions.get(&node_key(node)).copied()
    }

    fn get(&self, i: usize) -> Option<NodeRef<'a>> {
        self.nodes.get(i).copied()
    }

    /// Resolve a selection; `None` means the document root.
    fn selection(&self, positions: Option<&[usize]>) -> Vec<NodeRef<'a>> {
        match positions {
            Some(list) => list.iter().filter_map(|i| self.get(*i)).collect(),
            None => self.nodes.first().copied().into_iter().collect(),
        }
    }

    fn collect(&self, nodes: impl IntoIterator<Item = NodeRef<'a>>) -> Value {
        let set: BTreeSet<usize> = nodes.into_iter().filter_map(|n| self.pos(n)).collect();
        json!(set.into_iter().collect::<Vec<_>>())
    }
}

fn matches(selector: Option<&Selector>, node: NodeRef<'_>) -> bool {
    match (selector, ElementRef::wrap(node)) {
        (None, _) => true,
        (Some(sel), Some(el)) => sel.matches(&el),
        (Some(_), None) => false,
    }
}

fn is_element(node: NodeRef<'_>) -> bool {
    node.value().is_element()
}

fn node_text(node: NodeRef<'_>) -> String {
    match node.value() {
        Node::Text(t) => String::from(&**t),
        _ => ElementRef::wrap(node)
            .map(|e| e.text().collect::<String>())
            .unwrap_or_else(|| {
                node.descendants()
                    .filter_map(|d| d.value().as_text().map(|t| String::from(&**t)))
                    .collect()
            }),
    }
}

/// `LoadDoc` documents of one interpreter.
#[derive(Default)]
pub(crate) struct DocumentModule {
    documents: DashMap<u64, String>,
    next_id: AtomicU64,
}

impl DocumentModule {
    fn source(&self, args: &Args<'_>) -> RuntimeResult<String> {
        let id = args.u64(0)?;
        self.documents
            .get(&id)
            .map(|d| d.value().clone())
            .ok_or_else(|| RuntimeError::invalid_argument(args.op(), format!("document {id} was released")))
    }

    fn selector(args: &Args<'_>, i: usize) -> RuntimeResult<Option<Selector>> {
        match args.opt_str(i).filter(|s| !s.trim().is_empty()) {
            None => Ok(None),
            Some(s) => Selector::parse(s)
                .map(Some)
                .map_err(|e| RuntimeError::invalid_argument(args.op(), format!("selector {s:?}: {e}"))),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn query(&self, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        let source = self.source(args)?;
        let parsed = Parsed::new(&source);
        let index = Index::new(&parsed);
        let positions: Option<Vec<usize>> = match args.value(1) {
            Value::Null => None,
            _ => Some(args.decode(1)?),
        };
        let selection = index.selection(positions.as_deref());
        let selector = Self::selector(args, 2)?;
        let sel = selector.as_ref();

        let out = match method {
            "find" => index.collect(
                selection
                    .iter()
                    .flat_map(|n| n.descendants().skip(1))
                    .filter(|n| is_element(*n) && sel.is_some_and(|_| matches(sel, *n))),
            ),
            "children" => index.collect(
                selection
                    .iter()
                    .flat_map(|n| n.children())
                    .filter(|n| is_element(*n) && matches(sel, *n)),
            ),
            "contents" => index.collect(
                selection
                    .iter()
                    .flat_map(|n| n.children())
                    .filter(|n| sel.is_none() || matches(sel, *n)),
            ),
            "parent" => index.collect(
                selection
                    .iter()
                    .filter_map(|n| n.parent())
                    .filter(|n| is_element(*n) && matches(sel, *n)),
            ),
            "parents" => index.collect(
                selection
                    .iter()
                    .flat_map(|n| n.ancestors())
                    .filter(|n| is_element(*n) && matches(sel, *n)),
            ),
            "closest" => index.collect(selection.iter().filter_map(|n| {
                std::iter::once(*n)
                    .chain(n.ancestors())
                    .find(|a| is_element(*a) && matches(sel, *a))
            })),
            "next" => index.collect(
                selection
                    .iter()
                    .filter_map(|n| n.next_siblings().find(|s| is_element(*s)))
                    .filter(|n| matches(sel, *n)),
            ),
            "prev" => index.collect(
                selection
                    .iter()
                    .filter_map(|n| n.prev_siblings().find(|s| is_element(*s)))
                    .filter(|n| matches(sel, *n)),
            ),
            "siblings" => index.collect(selection.iter().flat_map(|n| {
                let me = node_key(*n);
                n.parent()
                    .into_iter()
                    .flat_map(|p| p.children())
                    .filter(move |s| node_key(*s) != me && is_element(*s) && matches(sel, *s))
            })),
            "filter" => index.collect(selection.iter().copied().filter(|n| matches(sel, *n))),
            "not" => index.collect(selection.iter().copied().filter(|n| !matches(sel, *n))),
            "is" => json!(selection.iter().any(|n| sel.is_some() && matches(sel, *n))),
            "has" => index.collect(selection.iter().copied().filter(|n| {
                n.descendants()
                    .skip(1)
                    .any(|d| is_element(d) && sel.is_some() && matches(sel, d))
            })),
            "text" => json!(selection.iter().map(|n| node_text(*n)).collect::<String>()),
            "html" => json!(selection.first().and_then(|n| ElementRef::wrap(*n)).map(|e| e.inner_html())),
            "outerHtml" => json!(selection.first().and_then(|n| ElementRef::wrap(*n)).map(|e| e.html())),
            "attr" => {
                let name = args.str(2)?;
                json!(selection
                    .iter()
                    .find_map(|n| n.value().as_element())
                    .and_then(|e| e.attr(name)))
            },
            "attrs" => {
                let attrs: serde_json::Map<String, Value> = selection
                    .iter()
                    .find_map(|n| n.value().as_element())
                    .map(|e| e.attrs().map(|(k, v)| (k.to_string(), json!(v))).collect())
                    .unwrap_or_default();
                Value::Object(attrs)
            },
            "nodes" => json!(selection
                .iter()
                .map(|n| match n.value() {
                    Node::Element(e) => json!({ "type": "element", "name": e.name() }),
                    Node::Text(_) => json!({ "type": "text" }),
                    Node::Comment(_) => json!({ "type": "comment" }),
                    _ => json!({ "type": "other" }),
                })
                .collect::<Vec<_>>()),
            _ => return Err(unknown_method("doc", method)),
        };
        Ok(out)
    }
}

impl HostModule for DocumentModule {
    fn namespace(&self) -> &'static str {
        "doc"
    }

    fn call(&self, _cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        match method {
            "load" => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                self.documents.insert(id, args.str(0)?.to_string());
                Ok(json!(id))
            },
            "release" => {
                self.documents.remove(&args.u64(0)?);
                Ok(Value::Null)
            },
            _ => self.query(method, args),
        }
    }

    fn shutdown(&self) {
        self.documents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing;
    use harbor_core::PermissionManifest;
    use std::sync::Arc;

    const PAGE: &str = r#"<html><body>
        <ul id="results">
          <li class="item" data-id="1"><a href="/a">Naruto</a></li>
          <li class="item hot" data-id="2"><a href="/b">Bleach</a></li>
          <li class="item" data-id="3"><span>One Piece</span></li>
        </ul>
        </body></html>"#;

    struct Doc {
        module: Arc<DocumentModule>,
        cx: HostContext,
        id: Value,
    }

    impl Doc {
        fn new() -> Self {
            let module = Arc::new(DocumentModule::default());
            let cx = testing::context(&PermissionManifest::default());
            let id = testing::call(module.clone(), &cx, "doc.load", json!([PAGE])).unwrap();
            Self { module, cx, id }
        }

        fn op(&self, method: &str, nodes: Value, extra: Value) -> Value {
            testing::call(
                self.module.clone(),
                &self.cx,
                &format!("doc.{method}"),
                json!([self.id, nodes, extra]),
            )
            .unwrap()
        }
    }

    #[test]
    fn test_find_text_attr() {
        let doc = Doc::new();
        let items = doc.op("find", Value::Null, json!("li.item"));
        assert_eq!(items.as_array().unwrap().len(), 3);
        let hot = doc.op("filter", items.clone(), json!(".hot"));
        assert_eq!(doc.op("attr", hot.clone(), json!("data-id")), "2");
        assert_eq!(doc.op("text", hot.clone(), Value::Null), "Bleach");
        let links = doc.op("find", items.clone(), json!("a"));
        assert_eq!(links.as_array().unwrap().len(), 2);
        assert_eq!(doc.op("is", hot, json!("li")), true);
        let with_links = doc.op("has", items, json!("a"));
        assert_eq!(with_links.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_traversal() {
        let doc = Doc::new();
        let span = doc.op("find", Value::Null, json!("span"));
        let li = doc.op("closest", span.clone(), json!("li"));
        assert_eq!(doc.op("attr", li.clone(), json!("data-id")), "3");
        let prev = doc.op("prev", li.clone(), Value::Null);
        assert_eq!(doc.op("attr", prev, json!("data-id")), "2");
        let siblings = doc.op("siblings", li.clone(), Value::Null);
        assert_eq!(siblings.as_array().unwrap().len(), 2);
        let ul = doc.op("parent", li, Value::Null);
        assert_eq!(doc.op("attr", ul.clone(), json!("id")), "results");
        assert!(doc.op("html", span, Value::Null).as_str().unwrap().contains("One Piece"));
    }

    #[test]
    fn test_bad_selector_is_invalid_argument() {
        let doc = Doc::new();
        let err = testing::call(
            doc.module.clone(),
            &doc.cx,
            "doc.find",
            json!([doc.id, null, "li[["]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Other);
    }
}
