//! Small accessors over KDL nodes.
//!
//! Entries are written as child nodes with positional arguments:
//! `poll-interval-ms 500` or `challenges "http-01" "dns-01"`.

use ::kdl::{KdlNode, KdlValue};

/// All positional (unnamed) argument values of a node
fn args(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| e.value())
}

/// Find a direct child node by name
fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|n| n.name().value() == name)
}

/// First positional argument as a string
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    args(node).next()?.as_string().map(str::to_string)
}

/// All positional string arguments of a node
pub fn get_string_args(node: &KdlNode) -> Vec<String> {
    args(node)
        .filter_map(|v| v.as_string())
        .map(str::to_string)
        .collect()
}

/// String value of child entry `name`
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    get_first_arg_string(child(node, name)?)
}

/// All string values of child entry `name`
pub fn get_string_list(node: &KdlNode, name: &str) -> Option<Vec<String>> {
    child(node, name).map(get_string_args)
}

/// Integer value of child entry `name`
pub fn get_int_entry(node: &KdlNode, name: &str) -> Option<i128> {
    args(child(node, name)?).next()?.as_integer()
}

/// Names of the children of `node` that are not in `known`
pub fn unknown_children<'a>(node: &'a KdlNode, known: &[&str]) -> Vec<&'a str> {
    node.children()
        .map(|doc| {
            doc.nodes()
                .iter()
                .map(|n| n.name().value())
                .filter(|name| !known.contains(name))
                .collect()
        })
        .unwrap_or_default()
}
