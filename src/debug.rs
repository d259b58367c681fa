//! Level-order text dumps of trees and maps, for troubleshooting.
//!
//! Each depth starts on a `Level: N` line, followed by its nodes as
//! `[id: payload -> (left, right; r:bit)]`, with `nil` for a missing child.

use std::fmt::Write;

use crate::map::{Map, MapVisit};
use crate::tree::{NodeIndex, Order, Tree, Visit};

fn index_label(index: Option<NodeIndex>) -> String {
    match index {
        Some(i) => i.to_string(),
        None => "nil".to_string(),
    }
}

fn push_node(
    out: &mut String,
    index: NodeIndex,
    payload: &str,
    left: Option<NodeIndex>,
    right: Option<NodeIndex>,
    red: bool,
) {
    let _ = write!(
        out,
        "[{index}: {payload} -> ({}, {}; r:{})] ",
        index_label(left),
        index_label(right),
        u8::from(red)
    );
}

fn push_trailer(out: &mut String, levels: usize, nodes: usize, empty: &str) {
    if levels == 0 {
        out.push_str(empty);
    } else {
        let _ = writeln!(out, "\nlevels: {levels}, nodes: {nodes}");
    }
}

/// Dump `tree`, formatting each payload with `fmt_payload`.
pub fn render_tree<P, F>(tree: &Tree<P>, mut fmt_payload: F) -> String
where
    F: FnMut(&P) -> String,
{
    let mut out = String::new();
    let levels = tree.traverse(Order::LevelOrder, |visit| match visit {
        Visit::Level(depth) => {
            let _ = writeln!(out, "\nLevel: {depth}");
        }
        Visit::Node { index, node, .. } => {
            let payload = fmt_payload(node.payload());
            push_node(&mut out, index, &payload, node.left(), node.right(), node.is_red());
        }
    });
    push_trailer(&mut out, levels, tree.len(), "empty tree");
    out
}

/// Dump `map` with entries shown as `(key, value)`.
pub fn render_map(map: &Map) -> String {
    let mut out = String::new();
    let levels = map.traverse(Order::LevelOrder, |visit| match visit {
        MapVisit::Level(depth) => {
            let _ = writeln!(out, "\nLevel: {depth}");
        }
        MapVisit::Entry {
            index,
            key,
            value,
            left,
            right,
            red,
            ..
        } => {
            let payload = format!("({key}, {value})");
            push_node(&mut out, index, &payload, left, right, red);
        }
    });
    push_trailer(&mut out, levels, map.len(), "empty map");
    out
}
