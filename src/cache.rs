//! A small cache of recently resolved node positions.
//!
//! Root-to-leaf descents dominate sequential reads (rendering consecutive
//! lines, iterating matches), so the engine remembers the last few
//! resolved nodes together with their absolute start offset and line.
//! Entries are validated lazily: each one carries the generation of the
//! node slot it points at, and any edit at or before a cached offset
//! evicts it.

use crate::tree::{NodeIdx, Tree};

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub node: NodeIdx,
    pub generation: u32,
    pub node_start_offset: usize,
    /// Set only by line lookups; offset lookups leave it `None`.
    pub node_start_line_number: Option<usize>,
}

pub(crate) struct SearchCache {
    limit: usize,
    entries: Vec<CacheEntry>,
}

impl SearchCache {
    pub fn new(limit: usize) -> SearchCache {
        SearchCache {
            limit,
            entries: Vec::new(),
        }
    }

    fn is_live(&self, tree: &Tree, entry: &CacheEntry) -> bool {
        tree.generation(entry.node) == entry.generation
    }

    /// Entry whose piece covers `offset`, if any.
    pub fn get(&self, tree: &Tree, offset: usize) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| {
            self.is_live(tree, e)
                && e.node_start_offset <= offset
                && e.node_start_offset + tree[e.node].piece.length >= offset
        })
    }

    /// Entry whose piece covers `line`, if any. Only entries created by
    /// line lookups qualify.
    pub fn get_by_line(&self, tree: &Tree, line: usize) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| {
            self.is_live(tree, e)
                && e.node_start_line_number.is_some_and(|start| {
                    start < line && start + tree[e.node].piece.line_feed_cnt >= line
                })
        })
    }

    pub fn insert(&mut self, entry: CacheEntry) {
        if self.entries.len() >= self.limit {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    /// Drops every entry an edit at `offset` could have invalidated:
    /// detached nodes and nodes starting at or after `offset`.
    pub fn validate(&mut self, tree: &Tree, offset: usize) {
        self.entries
            .retain(|e| tree.generation(e.node) == e.generation && e.node_start_offset < offset);
    }
}
