//! Product catalog seam.
//!
//! WhatsApp keeps rich `{id, name}` selection objects while web works with
//! flat ids; rebuilding the objects during normalization needs a name lookup.
//! The catalog itself lives outside this crate, so only the lookup crosses
//! the boundary.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Category,
    Business,
    Scale,
}

impl CatalogKind {
    pub fn label(&self) -> &'static str {
        match self {
            CatalogKind::Category => "Category",
            CatalogKind::Business => "Business",
            CatalogKind::Scale => "Scale",
        }
    }
}

pub trait CatalogLookup: Send + Sync {
    fn display_name(&self, kind: CatalogKind, id: &str) -> Option<String>;
}

/// Fixed-map catalog for the binary and tests.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    entries: HashMap<(CatalogKind, String), String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, kind: CatalogKind, id: &str, name: &str) -> Self {
        self.entries
            .insert((kind, id.to_string()), name.to_string());
        self
    }
}

impl CatalogLookup for StaticCatalog {
    fn display_name(&self, kind: CatalogKind, id: &str) -> Option<String> {
        self.entries.get(&(kind, id.to_string())).cloned()
    }
}
