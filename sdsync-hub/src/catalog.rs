//! Program catalog lookup
//!
//! Read-only collaborator that supplies a session's display metadata. The hub
//! only ever reads from it.

use std::collections::HashMap;

use sdsync_common::TrackRef;

use crate::config::ProgramConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub display_name: String,
    pub cover_image: Option<String>,
    pub track_list: Vec<TrackRef>,
}

pub trait Catalog: Send + Sync {
    fn lookup(&self, program_id: &str) -> Option<CatalogEntry>;
}

/// In-memory catalog built from the `[[programs]]` config table
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_programs(programs: &[ProgramConfig]) -> Self {
        let mut catalog = Self::new();
        for program in programs {
            catalog.insert(
                program.id.clone(),
                CatalogEntry {
                    display_name: program.display_name.clone(),
                    cover_image: program.cover_image.clone(),
                    track_list: program.tracks.clone(),
                },
            );
        }
        catalog
    }

    pub fn insert(&mut self, program_id: impl Into<String>, entry: CatalogEntry) {
        self.entries.insert(program_id.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Catalog for StaticCatalog {
    fn lookup(&self, program_id: &str) -> Option<CatalogEntry> {
        self.entries.get(program_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_from_programs() {
        let catalog = StaticCatalog::from_programs(&[ProgramConfig {
            id: "yoga".to_string(),
            display_name: "Morning Yoga".to_string(),
            cover_image: None,
            tracks: vec![TrackRef::new("a.mp3")],
        }]);

        let entry = catalog.lookup("yoga").unwrap();
        assert_eq!(entry.display_name, "Morning Yoga");
        assert_eq!(entry.track_list.len(), 1);
        assert!(catalog.lookup("spin").is_none());
        assert_eq!(catalog.len(), 1);
    }
}
