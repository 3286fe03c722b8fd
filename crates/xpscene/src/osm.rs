//! Overpass JSON (`[out:json]`) document model.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct OverpassDocument {
    #[serde(default)]
    pub elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
    },
    Way {
        id: i64,
        #[serde(default)]
        nodes: Vec<i64>,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
    /// Relations, areas and anything else Overpass may emit.
    #[serde(other)]
    Other,
}

impl OverpassDocument {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Way ids in document order; this order drives the whole run.
    pub fn way_ids(&self) -> Vec<i64> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                Element::Way { id, nodes, .. } if !nodes.is_empty() => Some(*id),
                _ => None,
            })
            .collect()
    }
}
