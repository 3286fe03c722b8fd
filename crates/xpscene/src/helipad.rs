//! Helipad mode: one apt.dat heliport entry per OSM way.
//!
//! ```text
//! I
//! 1200 Generated by osm2dsf <version>
//!
//!
//! 17   0 0 0 <ID> <name>
//! 1302 <key> <value>
//! 102  H<n> <lat> <lon> 0 <size> <size> 2 0 0 0.00 0
//!
//! 99
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{Result, SceneryError};
use crate::geodesic::haversine_m;
use crate::osm::{Element, OverpassDocument};

pub const MAX_HELIPADS: usize = 99_999;
pub const MIN_PAD_SIZE_M: u32 = 10;
const MAX_NAME_CHARS: usize = 29;
/// Ramp names run `H1..H99`, then start over.
const RAMP_NAMES: usize = 99;

/// Lower-cased tag keys containing one of these go into `1302` metadata.
const META_KEY_FRAGMENTS: [&str; 6] = ["faa", "iata", "icao", "name:en", "emergency", "operator"];
const CODE_KEYS: [&str; 3] = ["faa_code", "iata_code", "icao_code"];

#[derive(Debug, Clone, PartialEq)]
pub struct Helipad {
    pub way_id: i64,
    /// `name` tag as written; empty when absent.
    pub name: String,
    /// Mean of the way's node coordinates, closing node included.
    pub center_lat: f64,
    pub center_lon: f64,
    /// Side of the square pad: the longest edge in whole metres, at least 10.
    pub size_m: u32,
    /// `1302` pairs in output order, `name` first.
    pub meta: Vec<(String, String)>,
}

impl Helipad {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set_meta(&mut self, key: String, value: &str) {
        match self.meta.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value.to_owned(),
            None => self.meta.push((key, value.to_owned())),
        }
    }

    pub fn has_code(&self) -> bool {
        CODE_KEYS.iter().any(|key| self.meta(key).is_some())
    }

    /// First published FAA/IATA/ICAO code, else `local_id`; upper-cased.
    pub fn airport_id(&self, local_id: &str) -> String {
        CODE_KEYS
            .iter()
            .find_map(|key| self.meta(key))
            .unwrap_or(local_id)
            .to_uppercase()
    }
}

/// Every way with at least one known node, in document order.
pub fn collect_helipads(doc: &OverpassDocument) -> Vec<Helipad> {
    let lookup: HashMap<i64, (f64, f64)> = doc
        .elements
        .iter()
        .filter_map(|element| match element {
            Element::Node { id, lat, lon } => Some((*id, (*lat, *lon))),
            _ => None,
        })
        .collect();

    doc.elements
        .iter()
        .filter_map(|element| match element {
            Element::Way { id, nodes, tags } => helipad_from_way(*id, nodes, tags, &lookup),
            _ => None,
        })
        .collect()
}

fn helipad_from_way(
    way_id: i64,
    node_ids: &[i64],
    tags: &BTreeMap<String, String>,
    lookup: &HashMap<i64, (f64, f64)>,
) -> Option<Helipad> {
    let coords: Vec<(f64, f64)> = node_ids
        .iter()
        .filter_map(|id| lookup.get(id).copied())
        .collect();
    if coords.is_empty() {
        log::warn!("way {way_id}: no known nodes, not a helipad");
        return None;
    }

    let count = coords.len() as f64;
    let center_lat = coords.iter().map(|c| c.0).sum::<f64>() / count;
    let center_lon = coords.iter().map(|c| c.1).sum::<f64>() / count;

    let longest = coords
        .windows(2)
        .map(|pair| haversine_m(pair[0].0, pair[0].1, pair[1].0, pair[1].1))
        .fold(0.0_f64, f64::max);

    let name = tags.get("name").cloned().unwrap_or_default();
    let mut pad = Helipad {
        way_id,
        meta: vec![("name".to_owned(), name.clone())],
        name,
        center_lat,
        center_lon,
        size_m: (longest.trunc() as u32).max(MIN_PAD_SIZE_M),
    };

    for (key, value) in tags {
        let key = key.to_lowercase();
        for fragment in META_KEY_FRAGMENTS {
            if !key.contains(fragment) {
                continue;
            }
            let meta_key = match fragment {
                "faa" => "faa_code".to_owned(),
                "iata" => "iata_code".to_owned(),
                "icao" => "icao_code".to_owned(),
                _ => key.clone(),
            };
            pad.set_meta(meta_key, value);
        }
    }

    Some(pad)
}

/// `XOX0001`..`XOX9999`, then `XO10000`..
pub fn local_id(seq: usize) -> String {
    if seq < 10_000 {
        format!("XOX{seq:04}")
    } else {
        format!("XO{seq:05}")
    }
}

/// `seq` is 1-based.
pub fn ramp_name(seq: usize) -> String {
    format!("H{}", (seq.max(1) - 1) % RAMP_NAMES + 1)
}

/// Capitalises the first letter of every run of letters and lower-cases
/// the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;

    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }

    out
}

pub fn display_name(name: &str, seq: usize) -> String {
    if name.is_empty() {
        format!("OSM To Xplane {seq}")
    } else {
        title_case(name).chars().take(MAX_NAME_CHARS).collect()
    }
}

pub fn render_apt_dat(helipads: &[Helipad]) -> Result<String> {
    if helipads.len() > MAX_HELIPADS {
        return Err(SceneryError::TooManyHelipads {
            count: helipads.len(),
            max: MAX_HELIPADS,
        });
    }

    let mut lines = vec![
        "I".to_owned(),
        format!("1200 Generated by osm2dsf {}", crate::VERSION),
        String::new(),
        String::new(),
    ];

    for (index, pad) in helipads.iter().enumerate() {
        let seq = index + 1;
        let local = local_id(seq);
        let id = pad.airport_id(&local);
        let name = display_name(&pad.name, seq);
        log::info!(
            "helipad {id} {name:?} at {:.6}, {:.6}",
            pad.center_lat,
            pad.center_lon
        );

        lines.push(format!("17   0 0 0 {id} {name}"));
        lines.extend(pad.meta.iter().map(|(k, v)| format!("1302 {k} {v}")));
        if !pad.has_code() {
            lines.push(format!("1302 local_code {local}"));
            lines.push("1302 gui_label 2D".to_owned());
            lines.push("1302 generated_by osm2dsf".to_owned());
        }
        lines.push(format!(
            "102  {} {} {} 0 {size} {size} 2 0 0 0.00 0",
            ramp_name(seq),
            pad.center_lat,
            pad.center_lon,
            size = pad.size_m
        ));
        lines.push(String::new());
    }

    lines.push("99".to_owned());
    let mut text = lines.join("\n");
    text.push('\n');
    Ok(text)
}

/// Writes the apt.dat and, when a scenery root is set, copies it there.
/// Returns the number of helipads written; none found writes nothing.
pub fn write_apt_dat(doc: &OverpassDocument, out: &Path, scenery_root: Option<&Path>) -> Result<usize> {
    let helipads = collect_helipads(doc);
    if helipads.is_empty() {
        log::warn!("no ways with known nodes; {} not written", out.display());
        return Ok(0);
    }

    fs::write(out, render_apt_dat(&helipads)?)?;
    log::info!("wrote {} helipads to {}", helipads.len(), out.display());

    if let (Some(root), Some(name)) = (scenery_root, out.file_name()) {
        let target = root.join(name);
        match fs::copy(out, &target) {
            Ok(_) => log::info!("copied {} to {}", out.display(), target.display()),
            Err(e) => log::warn!("failed to copy {} to {}: {e}", out.display(), root.display()),
        }
    }

    Ok(helipads.len())
}
