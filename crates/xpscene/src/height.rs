//! Building height and level count from OSM tags, falling back to
//! footprint geometry.
//!
//! Height and levels are resolved by two independent ordered rule lists.
//! Each rule either answers or defers to the next one. Once both are known
//! a multi-level building is forced to `level_count × 3.0` metres.

use std::collections::BTreeMap;

use crate::config::RunConfig;

pub type WayTags = BTreeMap<String, String>;

pub const FEET_TO_METRES: f64 = 0.3048;
pub const LEVEL_HEIGHT_M: f64 = 3.0;
pub const STANDARD_LEVEL_KEY: &str = "building:levels";

/// What the rules get to look at for one way.
#[derive(Debug, Clone, Copy)]
pub struct WayContext<'a> {
    pub tags: &'a WayTags,
    pub longest_edge: f64,
    pub perimeter: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightResolution {
    /// Metres, always `> 0`.
    pub height: f64,
    /// Always `>= 1`.
    pub level_count: u32,
}

pub trait HeightRule {
    fn name(&self) -> &'static str;
    fn resolve(&self, way: &WayContext<'_>) -> Option<f64>;
}

pub trait LevelRule {
    fn name(&self) -> &'static str;
    fn resolve(&self, way: &WayContext<'_>) -> Option<u32>;
}

/// Tallest level count taken from a tag; anything above is treated as junk.
pub const MAX_LEVEL_COUNT: u32 = 200;

/// A height tag value as written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeightTag {
    /// Plain decimal metres.
    Metres(f64),
    /// Quote-delimited feet/inches; only the first token counts, so `30'6"`
    /// is 30 ft.
    Feet(f64),
}

impl HeightTag {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(metres) = value.parse::<f64>() {
            return Some(HeightTag::Metres(metres));
        }

        let tokens = value
            .split(['\'', '"'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        tokens.first().map(|&feet| HeightTag::Feet(feet))
    }

    pub fn metres(self) -> f64 {
        match self {
            HeightTag::Metres(metres) => metres,
            HeightTag::Feet(feet) => feet * FEET_TO_METRES,
        }
    }
}

pub fn parse_levels(value: &str) -> Option<u32> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|n| (1..=MAX_LEVEL_COUNT).contains(n))
}

/// Walks every configured key in order. A decimal value replaces the height
/// so far, an unparseable one resets it, and a feet value ends the walk.
/// Only a positive result counts.
pub struct ExplicitHeightTag {
    pub keys: Vec<String>,
}

impl HeightRule for ExplicitHeightTag {
    fn name(&self) -> &'static str {
        "height tag"
    }

    fn resolve(&self, way: &WayContext<'_>) -> Option<f64> {
        let mut height = 0.0_f64;
        for value in self.keys.iter().filter_map(|key| way.tags.get(key)) {
            match HeightTag::parse(value) {
                Some(tag @ HeightTag::Feet(_)) => {
                    height = tag.metres();
                    break;
                }
                Some(tag) => height = tag.metres(),
                None => height = 0.0,
            }
        }

        (height.is_finite() && height > 0.0).then_some(height)
    }
}

/// Longest-edge tiers, then perimeter tiers which win whenever they match.
pub struct GeometryHeuristic;

impl GeometryHeuristic {
    pub fn estimate(longest_edge: f64, perimeter: f64) -> f64 {
        let by_edge = if longest_edge > 20.0 {
            9.0
        } else if longest_edge > 12.0 {
            6.0
        } else if longest_edge > 8.0 {
            3.5
        } else {
            2.5
        };

        if perimeter > 150.0 {
            9.0
        } else if perimeter > 80.0 {
            6.0
        } else {
            by_edge
        }
    }
}

impl HeightRule for GeometryHeuristic {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn resolve(&self, way: &WayContext<'_>) -> Option<f64> {
        Some(Self::estimate(way.longest_edge, way.perimeter))
    }
}

/// First configured level key that is present. A present but unusable value
/// still ends the search; the standard tag is tried next.
pub struct ConfiguredLevelKeys {
    pub keys: Vec<String>,
}

impl LevelRule for ConfiguredLevelKeys {
    fn name(&self) -> &'static str {
        "level keys"
    }

    fn resolve(&self, way: &WayContext<'_>) -> Option<u32> {
        self.keys
            .iter()
            .find_map(|key| way.tags.get(key))
            .and_then(|value| parse_levels(value))
    }
}

pub struct StandardLevelTag;

impl LevelRule for StandardLevelTag {
    fn name(&self) -> &'static str {
        STANDARD_LEVEL_KEY
    }

    fn resolve(&self, way: &WayContext<'_>) -> Option<u32> {
        way.tags.get(STANDARD_LEVEL_KEY).and_then(|v| parse_levels(v))
    }
}

pub struct HeightResolver {
    height_rules: Vec<Box<dyn HeightRule>>,
    level_rules: Vec<Box<dyn LevelRule>>,
}

impl HeightResolver {
    pub fn new(height_rules: Vec<Box<dyn HeightRule>>, level_rules: Vec<Box<dyn LevelRule>>) -> Self {
        Self {
            height_rules,
            level_rules,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(
            vec![
                Box::new(ExplicitHeightTag {
                    keys: config.height_keys_list.clone(),
                }),
                Box::new(GeometryHeuristic),
            ],
            vec![
                Box::new(ConfiguredLevelKeys {
                    keys: config.level_keys_list.clone(),
                }),
                Box::new(StandardLevelTag),
            ],
        )
    }

    pub fn resolve(&self, way: &WayContext<'_>) -> HeightResolution {
        let height = self
            .height_rules
            .iter()
            .find_map(|rule| {
                let height = rule.resolve(way)?;
                log::debug!("height {height:.2} m from {}", rule.name());
                Some(height)
            })
            .unwrap_or_else(|| GeometryHeuristic::estimate(way.longest_edge, way.perimeter));

        let level_count = self
            .level_rules
            .iter()
            .find_map(|rule| rule.resolve(way))
            .unwrap_or(1);

        let height = if level_count > 1 {
            level_count as f64 * LEVEL_HEIGHT_M
        } else {
            height
        };

        HeightResolution {
            height,
            level_count,
        }
    }
}

/// Keeps tags whose key matches one of the patterns; `build*` is a prefix.
#[derive(Debug, Clone)]
pub struct KeyRule {
    patterns: Vec<String>,
}

impl KeyRule {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.to_vec(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> WayTags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn resolver(level_keys: &[&str]) -> HeightResolver {
        HeightResolver::new(
            vec![
                Box::new(ExplicitHeightTag {
                    keys: vec!["height".into(), "building:height".into()],
                }),
                Box::new(GeometryHeuristic),
            ],
            vec![
                Box::new(ConfiguredLevelKeys {
                    keys: level_keys.iter().map(|k| k.to_string()).collect(),
                }),
                Box::new(StandardLevelTag),
            ],
        )
    }

    fn context(tags: &WayTags, longest_edge: f64, perimeter: f64) -> WayContext<'_> {
        WayContext {
            tags,
            longest_edge,
            perimeter,
        }
    }

    fn height_of(value: &str) -> Option<f64> {
        HeightTag::parse(value).map(HeightTag::metres)
    }

    #[test]
    fn heights_parse() {
        assert_eq!(height_of("12.5"), Some(12.5));
        assert_eq!(height_of(" 7 "), Some(7.0));
        assert_eq!(HeightTag::parse("30'6\""), Some(HeightTag::Feet(30.0)));
        assert!((height_of("30'6\"").unwrap() - 30.0 * FEET_TO_METRES).abs() < 1e-12);
        assert!((height_of("20'").unwrap() - 6.096).abs() < 1e-12);
        assert_eq!(height_of("-3"), Some(-3.0));
        assert_eq!(height_of("tall"), None);
        assert_eq!(height_of("12 m"), None);
        assert_eq!(height_of("''"), None);
    }

    #[test]
    fn levels_parse_within_bounds() {
        assert_eq!(parse_levels("3"), Some(3));
        assert_eq!(parse_levels("0"), None);
        assert_eq!(parse_levels("-2"), None);
        assert_eq!(parse_levels("2.5"), None);
        assert_eq!(parse_levels("200"), Some(MAX_LEVEL_COUNT));
        assert_eq!(parse_levels("201"), None);
        assert_eq!(parse_levels("99999999"), None);
    }

    #[test]
    fn absurd_level_tag_falls_back_to_geometry() {
        let t = tags(&[("building:levels", "99999999")]);
        let out = resolver(&[]).resolve(&context(&t, 10.0, 32.0));
        assert_eq!(
            out,
            HeightResolution {
                height: 3.5,
                level_count: 1
            }
        );
    }

    #[test]
    fn geometry_tiers() {
        assert_eq!(GeometryHeuristic::estimate(25.0, 60.0), 9.0);
        assert_eq!(GeometryHeuristic::estimate(13.0, 40.0), 6.0);
        assert_eq!(GeometryHeuristic::estimate(10.0, 32.0), 3.5);
        assert_eq!(GeometryHeuristic::estimate(8.0, 32.0), 2.5);
        // perimeter tier overrides the edge tier
        assert_eq!(GeometryHeuristic::estimate(25.0, 90.0), 6.0);
        assert_eq!(GeometryHeuristic::estimate(5.0, 160.0), 9.0);
    }

    #[test]
    fn untagged_rectangle() {
        let empty = WayTags::new();
        let out = resolver(&[]).resolve(&context(&empty, 10.0, 32.0));
        assert_eq!(
            out,
            HeightResolution {
                height: 3.5,
                level_count: 1
            }
        );
    }

    #[test]
    fn height_tag_beats_geometry() {
        let t = tags(&[("height", "14")]);
        let out = resolver(&[]).resolve(&context(&t, 10.0, 32.0));
        assert_eq!(out.height, 14.0);
        assert_eq!(out.level_count, 1);
    }

    #[test]
    fn unusable_height_falls_through_to_next_key() {
        let t = tags(&[("height", "unknown"), ("building:height", "11")]);
        let out = resolver(&[]).resolve(&context(&t, 10.0, 32.0));
        assert_eq!(out.height, 11.0);
    }

    #[test]
    fn last_decimal_height_key_wins() {
        let t = tags(&[("height", "14"), ("building:height", "11")]);
        let out = resolver(&[]).resolve(&context(&t, 10.0, 32.0));
        assert_eq!(out.height, 11.0);
    }

    #[test]
    fn later_unusable_height_resets_to_geometry() {
        let t = tags(&[("height", "14"), ("building:height", "tall")]);
        let out = resolver(&[]).resolve(&context(&t, 10.0, 32.0));
        assert_eq!(out.height, 3.5);
    }

    #[test]
    fn feet_height_ends_the_walk() {
        let t = tags(&[("height", "40'"), ("building:height", "11")]);
        let out = resolver(&[]).resolve(&context(&t, 10.0, 32.0));
        assert!((out.height - 40.0 * FEET_TO_METRES).abs() < 1e-12);
    }

    #[test]
    fn non_positive_height_is_ignored() {
        let t = tags(&[("height", "0")]);
        let out = resolver(&[]).resolve(&context(&t, 25.0, 60.0));
        assert_eq!(out.height, 9.0);
    }

    #[test]
    fn levels_override_height() {
        let t = tags(&[("height", "40"), ("building:levels", "4")]);
        let out = resolver(&[]).resolve(&context(&t, 30.0, 200.0));
        assert_eq!(out.level_count, 4);
        assert_eq!(out.height, 12.0);
    }

    #[test]
    fn configured_level_key_comes_first() {
        let t = tags(&[("levels", "2"), ("building:levels", "5")]);
        let out = resolver(&["levels"]).resolve(&context(&t, 10.0, 32.0));
        assert_eq!(out.level_count, 2);
        assert_eq!(out.height, 6.0);
    }

    #[test]
    fn invalid_levels_fall_back() {
        let t = tags(&[("levels", "0"), ("building:levels", "3")]);
        let out = resolver(&["levels"]).resolve(&context(&t, 10.0, 32.0));
        assert_eq!(out.level_count, 3);

        let t = tags(&[("building:levels", "lots")]);
        let out = resolver(&[]).resolve(&context(&t, 10.0, 32.0));
        assert_eq!(out.level_count, 1);
        assert_eq!(out.height, 3.5);
    }

    #[test]
    fn key_rule_prefix() {
        let rule = KeyRule::new(&["build*".to_owned(), "height".to_owned()]);
        assert!(rule.matches("building"));
        assert!(rule.matches("building:levels"));
        assert!(rule.matches("height"));
        assert!(!rule.matches("min_height"));
        assert!(!rule.matches("name"));
    }
}
