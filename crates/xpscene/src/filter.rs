//! Admission control for ways, evaluated in a fixed order.

use std::fmt;

use crate::config::RunConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterInput {
    /// 1-based position among the ways looked at so far, resumed ones included.
    pub position: usize,
    pub longest_edge: f64,
    pub perimeter: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Admit,
    Skip(SkipReason),
    /// Processing limit reached; no further ways are looked at.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    EveryNth { n: u32 },
    WallTooLong { edge: f64, max: f64 },
    PerimeterAbove { perimeter: f64, bound: f64 },
    PerimeterBelow { perimeter: f64, bound: f64 },
    PerimeterOutside { perimeter: f64, low: f64, high: f64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EveryNth { n } => write!(f, "every {n}th mesh is dropped"),
            SkipReason::WallTooLong { edge, max } => {
                write!(f, "wall {edge:.2} m exceeds {max:.2} m")
            }
            SkipReason::PerimeterAbove { perimeter, bound } => {
                write!(f, "perimeter {perimeter:.2} m > {bound:.2} m")
            }
            SkipReason::PerimeterBelow { perimeter, bound } => {
                write!(f, "perimeter {perimeter:.2} m < {bound:.2} m")
            }
            SkipReason::PerimeterOutside {
                perimeter,
                low,
                high,
            } => write!(f, "perimeter {perimeter:.2} m outside [{low:.2}, {high:.2}]"),
        }
    }
}

/// One gate. `None` lets the way through to the next rule.
pub trait FilterRule {
    fn check(&self, input: &FilterInput) -> Option<FilterVerdict>;
}

pub struct ProcessingLimit(pub usize);

impl FilterRule for ProcessingLimit {
    fn check(&self, input: &FilterInput) -> Option<FilterVerdict> {
        (input.position > self.0).then_some(FilterVerdict::Stop)
    }
}

pub struct EveryNth(pub u32);

impl FilterRule for EveryNth {
    fn check(&self, input: &FilterInput) -> Option<FilterVerdict> {
        let n = self.0 as usize;
        (n > 0 && input.position % n == 0)
            .then_some(FilterVerdict::Skip(SkipReason::EveryNth { n: self.0 }))
    }
}

pub struct MaxWallLength(pub f64);

impl FilterRule for MaxWallLength {
    fn check(&self, input: &FilterInput) -> Option<FilterVerdict> {
        (input.longest_edge > self.0).then_some(FilterVerdict::Skip(SkipReason::WallTooLong {
            edge: input.longest_edge,
            max: self.0,
        }))
    }
}

pub struct PerimeterAbove(pub f64);

impl FilterRule for PerimeterAbove {
    fn check(&self, input: &FilterInput) -> Option<FilterVerdict> {
        (input.perimeter > self.0).then_some(FilterVerdict::Skip(SkipReason::PerimeterAbove {
            perimeter: input.perimeter,
            bound: self.0,
        }))
    }
}

pub struct PerimeterBelow(pub f64);

impl FilterRule for PerimeterBelow {
    fn check(&self, input: &FilterInput) -> Option<FilterVerdict> {
        (input.perimeter < self.0).then_some(FilterVerdict::Skip(SkipReason::PerimeterBelow {
            perimeter: input.perimeter,
            bound: self.0,
        }))
    }
}

/// Inclusive `[low, high]`.
pub struct PerimeterBetween {
    pub low: f64,
    pub high: f64,
}

impl FilterRule for PerimeterBetween {
    fn check(&self, input: &FilterInput) -> Option<FilterVerdict> {
        let inside = (self.low..=self.high).contains(&input.perimeter);
        (!inside).then_some(FilterVerdict::Skip(SkipReason::PerimeterOutside {
            perimeter: input.perimeter,
            low: self.low,
            high: self.high,
        }))
    }
}

pub struct FilterPipeline {
    rules: Vec<Box<dyn FilterRule>>,
}

impl FilterPipeline {
    pub fn new(rules: Vec<Box<dyn FilterRule>>) -> Self {
        Self { rules }
    }

    /// Builds the chain from config; zero-valued bounds are left out.
    pub fn from_config(config: &RunConfig) -> Self {
        let mut rules: Vec<Box<dyn FilterRule>> = vec![Box::new(ProcessingLimit(config.limit))];

        if let Some(n) = config.filter_out_every_nth_mesh {
            rules.push(Box::new(EveryNth(n)));
        }
        if config.max_wall_length > 0.0 {
            rules.push(Box::new(MaxWallLength(config.max_wall_length)));
        }
        if config.filter_out_obj_with_perimeter_greater_than > 0.0 {
            rules.push(Box::new(PerimeterAbove(
                config.filter_out_obj_with_perimeter_greater_than,
            )));
        }
        if config.filter_out_obj_with_perimeter_less_than > 0.0 {
            rules.push(Box::new(PerimeterBelow(
                config.filter_out_obj_with_perimeter_less_than,
            )));
        }
        if let Some((low, high)) = config.perimeter_between() {
            rules.push(Box::new(PerimeterBetween { low, high }));
        }

        Self::new(rules)
    }

    pub fn evaluate(&self, input: &FilterInput) -> FilterVerdict {
        self.rules
            .iter()
            .find_map(|rule| rule.check(input))
            .unwrap_or(FilterVerdict::Admit)
    }
}
