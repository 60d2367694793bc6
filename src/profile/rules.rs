//! Declarative rule profile
//!
//! Profiles are YAML documents listing speeds per highway type, the access
//! tag hierarchy and value lists. Evaluation is plain table lookups, so it
//! is deterministic and has no side effects. See `profiles/car.yaml`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use butterfly_common::{Error, Result};
use serde::Deserialize;
use tracing::info;

use super::values::{parse_duration, parse_maxspeed};
use super::{Direction, EvaluationError, NodeAttributes, ProfileEvaluator, WayAttributes};
use crate::elements::Tags;

fn default_true() -> bool {
    true
}

/// On-disk profile definition
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileRules {
    pub name: String,

    /// highway value -> km/h
    pub speeds: BTreeMap<String, f64>,

    /// route value -> km/h (ferries, shuttle trains)
    #[serde(default)]
    pub route_speeds: BTreeMap<String, f64>,

    /// Access tags, most specific first
    #[serde(default)]
    pub access_tags: Vec<String>,

    #[serde(default)]
    pub access_blacklist: BTreeSet<String>,

    /// Access values that let a vehicle through a barrier
    #[serde(default)]
    pub access_whitelist: BTreeSet<String>,

    /// Access values that keep the way but flag it (destination, delivery)
    #[serde(default)]
    pub access_restricted: BTreeSet<String>,

    /// Barrier values that do not block
    #[serde(default)]
    pub barrier_whitelist: BTreeSet<String>,

    /// Vehicle classes whose `except=` tag voids a turn restriction
    #[serde(default)]
    pub restriction_exceptions: BTreeSet<String>,

    /// Highway values that are oneway unless tagged otherwise
    #[serde(default)]
    pub implied_oneway: BTreeSet<String>,

    /// route values excluded from the nearest-neighbour grid
    #[serde(default)]
    pub ignore_in_grid: BTreeSet<String>,

    #[serde(default = "default_true")]
    pub obey_oneway: bool,

    #[serde(default = "default_true")]
    pub ignore_areas: bool,

    #[serde(default = "default_true")]
    pub use_maxspeed: bool,
}

impl ProfileRules {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("profile name is empty".to_string());
        }
        if self.speeds.is_empty() {
            return Err("no highway speeds defined".to_string());
        }
        for (table, speeds) in [("speeds", &self.speeds), ("route_speeds", &self.route_speeds)] {
            for (key, speed) in speeds {
                if !speed.is_finite() || *speed <= 0.0 {
                    return Err(format!("{table}.{key}: speed must be positive, got {speed}"));
                }
            }
        }
        Ok(())
    }
}

/// Profile evaluator backed by [`ProfileRules`]
#[derive(Debug, Clone)]
pub struct RuleProfile {
    rules: ProfileRules,
}

impl RuleProfile {
    /// Load and validate a profile file. Any failure is fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::profile_load(path, e.to_string()))?;
        let profile = Self::from_yaml(&text, path)?;
        info!(
            profile = %profile.rules.name,
            highway_types = profile.rules.speeds.len(),
            "Loaded routing profile"
        );
        Ok(profile)
    }

    /// Parse a profile from YAML text; `origin` is used in error messages
    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self> {
        let rules: ProfileRules =
            serde_yaml::from_str(text).map_err(|e| Error::profile_load(origin, e.to_string()))?;
        rules
            .validate()
            .map_err(|reason| Error::profile_load(origin, reason))?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &ProfileRules {
        &self.rules
    }

    /// Value of the most specific access tag present
    fn access_value<'t>(&self, tags: &'t Tags) -> Option<&'t str> {
        self.rules
            .access_tags
            .iter()
            .find_map(|key| tags.get(key))
    }

    fn direction(&self, tags: &Tags, highway: Option<&str>, roundabout: bool) -> Direction {
        if !self.rules.obey_oneway {
            return Direction::Bidirectional;
        }
        match tags.get("oneway") {
            Some("yes" | "true" | "1") => Direction::Forward,
            Some("-1" | "reverse") => Direction::Reverse,
            Some("no" | "false" | "0") => Direction::Bidirectional,
            _ if roundabout => Direction::Forward,
            _ if highway.is_some_and(|h| self.rules.implied_oneway.contains(h)) => {
                Direction::Forward
            }
            _ => Direction::Bidirectional,
        }
    }

    fn maxspeed(tags: &Tags, key: &str) -> std::result::Result<Option<f64>, EvaluationError> {
        match tags.get(key) {
            Some(value) => parse_maxspeed(value),
            None => Ok(None),
        }
    }
}

impl ProfileEvaluator for RuleProfile {
    fn name(&self) -> &str {
        &self.rules.name
    }

    fn classify_way(&self, tags: &Tags) -> std::result::Result<Option<WayAttributes>, EvaluationError> {
        if self.rules.ignore_areas && tags.is("area", "yes") {
            return Ok(None);
        }

        let highway = tags.get("highway");
        let route = tags.get("route");

        let (base_speed, is_route) =
            if let Some(speed) = highway.and_then(|h| self.rules.speeds.get(h)) {
                (*speed, false)
            } else if let Some(speed) = route.and_then(|r| self.rules.route_speeds.get(r)) {
                (*speed, true)
            } else {
                return Ok(None);
            };

        let access = self.access_value(tags);
        if access.is_some_and(|a| self.rules.access_blacklist.contains(a)) {
            return Ok(None);
        }
        let access_restricted = access.is_some_and(|a| self.rules.access_restricted.contains(a));

        let mut forward_speed = base_speed;
        let mut backward_speed = base_speed;
        if self.rules.use_maxspeed && !is_route {
            let maxspeed = Self::maxspeed(tags, "maxspeed")?;
            if let Some(limit) = Self::maxspeed(tags, "maxspeed:forward")?.or(maxspeed) {
                forward_speed = forward_speed.min(limit);
            }
            if let Some(limit) = Self::maxspeed(tags, "maxspeed:backward")?.or(maxspeed) {
                backward_speed = backward_speed.min(limit);
            }
        }

        let duration = match tags.get("duration") {
            Some(value) if is_route => Some(parse_duration(value)?),
            _ => None,
        };

        let roundabout = tags.is("junction", "roundabout");
        let direction = self.direction(tags, highway, roundabout);

        let name = tags
            .get("name")
            .or_else(|| tags.get("ref"))
            .unwrap_or("")
            .to_string();

        Ok(Some(WayAttributes {
            forward_speed,
            backward_speed,
            duration,
            direction,
            roundabout,
            access_restricted,
            ignore_in_grid: is_route && route.is_some_and(|r| self.rules.ignore_in_grid.contains(r)),
            name,
        }))
    }

    fn classify_node(&self, tags: &Tags) -> std::result::Result<NodeAttributes, EvaluationError> {
        let access = self.access_value(tags);

        let barrier = if access.is_some_and(|a| self.rules.access_blacklist.contains(a)) {
            true
        } else {
            match tags.get("barrier") {
                Some(barrier) if !self.rules.barrier_whitelist.contains(barrier) => {
                    !access.is_some_and(|a| self.rules.access_whitelist.contains(a))
                }
                _ => false,
            }
        };

        Ok(NodeAttributes {
            barrier,
            traffic_signal: tags.is("highway", "traffic_signals"),
        })
    }

    fn restriction_applies(&self, tags: &Tags) -> bool {
        match tags.get("except") {
            Some(except) => !except
                .split(';')
                .map(str::trim)
                .any(|class| self.rules.restriction_exceptions.contains(class)),
            None => true,
        }
    }
}
