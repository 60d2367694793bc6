//! Routing profiles
//!
//! A profile decides, per primitive, whether it is routable and with which
//! attributes. The engine only talks to the [`ProfileEvaluator`] trait; the
//! shipped implementation is [`RuleProfile`], a declarative YAML rule set.

pub mod rules;
pub mod values;

use thiserror::Error;

use crate::elements::Tags;

pub use rules::RuleProfile;

/// Traversal direction of a classified way, relative to its node order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Bidirectional = 0,
    Forward = 1,
    Reverse = 2,
}

/// Attributes of an accepted way
#[derive(Debug, Clone, PartialEq)]
pub struct WayAttributes {
    /// Speed along the node order, km/h
    pub forward_speed: f64,
    /// Speed against the node order, km/h
    pub backward_speed: f64,
    /// Total traversal time in seconds; overrides speeds when set
    pub duration: Option<f64>,
    pub direction: Direction,
    pub roundabout: bool,
    pub access_restricted: bool,
    pub ignore_in_grid: bool,
    pub name: String,
}

/// Attributes of a node; every node gets one, routable or not
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeAttributes {
    pub barrier: bool,
    pub traffic_signal: bool,
}

/// Runtime failure while classifying a single primitive
///
/// Never fatal: the primitive is rejected and counted.
#[derive(Debug, Error, PartialEq)]
pub enum EvaluationError {
    #[error("unparsable {tag}={value}")]
    InvalidValue { tag: &'static str, value: String },

    #[error("non-positive speed {0} km/h")]
    InvalidSpeed(f64),
}

/// Classification interface between the extractor and a profile
///
/// Implementations must be pure: identical tag sets always produce
/// identical results within a run.
pub trait ProfileEvaluator: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` rejects the way
    fn classify_way(&self, tags: &Tags) -> Result<Option<WayAttributes>, EvaluationError>;

    fn classify_node(&self, tags: &Tags) -> Result<NodeAttributes, EvaluationError>;

    /// False when the restriction relation is excepted for this profile
    fn restriction_applies(&self, tags: &Tags) -> bool;
}
