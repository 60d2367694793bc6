//! Bridge between the parser and the containers
//!
//! Classifies every primitive through the profile and appends the result
//! to [`ExtractionContainers`]. Per-entity problems are counted and logged,
//! never returned.

use tracing::{debug, warn};

use super::containers::{
    EdgeRecord, ExtractionContainers, RestrictionCandidate, StagedNode, WayEndpoints,
};
use crate::elements::{MemberKind, RawNode, RawRelation, RawWay};
use crate::formats::graph::{edge_flags, node_flags};
use crate::formats::RestrictionKind;
use crate::parser::ElementSink;
use crate::profile::{Direction, ProfileEvaluator, WayAttributes};

pub struct ExtractorCallbacks<'a> {
    containers: &'a mut ExtractionContainers,
    profile: &'a dyn ProfileEvaluator,
}

impl<'a> ExtractorCallbacks<'a> {
    pub fn new(containers: &'a mut ExtractionContainers, profile: &'a dyn ProfileEvaluator) -> Self {
        Self {
            containers,
            profile,
        }
    }

    fn classify_way(&mut self, way: &RawWay) -> Option<WayAttributes> {
        match self.profile.classify_way(&way.tags) {
            Ok(Some(attrs)) => Some(attrs),
            Ok(None) => {
                debug!("Way {} rejected by profile", way.id);
                self.containers.stats.ways_rejected += 1;
                None
            }
            Err(e) => {
                warn!("Way {} rejected: {}", way.id, e);
                self.containers.stats.evaluation_errors += 1;
                None
            }
        }
    }
}

fn base_flags(attrs: &WayAttributes) -> u16 {
    let mut flags = attrs.direction as u16 & edge_flags::DIRECTION_MASK;
    if attrs.roundabout {
        flags |= edge_flags::ROUNDABOUT;
    }
    if attrs.access_restricted {
        flags |= edge_flags::ACCESS_RESTRICTED;
    }
    if attrs.ignore_in_grid {
        flags |= edge_flags::IGNORE_IN_GRID;
    }
    if attrs.duration.is_some() {
        flags |= edge_flags::DURATION;
    }
    flags
}

impl ElementSink for ExtractorCallbacks<'_> {
    fn node(&mut self, node: RawNode) {
        let flags = match self.profile.classify_node(&node.tags) {
            Ok(attrs) => {
                let mut flags = 0;
                if attrs.barrier {
                    flags |= node_flags::BARRIER;
                }
                if attrs.traffic_signal {
                    flags |= node_flags::TRAFFIC_SIGNAL;
                }
                flags
            }
            Err(e) => {
                warn!("Node {}: {}", node.id, e);
                self.containers.stats.evaluation_errors += 1;
                0
            }
        };

        self.containers.nodes.push(StagedNode {
            id: node.id,
            lat: node.lat,
            lon: node.lon,
            flags,
        });
        self.containers.stats.nodes_staged += 1;
    }

    fn way(&mut self, way: RawWay) {
        if way.nodes.len() < 2 {
            warn!("Way {} has {} node(s), ignoring", way.id, way.nodes.len());
            self.containers.stats.ways_invalid += 1;
            return;
        }

        let Some(attrs) = self.classify_way(&way) else {
            return;
        };
        self.containers.stats.ways_accepted += 1;

        let name_id = self.containers.strings.intern(&attrs.name);
        let flags = base_flags(&attrs);

        // Reverse-only ways become forward-only along the flipped order
        let mut nodes = way.nodes;
        let (forward_speed, backward_speed, oneway) = match attrs.direction {
            Direction::Bidirectional => (attrs.forward_speed, attrs.backward_speed, false),
            Direction::Forward => (attrs.forward_speed, attrs.backward_speed, true),
            Direction::Reverse => {
                nodes.reverse();
                (attrs.backward_speed, attrs.forward_speed, true)
            }
        };
        let contra_flow = !oneway && forward_speed != backward_speed;

        let segments = nodes.windows(2).filter(|pair| pair[0] != pair[1]).count();
        let segment_duration = attrs.duration.map(|d| d / segments.max(1) as f64);

        for pair in nodes.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a == b {
                continue;
            }

            self.containers.edges.push(EdgeRecord {
                source: a,
                target: b,
                speed: forward_speed,
                duration: segment_duration,
                name_id,
                flags,
            });

            if !oneway {
                let backward_flags = if contra_flow {
                    flags | edge_flags::CONTRA_FLOW
                } else {
                    flags
                };
                self.containers.edges.push(EdgeRecord {
                    source: b,
                    target: a,
                    speed: backward_speed,
                    duration: segment_duration,
                    name_id,
                    flags: backward_flags,
                });
            }
        }

        self.containers.used_node_ids.extend_from_slice(&nodes);
        if let Some(endpoints) = WayEndpoints::from_nodes(way.id, &nodes) {
            self.containers.ways.push(endpoints);
        }
    }

    fn relation(&mut self, relation: RawRelation) {
        if !relation.tags.is("type", "restriction") {
            return;
        }
        let Some(kind) = relation.tags.get("restriction").and_then(RestrictionKind::from_tag) else {
            debug!("Relation {} has no usable restriction value", relation.id);
            return;
        };

        if !self.profile.restriction_applies(&relation.tags) {
            debug!("Restriction {} excepted for this profile", relation.id);
            self.containers.stats.restrictions_excepted += 1;
            return;
        }

        let single = |role: &str, expected: MemberKind| {
            let mut matching = relation.members.iter().filter(|m| m.role == role);
            match (matching.next(), matching.next()) {
                (Some(member), None) if member.kind == expected => Some(member.ref_id),
                _ => None,
            }
        };

        match (
            single("from", MemberKind::Way),
            single("via", MemberKind::Node),
            single("to", MemberKind::Way),
        ) {
            (Some(from_way), Some(via_node), Some(to_way)) => {
                self.containers.restrictions.push(RestrictionCandidate {
                    relation_id: relation.id,
                    from_way,
                    via_node,
                    to_way,
                    kind,
                });
                self.containers.stats.restrictions_candidates += 1;
            }
            _ => {
                warn!(
                    "Restriction {} needs exactly one from way, via node and to way, ignoring",
                    relation.id
                );
                self.containers.stats.restrictions_malformed += 1;
            }
        }
    }
}
