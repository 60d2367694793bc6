//! Buffers filled during parsing and the final join/serialize pass
//!
//! Nothing is looked up while parsing: nodes, edges, way endpoints and
//! restriction candidates are only appended. `prepare_data` then sorts
//! everything, merge-joins coordinates into edges, resolves restrictions
//! and writes both artifacts.

use std::fs;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use butterfly_common::{Error, Result};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::formats::fingerprint::{self, Fingerprint};
use crate::formats::{
    GraphEdge, GraphFile, GraphNode, RestrictionFile, RestrictionKind, TurnRestriction,
};
use crate::geo::haversine_distance;
use crate::interner::{StringId, StringTable};

/// Node as read from the input, with its classified flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedNode {
    pub id: i64,
    pub lat: i32,
    pub lon: i32,
    pub flags: u8,
}

/// Directed edge before coordinates are known
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeRecord {
    pub source: i64,
    pub target: i64,
    /// km/h along this direction
    pub speed: f64,
    /// Seconds for this segment, for duration-based ways
    pub duration: Option<f64>,
    pub name_id: StringId,
    pub flags: u16,
}

/// Nodes of an accepted way needed to anchor restrictions at either end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WayEndpoints {
    pub id: i64,
    pub first: i64,
    pub second: i64,
    pub penultimate: i64,
    pub last: i64,
}

impl WayEndpoints {
    pub fn from_nodes(id: i64, nodes: &[i64]) -> Option<Self> {
        if nodes.len() < 2 {
            return None;
        }
        let n = nodes.len();
        Some(Self {
            id,
            first: nodes[0],
            second: nodes[1],
            penultimate: nodes[n - 2],
            last: nodes[n - 1],
        })
    }

    /// Node next to `via` on this way, if `via` is one of its ends
    pub fn neighbour_of(&self, via: i64) -> Option<i64> {
        if self.first == via {
            Some(self.second)
        } else if self.last == via {
            Some(self.penultimate)
        } else {
            None
        }
    }
}

/// Turn restriction whose ways have not been checked yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestrictionCandidate {
    pub relation_id: i64,
    pub from_way: i64,
    pub via_node: i64,
    pub to_way: i64,
    pub kind: RestrictionKind,
}

/// Per-entity drop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub nodes_staged: u64,
    pub duplicate_nodes: u64,
    pub ways_accepted: u64,
    pub ways_invalid: u64,
    pub ways_rejected: u64,
    pub evaluation_errors: u64,
    pub restrictions_candidates: u64,
    pub restrictions_excepted: u64,
    pub restrictions_malformed: u64,
    pub restrictions_dropped: u64,
    pub edges_missing_coordinates: u64,
    pub parallel_edges_folded: u64,
}

/// Result of `prepare_data`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareSummary {
    pub nodes: usize,
    pub edges: usize,
    pub strings: usize,
    pub restrictions: usize,
    pub graph_path: PathBuf,
    pub restrictions_path: PathBuf,
    pub stats: ExtractionStats,
}

pub struct ExtractionContainers {
    fingerprint: Fingerprint,
    pub(crate) nodes: Vec<StagedNode>,
    pub(crate) used_node_ids: Vec<i64>,
    pub(crate) edges: Vec<EdgeRecord>,
    pub(crate) ways: Vec<WayEndpoints>,
    pub(crate) restrictions: Vec<RestrictionCandidate>,
    pub(crate) strings: StringTable,
    pub(crate) stats: ExtractionStats,
}

impl ExtractionContainers {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            nodes: Vec::new(),
            used_node_ids: Vec::new(),
            edges: Vec::new(),
            ways: Vec::new(),
            restrictions: Vec::new(),
            strings: StringTable::new(),
            stats: ExtractionStats::default(),
        }
    }

    pub fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    /// Bytes currently held in the buffers
    pub fn estimated_bytes(&self) -> usize {
        self.nodes.capacity() * size_of::<StagedNode>()
            + self.used_node_ids.capacity() * size_of::<i64>()
            + self.edges.capacity() * size_of::<EdgeRecord>()
            + self.ways.capacity() * size_of::<WayEndpoints>()
            + self.restrictions.capacity() * size_of::<RestrictionCandidate>()
            + self.strings.heap_bytes()
    }

    /// Join, deduplicate and write both artifacts; consumes the containers
    pub fn prepare_data(
        self,
        graph_path: &Path,
        restrictions_path: &Path,
        memory_budget: usize,
    ) -> Result<PrepareSummary> {
        let estimated = self.estimated_bytes();
        if estimated > memory_budget {
            warn!(
                "Insufficient memory: buffers need ~{} MiB, budget is {} MiB; continuing",
                estimated >> 20,
                memory_budget >> 20
            );
        }

        let ExtractionContainers {
            fingerprint: run_fingerprint,
            nodes,
            used_node_ids,
            edges,
            ways,
            restrictions,
            strings,
            mut stats,
        } = self;

        let coordinates = join_coordinates(nodes, used_node_ids, &mut stats);
        info!("Joined {} coordinates for used nodes", coordinates.len());

        let graph_edges = compute_edges(edges, &coordinates, &mut stats);
        let graph_nodes = prune_nodes(coordinates, &graph_edges);
        info!(
            "Built {} edges over {} nodes ({} parallel edges folded)",
            graph_edges.len(),
            graph_nodes.len(),
            stats.parallel_edges_folded
        );

        let turn_restrictions = resolve_restrictions(ways, restrictions, &mut stats);
        info!(
            "Resolved {} turn restrictions ({} dropped)",
            turn_restrictions.len(),
            stats.restrictions_dropped
        );

        let graph = GraphFile {
            fingerprint: run_fingerprint,
            nodes: graph_nodes,
            edges: graph_edges,
            strings: strings.into_strings(),
        };
        let restriction_file = RestrictionFile {
            fingerprint: run_fingerprint,
            restrictions: turn_restrictions,
        };

        write_outputs(&graph, &restriction_file, graph_path, restrictions_path)?;
        info!(
            "Wrote {} and {} (fingerprint {})",
            graph_path.display(),
            restrictions_path.display(),
            fingerprint::short(&run_fingerprint)
        );

        Ok(PrepareSummary {
            nodes: graph.nodes.len(),
            edges: graph.edges.len(),
            strings: graph.strings.len(),
            restrictions: restriction_file.restrictions.len(),
            graph_path: graph_path.to_path_buf(),
            restrictions_path: restrictions_path.to_path_buf(),
            stats,
        })
    }
}

/// Sorted, deduplicated coordinate table of the nodes accepted ways use
fn join_coordinates(
    mut nodes: Vec<StagedNode>,
    mut used: Vec<i64>,
    stats: &mut ExtractionStats,
) -> Vec<StagedNode> {
    used.par_sort_unstable();
    used.dedup();

    // Stable sort: the first occurrence of a duplicated id survives
    nodes.par_sort_by_key(|n| n.id);
    let before = nodes.len();
    nodes.dedup_by_key(|n| n.id);
    let duplicates = (before - nodes.len()) as u64;
    if duplicates > 0 {
        warn!("Ignored {} duplicate node ids", duplicates);
    }
    stats.duplicate_nodes += duplicates;

    let mut joined = Vec::with_capacity(used.len());
    let mut node_iter = nodes.into_iter().peekable();
    for id in used {
        while node_iter.next_if(|n| n.id < id).is_some() {}
        if let Some(node) = node_iter.next_if(|n| n.id == id) {
            joined.push(node);
        }
    }
    joined
}

fn lookup(coordinates: &[StagedNode], id: i64) -> Option<&StagedNode> {
    coordinates
        .binary_search_by_key(&id, |n| n.id)
        .ok()
        .map(|i| &coordinates[i])
}

fn edge_cost(distance: f64, edge: &EdgeRecord) -> u32 {
    let deciseconds = match edge.duration {
        Some(seconds) => seconds * 10.0,
        None => distance / (edge.speed / 3.6) * 10.0,
    };
    deciseconds.round().clamp(1.0, u32::MAX as f64) as u32
}

/// Attach distance and cost to every edge, then fold parallel edges
fn compute_edges(
    mut edges: Vec<EdgeRecord>,
    coordinates: &[StagedNode],
    stats: &mut ExtractionStats,
) -> Vec<GraphEdge> {
    edges.par_sort_unstable_by_key(|e| (e.source, e.target));

    let resolved: Vec<Option<GraphEdge>> = edges
        .par_iter()
        .map(|edge| {
            let source = lookup(coordinates, edge.source)?;
            let target = lookup(coordinates, edge.target)?;
            let distance = haversine_distance(source.lat, source.lon, target.lat, target.lon);
            Some(GraphEdge {
                source: edge.source,
                target: edge.target,
                distance,
                cost: edge_cost(distance, edge),
                name_id: edge.name_id,
                flags: edge.flags,
            })
        })
        .collect();

    let total = resolved.len();
    let mut graph_edges: Vec<GraphEdge> = resolved.into_iter().flatten().collect();
    let missing = (total - graph_edges.len()) as u64;
    if missing > 0 {
        warn!("Dropped {} edges referencing nodes missing from the input", missing);
    }
    stats.edges_missing_coordinates += missing;

    graph_edges.par_sort_unstable_by(|a, b| {
        (a.source, a.target, a.cost, a.name_id, a.flags)
            .cmp(&(b.source, b.target, b.cost, b.name_id, b.flags))
            .then(a.distance.total_cmp(&b.distance))
    });
    let before = graph_edges.len();
    graph_edges.dedup_by_key(|e| (e.source, e.target));
    stats.parallel_edges_folded += (before - graph_edges.len()) as u64;

    graph_edges
}

/// Keep only nodes that are an endpoint of a serialized edge
fn prune_nodes(coordinates: Vec<StagedNode>, edges: &[GraphEdge]) -> Vec<GraphNode> {
    let mut referenced: Vec<i64> = edges.iter().flat_map(|e| [e.source, e.target]).collect();
    referenced.par_sort_unstable();
    referenced.dedup();

    coordinates
        .into_iter()
        .filter(|n| referenced.binary_search(&n.id).is_ok())
        .map(|n| GraphNode {
            id: n.id,
            lat: n.lat,
            lon: n.lon,
            flags: n.flags,
        })
        .collect()
}

fn resolve_restrictions(
    mut ways: Vec<WayEndpoints>,
    candidates: Vec<RestrictionCandidate>,
    stats: &mut ExtractionStats,
) -> Vec<TurnRestriction> {
    ways.par_sort_by_key(|w| w.id);
    ways.dedup_by_key(|w| w.id);

    let find = |id: i64| {
        ways.binary_search_by_key(&id, |w| w.id)
            .ok()
            .map(|i| &ways[i])
    };

    let mut resolved = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let from = find(candidate.from_way)
            .and_then(|w| w.neighbour_of(candidate.via_node));
        let to = find(candidate.to_way).and_then(|w| w.neighbour_of(candidate.via_node));

        match (from, to) {
            (Some(from_node), Some(to_node)) => resolved.push(TurnRestriction {
                from_way: candidate.from_way,
                via_node: candidate.via_node,
                to_way: candidate.to_way,
                kind: candidate.kind,
                from_node,
                to_node,
            }),
            _ => {
                warn!(
                    "Dropping restriction {}: ways {} -> {} not routable or not joined at node {}",
                    candidate.relation_id, candidate.from_way, candidate.to_way, candidate.via_node
                );
                stats.restrictions_dropped += 1;
            }
        }
    }

    resolved.sort_unstable();
    resolved.dedup();
    resolved
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write both artifacts next to their targets and rename them into place;
/// on failure nothing from this run is left behind
fn write_outputs(
    graph: &GraphFile,
    restrictions: &RestrictionFile,
    graph_path: &Path,
    restrictions_path: &Path,
) -> Result<()> {
    let graph_tmp = tmp_path(graph_path);
    let restrictions_tmp = tmp_path(restrictions_path);
    let mut renamed: Vec<&Path> = Vec::new();

    let mut run = || -> Result<()> {
        graph
            .write(&graph_tmp)
            .map_err(|e| Error::serialization(graph_path, e))?;
        restrictions
            .write(&restrictions_tmp)
            .map_err(|e| Error::serialization(restrictions_path, e))?;
        fs::rename(&graph_tmp, graph_path).map_err(|e| Error::serialization(graph_path, e))?;
        renamed.push(graph_path);
        fs::rename(&restrictions_tmp, restrictions_path)
            .map_err(|e| Error::serialization(restrictions_path, e))?;
        renamed.push(restrictions_path);
        Ok(())
    };

    let result = run();
    if result.is_err() {
        for path in [graph_tmp.as_path(), restrictions_tmp.as_path()]
            .into_iter()
            .chain(renamed)
        {
            let _ = fs::remove_file(path);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::graph::edge_flags;
    use tempfile::TempDir;

    fn node(id: i64, lat: i32, lon: i32) -> StagedNode {
        StagedNode { id, lat, lon, flags: 0 }
    }

    fn edge(source: i64, target: i64, speed: f64) -> EdgeRecord {
        EdgeRecord {
            source,
            target,
            speed,
            duration: None,
            name_id: 0,
            flags: 0,
        }
    }

    #[test]
    fn test_join_keeps_first_duplicate_and_only_used_nodes() {
        let mut stats = ExtractionStats::default();
        let nodes = vec![node(3, 30, 30), node(1, 10, 10), node(1, 99, 99), node(2, 20, 20)];
        let joined = join_coordinates(nodes, vec![3, 1, 3], &mut stats);

        assert_eq!(joined, vec![node(1, 10, 10), node(3, 30, 30)]);
        assert_eq!(stats.duplicate_nodes, 1);
    }

    #[test]
    fn test_cost_from_speed_and_duration() {
        let e = edge(1, 2, 36.0);
        // 36 km/h = 10 m/s: 100 m takes 10 s
        assert_eq!(edge_cost(100.0, &e), 100);
        // never zero
        assert_eq!(edge_cost(0.0, &e), 1);

        let ferry = EdgeRecord {
            duration: Some(90.0),
            flags: edge_flags::DURATION,
            ..e
        };
        assert_eq!(edge_cost(5_000.0, &ferry), 900);
    }

    #[test]
    fn test_parallel_edges_keep_minimum_cost() {
        let mut stats = ExtractionStats::default();
        let coordinates = vec![node(1, 0, 0), node(2, 0, 10_000)];
        let slow = EdgeRecord { name_id: 2, ..edge(1, 2, 10.0) };
        let fast = EdgeRecord { name_id: 1, ..edge(1, 2, 90.0) };
        let edges = compute_edges(vec![slow, fast], &coordinates, &mut stats);

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].name_id, 1);
        assert_eq!(stats.parallel_edges_folded, 1);
    }

    #[test]
    fn test_edges_with_unknown_nodes_are_dropped() {
        let mut stats = ExtractionStats::default();
        let coordinates = vec![node(1, 0, 0), node(2, 0, 10_000)];
        let edges = compute_edges(
            vec![edge(1, 2, 50.0), edge(2, 7, 50.0)],
            &coordinates,
            &mut stats,
        );
        assert_eq!(edges.len(), 1);
        assert_eq!(stats.edges_missing_coordinates, 1);

        let nodes = prune_nodes(coordinates, &edges);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_restriction_resolution() {
        let mut stats = ExtractionStats::default();
        let ways = vec![
            WayEndpoints::from_nodes(10, &[1, 2, 3]).unwrap(),
            WayEndpoints::from_nodes(11, &[3, 4]).unwrap(),
            WayEndpoints::from_nodes(12, &[5, 2, 6]).unwrap(),
        ];
        let candidate = |relation_id, from_way, via_node, to_way| RestrictionCandidate {
            relation_id,
            from_way,
            via_node,
            to_way,
            kind: RestrictionKind::Prohibitive,
        };
        let resolved = resolve_restrictions(
            ways,
            vec![
                candidate(100, 10, 3, 11),
                // via is in the middle of way 12
                candidate(101, 10, 2, 12),
                // way 13 was never accepted
                candidate(102, 13, 3, 11),
            ],
            &mut stats,
        );

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].from_node, 2);
        assert_eq!(resolved[0].to_node, 4);
        assert_eq!(stats.restrictions_dropped, 2);
    }

    #[test]
    fn test_prepare_data_writes_both_files() {
        let dir = TempDir::new().unwrap();
        let graph_path = dir.path().join("test.graph");
        let restrictions_path = dir.path().join("test.graph.restrictions");

        let mut containers = ExtractionContainers::new([5u8; 32]);
        containers.nodes = vec![node(1, 0, 0), node(2, 0, 10_000_000), node(9, 5, 5)];
        containers.used_node_ids = vec![1, 2];
        containers.edges = vec![edge(1, 2, 50.0), edge(2, 1, 50.0)];

        let summary = containers
            .prepare_data(&graph_path, &restrictions_path, usize::MAX)
            .unwrap();
        assert_eq!(summary.nodes, 2);
        assert_eq!(summary.edges, 2);
        assert!(!tmp_path(&graph_path).exists());

        let graph = GraphFile::read(&graph_path).unwrap();
        assert_eq!(graph.edges[0].cost, graph.edges[1].cost);
        let restrictions = RestrictionFile::read(&restrictions_path).unwrap();
        crate::formats::verify_pair(&graph, &restrictions).unwrap();
    }

    #[test]
    fn test_budget_overrun_still_writes_outputs() {
        let dir = TempDir::new().unwrap();
        let graph_path = dir.path().join("tight.graph");
        let restrictions_path = dir.path().join("tight.graph.restrictions");

        let mut containers = ExtractionContainers::new([1u8; 32]);
        containers.nodes = vec![node(1, 0, 0), node(2, 0, 10_000_000)];
        containers.used_node_ids = vec![1, 2];
        containers.edges = vec![edge(1, 2, 50.0)];
        assert!(containers.estimated_bytes() > 0);

        let summary = containers
            .prepare_data(&graph_path, &restrictions_path, 0)
            .unwrap();
        assert_eq!(summary.edges, 1);
        assert_eq!(GraphFile::read(&graph_path).unwrap().edges.len(), 1);
        assert!(restrictions_path.exists());
    }

    #[test]
    fn test_failed_write_leaves_no_outputs() {
        let dir = TempDir::new().unwrap();
        let graph_path = dir.path().join("test.graph");
        let restrictions_path = dir.path().join("missing-dir").join("test.graph.restrictions");

        let containers = ExtractionContainers::new([0u8; 32]);
        let err = containers
            .prepare_data(&graph_path, &restrictions_path, usize::MAX)
            .unwrap_err();

        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!graph_path.exists());
        assert!(!tmp_path(&graph_path).exists());
    }
}
