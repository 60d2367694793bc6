//! Binary output artifacts
//!
//! Both files are little-endian with a CRC-64 footer and carry the same
//! extraction fingerprint.

pub mod crc;
pub mod fingerprint;
pub mod graph;
pub mod restrictions;

use std::path::{Path, PathBuf};

use butterfly_common::{Error, Result};

pub use fingerprint::Fingerprint;
pub use graph::{GraphEdge, GraphFile, GraphNode};
pub use restrictions::{RestrictionFile, RestrictionKind, TurnRestriction};

/// Restriction artifact path belonging to a graph artifact
pub fn restrictions_path(graph_path: &Path) -> PathBuf {
    let mut name = graph_path.as_os_str().to_os_string();
    name.push(".restrictions");
    PathBuf::from(name)
}

/// Fail unless both artifacts come from the same extraction run
pub fn verify_pair(graph: &GraphFile, restrictions: &RestrictionFile) -> Result<()> {
    if graph.fingerprint != restrictions.fingerprint {
        return Err(Error::InvalidInput(format!(
            "graph fingerprint {} does not match restrictions fingerprint {}",
            fingerprint::short(&graph.fingerprint),
            fingerprint::short(&restrictions.fingerprint)
        )));
    }
    Ok(())
}
