//! The candidate roster: one `name address port` line per node.

use crate::OrchestratorError;
use ringkv_ring::HashRing;
use std::path::Path;

pub fn load_roster(path: &Path) -> Result<HashRing, OrchestratorError> {
    let roster_err = |reason: String| OrchestratorError::Roster {
        path: path.display().to_string(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| roster_err(e.to_string()))?;
    let ring = HashRing::from_text(&text).map_err(|e| roster_err(e.to_string()))?;
    if ring.is_empty() {
        return Err(roster_err("no candidates listed".to_string()));
    }
    tracing::info!("loaded {} candidate(s) from {}", ring.len(), path.display());
    Ok(ring)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringkv_ring::RingEntry;
    use tempfile::TempDir;

    #[test]
    fn test_load_roster() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.config");
        std::fs::write(
            &path,
            "node1 127.0.0.1 50000\r\n\nnode2 127.0.0.1 50001\nnode3  127.0.0.1\t50002\n",
        )
        .unwrap();
        let ring = load_roster(&path).unwrap();
        assert_eq!(ring.len(), 3);
        assert!(ring.contains(&RingEntry::new("node3", "127.0.0.1", 50002)));
    }

    #[test]
    fn test_bad_roster() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("servers.config");

        std::fs::write(&path, "node1 127.0.0.1\n").unwrap();
        assert!(matches!(
            load_roster(&path),
            Err(OrchestratorError::Roster { .. })
        ));

        std::fs::write(&path, "\n\n").unwrap();
        assert!(load_roster(&path).is_err());

        assert!(load_roster(&dir.path().join("missing")).is_err());
    }
}
