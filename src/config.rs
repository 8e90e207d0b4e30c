use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::peer::PeerId;

/// Swarm-wide settings read from `Common.cfg`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonConfig {
    pub num_pref_neighbors: usize,
    pub unchoking_interval: Duration,
    pub opt_unchoking_interval: Duration,
    pub file_name: String,
    pub file_size: u64,
    pub piece_size: u64,
}

/// One line of `PeerInfo.cfg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub host: String,
    pub port: u16,
    pub has_file: bool,
}

impl PeerInfo {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub common: CommonConfig,
    /// In file order; this is the total order used for connection direction.
    pub peers: Vec<PeerInfo>,
}

impl CommonConfig {
    pub fn parse(input: &str) -> Result<Self> {
        let mut values = HashMap::new();
        for (line_number, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
                return Err(anyhow!("line {}: expected '<key> <value>'", line_number + 1));
            };
            values.insert(key.to_string(), value.to_string());
        }

        let get = |key: &str| lookup(&values, key);
        let number = |key: &str| -> Result<u64> {
            lookup(&values, key)?
                .parse::<u64>()
                .with_context(|| format!("invalid value for '{key}'"))
        };

        let common = Self {
            num_pref_neighbors: number("NumberOfPreferredNeighbors")? as usize,
            unchoking_interval: Duration::from_secs(number("UnchokingInterval")?),
            opt_unchoking_interval: Duration::from_secs(number("OptimisticUnchokingInterval")?),
            file_name: get("FileName")?.clone(),
            file_size: number("FileSize")?,
            piece_size: number("PieceSize")?,
        };
        common.validate()?;

        Ok(common)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_pref_neighbors == 0 {
            return Err(anyhow!("NumberOfPreferredNeighbors must be at least 1"));
        }
        if self.unchoking_interval.is_zero() || self.opt_unchoking_interval.is_zero() {
            return Err(anyhow!("unchoking intervals must be positive"));
        }
        if self.file_size == 0 || self.piece_size == 0 {
            return Err(anyhow!("FileSize and PieceSize must be positive"));
        }
        if self.file_name.is_empty() {
            return Err(anyhow!("FileName must not be empty"));
        }
        Ok(())
    }

    pub fn piece_count(&self) -> usize {
        self.file_size.div_ceil(self.piece_size) as usize
    }
}

fn lookup<'a>(values: &'a HashMap<String, String>, key: &str) -> Result<&'a String> {
    values.get(key).ok_or_else(|| anyhow!("missing key '{key}'"))
}

pub fn parse_peer_info(input: &str) -> Result<Vec<PeerInfo>> {
    let mut peers: Vec<PeerInfo> = Vec::new();

    for (line_number, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields = line.split_whitespace().collect::<Vec<&str>>();
        if fields.len() != 4 {
            return Err(anyhow!("line {}: expected '<peer_id> <host> <port> <has_file>'", line_number + 1));
        }

        let peer_id = fields[0]
            .parse::<PeerId>()
            .with_context(|| format!("line {}: invalid peer id", line_number + 1))?;
        let port = fields[2]
            .parse::<u16>()
            .with_context(|| format!("line {}: invalid port", line_number + 1))?;
        let has_file = match fields[3] {
            "0" => false,
            "1" => true,
            other => return Err(anyhow!("line {}: has_file must be 0 or 1, got '{other}'", line_number + 1)),
        };

        if peers.iter().any(|peer| peer.peer_id == peer_id) {
            return Err(anyhow!("line {}: duplicate peer id {peer_id}", line_number + 1));
        }

        peers.push(PeerInfo {
            peer_id,
            host: fields[1].to_string(),
            port,
            has_file,
        });
    }

    if peers.is_empty() {
        return Err(anyhow!("no peers configured"));
    }

    Ok(peers)
}

impl Config {
    pub fn load(dir: &Path) -> Result<Self> {
        let common_path = dir.join(crate::COMMON_CONFIG_FILE);
        let common = std::fs::read_to_string(&common_path)
            .with_context(|| format!("couldn't read {}", common_path.display()))?;

        let peers_path = dir.join(crate::PEER_INFO_FILE);
        let peers = std::fs::read_to_string(&peers_path)
            .with_context(|| format!("couldn't read {}", peers_path.display()))?;

        Ok(Self {
            common: CommonConfig::parse(&common).context("invalid Common.cfg")?,
            peers: parse_peer_info(&peers).context("invalid PeerInfo.cfg")?,
        })
    }

    pub fn peer(&self, peer_id: PeerId) -> Option<&PeerInfo> {
        self.peers.iter().find(|peer| peer.peer_id == peer_id)
    }

    /// Peers listed before `peer_id`; these are the ones it dials.
    pub fn earlier_peers(&self, peer_id: PeerId) -> &[PeerInfo] {
        match self.peers.iter().position(|peer| peer.peer_id == peer_id) {
            Some(position) => &self.peers[..position],
            None => &[],
        }
    }

    pub fn piece_count(&self) -> usize {
        self.common.piece_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::disk::PieceLayout;

    const COMMON: &str = "NumberOfPreferredNeighbors 3\n\
                          UnchokingInterval 5\n\
                          OptimisticUnchokingInterval 10\n\
                          FileName TheFile.dat\n\
                          FileSize 10000232\n\
                          PieceSize 32768\n";

    const PEERS: &str = "1001 lin114-00.cise.ufl.edu 6001 1\n\
                         1002 lin114-01.cise.ufl.edu 6001 0\n\
                         \n\
                         # spare machine\n\
                         1003 lin114-02.cise.ufl.edu 6001 0\n";

    #[test]
    fn test_parse_common() {
        let common = CommonConfig::parse(COMMON).unwrap();

        assert_eq!(common.num_pref_neighbors, 3);
        assert_eq!(common.unchoking_interval, Duration::from_secs(5));
        assert_eq!(common.opt_unchoking_interval, Duration::from_secs(10));
        assert_eq!(common.file_name, "TheFile.dat");
        assert_eq!(common.piece_count(), 306);

        let layout = PieceLayout::from_config(&common);
        assert_eq!(layout.piece_length(0), 32768);
        assert_eq!(layout.piece_length(305), 10000232 - 305 * 32768);
    }

    #[test]
    fn test_parse_common_missing_key() {
        let input = COMMON.replace("PieceSize 32768\n", "");
        let error = CommonConfig::parse(&input).unwrap_err();
        assert!(error.to_string().contains("PieceSize"));
    }

    #[test]
    fn test_parse_common_rejects_zero_piece_size() {
        let input = COMMON.replace("PieceSize 32768", "PieceSize 0");
        assert!(CommonConfig::parse(&input).is_err());
    }

    #[test]
    fn test_exact_multiple_last_piece() {
        let mut common = CommonConfig::parse(COMMON).unwrap();
        common.file_size = 4 * common.piece_size;

        assert_eq!(common.piece_count(), 4);
        assert_eq!(PieceLayout::from_config(&common).piece_length(3), common.piece_size as usize);
    }

    #[test]
    fn test_parse_peer_info() {
        let peers = parse_peer_info(PEERS).unwrap();

        assert_eq!(peers.len(), 3);
        assert_eq!(peers[0].peer_id, 1001);
        assert!(peers[0].has_file);
        assert!(!peers[2].has_file);
        assert_eq!(peers[1].address(), "lin114-01.cise.ufl.edu:6001");
    }

    #[test]
    fn test_parse_peer_info_duplicate_id() {
        let input = "1 localhost 6001 1\n1 localhost 6002 0\n";
        assert!(parse_peer_info(input).is_err());
    }

    #[test]
    fn test_earlier_peers() {
        let config = Config {
            common: CommonConfig::parse(COMMON).unwrap(),
            peers: parse_peer_info(PEERS).unwrap(),
        };

        assert!(config.earlier_peers(1001).is_empty());
        let earlier = config.earlier_peers(1003).iter().map(|p| p.peer_id).collect::<Vec<_>>();
        assert_eq!(earlier, vec![1001, 1002]);
        assert!(config.earlier_peers(42).is_empty());
    }
}
