//! Server configuration.
//!
//! Read once at startup from `ringodis.conf` in the working directory and
//! passed by reference afterwards; nothing mutates it while the server runs.
//! The format is line-oriented `key value` pairs; blank lines and `#`
//! comments are skipped, and a missing file means all defaults.

use anyhow::Context;
use std::path::Path;

/// The configuration file the server looks for.
pub const CONFIG_FILE: &str = "ringodis.conf";

/// Runtime properties of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Properties {
    /// Listener address.
    pub bind: String,
    /// Listener port.
    pub port: u16,
    /// This node's cluster address (`host:port`), empty in standalone mode.
    pub self_addr: String,
    /// Remote cluster nodes.
    pub peers: Vec<String>,
    /// Number of logical databases.
    pub databases: usize,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            self_addr: String::new(),
            peers: Vec::new(),
            databases: 16,
        }
    }
}

impl Properties {
    /// Loads properties from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parses the line-oriented `key value` format.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut props = Self::default();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(char::is_whitespace) else {
                anyhow::bail!("malformed config line {}: '{}'", line_no + 1, line);
            };
            let value = value.trim();

            match key.to_lowercase().as_str() {
                "bind" => props.bind = value.to_string(),
                "port" => {
                    props.port = value
                        .parse()
                        .with_context(|| format!("invalid port '{}'", value))?;
                }
                "self" => props.self_addr = value.to_string(),
                "peers" => {
                    props.peers = value
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "databases" => {
                    props.databases = value
                        .parse()
                        .with_context(|| format!("invalid databases '{}'", value))?;
                }
                // Unknown keys are ignored so configs can carry extra
                // settings for other tooling.
                _ => {}
            }
        }

        if props.databases == 0 {
            props.databases = 16;
        }
        Ok(props)
    }

    /// The `host:port` the listener binds.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Cluster mode requires both this node's address and at least one peer.
    pub fn cluster_enabled(&self) -> bool {
        !self.self_addr.is_empty() && !self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let props = Properties::default();
        assert_eq!(props.listen_addr(), "127.0.0.1:6379");
        assert_eq!(props.databases, 16);
        assert!(!props.cluster_enabled());
    }

    #[test]
    fn test_parse_full_config() {
        let props = Properties::parse(
            "# node config\n\
             bind 0.0.0.0\n\
             port 6399\n\
             self 10.0.0.1:6399\n\
             peers 10.0.0.2:6399,10.0.0.3:6399\n\
             databases 4\n",
        )
        .unwrap();
        assert_eq!(props.bind, "0.0.0.0");
        assert_eq!(props.port, 6399);
        assert_eq!(props.self_addr, "10.0.0.1:6399");
        assert_eq!(
            props.peers,
            vec!["10.0.0.2:6399".to_string(), "10.0.0.3:6399".to_string()]
        );
        assert_eq!(props.databases, 4);
        assert!(props.cluster_enabled());
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let props = Properties::parse("\n# comment\n\nport 7000\n").unwrap();
        assert_eq!(props.port, 7000);
        assert_eq!(props.bind, "127.0.0.1");
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(Properties::parse("port notaport\n").is_err());
        assert!(Properties::parse("orphankey\n").is_err());
    }

    #[test]
    fn test_zero_databases_falls_back() {
        let props = Properties::parse("databases 0\n").unwrap();
        assert_eq!(props.databases, 16);
    }

    #[test]
    fn test_self_without_peers_is_standalone() {
        let props = Properties::parse("self 10.0.0.1:6399\n").unwrap();
        assert!(!props.cluster_enabled());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let props = Properties::load("definitely-not-a-real-file.conf").unwrap();
        assert_eq!(props, Properties::default());
    }
}
