//! Command-line configuration.

use std::path::PathBuf;

use bitd_consensus::{chain_params, ChainParams, Network};
use bitd_log::{Format, Level};

#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,
    pub data_dir: PathBuf,
    pub p2p_port: u16,
    pub rpc_port: u16,
    pub log_level: Level,
    pub log_format: Format,
}

impl Config {
    pub fn from_args(args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut network = Network::Mainnet;
        let mut data_dir: Option<PathBuf> = None;
        let mut p2p_port: Option<u16> = None;
        let mut rpc_port: Option<u16> = None;
        let mut log_level = Level::Info;
        let mut log_format = Format::Text;

        let mut args = args;
        while let Some(arg) = args.next() {
            let (key, inline_value) = match arg.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            let mut value = |name: &str| -> Result<String, String> {
                match &inline_value {
                    Some(value) => Ok(value.clone()),
                    None => args
                        .next()
                        .ok_or_else(|| format!("missing value for {name}")),
                }
            };
            match key.as_str() {
                "--chain" => {
                    network = match value("--chain")?.as_str() {
                        "mainnet" => Network::Mainnet,
                        "testnet" => Network::Testnet,
                        "signet" => Network::Signet,
                        "regtest" => Network::Regtest,
                        other => return Err(format!("unknown chain {other}")),
                    };
                }
                "--datadir" => data_dir = Some(PathBuf::from(value("--datadir")?)),
                "--p2p-port" => {
                    p2p_port = Some(
                        value("--p2p-port")?
                            .parse()
                            .map_err(|_| "invalid p2p port".to_string())?,
                    );
                }
                "--rpc-port" => {
                    rpc_port = Some(
                        value("--rpc-port")?
                            .parse()
                            .map_err(|_| "invalid rpc port".to_string())?,
                    );
                }
                "--log-level" => {
                    let raw = value("--log-level")?;
                    log_level =
                        Level::parse(&raw).ok_or_else(|| format!("unknown log level {raw}"))?;
                }
                "--log-format" => {
                    let raw = value("--log-format")?;
                    log_format =
                        Format::parse(&raw).ok_or_else(|| format!("unknown log format {raw}"))?;
                }
                other => return Err(format!("unknown option {other}")),
            }
        }

        let params = chain_params(network);
        Ok(Self {
            network,
            data_dir: data_dir.unwrap_or_else(default_data_dir),
            p2p_port: p2p_port.unwrap_or(params.p2p_port),
            rpc_port: rpc_port.unwrap_or(params.rpc_port),
            log_level,
            log_format,
        })
    }

    pub fn chain_params(&self) -> ChainParams {
        chain_params(self.network)
    }

    /// Per-network subdirectory of the data dir.
    pub fn network_dir(&self) -> PathBuf {
        self.data_dir.join(self.chain_params().name)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bitd")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, String> {
        Config::from_args(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn defaults_to_mainnet() {
        let config = parse(&[]).expect("parse");
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.p2p_port, 8333);
        assert_eq!(config.rpc_port, 8334);
    }

    #[test]
    fn parses_chain_and_ports() {
        let config =
            parse(&["--chain", "regtest", "--p2p-port=12345", "--datadir", "/tmp/x"])
                .expect("parse");
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.p2p_port, 12345);
        assert_eq!(config.rpc_port, 18445);
        assert_eq!(config.network_dir(), PathBuf::from("/tmp/x/regtest"));
    }

    #[test]
    fn rejects_unknown_options() {
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["--chain", "nope"]).is_err());
        assert!(parse(&["--p2p-port"]).is_err());
    }
}
