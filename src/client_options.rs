use anyhow::{anyhow, Result};

use std::path::PathBuf;

use crate::peer::PeerId;

/// Command line of the `peer-process` binary.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub peer_id: PeerId,
    pub config_dir: PathBuf,
    pub tracing_level: tracing::Level,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedArgs {
    Run(ClientOptions),
    Help,
}

/// Parses the arguments after the program name.
pub fn parse_args<I>(args: I) -> Result<ParsedArgs>
where
    I: IntoIterator<Item = String>,
{
    let argv = args.into_iter().collect::<Vec<String>>();

    if argv.iter().any(|arg| arg == "--help") {
        return Ok(ParsedArgs::Help);
    }

    let mut peer_id = None;
    let mut config_dir = PathBuf::from(".");
    let mut tracing_level = crate::TRACING_LEVEL;

    let mut argv_iter = argv.iter();
    while let Some(arg) = argv_iter.next() {
        if arg == "--config-dir" {
            let Some(dir) = argv_iter.next() else {
                return Err(anyhow!("--config-dir needs a directory"));
            };
            config_dir = PathBuf::from(dir);
        }
        else if arg == "--tracing-level" {
            let Some(level) = argv_iter.next() else {
                return Err(anyhow!("--tracing-level needs a level"));
            };
            tracing_level = match level.as_str() {
                "trace" => tracing::Level::TRACE,
                "debug" => tracing::Level::DEBUG,
                "info" => tracing::Level::INFO,
                "warn" => tracing::Level::WARN,
                "error" => tracing::Level::ERROR,
                _ => return Err(anyhow!("unknown tracing level '{}'", level)),
            };
        }
        else if arg.starts_with("--") {
            return Err(anyhow!("unknown option '{}'", arg));
        }
        else if peer_id.is_none() {
            let id = arg
                .parse::<PeerId>()
                .map_err(|_| anyhow!("peer id must be a non-negative integer, got '{}'", arg))?;
            peer_id = Some(id);
        }
        else {
            return Err(anyhow!("unexpected argument '{}'", arg));
        }
    }

    let peer_id = peer_id.ok_or_else(|| anyhow!("missing peer id"))?;

    Ok(ParsedArgs::Run(ClientOptions {
        peer_id,
        config_dir,
        tracing_level,
    }))
}

pub fn print_error_menu() {
    eprintln!("Invalid arguments. Use --help for help menu");
}

pub fn print_help_menu() {
    println!("Usage: peer-process <peer_id> [options]");
    println!("Options:");
    println!("  --help  -  print this help message and exit");
    println!("  --config-dir <dir>  -  directory holding Common.cfg and PeerInfo.cfg (default: .)");
    println!("  --tracing-level <trace|debug|info|warn|error>  -  stderr log level (default: info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Vec<String> {
        argv.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn test_peer_id_only() {
        let parsed = parse_args(args(&["1001"])).unwrap();

        assert_eq!(
            parsed,
            ParsedArgs::Run(ClientOptions {
                peer_id: 1001,
                config_dir: PathBuf::from("."),
                tracing_level: tracing::Level::INFO,
            })
        );
    }

    #[test]
    fn test_all_options() {
        let parsed = parse_args(args(&["--config-dir", "/tmp/swarm", "1002", "--tracing-level", "debug"])).unwrap();

        let ParsedArgs::Run(options) = parsed else {
            panic!("expected run options");
        };
        assert_eq!(options.peer_id, 1002);
        assert_eq!(options.config_dir, PathBuf::from("/tmp/swarm"));
        assert_eq!(options.tracing_level, tracing::Level::DEBUG);
    }

    #[test]
    fn test_help_wins() {
        assert_eq!(parse_args(args(&["abc", "--help"])).unwrap(), ParsedArgs::Help);
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["peer"])).is_err());
        assert!(parse_args(args(&["-5"])).is_err());
        assert!(parse_args(args(&["1001", "1002"])).is_err());
        assert!(parse_args(args(&["1001", "--tracing-level", "loud"])).is_err());
        assert!(parse_args(args(&["1001", "--config-dir"])).is_err());
        assert!(parse_args(args(&["1001", "--verbose"])).is_err());
    }
}
