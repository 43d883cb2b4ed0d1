use std::env;
use std::process;

use tracing::error;

use quizzlenet::{Server, ServerConfig};

const USAGE: &str =
    "Usage: quizzlenet <tcp_port> <udp_port> <match_minutes> <invitation_secs> <num_words> <workers>";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(message) => {
            println!("{}", message);
            process::exit(1);
        }
    };

    if let Err(e) = Server::new(config).and_then(|server| server.run()) {
        error!("server failed: {}", e);
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> std::result::Result<ServerConfig, String> {
    if args.len() != 6 || args[0] == "--help" {
        return Err(USAGE.to_string());
    }
    let tcp_port = parse_number::<u16>(&args[0], "tcp_port")?;
    let udp_port = parse_number::<u16>(&args[1], "udp_port")?;
    let match_minutes = parse_number::<u64>(&args[2], "match_minutes")?;
    let invitation_secs = parse_number::<u64>(&args[3], "invitation_secs")?;
    let num_words = parse_number::<usize>(&args[4], "num_words")?;
    let workers = parse_number::<usize>(&args[5], "workers")?;

    let config = ServerConfig {
        tcp_port,
        udp_port,
        match_minutes,
        invitation_secs,
        num_words,
        workers,
        ..ServerConfig::default()
    };
    config.validate().map_err(|e| format!("{}\n{}", e, USAGE))?;
    Ok(config)
}

fn parse_number<T: std::str::FromStr>(raw: &str, name: &str) -> std::result::Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{} is not a valid {}\n{}", raw, name, USAGE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args_happy_path() {
        let config =
            parse_args(&args(&["7777", "7778", "2", "10", "5", "8"])).unwrap();
        assert_eq!(config.tcp_port, 7777);
        assert_eq!(config.udp_port, 7778);
        assert_eq!(config.match_minutes, 2);
        assert_eq!(config.invitation_secs, 10);
        assert_eq!(config.num_words, 5);
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["--help"])).is_err());
        assert!(parse_args(&args(&["7777", "7778", "2", "10", "5"])).is_err());
        assert!(parse_args(&args(&["80", "7778", "2", "10", "5", "4"])).is_err());
        assert!(parse_args(&args(&["7777", "7778", "0", "10", "5", "4"])).is_err());
        assert!(parse_args(&args(&["7777", "7778", "2", "10", "5", "3"])).is_err());
        assert!(parse_args(&args(&["x", "7778", "2", "10", "5", "4"])).is_err());
    }
}
