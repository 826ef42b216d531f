//! Line-oriented chat front end over the redundancy engine.
//!
//! Exit code 0 on a normal run, 1 on a configuration error.

mod profile;

use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use omnicast_core::EngineBuilder;
use omnicast_net::BroadcastConfig;
use omnicast_store::EvidenceStore;

const USAGE: &str = "\
omnicast - multi-protocol message redundancy engine

USAGE:
    omnicast [OPTIONS]

OPTIONS:
    --protocols <list>   Comma-separated transports to enable
                         (xmtp, nostr, waku, mqtt, iroh)
    --user <name>        Profile name (default: default)
    --chat <magnet>      Peer magnet link; starts an interactive session
    --verbose            Debug-level logging
    --help               Show this help
";

struct CliArgs {
    protocols: Option<Vec<String>>,
    user: String,
    chat: Option<String>,
    verbose: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<CliArgs>, String> {
    let mut protocols = None;
    let mut user = "default".to_string();
    let mut chat = None;
    let mut verbose = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--verbose" | "-v" => verbose = true,
            "--protocols" => {
                let value = args.next().ok_or("--protocols needs a value")?;
                protocols = Some(value.split(',').map(|s| s.trim().to_string()).collect());
            }
            "--user" => user = args.next().ok_or("--user needs a value")?,
            "--chat" => chat = Some(args.next().ok_or("--chat needs a value")?),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Some(CliArgs {
        protocols,
        user,
        chat,
        verbose,
    }))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let default_filter = if args.verbose {
        "omnicast_cli=debug,omnicast_core=debug,omnicast_net=debug,omnicast_store=info,warn"
    } else {
        "omnicast_cli=info,omnicast_core=info,omnicast_net=warn,omnicast_store=warn,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt().with_env_filter(filter).with_target(true).init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let mut config = BroadcastConfig::default();
    if let Some(ref protocols) = args.protocols {
        config.restrict_to(protocols)?;
    }
    config.validate()?;

    if let Some(ref peer_magnet) = args.chat {
        omnicast_shared::PublicIdentity::from_magnet(peer_magnet)
            .map_err(|e| anyhow::anyhow!("--chat magnet: {e}"))?;
    }

    let identity = profile::load_or_create(&args.user)?;
    println!("your magnet link:\n{}\n", identity.magnet());

    let store = Arc::new(EvidenceStore::open_default(&args.user)?);
    let engine = EngineBuilder::new(identity, config).store(store).build()?;

    engine.initialize().await;
    for (protocol, initialized, status) in engine.statuses() {
        println!(
            "  {protocol:<6} {}",
            if initialized {
                format!("up ({status})")
            } else {
                "down".to_string()
            }
        );
    }

    engine.on_message(|envelope, via| {
        if !envelope.is_ack() {
            println!("[{via}] {}", envelope.content);
        }
    });
    engine.on_receipt(|uuid, via, is_duplicate| {
        if is_duplicate {
            tracing::debug!(%uuid, transport = %via, "duplicate receipt");
        }
    });

    match args.chat {
        Some(peer_magnet) => chat_loop(&engine, &peer_magnet).await?,
        None => {
            println!("listening; ctrl-c to exit");
            tokio::signal::ctrl_c().await?;
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn chat_loop(engine: &omnicast_core::Engine, peer_magnet: &str) -> anyhow::Result<()> {
    println!("type messages, one per line; ctrl-d to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }

                match engine.send_text(peer_magnet, &line).await {
                    Ok(reports) => {
                        for report in reports {
                            let mark = if report.success { "ok" } else { "failed" };
                            println!(
                                "  {:<6} {mark} {}ms {}",
                                report.protocol.to_string(),
                                report.latency_ms,
                                report.detail,
                            );
                        }
                    }
                    Err(e) => eprintln!("send failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(list: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
        list.iter().map(|s| s.to_string())
    }

    #[test]
    fn test_parse_defaults() {
        let parsed = parse_args(args(&[])).unwrap().unwrap();
        assert_eq!(parsed.user, "default");
        assert!(parsed.protocols.is_none());
        assert!(parsed.chat.is_none());
        assert!(!parsed.verbose);
    }

    #[test]
    fn test_parse_full() {
        let parsed = parse_args(args(&[
            "--protocols",
            "nostr, mqtt",
            "--user",
            "alice",
            "--chat",
            "magnet:?xt=urn:identity:v1",
            "--verbose",
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(parsed.protocols, Some(vec!["nostr".into(), "mqtt".into()]));
        assert_eq!(parsed.user, "alice");
        assert!(parsed.chat.is_some());
        assert!(parsed.verbose);
    }

    #[test]
    fn test_parse_help_short_circuits() {
        assert!(parse_args(args(&["--help"])).unwrap().is_none());
    }

    #[test]
    fn test_parse_unknown_flag() {
        assert!(parse_args(args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn test_parse_missing_value() {
        assert!(parse_args(args(&["--user"])).is_err());
    }
}
