use anyhow::{anyhow, Context};

use scp_link::{config, replay, runtime};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("session") => {
            let path = args.get(2).map(String::as_str).unwrap_or("config.yaml");
            let config = config::load_config(path).map_err(|e| anyhow!(e))?;
            runtime::run_session(&config).context("session failed")
        }
        Some("replay") => {
            let addr = args.get(2).map(String::as_str).unwrap_or("127.0.0.1:51244");
            replay::run(addr, args.get(3).map(String::as_str)).context("replay failed")
        }
        _ => {
            println!("usage: scp-link session [config.yaml]");
            println!("       scp-link replay [addr] [signals.csv]");
            Ok(())
        }
    }
}
