//! Resolve a service instance (e.g. Printer._http._tcp.local) to ip:port,
//! or a plain host name to its addresses with --host.

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
struct Cli {
    #[clap(long)]
    #[arg(default_value_t = false)]
    verbose: bool,

    /// Treat the name as a host name and list its A records.
    #[clap(long)]
    #[arg(default_value_t = false)]
    host: bool,

    /// Instance FQDN, or host name with --host.
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Error
    };

    env_logger::Builder::new()
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(log_level)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let resolver = mdnsq::resolver::Resolver::new();
    if cli.host {
        let ips = resolver.get_ip(&cli.name).await?;
        if ips.is_empty() {
            println!("no answer for {}", cli.name);
        }
        for ip in ips {
            println!("{}", ip);
        }
    } else {
        match resolver.get_address(&cli.name).await? {
            (Some(ip), Some(port)) => println!("{}:{}", ip, port),
            (ip, port) => println!("incomplete answer: ip {:?} port {:?}", ip, port),
        }
    }
    Ok(())
}
