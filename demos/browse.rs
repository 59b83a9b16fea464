//! List the service types on the local network, or the instances of one
//! service type.

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
struct Cli {
    #[clap(long)]
    #[arg(default_value_t = false)]
    verbose: bool,

    /// Service type to browse, e.g. _http._tcp.local.
    /// Lists service types when omitted.
    service_type: Option<String>,
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
    match cli.service_type {
        Some(service_type) => {
            for instance in resolver.get_services(&service_type).await? {
                println!("{}", instance);
            }
        }
        None => {
            for service_type in resolver.get_service_types().await? {
                println!("{}", service_type);
            }
        }
    }
    Ok(())
}
