use clap::Args;
use sermod_master::{MasterConfig, MasterError, RtuMaster};
use sermod_transport::{SerialConfig, SerialPortProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio_serial::Parity;

#[derive(Debug, Clone, Args)]
pub struct SerialConnectionArgs {
    /// Serial port to use; defaults to the first one found.
    #[arg(long)]
    pub port: Option<String>,
    #[arg(long, default_value_t = 9600)]
    pub baud: u32,
    /// Response timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub timeout: u64,
    #[arg(long, default_value = "none", value_parser = parse_parity)]
    pub parity: Parity,
}

pub async fn build_master(args: &SerialConnectionArgs) -> Result<RtuMaster, MasterError> {
    let serial = SerialConfig {
        baud_rate: args.baud,
        parity: args.parity,
        ..SerialConfig::default()
    };
    let config = MasterConfig::default()
        .with_serial(serial)
        .with_timeout(Duration::from_millis(args.timeout));

    let provider = Arc::new(SerialPortProvider::new(args.port.clone()));
    provider.start_watcher(Duration::from_secs(1));
    let master = RtuMaster::new(provider, config);
    master.connect().await?;
    Ok(master)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

pub fn parse_parity(input: &str) -> Result<Parity, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "none" | "n" => Ok(Parity::None),
        "even" | "e" => Ok(Parity::Even),
        "odd" | "o" => Ok(Parity::Odd),
        _ => Err(format!("invalid parity: {input}")),
    }
}
