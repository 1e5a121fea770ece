use clap::Parser;
use sermod_tools::common::{build_master, init_tracing, SerialConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "readholding", about = "Read holding registers (FC03)")]
struct Args {
    #[command(flatten)]
    conn: SerialConnectionArgs,
    #[arg(long, default_value_t = 1)]
    slave_id: u8,
    #[arg(long)]
    start: u16,
    #[arg(long, default_value_t = 1)]
    quantity: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let master = build_master(&args.conn).await?;

    let values = master
        .read_holding_registers(args.slave_id, args.start, args.quantity)
        .await?;

    for (idx, value) in values.iter().enumerate() {
        println!(
            "addr={} value={} (0x{:04X})",
            args.start + idx as u16,
            value,
            value
        );
    }
    master.disconnect().await;
    Ok(())
}
