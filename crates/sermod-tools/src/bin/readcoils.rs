use clap::Parser;
use sermod_tools::common::{build_master, init_tracing, SerialConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "readcoils", about = "Read coils (FC01)")]
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
        .read_coils(args.slave_id, args.start, args.quantity)
        .await?;

    for (idx, value) in values.iter().enumerate() {
        println!(
            "addr={} state={}",
            args.start + idx as u16,
            if *value { "ON" } else { "OFF" }
        );
    }
    master.disconnect().await;
    Ok(())
}
