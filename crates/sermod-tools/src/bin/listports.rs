use clap::Parser;
use sermod_tools::common::init_tracing;
use sermod_transport::serial::available_port_names;

#[derive(Debug, Parser)]
#[command(name = "listports", about = "List serial ports visible to the master")]
struct Args {}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let Args {} = Args::parse();

    let names = available_port_names()?;
    if names.is_empty() {
        println!("no serial ports found");
        return Ok(());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}
