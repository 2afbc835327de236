use clap::Parser;
use postbox::{server, Error};
use std::path::PathBuf;

const PORT: u16 = 1357;

#[derive(Parser, Debug)]
struct Args {
    /// The port to listen on
    #[arg(short, long, env = "POSTBOX_PORT", default_value_t = PORT)]
    port: u16,

    /// Path to the SQLite database file
    #[arg(short, long, env = "POSTBOX_DATABASE", default_value = "postbox.db")]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    server::run(args.port, args.database).await
}
