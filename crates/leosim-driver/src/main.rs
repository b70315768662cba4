mod session;

use clap::Parser;

use crate::session::Session;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let session = Session::parse();
    session.run()
}
