mod cli;
mod console;
mod coordinator;
mod error;
mod host;
mod ipc;
mod logging;
mod model;
mod service;
mod storage;
mod surface;
#[cfg(test)]
mod testing;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();

    // Exit explicitly: the stdin router and output writer never finish on their own.
    match cli::run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "fatal");
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
