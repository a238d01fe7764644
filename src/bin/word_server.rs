//! Word server.
//!
//! ``` text
//! word_server [config.json] [contention|fifo|round_robin]
//! ```

use std::{env, net::TcpListener, process::ExitCode};

use ap2024_unitn_cppenjoyers_wordservers::{
    config::{ServerMode, DEFAULT_CONFIG_PATH},
    Config, Error, Result, WordServer,
};
use log::{error, info};

fn load_config() -> Result<Config> {
    let mut args = env::args().skip(1);
    let path: String = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());
    let mut config: Config = Config::load(&path)?;
    if let Some(mode) = args.next() {
        config.mode = ServerMode::from_name(&mode)
            .ok_or_else(|| Error::Config(format!("unknown mode {mode:?}")))?;
    }
    Ok(config)
}

fn run() -> Result<()> {
    let config: Config = load_config()?;
    let server: WordServer = WordServer::from_config(&config)?;
    let listener: TcpListener = server.bind()?;
    info!(
        "Serving {} requesters in {:?} mode (k = {}, p = {})",
        config.num_clients, config.mode, config.words_per_request, config.words_per_packet
    );
    let report = server.serve(&listener);
    info!(
        "Served {} connections, {} requests, {} collisions",
        report.connections, report.totals.requests, report.totals.collisions
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
