//! Launches the configured number of requesters against a word server.
//!
//! ``` text
//! word_client [config.json] [direct|slotted_aloha|beb|sensing_beb]
//! ```

use std::{env, process::ExitCode};

use ap2024_unitn_cppenjoyers_wordservers::{
    clients::LaunchSummary,
    config::{ArbitrationPolicy, DEFAULT_CONFIG_PATH},
    run_clients, Config, Error, Result,
};
use log::{error, info};

fn load_config() -> Result<Config> {
    let mut args = env::args().skip(1);
    let path: String = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());
    let mut config: Config = Config::load(&path)?;
    if let Some(policy) = args.next() {
        config.arbitration = ArbitrationPolicy::from_name(&policy)
            .ok_or_else(|| Error::Config(format!("unknown policy {policy:?}")))?;
    }
    Ok(config)
}

fn main() -> ExitCode {
    env_logger::init();
    let config: Config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let summary: LaunchSummary = run_clients(&config);
    for report in &summary.reports {
        info!(
            "Requester {}: {} words in {}ms, {} attempts, {} collisions",
            report.requester,
            report.words,
            report.elapsed.as_millis(),
            report.attempts,
            report.collisions
        );
    }
    for (id, e) in &summary.failures {
        error!("Requester {id}: {e}");
    }
    if summary.failures.is_empty() && summary.reports.len() == config.num_clients {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
