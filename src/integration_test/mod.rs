#[cfg(test)]
mod loopback_tests {
    use std::{
        collections::BTreeMap,
        env, fs,
        net::TcpListener,
        path::PathBuf,
        process,
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        thread,
    };

    use crate::{
        clients::{run_clients, tally::WordTally, LaunchSummary},
        config::{ArbitrationPolicy, Config, ServerMode},
        corpus::WordCorpus,
        servers::{ServerReport, WordServer},
    };

    const WORD_COUNT: usize = 60;

    static RUN: AtomicU32 = AtomicU32::new(0);

    fn corpus() -> Arc<WordCorpus> {
        let words: Vec<String> = (0..WORD_COUNT).map(|i: usize| format!("w{}", i % 7)).collect();
        Arc::new(WordCorpus::new(words).unwrap())
    }

    fn expected_tally() -> BTreeMap<String, u64> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for i in 0..WORD_COUNT {
            *counts.entry(format!("w{}", i % 7)).or_insert(0) += 1;
        }
        counts
    }

    fn config(mode: ServerMode, arbitration: ArbitrationPolicy, num_clients: usize) -> Config {
        let prefix: PathBuf = env::temp_dir().join(format!(
            "word_servers_{}_{}",
            process::id(),
            RUN.fetch_add(1, Ordering::Relaxed)
        ));
        Config {
            server_ip: "127.0.0.1".to_owned(),
            server_port: 0,
            words_per_request: 5,
            words_per_packet: 2,
            num_clients,
            input_file: String::new(),
            slot_ms: 5,
            mode,
            arbitration,
            max_attempts: 16,
            read_timeout_ms: 3000,
            turn_timeout_ms: 300,
            output_prefix: prefix.to_string_lossy().into_owned(),
            seed: Some(11),
            rogue_clients: 0,
            rogue_burst: 4,
        }
    }

    /// runs a server on an ephemeral port and the configured requesters
    /// against it
    fn run(mut config: Config) -> (LaunchSummary, ServerReport, Config) {
        let _ = env_logger::builder().is_test(true).try_init();
        let server: WordServer = WordServer::new(corpus(), &config);
        let listener: TcpListener = server.bind().unwrap();
        config.server_port = listener.local_addr().unwrap().port();
        let (summary, report) = thread::scope(|s| {
            let served = s.spawn(|| server.serve(&listener));
            let summary: LaunchSummary = run_clients(&config);
            (summary, served.join().unwrap())
        });
        (summary, report, config)
    }

    fn assert_complete(summary: &LaunchSummary, config: &Config) {
        assert!(summary.failures.is_empty(), "{:?}", summary.failures);
        assert_eq!(summary.reports.len(), config.num_clients);
        let expected: BTreeMap<String, u64> = expected_tally();
        for report in &summary.reports {
            assert_eq!(report.words, WORD_COUNT as u64);
            let counted: BTreeMap<String, u64> = report
                .tally
                .iter()
                .map(|(w, c): (&str, u64)| (w.to_owned(), c))
                .collect();
            assert_eq!(counted, expected);

            let path: PathBuf = WordTally::output_path(&config.output_prefix, report.requester);
            assert_eq!(fs::read_to_string(&path).unwrap(), report.tally.render());
            fs::remove_file(path).unwrap();
        }
    }

    #[test]
    fn test_contention_with_backoff() {
        let (summary, report, config) =
            run(config(ServerMode::Contention, ArbitrationPolicy::Beb, 3));
        assert_complete(&summary, &config);
        assert_eq!(report.connections, 3);
        // every HUH! sent is seen by exactly one requester
        let collisions: u64 = summary.reports.iter().map(|r| r.collisions).sum();
        assert_eq!(report.totals.collisions, collisions);
    }

    #[test]
    fn test_contention_with_sensing() {
        let (summary, report, config) =
            run(config(ServerMode::Contention, ArbitrationPolicy::SensingBeb, 3));
        assert_complete(&summary, &config);
        assert!(report.totals.probes >= 3 * 13);
    }

    /// a single ALOHA requester always wins its draw
    #[test]
    fn test_slotted_aloha_single_requester() {
        let (summary, report, config) =
            run(config(ServerMode::Contention, ArbitrationPolicy::SlottedAloha, 1));
        assert_complete(&summary, &config);
        assert_eq!(summary.reports[0].collisions, 0);
        assert_eq!(report.totals.requests, 13);
    }

    #[test]
    fn test_fifo_with_direct_requesters() {
        let (summary, report, config) =
            run(config(ServerMode::Fifo, ArbitrationPolicy::Direct, 4));
        assert_complete(&summary, &config);
        assert_eq!(report.dispatched, 4 * 13);
        assert_eq!(report.totals.collisions, 0);
    }

    #[test]
    fn test_round_robin_with_pipelined_requester() {
        let mut config: Config = config(ServerMode::RoundRobin, ArbitrationPolicy::Direct, 3);
        config.rogue_clients = 1;
        let (summary, report, config) = run(config);
        assert_complete(&summary, &config);
        assert_eq!(report.failed_connections, 0);
        let pipelined = summary.reports.iter().find(|r| r.requester == 1).unwrap();
        assert!(pipelined.attempts >= 13);
    }
}
