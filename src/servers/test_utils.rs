use std::{sync::Arc, time::Duration};

use crate::{
    config::{ArbitrationPolicy, Config, ServerMode},
    corpus::WordCorpus,
    error::{Error, TransportError},
    transport::{channel_pair, Connection, PeerHandle, RequesterId},
};

/// bound used by every in-memory test transport
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// a server side peer handle plus the requester end of its connection
#[must_use]
pub(crate) fn dummy_peer(id: RequesterId) -> (PeerHandle, Connection) {
    let (server_end, client_end) = channel_pair(TEST_TIMEOUT);
    let (_, sink) = server_end.into_parts();
    (PeerHandle::new(id, sink), client_end)
}

/// both ends of an in-memory connection
#[must_use]
pub(crate) fn dummy_connection() -> (Connection, Connection) {
    channel_pair(TEST_TIMEOUT)
}

/// the four word corpus used across the tests
#[must_use]
pub(crate) fn fox_corpus() -> Arc<WordCorpus> {
    Arc::new(WordCorpus::new(["the", "quick", "brown", "fox"]).unwrap())
}

/// every line already buffered on `conn`, stops at the first timeout
pub(crate) fn drain_lines(conn: &mut Connection) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    loop {
        match conn.receive_line() {
            Ok(line) => lines.push(line),
            Err(Error::Transport(TransportError::Timeout { .. } | TransportError::Closed)) => {
                return lines
            }
            Err(e) => panic!("unexpected transport error {e}"),
        }
    }
}

/// loopback configuration with short bounds, `k` = 2 and `p` = 1
#[must_use]
pub(crate) fn test_config(mode: ServerMode, num_clients: usize) -> Config {
    Config {
        server_ip: "127.0.0.1".to_owned(),
        server_port: 0,
        words_per_request: 2,
        words_per_packet: 1,
        num_clients,
        input_file: String::new(),
        slot_ms: 5,
        mode,
        arbitration: ArbitrationPolicy::Beb,
        max_attempts: 16,
        read_timeout_ms: 2000,
        turn_timeout_ms: 200,
        output_prefix: "output".to_owned(),
        seed: Some(7),
        rogue_clients: 0,
        rogue_burst: 3,
    }
}
