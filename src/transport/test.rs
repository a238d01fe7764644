#[cfg(test)]
mod transport_tests {
    use std::{
        io::Write,
        net::{TcpListener, TcpStream},
        thread,
        time::Duration,
    };

    use crate::{
        error::{Error, TransportError},
        transport::{channel_pair, Connection, PeerHandle, MAX_LINE_LEN},
    };

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn test_channel_lines_split_and_merged() {
        let (mut a, mut b) = channel_pair(TIMEOUT);
        a.send("fir").unwrap();
        a.send("st\nsecond\r\nthi").unwrap();
        a.send("rd\n").unwrap();
        assert_eq!(b.receive_line().unwrap(), "first");
        assert_eq!(b.receive_line().unwrap(), "second");
        assert_eq!(b.receive_line().unwrap(), "third");
        b.send("back\n").unwrap();
        assert_eq!(a.receive_line().unwrap(), "back");
    }

    #[test]
    fn test_channel_timeout_keeps_partial_line() {
        let (mut a, mut b) = channel_pair(TIMEOUT);
        a.send("12").unwrap();
        assert!(matches!(
            b.receive_line(),
            Err(Error::Transport(TransportError::Timeout { timeout_ms: 200 }))
        ));
        a.send("3\n").unwrap();
        assert_eq!(b.receive_line().unwrap(), "123");
    }

    #[test]
    fn test_unterminated_line_is_bounded() {
        let (mut a, mut b) = channel_pair(TIMEOUT);
        let flood: String = "7".repeat(MAX_LINE_LEN / 4);
        for _ in 0..4 {
            a.send(&flood).unwrap();
        }
        assert!(matches!(
            b.receive_line(),
            Err(Error::Transport(TransportError::LineTooLong { limit: MAX_LINE_LEN }))
        ));
        a.send("8\n").unwrap();
        assert_eq!(b.receive_line().unwrap(), "8");
    }

    #[test]
    fn test_tcp_unterminated_line_is_bounded() {
        let listener: TcpListener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = thread::spawn(move || {
            let (mut stream, _): (TcpStream, _) = listener.accept().unwrap();
            let _ = stream.write_all(&vec![b'x'; MAX_LINE_LEN + 16]);
            stream
        });
        let mut conn: Connection = Connection::connect(addr, TIMEOUT).unwrap();
        let mut result = conn.receive_line();
        while matches!(result, Err(Error::Transport(TransportError::Timeout { .. }))) {
            result = conn.receive_line();
        }
        assert!(matches!(
            result,
            Err(Error::Transport(TransportError::LineTooLong { .. }))
        ));
        drop(writer.join().unwrap());
    }

    #[test]
    fn test_channel_close() {
        let (mut a, mut b) = channel_pair(TIMEOUT);
        a.send("last\n").unwrap();
        a.close();
        assert!(a.send("x\n").is_err());
        assert_eq!(b.receive_line().unwrap(), "last");
        assert!(matches!(
            b.receive_line(),
            Err(Error::Transport(TransportError::Closed))
        ));
    }

    #[test]
    fn test_peer_handle_shared_between_threads() {
        let (a, mut b) = channel_pair(TIMEOUT);
        let (_, sink) = a.into_parts();
        let peer: PeerHandle = PeerHandle::new(3, sink);
        assert_eq!(peer.id(), 3);
        let handles: Vec<thread::JoinHandle<()>> = (0..4)
            .map(|i: u32| {
                let peer: PeerHandle = peer.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        peer.send(&format!("{i},{i},{i}\n")).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for _ in 0..40 {
            let line: String = b.receive_line().unwrap();
            let words: Vec<&str> = line.split(',').collect();
            assert_eq!(words.len(), 3);
            assert!(words.iter().all(|w: &&str| *w == words[0]));
        }
    }

    #[test]
    fn test_tcp_lines_and_timeout() {
        let listener: TcpListener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = thread::spawn(move || {
            let (mut stream, _): (TcpStream, _) = listener.accept().unwrap();
            stream.write_all(b"one\ntw").unwrap();
            thread::sleep(Duration::from_millis(400));
            stream.write_all(b"o\n").unwrap();
        });
        let mut conn: Connection = Connection::connect(addr, TIMEOUT).unwrap();
        assert_eq!(conn.receive_line().unwrap(), "one");
        assert!(matches!(
            conn.receive_line(),
            Err(Error::Transport(TransportError::Timeout { .. }))
        ));
        let mut line: Option<String> = None;
        for _ in 0..10 {
            match conn.receive_line() {
                Ok(l) => {
                    line = Some(l);
                    break;
                }
                Err(Error::Transport(TransportError::Timeout { .. })) => {}
                Err(e) => panic!("{e}"),
            }
        }
        assert_eq!(line.as_deref(), Some("two"));
        writer.join().unwrap();
        assert!(matches!(
            conn.receive_line(),
            Err(Error::Transport(TransportError::Closed))
        ));
    }
}
