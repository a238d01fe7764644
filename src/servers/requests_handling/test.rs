#[cfg(test)]
mod request_tests {
    use std::{thread, time::Duration};

    use crate::{
        error::ProtocolError,
        servers::{
            requests_handling::{end_to_result, ChannelEnd, Inbound, RequestChannel},
            test_utils::{dummy_connection, TEST_TIMEOUT},
        },
    };

    #[test]
    fn test_decodes_requests_and_probes() {
        let (mut client, server) = dummy_connection();
        let (source, _sink) = server.into_parts();
        let mut channel: RequestChannel = RequestChannel::new(4, source);

        client.send("12\nBUSY?\nabc\n").unwrap();
        match channel.next_inbound().unwrap() {
            Inbound::Request(req) => {
                assert_eq!(req.requester, 4);
                assert_eq!(req.offset, 12);
            }
            other => panic!("expected a request, got {other:?}"),
        }
        assert_eq!(channel.next_inbound().unwrap(), Inbound::Probe);
        assert_eq!(
            channel.next_inbound().unwrap(),
            Inbound::Malformed(ProtocolError::BadRequest("abc".to_owned()))
        );
        assert_eq!(channel.received(), 3);
        assert_eq!(channel.requester(), 4);
    }

    #[test]
    fn test_request_age_and_malformed_copy() {
        let (mut client, server) = dummy_connection();
        let (source, _sink) = server.into_parts();
        let mut channel: RequestChannel = RequestChannel::new(3, source);

        client.send("7\n+7\n").unwrap();
        let Inbound::Request(req) = channel.next_inbound().unwrap() else {
            panic!("expected a request");
        };
        thread::sleep(Duration::from_millis(20));
        assert!(req.queued_for() >= Duration::from_millis(20));

        let malformed: Inbound = channel.next_inbound().unwrap();
        assert_eq!(malformed.clone(), malformed);
        assert_eq!(
            malformed,
            Inbound::Malformed(ProtocolError::BadRequest("+7".to_owned()))
        );
    }

    #[test]
    fn test_stalled_peer_is_abandoned() {
        let (mut client, server) = dummy_connection();
        let (source, _sink) = server.into_parts();
        let mut channel: RequestChannel = RequestChannel::new(1, source);
        client.send("3").unwrap();
        let end: ChannelEnd = channel.next_inbound().unwrap_err();
        assert!(matches!(end, ChannelEnd::Abandoned));
        assert!(end_to_result(end).is_ok());
    }

    #[test]
    fn test_idle_peer_is_kept() {
        let (mut client, server) = dummy_connection();
        let (source, _sink) = server.into_parts();
        let mut channel: RequestChannel = RequestChannel::new(2, source);
        let late = thread::spawn(move || {
            thread::sleep(TEST_TIMEOUT + Duration::from_millis(200));
            client.send("5\n").unwrap();
            client
        });
        match channel.next_inbound().unwrap() {
            Inbound::Request(req) => assert_eq!(req.offset, 5),
            other => panic!("expected a request, got {other:?}"),
        }
        drop(late.join().unwrap());
    }

    #[test]
    fn test_closed_peer() {
        let (mut client, server) = dummy_connection();
        let (source, _sink) = server.into_parts();
        let mut channel: RequestChannel = RequestChannel::new(1, source);
        client.close();
        assert!(matches!(channel.next_inbound(), Err(ChannelEnd::Closed)));
    }
}
