use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use posync::net::{
    DefaultRtt, Direction, Frame, Message, NetworkEndpoint, NetworkSession, PortAssignment,
    PositionData, SessionConfig, SessionError, SessionEvent, UserAssignment,
};
use posync::player::{Pose, SharedPose};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn scripted_server() -> NetworkEndpoint {
    NetworkEndpoint::bind((LOCALHOST, 0), Duration::from_millis(20)).unwrap()
}

fn free_port() -> u16 {
    let socket = UdpSocket::bind((LOCALHOST, 0)).unwrap();
    socket.local_addr().unwrap().port()
}

fn config(server: &NetworkEndpoint) -> SessionConfig {
    SessionConfig {
        server_addr: server.local_addr(),
        bind_ip: LOCALHOST,
        handshake_retry_interval: Duration::from_millis(200),
        ..Default::default()
    }
}

fn start_session(
    config: SessionConfig,
    pose: Pose,
) -> (NetworkSession, Arc<SharedPose>, Receiver<SessionEvent>) {
    let source = Arc::new(SharedPose::new(pose));
    let (tx, rx) = mpsc::channel();
    let session = NetworkSession::start(config, source.clone(), Arc::new(tx)).unwrap();
    (session, source, rx)
}

fn wait_for_frame(
    endpoint: &NetworkEndpoint,
    timeout_ms: u64,
    accept: impl Fn(&Message) -> bool,
) -> Option<(Message, SocketAddr)> {
    let start = Instant::now();
    let mut buf = [0u8; 64];
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if let Some((size, from)) = endpoint.recv_from(&mut buf).unwrap() {
            if let Ok(message) = Message::decode(&buf[..size]) {
                if accept(&message) {
                    return Some((message, from));
                }
            }
        }
    }
    None
}

fn wait_for_event(
    events: &Receiver<SessionEvent>,
    timeout_ms: u64,
    accept: impl Fn(&SessionEvent) -> bool,
) -> Option<SessionEvent> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match events.recv_timeout(remaining) {
            Ok(event) if accept(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

fn wait_until(timeout_ms: u64, condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Answers the first port request and waits for the session to become ready.
fn complete_handshake(
    server: &NetworkEndpoint,
    session: &NetworkSession,
    events: &Receiver<SessionEvent>,
    user_id: u8,
) -> SocketAddr {
    let (_, client) =
        wait_for_frame(server, 1000, is_port_request).expect("No port request received");
    assert_eq!(client, session.local_addr());

    let port = free_port();
    let assignment = PortAssignment { user_id, port };
    server.send_to(&assignment.to_bytes(), client).unwrap();

    let ready = wait_for_event(events, 1000, is_ready);
    assert_eq!(ready, Some(SessionEvent::Ready { user_id, port }));

    SocketAddr::new(LOCALHOST, port)
}

fn is_port_request(message: &Message) -> bool {
    matches!(message, Message::PortRequest(_))
}

fn is_ready(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Ready { .. })
}

fn is_joined(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::RemotePlayerJoined { .. })
}

fn send_position(server: &NetworkEndpoint, to: SocketAddr, user_id: u8, x: f32) {
    let frame = PositionData {
        user_id,
        x,
        y: 0.0,
        z: 0.0,
        rot_y: 0.0,
    };
    server.send_to(&frame.to_bytes(), to).unwrap();
}

#[test]
fn test_session_full_flow() {
    let server = scripted_server();
    let (session, source, events) =
        start_session(config(&server), Pose::new(Vec3::new(1.0, 2.0, 3.0), 0.5));

    let listener = complete_handshake(&server, &session, &events, 7);
    assert_eq!(session.user_id(), Some(7));
    assert_eq!(session.assigned_port(), Some(listener.port()));

    source.publish(Pose::new(Vec3::new(4.0, 5.0, 6.0), 1.0));
    let (message, _) = wait_for_frame(&server, 1000, |m| {
        matches!(m, Message::PositionRtt(p) if p.position.x == 4.0)
    })
    .expect("No position stream after ready");

    let Message::PositionRtt(frame) = message else {
        unreachable!();
    };
    assert_eq!(frame.position.user_id, 7);
    assert_eq!(frame.position.y, 5.0);
    assert_eq!(frame.position.rot_y, 1.0);

    let echo = DefaultRtt {
        timestamp: frame.timestamp,
    };
    server.send_to(&echo.to_bytes(), listener).unwrap();
    let sample = wait_for_event(&events, 1000, |e| {
        matches!(e, SessionEvent::RttSample { .. })
    })
    .expect("No RTT sample");
    match sample {
        SessionEvent::RttSample {
            latest_ms,
            average_ms,
        } => {
            assert!(latest_ms >= 0.0);
            assert_eq!(average_ms, latest_ms);
        }
        _ => unreachable!(),
    }

    send_position(&server, listener, 3, 9.0);
    assert_eq!(
        wait_for_event(&events, 1000, is_joined),
        Some(SessionEvent::RemotePlayerJoined { user_id: 3 })
    );
    let remote = session.remote_player(3).expect("remote player stored");
    assert_eq!(remote.pose.position, Vec3::new(9.0, 0.0, 0.0));

    send_position(&server, listener, 7, 100.0);
    assert!(wait_until(1000, || session.stats().self_echoes == 1));
    assert!(session.remote_player(7).is_none());

    server.send_to(&[0, 1, 2], listener).unwrap();
    server.send_to(&[200], listener).unwrap();
    assert!(wait_until(1000, || {
        let stats = session.stats();
        stats.malformed_frames == 1 && stats.unknown_commands == 1
    }));

    send_position(&server, listener, 4, 1.0);
    assert_eq!(
        wait_for_event(&events, 1000, is_joined),
        Some(SessionEvent::RemotePlayerJoined { user_id: 4 })
    );
    assert_eq!(session.remote_players().len(), 2);

    session.shutdown();
    assert!(!session.is_running());
    session.shutdown();
}

#[test]
fn test_separate_user_assignment() {
    let server = scripted_server();
    let (session, _source, events) = start_session(config(&server), Pose::default());

    let (_, client) =
        wait_for_frame(&server, 1000, is_port_request).expect("No port request received");

    let port = free_port();
    let listener = SocketAddr::new(LOCALHOST, port);
    server
        .send_to(&PortAssignment { user_id: 0, port }.to_bytes(), client)
        .unwrap();
    assert!(wait_until(1000, || session.assigned_port() == Some(port)));
    assert_eq!(session.user_id(), None);

    // Broadcasts before the identity is known are all foreign.
    send_position(&server, listener, 9, 1.0);
    assert_eq!(
        wait_for_event(&events, 1000, is_joined),
        Some(SessionEvent::RemotePlayerJoined { user_id: 9 })
    );

    server
        .send_to(&UserAssignment { user_id: 9 }.to_bytes(), listener)
        .unwrap();
    assert_eq!(
        wait_for_event(&events, 1000, is_ready),
        Some(SessionEvent::Ready { user_id: 9, port })
    );

    let streamed = wait_for_frame(&server, 1000, |m| {
        matches!(m, Message::PositionRtt(p) if p.position.user_id == 9)
    });
    assert!(streamed.is_some());
}

#[test]
fn test_port_request_retries_until_timeout() {
    let server = scripted_server();
    let config = SessionConfig {
        handshake_retry_interval: Duration::from_millis(50),
        max_handshake_attempts: Some(3),
        ..config(&server)
    };
    let (session, _source, events) = start_session(config, Pose::default());

    for _ in 0..3 {
        assert!(wait_for_frame(&server, 1000, is_port_request).is_some());
    }

    let event = wait_for_event(&events, 1000, |e| {
        matches!(e, SessionEvent::HandshakeTimedOut { .. })
    });
    assert_eq!(event, Some(SessionEvent::HandshakeTimedOut { attempts: 3 }));
    assert!(wait_for_frame(&server, 200, is_port_request).is_none());
    assert_eq!(session.stats().port_requests_sent, 3);
    assert!(session.is_running());
}

#[test]
fn test_send_move_requires_ready() {
    let server = scripted_server();
    let (session, _source, events) = start_session(config(&server), Pose::default());

    assert!(matches!(
        session.send_move(Direction::EAST, 2.0),
        Err(SessionError::NotReady)
    ));

    complete_handshake(&server, &session, &events, 5);
    session.send_move(Direction::EAST, 2.0).unwrap();

    let (message, _) = wait_for_frame(&server, 1000, |m| matches!(m, Message::MoveRtt(_)))
        .expect("No move frame");
    let Message::MoveRtt(frame) = message else {
        unreachable!();
    };
    assert_eq!(frame.movement.user_id, 5);
    assert_eq!(frame.movement.direction, Direction::EAST);
    assert_eq!(frame.movement.speed, 2.0);

    session.shutdown();
    assert!(matches!(
        session.send_move(Direction::EAST, 2.0),
        Err(SessionError::Closed)
    ));
}

#[test]
fn test_start_fails_on_unbindable_address() {
    let config = SessionConfig {
        bind_ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)),
        ..Default::default()
    };
    let source = Arc::new(SharedPose::default());

    let result = NetworkSession::start(config, source, Arc::new(posync::net::NoopObserver));
    assert!(matches!(result, Err(SessionError::Socket(_))));
}

#[test]
fn test_drop_stops_workers() {
    let server = scripted_server();
    let (session, _source, _events) = start_session(config(&server), Pose::default());
    assert!(wait_for_frame(&server, 1000, is_port_request).is_some());

    drop(session);

    let mut buf = [0u8; 64];
    while server.recv_from(&mut buf).unwrap().is_some() {}
    thread::sleep(Duration::from_millis(300));
    assert!(server.recv_from(&mut buf).unwrap().is_none());
}

#[test]
fn test_shutdown_within_one_tick() {
    let server = scripted_server();
    let config = SessionConfig {
        tick_rate: 10,
        ..config(&server)
    };
    let tick = config.tick_interval();
    let (session, _source, _events) = start_session(config, Pose::default());
    assert!(wait_for_frame(&server, 1000, is_port_request).is_some());

    let started = Instant::now();
    session.shutdown();
    let elapsed = started.elapsed();

    assert!(!session.is_running());
    assert!(elapsed < tick + Duration::from_millis(100), "{:?}", elapsed);
}
