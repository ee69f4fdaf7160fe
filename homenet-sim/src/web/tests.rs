use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;

use homenet_core::config::{WebClientConfig, WebConfig, WebObjectConfig};
use homenet_core::engine::{SimTime, Simulator};
use homenet_core::trace::{MemorySink, ObjectKind, TraceValue, signals};

use super::{BrowsingPhase, WebClient, WebServer};
use crate::endpoint::{self, Application};
use crate::link::{Delivery, PathChannel};
use crate::topology::PathProfile;

fn path(loss_rate: f64) -> PathProfile {
    PathProfile {
        data_rate_bps: 5_000_000,
        delay: SimTime::from_millis(3),
        loss_rate,
        hops: 2,
    }
}

fn reliable(loss_rate: f64) -> PathChannel {
    PathChannel::new(
        path(loss_rate),
        Delivery::Reliable {
            retransmission_timeout: SimTime::from_millis(200),
        },
    )
}

fn browsing(
    sim: &mut Simulator,
    objects: &WebObjectConfig,
    client_config: &WebClientConfig,
    loss_rate: f64,
) -> (Rc<RefCell<WebServer>>, Rc<RefCell<WebClient>>) {
    let server_address = SocketAddr::from((Ipv4Addr::new(10, 1, 1, 2), 80));
    let client_address = SocketAddr::from((Ipv4Addr::new(10, 1, 3, 1), 49153));

    let server = WebServer::new("web-server", server_address, objects).unwrap();
    let client = WebClient::new(
        "web-client-0",
        client_address,
        server_address,
        reliable(loss_rate),
        client_config,
        objects,
    )
    .unwrap();
    client.borrow_mut().connect(&server);
    server
        .borrow_mut()
        .register_client(&client, reliable(loss_rate));

    endpoint::schedule_lifetime(sim, &server, SimTime::ZERO, SimTime::from_secs(300)).unwrap();
    endpoint::schedule_lifetime(sim, &client, client_config.start, client_config.stop).unwrap();
    (server, client)
}

fn size_of(value: &TraceValue) -> u32 {
    match value {
        TraceValue::Object { size, .. } => *size,
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn test_first_page_follows_connection() {
    let mut sim = Simulator::new(1);
    let web = WebConfig::default();
    let sink = Rc::new(MemorySink::new());
    sim.hub().attach_sink(sink.clone(), signals::ALL);
    let (server, client) = browsing(&mut sim, &web.objects, &web.clients[0], 0.0);

    sim.run(Some(SimTime::from_secs(5))).unwrap();

    let established = sink.records_for(signals::WEB_SERVER_CONNECTION_ESTABLISHED);
    assert_eq!(established.len(), 1);
    assert!(established[0].time > SimTime::from_secs(1));
    match &established[0].value {
        TraceValue::Connection { client: from, server: to } => {
            assert_eq!(*from, client.borrow().address());
            assert_eq!(*to, server.borrow().address());
        }
        other => panic!("unexpected payload {other:?}"),
    }

    let requests = sink.records_for(signals::WEB_CLIENT_TX);
    assert!(matches!(
        requests[0].value,
        TraceValue::Packet { size: 402, .. }
    ));
    let generated = sink.records_for(signals::WEB_SERVER_MAIN_OBJECT);
    let received = sink.records_for(signals::WEB_CLIENT_RX_MAIN_OBJECT);
    assert!(!received.is_empty());
    assert!(received.len() <= generated.len());
    assert_eq!(size_of(&generated[0].value), size_of(&received[0].value));
    assert!(received[0].time > generated[0].time);
    assert_eq!(server.borrow().connections(), 1);
}

#[test]
fn test_every_generated_object_arrives_over_lossy_path() {
    let mut sim = Simulator::new(17);
    let web = WebConfig::default();
    let sink = Rc::new(MemorySink::new());
    sim.hub().attach_sink(
        sink.clone(),
        &[
            signals::WEB_SERVER_MAIN_OBJECT,
            signals::WEB_SERVER_EMBEDDED_OBJECT,
            signals::WEB_CLIENT_RX_MAIN_OBJECT,
            signals::WEB_CLIENT_RX_EMBEDDED_OBJECT,
        ],
    );
    let objects = WebObjectConfig {
        reading_time_mean: SimTime::from_secs(2),
        ..web.objects.clone()
    };
    let (server, client) = browsing(&mut sim, &objects, &web.clients[0], 0.05);

    sim.run(Some(SimTime::from_secs(60))).unwrap();

    let sizes = |signal: &str| -> Vec<u32> {
        sink.records_for(signal).iter().map(|r| size_of(&r.value)).collect()
    };
    let sent_main = sizes(signals::WEB_SERVER_MAIN_OBJECT);
    let got_main = sizes(signals::WEB_CLIENT_RX_MAIN_OBJECT);
    let sent_embedded = sizes(signals::WEB_SERVER_EMBEDDED_OBJECT);
    let got_embedded = sizes(signals::WEB_CLIENT_RX_EMBEDDED_OBJECT);

    assert!(client.borrow().pages_completed() >= 3);
    // At most the object in transfer at the stop time is missing
    assert!(sent_main.len() - got_main.len() <= 1);
    assert!(sent_embedded.len() - got_embedded.len() <= 1);
    assert_eq!(&sent_main[..got_main.len()], &got_main[..]);
    assert_eq!(&sent_embedded[..got_embedded.len()], &got_embedded[..]);
    assert_eq!(
        server.borrow().objects_served(),
        (sent_main.len() + sent_embedded.len()) as u64
    );
}

#[test]
fn test_client_counts_payload_bytes() {
    let mut sim = Simulator::new(2);
    let web = WebConfig::default();
    let sink = Rc::new(MemorySink::new());
    sim.hub().attach_sink(sink.clone(), &[signals::WEB_CLIENT_RX]);
    let (_server, client) = browsing(&mut sim, &web.objects, &web.clients[1], 0.0);

    sim.run(Some(SimTime::from_secs(30))).unwrap();

    let packet_bytes: u64 = sink
        .records()
        .iter()
        .map(|r| match r.value {
            TraceValue::Packet { size, .. } => u64::from(size),
            _ => 0,
        })
        .sum();
    assert!(packet_bytes > 0);
    assert_eq!(client.borrow().bytes_received(), packet_bytes);
    assert!(sink.records().iter().all(|r| r.time > SimTime::from_secs(3)));
}

#[test]
fn test_stop_cancels_pending_page() {
    let mut sim = Simulator::new(4);
    let web = WebConfig::default();
    let client_config = WebClientConfig {
        stop: SimTime::from_secs(10),
        ..web.clients[0].clone()
    };
    let objects = WebObjectConfig {
        reading_time_mean: SimTime::from_secs(1),
        ..web.objects.clone()
    };
    let sink = Rc::new(MemorySink::new());
    sim.hub().attach_sink(sink.clone(), &[signals::WEB_CLIENT_TX]);
    let (_server, client) = browsing(&mut sim, &objects, &client_config, 0.0);

    sim.run(Some(SimTime::from_secs(60))).unwrap();

    assert!(!client.borrow().is_running());
    assert_eq!(client.borrow().phase(), BrowsingPhase::Idle);
    assert!(sink.records().iter().all(|r| r.time <= SimTime::from_secs(10)));
}

#[test]
fn test_unregistered_client_is_endpoint_fault() {
    let mut sim = Simulator::new(1);
    let web = WebConfig::default();
    let server = WebServer::new(
        "web-server",
        SocketAddr::from((Ipv4Addr::new(10, 1, 1, 2), 80)),
        &web.objects,
    )
    .unwrap();
    server.borrow_mut().start(&mut sim).unwrap();
    let stranger = SocketAddr::from((Ipv4Addr::new(10, 1, 3, 9), 40000));

    let result = server.borrow_mut().on_request(&mut sim, stranger, ObjectKind::Main, 100);

    assert!(matches!(result, Err(homenet_core::SimError::Endpoint { .. })));
}
