//! Spec §8 scenario 1: 128 connections through the reactor/transceiver/manager stack,
//! each round-tripping a random padded content block through a trivial echo responder.

use fastcgi_runtime::{Config, Manager};
use fastcgi_runtime::record::{self, Header, RecordType};
use fastcgi_runtime::request::{Handler, RequestContext};
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener as StdUnixListener, UnixStream};
use std::sync::Arc;
use std::time::Duration;

const CONNECTIONS: usize = 128;
const PAYLOAD_LEN: usize = 12314;

struct Echo;

impl Handler for Echo {
    fn response(&mut self, ctx: &mut RequestContext) -> anyhow::Result<bool> {
        let body = ctx.post.clone();
        ctx.stdout.write_raw(&body);
        Ok(true)
    }
}

fn begin_request(fcgi_id: u16) -> Vec<u8> {
    let content = [0u8, 1, 1, 0, 0, 0, 0, 0]; // role=Responder, keep_alive, reserved
    record::encode_record(RecordType::BeginRequest, fcgi_id, &content)
}

fn read_record(stream: &mut UnixStream) -> (Header, Vec<u8>) {
    let mut header_bytes = [0u8; record::HEADER_LENGTH];
    stream.read_exact(&mut header_bytes).unwrap();
    let header = Header::from_bytes(&header_bytes).unwrap();
    let mut body = vec![0u8; header.content_length as usize + header.padding_length as usize];
    stream.read_exact(&mut body).unwrap();
    body.truncate(header.content_length as usize);
    (header, body)
}

/// A pseudo-random byte generator good enough for a fixture, without pulling in `rand`:
/// a linear congruential generator seeded per-connection.
fn lcg_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2862933555777941757).wrapping_add(3037000493);
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.push((state >> 56) as u8);
    }
    out
}

#[test]
fn round_trip_echo_through_transceiver() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("echo.sock");
    let listener = StdUnixListener::bind(&path).unwrap();
    listener.set_nonblocking(true).unwrap();

    let manager = Manager::new(Config::new().workers(4), Arc::new(|| Echo)).unwrap();
    manager.listen_unix(mio::net::UnixListener::from_std(listener)).unwrap();
    manager.start();

    for i in 0..CONNECTIONS {
        let mut client = UnixStream::connect(&path).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let fcgi_id = 1;
        let payload = lcg_bytes(i as u64 + 1, PAYLOAD_LEN);

        client.write_all(&begin_request(fcgi_id)).unwrap();
        client
            .write_all(&record::encode_record(RecordType::Params, fcgi_id, &[]))
            .unwrap();
        for chunk in payload.chunks(record::MAX_CONTENT_LENGTH) {
            client
                .write_all(&record::encode_record(RecordType::Stdin, fcgi_id, chunk))
                .unwrap();
        }
        client
            .write_all(&record::encode_record(RecordType::Stdin, fcgi_id, &[]))
            .unwrap();

        let mut echoed = Vec::with_capacity(PAYLOAD_LEN);
        loop {
            let (header, body) = read_record(&mut client);
            match header.rec_type {
                RecordType::Stdout => echoed.extend_from_slice(&body),
                RecordType::EndRequest => break,
                other => panic!("unexpected record type {other:?}"),
            }
        }
        assert_eq!(echoed, payload, "connection {i} did not echo its payload exactly");
    }

    manager.stop();
    manager.join();
}
