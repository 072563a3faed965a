//! Drives a real [`RspConnector`] over a loopback TCP socket against a small
//! in-process stub thread that speaks just enough RSP to exercise framing,
//! capability negotiation, `target.xml` retrieval, register decoding, and
//! stop-reply parsing end to end (complements the mocked `NullConn`-based
//! unit tests in `rsp::transport`/`rsp::connector`, which never touch a real
//! socket).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use dbgcore::rsp::connector::{RspConnector, StopReply};

const STUB_TARGET_XML: &str = r#"<target>
<architecture>i386:x86-64</architecture>
<osabi>GNU/Linux</osabi>
<feature name="org.gnu.gdb.i386.core">
<reg name="eax" bitsize="32" regnum="0"/>
<reg name="eip" bitsize="32" regnum="1"/>
</feature>
</target>"#;

/// Read one `$<payload>#<chk>` frame off `stream`, ack it, and return the
/// unescaped payload. Panics on malformed input -- this is a test stub, not
/// a general-purpose implementation.
fn read_frame(stream: &mut TcpStream) -> String {
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).expect("read frame start");
        if byte[0] == b'$' {
            break;
        }
    }

    let mut payload = Vec::new();
    loop {
        stream.read_exact(&mut byte).expect("read frame byte");
        if byte[0] == b'#' {
            break;
        }
        payload.push(byte[0]);
    }

    let mut checksum = [0u8; 2];
    stream.read_exact(&mut checksum).expect("read checksum");
    stream.write_all(b"+").expect("send ack");

    String::from_utf8(payload).expect("payload is utf8")
}

/// Frame and send `payload` as a reply, then block for the client's ack.
fn send_frame(stream: &mut TcpStream, payload: &[u8]) {
    let chk = payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(b'$');
    frame.extend_from_slice(payload);
    frame.push(b'#');
    frame.extend_from_slice(format!("{:02x}", chk).as_bytes());
    stream.write_all(&frame).expect("send frame");

    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack).expect("read ack");
    assert_eq!(ack[0], b'+', "client did not ack our reply");
}

/// Spawn a thread that accepts one connection and plays a fixed scripted
/// exchange: `qSupported`, one chunked `qXfer:features:read:target.xml`
/// round, `?`, then a `g` register read. Returns the port it bound.
fn spawn_stub() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept stub connection");
        stream.set_nodelay(true).ok();

        let qsupported = read_frame(&mut stream);
        assert!(qsupported.starts_with("qSupported:"));
        send_frame(&mut stream, b"PacketSize=1000;swbreak+;hwbreak+");

        let xfer = read_frame(&mut stream);
        assert!(xfer.starts_with("qXfer:features:read:target.xml:0,"));
        let mut reply = vec![b'l'];
        reply.extend_from_slice(STUB_TARGET_XML.as_bytes());
        send_frame(&mut stream, &reply);

        let query = read_frame(&mut stream);
        assert_eq!(query, "?");
        send_frame(&mut stream, b"T05thread:1;");

        let g = read_frame(&mut stream);
        assert_eq!(g, "g");
        // eax = 0x11223344 (LE hex "44332211"), eip = 0xaabbccdd.
        send_frame(&mut stream, b"44332211ddccbbaa");
    });

    port
}

#[test]
fn connector_negotiates_and_decodes_over_real_socket() {
    let port = spawn_stub();
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to stub");

    let mut connector = RspConnector::new(stream).expect("wrap connection");

    connector
        .negotiate_capabilities(&["swbreak+", "hwbreak+"])
        .expect("negotiate capabilities");
    assert!(connector.stub_supports("swbreak+"));
    assert_eq!(connector.packet_size(), 0x1000);

    connector.load_register_info().expect("load register info");
    assert_eq!(connector.architecture(), Some("i386:x86-64"));
    assert_eq!(connector.os_abi(), Some("GNU/Linux"));

    let stop_packet = connector.exchange("?").expect("send ? query");
    let stop = connector.parse_stop_reply(&stop_packet).expect("parse stop reply");
    match stop {
        StopReply::Stopped { signal, fields } => {
            assert_eq!(signal, 0x05);
            assert_eq!(fields.get("thread"), Some(&1));
        }
        other => panic!("expected Stopped, got {:?}", other),
    }
    assert_eq!(connector.last_active_tid, Some(1));

    let g_reply = connector.exchange_str("g").expect("send g query");
    let registers = connector.decode_g_packet(&g_reply);
    assert_eq!(registers.get("eax"), Some(&0x11223344));
    assert_eq!(registers.get("eip"), Some(&0xaabbccdd));
}
