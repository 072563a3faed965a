//! Drives [`GdbAdapter::connect`] end to end against a loopback stub,
//! exercising the same wire exchange the `rsp_loopback` test drives at the
//! connector level, but through the public `Adapter` surface, plus the
//! connect-retry behavior configured by `CoreConfig` (spec §8 scenario 6).

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use dbgcore::adapters::gdb::GdbAdapter;
use dbgcore::config::CoreConfig;
use dbgcore::Adapter;

const STUB_TARGET_XML: &str = r#"<target>
<architecture>i386:x86-64</architecture>
<osabi>GNU/Linux</osabi>
<feature name="org.gnu.gdb.i386.core">
<reg name="eax" bitsize="32" regnum="0"/>
<reg name="eip" bitsize="32" regnum="1"/>
</feature>
</target>"#;

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

fn run_connect_script(stream: &mut TcpStream) {
    let qsupported = read_frame(stream);
    assert!(qsupported.starts_with("qSupported:"));
    send_frame(stream, b"PacketSize=1000;swbreak+;hwbreak+");

    let xfer = read_frame(stream);
    assert!(xfer.starts_with("qXfer:features:read:target.xml:0,"));
    let mut reply = vec![b'l'];
    reply.extend_from_slice(STUB_TARGET_XML.as_bytes());
    send_frame(stream, &reply);

    let query = read_frame(stream);
    assert_eq!(query, "?");
    send_frame(stream, b"T05thread:1;");

    let g = read_frame(stream);
    assert_eq!(g, "g");
    send_frame(stream, b"44332211ddccbbaa");
}

#[test]
fn adapter_connect_completes_full_negotiation() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept connection");
        stream.set_nodelay(true).ok();
        run_connect_script(&mut stream);
    });

    let mut adapter = GdbAdapter::new();
    let connected = adapter.connect("127.0.0.1", port).expect("connect succeeds");
    assert!(connected);
    assert_eq!(adapter.get_target_architecture().unwrap(), "x86_64");

    server.join().expect("stub thread did not panic");
}

#[test]
fn adapter_connect_retries_until_listener_appears() {
    // Reserve a port, then release it immediately so the adapter's first one
    // or two attempts race against nothing listening yet.
    let probe = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = CoreConfig::new()
        .with_port_scan_range(port, 1)
        .with_gdbserver_path("unused-for-connect");
    let config = CoreConfig {
        connect_retry_delay: Duration::from_millis(50),
        connect_retries: 6,
        ..config
    };

    let server = thread::spawn(move || {
        // Give the adapter's first couple of connect attempts time to fail
        // before a listener exists on this port.
        thread::sleep(Duration::from_millis(120));
        let listener = TcpListener::bind(("127.0.0.1", port)).expect("bind delayed listener");
        let (mut stream, _) = listener.accept().expect("accept delayed connection");
        stream.set_nodelay(true).ok();
        run_connect_script(&mut stream);
    });

    let mut adapter = GdbAdapter::with_config(config);
    let connected = adapter
        .connect("127.0.0.1", port)
        .expect("connect eventually succeeds after retries");
    assert!(connected);

    server.join().expect("stub thread did not panic");
}
