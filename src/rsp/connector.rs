//! Stateful wrapper over [`RspTransport`]: capability negotiation, target
//! description retrieval/parsing, register schema derivation, and
//! stop-reply decomposition (spec §4.3).

use std::collections::HashMap;

use crate::connection::Connection;
use crate::error::{DbgError, DbgResult};
use crate::model::RegisterInfo;
use crate::rsp::transport::{decode_hex_ascii, OutputMode, RspTransport};

/// Chunk size requested per `qXfer:features:read` exchange. Kept comfortably
/// under typical stub `PacketSize` limits (spec §4.3).
const XML_CHUNK_LEN: usize = 0x400;

/// The capability set negotiated on attach (spec §4.2/§4.3).
pub const BASE_CAPABILITIES: &[&str] = &[
    "swbreak+",
    "hwbreak+",
    "qRelocInsn+",
    "fork-events+",
    "vfork-events+",
    "exec-events+",
    "vContSupported+",
    "QThreadEvents+",
    "no-resumed+",
    "xmlRegisters=i386",
];

/// A parsed stop-reply packet (spec §4.3, §7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReply {
    /// `T<sig>key:value;...` — a running stop with metadata.
    Stopped { signal: u8, fields: HashMap<String, u64> },
    /// `W<code>` — the process exited normally.
    Exited(u8),
    /// `X<signal>` — the process was terminated by a signal.
    Terminated(u8),
    /// `S<sig>` — a legacy stop with only a signal number.
    LegacyStopped(u8),
    /// `E<code>` — the stub reported an error.
    Error(u8),
}

/// Stateful RSP connector: capability set, packet size limit, parsed
/// register schema, and the last active thread id.
pub struct RspConnector<C: Connection> {
    transport: RspTransport<C>,
    packet_size: usize,
    stub_capabilities: Vec<String>,
    register_info: HashMap<String, RegisterInfo>,
    architecture: Option<String>,
    os_abi: Option<String>,
    pub last_active_tid: Option<u32>,
}

impl<C: Connection> RspConnector<C> {
    /// Wrap a freshly-connected transport.
    pub fn new(conn: C) -> DbgResult<Self> {
        Ok(Self {
            transport: RspTransport::new(conn)?,
            packet_size: 0x1000,
            stub_capabilities: Vec::new(),
            register_info: HashMap::new(),
            architecture: None,
            os_abi: None,
            last_active_tid: None,
        })
    }

    /// Access the underlying transport (for raw/mixed-output exchanges the
    /// connector itself doesn't wrap, e.g. `vCont`).
    pub fn transport_mut(&mut self) -> &mut RspTransport<C> {
        &mut self.transport
    }

    /// Send `payload` and return the decoded reply bytes.
    pub fn exchange(&mut self, payload: &str) -> DbgResult<Vec<u8>> {
        self.transport.send_and_receive(payload.as_bytes())
    }

    /// Send `payload` and return the reply as a `String`.
    pub fn exchange_str(&mut self, payload: &str) -> DbgResult<String> {
        Ok(String::from_utf8_lossy(&self.exchange(payload)?).into_owned())
    }

    /// Send `payload`, tolerating interleaved `O` console-output packets per
    /// `mode`, returning only the final reply.
    pub fn exchange_mixed(&mut self, payload: &str, mode: OutputMode) -> DbgResult<Vec<u8>> {
        Ok(self
            .transport
            .send_and_receive_mixed(payload.as_bytes(), mode)?
            .reply)
    }

    /// Negotiate capabilities via `qSupported` (spec §4.3). Parses
    /// `PacketSize=<hex>` out of the reply and records the stub's
    /// advertised feature list.
    pub fn negotiate_capabilities(&mut self, requested: &[&str]) -> DbgResult<()> {
        let request = format!("qSupported:{}", requested.join(";"));
        let reply = self.exchange_str(&request)?;

        self.stub_capabilities = reply.split(';').map(|s| s.to_string()).collect();

        for field in reply.split(';') {
            if let Some(hex) = field.strip_prefix("PacketSize=") {
                if let Ok(size) = usize::from_str_radix(hex.trim(), 16) {
                    self.packet_size = size;
                }
            }
        }

        Ok(())
    }

    /// Whether the stub advertised `capability` (exact match, e.g.
    /// `"swbreak+"`) in its `qSupported` reply.
    pub fn stub_supports(&self, capability: &str) -> bool {
        self.stub_capabilities.iter().any(|c| c == capability)
    }

    /// Retrieve a complete XML document via chunked `qXfer:features:read`
    /// requests (spec §4.3).
    pub fn get_xml(&mut self, name: &str) -> DbgResult<String> {
        let mut doc = String::new();
        let mut offset = 0usize;

        loop {
            let request = format!(
                "qXfer:features:read:{}:{:x},{:x}",
                name, offset, XML_CHUNK_LEN
            );
            let reply = self.exchange(&request)?;

            if reply.is_empty() {
                return Err(DbgError::Protocol(
                    "empty qXfer:features:read reply".to_string(),
                ));
            }

            let marker = reply[0];
            let chunk = &reply[1..];
            doc.push_str(&String::from_utf8_lossy(chunk));

            match marker {
                b'l' => break,
                b'm' => {
                    offset += chunk.len();
                }
                b'E' => {
                    return Err(DbgError::Protocol(format!(
                        "qXfer:features:read failed: {}",
                        String::from_utf8_lossy(&reply)
                    )))
                }
                other => {
                    return Err(DbgError::Protocol(format!(
                        "unexpected qXfer marker {:#04x}",
                        other
                    )))
                }
            }
        }

        Ok(doc)
    }

    /// Parse `target.xml` into the register schema, deriving per-register
    /// bit offsets over the dense `regnum`-ordered prefix (spec §4.3, §3).
    pub fn load_register_info(&mut self) -> DbgResult<()> {
        let xml = self.get_xml("target.xml")?;
        let (architecture, os_abi, registers) = parse_target_xml(&xml)?;
        self.architecture = architecture;
        self.os_abi = os_abi;
        self.register_info = registers;
        Ok(())
    }

    /// The `<architecture>` value from the last-parsed `target.xml`, if any.
    pub fn architecture(&self) -> Option<&str> {
        self.architecture.as_deref()
    }

    /// The `<osabi>` value from the last-parsed `target.xml`, if any.
    pub fn os_abi(&self) -> Option<&str> {
        self.os_abi.as_deref()
    }

    /// The parsed register schema, keyed by register name.
    pub fn register_info(&self) -> &HashMap<String, RegisterInfo> {
        &self.register_info
    }

    /// The negotiated `PacketSize` limit.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Slice a `g`-packet's hex payload into register values using the
    /// derived offsets (spec §4.3, §8 scenario 2). Registers with no
    /// derived offset, or wider than 64 bits, are skipped (spec §3: vector
    /// registers are truncated/ignored at read time).
    pub fn decode_g_packet(&self, hex: &str) -> HashMap<String, u64> {
        let mut values = HashMap::new();
        for (name, info) in self.register_info.iter() {
            let offset = match info.offset {
                Some(o) => o,
                None => continue,
            };
            if info.bit_size == 0 || info.bit_size > 64 {
                continue;
            }
            let start_nibble = (offset / 4) as usize;
            let nibble_len = (info.bit_size / 4) as usize;
            if start_nibble + nibble_len > hex.len() {
                continue;
            }
            let chunk = &hex[start_nibble..start_nibble + nibble_len];
            if let Some(value) = decode_le_hex(chunk) {
                values.insert(name.clone(), value);
            }
        }
        values
    }

    /// Decompose a stop-reply packet into a key→u64 map, extracting
    /// `thread` into `last_active_tid` as a side effect (spec §4.3).
    pub fn parse_stop_reply(&mut self, packet: &[u8]) -> DbgResult<StopReply> {
        let reply = parse_stop_reply_bytes(packet)?;
        if let StopReply::Stopped { ref fields, .. } = reply {
            if let Some(&tid) = fields.get("thread") {
                self.last_active_tid = Some(tid as u32);
            }
        }
        Ok(reply)
    }

    /// Decode an `O`-prefixed packet's embedded text (exposed for adapters
    /// that read console output directly off a mixed-output exchange).
    pub fn decode_console_output(packet: &[u8]) -> DbgResult<String> {
        if packet.first() != Some(&b'O') {
            return Err(DbgError::Protocol("not an O packet".to_string()));
        }
        decode_hex_ascii(&packet[1..])
    }
}

/// Parse a stop-reply packet's bytes into a [`StopReply`], independent of
/// any connector state (split out so it can be unit tested without a live
/// connection).
fn parse_stop_reply_bytes(packet: &[u8]) -> DbgResult<StopReply> {
    if packet.is_empty() {
        return Err(DbgError::Protocol("empty stop-reply packet".to_string()));
    }

    match packet[0] {
        b'T' => {
            let sig = parse_two_hex(&packet[1..3])
                .ok_or_else(|| DbgError::Protocol("malformed T signal".to_string()))?;
            let fields = packet_to_map(&packet[3..]);
            Ok(StopReply::Stopped { signal: sig, fields })
        }
        b'W' => {
            let code = parse_two_hex(&packet[1..3])
                .ok_or_else(|| DbgError::Protocol("malformed W code".to_string()))?;
            Ok(StopReply::Exited(code))
        }
        b'X' => {
            let sig = parse_two_hex(&packet[1..3])
                .ok_or_else(|| DbgError::Protocol("malformed X signal".to_string()))?;
            Ok(StopReply::Terminated(sig))
        }
        b'S' => {
            let sig = parse_two_hex(&packet[1..3])
                .ok_or_else(|| DbgError::Protocol("malformed S signal".to_string()))?;
            Ok(StopReply::LegacyStopped(sig))
        }
        b'E' => {
            let code = parse_two_hex(&packet[1..3]).unwrap_or(0);
            Ok(StopReply::Error(code))
        }
        other => Err(DbgError::Protocol(format!(
            "unrecognized stop-reply prefix {:#04x}",
            other
        ))),
    }
}

/// Split a `key:value;key:value;...` body into a key→u64 map, parsing
/// values as hex (spec §4.3). Malformed entries are skipped rather than
/// aborting the whole parse, since extra stub-specific fields are common.
fn packet_to_map(body: &[u8]) -> HashMap<String, u64> {
    let text = String::from_utf8_lossy(body);
    let mut map = HashMap::new();
    for entry in text.split(';') {
        if entry.is_empty() {
            continue;
        }
        if let Some((key, value)) = entry.split_once(':') {
            if let Ok(parsed) = u64::from_str_radix(value, 16) {
                map.insert(key.to_string(), parsed);
            }
        }
    }
    map
}

/// Interpret a hex string as a little-endian byte sequence, matching the
/// target byte order register values are transmitted in (spec §8 scenario
/// 2: `"aabbccdd"` as a 4-byte register yields `0xddccbbaa`).
fn decode_le_hex(hex: &str) -> Option<u64> {
    if hex.len() % 2 != 0 || hex.len() > 16 {
        return None;
    }
    let mut value: u64 = 0;
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let byte = u8::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
        value |= (byte as u64) << (i * 8);
    }
    Some(value)
}

fn parse_two_hex(bytes: &[u8]) -> Option<u8> {
    if bytes.len() < 2 {
        return None;
    }
    let s = std::str::from_utf8(&bytes[..2]).ok()?;
    u8::from_str_radix(s, 16).ok()
}

/// Parse a `target.xml` document into `(architecture, osabi, registers)`
/// (spec §4.3). A DOM parse is acceptable at this scale per spec §9, since
/// the document is bounded by the stub's `PacketSize`.
fn parse_target_xml(
    xml: &str,
) -> DbgResult<(Option<String>, Option<String>, HashMap<String, RegisterInfo>)> {
    let doc = roxmltree::Document::parse(xml.trim())
        .map_err(|e| DbgError::Protocol(format!("failed to parse target.xml: {}", e)))?;

    let mut architecture = None;
    let mut os_abi = None;
    let mut registers: HashMap<String, RegisterInfo> = HashMap::new();

    for node in doc.descendants() {
        match node.tag_name().name() {
            "architecture" => {
                architecture = node.text().map(|t| t.trim().to_string());
            }
            "osabi" => {
                os_abi = node.text().map(|t| t.trim().to_string());
            }
            "reg" => {
                let name = match node.attribute("name") {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                let bit_size = node
                    .attribute("bitsize")
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(0);
                let reg_num = match node.attribute("regnum").and_then(|v| v.parse::<u32>().ok()) {
                    Some(n) => n,
                    None => continue,
                };
                registers.insert(
                    name,
                    RegisterInfo { bit_size, reg_num, offset: None },
                );
            }
            _ => {}
        }
    }

    derive_register_offsets(&mut registers);

    Ok((architecture, os_abi, registers))
}

/// Compute each register's bit offset into the `g`-packet payload by
/// scanning in `regnum` order over the contiguous prefix where all widths
/// are known, stopping at the first gap (spec §3, §4.3).
fn derive_register_offsets(registers: &mut HashMap<String, RegisterInfo>) {
    let max_reg_num = match registers.values().map(|r| r.reg_num).max() {
        Some(m) => m,
        None => return,
    };

    let mut by_num: HashMap<u32, String> = HashMap::new();
    for (name, info) in registers.iter() {
        by_num.insert(info.reg_num, name.clone());
    }

    let mut offset: u32 = 0;
    for reg_num in 0..=max_reg_num {
        let name = match by_num.get(&reg_num) {
            Some(n) => n,
            None => break,
        };
        let bit_size = registers[name].bit_size;
        if bit_size == 0 {
            break;
        }
        registers.get_mut(name).unwrap().offset = Some(offset);
        offset += bit_size as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullConn;
    impl Connection for NullConn {
        type Error = std::io::Error;
        fn read(&mut self) -> Result<u8, Self::Error> {
            unimplemented!()
        }
        fn read_exact(&mut self, _buf: &mut [u8]) -> Result<(), Self::Error> {
            unimplemented!()
        }
        fn write(&mut self, _byte: u8) -> Result<(), Self::Error> {
            unimplemented!()
        }
        fn write_all(&mut self, _buf: &[u8]) -> Result<(), Self::Error> {
            unimplemented!()
        }
        fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
            unimplemented!()
        }
        fn flush(&mut self) -> Result<(), Self::Error> {
            unimplemented!()
        }
    }

    const SAMPLE_XML: &str = r#"
        <target>
            <architecture>i386:x86-64</architecture>
            <osabi>GNU/Linux</osabi>
            <feature name="org.gnu.gdb.i386.core">
                <reg name="eax" bitsize="32" regnum="0"/>
                <reg name="ecx" bitsize="32" regnum="1"/>
                <reg name="eip" bitsize="32" regnum="8"/>
            </feature>
        </target>
    "#;

    #[test]
    fn parses_architecture_and_osabi() {
        let (arch, os, _) = parse_target_xml(SAMPLE_XML).unwrap();
        assert_eq!(arch.as_deref(), Some("i386:x86-64"));
        assert_eq!(os.as_deref(), Some("GNU/Linux"));
    }

    #[test]
    fn derives_offsets_over_dense_prefix_only() {
        let (_, _, regs) = parse_target_xml(SAMPLE_XML).unwrap();
        assert_eq!(regs["eax"].offset, Some(0));
        assert_eq!(regs["ecx"].offset, Some(32));
        // regnum 2..7 are missing, so eip (regnum 8) gets no offset.
        assert_eq!(regs["eip"].offset, None);
    }

    #[test]
    fn packet_to_map_parses_hex_values() {
        let map = packet_to_map(b"thread:1a2b;core:2");
        assert_eq!(map.get("core"), Some(&0x2));
        assert_eq!(map.get("thread"), Some(&0x1a2b));
    }

    #[test]
    fn packet_to_map_of_empty_body_is_empty() {
        let map = packet_to_map(b"");
        assert!(map.is_empty());
    }

    #[test]
    fn decode_le_hex_reverses_byte_order() {
        assert_eq!(decode_le_hex("aabbccdd"), Some(0xddccbbaa));
        assert_eq!(decode_le_hex("11223344"), Some(0x44332211));
    }

    #[test]
    fn parses_exited_stop_reply() {
        match parse_stop_reply_bytes(b"W00").unwrap() {
            StopReply::Exited(code) => assert_eq!(code, 0),
            other => panic!("expected Exited, got {:?}", other),
        }
    }

    #[test]
    fn parses_stopped_stop_reply_with_thread_field() {
        match parse_stop_reply_bytes(b"T05thread:1a2b;").unwrap() {
            StopReply::Stopped { signal, fields } => {
                assert_eq!(signal, 0x05);
                assert_eq!(fields.get("thread"), Some(&0x1a2b));
            }
            other => panic!("expected Stopped, got {:?}", other),
        }
    }

    #[test]
    fn decode_g_packet_slices_by_derived_offset() {
        let (_, _, registers) = parse_target_xml(SAMPLE_XML).unwrap();
        let connector = RspConnector {
            transport: RspTransport::new(NullConn).unwrap(),
            packet_size: 0x1000,
            stub_capabilities: Vec::new(),
            register_info: registers,
            architecture: None,
            os_abi: None,
            last_active_tid: None,
        };

        let values = connector.decode_g_packet("aabbccdd11223344ffffffff");
        assert_eq!(values.get("eax"), Some(&0xddccbbaa));
        assert_eq!(values.get("ecx"), Some(&0x44332211));
        // eip has no derived offset, so it's never populated.
        assert_eq!(values.get("eip"), None);
    }
}
