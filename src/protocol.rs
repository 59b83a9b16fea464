//! DNS wire format for mDNS: query encoding, response decoding, name
//! decompression and the typed payloads of the record types this crate acts on.

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::net::Ipv4Addr;

use anyhow::{anyhow, bail, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_NAPTR: u16 = 35;
pub const TYPE_OPT: u16 = 41;
pub const TYPE_NSEC: u16 = 47;
pub const TYPE_IXFR: u16 = 251;
pub const TYPE_AXFR: u16 = 252;
pub const QTYPE_ANY: u16 = 255;

pub const CLASS_IN: u16 = 1;
/// Question-class bit asking responders to prefer a unicast reply.
pub const CLASS_UNICAST_RESPONSE: u16 = 0x8000;

pub const FLAG_RESPONSE: u16 = 0x8000;
pub const FLAG_AUTHORITATIVE: u16 = 0x0400;

/// Upper bound on compression pointers followed per name.
const MAX_POINTER_HOPS: u32 = 64;

/// Decoded payload of a resource record. Types without a handler are carried
/// as [`RData::Other`] with the raw bytes still available on the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Ptr(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Txt(HashMap<String, String>),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RR {
    pub name: String,
    pub typ: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
    pub data: RData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub typ: u16,
    pub class: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    pub source: std::net::SocketAddr,
    pub transaction: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<RR>,
    pub authority: Vec<RR>,
    pub additional: Vec<RR>,
}

impl DnsMessage {
    /// mDNS queriers only act on responses with transaction id 0 and both
    /// the response and authoritative-answer flags set.
    pub fn is_authoritative_response(&self) -> bool {
        let required = FLAG_RESPONSE | FLAG_AUTHORITATIVE;
        self.transaction == 0 && self.flags & required == required
    }

    /// All resource records in wire order: answers, authority, additional.
    /// Questions are dropped; an echoed question is not an answer.
    pub fn into_records(self) -> Vec<RR> {
        let mut records = self.answers;
        records.extend(self.authority);
        records.extend(self.additional);
        records
    }
}

/// Mnemonic for a record type, for logs and demo output.
pub fn type_name(typ: u16) -> &'static str {
    match typ {
        TYPE_A => "A",
        TYPE_NS => "NS",
        TYPE_CNAME => "CNAME",
        TYPE_SOA => "SOA",
        TYPE_PTR => "PTR",
        TYPE_MX => "MX",
        TYPE_TXT => "TXT",
        TYPE_AAAA => "AAAA",
        TYPE_SRV => "SRV",
        TYPE_NAPTR => "NAPTR",
        TYPE_OPT => "OPT",
        TYPE_NSEC => "NSEC",
        TYPE_IXFR => "IXFR",
        TYPE_AXFR => "AXFR",
        QTYPE_ANY => "ANY",
        _ => "TYPE?",
    }
}

impl fmt::Display for RR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ttl={}", self.name, type_name(self.typ), self.ttl)?;
        match &self.data {
            RData::A(ip) => write!(f, " {}", ip),
            RData::Ptr(target) => write!(f, " -> {}", target),
            RData::Srv { port, target, .. } => write!(f, " port={} target={}", port, target),
            RData::Txt(map) => write!(f, " {} txt items", map.len()),
            RData::Other => write!(f, " {} rdata bytes", self.rdata.len()),
        }
    }
}

fn encode_name(name: &str, out: &mut Vec<u8>) -> Result<()> {
    for seg in name.split('.') {
        if seg.is_empty() {
            continue;
        }
        let bytes = seg.as_bytes();
        if bytes.len() > 0x3f {
            bail!("label '{}' exceeds 63 bytes", seg);
        }
        out.write_u8(bytes.len() as u8)?;
        out.write_all(bytes)?;
    }
    out.write_u8(0)?;
    Ok(())
}

/// Build a one-question query message. Emitted names are never compressed and
/// the question class requests a unicast response.
pub fn create_query(name: &str, qtype: u16) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(512);
    out.write_u16::<BigEndian>(0)?; // transaction id
    out.write_u16::<BigEndian>(0)?; // flags
    out.write_u16::<BigEndian>(1)?; // questions
    out.write_u16::<BigEndian>(0)?; // answers
    out.write_u16::<BigEndian>(0)?; // authority
    out.write_u16::<BigEndian>(0)?; // additional

    encode_name(name, &mut out)?;

    out.write_u16::<BigEndian>(qtype)?;
    out.write_u16::<BigEndian>(CLASS_UNICAST_RESPONSE | CLASS_IN)?;
    Ok(out)
}

/// Read a possibly-compressed name starting at the cursor position.
///
/// The cursor ends up just past the name's bytes in the current record: once
/// a pointer is followed, that is exactly 2 bytes past the pointer, however
/// long the jumped-to name is. Pointers must target an earlier offset of the
/// datagram; at most [`MAX_POINTER_HOPS`] are followed.
fn read_name(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = cursor.position() as usize;
    let mut jumped = false;
    let mut hops = 0u32;
    loop {
        let len = *data
            .get(pos)
            .ok_or_else(|| anyhow!("name runs past end of message"))? as usize;
        if len == 0 {
            pos += 1;
            if !jumped {
                cursor.set_position(pos as u64);
            }
            break;
        } else if len & 0xc0 == 0xc0 {
            let low = *data
                .get(pos + 1)
                .ok_or_else(|| anyhow!("truncated compression pointer"))?
                as usize;
            let off = ((len & 0x3f) << 8) | low;
            if off >= pos {
                bail!("compression pointer at {} does not point backwards", pos);
            }
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                bail!("compression pointer chain exceeds {} hops", MAX_POINTER_HOPS);
            }
            if !jumped {
                cursor.set_position((pos + 2) as u64);
                jumped = true;
            }
            pos = off;
        } else if len & 0xc0 != 0 {
            bail!("reserved label length {:#04x}", len);
        } else {
            let end = pos + 1 + len;
            let bytes = data
                .get(pos + 1..end)
                .ok_or_else(|| anyhow!("label runs past end of message"))?;
            labels.push(std::str::from_utf8(bytes)?.to_owned());
            pos = end;
        }
    }
    Ok(labels.join("."))
}

/// Read a name out of a record's rdata. Compression pointers may reach back
/// into the whole datagram, but the name's own bytes must stay inside rdata.
fn read_rdata_name(data: &[u8], rdata_start: usize, rdata_end: usize) -> Result<String> {
    let mut cursor = Cursor::new(data);
    cursor.set_position(rdata_start as u64);
    let name = read_name(data, &mut cursor)?;
    if cursor.position() as usize > rdata_end {
        bail!("name runs past end of rdata");
    }
    Ok(name)
}

fn parse_txt(rdata: &[u8]) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    let mut pos = 0usize;
    while pos < rdata.len() {
        let len = rdata[pos] as usize;
        pos += 1;
        let item = rdata
            .get(pos..pos + len)
            .ok_or_else(|| anyhow!("txt item runs past rdata"))?;
        pos += len;
        if item.is_empty() {
            // placeholder byte of an empty TXT record
            continue;
        }
        let item = std::str::from_utf8(item)?;
        match item.split_once('=') {
            Some((key, value)) => out.insert(key.to_owned(), value.to_owned()),
            None => out.insert(item.to_owned(), String::new()),
        };
    }
    Ok(out)
}

/// Decode the payload of one record. `rdata_start` is the rdata's offset in
/// the full datagram so PTR/SRV targets can chase compression pointers.
///
/// `Ok(None)` drops just this record; `Err` rejects the whole datagram.
fn decode_rdata(data: &[u8], rdata_start: usize, rdata: &[u8], typ: u16) -> Result<Option<RData>> {
    match typ {
        TYPE_A => {
            if rdata.len() != 4 {
                return Ok(None);
            }
            Ok(Some(RData::A(Ipv4Addr::new(
                rdata[0], rdata[1], rdata[2], rdata[3],
            ))))
        }
        TYPE_PTR => {
            let target = read_rdata_name(data, rdata_start, rdata_start + rdata.len())?;
            Ok(Some(RData::Ptr(target)))
        }
        TYPE_SRV => {
            if rdata.len() < 6 {
                bail!("srv rdata shorter than 6 bytes");
            }
            let mut fixed = Cursor::new(rdata);
            let priority = fixed.read_u16::<BigEndian>()?;
            let weight = fixed.read_u16::<BigEndian>()?;
            let port = fixed.read_u16::<BigEndian>()?;
            let target = read_rdata_name(data, rdata_start + 6, rdata_start + rdata.len())?;
            Ok(Some(RData::Srv {
                priority,
                weight,
                port,
                target,
            }))
        }
        TYPE_TXT => Ok(Some(RData::Txt(parse_txt(rdata)?))),
        _ => Ok(Some(RData::Other)),
    }
}

fn parse_rr(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<Option<RR>> {
    let name = read_name(data, cursor)?;
    let typ = cursor.read_u16::<BigEndian>()?;
    let class = cursor.read_u16::<BigEndian>()?;
    let ttl = cursor.read_u32::<BigEndian>()?;
    let dlen = cursor.read_u16::<BigEndian>()?;
    let rdata_start = cursor.position() as usize;
    let mut rdata = vec![0; dlen as usize];
    cursor.read_exact(&mut rdata)?;

    let data = match decode_rdata(data, rdata_start, &rdata, typ)? {
        Some(d) => d,
        None => return Ok(None),
    };
    Ok(Some(RR {
        name,
        typ,
        class,
        ttl,
        rdata,
        data,
    }))
}

fn parse_question(data: &[u8], cursor: &mut Cursor<&[u8]>) -> Result<Question> {
    let name = read_name(data, cursor)?;
    let typ = cursor.read_u16::<BigEndian>()?;
    let class = cursor.read_u16::<BigEndian>()?;
    Ok(Question { name, typ, class })
}

/// Parse one datagram into a [`DnsMessage`]. Any structural damage fails the
/// whole datagram; no partially-parsed message is returned.
pub fn parse_dns(data: &[u8], source: std::net::SocketAddr) -> Result<DnsMessage> {
    let mut cursor = Cursor::new(data);
    let transaction = cursor.read_u16::<BigEndian>()?;
    let flags = cursor.read_u16::<BigEndian>()?;
    let nquestions = cursor.read_u16::<BigEndian>()?;
    let nanswers = cursor.read_u16::<BigEndian>()?;
    let nauthority = cursor.read_u16::<BigEndian>()?;
    let nadditional = cursor.read_u16::<BigEndian>()?;

    let mut questions = Vec::new();
    for _ in 0..nquestions {
        questions.push(parse_question(data, &mut cursor)?);
    }

    let mut sections: [Vec<RR>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for (section, count) in sections
        .iter_mut()
        .zip([nanswers, nauthority, nadditional])
    {
        for _ in 0..count {
            if let Some(rr) = parse_rr(data, &mut cursor)? {
                section.push(rr);
            }
        }
    }
    let [answers, authority, additional] = sections;

    Ok(DnsMessage {
        source,
        transaction,
        flags,
        questions,
        answers,
        authority,
        additional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> std::net::SocketAddr {
        "192.168.1.9:5353".parse().unwrap()
    }

    #[test]
    fn query_wire_format() {
        let q = create_query("_services._dns-sd._udp.local", QTYPE_ANY).unwrap();
        let expected = hex::decode(concat!(
            "000000000001000000000000", // id=0 flags=0 qd=1 an=ns=ar=0
            "095f7365727669636573",     // _services
            "075f646e732d7364",         // _dns-sd
            "045f756470",               // _udp
            "056c6f63616c",             // local
            "00",
            "00ff", // qtype ANY
            "8001", // unicast-response | IN
        ))
        .unwrap();
        assert_eq!(q, expected);
    }

    #[test]
    fn query_skips_empty_segments() {
        let q = create_query("hue.local.", TYPE_A).unwrap();
        // trailing dot must not produce an empty label
        let tail = hex::decode("03687565056c6f63616c0000018001").unwrap();
        assert_eq!(&q[12..], &tail[..]);
    }

    #[test]
    fn response_with_compressed_names() {
        // two PTR answers for the service-type meta query; the second record's
        // name is a pointer to the first, both targets compress onto earlier
        // labels ("_printer" continues at "_tcp", which continues at "local")
        let msg = hex::decode(concat!(
            "000084000000000200000000",
            "095f7365727669636573", // offset 12
            "075f646e732d7364",     // offset 22
            "045f756470",           // offset 30
            "056c6f63616c",         // offset 35
            "00",
            "000c000100001194000d",
            "055f68747470", // offset 52
            "045f746370",   // offset 58
            "c023",         // -> "local"
            "c00c",
            "000c000100001194000b",
            "085f7072696e746572",
            "c03a", // -> "_tcp.local"
        ))
        .unwrap();
        let parsed = parse_dns(&msg, source()).unwrap();
        assert!(parsed.is_authoritative_response());
        assert_eq!(parsed.answers.len(), 2);
        assert_eq!(parsed.answers[0].name, "_services._dns-sd._udp.local");
        assert_eq!(parsed.answers[1].name, "_services._dns-sd._udp.local");
        assert_eq!(
            parsed.answers[0].data,
            RData::Ptr("_http._tcp.local".to_owned())
        );
        assert_eq!(
            parsed.answers[1].data,
            RData::Ptr("_printer._tcp.local".to_owned())
        );
    }

    #[test]
    fn a_record_decodes_to_ipv4() {
        let msg = hex::decode(concat!(
            "000084000000000100000000",
            "03687565056c6f63616c00", // hue.local
            "0001",                   // A
            "8001",                   // cache-flush | IN; high bit ignored
            "00000078",
            "0004",
            "c0a80132",
        ))
        .unwrap();
        let parsed = parse_dns(&msg, source()).unwrap();
        assert_eq!(parsed.answers.len(), 1);
        let rr = &parsed.answers[0];
        assert_eq!(rr.name, "hue.local");
        assert_eq!(rr.data, RData::A(Ipv4Addr::new(192, 168, 1, 50)));
    }

    #[test]
    fn a_record_with_bad_length_is_dropped() {
        let msg = hex::decode(concat!(
            "000084000000000200000000",
            "03687565056c6f63616c00",
            "0001000100000078",
            "0003",   // rdlength 3: record dropped
            "c0a801",
            "c00c",
            "0001000100000078",
            "0004",
            "c0a80132", // second record survives
        ))
        .unwrap();
        let parsed = parse_dns(&msg, source()).unwrap();
        assert_eq!(parsed.answers.len(), 1);
        assert_eq!(
            parsed.answers[0].data,
            RData::A(Ipv4Addr::new(192, 168, 1, 50))
        );
    }

    #[test]
    fn questions_are_parsed_before_answers() {
        let msg = hex::decode(concat!(
            "000084000001000100000000",
            "03687565056c6f63616c00", // echoed question
            "00010001",
            "c00c", // answer name points back at the question's
            "0001000100000078",
            "0004",
            "c0a80132",
        ))
        .unwrap();
        let parsed = parse_dns(&msg, source()).unwrap();
        assert_eq!(parsed.questions.len(), 1);
        assert_eq!(parsed.questions[0].name, "hue.local");
        assert_eq!(parsed.answers[0].name, "hue.local");
        assert_eq!(parsed.into_records().len(), 1);
    }

    #[test]
    fn srv_record_decodes_fields_and_target() {
        let msg = hex::decode(concat!(
            "000084000000000100000000",
            "075072696e746572", // Printer
            "055f68747470",     // _http
            "045f746370",       // _tcp
            "056c6f63616c",     // local
            "00",
            "0021", // SRV
            "0001",
            "00000078",
            "0013",
            "000a00050050", // priority 10, weight 5, port 80
            "05686f737431056c6f63616c00", // host1.local
        ))
        .unwrap();
        let parsed = parse_dns(&msg, source()).unwrap();
        let rr = &parsed.answers[0];
        assert_eq!(rr.name, "Printer._http._tcp.local");
        assert_eq!(
            rr.data,
            RData::Srv {
                priority: 10,
                weight: 5,
                port: 80,
                target: "host1.local".to_owned(),
            }
        );
    }

    #[test]
    fn txt_items_with_and_without_values() {
        let rdata = hex::decode(concat!(
            "0b76656e646f723d61636d65", // vendor=acme
            "066d6f64656c3d",           // model=
            "066c6567616379",           // legacy
        ))
        .unwrap();
        let map = parse_txt(&rdata).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["vendor"], "acme");
        assert_eq!(map["model"], "");
        assert_eq!(map["legacy"], "");
    }

    #[test]
    fn empty_txt_rdata_yields_empty_map() {
        assert!(parse_txt(&[]).unwrap().is_empty());
        // single placeholder byte of an empty TXT record
        assert!(parse_txt(&[0]).unwrap().is_empty());
    }

    #[test]
    fn overlong_txt_item_is_rejected() {
        let rdata = hex::decode("056162").unwrap();
        assert!(parse_txt(&rdata).is_err());
    }

    #[test]
    fn forward_pointer_is_rejected() {
        // question name is a pointer to its own offset
        let msg = hex::decode(concat!(
            "000084000001000000000000",
            "c00c",
            "00010001",
        ))
        .unwrap();
        assert!(parse_dns(&msg, source()).is_err());
    }

    #[test]
    fn pointer_cycle_hits_hop_limit() {
        // label "a" followed by a pointer back to it: backward-only pointers
        // can still cycle, the hop cap must stop them
        let msg = hex::decode(concat!(
            "000084000001000000000000",
            "0161c00c",
            "00010001",
        ))
        .unwrap();
        let err = parse_dns(&msg, source()).unwrap_err();
        assert!(err.to_string().contains("hops"), "{}", err);
    }

    #[test]
    fn truncated_record_fails_whole_datagram() {
        let msg = hex::decode(concat!(
            "000084000000000100000000",
            "03687565056c6f63616c00",
            "0001000100000078",
            "0010", // rdlength 16 but only 4 bytes follow
            "c0a80132",
        ))
        .unwrap();
        assert!(parse_dns(&msg, source()).is_err());
    }

    #[test]
    fn ptr_target_must_stay_inside_rdata() {
        // rdlength 2 but the uncompressed target needs 11 bytes
        let msg = hex::decode(concat!(
            "000084000000000100000000",
            "055f68747470045f746370056c6f63616c00", // _http._tcp.local
            "000c0001000000780002",
            "0361", // runs on into the following bytes
            "626300",
        ))
        .unwrap();
        assert!(parse_dns(&msg, source()).is_err());
    }

    #[test]
    fn non_authoritative_responses_are_detected() {
        // QR without AA
        let parsed = parse_dns(&hex::decode("000080000000000000000000").unwrap(), source()).unwrap();
        assert!(!parsed.is_authoritative_response());
        // nonzero transaction id
        let parsed = parse_dns(&hex::decode("000184000000000000000000").unwrap(), source()).unwrap();
        assert!(!parsed.is_authoritative_response());
        // QR | AA, transaction 0
        let parsed = parse_dns(&hex::decode("000084000000000000000000").unwrap(), source()).unwrap();
        assert!(parsed.is_authoritative_response());
    }

    #[test]
    fn records_format_for_logs() {
        let rr = RR {
            name: "hue.local".to_owned(),
            typ: TYPE_A,
            class: 1,
            ttl: 120,
            rdata: vec![192, 168, 1, 50],
            data: RData::A(Ipv4Addr::new(192, 168, 1, 50)),
        };
        assert_eq!(rr.to_string(), "hue.local A ttl=120 192.168.1.50");
        assert_eq!(type_name(TYPE_SRV), "SRV");
        assert_eq!(type_name(999), "TYPE?");
    }

    #[test]
    fn unknown_rrtype_is_kept_opaque() {
        let msg = hex::decode(concat!(
            "000084000000000100000000",
            "03687565056c6f63616c00",
            "002f", // NSEC
            "0001",
            "00000078",
            "0004",
            "deadbeef",
        ))
        .unwrap();
        let parsed = parse_dns(&msg, source()).unwrap();
        assert_eq!(parsed.answers[0].typ, TYPE_NSEC);
        assert_eq!(parsed.answers[0].data, RData::Other);
        assert_eq!(parsed.answers[0].rdata, hex::decode("deadbeef").unwrap());
    }
}
