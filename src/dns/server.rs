//! Simple DNS Server
//!
//! Implements a minimal UDP DNS server. A queries for any name in class IN
//! (or ANY) are answered with the encoded time plus a signed TXT record in
//! the additional section.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info};

use crate::config::TimeDnsConfig;
use crate::dns::{DnsQueryResult, TimeDnsHandler, CLASS_IN, TYPE_A, TYPE_TXT};
use crate::timecodec::Timestamp;

/// DNS packet constants
const DNS_HEADER_SIZE: usize = 12;

/// Longest single TXT character-string
const MAX_TXT_STRING: usize = 255;

/// DNS flags
const FLAG_QR: u16 = 0x8000; // Query/Response
const FLAG_AA: u16 = 0x0400; // Authoritative Answer
const FLAG_TC: u16 = 0x0200; // Truncated
const FLAG_RD: u16 = 0x0100; // Recursion Desired
const OPCODE_MASK: u16 = 0x7800;

/// Response codes
const RCODE_NOTIMP: u16 = 4;

/// Pointer to the question name, which always starts right after the header
const NAME_PTR: u16 = 0xC000 | DNS_HEADER_SIZE as u16;

/// A parsed inbound query
#[derive(Debug, Clone)]
struct DnsQuery {
    id: u16,
    flags: u16,
    qname: String,
    qtype: u16,
    qclass: u16,
    /// Question section exactly as received, echoed into the response
    question: Vec<u8>,
}

/// Run the DNS server
pub async fn run_dns_server(
    config: Arc<TimeDnsConfig>,
    handler: Arc<TimeDnsHandler>,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(config.dns_addr()).await?;
    info!("🌐 DNS server listening on {}", socket.local_addr()?);

    serve(Arc::new(socket), handler, config.max_packet_size).await
}

/// Receive loop on an already bound socket; one task per datagram
pub async fn serve(
    socket: Arc<UdpSocket>,
    handler: Arc<TimeDnsHandler>,
    max_packet_size: usize,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; max_packet_size];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let request = buf[..len].to_vec();
                let handler = handler.clone();
                let socket = socket.clone();

                tokio::spawn(async move {
                    let Some(response) = handle_dns_query(
                        &handler,
                        src,
                        &request,
                        Timestamp::now(),
                        max_packet_size,
                    ) else {
                        return;
                    };

                    if let Err(e) = socket.send_to(&response, src).await {
                        debug!("DNS send error to {}: {}", src, e);
                    }
                });
            }
            Err(e) => {
                error!("DNS socket error: {}", e);
            }
        }
    }
}

/// Handle a single DNS query; `None` means send nothing
fn handle_dns_query(
    handler: &TimeDnsHandler,
    src: SocketAddr,
    request: &[u8],
    now: Timestamp,
    max_packet_size: usize,
) -> Option<Vec<u8>> {
    let query = match parse_query(request) {
        Ok(query) => query,
        Err(e) => {
            debug!("Dropping DNS packet from {}: {}", src, e);
            handler.metrics().inc_malformed_packets();
            return None;
        }
    };

    debug!(
        "DNS query: {} type {} class {} from {}",
        query.qname, query.qtype, query.qclass, src
    );

    if query.flags & OPCODE_MASK != 0 {
        debug!("Unsupported opcode from {}", src);
        return Some(build_dns_response(
            &query,
            &DnsQueryResult::default(),
            RCODE_NOTIMP,
            max_packet_size,
        ));
    }

    let result = handler.query(&query.qname, query.qtype, query.qclass, now);

    Some(build_dns_response(&query, &result, 0, max_packet_size))
}

/// Parse header and first question
fn parse_query(request: &[u8]) -> anyhow::Result<DnsQuery> {
    if request.len() < DNS_HEADER_SIZE {
        anyhow::bail!("Packet shorter than header");
    }

    let id = u16::from_be_bytes([request[0], request[1]]);
    let flags = u16::from_be_bytes([request[2], request[3]]);
    let qdcount = u16::from_be_bytes([request[4], request[5]]);

    if flags & FLAG_QR != 0 {
        anyhow::bail!("Packet is a response");
    }

    if qdcount == 0 {
        anyhow::bail!("No questions");
    }

    let (qname, qtype, qclass, len) = parse_question(&request[DNS_HEADER_SIZE..])?;

    Ok(DnsQuery {
        id,
        flags,
        qname,
        qtype,
        qclass,
        question: request[DNS_HEADER_SIZE..DNS_HEADER_SIZE + len].to_vec(),
    })
}

/// Parse DNS question section
///
/// Returns the name for logging, the query type and class, and the section
/// length.
fn parse_question(data: &[u8]) -> anyhow::Result<(String, u16, u16, usize)> {
    let mut name_parts = Vec::new();
    let mut offset = 0;

    // Parse name labels
    loop {
        if offset >= data.len() {
            anyhow::bail!("Truncated question");
        }

        let len = data[offset] as usize;
        if len == 0 {
            offset += 1;
            break;
        }

        // Also rejects compression pointers, which queries do not use
        if len > 63 {
            anyhow::bail!("Invalid label length");
        }

        offset += 1;
        if offset + len > data.len() {
            anyhow::bail!("Truncated label");
        }

        name_parts.push(String::from_utf8_lossy(&data[offset..offset + len]).into_owned());
        offset += len;

        if offset > 255 {
            anyhow::bail!("Name too long");
        }
    }

    if offset + 4 > data.len() {
        anyhow::bail!("Truncated question");
    }

    let qtype = u16::from_be_bytes([data[offset], data[offset + 1]]);
    let qclass = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
    offset += 4;

    let name = if name_parts.is_empty() {
        ".".to_string()
    } else {
        name_parts.join(".")
    };

    Ok((name, qtype, qclass, offset))
}

/// TXT rdata: the text split into length-prefixed character-strings
fn txt_rdata(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return vec![0];
    }

    let mut rdata = Vec::with_capacity(bytes.len() + bytes.len() / MAX_TXT_STRING + 1);
    for chunk in bytes.chunks(MAX_TXT_STRING) {
        rdata.push(chunk.len() as u8);
        rdata.extend_from_slice(chunk);
    }
    rdata
}

/// Append one resource record owned by the question name
fn push_record(response: &mut Vec<u8>, rtype: u16, ttl: u32, rdata: &[u8]) {
    response.extend_from_slice(&NAME_PTR.to_be_bytes());
    response.extend_from_slice(&rtype.to_be_bytes());
    response.extend_from_slice(&CLASS_IN.to_be_bytes());
    response.extend_from_slice(&ttl.to_be_bytes());
    response.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    response.extend_from_slice(rdata);
}

/// Build DNS response packet
///
/// The TXT record is dropped, and TC set, if it would not fit.
fn build_dns_response(
    query: &DnsQuery,
    result: &DnsQueryResult,
    rcode: u16,
    max_packet_size: usize,
) -> Vec<u8> {
    const RR_FIXED: usize = 12; // pointer + type + class + ttl + rdlength

    let a_rdata = result.address.map(|ip: Ipv4Addr| ip.octets());
    // A signature is only meaningful next to the address it signs
    let mut txt = result.txt.as_deref().filter(|_| a_rdata.is_some()).map(txt_rdata);

    let mut flags = FLAG_QR | FLAG_AA | (query.flags & (FLAG_RD | OPCODE_MASK)) | (rcode & 0x000F);

    let mut size = DNS_HEADER_SIZE + query.question.len();
    if a_rdata.is_some() {
        size += RR_FIXED + 4;
    }
    if let Some(txt_len) = txt.as_ref().map(Vec::len) {
        if size + RR_FIXED + txt_len > max_packet_size {
            flags |= FLAG_TC;
            txt = None;
        } else {
            size += RR_FIXED + txt_len;
        }
    }

    let ancount = u16::from(a_rdata.is_some());
    let arcount = u16::from(txt.is_some());

    let mut response = Vec::with_capacity(size);

    // Build header
    response.extend_from_slice(&query.id.to_be_bytes());
    response.extend_from_slice(&flags.to_be_bytes());
    response.extend_from_slice(&1u16.to_be_bytes()); // qdcount = 1
    response.extend_from_slice(&ancount.to_be_bytes()); // ancount
    response.extend_from_slice(&0u16.to_be_bytes()); // nscount = 0
    response.extend_from_slice(&arcount.to_be_bytes()); // arcount

    // Question section (echo back)
    response.extend_from_slice(&query.question);

    // Answer section
    if let Some(octets) = a_rdata {
        push_record(&mut response, TYPE_A, result.ttl, &octets);
    }

    // Additional section
    if let Some(rdata) = txt {
        push_record(&mut response, TYPE_TXT, result.ttl, &rdata);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::Answer;
    use crate::api::Metrics;
    use crate::crypto::{CryptoError, KeyManager};
    use crate::dns::{TimeSigner, CLASS_ANY};
    use crate::timecodec::{self, EncodedAddress};
    use std::sync::atomic::Ordering;

    const CLASS_CH: u16 = 3;

    /// Build a class IN query packet for `name` (labels kept as given)
    fn build_query(id: u16, flags: u16, name: &str, qtype: u16) -> Vec<u8> {
        build_query_in_class(id, flags, name, qtype, CLASS_IN)
    }

    fn build_query_in_class(id: u16, flags: u16, name: &str, qtype: u16, qclass: u16) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(&id.to_be_bytes());
        packet.extend_from_slice(&flags.to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        for label in name.split('.').filter(|l| !l.is_empty()) {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
        packet.push(0);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&qclass.to_be_bytes());
        packet
    }

    struct FailingSigner;

    impl TimeSigner for FailingSigner {
        fn sign_time(&self, _now: Timestamp) -> Result<(EncodedAddress, Answer), CryptoError> {
            Err(CryptoError::SigningFailed)
        }
    }

    /// Records of a response: (type, ttl, rdata) for answer and additional sections
    struct ParsedResponse {
        id: u16,
        flags: u16,
        question: Vec<u8>,
        answers: Vec<(u16, u32, Vec<u8>)>,
        additional: Vec<(u16, u32, Vec<u8>)>,
    }

    fn parse_response(packet: &[u8]) -> ParsedResponse {
        let ancount = u16::from_be_bytes([packet[6], packet[7]]) as usize;
        let nscount = u16::from_be_bytes([packet[8], packet[9]]) as usize;
        let arcount = u16::from_be_bytes([packet[10], packet[11]]) as usize;
        assert_eq!(nscount, 0);

        let (_, _, _, qlen) = parse_question(&packet[DNS_HEADER_SIZE..]).unwrap();
        let mut offset = DNS_HEADER_SIZE + qlen;

        let mut records = Vec::new();
        for _ in 0..ancount + arcount {
            assert_eq!(u16::from_be_bytes([packet[offset], packet[offset + 1]]), NAME_PTR);
            let rtype = u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]);
            let class = u16::from_be_bytes([packet[offset + 4], packet[offset + 5]]);
            assert_eq!(class, CLASS_IN);
            let ttl = u32::from_be_bytes(packet[offset + 6..offset + 10].try_into().unwrap());
            let rdlen = u16::from_be_bytes([packet[offset + 10], packet[offset + 11]]) as usize;
            offset += 12;
            records.push((rtype, ttl, packet[offset..offset + rdlen].to_vec()));
            offset += rdlen;
        }
        assert_eq!(offset, packet.len());

        let additional = records.split_off(ancount);
        ParsedResponse {
            id: u16::from_be_bytes([packet[0], packet[1]]),
            flags: u16::from_be_bytes([packet[2], packet[3]]),
            question: packet[DNS_HEADER_SIZE..DNS_HEADER_SIZE + qlen].to_vec(),
            answers: records,
            additional,
        }
    }

    /// Concatenate TXT character-strings
    fn txt_text(rdata: &[u8]) -> String {
        let mut text = Vec::new();
        let mut offset = 0;
        while offset < rdata.len() {
            let len = rdata[offset] as usize;
            text.extend_from_slice(&rdata[offset + 1..offset + 1 + len]);
            offset += 1 + len;
        }
        String::from_utf8(text).unwrap()
    }

    fn test_handler() -> Arc<TimeDnsHandler> {
        Arc::new(TimeDnsHandler::new(
            Arc::new(KeyManager::init(None).unwrap()),
            Arc::new(Metrics::new()),
        ))
    }

    fn src() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_parse_question() {
        // Build a test DNS question for "time.example.org"
        let mut data = Vec::new();
        data.push(4); // "time"
        data.extend_from_slice(b"time");
        data.push(7); // "example"
        data.extend_from_slice(b"example");
        data.push(3); // "org"
        data.extend_from_slice(b"org");
        data.push(0); // end
        data.extend_from_slice(&1u16.to_be_bytes()); // A record
        data.extend_from_slice(&1u16.to_be_bytes()); // IN class

        let (name, qtype, qclass, len) = parse_question(&data).unwrap();
        assert_eq!(name, "time.example.org");
        assert_eq!(qtype, TYPE_A);
        assert_eq!(qclass, CLASS_IN);
        assert_eq!(len, data.len());
    }

    #[test]
    fn test_parse_root_question() {
        let data = [0u8, 0, 1, 0, 3];
        let (name, qtype, qclass, len) = parse_question(&data).unwrap();
        assert_eq!(name, ".");
        assert_eq!(qtype, TYPE_A);
        assert_eq!(qclass, CLASS_CH);
        assert_eq!(len, 5);
    }

    #[test]
    fn test_parse_question_rejects_bad_input() {
        assert!(parse_question(&[]).is_err());
        assert!(parse_question(&[4, b't', b'i']).is_err());
        assert!(parse_question(&[0xC0, 0x0C, 0, 1, 0, 1]).is_err());
        assert!(parse_question(&[0, 0, 1]).is_err());
    }

    #[test]
    fn test_txt_rdata_chunks() {
        assert_eq!(txt_rdata(""), vec![0]);
        assert_eq!(txt_rdata("ab"), vec![2, b'a', b'b']);

        let long = "x".repeat(300);
        let rdata = txt_rdata(&long);
        assert_eq!(rdata.len(), 302);
        assert_eq!(rdata[0], 255);
        assert_eq!(rdata[256], 45);
        assert_eq!(txt_text(&rdata), long);
    }

    #[test]
    fn test_time_query_response() {
        let handler = test_handler();
        let now = Timestamp::from_unix(1517439798);
        let request = build_query(0x1234, FLAG_RD, "Time.Example.ORG", TYPE_A);

        let response = handle_dns_query(&handler, src(), &request, now, 512).unwrap();
        let parsed = parse_response(&response);

        assert_eq!(parsed.id, 0x1234);
        assert_eq!(parsed.flags, FLAG_QR | FLAG_AA | FLAG_RD);
        // Question echoed with the client's case
        assert_eq!(parsed.question, request[DNS_HEADER_SIZE..].to_vec());

        assert_eq!(parsed.answers, vec![(TYPE_A, 0, vec![90, 114, 75, 54])]);
        assert_eq!(parsed.additional.len(), 1);

        let (rtype, ttl, rdata) = &parsed.additional[0];
        assert_eq!((*rtype, *ttl), (TYPE_TXT, 0));

        let answer = Answer::parse(&txt_text(rdata)).unwrap();
        assert_eq!(answer.address().octets(), [90, 114, 75, 54]);
    }

    #[test]
    fn test_time_answer_verifies_with_server_key() {
        let keys = Arc::new(KeyManager::init(None).unwrap());
        let handler = TimeDnsHandler::new(keys.clone(), Arc::new(Metrics::new()));
        let now = Timestamp::now();

        let request = build_query(7, 0, "time", TYPE_A);
        let response = handle_dns_query(&handler, src(), &request, now, 512).unwrap();
        let parsed = parse_response(&response);

        // RD not requested, not echoed
        assert_eq!(parsed.flags & FLAG_RD, 0);

        let answer = Answer::parse(&txt_text(&parsed.additional[0].2)).unwrap();
        assert_eq!(answer.verify(keys.current_key().public_key()).unwrap(), now);
        assert_eq!(parsed.answers[0].2, answer.address().octets().to_vec());
    }

    #[test]
    fn test_non_a_query_gets_empty_reply() {
        let handler = test_handler();
        let request = build_query(0xBEEF, FLAG_RD, "time.example.org", 28);

        let response = handle_dns_query(&handler, src(), &request, Timestamp::now(), 512).unwrap();
        let parsed = parse_response(&response);

        assert_eq!(parsed.id, 0xBEEF);
        assert_eq!(parsed.flags & 0x000F, 0);
        assert!(parsed.answers.is_empty());
        assert!(parsed.additional.is_empty());
        assert_eq!(handler.metrics().unsupported_queries.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_non_in_class_gets_empty_reply() {
        let handler = test_handler();
        let request = build_query_in_class(0xCAFE, 0, "version.bind", TYPE_A, CLASS_CH);

        let response = handle_dns_query(&handler, src(), &request, Timestamp::now(), 512).unwrap();
        let parsed = parse_response(&response);

        assert_eq!(parsed.id, 0xCAFE);
        assert_eq!(parsed.flags & 0x000F, 0);
        assert_eq!(parsed.question, request[DNS_HEADER_SIZE..].to_vec());
        assert!(parsed.answers.is_empty());
        assert!(parsed.additional.is_empty());
        assert_eq!(handler.metrics().unsupported_queries.load(Ordering::Relaxed), 1);
        assert_eq!(handler.metrics().time_answers.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_any_class_is_answered() {
        let handler = test_handler();
        let now = Timestamp::from_unix(1517439798);
        let request = build_query_in_class(3, 0, "time", TYPE_A, CLASS_ANY);

        let parsed = parse_response(&handle_dns_query(&handler, src(), &request, now, 512).unwrap());
        assert_eq!(parsed.answers, vec![(TYPE_A, 0, vec![90, 114, 75, 54])]);
        assert_eq!(parsed.additional.len(), 1);
    }

    #[test]
    fn test_unsupported_opcode() {
        let handler = test_handler();
        // Opcode 2 (STATUS)
        let request = build_query(1, 0x1000, "time", TYPE_A);

        let response = handle_dns_query(&handler, src(), &request, Timestamp::now(), 512).unwrap();
        let parsed = parse_response(&response);

        assert_eq!(parsed.flags & 0x000F, RCODE_NOTIMP);
        assert_eq!(parsed.flags & OPCODE_MASK, 0x1000);
        assert!(parsed.answers.is_empty());
        assert_eq!(handler.metrics().dns_queries.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_malformed_packets_dropped() {
        let handler = test_handler();
        let now = Timestamp::now();

        // Too short
        assert!(handle_dns_query(&handler, src(), &[0u8; 5], now, 512).is_none());

        // A response, not a query
        let response = build_query(1, FLAG_QR, "time", TYPE_A);
        assert!(handle_dns_query(&handler, src(), &response, now, 512).is_none());

        // No question
        let mut empty = build_query(1, 0, "time", TYPE_A);
        empty[5] = 0;
        assert!(handle_dns_query(&handler, src(), &empty, now, 512).is_none());

        // Truncated question
        let mut truncated = build_query(1, 0, "time", TYPE_A);
        truncated.truncate(truncated.len() - 3);
        assert!(handle_dns_query(&handler, src(), &truncated, now, 512).is_none());

        assert_eq!(handler.metrics().malformed_packets.load(Ordering::Relaxed), 4);
        assert_eq!(handler.metrics().dns_queries.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_txt_dropped_when_too_large() {
        let query = parse_query(&build_query(9, 0, "time", TYPE_A)).unwrap();
        let result = DnsQueryResult {
            address: Some(Ipv4Addr::new(1, 2, 3, 4)),
            txt: Some("y".repeat(600)),
            ttl: 0,
        };

        let response = build_dns_response(&query, &result, 0, 512);
        let parsed = parse_response(&response);

        assert_ne!(parsed.flags & FLAG_TC, 0);
        assert_eq!(parsed.answers.len(), 1);
        assert!(parsed.additional.is_empty());
        assert!(response.len() <= 512);
    }

    #[test]
    fn test_unsigned_answer_has_no_txt() {
        let query = parse_query(&build_query(9, 0, "time", TYPE_A)).unwrap();
        let result = DnsQueryResult {
            address: Some(Ipv4Addr::new(1, 2, 3, 4)),
            txt: None,
            ttl: 0,
        };

        let parsed = parse_response(&build_dns_response(&query, &result, 0, 512));
        assert_eq!(parsed.answers, vec![(TYPE_A, 0, vec![1, 2, 3, 4])]);
        assert!(parsed.additional.is_empty());
    }

    #[test]
    fn test_signing_failure_sends_unsigned_answer() {
        let handler = TimeDnsHandler::new(Arc::new(FailingSigner), Arc::new(Metrics::new()));
        let now = Timestamp::from_unix(1517439798);
        let request = build_query(5, 0, "time", TYPE_A);

        let parsed = parse_response(&handle_dns_query(&handler, src(), &request, now, 512).unwrap());
        assert_eq!(parsed.flags & FLAG_TC, 0);
        assert_eq!(
            parsed.answers,
            vec![(TYPE_A, 0, timecodec::encode(now).octets().to_vec())]
        );
        assert!(parsed.additional.is_empty());
        assert_eq!(handler.metrics().signing_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_udp_roundtrip() {
        let keys = Arc::new(KeyManager::init(None).unwrap());
        let handler = Arc::new(TimeDnsHandler::new(keys.clone(), Arc::new(Metrics::new())));

        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = server.local_addr().unwrap();
        let task = tokio::spawn(serve(server, handler, 512));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let before = Timestamp::now();
        client
            .send_to(&build_query(0x4242, FLAG_RD, "time.example.org", TYPE_A), server_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            client.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        let after = Timestamp::now();

        let parsed = parse_response(&buf[..len]);
        assert_eq!(parsed.id, 0x4242);

        let answer = Answer::parse(&txt_text(&parsed.additional[0].2)).unwrap();
        let signed_at = answer.verify(keys.current_key().public_key()).unwrap();
        assert!(signed_at >= before && signed_at <= after);

        task.abort();
    }
}
