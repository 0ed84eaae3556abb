//! Parser for bridge extra-info descriptors.
//!
//! The bridge authority publishes one block per bridge:
//!
//! ```text
//! extra-info <nickname> <fingerprint>
//! ...
//! transport <name> <address>:<port> [<key>=<value>,...]
//! ```
//!
//! Only `extra-info` and `transport` lines matter to us; everything else is
//! skipped. See `dir-spec.txt`, section "Extra-info documents", for the full
//! format.

use std::io::{BufRead, Read};

use crate::error::{Error, Result};

use super::address::{parse_port, resolve_host, split_host_port};
use super::types::{Bridge, Registry, Transport};

/// Keyword that opens a bridge's block.
pub const EXTRA_INFO_KEYWORD: &str = "extra-info";

/// Keyword of a pluggable-transport line.
pub const TRANSPORT_KEYWORD: &str = "transport";

/// Minimum number of fields in a transport line.
const MIN_TRANSPORT_FIELDS: usize = 3;

/// Longest line we are willing to buffer.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Parse a single `transport` line into a transport owned by `fingerprint`.
pub fn parse_transport_line(line: &str, fingerprint: &str, line_no: usize) -> Result<Transport> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.first() != Some(&TRANSPORT_KEYWORD) || fields.len() < MIN_TRANSPORT_FIELDS {
        return Err(Error::MalformedTransport { line: line_no });
    }

    let (host, port) = split_host_port(fields[2]).map_err(|e| e.at_line(line_no))?;
    let address = resolve_host(host).map_err(|e| e.at_line(line_no))?;
    let port = parse_port(port).map_err(|e| e.at_line(line_no))?;

    let mut transport = Transport::new(fields[1], address, port, fingerprint);

    if let Some(args) = fields.get(MIN_TRANSPORT_FIELDS) {
        for arg in args.split(',') {
            let mut kv = arg.split('=');
            match (kv.next(), kv.next(), kv.next()) {
                (Some(key), Some(value), None) => transport.add_argument(key, value),
                _ => {
                    return Err(Error::MalformedArgument {
                        line: line_no,
                        args: args.to_string(),
                    })
                }
            }
        }
    }

    Ok(transport)
}

/// Whether the first field of a raw line is one of the keywords we parse.
fn is_keyword_line(line: &[u8]) -> bool {
    let keyword = line
        .split(|b| b.is_ascii_whitespace())
        .find(|field| !field.is_empty());
    matches!(
        keyword,
        Some(k) if k == EXTRA_INFO_KEYWORD.as_bytes() || k == TRANSPORT_KEYWORD.as_bytes()
    )
}

/// Parse an extra-info document into a registry whose bridges carry only a
/// fingerprint and their transports.
///
/// Any malformed `extra-info` or `transport` line fails the whole parse.
/// Other lines are skipped without being decoded.
pub fn parse_extrainfo<R: BufRead>(mut reader: R) -> Result<Registry> {
    let mut registry = Registry::new();
    let mut current: Option<String> = None;
    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        line_no += 1;
        if buf.len() > MAX_LINE_LEN && buf.last() != Some(&b'\n') {
            return Err(Error::LineTooLong {
                line: line_no,
                max: MAX_LINE_LEN,
            });
        }

        // Lines we don't care about may hold arbitrary bytes.
        if !is_keyword_line(&buf) {
            continue;
        }

        let line = std::str::from_utf8(&buf)
            .map_err(|_| Error::InvalidEncoding { line: line_no })?
            .trim();
        let keyword = line.split_whitespace().next();

        match keyword {
            Some(EXTRA_INFO_KEYWORD) => {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() != 3 {
                    return Err(Error::MalformedHeader { line: line_no });
                }
                let fingerprint = fields[2].to_string();
                registry.insert(Bridge::new(fingerprint.clone()));
                current = Some(fingerprint);
            }
            Some(TRANSPORT_KEYWORD) => {
                let fingerprint = current
                    .as_deref()
                    .ok_or(Error::TransportOutsideBlock { line: line_no })?;
                let transport = parse_transport_line(line, fingerprint, line_no)?;
                if let Some(bridge) = registry.get_mut(fingerprint) {
                    if !bridge.add_transport(transport) {
                        tracing::debug!(
                            fingerprint = fingerprint,
                            line = line_no,
                            "Skipping duplicate transport"
                        );
                    }
                }
            }
            _ => {}
        }
    }

    tracing::debug!(
        bridges = registry.len(),
        transports = registry.transport_count(),
        lines = line_no,
        "Parsed extra-info document"
    );

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP_FOO: &str = "A0EC5B0FC51A5CD800B9D1D16D325636B5755BCE";
    const FP_BAR: &str = "51502DF3D176CC10C52CC65694205BBA185E0982";

    fn parse(doc: &str) -> Result<Registry> {
        parse_extrainfo(doc.as_bytes())
    }

    #[test]
    fn test_parse_transport_line() {
        assert!(parse_transport_line("", FP_FOO, 1).is_err());
        assert!(matches!(
            parse_transport_line("transport", FP_FOO, 1),
            Err(Error::MalformedTransport { line: 1 })
        ));

        let t = parse_transport_line("transport foo 1.2.3.4:1234", FP_FOO, 1).unwrap();
        assert_eq!(t.kind, "foo");
        assert_eq!(t.port, 1234);
        assert!(t.arguments.is_empty());

        let t = parse_transport_line("transport bar 1.2.3.4:1234 a=b,foo=bar", FP_FOO, 1).unwrap();
        assert_eq!(t.arguments["a"], vec!["b".to_string()]);
        assert_eq!(t.arguments["foo"], vec!["bar".to_string()]);
        assert_eq!(t.fingerprint, FP_FOO);
    }

    #[test]
    fn test_parse_mock_document() {
        let doc = format!(
            "extra-info foo {}\n\
             this line doesn't matter\n\
             and neither does this one\n\
             extra-info bar {}\n\
             transport obfs4 1.2.3.4:1234 key=value,1=2\n\
             transport obfs5 1.2.3.4:4321 foo=bar\n",
            FP_FOO, FP_BAR
        );

        let registry = parse(&doc).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(FP_FOO).unwrap().transports.is_empty());

        let bridge = registry.get(FP_BAR).unwrap();
        assert_eq!(bridge.transports.len(), 2);
        let obfs4 = &bridge.transports[0];
        assert_eq!(obfs4.kind, "obfs4");
        assert_eq!(obfs4.port, 1234);
        assert_eq!(obfs4.fingerprint, FP_BAR);
        assert_eq!(obfs4.arguments["key"], vec!["value".to_string()]);
        assert_eq!(obfs4.arguments["1"], vec!["2".to_string()]);
        assert_eq!(bridge.transports[1].kind, "obfs5");
    }

    #[test]
    fn test_single_obfs4_block() {
        let fp = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
        let doc = format!(
            "extra-info foo {}\ntransport obfs4 1.2.3.4:1234 cert=XYZ,iat-mode=0\n",
            fp
        );

        let registry = parse(&doc).unwrap();
        assert_eq!(registry.len(), 1);

        let bridge = registry.get(fp).unwrap();
        assert!(bridge.distributor.is_none());
        assert!(bridge.last_seen.is_none());
        assert_eq!(bridge.transports.len(), 1);

        let t = &bridge.transports[0];
        assert_eq!(t.kind, "obfs4");
        assert_eq!(t.address.to_string(), "1.2.3.4");
        assert_eq!(t.port, 1234);
        assert_eq!(t.arguments["cert"], vec!["XYZ".to_string()]);
        assert_eq!(t.arguments["iat-mode"], vec!["0".to_string()]);
    }

    #[test]
    fn test_missing_address_fails() {
        let doc = format!("extra-info foo {}\ntransport foo\n", FP_FOO);
        assert!(matches!(
            parse(&doc),
            Err(Error::MalformedTransport { line: 2 })
        ));
    }

    #[test]
    fn test_malformed_header_fails() {
        assert!(matches!(
            parse("extra-info onlynickname\n"),
            Err(Error::MalformedHeader { line: 1 })
        ));
        assert!(matches!(
            parse(&format!("extra-info foo {} extra\n", FP_FOO)),
            Err(Error::MalformedHeader { line: 1 })
        ));
    }

    #[test]
    fn test_transport_before_header_fails() {
        let doc = format!(
            "transport obfs4 1.2.3.4:1234\nextra-info foo {}\n",
            FP_FOO
        );
        assert!(matches!(
            parse(&doc),
            Err(Error::TransportOutsideBlock { line: 1 })
        ));
    }

    #[test]
    fn test_malformed_argument_fails() {
        for args in ["cert", "cert=a=b", "cert=XYZ,iat-mode"] {
            let doc = format!("extra-info foo {}\ntransport obfs4 1.2.3.4:1234 {}\n", FP_FOO, args);
            assert!(
                matches!(parse(&doc), Err(Error::MalformedArgument { line: 2, .. })),
                "accepted {:?}",
                args
            );
        }
    }

    #[test]
    fn test_bad_address_and_port_fail() {
        let bad_port = format!("extra-info foo {}\ntransport obfs4 1.2.3.4:70000\n", FP_FOO);
        assert!(matches!(parse(&bad_port), Err(Error::InvalidPort(_))));

        let no_port = format!("extra-info foo {}\ntransport obfs4 1.2.3.4\n", FP_FOO);
        assert!(matches!(parse(&no_port), Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn test_ipv6_transport() {
        let doc = format!("extra-info foo {}\ntransport obfs4 [2001:db8::1]:443\n", FP_FOO);
        let registry = parse(&doc).unwrap();
        let t = &registry.get(FP_FOO).unwrap().transports[0];
        assert_eq!(t.address.to_string(), "2001:db8::1");
        assert_eq!(t.port, 443);
    }

    #[test]
    fn test_duplicate_transports_collapse() {
        let doc = format!(
            "extra-info foo {fp}\n\
             transport obfs4 1.2.3.4:1234 cert=XYZ\n\
             transport obfs4 1.2.3.4:1234 cert=XYZ\n\
             transport obfs4 1.2.3.4:1234 cert=ABC\n",
            fp = FP_FOO
        );
        let registry = parse(&doc).unwrap();
        assert_eq!(registry.get(FP_FOO).unwrap().transports.len(), 2);
        assert_eq!(registry.transport_count(), 2);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        let doc = format!(
            "extra-info-digest 0123456789ABCDEF\n\
             transport-info whatever\n\
             extra-info foo {}\n\
             \t  transport obfs4 1.2.3.4:1234  \n",
            FP_FOO
        );
        let registry = parse(&doc).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(FP_FOO).unwrap().transports.len(), 1);
    }

    #[test]
    fn test_empty_document() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_overlong_line_fails() {
        let doc = "x".repeat(MAX_LINE_LEN + 10);
        assert!(matches!(parse(&doc), Err(Error::LineTooLong { line: 1, .. })));
    }

    #[test]
    fn test_non_utf8_lines_are_skipped() {
        let doc = b"extra-info foo AAAA\ncontact caf\xe9\ntransport obfs4 1.2.3.4:1234\n";
        let registry = parse_extrainfo(&doc[..]).unwrap();
        assert_eq!(registry.len(), 1);

        let bridge = registry.get("AAAA").unwrap();
        assert_eq!(bridge.transports.len(), 1);
        assert_eq!(bridge.transports[0].kind, "obfs4");
    }

    #[test]
    fn test_non_utf8_transport_line_fails() {
        let doc = b"extra-info foo AAAA\ntransport obfs4 1.2.3.4:1234 cert=caf\xe9\n";
        assert!(matches!(
            parse_extrainfo(&doc[..]),
            Err(Error::InvalidEncoding { line: 2 })
        ));
    }

    #[test]
    fn test_overlong_multibyte_line_fails() {
        // The read cap lands in the middle of a two-byte character.
        let doc = "\u{e9}".repeat(MAX_LINE_LEN);
        assert!(matches!(parse(&doc), Err(Error::LineTooLong { line: 1, .. })));
    }

    #[test]
    fn test_transports_survive_reserialization() {
        let doc = format!(
            "extra-info foo {fp}\n\
             transport obfs4 1.2.3.4:1234 cert=XYZ,iat-mode=0\n\
             transport obfs4 [2001:db8::1]:443 cert=XYZ\n\
             transport meek_lite 5.6.7.8:80 url=https://a.example/,url=https://b.example/\n\
             transport obfs4 1.2.3.4:1234 cert=XYZ,iat-mode=0\n\
             transport snowflake 9.9.9.9:1\n",
            fp = FP_FOO
        );
        let parsed = parse(&doc).unwrap();
        let transports = &parsed.get(FP_FOO).unwrap().transports;
        assert_eq!(transports.len(), 4);

        let mut rewritten = format!("extra-info foo {}\n", FP_FOO);
        for (i, transport) in transports.iter().enumerate() {
            let line = transport.to_string();
            let reparsed = parse_transport_line(&line, FP_FOO, i + 1).unwrap();
            assert!(reparsed.is_duplicate_of(transport), "{} did not survive", line);
            rewritten.push_str(&line);
            rewritten.push('\n');
        }

        let reparsed = parse(&rewritten).unwrap();
        let again = &reparsed.get(FP_FOO).unwrap().transports;
        assert_eq!(again.len(), transports.len());
        for (a, b) in again.iter().zip(transports) {
            assert!(a.is_duplicate_of(b));
        }
        assert_eq!(again[2].arguments["url"].len(), 2);
    }
}
