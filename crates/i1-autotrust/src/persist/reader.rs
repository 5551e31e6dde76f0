//! Trust anchor file parser.

use std::path::Path;

use i1_anchor::{
    AnchorError, AnchorId, KeyRecord, KeyRr, KeyState, ParseContext, TrustPoint,
    MAX_PENDING_COUNT,
};
use tracing::{debug, warn};

use crate::error::AutotrustError;
use crate::Result;

/// A record or directive after parenthesis continuation lines are joined.
#[derive(Debug)]
struct LogicalLine {
    /// Physical line on which the logical line ended
    number: usize,
    text: String,
}

/// Scheduling fields carried by `;;key: value` directives.
#[derive(Debug, Clone, Copy)]
enum Meta {
    LastQueried,
    LastSuccess,
    NextProbeTime,
    QueryFailed,
    QueryInterval,
    RetryTime,
}

impl Meta {
    const ALL: [(&'static str, Self); 6] = [
        (";;last_queried:", Self::LastQueried),
        (";;last_success:", Self::LastSuccess),
        (";;next_probe_time:", Self::NextProbeTime),
        (";;query_failed:", Self::QueryFailed),
        (";;query_interval:", Self::QueryInterval),
        (";;retry_time:", Self::RetryTime),
    ];

    fn apply(self, tp: &mut TrustPoint, value: u64) {
        match self {
            Self::LastQueried => tp.last_queried = value,
            Self::LastSuccess => tp.last_success = value,
            Self::NextProbeTime => tp.next_probe_time = value,
            Self::QueryFailed => tp.query_failed = u32::try_from(value).unwrap_or(u32::MAX),
            Self::QueryInterval => tp.query_interval = value,
            Self::RetryTime => tp.retry_time = value,
        }
    }
}

/// Load a trust point from its file.
pub fn load(path: &Path) -> Result<TrustPoint> {
    debug!(path = %path.display(), "reading trust anchor file");
    let content = std::fs::read_to_string(path).map_err(|e| AutotrustError::io(path, e))?;
    parse(&content, path)
}

/// Parse trust anchor file content. `path` is recorded as the point's file.
pub fn parse(content: &str, path: &Path) -> Result<TrustPoint> {
    let parse_error = |line: usize, reason: String| AutotrustError::Parse {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let lines = join_lines(content).map_err(|(line, reason)| parse_error(line, reason.into()))?;

    let mut ctx = ParseContext::default();
    let mut tp: Option<TrustPoint> = None;
    let mut revoked = false;
    let mut seen_content = false;
    let mut last_line = 0;

    for LogicalLine { number, text } in lines {
        last_line = number;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with(";;") {
            if trimmed.starts_with(";;REVOKED") {
                if seen_content {
                    return Err(parse_error(
                        number,
                        ";;REVOKED must be the first directive in the file".into(),
                    ));
                }
                revoked = true;
                continue;
            }
            seen_content = true;

            if let Some(rest) = trimmed.strip_prefix(";;id:") {
                let id = parse_id(rest).map_err(|reason| parse_error(number, reason))?;
                adopt_identity(&mut tp, id, path)?;
                continue;
            }

            if let Some((prefix, meta)) = Meta::ALL
                .iter()
                .find(|(prefix, _)| trimmed.starts_with(prefix))
            {
                let point = tp.as_mut().ok_or_else(|| {
                    parse_error(number, format!("{prefix} appears before ;;id:"))
                })?;
                let value = parse_int(&trimmed[prefix.len()..])
                    .ok_or_else(|| parse_error(number, format!("{prefix} needs an integer")))?;
                meta.apply(point, value);
                continue;
            }

            debug!(line = number, "ignoring unknown directive");
            continue;
        }

        if trimmed.starts_with(';') {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("$ORIGIN") {
            let origin = rest
                .split_whitespace()
                .next()
                .ok_or_else(|| parse_error(number, "$ORIGIN without a name".into()))?;
            let origin = ctx
                .resolve_name(origin)
                .map_err(|e| parse_error(number, e.to_string()))?;
            ctx.origin = Some(origin);
            continue;
        }
        if trimmed.starts_with('$') {
            return Err(parse_error(number, format!("unsupported directive: {trimmed}")));
        }

        seen_content = true;
        if revoked {
            debug!(line = number, "trust point revoked, ignoring key");
            continue;
        }

        let (record_text, comments) = text.split_once(';').unwrap_or((text.as_str(), ""));
        let rr = KeyRr::parse(record_text, &mut ctx).map_err(|e| match e {
            AnchorError::UnsupportedType(t) => parse_error(
                number,
                format!("record type {t} cannot be a trust anchor (only DNSKEY and DS)"),
            ),
            other => parse_error(number, other.to_string()),
        })?;

        adopt_identity(&mut tp, AnchorId::new(rr.owner.clone(), rr.class), path)?;
        if let Some(point) = tp.as_mut() {
            point.keys.push(key_from_comments(rr, comments));
        }
    }

    let mut tp = tp.ok_or_else(|| parse_error(last_line, "no trust anchor found".into()))?;
    if revoked {
        tp.revoked = true;
        tp.keys.clear();
    }
    tp.file = Some(path.to_path_buf());
    tp.assemble();
    Ok(tp)
}

/// Join physical lines into logical lines using parenthesis depth.
///
/// Continuation fragments lose their trailing `;` comments; the final
/// fragment keeps its comment.
fn join_lines(content: &str) -> std::result::Result<Vec<LogicalLine>, (usize, &'static str)> {
    let mut out = Vec::new();
    let mut pending = String::new();
    let mut depth: usize = 0;
    let mut last = 0;

    for (idx, raw) in content.lines().enumerate() {
        let number = idx + 1;
        last = number;
        for c in raw.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.checked_sub(1).ok_or((number, "too many ')'"))?,
                ';' => break,
                _ => {}
            }
        }
        if depth == 0 {
            pending.push_str(raw);
            out.push(LogicalLine {
                number,
                text: std::mem::take(&mut pending),
            });
        } else {
            let fragment = raw.split(';').next().unwrap_or_default();
            pending.push_str(fragment);
            pending.push(' ');
        }
    }

    if depth != 0 {
        return Err((last, "too many '('"));
    }
    Ok(out)
}

fn parse_id(rest: &str) -> std::result::Result<AnchorId, String> {
    let mut tokens = rest.split_whitespace();
    let name = tokens.next().ok_or(";;id: without a zone name")?;
    let class = tokens
        .next()
        .ok_or(";;id: without a class")?
        .parse::<u16>()
        .map_err(|e| format!(";;id: class: {e}"))?;
    let name = ParseContext::default()
        .resolve_name(name)
        .map_err(|e| e.to_string())?;
    Ok(AnchorId::new(name, class))
}

fn adopt_identity(tp: &mut Option<TrustPoint>, id: AnchorId, path: &Path) -> Result<()> {
    match tp {
        Some(existing) if existing.id != id => Err(AutotrustError::MixedIdentity {
            path: path.to_path_buf(),
        }),
        Some(_) => Ok(()),
        None => {
            *tp = Some(TrustPoint::new(id));
            Ok(())
        }
    }
}

/// First whitespace-delimited token as an unsigned integer.
fn parse_int(text: &str) -> Option<u64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Leading decimal digits after `key=`, or `None` when the key is absent.
fn field_after<'a>(comments: &'a str, key: &str) -> Option<&'a str> {
    let start = comments.find(key)? + key.len();
    let rest = &comments[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Build a key record from its `;;state=... ;;count=... ;;lastchange=...`
/// comment. A key without a state comment is a configured anchor.
fn key_from_comments(rr: KeyRr, comments: &str) -> KeyRecord {
    let Some(state_digits) = field_after(comments, "state=") else {
        return KeyRecord::configured(rr);
    };

    let state = state_digits
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .and_then(|d| u8::try_from(d).ok())
        .and_then(KeyState::from_code)
        .unwrap_or_else(|| {
            warn!(
                key_tag = rr.key_tag(),
                state = state_digits,
                "key has undefined state, treating it as a new key"
            );
            KeyState::Start
        });

    let count = field_after(comments, "count=")
        .and_then(|d| d.parse::<u64>().ok())
        .map_or(0, |c| u8::try_from(c).unwrap_or(u8::MAX).min(MAX_PENDING_COUNT));
    let last_change = field_after(comments, "lastchange=")
        .and_then(|d| d.parse::<u64>().ok())
        .unwrap_or(0);

    KeyRecord::restore(rr, state, count, last_change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::Name;

    const KSK: &str = "example.com. 3600 IN DNSKEY 257 3 8 AQIDBAUGBwgJ";
    const ZSK: &str = "example.com. 3600 IN DNSKEY 256 3 8 CQgHBgUEAwIB";

    fn parse_str(content: &str) -> Result<TrustPoint> {
        parse(content, Path::new("example.com.key"))
    }

    #[test]
    fn test_parse_full_file() {
        let content = format!(
            "; autotrust trust anchor file\n\
             ;;id: example.com. 1\n\
             ;;last_queried: 1700000000 ;;Tue Nov 14 22:13:20 2023\n\
             ;;last_success: 1699990000 ;;Tue Nov 14 19:26:40 2023\n\
             ;;next_probe_time: 1700040000 ;;Wed Nov 15 09:20:00 2023\n\
             ;;query_failed: 2\n\
             ;;query_interval: 43200\n\
             ;;retry_time: 8640\n\
             {KSK} ;;state=2 [ VALID ] ;;count=0 ;;lastchange=1690000000 ;;Sat Jul 22 04:26:40 2023\n\
             {ZSK} ;;state=1 [ ADDPEND ] ;;count=1 ;;lastchange=1695000000 ;;whenever\n"
        );
        let tp = parse_str(&content).unwrap();
        assert_eq!(tp.id.name, Name::from_ascii("example.com.").unwrap());
        assert_eq!(tp.id.class, 1);
        assert_eq!(tp.last_queried, 1_700_000_000);
        assert_eq!(tp.last_success, 1_699_990_000);
        assert_eq!(tp.next_probe_time, 1_700_040_000);
        assert_eq!(tp.query_failed, 2);
        assert_eq!(tp.query_interval, 43200);
        assert_eq!(tp.retry_time, 8640);
        assert_eq!(tp.keys.len(), 2);
        assert_eq!(tp.keys[0].state(), KeyState::Valid);
        assert_eq!(tp.keys[0].last_change(), 1_690_000_000);
        assert_eq!(tp.keys[1].state(), KeyState::AddPend);
        assert_eq!(tp.keys[1].pending_count(), 1);
        assert!(tp.trusted_dnskey().is_some());
        assert_eq!(tp.file.as_deref(), Some(Path::new("example.com.key")));
    }

    #[test]
    fn test_multiline_record() {
        let content = "example.com. 3600 IN DNSKEY ( 257 3 8 ; flags, proto, alg\n\
                       \tAQIDBAUG ; first half\n\
                       \tBwgJ ) ;;state=2 [ VALID ] ;;count=0 ;;lastchange=5\n";
        let tp = parse_str(content).unwrap();
        assert_eq!(tp.keys.len(), 1);
        let key = &tp.keys[0];
        assert_eq!(key.state(), KeyState::Valid);
        assert_eq!(key.last_change(), 5);
        assert_eq!(
            key.rr,
            KeyRr::parse(KSK, &mut ParseContext::default()).unwrap()
        );
    }

    #[test]
    fn test_unbalanced_parentheses() {
        let err = parse_str("example.com. 3600 IN DNSKEY ( 257 3 8 AQID\n").unwrap_err();
        assert!(matches!(err, AutotrustError::Parse { .. }));
        let err = parse_str("example.com. 3600 IN DNSKEY 257 3 8 AQID )\n").unwrap_err();
        assert!(matches!(err, AutotrustError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_configured_key_without_state_is_valid() {
        let tp = parse_str(&format!("{KSK}\n")).unwrap();
        assert_eq!(tp.keys[0].state(), KeyState::Valid);
        assert_eq!(tp.keys[0].last_change(), 0);
        assert_eq!(tp.id.name, Name::from_ascii("example.com.").unwrap());
    }

    #[test]
    fn test_undefined_state_digit_is_start() {
        let tp = parse_str(&format!(
            ";;id: example.com. 1\n{KSK} ;;state=9 [ ??? ] ;;count=3 ;;lastchange=100\n"
        ))
        .unwrap();
        assert_eq!(tp.keys.len(), 1);
        assert_eq!(tp.keys[0].state(), KeyState::Start);
        assert_eq!(tp.keys[0].pending_count(), 0);
    }

    #[test]
    fn test_revoked_file() {
        let content = format!(
            ";;REVOKED\n\
             ; all keys were revoked\n\
             ;;id: example.com. 1\n\
             ;;last_queried: 10\n\
             ;;last_success: 9\n\
             ;;next_probe_time: 0\n\
             ;;query_failed: 0\n\
             ;;query_interval: 3600\n\
             ;;retry_time: 3600\n\
             {KSK} ;;state=4 [ REVOKED ] ;;count=0 ;;lastchange=9\n"
        );
        let tp = parse_str(&content).unwrap();
        assert!(tp.revoked);
        assert!(tp.keys.is_empty());
        assert_eq!(tp.last_queried, 10);
        assert!(!tp.has_trust_material());
    }

    #[test]
    fn test_revoked_must_come_first() {
        let err = parse_str(";;id: example.com. 1\n;;REVOKED\n").unwrap_err();
        assert!(matches!(err, AutotrustError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_origin_directive() {
        let content = "$ORIGIN example.com.\n\
                       @ 3600 IN DNSKEY 257 3 8 AQIDBAUGBwgJ\n\
                       \t3600 IN DNSKEY 256 3 8 CQgHBgUEAwIB\n";
        let tp = parse_str(content).unwrap();
        assert_eq!(tp.keys.len(), 2);
        assert_eq!(tp.id.name, Name::from_ascii("example.com.").unwrap());
    }

    #[test]
    fn test_relative_origin_stacks() {
        let content = "$ORIGIN com.\n$ORIGIN example\n@ IN DNSKEY 257 3 8 AQID\n";
        let tp = parse_str(content).unwrap();
        assert_eq!(tp.id.name, Name::from_ascii("example.com.").unwrap());
    }

    #[test]
    fn test_other_record_type_is_error() {
        let err = parse_str("example.com. 3600 IN A 192.0.2.1\n").unwrap_err();
        assert!(matches!(err, AutotrustError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_mixed_identity_rejected() {
        let content = format!("{KSK}\nexample.net. 3600 IN DNSKEY 257 3 8 AQID\n");
        let err = parse_str(&content).unwrap_err();
        assert!(matches!(err, AutotrustError::MixedIdentity { .. }));

        let content = format!(";;id: example.net. 1\n{KSK}\n");
        let err = parse_str(&content).unwrap_err();
        assert!(matches!(err, AutotrustError::MixedIdentity { .. }));
    }

    #[test]
    fn test_metadata_before_id_is_error() {
        let err = parse_str(";;last_queried: 5\n").unwrap_err();
        assert!(matches!(err, AutotrustError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_bad_integer_is_error() {
        let err = parse_str(";;id: example.com. 1\n;;query_failed: many\n").unwrap_err();
        assert!(matches!(err, AutotrustError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_empty_file_is_error() {
        let err = parse_str("; autotrust trust anchor file\n\n").unwrap_err();
        assert!(matches!(err, AutotrustError::Parse { .. }));
    }

    #[test]
    fn test_ds_seed_is_loaded() {
        let tp = parse_str("example.com. 3600 IN DS 2059 8 2 ABCDEF\n").unwrap();
        assert_eq!(tp.keys.len(), 1);
        assert!(tp.trusted_ds().is_some());
        assert!(tp.trusted_dnskey().is_none());
    }

    #[test]
    fn test_count_saturates() {
        let tp = parse_str(&format!(
            "{KSK} ;;state=1 [ ADDPEND ] ;;count=9999 ;;lastchange=1\n"
        ))
        .unwrap();
        assert_eq!(tp.keys[0].pending_count(), MAX_PENDING_COUNT);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = load(Path::new("/nonexistent/i1/example.com.key")).unwrap_err();
        assert!(matches!(err, AutotrustError::Io { .. }));
    }
}
