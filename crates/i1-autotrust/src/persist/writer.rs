//! Trust anchor file writer.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use i1_anchor::{KeyState, KeyType, TrustPoint};
use tracing::{debug, trace};

use crate::error::AutotrustError;
use crate::Result;

const HEADER: &str = "; autotrust trust anchor file";

const REVOKED_NOTICE: &str = "\
;;REVOKED
; Every key of this zone was revoked; it no longer has a trust anchor
; and is treated as insecure. The values below are from the last probe.
; Replace this file with valid DNSKEY or DS records to re-enable it.";

/// Save a trust point to its own file.
///
/// Points without a file are kept in memory only.
pub fn save(tp: &TrustPoint) -> Result<()> {
    match tp.file.as_deref() {
        Some(path) => save_to(tp, path),
        None => {
            trace!(anchor = %tp.id, "no anchor file, not saving");
            Ok(())
        }
    }
}

/// Atomically replace `path` with the rendered trust point.
///
/// The content goes to a temporary file in the same directory, which is
/// then renamed over the target; a reader never sees a partial file.
pub fn save_to(tp: &TrustPoint, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".autotrust-")
        .tempfile_in(dir)
        .map_err(|e| AutotrustError::io(dir, e))?;
    tmp.write_all(render(tp).as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| AutotrustError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| AutotrustError::io(path, e.error))?;

    debug!(anchor = %tp.id, path = %path.display(), "saved trust anchor file");
    Ok(())
}

/// Render the file content for a trust point.
///
/// Only DNSKEY rows outside START and REMOVED are written; DS seeds and
/// keys that never became candidates are not carried forward.
#[must_use]
pub fn render(tp: &TrustPoint) -> String {
    let mut out = String::with_capacity(512);
    out.push_str(HEADER);
    out.push('\n');
    if tp.revoked {
        out.push_str(REVOKED_NOTICE);
        out.push('\n');
    }

    // Writing into a String cannot fail.
    let _ = writeln!(out, ";;id: {} {}", tp.id.name, tp.id.class);
    let _ = writeln!(
        out,
        ";;last_queried: {} ;;{}",
        tp.last_queried,
        format_time(tp.last_queried)
    );
    let _ = writeln!(
        out,
        ";;last_success: {} ;;{}",
        tp.last_success,
        format_time(tp.last_success)
    );
    let _ = writeln!(
        out,
        ";;next_probe_time: {} ;;{}",
        tp.next_probe_time,
        format_time(tp.next_probe_time)
    );
    let _ = writeln!(out, ";;query_failed: {}", tp.query_failed);
    let _ = writeln!(out, ";;query_interval: {}", tp.query_interval);
    let _ = writeln!(out, ";;retry_time: {}", tp.retry_time);

    for key in tp
        .keys
        .iter()
        .filter(|k| k.rr.key_type() == KeyType::Dnskey)
        .filter(|k| !matches!(k.state(), KeyState::Start | KeyState::Removed))
    {
        let _ = writeln!(
            out,
            "{} ;;state={} [ {} ] ;;count={} ;;lastchange={} ;;{}",
            key.rr,
            key.state().code(),
            key.state().label(),
            key.pending_count(),
            key.last_change(),
            format_time(key.last_change())
        );
    }
    out
}

/// Human-readable UTC rendering of a unix time, for file comments only.
fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map_or_else(
            || "-".to_string(),
            |t| t.format("%a %b %e %H:%M:%S %Y").to_string(),
        )
}
