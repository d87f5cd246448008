use std::io::Write;
use std::path::{Path, PathBuf};
use chrono::{Datelike, NaiveDate};
use thiserror::Error;
use shared::protocol::ZONE_HASH_COMMENT;
use super::render::{render_zone, ZoneOptions, ZoneState};

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("failed to create zone directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read existing zone {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write zone {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to replace zone {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneWriteOutcome {
    pub path: PathBuf,
    pub changed: bool,
    pub serial: u32,
    pub hash: String,
}

fn date_number(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Date-based SOA serial: `YYYYMMDDnn`.
///
/// Same day as the previous serial increments it, a new day restarts at `01`.
/// A previous serial ahead of today (clock moved back) is incremented so the
/// serial never goes down.
pub fn next_serial(existing: Option<u32>, today: NaiveDate) -> u32 {
    let base = date_number(today) * 100 + 1;
    match existing {
        Some(serial) if serial / 100 == date_number(today) || serial >= base => {
            serial.saturating_add(1)
        }
        _ => base,
    }
}

/// SOA serial of a zone written by `render_zone`
pub fn extract_serial(zone_text: &str) -> Option<u32> {
    zone_text.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["@", "IN", "SOA", _, _, serial, ..] => serial.parse().ok(),
            _ => None,
        }
    })
}

/// Content hash from the leading comment
pub fn extract_content_hash(zone_text: &str) -> Option<String> {
    zone_text.lines().find_map(|line| {
        let comment = line.trim().strip_prefix(';')?.trim();
        let hash = comment.strip_prefix(ZONE_HASH_COMMENT)?.strip_prefix(':')?.trim();
        if hash.is_empty() {
            None
        } else {
            Some(hash.to_string())
        }
    })
}

fn read_existing(path: &Path) -> Result<Option<String>, ZoneError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidData) => {
            Ok(None)
        }
        Err(source) => Err(ZoneError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Replace `path` with `contents` via a temp file in the same directory, so a
/// reader sees either the old zone or the new one.
fn write_atomic(path: &Path, contents: &str) -> Result<(), ZoneError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|source| ZoneError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let write_err = |source| ZoneError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|source| ZoneError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Write the zone unless its content hash is unchanged.
pub fn write_zone(path: &Path, opts: &ZoneOptions, today: NaiveDate) -> Result<ZoneWriteOutcome, ZoneError> {
    let existing = read_existing(path)?;
    let probe = render_zone(opts, 0);

    let existing_serial = existing.as_deref().and_then(extract_serial);
    let existing_hash = existing.as_deref().and_then(extract_content_hash);

    if existing_hash.as_deref() == Some(probe.hash.as_str()) {
        tracing::debug!("Zone {} unchanged (hash {})", path.display(), probe.hash);
        return Ok(ZoneWriteOutcome {
            path: path.to_path_buf(),
            changed: false,
            serial: existing_serial.unwrap_or(0),
            hash: probe.hash,
        });
    }

    let serial = next_serial(existing_serial, today);
    let ZoneState { text, hash, serial } = render_zone(opts, serial);
    write_atomic(path, &text)?;

    tracing::info!("Wrote zone {} (serial {}, hash {})", path.display(), serial, hash);
    Ok(ZoneWriteOutcome {
        path: path.to_path_buf(),
        changed: true,
        serial,
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use shared::types::GatewayBeacon;

    fn opts() -> ZoneOptions {
        ZoneOptions {
            beacon: GatewayBeacon {
                display_name: "Studio".to_string(),
                gateway_port: 18789,
                tls_enabled: false,
                tls_fingerprint_sha256: None,
                tailnet_dns: None,
                ssh_port: None,
                cli_path: None,
                role: None,
                transport: None,
            },
            tailnet_ipv4: Ipv4Addr::new(100, 64, 0, 1),
            tailnet_ipv6: None,
            system_hostname: "studio".to_string(),
            host_label: None,
            instance_label: None,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    #[test]
    fn test_next_serial() {
        assert_eq!(next_serial(None, day(10)), 2026011001);
        assert_eq!(next_serial(Some(2026011001), day(10)), 2026011002);
        assert_eq!(next_serial(Some(2026011001), day(11)), 2026011101);
        assert_eq!(next_serial(Some(2025123105), day(10)), 2026011001);
    }

    #[test]
    fn test_next_serial_never_goes_backwards() {
        assert_eq!(next_serial(Some(2026011203), day(10)), 2026011204);
    }

    #[test]
    fn test_extractors() {
        let zone = render_zone(&opts(), 2026011001);
        assert_eq!(extract_serial(&zone.text), Some(2026011001));
        assert_eq!(extract_content_hash(&zone.text), Some(zone.hash));
        assert_eq!(extract_serial("garbage"), None);
        assert_eq!(extract_content_hash("; other-comment: x"), None);
    }

    #[test]
    fn test_identical_content_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dns").join("hearth.internal.db");

        let first = write_zone(&path, &opts(), day(10)).unwrap();
        assert!(first.changed);
        assert_eq!(first.serial, 2026011001);
        let before = std::fs::read(&path).unwrap();

        let second = write_zone(&path, &opts(), day(10)).unwrap();
        assert!(!second.changed);
        assert_eq!(second.serial, 2026011001);
        assert_eq!(std::fs::read(&path).unwrap(), before);

        // Still unchanged on a later day: the serial only moves with content.
        let third = write_zone(&path, &opts(), day(11)).unwrap();
        assert!(!third.changed);
        assert_eq!(third.serial, 2026011001);
    }

    #[test]
    fn test_changed_content_bumps_serial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hearth.internal.db");

        write_zone(&path, &opts(), day(10)).unwrap();

        let mut changed = opts();
        changed.beacon.gateway_port = 18790;
        let outcome = write_zone(&path, &changed, day(10)).unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.serial, 2026011002);

        changed.beacon.gateway_port = 18791;
        let outcome = write_zone(&path, &changed, day(11)).unwrap();
        assert_eq!(outcome.serial, 2026011101);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("IN SRV 0 0 18791"));
        assert_eq!(extract_serial(&text), Some(2026011101));
    }

    #[test]
    fn test_write_failure_keeps_previous_zone() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let result = write_zone(&blocker.join("zone.db"), &opts(), day(10));
        assert!(matches!(result, Err(ZoneError::CreateDir { .. }) | Err(ZoneError::Read { .. })));
        assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "file");
    }
}
