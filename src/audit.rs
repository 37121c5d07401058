//! Operator audit trail.
//!
//! Every mutative tool invocation leaves one line through the configured
//! sink, so "who changed what, and did it land" has an answer outside the
//! nodes' own change logs. Audit failures never fail the operation being
//! audited.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

use crate::config::{AuditConfig, AuditSink};
use crate::paths;
use crate::proto::OriginIdentity;

pub struct AuditTrail {
    sink: AuditSink,
    file: PathBuf,
}

impl AuditTrail {
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            sink: config.sink,
            file: config
                .file
                .clone()
                .unwrap_or_else(|| paths::log_dir().join("audit.log")),
        }
    }

    pub fn record(&self, identity: &OriginIdentity, action: &str, outcome: &str) {
        let line = render_line(OffsetDateTime::now_utc(), identity, action, outcome);
        let written = match self.sink {
            AuditSink::Stdout => {
                println!("{line}");
                Ok(())
            }
            AuditSink::File => append_line(&self.file, &line),
            AuditSink::Syslog => send_syslog(&line),
        };
        if let Err(err) = written {
            warn!(sink = ?self.sink, error = %err, "audit record not written");
        }
    }
}

fn render_line(
    at: OffsetDateTime,
    identity: &OriginIdentity,
    action: &str,
    outcome: &str,
) -> String {
    let at = at
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("audit {at} {}@{} {action} -> {outcome}", identity.user, identity.host)
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    writeln!(file, "{line}")
}

/// RFC 3164 datagram to the local syslog socket, local0.notice.
#[cfg(unix)]
fn send_syslog(line: &str) -> std::io::Result<()> {
    use std::os::unix::net::UnixDatagram;

    let socket = UnixDatagram::unbound()?;
    let message = format!("<133>concord: {line}");
    socket.send_to(message.as_bytes(), "/dev/log")?;
    Ok(())
}

#[cfg(not(unix))]
fn send_syslog(_line: &str) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "syslog sink requires a unix socket",
    ))
}
