use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::trace;

use crate::joblog::JobLogger;
use crate::verify::dns::MailDns;
use crate::verify::sentinel::Sentinel;

pub const SMTP_PORT: u16 = 25;
const MAX_REPLY_LINE: u64 = 1024;

/// Outcome of a single RCPT probe against one MX host.
#[derive(Debug, Clone)]
pub struct RcptProbe {
    pub accepted: bool,
    /// Classification string, e.g. "RCPT accepted (250)" or "SMTP error: Timeout".
    pub detail: String,
    /// Raw "code text" of the final reply, for privileged logs only.
    pub short: Option<String>,
}

impl RcptProbe {
    fn error(class: &str) -> Self {
        Self {
            accepted: false,
            detail: format!("SMTP error: {class}"),
            short: None,
        }
    }
}

/// Best-effort RCPT probing. Implementations never return errors: every
/// failure class is folded into the probe outcome.
#[async_trait]
pub trait RcptProber: Send + Sync {
    async fn probe_rcpt(
        &self,
        mx_host: &str,
        rcpt: &str,
        mail_from: &str,
        smtp_deadline: Duration,
        dns_deadline: Duration,
        log: &JobLogger,
    ) -> RcptProbe;
}

/// Plain-socket SMTP client speaking exactly the four verbs a probe needs:
/// banner, EHLO (HELO fallback), MAIL FROM, RCPT TO. No STARTTLS, no AUTH,
/// port 25 only.
pub struct SmtpProber {
    dns: Arc<dyn MailDns>,
    sentinel: Arc<dyn Sentinel>,
    helo_domain: String,
    port: u16,
}

enum ProbeFailure {
    /// Timeout or connection refused; reported to the sentinel.
    Unreachable(&'static str),
    Other(&'static str),
}

struct SmtpReply {
    code: u16,
    text: String,
}

impl SmtpReply {
    fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    fn short(&self) -> String {
        if self.text.is_empty() {
            self.code.to_string()
        } else {
            format!("{} {}", self.code, self.text)
        }
    }
}

struct Exchange {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    deadline: Duration,
    buffer: Vec<u8>,
}

impl Exchange {
    async fn connect(addr: (IpAddr, u16), deadline: Duration) -> Result<Self, ProbeFailure> {
        let stream = tokio::time::timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| ProbeFailure::Unreachable("Timeout"))?
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    ProbeFailure::Unreachable("ConnectionRefused")
                }
                std::io::ErrorKind::TimedOut => ProbeFailure::Unreachable("Timeout"),
                _ => ProbeFailure::Other("Connect"),
            })?;

        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
            deadline,
            buffer: Vec::with_capacity(256),
        })
    }

    async fn read_line(&mut self) -> Result<String, ProbeFailure> {
        self.buffer.clear();
        let n = tokio::time::timeout(
            self.deadline,
            (&mut self.reader)
                .take(MAX_REPLY_LINE)
                .read_until(b'\n', &mut self.buffer),
        )
        .await
        .map_err(|_| ProbeFailure::Unreachable("Timeout"))?
        .map_err(|_| ProbeFailure::Other("Io"))?;

        if n == 0 {
            return Err(ProbeFailure::Other("ServerDisconnected"));
        }
        Ok(String::from_utf8_lossy(&self.buffer).trim_end().to_string())
    }

    /// Read a (possibly multiline) reply; the last line's separator is a
    /// space instead of a dash.
    async fn read_reply(&mut self) -> Result<SmtpReply, ProbeFailure> {
        let mut code = 0u16;
        let mut text = String::new();
        loop {
            let line = self.read_line().await?;
            if line.len() < 3 {
                return Err(ProbeFailure::Other("Protocol"));
            }
            code = line[..3]
                .parse::<u16>()
                .map_err(|_| ProbeFailure::Other("Protocol"))?;
            let rest = line.get(4..).unwrap_or("").trim();
            if !rest.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(rest);
            }
            let continued = line.as_bytes().get(3) == Some(&b'-');
            if !continued {
                break;
            }
        }
        Ok(SmtpReply { code, text })
    }

    async fn command(&mut self, command: &str) -> Result<SmtpReply, ProbeFailure> {
        trace!("smtp >> {command}");
        tokio::time::timeout(
            self.deadline,
            self.writer
                .write_all(format!("{command}\r\n").as_bytes()),
        )
        .await
        .map_err(|_| ProbeFailure::Unreachable("Timeout"))?
        .map_err(|_| ProbeFailure::Other("Io"))?;

        let reply = self.read_reply().await?;
        trace!("smtp << {}", reply.short());
        Ok(reply)
    }

    async fn quit(mut self) {
        let _ = self.writer.write_all(b"QUIT\r\n").await;
        let _ = self.writer.shutdown().await;
    }
}

impl SmtpProber {
    pub fn new(dns: Arc<dyn MailDns>, sentinel: Arc<dyn Sentinel>, helo_domain: String) -> Self {
        Self {
            dns,
            sentinel,
            helo_domain,
            port: SMTP_PORT,
        }
    }

    /// Probe against a non-standard port; only mock MX fixtures use this.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    async fn session(
        &self,
        ip: IpAddr,
        rcpt: &str,
        mail_from: &str,
        deadline: Duration,
        log: &JobLogger,
    ) -> Result<RcptProbe, ProbeFailure> {
        let mut exchange = Exchange::connect((ip, self.port), deadline).await?;

        let banner = exchange.read_reply().await?;
        if !banner.is_positive() {
            exchange.quit().await;
            return Err(ProbeFailure::Other("Connect"));
        }

        let ehlo = exchange
            .command(&format!("EHLO {}", self.helo_domain))
            .await?;
        if !ehlo.is_positive() {
            let helo = exchange
                .command(&format!("HELO {}", self.helo_domain))
                .await?;
            if !helo.is_positive() {
                exchange.quit().await;
                return Err(ProbeFailure::Other("HeloRefused"));
            }
        }

        let mail = exchange
            .command(&format!("MAIL FROM:<{mail_from}>"))
            .await?;
        if !mail.is_positive() {
            exchange.quit().await;
            return Err(ProbeFailure::Other("MailFromRefused"));
        }

        let reply = exchange.command(&format!("RCPT TO:<{rcpt}>")).await?;
        let short = reply.short();
        log.debug_smtp_rcpt_result(mail_from, rcpt, &short).await;

        let probe = match reply.code {
            200..=299 => RcptProbe {
                accepted: true,
                detail: format!("RCPT accepted ({})", reply.code),
                short: Some(short),
            },
            400..=499 => RcptProbe {
                accepted: false,
                detail: format!("Temporary failure ({})", reply.code),
                short: Some(short),
            },
            _ => RcptProbe {
                accepted: false,
                detail: format!("Rejected ({})", reply.code),
                short: Some(short),
            },
        };

        exchange.quit().await;
        Ok(probe)
    }
}

#[async_trait]
impl RcptProber for SmtpProber {
    async fn probe_rcpt(
        &self,
        mx_host: &str,
        rcpt: &str,
        mail_from: &str,
        smtp_deadline: Duration,
        dns_deadline: Duration,
        log: &JobLogger,
    ) -> RcptProbe {
        let ip = self.dns.resolve_to_ip(mx_host, dns_deadline).await;
        log.debug_smtp_dns_resolve(mx_host, ip.map(|ip| ip.to_string()).as_deref())
            .await;
        let Some(ip) = ip else {
            return RcptProbe::error("DNS timeout or no A/AAAA");
        };

        log.debug_smtp_connecting(mx_host, &ip.to_string(), smtp_deadline.as_secs())
            .await;

        match self
            .session(ip, rcpt, mail_from, smtp_deadline, log)
            .await
        {
            Ok(probe) => probe,
            Err(ProbeFailure::Unreachable(class)) => {
                self.sentinel.record_timeout(mx_host).await;
                log.debug_smtp_exception(mx_host, class).await;
                RcptProbe::error(class)
            }
            Err(ProbeFailure::Other(class)) => {
                log.debug_smtp_exception(mx_host, class).await;
                RcptProbe::error(class)
            }
        }
    }
}
