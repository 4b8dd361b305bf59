//! IMAP mailbox — raw IMAP4rev1 over rustls, run on the blocking pool.
//!
//! One session per call: LOGIN, SELECT, `UID SEARCH SINCE`, then two
//! `UID FETCH` passes. The first pulls only `Message-ID` headers so that
//! already-processed messages are never downloaded; the second pulls full
//! bodies with `BODY.PEEK[]`, which leaves `\Seen` untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::email_types::{make_snippet, strip_html};
use crate::config::{Env, MAX_DAYS};
use crate::error::{AuthError, ConfigError, Error, FetchError};
use crate::pipeline::types::{CandidateMessage, Mailbox, MessageId};
use crate::store::ProcessedSet;

/// Largest literal accepted from the server.
const MAX_LITERAL_BYTES: usize = 32 * 1024 * 1024;

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox connection settings, built from `IMAP_*` environment variables.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder to read, `INBOX` by default.
    pub mailbox: String,
    /// Messages older than this many days are not listed.
    pub lookback_days: u32,
    /// Most unprocessed messages fetched per run, oldest first.
    pub max_messages: usize,
    /// Set `\Seen` on fully delivered messages.
    pub mark_seen: bool,
    /// Connect and per-read/write socket timeout.
    pub timeout: Duration,
}

impl MailboxConfig {
    pub fn from_lookup(env: &Env<'_>) -> Result<Self, ConfigError> {
        let config = Self {
            host: env.required_env("IMAP_HOST")?,
            port: env.parse_optional_env("IMAP_PORT", 993)?,
            username: env.required_env("IMAP_USERNAME")?,
            password: SecretString::from(env.required_env("IMAP_PASSWORD")?),
            mailbox: env
                .optional_env("IMAP_MAILBOX")
                .unwrap_or_else(|| "INBOX".to_string()),
            lookback_days: env.parse_optional_env("IMAP_LOOKBACK_DAYS", 1)?,
            max_messages: env.parse_optional_env("IMAP_MAX_MESSAGES", 50)?,
            mark_seen: env.parse_bool_env("IMAP_MARK_SEEN", false)?,
            timeout: Duration::from_secs(env.parse_optional_env("IMAP_TIMEOUT_SECS", 30)?),
        };

        if !(1..=MAX_DAYS).contains(&config.lookback_days) {
            return Err(ConfigError::InvalidValue {
                key: "IMAP_LOOKBACK_DAYS".into(),
                message: format!("must be between 1 and {MAX_DAYS}"),
            });
        }
        if config.max_messages == 0 {
            return Err(ConfigError::InvalidValue {
                key: "IMAP_MAX_MESSAGES".into(),
                message: "must be at least 1".into(),
            });
        }
        if config.password.expose_secret().contains(['\r', '\n']) {
            return Err(ConfigError::InvalidValue {
                key: "IMAP_PASSWORD".into(),
                message: "must not contain line breaks".into(),
            });
        }
        Ok(config)
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// UIDs of the messages returned by the last listing, for `label_as_read`.
#[derive(Debug, Default)]
struct UidIndex {
    validity: Option<u32>,
    uids: HashMap<MessageId, u32>,
}

pub struct ImapMailbox {
    config: MailboxConfig,
    index: Arc<Mutex<UidIndex>>,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            index: Arc::new(Mutex::new(UidIndex::default())),
        }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    fn name(&self) -> &str {
        &self.config.mailbox
    }

    async fn list_unprocessed(
        &self,
        exclude: &ProcessedSet,
    ) -> crate::error::Result<Vec<CandidateMessage>> {
        let cfg = self.config.clone();
        let exclude = exclude.clone();
        let since = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(u64::from(cfg.lookback_days)))
            .ok_or_else(|| {
                FetchError::Protocol(format!("lookback of {} days is out of range", cfg.lookback_days))
            })?;

        let listing = tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::connect(&cfg)?;
            let listing = list_messages(&mut session, &cfg, since, &exclude);
            session.logout();
            listing
        })
        .await
        .map_err(|e| FetchError::Task(e.to_string()))??;

        info!(
            mailbox = %self.config.mailbox,
            searched = listing.searched,
            candidates = listing.messages.len(),
            "IMAP listing complete"
        );

        if let Ok(mut index) = self.index.lock() {
            index.validity = listing.uid_validity;
            index.uids = listing.uids;
        }
        Ok(listing.messages)
    }

    async fn label_as_read(&self, ids: &[MessageId]) -> Result<(), FetchError> {
        let (validity, uids) = {
            let index = self
                .index
                .lock()
                .map_err(|_| FetchError::Task("uid index poisoned".into()))?;
            let uids: Vec<u32> = ids.iter().filter_map(|id| index.uids.get(id).copied()).collect();
            (index.validity, uids)
        };
        if uids.is_empty() {
            return Ok(());
        }

        let cfg = self.config.clone();
        let count = uids.len();
        tokio::task::spawn_blocking(move || {
            let mut session = ImapSession::connect(&cfg).map_err(into_fetch_error)?;
            let result = mark_seen(&mut session, &cfg, validity, &uids);
            session.logout();
            result.map_err(into_fetch_error)
        })
        .await
        .map_err(|e| FetchError::Task(e.to_string()))??;

        debug!(count, "Flagged delivered messages as seen");
        Ok(())
    }
}

// ── Listing ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Listing {
    messages: Vec<CandidateMessage>,
    uids: HashMap<MessageId, u32>,
    uid_validity: Option<u32>,
    searched: usize,
}

/// Search the lookback window and fetch every message not in `exclude`.
///
/// Processed ids are dropped before the `max_messages` cap applies, and the
/// cap keeps the oldest UIDs, so a message left unprocessed by a failed
/// delivery is retried ahead of newer mail. Only the lookback window is
/// searched: a message still failing once it is older than
/// `IMAP_LOOKBACK_DAYS` is never listed again.
fn list_messages<S: Read + Write>(
    session: &mut ImapSession<S>,
    cfg: &MailboxConfig,
    since: NaiveDate,
    exclude: &ProcessedSet,
) -> crate::error::Result<Listing> {
    session.login(&cfg.username, &cfg.password)?;
    let uid_validity = session.select(&cfg.mailbox)?;

    let uids = session.uid_search_since(since)?;
    let searched = uids.len();
    if uids.is_empty() {
        return Ok(Listing {
            uid_validity,
            ..Listing::default()
        });
    }

    // Pass 1: ids only.
    let headers = session.uid_fetch(&uids, "(UID BODY.PEEK[HEADER.FIELDS (MESSAGE-ID)])")?;
    let mut ids: BTreeMap<u32, MessageId> = BTreeMap::new();
    let mut seen = HashSet::new();
    for (uid, header) in headers {
        let id = header_message_id(&header)
            .map(MessageId::new)
            .unwrap_or_else(|| fallback_id(uid_validity, uid));
        if exclude.contains(&id) || !seen.insert(id.clone()) {
            continue;
        }
        ids.insert(uid, id);
    }
    debug!(searched, pending = ids.len(), "Filtered processed messages by header");

    let pending = ids.len();
    if pending > cfg.max_messages {
        ids = ids.into_iter().take(cfg.max_messages).collect();
        warn!(
            pending,
            kept = cfg.max_messages,
            "Listing truncated to the oldest unprocessed messages; the rest wait for a later run"
        );
    }

    if ids.is_empty() {
        return Ok(Listing {
            uid_validity,
            searched,
            ..Listing::default()
        });
    }

    // Pass 2: full bodies for the remainder.
    let wanted: Vec<u32> = ids.keys().copied().collect();
    let bodies = session.uid_fetch(&wanted, "(UID BODY.PEEK[])")?;

    let mut by_uid: BTreeMap<u32, CandidateMessage> = BTreeMap::new();
    for (uid, raw) in bodies {
        let Some(id) = ids.get(&uid) else { continue };
        match candidate_from_raw(id.clone(), &raw) {
            Some(message) => {
                by_uid.insert(uid, message);
            }
            None => warn!(uid, "Could not parse message, skipping"),
        }
    }

    let uids = by_uid.iter().map(|(uid, m)| (m.id.clone(), *uid)).collect();
    Ok(Listing {
        messages: by_uid.into_values().collect(),
        uids,
        uid_validity,
        searched,
    })
}

fn mark_seen<S: Read + Write>(
    session: &mut ImapSession<S>,
    cfg: &MailboxConfig,
    expected_validity: Option<u32>,
    uids: &[u32],
) -> crate::error::Result<()> {
    session.login(&cfg.username, &cfg.password)?;
    let validity = session.select(&cfg.mailbox)?;
    if expected_validity.is_some() && validity != expected_validity {
        warn!("UIDVALIDITY changed since listing, not flagging messages");
        return Ok(());
    }
    Ok(session.uid_store_seen(uids)?)
}

/// `label_as_read` reports every failure as a fetch-side error.
fn into_fetch_error(err: Error) -> FetchError {
    match err {
        Error::Fetch(f) => f,
        other => FetchError::Protocol(other.to_string()),
    }
}

/// Id for a message without a `Message-ID` header, stable while the
/// mailbox's UIDVALIDITY holds.
fn fallback_id(uid_validity: Option<u32>, uid: u32) -> MessageId {
    MessageId::new(format!("uid:{}:{uid}", uid_validity.unwrap_or(0)))
}

/// Build a candidate from a full RFC 5322 message.
fn candidate_from_raw(id: MessageId, raw: &[u8]) -> Option<CandidateMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from = parsed.from().and_then(|addr| addr.first());
    let sender = from
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    let subject = parsed.subject().unwrap_or_default().trim().to_string();

    let mut message = CandidateMessage::new(id.as_str(), subject, sender);
    if let Some(name) = from.and_then(|a| a.name()) {
        message = message.with_sender_name(name.trim());
    }

    let body = match parsed.body_text(0) {
        Some(text) => Some(text.into_owned()),
        None => parsed.body_html(0).map(|html| strip_html(&html)),
    };
    if let Some(snippet) = body.as_deref().and_then(make_snippet) {
        message = message.with_snippet(snippet);
    }

    if let Some(date) = parsed.date() {
        let received_at = chrono::DateTime::from_timestamp(date.to_timestamp(), 0);
        message = message.with_date(date.to_rfc822(), received_at);
    }
    Some(message)
}

// ── Session ─────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged response, with any literals it carried.
#[derive(Debug, Default)]
struct Untagged {
    text: String,
    literals: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Reply {
    untagged: Vec<Untagged>,
    status: Status,
    text: String,
}

impl Reply {
    fn ok(self, what: &str) -> Result<Self, FetchError> {
        match self.status {
            Status::Ok => Ok(self),
            _ => Err(FetchError::Protocol(format!("{what} failed: {}", self.text))),
        }
    }
}

struct ImapSession<S> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl ImapSession<TlsStream> {
    fn connect(cfg: &MailboxConfig) -> crate::error::Result<Self> {
        let connect_err = |reason: String| FetchError::Connect {
            host: cfg.host.clone(),
            reason,
        };

        let addrs = (cfg.host.as_str(), cfg.port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?;
        let mut last_err = "no addresses resolved".to_string();
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, cfg.timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = e.to_string(),
            }
        }
        let tcp = tcp.ok_or_else(|| connect_err(last_err))?;
        tcp.set_read_timeout(Some(cfg.timeout)).map_err(FetchError::Io)?;
        tcp.set_write_timeout(Some(cfg.timeout)).map_err(FetchError::Io)?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(cfg.host.clone())
            .map_err(|e| FetchError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| FetchError::Tls(e.to_string()))?;

        let mut session = ImapSession::new(rustls::StreamOwned::new(conn, tcp));
        session.greeting()?;
        debug!(host = %cfg.host, port = cfg.port, "IMAP connected");
        Ok(session)
    }
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    fn greeting(&mut self) -> Result<(), FetchError> {
        let (line, _) = self.read_response_line()?;
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(FetchError::Protocol(format!("unexpected greeting: {line}")))
        }
    }

    fn login(&mut self, username: &str, password: &SecretString) -> crate::error::Result<()> {
        let cmd = format!(
            "LOGIN {} {}",
            quote(username),
            quote(password.expose_secret())
        );
        let reply = self.command(&cmd)?;
        if reply.status == Status::Ok {
            return Ok(());
        }
        Err(AuthError::Mailbox {
            username: username.to_string(),
            reason: reply.text,
        }
        .into())
    }

    /// Select `mailbox`, returning its UIDVALIDITY when the server reports it.
    fn select(&mut self, mailbox: &str) -> crate::error::Result<Option<u32>> {
        let reply = self
            .command(&format!("SELECT {}", quote(mailbox)))?
            .ok(&format!("SELECT {mailbox}"))?;
        Ok(reply.untagged.iter().find_map(|u| parse_uid_validity(&u.text)))
    }

    /// UIDs of messages with an internal date on or after `since`, ascending.
    fn uid_search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>, FetchError> {
        let reply = self
            .command(&format!("UID SEARCH SINCE {}", imap_date(since)))?
            .ok("UID SEARCH")?;
        let mut uids: Vec<u32> = reply
            .untagged
            .iter()
            .flat_map(|u| parse_search(&u.text))
            .collect();
        uids.sort_unstable();
        uids.dedup();
        Ok(uids)
    }

    /// Fetch `items` for `uids`, returning (uid, first literal) per message.
    fn uid_fetch(&mut self, uids: &[u32], items: &str) -> Result<Vec<(u32, Vec<u8>)>, FetchError> {
        let reply = self
            .command(&format!("UID FETCH {} {items}", uid_set(uids)))?
            .ok("UID FETCH")?;
        Ok(reply
            .untagged
            .into_iter()
            .filter(|u| u.text.contains(" FETCH "))
            .filter_map(|mut u| {
                let uid = fetch_uid(&u.text)?;
                (!u.literals.is_empty()).then(|| (uid, u.literals.swap_remove(0)))
            })
            .collect())
    }

    fn uid_store_seen(&mut self, uids: &[u32]) -> Result<(), FetchError> {
        self.command(&format!("UID STORE {} +FLAGS.SILENT (\\Seen)", uid_set(uids)))?
            .ok("UID STORE")?;
        Ok(())
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Reply, FetchError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let writer = self.stream.get_mut();
        writer.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        writer.flush()?;

        let mut untagged = Vec::new();
        loop {
            let (text, literals) = self.read_response_line()?;
            if let Some((status, rest)) = parse_tagged(&text, &tag) {
                return Ok(Reply {
                    untagged,
                    status,
                    text: rest.to_string(),
                });
            }
            if text.starts_with('+') {
                return Err(FetchError::Protocol(
                    "unexpected continuation request".into(),
                ));
            }
            untagged.push(Untagged { text, literals });
        }
    }

    /// Read one logical response line, consuming any `{N}` literals in it.
    fn read_response_line(&mut self) -> Result<(String, Vec<Vec<u8>>), FetchError> {
        let mut text = String::new();
        let mut literals = Vec::new();
        loop {
            let line = self.read_line()?;
            match literal_len(&line) {
                Some((prefix, len)) => {
                    if len > MAX_LITERAL_BYTES {
                        return Err(FetchError::Protocol(format!(
                            "literal of {len} bytes exceeds limit"
                        )));
                    }
                    text.push_str(&line[..prefix]);
                    let mut buf = vec![0u8; len];
                    self.stream.read_exact(&mut buf)?;
                    literals.push(buf);
                }
                None => {
                    text.push_str(&line);
                    return Ok((text, literals));
                }
            }
        }
    }

    fn read_line(&mut self) -> Result<String, FetchError> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf)? == 0 {
            return Err(FetchError::Protocol("connection closed by server".into()));
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

// ── Protocol helpers ────────────────────────────────────────────────

/// IMAP quoted string.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// `{N}` at the end of a line: byte offset of the `{` and the literal length.
fn literal_len(line: &str) -> Option<(usize, usize)> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    let len = body[open + 1..].trim_end_matches('+').parse().ok()?;
    Some((open, len))
}

fn parse_tagged<'a>(line: &'a str, tag: &str) -> Option<(Status, &'a str)> {
    let rest = line.strip_prefix(tag)?.strip_prefix(' ')?;
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        _ => return None,
    };
    Some((status, text))
}

fn parse_uid_validity(line: &str) -> Option<u32> {
    let start = line.find("[UIDVALIDITY ")? + "[UIDVALIDITY ".len();
    let end = line[start..].find(']')? + start;
    line[start..end].trim().parse().ok()
}

fn parse_search(line: &str) -> Vec<u32> {
    line.strip_prefix("* SEARCH")
        .map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()).collect())
        .unwrap_or_default()
}

/// UID from a `* n FETCH (... UID u ...)` response.
fn fetch_uid(text: &str) -> Option<u32> {
    let mut tokens = text.split(|c: char| c.is_whitespace() || c == '(' || c == ')');
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("UID") {
            return tokens.find(|t| !t.is_empty())?.parse().ok();
        }
    }
    None
}

/// `SEARCH SINCE` date, e.g. `07-Mar-2026`.
fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// `Message-ID` value from a header block, without angle brackets.
fn header_message_id(header: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(header);
    let mut value: Option<String> = None;
    for line in text.lines() {
        if let Some(v) = value.as_mut() {
            if line.starts_with([' ', '\t']) {
                v.push_str(line.trim());
                continue;
            }
            break;
        }
        if let Some((name, rest)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("message-id")
        {
            value = Some(rest.trim().to_string());
        }
    }
    let id = value?
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string();
    (!id.is_empty()).then_some(id)
}

// ── Tests ───────────────────────────────────────────────────────────
