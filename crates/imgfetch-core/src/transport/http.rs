//! libcurl-backed transport.
//!
//! The transfer runs on its own thread and hands body chunks to the reader
//! through a bounded channel, so at most a few chunks sit between libcurl and
//! the buffer the caller is filling.

use std::io::{self, Read};
use std::str;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;
use std::time::Duration;

use curl::easy::{Easy2, Handler, WriteError};

use super::{Response, Transport, TransportError};
use crate::config::FetchConfig;

/// Chunks buffered between the transfer thread and the reader.
const CHANNEL_CHUNKS: usize = 16;

/// Plain GET over libcurl with connect and read timeouts.
///
/// The read timeout is enforced as a low-speed limit: a transfer that moves
/// less than one byte per second for `read_timeout` is aborted. Each `open`
/// uses a fresh handle; connections are not reused across attempts.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5))
    }
}

impl CurlTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }

    pub fn from_config(cfg: &FetchConfig) -> Self {
        Self::new(
            Duration::from_millis(cfg.connect_timeout_ms),
            Duration::from_millis(cfg.read_timeout_ms),
        )
    }
}

/// What the transfer thread tells the reader, in order: one `Head`, any
/// number of `Data`, one `End`. A transfer that fails before the first body
/// byte sends only `End`.
#[derive(Debug)]
enum Event {
    Head { code: u32, content_length: Option<u64> },
    Data(Vec<u8>),
    End(Option<curl::Error>),
}

/// Easy2 handler that forwards the final response's status and body.
struct StreamHandler {
    tx: SyncSender<Event>,
    response_headers: Vec<String>,
    head_sent: bool,
}

impl StreamHandler {
    fn new(tx: SyncSender<Event>) -> Self {
        Self {
            tx,
            response_headers: Vec::new(),
            head_sent: false,
        }
    }

    /// Send `Head` once. Returns false when the reader is gone.
    fn send_head(&mut self, fallback_code: Option<u32>) -> bool {
        if self.head_sent {
            return true;
        }
        self.head_sent = true;
        let code = parse_http_status(&self.response_headers)
            .or(fallback_code)
            .unwrap_or(0);
        let content_length = parse_content_length(&self.response_headers);
        self.tx.send(Event::Head { code, content_length }).is_ok()
    }
}

impl Handler for StreamHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            // Each redirect hop starts a new header block.
            if line.starts_with("HTTP/") {
                self.response_headers.clear();
            }
            if !line.is_empty() {
                self.response_headers.push(line.to_string());
            }
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if !self.send_head(None) {
            return Ok(0);
        }
        match self.tx.send(Event::Data(data.to_vec())) {
            Ok(()) => Ok(data.len()),
            // Reader dropped the response; abort the transfer.
            Err(_) => Ok(0),
        }
    }
}

fn parse_http_status(headers: &[String]) -> Option<u32> {
    let line = headers.first()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

fn parse_content_length(headers: &[String]) -> Option<u64> {
    headers.iter().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Drive the transfer to completion and report how it ended.
fn run_transfer(mut easy: Easy2<StreamHandler>) {
    let res = easy.perform();
    let code = easy.response_code().ok();
    let handler = easy.get_mut();
    match res {
        Ok(()) => {
            if handler.send_head(code) {
                let _ = handler.tx.send(Event::End(None));
            }
        }
        Err(e) => {
            let _ = handler.tx.send(Event::End(Some(e)));
        }
    }
}

/// Body stream fed by the transfer thread.
struct ChannelBody {
    rx: Receiver<Event>,
    chunk: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl ChannelBody {
    fn new(rx: Receiver<Event>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
            finished: false,
        }
    }
}

fn curl_to_io(e: curl::Error) -> io::Error {
    let kind = if e.is_operation_timedout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::ConnectionAborted
    };
    io::Error::new(kind, e)
}

impl Read for ChannelBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.chunk.len() {
                let n = buf.len().min(self.chunk.len() - self.pos);
                buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Event::Data(data)) => {
                    self.chunk = data;
                    self.pos = 0;
                }
                Ok(Event::End(None)) => self.finished = true,
                Ok(Event::End(Some(e))) => {
                    self.finished = true;
                    return Err(curl_to_io(e));
                }
                Ok(Event::Head { .. }) => {}
                Err(_) => {
                    self.finished = true;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transfer thread ended without finishing the body",
                    ));
                }
            }
        }
    }
}

impl Transport for CurlTransport {
    fn open(&self, key: &str) -> Result<Response, TransportError> {
        url::Url::parse(key).map_err(|source| TransportError::InvalidUrl {
            url: key.to_string(),
            source,
        })?;

        let (tx, rx) = mpsc::sync_channel(CHANNEL_CHUNKS);
        let mut easy = Easy2::new(StreamHandler::new(tx));
        easy.url(key)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.low_speed_limit(1)?;
        easy.low_speed_time(self.read_timeout)?;

        thread::Builder::new()
            .name("imgfetch-curl".to_string())
            .spawn(move || run_transfer(easy))?;

        match rx.recv() {
            Ok(Event::Head { code, content_length }) => {
                if !(200..300).contains(&code) {
                    return Err(TransportError::Http(code));
                }
                tracing::debug!(url = key, code, ?content_length, "GET streaming");
                Ok(Response::new(ChannelBody::new(rx), content_length))
            }
            Ok(Event::End(Some(e))) => Err(TransportError::Curl(e)),
            Ok(Event::End(None)) | Ok(Event::Data(_)) | Err(_) => Err(TransportError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "transfer ended before a response arrived",
            ))),
        }
    }
}
