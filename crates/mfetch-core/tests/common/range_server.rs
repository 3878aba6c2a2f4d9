//! Minimal HTTP/1.1 artifact host for integration tests.
//!
//! Serves one static body under every path. Answers HEAD with Content-Length
//! and GET with 200 or 206 Partial Content for `Range: bytes=N-`. Failure
//! injection covers 500s, connections dropped mid-body, a required bearer
//! token, a lying HEAD, ignored ranges and slow bodies. Every request is
//! logged so tests can assert on what the client sent.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct RangeServerOptions {
    /// The first N GETs are answered with 500.
    pub fail_first_gets: usize,
    /// The first `drop_gets` successful GETs close the connection after this many body bytes.
    pub drop_after: Option<u64>,
    pub drop_gets: usize,
    /// Every request must carry `Authorization: Bearer <token>`, else 401.
    pub require_token: Option<String>,
    /// Size advertised by HEAD instead of the real length.
    pub head_len_override: Option<u64>,
    /// Always answer GET with 200 and the full body.
    pub ignore_ranges: bool,
    /// Write the body in pieces of this size with a pause after each.
    pub throttle: Option<(usize, Duration)>,
}

/// One request as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub range_start: Option<u64>,
    pub authorization: Option<String>,
    /// When the request head was fully read.
    pub at: Instant,
}

pub struct RangeServer {
    /// Base URL without trailing slash, e.g. `http://127.0.0.1:12345`.
    pub url: String,
    log: Arc<Mutex<Vec<Request>>>,
}

impl RangeServer {
    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .collect()
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

/// Serve `body` from a background thread until the process exits.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let log = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::new(State {
        body,
        opts,
        log: Arc::clone(&log),
        gets: AtomicUsize::new(0),
    });
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}", port),
        log,
    }
}

struct State {
    body: Vec<u8>,
    opts: RangeServerOptions,
    log: Arc<Mutex<Vec<Request>>>,
    gets: AtomicUsize,
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(head) = read_head(&mut stream) else {
        return;
    };
    let req = parse_request(&head);
    state.log.lock().unwrap().push(req.clone());

    let opts = &state.opts;
    let total = state.body.len() as u64;

    if let Some(token) = &opts.require_token {
        if req.authorization.as_deref() != Some(format!("Bearer {}", token).as_str()) {
            respond_empty(&mut stream, "401 Unauthorized");
            return;
        }
    }

    match req.method.as_str() {
        "HEAD" => {
            let len = opts.head_len_override.unwrap_or(total);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                len
            );
            let _ = stream.write_all(response.as_bytes());
        }
        "GET" => {
            let nth = state.gets.fetch_add(1, Ordering::SeqCst);
            if nth < opts.fail_first_gets {
                respond_empty(&mut stream, "500 Internal Server Error");
                return;
            }
            let start = if opts.ignore_ranges { None } else { req.range_start };
            let (status, slice) = match start {
                Some(s) if s >= total => {
                    let response = format!(
                        "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        total
                    );
                    let _ = stream.write_all(response.as_bytes());
                    return;
                }
                Some(s) => ("206 Partial Content", &state.body[s as usize..]),
                None => ("200 OK", &state.body[..]),
            };
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                status,
                slice.len()
            );
            if stream.write_all(response.as_bytes()).is_err() {
                return;
            }
            let succeeded = nth - opts.fail_first_gets;
            let cut = match opts.drop_after {
                Some(n) if succeeded < opts.drop_gets => (n as usize).min(slice.len()),
                _ => slice.len(),
            };
            write_body(&mut stream, &slice[..cut], opts.throttle);
            let _ = stream.flush();
            let _ = stream.shutdown(Shutdown::Both);
        }
        _ => respond_empty(&mut stream, "405 Method Not Allowed"),
    }
}

fn write_body(stream: &mut TcpStream, data: &[u8], throttle: Option<(usize, Duration)>) {
    match throttle {
        Some((piece, pause)) => {
            for chunk in data.chunks(piece.max(1)) {
                if stream.write_all(chunk).is_err() {
                    return;
                }
                let _ = stream.flush();
                thread::sleep(pause);
            }
        }
        None => {
            let _ = stream.write_all(data);
        }
    }
}

fn respond_empty(stream: &mut TcpStream, status: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status
    );
    let _ = stream.write_all(response.as_bytes());
}

/// Read until the blank line that ends the request head.
fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while !data.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&buf[..n]),
        }
        if data.len() > 64 * 1024 {
            return None;
        }
    }
    String::from_utf8(data).ok()
}

fn parse_request(head: &str) -> Request {
    let mut lines = head.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("").to_string();
    let path = first.next().unwrap_or("").to_string();
    let mut range_start = None;
    let mut authorization = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("range") {
            range_start = value
                .strip_prefix("bytes=")
                .and_then(|r| r.split_once('-'))
                .and_then(|(a, _)| a.trim().parse::<u64>().ok());
        } else if name.trim().eq_ignore_ascii_case("authorization") {
            authorization = Some(value.to_string());
        }
    }
    Request {
        method,
        path,
        range_start,
        authorization,
        at: Instant::now(),
    }
}
