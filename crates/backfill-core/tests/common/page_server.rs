//! Minimal HTTP/1.1 server that answers execution-page requests for integration tests.
//!
//! Every GET returns `[{"id":<before-1>}]` as JSON. Request targets may be
//! origin-form (`/v1/executions?..`) or absolute-form (`http://host/v1/..`), so
//! the same server can stand in for an HTTP proxy. Requests are counted and
//! `Proxy-Authorization` headers recorded.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Default)]
pub struct ServerLog {
    /// `before` value of every page request, in arrival order.
    pub befores: Vec<u64>,
    /// Proxy-Authorization header values seen.
    pub proxy_auth: Vec<String>,
}

#[derive(Clone)]
pub struct PageServer {
    pub base_url: String,
    pub port: u16,
    log: Arc<Mutex<ServerLog>>,
    failing: Arc<Mutex<HashSet<u64>>>,
}

impl PageServer {
    pub fn requests(&self) -> usize {
        self.log.lock().unwrap().befores.len()
    }

    pub fn befores(&self) -> Vec<u64> {
        self.log.lock().unwrap().befores.clone()
    }

    pub fn proxy_auth(&self) -> Vec<String> {
        self.log.lock().unwrap().proxy_auth.clone()
    }

    /// Answer 500 for the page whose `before` parameter equals `before`.
    pub fn fail_before(&self, before: u64) {
        self.failing.lock().unwrap().insert(before);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

/// Body served for the page with the given `before` parameter.
pub fn page_body(before: u64) -> String {
    format!("[{{\"id\":{}}}]", before - 1)
}

/// Starts a server in a background thread. The server runs until the process exits.
pub fn start() -> PageServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let server = PageServer {
        base_url: format!("http://127.0.0.1:{}", port),
        port,
        log: Arc::new(Mutex::new(ServerLog::default())),
        failing: Arc::new(Mutex::new(HashSet::new())),
    };
    let shared = server.clone();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let server = shared.clone();
            thread::spawn(move || handle(stream, &server));
        }
    });
    server
}

fn handle(mut stream: std::net::TcpStream, server: &PageServer) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let request = String::from_utf8_lossy(&buf).to_string();
    let mut lines = request.lines();
    let request_line = lines.next().unwrap_or_default();
    let target = request_line.split_whitespace().nth(1).unwrap_or_default();

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("proxy-authorization") {
                server
                    .log
                    .lock()
                    .unwrap()
                    .proxy_auth
                    .push(value.trim().to_string());
            }
        }
    }

    let Some(before) = query_param(target, "before").and_then(|v| v.parse::<u64>().ok()) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    };
    server.log.lock().unwrap().befores.push(before);

    if server.failing.lock().unwrap().contains(&before) {
        let _ = stream.write_all(
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let body = page_body(before);
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn query_param<'a>(target: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = target.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then_some(v)
    })
}
