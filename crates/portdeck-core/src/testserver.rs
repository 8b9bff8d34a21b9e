//! Minimal fixture HTTP server for exercising the fetch pipeline without
//! network access. One thread per server, one response per connection.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

pub(crate) struct TestServer {
    url: String,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Serves `body` for up to `connections` requests, honoring Range
    /// headers with 206 responses.
    pub(crate) fn serve(body: Vec<u8>, connections: usize) -> Self {
        Self::start(body, connections, 0)
    }

    /// Drops the first `failures` connections mid-handshake before serving
    /// normally, to exercise retry paths.
    pub(crate) fn flaky(body: Vec<u8>, connections: usize, failures: usize) -> Self {
        Self::start(body, connections, failures)
    }

    fn start(body: Vec<u8>, connections: usize, failures: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let url = format!("http://{}/fixture.bin", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            for i in 0..connections + failures {
                let Ok((stream, _)) = listener.accept() else {
                    break;
                };
                if i < failures {
                    drop(stream);
                    continue;
                }
                let _ = respond(stream, &body);
            }
        });
        Self {
            url,
            handle: Some(handle),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Unblock the accept loop if the test never connected enough times.
        if let Some(handle) = self.handle.take() {
            let _ = TcpStream::connect(self.url.trim_start_matches("http://").split('/').next().unwrap());
            let _ = handle.join();
        }
    }
}

fn respond(stream: TcpStream, body: &[u8]) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut range_start: Option<usize> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed
            .to_ascii_lowercase()
            .strip_prefix("range: bytes=")
            .map(ToString::to_string)
        {
            range_start = value.split('-').next().and_then(|s| s.parse().ok());
        }
    }

    let mut stream = reader.into_inner();
    match range_start {
        Some(start) if start <= body.len() => {
            let tail = &body[start..];
            write!(
                stream,
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                tail.len(),
                start,
                body.len().saturating_sub(1),
                body.len()
            )?;
            stream.write_all(tail)?;
        }
        _ => {
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )?;
            stream.write_all(body)?;
        }
    }
    stream.flush()?;
    let mut sink = [0_u8; 64];
    let _ = stream.read(&mut sink);
    Ok(())
}
