//! HTTP responder that serves cached implementations to other peers
//! discovered on the local network: answers `GET /<store-name>.zip` by
//! zipping the matching store directory and streaming it back. Peer
//! advertise/browse lives in `zeroinstall-native`'s `peer_discovery`
//! module, which documents this module as the HTTP half of the protocol;
//! this is that half. No HTTP server crate is in the dependency tree, so
//! this is a minimal hand-rolled HTTP/1.1 responder over `TcpListener`,
//! good enough for single-request-per-connection local traffic.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use zeroinstall_schema::ManifestDigest;

use crate::archive::build_zip;
use crate::handler::CancellationToken;
use crate::store::Store;

/// Serves this instance's store to peers over plain HTTP: the server
/// half of the discovery protocol's `http://<peer>:<port>/<digest>.zip`
/// convention. Dropping it stops the background thread.
pub struct PeerResponder {
    stop: Arc<AtomicBool>,
    local_addr: SocketAddr,
    handle: Option<thread::JoinHandle<()>>,
}

impl PeerResponder {
    /// Bind to `bind_addr` (`"0.0.0.0:0"` lets the OS assign a port) and
    /// start serving `store`'s contents from a background thread. Read
    /// [`PeerResponder::port`] afterward to learn what to advertise
    /// through `PeerDiscovery::announce`.
    pub fn start(bind_addr: &str, store: Store) -> std::io::Result<PeerResponder> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let handle = thread::spawn(move || serve_loop(listener, store, stop_thread));
        Ok(PeerResponder { stop, local_addr, handle: Some(handle) })
    }

    /// Port the responder is listening on.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl Drop for PeerResponder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_loop(listener: TcpListener, store: Store, stop: Arc<AtomicBool>) {
    let token = CancellationToken::new();
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &store, &token) {
                    warn!(%err, "peer responder connection failed");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                warn!(%err, "peer responder accept failed");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

enum ServeError {
    NotFound,
    BadRequest,
    Internal,
}

fn handle_connection(mut stream: TcpStream, store: &Store, token: &CancellationToken) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    match serve_path(path, store, token) {
        Ok(bytes) => write_response(&mut stream, 200, "OK", &bytes),
        Err(ServeError::NotFound) => write_response(&mut stream, 404, "Not Found", b""),
        Err(ServeError::BadRequest) => write_response(&mut stream, 400, "Bad Request", b""),
        Err(ServeError::Internal) => write_response(&mut stream, 500, "Internal Server Error", b""),
    }
}

fn serve_path(path: &str, store: &Store, token: &CancellationToken) -> Result<Vec<u8>, ServeError> {
    let name = path.trim_start_matches('/').strip_suffix(".zip").ok_or(ServeError::BadRequest)?;
    let (format, digest_str) = ManifestDigest::parse_store_name(name).ok_or(ServeError::BadRequest)?;
    let mut digest = ManifestDigest::new();
    digest.insert(format, digest_str.to_owned());
    let root = store.get_path(&digest).map_err(|_| ServeError::Internal)?.ok_or(ServeError::NotFound)?;
    build_zip(&root, token).map_err(|_| ServeError::Internal)
}

fn write_response(stream: &mut TcpStream, status: u16, reason: &str, body: &[u8]) -> std::io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpStream;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::manifest_builder::manifest_of_directory;

    fn store_with_one_implementation() -> (tempfile::TempDir, Store, ManifestDigest) {
        let store_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let file_path = src_dir.path().join("hello.txt");
        std::fs::write(&file_path, b"hello from a peer").unwrap();

        let src = Utf8PathBuf::from_path_buf(src_dir.path().to_path_buf()).unwrap();
        let format = zeroinstall_schema::ManifestFormat::Sha256New;
        let (_manifest, hash) = manifest_of_directory(&src, format).unwrap();
        let mut digest = ManifestDigest::new();
        digest.insert(format, hash);

        let root = Utf8PathBuf::from_path_buf(store_dir.path().to_path_buf()).unwrap();
        let store = Store::new(vec![root]);
        store
            .add_directory(&src, &digest, &CancellationToken::new(), &crate::handler::SilentHandler)
            .unwrap();
        (store_dir, store, digest)
    }

    #[test]
    fn serves_a_known_digest_and_404s_an_unknown_one() {
        let (_store_dir, store, digest) = store_with_one_implementation();
        let responder = PeerResponder::start("127.0.0.1:0", store).unwrap();
        let port = responder.port();

        let store_name = digest.best_store_name().unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "GET /{store_name}.zip HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "GET /sha256new_doesnotexist.zip HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[test]
    fn rejects_a_malformed_path() {
        let (_store_dir, store, _digest) = store_with_one_implementation();
        let responder = PeerResponder::start("127.0.0.1:0", store).unwrap();
        let port = responder.port();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "GET /not-a-zip HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 400"));
    }
}
