use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::adapter::CacheAdapter;
use super::types::CacheError;

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_KEY_LEN: usize = 250;
/// Larger exptimes are read by the server as absolute unix timestamps
const MAX_RELATIVE_EXPTIME: u64 = 60 * 60 * 24 * 30;

/// Cache backend talking to a memcached server over the ASCII protocol.
///
/// Expiry is enforced server-side from the exptime sent with each `set`.
/// A connection that fails mid-request is discarded and the next request
/// opens a fresh one, so a late reply is never read as the answer to a
/// later command.
#[derive(Debug)]
pub struct MemcacheClient {
    conn: Mutex<Option<Connection>>,
    addr: SocketAddr,
    server: String,
    timeout: Duration,
    cache_time: AtomicU64,
}

#[derive(Debug)]
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl MemcacheClient {
    /// Connect to `server:port`
    pub fn connect(server: &str, port: u16) -> Result<Self, CacheError> {
        Self::connect_with_timeout(server, port, IO_TIMEOUT)
    }

    /// Connect to `server:port`, giving up on any single read or write after `timeout`
    pub fn connect_with_timeout(
        server: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let label = format!("{}:{}", server, port);
        let addr = (server, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| CacheError::InvalidServer(label.clone()))?;

        let conn = Connection::open(addr, timeout)
            .map_err(|_| CacheError::InvalidServer(label.clone()))?;
        debug!("Connected to memcached at {}", label);

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            addr,
            server: label,
            timeout,
            cache_time: AtomicU64::new(0),
        })
    }

    /// Address this client is connected to
    pub fn server(&self) -> &str {
        &self.server
    }

    fn exptime(&self) -> u32 {
        let ttl = self.get_cache_time();
        if ttl <= MAX_RELATIVE_EXPTIME {
            return ttl as u32;
        }
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        u32::try_from(now.saturating_add(ttl)).unwrap_or(u32::MAX)
    }

    /// Run one request/reply exchange. The connection is only kept when the
    /// exchange succeeds; otherwise unread reply bytes may still be in flight.
    fn exchange<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut slot = self.conn.lock();
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                debug!("Reconnecting to memcached at {}", self.server);
                Connection::open(self.addr, self.timeout)?
            }
        };

        let result = op(&mut conn);
        match &result {
            Ok(_) => *slot = Some(conn),
            Err(e) => warn!("Dropping memcached connection to {}: {}", self.server, e),
        }
        result
    }
}

impl Connection {
    fn open(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn read_line(&mut self) -> Result<String, CacheError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(CacheError::Protocol("connection closed by server".to_string()));
        }
        if !line.ends_with("\r\n") {
            return Err(CacheError::Protocol(format!("unterminated line: {:?}", line)));
        }
        line.truncate(line.len() - 2);
        Ok(line)
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        write!(self.writer, "get {}\r\n", key)?;
        self.writer.flush()?;

        let line = self.read_line()?;
        if line == "END" {
            return Ok(None);
        }

        // VALUE <key> <flags> <bytes>
        let mut parts = line.split(' ');
        if parts.next() != Some("VALUE") {
            return Err(server_error(&line));
        }
        if parts.next() != Some(key) {
            return Err(CacheError::Protocol(format!(
                "reply for another key while reading {}: {}",
                key, line
            )));
        }
        let len: usize = parts
            .nth(1)
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| CacheError::Protocol(format!("malformed VALUE line: {}", line)))?;

        let mut data = vec![0u8; len + 2];
        self.reader.read_exact(&mut data)?;
        if !data.ends_with(b"\r\n") {
            return Err(CacheError::Protocol("missing data terminator".to_string()));
        }
        data.truncate(len);

        let end = self.read_line()?;
        if end != "END" {
            return Err(CacheError::Protocol(format!("expected END, got {}", end)));
        }
        Ok(Some(data))
    }

    fn set(&mut self, key: &str, data: &[u8], exptime: u32) -> Result<(), CacheError> {
        write!(self.writer, "set {} 0 {} {}\r\n", key, exptime, data.len())?;
        self.writer.write_all(data)?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;

        match self.read_line()?.as_str() {
            "STORED" => Ok(()),
            other => Err(server_error(other)),
        }
    }
}

fn server_error(line: &str) -> CacheError {
    CacheError::Protocol(format!("unexpected server reply: {}", line))
}

fn check_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(CacheError::Protocol(format!("invalid memcached key: {:?}", key)));
    }
    Ok(())
}

impl CacheAdapter for MemcacheClient {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        check_key(key)?;
        match self.exchange(|conn| conn.get(key))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        check_key(key)?;
        let data = serde_json::to_vec(value)?;
        let exptime = self.exptime();
        self.exchange(|conn| conn.set(key, &data, exptime))
    }

    fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key)?.is_some())
    }

    fn set_cache_time(&self, seconds: u64) -> &dyn CacheAdapter {
        self.cache_time.store(seconds, Ordering::Relaxed);
        self
    }

    fn get_cache_time(&self) -> u64 {
        self.cache_time.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::net::TcpListener;
    use std::sync::{mpsc, Arc};
    use std::thread;

    /// Minimal single-connection memcached stand-in. Every `set` line is
    /// forwarded on the channel so tests can inspect the exptime sent.
    fn spawn_server() -> (u16, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut store: HashMap<String, Vec<u8>> = HashMap::new();

            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    return;
                }
                let parts: Vec<&str> = line.trim_end().split(' ').collect();
                match parts[0] {
                    "get" => {
                        if let Some(data) = store.get(parts[1]) {
                            write!(writer, "VALUE {} 0 {}\r\n", parts[1], data.len()).unwrap();
                            writer.write_all(data).unwrap();
                            writer.write_all(b"\r\n").unwrap();
                        }
                        writer.write_all(b"END\r\n").unwrap();
                    }
                    "set" => {
                        let len: usize = parts[4].parse().unwrap();
                        let mut data = vec![0u8; len + 2];
                        reader.read_exact(&mut data).unwrap();
                        data.truncate(len);
                        store.insert(parts[1].to_string(), data);
                        tx.send(line.trim_end().to_string()).unwrap();
                        writer.write_all(b"STORED\r\n").unwrap();
                    }
                    _ => writer.write_all(b"ERROR\r\n").unwrap(),
                }
            }
        });

        (port, rx)
    }

    /// Server answering every `get <key>` with whatever `reply` returns for
    /// that key. Each connection gets its own thread so clients can reconnect.
    fn spawn_replying_server<F>(reply: F) -> u16
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let reply = Arc::new(reply);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { return };
                let reply = Arc::clone(&reply);
                thread::spawn(move || {
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut writer = stream;
                    let mut line = String::new();
                    while reader.read_line(&mut line).unwrap_or(0) > 0 {
                        if let Some(key) = line.trim_end().strip_prefix("get ") {
                            // The client may already have hung up.
                            if writer.write_all(reply(key).as_bytes()).is_err() {
                                return;
                            }
                        }
                        line.clear();
                    }
                });
            }
        });

        port
    }

    fn value_reply(key: &str, value: &Value) -> String {
        let data = value.to_string();
        format!("VALUE {} 0 {}\r\n{}\r\nEND\r\n", key, data.len(), data)
    }

    #[test]
    fn test_late_reply_is_not_read_as_the_next_answer() {
        let port = spawn_replying_server(|key| {
            if key == "a" {
                thread::sleep(Duration::from_millis(600));
            }
            value_reply(key, &json!(format!("value-of-{}", key)))
        });
        let client =
            MemcacheClient::connect_with_timeout("127.0.0.1", port, Duration::from_millis(200))
                .unwrap();

        assert!(matches!(client.get("a"), Err(CacheError::Io(_))));
        // Give the late reply for "a" time to land on the old socket.
        thread::sleep(Duration::from_millis(600));
        assert_eq!(client.get("b").unwrap(), Some(json!("value-of-b")));
        assert_eq!(client.get("c").unwrap(), Some(json!("value-of-c")));
    }

    #[test]
    fn test_reply_for_another_key_is_rejected() {
        let port = spawn_replying_server(|_| value_reply("other", &json!("stale")));
        let client = MemcacheClient::connect("127.0.0.1", port).unwrap();

        assert!(matches!(client.get("k"), Err(CacheError::Protocol(_))));
        assert!(matches!(client.has("k"), Err(CacheError::Protocol(_))));
    }

    #[test]
    fn test_round_trip_through_server() {
        let (port, _sets) = spawn_server();
        let client = MemcacheClient::connect("127.0.0.1", port).unwrap();
        assert_eq!(client.server(), format!("127.0.0.1:{}", port));

        assert!(!client.has("abc").unwrap());
        client.set("abc", &json!("Hello\r\nEND\r\n")).unwrap();
        assert!(client.has("abc").unwrap());
        assert_eq!(client.get("abc").unwrap(), Some(json!("Hello\r\nEND\r\n")));
    }

    #[test]
    fn test_ttl_travels_as_exptime() {
        let (port, sets) = spawn_server();
        let client = MemcacheClient::connect("127.0.0.1", port).unwrap();
        client.set_cache_time(20);
        client.set("k", &json!([1, 2, 3])).unwrap();

        let line = sets.recv().unwrap();
        assert_eq!(line, "set k 0 20 7");
    }

    #[test]
    fn test_huge_ttl_is_capped_to_an_absolute_exptime() {
        let (port, sets) = spawn_server();
        let client = MemcacheClient::connect("127.0.0.1", port).unwrap();

        client.set_cache_time(u64::MAX);
        client.set("k", &json!(1)).unwrap();
        assert_eq!(sets.recv().unwrap(), format!("set k 0 {} 1", u32::MAX));

        client.set_cache_time(MAX_RELATIVE_EXPTIME + 1);
        let before = Utc::now().timestamp() as u64;
        client.set("k", &json!(1)).unwrap();
        let exptime: u64 = sets.recv().unwrap().split(' ').nth(3).unwrap().parse().unwrap();
        assert!(exptime >= before + MAX_RELATIVE_EXPTIME + 1);
        assert!(exptime <= u32::MAX as u64);
    }

    #[test]
    fn test_rejects_keys_with_whitespace() {
        let (port, _sets) = spawn_server();
        let client = MemcacheClient::connect("127.0.0.1", port).unwrap();
        assert!(matches!(
            client.set("two words", &json!(1)),
            Err(CacheError::Protocol(_))
        ));
    }

    #[test]
    fn test_unreachable_server_is_invalid() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        assert!(matches!(
            MemcacheClient::connect("127.0.0.1", port),
            Err(CacheError::InvalidServer(_))
        ));
    }
}
