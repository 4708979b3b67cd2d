// Result cache: maps the printed slice module to either a rewrite record or
// the no-solution sentinel. Storage sits behind the KvStore trait with two
// implementations: a Redis hash-field client speaking RESP2 over a TcpStream
// with bounded socket timeouts, and an in-memory table for tests. The cache
// is advisory; every transport failure degrades to a miss with a warning.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

pub const NO_SOLUTION: &str = "<no-sol>";

const FIELD_REWRITE: &str = "rewrite";
const FIELD_COST_AFTER: &str = "cost-after";
const FIELD_COST_BEFORE: &str = "cost-before";
const FIELD_ORIGIN: &str = "origin";

/// Hash-field get/set over some key/value transport.
pub trait KvStore {
    fn hget(&mut self, key: &[u8], field: &str) -> io::Result<Option<Vec<u8>>>;
    fn hset(&mut self, key: &[u8], pairs: &[(&str, &[u8])]) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRewrite {
    pub expr: String,
    pub cost_after: u64,
    pub cost_before: u64,
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    NoSolution,
    Rewrite(CachedRewrite),
}

pub struct ResultCache {
    store: Box<dyn KvStore>,
}

impl ResultCache {
    pub fn new(store: Box<dyn KvStore>) -> ResultCache {
        ResultCache { store }
    }

    /// Blocking, bounded lookup. Transport failures read as a miss.
    pub fn get(&mut self, key: &str) -> Option<CacheValue> {
        let rewrite = match self.store.hget(key.as_bytes(), FIELD_REWRITE) {
            Ok(v) => v?,
            Err(e) => {
                log::warn!(target: "peepopt::cache", "cache unavailable: {}", e);
                return None;
            }
        };
        let rewrite = String::from_utf8_lossy(&rewrite).into_owned();
        if rewrite == NO_SOLUTION {
            return Some(CacheValue::NoSolution);
        }
        let mut num = |field: &str| -> u64 {
            match self.store.hget(key.as_bytes(), field) {
                Ok(Some(v)) => String::from_utf8_lossy(&v).parse().unwrap_or(0),
                _ => 0,
            }
        };
        let cost_after = num(FIELD_COST_AFTER);
        let cost_before = num(FIELD_COST_BEFORE);
        let origin = match self.store.hget(key.as_bytes(), FIELD_ORIGIN) {
            Ok(Some(v)) => String::from_utf8_lossy(&v).into_owned(),
            _ => String::new(),
        };
        Some(CacheValue::Rewrite(CachedRewrite { expr: rewrite, cost_after, cost_before, origin }))
    }

    pub fn put_rewrite(
        &mut self,
        key: &str,
        expr: &str,
        cost_after: u64,
        cost_before: u64,
        origin: &str,
    ) {
        let ca = cost_after.to_string();
        let cb = cost_before.to_string();
        let pairs: Vec<(&str, &[u8])> = vec![
            (FIELD_REWRITE, expr.as_bytes()),
            (FIELD_COST_AFTER, ca.as_bytes()),
            (FIELD_COST_BEFORE, cb.as_bytes()),
            (FIELD_ORIGIN, origin.as_bytes()),
        ];
        if let Err(e) = self.store.hset(key.as_bytes(), &pairs) {
            log::warn!(target: "peepopt::cache", "cache write failed: {}", e);
        }
    }

    pub fn put_no_solution(&mut self, key: &str, origin: &str) {
        let pairs: Vec<(&str, &[u8])> = vec![
            (FIELD_REWRITE, NO_SOLUTION.as_bytes()),
            (FIELD_ORIGIN, origin.as_bytes()),
        ];
        if let Err(e) = self.store.hset(key.as_bytes(), &pairs) {
            log::warn!(target: "peepopt::cache", "cache write failed: {}", e);
        }
    }
}

/// RESP2 client for a Redis-compatible server, HGET/HSET only.
pub struct RedisKv {
    stream: TcpStream,
}

impl RedisKv {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<RedisKv> {
        let addr = format!("{}:{}", host, port);
        let stream = TcpStream::connect(&addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(RedisKv { stream })
    }

    fn command(&mut self, args: &[&[u8]]) -> io::Result<Resp> {
        let mut buf = Vec::new();
        buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
        for a in args {
            buf.extend_from_slice(format!("${}\r\n", a.len()).as_bytes());
            buf.extend_from_slice(a);
            buf.extend_from_slice(b"\r\n");
        }
        self.stream.write_all(&buf)?;
        let mut reader = BufReader::new(&mut self.stream);
        read_resp(&mut reader)
    }
}

#[derive(Debug)]
enum Resp {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(usize),
}

fn read_resp<R: BufRead>(r: &mut R) -> io::Result<Resp> {
    let mut line = String::new();
    r.read_line(&mut line)?;
    let line = line.trim_end();
    if line.is_empty() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "empty reply"));
    }
    let (kind, rest) = line.split_at(1);
    match kind {
        "+" => Ok(Resp::Simple(rest.to_string())),
        "-" => Ok(Resp::Error(rest.to_string())),
        ":" => Ok(Resp::Integer(rest.parse().unwrap_or(0))),
        "$" => {
            let len: i64 = rest
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad bulk length"))?;
            if len < 0 {
                return Ok(Resp::Bulk(None));
            }
            let mut data = vec![0u8; len as usize + 2];
            r.read_exact(&mut data)?;
            data.truncate(len as usize);
            Ok(Resp::Bulk(Some(data)))
        }
        "*" => Ok(Resp::Array(rest.parse().unwrap_or(0))),
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "bad reply kind")),
    }
}

impl KvStore for RedisKv {
    fn hget(&mut self, key: &[u8], field: &str) -> io::Result<Option<Vec<u8>>> {
        match self.command(&[b"HGET", key, field.as_bytes()])? {
            Resp::Bulk(v) => Ok(v),
            Resp::Error(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unexpected HGET reply")),
        }
    }

    fn hset(&mut self, key: &[u8], pairs: &[(&str, &[u8])]) -> io::Result<()> {
        let mut args: Vec<&[u8]> = vec![b"HSET", key];
        for (f, v) in pairs {
            args.push(f.as_bytes());
            args.push(v);
        }
        match self.command(&args)? {
            Resp::Integer(_) | Resp::Simple(_) => Ok(()),
            Resp::Error(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unexpected HSET reply")),
        }
    }
}

/// In-memory store used by tests and by runs without a cache server.
#[derive(Default)]
pub struct MemKv {
    map: HashMap<Vec<u8>, HashMap<String, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> MemKv {
        MemKv::default()
    }
}

impl KvStore for MemKv {
    fn hget(&mut self, key: &[u8], field: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).and_then(|h| h.get(field).cloned()))
    }

    fn hset(&mut self, key: &[u8], pairs: &[(&str, &[u8])]) -> io::Result<()> {
        let entry = self.map.entry(key.to_vec()).or_default();
        for (f, v) in pairs {
            entry.insert(f.to_string(), v.to_vec());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_round_trip() {
        let mut cache = ResultCache::new(Box::new(MemKv::new()));
        cache.put_rewrite("key1", "(add i32 %x %y)", 3, 7, "f");
        match cache.get("key1") {
            Some(CacheValue::Rewrite(r)) => {
                assert_eq!(r.expr, "(add i32 %x %y)");
                assert_eq!(r.cost_after, 3);
                assert_eq!(r.cost_before, 7);
                assert_eq!(r.origin, "f");
            }
            other => panic!("unexpected cache value: {:?}", other),
        }
    }

    #[test]
    fn no_solution_round_trip() {
        let mut cache = ResultCache::new(Box::new(MemKv::new()));
        cache.put_no_solution("key2", "f");
        assert_eq!(cache.get("key2"), Some(CacheValue::NoSolution));
    }

    #[test]
    fn miss_is_none() {
        let mut cache = ResultCache::new(Box::new(MemKv::new()));
        assert_eq!(cache.get("nope"), None);
    }
}
