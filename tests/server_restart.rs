//! A store keeps working once a restarted server is reachable again.

use redis_cache_store::RedisCacheStore;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};

type Keyspace = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;

/// Just enough of the wire protocol for GET/SET/DEL; anything else is `+OK`.
async fn serve(listener: TcpListener, keyspace: Keyspace) {
    let mut sessions = JoinSet::new();
    loop {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        sessions.spawn(session(socket, Arc::clone(&keyspace)));
    }
}

async fn session(socket: TcpStream, keyspace: Keyspace) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);
    while let Ok(Some(args)) = read_command(&mut reader).await {
        let name = args
            .first()
            .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase())
            .unwrap_or_default();
        let reply = match (name.as_str(), args.as_slice()) {
            ("GET", [_, key]) => match keyspace.lock().await.get(key) {
                Some(value) => {
                    let mut out = format!("${}\r\n", value.len()).into_bytes();
                    out.extend_from_slice(value);
                    out.extend_from_slice(b"\r\n");
                    out
                }
                None => b"$-1\r\n".to_vec(),
            },
            ("SET", [_, key, value, ..]) | ("SETEX", [_, key, _, value]) => {
                keyspace.lock().await.insert(key.clone(), value.clone());
                b"+OK\r\n".to_vec()
            }
            ("DEL", [_, key]) => {
                let removed = keyspace.lock().await.remove(key).is_some();
                format!(":{}\r\n", u8::from(removed)).into_bytes()
            }
            _ => b"+OK\r\n".to_vec(),
        };
        if write.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn read_command<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count: usize = line.trim_end().trim_start_matches('*').parse().unwrap_or(0);

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len: usize = line.trim_end().trim_start_matches('$').parse().unwrap_or(0);
        let mut arg = vec![0u8; len + 2];
        reader.read_exact(&mut arg).await?;
        arg.truncate(len);
        args.push(arg);
    }
    Ok(Some(args))
}

async fn start(addr: SocketAddr, keyspace: &Keyspace) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind(addr).await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    (addr, tokio::spawn(serve(listener, Arc::clone(keyspace))))
}

async fn stop(server: JoinHandle<()>) {
    server.abort();
    let _ = server.await;
}

#[tokio::test]
async fn store_recovers_after_server_restart() {
    let _ = env_logger::builder().is_test(true).try_init();
    let keyspace = Keyspace::default();
    let (addr, server) = start("127.0.0.1:0".parse().expect("addr"), &keyspace).await;

    let store = RedisCacheStore::builder()
        .with_params(json!({"host": "127.0.0.1", "port": addr.port(), "timeout": 2.0}))
        .build()
        .expect("build");

    assert!(store.write("foo", &"bar".to_string(), None).await);
    assert_eq!(store.read::<String, _>("foo", None).await.as_deref(), Some("bar"));

    stop(server).await;
    assert_eq!(store.read::<String, _>("foo", None).await, None);

    let (_, server) = start(addr, &keyspace).await;

    // At most one command may still land on the transport that died.
    let mut recovered = None;
    for _ in 0..2 {
        recovered = store.read::<String, _>("foo", None).await;
        if recovered.is_some() {
            break;
        }
    }
    assert_eq!(recovered.as_deref(), Some("bar"));
    assert!(store.write("foo", &"baz".to_string(), None).await);
    assert_eq!(store.read::<String, _>("foo", None).await.as_deref(), Some("baz"));

    stop(server).await;
}
