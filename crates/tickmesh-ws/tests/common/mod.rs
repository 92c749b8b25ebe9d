//! Mock exchange WebSocket server for integration tests.
//!
//! Accepts connections, records text frames, answers `ping` with `pong`
//! (unless muted), and pushes one ticker frame after each subscribe.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct MockExchange {
    addr: SocketAddr,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    answer_pings: Arc<AtomicBool>,
    kick_tx: broadcast::Sender<()>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockExchange {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicU32::new(0));
        let answer_pings = Arc::new(AtomicBool::new(true));
        let (kick_tx, _) = broadcast::channel(4);

        let accept_task = {
            let messages = messages.clone();
            let connections = connections.clone();
            let answer_pings = answer_pings.clone();
            let kick_tx = kick_tx.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(handle_connection(
                        stream,
                        messages.clone(),
                        answer_pings.clone(),
                        kick_tx.subscribe(),
                    ));
                }
            })
        };

        Self {
            addr,
            messages,
            connections,
            answer_pings,
            kick_tx,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn received(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    /// Stop answering application pings.
    pub fn mute_pongs(&self) {
        self.answer_pings.store(false, Ordering::SeqCst);
    }

    /// Close every open socket from the server side.
    pub fn kick_all(&self) {
        let _ = self.kick_tx.send(());
    }
}

impl Drop for MockExchange {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    answer_pings: Arc<AtomicBool>,
    mut kick_rx: broadcast::Receiver<()>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            _ = kick_rx.recv() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    messages.lock().await.push(text.clone());
                    if text == "ping" {
                        if answer_pings.load(Ordering::SeqCst) {
                            let _ = write.send(Message::Text("pong".to_string())).await;
                        }
                    } else if text.starts_with("subscribe:") {
                        let symbol = text.trim_start_matches("subscribe:");
                        let tick = format!("tick:{}:42000.5", symbol);
                        let _ = write.send(Message::Text(tick)).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }
}
