//! Minimal in-process MQTT 3.1.1 broker for engine tests
//!
//! Speaks just enough of the protocol for a publishing client: CONNECT,
//! PUBLISH at every QoS, PUBREL, PINGREQ and DISCONNECT. Plaintext only.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A PUBLISH the broker received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerOptions {
    /// Answer every CONNECT with this return code and close
    pub refuse_with: Option<u8>,
    pub session_present: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    published: Mutex<Vec<ReceivedPublish>>,
}

pub struct FakeBroker {
    addr: SocketAddr,
    state: Arc<BrokerState>,
    kick_tx: watch::Sender<u64>,
    accept_task: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start(options: BrokerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(BrokerState::default());
        let (kick_tx, _) = watch::channel(0u64);

        let accept_state = state.clone();
        let accept_kick = kick_tx.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                let kick_rx = accept_kick.subscribe();
                tokio::spawn(serve(stream, options, state, kick_rx));
            }
        });

        Self {
            addr,
            state,
            kick_tx,
            accept_task,
        }
    }

    /// Plaintext endpoint for the connection builder
    pub fn endpoint(&self) -> String {
        format!("mqtt://127.0.0.1:{}", self.addr.port())
    }

    /// Drop every live connection
    pub fn kick(&self) {
        self.kick_tx.send_modify(|generation| *generation += 1);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<ReceivedPublish> {
        self.state.published.lock().unwrap().clone()
    }

    /// Poll `condition` until it holds or `timeout` passes
    pub async fn wait_until(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.kick();
    }
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "malformed remaining length",
            ));
        }
    }

    let mut body = vec![0u8; remaining];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

async fn serve(
    mut stream: TcpStream,
    options: BrokerOptions,
    state: Arc<BrokerState>,
    mut kick_rx: watch::Receiver<u64>,
) {
    loop {
        let packet = tokio::select! {
            packet = read_packet(&mut stream) => packet,
            _ = kick_rx.changed() => return,
        };
        let Ok((header, body)) = packet else {
            return;
        };

        let reply = match header >> 4 {
            // CONNECT
            1 => {
                state.connects.fetch_add(1, Ordering::SeqCst);
                match options.refuse_with {
                    Some(code) => {
                        let _ = stream.write_all(&[0x20, 0x02, 0x00, code]).await;
                        return;
                    }
                    None => Some(vec![0x20, 0x02, u8::from(options.session_present), 0x00]),
                }
            }
            // PUBLISH
            3 => {
                let qos = (header >> 1) & 0x03;
                let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
                let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).to_string();
                let mut offset = 2 + topic_len;
                let reply = if qos > 0 {
                    let pkid = [body[offset], body[offset + 1]];
                    offset += 2;
                    let kind = if qos == 1 { 0x40 } else { 0x50 };
                    Some(vec![kind, 0x02, pkid[0], pkid[1]])
                } else {
                    None
                };
                state.published.lock().unwrap().push(ReceivedPublish {
                    topic,
                    payload: body[offset..].to_vec(),
                    qos,
                });
                reply
            }
            // PUBREL
            6 => Some(vec![0x70, 0x02, body[0], body[1]]),
            // PINGREQ
            12 => Some(vec![0xD0, 0x00]),
            // DISCONNECT
            14 => {
                state.disconnects.fetch_add(1, Ordering::SeqCst);
                return;
            }
            _ => None,
        };

        if let Some(reply) = reply {
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broker_answers_connect() {
        let broker = FakeBroker::start(BrokerOptions::default()).await;
        let mut stream = TcpStream::connect(broker.addr).await.unwrap();

        // Minimal CONNECT: protocol "MQTT", level 4, clean session, keep alive 60, client id "t"
        let connect = [
            0x10, 0x0D, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00, 0x01,
            b't',
        ];
        stream.write_all(&connect).await.unwrap();

        let mut connack = [0u8; 4];
        stream.read_exact(&mut connack).await.unwrap();
        assert_eq!(connack, [0x20, 0x02, 0x00, 0x00]);
        assert_eq!(broker.connects(), 1);
    }
}
