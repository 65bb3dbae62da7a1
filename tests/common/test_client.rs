//! Raw protocol client
//!
//! Speaks the wire protocol byte by byte so tests can assert exactly what
//! the server sends.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use dirapp::client::{BatchReader, Frame};
use dirapp::socket_server::protocol::{self, Greeting, END_COM, READ_CAPACITY};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Connect and complete the init handshake
    pub async fn connect(addr: SocketAddr) -> (Self, Greeting) {
        let mut client = Self::connect_raw(addr).await;
        let greeting = timeout(READ_TIMEOUT, protocol::receive_greeting(&mut client.stream))
            .await
            .expect("Timed out waiting for greeting")
            .expect("Init handshake failed");
        (client, greeting)
    }

    /// Connect without reading anything
    pub async fn connect_raw(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        Self { stream }
    }

    pub async fn read_byte(&mut self) -> u8 {
        timeout(READ_TIMEOUT, protocol::read_byte(&mut self.stream))
            .await
            .expect("Timed out waiting for a byte")
            .expect("Failed to read byte")
    }

    pub async fn read_string(&mut self) -> String {
        timeout(
            READ_TIMEOUT,
            protocol::read_string(&mut self.stream, READ_CAPACITY),
        )
        .await
        .expect("Timed out waiting for a string")
        .expect("Failed to read string")
    }

    /// Read one update batch: header byte and its messages
    pub async fn read_batch(&mut self) -> (u8, Vec<String>) {
        let header = self.read_byte().await;
        assert_ne!(header, END_COM, "Expected a batch, got END_COM");
        let mut messages = Vec::with_capacity(header as usize);
        for _ in 0..header {
            messages.push(self.read_string().await);
        }
        (header, messages)
    }

    /// Read `END_COM` and the message after it
    pub async fn read_end(&mut self) -> String {
        assert_eq!(self.read_byte().await, END_COM, "Expected END_COM");
        self.read_string().await
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("Failed to write to server");
    }

    /// Send the teardown request and return the `END_COM` message that
    /// answers it, skipping batches still in flight
    pub async fn teardown(&mut self) -> String {
        protocol::request_teardown(&mut self.stream)
            .await
            .expect("Failed to send teardown request");
        let mut reader = BatchReader::new(&mut self.stream, Duration::from_millis(100));
        loop {
            let frame = timeout(READ_TIMEOUT, reader.read_frame())
                .await
                .expect("Timed out waiting for Goodbye")
                .expect("Failed to read reply");
            if let Frame::End(message) = frame {
                return message;
            }
        }
    }

    /// Whether the server closed the connection
    pub async fn is_closed(&mut self) -> bool {
        match timeout(READ_TIMEOUT, protocol::read_byte(&mut self.stream)).await {
            Ok(Err(_)) => true,
            Ok(Ok(_)) => false,
            Err(_) => false,
        }
    }
}
