//! TCP echo example: a server endpoint that writes every payload back.
//!
//! Run with: cargo run --example tcp_echo
//!
//! This binds a server on an ephemeral port, connects a raw client socket,
//! sends one framed message, and prints the echoed reply.

use hawser_stream::{Handlers, Role, Service};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let handlers = Handlers::new()
        .with_on_accepted(|_service, conn| async move {
            println!("accepted {}", conn.id());
            Ok(())
        })
        .with_on_read(|_service, conn, payload| async move {
            println!("read {} bytes, echoing", payload.len());
            conn.write(payload);
            Ok(())
        });

    let service = Service::bind(Role::Server, "0.0.0.0", 0, handlers);
    while !service.get_running() {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let port = service.get_port();
    println!("listening on {port}");

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let payload = b"hello hawser";
    let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
    framed.extend_from_slice(payload);
    stream.write_all(&framed).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let mut echoed = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut echoed).await?;
    println!("echoed: {}", String::from_utf8_lossy(&echoed));

    service.stop_clients();
    Ok(())
}
