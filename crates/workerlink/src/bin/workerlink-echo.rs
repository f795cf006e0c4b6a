//! A process worker that answers `echo` requests with their own payload,
//! `reverse` requests with the payload reversed, and `name` requests with the
//! name it was spawned under.

use workerlink::logging;
use workerlink::process::stdio_endpoint;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = logging::init();

    let mut endpoint = stdio_endpoint();
    let name = endpoint.options().display_name().to_owned();
    endpoint
        .on("echo", |payload| async move { Some(payload) })
        .on("reverse", |mut payload| async move {
            payload.reverse();
            Some(payload)
        })
        .on("name", move |_| {
            let name = name.clone();
            async move { Some(name.into_bytes()) }
        });

    endpoint.sender().signal_ready().await?;
    endpoint.run().await?;
    Ok(())
}
