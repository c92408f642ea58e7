//! ZMQ `hashblock` subscriber (spec.md §4.1: "ZMQ hashblock triggers" an
//! out-of-band workbase refresh between GBT polls).

use log::{info, warn};
use tokio::sync::mpsc;

/// Subscribes to a `zmqpubhashblock` endpoint and forwards a trigger signal
/// on every notification. Runs its blocking receive loop on a dedicated
/// thread since the `zmq` crate's socket API is synchronous.
pub struct HashblockSubscriber {
    endpoint: String,
}

impl HashblockSubscriber {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HashblockSubscriber {
            endpoint: endpoint.into(),
        }
    }

    /// Spawns the listener thread; each `hashblock` notification sends one
    /// `()` on `trigger`. The channel is bounded at 1 since only "a new
    /// block exists" matters, not how many arrived since the last poll.
    pub fn spawn(self, trigger: mpsc::Sender<()>) {
        std::thread::spawn(move || {
            if let Err(e) = self.run(trigger) {
                warn!("zmq hashblock listener stopped: {e}");
            }
        });
    }

    fn run(&self, trigger: mpsc::Sender<()>) -> Result<(), zmq::Error> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::SUB)?;
        socket.connect(&self.endpoint)?;
        socket.set_subscribe(b"hashblock")?;
        info!("subscribed to zmq hashblock notifications at {}", self.endpoint);

        loop {
            let parts = socket.recv_multipart(0)?;
            if parts.first().map(|p| p.as_slice()) != Some(b"hashblock") {
                continue;
            }
            if trigger.blocking_send(()).is_err() {
                return Ok(());
            }
        }
    }
}
