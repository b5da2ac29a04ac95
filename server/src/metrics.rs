use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide counters exposed on `GET /metrics`. Constructed once in
/// the bootstrap and handed around explicitly so tests can read them.
#[derive(Default)]
pub struct Metrics {
    pub connections_open: AtomicI64,
    pub connections_total: AtomicU64,
    pub frames_in: AtomicU64,
    pub commands_ok: AtomicU64,
    pub commands_failed: AtomicU64,
    pub events_broadcast: AtomicU64,
    pub webhooks_received: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&self) -> String {
        format!(
            "connections_open {}\nconnections_total {}\nframes_in {}\ncommands_ok {}\ncommands_failed {}\nevents_broadcast {}\nwebhooks_received {}\n",
            self.connections_open.load(Ordering::Relaxed),
            self.connections_total.load(Ordering::Relaxed),
            self.frames_in.load(Ordering::Relaxed),
            self.commands_ok.load(Ordering::Relaxed),
            self.commands_failed.load(Ordering::Relaxed),
            self.events_broadcast.load(Ordering::Relaxed),
            self.webhooks_received.load(Ordering::Relaxed),
        )
    }
}
