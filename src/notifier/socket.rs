use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ChangeBus, ChangeSubscription, auth_message, parse_message};

#[derive(Clone, Debug)]
pub struct NotifierConfig {
    pub url: String,
    pub user_id: i64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl NotifierConfig {
    pub fn new(url: impl Into<String>, user_id: i64) -> Self {
        Self {
            url: url.into(),
            user_id,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Exponential reconnect delay, doubled per failure and capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// WebSocket client for the server's push channel.
///
/// Between `open` and `close` it keeps a connection alive, authenticates on
/// every (re)connect and republishes decoded events on its [`ChangeBus`].
pub struct ChangeNotifier {
    config: NotifierConfig,
    bus: ChangeBus,
    connected: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
}

impl ChangeNotifier {
    pub fn new(config: NotifierConfig, bus: ChangeBus) -> Self {
        Self {
            config,
            bus,
            connected: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        self.bus.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Start the connection loop. Calling it while already open does nothing.
    pub async fn open(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(
            self.config.clone(),
            self.bus.clone(),
            self.connected.clone(),
            shutdown_rx,
        ));

        *running = Some(Running { shutdown, handle });
    }

    /// Stop reconnecting and drop the current connection.
    pub async fn close(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            warn!("notifier task ended abnormally: {}", e);
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("change notifier closed");
    }
}

async fn run(
    config: NotifierConfig,
    bus: ChangeBus,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);

    loop {
        if *shutdown.borrow() {
            return;
        }

        let attempt = tokio::select! {
            result = tokio_tungstenite::connect_async(config.url.as_str()) => result,
            _ = shutdown.changed() => return,
        };

        match attempt {
            Ok((ws, _)) => {
                backoff.reset();
                let (mut sink, mut stream) = ws.split();

                if let Err(e) = sink.send(Message::Text(auth_message(config.user_id).into())).await {
                    warn!("notifier auth send failed: {}", e);
                } else {
                    connected.store(true, Ordering::SeqCst);
                    info!("change notifier connected to {}", config.url);

                    loop {
                        let frame = tokio::select! {
                            frame = stream.next() => frame,
                            _ = shutdown.changed() => {
                                let _ = sink.close().await;
                                connected.store(false, Ordering::SeqCst);
                                return;
                            }
                        };

                        match frame {
                            Some(Ok(Message::Text(text))) => match parse_message(&text) {
                                Ok(Some(event)) => {
                                    debug!("push event for task {}", event.task_id());
                                    bus.publish(event);
                                }
                                Ok(None) => {}
                                Err(e) => warn!("skipping malformed push message: {}", e),
                            },
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("notifier connection error: {}", e);
                                break;
                            }
                        }
                    }

                    connected.store(false, Ordering::SeqCst);
                    info!("change notifier disconnected");
                }
            }
            Err(e) => {
                debug!("notifier connect to {} failed: {}", config.url, e);
            }
        }

        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}
