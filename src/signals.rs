use std::io::{BufRead, BufReader};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Shutdown signal types
#[derive(Debug, Clone, Copy)]
pub enum ShutdownSignal {
    /// Graceful shutdown (destroy scheduled tasks, drain connections)
    Graceful,
}

/// Line-oriented message from a supervising parent process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
    Other(String),
}

impl ControlMessage {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "shutdown" => ControlMessage::Shutdown,
            other => ControlMessage::Other(other.to_string()),
        }
    }
}

/// Read control messages until `shutdown` arrives (true) or the stream
/// ends (false). Anything else is logged and ignored.
pub fn read_control_messages<R: BufRead>(reader: R) -> bool {
    for line in reader.lines() {
        match line {
            Ok(line) => match ControlMessage::parse(&line) {
                ControlMessage::Shutdown => {
                    debug!("Received 'shutdown' message");
                    return true;
                }
                ControlMessage::Other(msg) => {
                    if !msg.is_empty() {
                        debug!(message = %msg, "Ignoring control message");
                    }
                }
            },
            Err(e) => {
                error!("Failed to read control channel: {}", e);
                return false;
            }
        }
    }
    false
}

/// Read control messages on a detached OS thread. A read blocked on an open
/// pipe can't be cancelled, so it must never hold up runtime shutdown.
/// The receiver resolves once `shutdown` arrives and fails when the
/// channel closes first.
pub fn spawn_control_reader<R>(reader: R) -> oneshot::Receiver<()>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("logkeeper-control".to_string())
        .spawn(move || {
            if read_control_messages(reader) {
                let _ = tx.send(());
            }
        });
    if let Err(e) = spawned {
        error!("Failed to start control channel reader: {}", e);
    }
    rx
}

async fn control_channel(listen_stdin: bool) {
    if listen_stdin
        && spawn_control_reader(BufReader::new(std::io::stdin()))
            .await
            .is_ok()
    {
        return;
    }
    // Closed or disabled channel never triggers shutdown.
    std::future::pending::<()>().await
}

#[cfg(unix)]
async fn recv_signal(kind: SignalKind, name: &str) {
    match signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to setup {} handler: {}", name, e);
            std::future::pending::<()>().await
        }
    }
}

/// Setup shutdown triggers
///
/// Returns a broadcast sender for shutdown signals and a join handle for the signal task
///
/// Handles:
/// - SIGTERM/SIGINT: Graceful shutdown
/// - `shutdown` on stdin (when `listen_stdin`): Graceful shutdown
#[cfg(unix)]
pub fn setup_signal_handlers(
    listen_stdin: bool,
) -> (broadcast::Sender<ShutdownSignal>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = recv_signal(SignalKind::terminate(), "SIGTERM") => {
                info!("SIGTERM received, initiating graceful shutdown");
            }
            _ = recv_signal(SignalKind::interrupt(), "SIGINT") => {
                info!("SIGINT received, initiating graceful shutdown");
            }
            _ = control_channel(listen_stdin) => {
                info!("Shutdown message received, initiating graceful shutdown");
            }
        }
        let _ = tx_clone.send(ShutdownSignal::Graceful);
    });

    (shutdown_tx, handle)
}

/// Non-unix: Ctrl+C and the control channel only
#[cfg(not(unix))]
pub fn setup_signal_handlers(
    listen_stdin: bool,
) -> (broadcast::Sender<ShutdownSignal>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, _) = broadcast::channel(16);
    let tx_clone = shutdown_tx.clone();

    let handle = tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Ctrl+C received, initiating shutdown"),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
            },
            _ = control_channel(listen_stdin) => {
                info!("Shutdown message received, initiating graceful shutdown");
            }
        }
        let _ = tx_clone.send(ShutdownSignal::Graceful);
    });

    (shutdown_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_parse_control_message() {
        assert_eq!(ControlMessage::parse("shutdown\n"), ControlMessage::Shutdown);
        assert_eq!(
            ControlMessage::parse("reload"),
            ControlMessage::Other("reload".to_string())
        );
    }

    #[test]
    fn test_shutdown_message_stops_reader() {
        let input: &[u8] = b"ping\n\nstatus\nshutdown\nnever read\n";
        assert!(read_control_messages(input));
    }

    #[test]
    fn test_closed_channel_is_not_shutdown() {
        let input: &[u8] = b"ping\n";
        assert!(!read_control_messages(input));
    }

    #[tokio::test]
    async fn test_control_reader_resolves_on_shutdown() {
        let input: &[u8] = b"status\nshutdown\n";
        assert!(spawn_control_reader(input).await.is_ok());

        let input: &[u8] = b"status\n";
        assert!(spawn_control_reader(input).await.is_err());
    }

    /// Reader that never returns, like stdin on a pipe the parent keeps open
    struct Blocked;

    impl std::io::Read for Blocked {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            loop {
                std::thread::park();
            }
        }
    }

    #[test]
    fn test_blocked_control_reader_does_not_delay_runtime_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let rx = spawn_control_reader(BufReader::new(Blocked));
            let waited = tokio::time::timeout(Duration::from_millis(50), rx).await;
            assert!(waited.is_err());
        });

        let started = Instant::now();
        drop(runtime);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_setup_signal_handlers() {
        let (shutdown_tx, _handle) = setup_signal_handlers(false);

        // Should be able to subscribe to shutdown signals
        let mut rx = shutdown_tx.subscribe();

        shutdown_tx.send(ShutdownSignal::Graceful).unwrap();

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ShutdownSignal::Graceful));
    }
}
