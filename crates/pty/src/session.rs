//! A single interactive PTY-backed session (component C9), grounded on
//! `create_exec_command_session` (`session_manager.rs`): `portable-pty`
//! spawns the child, a blocking reader task forwards raw bytes onto a
//! broadcast channel, and a writer task applies stdin writes off an mpsc
//! channel. Unlike `exec_command`'s session, this one tracks an idle
//! timeout and exposes a `send_signal` a chat-proposed command can use to
//! interrupt a runaway foreground process.

use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, PtySize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::PtyError;

const ROWS: u16 = 24;
const COLS: u16 = 80;

/// `Ctrl-C`'s control byte. Writing it to the master side of a pty in
/// canonical mode is what a real terminal does on a keypress, and the
/// line discipline turns it into a `SIGINT` for the foreground process
/// group — no direct signal-delivery syscall required.
const SIGINT_CONTROL_BYTE: u8 = 0x03;

pub struct PtySession {
    pub session_id: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
    last_activity: StdMutex<Instant>,
    timeout: Duration,
    writer_tx: mpsc::Sender<Vec<u8>>,
    output_tx: broadcast::Sender<Vec<u8>>,
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
    exit_rx: StdMutex<Option<oneshot::Receiver<i32>>>,
    exit_code: StdMutex<Option<i32>>,
    _reader_handle: JoinHandle<()>,
    _writer_handle: JoinHandle<()>,
    _wait_handle: JoinHandle<()>,
}

impl PtySession {
    pub fn start(session_id: String, command: String, timeout: Duration) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize { rows: ROWS, cols: COLS, pixel_width: 0, pixel_height: 0 })
            .map_err(PtyError::OpenPty)?;

        let mut builder = CommandBuilder::new("/bin/bash");
        builder.arg("-c");
        builder.arg(&command);
        builder.env("TERM", "xterm-256color");
        builder.env("COLUMNS", COLS.to_string());
        builder.env("LINES", ROWS.to_string());

        let mut child = pair.slave.spawn_command(builder).map_err(PtyError::Spawn)?;
        let killer = child.clone_killer();
        // Mirrors the parent branch's `os.close(slave_fd)`: only the child
        // needs the slave side open.
        drop(pair.slave);

        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
        let (output_tx, _) = broadcast::channel::<Vec<u8>>(256);

        let mut reader = pair.master.try_clone_reader().map_err(PtyError::OpenPty)?;
        let output_tx_clone = output_tx.clone();
        let reader_handle = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = output_tx_clone.send(buf[..n].to_vec());
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    Err(_) => break,
                }
            }
        });

        let writer = pair.master.take_writer().map_err(PtyError::OpenPty)?;
        let writer = std::sync::Arc::new(StdMutex::new(writer));
        let writer_handle = tokio::spawn({
            let writer = writer.clone();
            async move {
                while let Some(bytes) = writer_rx.recv().await {
                    let writer = writer.clone();
                    let _ = tokio::task::spawn_blocking(move || {
                        if let Ok(mut guard) = writer.lock() {
                            let _ = guard.write_all(&bytes);
                            let _ = guard.flush();
                        }
                    })
                    .await;
                }
            }
        });

        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let wait_handle = tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(_) => -1,
            };
            let _ = exit_tx.send(code);
        });

        Ok(Self {
            session_id,
            command,
            created_at: Utc::now(),
            last_activity: StdMutex::new(Instant::now()),
            timeout,
            writer_tx,
            output_tx,
            killer: StdMutex::new(killer),
            exit_rx: StdMutex::new(Some(exit_rx)),
            exit_code: StdMutex::new(None),
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
            _wait_handle: wait_handle,
        })
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<Vec<u8>> {
        self.output_tx.subscribe()
    }

    pub fn write_input(&self, data: &str) -> bool {
        if self.writer_tx.try_send(data.as_bytes().to_vec()).is_ok() {
            self.touch();
            true
        } else {
            false
        }
    }

    /// Supports `SIGINT` via the pty's control-byte convention and
    /// `SIGTERM` by falling back to `portable-pty`'s own termination API,
    /// which doesn't expose arbitrary signal numbers cross-platform.
    pub fn send_signal(&self, signal: &str) -> bool {
        match signal {
            "SIGINT" => self.writer_tx.try_send(vec![SIGINT_CONTROL_BYTE]).is_ok(),
            "SIGTERM" => self.killer.lock().map(|mut k| k.kill().is_ok()).unwrap_or(false),
            _ => false,
        }
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = Instant::now();
        }
    }

    pub fn is_running(&self) -> bool {
        if self.exit_code.lock().map(|g| g.is_some()).unwrap_or(false) {
            return false;
        }
        let Ok(mut rx_guard) = self.exit_rx.lock() else { return false };
        let Some(rx) = rx_guard.as_mut() else { return false };
        match rx.try_recv() {
            Ok(code) => {
                self.set_exit_code(code);
                *rx_guard = None;
                false
            }
            Err(oneshot::error::TryRecvError::Empty) => true,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.set_exit_code(-1);
                *rx_guard = None;
                false
            }
        }
    }

    fn set_exit_code(&self, code: i32) {
        if let Ok(mut guard) = self.exit_code.lock() {
            *guard = Some(code);
        }
    }

    pub fn get_exit_code(&self) -> Option<i32> {
        self.is_running();
        self.exit_code.lock().ok().and_then(|g| *g)
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_activity.lock().map(|g| g.elapsed() > self.timeout).unwrap_or(false)
    }

    pub fn close(&self) {
        if let Ok(mut guard) = self.killer.lock() {
            let _ = guard.kill();
        }
    }
}
