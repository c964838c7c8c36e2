//! Playback speed over mpv's JSON IPC socket.

#[cfg(windows)]
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{AutopaceError, Result};
use crate::host::PlayerBackend;

pub const MPV_SOCKET_TIMEOUT_MS: u64 = 800;

/// Upper bound on response lines read while waiting for our reply; mpv
/// interleaves event lines with command replies.
const MAX_RESPONSE_LINES: usize = 64;

#[derive(Debug, Serialize)]
pub struct MpvCommand {
    pub command: Vec<Value>,
    pub request_id: u32,
}

#[derive(Debug, Deserialize)]
pub struct MpvResponse {
    pub error: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub request_id: Option<u32>,
}

trait ReadWrite: Read + Write {}

#[cfg(unix)]
impl ReadWrite for UnixStream {}

#[cfg(windows)]
impl ReadWrite for File {}

/// [`PlayerBackend`] talking to a running mpv started with
/// `--input-ipc-server=<socket>`.
pub struct MpvIpcPlayer {
    endpoint: PathBuf,
    request_counter: AtomicU32,
}

impl MpvIpcPlayer {
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_counter: AtomicU32::new(1),
        }
    }

    /// Player on the socket named by `mpv_socket`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.mpv_socket.clone())
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    fn connect(&self) -> Result<Box<dyn ReadWrite>> {
        #[cfg(unix)]
        {
            let stream = UnixStream::connect(&self.endpoint).map_err(|e| {
                AutopaceError::SpeedUnavailable(format!(
                    "Failed to connect to mpv IPC {}: {e}",
                    self.endpoint.display()
                ))
            })?;

            let timeout = Duration::from_millis(MPV_SOCKET_TIMEOUT_MS);
            let _ = stream.set_read_timeout(Some(timeout));
            let _ = stream.set_write_timeout(Some(timeout));
            Ok(Box::new(stream))
        }

        #[cfg(windows)]
        {
            let pipe = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.endpoint)
                .map_err(|e| {
                    AutopaceError::SpeedUnavailable(format!(
                        "Failed to connect to mpv pipe {}: {e}",
                        self.endpoint.display()
                    ))
                })?;
            Ok(Box::new(pipe))
        }
    }

    fn command(&self, args: Vec<Value>) -> Result<Option<Value>> {
        let request_id = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let command = MpvCommand {
            command: args,
            request_id,
        };
        let payload = format!("{}\n", serde_json::to_string(&command)?);

        let mut connection = self.connect()?;
        connection
            .write_all(payload.as_bytes())
            .map_err(|e| AutopaceError::Player(format!("Failed to write to mpv IPC: {e}")))?;

        let mut reader = BufReader::new(connection);
        let mut line = String::new();
        for _ in 0..MAX_RESPONSE_LINES {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| AutopaceError::Player(format!("Failed to read mpv reply: {e}")))?;
            if n == 0 {
                break;
            }

            let Ok(response) = serde_json::from_str::<MpvResponse>(line.trim()) else {
                continue;
            };
            if response.request_id != Some(request_id) {
                continue;
            }

            debug!("mpv request {} -> {}", request_id, response.error);
            if response.error != "success" {
                return Err(AutopaceError::Player(format!(
                    "mpv rejected {:?}: {}",
                    command.command, response.error
                )));
            }
            return Ok(response.data);
        }

        Err(AutopaceError::Player(format!(
            "No reply from mpv for request {request_id}"
        )))
    }
}

fn speed_value(speed: f64) -> Result<Value> {
    serde_json::Number::from_f64(speed)
        .map(Value::Number)
        .ok_or_else(|| AutopaceError::Player(format!("Invalid speed value {speed}")))
}

impl PlayerBackend for MpvIpcPlayer {
    fn speed(&self) -> Result<f64> {
        let data = self.command(vec![
            Value::String("get_property".to_string()),
            Value::String("speed".to_string()),
        ])?;

        data.as_ref()
            .and_then(Value::as_f64)
            .ok_or_else(|| AutopaceError::Player(format!("Unexpected speed reply: {data:?}")))
    }

    fn set_speed(&self, speed: f64) -> Result<()> {
        self.command(vec![
            Value::String("set_property".to_string()),
            Value::String("speed".to_string()),
            speed_value(speed)?,
        ])?;
        Ok(())
    }

    fn add_speed(&self, delta: f64) -> Result<()> {
        self.command(vec![
            Value::String("add".to_string()),
            Value::String("speed".to_string()),
            speed_value(delta)?,
        ])?;
        Ok(())
    }
}
