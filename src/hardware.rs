//! Real-robot command sinks.
//!
//! A session is bound to exactly one [`HardwareSink`] at construction. Simulation stays the
//! source of truth; the sink only mirrors state changes the session has already applied.
//!
//! [`SocketSink`] forwards newline-delimited JSON over a local socket to an external driver
//! process (one message per line, tagged by `"op"`).

use std::collections::BTreeMap;
use std::io::Write;

use interprocess::local_socket::LocalSocketStream;
use serde::Serialize;

use crate::error::{Result, TampError};

/// Joint name to position.
pub type NamedPositions = BTreeMap<String, f64>;

/// Where a session mirrors its gripper and arm commands.
pub trait HardwareSink: Send {
    fn open_gripper(&mut self) -> Result<()>;

    fn close_gripper(&mut self) -> Result<()>;

    /// Moves the arm straight to a configuration.
    fn command_arm(&mut self, positions: &NamedPositions) -> Result<()>;

    /// Streams a waypoint path, `dt` seconds apart.
    fn execute_position_path(&mut self, path: &[NamedPositions], dt: f64) -> Result<()>;

    /// `false` for sinks that do not drive anything.
    fn is_real(&self) -> bool {
        true
    }
}

/// Simulation-only sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl HardwareSink for NoopSink {
    fn open_gripper(&mut self) -> Result<()> {
        Ok(())
    }

    fn close_gripper(&mut self) -> Result<()> {
        Ok(())
    }

    fn command_arm(&mut self, _positions: &NamedPositions) -> Result<()> {
        Ok(())
    }

    fn execute_position_path(&mut self, _path: &[NamedPositions], _dt: f64) -> Result<()> {
        Ok(())
    }

    fn is_real(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SinkMessage<'a> {
    OpenGripper,
    CloseGripper,
    CommandArm {
        positions: &'a NamedPositions,
    },
    ExecutePositionPath {
        path: &'a [NamedPositions],
        dt: f64,
    },
}

/// Sends commands to a robot driver listening on a local socket.
pub struct SocketSink {
    stream: LocalSocketStream,
    name: String,
}

impl std::fmt::Debug for SocketSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSink").field("name", &self.name).finish()
    }
}

impl SocketSink {
    pub fn connect(name: &str) -> Result<Self> {
        let stream = LocalSocketStream::connect(name)
            .map_err(|e| TampError::Hardware(format!("failed to connect to {name}: {e}")))?;
        tracing::info!(socket = name, "connected to robot driver");
        Ok(Self {
            stream,
            name: name.to_string(),
        })
    }

    fn send(&mut self, message: &SinkMessage<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.stream
            .write_all(&line)
            .and_then(|_| self.stream.flush())
            .map_err(|e| TampError::Hardware(format!("{}: {e}", self.name)))
    }
}

impl HardwareSink for SocketSink {
    fn open_gripper(&mut self) -> Result<()> {
        self.send(&SinkMessage::OpenGripper)
    }

    fn close_gripper(&mut self) -> Result<()> {
        self.send(&SinkMessage::CloseGripper)
    }

    fn command_arm(&mut self, positions: &NamedPositions) -> Result<()> {
        self.send(&SinkMessage::CommandArm { positions })
    }

    fn execute_position_path(&mut self, path: &[NamedPositions], dt: f64) -> Result<()> {
        self.send(&SinkMessage::ExecutePositionPath { path, dt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_tagged_by_op() {
        let positions: NamedPositions = [("gantry_x".to_string(), 0.5)].into_iter().collect();
        let json = serde_json::to_value(SinkMessage::CommandArm {
            positions: &positions,
        })
        .unwrap();
        assert_eq!(json["op"], "command_arm");
        assert_eq!(json["positions"]["gantry_x"], 0.5);

        let json = serde_json::to_value(SinkMessage::OpenGripper).unwrap();
        assert_eq!(json, serde_json::json!({ "op": "open_gripper" }));
    }

    #[cfg(unix)]
    #[test]
    fn socket_sink_writes_one_line_per_command() {
        use interprocess::local_socket::LocalSocketListener;
        use std::io::{BufRead, BufReader};

        let name = format!("/tmp/tiny_tamp_sink_{}.sock", std::process::id());
        let _ = std::fs::remove_file(&name);
        let listener = LocalSocketListener::bind(name.as_str()).unwrap();

        let reader = std::thread::spawn(move || {
            let stream = listener.accept().unwrap();
            BufReader::new(stream)
                .lines()
                .take(2)
                .map(|l| l.unwrap())
                .collect::<Vec<_>>()
        });

        let mut sink = SocketSink::connect(&name).unwrap();
        sink.close_gripper().unwrap();
        sink.execute_position_path(&[NamedPositions::new()], 0.01)
            .unwrap();

        let lines = reader.join().unwrap();
        let _ = std::fs::remove_file(&name);
        assert_eq!(lines[0], r#"{"op":"close_gripper"}"#);
        assert!(lines[1].starts_with(r#"{"op":"execute_position_path""#));
    }
}
