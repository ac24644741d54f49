//! Output sinks for received video
//!
//! The receiver writes ordered payload bytes into a [`PlayerSink`]. The
//! default sink pipes them into a media player process; stdout and plain
//! files are supported for recording and for piping into other tools.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};

/// A byte sink that can be shut down explicitly
pub trait PlayerSink: Write {
    /// Stop consuming and release the underlying resource
    fn terminate(&mut self) -> io::Result<()>;
}

/// Player process fed through its stdin
pub struct ProcessPlayer {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ProcessPlayer {
    /// Spawn `command` (program followed by arguments) with stdin piped
    pub fn spawn(command: &[String]) -> io::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty player command"))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let stdin = child.stdin.take();
        tracing::info!("Started player {} (pid {})", program, child.id());

        Ok(ProcessPlayer { child, stdin })
    }

    fn stdin(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "player stopped"))
    }
}

impl Write for ProcessPlayer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdin()?.flush()
    }
}

impl PlayerSink for ProcessPlayer {
    fn terminate(&mut self) -> io::Result<()> {
        // Closing stdin first lets a player that already reached the end exit
        self.stdin.take();
        if self.child.try_wait()?.is_none() {
            self.child.kill()?;
        }
        let status = self.child.wait()?;
        tracing::debug!("Player exited with {}", status);
        Ok(())
    }
}

impl Drop for ProcessPlayer {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.terminate();
        }
    }
}

/// Any writer as a sink
pub struct WriterSink<W: Write> {
    inner: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        WriterSink { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for WriterSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> PlayerSink for WriterSink<W> {
    fn terminate(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Open the sink named by `output`: `"player"`, `"-"` for stdout, or a path
pub fn open_output(output: &str, player_command: &[String]) -> io::Result<Box<dyn PlayerSink + Send>> {
    match output {
        "player" => Ok(Box::new(ProcessPlayer::spawn(player_command)?)),
        "-" => {
            tracing::info!("Writing to stdout");
            Ok(Box::new(WriterSink::new(io::stdout())))
        }
        path => {
            tracing::info!("Writing to file: {}", path);
            Ok(Box::new(WriterSink::new(BufWriter::new(File::create(path)?))))
        }
    }
}
