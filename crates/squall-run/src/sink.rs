//! Destinations for generated query text.
//!
//! The file format is one SQL statement per line, UTF-8, trailing newline;
//! no escaping beyond SQL's own quoting.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use squall_config::{OutputConfig, SinkMode};

/// Where generated statements go.
pub trait QuerySink: Send {
    /// Writes one statement.
    fn write_query(&mut self, text: &str) -> io::Result<()>;

    /// Flushes buffered output.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Line-per-statement to stdout.
pub struct StdoutSink;

impl QuerySink for StdoutSink {
    fn write_query(&mut self, text: &str) -> io::Result<()> {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        lock.write_all(text.as_bytes())?;
        lock.write_all(b"\n")
    }
}

/// Buffered line-per-statement file writer.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }
}

impl QuerySink for FileSink {
    fn write_query(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Discards everything.
pub struct NullSink;

impl QuerySink for NullSink {
    fn write_query(&mut self, _text: &str) -> io::Result<()> {
        Ok(())
    }
}

/// A callback sink, mostly for tests and embedding hosts.
pub struct CallbackSink<F: FnMut(&str) + Send> {
    callback: F,
}

impl<F: FnMut(&str) + Send> CallbackSink<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: FnMut(&str) + Send> QuerySink for CallbackSink<F> {
    fn write_query(&mut self, text: &str) -> io::Result<()> {
        (self.callback)(text);
        Ok(())
    }
}

/// Builds the sink the configuration asks for.
pub fn sink_from_config(output: &OutputConfig) -> io::Result<Box<dyn QuerySink>> {
    match output.sink {
        SinkMode::Stdout => Ok(Box::new(StdoutSink)),
        SinkMode::File => {
            let path = output.path.as_ref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "file sink requires a path")
            })?;
            Ok(Box::new(FileSink::create(path)?))
        }
        SinkMode::None => Ok(Box::new(NullSink)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_sink_writes_one_statement_per_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.sql");
        {
            let mut sink = FileSink::create(&path).expect("create");
            sink.write_query("SELECT 1;").expect("write");
            sink.write_query("SELECT 2;").expect("write");
            sink.flush().expect("flush");
        }
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "SELECT 1;\nSELECT 2;\n");
    }

    #[test]
    fn callback_sink_delivers_text() {
        let mut seen = Vec::new();
        {
            let mut sink = CallbackSink::new(|text: &str| seen.push(text.to_owned()));
            sink.write_query("SELECT 1;").expect("write");
        }
        assert_eq!(seen, vec!["SELECT 1;"]);
    }
}
