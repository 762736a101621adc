//! CSV sample log: snapshot overwrite, monitoring append, read-back

use crate::error::SinkError;
use crate::logging::LogContext;
use crate::ranking::SampleBatch;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Span};

pub const HEADER_MEMORY: &str = "Timestamp,PID,Name,Memory (MB)";
pub const HEADER_MEMORY_CPU: &str = "Timestamp,PID,Name,Memory (MB),CPU (%)";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local wall-clock time in the log's timestamp format.
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Where sampling passes end up.
pub trait SampleRecordSink {
    /// Replaces the log with one header and the rows of `batch`.
    fn write_snapshot(&self, timestamp: &str, batch: &SampleBatch) -> Result<(), SinkError>;

    /// Appends the rows of `batch`, writing the header only for a new log.
    fn append_sample(&self, timestamp: &str, batch: &SampleBatch) -> Result<(), SinkError>;
}

/// One parsed row of a sample log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub timestamp: String,
    pub pid: u32,
    pub name: String,
    pub memory_mb: f64,
    pub cpu_percent: Option<f64>,
}

pub struct CsvSink {
    path: PathBuf,
    span: Span,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, log: &LogContext) -> Self {
        Self {
            path: path.into(),
            span: log.component("csv_sink"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| SinkError::io(parent, e))?;
                info!(dir = %parent.display(), "created data directory");
            }
        }
        Ok(())
    }

    /// Header of the existing log, or None when the file is absent or empty.
    fn existing_header(&self) -> Result<Option<String>, SinkError> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::io(&self.path, e)),
        };
        let mut head = [0u8; 256];
        let n = file.read(&mut head).map_err(|e| SinkError::io(&self.path, e))?;
        if n == 0 {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&head[..n]);
        Ok(text.lines().next().map(|line| line.trim_end().to_string()))
    }
}

impl SampleRecordSink for CsvSink {
    fn write_snapshot(&self, timestamp: &str, batch: &SampleBatch) -> Result<(), SinkError> {
        let _enter = self.span.clone().entered();
        self.ensure_parent()?;

        let mut content = String::new();
        content.push_str(header_for(batch));
        content.push('\n');
        render_rows(&mut content, timestamp, batch);

        // Readers only ever see the old file or the complete new one.
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, content.as_bytes()).map_err(|e| SinkError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| SinkError::io(&self.path, e))?;

        info!(path = %self.path.display(), rows = batch.len(), "snapshot written");
        Ok(())
    }

    fn append_sample(&self, timestamp: &str, batch: &SampleBatch) -> Result<(), SinkError> {
        let _enter = self.span.clone().entered();
        self.ensure_parent()?;

        let header = header_for(batch);
        let mut content = String::new();
        match self.existing_header()? {
            None => {
                content.push_str(header);
                content.push('\n');
            }
            Some(found) if found == header => {}
            Some(found) => {
                return Err(SinkError::SchemaMismatch {
                    path: self.path.clone(),
                    expected: header.to_string(),
                    found,
                })
            }
        }
        render_rows(&mut content, timestamp, batch);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SinkError::io(&self.path, e))?;
        // One write per batch keeps rows whole for concurrent readers.
        file.write_all(content.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| SinkError::io(&self.path, e))?;

        debug!(path = %self.path.display(), rows = batch.len(), "rows appended");
        Ok(())
    }
}

fn header_for(batch: &SampleBatch) -> &'static str {
    if batch.has_cpu() {
        HEADER_MEMORY_CPU
    } else {
        HEADER_MEMORY
    }
}

fn render_rows(out: &mut String, timestamp: &str, batch: &SampleBatch) {
    let with_cpu = batch.has_cpu();
    for sample in batch {
        let name = sample.name.replace(['\r', '\n'], " ");
        out.push_str(&csv_escape(timestamp));
        out.push(',');
        out.push_str(&sample.pid.to_string());
        out.push(',');
        out.push_str(&csv_escape(&name));
        out.push(',');
        out.push_str(&format!("{:.2}", sample.memory_mb));
        if with_cpu {
            out.push(',');
            out.push_str(&format!("{:.2}", sample.cpu_percent.unwrap_or(0.0)));
        }
        out.push('\n');
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        let escaped = value.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    } else {
        value.to_string()
    }
}

/// Splits one CSV line, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            (true, '"') => quoted = false,
            (true, c) => field.push(c),
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => fields.push(std::mem::take(&mut field)),
            (false, c) => field.push(c),
        }
    }
    if quoted {
        return None;
    }
    fields.push(field);
    Some(fields)
}

fn parse_row(line: &str, with_cpu: bool) -> Option<LogRow> {
    let fields = split_csv_line(line)?;
    let expected = if with_cpu { 5 } else { 4 };
    if fields.len() != expected {
        return None;
    }
    let memory_mb: f64 = fields[3].trim().parse().ok()?;
    let cpu_percent = if with_cpu {
        Some(fields[4].trim().parse::<f64>().ok()?)
    } else {
        None
    };
    Some(LogRow {
        timestamp: fields[0].clone(),
        pid: fields[1].trim().parse().ok()?,
        name: fields[2].clone(),
        memory_mb,
        cpu_percent,
    })
}

/// Reads every complete row of a sample log.
///
/// A trailing line without a newline is an append still in flight and is
/// ignored. Malformed rows are skipped.
pub fn read_log(path: &Path) -> Result<Vec<LogRow>, SinkError> {
    let content = fs::read_to_string(path).map_err(|e| SinkError::io(path, e))?;
    let complete = match content.rfind('\n') {
        Some(end) => &content[..=end],
        None => "",
    };

    let mut lines = complete.lines();
    let header = lines.next().unwrap_or_default().trim_end();
    let with_cpu = match header {
        HEADER_MEMORY => false,
        HEADER_MEMORY_CPU => true,
        other => {
            return Err(SinkError::BadHeader {
                path: path.to_path_buf(),
                found: other.to_string(),
            })
        }
    };

    let mut rows = Vec::new();
    let mut malformed = 0usize;
    for line in lines.filter(|l| !l.trim().is_empty()) {
        match parse_row(line.trim_end_matches('\r'), with_cpu) {
            Some(row) => rows.push(row),
            None => malformed += 1,
        }
    }
    if malformed > 0 {
        debug!(path = %path.display(), malformed, "skipped malformed rows");
    }
    Ok(rows)
}
