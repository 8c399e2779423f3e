use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::Path,
    sync::Arc,
};

use parking_lot::Mutex;

/// Appends to a log file and trims it back to the newest `max_lines` lines
/// every time roughly a tenth of that many lines has been written.
#[derive(Clone)]
pub struct LineCappedWriter {
    path: String,
    max_lines: u32,
    written_since_trim: Arc<Mutex<u32>>,
}

impl LineCappedWriter {
    pub fn new(path: String, max_lines: u32) -> Self {
        Self {
            path,
            max_lines: max_lines.max(1),
            written_since_trim: Arc::new(Mutex::new(0)),
        }
    }

    fn trim(&self) -> io::Result<()> {
        if !Path::new(&self.path).exists() {
            return Ok(());
        }

        let cap = self.max_lines as usize;
        let mut tail = VecDeque::with_capacity(cap + 1);
        for line in BufReader::new(File::open(&self.path)?).lines() {
            tail.push_back(line?);
            if tail.len() > cap {
                tail.pop_front();
            }
        }

        let mut file = File::create(&self.path)?;
        for line in tail {
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}

impl io::Write for LineCappedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(buf)?;

        let mut written = self.written_since_trim.lock();
        *written += buf.iter().filter(|&&b| b == b'\n').count() as u32;
        if *written >= (self.max_lines / 10).max(50) {
            if let Err(e) = self.trim() {
                eprintln!("Failed to trim log file {}: {}", self.path, e);
            }
            *written = 0;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LineCappedWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_to_newest_lines() {
        let path =
            std::env::temp_dir().join(format!("volustream-log-{}.log", uuid::Uuid::new_v4()));
        let path_str = path.to_string_lossy().to_string();
        let mut writer = LineCappedWriter::new(path_str.clone(), 60);

        for i in 0..120 {
            writer.write_all(format!("line {}\n", i).as_bytes()).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert!(lines.len() <= 60 + 50);
        assert_eq!(lines.last(), Some(&"line 119"));
        let _ = std::fs::remove_file(path);
    }
}
