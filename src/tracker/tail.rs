//! Reading the end of append-only logs without loading them whole.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_SIZE: u64 = 8192;

/// Last `count` lines of the file at `path`, oldest first.
///
/// Reads backwards in fixed chunks until enough line breaks are seen, so
/// the cost is bounded by the window and not by the log size.
pub fn read_tail(path: &Path, count: usize) -> io::Result<Vec<String>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut file = File::open(path)?;
    let mut pos = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();

    while pos > 0 && newline_count(&buf) <= count {
        let step = CHUNK_SIZE.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }

    let text = String::from_utf8_lossy(&buf);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

/// Final line of the file, or `None` when it is empty.
pub fn read_last_line(path: &Path) -> io::Result<Option<String>> {
    Ok(read_tail(path, 1)?.pop())
}

/// Every line at index `cursor` or later.
pub fn read_lines_from(path: &Path, cursor: usize) -> io::Result<Vec<String>> {
    let mut content = Vec::new();
    File::open(path)?.read_to_end(&mut content)?;
    Ok(String::from_utf8_lossy(&content)
        .lines()
        .skip(cursor)
        .map(|l| l.to_string())
        .collect())
}

/// The text an operator would see for a line rewritten with `\r`.
pub fn visible_text(line: &str) -> &str {
    match line.rfind('\r') {
        Some(idx) => &line[idx + 1..],
        None => line,
    }
}

fn newline_count(buf: &[u8]) -> usize {
    buf.iter().filter(|&&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn tail_returns_last_lines_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.out");
        std::fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();
        assert_eq!(read_tail(&path, 2).unwrap(), vec!["three", "four"]);
        assert_eq!(read_tail(&path, 10).unwrap().len(), 4);
        assert!(read_tail(&path, 0).unwrap().is_empty());
    }

    #[test]
    fn tail_without_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.out");
        std::fs::write(&path, "a\nb\nc").unwrap();
        assert_eq!(read_tail(&path, 2).unwrap(), vec!["b", "c"]);
        assert_eq!(read_last_line(&path).unwrap().as_deref(), Some("c"));
    }

    #[test]
    fn tail_spans_multiple_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.out");
        let mut file = File::create(&path).unwrap();
        for i in 0..5000 {
            writeln!(file, "progress line number {}", i).unwrap();
        }
        drop(file);

        let tail = read_tail(&path, 15).unwrap();
        assert_eq!(tail.len(), 15);
        assert_eq!(tail[0], "progress line number 4985");
        assert_eq!(tail[14], "progress line number 4999");
    }

    #[test]
    fn empty_file_has_no_last_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.out");
        std::fs::write(&path, "").unwrap();
        assert_eq!(read_last_line(&path).unwrap(), None);
    }

    #[test]
    fn lines_from_cursor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.out");
        std::fs::write(&path, "a\nb\nc\n").unwrap();
        assert_eq!(read_lines_from(&path, 1).unwrap(), vec!["b", "c"]);
        assert!(read_lines_from(&path, 7).unwrap().is_empty());
    }

    #[test]
    fn carriage_return_keeps_final_rewrite() {
        assert_eq!(visible_text("10%\r20%\r30%"), "30%");
        assert_eq!(visible_text("plain"), "plain");
    }
}
