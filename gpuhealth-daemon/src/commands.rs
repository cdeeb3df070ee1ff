//! One-shot subcommands: `dump` and `inject`.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use gpuhealth_kmsg::{
    KernelMessage, KernelMessagePriority, KmsgWriter, Message, ProcStatBootTime, open_writer,
    read_all,
};

/// Read every record currently in the ring buffer and print it to stdout
/// as one JSON object per line, with the record's age relative to now.
pub async fn dump(device_path: &str) -> Result<usize> {
    let path = device_path.to_owned();
    let messages = tokio::task::spawn_blocking(move || read_all(&path, &ProcStatBootTime::new()))
        .await
        .context("kmsg drain task failed")?
        .with_context(|| format!("failed to read {}", device_path))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_json_lines(&messages, Utc::now(), &mut out)?;
    out.flush()?;
    Ok(messages.len())
}

/// Serialize messages as JSON lines.
///
/// Each object carries an extra `age` field ("5 minutes ago") measured from `now`.
pub fn write_json_lines<W: Write>(
    messages: &[Message],
    now: DateTime<Utc>,
    out: &mut W,
) -> Result<()> {
    for msg in messages {
        let mut line = serde_json::to_value(msg)?;
        if let Some(fields) = line.as_object_mut() {
            fields.insert(
                "age".to_owned(),
                serde_json::Value::String(msg.describe_timestamp(now)),
            );
        }
        serde_json::to_writer(&mut *out, &line)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Write a message into the kernel ring buffer.
///
/// Without root or on a non-Linux host the write is a no-op and a warning
/// is logged.
pub fn inject(device_path: &str, priority: &str, message: &str) -> Result<()> {
    let msg = KernelMessage::new(KernelMessagePriority::convert(priority), message);
    msg.validate()
        .map_err(|e| anyhow::anyhow!("invalid kernel message: {}", e))?;

    let writer = open_writer(device_path);
    if writer.is_noop() {
        tracing::warn!(
            path = device_path,
            "kmsg writer unavailable, message not written"
        );
        return Ok(());
    }
    writer
        .write(&msg)
        .map_err(|e| anyhow::anyhow!("failed to write kernel message: {}", e))?;
    tracing::info!(priority = %msg.priority, "kernel message written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(seq: i64, text: &str) -> Message {
        Message {
            timestamp: Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
            priority: 6,
            sequence_number: seq,
            message: text.to_owned(),
        }
    }

    #[test]
    fn json_lines_one_object_per_message() {
        let mut out = Vec::new();
        let now = Utc.timestamp_opt(1_700_000_600, 0).unwrap();
        write_json_lines(&[message(1, "first"), message(2, "second")], now, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["message"], "first");
        assert_eq!(first["sequence_number"], 1);
        assert_eq!(first["age"], "9 minutes ago");
    }

    #[test]
    fn json_lines_empty_input_writes_nothing() {
        let mut out = Vec::new();
        write_json_lines(&[], Utc::now(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn inject_rejects_oversized_message() {
        let long = "x".repeat(2000);
        assert!(inject("/nonexistent/kmsg", "KERN_INFO", &long).is_err());
    }

    #[test]
    fn inject_without_device_is_noop() {
        assert!(inject("/nonexistent/kmsg", "KERN_WARNING", "hello").is_ok());
    }
}
