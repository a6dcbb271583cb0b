use std::{
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use horizon_logger::{LogFile, LogMessage, TimestampedMessage};

fn msg_to_json(msg: &TimestampedMessage) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    map.insert(
        "timestamp".to_string(),
        serde_json::Value::from(msg.timestamp),
    );
    match &msg.message {
        LogMessage::Tick(tick) => {
            map.insert("tick".to_string(), serde_json::to_value(tick)?);
        }
        LogMessage::Line(line) => {
            map.insert("log".to_string(), serde_json::to_value(line)?);
        }
    }
    Ok(serde_json::Value::Object(map))
}

pub fn convert_log(input: &Path, output: &Path) -> Result<()> {
    println!("Converting log file {} to JSON", input.display());
    if !input.is_file() {
        bail!("Input file does not exist");
    }
    if output.exists() {
        bail!("Output file already exists");
    }

    let logs = LogFile::open(input)?;
    let out_file = std::fs::File::create(output)?;
    let mut writer = BufWriter::new(out_file);

    writer.write_all(b"[")?;
    for (idx, msg) in logs.messages().iter().enumerate() {
        if idx > 0 {
            writer.write_all(b",")?;
        }
        let json = msg_to_json(msg)?;
        serde_json::to_writer(&mut writer, &json).context("Failed to serialize message")?;
    }
    writer.write_all(b"]")?;
    writer.flush()?;

    println!("Converted {} messages", logs.messages().len());
    println!("Output written to {}", output.display());
    Ok(())
}
