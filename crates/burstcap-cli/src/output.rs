//! Output formatting

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// Print a report; text mode renders top-level fields as `key: value` lines
    pub fn print<T: Serialize>(&self, data: &T) -> anyhow::Result<()> {
        println!("{}", self.render(data)?);
        Ok(())
    }

    pub fn render<T: Serialize>(&self, data: &T) -> anyhow::Result<String> {
        let value = serde_json::to_value(data)?;
        Ok(match self {
            OutputFormat::Json => serde_json::to_string_pretty(&value)?,
            OutputFormat::Text => render_text(&value, 0),
        })
    }
}

fn render_text(value: &serde_json::Value, indent: usize) -> String {
    use serde_json::Value;

    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, v)| match v {
                Value::Object(_) => format!("{pad}{key}:\n{}", render_text(v, indent + 1)),
                _ => format!("{pad}{key}: {}", render_text(v, 0)),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{:.3}", f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// `len port ts | first bytes in hex`
pub fn packet_line(data: &[u8], port: u8, timestamp: u32, preview: usize) -> String {
    let hex: Vec<String> = data.iter().take(preview).map(|b| format!("{:02x}", b)).collect();
    format!("{:>5}B port={} t={}s | {}", data.len(), port, timestamp, hex.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Report {
        name: &'static str,
        packets: u64,
        rate: f64,
        nested: Nested,
    }

    #[derive(Serialize)]
    struct Nested {
        ok: bool,
    }

    fn report() -> Report {
        Report {
            name: "eth0",
            packets: 12,
            rate: 1.5,
            nested: Nested { ok: true },
        }
    }

    #[test]
    fn test_text_render() {
        let text = OutputFormat::Text.render(&report()).unwrap();
        assert!(text.contains("name: eth0"), "{text}");
        assert!(text.contains("packets: 12"), "{text}");
        assert!(text.contains("rate: 1.500"), "{text}");
        assert!(text.contains("nested:\n  ok: true"), "{text}");
    }

    #[test]
    fn test_json_render() {
        let json = OutputFormat::Json.render(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["packets"], 12);
        assert_eq!(value["nested"]["ok"], true);
    }

    #[test]
    fn test_packet_line() {
        let line = packet_line(&[0xde, 0xad, 0xbe, 0xef, 0x00], 1, 42, 4);
        assert_eq!(line, "    5B port=1 t=42s | de ad be ef");
    }
}
