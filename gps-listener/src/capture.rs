//! Offline decoding of captured frames, one per line.

use std::io::BufRead;

use comfy_table::{Cell, Table};

use gps_core::codec::{hex_decode, hex_encode};
use gps_core::{GpsError, Location, MessageInput, Protocol};

/// Result of decoding one captured line.
#[derive(Debug)]
pub struct CaptureRow {
    pub line: usize,
    pub location: Option<Location>,
    pub reply: Option<Vec<u8>>,
    pub error: Option<GpsError>,
}

#[derive(Debug, Default)]
pub struct CaptureReport {
    pub rows: Vec<CaptureRow>,
    pub frames: u64,
    pub decoded: u64,
    pub replies: u64,
    pub errors: u64,
}

/// Decode every non-empty, non-comment line of `reader`.
///
/// With `hex` set each line is a hex dump of one frame; otherwise the line
/// text is the frame.
pub fn decode_capture<R: BufRead>(protocol: Protocol, reader: R, hex: bool) -> CaptureReport {
    let mut report = CaptureReport::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        report.frames += 1;
        let outcome = if hex {
            hex_decode(&text.replace(' ', "")).and_then(|bytes| protocol.parse(&MessageInput::new(bytes)))
        } else {
            protocol.parse(&MessageInput::from(text))
        };

        let row = match outcome {
            Ok(decoded) => {
                if decoded.location.is_some() {
                    report.decoded += 1;
                }
                if decoded.reply.is_some() {
                    report.replies += 1;
                }
                CaptureRow {
                    line: idx + 1,
                    location: decoded.location,
                    reply: decoded.reply,
                    error: None,
                }
            }
            Err(e) => {
                report.errors += 1;
                CaptureRow {
                    line: idx + 1,
                    location: None,
                    reply: None,
                    error: Some(e),
                }
            }
        };
        report.rows.push(row);
    }

    report
}

pub fn print_report(report: &CaptureReport) {
    println!();
    println!(
        "Frames: {} read, {} decoded, {} replies, {} errors",
        report.frames, report.decoded, report.replies, report.errors
    );
    println!();

    if report.rows.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Line", "Device", "Time (UTC)", "Lat", "Lon", "Speed (km/h)", "Hdg", "Fix", "Reply / Error",
    ]);

    for row in &report.rows {
        let loc = row.location.as_ref();
        let tail = match (&row.error, &row.reply) {
            (Some(e), _) => e.to_string(),
            (None, Some(reply)) => hex_encode(reply),
            (None, None) => "-".into(),
        };
        table.add_row(vec![
            Cell::new(row.line),
            Cell::new(
                loc.and_then(|l| l.device.as_ref())
                    .map(|d| d.to_string())
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                loc.map(|l| l.date_time.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                loc.map(|l| format!("{:.6}", l.latitude))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                loc.map(|l| format!("{:.6}", l.longitude))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                loc.map(|l| format!("{:.2}", l.speed_kph))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                loc.and_then(|l| l.heading)
                    .map(|h| format!("{h:.1}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(
                loc.map(|l| if l.valid { "yes" } else { "no" })
                    .unwrap_or("-"),
            ),
            Cell::new(tail),
        ]);
    }

    println!("{table}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
