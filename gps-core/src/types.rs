//! Shared types, error enum, and the normalized location record for gps-core.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// All errors produced by gps-core.
#[derive(Debug, Error)]
pub enum GpsError {
    #[error("frame truncated: wanted {wanted} bytes at offset {offset}, frame is {len} bytes")]
    FrameTruncated {
        offset: usize,
        wanted: usize,
        len: usize,
    },
    #[error("{protocol} frame does not match the expected pattern")]
    PatternMismatch { protocol: &'static str },
    #[error("checksum mismatch: declared {declared:02X}, computed {computed:02X}")]
    ChecksumMismatch { declared: u8, computed: u8 },
    #[error("no protocol registered for port {port}")]
    UnknownProtocol { port: u16 },
    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("no frame boundary within {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl GpsError {
    /// Short, stable label for log fields and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            GpsError::FrameTruncated { .. } => "frame_truncated",
            GpsError::PatternMismatch { .. } => "pattern_mismatch",
            GpsError::ChecksumMismatch { .. } => "checksum_mismatch",
            GpsError::UnknownProtocol { .. } => "unknown_protocol",
            GpsError::InvalidField { .. } => "invalid_field",
            GpsError::InvalidHex(_) => "invalid_hex",
            GpsError::OutOfRange { .. } => "out_of_range",
            GpsError::FrameTooLarge { .. } => "frame_too_large",
            GpsError::Io(_) => "io",
            GpsError::Config(_) => "config",
        }
    }

    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        GpsError::InvalidField {
            field,
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GpsError>;

// ---------------------------------------------------------------------------
// Device reference
// ---------------------------------------------------------------------------

/// Protocol-native identity of the device that sent a frame.
///
/// Resolution to an internal device or asset happens downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DeviceRef {
    Imei(String),
    DeviceId(String),
}

impl DeviceRef {
    /// Build an IMEI reference. Must be exactly 15 ASCII digits.
    pub fn imei(value: &str) -> Result<Self> {
        if value.len() == 15 && value.bytes().all(|b| b.is_ascii_digit()) {
            Ok(DeviceRef::Imei(value.to_string()))
        } else {
            Err(GpsError::invalid("imei", value))
        }
    }

    pub fn device_id(value: impl Into<String>) -> Self {
        DeviceRef::DeviceId(value.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeviceRef::Imei(v) | DeviceRef::DeviceId(v) => v,
        }
    }
}

impl std::fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRef::Imei(v) => write!(f, "imei:{v}"),
            DeviceRef::DeviceId(v) => write!(f, "id:{v}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Normalized location/telemetry record produced by a protocol handler.
///
/// Only constructed through [`LocationBuilder::build`], which range-checks
/// every field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub device: Option<DeviceRef>,
    pub date_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kph: f64,
    pub heading: Option<f64>,
    pub valid: bool,
    pub altitude: Option<f64>,
    pub satellites: Option<u16>,
    pub hdop: Option<f64>,
    pub gsm_signal: Option<i16>,
    pub odometer: Option<f64>,
    pub mobile_country_code: Option<u16>,
    pub mobile_network_code: Option<u16>,
    pub location_area_code: Option<u32>,
    pub cell_id: Option<u32>,
}

impl Location {
    pub fn builder(date_time: DateTime<Utc>, latitude: f64, longitude: f64) -> LocationBuilder {
        LocationBuilder::new(date_time, latitude, longitude)
    }
}

/// Mobile network identifiers reported alongside a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellTower {
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u32,
    pub cell_id: u32,
}

/// One-shot builder for [`Location`].
#[derive(Debug, Clone)]
pub struct LocationBuilder {
    device: Option<DeviceRef>,
    date_time: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    speed_kph: f64,
    heading: Option<f64>,
    valid: bool,
    altitude: Option<f64>,
    satellites: Option<u16>,
    hdop: Option<f64>,
    gsm_signal: Option<i16>,
    odometer: Option<f64>,
    cell: Option<CellTower>,
}

impl LocationBuilder {
    pub fn new(date_time: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        LocationBuilder {
            device: None,
            date_time,
            latitude,
            longitude,
            speed_kph: 0.0,
            heading: None,
            valid: true,
            altitude: None,
            satellites: None,
            hdop: None,
            gsm_signal: None,
            odometer: None,
            cell: None,
        }
    }

    pub fn device(mut self, device: DeviceRef) -> Self {
        self.device = Some(device);
        self
    }

    pub fn speed_kph(mut self, speed: f64) -> Self {
        self.speed_kph = speed;
        self
    }

    pub fn heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn satellites(mut self, satellites: u16) -> Self {
        self.satellites = Some(satellites);
        self
    }

    pub fn hdop(mut self, hdop: f64) -> Self {
        self.hdop = Some(hdop);
        self
    }

    pub fn gsm_signal(mut self, signal: i16) -> Self {
        self.gsm_signal = Some(signal);
        self
    }

    pub fn odometer(mut self, odometer: f64) -> Self {
        self.odometer = Some(odometer);
        self
    }

    pub fn cell(mut self, cell: CellTower) -> Self {
        self.cell = Some(cell);
        self
    }

    /// Validate and freeze the record.
    pub fn build(self) -> Result<Location> {
        check_range("latitude", self.latitude, -90.0, 90.0)?;
        check_range("longitude", self.longitude, -180.0, 180.0)?;
        if !self.speed_kph.is_finite() || self.speed_kph < 0.0 {
            return Err(GpsError::OutOfRange {
                field: "speed",
                value: self.speed_kph,
            });
        }
        let heading = match self.heading {
            Some(h) if !h.is_finite() => {
                return Err(GpsError::OutOfRange {
                    field: "heading",
                    value: h,
                })
            }
            Some(h) => Some(h.rem_euclid(360.0)),
            None => None,
        };

        Ok(Location {
            device: self.device,
            date_time: self.date_time,
            latitude: self.latitude,
            longitude: self.longitude,
            speed_kph: self.speed_kph,
            heading,
            valid: self.valid,
            altitude: self.altitude,
            satellites: self.satellites,
            hdop: self.hdop,
            gsm_signal: self.gsm_signal,
            odometer: self.odometer,
            mobile_country_code: self.cell.map(|c| c.mcc),
            mobile_network_code: self.cell.map(|c| c.mnc),
            location_area_code: self.cell.map(|c| c.lac),
            cell_id: self.cell.map(|c| c.cell_id),
        })
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(GpsError::OutOfRange { field, value })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
