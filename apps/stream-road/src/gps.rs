use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use telemetry_buffer::{BoundedHistory, BufferError};
use tracing::debug;

use crate::error::BrokerError;
use crate::metrics;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One position report. Fields the sender adds beyond the coordinates are
/// kept verbatim; the timestamp is always assigned on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsSample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl GpsSample {
    pub fn from_report(report: Value) -> Result<Self, BrokerError> {
        let Value::Object(mut fields) = report else {
            return Err(BrokerError::malformed("GPS report must be a JSON object"));
        };
        let latitude = coordinate(&fields, "latitude")?;
        let longitude = coordinate(&fields, "longitude")?;
        for key in ["latitude", "longitude", "timestamp"] {
            fields.remove(key);
        }
        Ok(Self {
            latitude,
            longitude,
            extra: fields,
            timestamp: Utc::now(),
        })
    }
}

fn coordinate(fields: &Map<String, Value>, key: &str) -> Result<f64, BrokerError> {
    fields
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            BrokerError::malformed("Invalid GPS data. latitude and longitude are required.")
        })
}

/// Latest-plus-history store behind the GPS ports.
#[derive(Debug)]
pub struct GpsStore {
    history: BoundedHistory<GpsSample>,
}

impl GpsStore {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        Ok(Self {
            history: BoundedHistory::new(capacity)?,
        })
    }

    pub fn record(&self, report: Value) -> Result<GpsSample, BrokerError> {
        let sample = GpsSample::from_report(report)?;
        self.history.append(sample.clone());
        metrics::record_gps_sample();
        debug!(
            latitude = sample.latitude,
            longitude = sample.longitude,
            "gps sample recorded"
        );
        Ok(sample)
    }

    pub fn latest(&self) -> Option<GpsSample> {
        self.history.latest()
    }

    pub fn history(&self, limit: usize) -> Vec<GpsSample> {
        self.history.recent(limit)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
