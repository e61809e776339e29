//! Connection record types exposed through the monitor API

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Active,
    Closed,
}

/// One tunnel as the monitoring UI sees it. Timestamps are epoch seconds.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub start_time: i64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl ConnectionRecord {
    pub fn new(id: String, host: String, port: u16, start_time: i64) -> Self {
        ConnectionRecord {
            id,
            host,
            port,
            start_time,
            bytes_in: 0,
            bytes_out: 0,
            status: ConnectionStatus::Active,
            end_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_active() {
        let record = ConnectionRecord::new("id-1".to_string(), "10.0.0.1".to_string(), 4242, 100);
        assert_eq!(record.status, ConnectionStatus::Active);
        assert_eq!(record.bytes_in, 0);
        assert_eq!(record.bytes_out, 0);
        assert!(record.end_time.is_none());
    }

    #[test]
    fn test_serializes_without_end_time_while_active() {
        let record = ConnectionRecord::new("id-1".to_string(), "10.0.0.1".to_string(), 4242, 100);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "active");
        assert!(json.get("end_time").is_none());
    }
}
