use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use spool_api::{NewHeartbeat, QueueMessage, RecordId, parse_utc};

use crate::error::IngestError;
use crate::store::{self, RecordStore};

/// Тело сообщения очереди. Поля принимаются в нескольких написаниях:
/// разные версии агентов шлют PascalCase и camelCase.
#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(alias = "EndpointId", alias = "endpointId", alias = "DeviceId", alias = "deviceId")]
    endpoint_id: i64,
    #[serde(
        alias = "ClientTime",
        alias = "clientTime",
        deserialize_with = "deserialize_client_time"
    )]
    client_time: DateTime<Utc>,
}

fn deserialize_client_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_utc(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid client time: {raw:?}")))
}

/// Десериализация сообщения очереди и durable запись в буфер.
///
/// Ack сообщения: забота вызывающего и только после успешного
/// [`IngestAdapter::handle`].
#[derive(Clone)]
pub struct IngestAdapter {
    store: Arc<RecordStore>,
}

impl IngestAdapter {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Разобрать тело сообщения. Не трогает буфер.
    pub fn decode(body: &[u8]) -> Result<NewHeartbeat, IngestError> {
        let payload: Payload = serde_json::from_slice(body)?;
        Ok(NewHeartbeat {
            device_id: payload.endpoint_id,
            client_time: payload.client_time,
        })
    }

    /// Разобрать сообщение и записать heartbeat в буфер.
    pub async fn handle(&self, message: &QueueMessage) -> Result<RecordId, IngestError> {
        let record = Self::decode(&message.body)?;
        let id = store::blocking(&self.store, move |s| s.append(record)).await?;
        tracing::debug!(
            message = %message.id,
            record = %id,
            device_id = record.device_id,
            client_time = %record.client_time,
            "heartbeat buffered"
        );
        Ok(id)
    }
}
