// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Command-protocol message shapes exchanged over the to-driver and
//! to-clients rings. Every message begins with a correlation-id so a
//! client can match a driver-to-client reply back to the request that
//! caused it.

/// Client -> driver requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    AddPublication { correlation_id: i64, session_id: i32, stream_id: i32, channel: String },
    RemovePublication { correlation_id: i64, session_id: i32, stream_id: i32, channel: String },
    AddSubscription { correlation_id: i64, stream_id: i32, channel: String },
    RemoveSubscription { correlation_id: i64, registration_id: i64 },
    ClientKeepalive { client_id: i64 },
}

/// Driver -> client replies/notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverResponse {
    OnNewPublication {
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        registration_id: i64,
    },
    OnNewImage {
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
    },
    OperationSuccess { correlation_id: i64 },
    ErrorResponse { correlation_id: i64, error_code: crate::error::ErrorCode, message: String },
}

const TYPE_ADD_PUBLICATION: i32 = 1;
const TYPE_REMOVE_PUBLICATION: i32 = 2;
const TYPE_ADD_SUBSCRIPTION: i32 = 3;
const TYPE_REMOVE_SUBSCRIPTION: i32 = 4;
const TYPE_CLIENT_KEEPALIVE: i32 = 5;

impl ClientCommand {
    /// Encode as `[type:i32][fields...]`. Fixed-width fields little-endian;
    /// channel strings are length-prefixed (u32) UTF-8.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::AddPublication { correlation_id, session_id, stream_id, channel } => {
                buf.extend_from_slice(&TYPE_ADD_PUBLICATION.to_le_bytes());
                buf.extend_from_slice(&correlation_id.to_le_bytes());
                buf.extend_from_slice(&session_id.to_le_bytes());
                buf.extend_from_slice(&stream_id.to_le_bytes());
                push_string(&mut buf, channel);
            }
            Self::RemovePublication { correlation_id, session_id, stream_id, channel } => {
                buf.extend_from_slice(&TYPE_REMOVE_PUBLICATION.to_le_bytes());
                buf.extend_from_slice(&correlation_id.to_le_bytes());
                buf.extend_from_slice(&session_id.to_le_bytes());
                buf.extend_from_slice(&stream_id.to_le_bytes());
                push_string(&mut buf, channel);
            }
            Self::AddSubscription { correlation_id, stream_id, channel } => {
                buf.extend_from_slice(&TYPE_ADD_SUBSCRIPTION.to_le_bytes());
                buf.extend_from_slice(&correlation_id.to_le_bytes());
                buf.extend_from_slice(&stream_id.to_le_bytes());
                push_string(&mut buf, channel);
            }
            Self::RemoveSubscription { correlation_id, registration_id } => {
                buf.extend_from_slice(&TYPE_REMOVE_SUBSCRIPTION.to_le_bytes());
                buf.extend_from_slice(&correlation_id.to_le_bytes());
                buf.extend_from_slice(&registration_id.to_le_bytes());
            }
            Self::ClientKeepalive { client_id } => {
                buf.extend_from_slice(&TYPE_CLIENT_KEEPALIVE.to_le_bytes());
                buf.extend_from_slice(&client_id.to_le_bytes());
            }
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let mut r = Reader::new(buf);
        let type_id = r.i32()?;
        Some(match type_id {
            TYPE_ADD_PUBLICATION => Self::AddPublication {
                correlation_id: r.i64()?,
                session_id: r.i32()?,
                stream_id: r.i32()?,
                channel: r.string()?,
            },
            TYPE_REMOVE_PUBLICATION => Self::RemovePublication {
                correlation_id: r.i64()?,
                session_id: r.i32()?,
                stream_id: r.i32()?,
                channel: r.string()?,
            },
            TYPE_ADD_SUBSCRIPTION => Self::AddSubscription {
                correlation_id: r.i64()?,
                stream_id: r.i32()?,
                channel: r.string()?,
            },
            TYPE_REMOVE_SUBSCRIPTION => Self::RemoveSubscription {
                correlation_id: r.i64()?,
                registration_id: r.i64()?,
            },
            TYPE_CLIENT_KEEPALIVE => Self::ClientKeepalive { client_id: r.i64()? },
            _ => return None,
        })
    }
}

const TYPE_ON_NEW_PUBLICATION: i32 = 1;
const TYPE_ON_NEW_IMAGE: i32 = 2;
const TYPE_OPERATION_SUCCESS: i32 = 3;
const TYPE_ERROR_RESPONSE: i32 = 4;

impl DriverResponse {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::OnNewPublication { correlation_id, session_id, stream_id, registration_id } => {
                buf.extend_from_slice(&TYPE_ON_NEW_PUBLICATION.to_le_bytes());
                buf.extend_from_slice(&correlation_id.to_le_bytes());
                buf.extend_from_slice(&session_id.to_le_bytes());
                buf.extend_from_slice(&stream_id.to_le_bytes());
                buf.extend_from_slice(&registration_id.to_le_bytes());
            }
            Self::OnNewImage { correlation_id, session_id, stream_id } => {
                buf.extend_from_slice(&TYPE_ON_NEW_IMAGE.to_le_bytes());
                buf.extend_from_slice(&correlation_id.to_le_bytes());
                buf.extend_from_slice(&session_id.to_le_bytes());
                buf.extend_from_slice(&stream_id.to_le_bytes());
            }
            Self::OperationSuccess { correlation_id } => {
                buf.extend_from_slice(&TYPE_OPERATION_SUCCESS.to_le_bytes());
                buf.extend_from_slice(&correlation_id.to_le_bytes());
            }
            Self::ErrorResponse { correlation_id, error_code, message } => {
                buf.extend_from_slice(&TYPE_ERROR_RESPONSE.to_le_bytes());
                buf.extend_from_slice(&correlation_id.to_le_bytes());
                buf.extend_from_slice(&(*error_code as i32).to_le_bytes());
                push_string(&mut buf, message);
            }
        }
        buf
    }
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn i32(&mut self) -> Option<i32> {
        let v = i32::from_le_bytes(self.buf.get(self.pos..self.pos + 4)?.try_into().ok()?);
        self.pos += 4;
        Some(v)
    }

    fn i64(&mut self) -> Option<i64> {
        let v = i64::from_le_bytes(self.buf.get(self.pos..self.pos + 8)?.try_into().ok()?);
        self.pos += 8;
        Some(v)
    }

    fn string(&mut self) -> Option<String> {
        let len = u32::from_le_bytes(self.buf.get(self.pos..self.pos + 4)?.try_into().ok()?) as usize;
        self.pos += 4;
        let bytes = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_publication_round_trips() {
        let cmd = ClientCommand::AddPublication {
            correlation_id: 42,
            session_id: 1,
            stream_id: 2,
            channel: "udp://localhost:4000".into(),
        };
        let encoded = cmd.encode();
        assert_eq!(ClientCommand::decode(&encoded), Some(cmd));
    }

    #[test]
    fn remove_subscription_round_trips() {
        let cmd = ClientCommand::RemoveSubscription { correlation_id: 9, registration_id: 123 };
        assert_eq!(ClientCommand::decode(&cmd.encode()), Some(cmd));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        assert_eq!(ClientCommand::decode(&99i32.to_le_bytes()), None);
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let resp = DriverResponse::ErrorResponse {
            correlation_id: 7,
            error_code: crate::error::ErrorCode::PublicationStreamAlreadyExists,
            message: "duplicate".into(),
        };
        let encoded = resp.encode();
        assert_eq!(encoded[0..4], TYPE_ERROR_RESPONSE.to_le_bytes());
    }
}
