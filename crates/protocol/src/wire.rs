use crate::error::DtailError;
use crate::{DELIMITER, FIELD_DELIMITER};

/// Canonical control message requesting the peer close the connection.
pub const SYN_CLOSE: &str = ".syn close connection";
/// Canonical control message acknowledging a close request.
pub const ACK_CLOSE: &str = ".ack close connection";

/// Identifies the originator of a [`WireMessage::Data`] message (spec §6:
/// "Result classes (first field): `CLIENT|…`, `SERVER|…`, `REMOTE|<host>|…`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultClass {
    /// Produced locally by the client process itself.
    Client,
    /// Produced locally by an in-process ("serverless") server handler.
    Server,
    /// Produced by a remote server, named by hostname.
    Remote(String),
}

impl ResultClass {
    fn encode(&self) -> String {
        match self {
            ResultClass::Client => "CLIENT".to_string(),
            ResultClass::Server => "SERVER".to_string(),
            ResultClass::Remote(host) => format!("REMOTE|{host}"),
        }
    }

    fn decode(field: &str, rest: &mut std::str::Split<'_, char>) -> Result<Self, DtailError> {
        match field {
            "CLIENT" => Ok(ResultClass::Client),
            "SERVER" => Ok(ResultClass::Server),
            "REMOTE" => {
                let host = rest
                    .next()
                    .ok_or_else(|| DtailError::Protocol("REMOTE message missing host".into()))?;
                Ok(ResultClass::Remote(host.to_string()))
            }
            other => Err(DtailError::Protocol(format!(
                "unknown result class '{other}'"
            ))),
        }
    }
}

/// A record ready for display, tagged with its origin class (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// Who produced this line.
    pub class: ResultClass,
    /// Hostname of the producing server.
    pub hostname: String,
    /// The line content itself.
    pub content: String,
}

/// A server-local aggregation snapshot, transmitted as key=value pairs
/// (spec §3: "key-value aggregated tuple payload").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapReduceMessage {
    /// Ordered key/value pairs making up this tuple.
    pub fields: Vec<(String, String)>,
}

impl MapReduceMessage {
    /// Looks up a field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An in-band control message, hidden from users (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Server requests the session close.
    SynClose,
    /// Client acknowledges the close request.
    AckClose,
    /// Any other `.`-prefixed control text.
    Other(String),
}

/// One message on the wire: data, mapreduce, or control (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// A display line.
    Data(DataMessage),
    /// An aggregated tuple.
    MapReduce(MapReduceMessage),
    /// An in-band control directive.
    Control(ControlMessage),
}

impl WireMessage {
    /// Builds a data message attributed to a remote host.
    #[must_use]
    pub fn remote_data(hostname: impl Into<String>, content: impl Into<String>) -> Self {
        let hostname = hostname.into();
        WireMessage::Data(DataMessage {
            class: ResultClass::Remote(hostname.clone()),
            hostname,
            content: content.into(),
        })
    }

    /// Builds a control message requesting close.
    #[must_use]
    pub fn syn_close() -> Self {
        WireMessage::Control(ControlMessage::SynClose)
    }

    /// Builds a control message acknowledging close.
    #[must_use]
    pub fn ack_close() -> Self {
        WireMessage::Control(ControlMessage::AckClose)
    }

    /// Encodes this message into its wire form, including the trailing
    /// [`DELIMITER`] byte.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = match self {
            WireMessage::Data(data) => {
                format!(
                    "{}{FIELD_DELIMITER}{}{FIELD_DELIMITER}{}",
                    data.class.encode(),
                    data.hostname,
                    data.content
                )
            }
            WireMessage::MapReduce(mr) => {
                let mut s = "MAPREDUCE".to_string();
                for (k, v) in &mr.fields {
                    s.push(FIELD_DELIMITER as char);
                    s.push_str(k);
                    s.push('=');
                    s.push_str(v);
                }
                s
            }
            WireMessage::Control(ControlMessage::SynClose) => SYN_CLOSE.to_string(),
            WireMessage::Control(ControlMessage::AckClose) => ACK_CLOSE.to_string(),
            WireMessage::Control(ControlMessage::Other(text)) => text.clone(),
        }
        .into_bytes();
        out.push(DELIMITER);
        out
    }

    /// Decodes one message body (delimiter already stripped).
    pub fn decode(body: &str) -> Result<Self, DtailError> {
        if let Some(stripped) = body.strip_prefix('.') {
            return Ok(WireMessage::Control(match stripped {
                "syn close connection" => ControlMessage::SynClose,
                "ack close connection" => ControlMessage::AckClose,
                _ => ControlMessage::Other(body.to_string()),
            }));
        }
        let mut parts = body.split(FIELD_DELIMITER as char);
        let head = parts
            .next()
            .ok_or_else(|| DtailError::Protocol("empty wire message".into()))?;
        if head == "MAPREDUCE" {
            let fields = parts
                .filter_map(|field| field.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            return Ok(WireMessage::MapReduce(MapReduceMessage { fields }));
        }
        let class = ResultClass::decode(head, &mut parts)?;
        let hostname = parts
            .next()
            .ok_or_else(|| DtailError::Protocol("data message missing hostname".into()))?
            .to_string();
        let content = parts.collect::<Vec<_>>().join(&(FIELD_DELIMITER as char).to_string());
        Ok(WireMessage::Data(DataMessage {
            class,
            hostname,
            content,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_remote_data_message() {
        let msg = WireMessage::remote_data("web1", "Line 1");
        let encoded = msg.encode();
        assert!(encoded.ends_with(&[DELIMITER]));
        let body = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(WireMessage::decode(body).unwrap(), msg);
    }

    #[test]
    fn round_trips_mapreduce_message() {
        let msg = WireMessage::MapReduce(MapReduceMessage {
            fields: vec![
                ("hostname".to_string(), "web1".to_string()),
                ("count($line)".to_string(), "20".to_string()),
            ],
        });
        let encoded = msg.encode();
        let body = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(WireMessage::decode(body).unwrap(), msg);
    }

    #[test]
    fn control_messages_are_hidden_markers() {
        assert_eq!(
            WireMessage::decode(".syn close connection").unwrap(),
            WireMessage::syn_close()
        );
        assert_eq!(
            WireMessage::decode(".ack close connection").unwrap(),
            WireMessage::ack_close()
        );
    }

    #[test]
    fn content_may_contain_field_delimiters() {
        let msg = WireMessage::remote_data("web1", "a|b|c");
        let encoded = msg.encode();
        let body = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(WireMessage::decode(body).unwrap(), msg);
    }
}
