use std::hash::{Hash, Hasher};

use indexmap::IndexSet;

use crate::cpim::CpimHeaders;
use crate::error::{MsrpError, Result};
use crate::message::MsrpRequest;

const CPIM: &str = "message/cpim";

/// What is known about an inbound message from its first chunk.
///
/// Two values are equal when they describe the same `Message-ID`.
#[derive(Debug, Clone)]
pub struct ReceivedMessageMetaData {
    pub message_id: String,
    pub content_type: String,
    pub content_disposition: Option<String>,
    pub originator: Option<String>,
    pub destinations: IndexSet<String>,
    /// `None` when the sender announced the total as `*`.
    pub expected_size: Option<u64>,
}

impl ReceivedMessageMetaData {
    /// Read the metadata of the message `request` belongs to.
    ///
    /// For `message/cpim` bodies the originator, destinations, content type
    /// and disposition come from the CPIM headers; otherwise from the
    /// request's own `From-Path`, `To-Path`, `Content-Type` and
    /// `Content-Disposition`.
    pub fn from_request(request: &MsrpRequest) -> Result<Self> {
        let message_id = request.message_id.clone().ok_or(MsrpError::MissingMessageId)?;
        let outer_type = request.content_type.clone().unwrap_or_else(|| "text/plain".to_string());
        let expected_size = request.byte_range.and_then(|r| r.total);

        let mut meta = Self {
            message_id,
            content_type: outer_type.clone(),
            content_disposition: None,
            originator: None,
            destinations: IndexSet::new(),
            expected_size,
        };

        if is_cpim(&outer_type) {
            let cpim = CpimHeaders::parse(&request.body)?;
            meta.originator = cpim.get("From").map(str::to_string);
            meta.destinations = cpim
                .get_all("To")
                .chain(cpim.get_all("cc"))
                .map(str::to_string)
                .collect();
            if let Some(inner) = cpim.content_header("Content-Type") {
                meta.content_type = inner.to_string();
            }
            meta.content_disposition = cpim.content_header("Content-Disposition").map(str::to_string);
        } else {
            meta.originator = request.header("From-Path").map(str::to_string);
            meta.destinations = request
                .headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case("To-Path"))
                .flat_map(|(_, v)| v.split_whitespace())
                .map(str::to_string)
                .collect();
            meta.content_disposition = request.header("Content-Disposition").map(str::to_string);
        }
        Ok(meta)
    }
}

fn is_cpim(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map_or(false, |t| t.trim().eq_ignore_ascii_case(CPIM))
}

impl PartialEq for ReceivedMessageMetaData {
    fn eq(&self, other: &Self) -> bool {
        self.message_id == other.message_id
    }
}

impl Eq for ReceivedMessageMetaData {}

impl Hash for ReceivedMessageMetaData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.message_id.hash(state);
    }
}
